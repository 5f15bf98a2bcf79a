//! Structural AST equality.
//!
//! Compares the printed surface of two trees: source locations and node ids
//! never participate, nor do the loader-assigned module name and file path.
//! Backs the parse, print, reparse round-trip property.

use super::*;

pub fn module_eq(a: &Module, b: &Module) -> bool {
    slice_eq(&a.imports, &b.imports, import_eq) && slice_eq(&a.decls, &b.decls, decl_eq)
}

fn slice_eq<T>(a: &[T], b: &[T], eq: impl Fn(&T, &T) -> bool) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| eq(x, y))
}

fn opt_eq<T>(a: &Option<T>, b: &Option<T>, eq: impl Fn(&T, &T) -> bool) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => eq(a, b),
        (None, None) => true,
        _ => false,
    }
}

fn import_eq(a: &ImportDecl, b: &ImportDecl) -> bool {
    a.module_path == b.module_path && a.items == b.items
}

pub fn decl_eq(a: &Decl, b: &Decl) -> bool {
    match (a, b) {
        (Decl::Function(a), Decl::Function(b)) => function_eq(a, b),
        (Decl::Variable(a), Decl::Variable(b)) => variable_eq(a, b),
        (Decl::Class(a), Decl::Class(b)) => class_eq(a, b),
        (Decl::Struct(a), Decl::Struct(b)) => struct_eq(a, b),
        (Decl::Enum(a), Decl::Enum(b)) => enum_eq(a, b),
        _ => false,
    }
}

fn function_eq(a: &FunctionDecl, b: &FunctionDecl) -> bool {
    a.name == b.name
        && slice_eq(&a.params, &b.params, param_eq)
        && type_eq(&a.return_type, &b.return_type)
        && opt_eq(&a.body, &b.body, block_eq)
        && a.is_foreign == b.is_foreign
        && a.is_export == b.is_export
}

fn param_eq(a: &Param, b: &Param) -> bool {
    a.name == b.name && type_eq(&a.ty, &b.ty)
}

fn variable_eq(a: &VariableDecl, b: &VariableDecl) -> bool {
    a.name == b.name
        && opt_eq(&a.ty, &b.ty, type_eq)
        && opt_eq(&a.init, &b.init, expr_eq)
        && a.is_mutable == b.is_mutable
        && a.is_export == b.is_export
}

fn class_eq(a: &ClassDecl, b: &ClassDecl) -> bool {
    a.name == b.name
        && a.generic_params == b.generic_params
        && a.base_class == b.base_class
        && slice_eq(&a.members, &b.members, member_eq)
}

fn member_eq(a: &ClassMember, b: &ClassMember) -> bool {
    match (a, b) {
        (ClassMember::Field(a), ClassMember::Field(b)) => {
            a.name == b.name
                && type_eq(&a.ty, &b.ty)
                && opt_eq(&a.init, &b.init, expr_eq)
                && a.is_public == b.is_public
        }
        (ClassMember::Method(a), ClassMember::Method(b)) => {
            a.name == b.name
                && slice_eq(&a.params, &b.params, param_eq)
                && type_eq(&a.return_type, &b.return_type)
                && block_eq(&a.body, &b.body)
                && a.is_public == b.is_public
                && a.is_static == b.is_static
                && a.is_virtual == b.is_virtual
                && a.is_override == b.is_override
        }
        _ => false,
    }
}

fn struct_eq(a: &StructDecl, b: &StructDecl) -> bool {
    a.name == b.name
        && a.is_foreign == b.is_foreign
        && slice_eq(&a.fields, &b.fields, |a, b| {
            a.name == b.name && type_eq(&a.ty, &b.ty)
        })
}

fn enum_eq(a: &EnumDecl, b: &EnumDecl) -> bool {
    a.name == b.name
        && a.is_foreign == b.is_foreign
        && slice_eq(&a.variants, &b.variants, |a, b| a.name == b.name)
}

fn block_eq(a: &Block, b: &Block) -> bool {
    slice_eq(&a.statements, &b.statements, stmt_eq)
}

pub fn stmt_eq(a: &Stmt, b: &Stmt) -> bool {
    match (a, b) {
        (Stmt::Expr(a), Stmt::Expr(b)) => expr_eq(a, b),
        (Stmt::Block(a), Stmt::Block(b)) => block_eq(a, b),
        (
            Stmt::If {
                condition: ca,
                then_branch: ta,
                else_branch: ea,
                ..
            },
            Stmt::If {
                condition: cb,
                then_branch: tb,
                else_branch: eb,
                ..
            },
        ) => expr_eq(ca, cb) && stmt_eq(ta, tb) && opt_eq(ea, eb, |x, y| stmt_eq(x, y)),
        (
            Stmt::While {
                condition: ca,
                body: ba,
                ..
            },
            Stmt::While {
                condition: cb,
                body: bb,
                ..
            },
        ) => expr_eq(ca, cb) && stmt_eq(ba, bb),
        (
            Stmt::For {
                iterator: ia,
                iterable: ea,
                body: ba,
                ..
            },
            Stmt::For {
                iterator: ib,
                iterable: eb,
                body: bb,
                ..
            },
        ) => ia == ib && expr_eq(ea, eb) && stmt_eq(ba, bb),
        (Stmt::Return { value: va, .. }, Stmt::Return { value: vb, .. }) => {
            opt_eq(va, vb, expr_eq)
        }
        (Stmt::Decl(a), Stmt::Decl(b)) => decl_eq(a, b),
        _ => false,
    }
}

pub fn expr_eq(a: &Expr, b: &Expr) -> bool {
    match (&a.kind, &b.kind) {
        (ExprKind::Literal(a), ExprKind::Literal(b)) => a == b,
        (ExprKind::Ident(a), ExprKind::Ident(b)) => a == b,
        (
            ExprKind::Binary {
                op: oa,
                lhs: la,
                rhs: ra,
            },
            ExprKind::Binary {
                op: ob,
                lhs: lb,
                rhs: rb,
            },
        ) => oa == ob && expr_eq(la, lb) && expr_eq(ra, rb),
        (
            ExprKind::Unary {
                op: oa,
                operand: ea,
            },
            ExprKind::Unary {
                op: ob,
                operand: eb,
            },
        ) => oa == ob && expr_eq(ea, eb),
        (
            ExprKind::Postfix {
                op: oa,
                operand: ea,
            },
            ExprKind::Postfix {
                op: ob,
                operand: eb,
            },
        ) => oa == ob && expr_eq(ea, eb),
        (
            ExprKind::Call {
                callee: ca,
                args: aa,
            },
            ExprKind::Call {
                callee: cb,
                args: ab,
            },
        ) => expr_eq(ca, cb) && slice_eq(aa, ab, expr_eq),
        (
            ExprKind::Member {
                object: oa,
                member: ma,
            },
            ExprKind::Member {
                object: ob,
                member: mb,
            },
        ) => ma == mb && expr_eq(oa, ob),
        (
            ExprKind::Index {
                object: oa,
                index: ia,
            },
            ExprKind::Index {
                object: ob,
                index: ib,
            },
        ) => expr_eq(oa, ob) && expr_eq(ia, ib),
        (
            ExprKind::Assign {
                op: oa,
                target: ta,
                value: va,
            },
            ExprKind::Assign {
                op: ob,
                target: tb,
                value: vb,
            },
        ) => oa == ob && expr_eq(ta, tb) && expr_eq(va, vb),
        (
            ExprKind::Cast {
                target: ta,
                value: va,
                fallible: fa,
            },
            ExprKind::Cast {
                target: tb,
                value: vb,
                fallible: fb,
            },
        ) => fa == fb && type_eq(ta, tb) && expr_eq(va, vb),
        (
            ExprKind::AsCast {
                value: va,
                target: ta,
            },
            ExprKind::AsCast {
                value: vb,
                target: tb,
            },
        ) => type_eq(ta, tb) && expr_eq(va, vb),
        _ => false,
    }
}

pub fn type_eq(a: &TypeExpr, b: &TypeExpr) -> bool {
    match (&a.kind, &b.kind) {
        (TypeExprKind::Primitive(a), TypeExprKind::Primitive(b)) => a == b,
        (TypeExprKind::Named(a), TypeExprKind::Named(b)) => a == b,
        (TypeExprKind::Const(a), TypeExprKind::Const(b)) => type_eq(a, b),
        (
            TypeExprKind::Array { elem: ea, size: sa },
            TypeExprKind::Array { elem: eb, size: sb },
        ) => sa == sb && type_eq(ea, eb),
        (
            TypeExprKind::Pointer {
                kind: ka,
                pointee: pa,
            },
            TypeExprKind::Pointer {
                kind: kb,
                pointee: pb,
            },
        ) => ka == kb && type_eq(pa, pb),
        (
            TypeExprKind::Generic { name: na, args: aa },
            TypeExprKind::Generic { name: nb, args: ab },
        ) => na == nb && slice_eq(aa, ab, type_eq),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DiagnosticEmitter;
    use crate::lexer::Lexer;
    use crate::parser::Parser;
    use crate::source::SourceFile;

    fn parse(source: &str) -> Module {
        let file = SourceFile::new("test.pang", source);
        let mut diagnostics = DiagnosticEmitter::new();
        let tokens = Lexer::new(&file, &mut diagnostics).tokenize();
        let module = Parser::new(tokens, &mut diagnostics).parse_module("test", "test.pang");
        assert!(!diagnostics.has_errors());
        module
    }

    #[test]
    fn test_equal_structure_despite_different_layout() {
        let a = parse("fn f(x: i32) -> i32 { return x + 1 }");
        let b = parse("fn f(x: i32) -> i32 {\n\n    return x + 1\n}");
        assert!(module_eq(&a, &b));
    }

    #[test]
    fn test_operator_difference_detected() {
        let a = parse("fn f() -> i32 { return 1 + 2 }");
        let b = parse("fn f() -> i32 { return 1 - 2 }");
        assert!(!module_eq(&a, &b));
    }

    #[test]
    fn test_flag_difference_detected() {
        let a = parse("export fn f() -> void { }");
        let b = parse("fn f() -> void { }");
        assert!(!module_eq(&a, &b));
    }

    #[test]
    fn test_type_difference_detected() {
        let a = parse("fn f(p: cptr u8) -> void { }");
        let b = parse("fn f(p: unique u8) -> void { }");
        assert!(!module_eq(&a, &b));
    }
}
