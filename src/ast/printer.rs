//! Prints an AST back to Pang source.
//!
//! The output is parseable: parsing it again produces a structurally equal
//! tree. Nested compound operands are parenthesized unconditionally so the
//! printed form is deterministic for a given tree.

use super::*;

const INDENT: &str = "    ";

pub fn print_module(module: &Module) -> String {
    let mut out = String::new();
    for import in &module.imports {
        match &import.items {
            ImportItems::Wildcard => {
                out.push_str(&format!("import \"{}\"\n", import.module_path));
            }
            ImportItems::Named(items) => {
                out.push_str(&format!(
                    "import \"{}\" {{ {} }}\n",
                    import.module_path,
                    items.join(", ")
                ));
            }
        }
    }
    if !module.imports.is_empty() {
        out.push('\n');
    }
    for decl in &module.decls {
        print_decl(decl, 0, &mut out);
        out.push('\n');
    }
    out
}

fn push_indent(depth: usize, out: &mut String) {
    for _ in 0..depth {
        out.push_str(INDENT);
    }
}

fn print_decl(decl: &Decl, depth: usize, out: &mut String) {
    push_indent(depth, out);
    match decl {
        Decl::Function(f) => print_function(f, depth, out),
        Decl::Variable(v) => print_variable(v, out),
        Decl::Class(c) => print_class(c, depth, out),
        Decl::Struct(s) => print_struct(s, depth, out),
        Decl::Enum(e) => print_enum(e, depth, out),
    }
}

fn print_params(params: &[Param], out: &mut String) {
    out.push('(');
    for (i, p) in params.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        if p.name == "self" {
            out.push_str("self");
        } else {
            out.push_str(&format!("{}: {}", p.name, print_type(&p.ty)));
        }
    }
    out.push(')');
}

fn print_function(f: &FunctionDecl, depth: usize, out: &mut String) {
    if f.is_export {
        out.push_str("export ");
    }
    if f.is_foreign {
        out.push_str("foreign ");
    }
    out.push_str("fn ");
    out.push_str(&f.name);
    print_params(&f.params, out);
    out.push_str(&format!(" -> {}", print_type(&f.return_type)));
    match &f.body {
        Some(body) => {
            out.push(' ');
            print_block(body, depth, out);
            out.push('\n');
        }
        None => out.push('\n'),
    }
}

fn print_variable(v: &VariableDecl, out: &mut String) {
    if v.is_export {
        out.push_str("export ");
    }
    out.push_str("let ");
    if v.is_mutable {
        out.push_str("mut ");
    }
    out.push_str(&v.name);
    if let Some(ty) = &v.ty {
        out.push_str(&format!(": {}", print_type(ty)));
    }
    if let Some(init) = &v.init {
        out.push_str(&format!(" = {}", print_expr(init)));
    }
    out.push('\n');
}

fn print_class(c: &ClassDecl, depth: usize, out: &mut String) {
    out.push_str("class ");
    out.push_str(&c.name);
    if !c.generic_params.is_empty() {
        out.push_str(&format!("<{}>", c.generic_params.join(", ")));
    }
    if let Some(base) = &c.base_class {
        out.push_str(&format!(": {}", base));
    }
    out.push_str(" {\n");
    for member in &c.members {
        push_indent(depth + 1, out);
        match member {
            ClassMember::Field(field) => {
                if !field.is_public {
                    out.push_str("priv ");
                }
                out.push_str(&format!("let {}: {}", field.name, print_type(&field.ty)));
                if let Some(init) = &field.init {
                    out.push_str(&format!(" = {}", print_expr(init)));
                }
                out.push('\n');
            }
            ClassMember::Method(m) => {
                if !m.is_public {
                    out.push_str("priv ");
                }
                if m.is_static {
                    out.push_str("static ");
                }
                if m.is_virtual {
                    out.push_str("virtual ");
                }
                if m.is_override {
                    out.push_str("override ");
                }
                if m.name == c.name {
                    // Constructor: the name doubles as the declarator.
                    out.push_str(&m.name);
                } else {
                    out.push_str("fn ");
                    out.push_str(&m.name);
                }
                print_params(&m.params, out);
                out.push_str(&format!(" -> {} ", print_type(&m.return_type)));
                print_block(&m.body, depth + 1, out);
                out.push('\n');
            }
        }
    }
    push_indent(depth, out);
    out.push_str("}\n");
}

fn print_struct(s: &StructDecl, depth: usize, out: &mut String) {
    if s.is_foreign {
        out.push_str("foreign ");
    }
    out.push_str(&format!("struct {} {{\n", s.name));
    for field in &s.fields {
        push_indent(depth + 1, out);
        out.push_str(&format!("{}: {}\n", field.name, print_type(&field.ty)));
    }
    push_indent(depth, out);
    out.push_str("}\n");
}

fn print_enum(e: &EnumDecl, depth: usize, out: &mut String) {
    if e.is_foreign {
        out.push_str("foreign ");
    }
    out.push_str(&format!("enum {} {{\n", e.name));
    for variant in &e.variants {
        push_indent(depth + 1, out);
        out.push_str(&variant.name);
        out.push('\n');
    }
    push_indent(depth, out);
    out.push_str("}\n");
}

fn print_block(block: &Block, depth: usize, out: &mut String) {
    out.push_str("{\n");
    for stmt in &block.statements {
        print_stmt(stmt, depth + 1, out);
    }
    push_indent(depth, out);
    out.push('}');
}

fn print_stmt(stmt: &Stmt, depth: usize, out: &mut String) {
    push_indent(depth, out);
    print_stmt_bare(stmt, depth, out);
    out.push('\n');
}

/// Prints a statement without indentation or trailing newline.
fn print_stmt_bare(stmt: &Stmt, depth: usize, out: &mut String) {
    match stmt {
        Stmt::Expr(e) => out.push_str(&print_expr(e)),
        Stmt::Block(b) => print_block(b, depth, out),
        Stmt::If {
            condition,
            then_branch,
            else_branch,
            ..
        } => {
            out.push_str(&format!("if {} ", print_expr(condition)));
            print_branch(then_branch, depth, out);
            if let Some(else_branch) = else_branch {
                // `else` must follow on the same line; a non-block branch
                // needs an explicit terminator first.
                if matches!(**then_branch, Stmt::Block(_)) {
                    out.push_str(" else ");
                } else {
                    out.push_str("; else ");
                }
                print_branch(else_branch, depth, out);
            }
        }
        Stmt::While { condition, body, .. } => {
            out.push_str(&format!("while {} ", print_expr(condition)));
            print_branch(body, depth, out);
        }
        Stmt::For {
            iterator, iterable, body, ..
        } => {
            out.push_str(&format!("for {} in {} ", iterator, print_expr(iterable)));
            print_branch(body, depth, out);
        }
        Stmt::Return { value, .. } => match value {
            Some(v) => out.push_str(&format!("return {}", print_expr(v))),
            None => out.push_str("return"),
        },
        Stmt::Decl(decl) => match decl {
            Decl::Variable(v) => {
                let mut line = String::new();
                print_variable(v, &mut line);
                out.push_str(line.trim_end());
            }
            other => {
                let mut text = String::new();
                print_decl(other, depth, &mut text);
                out.push_str(text.trim_end());
            }
        },
    }
}

fn print_branch(stmt: &Stmt, depth: usize, out: &mut String) {
    match stmt {
        Stmt::Block(b) => print_block(b, depth, out),
        other => print_stmt_bare(other, depth, out),
    }
}

pub fn print_expr(expr: &Expr) -> String {
    match &expr.kind {
        ExprKind::Literal(lit) => print_literal(lit),
        ExprKind::Ident(name) => name.clone(),
        ExprKind::Binary { op, lhs, rhs } => format!(
            "{} {} {}",
            print_operand(lhs),
            op.as_str(),
            print_operand(rhs)
        ),
        ExprKind::Unary { op, operand } => format!("{}{}", op.as_str(), print_operand(operand)),
        ExprKind::Postfix { op, operand } => format!("{}{}", print_operand(operand), op.as_str()),
        ExprKind::Call { callee, args } => {
            let args: Vec<String> = args.iter().map(print_expr).collect();
            format!("{}({})", print_operand(callee), args.join(", "))
        }
        ExprKind::Member { object, member } => format!("{}.{}", print_operand(object), member),
        ExprKind::Index { object, index } => {
            format!("{}[{}]", print_operand(object), print_expr(index))
        }
        ExprKind::Assign { op, target, value } => format!(
            "{} {} {}",
            print_operand(target),
            op.as_str(),
            print_operand(value)
        ),
        ExprKind::Cast {
            target,
            value,
            fallible,
        } => {
            let kw = if *fallible { "try_cast" } else { "cast" };
            format!("{}<{}>({})", kw, print_type(target), print_expr(value))
        }
        ExprKind::AsCast { value, target } => {
            format!("{} as {}", print_operand(value), print_type(target))
        }
    }
}

/// Operand position: compound expressions get parentheses so the reparsed
/// tree keeps its shape.
fn print_operand(expr: &Expr) -> String {
    let compound = matches!(
        expr.kind,
        ExprKind::Binary { .. }
            | ExprKind::Unary { .. }
            | ExprKind::Postfix { .. }
            | ExprKind::Assign { .. }
            | ExprKind::AsCast { .. }
    );
    if compound {
        format!("({})", print_expr(expr))
    } else {
        print_expr(expr)
    }
}

fn print_literal(lit: &Literal) -> String {
    match lit {
        Literal::Int { value, suffix } => match suffix {
            Some(s) => format!("{}{}", value, s.as_str()),
            None => value.to_string(),
        },
        Literal::Float { value, suffix } => {
            let body = if value.fract() == 0.0 && value.is_finite() {
                format!("{:.1}", value)
            } else {
                value.to_string()
            };
            match suffix {
                Some(s) => format!("{}{}", body, s.as_str()),
                None => body,
            }
        }
        Literal::Str(s) => {
            let mut escaped = String::with_capacity(s.len() + 2);
            escaped.push('"');
            for c in s.chars() {
                match c {
                    '"' => escaped.push_str("\\\""),
                    '\\' => escaped.push_str("\\\\"),
                    '\n' => escaped.push_str("\\n"),
                    '\t' => escaped.push_str("\\t"),
                    '\r' => escaped.push_str("\\r"),
                    '\0' => escaped.push_str("\\0"),
                    c => escaped.push(c),
                }
            }
            escaped.push('"');
            escaped
        }
        Literal::Bool(b) => b.to_string(),
        Literal::Null => "null".to_string(),
    }
}

pub fn print_type(ty: &TypeExpr) -> String {
    match &ty.kind {
        TypeExprKind::Primitive(p) => p.as_str().to_string(),
        TypeExprKind::Named(name) => name.clone(),
        TypeExprKind::Const(inner) => format!("const {}", print_type(inner)),
        TypeExprKind::Array { elem, size } => format!("{}[{}]", print_type(elem), size),
        TypeExprKind::Pointer { kind, pointee } => {
            format!("{} {}", kind.as_str(), print_type(pointee))
        }
        TypeExprKind::Generic { name, args } => {
            let args: Vec<String> = args.iter().map(print_type).collect();
            format!("{}<{}>", name, args.join(", "))
        }
    }
}
