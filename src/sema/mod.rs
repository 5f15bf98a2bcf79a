//! Semantic analysis.
//!
//! Two passes over the program: pass 1 collects each dependency module's
//! exported symbols from declaration signatures, pass 2 gives every module a
//! fresh global scope, injects its imports, and checks it in source order.
//! Every body is analyzed exactly once. Synthesized expression types land in
//! a side table keyed by node id; the AST is never mutated.

pub mod scope;
pub mod types;

pub use scope::{ScopeStack, Symbol};
pub use types::{common_numeric_type, SemanticType, TypeKind};

use crate::ast::*;
use crate::builtins::BuiltinRegistry;
use crate::error::DiagnosticEmitter;
use indexmap::IndexMap;
use std::collections::HashMap;

/// Expression-type side table, keyed by AST node identity.
pub type ExprTypes = HashMap<NodeId, SemanticType>;

/// Foreign printf-family functions with unconstrained arity.
pub const VARIADIC_FOREIGN_FUNCTIONS: &[&str] = &[
    "printf", "fprintf", "sprintf", "snprintf", "scanf", "fscanf", "sscanf",
];

/// Result of analyzing a program.
pub struct Analysis {
    pub expr_types: ExprTypes,
}

pub struct Analyzer<'a> {
    diagnostics: &'a mut DiagnosticEmitter,
    builtins: &'a BuiltinRegistry,
    scopes: ScopeStack,
    export_tables: IndexMap<String, IndexMap<String, Symbol>>,
    expr_types: ExprTypes,
    current_module: String,
    current_class: Option<String>,
    current_return: Option<SemanticType>,
}

impl<'a> Analyzer<'a> {
    pub fn new(diagnostics: &'a mut DiagnosticEmitter, builtins: &'a BuiltinRegistry) -> Self {
        Self {
            diagnostics,
            builtins,
            scopes: ScopeStack::new(),
            export_tables: IndexMap::new(),
            expr_types: ExprTypes::new(),
            current_module: String::new(),
            current_class: None,
            current_return: None,
        }
    }

    pub fn analyze(mut self, program: &Program) -> Analysis {
        // Pass 1: export tables for every dependency module.
        for module in &program.modules {
            let table = self.collect_exports(module);
            self.export_tables.insert(module.name.clone(), table);
        }

        // Pass 2: dependency modules in load order, then the main module.
        for module in &program.modules {
            self.analyze_module(module);
        }
        self.analyze_module(&program.main);

        Analysis {
            expr_types: self.expr_types,
        }
    }

    // ========================================================================
    // Pass 1: export collection
    // ========================================================================

    /// Builds the export table from declaration signatures alone. Signature
    /// conversion emits no diagnostics, so nothing is reported twice.
    fn collect_exports(&mut self, module: &Module) -> IndexMap<String, Symbol> {
        self.current_module = module.name.clone();
        let mut table = IndexMap::new();

        for decl in &module.decls {
            match decl {
                Decl::Function(f) if f.is_export => {
                    let symbol = self.function_symbol(f);
                    table.insert(f.name.clone(), symbol);
                }
                Decl::Variable(v) if v.is_export => {
                    let ty = match (&v.ty, &v.init) {
                        (Some(declared), _) => self.convert_type(declared),
                        // Shallow inference: only a literal initializer can
                        // type an exported variable ahead of its analysis.
                        (None, Some(init)) => match &init.kind {
                            ExprKind::Literal(lit) => literal_type(lit),
                            _ => SemanticType::error(),
                        },
                        (None, None) => SemanticType::error(),
                    };
                    let symbol = Symbol::new(&v.name, ty, v.is_mutable, v.location.clone())
                        .initialized()
                        .in_module(&module.name)
                        .exported(true);
                    table.insert(v.name.clone(), symbol);
                }
                _ => {}
            }
        }

        table
    }

    // ========================================================================
    // Pass 2: module analysis
    // ========================================================================

    fn analyze_module(&mut self, module: &Module) {
        self.current_module = module.name.clone();
        self.scopes = ScopeStack::new();
        self.builtins.install(&mut self.scopes);

        for import in &module.imports {
            self.inject_import(import);
        }
        for decl in &module.decls {
            self.analyze_decl(decl);
        }
    }

    fn inject_import(&mut self, import: &ImportDecl) {
        // An unresolved module was already reported by the loader.
        let Some(table) = self.export_tables.get(&import.module_path) else {
            return;
        };

        let mut symbols = Vec::new();
        let mut missing = Vec::new();
        match &import.items {
            ImportItems::Wildcard => symbols.extend(table.values().cloned()),
            ImportItems::Named(names) => {
                for name in names {
                    match table.get(name) {
                        Some(symbol) => symbols.push(symbol.clone()),
                        None => missing.push(name.clone()),
                    }
                }
            }
        }

        for symbol in symbols {
            self.scopes.define_global(symbol);
        }
        for name in missing {
            self.diagnostics.error(
                import.location.clone(),
                format!("Module '{}' does not export '{}'", import.module_path, name),
            );
        }
    }

    // ========================================================================
    // Declarations
    // ========================================================================

    fn analyze_decl(&mut self, decl: &Decl) {
        match decl {
            Decl::Function(f) => self.analyze_function(f),
            Decl::Variable(v) => self.analyze_variable(v),
            Decl::Class(c) => self.analyze_class(c),
            Decl::Struct(s) => self.analyze_struct(s),
            Decl::Enum(e) => self.analyze_enum(e),
        }
    }

    fn function_symbol(&mut self, f: &FunctionDecl) -> Symbol {
        let params = f.params.iter().map(|p| self.convert_type(&p.ty)).collect();
        let ret = self.convert_type(&f.return_type);
        let module = self.current_module.clone();
        Symbol::new(&f.name, SemanticType::function(params, ret), false, f.location.clone())
            .initialized()
            .in_module(module)
            .exported(f.is_export)
    }

    fn analyze_function(&mut self, f: &FunctionDecl) {
        let symbol = self.function_symbol(f);
        self.scopes.define(symbol);

        let Some(body) = (!f.is_foreign).then_some(f.body.as_ref()).flatten() else {
            return;
        };

        self.scopes.push();
        for param in &f.params {
            self.bind_param(param);
        }
        let ret = self.convert_type(&f.return_type);
        let prev_return = self.current_return.replace(ret);
        self.analyze_block(body);
        self.current_return = prev_return;
        self.scopes.pop();
    }

    fn bind_param(&mut self, param: &Param) {
        let ty = self.convert_type(&param.ty);
        let module = self.current_module.clone();
        self.scopes.define(
            Symbol::new(&param.name, ty, false, param.location.clone())
                .initialized()
                .in_module(module),
        );
    }

    fn analyze_variable(&mut self, v: &VariableDecl) {
        let declared = v.ty.as_ref().map(|t| self.convert_type(t));
        let init_ty = v.init.as_ref().map(|e| self.check_expr(e));

        let ty = match (declared, init_ty) {
            (Some(declared), Some(init_ty)) => {
                if !init_ty.is_compatible_with(&declared) {
                    self.diagnostics.error(
                        v.location.clone(),
                        format!(
                            "Type mismatch in variable initialization: expected {}, got {}",
                            declared, init_ty
                        ),
                    );
                }
                declared
            }
            (Some(declared), None) => declared,
            (None, Some(init_ty)) => init_ty,
            (None, None) => {
                self.diagnostics.error(
                    v.location.clone(),
                    format!("Cannot infer type for variable {}", v.name),
                );
                SemanticType::error()
            }
        };

        if self.scopes.is_defined_in_current(&v.name) {
            self.diagnostics.error(
                v.location.clone(),
                format!("Redefinition of variable {}", v.name),
            );
            return;
        }

        let module = self.current_module.clone();
        let mut symbol = Symbol::new(&v.name, ty, v.is_mutable, v.location.clone())
            .in_module(module)
            .exported(v.is_export);
        symbol.is_initialized = v.init.is_some();
        self.scopes.define(symbol);
    }

    fn analyze_class(&mut self, c: &ClassDecl) {
        let module = self.current_module.clone();

        // The class name registers as a type, then the constructor function
        // overwrites it; expression lookup finds the callable while type
        // resolution goes by name.
        self.scopes.define(
            Symbol::new(&c.name, SemanticType::primitive(&c.name), false, c.location.clone())
                .initialized()
                .in_module(module.clone()),
        );

        let prev_class = self.current_class.replace(c.name.clone());

        let ctor_params: Vec<SemanticType> = c
            .members
            .iter()
            .find_map(|m| match m {
                ClassMember::Method(m) if m.name == c.name => Some(
                    m.params
                        .iter()
                        .map(|p| self.convert_type(&p.ty))
                        .collect::<Vec<_>>(),
                ),
                _ => None,
            })
            .unwrap_or_default();
        let ctor_ty = SemanticType::function(ctor_params, SemanticType::primitive(&c.name));
        self.scopes.define(
            Symbol::new(&c.name, ctor_ty, false, c.location.clone())
                .initialized()
                .in_module(module),
        );

        self.scopes.push();
        for member in &c.members {
            match member {
                ClassMember::Method(m) => self.analyze_method(c, m),
                ClassMember::Field(field) => {
                    let field_ty = self.convert_type(&field.ty);
                    if field_ty.is_error() {
                        self.diagnostics.error(
                            field.location.clone(),
                            format!("Invalid field type: {}", field.name),
                        );
                    }
                    if let Some(init) = &field.init {
                        let init_ty = self.check_expr(init);
                        if !init_ty.is_compatible_with(&field_ty) {
                            self.diagnostics.error(
                                field.location.clone(),
                                format!(
                                    "Type mismatch in field initializer: expected {}, got {}",
                                    field_ty, init_ty
                                ),
                            );
                        }
                    }
                }
            }
        }
        self.scopes.pop();

        self.current_class = prev_class;
    }

    fn analyze_method(&mut self, c: &ClassDecl, m: &MethodMember) {
        let module = self.current_module.clone();
        let params: Vec<SemanticType> = m.params.iter().map(|p| self.convert_type(&p.ty)).collect();
        let ret = self.convert_type(&m.return_type);
        self.scopes.define(
            Symbol::new(&m.name, SemanticType::function(params, ret.clone()), false, m.location.clone())
                .initialized()
                .in_module(module.clone()),
        );

        self.scopes.push();
        for param in &m.params {
            self.bind_param(param);
        }

        // A constructor without a `self` parameter still gets a mutable
        // `self` binding typed as the class.
        let is_constructor = m.name == c.name;
        if is_constructor && !m.params.iter().any(|p| p.name == "self") {
            self.scopes.define(
                Symbol::new("self", SemanticType::primitive(&c.name), true, m.location.clone())
                    .initialized()
                    .in_module(module),
            );
        }

        let prev_return = self.current_return.replace(ret);
        self.analyze_block(&m.body);
        self.current_return = prev_return;
        self.scopes.pop();
    }

    fn analyze_struct(&mut self, s: &StructDecl) {
        let module = self.current_module.clone();
        self.scopes.define(
            Symbol::new(&s.name, SemanticType::primitive(&s.name), false, s.location.clone())
                .initialized()
                .in_module(module),
        );

        for field in &s.fields {
            let field_ty = self.convert_type(&field.ty);
            if field_ty.is_error() {
                self.diagnostics.error(
                    field.location.clone(),
                    format!("Invalid field type: {}", field.name),
                );
            }
        }
    }

    fn analyze_enum(&mut self, e: &EnumDecl) {
        let module = self.current_module.clone();
        self.scopes.define(
            Symbol::new(&e.name, SemanticType::primitive(&e.name), false, e.location.clone())
                .initialized()
                .in_module(module.clone()),
        );

        // Each variant is a symbol of the enum type in the enclosing scope.
        for variant in &e.variants {
            self.scopes.define(
                Symbol::new(&variant.name, SemanticType::primitive(&e.name), false, variant.location.clone())
                    .initialized()
                    .in_module(module.clone()),
            );
        }
    }

    // ========================================================================
    // Statements
    // ========================================================================

    fn analyze_block(&mut self, block: &Block) {
        self.scopes.push();
        for stmt in &block.statements {
            self.analyze_stmt(stmt);
        }
        self.scopes.pop();
    }

    fn analyze_stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Expr(e) => {
                self.check_expr(e);
            }
            Stmt::Block(b) => self.analyze_block(b),
            Stmt::If {
                condition,
                then_branch,
                else_branch,
                ..
            } => {
                self.check_condition(condition, "If condition must be boolean");
                self.analyze_stmt(then_branch);
                if let Some(else_branch) = else_branch {
                    self.analyze_stmt(else_branch);
                }
            }
            Stmt::While { condition, body, .. } => {
                self.check_condition(condition, "While condition must be boolean");
                self.analyze_stmt(body);
            }
            Stmt::For {
                iterator,
                iterable,
                body,
                location,
            } => {
                let iter_ty = self.check_expr(iterable);
                let elem_ty = match &iter_ty.kind {
                    TypeKind::Array { elem, .. } => (**elem).clone(),
                    _ if iter_ty.is_numeric() => iter_ty.clone(),
                    _ if iter_ty.is_error() => SemanticType::error(),
                    _ => {
                        self.diagnostics.error(
                            iterable.location.clone(),
                            format!("Type {} is not iterable", iter_ty),
                        );
                        SemanticType::primitive("i32")
                    }
                };

                self.scopes.push();
                let module = self.current_module.clone();
                self.scopes.define(
                    Symbol::new(iterator, elem_ty, false, location.clone())
                        .initialized()
                        .in_module(module),
                );
                self.analyze_stmt(body);
                self.scopes.pop();
            }
            Stmt::Return { value, location } => {
                let expected = self.current_return.clone();
                match value {
                    Some(v) => {
                        let actual = self.check_expr(v);
                        if let Some(expected) = expected {
                            if !actual.is_compatible_with(&expected) {
                                self.diagnostics.error(
                                    location.clone(),
                                    format!(
                                        "Return type mismatch: expected {}, got {}",
                                        expected, actual
                                    ),
                                );
                            }
                        }
                    }
                    None => {
                        if let Some(expected) = expected {
                            if !expected.is_void() {
                                self.diagnostics
                                    .error(location.clone(), "Missing return value");
                            }
                        }
                    }
                }
            }
            Stmt::Decl(decl) => self.analyze_decl(decl),
        }
    }

    fn check_condition(&mut self, condition: &Expr, message: &str) {
        let ty = self.check_expr(condition);
        if !ty.is_compatible_with(&SemanticType::primitive("bool")) {
            self.diagnostics.error(condition.location.clone(), message);
        }
    }

    // ========================================================================
    // Expressions
    // ========================================================================

    /// Synthesize a type and record it in the side table.
    fn check_expr(&mut self, expr: &Expr) -> SemanticType {
        let ty = self.infer_expr(expr);
        self.expr_types.insert(expr.id, ty.clone());
        ty
    }

    fn infer_expr(&mut self, expr: &Expr) -> SemanticType {
        match &expr.kind {
            ExprKind::Literal(lit) => literal_type(lit),
            ExprKind::Ident(name) => match self.scopes.lookup(name) {
                Some(symbol) => symbol.ty.clone(),
                None => {
                    self.diagnostics.error(
                        expr.location.clone(),
                        format!("Undefined identifier: {}", name),
                    );
                    SemanticType::error()
                }
            },
            ExprKind::Binary { op, lhs, rhs } => self.check_binary(expr, *op, lhs, rhs),
            ExprKind::Unary { op, operand } => self.check_unary(expr, *op, operand),
            ExprKind::Postfix { op, operand } => self.check_postfix(expr, *op, operand),
            ExprKind::Call { callee, args } => self.check_call(expr, callee, args),
            ExprKind::Member { object, .. } => {
                let object_ty = self.check_expr(object);
                if object_ty.is_error() {
                    return SemanticType::error();
                }
                self.diagnostics.error(
                    expr.location.clone(),
                    format!("Member access not supported for type: {}", object_ty),
                );
                SemanticType::error()
            }
            ExprKind::Index { object, index } => {
                let object_ty = self.check_expr(object);
                let index_ty = self.check_expr(index);
                if object_ty.is_error() || index_ty.is_error() {
                    return SemanticType::error();
                }
                let TypeKind::Array { elem, .. } = &object_ty.kind else {
                    self.diagnostics
                        .error(expr.location.clone(), "Cannot index non-array type");
                    return SemanticType::error();
                };
                if !index_ty.is_integer() {
                    self.diagnostics
                        .error(index.location.clone(), "Array index must be integer");
                    return SemanticType::error();
                }
                (**elem).clone()
            }
            ExprKind::Assign { op, target, value } => self.check_assign(expr, *op, target, value),
            ExprKind::Cast {
                target,
                value,
                fallible,
            } => self.check_cast(expr, target, value, *fallible),
            ExprKind::AsCast { value, target } => {
                let source = self.check_expr(value);
                let target_ty = self.convert_type(target);
                if source.is_error() {
                    return SemanticType::error();
                }
                if !source.is_castable() || !target_ty.is_castable() {
                    self.diagnostics.error(
                        expr.location.clone(),
                        format!(
                            "Cannot cast from {} to {} using 'as' operator",
                            source, target_ty
                        ),
                    );
                    return SemanticType::error();
                }
                target_ty
            }
        }
    }

    fn check_binary(&mut self, expr: &Expr, op: BinaryOp, lhs: &Expr, rhs: &Expr) -> SemanticType {
        let lt = self.check_expr(lhs);
        let rt = self.check_expr(rhs);
        if lt.is_error() || rt.is_error() {
            return SemanticType::error();
        }

        match op {
            BinaryOp::Pow => {
                self.diagnostics
                    .error(expr.location.clone(), "Operator '**' is not supported yet");
                SemanticType::error()
            }
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => {
                match common_numeric_type(&lt, &rt) {
                    Some(ty) => ty,
                    None => {
                        self.diagnostics.error(
                            expr.location.clone(),
                            format!(
                                "Invalid operands for arithmetic operation: {} and {}",
                                lt, rt
                            ),
                        );
                        SemanticType::error()
                    }
                }
            }
            BinaryOp::Shl | BinaryOp::Shr => {
                if lt.is_integer() && rt.is_integer() {
                    lt
                } else {
                    self.diagnostics.error(
                        expr.location.clone(),
                        "Invalid operands for bitwise shift operation",
                    );
                    SemanticType::error()
                }
            }
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
                let null_pointer_pair = matches!(op, BinaryOp::Eq | BinaryOp::Ne)
                    && ((lt.is_pointer() && rt.is_null()) || (lt.is_null() && rt.is_pointer()));
                let ok = (lt.is_numeric() && rt.is_numeric())
                    || null_pointer_pair
                    || lt.is_compatible_with(&rt);
                if ok {
                    SemanticType::primitive("bool")
                } else {
                    self.diagnostics.error(
                        expr.location.clone(),
                        format!("Cannot compare incompatible types: {} and {}", lt, rt),
                    );
                    SemanticType::error()
                }
            }
            BinaryOp::And | BinaryOp::Or => {
                let operand_ok = |t: &SemanticType| t.is_bool() || t.is_numeric();
                if operand_ok(&lt) && operand_ok(&rt) {
                    SemanticType::primitive("bool")
                } else {
                    self.diagnostics.error(
                        expr.location.clone(),
                        "Logical operators require boolean or numeric operands",
                    );
                    SemanticType::error()
                }
            }
        }
    }

    fn check_unary(&mut self, expr: &Expr, op: UnaryOp, operand: &Expr) -> SemanticType {
        let ty = self.check_expr(operand);
        if ty.is_error() {
            return SemanticType::error();
        }
        match op {
            UnaryOp::Neg => {
                if ty.is_numeric() {
                    ty
                } else {
                    self.diagnostics
                        .error(expr.location.clone(), "Unary minus requires numeric operand");
                    SemanticType::error()
                }
            }
            UnaryOp::Not => {
                if ty.is_bool() || ty.is_numeric() {
                    SemanticType::primitive("bool")
                } else {
                    self.diagnostics.error(
                        expr.location.clone(),
                        "Logical not requires boolean or numeric operand",
                    );
                    SemanticType::error()
                }
            }
        }
    }

    fn check_postfix(&mut self, expr: &Expr, _op: PostfixOp, operand: &Expr) -> SemanticType {
        let ty = self.check_expr(operand);

        if let ExprKind::Ident(name) = &operand.kind {
            let immutable = self
                .scopes
                .lookup(name)
                .map(|s| !s.is_mutable)
                .unwrap_or(false);
            if immutable {
                self.diagnostics.error(
                    expr.location.clone(),
                    format!("Cannot modify immutable variable: {}", name),
                );
            }
        }

        if ty.is_error() {
            return SemanticType::error();
        }
        if !ty.is_numeric() {
            self.diagnostics.error(
                expr.location.clone(),
                "Increment/decrement requires numeric operand",
            );
            return SemanticType::error();
        }
        // Postfix increment/decrement evaluates to the original value.
        ty
    }

    fn check_call(&mut self, expr: &Expr, callee: &Expr, args: &[Expr]) -> SemanticType {
        // Method dispatch through a member expression is deferred: check the
        // receiver and arguments, then hand back a placeholder.
        if let ExprKind::Member { object, .. } = &callee.kind {
            self.check_expr(object);
            for arg in args {
                self.check_expr(arg);
            }
            return SemanticType::primitive("unknown");
        }

        let callee_ty = self.check_expr(callee);
        let arg_tys: Vec<SemanticType> = args.iter().map(|a| self.check_expr(a)).collect();

        if callee_ty.is_error() {
            return SemanticType::error();
        }
        let TypeKind::Function { params, ret } = &callee_ty.kind else {
            self.diagnostics
                .error(expr.location.clone(), "Cannot call non-function");
            return SemanticType::error();
        };

        if let ExprKind::Ident(name) = &callee.kind {
            if VARIADIC_FOREIGN_FUNCTIONS.contains(&name.as_str()) {
                for (arg, ty) in args.iter().zip(&arg_tys) {
                    if !ty.is_error() && !is_variadic_compatible(ty) {
                        self.diagnostics.error(
                            arg.location.clone(),
                            format!(
                                "Argument type not compatible with variadic function: {}",
                                ty
                            ),
                        );
                    }
                }
                return (**ret).clone();
            }
        }

        if args.len() != params.len() {
            self.diagnostics.error(
                expr.location.clone(),
                format!(
                    "Incorrect number of arguments: expected {}, got {}",
                    params.len(),
                    args.len()
                ),
            );
            return SemanticType::error();
        }

        for ((arg, arg_ty), param_ty) in args.iter().zip(&arg_tys).zip(params) {
            if !arg_ty.is_error() && !argument_compatible(arg_ty, param_ty) {
                self.diagnostics.error(
                    arg.location.clone(),
                    format!("Argument type mismatch: expected {}, got {}", param_ty, arg_ty),
                );
            }
        }

        (**ret).clone()
    }

    fn check_assign(&mut self, expr: &Expr, op: AssignOp, target: &Expr, value: &Expr) -> SemanticType {
        let target_ty = self.check_expr(target);
        let value_ty = self.check_expr(value);

        if let ExprKind::Ident(name) = &target.kind {
            let immutable = self
                .scopes
                .lookup(name)
                .map(|s| !s.is_mutable)
                .unwrap_or(false);
            if immutable {
                self.diagnostics.error(
                    expr.location.clone(),
                    format!("Cannot assign to immutable variable: {}", name),
                );
            }
        }

        if target_ty.is_error() || value_ty.is_error() {
            return SemanticType::error();
        }

        if op != AssignOp::Assign {
            if !target_ty.is_compatible_with(&value_ty) {
                self.diagnostics
                    .error(expr.location.clone(), "Type mismatch in compound assignment");
                return SemanticType::error();
            }
        } else if !value_ty.is_compatible_with(&target_ty) {
            self.diagnostics.error(
                expr.location.clone(),
                format!(
                    "Type mismatch in assignment: expected {}, got {}",
                    target_ty, value_ty
                ),
            );
            return SemanticType::error();
        }

        // An assignment evaluates to the assigned place's type.
        target_ty
    }

    fn check_cast(&mut self, expr: &Expr, target: &TypeExpr, value: &Expr, fallible: bool) -> SemanticType {
        let source = self.check_expr(value);
        let target_ty = self.convert_type(target);
        if source.is_error() {
            return SemanticType::error();
        }

        if source.is_castable() && target_ty.is_castable() {
            return target_ty;
        }

        if fallible {
            // try_cast hands back the source value unchanged on failure.
            self.diagnostics.warning(
                expr.location.clone(),
                format!("try_cast failed: cannot cast from {} to {}", source, target_ty),
            );
            source
        } else {
            self.diagnostics.warning(
                expr.location.clone(),
                format!("Potentially unsafe cast from {} to {}", source, target_ty),
            );
            target_ty
        }
    }

    // ========================================================================
    // Type conversion
    // ========================================================================

    fn convert_type(&mut self, ty: &TypeExpr) -> SemanticType {
        match &ty.kind {
            TypeExprKind::Primitive(p) => match p {
                PrimitiveType::Void => SemanticType::void(),
                PrimitiveType::SelfType => match &self.current_class {
                    Some(class) => SemanticType::primitive(class.clone()),
                    None => SemanticType::primitive("self"),
                },
                other => SemanticType::primitive(other.as_str()),
            },
            TypeExprKind::Named(name) => SemanticType::primitive(name.clone()),
            TypeExprKind::Const(inner) => self.convert_type(inner).with_const(),
            TypeExprKind::Array { elem, size } => {
                SemanticType::array(self.convert_type(elem), *size)
            }
            TypeExprKind::Pointer { kind, pointee } => {
                SemanticType::pointer(self.convert_type(pointee), *kind)
            }
            // Generics are not instantiated; the base name stands in.
            TypeExprKind::Generic { name, .. } => SemanticType::primitive(name.clone()),
        }
    }
}

fn literal_type(lit: &Literal) -> SemanticType {
    match lit {
        Literal::Int { value, suffix } => match suffix {
            Some(s) => SemanticType::primitive(s.as_str()),
            None => {
                if *value > i32::MAX as i64 || *value < i32::MIN as i64 {
                    SemanticType::primitive("i64")
                } else {
                    SemanticType::primitive("i32")
                }
            }
        },
        Literal::Float { suffix, .. } => match suffix {
            Some(s) => SemanticType::primitive(s.as_str()),
            None => SemanticType::primitive("f64"),
        },
        Literal::Str(_) => SemanticType::primitive("string"),
        Literal::Bool(_) => SemanticType::primitive("bool"),
        Literal::Null => SemanticType::primitive("null"),
    }
}

/// Argument types legally passable to a foreign variadic function: numerics,
/// bool, string, any pointer, and arrays (which decay).
pub fn is_variadic_compatible(ty: &SemanticType) -> bool {
    ty.is_numeric() || ty.is_bool() || ty.is_string() || ty.is_pointer() || ty.is_array()
}

/// Per-position call compatibility, including the string-literal decay to
/// `cptr u8` / `cptr void` parameters.
fn argument_compatible(arg: &SemanticType, param: &SemanticType) -> bool {
    if arg.is_compatible_with(param) {
        return true;
    }
    if arg.is_string() {
        if let TypeKind::Pointer {
            pointee,
            kind: PointerKind::Cptr,
        } = &param.kind
        {
            return pointee.is_named("u8") || pointee.is_void();
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DiagnosticLevel;
    use crate::lexer::Lexer;
    use crate::parser::Parser;
    use crate::source::SourceFile;

    fn parse_module(name: &str, source: &str, diagnostics: &mut DiagnosticEmitter) -> Module {
        let file = SourceFile::new(format!("{}.pang", name), source);
        let tokens = Lexer::new(&file, diagnostics).tokenize();
        Parser::new(tokens, diagnostics).parse_module(name, format!("{}.pang", name))
    }

    fn check_program(deps: &[(&str, &str)], main_src: &str) -> (Program, Analysis, DiagnosticEmitter) {
        let mut diagnostics = DiagnosticEmitter::new();
        let modules: Vec<Module> = deps
            .iter()
            .map(|(name, src)| {
                let mut module = parse_module(name, src, &mut diagnostics);
                module.imports.clear();
                module
            })
            .collect();
        let mut main = parse_module("main", main_src, &mut diagnostics);
        // Imports name dependency modules directly in these tests.
        main.imports.retain(|i| deps.iter().any(|(n, _)| *n == i.module_path));
        assert!(!diagnostics.has_errors(), "parse failed: {:?}", diagnostics.diagnostics());
        let program = Program { modules, main };

        let builtins = BuiltinRegistry::new();
        let analysis = Analyzer::new(&mut diagnostics, &builtins).analyze(&program);
        (program, analysis, diagnostics)
    }

    fn check(source: &str) -> (Program, Analysis, DiagnosticEmitter) {
        check_program(&[], source)
    }

    fn errors(diagnostics: &DiagnosticEmitter) -> Vec<String> {
        diagnostics
            .diagnostics()
            .iter()
            .filter(|d| {
                matches!(d.level, DiagnosticLevel::Error | DiagnosticLevel::Fatal)
            })
            .map(|d| d.message.clone())
            .collect()
    }

    /// The initializer expression of the n-th `let` in the first function.
    fn init_expr(program: &Program, index: usize) -> &Expr {
        let f = program
            .main
            .decls
            .iter()
            .find_map(|d| match d {
                Decl::Function(f) if f.body.is_some() => Some(f),
                _ => None,
            })
            .expect("expected a function with a body");
        let mut seen = 0;
        for stmt in &f.body.as_ref().unwrap().statements {
            if let Stmt::Decl(Decl::Variable(v)) = stmt {
                if seen == index {
                    return v.init.as_ref().unwrap();
                }
                seen += 1;
            }
        }
        panic!("no let at index {}", index);
    }

    #[test]
    fn test_undefined_identifier() {
        let (_, _, diagnostics) = check("fn main() -> i32 { return x; }");
        let errs = errors(&diagnostics);
        assert_eq!(errs, vec!["Undefined identifier: x".to_string()]);
        let diag = &diagnostics.diagnostics()[0];
        let loc = diag.location.as_ref().unwrap();
        assert_eq!(loc.line, 1);
        assert_eq!(loc.column, 27);
        assert_eq!(loc.length, 1);
    }

    #[test]
    fn test_numeric_promotion_int_plus_float() {
        let (program, analysis, diagnostics) = check("fn main() -> i32 { let x = 1 + 2.0\nreturn 0 }");
        assert!(!diagnostics.has_errors());
        let init = init_expr(&program, 0);
        assert!(analysis.expr_types[&init.id].is_named("f64"));
    }

    #[test]
    fn test_common_type_of_widths() {
        let (program, analysis, diagnostics) =
            check("fn f(a: i8, b: i64) -> i64 { let x = a + b\nreturn x }");
        assert!(!diagnostics.has_errors());
        let init = init_expr(&program, 0);
        assert!(analysis.expr_types[&init.id].is_named("i64"));
    }

    #[test]
    fn test_assign_to_immutable() {
        let (_, _, diagnostics) = check("fn main() -> i32 { let x: i32 = 0\nx = 1\nreturn x }");
        assert_eq!(
            errors(&diagnostics),
            vec!["Cannot assign to immutable variable: x".to_string()]
        );
    }

    #[test]
    fn test_assign_to_mutable_is_fine() {
        let (_, _, diagnostics) = check("fn main() -> i32 { let mut x: i32 = 0\nx = 1\nreturn x }");
        assert!(!diagnostics.has_errors());
    }

    #[test]
    fn test_postfix_requires_mutable() {
        let (_, _, diagnostics) = check("fn main() -> i32 { let x: i32 = 0\nx++\nreturn x }");
        assert_eq!(
            errors(&diagnostics),
            vec!["Cannot modify immutable variable: x".to_string()]
        );
    }

    #[test]
    fn test_redefinition_in_same_scope() {
        let (_, _, diagnostics) = check("fn main() -> i32 { let x = 1\nlet x = 2\nreturn 0 }");
        assert_eq!(errors(&diagnostics), vec!["Redefinition of variable x".to_string()]);
    }

    #[test]
    fn test_shadowing_in_inner_scope_is_fine() {
        let (_, _, diagnostics) =
            check("fn main() -> i32 { let x = 1\nif true {\nlet x = 2\n}\nreturn 0 }");
        assert!(!diagnostics.has_errors());
    }

    #[test]
    fn test_initializer_must_match_declared_type() {
        let (_, _, diagnostics) = check("fn main() -> i32 { let x: bool = 1\nreturn 0 }");
        assert!(errors(&diagnostics)[0].starts_with("Type mismatch in variable initialization"));
    }

    #[test]
    fn test_inference_from_initializer() {
        let (program, analysis, diagnostics) =
            check("fn main() -> i32 { let s = \"hi\"\nlet big = 4294967296\nreturn 0 }");
        assert!(!diagnostics.has_errors());
        assert!(analysis.expr_types[&init_expr(&program, 0).id].is_string());
        // Overflows signed 32 bits, defaults to i64.
        assert!(analysis.expr_types[&init_expr(&program, 1).id].is_named("i64"));
    }

    #[test]
    fn test_shift_requires_integers() {
        let (_, _, diagnostics) = check("fn main() -> i32 { let x = 1 << 2.0\nreturn 0 }");
        assert_eq!(
            errors(&diagnostics),
            vec!["Invalid operands for bitwise shift operation".to_string()]
        );
    }

    #[test]
    fn test_logical_on_numerics_yields_bool() {
        let (program, analysis, diagnostics) =
            check("fn main() -> i32 { let x = 1 && 0\nreturn 0 }");
        assert!(!diagnostics.has_errors());
        assert!(analysis.expr_types[&init_expr(&program, 0).id].is_bool());
    }

    #[test]
    fn test_comparison_of_incompatible_types() {
        let (_, _, diagnostics) = check("fn main() -> i32 { let x = \"a\" < 1\nreturn 0 }");
        assert!(errors(&diagnostics)[0].starts_with("Cannot compare incompatible types"));
    }

    #[test]
    fn test_pointer_null_comparison() {
        let (program, analysis, diagnostics) = check(
            "foreign fn get() -> cptr u8\nfn main() -> i32 { let ok = get() == null\nreturn 0 }",
        );
        assert!(!diagnostics.has_errors());
        assert!(analysis.expr_types[&init_expr(&program, 0).id].is_bool());
    }

    #[test]
    fn test_power_not_supported() {
        let (_, _, diagnostics) = check("fn main() -> i32 { let x = 2 ** 3\nreturn 0 }");
        assert_eq!(
            errors(&diagnostics),
            vec!["Operator '**' is not supported yet".to_string()]
        );
    }

    #[test]
    fn test_valid_cast() {
        let (program, analysis, diagnostics) =
            check("fn main() -> i32 { let x = cast<i64>(1)\nreturn 0 }");
        assert!(!diagnostics.has_errors());
        assert!(analysis.expr_types[&init_expr(&program, 0).id].is_named("i64"));
    }

    #[test]
    fn test_unsafe_cast_warns_but_proceeds() {
        let (program, analysis, diagnostics) = check(
            "foreign fn get() -> cptr u8\nfn main() -> i32 { let x = cast<i32>(get())\nreturn 0 }",
        );
        assert!(!diagnostics.has_errors());
        assert_eq!(diagnostics.warning_count(), 1);
        assert!(analysis.expr_types[&init_expr(&program, 0).id].is_named("i32"));
    }

    #[test]
    fn test_try_cast_failure_keeps_source_type() {
        let (program, analysis, diagnostics) = check(
            "foreign fn get() -> cptr u8\nfn main() -> i32 { let x = try_cast<i32>(get())\nreturn 0 }",
        );
        assert!(!diagnostics.has_errors());
        assert_eq!(diagnostics.warning_count(), 1);
        assert!(analysis.expr_types[&init_expr(&program, 0).id].is_pointer());
    }

    #[test]
    fn test_as_cast_rejects_pointers() {
        let (_, _, diagnostics) = check(
            "foreign fn get() -> cptr u8\nfn main() -> i32 { let x = get() as i64\nreturn 0 }",
        );
        assert!(errors(&diagnostics)[0].contains("using 'as' operator"));
    }

    #[test]
    fn test_return_type_mismatch() {
        let (_, _, diagnostics) = check("fn main() -> i32 { return \"no\" }");
        assert!(errors(&diagnostics)[0].starts_with("Return type mismatch"));
    }

    #[test]
    fn test_bare_return_in_non_void_function() {
        let (_, _, diagnostics) = check("fn main() -> i32 { return }");
        assert_eq!(errors(&diagnostics), vec!["Missing return value".to_string()]);
    }

    #[test]
    fn test_bare_return_in_void_function() {
        let (_, _, diagnostics) = check("fn main() -> void { return }");
        assert!(!diagnostics.has_errors());
    }

    #[test]
    fn test_if_condition_must_be_boolean() {
        let (_, _, diagnostics) = check("fn main() -> i32 { if 1 { }\nreturn 0 }");
        assert_eq!(errors(&diagnostics), vec!["If condition must be boolean".to_string()]);
    }

    #[test]
    fn test_for_binds_element_type_only_in_body() {
        let (_, _, diagnostics) = check(
            "fn main(xs: i32[3]) -> i32 { for i in xs { let y = i + 1\n}\nreturn i }",
        );
        // `i` resolves inside the body, not after it.
        assert_eq!(errors(&diagnostics), vec!["Undefined identifier: i".to_string()]);
    }

    #[test]
    fn test_call_arity_and_argument_checking() {
        let (_, _, diagnostics) = check(
            "fn add(a: i32, b: i32) -> i32 { return a + b }\nfn main() -> i32 { return add(1) }",
        );
        assert!(errors(&diagnostics)[0].starts_with("Incorrect number of arguments"));

        let (_, _, diagnostics) = check(
            "fn add(a: i32, b: i32) -> i32 { return a + b }\nfn main() -> i32 { return add(1, \"x\") }",
        );
        assert!(errors(&diagnostics)[0].starts_with("Argument type mismatch"));
    }

    #[test]
    fn test_call_non_function() {
        let (_, _, diagnostics) = check("fn main() -> i32 { let x = 1\nreturn x() }");
        assert_eq!(errors(&diagnostics), vec!["Cannot call non-function".to_string()]);
    }

    #[test]
    fn test_variadic_foreign_call_unconstrained_arity() {
        let (program, analysis, diagnostics) = check(
            "foreign fn printf(format: cptr u8, args: raw_va_list) -> i32\nfn main() -> i32 { let r = printf(\"%d %f\\n\", 1, 2.5)\nreturn 0 }",
        );
        assert!(!diagnostics.has_errors());
        // Call result is printf's declared return.
        assert!(analysis.expr_types[&init_expr(&program, 0).id].is_named("i32"));
        // The float argument synthesized f64.
        let f = program
            .main
            .decls
            .iter()
            .find_map(|d| match d {
                Decl::Function(f) if f.body.is_some() => Some(f),
                _ => None,
            })
            .expect("expected a function with a body");
        let Stmt::Decl(Decl::Variable(v)) = &f.body.as_ref().unwrap().statements[0] else { panic!() };
        let ExprKind::Call { args, .. } = &v.init.as_ref().unwrap().kind else { panic!() };
        assert!(analysis.expr_types[&args[2].id].is_named("f64"));
    }

    #[test]
    fn test_variadic_incompatible_argument() {
        let (_, _, diagnostics) = check(
            "foreign fn printf(format: cptr u8, args: raw_va_list) -> i32\nfn v() -> void { }\nfn main() -> i32 { printf(\"%d\", v())\nreturn 0 }",
        );
        assert!(errors(&diagnostics)[0].starts_with("Argument type not compatible with variadic"));
    }

    #[test]
    fn test_string_decays_to_cptr_u8_parameter() {
        let (_, _, diagnostics) = check(
            "foreign fn puts(text: cptr u8) -> i32\nfn main() -> i32 { puts(\"hello\")\nreturn 0 }",
        );
        assert!(!diagnostics.has_errors());
    }

    #[test]
    fn test_member_access_not_supported() {
        let (_, _, diagnostics) = check(
            "class Point { Point(x: i32) -> self { } }\nfn main() -> i32 { let p = Point(1)\nlet x = p.field\nreturn 0 }",
        );
        assert!(errors(&diagnostics)[0].starts_with("Member access not supported"));
    }

    #[test]
    fn test_method_call_defers_with_placeholder_type() {
        let (program, analysis, diagnostics) = check(
            "class Point { Point(x: i32) -> self { } }\nfn main() -> i32 { let p = Point(1)\nlet u = p.norm()\nreturn 0 }",
        );
        assert!(!diagnostics.has_errors());
        assert!(analysis.expr_types[&init_expr(&program, 1).id].is_named("unknown"));
    }

    #[test]
    fn test_class_constructor_is_callable() {
        let (program, analysis, diagnostics) = check(
            "class Point { let x: i32\nPoint(x: i32) -> self { let doubled = x + x\n} }\nfn main() -> i32 { let p = Point(3)\nreturn 0 }",
        );
        assert!(!diagnostics.has_errors());
        assert!(analysis.expr_types[&init_expr(&program, 0).id].is_named("Point"));
    }

    #[test]
    fn test_constructor_arity_checked() {
        let (_, _, diagnostics) = check(
            "class Point { Point(x: i32, y: i32) -> self { } }\nfn main() -> i32 { let p = Point(1)\nreturn 0 }",
        );
        assert!(errors(&diagnostics)[0].starts_with("Incorrect number of arguments"));
    }

    #[test]
    fn test_enum_variants_have_enum_type() {
        let (_, _, diagnostics) = check(
            "enum Color { Red, Green }\nfn main() -> i32 { let c: Color = Red\nreturn 0 }",
        );
        assert!(!diagnostics.has_errors());
    }

    #[test]
    fn test_index_expression() {
        let (_, _, diagnostics) = check("fn f(xs: i32[4]) -> i32 { return xs[0] }");
        assert!(!diagnostics.has_errors());

        let (_, _, diagnostics) = check("fn f(x: i32) -> i32 { return x[0] }");
        assert_eq!(errors(&diagnostics), vec!["Cannot index non-array type".to_string()]);

        let (_, _, diagnostics) = check("fn f(xs: i32[4]) -> i32 { return xs[1.5] }");
        assert_eq!(errors(&diagnostics), vec!["Array index must be integer".to_string()]);
    }

    #[test]
    fn test_error_type_does_not_cascade() {
        let (_, _, diagnostics) = check("fn main() -> i32 { return missing + 1 }");
        // One error for the identifier; the addition stays quiet.
        assert_eq!(errors(&diagnostics), vec!["Undefined identifier: missing".to_string()]);
    }

    #[test]
    fn test_named_import_wires_exported_symbol() {
        let (_, _, diagnostics) = check_program(
            &[("mathx", "export fn add(a: i32, b: i32) -> i32 { return a + b }\nfn hidden() -> void { }")],
            "import \"mathx\" { add }\nfn main() -> i32 { return add(1, 2) }",
        );
        assert!(!diagnostics.has_errors(), "{:?}", errors(&diagnostics));
    }

    #[test]
    fn test_wildcard_import_wires_all_exports() {
        let (_, _, diagnostics) = check_program(
            &[("mathx", "export fn add(a: i32, b: i32) -> i32 { return a + b }\nexport let base: i32 = 10")],
            "import \"mathx\"\nfn main() -> i32 { return add(base, 2) }",
        );
        assert!(!diagnostics.has_errors(), "{:?}", errors(&diagnostics));
    }

    #[test]
    fn test_non_exported_symbol_is_invisible() {
        let (_, _, diagnostics) = check_program(
            &[("mathx", "fn hidden() -> i32 { return 1 }")],
            "import \"mathx\"\nfn main() -> i32 { return hidden() }",
        );
        assert_eq!(errors(&diagnostics), vec!["Undefined identifier: hidden".to_string()]);
    }

    #[test]
    fn test_named_import_of_missing_symbol() {
        let (_, _, diagnostics) = check_program(
            &[("mathx", "export fn add(a: i32, b: i32) -> i32 { return a + b }")],
            "import \"mathx\" { square }\nfn main() -> i32 { return 0 }",
        );
        assert_eq!(
            errors(&diagnostics),
            vec!["Module 'mathx' does not export 'square'".to_string()]
        );
    }

    #[test]
    fn test_builtin_symbols_visible_everywhere() {
        let builtins = BuiltinRegistry::new().with_function(
            "print",
            vec![SemanticType::primitive("string")],
            SemanticType::void(),
        );
        let mut diagnostics = DiagnosticEmitter::new();
        let main = parse_module("main", "fn main() -> i32 { print(\"hi\")\nreturn 0 }", &mut diagnostics);
        let program = Program { modules: vec![], main };
        Analyzer::new(&mut diagnostics, &builtins).analyze(&program);
        assert!(!diagnostics.has_errors(), "{:?}", errors(&diagnostics));
    }
}
