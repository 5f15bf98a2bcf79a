//! Pang parser.
//!
//! Top-down recursive descent with a precedence ladder for expressions.
//! Recovery runs in two modes: declaration-level synchronization skips to
//! the next declaration keyword, statement-level synchronization skips to
//! the next statement boundary inside a function body. A recovered-from
//! site produces at most one diagnostic.

use crate::ast::*;
use crate::error::DiagnosticEmitter;
use crate::lexer::{Keyword, Token, TokenKind};
use crate::source::SourceLocation;

/// Aborts the current declaration or statement; recovery happens at the
/// enclosing synchronization point.
struct ParseInterrupt;

type PResult<T> = Result<T, ParseInterrupt>;

enum TopLevel {
    Import(ImportDecl),
    Decl(Decl),
}

pub struct Parser<'a> {
    tokens: Vec<Token>,
    current: usize,
    diagnostics: &'a mut DiagnosticEmitter,
    next_id: NodeId,
}

impl<'a> Parser<'a> {
    pub fn new(tokens: Vec<Token>, diagnostics: &'a mut DiagnosticEmitter) -> Self {
        Self {
            tokens,
            current: 0,
            diagnostics,
            next_id: 0,
        }
    }

    /// Parse a whole file into a module.
    pub fn parse_module(mut self, name: impl Into<String>, file: impl Into<String>) -> Module {
        let mut imports = Vec::new();
        let mut decls = Vec::new();

        loop {
            self.skip_newlines();
            if self.is_at_end() {
                break;
            }
            match self.declaration() {
                Ok(Some(TopLevel::Import(import))) => imports.push(import),
                Ok(Some(TopLevel::Decl(decl))) => decls.push(decl),
                Ok(None) => {}
                Err(_) => self.synchronize(),
            }
        }

        Module {
            name: name.into(),
            file: file.into(),
            imports,
            decls,
        }
    }

    // ========================================================================
    // Token plumbing
    // ========================================================================

    fn peek(&self) -> &Token {
        &self.tokens[self.current.min(self.tokens.len() - 1)]
    }

    fn previous(&self) -> &Token {
        &self.tokens[self.current.saturating_sub(1)]
    }

    fn previous_location(&self) -> SourceLocation {
        self.previous().location.clone()
    }

    fn is_at_end(&self) -> bool {
        self.peek().kind == TokenKind::Eof
    }

    fn advance(&mut self) -> Token {
        if !self.is_at_end() {
            self.current += 1;
        }
        self.previous().clone()
    }

    fn check(&self, kind: &TokenKind) -> bool {
        self.peek().kind == *kind
    }

    fn check_keyword(&self, kw: Keyword) -> bool {
        self.peek().kind == TokenKind::Keyword(kw)
    }

    fn match_kind(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn match_keyword(&mut self, kw: Keyword) -> bool {
        self.match_kind(&TokenKind::Keyword(kw))
    }

    fn error_at_peek(&mut self, message: &str) {
        let tok = self.peek().clone();
        let shown = if tok.kind == TokenKind::Eof {
            format!("{}, found end of file", message)
        } else {
            format!("{}, found '{}'", message, tok.kind)
        };
        self.diagnostics.error(tok.location, shown);
    }

    fn consume(&mut self, kind: TokenKind, message: &str) -> PResult<Token> {
        if self.check(&kind) {
            Ok(self.advance())
        } else {
            self.error_at_peek(message);
            Err(ParseInterrupt)
        }
    }

    fn consume_ident(&mut self, message: &str) -> PResult<(String, SourceLocation)> {
        if let TokenKind::Ident(name) = &self.peek().kind {
            let name = name.clone();
            let tok = self.advance();
            Ok((name, tok.location))
        } else {
            self.error_at_peek(message);
            Err(ParseInterrupt)
        }
    }

    fn skip_newlines(&mut self) {
        while self.check(&TokenKind::Newline) {
            self.advance();
        }
    }

    /// A statement ends at `;`, a newline, a closing brace, or end of file.
    /// Extra semicolons are diagnosed but consumed.
    fn consume_terminator(&mut self) -> PResult<()> {
        if self.check(&TokenKind::Semi) {
            self.advance();
            while self.check(&TokenKind::Semi) {
                let loc = self.peek().location.clone();
                self.diagnostics.error(loc, "Unexpected extra semicolon");
                self.advance();
            }
            Ok(())
        } else if self.check(&TokenKind::Newline) || self.check(&TokenKind::RBrace) || self.is_at_end() {
            Ok(())
        } else {
            self.error_at_peek("Expected ';' or newline after statement");
            Err(ParseInterrupt)
        }
    }

    /// Declaration-level recovery: skip to the next declaration keyword.
    fn synchronize(&mut self) {
        self.advance();
        while !self.is_at_end() {
            if self.previous().kind == TokenKind::Semi {
                return;
            }
            if self.peek().kind.starts_declaration() {
                return;
            }
            self.advance();
        }
    }

    /// Statement-level recovery: skip to the next statement boundary inside
    /// a function body.
    fn synchronize_statement(&mut self) {
        while !self.is_at_end() && !self.check(&TokenKind::RBrace) {
            if self.check(&TokenKind::Semi) {
                self.advance();
                return;
            }
            if self.check(&TokenKind::Newline) {
                return;
            }
            if self.peek().kind.starts_statement() {
                return;
            }
            self.advance();
        }
    }

    fn mk_expr(&mut self, kind: ExprKind, location: SourceLocation) -> Expr {
        let id = self.next_id;
        self.next_id += 1;
        Expr { id, kind, location }
    }

    // ========================================================================
    // Declarations
    // ========================================================================

    fn declaration(&mut self) -> PResult<Option<TopLevel>> {
        self.skip_newlines();
        if self.is_at_end() {
            return Ok(None);
        }

        if self.match_keyword(Keyword::Export) {
            let export_loc = self.previous_location();
            return match self.declaration()? {
                Some(TopLevel::Decl(Decl::Function(mut f))) => {
                    f.is_export = true;
                    Ok(Some(TopLevel::Decl(Decl::Function(f))))
                }
                Some(TopLevel::Decl(Decl::Variable(mut v))) => {
                    v.is_export = true;
                    Ok(Some(TopLevel::Decl(Decl::Variable(v))))
                }
                Some(other) => {
                    self.diagnostics
                        .warning(export_loc, "Only functions and variables can be exported");
                    Ok(Some(other))
                }
                None => Ok(None),
            };
        }

        if self.match_keyword(Keyword::Foreign) {
            if self.match_keyword(Keyword::Fn) {
                return Ok(Some(TopLevel::Decl(Decl::Function(self.foreign_function()?))));
            }
            if self.match_keyword(Keyword::Struct) {
                return Ok(Some(TopLevel::Decl(Decl::Struct(self.struct_decl(true)?))));
            }
            if self.match_keyword(Keyword::Enum) {
                return Ok(Some(TopLevel::Decl(Decl::Enum(self.enum_decl(true)?))));
            }
            if self.check_keyword(Keyword::Class) {
                self.error_at_peek("Foreign classes are not supported");
                return Err(ParseInterrupt);
            }
            if self.match_keyword(Keyword::Const) {
                return Ok(Some(TopLevel::Decl(Decl::Variable(self.foreign_const()?))));
            }
            self.error_at_peek("Expected 'fn', 'struct', 'enum', or 'const' after 'foreign'");
            return Err(ParseInterrupt);
        }

        if self.match_keyword(Keyword::Type) {
            return Ok(Some(TopLevel::Decl(Decl::Variable(self.type_alias()?))));
        }
        if self.match_keyword(Keyword::Fn) {
            return Ok(Some(TopLevel::Decl(Decl::Function(self.function_decl()?))));
        }
        if self.match_keyword(Keyword::Class) {
            return Ok(Some(TopLevel::Decl(Decl::Class(self.class_decl()?))));
        }
        if self.match_keyword(Keyword::Struct) {
            return Ok(Some(TopLevel::Decl(Decl::Struct(self.struct_decl(false)?))));
        }
        if self.match_keyword(Keyword::Enum) {
            return Ok(Some(TopLevel::Decl(Decl::Enum(self.enum_decl(false)?))));
        }
        if self.match_keyword(Keyword::Import) {
            return Ok(Some(TopLevel::Import(self.import_decl()?)));
        }
        if self.match_keyword(Keyword::Let) {
            let mutable = self.match_keyword(Keyword::Mut);
            return Ok(Some(TopLevel::Decl(Decl::Variable(self.variable_decl(mutable)?))));
        }
        if self.match_keyword(Keyword::Const) {
            return Ok(Some(TopLevel::Decl(Decl::Variable(self.const_decl()?))));
        }

        self.error_at_peek("Expected declaration");
        Err(ParseInterrupt)
    }

    fn function_signature(&mut self) -> PResult<(String, SourceLocation, Vec<Param>, TypeExpr)> {
        let (name, location) = self.consume_ident("Expected function name")?;
        self.consume(TokenKind::LParen, "Expected '(' after function name")?;
        let params = self.parameter_list()?;
        self.consume(TokenKind::RParen, "Expected ')' after parameters")?;

        let return_type = if self.match_kind(&TokenKind::Arrow) {
            self.parse_type()?
        } else {
            let loc = self.previous_location();
            self.diagnostics.warning(
                loc.clone(),
                "Function return type inference not yet implemented, defaulting to void",
            );
            TypeExpr {
                kind: TypeExprKind::Primitive(PrimitiveType::Void),
                location: loc,
            }
        };
        Ok((name, location, params, return_type))
    }

    fn function_decl(&mut self) -> PResult<FunctionDecl> {
        let (name, location, params, return_type) = self.function_signature()?;
        self.skip_newlines();
        self.consume(TokenKind::LBrace, "Expected '{' before function body")?;
        let body = self.block()?;

        Ok(FunctionDecl {
            name,
            params,
            return_type,
            body: Some(body),
            is_foreign: false,
            is_export: false,
            location,
        })
    }

    fn foreign_function(&mut self) -> PResult<FunctionDecl> {
        let (name, location) = self.consume_ident("Expected foreign function name")?;
        self.consume(TokenKind::LParen, "Expected '(' after foreign function name")?;
        let params = self.parameter_list()?;
        self.consume(TokenKind::RParen, "Expected ')' after parameters")?;
        self.consume(TokenKind::Arrow, "Expected '->' after parameters")?;
        let return_type = self.parse_type()?;
        self.consume_terminator()?;

        Ok(FunctionDecl {
            name,
            params,
            return_type,
            body: None,
            is_foreign: true,
            is_export: false,
            location,
        })
    }

    fn variable_decl(&mut self, is_mutable: bool) -> PResult<VariableDecl> {
        let (name, location) = self.consume_ident("Expected variable name")?;

        let ty = if self.match_kind(&TokenKind::Colon) {
            Some(self.parse_type()?)
        } else {
            None
        };
        let init = if self.match_kind(&TokenKind::Assign) {
            Some(self.expression()?)
        } else {
            None
        };
        self.consume_terminator()?;

        Ok(VariableDecl {
            name,
            ty,
            init,
            is_mutable,
            is_export: false,
            location,
        })
    }

    fn const_decl(&mut self) -> PResult<VariableDecl> {
        let (name, location) = self.consume_ident("Expected constant name")?;
        self.consume(TokenKind::Colon, "Expected ':' after constant name")?;
        let ty = self.parse_type()?;
        self.consume(TokenKind::Assign, "Expected '=' after constant type")?;
        let init = self.expression()?;
        self.consume_terminator()?;

        Ok(VariableDecl {
            name,
            ty: Some(ty),
            init: Some(init),
            is_mutable: false,
            is_export: false,
            location,
        })
    }

    fn foreign_const(&mut self) -> PResult<VariableDecl> {
        let (name, location) = self.consume_ident("Expected foreign constant name")?;
        self.consume(TokenKind::Colon, "Expected ':' after foreign constant name")?;
        let ty = self.parse_type()?;
        // Foreign constants are defined on the C side; no initializer.
        self.consume_terminator()?;

        Ok(VariableDecl {
            name,
            ty: Some(ty),
            init: None,
            is_mutable: false,
            is_export: false,
            location,
        })
    }

    fn type_alias(&mut self) -> PResult<VariableDecl> {
        let (name, location) = self.consume_ident("Expected type alias name")?;
        self.consume(TokenKind::Assign, "Expected '=' after type alias name")?;
        let ty = self.parse_type()?;
        self.consume_terminator()?;

        Ok(VariableDecl {
            name,
            ty: Some(ty),
            init: None,
            is_mutable: false,
            is_export: false,
            location,
        })
    }

    fn import_decl(&mut self) -> PResult<ImportDecl> {
        let location = self.previous_location();

        let module_path = if let TokenKind::Str(path) = &self.peek().kind {
            let path = path.clone();
            self.advance();
            path
        } else {
            self.error_at_peek("Expected module path string after 'import'");
            return Err(ParseInterrupt);
        };

        let items = if self.match_kind(&TokenKind::LBrace) {
            if self.match_kind(&TokenKind::Star) {
                self.consume(TokenKind::RBrace, "Expected '}' after import items")?;
                ImportItems::Wildcard
            } else {
                let mut names = Vec::new();
                loop {
                    let (name, _) = self.consume_ident("Expected import item name")?;
                    names.push(name);
                    if !self.match_kind(&TokenKind::Comma) {
                        break;
                    }
                }
                self.consume(TokenKind::RBrace, "Expected '}' after import items")?;
                ImportItems::Named(names)
            }
        } else {
            ImportItems::Wildcard
        };

        self.consume_terminator()?;
        Ok(ImportDecl {
            module_path,
            items,
            location,
        })
    }

    fn class_decl(&mut self) -> PResult<ClassDecl> {
        let (name, location) = self.consume_ident("Expected class name")?;

        let mut generic_params = Vec::new();
        if self.match_kind(&TokenKind::Lt) {
            loop {
                let (param, _) = self.consume_ident("Expected generic parameter name")?;
                generic_params.push(param);
                if !self.match_kind(&TokenKind::Comma) {
                    break;
                }
            }
            self.consume(TokenKind::Gt, "Expected '>' after generic parameters")?;
        }

        let base_class = if self.match_kind(&TokenKind::Colon) {
            let (base, _) = self.consume_ident("Expected base class name")?;
            Some(base)
        } else {
            None
        };

        self.consume(TokenKind::LBrace, "Expected '{' after class declaration")?;

        let mut members = Vec::new();
        while !self.check(&TokenKind::RBrace) && !self.is_at_end() {
            self.skip_newlines();
            if self.check(&TokenKind::RBrace) {
                break;
            }
            self.class_member(&name, &mut members)?;
        }

        self.consume(TokenKind::RBrace, "Expected '}' after class body")?;
        Ok(ClassDecl {
            name,
            generic_params,
            base_class,
            members,
            location,
        })
    }

    fn class_member(&mut self, class_name: &str, members: &mut Vec<ClassMember>) -> PResult<()> {
        let mut is_public = true;
        let mut is_static = false;
        let mut is_virtual = false;
        let mut is_override = false;
        loop {
            if self.match_keyword(Keyword::Pub) {
                is_public = true;
            } else if self.match_keyword(Keyword::Priv) {
                is_public = false;
            } else if self.match_keyword(Keyword::Static) {
                is_static = true;
            } else if self.match_keyword(Keyword::Virtual) {
                is_virtual = true;
            } else if self.match_keyword(Keyword::Override) {
                is_override = true;
            } else {
                break;
            }
        }

        if self.match_keyword(Keyword::Let) {
            let (field_name, field_loc) = self.consume_ident("Expected field name")?;
            self.consume(TokenKind::Colon, "Expected ':' after field name")?;
            let ty = self.parse_type()?;
            let init = if self.match_kind(&TokenKind::Assign) {
                Some(self.expression()?)
            } else {
                None
            };
            members.push(ClassMember::Field(FieldMember {
                name: field_name,
                ty,
                init,
                is_public,
                location: field_loc,
            }));
            self.skip_newlines();
            return Ok(());
        }

        // Constructor: the class name followed by a parameter list.
        if matches!(&self.peek().kind, TokenKind::Ident(n) if n == class_name) {
            let tok = self.advance();
            let location = tok.location;
            self.consume(TokenKind::LParen, "Expected '(' after constructor name")?;
            let params = self.parameter_list()?;
            self.consume(TokenKind::RParen, "Expected ')' after constructor parameters")?;
            self.consume(TokenKind::Arrow, "Expected '->' after constructor parameters")?;
            if !self.match_keyword(Keyword::SelfValue) {
                self.error_at_peek("Constructor must return 'self'");
            }
            let return_type = TypeExpr {
                kind: TypeExprKind::Primitive(PrimitiveType::SelfType),
                location: location.clone(),
            };
            self.skip_newlines();
            self.consume(TokenKind::LBrace, "Expected '{' before constructor body")?;
            let body = self.block()?;
            members.push(ClassMember::Method(MethodMember {
                name: class_name.to_string(),
                params,
                return_type,
                body,
                is_public,
                is_static,
                is_virtual,
                is_override,
                location,
            }));
            return Ok(());
        }

        if self.match_keyword(Keyword::Fn) {
            let (name, location, params, return_type) = self.function_signature()?;
            self.skip_newlines();
            self.consume(TokenKind::LBrace, "Expected '{' before method body")?;
            let body = self.block()?;
            members.push(ClassMember::Method(MethodMember {
                name,
                params,
                return_type,
                body,
                is_public,
                is_static,
                is_virtual,
                is_override,
                location,
            }));
            return Ok(());
        }

        self.error_at_peek("Expected field, constructor, or method declaration");
        self.advance();
        Ok(())
    }

    fn struct_decl(&mut self, is_foreign: bool) -> PResult<StructDecl> {
        let (name, location) = self.consume_ident("Expected struct name")?;
        self.consume(TokenKind::LBrace, "Expected '{' after struct name")?;

        let mut fields = Vec::new();
        while !self.check(&TokenKind::RBrace) && !self.is_at_end() {
            self.skip_newlines();
            if self.check(&TokenKind::RBrace) {
                break;
            }
            let (field_name, field_loc) = self.consume_ident("Expected field name")?;
            self.consume(TokenKind::Colon, "Expected ':' after field name")?;
            let ty = self.parse_type()?;
            fields.push(StructField {
                name: field_name,
                ty,
                location: field_loc,
            });
            if !self.match_kind(&TokenKind::Comma) {
                self.skip_newlines();
            }
        }

        self.consume(TokenKind::RBrace, "Expected '}' after struct body")?;
        Ok(StructDecl {
            name,
            fields,
            is_foreign,
            location,
        })
    }

    fn enum_decl(&mut self, is_foreign: bool) -> PResult<EnumDecl> {
        let (name, location) = self.consume_ident("Expected enum name")?;
        self.consume(TokenKind::LBrace, "Expected '{' after enum name")?;

        let mut variants = Vec::new();
        while !self.check(&TokenKind::RBrace) && !self.is_at_end() {
            self.skip_newlines();
            if self.check(&TokenKind::RBrace) {
                break;
            }
            let (variant_name, variant_loc) = self.consume_ident("Expected variant name")?;
            variants.push(EnumVariant {
                name: variant_name,
                location: variant_loc,
            });
            if !self.match_kind(&TokenKind::Comma) {
                self.skip_newlines();
            }
        }

        self.consume(TokenKind::RBrace, "Expected '}' after enum body")?;
        Ok(EnumDecl {
            name,
            variants,
            is_foreign,
            location,
        })
    }

    fn parameter_list(&mut self) -> PResult<Vec<Param>> {
        let mut params = Vec::new();
        self.skip_newlines();

        if self.check(&TokenKind::RParen) {
            return Ok(params);
        }

        loop {
            if self.is_at_end() {
                self.error_at_peek("Expected ')' to close parameter list");
                return Err(ParseInterrupt);
            }
            params.push(self.parameter()?);
            if self.check(&TokenKind::RParen) {
                break;
            }
            self.consume(TokenKind::Comma, "Expected ',' after parameter")?;
            self.skip_newlines();
        }

        Ok(params)
    }

    fn parameter(&mut self) -> PResult<Param> {
        if self.match_keyword(Keyword::SelfValue) {
            let location = self.previous_location();
            return Ok(Param {
                name: "self".to_string(),
                ty: TypeExpr {
                    kind: TypeExprKind::Primitive(PrimitiveType::SelfType),
                    location: location.clone(),
                },
                location,
            });
        }

        let (name, location) = self.consume_ident("Expected parameter name")?;
        self.consume(TokenKind::Colon, "Expected ':' after parameter name")?;
        let ty = self.parse_type()?;
        Ok(Param { name, ty, location })
    }

    // ========================================================================
    // Statements
    // ========================================================================

    fn statement(&mut self) -> PResult<Stmt> {
        self.skip_newlines();
        if self.match_keyword(Keyword::If) {
            return self.if_statement();
        }
        if self.match_keyword(Keyword::While) {
            return self.while_statement();
        }
        if self.match_keyword(Keyword::For) {
            return self.for_statement();
        }
        if self.match_keyword(Keyword::Return) {
            return self.return_statement();
        }
        if self.match_kind(&TokenKind::LBrace) {
            return Ok(Stmt::Block(self.block()?));
        }
        self.expression_statement()
    }

    fn block(&mut self) -> PResult<Block> {
        let location = self.previous_location();
        let mut statements = Vec::new();

        while !self.check(&TokenKind::RBrace) && !self.is_at_end() {
            self.skip_newlines();
            if self.check(&TokenKind::RBrace) || self.is_at_end() {
                break;
            }

            let result = if self.check_keyword(Keyword::Let) || self.check_keyword(Keyword::Const) {
                self.declaration_statement()
            } else {
                self.statement()
            };

            match result {
                Ok(stmt) => statements.push(stmt),
                Err(_) => self.synchronize_statement(),
            }
        }

        self.consume(TokenKind::RBrace, "Expected '}' after block")?;
        Ok(Block { statements, location })
    }

    fn declaration_statement(&mut self) -> PResult<Stmt> {
        if self.match_keyword(Keyword::Let) {
            let mutable = self.match_keyword(Keyword::Mut);
            return Ok(Stmt::Decl(Decl::Variable(self.variable_decl(mutable)?)));
        }
        self.advance(); // const
        Ok(Stmt::Decl(Decl::Variable(self.const_decl()?)))
    }

    fn if_statement(&mut self) -> PResult<Stmt> {
        let location = self.previous_location();
        let condition = self.expression()?;
        let then_branch = Box::new(self.statement()?);
        let else_branch = if self.match_keyword(Keyword::Else) {
            Some(Box::new(self.statement()?))
        } else {
            None
        };
        Ok(Stmt::If {
            condition,
            then_branch,
            else_branch,
            location,
        })
    }

    fn while_statement(&mut self) -> PResult<Stmt> {
        let location = self.previous_location();
        let condition = self.expression()?;
        let body = Box::new(self.statement()?);
        Ok(Stmt::While {
            condition,
            body,
            location,
        })
    }

    fn for_statement(&mut self) -> PResult<Stmt> {
        let (iterator, location) = self.consume_ident("Expected iterator name")?;
        self.consume(TokenKind::Keyword(Keyword::In), "Expected 'in' after iterator")?;
        let iterable = self.expression()?;
        let body = Box::new(self.statement()?);
        Ok(Stmt::For {
            iterator,
            iterable,
            body,
            location,
        })
    }

    fn return_statement(&mut self) -> PResult<Stmt> {
        let location = self.previous_location();
        let value = if self.check(&TokenKind::Semi)
            || self.check(&TokenKind::Newline)
            || self.check(&TokenKind::RBrace)
            || self.is_at_end()
        {
            None
        } else {
            Some(self.expression()?)
        };
        self.consume_terminator()?;
        Ok(Stmt::Return { value, location })
    }

    fn expression_statement(&mut self) -> PResult<Stmt> {
        let expr = self.expression()?;
        self.consume_terminator()?;
        Ok(Stmt::Expr(expr))
    }

    // ========================================================================
    // Expressions (precedence ladder, low to high)
    // ========================================================================

    fn expression(&mut self) -> PResult<Expr> {
        self.assignment()
    }

    fn assignment(&mut self) -> PResult<Expr> {
        let expr = self.as_expression()?;

        let op = if self.match_kind(&TokenKind::Assign) {
            Some(AssignOp::Assign)
        } else if self.match_kind(&TokenKind::PlusAssign) {
            Some(AssignOp::Add)
        } else if self.match_kind(&TokenKind::MinusAssign) {
            Some(AssignOp::Sub)
        } else if self.match_kind(&TokenKind::StarAssign) {
            Some(AssignOp::Mul)
        } else if self.match_kind(&TokenKind::SlashAssign) {
            Some(AssignOp::Div)
        } else if self.match_kind(&TokenKind::PercentAssign) {
            Some(AssignOp::Rem)
        } else {
            None
        };

        if let Some(op) = op {
            // Right associative.
            let value = self.assignment()?;
            let location = expr.location.clone();
            return Ok(self.mk_expr(
                ExprKind::Assign {
                    op,
                    target: Box::new(expr),
                    value: Box::new(value),
                },
                location,
            ));
        }

        Ok(expr)
    }

    fn as_expression(&mut self) -> PResult<Expr> {
        let mut expr = self.logical_or()?;
        while self.match_keyword(Keyword::As) {
            let target = self.parse_type()?;
            let location = expr.location.clone();
            expr = self.mk_expr(
                ExprKind::AsCast {
                    value: Box::new(expr),
                    target,
                },
                location,
            );
        }
        Ok(expr)
    }

    fn binary_level(
        &mut self,
        ops: &[(TokenKind, BinaryOp)],
        next: fn(&mut Self) -> PResult<Expr>,
    ) -> PResult<Expr> {
        let mut expr = next(self)?;
        'outer: loop {
            for (kind, op) in ops {
                if self.match_kind(kind) {
                    let rhs = next(self)?;
                    let location = expr.location.clone();
                    expr = self.mk_expr(
                        ExprKind::Binary {
                            op: *op,
                            lhs: Box::new(expr),
                            rhs: Box::new(rhs),
                        },
                        location,
                    );
                    continue 'outer;
                }
            }
            break;
        }
        Ok(expr)
    }

    fn logical_or(&mut self) -> PResult<Expr> {
        self.binary_level(&[(TokenKind::OrOr, BinaryOp::Or)], Self::logical_and)
    }

    fn logical_and(&mut self) -> PResult<Expr> {
        self.binary_level(&[(TokenKind::AndAnd, BinaryOp::And)], Self::equality)
    }

    fn equality(&mut self) -> PResult<Expr> {
        self.binary_level(
            &[(TokenKind::EqEq, BinaryOp::Eq), (TokenKind::Ne, BinaryOp::Ne)],
            Self::comparison,
        )
    }

    fn comparison(&mut self) -> PResult<Expr> {
        self.binary_level(
            &[
                (TokenKind::Lt, BinaryOp::Lt),
                (TokenKind::Le, BinaryOp::Le),
                (TokenKind::Gt, BinaryOp::Gt),
                (TokenKind::Ge, BinaryOp::Ge),
            ],
            Self::shift,
        )
    }

    fn shift(&mut self) -> PResult<Expr> {
        self.binary_level(
            &[(TokenKind::Shl, BinaryOp::Shl), (TokenKind::Shr, BinaryOp::Shr)],
            Self::term,
        )
    }

    fn term(&mut self) -> PResult<Expr> {
        self.binary_level(
            &[(TokenKind::Plus, BinaryOp::Add), (TokenKind::Minus, BinaryOp::Sub)],
            Self::factor,
        )
    }

    fn factor(&mut self) -> PResult<Expr> {
        self.binary_level(
            &[
                (TokenKind::Star, BinaryOp::Mul),
                (TokenKind::Slash, BinaryOp::Div),
                (TokenKind::Percent, BinaryOp::Rem),
            ],
            Self::power,
        )
    }

    fn power(&mut self) -> PResult<Expr> {
        let expr = self.unary()?;
        if self.match_kind(&TokenKind::StarStar) {
            // Right associative.
            let rhs = self.power()?;
            let location = expr.location.clone();
            return Ok(self.mk_expr(
                ExprKind::Binary {
                    op: BinaryOp::Pow,
                    lhs: Box::new(expr),
                    rhs: Box::new(rhs),
                },
                location,
            ));
        }
        Ok(expr)
    }

    fn unary(&mut self) -> PResult<Expr> {
        let op = if self.match_kind(&TokenKind::Not) {
            Some(UnaryOp::Not)
        } else if self.match_kind(&TokenKind::Minus) {
            Some(UnaryOp::Neg)
        } else {
            None
        };

        if let Some(op) = op {
            let location = self.previous_location();
            let operand = self.unary()?;
            return Ok(self.mk_expr(
                ExprKind::Unary {
                    op,
                    operand: Box::new(operand),
                },
                location,
            ));
        }

        self.call()
    }

    fn call(&mut self) -> PResult<Expr> {
        let mut expr = self.primary()?;

        loop {
            if self.match_kind(&TokenKind::LParen) {
                let args = self.argument_list()?;
                self.consume(TokenKind::RParen, "Expected ')' after arguments")?;
                let location = expr.location.clone();
                expr = self.mk_expr(
                    ExprKind::Call {
                        callee: Box::new(expr),
                        args,
                    },
                    location,
                );
            } else if self.match_kind(&TokenKind::Dot) {
                let (member, _) = self.consume_ident("Expected property name after '.'")?;
                let location = expr.location.clone();
                expr = self.mk_expr(
                    ExprKind::Member {
                        object: Box::new(expr),
                        member,
                    },
                    location,
                );
            } else if self.match_kind(&TokenKind::LBracket) {
                let index = self.expression()?;
                self.consume(TokenKind::RBracket, "Expected ']' after index")?;
                let location = expr.location.clone();
                expr = self.mk_expr(
                    ExprKind::Index {
                        object: Box::new(expr),
                        index: Box::new(index),
                    },
                    location,
                );
            } else if self.match_kind(&TokenKind::PlusPlus) {
                let location = expr.location.clone();
                expr = self.mk_expr(
                    ExprKind::Postfix {
                        op: PostfixOp::Increment,
                        operand: Box::new(expr),
                    },
                    location,
                );
            } else if self.match_kind(&TokenKind::MinusMinus) {
                let location = expr.location.clone();
                expr = self.mk_expr(
                    ExprKind::Postfix {
                        op: PostfixOp::Decrement,
                        operand: Box::new(expr),
                    },
                    location,
                );
            } else {
                break;
            }
        }

        Ok(expr)
    }

    fn argument_list(&mut self) -> PResult<Vec<Expr>> {
        let mut args = Vec::new();
        self.skip_newlines();

        if self.check(&TokenKind::RParen) {
            return Ok(args);
        }

        loop {
            if self.is_at_end() {
                self.error_at_peek("Expected ')' to close argument list");
                return Err(ParseInterrupt);
            }
            args.push(self.expression()?);
            if self.check(&TokenKind::RParen) {
                break;
            }
            self.consume(TokenKind::Comma, "Expected ',' after argument")?;
            self.skip_newlines();
        }

        Ok(args)
    }

    fn primary(&mut self) -> PResult<Expr> {
        // cast<T>(x) / try_cast<T>(x)
        if self.check_keyword(Keyword::Cast) || self.check_keyword(Keyword::TryCast) {
            let tok = self.advance();
            let fallible = tok.kind == TokenKind::Keyword(Keyword::TryCast);
            let location = tok.location;
            self.consume(TokenKind::Lt, "Expected '<' after cast")?;
            let target = self.parse_type()?;
            self.consume(TokenKind::Gt, "Expected '>' after cast type")?;
            self.consume(TokenKind::LParen, "Expected '(' after cast type")?;
            let value = self.expression()?;
            self.consume(TokenKind::RParen, "Expected ')' after cast expression")?;
            return Ok(self.mk_expr(
                ExprKind::Cast {
                    target,
                    value: Box::new(value),
                    fallible,
                },
                location,
            ));
        }

        let literal = match &self.peek().kind {
            TokenKind::Int { value, suffix } => Some(Literal::Int {
                value: *value,
                suffix: *suffix,
            }),
            TokenKind::Float { value, suffix } => Some(Literal::Float {
                value: *value,
                suffix: *suffix,
            }),
            TokenKind::Str(s) => Some(Literal::Str(s.clone())),
            TokenKind::Bool(b) => Some(Literal::Bool(*b)),
            TokenKind::Null => Some(Literal::Null),
            _ => None,
        };
        if let Some(literal) = literal {
            let tok = self.advance();
            return Ok(self.mk_expr(ExprKind::Literal(literal), tok.location));
        }

        if let TokenKind::Ident(name) = &self.peek().kind {
            let name = name.clone();
            let tok = self.advance();
            return Ok(self.mk_expr(ExprKind::Ident(name), tok.location));
        }
        if self.match_keyword(Keyword::SelfValue) {
            let location = self.previous_location();
            return Ok(self.mk_expr(ExprKind::Ident("self".to_string()), location));
        }

        if self.match_kind(&TokenKind::LParen) {
            let expr = self.expression()?;
            self.consume(TokenKind::RParen, "Expected ')' after expression")?;
            return Ok(expr);
        }

        self.error_at_peek("Expected expression");
        Err(ParseInterrupt)
    }

    // ========================================================================
    // Types
    // ========================================================================

    fn parse_type(&mut self) -> PResult<TypeExpr> {
        if self.match_keyword(Keyword::Const) {
            let location = self.previous_location();
            let inner = self.parse_type()?;
            return Ok(TypeExpr {
                kind: TypeExprKind::Const(Box::new(inner)),
                location,
            });
        }

        let pointer_kind = if self.match_keyword(Keyword::Cptr) {
            Some(PointerKind::Cptr)
        } else if self.match_keyword(Keyword::Unique) {
            Some(PointerKind::Unique)
        } else if self.match_keyword(Keyword::Shared) {
            Some(PointerKind::Shared)
        } else if self.match_keyword(Keyword::Weak) {
            Some(PointerKind::Weak)
        } else {
            None
        };
        if let Some(kind) = pointer_kind {
            let location = self.previous_location();
            // Recurses, so pointer kinds nest left-to-right outer-to-inner.
            let pointee = self.parse_type()?;
            return Ok(TypeExpr {
                kind: TypeExprKind::Pointer {
                    kind,
                    pointee: Box::new(pointee),
                },
                location,
            });
        }

        let base = self.primary_type()?;

        if self.match_kind(&TokenKind::LBracket) {
            let size = match self.peek().kind {
                TokenKind::Int { value, .. } if value > 0 => {
                    self.advance();
                    value as usize
                }
                _ => {
                    self.error_at_peek("Expected positive array size");
                    return Err(ParseInterrupt);
                }
            };
            self.consume(TokenKind::RBracket, "Expected ']' after array type")?;
            let location = base.location.clone();
            return Ok(TypeExpr {
                kind: TypeExprKind::Array {
                    elem: Box::new(base),
                    size,
                },
                location,
            });
        }

        Ok(base)
    }

    fn primary_type(&mut self) -> PResult<TypeExpr> {
        if let TokenKind::Keyword(kw) = self.peek().kind {
            if let Some(prim) = primitive_for_keyword(kw) {
                let tok = self.advance();
                return Ok(TypeExpr {
                    kind: TypeExprKind::Primitive(prim),
                    location: tok.location,
                });
            }
        }

        if let TokenKind::Ident(name) = &self.peek().kind {
            let name = name.clone();
            let tok = self.advance();
            let location = tok.location;

            if self.match_kind(&TokenKind::Lt) {
                let mut args = Vec::new();
                loop {
                    args.push(self.parse_type()?);
                    if !self.match_kind(&TokenKind::Comma) {
                        break;
                    }
                }
                self.consume(TokenKind::Gt, "Expected '>' after generic type arguments")?;
                return Ok(TypeExpr {
                    kind: TypeExprKind::Generic { name, args },
                    location,
                });
            }

            return Ok(TypeExpr {
                kind: TypeExprKind::Named(name),
                location,
            });
        }

        self.error_at_peek("Expected type");
        Err(ParseInterrupt)
    }
}

fn primitive_for_keyword(kw: Keyword) -> Option<PrimitiveType> {
    match kw {
        Keyword::I8 => Some(PrimitiveType::I8),
        Keyword::I16 => Some(PrimitiveType::I16),
        Keyword::I32 => Some(PrimitiveType::I32),
        Keyword::I64 => Some(PrimitiveType::I64),
        Keyword::U8 => Some(PrimitiveType::U8),
        Keyword::U16 => Some(PrimitiveType::U16),
        Keyword::U32 => Some(PrimitiveType::U32),
        Keyword::U64 => Some(PrimitiveType::U64),
        Keyword::F32 => Some(PrimitiveType::F32),
        Keyword::F64 => Some(PrimitiveType::F64),
        Keyword::Bool => Some(PrimitiveType::Bool),
        Keyword::String => Some(PrimitiveType::String),
        Keyword::Void => Some(PrimitiveType::Void),
        Keyword::SelfValue => Some(PrimitiveType::SelfType),
        Keyword::RawVaList => Some(PrimitiveType::RawVaList),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{compare, printer};
    use crate::lexer::Lexer;
    use crate::source::SourceFile;

    fn parse(source: &str) -> (Module, DiagnosticEmitter) {
        let file = SourceFile::new("test.pang", source);
        let mut diagnostics = DiagnosticEmitter::new();
        let tokens = Lexer::new(&file, &mut diagnostics).tokenize();
        let module = Parser::new(tokens, &mut diagnostics).parse_module("test", "test.pang");
        (module, diagnostics)
    }

    fn parse_clean(source: &str) -> Module {
        let (module, diagnostics) = parse(source);
        assert!(
            !diagnostics.has_errors(),
            "unexpected errors: {:?}",
            diagnostics.diagnostics()
        );
        module
    }

    fn first_function(module: &Module) -> &FunctionDecl {
        match &module.decls[0] {
            Decl::Function(f) => f,
            other => panic!("expected function, got {:?}", other),
        }
    }

    #[test]
    fn test_function_declaration() {
        let module = parse_clean("fn add(a: i32, b: i32) -> i32 { return a + b }");
        let f = first_function(&module);
        assert_eq!(f.name, "add");
        assert_eq!(f.params.len(), 2);
        assert!(!f.is_foreign);
        assert!(matches!(
            f.return_type.kind,
            TypeExprKind::Primitive(PrimitiveType::I32)
        ));
        assert_eq!(f.body.as_ref().unwrap().statements.len(), 1);
    }

    #[test]
    fn test_empty_parameter_list() {
        let module = parse_clean("fn main() -> i32 { return 0 }");
        assert!(first_function(&module).params.is_empty());
    }

    #[test]
    fn test_missing_return_type_warns_and_defaults_to_void() {
        let (module, diagnostics) = parse("fn f() { }");
        assert!(!diagnostics.has_errors());
        assert_eq!(diagnostics.warning_count(), 1);
        let f = first_function(&module);
        assert!(matches!(
            f.return_type.kind,
            TypeExprKind::Primitive(PrimitiveType::Void)
        ));
    }

    #[test]
    fn test_precedence_shapes() {
        let module = parse_clean("fn f() -> i32 { return 1 + 2 * 3 }");
        let f = first_function(&module);
        let Stmt::Return { value: Some(expr), .. } = &f.body.as_ref().unwrap().statements[0] else {
            panic!("expected return");
        };
        // 1 + (2 * 3)
        let ExprKind::Binary { op, rhs, .. } = &expr.kind else {
            panic!("expected binary");
        };
        assert_eq!(*op, BinaryOp::Add);
        assert!(matches!(
            rhs.kind,
            ExprKind::Binary { op: BinaryOp::Mul, .. }
        ));
    }

    #[test]
    fn test_power_is_right_associative() {
        let module = parse_clean("fn f() -> i32 { return 2 ** 3 ** 4 }");
        let f = first_function(&module);
        let Stmt::Return { value: Some(expr), .. } = &f.body.as_ref().unwrap().statements[0] else {
            panic!("expected return");
        };
        let ExprKind::Binary { op, rhs, .. } = &expr.kind else {
            panic!("expected binary");
        };
        assert_eq!(*op, BinaryOp::Pow);
        assert!(matches!(
            rhs.kind,
            ExprKind::Binary { op: BinaryOp::Pow, .. }
        ));
    }

    #[test]
    fn test_assignment_is_right_associative() {
        let module = parse_clean("fn f() -> void { a = b = 1 }");
        let f = first_function(&module);
        let Stmt::Expr(expr) = &f.body.as_ref().unwrap().statements[0] else {
            panic!("expected expression statement");
        };
        let ExprKind::Assign { value, .. } = &expr.kind else {
            panic!("expected assignment");
        };
        assert!(matches!(value.kind, ExprKind::Assign { .. }));
    }

    #[test]
    fn test_postfix_and_calls() {
        let module = parse_clean("fn f() -> void { counter++\nitems[0](1, 2).field-- }");
        let f = first_function(&module);
        assert_eq!(f.body.as_ref().unwrap().statements.len(), 2);
    }

    #[test]
    fn test_casts() {
        let module =
            parse_clean("fn f() -> void { let a = cast<i64>(1)\nlet b = try_cast<f32>(a)\nlet c = a as f64 }");
        let f = first_function(&module);
        let stmts = &f.body.as_ref().unwrap().statements;
        let Stmt::Decl(Decl::Variable(a)) = &stmts[0] else { panic!() };
        assert!(matches!(
            a.init.as_ref().unwrap().kind,
            ExprKind::Cast { fallible: false, .. }
        ));
        let Stmt::Decl(Decl::Variable(b)) = &stmts[1] else { panic!() };
        assert!(matches!(
            b.init.as_ref().unwrap().kind,
            ExprKind::Cast { fallible: true, .. }
        ));
        let Stmt::Decl(Decl::Variable(c)) = &stmts[2] else { panic!() };
        assert!(matches!(c.init.as_ref().unwrap().kind, ExprKind::AsCast { .. }));
    }

    #[test]
    fn test_pointer_type_nesting() {
        let module = parse_clean("fn f(p: shared unique weak i32, q: cptr cptr u8) -> void { }");
        let f = first_function(&module);
        let TypeExprKind::Pointer { kind, pointee } = &f.params[0].ty.kind else {
            panic!("expected pointer");
        };
        assert_eq!(*kind, PointerKind::Shared);
        let TypeExprKind::Pointer { kind, pointee } = &pointee.kind else {
            panic!("expected nested pointer");
        };
        assert_eq!(*kind, PointerKind::Unique);
        assert!(matches!(pointee.kind, TypeExprKind::Pointer { kind: PointerKind::Weak, .. }));
        assert!(matches!(
            f.params[1].ty.kind,
            TypeExprKind::Pointer { kind: PointerKind::Cptr, .. }
        ));
    }

    #[test]
    fn test_array_and_const_types() {
        let module = parse_clean("fn f(a: i32[4], b: const string) -> void { }");
        let f = first_function(&module);
        assert!(matches!(f.params[0].ty.kind, TypeExprKind::Array { size: 4, .. }));
        assert!(matches!(f.params[1].ty.kind, TypeExprKind::Const(_)));
    }

    #[test]
    fn test_import_forms() {
        let module = parse_clean(
            "import \"io\"\nimport \"math\" { * }\nimport \"vec\" { dot, cross }\nfn main() -> i32 { return 0 }",
        );
        assert_eq!(module.imports.len(), 3);
        assert_eq!(module.imports[0].items, ImportItems::Wildcard);
        assert_eq!(module.imports[1].items, ImportItems::Wildcard);
        assert_eq!(
            module.imports[2].items,
            ImportItems::Named(vec!["dot".to_string(), "cross".to_string()])
        );
    }

    #[test]
    fn test_foreign_declarations() {
        let module = parse_clean(
            "foreign fn printf(format: cptr u8, args: raw_va_list) -> i32\nforeign struct FILE { fd: i32 }\nforeign const SEEK_SET: i32",
        );
        let Decl::Function(f) = &module.decls[0] else { panic!() };
        assert!(f.is_foreign);
        assert!(f.body.is_none());
        let Decl::Struct(s) = &module.decls[1] else { panic!() };
        assert!(s.is_foreign);
        let Decl::Variable(c) = &module.decls[2] else { panic!() };
        assert!(c.init.is_none());
        assert!(!c.is_mutable);
    }

    #[test]
    fn test_class_declaration() {
        let module = parse_clean(
            "class Point<T>: Shape {\n    let x: i32\n    priv let y: i32\n    Point(x: i32, y: i32) -> self {\n        self.x = x\n    }\n    fn norm(self) -> i32 {\n        return self.x\n    }\n    static fn origin() -> i32 {\n        return 0\n    }\n}",
        );
        let Decl::Class(c) = &module.decls[0] else { panic!() };
        assert_eq!(c.name, "Point");
        assert_eq!(c.generic_params, vec!["T".to_string()]);
        assert_eq!(c.base_class.as_deref(), Some("Shape"));
        assert_eq!(c.members.len(), 5);
        let ClassMember::Field(y) = &c.members[1] else { panic!() };
        assert!(!y.is_public);
        let ClassMember::Method(ctor) = &c.members[2] else { panic!() };
        assert_eq!(ctor.name, "Point");
        assert!(matches!(
            ctor.return_type.kind,
            TypeExprKind::Primitive(PrimitiveType::SelfType)
        ));
        let ClassMember::Method(origin) = &c.members[4] else { panic!() };
        assert!(origin.is_static);
    }

    #[test]
    fn test_class_may_be_empty() {
        let module = parse_clean("class Marker { }");
        let Decl::Class(c) = &module.decls[0] else { panic!() };
        assert!(c.members.is_empty());
    }

    #[test]
    fn test_enum_declaration() {
        let module = parse_clean("enum Color { Red, Green, Blue }");
        let Decl::Enum(e) = &module.decls[0] else { panic!() };
        assert_eq!(e.variants.len(), 3);
    }

    #[test]
    fn test_export_flags() {
        let module = parse_clean("export fn f() -> void { }\nexport let x = 1\nfn g() -> void { }");
        let Decl::Function(f) = &module.decls[0] else { panic!() };
        assert!(f.is_export);
        let Decl::Variable(x) = &module.decls[1] else { panic!() };
        assert!(x.is_export);
        let Decl::Function(g) = &module.decls[2] else { panic!() };
        assert!(!g.is_export);
    }

    #[test]
    fn test_export_on_type_warns() {
        let (module, diagnostics) = parse("export struct S { a: i32 }");
        assert!(!diagnostics.has_errors());
        assert_eq!(diagnostics.warning_count(), 1);
        assert!(matches!(module.decls[0], Decl::Struct(_)));
    }

    #[test]
    fn test_extra_semicolons_diagnosed_but_consumed() {
        let (module, diagnostics) = parse("fn f() -> void { let a = 1;;\nlet b = 2 }");
        assert!(diagnostics.has_errors());
        let f = first_function(&module);
        // Both statements survive.
        assert_eq!(f.body.as_ref().unwrap().statements.len(), 2);
    }

    #[test]
    fn test_statement_recovery_keeps_rest_of_body() {
        let (module, diagnostics) = parse("fn f() -> void { let = 1\nlet ok = 2 }");
        assert!(diagnostics.has_errors());
        let f = first_function(&module);
        let stmts = &f.body.as_ref().unwrap().statements;
        assert_eq!(stmts.len(), 1);
        let Stmt::Decl(Decl::Variable(v)) = &stmts[0] else { panic!() };
        assert_eq!(v.name, "ok");
    }

    #[test]
    fn test_declaration_recovery_keeps_later_declarations() {
        let (module, diagnostics) = parse("fn () -> void { }\nfn g() -> void { }");
        assert!(diagnostics.has_errors());
        assert!(module.decls.iter().any(|d| d.name() == "g"));
    }

    #[test]
    fn test_for_binds_iterator_with_body() {
        let module = parse_clean("fn f(xs: i32[3]) -> void { for i in xs { } }");
        let f = first_function(&module);
        let Stmt::For { iterator, .. } = &f.body.as_ref().unwrap().statements[0] else {
            panic!("expected for");
        };
        assert_eq!(iterator, "i");
    }

    #[test]
    fn test_print_parse_round_trip() {
        let source = "import \"io\"\n\nenum Color {\n    Red\n    Green\n}\n\nfn classify(n: i32, xs: i32[3]) -> i32 {\n    let mut total: i32 = 0\n    for i in xs {\n        total += xs[i] * (n + 1)\n    }\n    if total > 10 {\n        return total\n    } else {\n        return -total\n    }\n}\n";
        let first = parse_clean(source);
        let printed = printer::print_module(&first);
        let second = parse_clean(&printed);
        // The reparsed tree is structurally equal to the original
        // (locations ignored), and printing has reached a fixpoint.
        assert!(compare::module_eq(&first, &second));
        let reprinted = printer::print_module(&second);
        assert_eq!(printed, reprinted);
    }
}
