//! Recursive-descent parser.
//!
//! Produces the typed AST of `ast.rs`. Type specifiers are resolved to
//! interned `Type` handles as they are parsed; struct declarations register
//! their layout in the process-wide type registry so later declarations can
//! reference them.

use crate::common::error::CompileError;
use crate::common::types::Type;

use super::ast::*;
use super::token::{describe, Token, TokenKind};

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Parser {
        Parser { tokens, pos: 0 }
    }

    // ── token helpers ────────────────────────────────────────────────────

    fn peek(&self) -> &TokenKind {
        &self.tokens[self.pos].kind
    }

    fn peek_at(&self, offset: usize) -> &TokenKind {
        let i = (self.pos + offset).min(self.tokens.len() - 1);
        &self.tokens[i].kind
    }

    fn line(&self) -> u32 {
        self.tokens[self.pos].line
    }

    fn advance(&mut self) -> TokenKind {
        let kind = self.tokens[self.pos].kind.clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        kind
    }

    fn accept(&mut self, kind: &TokenKind) -> bool {
        if self.peek() == kind {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind) -> Result<(), CompileError> {
        if self.peek() == kind {
            self.advance();
            Ok(())
        } else {
            Err(CompileError::syntax(
                self.line(),
                format!("expected {}, found {}", describe(kind), describe(self.peek())),
            ))
        }
    }

    fn expect_identifier(&mut self) -> Result<String, CompileError> {
        match self.peek() {
            TokenKind::Identifier(name) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            other => Err(CompileError::syntax(
                self.line(),
                format!("expected identifier, found {}", describe(other)),
            )),
        }
    }

    fn expect_int(&mut self) -> Result<i32, CompileError> {
        match *self.peek() {
            TokenKind::IntLiteral(value) => {
                self.advance();
                Ok(value)
            }
            ref other => Err(CompileError::syntax(
                self.line(),
                format!("expected integer, found {}", describe(other)),
            )),
        }
    }

    // ── program structure ────────────────────────────────────────────────

    pub fn parse_program(&mut self) -> Result<Program, CompileError> {
        let mut items = Vec::new();
        while !matches!(self.peek(), TokenKind::Eof) {
            // `struct Name { ... };` declares a type; `struct Name x;` is a
            // variable declaration. Disambiguate by the token after the name.
            if matches!(self.peek(), TokenKind::Struct)
                && matches!(self.peek_at(2), TokenKind::LBrace)
            {
                self.parse_struct_decl()?;
                continue;
            }
            items.push(self.parse_toplevel_item()?);
        }
        Ok(Program { items })
    }

    fn parse_struct_decl(&mut self) -> Result<(), CompileError> {
        self.expect(&TokenKind::Struct)?;
        let name = self.expect_identifier()?;
        self.expect(&TokenKind::LBrace)?;
        let mut fields = Vec::new();
        while !self.accept(&TokenKind::RBrace) {
            let base = self.parse_base_type()?;
            let (field_name, field_ty) = self.parse_declarator(base)?;
            fields.push((field_name, field_ty));
            self.expect(&TokenKind::Semi)?;
        }
        self.expect(&TokenKind::Semi)?;
        Type::register_struct(&name, fields);
        Ok(())
    }

    fn parse_toplevel_item(&mut self) -> Result<Item, CompileError> {
        let base = self.parse_base_type()?;
        let mut ty = base;
        while self.accept(&TokenKind::Star) {
            ty = Type::pointer_to(ty);
        }
        let name = self.expect_identifier()?;

        if matches!(self.peek(), TokenKind::LParen) {
            return Ok(Item::Function(self.parse_function(name, ty)?));
        }

        // Global variable list; the first declarator's stars were already
        // consumed above.
        let first_ty = self.parse_array_dims(ty)?;
        let mut decls = vec![self.parse_global_decl(name, first_ty)?];
        while self.accept(&TokenKind::Comma) {
            let (decl_name, decl_ty) = self.parse_declarator(base)?;
            decls.push(self.parse_global_decl(decl_name, decl_ty)?);
        }
        self.expect(&TokenKind::Semi)?;
        Ok(Item::Globals(VarDeclList { decls }))
    }

    fn parse_global_decl(&mut self, name: String, ty: Type) -> Result<VarDecl, CompileError> {
        if matches!(self.peek(), TokenKind::Assign) {
            return Err(CompileError::syntax(
                self.line(),
                "global variables are zero-initialized; initializers are not supported",
            ));
        }
        Ok(VarDecl { name, ty, init: None })
    }

    /// `void`, `int`, `char`, or `struct Name` (which must be registered).
    fn parse_base_type(&mut self) -> Result<Type, CompileError> {
        match self.peek() {
            TokenKind::Void => {
                self.advance();
                Ok(Type::void())
            }
            TokenKind::Int => {
                self.advance();
                Ok(Type::i32())
            }
            TokenKind::Char => {
                self.advance();
                Ok(Type::i8())
            }
            TokenKind::Struct => {
                self.advance();
                let line = self.line();
                let name = self.expect_identifier()?;
                Type::struct_by_name(&name)
                    .ok_or_else(|| CompileError::syntax(line, format!("unknown struct '{}'", name)))
            }
            other => Err(CompileError::syntax(
                self.line(),
                format!("expected a type, found {}", describe(other)),
            )),
        }
    }

    /// `'*'* IDENT ('[' INT ']')*` applied to a base type.
    fn parse_declarator(&mut self, base: Type) -> Result<(String, Type), CompileError> {
        let mut ty = base;
        while self.accept(&TokenKind::Star) {
            ty = Type::pointer_to(ty);
        }
        let name = self.expect_identifier()?;
        let ty = self.parse_array_dims(ty)?;
        Ok((name, ty))
    }

    fn parse_array_dims(&mut self, mut ty: Type) -> Result<Type, CompileError> {
        let mut dims = Vec::new();
        while self.accept(&TokenKind::LBracket) {
            let line = self.line();
            let len = self.expect_int()?;
            if len <= 0 {
                return Err(CompileError::syntax(line, "array length must be positive"));
            }
            self.expect(&TokenKind::RBracket)?;
            dims.push(len as usize);
        }
        // `a[2][3]` is two rows of three: fold dimensions inside-out.
        for &len in dims.iter().rev() {
            ty = Type::array_of(ty, len);
        }
        Ok(ty)
    }

    fn parse_function(&mut self, name: String, return_type: Type) -> Result<FunctionDef, CompileError> {
        self.expect(&TokenKind::LParen)?;
        let mut params = Vec::new();
        if !self.accept(&TokenKind::RParen) {
            if matches!(self.peek(), TokenKind::Void) && matches!(self.peek_at(1), TokenKind::RParen)
            {
                self.advance();
            } else {
                loop {
                    let base = self.parse_base_type()?;
                    let mut ty = base;
                    while self.accept(&TokenKind::Star) {
                        ty = Type::pointer_to(ty);
                    }
                    let param_name = self.expect_identifier()?;
                    params.push(Param { name: param_name, ty });
                    if !self.accept(&TokenKind::Comma) {
                        break;
                    }
                }
            }
            self.expect(&TokenKind::RParen)?;
        }
        let body = self.parse_compound()?;
        Ok(FunctionDef { name, return_type, params, body })
    }

    // ── statements ───────────────────────────────────────────────────────

    fn parse_compound(&mut self) -> Result<Vec<Stmt>, CompileError> {
        self.expect(&TokenKind::LBrace)?;
        let mut stmts = Vec::new();
        while !self.accept(&TokenKind::RBrace) {
            stmts.push(self.parse_stmt()?);
        }
        Ok(stmts)
    }

    /// A statement body: either a compound block or a single statement.
    fn parse_body(&mut self) -> Result<Vec<Stmt>, CompileError> {
        if matches!(self.peek(), TokenKind::LBrace) {
            self.parse_compound()
        } else {
            Ok(vec![self.parse_stmt()?])
        }
    }

    fn starts_declaration(&self) -> bool {
        matches!(self.peek(), TokenKind::Void | TokenKind::Int | TokenKind::Char | TokenKind::Struct)
    }

    fn parse_stmt(&mut self) -> Result<Stmt, CompileError> {
        match self.peek() {
            TokenKind::LBrace => Ok(Stmt::Compound(self.parse_compound()?)),
            TokenKind::If => self.parse_if(),
            TokenKind::While => self.parse_while(),
            TokenKind::For => self.parse_for(),
            TokenKind::Switch => self.parse_switch(),
            TokenKind::Return => {
                self.advance();
                let value = if self.accept(&TokenKind::Semi) {
                    None
                } else {
                    let v = self.parse_expr()?;
                    self.expect(&TokenKind::Semi)?;
                    Some(v)
                };
                Ok(Stmt::Return(value))
            }
            TokenKind::Break => {
                self.advance();
                self.expect(&TokenKind::Semi)?;
                Ok(Stmt::Break)
            }
            TokenKind::Continue => {
                self.advance();
                self.expect(&TokenKind::Semi)?;
                Ok(Stmt::Continue)
            }
            TokenKind::Input => {
                self.advance();
                let target = self.parse_expr()?;
                self.expect(&TokenKind::Semi)?;
                Ok(Stmt::Input(target))
            }
            TokenKind::Output => {
                self.advance();
                let value = self.parse_expr()?;
                self.expect(&TokenKind::Semi)?;
                Ok(Stmt::Output(value))
            }
            _ if self.starts_declaration() => {
                let decls = self.parse_local_decls()?;
                Ok(Stmt::VarDecls(decls))
            }
            _ => {
                let expr = self.parse_expr()?;
                self.expect(&TokenKind::Semi)?;
                Ok(Stmt::Expr(expr))
            }
        }
    }

    fn parse_local_decls(&mut self) -> Result<VarDeclList, CompileError> {
        let base = self.parse_base_type()?;
        let mut decls = Vec::new();
        loop {
            let (name, ty) = self.parse_declarator(base)?;
            let init = if self.accept(&TokenKind::Assign) {
                Some(self.parse_expr()?)
            } else {
                None
            };
            decls.push(VarDecl { name, ty, init });
            if !self.accept(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(&TokenKind::Semi)?;
        Ok(VarDeclList { decls })
    }

    fn parse_if(&mut self) -> Result<Stmt, CompileError> {
        self.expect(&TokenKind::If)?;
        self.expect(&TokenKind::LParen)?;
        let cond = self.parse_expr()?;
        self.expect(&TokenKind::RParen)?;
        let then_body = self.parse_body()?;
        let else_body = if self.accept(&TokenKind::Else) {
            Some(self.parse_body()?)
        } else {
            None
        };
        Ok(Stmt::If { cond, then_body, else_body })
    }

    fn parse_while(&mut self) -> Result<Stmt, CompileError> {
        self.expect(&TokenKind::While)?;
        self.expect(&TokenKind::LParen)?;
        let cond = self.parse_expr()?;
        self.expect(&TokenKind::RParen)?;
        let body = self.parse_body()?;
        Ok(Stmt::While { cond, body })
    }

    fn parse_for(&mut self) -> Result<Stmt, CompileError> {
        self.expect(&TokenKind::For)?;
        self.expect(&TokenKind::LParen)?;
        let init = if self.accept(&TokenKind::Semi) {
            None
        } else if self.starts_declaration() {
            Some(Box::new(Stmt::VarDecls(self.parse_local_decls()?)))
        } else {
            let e = self.parse_expr()?;
            self.expect(&TokenKind::Semi)?;
            Some(Box::new(Stmt::Expr(e)))
        };
        let cond = if matches!(self.peek(), TokenKind::Semi) {
            None
        } else {
            Some(self.parse_expr()?)
        };
        self.expect(&TokenKind::Semi)?;
        let step = if matches!(self.peek(), TokenKind::RParen) {
            None
        } else {
            Some(self.parse_expr()?)
        };
        self.expect(&TokenKind::RParen)?;
        let body = self.parse_body()?;
        Ok(Stmt::For { init, cond, step, body })
    }

    fn parse_switch(&mut self) -> Result<Stmt, CompileError> {
        self.expect(&TokenKind::Switch)?;
        self.expect(&TokenKind::LParen)?;
        let value = self.parse_expr()?;
        self.expect(&TokenKind::RParen)?;
        self.expect(&TokenKind::LBrace)?;

        let mut body = Vec::new();
        let mut run: Vec<Stmt> = Vec::new();
        while !self.accept(&TokenKind::RBrace) {
            match self.peek() {
                TokenKind::Case => {
                    if !run.is_empty() {
                        body.push(SwitchItem::Block(std::mem::take(&mut run)));
                    }
                    self.advance();
                    let value = self.expect_int()?;
                    self.expect(&TokenKind::Colon)?;
                    body.push(SwitchItem::Case(value));
                }
                TokenKind::Default => {
                    if !run.is_empty() {
                        body.push(SwitchItem::Block(std::mem::take(&mut run)));
                    }
                    self.advance();
                    self.expect(&TokenKind::Colon)?;
                    body.push(SwitchItem::Default);
                }
                _ => run.push(self.parse_stmt()?),
            }
        }
        if !run.is_empty() {
            body.push(SwitchItem::Block(run));
        }
        Ok(Stmt::Switch { value, body })
    }

    // ── expressions ──────────────────────────────────────────────────────

    pub fn parse_expr(&mut self) -> Result<Expr, CompileError> {
        self.parse_assignment()
    }

    fn parse_assignment(&mut self) -> Result<Expr, CompileError> {
        let lhs = self.parse_comparison()?;
        if self.accept(&TokenKind::Assign) {
            let value = self.parse_assignment()?;
            return Ok(Expr::Assign { target: Box::new(lhs), value: Box::new(value) });
        }
        Ok(lhs)
    }

    fn parse_comparison(&mut self) -> Result<Expr, CompileError> {
        let mut lhs = self.parse_additive()?;
        loop {
            let op = match self.peek() {
                TokenKind::Lt => BinaryOp::Lt,
                TokenKind::Gt => BinaryOp::Gt,
                TokenKind::Le => BinaryOp::Le,
                TokenKind::Ge => BinaryOp::Ge,
                TokenKind::EqEq => BinaryOp::Eq,
                TokenKind::Ne => BinaryOp::Ne,
                _ => return Ok(lhs),
            };
            self.advance();
            let rhs = self.parse_additive()?;
            lhs = Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
    }

    fn parse_additive(&mut self) -> Result<Expr, CompileError> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => return Ok(lhs),
            };
            self.advance();
            let rhs = self.parse_multiplicative()?;
            lhs = Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, CompileError> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                _ => return Ok(lhs),
            };
            self.advance();
            let rhs = self.parse_unary()?;
            lhs = Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, CompileError> {
        if self.accept(&TokenKind::Amp) {
            let operand = self.parse_unary()?;
            return Ok(Expr::Unary { op: UnaryOp::Addr, operand: Box::new(operand) });
        }
        if self.accept(&TokenKind::Star) {
            let operand = self.parse_unary()?;
            return Ok(Expr::Unary { op: UnaryOp::Deref, operand: Box::new(operand) });
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expr, CompileError> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.accept(&TokenKind::LBracket) {
                let index = self.parse_expr()?;
                self.expect(&TokenKind::RBracket)?;
                expr = Expr::Index { base: Box::new(expr), index: Box::new(index) };
            } else if self.accept(&TokenKind::Dot) {
                let field = self.expect_identifier()?;
                expr = Expr::Member { base: Box::new(expr), field };
            } else {
                return Ok(expr);
            }
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, CompileError> {
        match self.peek().clone() {
            TokenKind::IntLiteral(value) => {
                self.advance();
                Ok(Expr::IntLiteral(value))
            }
            TokenKind::CharLiteral(value) => {
                self.advance();
                Ok(Expr::CharLiteral(value))
            }
            TokenKind::StringLiteral(bytes) => {
                self.advance();
                Ok(Expr::StringLiteral(bytes))
            }
            TokenKind::Identifier(name) => {
                self.advance();
                if self.accept(&TokenKind::LParen) {
                    let mut args = Vec::new();
                    if !self.accept(&TokenKind::RParen) {
                        loop {
                            args.push(self.parse_expr()?);
                            if !self.accept(&TokenKind::Comma) {
                                break;
                            }
                        }
                        self.expect(&TokenKind::RParen)?;
                    }
                    Ok(Expr::Call { name, args })
                } else {
                    Ok(Expr::Variable(name))
                }
            }
            TokenKind::LParen => {
                self.advance();
                let expr = self.parse_expr()?;
                self.expect(&TokenKind::RParen)?;
                Ok(expr)
            }
            other => Err(CompileError::syntax(
                self.line(),
                format!("expected an expression, found {}", describe(&other)),
            )),
        }
    }
}
