//! Recursive-descent parser.
//!
//! Precedence, loosest first: sequence (`,`), assignment, ternary, `or`, `and`, equality,
//! comparison, term, factor, prefix unary, postfix `++`/`--`, call/field/index, primary.
//!
//! A structural error aborts the whole parse.  Some errors (too many parameters, duplicate
//! names, prefix use of a binary operator) are only reported and parsing carries on.

use std::collections::HashSet;
use std::rc::Rc;

use crate::ast::{ClassDecl, Expr, FunctionDecl, FunctionKind, Stmt, Variable};
use crate::ctx::Context;
use crate::diag::{Diagnostics, StaticError};
use crate::interner::Symbol;
use crate::stack::ensure_sufficient_stack;
use crate::token::{Literal, Token, TokenKind};

/// Maximum number of parameters or arguments of a call.
pub const MAX_ARITY: usize = 255;

/// Parse a token sequence ending with `Eof` into a program.
///
/// Returns `None` after reporting to `diags` if a structural error was found.  The program may
/// also be returned alongside non-fatal diagnostics, in which case it must not run.
#[tracing::instrument(level = "debug", skip_all)]
pub fn parse(tokens: &[Token], ctx: &Rc<Context>, diags: &mut Diagnostics) -> Option<Vec<Stmt>> {
    let mut parser = Parser::new(tokens, ctx.clone(), diags);
    match parser.parse_program() {
        Ok(prg) => {
            tracing::debug!(statements = prg.len(), "parsed");
            Some(prg)
        }
        Err(e) => {
            parser.diags.error_at(&e.token, e.error);
            None
        }
    }
}

/// Error that aborts parsing.
#[derive(Debug)]
struct ParseError {
    token: Token,
    error: StaticError,
}

struct Parser<'a> {
    tokens: &'a [Token],
    current: usize,
    ctx: Rc<Context>,
    diags: &'a mut Diagnostics,
    eof: Token,
}

impl<'a> Parser<'a> {
    fn new(tokens: &'a [Token], ctx: Rc<Context>, diags: &'a mut Diagnostics) -> Parser<'a> {
        let last_line = tokens.last().map_or(1, |t| t.line);
        Parser {
            tokens,
            current: 0,
            ctx,
            diags,
            eof: Token::new(TokenKind::Eof, "", last_line),
        }
    }

    fn parse_program(&mut self) -> Result<Vec<Stmt>, ParseError> {
        let mut prg = vec![];
        while !self.at_end() {
            prg.push(self.declaration()?);
        }
        Ok(prg)
    }

    #[cfg(test)]
    fn parse_expression(&mut self) -> Result<Expr, ParseError> {
        let expr = self.expression()?;
        if !self.at_end() {
            return Err(self.error_at_current(StaticError::Expected("Expect end of input.")));
        }
        Ok(expr)
    }

    fn declaration(&mut self) -> Result<Stmt, ParseError> {
        match self.current_token().kind {
            TokenKind::Var => {
                self.advance();
                self.var_decl()
            }
            TokenKind::Fun if matches!(self.next_token().kind, TokenKind::Identifier(_)) => {
                self.advance();
                self.fun_decl()
            }
            TokenKind::Class => {
                self.advance();
                self.class_decl()
            }
            _ => self.statement(),
        }
    }

    /// Parse variable declaration.
    /// `var` has been consumed.
    fn var_decl(&mut self) -> Result<Stmt, ParseError> {
        let name = self.identifier("Expect variable name.")?;
        let init = if self.matches(&TokenKind::Equal) {
            Some(self.expression()?)
        } else {
            None
        };
        self.consume(
            TokenKind::Semicolon,
            "Expect ';' after variable declaration.",
        )?;
        Ok(Stmt::Var { name, init })
    }

    fn fun_decl(&mut self) -> Result<Stmt, ParseError> {
        let name = self.identifier("Expect function name.")?;
        self.consume(TokenKind::LeftParen, "Expect '(' after function name.")?;
        let params = self.parameters()?;
        self.consume(TokenKind::RightParen, "Expect ')' after parameters.")?;
        self.consume(TokenKind::LeftCurly, "Expect '{' before function body.")?;
        let body = self.block_body()?;
        Ok(Stmt::Fun(Rc::new(FunctionDecl {
            name,
            params,
            body,
            kind: FunctionKind::Function,
        })))
    }

    fn class_decl(&mut self) -> Result<Stmt, ParseError> {
        let name = self.identifier("Expect class name.")?;
        let superclass = if self.matches(&TokenKind::Less) {
            let name = self.identifier("Expect superclass name.")?;
            Some(Variable {
                id: self.ctx.next_expr_id(),
                name,
            })
        } else {
            None
        };
        self.consume(TokenKind::LeftCurly, "Expect '{' before class body.")?;

        let mut methods = vec![];
        let mut class_methods = vec![];
        let mut method_names: HashSet<Symbol> = HashSet::new();
        let mut class_method_names: HashSet<Symbol> = HashSet::new();
        while matches!(
            self.current_token().kind,
            TokenKind::Identifier(_) | TokenKind::Class
        ) {
            let is_class_method = self.matches(&TokenKind::Class);
            let method = self.method()?;
            let (names, table) = if is_class_method {
                (&mut class_method_names, &mut class_methods)
            } else {
                (&mut method_names, &mut methods)
            };
            if let Some(sym) = method.name.symbol() {
                if !names.insert(sym.clone()) {
                    self.diags
                        .error_at(&method.name, StaticError::DuplicateMethod);
                }
            }
            table.push(Rc::new(method));
        }

        self.consume(TokenKind::RightCurly, "Expect '}' after class body.")?;
        Ok(Stmt::Class(Rc::new(ClassDecl {
            name,
            superclass,
            methods,
            class_methods,
        })))
    }

    /// A method with a parameter list, or a getter without one.
    fn method(&mut self) -> Result<FunctionDecl, ParseError> {
        let name = self.identifier("Expect method name.")?;
        let (params, kind) = if self.matches(&TokenKind::LeftParen) {
            let params = self.parameters()?;
            self.consume(TokenKind::RightParen, "Expect ')' after parameters.")?;
            (params, FunctionKind::Method)
        } else if self.check(&TokenKind::LeftCurly) {
            (vec![], FunctionKind::Getter)
        } else {
            return Err(
                self.error_at_current(StaticError::Expected("Expect '(' or '{' after method name."))
            );
        };
        self.consume(TokenKind::LeftCurly, "Expect '{' before method body.")?;
        let body = self.block_body()?;
        Ok(FunctionDecl {
            name,
            params,
            body,
            kind,
        })
    }

    /// Comma-separated parameter names, without the enclosing parentheses.
    fn parameters(&mut self) -> Result<Vec<Token>, ParseError> {
        let mut params: Vec<Token> = vec![];
        if self.check(&TokenKind::RightParen) {
            return Ok(params);
        }
        let mut seen: HashSet<Symbol> = HashSet::new();
        loop {
            if params.len() >= MAX_ARITY {
                let token = self.current_token().clone();
                self.diags.error_at(&token, StaticError::TooManyParameters);
            }
            let param = self.identifier("Expect parameter name.")?;
            if let Some(sym) = param.symbol() {
                if !seen.insert(sym.clone()) {
                    self.diags.error_at(&param, StaticError::DuplicateParameter);
                }
            }
            params.push(param);
            if !self.matches(&TokenKind::Comma) {
                break;
            }
        }
        Ok(params)
    }

    fn identifier(&mut self, message: &'static str) -> Result<Token, ParseError> {
        if let TokenKind::Identifier(_) = self.current_token().kind {
            Ok(self.advance())
        } else {
            Err(self.error_at_current(StaticError::Expected(message)))
        }
    }

    fn statement(&mut self) -> Result<Stmt, ParseError> {
        match self.current_token().kind {
            TokenKind::LeftCurly => {
                self.advance();
                Ok(Stmt::Block(self.block_body()?))
            }
            TokenKind::If => {
                self.advance();
                self.consume(TokenKind::LeftParen, "Expect '(' after 'if'.")?;
                let cond = self.expression()?;
                self.consume(TokenKind::RightParen, "Expect ')' after if condition.")?;
                let then_branch = Box::new(self.statement()?);
                let else_branch = if self.matches(&TokenKind::Else) {
                    Some(Box::new(self.statement()?))
                } else {
                    None
                };
                Ok(Stmt::If {
                    cond,
                    then_branch,
                    else_branch,
                })
            }
            TokenKind::While => {
                self.advance();
                self.consume(TokenKind::LeftParen, "Expect '(' after 'while'.")?;
                let cond = self.expression()?;
                self.consume(TokenKind::RightParen, "Expect ')' after condition.")?;
                let body = Box::new(self.statement()?);
                Ok(Stmt::While { cond, body })
            }
            TokenKind::For => {
                self.advance();
                self.for_stmt()
            }
            TokenKind::Break => {
                let keyword = self.advance();
                self.consume(TokenKind::Semicolon, "Expect ';' after 'break'.")?;
                Ok(Stmt::Break(keyword))
            }
            TokenKind::Return => {
                let keyword = self.advance();
                let value = if self.check(&TokenKind::Semicolon) {
                    None
                } else {
                    Some(self.expression()?)
                };
                self.consume(TokenKind::Semicolon, "Expect ';' after return value.")?;
                Ok(Stmt::Return { keyword, value })
            }
            _ => {
                let expr = self.expression()?;
                self.consume(TokenKind::Semicolon, "Expect ';' after expression.")?;
                Ok(Stmt::Expr(expr))
            }
        }
    }

    /// Desugar `for (init; cond; incr) body` into
    /// `{ init; while (cond) { body; incr; } }`.
    fn for_stmt(&mut self) -> Result<Stmt, ParseError> {
        let paren = self.consume(TokenKind::LeftParen, "Expect '(' after 'for'.")?;

        let init = if self.matches(&TokenKind::Semicolon) {
            None
        } else {
            let stmt = self.declaration()?;
            if !matches!(stmt, Stmt::Var { .. } | Stmt::Expr(_)) {
                return Err(ParseError {
                    token: paren,
                    error: StaticError::BadForInitializer,
                });
            }
            Some(stmt)
        };

        let cond = if self.check(&TokenKind::Semicolon) {
            Expr::Literal(Literal::Bool(true))
        } else {
            self.expression()?
        };
        self.consume(TokenKind::Semicolon, "Expect ';' after loop condition.")?;

        let incr = if self.check(&TokenKind::RightParen) {
            None
        } else {
            Some(self.expression()?)
        };
        self.consume(TokenKind::RightParen, "Expect ')' after for clauses.")?;

        let mut body = self.statement()?;
        if let Some(incr) = incr {
            body = Stmt::Block(vec![body, Stmt::Expr(incr)]);
        }
        let mut stmts = vec![];
        if let Some(init) = init {
            stmts.push(init);
        }
        stmts.push(Stmt::While {
            cond,
            body: Box::new(body),
        });
        Ok(Stmt::Block(stmts))
    }

    /// Statements up to and including the closing curly brace.
    /// The opening brace has been consumed.
    fn block_body(&mut self) -> Result<Vec<Stmt>, ParseError> {
        let mut stmts = vec![];
        while !self.check(&TokenKind::RightCurly) && !self.at_end() {
            stmts.push(self.declaration()?);
        }
        self.consume(TokenKind::RightCurly, "Expect '}' after block.")?;
        Ok(stmts)
    }

    fn expression(&mut self) -> Result<Expr, ParseError> {
        ensure_sufficient_stack(|| self.sequence())
    }

    fn sequence(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.assignment()?;
        while self.check(&TokenKind::Comma) {
            let op = self.advance();
            let right = self.assignment()?;
            expr = binary(expr, op, right);
        }
        Ok(expr)
    }

    fn assignment(&mut self) -> Result<Expr, ParseError> {
        let target = self.ternary()?;
        if self.check(&TokenKind::Equal) {
            let equal = self.advance();
            let value = self.assignment()?;
            self.assign_to(target, value)
                .ok_or(ParseError {
                    token: equal,
                    error: StaticError::InvalidAssignmentTarget,
                })
        } else {
            Ok(target)
        }
    }

    /// Turn an lvalue-shaped expression into the matching assignment, or `None` if it is not an
    /// lvalue.
    fn assign_to(&self, target: Expr, value: Expr) -> Option<Expr> {
        let value = Box::new(value);
        match target {
            Expr::Variable(var) => Some(Expr::Assign {
                id: self.ctx.next_expr_id(),
                name: var.name,
                value,
            }),
            Expr::Get { object, name } => Some(Expr::FieldAssign {
                object,
                field: name,
                value,
            }),
            Expr::ListAccess {
                list,
                bracket,
                index,
            } => Some(Expr::ListAssign {
                list,
                bracket,
                index,
                value,
            }),
            _ => None,
        }
    }

    fn ternary(&mut self) -> Result<Expr, ParseError> {
        let cond = self.or()?;
        if self.check(&TokenKind::Question) {
            let question = self.advance();
            let then_expr = self.or()?;
            self.consume(TokenKind::Colon, "Expect ':' after then branch of '?'.")?;
            let else_expr = self.ternary()?;
            Ok(Expr::Ternary {
                cond: Box::new(cond),
                question,
                then_expr: Box::new(then_expr),
                else_expr: Box::new(else_expr),
            })
        } else {
            Ok(cond)
        }
    }

    fn or(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.and()?;
        while self.check(&TokenKind::Or) {
            let op = self.advance();
            let right = self.and()?;
            expr = binary(expr, op, right);
        }
        Ok(expr)
    }

    fn and(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.equality()?;
        while self.check(&TokenKind::And) {
            let op = self.advance();
            let right = self.equality()?;
            expr = binary(expr, op, right);
        }
        Ok(expr)
    }

    fn equality(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.comparison()?;
        while matches!(
            self.current_token().kind,
            TokenKind::EqualEqual | TokenKind::BangEqual
        ) {
            let op = self.advance();
            let right = self.comparison()?;
            expr = binary(expr, op, right);
        }
        Ok(expr)
    }

    fn comparison(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.term()?;
        while matches!(
            self.current_token().kind,
            TokenKind::Less | TokenKind::LessEqual | TokenKind::Greater | TokenKind::GreaterEqual
        ) {
            let op = self.advance();
            let right = self.term()?;
            expr = binary(expr, op, right);
        }
        Ok(expr)
    }

    fn term(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.factor()?;
        while matches!(
            self.current_token().kind,
            TokenKind::Plus | TokenKind::Minus
        ) {
            let op = self.advance();
            let right = self.factor()?;
            expr = binary(expr, op, right);
        }
        Ok(expr)
    }

    fn factor(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.unary()?;
        while matches!(
            self.current_token().kind,
            TokenKind::Star | TokenKind::Slash
        ) {
            let op = self.advance();
            let right = self.unary()?;
            expr = binary(expr, op, right);
        }
        Ok(expr)
    }

    /// Prefix `-` and `!`, right-associative.  A binary-only operator in prefix position is
    /// reported and skipped.
    fn unary(&mut self) -> Result<Expr, ParseError> {
        let mut ops = vec![];
        loop {
            match self.current_token().kind {
                TokenKind::Minus | TokenKind::Bang => ops.push(self.advance()),
                TokenKind::Plus
                | TokenKind::Star
                | TokenKind::Slash
                | TokenKind::EqualEqual
                | TokenKind::BangEqual
                | TokenKind::Less
                | TokenKind::LessEqual
                | TokenKind::Greater
                | TokenKind::GreaterEqual => {
                    let op = self.advance();
                    self.diags
                        .error_at(&op, StaticError::UnsupportedUnary(op.lexeme.to_string()));
                }
                _ => break,
            }
        }

        let mut expr = self.increment()?;
        for op in ops.into_iter().rev() {
            expr = Expr::Unary {
                op,
                operand: Box::new(expr),
            };
        }
        Ok(expr)
    }

    /// Postfix `x++` / `x--`, desugared to `x = x + 1` / `x = x - 1` on the same target.
    fn increment(&mut self) -> Result<Expr, ParseError> {
        let expr = self.call()?;
        if matches!(
            self.current_token().kind,
            TokenKind::PlusPlus | TokenKind::MinusMinus
        ) {
            let op = self.advance();
            let one = Expr::Literal(Literal::Number(1.0));
            let value = binary(self.reread(&expr), op.clone(), one);
            self.assign_to(expr, value).ok_or(ParseError {
                token: op,
                error: StaticError::InvalidIncrementTarget,
            })
        } else {
            Ok(expr)
        }
    }

    /// Copy of an lvalue used as an rvalue, with fresh node ids.
    fn reread(&self, expr: &Expr) -> Expr {
        match expr {
            Expr::Variable(var) => Expr::Variable(Variable {
                id: self.ctx.next_expr_id(),
                name: var.name.clone(),
            }),
            other => other.clone(),
        }
    }

    fn call(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.primary()?;
        loop {
            match self.current_token().kind {
                TokenKind::LeftParen => {
                    let paren = self.advance();
                    let args = self.arguments()?;
                    self.consume(TokenKind::RightParen, "Expect ')' after arguments.")?;
                    expr = Expr::Call {
                        callee: Box::new(expr),
                        paren,
                        args,
                    };
                }
                TokenKind::Dot => {
                    self.advance();
                    let name = self.identifier("Expect property name after '.'.")?;
                    expr = Expr::Get {
                        object: Box::new(expr),
                        name,
                    };
                }
                TokenKind::LeftBracket => {
                    let bracket = self.advance();
                    let index = self.assignment()?;
                    self.consume(TokenKind::RightBracket, "Expect ']' after index.")?;
                    expr = Expr::ListAccess {
                        list: Box::new(expr),
                        bracket,
                        index: Box::new(index),
                    };
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    /// Call arguments are parsed above the comma operator.
    fn arguments(&mut self) -> Result<Vec<Expr>, ParseError> {
        let mut args = vec![];
        if self.check(&TokenKind::RightParen) {
            return Ok(args);
        }
        loop {
            if args.len() >= MAX_ARITY {
                let token = self.current_token().clone();
                self.diags.error_at(&token, StaticError::TooManyArguments);
            }
            args.push(self.assignment()?);
            if !self.matches(&TokenKind::Comma) {
                break;
            }
        }
        Ok(args)
    }

    fn primary(&mut self) -> Result<Expr, ParseError> {
        let token = self.current_token().clone();
        if let Some(literal) = token.literal() {
            self.advance();
            return Ok(Expr::Literal(literal));
        }
        match token.kind {
            TokenKind::Identifier(_) => {
                self.advance();
                Ok(Expr::Variable(Variable {
                    id: self.ctx.next_expr_id(),
                    name: token,
                }))
            }
            TokenKind::This => {
                self.advance();
                Ok(Expr::This {
                    id: self.ctx.next_expr_id(),
                    keyword: token,
                })
            }
            TokenKind::Super => {
                self.advance();
                self.consume(TokenKind::Dot, "Expect '.' after 'super'.")?;
                let method = self.identifier("Expect superclass method name.")?;
                Ok(Expr::Super {
                    id: self.ctx.next_expr_id(),
                    keyword: token,
                    method,
                })
            }
            TokenKind::LeftParen => {
                self.advance();
                let expr = self.expression()?;
                self.consume(TokenKind::RightParen, "Expect ')' after expression.")?;
                Ok(Expr::Grouping(Box::new(expr)))
            }
            TokenKind::LeftBracket => {
                self.advance();
                let mut elements = vec![];
                if !self.check(&TokenKind::RightBracket) {
                    loop {
                        elements.push(self.assignment()?);
                        if !self.matches(&TokenKind::Comma) {
                            break;
                        }
                    }
                }
                self.consume(TokenKind::RightBracket, "Expect ']' after list elements.")?;
                Ok(Expr::List(elements))
            }
            TokenKind::Fun => {
                self.advance();
                self.lambda(token)
            }
            _ => Err(self.error_at_current(StaticError::ExpectedExpression)),
        }
    }

    /// `fun` has been consumed and names the lambda.
    fn lambda(&mut self, keyword: Token) -> Result<Expr, ParseError> {
        self.consume(TokenKind::LeftParen, "Expect '(' after 'fun'.")?;
        let params = self.parameters()?;
        self.consume(TokenKind::RightParen, "Expect ')' after parameters.")?;
        self.consume(TokenKind::LeftCurly, "Expect '{' before function body.")?;
        let body = self.block_body()?;
        Ok(Expr::Lambda(Rc::new(FunctionDecl {
            name: keyword,
            params,
            body,
            kind: FunctionKind::Lambda,
        })))
    }

    fn current_token(&self) -> &Token {
        self.tokens.get(self.current).unwrap_or(&self.eof)
    }

    fn next_token(&self) -> &Token {
        self.tokens.get(self.current + 1).unwrap_or(&self.eof)
    }

    fn at_end(&self) -> bool {
        self.current_token().is_eof()
    }

    fn check(&self, kind: &TokenKind) -> bool {
        &self.current_token().kind == kind
    }

    /// Consume the current token if it has the given kind.
    fn matches(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    /// Move past the current token and return it.  Never moves past `Eof`.
    fn advance(&mut self) -> Token {
        let token = self.current_token().clone();
        if !token.is_eof() {
            self.current += 1;
        }
        token
    }

    fn consume(&mut self, expected: TokenKind, message: &'static str) -> Result<Token, ParseError> {
        if self.check(&expected) {
            Ok(self.advance())
        } else {
            Err(self.error_at_current(StaticError::Expected(message)))
        }
    }

    fn error_at_current(&self, error: StaticError) -> ParseError {
        ParseError {
            token: self.current_token().clone(),
            error,
        }
    }
}

fn binary(left: Expr, op: Token, right: Expr) -> Expr {
    Expr::Binary {
        left: Box::new(left),
        op,
        right: Box::new(right),
    }
}
