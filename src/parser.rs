//! The recursive-descent parser with precedence climbing (§4.2).

use crate::ast::*;
use crate::error::ParseError;
use crate::token::{Token, TokenKind};

/// Parses a full token stream into a `Program`, collecting every
/// recoverable syntax error along the way (§4.2 error recovery).
pub fn parse(tokens: &[Token]) -> (Program, Vec<ParseError>) {
    let mut parser = Parser::new(tokens);
    let mut statements = Vec::new();
    parser.skip_statement_separators();
    while !parser.is_at_end() {
        match parser.declaration() {
            Ok(stmt) => statements.push(stmt),
            Err(err) => {
                parser.errors.push(err);
                parser.synchronize();
            }
        }
        parser.skip_statement_separators();
    }
    (Program { statements }, parser.errors)
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    errors: Vec<ParseError>,
}

type PResult<T> = Result<T, ParseError>;

impl<'a> Parser<'a> {
    fn new(tokens: &'a [Token]) -> Self {
        Self {
            tokens,
            pos: 0,
            errors: Vec::new(),
        }
    }

    // ---- token stream helpers ------------------------------------------------

    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_kind(&self) -> TokenKind {
        self.peek().kind
    }

    fn previous(&self) -> &Token {
        &self.tokens[self.pos.saturating_sub(1)]
    }

    fn is_at_end(&self) -> bool {
        self.peek_kind() == TokenKind::EndOfFile
    }

    fn advance(&mut self) -> &Token {
        if !self.is_at_end() {
            self.pos += 1;
        }
        self.previous()
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.peek_kind() == kind
    }

    fn match_token(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind, message: &str) -> PResult<&Token> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            let tok = self.peek();
            Err(ParseError::new(
                format!("{message}, found {:?}", tok.kind),
                tok.line,
                tok.col,
            ))
        }
    }

    fn error_here(&self, message: impl Into<String>) -> ParseError {
        let tok = self.peek();
        ParseError::new(message, tok.line, tok.col)
    }

    /// Consumes an explicit `;` or an implicit newline terminator (§4.2).
    /// Two statements on one line without a `;` is a syntax error.
    fn end_statement(&mut self) -> PResult<()> {
        if self.match_token(TokenKind::Semicolon) {
            return Ok(());
        }
        if self.is_at_end() || self.peek().preceded_by_newline || self.check(TokenKind::RightBrace)
        {
            return Ok(());
        }
        Err(self.error_here("expected ';' or a newline to terminate the statement"))
    }

    fn skip_statement_separators(&mut self) {
        while self.match_token(TokenKind::Semicolon) {}
    }

    /// Error recovery (§4.2): advance until a statement-boundary keyword
    /// or a semicolon, then resume.
    fn synchronize(&mut self) {
        while !self.is_at_end() {
            if self.previous().kind == TokenKind::Semicolon {
                return;
            }
            match self.peek_kind() {
                TokenKind::Var
                | TokenKind::Fn
                | TokenKind::Class
                | TokenKind::If
                | TokenKind::While
                | TokenKind::For
                | TokenKind::Return
                | TokenKind::Import
                | TokenKind::Export
                | TokenKind::Try
                | TokenKind::Throw
                | TokenKind::Break
                | TokenKind::Continue
                | TokenKind::Match => return,
                _ => {
                    self.advance();
                }
            }
        }
    }

    // ---- statements ------------------------------------------------------

    fn declaration(&mut self) -> PResult<Stmt> {
        let tok = self.peek().clone();
        match tok.kind {
            TokenKind::Var => self.var_decl(),
            TokenKind::Fn => {
                self.advance();
                let decl = self.function_decl(false)?;
                Ok(Stmt::new(tok.line, tok.col, StmtKind::FuncDecl(decl)))
            }
            TokenKind::Async if self.check_next(TokenKind::Fn) => {
                self.advance();
                self.advance();
                let decl = self.function_decl(true)?;
                Ok(Stmt::new(tok.line, tok.col, StmtKind::FuncDecl(decl)))
            }
            TokenKind::Class => self.class_decl(),
            TokenKind::Import => self.import_stmt(),
            TokenKind::Export => self.export_stmt(),
            _ => self.statement(),
        }
    }

    fn check_next(&self, kind: TokenKind) -> bool {
        self.tokens
            .get(self.pos + 1)
            .map(|t| t.kind == kind)
            .unwrap_or(false)
    }

    fn var_decl(&mut self) -> PResult<Stmt> {
        let tok = self.advance().clone(); // `var`
        let pattern = self.binding_pattern()?;
        let type_annotation = if self.match_token(TokenKind::Colon) {
            Some(self.type_annotation()?)
        } else {
            None
        };
        let init = if self.match_token(TokenKind::Equal) {
            Some(self.expression()?)
        } else {
            None
        };
        self.end_statement()?;
        Ok(Stmt::new(
            tok.line,
            tok.col,
            StmtKind::VarDecl {
                pattern,
                type_annotation,
                init,
            },
        ))
    }

    fn binding_pattern(&mut self) -> PResult<Pattern> {
        match self.peek_kind() {
            TokenKind::LeftBracket => {
                self.advance();
                let mut elements = Vec::new();
                if !self.check(TokenKind::RightBracket) {
                    loop {
                        elements.push(self.binding_pattern()?);
                        if !self.match_token(TokenKind::Comma) {
                            break;
                        }
                    }
                }
                self.expect(TokenKind::RightBracket, "expected ']' after array pattern")?;
                Ok(Pattern::Array(elements))
            }
            TokenKind::LeftBrace => {
                self.advance();
                let mut keys = Vec::new();
                if !self.check(TokenKind::RightBrace) {
                    loop {
                        let name = self.expect(TokenKind::Identifier, "expected field name")?;
                        keys.push(name.lexeme.clone());
                        if !self.match_token(TokenKind::Comma) {
                            break;
                        }
                    }
                }
                self.expect(TokenKind::RightBrace, "expected '}' after map pattern")?;
                Ok(Pattern::Map(keys))
            }
            TokenKind::Underscore => {
                self.advance();
                Ok(Pattern::Wildcard)
            }
            _ => {
                let name = self.expect(TokenKind::Identifier, "expected a binding name")?;
                Ok(Pattern::Variable(name.lexeme.clone()))
            }
        }
    }

    fn type_annotation(&mut self) -> PResult<TypeAnnotation> {
        let name = self.expect(TokenKind::Identifier, "expected a type name")?;
        if name.lexeme == "Any" {
            Ok(TypeAnnotation::Any)
        } else {
            Ok(TypeAnnotation::Named(name.lexeme.clone()))
        }
    }

    fn function_decl(&mut self, is_async: bool) -> PResult<FunctionDecl> {
        let name = self.expect(TokenKind::Identifier, "expected a function name")?;
        let name = name.lexeme.clone();
        let params = self.param_list()?;
        let body = self.block_statements()?;
        Ok(FunctionDecl {
            name,
            params,
            body,
            is_async,
        })
    }

    fn param_list(&mut self) -> PResult<Vec<Param>> {
        self.expect(TokenKind::LeftParen, "expected '(' to start a parameter list")?;
        let mut params = Vec::new();
        if !self.check(TokenKind::RightParen) {
            loop {
                let name = self.expect(TokenKind::Identifier, "expected a parameter name")?;
                let name = name.lexeme.clone();
                let type_annotation = if self.match_token(TokenKind::Colon) {
                    Some(self.type_annotation()?)
                } else {
                    None
                };
                params.push(Param {
                    name,
                    type_annotation,
                });
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(TokenKind::RightParen, "expected ')' after parameter list")?;
        Ok(params)
    }

    fn class_decl(&mut self) -> PResult<Stmt> {
        let tok = self.advance().clone(); // `class`
        let name = self
            .expect(TokenKind::Identifier, "expected a class name")?
            .lexeme
            .clone();
        let superclass = if self.match_token(TokenKind::Extends) {
            Some(
                self.expect(TokenKind::Identifier, "expected a superclass name")?
                    .lexeme
                    .clone(),
            )
        } else {
            None
        };
        self.expect(TokenKind::LeftBrace, "expected '{' to start a class body")?;
        let mut fields = Vec::new();
        let mut methods = Vec::new();
        while !self.check(TokenKind::RightBrace) && !self.is_at_end() {
            if self.match_token(TokenKind::Var) {
                let field_name = self
                    .expect(TokenKind::Identifier, "expected a field name")?
                    .lexeme
                    .clone();
                if self.match_token(TokenKind::Colon) {
                    self.type_annotation()?;
                }
                let init = if self.match_token(TokenKind::Equal) {
                    Some(self.expression()?)
                } else {
                    None
                };
                self.end_statement()?;
                fields.push(FieldDecl {
                    name: field_name,
                    init,
                });
            } else if self.match_token(TokenKind::Fn) {
                methods.push(self.function_decl(false)?);
            } else if self.match_token(TokenKind::Async) {
                self.expect(TokenKind::Fn, "expected 'fn' after 'async'")?;
                methods.push(self.function_decl(true)?);
            } else {
                return Err(self.error_here("expected a field or method declaration"));
            }
            self.skip_statement_separators();
        }
        self.expect(TokenKind::RightBrace, "expected '}' to close a class body")?;
        Ok(Stmt::new(
            tok.line,
            tok.col,
            StmtKind::ClassDecl(ClassDecl {
                name,
                superclass,
                fields,
                methods,
            }),
        ))
    }

    fn import_stmt(&mut self) -> PResult<Stmt> {
        let tok = self.advance().clone(); // `import`
        let kind = if self.check(TokenKind::String) {
            let path = self.advance().lexeme.clone();
            self.end_statement()?;
            ImportStmt::SideEffect { path }
        } else if self.match_token(TokenKind::Star) {
            self.expect(TokenKind::As, "expected 'as' after 'import *'")?;
            let alias = self
                .expect(TokenKind::Identifier, "expected an alias name")?
                .lexeme
                .clone();
            self.expect(TokenKind::From, "expected 'from' after the import alias")?;
            let path = self
                .expect(TokenKind::String, "expected a module path string")?
                .lexeme
                .clone();
            self.end_statement()?;
            ImportStmt::Star { alias, path }
        } else {
            self.expect(TokenKind::LeftBrace, "expected '{' to start an import list")?;
            let specifiers = self.import_specifiers()?;
            self.expect(TokenKind::RightBrace, "expected '}' to close an import list")?;
            self.expect(TokenKind::From, "expected 'from' after an import list")?;
            let path = self
                .expect(TokenKind::String, "expected a module path string")?
                .lexeme
                .clone();
            self.end_statement()?;
            ImportStmt::Named { specifiers, path }
        };
        Ok(Stmt::new(tok.line, tok.col, StmtKind::Import(kind)))
    }

    fn import_specifiers(&mut self) -> PResult<Vec<(String, Option<String>)>> {
        let mut specifiers = Vec::new();
        if !self.check(TokenKind::RightBrace) {
            loop {
                let name = self
                    .expect(TokenKind::Identifier, "expected an exported name")?
                    .lexeme
                    .clone();
                let alias = if self.match_token(TokenKind::As) {
                    Some(
                        self.expect(TokenKind::Identifier, "expected an alias name")?
                            .lexeme
                            .clone(),
                    )
                } else {
                    None
                };
                specifiers.push((name, alias));
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }
        Ok(specifiers)
    }

    fn export_stmt(&mut self) -> PResult<Stmt> {
        let tok = self.advance().clone(); // `export`
        if self.check(TokenKind::LeftBrace) {
            self.advance();
            let specifiers = self.import_specifiers()?;
            self.expect(TokenKind::RightBrace, "expected '}' to close an export list")?;
            self.expect(TokenKind::From, "expected 'from' after an export list")?;
            let path = self
                .expect(TokenKind::String, "expected a module path string")?
                .lexeme
                .clone();
            self.end_statement()?;
            return Ok(Stmt::new(
                tok.line,
                tok.col,
                StmtKind::ReExport { specifiers, path },
            ));
        }
        let inner = self.declaration()?;
        Ok(Stmt::new(tok.line, tok.col, StmtKind::Export(Box::new(inner))))
    }

    fn statement(&mut self) -> PResult<Stmt> {
        let tok = self.peek().clone();
        match tok.kind {
            TokenKind::LeftBrace => {
                self.advance();
                let stmts = self.block_until_rbrace()?;
                Ok(Stmt::new(tok.line, tok.col, StmtKind::Block(stmts)))
            }
            TokenKind::If => self.if_stmt(),
            TokenKind::While => self.while_stmt(),
            TokenKind::For => self.for_stmt(),
            TokenKind::Return => {
                self.advance();
                let value = if self.check(TokenKind::Semicolon)
                    || self.is_at_end()
                    || self.peek().preceded_by_newline
                    || self.check(TokenKind::RightBrace)
                {
                    None
                } else {
                    Some(self.expression()?)
                };
                self.end_statement()?;
                Ok(Stmt::new(tok.line, tok.col, StmtKind::Return(value)))
            }
            TokenKind::Break => {
                self.advance();
                self.end_statement()?;
                Ok(Stmt::new(tok.line, tok.col, StmtKind::Break))
            }
            TokenKind::Continue => {
                self.advance();
                self.end_statement()?;
                Ok(Stmt::new(tok.line, tok.col, StmtKind::Continue))
            }
            TokenKind::Throw => {
                self.advance();
                let value = self.expression()?;
                self.end_statement()?;
                Ok(Stmt::new(tok.line, tok.col, StmtKind::Throw(value)))
            }
            TokenKind::Try => self.try_stmt(),
            _ => {
                let expr = self.expression()?;
                self.end_statement()?;
                Ok(Stmt::new(tok.line, tok.col, StmtKind::Expr(expr)))
            }
        }
    }

    fn block_until_rbrace(&mut self) -> PResult<Vec<Stmt>> {
        let mut stmts = Vec::new();
        self.skip_statement_separators();
        while !self.check(TokenKind::RightBrace) && !self.is_at_end() {
            match self.declaration() {
                Ok(stmt) => stmts.push(stmt),
                Err(err) => {
                    self.errors.push(err);
                    self.synchronize();
                }
            }
            self.skip_statement_separators();
        }
        self.expect(TokenKind::RightBrace, "expected '}' to close a block")?;
        Ok(stmts)
    }

    fn block_statements(&mut self) -> PResult<Vec<Stmt>> {
        self.expect(TokenKind::LeftBrace, "expected '{' to start a block")?;
        self.block_until_rbrace()
    }

    fn block_stmt(&mut self) -> PResult<Stmt> {
        let tok = self.peek().clone();
        let stmts = self.block_statements()?;
        Ok(Stmt::new(tok.line, tok.col, StmtKind::Block(stmts)))
    }

    fn if_stmt(&mut self) -> PResult<Stmt> {
        let tok = self.advance().clone(); // `if`
        self.expect(TokenKind::LeftParen, "expected '(' after 'if'")?;
        let cond = self.expression()?;
        self.expect(TokenKind::RightParen, "expected ')' after an if condition")?;
        let then_branch = Box::new(self.block_stmt()?);
        let else_branch = if self.match_token(TokenKind::Else) {
            if self.check(TokenKind::If) {
                Some(Box::new(self.if_stmt()?))
            } else {
                Some(Box::new(self.block_stmt()?))
            }
        } else {
            None
        };
        Ok(Stmt::new(
            tok.line,
            tok.col,
            StmtKind::If {
                cond,
                then_branch,
                else_branch,
            },
        ))
    }

    fn while_stmt(&mut self) -> PResult<Stmt> {
        let tok = self.advance().clone(); // `while`
        self.expect(TokenKind::LeftParen, "expected '(' after 'while'")?;
        let cond = self.expression()?;
        self.expect(TokenKind::RightParen, "expected ')' after a while condition")?;
        let body = Box::new(self.block_stmt()?);
        Ok(Stmt::new(tok.line, tok.col, StmtKind::While { cond, body }))
    }

    /// Desugars `for (init; cond; step) body` into
    /// `{ init; while (cond) { body; step; } }` (§4.2).
    fn for_stmt(&mut self) -> PResult<Stmt> {
        let tok = self.advance().clone(); // `for`
        self.expect(TokenKind::LeftParen, "expected '(' after 'for'")?;
        // Each arm below consumes the initializer clause's own trailing
        // `;`, so no further semicolon handling is needed afterwards.
        let init = if self.match_token(TokenKind::Semicolon) {
            None
        } else if self.check(TokenKind::Var) {
            Some(self.var_decl()?) // var_decl()'s end_statement() eats the `;`
        } else {
            let e = self.expression()?;
            self.expect(TokenKind::Semicolon, "expected ';' after a for-loop initializer")?;
            Some(Stmt::new(e.line, e.col, StmtKind::Expr(e)))
        };
        let cond = if self.check(TokenKind::Semicolon) {
            Expr::new(tok.line, tok.col, ExprKind::Literal(Literal::Boolean(true)))
        } else {
            self.expression()?
        };
        self.expect(TokenKind::Semicolon, "expected ';' after a for-loop condition")?;
        let step = if self.check(TokenKind::RightParen) {
            None
        } else {
            Some(self.expression()?)
        };
        self.expect(TokenKind::RightParen, "expected ')' after for-loop clauses")?;
        let body = self.block_stmt()?;

        let mut while_body_stmts = vec![body];
        if let Some(step) = step {
            while_body_stmts.push(Stmt::new(step.line, step.col, StmtKind::Expr(step)));
        }
        let while_body = Box::new(Stmt::new(
            tok.line,
            tok.col,
            StmtKind::Block(while_body_stmts),
        ));
        let while_stmt = Stmt::new(
            tok.line,
            tok.col,
            StmtKind::While {
                cond,
                body: while_body,
            },
        );
        let mut outer = Vec::new();
        if let Some(init) = init {
            outer.push(init);
        }
        outer.push(while_stmt);
        Ok(Stmt::new(tok.line, tok.col, StmtKind::Block(outer)))
    }

    fn try_stmt(&mut self) -> PResult<Stmt> {
        let tok = self.advance().clone(); // `try`
        let body = self.block_statements()?;
        let catch = if self.match_token(TokenKind::Catch) {
            let binding = if self.match_token(TokenKind::LeftParen) {
                let name = self
                    .expect(TokenKind::Identifier, "expected a catch binding name")?
                    .lexeme
                    .clone();
                self.expect(TokenKind::RightParen, "expected ')' after a catch binding")?;
                Some(name)
            } else {
                None
            };
            let catch_body = self.block_statements()?;
            Some((binding, catch_body))
        } else {
            None
        };
        let finally = if self.match_token(TokenKind::Finally) {
            Some(self.block_statements()?)
        } else {
            None
        };
        if catch.is_none() && finally.is_none() {
            return Err(ParseError::new(
                "expected 'catch' or 'finally' after 'try'",
                tok.line,
                tok.col,
            ));
        }
        Ok(Stmt::new(
            tok.line,
            tok.col,
            StmtKind::Try {
                body,
                catch,
                finally,
            },
        ))
    }

    // ---- expressions: precedence climbing (§4.2) --------------------------

    fn expression(&mut self) -> PResult<Expr> {
        self.assignment()
    }

    fn assignment(&mut self) -> PResult<Expr> {
        let expr = self.conditional()?;
        if self.match_token(TokenKind::Equal) {
            let value = self.assignment()?;
            return match &expr.kind {
                ExprKind::Identifier(_) | ExprKind::Index { .. } | ExprKind::Property { .. } => {
                    Ok(Expr::new(
                        expr.line,
                        expr.col,
                        ExprKind::Assign {
                            target: Box::new(expr),
                            value: Box::new(value),
                        },
                    ))
                }
                _ => Err(ParseError::new(
                    "invalid assignment target",
                    expr.line,
                    expr.col,
                )),
            };
        }
        Ok(expr)
    }

    fn conditional(&mut self) -> PResult<Expr> {
        let expr = self.nullish()?;
        if self.match_token(TokenKind::Question) {
            let then_branch = self.assignment()?;
            self.expect(TokenKind::Colon, "expected ':' in a conditional expression")?;
            let else_branch = self.assignment()?;
            return Ok(Expr::new(
                expr.line,
                expr.col,
                ExprKind::Conditional {
                    cond: Box::new(expr),
                    then_branch: Box::new(then_branch),
                    else_branch: Box::new(else_branch),
                },
            ));
        }
        Ok(expr)
    }

    fn nullish(&mut self) -> PResult<Expr> {
        let mut expr = self.logical_or()?;
        while self.match_token(TokenKind::QuestionQuestion) {
            let right = self.logical_or()?;
            expr = Expr::new(
                expr.line,
                expr.col,
                ExprKind::Nullish {
                    left: Box::new(expr),
                    right: Box::new(right),
                },
            );
        }
        Ok(expr)
    }

    fn logical_or(&mut self) -> PResult<Expr> {
        let mut expr = self.logical_and()?;
        while self.match_token(TokenKind::Or) {
            let right = self.logical_and()?;
            expr = Expr::new(
                expr.line,
                expr.col,
                ExprKind::Logical {
                    op: LogicalOp::Or,
                    left: Box::new(expr),
                    right: Box::new(right),
                },
            );
        }
        Ok(expr)
    }

    fn logical_and(&mut self) -> PResult<Expr> {
        let mut expr = self.equality()?;
        while self.match_token(TokenKind::And) {
            let right = self.equality()?;
            expr = Expr::new(
                expr.line,
                expr.col,
                ExprKind::Logical {
                    op: LogicalOp::And,
                    left: Box::new(expr),
                    right: Box::new(right),
                },
            );
        }
        Ok(expr)
    }

    fn equality(&mut self) -> PResult<Expr> {
        let mut expr = self.comparison()?;
        loop {
            let op = if self.match_token(TokenKind::EqualEqual) {
                BinaryOp::Equal
            } else if self.match_token(TokenKind::BangEqual) {
                BinaryOp::NotEqual
            } else {
                break;
            };
            let right = self.comparison()?;
            expr = Expr::new(
                expr.line,
                expr.col,
                ExprKind::Binary {
                    op,
                    left: Box::new(expr),
                    right: Box::new(right),
                },
            );
        }
        Ok(expr)
    }

    fn comparison(&mut self) -> PResult<Expr> {
        let mut expr = self.term()?;
        loop {
            let op = if self.match_token(TokenKind::Less) {
                BinaryOp::Less
            } else if self.match_token(TokenKind::LessEqual) {
                BinaryOp::LessEqual
            } else if self.match_token(TokenKind::Greater) {
                BinaryOp::Greater
            } else if self.match_token(TokenKind::GreaterEqual) {
                BinaryOp::GreaterEqual
            } else {
                break;
            };
            let right = self.term()?;
            expr = Expr::new(
                expr.line,
                expr.col,
                ExprKind::Binary {
                    op,
                    left: Box::new(expr),
                    right: Box::new(right),
                },
            );
        }
        Ok(expr)
    }

    fn term(&mut self) -> PResult<Expr> {
        let mut expr = self.factor()?;
        loop {
            let op = if self.match_token(TokenKind::Plus) {
                BinaryOp::Add
            } else if self.match_token(TokenKind::Minus) {
                BinaryOp::Subtract
            } else {
                break;
            };
            let right = self.factor()?;
            expr = Expr::new(
                expr.line,
                expr.col,
                ExprKind::Binary {
                    op,
                    left: Box::new(expr),
                    right: Box::new(right),
                },
            );
        }
        Ok(expr)
    }

    fn factor(&mut self) -> PResult<Expr> {
        let mut expr = self.unary()?;
        loop {
            let op = if self.match_token(TokenKind::Star) {
                BinaryOp::Multiply
            } else if self.match_token(TokenKind::Slash) {
                BinaryOp::Divide
            } else if self.match_token(TokenKind::Percent) {
                BinaryOp::Modulo
            } else {
                break;
            };
            let right = self.unary()?;
            expr = Expr::new(
                expr.line,
                expr.col,
                ExprKind::Binary {
                    op,
                    left: Box::new(expr),
                    right: Box::new(right),
                },
            );
        }
        Ok(expr)
    }

    fn unary(&mut self) -> PResult<Expr> {
        let tok = self.peek().clone();
        if self.match_token(TokenKind::Bang) {
            let operand = self.unary()?;
            return Ok(Expr::new(
                tok.line,
                tok.col,
                ExprKind::Unary {
                    op: UnaryOp::Not,
                    operand: Box::new(operand),
                },
            ));
        }
        if self.match_token(TokenKind::Minus) {
            let operand = self.unary()?;
            return Ok(Expr::new(
                tok.line,
                tok.col,
                ExprKind::Unary {
                    op: UnaryOp::Negate,
                    operand: Box::new(operand),
                },
            ));
        }
        if self.match_token(TokenKind::Await) {
            let operand = self.unary()?;
            return Ok(Expr::new(
                tok.line,
                tok.col,
                ExprKind::Unary {
                    op: UnaryOp::Await,
                    operand: Box::new(operand),
                },
            ));
        }
        self.call()
    }

    fn call(&mut self) -> PResult<Expr> {
        let mut expr = self.primary()?;
        loop {
            if self.match_token(TokenKind::LeftParen) {
                let args = self.call_arguments()?;
                expr = Expr::new(
                    expr.line,
                    expr.col,
                    ExprKind::Call {
                        callee: Box::new(expr),
                        args,
                    },
                );
            } else if self.match_token(TokenKind::LeftBracket) {
                let index = self.expression()?;
                self.expect(TokenKind::RightBracket, "expected ']' after an index expression")?;
                expr = Expr::new(
                    expr.line,
                    expr.col,
                    ExprKind::Index {
                        object: Box::new(expr),
                        index: Box::new(index),
                    },
                );
            } else if self.match_token(TokenKind::Dot) {
                let name = self
                    .expect(TokenKind::Identifier, "expected a property name after '.'")?
                    .lexeme
                    .clone();
                expr = Expr::new(
                    expr.line,
                    expr.col,
                    ExprKind::Property {
                        object: Box::new(expr),
                        name,
                    },
                );
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn call_arguments(&mut self) -> PResult<Vec<Expr>> {
        let mut args = Vec::new();
        if !self.check(TokenKind::RightParen) {
            loop {
                if self.match_token(TokenKind::DotDotDot) {
                    let inner = self.assignment()?;
                    args.push(Expr::new(inner.line, inner.col, ExprKind::Spread(Box::new(inner))));
                } else {
                    args.push(self.assignment()?);
                }
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(TokenKind::RightParen, "expected ')' after call arguments")?;
        Ok(args)
    }

    fn primary(&mut self) -> PResult<Expr> {
        let tok = self.peek().clone();
        match tok.kind {
            TokenKind::False => {
                self.advance();
                Ok(Expr::new(tok.line, tok.col, ExprKind::Literal(Literal::Boolean(false))))
            }
            TokenKind::True => {
                self.advance();
                Ok(Expr::new(tok.line, tok.col, ExprKind::Literal(Literal::Boolean(true))))
            }
            TokenKind::Nil => {
                self.advance();
                Ok(Expr::new(tok.line, tok.col, ExprKind::Literal(Literal::Nil)))
            }
            TokenKind::Number => {
                self.advance();
                let value: f64 = tok
                    .lexeme
                    .parse()
                    .map_err(|_| ParseError::new("invalid number literal", tok.line, tok.col))?;
                Ok(Expr::new(tok.line, tok.col, ExprKind::Literal(Literal::Number(value))))
            }
            TokenKind::String => {
                self.advance();
                Ok(Expr::new(
                    tok.line,
                    tok.col,
                    ExprKind::Literal(Literal::String(tok.lexeme.clone())),
                ))
            }
            TokenKind::This => {
                self.advance();
                Ok(Expr::new(tok.line, tok.col, ExprKind::This))
            }
            TokenKind::Super => {
                self.advance();
                self.expect(TokenKind::Dot, "expected '.' after 'super'")?;
                let method = self
                    .expect(TokenKind::Identifier, "expected a method name after 'super.'")?
                    .lexeme
                    .clone();
                Ok(Expr::new(tok.line, tok.col, ExprKind::Super { method }))
            }
            TokenKind::Identifier => {
                self.advance();
                Ok(Expr::new(
                    tok.line,
                    tok.col,
                    ExprKind::Identifier(tok.lexeme.clone()),
                ))
            }
            TokenKind::Print => {
                self.advance();
                self.expect(TokenKind::LeftParen, "expected '(' after 'print'")?;
                let args = self.call_arguments()?;
                Ok(Expr::new(tok.line, tok.col, ExprKind::Print(args)))
            }
            TokenKind::LeftParen => {
                self.advance();
                let expr = self.expression()?;
                self.expect(TokenKind::RightParen, "expected ')' after a parenthesized expression")?;
                Ok(expr)
            }
            TokenKind::LeftBracket => self.array_literal(),
            TokenKind::LeftBrace => self.map_literal(),
            TokenKind::Fn => self.function_literal(false),
            TokenKind::Async if self.check_next(TokenKind::Fn) => {
                self.advance();
                self.function_literal(true)
            }
            TokenKind::Match => self.match_expression(),
            _ => Err(ParseError::new(
                format!("expected an expression, found {:?}", tok.kind),
                tok.line,
                tok.col,
            )),
        }
    }

    fn array_literal(&mut self) -> PResult<Expr> {
        let tok = self.advance().clone(); // `[`
        let mut elements = Vec::new();
        if !self.check(TokenKind::RightBracket) {
            loop {
                if self.match_token(TokenKind::DotDotDot) {
                    let inner = self.assignment()?;
                    elements.push(Expr::new(inner.line, inner.col, ExprKind::Spread(Box::new(inner))));
                } else {
                    elements.push(self.assignment()?);
                }
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(TokenKind::RightBracket, "expected ']' after an array literal")?;
        Ok(Expr::new(tok.line, tok.col, ExprKind::ArrayLiteral(elements)))
    }

    /// Map and set literals share `{ ... }` syntax: `{k: v, ...}` is a
    /// map, `{e, e, ...}` (no colons) is a set, `{}` is an empty map.
    fn map_literal(&mut self) -> PResult<Expr> {
        let tok = self.advance().clone(); // `{`
        if self.check(TokenKind::RightBrace) {
            self.advance();
            return Ok(Expr::new(tok.line, tok.col, ExprKind::MapLiteral(Vec::new())));
        }

        if self.match_token(TokenKind::DotDotDot) {
            let first = self.assignment()?;
            let mut entries = vec![MapEntry::Spread(first)];
            while self.match_token(TokenKind::Comma) {
                if self.check(TokenKind::RightBrace) {
                    break;
                }
                entries.push(self.map_entry()?);
            }
            self.expect(TokenKind::RightBrace, "expected '}' after a map literal")?;
            return Ok(Expr::new(tok.line, tok.col, ExprKind::MapLiteral(entries)));
        }

        // Disambiguate `{ key: value }` (map) from `{ expr, expr }` (set)
        // by looking for a `:` after the first key-shaped token.
        let is_map = (self.check(TokenKind::Identifier) || self.check(TokenKind::String))
            && self.tokens.get(self.pos + 1).map(|t| t.kind) == Some(TokenKind::Colon);

        if is_map {
            let mut entries = vec![self.map_entry()?];
            while self.match_token(TokenKind::Comma) {
                if self.check(TokenKind::RightBrace) {
                    break;
                }
                entries.push(self.map_entry()?);
            }
            self.expect(TokenKind::RightBrace, "expected '}' after a map literal")?;
            Ok(Expr::new(tok.line, tok.col, ExprKind::MapLiteral(entries)))
        } else {
            let mut elements = vec![self.assignment()?];
            while self.match_token(TokenKind::Comma) {
                if self.check(TokenKind::RightBrace) {
                    break;
                }
                elements.push(self.assignment()?);
            }
            self.expect(TokenKind::RightBrace, "expected '}' after a set literal")?;
            Ok(Expr::new(tok.line, tok.col, ExprKind::SetLiteral(elements)))
        }
    }

    fn map_entry(&mut self) -> PResult<MapEntry> {
        if self.match_token(TokenKind::DotDotDot) {
            let inner = self.assignment()?;
            return Ok(MapEntry::Spread(inner));
        }
        let key = if self.check(TokenKind::String) {
            self.advance().lexeme.clone()
        } else {
            self.expect(TokenKind::Identifier, "expected a map key")?
                .lexeme
                .clone()
        };
        self.expect(TokenKind::Colon, "expected ':' after a map key")?;
        let value = self.assignment()?;
        Ok(MapEntry::Pair(key, value))
    }

    fn function_literal(&mut self, is_async: bool) -> PResult<Expr> {
        let tok = self.advance().clone(); // `fn`
        let name = if self.check(TokenKind::Identifier) {
            Some(self.advance().lexeme.clone())
        } else {
            None
        };
        let params = self.param_list()?;
        let body = self.block_statements()?;
        Ok(Expr::new(
            tok.line,
            tok.col,
            ExprKind::Function(FunctionLiteral {
                name,
                params,
                body,
                is_async,
            }),
        ))
    }

    fn match_expression(&mut self) -> PResult<Expr> {
        let tok = self.advance().clone(); // `match`
        let scrutinee = Box::new(self.expression()?);
        self.expect(TokenKind::LeftBrace, "expected '{' to start match arms")?;
        let mut arms = Vec::new();
        self.skip_statement_separators();
        while !self.check(TokenKind::RightBrace) && !self.is_at_end() {
            let pattern = self.match_pattern()?;
            let guard = if self.match_token(TokenKind::If) {
                Some(self.expression()?)
            } else {
                None
            };
            self.expect(TokenKind::Arrow, "expected '=>' after a match pattern")?;
            let body = self.assignment()?;
            arms.push(MatchArm {
                pattern,
                guard,
                body,
            });
            if !self.match_token(TokenKind::Comma) {
                self.skip_statement_separators();
            }
            self.skip_statement_separators();
        }
        self.expect(TokenKind::RightBrace, "expected '}' to close match arms")?;
        Ok(Expr::new(
            tok.line,
            tok.col,
            ExprKind::Match(MatchExpr { scrutinee, arms }),
        ))
    }

    fn match_pattern(&mut self) -> PResult<Pattern> {
        let tok = self.peek().clone();
        match tok.kind {
            TokenKind::Underscore => {
                self.advance();
                Ok(Pattern::Wildcard)
            }
            TokenKind::Nil => {
                self.advance();
                Ok(Pattern::Literal(Literal::Nil))
            }
            TokenKind::True => {
                self.advance();
                Ok(Pattern::Literal(Literal::Boolean(true)))
            }
            TokenKind::False => {
                self.advance();
                Ok(Pattern::Literal(Literal::Boolean(false)))
            }
            TokenKind::Number => {
                self.advance();
                let value: f64 = tok
                    .lexeme
                    .parse()
                    .map_err(|_| ParseError::new("invalid number literal", tok.line, tok.col))?;
                Ok(Pattern::Literal(Literal::Number(value)))
            }
            TokenKind::String => {
                self.advance();
                Ok(Pattern::Literal(Literal::String(tok.lexeme.clone())))
            }
            TokenKind::Minus => {
                self.advance();
                let num_tok = self.expect(TokenKind::Number, "expected a number after '-'")?;
                let value: f64 = num_tok
                    .lexeme
                    .parse()
                    .map_err(|_| ParseError::new("invalid number literal", tok.line, tok.col))?;
                Ok(Pattern::Literal(Literal::Number(-value)))
            }
            TokenKind::LeftBracket => {
                self.advance();
                let mut elements = Vec::new();
                if !self.check(TokenKind::RightBracket) {
                    loop {
                        elements.push(self.match_pattern()?);
                        if !self.match_token(TokenKind::Comma) {
                            break;
                        }
                    }
                }
                self.expect(TokenKind::RightBracket, "expected ']' after an array pattern")?;
                Ok(Pattern::Array(elements))
            }
            TokenKind::LeftBrace => {
                self.advance();
                let mut keys = Vec::new();
                if !self.check(TokenKind::RightBrace) {
                    loop {
                        let name = self.expect(TokenKind::Identifier, "expected a field name")?;
                        keys.push(name.lexeme.clone());
                        if !self.match_token(TokenKind::Comma) {
                            break;
                        }
                    }
                }
                self.expect(TokenKind::RightBrace, "expected '}' after a map pattern")?;
                Ok(Pattern::Map(keys))
            }
            TokenKind::Identifier => {
                self.advance();
                Ok(Pattern::Variable(tok.lexeme.clone()))
            }
            _ => Err(ParseError::new(
                format!("expected a pattern, found {:?}", tok.kind),
                tok.line,
                tok.col,
            )),
        }
    }
}
