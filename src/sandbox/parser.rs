//! Recursive-descent parser for the restricted tool language.

use super::ast::{BinaryOp, Expr, Literal, Stmt, UnaryOp};
use super::token::{tokenize, SpannedToken, Token};
use crate::error::SandboxError;

pub fn parse(source: &str) -> Result<Vec<Stmt>, SandboxError> {
    let tokens = tokenize(source)?;
    let mut parser = Parser { tokens, pos: 0 };
    parser.parse_program()
}

struct Parser {
    tokens: Vec<SpannedToken>,
    pos: usize,
}

impl Parser {
    fn parse_program(&mut self) -> Result<Vec<Stmt>, SandboxError> {
        let mut stmts = Vec::new();
        while self.peek().is_some() {
            stmts.push(self.parse_stmt()?);
        }
        Ok(stmts)
    }

    fn parse_stmt(&mut self) -> Result<Stmt, SandboxError> {
        match self.peek() {
            Some(Token::Let) => {
                self.advance();
                let name = self.expect_ident()?;
                self.expect(&Token::Assign)?;
                let value = self.parse_expr()?;
                self.expect(&Token::Semicolon)?;
                Ok(Stmt::Let { name, value })
            }
            Some(Token::Fn) => {
                self.advance();
                let name = self.expect_ident()?;
                self.expect(&Token::LParen)?;
                let mut params = Vec::new();
                if self.peek() != Some(&Token::RParen) {
                    loop {
                        params.push(self.expect_ident()?);
                        if self.peek() == Some(&Token::Comma) {
                            self.advance();
                        } else {
                            break;
                        }
                    }
                }
                self.expect(&Token::RParen)?;
                let body = self.parse_block()?;
                Ok(Stmt::Fn { name, params, body })
            }
            Some(Token::Return) => {
                self.advance();
                let value = if self.peek() == Some(&Token::Semicolon) {
                    None
                } else {
                    Some(self.parse_expr()?)
                };
                self.expect(&Token::Semicolon)?;
                Ok(Stmt::Return(value))
            }
            Some(Token::If) => self.parse_if(),
            Some(Token::While) => {
                self.advance();
                let cond = self.parse_expr()?;
                let body = self.parse_block()?;
                Ok(Stmt::While { cond, body })
            }
            Some(Token::For) => {
                self.advance();
                let var = self.expect_ident()?;
                self.expect(&Token::In)?;
                let iter = self.parse_expr()?;
                let body = self.parse_block()?;
                Ok(Stmt::For { var, iter, body })
            }
            Some(Token::Break) => {
                self.advance();
                self.expect(&Token::Semicolon)?;
                Ok(Stmt::Break)
            }
            Some(Token::Continue) => {
                self.advance();
                self.expect(&Token::Semicolon)?;
                Ok(Stmt::Continue)
            }
            // `name = expr;` needs one token of lookahead past the identifier.
            Some(Token::Ident(_)) if self.peek_at(1) == Some(&Token::Assign) => {
                let name = self.expect_ident()?;
                self.advance(); // '='
                let value = self.parse_expr()?;
                self.expect(&Token::Semicolon)?;
                Ok(Stmt::Assign { name, value })
            }
            Some(_) => {
                let expr = self.parse_expr()?;
                self.expect(&Token::Semicolon)?;
                Ok(Stmt::Expr(expr))
            }
            None => Err(self.error_here("unexpected end of input")),
        }
    }

    fn parse_if(&mut self) -> Result<Stmt, SandboxError> {
        self.expect(&Token::If)?;
        let cond = self.parse_expr()?;
        let then_body = self.parse_block()?;
        let else_body = if self.peek() == Some(&Token::Else) {
            self.advance();
            if self.peek() == Some(&Token::If) {
                Some(vec![self.parse_if()?])
            } else {
                Some(self.parse_block()?)
            }
        } else {
            None
        };
        Ok(Stmt::If {
            cond,
            then_body,
            else_body,
        })
    }

    fn parse_block(&mut self) -> Result<Vec<Stmt>, SandboxError> {
        self.expect(&Token::LBrace)?;
        let mut stmts = Vec::new();
        while self.peek() != Some(&Token::RBrace) {
            if self.peek().is_none() {
                return Err(self.error_here("unterminated block"));
            }
            stmts.push(self.parse_stmt()?);
        }
        self.advance(); // '}'
        Ok(stmts)
    }

    fn parse_expr(&mut self) -> Result<Expr, SandboxError> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr, SandboxError> {
        let mut lhs = self.parse_and()?;
        while self.peek() == Some(&Token::OrOr) {
            self.advance();
            let rhs = self.parse_and()?;
            lhs = binary(BinaryOp::Or, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, SandboxError> {
        let mut lhs = self.parse_equality()?;
        while self.peek() == Some(&Token::AndAnd) {
            self.advance();
            let rhs = self.parse_equality()?;
            lhs = binary(BinaryOp::And, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_equality(&mut self) -> Result<Expr, SandboxError> {
        let mut lhs = self.parse_comparison()?;
        loop {
            let op = match self.peek() {
                Some(Token::Eq) => BinaryOp::Eq,
                Some(Token::NotEq) => BinaryOp::NotEq,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_comparison()?;
            lhs = binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_comparison(&mut self) -> Result<Expr, SandboxError> {
        let mut lhs = self.parse_term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Lt) => BinaryOp::Lt,
                Some(Token::LtEq) => BinaryOp::LtEq,
                Some(Token::Gt) => BinaryOp::Gt,
                Some(Token::GtEq) => BinaryOp::GtEq,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_term()?;
            lhs = binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_term(&mut self) -> Result<Expr, SandboxError> {
        let mut lhs = self.parse_factor()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_factor()?;
            lhs = binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_factor(&mut self) -> Result<Expr, SandboxError> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                Some(Token::Percent) => BinaryOp::Rem,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_unary()?;
            lhs = binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, SandboxError> {
        let op = match self.peek() {
            Some(Token::Minus) => Some(UnaryOp::Neg),
            Some(Token::Bang) => Some(UnaryOp::Not),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let operand = self.parse_unary()?;
            return Ok(Expr::Unary {
                op,
                operand: Box::new(operand),
            });
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expr, SandboxError> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek() {
                Some(Token::LParen) => {
                    self.advance();
                    let mut args = Vec::new();
                    if self.peek() != Some(&Token::RParen) {
                        loop {
                            args.push(self.parse_expr()?);
                            if self.peek() == Some(&Token::Comma) {
                                self.advance();
                            } else {
                                break;
                            }
                        }
                    }
                    self.expect(&Token::RParen)?;
                    expr = Expr::Call {
                        callee: Box::new(expr),
                        args,
                    };
                }
                Some(Token::LBracket) => {
                    self.advance();
                    let index = self.parse_expr()?;
                    self.expect(&Token::RBracket)?;
                    expr = Expr::Index {
                        target: Box::new(expr),
                        index: Box::new(index),
                    };
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr, SandboxError> {
        let line = self.current_line();
        match self.next() {
            Some(Token::Int(v)) => Ok(Expr::Literal(Literal::Int(v))),
            Some(Token::Float(v)) => Ok(Expr::Literal(Literal::Float(v))),
            Some(Token::Str(v)) => Ok(Expr::Literal(Literal::Str(v))),
            Some(Token::True) => Ok(Expr::Literal(Literal::Bool(true))),
            Some(Token::False) => Ok(Expr::Literal(Literal::Bool(false))),
            Some(Token::Null) => Ok(Expr::Literal(Literal::Null)),
            Some(Token::Ident(name)) => Ok(Expr::Ident(name)),
            Some(Token::Forbidden(word)) => Err(SandboxError::Compile(format!(
                "line {line}: '{word}' is not available in the sandbox"
            ))),
            Some(Token::LParen) => {
                let expr = self.parse_expr()?;
                self.expect(&Token::RParen)?;
                Ok(expr)
            }
            Some(Token::LBracket) => {
                let mut items = Vec::new();
                if self.peek() != Some(&Token::RBracket) {
                    loop {
                        items.push(self.parse_expr()?);
                        if self.peek() == Some(&Token::Comma) {
                            self.advance();
                        } else {
                            break;
                        }
                    }
                }
                self.expect(&Token::RBracket)?;
                Ok(Expr::List(items))
            }
            Some(Token::LBrace) => {
                let mut entries = Vec::new();
                if self.peek() != Some(&Token::RBrace) {
                    loop {
                        let key = match self.next() {
                            Some(Token::Str(key)) => key,
                            _ => {
                                return Err(SandboxError::Compile(format!(
                                    "line {line}: map keys must be string literals"
                                )))
                            }
                        };
                        self.expect(&Token::Colon)?;
                        let value = self.parse_expr()?;
                        entries.push((key, value));
                        if self.peek() == Some(&Token::Comma) {
                            self.advance();
                        } else {
                            break;
                        }
                    }
                }
                self.expect(&Token::RBrace)?;
                Ok(Expr::Map(entries))
            }
            Some(other) => Err(SandboxError::Compile(format!(
                "line {line}: unexpected token {other:?}"
            ))),
            None => Err(SandboxError::Compile("unexpected end of input".to_string())),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|t| &t.token)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset).map(|t| &t.token)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|t| t.token.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn advance(&mut self) {
        self.pos += 1;
    }

    fn expect(&mut self, expected: &Token) -> Result<(), SandboxError> {
        match self.peek() {
            Some(token) if token == expected => {
                self.advance();
                Ok(())
            }
            Some(token) => {
                let token = token.clone();
                Err(self.error_here(format!("expected {expected:?}, found {token:?}")))
            }
            None => Err(self.error_here(format!("expected {expected:?}, found end of input"))),
        }
    }

    fn expect_ident(&mut self) -> Result<String, SandboxError> {
        match self.peek().cloned() {
            Some(Token::Ident(name)) => {
                self.advance();
                Ok(name)
            }
            Some(Token::Forbidden(word)) => {
                let line = self.current_line();
                Err(SandboxError::Compile(format!(
                    "line {line}: '{word}' is not available in the sandbox"
                )))
            }
            Some(other) => Err(self.error_here(format!("expected identifier, found {other:?}"))),
            None => Err(self.error_here("expected identifier, found end of input")),
        }
    }

    fn current_line(&self) -> usize {
        self.tokens
            .get(self.pos.min(self.tokens.len().saturating_sub(1)))
            .map(|t| t.line)
            .unwrap_or(1)
    }

    fn error_here(&self, message: impl std::fmt::Display) -> SandboxError {
        SandboxError::Compile(format!("line {}: {message}", self.current_line()))
    }
}

fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
    Expr::Binary {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_let_and_function() {
        let program = parse("let x = 1;\nfn f(a, b) { return a + b; }").unwrap();
        assert_eq!(program.len(), 2);
        assert!(matches!(&program[0], Stmt::Let { name, .. } if name == "x"));
        assert!(matches!(&program[1], Stmt::Fn { name, params, .. }
            if name == "f" && params == &["a".to_string(), "b".to_string()]));
    }

    #[test]
    fn precedence_binds_mul_over_add() {
        let program = parse("let x = 1 + 2 * 3;").unwrap();
        let Stmt::Let { value, .. } = &program[0] else {
            panic!("expected let")
        };
        let Expr::Binary { op: BinaryOp::Add, rhs, .. } = value else {
            panic!("expected add at the top")
        };
        assert!(matches!(**rhs, Expr::Binary { op: BinaryOp::Mul, .. }));
    }

    #[test]
    fn parses_call_and_index_chains() {
        let program = parse(r#"let x = f(1)[0];"#).unwrap();
        let Stmt::Let { value, .. } = &program[0] else {
            panic!("expected let")
        };
        assert!(matches!(value, Expr::Index { .. }));
    }

    #[test]
    fn parses_map_literal_with_string_keys() {
        let program = parse(r#"let t = {"run": f, "n": 1};"#).unwrap();
        let Stmt::Let { value: Expr::Map(entries), .. } = &program[0] else {
            panic!("expected map literal")
        };
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].0, "run");
    }

    #[test]
    fn rejects_non_string_map_keys() {
        assert!(matches!(
            parse("let t = {1: 2};"),
            Err(SandboxError::Compile(_))
        ));
    }

    #[test]
    fn rejects_import_with_capability_message() {
        let err = parse("import os;").unwrap_err();
        let SandboxError::Compile(message) = err else {
            panic!("expected compile error")
        };
        assert!(message.contains("'import' is not available"));
    }

    #[test]
    fn rejects_missing_semicolon() {
        assert!(parse("let x = 1").is_err());
    }

    #[test]
    fn parses_if_else_chain() {
        let program = parse("if a { b(); } else if c { d(); } else { e(); }").unwrap();
        let Stmt::If { else_body: Some(else_body), .. } = &program[0] else {
            panic!("expected if with else")
        };
        assert!(matches!(else_body[0], Stmt::If { .. }));
    }

    #[test]
    fn parses_assignment_statement() {
        let program = parse("x = x + 1;").unwrap();
        assert!(matches!(&program[0], Stmt::Assign { name, .. } if name == "x"));
    }
}
