//! 语法分析器
//!
//! 语句使用递归下降，表达式按优先级逐层下降：
//! 赋值 < or < and < 相等 < 比较 < 加减 < 乘除 < 一元 < 调用/下标 < 基本表达式。
//! 出错后跳到下一个语句边界继续，收集全部错误。

use tracing::debug;

use super::error::{ParseError, ParseResult};
use super::expr::{BinaryOp, Expr, ExprKind, LogicalOp, UnaryOp};
use super::stmt::{FunctionDecl, Stmt, WhenCase};
use crate::compiler::lexer::scanner::Scanner;
use crate::compiler::lexer::token::{Token, TokenKind};
use crate::core::Type;

/// 扫描并解析源码
pub fn parse_source(source: &str) -> Result<Vec<Stmt>, Vec<ParseError>> {
    let tokens = Scanner::new(source)
        .scan()
        .map_err(|errors| errors.into_iter().map(ParseError::from).collect::<Vec<_>>())?;
    Parser::new(tokens).parse()
}

pub struct Parser {
    tokens: Vec<Token>,
    current: usize,
    errors: Vec<ParseError>,
}

impl Parser {
    /// `tokens` 必须以 Eof 结尾
    pub fn new(mut tokens: Vec<Token>) -> Self {
        if tokens.last().map(|t| t.kind) != Some(TokenKind::Eof) {
            let line = tokens.last().map_or(1, |t| t.line);
            tokens.push(Token::new(TokenKind::Eof, "", line));
        }
        Self {
            tokens,
            current: 0,
            errors: Vec::new(),
        }
    }

    pub fn parse(mut self) -> Result<Vec<Stmt>, Vec<ParseError>> {
        let mut statements = Vec::new();
        self.skip_newlines();
        while !self.is_at_end() {
            match self.declaration() {
                Ok(stmt) => statements.push(stmt),
                Err(e) => {
                    self.errors.push(e);
                    self.synchronize();
                }
            }
            self.skip_newlines();
        }
        debug!(
            target: "enact::parser",
            "parsed {} statements, {} errors",
            statements.len(),
            self.errors.len()
        );
        if self.errors.is_empty() {
            Ok(statements)
        } else {
            Err(self.errors)
        }
    }

    // ==================== 声明 ====================

    fn declaration(&mut self) -> ParseResult<Stmt> {
        match self.peek().kind {
            TokenKind::Var | TokenKind::Const => {
                let stmt = self.var_declaration()?;
                self.end_statement()?;
                Ok(stmt)
            }
            TokenKind::Fun => self.function_declaration(),
            _ => self.statement(),
        }
    }

    fn var_declaration(&mut self) -> ParseResult<Stmt> {
        let keyword = self.advance();
        let is_const = keyword.kind == TokenKind::Const;
        let name = self.consume(TokenKind::Identifier, "Expected variable name.")?;
        let declared = if self.check(TokenKind::Equal) {
            None
        } else {
            Some(self.parse_type()?)
        };
        self.consume(TokenKind::Equal, "Expected '=' after variable declaration.")?;
        let initializer = self.expression()?;
        Ok(Stmt::Var {
            name: name.lexeme,
            declared,
            initializer,
            is_const,
            line: keyword.line,
        })
    }

    fn function_declaration(&mut self) -> ParseResult<Stmt> {
        let keyword = self.advance();
        let name = self.consume(TokenKind::Identifier, "Expected function name.")?;
        self.consume(TokenKind::LeftParen, "Expected '(' after function name.")?;
        let mut params = Vec::new();
        if !self.check(TokenKind::RightParen) {
            loop {
                let param = self.consume(TokenKind::Identifier, "Expected parameter name.")?;
                let ty = self.parse_type()?;
                params.push((param.lexeme, ty));
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expected ')' after parameters.")?;
        let ret = if self.check(TokenKind::Colon) {
            Type::Nothing
        } else {
            self.parse_type()?
        };
        self.consume(TokenKind::Colon, "Expected ':' before function body.")?;
        let body = self.block_body(&[TokenKind::End])?;
        self.consume(TokenKind::End, "Expected 'end' after function body.")?;
        Ok(Stmt::Function(FunctionDecl {
            name: name.lexeme,
            params,
            ret,
            body,
            line: keyword.line,
        }))
    }

    // ==================== 语句 ====================

    fn statement(&mut self) -> ParseResult<Stmt> {
        let line = self.peek().line;
        let stmt = match self.peek().kind {
            TokenKind::If => {
                self.advance();
                return self.if_statement(line);
            }
            TokenKind::Given => return self.given_statement(),
            TokenKind::While => return self.while_statement(),
            TokenKind::For => return self.for_statement(),
            TokenKind::Block => return self.block_statement(),
            TokenKind::Return => {
                self.advance();
                let value = if self.at_statement_end() {
                    None
                } else {
                    Some(self.expression()?)
                };
                Stmt::Return { value, line }
            }
            TokenKind::Break => {
                self.advance();
                Stmt::Break { line }
            }
            TokenKind::Continue => {
                self.advance();
                Stmt::Continue { line }
            }
            TokenKind::Pause => {
                self.advance();
                Stmt::Pause { line }
            }
            _ => Stmt::Expression(self.expression()?),
        };
        self.end_statement()?;
        Ok(stmt)
    }

    /// `if` 已被消费
    fn if_statement(&mut self, line: u32) -> ParseResult<Stmt> {
        let condition = self.expression()?;
        self.consume(TokenKind::Colon, "Expected ':' after if condition.")?;
        let then_branch = self.block_body(&[TokenKind::Else, TokenKind::End])?;

        let else_branch = if self.matches(TokenKind::Else) {
            if self.check(TokenKind::If) {
                let nested_line = self.advance().line;
                // else if 链共用最外层的 end
                return Ok(Stmt::If {
                    condition,
                    then_branch,
                    else_branch: vec![self.if_statement(nested_line)?],
                    line,
                });
            }
            self.consume(TokenKind::Colon, "Expected ':' after 'else'.")?;
            self.block_body(&[TokenKind::End])?
        } else {
            Vec::new()
        };
        self.consume(TokenKind::End, "Expected 'end' after if statement.")?;
        Ok(Stmt::If {
            condition,
            then_branch,
            else_branch,
            line,
        })
    }

    fn given_statement(&mut self) -> ParseResult<Stmt> {
        let line = self.advance().line;
        let subject = self.expression()?;
        self.consume(TokenKind::Colon, "Expected ':' after given value.")?;
        self.skip_newlines();

        let mut cases = Vec::new();
        while self.check(TokenKind::When) {
            let case_line = self.advance().line;
            let value = self.expression()?;
            self.consume(TokenKind::Colon, "Expected ':' after when value.")?;
            let body = self.block_body(&[TokenKind::When, TokenKind::Else, TokenKind::End])?;
            cases.push(WhenCase {
                value,
                body,
                line: case_line,
            });
        }

        let else_branch = if self.matches(TokenKind::Else) {
            self.consume(TokenKind::Colon, "Expected ':' after 'else'.")?;
            self.block_body(&[TokenKind::End])?
        } else {
            Vec::new()
        };
        self.consume(TokenKind::End, "Expected 'when', 'else' or 'end' in given statement.")?;
        Ok(Stmt::Given {
            subject,
            cases,
            else_branch,
            line,
        })
    }

    fn while_statement(&mut self) -> ParseResult<Stmt> {
        let line = self.advance().line;
        let condition = self.expression()?;
        self.consume(TokenKind::Colon, "Expected ':' after while condition.")?;
        let body = self.block_body(&[TokenKind::End])?;
        self.consume(TokenKind::End, "Expected 'end' after while body.")?;
        Ok(Stmt::While {
            condition,
            body,
            line,
        })
    }

    fn for_statement(&mut self) -> ParseResult<Stmt> {
        let line = self.advance().line;

        let initializer = if self.matches(TokenKind::Semicolon) {
            None
        } else {
            let init = if matches!(self.peek().kind, TokenKind::Var | TokenKind::Const) {
                self.var_declaration()?
            } else {
                Stmt::Expression(self.expression()?)
            };
            self.consume(TokenKind::Semicolon, "Expected ';' after loop initializer.")?;
            Some(Box::new(init))
        };

        let condition = if self.check(TokenKind::Semicolon) {
            None
        } else {
            Some(self.expression()?)
        };
        self.consume(TokenKind::Semicolon, "Expected ';' after loop condition.")?;

        let increment = if self.check(TokenKind::Colon) {
            None
        } else {
            Some(self.expression()?)
        };
        self.consume(TokenKind::Colon, "Expected ':' after for clauses.")?;

        let body = self.block_body(&[TokenKind::End])?;
        self.consume(TokenKind::End, "Expected 'end' after for body.")?;
        Ok(Stmt::For {
            initializer,
            condition,
            increment,
            body,
            line,
        })
    }

    fn block_statement(&mut self) -> ParseResult<Stmt> {
        let line = self.advance().line;
        self.consume(TokenKind::Colon, "Expected ':' after 'block'.")?;
        let body = self.block_body(&[TokenKind::End])?;
        self.consume(TokenKind::End, "Expected 'end' after block.")?;
        Ok(Stmt::Block { body, line })
    }

    /// 解析语句直到遇到任一终结符（不消费终结符）
    fn block_body(&mut self, terminators: &[TokenKind]) -> ParseResult<Vec<Stmt>> {
        let mut body = Vec::new();
        self.skip_newlines();
        while !terminators.contains(&self.peek().kind) && !self.is_at_end() {
            body.push(self.declaration()?);
            self.skip_newlines();
        }
        Ok(body)
    }

    fn at_statement_end(&self) -> bool {
        matches!(
            self.peek().kind,
            TokenKind::Newline
                | TokenKind::Semicolon
                | TokenKind::End
                | TokenKind::Else
                | TokenKind::When
                | TokenKind::Eof
        )
    }

    fn end_statement(&mut self) -> ParseResult<()> {
        if self.matches(TokenKind::Newline) || self.matches(TokenKind::Semicolon) {
            return Ok(());
        }
        if self.at_statement_end() {
            return Ok(());
        }
        Err(self.error_at_current("Expected newline or ';' after statement."))
    }

    // ==================== 类型 ====================

    fn parse_type(&mut self) -> ParseResult<Type> {
        let token = self.advance();
        match token.kind {
            TokenKind::Identifier => match token.lexeme.as_str() {
                "int" => Ok(Type::Int),
                "float" => Ok(Type::Float),
                "bool" => Ok(Type::Bool),
                "string" => Ok(Type::String),
                "any" => Ok(Type::Dynamic),
                "nothing" => Ok(Type::Nothing),
                other => Err(ParseError::new(
                    token.line,
                    format!(" at '{other}'"),
                    format!("Unknown type '{other}'."),
                )),
            },
            TokenKind::LeftSquare => {
                let element = self.parse_type()?;
                self.consume(TokenKind::RightSquare, "Expected ']' after array element type.")?;
                Ok(Type::array(element))
            }
            TokenKind::Fun => {
                self.consume(TokenKind::LeftParen, "Expected '(' after 'fun' in type.")?;
                let mut params = Vec::new();
                if !self.check(TokenKind::RightParen) {
                    loop {
                        params.push(self.parse_type()?);
                        if !self.matches(TokenKind::Comma) {
                            break;
                        }
                    }
                }
                self.consume(TokenKind::RightParen, "Expected ')' after parameter types.")?;
                let ret = if self.type_starts() {
                    self.parse_type()?
                } else {
                    Type::Nothing
                };
                Ok(Type::function(params, ret))
            }
            _ => Err(self.error_at(&token, "Expected a type.")),
        }
    }

    fn type_starts(&self) -> bool {
        let token = self.peek();
        match token.kind {
            TokenKind::LeftSquare | TokenKind::Fun => true,
            TokenKind::Identifier => matches!(
                token.lexeme.as_str(),
                "int" | "float" | "bool" | "string" | "any" | "nothing"
            ),
            _ => false,
        }
    }

    // ==================== 表达式 ====================

    pub fn expression(&mut self) -> ParseResult<Expr> {
        self.assignment()
    }

    fn assignment(&mut self) -> ParseResult<Expr> {
        let expr = self.or()?;
        if self.check(TokenKind::Equal) {
            let equals = self.advance();
            let value = self.assignment()?;
            return match expr.kind {
                ExprKind::Variable(_) | ExprKind::Subscript { .. } => Ok(Expr::new(
                    ExprKind::Assign {
                        target: Box::new(expr),
                        value: Box::new(value),
                    },
                    equals.line,
                )),
                _ => Err(self.error_at(&equals, "Invalid assignment target.")),
            };
        }
        Ok(expr)
    }

    fn or(&mut self) -> ParseResult<Expr> {
        let mut expr = self.and()?;
        while self.check(TokenKind::Or) {
            let line = self.advance().line;
            let right = self.and()?;
            expr = logical(LogicalOp::Or, expr, right, line);
        }
        Ok(expr)
    }

    fn and(&mut self) -> ParseResult<Expr> {
        let mut expr = self.equality()?;
        while self.check(TokenKind::And) {
            let line = self.advance().line;
            let right = self.equality()?;
            expr = logical(LogicalOp::And, expr, right, line);
        }
        Ok(expr)
    }

    fn equality(&mut self) -> ParseResult<Expr> {
        let mut expr = self.comparison()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::EqualEqual => BinaryOp::Equal,
                TokenKind::BangEqual => BinaryOp::NotEqual,
                _ => break,
            };
            let line = self.advance().line;
            let right = self.comparison()?;
            expr = binary(op, expr, right, line);
        }
        Ok(expr)
    }

    fn comparison(&mut self) -> ParseResult<Expr> {
        let mut expr = self.term()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Less => BinaryOp::Less,
                TokenKind::LessEqual => BinaryOp::LessEqual,
                TokenKind::Greater => BinaryOp::Greater,
                TokenKind::GreaterEqual => BinaryOp::GreaterEqual,
                _ => break,
            };
            let line = self.advance().line;
            let right = self.term()?;
            expr = binary(op, expr, right, line);
        }
        Ok(expr)
    }

    fn term(&mut self) -> ParseResult<Expr> {
        let mut expr = self.factor()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Subtract,
                _ => break,
            };
            let line = self.advance().line;
            let right = self.factor()?;
            expr = binary(op, expr, right, line);
        }
        Ok(expr)
    }

    fn factor(&mut self) -> ParseResult<Expr> {
        let mut expr = self.unary()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Star => BinaryOp::Multiply,
                TokenKind::Slash => BinaryOp::Divide,
                _ => break,
            };
            let line = self.advance().line;
            let right = self.unary()?;
            expr = binary(op, expr, right, line);
        }
        Ok(expr)
    }

    fn unary(&mut self) -> ParseResult<Expr> {
        let op = match self.peek().kind {
            TokenKind::Minus => UnaryOp::Negate,
            TokenKind::Bang => UnaryOp::Not,
            TokenKind::Copy => UnaryOp::Copy,
            _ => return self.call(),
        };
        let line = self.advance().line;
        let operand = self.unary()?;
        Ok(Expr::new(
            ExprKind::Unary {
                op,
                operand: Box::new(operand),
            },
            line,
        ))
    }

    fn call(&mut self) -> ParseResult<Expr> {
        let mut expr = self.primary()?;
        loop {
            if self.check(TokenKind::LeftParen) {
                let line = self.advance().line;
                let mut args = Vec::new();
                if !self.check(TokenKind::RightParen) {
                    loop {
                        args.push(self.expression()?);
                        if !self.matches(TokenKind::Comma) {
                            break;
                        }
                    }
                }
                self.consume(TokenKind::RightParen, "Expected ')' after arguments.")?;
                expr = Expr::new(
                    ExprKind::Call {
                        callee: Box::new(expr),
                        args,
                    },
                    line,
                );
            } else if self.check(TokenKind::LeftSquare) {
                let line = self.advance().line;
                let index = self.expression()?;
                self.consume(TokenKind::RightSquare, "Expected ']' after index.")?;
                expr = Expr::new(
                    ExprKind::Subscript {
                        object: Box::new(expr),
                        index: Box::new(index),
                    },
                    line,
                );
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn primary(&mut self) -> ParseResult<Expr> {
        let token = self.advance();
        let line = token.line;
        let kind = match token.kind {
            TokenKind::Integer => match token.lexeme.parse::<i64>() {
                Ok(n) => ExprKind::Int(n),
                Err(_) => return Err(self.error_at(&token, "Integer literal is too large.")),
            },
            TokenKind::Float => match token.lexeme.parse::<f64>() {
                Ok(f) => ExprKind::Float(f),
                Err(_) => return Err(self.error_at(&token, "Invalid float literal.")),
            },
            TokenKind::String => ExprKind::Str(token.lexeme),
            TokenKind::True => ExprKind::Bool(true),
            TokenKind::False => ExprKind::Bool(false),
            TokenKind::Nil => ExprKind::Nil,
            TokenKind::Identifier => ExprKind::Variable(token.lexeme),
            TokenKind::LeftParen => {
                let inner = self.expression()?;
                self.consume(TokenKind::RightParen, "Expected ')' after expression.")?;
                return Ok(inner);
            }
            TokenKind::LeftSquare => return self.array_literal(line),
            _ => return Err(self.error_at(&token, "Expected expression.")),
        };
        Ok(Expr::new(kind, line))
    }

    /// `[` 已被消费
    fn array_literal(&mut self, line: u32) -> ParseResult<Expr> {
        if self.matches(TokenKind::RightSquare) {
            if !self.type_starts() {
                return Err(self.error_at_current("Empty array literal needs an element type."));
            }
            let element_type = self.parse_type()?;
            return Ok(Expr::new(
                ExprKind::Array {
                    elements: Vec::new(),
                    element_type: Some(element_type),
                },
                line,
            ));
        }
        let mut elements = Vec::new();
        loop {
            elements.push(self.expression()?);
            if !self.matches(TokenKind::Comma) {
                break;
            }
        }
        self.consume(TokenKind::RightSquare, "Expected ']' after array elements.")?;
        Ok(Expr::new(
            ExprKind::Array {
                elements,
                element_type: None,
            },
            line,
        ))
    }

    // ==================== 辅助 ====================

    fn peek(&self) -> &Token {
        &self.tokens[self.current.min(self.tokens.len() - 1)]
    }

    fn is_at_end(&self) -> bool {
        self.peek().kind == TokenKind::Eof
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if !self.is_at_end() {
            self.current += 1;
        }
        token
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.peek().kind == kind
    }

    fn matches(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn consume(&mut self, kind: TokenKind, message: &str) -> ParseResult<Token> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(self.error_at_current(message))
        }
    }

    fn skip_newlines(&mut self) {
        while self.matches(TokenKind::Newline) || self.matches(TokenKind::Semicolon) {}
    }

    fn error_at_current(&self, message: &str) -> ParseError {
        self.error_at(self.peek(), message)
    }

    fn error_at(&self, token: &Token, message: &str) -> ParseError {
        let location = match token.kind {
            TokenKind::Eof => " at end".to_string(),
            TokenKind::Newline => " at newline".to_string(),
            _ => format!(" at '{}'", token.lexeme),
        };
        ParseError::new(token.line, location, message)
    }

    /// 跳到下一个语句边界
    fn synchronize(&mut self) {
        while !self.is_at_end() {
            let token = self.advance();
            if matches!(token.kind, TokenKind::Newline | TokenKind::Semicolon) {
                return;
            }
        }
    }
}

fn binary(op: BinaryOp, left: Expr, right: Expr, line: u32) -> Expr {
    Expr::new(
        ExprKind::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        },
        line,
    )
}

fn logical(op: LogicalOp, left: Expr, right: Expr, line: u32) -> Expr {
    Expr::new(
        ExprKind::Logical {
            op,
            left: Box::new(left),
            right: Box::new(right),
        },
        line,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> Vec<Stmt> {
        parse_source(source).unwrap()
    }

    #[test]
    fn test_precedence() {
        let stmts = parse("1 + 2 * 3");
        let Stmt::Expression(expr) = &stmts[0] else {
            panic!("expected expression statement")
        };
        let ExprKind::Binary { op, right, .. } = &expr.kind else {
            panic!("expected binary")
        };
        assert_eq!(*op, BinaryOp::Add);
        assert!(matches!(
            right.kind,
            ExprKind::Binary {
                op: BinaryOp::Multiply,
                ..
            }
        ));
    }

    #[test]
    fn test_function_declaration() {
        let stmts = parse("fun add(a int, b int) int:\n  return a + b\nend\n");
        let Stmt::Function(f) = &stmts[0] else {
            panic!("expected function")
        };
        assert_eq!(f.name, "add");
        assert_eq!(f.params.len(), 2);
        assert_eq!(f.ty(), Type::function(vec![Type::Int, Type::Int], Type::Int));
        assert!(matches!(f.body[0], Stmt::Return { value: Some(_), .. }));
    }

    #[test]
    fn test_control_flow() {
        let stmts = parse(
            "var i = 0\nwhile i < 3:\n i = i + 1\n if i == 2: break end\nend\n\
             for var j = 0; j < 2; j = j + 1: continue end\n\
             block: pause end",
        );
        assert_eq!(stmts.len(), 4);
        assert!(matches!(stmts[1], Stmt::While { .. }));
        assert!(matches!(stmts[2], Stmt::For { .. }));
        assert!(matches!(stmts[3], Stmt::Block { .. }));
    }

    #[test]
    fn test_given_statement() {
        let stmts = parse("given x:\n  when 1: print(1)\n  when 2:\n    print(2)\n  else: print(0)\nend\ngiven y: end");
        assert_eq!(stmts.len(), 2);
        let Stmt::Given {
            cases, else_branch, ..
        } = &stmts[0]
        else {
            panic!("expected given")
        };
        assert_eq!(cases.len(), 2);
        assert_eq!(cases[1].line, 3);
        assert_eq!(cases[1].body.len(), 1);
        assert_eq!(else_branch.len(), 1);
        assert!(matches!(&stmts[1], Stmt::Given { cases, .. } if cases.is_empty()));

        let errors = parse_source("given x:\n  print(1)\nend").unwrap_err();
        assert!(errors[0].message.contains("'when', 'else' or 'end'"));
    }

    #[test]
    fn test_else_if_chain() {
        let stmts = parse("if a: 1 else if b: 2 else: 3 end");
        let Stmt::If { else_branch, .. } = &stmts[0] else {
            panic!("expected if")
        };
        assert!(matches!(else_branch[0], Stmt::If { .. }));
    }

    #[test]
    fn test_types() {
        let stmts = parse("var f fun (int, [string]) bool = g\nvar a = []float");
        let Stmt::Var { declared, .. } = &stmts[0] else {
            panic!("expected var")
        };
        assert_eq!(
            declared.as_ref().unwrap().to_string(),
            "fun (int, [string]) bool"
        );
        let Stmt::Var { initializer, .. } = &stmts[1] else {
            panic!("expected var")
        };
        assert!(matches!(
            &initializer.kind,
            ExprKind::Array { element_type: Some(Type::Float), .. }
        ));
    }

    #[test]
    fn test_error_recovery() {
        let errors = parse_source("var = 1\nvar ok = 2\n1 +\n").unwrap_err();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].line, 1);
        assert!(errors[0].to_string().contains("Expected variable name."));
    }

    #[test]
    fn test_invalid_assignment() {
        let errors = parse_source("1 = 2").unwrap_err();
        assert!(errors[0].message.contains("Invalid assignment target"));
    }
}
