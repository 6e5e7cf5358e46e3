//! 扫描器：源码 -> Token 序列
//!
//! 换行是语句分隔符，但在圆括号和方括号内部被忽略。
//! 连续的换行只产生一个 Newline。

use thiserror::Error;
use tracing::trace;

use super::token::{Token, TokenKind};

/// 词法错误
#[derive(Debug, Clone, PartialEq, Error)]
#[error("[line {line}] Error: {message}")]
pub struct ScanError {
    pub line: u32,
    pub message: String,
}

pub struct Scanner<'src> {
    chars: std::iter::Peekable<std::str::CharIndices<'src>>,
    source: &'src str,
    line: u32,
    /// 括号嵌套深度
    depth: usize,
    tokens: Vec<Token>,
    errors: Vec<ScanError>,
}

impl<'src> Scanner<'src> {
    pub fn new(source: &'src str) -> Self {
        Self {
            chars: source.char_indices().peekable(),
            source,
            line: 1,
            depth: 0,
            tokens: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// 扫描全部输入
    pub fn scan(mut self) -> Result<Vec<Token>, Vec<ScanError>> {
        while let Some((start, c)) = self.chars.next() {
            self.scan_char(start, c);
        }
        self.push(TokenKind::Eof, "");
        trace!(target: "enact::lexer", "{} tokens", self.tokens.len());
        if self.errors.is_empty() {
            Ok(self.tokens)
        } else {
            Err(self.errors)
        }
    }

    fn scan_char(&mut self, start: usize, c: char) {
        use TokenKind::*;
        match c {
            '(' => self.open(LeftParen, "("),
            ')' => self.close(RightParen, ")"),
            '[' => self.open(LeftSquare, "["),
            ']' => self.close(RightSquare, "]"),
            ',' => self.push(Comma, ","),
            ':' => self.push(Colon, ":"),
            ';' => self.push(Semicolon, ";"),
            '+' => self.push(Plus, "+"),
            '-' => self.push(Minus, "-"),
            '*' => self.push(Star, "*"),
            '/' => {
                if self.matches('/') {
                    while let Some(&(_, c)) = self.chars.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.chars.next();
                    }
                } else {
                    self.push(Slash, "/");
                }
            }
            '!' => self.either('=', BangEqual, "!=", Bang, "!"),
            '=' => self.either('=', EqualEqual, "==", Equal, "="),
            '<' => self.either('=', LessEqual, "<=", Less, "<"),
            '>' => self.either('=', GreaterEqual, ">=", Greater, ">"),
            '\n' => {
                if self.depth == 0 && !matches!(self.last_kind(), Some(Newline) | None) {
                    self.push(Newline, "\\n");
                }
                self.line += 1;
            }
            ' ' | '\t' | '\r' => {}
            '"' => self.string(),
            c if c.is_ascii_digit() => self.number(start),
            c if c.is_alphabetic() || c == '_' => self.identifier(start),
            other => self.error(format!("Unexpected character '{other}'.")),
        }
    }

    fn string(&mut self) {
        let line = self.line;
        let mut text = String::new();
        loop {
            match self.chars.next() {
                Some((_, '"')) => break,
                Some((_, '\n')) => {
                    self.line += 1;
                    text.push('\n');
                }
                Some((_, c)) => text.push(c),
                None => {
                    self.error("Unterminated string.".to_string());
                    return;
                }
            }
        }
        self.tokens.push(Token::new(TokenKind::String, text, line));
    }

    fn number(&mut self, start: usize) {
        let mut end = start + 1;
        let mut is_float = false;
        while let Some(&(i, c)) = self.chars.peek() {
            if c.is_ascii_digit() {
                end = i + 1;
                self.chars.next();
            } else if c == '.' && !is_float && self.digit_after(i) {
                is_float = true;
                end = i + 1;
                self.chars.next();
            } else {
                break;
            }
        }
        let kind = if is_float {
            TokenKind::Float
        } else {
            TokenKind::Integer
        };
        let text = &self.source[start..end];
        self.push(kind, text.to_string());
    }

    fn digit_after(&self, dot: usize) -> bool {
        self.source[dot + 1..]
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_digit())
    }

    fn identifier(&mut self, start: usize) {
        let mut end = start + self.source[start..].chars().next().map_or(1, char::len_utf8);
        while let Some(&(i, c)) = self.chars.peek() {
            if c.is_alphanumeric() || c == '_' {
                end = i + c.len_utf8();
                self.chars.next();
            } else {
                break;
            }
        }
        let text = &self.source[start..end];
        let kind = TokenKind::keyword(text).unwrap_or(TokenKind::Identifier);
        self.push(kind, text.to_string());
    }

    // ==================== 辅助 ====================

    fn matches(&mut self, expected: char) -> bool {
        if self.chars.peek().map(|&(_, c)| c) == Some(expected) {
            self.chars.next();
            true
        } else {
            false
        }
    }

    fn either(
        &mut self,
        next: char,
        long: TokenKind,
        long_text: &str,
        short: TokenKind,
        short_text: &str,
    ) {
        if self.matches(next) {
            self.push(long, long_text);
        } else {
            self.push(short, short_text);
        }
    }

    fn open(&mut self, kind: TokenKind, text: &str) {
        self.depth += 1;
        self.push(kind, text);
    }

    fn close(&mut self, kind: TokenKind, text: &str) {
        self.depth = self.depth.saturating_sub(1);
        self.push(kind, text);
    }

    fn last_kind(&self) -> Option<TokenKind> {
        self.tokens.last().map(|t| t.kind)
    }

    fn push(&mut self, kind: TokenKind, lexeme: impl Into<String>) {
        self.tokens.push(Token::new(kind, lexeme, self.line));
    }

    fn error(&mut self, message: String) {
        self.errors.push(ScanError {
            line: self.line,
            message,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        Scanner::new(source)
            .scan()
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_operators_and_keywords() {
        use TokenKind::*;
        assert_eq!(
            kinds("var x = 1 <= 2.5 and !y"),
            vec![Var, Identifier, Equal, Integer, LessEqual, Float, And, Bang, Identifier, Eof]
        );
        assert_eq!(
            kinds("given g: when 1: else: end"),
            vec![Given, Identifier, Colon, When, Integer, Colon, Else, Colon, End, Eof]
        );
    }

    #[test]
    fn test_newlines_collapse_and_hide_in_brackets() {
        use TokenKind::*;
        assert_eq!(
            kinds("a\n\n\nf(1,\n2)\n"),
            vec![
                Identifier, Newline, Identifier, LeftParen, Integer, Comma, Integer, RightParen,
                Newline, Eof
            ]
        );
    }

    #[test]
    fn test_comments_strings_lines() {
        let tokens = Scanner::new("// note\n\"hi there\" 3").scan().unwrap();
        assert_eq!(tokens[0].kind, TokenKind::String);
        assert_eq!(tokens[0].lexeme, "hi there");
        assert_eq!(tokens[0].line, 2);
        assert_eq!(tokens[1].kind, TokenKind::Integer);
    }

    #[test]
    fn test_errors() {
        let errors = Scanner::new("\"open\n@").scan().unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("Unterminated"));

        let errors = Scanner::new("a @ b").scan().unwrap_err();
        assert_eq!(errors[0].message, "Unexpected character '@'.");
    }
}
