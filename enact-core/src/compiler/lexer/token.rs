//! Enact Token 类型定义

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    // 单字符
    LeftParen,
    RightParen,
    LeftSquare,
    RightSquare,
    Comma,
    Colon,
    Semicolon,
    Plus,
    Minus,
    Star,
    Slash,

    // 一或两个字符
    Bang,
    BangEqual,
    Equal,
    EqualEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,

    // 字面量
    Identifier,
    String,
    Integer,
    Float,

    // 关键字
    And,
    Block,
    Break,
    Const,
    Continue,
    Copy,
    Else,
    End,
    False,
    For,
    Fun,
    Given,
    If,
    Nil,
    Or,
    Pause,
    Return,
    True,
    Var,
    When,
    While,

    Newline,
    Eof,
}

impl TokenKind {
    /// 关键字查表
    pub fn keyword(text: &str) -> Option<TokenKind> {
        Some(match text {
            "and" => TokenKind::And,
            "block" => TokenKind::Block,
            "break" => TokenKind::Break,
            "const" => TokenKind::Const,
            "continue" => TokenKind::Continue,
            "copy" => TokenKind::Copy,
            "else" => TokenKind::Else,
            "end" => TokenKind::End,
            "false" => TokenKind::False,
            "for" => TokenKind::For,
            "fun" => TokenKind::Fun,
            "given" => TokenKind::Given,
            "if" => TokenKind::If,
            "nil" => TokenKind::Nil,
            "or" => TokenKind::Or,
            "pause" => TokenKind::Pause,
            "return" => TokenKind::Return,
            "true" => TokenKind::True,
            "var" => TokenKind::Var,
            "when" => TokenKind::When,
            "while" => TokenKind::While,
            _ => return None,
        })
    }
}

/// 词法单元
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// 原始文本（字符串字面量不含引号）
    pub lexeme: String,
    pub line: u32,
}

impl Token {
    pub fn new(kind: TokenKind, lexeme: impl Into<String>, line: u32) -> Self {
        Self {
            kind,
            lexeme: lexeme.into(),
            line,
        }
    }
}
