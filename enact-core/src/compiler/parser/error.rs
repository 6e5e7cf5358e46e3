use thiserror::Error;

use crate::compiler::lexer::scanner::ScanError;

/// 语法错误
#[derive(Debug, Clone, PartialEq, Error)]
#[error("[line {line}] Error{location}: {message}")]
pub struct ParseError {
    pub line: u32,
    /// 出错位置描述，如 " at 'end'" 或 " at end"
    pub location: String,
    pub message: String,
}

impl ParseError {
    pub fn new(line: u32, location: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            line,
            location: location.into(),
            message: message.into(),
        }
    }
}

impl From<ScanError> for ParseError {
    fn from(e: ScanError) -> Self {
        Self::new(e.line, "", e.message)
    }
}

pub type ParseResult<T> = Result<T, ParseError>;
