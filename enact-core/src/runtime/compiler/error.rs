//! 代码生成错误

use thiserror::Error;

/// 代码生成错误（每个都带源码行号）
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("[line {line}] Error: Too much code to jump over.")]
    JumpTooLarge { line: u32 },

    #[error("[line {line}] Error: Loop body too large.")]
    LoopTooLarge { line: u32 },

    #[error("[line {line}] Error: Too many constants in one chunk.")]
    TooManyConstants { line: u32 },

    #[error("[line {line}] Error: Too many {what} ({count}) to encode.")]
    OperandTooLarge {
        line: u32,
        what: &'static str,
        count: usize,
    },

    #[error("[line {line}] Error: Unresolved variable '{name}'.")]
    UnresolvedVariable { line: u32, name: String },

    #[error("[line {line}] Error: Invalid assignment target.")]
    InvalidAssignmentTarget { line: u32 },

    #[error("[line {line}] Error: Can't use '{keyword}' outside of a loop.")]
    ControlFlowOutsideLoop { line: u32, keyword: &'static str },
}

impl CompileError {
    pub fn line(&self) -> u32 {
        match self {
            CompileError::JumpTooLarge { line }
            | CompileError::LoopTooLarge { line }
            | CompileError::TooManyConstants { line }
            | CompileError::OperandTooLarge { line, .. }
            | CompileError::UnresolvedVariable { line, .. }
            | CompileError::InvalidAssignmentTarget { line }
            | CompileError::ControlFlowOutsideLoop { line, .. } => *line,
        }
    }
}
