//! API 错误类型
//!
//! 把各阶段的错误统一为 [`EnactError`]，并映射到结果码。

use thiserror::Error;

use enact_core::compiler::parser::{AnalysisError, ParseError};
use enact_core::runtime::{CompileError, RuntimeError};

use crate::types::InterpretResult;

/// Enact 错误类型
#[derive(Error, Debug, Clone)]
pub enum EnactError {
    /// 词法 / 语法错误（可能有多个）
    #[error("{}", join_lines(.0))]
    Parse(Vec<ParseError>),

    /// 静态分析错误
    #[error("{}", join_lines(.0))]
    Analysis(Vec<AnalysisError>),

    /// 代码生成错误
    #[error("{}", join_lines(.0))]
    Compile(Vec<CompileError>),

    /// 运行时错误（带栈回溯）
    #[error("{0}")]
    Runtime(#[from] RuntimeError),

    /// 源文件无法读取
    #[error("Could not read file \"{path}\": {message}")]
    File { path: String, message: String },
}

fn join_lines<E: std::fmt::Display>(errors: &[E]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

impl EnactError {
    /// 对应的结果码
    pub fn result(&self) -> InterpretResult {
        match self {
            EnactError::Parse(_) => InterpretResult::ParseError,
            EnactError::Analysis(_) => InterpretResult::AnalysisError,
            EnactError::Compile(_) => InterpretResult::CompileError,
            EnactError::Runtime(_) => InterpretResult::RuntimeError,
            EnactError::File { .. } => InterpretResult::FileError,
        }
    }

    /// 获取错误阶段名称
    pub fn phase(&self) -> &'static str {
        match self {
            EnactError::Parse(_) => "parser",
            EnactError::Analysis(_) => "analyser",
            EnactError::Compile(_) => "compiler",
            EnactError::Runtime(_) => "vm",
            EnactError::File { .. } => "io",
        }
    }

    /// 第一个错误的行号（如果有）
    pub fn line(&self) -> Option<u32> {
        match self {
            EnactError::Parse(errors) => errors.first().map(|e| e.line),
            EnactError::Analysis(errors) => errors.first().map(|e| e.line),
            EnactError::Compile(errors) => errors.first().map(CompileError::line),
            EnactError::Runtime(e) => e.trace.first().map(|f| f.line),
            EnactError::File { .. } => None,
        }
    }

    /// 引擎级故障（栈溢出、字节码损坏等）
    pub fn is_fatal(&self) -> bool {
        matches!(self, EnactError::Runtime(e) if e.is_fatal())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use enact_core::runtime::{RuntimeErrorKind, TraceFrame};

    #[test]
    fn test_result_mapping() {
        let parse = EnactError::Parse(vec![ParseError::new(3, " at 'end'", "Expected expression.")]);
        assert_eq!(parse.result(), InterpretResult::ParseError);
        assert_eq!(parse.line(), Some(3));
        assert_eq!(parse.to_string(), "[line 3] Error at 'end': Expected expression.");

        let compile = EnactError::Compile(vec![
            CompileError::JumpTooLarge { line: 1 },
            CompileError::LoopTooLarge { line: 9 },
        ]);
        assert_eq!(compile.result(), InterpretResult::CompileError);
        assert_eq!(compile.to_string().lines().count(), 2);
    }

    #[test]
    fn test_runtime_error_is_wrapped() {
        let runtime: EnactError = RuntimeError {
            kind: RuntimeErrorKind::StackOverflow,
            trace: vec![TraceFrame {
                function: "f".into(),
                line: 4,
            }],
        }
        .into();
        assert_eq!(runtime.result(), InterpretResult::RuntimeError);
        assert_eq!(runtime.phase(), "vm");
        assert_eq!(runtime.line(), Some(4));
        assert!(runtime.is_fatal());
    }
}
