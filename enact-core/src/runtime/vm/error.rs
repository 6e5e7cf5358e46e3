//! 运行时错误

use thiserror::Error;

use crate::core::Type;
use crate::runtime::gc::HeapError;

/// 运行时错误种类
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuntimeErrorKind {
    // ===== 程序错误 =====
    #[error("Expected a value of type '{expected}', but got a value of type '{found}'.")]
    TypeMismatch { expected: Type, found: Type },

    #[error("Expected a numeric value, but got a value of type '{0}'.")]
    NotNumeric(Type),

    #[error("Only arrays can be indexed, not a value of type '{0}'.")]
    NotIndexable(Type),

    #[error("Only reference types can be copied, not a value of type '{0}'.")]
    NotCopyable(Type),

    #[error("Only functions can be called, not a value of type '{0}'.")]
    NotCallable(Type),

    #[error("Expected {expected} arguments to function, but got {found}.")]
    ArityMismatch { expected: usize, found: usize },

    #[error("Expected argument {index} to be of type '{expected}', but got a value of type '{found}'.")]
    ArgumentMismatch {
        index: usize,
        expected: Type,
        found: Type,
    },

    #[error("Array index '{index}' is out of bounds for array of length '{length}'.")]
    IndexOutOfBounds { index: i64, length: usize },

    #[error("Division by zero.")]
    DivisionByZero,

    #[error("{0}")]
    Native(String),

    // ===== 引擎不变量被破坏 =====
    #[error("Stack overflow.")]
    StackOverflow,

    #[error("Malformed bytecode: {0}.")]
    MalformedBytecode(String),

    #[error("Heap corruption: {0}.")]
    Heap(#[from] HeapError),

    #[error("There is no suspended program to resume.")]
    NotSuspended,
}

impl RuntimeErrorKind {
    /// 引擎级错误（而非程序错误）
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RuntimeErrorKind::StackOverflow
                | RuntimeErrorKind::MalformedBytecode(_)
                | RuntimeErrorKind::Heap(_)
                | RuntimeErrorKind::NotSuspended
        )
    }
}

/// 栈回溯中的一帧
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceFrame {
    /// 函数名，脚本顶层为空
    pub function: String,
    pub line: u32,
}

/// 带栈回溯的运行时错误（栈顶帧在前）
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{kind}{}", render_trace(.trace))]
pub struct RuntimeError {
    pub kind: RuntimeErrorKind,
    pub trace: Vec<TraceFrame>,
}

impl RuntimeError {
    pub fn is_fatal(&self) -> bool {
        self.kind.is_fatal()
    }
}

impl From<RuntimeErrorKind> for RuntimeError {
    fn from(kind: RuntimeErrorKind) -> Self {
        Self {
            kind,
            trace: Vec::new(),
        }
    }
}

fn render_trace(trace: &[TraceFrame]) -> String {
    trace
        .iter()
        .map(|frame| {
            if frame.function.is_empty() {
                format!("\n[line {}] in script", frame.line)
            } else {
                format!("\n[line {}] in {}()", frame.line, frame.function)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_with_trace() {
        let error = RuntimeError {
            kind: RuntimeErrorKind::IndexOutOfBounds {
                index: 5,
                length: 2,
            },
            trace: vec![
                TraceFrame {
                    function: "get".into(),
                    line: 3,
                },
                TraceFrame {
                    function: String::new(),
                    line: 7,
                },
            ],
        };
        assert_eq!(
            error.to_string(),
            "Array index '5' is out of bounds for array of length '2'.\n[line 3] in get()\n[line 7] in script"
        );
    }

    #[test]
    fn test_fatal_classification() {
        assert!(RuntimeErrorKind::StackOverflow.is_fatal());
        assert!(RuntimeErrorKind::MalformedBytecode("x".into()).is_fatal());
        assert!(!RuntimeErrorKind::DivisionByZero.is_fatal());
        assert!(!RuntimeErrorKind::TypeMismatch {
            expected: Type::Int,
            found: Type::Bool
        }
        .is_fatal());
    }
}
