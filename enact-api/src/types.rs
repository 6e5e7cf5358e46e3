//! API 类型定义
//!
//! 一次运行的结果码，同时作为进程退出码使用。

/// 解释器结果码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum InterpretResult {
    Ok = 0,
    InvalidArguments = 65,
    FileError = 66,
    ParseError = 67,
    AnalysisError = 68,
    CompileError = 69,
    RuntimeError = 70,
}

impl InterpretResult {
    /// 进程退出码
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn is_ok(self) -> bool {
        self == InterpretResult::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_distinct() {
        let all = [
            InterpretResult::Ok,
            InterpretResult::InvalidArguments,
            InterpretResult::FileError,
            InterpretResult::ParseError,
            InterpretResult::AnalysisError,
            InterpretResult::CompileError,
            InterpretResult::RuntimeError,
        ];
        let codes: Vec<i32> = all.iter().map(|r| r.code()).collect();
        assert_eq!(codes, vec![0, 65, 66, 67, 68, 69, 70]);
        assert!(InterpretResult::Ok.is_ok());
        assert!(!InterpretResult::RuntimeError.is_ok());
    }
}
