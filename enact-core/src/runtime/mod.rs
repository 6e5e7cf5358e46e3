//! Enact 运行时 (Runtime 层)
//!
//! 本模块为 core 层类型提供实现：
//! - 对象堆与标记-清除收集器
//! - 代码生成器（类型化 AST -> 字节码）
//! - `VM` 执行逻辑与运算符
//! - 反汇编与标准库

// ==================== 对象堆 ====================

/// 对象注册表与垃圾回收
pub mod gc;

/// 为 Value 提供需要访问堆的操作（格式化、类型、相等）
pub mod value_ext;

// ==================== 编译与执行 ====================

/// 代码生成器
pub mod compiler;

/// VM 实现（包含执行逻辑）
pub mod vm;

/// 标准库
pub mod stdlib;

/// 字节码反汇编
pub mod disasm;

// ==================== 重新导出 ====================

pub use compiler::{compile, CompileError, Compiler};
pub use gc::{BothRoots, Heap, HeapError, HeapStats, NoRoots, Roots, Tracer};
pub use vm::{CallFrame, Completion, ExecState, RuntimeError, RuntimeErrorKind, TraceFrame, VM};
