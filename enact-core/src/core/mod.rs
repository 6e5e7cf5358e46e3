//! Core 模块 - Enact 核心类型定义
//!
//! 本模块包含所有核心类型的纯定义：
//! - Core 层：类型定义（本模块）
//! - Runtime 层：收集器、代码生成、虚拟机（runtime/ 目录）
//! - Compiler 层：词法、语法、类型分析（compiler/ 目录）

// ==================== 基础类型 ====================

/// 值类型
pub mod value;
pub use value::{ObjRef, Value};

/// 语言级类型
pub mod types;
pub use types::{FunctionType, Type};

// ==================== 字节码 ====================

/// 字节码定义
pub mod bytecode;
pub use bytecode::{IndexedOp, OpCode, Operands};

/// 字节码块
pub mod chunk;
pub use chunk::Chunk;

// ==================== 对象类型 ====================

/// 对象定义
pub mod object;
pub use object::{
    NativeFn, Obj, ObjArray, ObjClosure, ObjFunction, ObjNative, ObjString, ObjType, ObjUpvalue,
    UpvalueState,
};
