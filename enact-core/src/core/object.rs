//! 堆对象定义 (Core 层)
//!
//! 所有对象都由收集器的注册表独占，彼此之间只通过 `ObjRef` 句柄引用。

use std::fmt;
use std::mem::size_of;

use super::chunk::Chunk;
use super::types::Type;
use super::value::{ObjRef, Value};
use crate::runtime::stdlib::NativeContext;

/// 本地函数签名
pub type NativeFn = fn(&mut NativeContext<'_>, &[Value]) -> Result<Value, String>;

/// 字符串对象（不可变）
#[derive(Clone, Debug)]
pub struct ObjString {
    pub chars: String,
}

/// 数组对象
#[derive(Clone, Debug)]
pub struct ObjArray {
    pub elements: Vec<Value>,
    /// 名义元素类型
    pub element_type: Type,
}

/// 函数原型
#[derive(Clone, Debug)]
pub struct ObjFunction {
    /// 显示名称，脚本顶层为空
    pub name: String,
    pub arity: usize,
    /// 由代码生成器在发现捕获时填写
    pub upvalue_count: usize,
    pub chunk: Chunk,
    /// 函数类型（运行时检查使用）
    pub ty: Type,
}

/// 闭包：函数 + 捕获的 upvalue
#[derive(Clone, Debug)]
pub struct ObjClosure {
    pub function: ObjRef,
    /// 长度恒等于函数的 upvalue_count
    pub upvalues: Box<[ObjRef]>,
}

/// Upvalue 状态（只能 Open -> Closed）
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum UpvalueState {
    /// 指向值栈上的槽位
    Open(usize),
    /// 已从栈上复制出来
    Closed(Value),
}

/// Upvalue 对象
#[derive(Clone, Debug)]
pub struct ObjUpvalue {
    pub state: UpvalueState,
    /// 打开链表中的下一个（槽位更低的）upvalue
    pub next: Option<ObjRef>,
}

impl ObjUpvalue {
    pub fn open(slot: usize, next: Option<ObjRef>) -> Self {
        Self {
            state: UpvalueState::Open(slot),
            next,
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state, UpvalueState::Open(_))
    }
}

/// 本地函数
#[derive(Clone)]
pub struct ObjNative {
    pub name: &'static str,
    pub function: NativeFn,
    pub ty: Type,
}

impl fmt::Debug for ObjNative {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjNative")
            .field("name", &self.name)
            .field("ty", &self.ty)
            .finish()
    }
}

/// 类型句柄：把类型作为一等值放进常量池
#[derive(Clone, Debug)]
pub struct ObjType {
    pub ty: Type,
}

/// 堆对象
#[derive(Clone, Debug)]
pub enum Obj {
    String(ObjString),
    Array(ObjArray),
    Function(ObjFunction),
    Closure(ObjClosure),
    Upvalue(ObjUpvalue),
    Native(ObjNative),
    TypeHandle(ObjType),
}

impl Obj {
    pub fn string(chars: impl Into<String>) -> Self {
        Obj::String(ObjString {
            chars: chars.into(),
        })
    }

    pub fn type_handle(ty: Type) -> Self {
        Obj::TypeHandle(ObjType { ty })
    }

    /// 对象种类名（日志使用）
    pub fn kind(&self) -> &'static str {
        match self {
            Obj::String(_) => "string",
            Obj::Array(_) => "array",
            Obj::Function(_) => "function",
            Obj::Closure(_) => "closure",
            Obj::Upvalue(_) => "upvalue",
            Obj::Native(_) => "native",
            Obj::TypeHandle(_) => "type",
        }
    }

    /// 分配时计入收集器的字节数
    pub fn size(&self) -> usize {
        let payload = match self {
            Obj::String(s) => s.chars.capacity(),
            Obj::Array(a) => a.elements.capacity() * size_of::<Value>(),
            Obj::Function(f) => {
                f.name.capacity()
                    + f.chunk.code.capacity()
                    + f.chunk.constants.capacity() * size_of::<Value>()
            }
            Obj::Closure(c) => c.upvalues.len() * size_of::<ObjRef>(),
            Obj::Upvalue(_) | Obj::Native(_) | Obj::TypeHandle(_) => 0,
        };
        size_of::<Obj>() + payload
    }
}
