//! 字节码定义 (Core 层)
//!
//! 变长指令：一个操作码字节，后跟零个或多个操作数字节。
//! 多字节操作数一律小端序。索引 ≥ 255 时使用 *_LONG 宽格式（3 字节）。

/// 窄格式索引的上限（不含）
pub const NARROW_LIMIT: usize = u8::MAX as usize;

/// 宽格式（3 字节）能表示的最大值
pub const LONG_MAX: usize = 0x00FF_FFFF;

/// 闭包指令中 upvalue 标志字节：捕获外层局部变量
pub const UPVALUE_LOCAL: u8 = 0b01;

/// 闭包指令中 upvalue 标志字节：索引为 3 字节宽格式
pub const UPVALUE_WIDE: u8 = 0b10;

/// 操作数族
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operands {
    /// 无操作数
    Simple,
    /// 1 字节 (0-255)
    Byte,
    /// 2 字节 (0-65535)
    Short,
    /// 3 字节 (0-16,777,215)
    Long,
    /// 1 字节常量池索引
    Constant,
    /// 3 字节常量池索引
    LongConstant,
    /// 1 字节长度 + 1 字节类型常量
    Array,
    /// 3 字节长度 + 3 字节类型常量
    ArrayLong,
    /// 1 字节函数常量 + upvalue 描述对
    Closure,
    /// 3 字节函数常量 + upvalue 描述对
    ClosureLong,
}

macro_rules! opcodes {
    ($($name:ident = $text:literal, $family:ident;)*) => {
        /// 操作码
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum OpCode {
            $($name,)*
        }

        const ALL_OPCODES: &[OpCode] = &[$(OpCode::$name,)*];

        impl OpCode {
            /// 助记符
            pub fn name(self) -> &'static str {
                match self {
                    $(OpCode::$name => $text,)*
                }
            }

            /// 操作数族
            pub fn operands(self) -> Operands {
                match self {
                    $(OpCode::$name => Operands::$family,)*
                }
            }
        }
    };
}

opcodes! {
    // ===== 常量 =====
    Constant = "CONSTANT", Constant;
    ConstantLong = "CONSTANT_LONG", LongConstant;
    True = "TRUE", Simple;
    False = "FALSE", Simple;
    Nil = "NIL", Simple;

    // ===== 运行时检查 =====
    CheckInt = "CHECK_INT", Simple;
    CheckNumeric = "CHECK_NUMERIC", Simple;
    CheckBool = "CHECK_BOOL", Simple;
    CheckReference = "CHECK_REFERENCE", Simple;
    CheckCallable = "CHECK_CALLABLE", Byte;
    CheckIndexable = "CHECK_INDEXABLE", Simple;
    CheckAllotable = "CHECK_ALLOTABLE", Simple;
    CheckType = "CHECK_TYPE", Constant;
    CheckTypeLong = "CHECK_TYPE_LONG", LongConstant;

    // ===== 一元 =====
    Negate = "NEGATE", Simple;
    Not = "NOT", Simple;
    Copy = "COPY", Simple;

    // ===== 二元 =====
    Add = "ADD", Simple;
    Subtract = "SUBTRACT", Simple;
    Multiply = "MULTIPLY", Simple;
    Divide = "DIVIDE", Simple;
    Less = "LESS", Simple;
    Greater = "GREATER", Simple;
    Equal = "EQUAL", Simple;

    // ===== 数组 =====
    Array = "ARRAY", Array;
    ArrayLong = "ARRAY_LONG", ArrayLong;
    GetArrayIndex = "GET_ARRAY_INDEX", Simple;
    SetArrayIndex = "SET_ARRAY_INDEX", Simple;

    // ===== 栈与变量 =====
    Pop = "POP", Simple;
    GetLocal = "GET_LOCAL", Byte;
    GetLocalLong = "GET_LOCAL_LONG", Long;
    SetLocal = "SET_LOCAL", Byte;
    SetLocalLong = "SET_LOCAL_LONG", Long;
    GetUpvalue = "GET_UPVALUE", Byte;
    GetUpvalueLong = "GET_UPVALUE_LONG", Long;
    SetUpvalue = "SET_UPVALUE", Byte;
    SetUpvalueLong = "SET_UPVALUE_LONG", Long;

    // ===== 控制流 =====
    Jump = "JUMP", Short;
    JumpIfTrue = "JUMP_IF_TRUE", Short;
    JumpIfFalse = "JUMP_IF_FALSE", Short;
    Loop = "LOOP", Short;

    // ===== 函数 =====
    Call = "CALL", Byte;
    Closure = "CLOSURE", Closure;
    ClosureLong = "CLOSURE_LONG", ClosureLong;
    CloseUpvalue = "CLOSE_UPVALUE", Simple;
    Return = "RETURN", Simple;

    // ===== 挂起 =====
    Pause = "PAUSE", Simple;
}

impl TryFrom<u8> for OpCode {
    type Error = u8;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        ALL_OPCODES.get(byte as usize).copied().ok_or(byte)
    }
}

impl From<OpCode> for u8 {
    fn from(op: OpCode) -> u8 {
        op as u8
    }
}

/// 按索引大小选择窄/宽格式的操作码对
#[derive(Clone, Copy, Debug)]
pub struct IndexedOp {
    pub narrow: OpCode,
    pub wide: OpCode,
}

impl IndexedOp {
    pub const CONSTANT: IndexedOp = IndexedOp {
        narrow: OpCode::Constant,
        wide: OpCode::ConstantLong,
    };
    pub const CHECK_TYPE: IndexedOp = IndexedOp {
        narrow: OpCode::CheckType,
        wide: OpCode::CheckTypeLong,
    };
    pub const GET_LOCAL: IndexedOp = IndexedOp {
        narrow: OpCode::GetLocal,
        wide: OpCode::GetLocalLong,
    };
    pub const SET_LOCAL: IndexedOp = IndexedOp {
        narrow: OpCode::SetLocal,
        wide: OpCode::SetLocalLong,
    };
    pub const GET_UPVALUE: IndexedOp = IndexedOp {
        narrow: OpCode::GetUpvalue,
        wide: OpCode::GetUpvalueLong,
    };
    pub const SET_UPVALUE: IndexedOp = IndexedOp {
        narrow: OpCode::SetUpvalue,
        wide: OpCode::SetUpvalueLong,
    };
    pub const CLOSURE: IndexedOp = IndexedOp {
        narrow: OpCode::Closure,
        wide: OpCode::ClosureLong,
    };

    /// 索引是否需要宽格式
    #[inline]
    pub fn is_wide(index: usize) -> bool {
        index >= NARROW_LIMIT
    }

    pub fn select(&self, index: usize) -> OpCode {
        if Self::is_wide(index) {
            self.wide
        } else {
            self.narrow
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_roundtrip() {
        for &op in ALL_OPCODES {
            assert_eq!(OpCode::try_from(u8::from(op)), Ok(op));
        }
        assert_eq!(OpCode::try_from(250), Err(250));
    }

    #[test]
    fn test_names_and_families() {
        assert_eq!(OpCode::ConstantLong.name(), "CONSTANT_LONG");
        assert_eq!(OpCode::Jump.operands(), Operands::Short);
        assert_eq!(OpCode::GetLocalLong.operands(), Operands::Long);
        assert_eq!(OpCode::Pause.operands(), Operands::Simple);
        assert_eq!(OpCode::ClosureLong.operands(), Operands::ClosureLong);
    }

    #[test]
    fn test_threshold() {
        assert_eq!(IndexedOp::CONSTANT.select(254), OpCode::Constant);
        assert_eq!(IndexedOp::CONSTANT.select(255), OpCode::ConstantLong);
        assert_eq!(IndexedOp::GET_UPVALUE.select(300), OpCode::GetUpvalueLong);
    }
}
