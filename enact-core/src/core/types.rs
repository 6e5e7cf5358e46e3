//! 语言级类型
//!
//! 供分析器做静态检查，也供运行时检查指令（CHECK_*）使用。

use std::fmt;

/// 函数签名
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FunctionType {
    pub params: Vec<Type>,
    pub ret: Box<Type>,
}

/// 类型
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Type {
    Int,
    Float,
    Bool,
    String,
    Nothing,
    /// 动态类型（源码中写作 `any`）
    Dynamic,
    Array(Box<Type>),
    Function(FunctionType),
}

impl Type {
    /// 构造函数类型
    pub fn function(params: Vec<Type>, ret: Type) -> Self {
        Type::Function(FunctionType {
            params,
            ret: Box::new(ret),
        })
    }

    /// 构造数组类型
    pub fn array(element: Type) -> Self {
        Type::Array(Box::new(element))
    }

    pub fn is_dynamic(&self) -> bool {
        matches!(self, Type::Dynamic)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Type::Int | Type::Float)
    }

    /// 引用类型（可以被 `copy`）
    pub fn is_reference(&self) -> bool {
        matches!(self, Type::String | Type::Array(_) | Type::Function(_))
    }

    pub fn as_function(&self) -> Option<&FunctionType> {
        match self {
            Type::Function(f) => Some(f),
            _ => None,
        }
    }

    pub fn element_type(&self) -> Option<&Type> {
        match self {
            Type::Array(e) => Some(e),
            _ => None,
        }
    }

    /// 宽松兼容：`self` 位置能否接受 `other` 类型的值
    ///
    /// 任意一侧为 `any` 时兼容；int 可以出现在需要 float 的位置。
    /// 数组元素与函数签名内部不做 int -> float 提升，只有 `any` 放宽。
    pub fn loosely_accepts(&self, other: &Type) -> bool {
        match (self, other) {
            (Type::Float, Type::Int) => true,
            (a, b) => a.nested_accepts(b),
        }
    }

    fn nested_accepts(&self, other: &Type) -> bool {
        match (self, other) {
            (Type::Dynamic, _) | (_, Type::Dynamic) => true,
            (Type::Array(a), Type::Array(b)) => a.nested_accepts(b),
            (Type::Function(a), Type::Function(b)) => {
                a.params.len() == b.params.len()
                    && a.params
                        .iter()
                        .zip(&b.params)
                        .all(|(x, y)| x.nested_accepts(y))
                    && a.ret.nested_accepts(&b.ret)
            }
            (a, b) => a == b,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Int => write!(f, "int"),
            Type::Float => write!(f, "float"),
            Type::Bool => write!(f, "bool"),
            Type::String => write!(f, "string"),
            Type::Nothing => write!(f, "nothing"),
            Type::Dynamic => write!(f, "any"),
            Type::Array(e) => write!(f, "[{e}]"),
            Type::Function(func) => {
                write!(f, "fun (")?;
                for (i, p) in func.params.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{p}")?;
                }
                write!(f, ") {}", func.ret)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(Type::array(Type::Int).to_string(), "[int]");
        assert_eq!(
            Type::function(vec![Type::Int, Type::Dynamic], Type::Nothing).to_string(),
            "fun (int, any) nothing"
        );
    }

    #[test]
    fn test_loosely_accepts() {
        assert!(Type::Float.loosely_accepts(&Type::Int));
        assert!(!Type::Int.loosely_accepts(&Type::Float));
        assert!(Type::Dynamic.loosely_accepts(&Type::String));
        assert!(Type::Bool.loosely_accepts(&Type::Dynamic));
        assert!(!Type::array(Type::Float).loosely_accepts(&Type::array(Type::Int)));
        assert!(Type::array(Type::Dynamic).loosely_accepts(&Type::array(Type::Int)));
        assert!(!Type::function(vec![], Type::Float)
            .loosely_accepts(&Type::function(vec![], Type::Int)));
        assert!(!Type::array(Type::Int).loosely_accepts(&Type::Int));
        let f = Type::function(vec![Type::Int], Type::Int);
        let g = Type::function(vec![Type::Dynamic], Type::Int);
        assert!(f.loosely_accepts(&g));
        assert!(!f.loosely_accepts(&Type::function(vec![], Type::Int)));
    }
}
