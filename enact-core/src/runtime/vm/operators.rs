//! 算术与比较运算
//!
//! int ⊗ int → int（溢出回绕，整除零报错），其余数值组合按 float 计算（IEEE 语义）。

use crate::core::{Obj, Value};
use crate::runtime::gc::Heap;
use crate::runtime::value_ext::type_of;

use super::RuntimeErrorKind;

/// 二元算术运算符
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arith {
    Add,
    Subtract,
    Multiply,
    Divide,
}

/// 二元比较运算符
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compare {
    Less,
    Greater,
}

fn not_numeric(heap: &Heap, a: Value, b: Value) -> RuntimeErrorKind {
    let culprit = if a.is_number() { b } else { a };
    match type_of(heap, culprit) {
        Ok(ty) => RuntimeErrorKind::NotNumeric(ty),
        Err(e) => e.into(),
    }
}

pub fn arithmetic(heap: &Heap, op: Arith, a: Value, b: Value) -> Result<Value, RuntimeErrorKind> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Ok(Value::Int(match op {
            Arith::Add => x.wrapping_add(y),
            Arith::Subtract => x.wrapping_sub(y),
            Arith::Multiply => x.wrapping_mul(y),
            Arith::Divide => {
                if y == 0 {
                    return Err(RuntimeErrorKind::DivisionByZero);
                }
                x.wrapping_div(y)
            }
        })),
        _ => match (a.as_float(), b.as_float()) {
            (Some(x), Some(y)) => Ok(Value::Float(match op {
                Arith::Add => x + y,
                Arith::Subtract => x - y,
                Arith::Multiply => x * y,
                Arith::Divide => x / y,
            })),
            _ => Err(not_numeric(heap, a, b)),
        },
    }
}

pub fn compare(heap: &Heap, op: Compare, a: Value, b: Value) -> Result<bool, RuntimeErrorKind> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Ok(match op {
            Compare::Less => x < y,
            Compare::Greater => x > y,
        }),
        _ => match (a.as_float(), b.as_float()) {
            (Some(x), Some(y)) => Ok(match op {
                Compare::Less => x < y,
                Compare::Greater => x > y,
            }),
            _ => Err(not_numeric(heap, a, b)),
        },
    }
}

pub fn negate(heap: &Heap, a: Value) -> Result<Value, RuntimeErrorKind> {
    match a {
        Value::Int(n) => Ok(Value::Int(n.wrapping_neg())),
        Value::Float(f) => Ok(Value::Float(-f)),
        other => Err(RuntimeErrorKind::NotNumeric(type_of(heap, other)?)),
    }
}

/// 两个操作数都是字符串时返回拼接结果
pub fn concat(heap: &Heap, a: Value, b: Value) -> Result<Option<String>, RuntimeErrorKind> {
    let (Value::Obj(x), Value::Obj(y)) = (a, b) else {
        return Ok(None);
    };
    match (heap.get(x)?, heap.get(y)?) {
        (Obj::String(s), Obj::String(t)) => {
            let mut joined = String::with_capacity(s.chars.len() + t.chars.len());
            joined.push_str(&s.chars);
            joined.push_str(&t.chars);
            Ok(Some(joined))
        }
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Type;
    use crate::runtime::gc::NoRoots;

    #[test]
    fn test_int_and_float_promotion() {
        let heap = Heap::default();
        assert_eq!(
            arithmetic(&heap, Arith::Add, Value::Int(2), Value::Int(3)).unwrap(),
            Value::Int(5)
        );
        assert_eq!(
            arithmetic(&heap, Arith::Divide, Value::Int(7), Value::Int(2)).unwrap(),
            Value::Int(3)
        );
        assert_eq!(
            arithmetic(&heap, Arith::Multiply, Value::Int(2), Value::Float(1.5)).unwrap(),
            Value::Float(3.0)
        );
        assert_eq!(
            arithmetic(&heap, Arith::Add, Value::Int(i64::MAX), Value::Int(1)).unwrap(),
            Value::Int(i64::MIN)
        );
    }

    #[test]
    fn test_division_by_zero() {
        let heap = Heap::default();
        assert_eq!(
            arithmetic(&heap, Arith::Divide, Value::Int(1), Value::Int(0)),
            Err(RuntimeErrorKind::DivisionByZero)
        );
        let inf = arithmetic(&heap, Arith::Divide, Value::Float(1.0), Value::Int(0)).unwrap();
        assert_eq!(inf, Value::Float(f64::INFINITY));
    }

    #[test]
    fn test_non_numeric_operand() {
        let heap = Heap::default();
        assert_eq!(
            compare(&heap, Compare::Less, Value::Int(1), Value::Bool(true)),
            Err(RuntimeErrorKind::NotNumeric(Type::Bool))
        );
        assert_eq!(
            negate(&heap, Value::Nil),
            Err(RuntimeErrorKind::NotNumeric(Type::Nothing))
        );
        assert!(compare(&heap, Compare::Greater, Value::Float(2.5), Value::Int(2)).unwrap());
    }

    #[test]
    fn test_concat() {
        let mut heap = Heap::default();
        let a = heap.alloc(Obj::string("foo"), &NoRoots);
        let b = heap.alloc(Obj::string("bar"), &NoRoots);
        assert_eq!(
            concat(&heap, Value::Obj(a), Value::Obj(b)).unwrap().as_deref(),
            Some("foobar")
        );
        assert_eq!(concat(&heap, Value::Int(1), Value::Obj(b)).unwrap(), None);
    }
}
