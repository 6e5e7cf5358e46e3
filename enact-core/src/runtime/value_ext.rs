//! Value 的堆相关操作：渲染、运行时类型、相等性

use crate::core::{Obj, ObjRef, Type, Value};
use crate::runtime::gc::{Heap, HeapError};

/// 渲染一个值（print / 反汇编常量 / REPL 使用）
///
/// 自引用的数组再次出现时渲染为 `[...]`。
pub fn format_value(heap: &Heap, value: Value) -> String {
    let mut visiting = Vec::new();
    format_nested(heap, value, &mut visiting)
}

fn format_nested(heap: &Heap, value: Value, visiting: &mut Vec<ObjRef>) -> String {
    match value {
        Value::Nil => "nil".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Int(n) => n.to_string(),
        Value::Float(f) => f.to_string(),
        Value::Obj(r) => match heap.get(r) {
            Ok(Obj::Array(a)) => {
                if visiting.contains(&r) {
                    return "[...]".to_string();
                }
                visiting.push(r);
                let items: Vec<String> = a
                    .elements
                    .iter()
                    .map(|v| format_nested(heap, *v, visiting))
                    .collect();
                visiting.pop();
                format!("[{}]", items.join(", "))
            }
            Ok(obj) => format_object(heap, obj),
            Err(_) => format!("<dangling {r:?}>"),
        },
    }
}

fn format_object(heap: &Heap, obj: &Obj) -> String {
    match obj {
        Obj::String(s) => s.chars.clone(),
        Obj::Array(a) => format!("[{} items]", a.elements.len()),
        Obj::Function(f) => function_label(&f.name),
        Obj::Closure(c) => match heap.function(c.function) {
            Ok(f) => function_label(&f.name),
            Err(_) => "<fn ?>".to_string(),
        },
        Obj::Upvalue(_) => "<upvalue>".to_string(),
        Obj::Native(n) => format!("<native fn {}>", n.name),
        Obj::TypeHandle(t) => t.ty.to_string(),
    }
}

fn function_label(name: &str) -> String {
    if name.is_empty() {
        "<script>".to_string()
    } else {
        format!("<fn {name}>")
    }
}

/// 值的运行时类型
pub fn type_of(heap: &Heap, value: Value) -> Result<Type, HeapError> {
    Ok(match value {
        Value::Nil => Type::Nothing,
        Value::Bool(_) => Type::Bool,
        Value::Int(_) => Type::Int,
        Value::Float(_) => Type::Float,
        Value::Obj(r) => match heap.get(r)? {
            Obj::String(_) => Type::String,
            Obj::Array(a) => Type::array(a.element_type.clone()),
            Obj::Function(f) => f.ty.clone(),
            Obj::Closure(c) => heap.function(c.function)?.ty.clone(),
            Obj::Native(n) => n.ty.clone(),
            Obj::Upvalue(_) | Obj::TypeHandle(_) => Type::Dynamic,
        },
    })
}

/// 相等性：字符串按内容，数组逐元素，其余对象按身份
///
/// 正在比较中的数组对再次出现时视为相等。
pub fn values_equal(heap: &Heap, a: Value, b: Value) -> bool {
    let mut comparing = Vec::new();
    equal_nested(heap, a, b, &mut comparing)
}

fn equal_nested(heap: &Heap, a: Value, b: Value, comparing: &mut Vec<(ObjRef, ObjRef)>) -> bool {
    match (a, b) {
        (Value::Nil, Value::Nil) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Float(x), Value::Float(y)) => x == y,
        (Value::Int(x), Value::Float(y)) | (Value::Float(y), Value::Int(x)) => x as f64 == y,
        (Value::Obj(x), Value::Obj(y)) => {
            if x == y {
                return true;
            }
            match (heap.get(x), heap.get(y)) {
                (Ok(Obj::String(s)), Ok(Obj::String(t))) => s.chars == t.chars,
                (Ok(Obj::Array(s)), Ok(Obj::Array(t))) => {
                    if s.elements.len() != t.elements.len() {
                        return false;
                    }
                    if comparing.contains(&(x, y)) {
                        return true;
                    }
                    comparing.push((x, y));
                    let equal = s
                        .elements
                        .iter()
                        .zip(&t.elements)
                        .all(|(p, q)| equal_nested(heap, *p, *q, comparing));
                    comparing.pop();
                    equal
                }
                _ => false,
            }
        }
        _ => false,
    }
}
