//! 标准库实现
//!
//! 本地函数以脚本级局部变量的形式注入（紧跟保留槽位 0 之后），
//! 分析器与代码生成器按同一顺序声明它们。

use std::io::Write;

use crate::core::{Obj, ObjNative, Type, Value};
use crate::runtime::disasm::disassemble_function;
use crate::runtime::gc::{Heap, Roots};
use crate::runtime::value_ext::format_value;

/// 本地函数执行时可见的运行时环境
pub struct NativeContext<'a> {
    pub heap: &'a mut Heap,
    /// 分配时使用的根集合（参数仍在值栈上）
    pub roots: &'a dyn Roots,
    pub out: &'a mut dyn Write,
}

/// 所有内置本地函数，顺序即声明顺序
pub fn natives() -> Vec<ObjNative> {
    vec![
        ObjNative {
            name: "print",
            function: print_fn,
            ty: Type::function(vec![Type::Dynamic], Type::Nothing),
        },
        ObjNative {
            name: "put",
            function: put_fn,
            ty: Type::function(vec![Type::Dynamic], Type::Nothing),
        },
        ObjNative {
            name: "dis",
            function: dis_fn,
            ty: Type::function(vec![Type::Dynamic], Type::String),
        },
    ]
}

// ===== 核心函数 =====

/// 输出值并换行
fn print_fn(ctx: &mut NativeContext<'_>, args: &[Value]) -> Result<Value, String> {
    let text = format_value(ctx.heap, arg(args)?);
    writeln!(ctx.out, "{text}").map_err(|e| e.to_string())?;
    Ok(Value::Nil)
}

/// 输出值，不换行
fn put_fn(ctx: &mut NativeContext<'_>, args: &[Value]) -> Result<Value, String> {
    let text = format_value(ctx.heap, arg(args)?);
    write!(ctx.out, "{text}").map_err(|e| e.to_string())?;
    ctx.out.flush().map_err(|e| e.to_string())?;
    Ok(Value::Nil)
}

/// 函数/闭包的反汇编文本；其他值返回其渲染结果
fn dis_fn(ctx: &mut NativeContext<'_>, args: &[Value]) -> Result<Value, String> {
    let value = arg(args)?;
    let function = match value {
        Value::Obj(r) => match ctx.heap.get(r).map_err(|e| e.to_string())? {
            Obj::Function(_) => Some(r),
            Obj::Closure(c) => Some(c.function),
            _ => None,
        },
        _ => None,
    };
    let text = match function {
        Some(f) => disassemble_function(ctx.heap, f),
        None => format_value(ctx.heap, value),
    };
    let r = ctx.heap.alloc(Obj::string(text), ctx.roots);
    Ok(Value::Obj(r))
}

fn arg(args: &[Value]) -> Result<Value, String> {
    args.first()
        .copied()
        .ok_or_else(|| "Expected 1 argument.".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::gc::NoRoots;

    fn call(name: &str, heap: &mut Heap, args: &[Value]) -> (Result<Value, String>, String) {
        let native = natives().into_iter().find(|n| n.name == name).unwrap();
        let mut out = Vec::new();
        let result = {
            let mut ctx = NativeContext {
                heap,
                roots: &NoRoots,
                out: &mut out,
            };
            (native.function)(&mut ctx, args)
        };
        (result, String::from_utf8(out).unwrap())
    }

    #[test]
    fn test_print_and_put() {
        let mut heap = Heap::default();
        let (result, out) = call("print", &mut heap, &[Value::Int(3)]);
        assert_eq!(result, Ok(Value::Nil));
        assert_eq!(out, "3\n");

        let (_, out) = call("put", &mut heap, &[Value::Bool(true)]);
        assert_eq!(out, "true");
    }

    #[test]
    fn test_dis_of_plain_value() {
        let mut heap = Heap::default();
        let (result, _) = call("dis", &mut heap, &[Value::Float(1.5)]);
        let r = result.unwrap().as_obj().unwrap();
        assert_eq!(heap.string(r), Ok("1.5"));
    }

    #[test]
    fn test_missing_argument() {
        let mut heap = Heap::default();
        let (result, _) = call("print", &mut heap, &[]);
        assert!(result.is_err());
    }

    #[test]
    fn test_declaration_order() {
        let names: Vec<&str> = natives().iter().map(|n| n.name).collect();
        assert_eq!(names, vec!["print", "put", "dis"]);
    }
}
