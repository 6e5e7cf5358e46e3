//! 反汇编：把 Chunk 渲染为可读文本
//!
//! 每条指令一行：4 位零填充偏移、源码行（与上一条相同时为 `|`）、
//! 左对齐 16 列的助记符、操作数，常量类指令附带常量的渲染值。
//! 只读，不修改 Chunk。

use std::fmt::Write as _;

use crate::core::bytecode::{UPVALUE_LOCAL, UPVALUE_WIDE};
use crate::core::{Chunk, ObjRef, OpCode, Operands, Value};
use crate::runtime::gc::Heap;
use crate::runtime::value_ext::format_value;

/// 反汇编函数及其常量池中嵌套的所有函数
pub fn disassemble_function(heap: &Heap, function: ObjRef) -> String {
    let mut out = String::new();
    let mut pending = vec![function];
    let mut seen = Vec::new();
    while let Some(f) = pending.pop() {
        if seen.contains(&f) {
            continue;
        }
        seen.push(f);
        let Ok(func) = heap.function(f) else { continue };
        let name = if func.name.is_empty() { "<script>" } else { func.name.as_str() };
        let _ = writeln!(out, "== {name} ==");
        out.push_str(&disassemble_chunk(heap, &func.chunk));
        for constant in func.chunk.constants.iter().rev() {
            if let Value::Obj(r) = constant {
                if heap.function(*r).is_ok() {
                    pending.push(*r);
                }
            }
        }
    }
    out
}

/// 反汇编整个 Chunk
pub fn disassemble_chunk(heap: &Heap, chunk: &Chunk) -> String {
    let mut out = String::new();
    let mut offset = 0;
    while offset < chunk.len() {
        let (text, next) = disassemble_instruction(heap, chunk, offset);
        out.push_str(&text);
        offset = next;
    }
    out
}

/// 反汇编一条指令，返回文本和下一条指令的偏移
pub fn disassemble_instruction(heap: &Heap, chunk: &Chunk, offset: usize) -> (String, usize) {
    let mut s = format!("{offset:04}    ");
    let line = chunk.line_at(offset);
    if offset > 0 && line == chunk.line_at(offset - 1) {
        s.push('|');
    } else {
        s.push_str(&line.unwrap_or(0).to_string());
    }
    s.push(' ');

    match decode(heap, chunk, offset, &mut s) {
        Some(next) => (s, next),
        None => {
            s.push_str("<malformed>\n");
            (s, chunk.len())
        }
    }
}

fn decode(heap: &Heap, chunk: &Chunk, offset: usize, s: &mut String) -> Option<usize> {
    let op = OpCode::try_from(chunk.read_byte(offset)?).ok()?;
    let name = op.name();
    let next = match op.operands() {
        Operands::Simple => {
            let _ = writeln!(s, "{name}");
            offset + 1
        }
        Operands::Byte => {
            let arg = chunk.read_byte(offset + 1)?;
            let _ = writeln!(s, "{name:<16} {arg}");
            offset + 2
        }
        Operands::Short => {
            let arg = chunk.read_short(offset + 1)?;
            let _ = writeln!(s, "{name:<16} {arg}");
            offset + 3
        }
        Operands::Long => {
            let arg = chunk.read_long(offset + 1)?;
            let _ = writeln!(s, "{name:<16} {arg}");
            offset + 4
        }
        Operands::Constant => {
            let idx = chunk.read_byte(offset + 1)? as usize;
            let _ = writeln!(s, "{name:<16} {idx} ({})", constant(heap, chunk, idx)?);
            offset + 2
        }
        Operands::LongConstant => {
            let idx = chunk.read_long(offset + 1)? as usize;
            let _ = writeln!(s, "{name:<16} {idx} ({})", constant(heap, chunk, idx)?);
            offset + 4
        }
        Operands::Array => {
            let len = chunk.read_byte(offset + 1)?;
            let idx = chunk.read_byte(offset + 2)? as usize;
            let _ = writeln!(s, "{name:<16} {len} {idx} ({})", constant(heap, chunk, idx)?);
            offset + 3
        }
        Operands::ArrayLong => {
            let len = chunk.read_long(offset + 1)?;
            let idx = chunk.read_long(offset + 4)? as usize;
            let _ = writeln!(s, "{name:<16} {len} {idx} ({})", constant(heap, chunk, idx)?);
            offset + 7
        }
        Operands::Closure | Operands::ClosureLong => {
            let (idx, mut cursor) = if op.operands() == Operands::Closure {
                (chunk.read_byte(offset + 1)? as usize, offset + 2)
            } else {
                (chunk.read_long(offset + 1)? as usize, offset + 4)
            };
            let _ = writeln!(s, "{name:<16} {idx} ({})", constant(heap, chunk, idx)?);

            let function = chunk.constants.get(idx)?.as_obj()?;
            let count = heap.function(function).ok()?.upvalue_count;
            for _ in 0..count {
                let start = cursor;
                let flags = chunk.read_byte(cursor)?;
                let index = if flags & UPVALUE_WIDE != 0 {
                    cursor += 4;
                    chunk.read_long(start + 1)?
                } else {
                    cursor += 2;
                    chunk.read_byte(start + 1)? as u32
                };
                let kind = if flags & UPVALUE_LOCAL != 0 { "local" } else { "upvalue" };
                let _ = writeln!(s, "{start:04}      |                  {kind} {index}");
            }
            cursor
        }
    };
    Some(next)
}

fn constant(heap: &Heap, chunk: &Chunk, idx: usize) -> Option<String> {
    chunk.constants.get(idx).map(|v| format_value(heap, *v))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::IndexedOp;

    #[test]
    fn test_simple_and_constant() {
        let heap = Heap::default();
        let mut chunk = Chunk::new();
        let idx = chunk.add_constant(Value::Int(7));
        chunk.write_indexed(IndexedOp::CONSTANT, idx, 1);
        chunk.write_op(OpCode::Return, 1);
        chunk.write_op(OpCode::Nil, 2);

        let text = disassemble_chunk(&heap, &chunk);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "0000    1 CONSTANT         0 (7)");
        assert_eq!(lines[1], "0002    | RETURN");
        assert_eq!(lines[2], "0003    2 NIL");
    }

    #[test]
    fn test_consumes_exact_bytes() {
        let heap = Heap::default();
        let mut chunk = Chunk::new();
        for i in 0..300 {
            chunk.add_constant(Value::Int(i));
        }
        chunk.write_indexed(IndexedOp::CONSTANT, 10, 1);
        chunk.write_indexed(IndexedOp::CONSTANT, 299, 1);
        chunk.write_op(OpCode::Jump, 1);
        chunk.write_short(3);
        chunk.write_indexed(IndexedOp::GET_LOCAL, 256, 1);

        let (text, next) = disassemble_instruction(&heap, &chunk, 0);
        assert!(text.contains("CONSTANT ") && next == 2);
        let (text, next) = disassemble_instruction(&heap, &chunk, next);
        assert!(text.contains("CONSTANT_LONG    299 (299)") && next == 6);
        let (text, next) = disassemble_instruction(&heap, &chunk, next);
        assert!(text.contains("JUMP             3") && next == 9);
        let (text, next) = disassemble_instruction(&heap, &chunk, next);
        assert!(text.contains("GET_LOCAL_LONG   256") && next == 13);
        assert_eq!(next, chunk.len());
    }

    #[test]
    fn test_wide_closure_and_array_forms() {
        use crate::core::{Obj, ObjFunction, Type};
        use crate::runtime::gc::NoRoots;

        let mut heap = Heap::default();
        let inner = heap.alloc(
            Obj::Function(ObjFunction {
                name: "inner".into(),
                arity: 0,
                upvalue_count: 2,
                chunk: Chunk::new(),
                ty: Type::function(vec![], Type::Nothing),
            }),
            &NoRoots,
        );
        let element = heap.alloc(Obj::type_handle(Type::Float), &NoRoots);

        let mut chunk = Chunk::new();
        for i in 0..299 {
            chunk.add_constant(Value::Int(i));
        }
        let f = chunk.add_constant(Value::Obj(inner));
        let t = chunk.add_constant(Value::Obj(element));
        chunk.write_indexed(IndexedOp::CLOSURE, f, 4);
        chunk.write_byte(UPVALUE_LOCAL | UPVALUE_WIDE);
        chunk.write_long(300);
        chunk.write_byte(0);
        chunk.write_byte(3);
        chunk.write_op(OpCode::ArrayLong, 5);
        chunk.write_long(256);
        chunk.write_long(t as u32);

        let text = disassemble_chunk(&heap, &chunk);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "0000    4 CLOSURE_LONG     299 (<fn inner>)");
        assert_eq!(lines[1], "0004      |                  local 300");
        assert_eq!(lines[2], "0008      |                  upvalue 3");
        assert_eq!(lines[3], "0010    5 ARRAY_LONG       256 300 (float)");
        assert_eq!(lines.len(), 4);
    }

    #[test]
    fn test_truncated_instruction() {
        let heap = Heap::default();
        let mut chunk = Chunk::new();
        chunk.write_op(OpCode::Loop, 1);
        chunk.write_byte(1);
        let (text, next) = disassemble_instruction(&heap, &chunk, 0);
        assert!(text.ends_with("<malformed>\n"));
        assert_eq!(next, chunk.len());
    }
}
