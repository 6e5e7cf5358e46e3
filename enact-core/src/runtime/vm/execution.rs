//! run() 主执行循环

use tracing::{enabled, trace, Level};

use super::call::{call_value, capture_upvalue, close_upvalues, read_upvalue, write_upvalue};
use super::operators::{arithmetic, compare, concat, negate, Arith, Compare};
use super::{CallFrame, Completion, RuntimeErrorKind, VM};
use crate::core::bytecode::{UPVALUE_LOCAL, UPVALUE_WIDE};
use crate::core::{Obj, ObjArray, ObjClosure, ObjRef, OpCode, Type, Value};
use crate::runtime::disasm::disassemble_instruction;
use crate::runtime::gc::Heap;
use crate::runtime::value_ext::{format_value, type_of, values_equal};

type Step<T> = Result<T, RuntimeErrorKind>;

fn malformed(what: impl Into<String>) -> RuntimeErrorKind {
    RuntimeErrorKind::MalformedBytecode(what.into())
}

// ==================== 取指 ====================

fn read_byte(vm: &mut VM, heap: &Heap) -> Step<u8> {
    let frame = vm
        .state
        .frames
        .last_mut()
        .ok_or_else(|| malformed("no active frame"))?;
    let byte = heap
        .function(frame.function)?
        .chunk
        .read_byte(frame.ip)
        .ok_or_else(|| malformed(format!("instruction stream ended at {}", frame.ip)))?;
    frame.ip += 1;
    Ok(byte)
}

fn read_short(vm: &mut VM, heap: &Heap) -> Step<usize> {
    let lo = read_byte(vm, heap)?;
    let hi = read_byte(vm, heap)?;
    Ok(u16::from_le_bytes([lo, hi]) as usize)
}

fn read_long(vm: &mut VM, heap: &Heap) -> Step<usize> {
    let b0 = read_byte(vm, heap)?;
    let b1 = read_byte(vm, heap)?;
    let b2 = read_byte(vm, heap)?;
    Ok(u32::from_le_bytes([b0, b1, b2, 0]) as usize)
}

/// 窄格式读 1 字节，宽格式读 3 字节
fn read_index(vm: &mut VM, heap: &Heap, wide: bool) -> Step<usize> {
    if wide {
        read_long(vm, heap)
    } else {
        read_byte(vm, heap).map(usize::from)
    }
}

fn read_constant(vm: &mut VM, heap: &Heap, wide: bool) -> Step<Value> {
    let index = read_index(vm, heap, wide)?;
    let function = frame_ref(vm)?.function;
    heap.function(function)?
        .chunk
        .constants
        .get(index)
        .copied()
        .ok_or_else(|| malformed(format!("constant {index} out of range")))
}

/// 类型句柄常量
fn read_type(vm: &mut VM, heap: &Heap, wide: bool) -> Step<Type> {
    let Value::Obj(r) = read_constant(vm, heap, wide)? else {
        return Err(malformed("expected a type constant"));
    };
    match heap.get(r)? {
        Obj::TypeHandle(t) => Ok(t.ty.clone()),
        other => Err(malformed(format!("expected a type constant, found {}", other.kind()))),
    }
}

fn frame_ref(vm: &VM) -> Step<&CallFrame> {
    vm.state.frames.last().ok_or_else(|| malformed("no active frame"))
}

fn jump(vm: &mut VM, offset: usize, backward: bool) -> Step<()> {
    let frame = vm
        .state
        .frames
        .last_mut()
        .ok_or_else(|| malformed("no active frame"))?;
    frame.ip = if backward {
        frame
            .ip
            .checked_sub(offset)
            .ok_or_else(|| malformed("loop before chunk start"))?
    } else {
        frame.ip + offset
    };
    Ok(())
}

// ==================== 值栈 ====================

fn push(vm: &mut VM, value: Value) {
    vm.state.stack.push(value);
}

fn pop(vm: &mut VM) -> Step<Value> {
    vm.state.stack.pop().ok_or_else(|| malformed("stack underflow"))
}

fn peek(vm: &VM, distance: usize) -> Step<Value> {
    let len = vm.state.stack.len();
    len.checked_sub(distance + 1)
        .and_then(|i| vm.state.stack.get(i).copied())
        .ok_or_else(|| malformed("stack underflow"))
}

fn replace_top(vm: &mut VM, value: Value) -> Step<()> {
    let top = vm
        .state
        .stack
        .last_mut()
        .ok_or_else(|| malformed("stack underflow"))?;
    *top = value;
    Ok(())
}

fn slot(vm: &VM, index: usize) -> Step<usize> {
    let slot = frame_ref(vm)?.base + index;
    if slot >= vm.state.stack.len() {
        return Err(malformed(format!("local slot {index} beyond stack")));
    }
    Ok(slot)
}

fn current_upvalue(vm: &VM, heap: &Heap, index: usize) -> Step<ObjRef> {
    let closure = frame_ref(vm)?.closure;
    heap.closure(closure)?
        .upvalues
        .get(index)
        .copied()
        .ok_or_else(|| malformed(format!("upvalue {index} out of range")))
}

// ==================== 运行时检查 ====================

fn expect_type(heap: &Heap, expected: &Type, value: Value) -> Step<()> {
    let found = type_of(heap, value)?;
    if expected.loosely_accepts(&found) {
        Ok(())
    } else {
        Err(RuntimeErrorKind::TypeMismatch {
            expected: expected.clone(),
            found,
        })
    }
}

fn array_of(heap: &Heap, value: Value) -> Step<ObjRef> {
    match value {
        Value::Obj(r) if matches!(heap.get(r)?, Obj::Array(_)) => Ok(r),
        other => Err(RuntimeErrorKind::NotIndexable(type_of(heap, other)?)),
    }
}

/// 检查被调用值、参数个数与参数类型
fn check_callable(vm: &VM, heap: &Heap, argc: usize) -> Step<()> {
    let callee = peek(vm, argc)?;
    let ty = type_of(heap, callee)?;
    let Type::Function(signature) = &ty else {
        return Err(RuntimeErrorKind::NotCallable(ty.clone()));
    };
    if signature.params.len() != argc {
        return Err(RuntimeErrorKind::ArityMismatch {
            expected: signature.params.len(),
            found: argc,
        });
    }
    for (i, param) in signature.params.iter().enumerate() {
        let arg = peek(vm, argc - 1 - i)?;
        let found = type_of(heap, arg)?;
        if !param.loosely_accepts(&found) {
            return Err(RuntimeErrorKind::ArgumentMismatch {
                index: i + 1,
                expected: param.clone(),
                found,
            });
        }
    }
    Ok(())
}

fn array_index(heap: &Heap, array: ObjRef, index: Value) -> Step<usize> {
    let Value::Int(i) = index else {
        return Err(RuntimeErrorKind::TypeMismatch {
            expected: Type::Int,
            found: type_of(heap, index)?,
        });
    };
    let length = heap.array(array)?.elements.len();
    usize::try_from(i)
        .ok()
        .filter(|&idx| idx < length)
        .ok_or(RuntimeErrorKind::IndexOutOfBounds { index: i, length })
}

fn truthy(heap: &Heap, value: Value) -> Step<bool> {
    match value {
        Value::Bool(b) => Ok(b),
        other => Err(RuntimeErrorKind::TypeMismatch {
            expected: Type::Bool,
            found: type_of(heap, other)?,
        }),
    }
}

// ==================== 追踪 ====================

fn trace_instruction(vm: &VM, heap: &Heap) {
    let Ok(frame) = frame_ref(vm) else { return };
    let Ok(function) = heap.function(frame.function) else {
        return;
    };
    let stack: String = vm
        .state
        .stack
        .iter()
        .map(|v| format!("[ {} ]", format_value(heap, *v)))
        .collect();
    let (text, _) = disassemble_instruction(heap, &function.chunk, frame.ip);
    trace!(target: "enact::vm", "          {}", stack);
    trace!(target: "enact::vm", "{}", text.trim_end());
}

// ==================== 主循环 ====================

/// 执行字节码直到最外层返回、挂起或出错
pub fn run(vm: &mut VM, heap: &mut Heap) -> Result<Completion, RuntimeErrorKind> {
    loop {
        if enabled!(target: "enact::vm", Level::TRACE) {
            trace_instruction(vm, heap);
        }

        vm.instruction_start = frame_ref(vm)?.ip;
        let byte = read_byte(vm, heap)?;
        let op = OpCode::try_from(byte).map_err(|b| malformed(format!("unknown opcode {b}")))?;

        match op {
            // ===== 常量 =====
            OpCode::Constant | OpCode::ConstantLong => {
                let value = read_constant(vm, heap, op == OpCode::ConstantLong)?;
                push(vm, value);
            }
            OpCode::True => push(vm, Value::Bool(true)),
            OpCode::False => push(vm, Value::Bool(false)),
            OpCode::Nil => push(vm, Value::Nil),

            // ===== 运行时检查 =====
            OpCode::CheckInt => {
                let value = peek(vm, 0)?;
                if !matches!(value, Value::Int(_)) {
                    return Err(RuntimeErrorKind::TypeMismatch {
                        expected: Type::Int,
                        found: type_of(heap, value)?,
                    });
                }
            }
            OpCode::CheckNumeric => {
                let value = peek(vm, 0)?;
                if !value.is_number() {
                    return Err(RuntimeErrorKind::NotNumeric(type_of(heap, value)?));
                }
            }
            OpCode::CheckBool => {
                let value = peek(vm, 0)?;
                truthy(heap, value)?;
            }
            OpCode::CheckReference => {
                let value = peek(vm, 0)?;
                if !value.is_obj() {
                    return Err(RuntimeErrorKind::NotCopyable(type_of(heap, value)?));
                }
            }
            OpCode::CheckCallable => {
                let argc = read_byte(vm, heap)? as usize;
                check_callable(vm, heap, argc)?;
            }
            OpCode::CheckIndexable => {
                array_of(heap, peek(vm, 0)?)?;
            }
            OpCode::CheckAllotable => {
                let array = array_of(heap, peek(vm, 2)?)?;
                let element_type = heap.array(array)?.element_type.clone();
                expect_type(heap, &element_type, peek(vm, 0)?)?;
            }
            OpCode::CheckType | OpCode::CheckTypeLong => {
                let expected = read_type(vm, heap, op == OpCode::CheckTypeLong)?;
                let value = peek(vm, 0)?;
                expect_type(heap, &expected, value)?;
                if let (Type::Float, Value::Int(n)) = (&expected, value) {
                    replace_top(vm, Value::Float(n as f64))?;
                }
            }

            // ===== 一元 =====
            OpCode::Negate => {
                let value = negate(heap, peek(vm, 0)?)?;
                replace_top(vm, value)?;
            }
            OpCode::Not => {
                let value = peek(vm, 0)?;
                let b = truthy(heap, value)?;
                replace_top(vm, Value::Bool(!b))?;
            }
            OpCode::Copy => {
                let value = peek(vm, 0)?;
                let Value::Obj(original) = value else {
                    return Err(RuntimeErrorKind::NotCopyable(type_of(heap, value)?));
                };
                // 原对象仍在栈顶，复制期间的回收不会释放它
                let clone = heap.clone_object(original, &vm.state)?;
                replace_top(vm, Value::Obj(clone))?;
            }

            // ===== 二元 =====
            OpCode::Add => {
                let (a, b) = (peek(vm, 1)?, peek(vm, 0)?);
                let result = match concat(heap, a, b)? {
                    // 操作数留在栈上直到新字符串分配完成
                    Some(joined) => Value::Obj(heap.alloc(Obj::string(joined), &vm.state)),
                    None => arithmetic(heap, Arith::Add, a, b)?,
                };
                pop(vm)?;
                replace_top(vm, result)?;
            }
            OpCode::Subtract | OpCode::Multiply | OpCode::Divide => {
                let arith = match op {
                    OpCode::Subtract => Arith::Subtract,
                    OpCode::Multiply => Arith::Multiply,
                    _ => Arith::Divide,
                };
                let b = pop(vm)?;
                let a = peek(vm, 0)?;
                let result = arithmetic(heap, arith, a, b)?;
                replace_top(vm, result)?;
            }
            OpCode::Less | OpCode::Greater => {
                let cmp = if op == OpCode::Less {
                    Compare::Less
                } else {
                    Compare::Greater
                };
                let b = pop(vm)?;
                let a = peek(vm, 0)?;
                let result = compare(heap, cmp, a, b)?;
                replace_top(vm, Value::Bool(result))?;
            }
            OpCode::Equal => {
                let b = pop(vm)?;
                let a = peek(vm, 0)?;
                let result = values_equal(heap, a, b);
                replace_top(vm, Value::Bool(result))?;
            }

            // ===== 数组 =====
            OpCode::Array | OpCode::ArrayLong => {
                let wide = op == OpCode::ArrayLong;
                let count = read_index(vm, heap, wide)?;
                let element_type = read_type(vm, heap, wide)?;
                let start = vm
                    .state
                    .stack
                    .len()
                    .checked_sub(count)
                    .ok_or_else(|| malformed("array longer than stack"))?;
                let elements = vm.state.stack[start..].to_vec();
                // 元素仍在栈上，分配完成后再弹出
                let array = heap.alloc(
                    Obj::Array(ObjArray {
                        elements,
                        element_type,
                    }),
                    &vm.state,
                );
                vm.state.stack.truncate(start);
                push(vm, Value::Obj(array));
            }
            OpCode::GetArrayIndex => {
                let index = pop(vm)?;
                let array = array_of(heap, peek(vm, 0)?)?;
                let i = array_index(heap, array, index)?;
                let value = heap.array(array)?.elements[i];
                replace_top(vm, value)?;
            }
            OpCode::SetArrayIndex => {
                let value = pop(vm)?;
                let index = pop(vm)?;
                let array = array_of(heap, peek(vm, 0)?)?;
                let i = array_index(heap, array, index)?;
                heap.array_mut(array)?.elements[i] = value;
                replace_top(vm, value)?;
            }

            // ===== 栈与变量 =====
            OpCode::Pop => {
                pop(vm)?;
            }
            OpCode::GetLocal | OpCode::GetLocalLong => {
                let index = read_index(vm, heap, op == OpCode::GetLocalLong)?;
                let value = vm.state.stack[slot(vm, index)?];
                push(vm, value);
            }
            OpCode::SetLocal | OpCode::SetLocalLong => {
                let index = read_index(vm, heap, op == OpCode::SetLocalLong)?;
                let slot = slot(vm, index)?;
                let value = peek(vm, 0)?;
                vm.state.stack[slot] = value;
            }
            OpCode::GetUpvalue | OpCode::GetUpvalueLong => {
                let index = read_index(vm, heap, op == OpCode::GetUpvalueLong)?;
                let upvalue = current_upvalue(vm, heap, index)?;
                let value = read_upvalue(vm, heap, upvalue)?;
                push(vm, value);
            }
            OpCode::SetUpvalue | OpCode::SetUpvalueLong => {
                let index = read_index(vm, heap, op == OpCode::SetUpvalueLong)?;
                let upvalue = current_upvalue(vm, heap, index)?;
                let value = peek(vm, 0)?;
                write_upvalue(vm, heap, upvalue, value)?;
            }

            // ===== 控制流 =====
            OpCode::Jump => {
                let offset = read_short(vm, heap)?;
                jump(vm, offset, false)?;
            }
            OpCode::JumpIfTrue | OpCode::JumpIfFalse => {
                let offset = read_short(vm, heap)?;
                // 条件留在栈上，由后续 POP 处理
                let condition = truthy(heap, peek(vm, 0)?)?;
                if condition == (op == OpCode::JumpIfTrue) {
                    jump(vm, offset, false)?;
                }
            }
            OpCode::Loop => {
                let offset = read_short(vm, heap)?;
                jump(vm, offset, true)?;
            }

            // ===== 函数 =====
            OpCode::Call => {
                let argc = read_byte(vm, heap)? as usize;
                let callee = peek(vm, argc)?;
                call_value(vm, heap, callee, argc)?;
            }
            OpCode::Closure | OpCode::ClosureLong => {
                let Value::Obj(function) = read_constant(vm, heap, op == OpCode::ClosureLong)? else {
                    return Err(malformed("closure over a non-function constant"));
                };
                let count = heap.function(function)?.upvalue_count;
                let base = frame_ref(vm)?.base;

                // 先收集全部 upvalue：新打开的挂在链表上，继承的由当前闭包引用
                let mut upvalues = Vec::with_capacity(count);
                for _ in 0..count {
                    let flags = read_byte(vm, heap)?;
                    let index = read_index(vm, heap, flags & UPVALUE_WIDE != 0)?;
                    let upvalue = if flags & UPVALUE_LOCAL != 0 {
                        capture_upvalue(vm, heap, base + index)?
                    } else {
                        current_upvalue(vm, heap, index)?
                    };
                    upvalues.push(upvalue);
                }
                let closure = heap.alloc(
                    Obj::Closure(ObjClosure {
                        function,
                        upvalues: upvalues.into_boxed_slice(),
                    }),
                    &vm.state,
                );
                push(vm, Value::Obj(closure));
            }
            OpCode::CloseUpvalue => {
                let top = vm
                    .state
                    .stack
                    .len()
                    .checked_sub(1)
                    .ok_or_else(|| malformed("stack underflow"))?;
                close_upvalues(vm, heap, top)?;
                pop(vm)?;
            }
            OpCode::Return => {
                let result = pop(vm)?;
                let base = frame_ref(vm)?.base;
                close_upvalues(vm, heap, base)?;
                vm.state.frames.pop();
                vm.state.stack.truncate(base);
                if vm.state.frames.is_empty() {
                    return Ok(Completion::Finished(result));
                }
                push(vm, result);
            }

            // ===== 挂起 =====
            OpCode::Pause => return Ok(Completion::Suspended),
        }
    }
}
