//! 函数调用相关 (call, closure, upvalue 操作)

use tracing::trace;

use super::{CallFrame, RuntimeErrorKind, VM};
use crate::core::{NativeFn, Obj, ObjRef, ObjUpvalue, Type, UpvalueState, Value};
use crate::runtime::gc::Heap;
use crate::runtime::stdlib::NativeContext;
use crate::runtime::value_ext::type_of;

/// 调用栈上 `argc` 个参数下方的可调用值
///
/// 闭包：压入新帧，槽位基址就是被调用值所在位置（参数原地成为局部变量）。
/// 本地函数：立即执行，用返回值替换被调用值和参数。
pub fn call_value(
    vm: &mut VM,
    heap: &mut Heap,
    callee: Value,
    argc: usize,
) -> Result<(), RuntimeErrorKind> {
    let Value::Obj(r) = callee else {
        return Err(RuntimeErrorKind::NotCallable(type_of(heap, callee)?));
    };
    let base = vm
        .state
        .stack
        .len()
        .checked_sub(argc + 1)
        .ok_or_else(|| RuntimeErrorKind::MalformedBytecode("call below stack bottom".into()))?;

    let target = match heap.get(r)? {
        Obj::Closure(closure) => Callee::Closure(closure.function),
        Obj::Native(native) => Callee::Native {
            function: native.function,
            name: native.name,
            arity: native.ty.as_function().map(|f| f.params.len()),
        },
        _ => Callee::Other,
    };

    match target {
        Callee::Closure(function) => {
            let (arity, ty) = {
                let f = heap.function(function)?;
                (f.arity, f.ty.clone())
            };
            if argc != arity {
                return Err(RuntimeErrorKind::ArityMismatch {
                    expected: arity,
                    found: argc,
                });
            }
            if vm.state.frames.len() >= vm.max_frames {
                return Err(RuntimeErrorKind::StackOverflow);
            }
            widen_arguments(&mut vm.state.stack[base + 1..], &ty);
            vm.state.frames.push(CallFrame {
                closure: r,
                function,
                ip: 0,
                base,
            });
            trace!(target: "enact::vm", "call {:?} at base {}, depth {}", r, base, vm.state.frames.len());
            Ok(())
        }
        Callee::Native {
            function,
            name,
            arity,
        } => {
            let expected = arity.unwrap_or(argc);
            if argc != expected {
                return Err(RuntimeErrorKind::ArityMismatch {
                    expected,
                    found: argc,
                });
            }
            let args = vm.state.stack[base + 1..].to_vec();
            let result = {
                let mut ctx = NativeContext {
                    heap: &mut *heap,
                    roots: &vm.state,
                    out: &mut *vm.out,
                };
                function(&mut ctx, &args).map_err(RuntimeErrorKind::Native)?
            };
            trace!(target: "enact::vm", "native {} returned", name);
            vm.state.stack.truncate(base);
            vm.state.stack.push(result);
            Ok(())
        }
        Callee::Other => Err(RuntimeErrorKind::NotCallable(type_of(heap, callee)?)),
    }
}

/// 被调用值的种类
enum Callee {
    Closure(ObjRef),
    Native {
        function: NativeFn,
        name: &'static str,
        arity: Option<usize>,
    },
    Other,
}

/// float 形参收到 int 实参时提升为 float
fn widen_arguments(args: &mut [Value], ty: &Type) {
    let Some(signature) = ty.as_function() else {
        return;
    };
    for (arg, param) in args.iter_mut().zip(&signature.params) {
        if let (Value::Int(n), Type::Float) = (*arg, param) {
            *arg = Value::Float(n as f64);
        }
    }
}

/// 捕获栈槽位为 upvalue（已存在则复用，保证兄弟闭包共享同一个对象）
pub fn capture_upvalue(vm: &mut VM, heap: &mut Heap, slot: usize) -> Result<ObjRef, RuntimeErrorKind> {
    let mut prev: Option<ObjRef> = None;
    let mut cursor = vm.state.open_upvalues;
    while let Some(r) = cursor {
        let upvalue = heap.upvalue(r)?;
        match upvalue.state {
            UpvalueState::Open(s) if s == slot => return Ok(r),
            UpvalueState::Open(s) if s > slot => {
                prev = Some(r);
                cursor = upvalue.next;
            }
            _ => break,
        }
    }

    let created = heap.alloc(Obj::Upvalue(ObjUpvalue::open(slot, cursor)), &vm.state);
    match prev {
        Some(p) => heap.upvalue_mut(p)?.next = Some(created),
        None => vm.state.open_upvalues = Some(created),
    }
    trace!(target: "enact::vm", "capture slot {} as {:?}", slot, created);
    Ok(created)
}

/// 关闭所有位于 `last` 及以上槽位的 upvalue
pub fn close_upvalues(vm: &mut VM, heap: &mut Heap, last: usize) -> Result<(), RuntimeErrorKind> {
    while let Some(r) = vm.state.open_upvalues {
        let upvalue = heap.upvalue_mut(r)?;
        let UpvalueState::Open(slot) = upvalue.state else {
            return Err(RuntimeErrorKind::MalformedBytecode(
                "closed upvalue on the open list".into(),
            ));
        };
        if slot < last {
            break;
        }
        let value = vm.state.stack.get(slot).copied().ok_or_else(|| {
            RuntimeErrorKind::MalformedBytecode(format!("upvalue slot {slot} beyond stack"))
        })?;
        upvalue.state = UpvalueState::Closed(value);
        vm.state.open_upvalues = upvalue.next.take();
        trace!(target: "enact::vm", "close {:?} (slot {})", r, slot);
    }
    Ok(())
}

/// 读取 upvalue 的当前值
pub fn read_upvalue(vm: &VM, heap: &Heap, r: ObjRef) -> Result<Value, RuntimeErrorKind> {
    match heap.upvalue(r)?.state {
        UpvalueState::Open(slot) => vm.state.stack.get(slot).copied().ok_or_else(|| {
            RuntimeErrorKind::MalformedBytecode(format!("upvalue slot {slot} beyond stack"))
        }),
        UpvalueState::Closed(value) => Ok(value),
    }
}

/// 写入 upvalue：打开时写栈槽位，关闭后写自身
pub fn write_upvalue(
    vm: &mut VM,
    heap: &mut Heap,
    r: ObjRef,
    value: Value,
) -> Result<(), RuntimeErrorKind> {
    let upvalue = heap.upvalue_mut(r)?;
    match upvalue.state {
        UpvalueState::Open(slot) => {
            let target = vm.state.stack.get_mut(slot).ok_or_else(|| {
                RuntimeErrorKind::MalformedBytecode(format!("upvalue slot {slot} beyond stack"))
            })?;
            *target = value;
        }
        UpvalueState::Closed(_) => upvalue.state = UpvalueState::Closed(value),
    }
    Ok(())
}

// ==================== 测试 ====================

#[cfg(test)]
mod tests {
    use super::*;
    use enact_config::LimitConfig;

    fn vm_with_stack(values: &[Value]) -> VM {
        let mut vm = VM::with_output(&LimitConfig::default(), Box::new(std::io::sink()));
        vm.state.stack.extend_from_slice(values);
        vm
    }

    #[test]
    fn test_upvalue_capture_reuses_and_orders() {
        let mut heap = Heap::default();
        let mut vm = vm_with_stack(&[Value::Int(0), Value::Int(1), Value::Int(2)]);

        let low = capture_upvalue(&mut vm, &mut heap, 1).unwrap();
        let high = capture_upvalue(&mut vm, &mut heap, 2).unwrap();
        assert_eq!(capture_upvalue(&mut vm, &mut heap, 1).unwrap(), low);

        // 链表按槽位降序
        assert_eq!(vm.state.open_upvalues, Some(high));
        assert_eq!(heap.upvalue(high).unwrap().next, Some(low));
    }

    #[test]
    fn test_close_upvalues_from_slot() {
        let mut heap = Heap::default();
        let mut vm = vm_with_stack(&[Value::Int(10), Value::Int(11), Value::Int(12)]);
        let low = capture_upvalue(&mut vm, &mut heap, 0).unwrap();
        let high = capture_upvalue(&mut vm, &mut heap, 2).unwrap();

        close_upvalues(&mut vm, &mut heap, 1).unwrap();
        assert_eq!(heap.upvalue(high).unwrap().state, UpvalueState::Closed(Value::Int(12)));
        assert!(heap.upvalue(low).unwrap().is_open());
        assert_eq!(vm.state.open_upvalues, Some(low));

        write_upvalue(&mut vm, &mut heap, low, Value::Int(99)).unwrap();
        assert_eq!(vm.state.stack[0], Value::Int(99));
        write_upvalue(&mut vm, &mut heap, high, Value::Int(7)).unwrap();
        assert_eq!(read_upvalue(&vm, &heap, high).unwrap(), Value::Int(7));
        assert_eq!(vm.state.stack[2], Value::Int(12));
    }

    #[test]
    fn test_calling_a_number_fails() {
        let mut heap = Heap::default();
        let mut vm = vm_with_stack(&[Value::Int(3)]);
        let err = call_value(&mut vm, &mut heap, Value::Int(3), 0).unwrap_err();
        assert_eq!(err, RuntimeErrorKind::NotCallable(Type::Int));
    }
}
