//! 虚拟机实现
//!
//! 所有调用共享一个值栈；调用帧数组容量固定（默认 64），超出即报告栈溢出。
//! 打开的 upvalue 组成按槽位降序排列的单链表，链表节点存放在堆上。
//! `PAUSE` 会停下分发循环但保留栈与调用帧，之后可以 [`VM::resume`]。

mod call;
pub mod error;
mod execution;
mod operators;

pub use error::{RuntimeError, RuntimeErrorKind, TraceFrame};

use std::io::{self, Write};

use tracing::debug;

use enact_config::LimitConfig;

use crate::core::{Obj, ObjClosure, ObjRef, Value};
use crate::runtime::gc::{Heap, Roots, Tracer};

/// 调用帧
#[derive(Debug, Clone, Copy)]
pub struct CallFrame {
    pub closure: ObjRef,
    /// 闭包的函数（缓存，避免每条指令都经过闭包查找）
    pub function: ObjRef,
    /// 下一条要执行的字节偏移
    pub ip: usize,
    /// 槽位 0 在值栈中的位置
    pub base: usize,
}

/// 执行状态：值栈、调用帧、打开的 upvalue 链表
#[derive(Debug, Default)]
pub struct ExecState {
    pub(crate) stack: Vec<Value>,
    pub(crate) frames: Vec<CallFrame>,
    pub(crate) open_upvalues: Option<ObjRef>,
}

impl ExecState {
    fn clear(&mut self) {
        self.stack.clear();
        self.frames.clear();
        self.open_upvalues = None;
    }
}

impl Roots for ExecState {
    fn trace_roots(&self, heap: &Heap, tracer: &mut Tracer) {
        for value in &self.stack {
            tracer.value(value);
        }
        for frame in &self.frames {
            tracer.object(frame.closure);
        }
        let mut cursor = self.open_upvalues;
        while let Some(r) = cursor {
            tracer.object(r);
            cursor = heap.upvalue(r).ok().and_then(|u| u.next);
        }
    }
}

/// 一次执行的结束方式
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Completion {
    /// 最外层函数返回
    Finished(Value),
    /// 遇到 PAUSE，状态保留
    Suspended,
}

/// 虚拟机
pub struct VM {
    pub(crate) state: ExecState,
    pub(crate) max_frames: usize,
    pub(crate) out: Box<dyn Write>,
    suspended: bool,
    /// 当前指令的起始偏移（错误回溯用）
    pub(crate) instruction_start: usize,
}

impl VM {
    /// 输出到标准输出
    pub fn new(limits: &LimitConfig) -> Self {
        Self::with_output(limits, Box::new(io::stdout()))
    }

    pub fn with_output(limits: &LimitConfig, out: Box<dyn Write>) -> Self {
        Self {
            state: ExecState::default(),
            max_frames: limits.max_frames,
            out,
            suspended: false,
            instruction_start: 0,
        }
    }

    /// VM 状态作为 GC 根
    pub fn roots(&self) -> &dyn Roots {
        &self.state
    }

    /// 程序输出
    pub fn output(&mut self) -> &mut dyn Write {
        &mut *self.out
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    pub fn stack_len(&self) -> usize {
        self.state.stack.len()
    }

    pub fn frame_count(&self) -> usize {
        self.state.frames.len()
    }

    /// 丢弃全部执行状态（包括挂起的程序）
    pub fn reset(&mut self) {
        self.state.clear();
        self.suspended = false;
    }

    /// 执行代码生成器产出的脚本函数
    ///
    /// `function` 必须刚由代码生成器返回，期间没有发生过分配。
    pub fn interpret(&mut self, heap: &mut Heap, function: ObjRef) -> Result<Completion, RuntimeError> {
        self.reset();
        debug!(target: "enact::vm", "interpret {:?}", function);

        // 先把函数放上栈作为根，再分配闭包
        self.state.stack.push(Value::Obj(function));
        let closure = heap.alloc(
            Obj::Closure(ObjClosure {
                function,
                upvalues: Box::new([]),
            }),
            &self.state,
        );
        self.state.stack[0] = Value::Obj(closure);

        if let Err(kind) = call::call_value(self, heap, Value::Obj(closure), 0) {
            return Err(self.fail(heap, kind));
        }
        self.run(heap)
    }

    /// 从 PAUSE 处继续执行
    pub fn resume(&mut self, heap: &mut Heap) -> Result<Completion, RuntimeError> {
        if !self.suspended {
            return Err(RuntimeErrorKind::NotSuspended.into());
        }
        debug!(target: "enact::vm", "resume at depth {}", self.state.frames.len());
        self.suspended = false;
        self.run(heap)
    }

    fn run(&mut self, heap: &mut Heap) -> Result<Completion, RuntimeError> {
        match execution::run(self, heap) {
            Ok(Completion::Suspended) => {
                self.suspended = true;
                debug!(target: "enact::vm", "suspended with {} frames", self.state.frames.len());
                Ok(Completion::Suspended)
            }
            Ok(done) => {
                self.reset();
                Ok(done)
            }
            Err(kind) => Err(self.fail(heap, kind)),
        }
    }

    /// 生成栈回溯并丢弃执行状态
    fn fail(&mut self, heap: &Heap, kind: RuntimeErrorKind) -> RuntimeError {
        let trace = self.stack_trace(heap);
        debug!(target: "enact::vm", "runtime error: {} ({} frames)", kind, trace.len());
        self.reset();
        RuntimeError { kind, trace }
    }

    /// 栈顶帧使用当前指令起点，其余帧使用调用指令所在位置
    fn stack_trace(&self, heap: &Heap) -> Vec<TraceFrame> {
        self.state
            .frames
            .iter()
            .rev()
            .enumerate()
            .map(|(depth, frame)| {
                let offset = if depth == 0 {
                    self.instruction_start
                } else {
                    frame.ip.saturating_sub(1)
                };
                match heap.function(frame.function) {
                    Ok(function) => TraceFrame {
                        function: function.name.clone(),
                        line: function.chunk.line_at(offset).unwrap_or(0),
                    },
                    Err(_) => TraceFrame {
                        function: "?".to_string(),
                        line: 0,
                    },
                }
            })
            .collect()
    }
}
