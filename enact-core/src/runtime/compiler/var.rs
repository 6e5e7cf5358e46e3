//! 变量解析和管理

use tracing::trace;

use super::{Activation, CompileError, Compiler};
use crate::core::bytecode::LONG_MAX;
use crate::core::{IndexedOp, OpCode};

/// 局部变量信息
#[derive(Debug, Clone)]
pub struct Local {
    pub name: String,
    pub depth: usize,
    pub is_initialized: bool,
    pub is_captured: bool, // 是否被内层闭包捕获
}

/// Upvalue 描述（编译时）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upvalue {
    pub index: usize,   // 外层局部槽位或外层 upvalue 索引
    pub is_local: bool, // true=捕获外层局部变量, false=继承外层的 upvalue
}

/// 变量解析结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variable {
    Local(usize),
    Upvalue(usize),
}

/// 进入新作用域
pub fn begin_scope(compiler: &mut Compiler) {
    compiler.current().scope_depth += 1;
}

/// 退出作用域：被捕获的变量 CLOSE_UPVALUE，其余 POP
pub fn end_scope(compiler: &mut Compiler, line: u32) {
    let activation = compiler.current();
    activation.scope_depth -= 1;
    let depth = activation.scope_depth;

    while let Some(local) = compiler.current().locals.last() {
        if local.depth <= depth {
            break;
        }
        let op = if local.is_captured {
            OpCode::CloseUpvalue
        } else {
            OpCode::Pop
        };
        compiler.current().locals.pop();
        compiler.emit_op(op, line);
    }
}

/// 丢弃深于 `depth` 的局部变量（不改变编译期的局部表，用于 break/continue）
pub fn discard_locals(compiler: &mut Compiler, depth: usize, line: u32) {
    let ops: Vec<OpCode> = compiler
        .current()
        .locals
        .iter()
        .rev()
        .take_while(|local| local.depth > depth)
        .map(|local| {
            if local.is_captured {
                OpCode::CloseUpvalue
            } else {
                OpCode::Pop
            }
        })
        .collect();
    for op in ops {
        compiler.emit_op(op, line);
    }
}

/// 添加局部变量（未初始化），返回其槽位
pub fn add_local(compiler: &mut Compiler, name: &str, line: u32) -> Result<usize, CompileError> {
    let activation = compiler.current();
    let slot = activation.locals.len();
    if slot > LONG_MAX {
        return Err(CompileError::OperandTooLarge {
            line,
            what: "local variables",
            count: slot,
        });
    }
    let depth = activation.scope_depth;
    activation.locals.push(Local {
        name: name.to_string(),
        depth,
        is_initialized: false,
        is_captured: false,
    });
    Ok(slot)
}

/// 标记变量为已初始化
pub fn mark_initialized(compiler: &mut Compiler, slot: usize) {
    if let Some(local) = compiler.current().locals.get_mut(slot) {
        local.is_initialized = true;
    }
}

/// 在单个活动记录内由内向外查找已初始化的局部变量
fn resolve_local(activation: &Activation, name: &str) -> Option<usize> {
    activation
        .locals
        .iter()
        .rposition(|local| local.is_initialized && local.name == name)
}

/// 添加 upvalue 描述（同一来源只记录一次），返回其索引
fn add_upvalue(
    activation: &mut Activation,
    name: &str,
    index: usize,
    is_local: bool,
    line: u32,
) -> Result<usize, CompileError> {
    if let Some(existing) = activation
        .upvalues
        .iter()
        .position(|u| u.index == index && u.is_local == is_local)
    {
        return Ok(existing);
    }
    let count = activation.upvalues.len();
    if count > LONG_MAX {
        return Err(CompileError::OperandTooLarge {
            line,
            what: "captured variables",
            count,
        });
    }
    activation.upvalues.push(Upvalue { index, is_local });
    trace!(
        target: "enact::compiler",
        "upvalue '{}' -> #{} ({} {})",
        name,
        count,
        if is_local { "local" } else { "upvalue" },
        index
    );
    Ok(count)
}

/// 递归解析 upvalue：链的最后一个元素是正在解析的活动记录
fn resolve_upvalue(
    chain: &mut [Activation],
    name: &str,
    line: u32,
) -> Result<Option<usize>, CompileError> {
    let Some((current, enclosing)) = chain.split_last_mut() else {
        return Ok(None);
    };
    let Some(parent) = enclosing.last_mut() else {
        return Ok(None);
    };

    // 1. 外层的局部变量
    if let Some(slot) = resolve_local(parent, name) {
        parent.locals[slot].is_captured = true;
        return add_upvalue(current, name, slot, true, line).map(Some);
    }

    // 2. 外层已解析（或可解析）的 upvalue
    if let Some(index) = resolve_upvalue(enclosing, name, line)? {
        return add_upvalue(current, name, index, false, line).map(Some);
    }

    Ok(None)
}

/// 解析变量名
pub fn resolve(compiler: &mut Compiler, name: &str, line: u32) -> Result<Variable, CompileError> {
    if let Some(slot) = resolve_local(compiler.current(), name) {
        return Ok(Variable::Local(slot));
    }
    match resolve_upvalue(&mut compiler.activations, name, line)? {
        Some(index) => Ok(Variable::Upvalue(index)),
        None => Err(CompileError::UnresolvedVariable {
            line,
            name: name.to_string(),
        }),
    }
}

/// 读取变量
pub fn emit_get(compiler: &mut Compiler, variable: Variable, line: u32) -> Result<(), CompileError> {
    match variable {
        Variable::Local(slot) => compiler.emit_indexed(IndexedOp::GET_LOCAL, slot, "local variables", line),
        Variable::Upvalue(index) => {
            compiler.emit_indexed(IndexedOp::GET_UPVALUE, index, "captured variables", line)
        }
    }
}

/// 写入变量（值留在栈顶）
pub fn emit_set(compiler: &mut Compiler, variable: Variable, line: u32) -> Result<(), CompileError> {
    match variable {
        Variable::Local(slot) => compiler.emit_indexed(IndexedOp::SET_LOCAL, slot, "local variables", line),
        Variable::Upvalue(index) => {
            compiler.emit_indexed(IndexedOp::SET_UPVALUE, index, "captured variables", line)
        }
    }
}
