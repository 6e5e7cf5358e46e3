//! 语句编译

use tracing::trace;

use super::expr::{compile_condition, compile_expr};
use super::var::Variable;
use super::{var, CompileError, Compiler, LoopContext};
use crate::compiler::parser::{Expr, FunctionDecl, Stmt, WhenCase};
use crate::core::bytecode::{UPVALUE_LOCAL, UPVALUE_WIDE};
use crate::core::{IndexedOp, OpCode, Value};

/// 编译语句
pub fn compile_stmt(compiler: &mut Compiler, stmt: &Stmt) -> Result<(), CompileError> {
    match stmt {
        Stmt::Expression(expr) => {
            compile_expr(compiler, expr)?;
            // 表达式语句的结果丢弃
            compiler.emit_op(OpCode::Pop, expr.line);
        }

        Stmt::Var {
            name,
            declared,
            initializer,
            line,
            ..
        } => {
            // 先占位，初始化表达式中的同名引用仍解析到外层
            let slot = var::add_local(compiler, name, *line)?;
            compile_expr(compiler, initializer)?;
            if let Some(ty) = declared {
                compiler.emit_type_check(ty, &initializer.ty, *line)?;
            }
            var::mark_initialized(compiler, slot);
            trace!(target: "enact::compiler", "local '{}' -> slot {}", name, slot);
        }

        Stmt::Function(decl) => {
            // 函数体内可以递归引用自身
            let slot = var::add_local(compiler, &decl.name, decl.line)?;
            var::mark_initialized(compiler, slot);
            compile_function(compiler, decl)?;
        }

        Stmt::Block { body, line } => {
            var::begin_scope(compiler);
            compile_block(compiler, body)?;
            var::end_scope(compiler, *line);
        }

        Stmt::If {
            condition,
            then_branch,
            else_branch,
            line,
        } => {
            compile_condition(compiler, condition)?;
            let then_jump = compiler.emit_jump(OpCode::JumpIfFalse, *line);
            compiler.emit_op(OpCode::Pop, *line);
            scoped_block(compiler, then_branch, *line)?;

            let else_jump = compiler.emit_jump(OpCode::Jump, *line);
            compiler.patch_jump(then_jump, *line)?;
            compiler.emit_op(OpCode::Pop, *line);
            scoped_block(compiler, else_branch, *line)?;
            compiler.patch_jump(else_jump, *line)?;
        }

        Stmt::Given {
            subject,
            cases,
            else_branch,
            line,
        } => compile_given(compiler, subject, cases, else_branch, *line)?,

        Stmt::While {
            condition,
            body,
            line,
        } => {
            let loop_start = compiler.current().chunk.len();
            compile_condition(compiler, condition)?;
            let exit_jump = compiler.emit_jump(OpCode::JumpIfFalse, *line);
            compiler.emit_op(OpCode::Pop, *line);

            push_loop(compiler, Some(loop_start));
            scoped_block(compiler, body, *line)?;
            compiler.emit_loop(loop_start, *line)?;

            compiler.patch_jump(exit_jump, *line)?;
            compiler.emit_op(OpCode::Pop, *line);
            finish_loop(compiler, *line)?;
        }

        Stmt::For {
            initializer,
            condition,
            increment,
            body,
            line,
        } => {
            var::begin_scope(compiler);
            if let Some(init) = initializer {
                compile_stmt(compiler, init)?;
            }

            let loop_start = compiler.current().chunk.len();
            let exit_jump = match condition {
                Some(cond) => {
                    compile_condition(compiler, cond)?;
                    let jump = compiler.emit_jump(OpCode::JumpIfFalse, *line);
                    compiler.emit_op(OpCode::Pop, *line);
                    Some(jump)
                }
                None => None,
            };

            push_loop(compiler, None);
            scoped_block(compiler, body, *line)?;

            // continue 落在增量之前
            let continues = match compiler.current().loops.last_mut() {
                Some(ctx) => std::mem::take(&mut ctx.continue_jumps),
                None => Vec::new(),
            };
            for jump in continues {
                compiler.patch_jump(jump, *line)?;
            }
            if let Some(incr) = increment {
                compile_expr(compiler, incr)?;
                compiler.emit_op(OpCode::Pop, *line);
            }
            compiler.emit_loop(loop_start, *line)?;

            if let Some(jump) = exit_jump {
                compiler.patch_jump(jump, *line)?;
                compiler.emit_op(OpCode::Pop, *line);
            }
            finish_loop(compiler, *line)?;
            var::end_scope(compiler, *line);
        }

        Stmt::Return { value, line } => {
            match value {
                Some(expr) => {
                    compile_expr(compiler, expr)?;
                    let ret = compiler.current().ret.clone();
                    compiler.emit_type_check(&ret, &expr.ty, *line)?;
                }
                None => compiler.emit_op(OpCode::Nil, *line),
            }
            compiler.emit_op(OpCode::Return, *line);
        }

        Stmt::Break { line } => {
            let depth = loop_depth(compiler, "break", *line)?;
            var::discard_locals(compiler, depth, *line);
            let jump = compiler.emit_jump(OpCode::Jump, *line);
            if let Some(ctx) = compiler.current().loops.last_mut() {
                ctx.break_jumps.push(jump);
            }
        }

        Stmt::Continue { line } => {
            let depth = loop_depth(compiler, "continue", *line)?;
            var::discard_locals(compiler, depth, *line);
            let target = compiler
                .current()
                .loops
                .last()
                .and_then(|ctx| ctx.continue_target);
            match target {
                Some(start) => compiler.emit_loop(start, *line)?,
                None => {
                    let jump = compiler.emit_jump(OpCode::Jump, *line);
                    if let Some(ctx) = compiler.current().loops.last_mut() {
                        ctx.continue_jumps.push(jump);
                    }
                }
            }
        }

        Stmt::Pause { line } => compiler.emit_op(OpCode::Pause, *line),
    }
    Ok(())
}

fn compile_block(compiler: &mut Compiler, body: &[Stmt]) -> Result<(), CompileError> {
    for stmt in body {
        compile_stmt(compiler, stmt)?;
    }
    Ok(())
}

fn scoped_block(compiler: &mut Compiler, body: &[Stmt], line: u32) -> Result<(), CompileError> {
    var::begin_scope(compiler);
    compile_block(compiler, body)?;
    var::end_scope(compiler, line);
    Ok(())
}

// ==================== given ====================

/// 被比较的值只求值一次，存放在一个无法被源码引用的局部槽位中
fn compile_given(
    compiler: &mut Compiler,
    subject: &Expr,
    cases: &[WhenCase],
    else_branch: &[Stmt],
    line: u32,
) -> Result<(), CompileError> {
    var::begin_scope(compiler);
    let slot = var::add_local(compiler, "<given>", line)?;
    compile_expr(compiler, subject)?;
    var::mark_initialized(compiler, slot);

    let mut exit_jumps = Vec::with_capacity(cases.len());
    for case in cases {
        var::emit_get(compiler, Variable::Local(slot), case.line)?;
        compile_expr(compiler, &case.value)?;
        compiler.emit_op(OpCode::Equal, case.line);
        let next_case = compiler.emit_jump(OpCode::JumpIfFalse, case.line);
        compiler.emit_op(OpCode::Pop, case.line);
        scoped_block(compiler, &case.body, case.line)?;
        exit_jumps.push(compiler.emit_jump(OpCode::Jump, case.line));

        compiler.patch_jump(next_case, case.line)?;
        compiler.emit_op(OpCode::Pop, case.line);
    }
    scoped_block(compiler, else_branch, line)?;

    for jump in exit_jumps {
        compiler.patch_jump(jump, line)?;
    }
    var::end_scope(compiler, line);
    Ok(())
}

// ==================== 循环 ====================

fn push_loop(compiler: &mut Compiler, continue_target: Option<usize>) {
    let depth = compiler.current().scope_depth;
    compiler.current().loops.push(LoopContext {
        depth,
        continue_target,
        break_jumps: Vec::new(),
        continue_jumps: Vec::new(),
    });
}

/// 弹出循环上下文，把 break 回填到当前位置
fn finish_loop(compiler: &mut Compiler, line: u32) -> Result<(), CompileError> {
    if let Some(ctx) = compiler.current().loops.pop() {
        for jump in ctx.break_jumps {
            compiler.patch_jump(jump, line)?;
        }
    }
    Ok(())
}

fn loop_depth(compiler: &mut Compiler, keyword: &'static str, line: u32) -> Result<usize, CompileError> {
    compiler
        .current()
        .loops
        .last()
        .map(|ctx| ctx.depth)
        .ok_or(CompileError::ControlFlowOutsideLoop { line, keyword })
}

// ==================== 函数 ====================

/// 编译函数声明，在当前函数中留下一个闭包值
pub fn compile_function(compiler: &mut Compiler, decl: &FunctionDecl) -> Result<(), CompileError> {
    compiler.begin_function(decl.name.clone(), decl.params.len(), decl.ty(), decl.ret.clone());
    var::begin_scope(compiler);
    for (param, _) in &decl.params {
        let slot = var::add_local(compiler, param, decl.line)?;
        var::mark_initialized(compiler, slot);
    }
    compile_block(compiler, &decl.body)?;

    let end_line = decl.body.last().map(Stmt::line).unwrap_or(decl.line);
    let (function, upvalues) = compiler.end_function(end_line);
    let index = compiler.make_constant(Value::Obj(function), decl.line)?;
    compiler.emit_indexed(IndexedOp::CLOSURE, index, "constants", decl.line)?;

    for upvalue in &upvalues {
        let mut flags = 0;
        if upvalue.is_local {
            flags |= UPVALUE_LOCAL;
        }
        let wide = IndexedOp::is_wide(upvalue.index);
        if wide {
            flags |= UPVALUE_WIDE;
        }
        compiler.emit_byte(flags);
        if wide {
            compiler.current().chunk.write_long(upvalue.index as u32);
        } else {
            compiler.emit_byte(upvalue.index as u8);
        }
    }
    Ok(())
}
