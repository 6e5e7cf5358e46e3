//! 表达式编译
//!
//! 运行时检查只在操作数的静态类型为 `any` 时插入。

use super::{var, CompileError, Compiler};
use crate::compiler::parser::{BinaryOp, Expr, ExprKind, LogicalOp, UnaryOp};
use crate::core::bytecode::LONG_MAX;
use crate::core::{IndexedOp, Obj, OpCode, Type, Value};

/// 编译表达式，结果留在栈顶
pub fn compile_expr(compiler: &mut Compiler, expr: &Expr) -> Result<(), CompileError> {
    let line = expr.line;
    match &expr.kind {
        // ===== 字面量 =====
        ExprKind::Int(n) => compiler.emit_constant(Value::Int(*n), line)?,
        ExprKind::Float(f) => compiler.emit_constant(Value::Float(*f), line)?,
        ExprKind::Bool(true) => compiler.emit_op(OpCode::True, line),
        ExprKind::Bool(false) => compiler.emit_op(OpCode::False, line),
        ExprKind::Nil => compiler.emit_op(OpCode::Nil, line),
        ExprKind::Str(s) => {
            let r = compiler.alloc(Obj::string(s.as_str()));
            compiler.emit_constant(Value::Obj(r), line)?;
        }
        ExprKind::Array {
            elements,
            element_type,
        } => {
            let element_type = element_type.clone().unwrap_or(Type::Dynamic);
            for element in elements {
                compile_expr(compiler, element)?;
                compiler.emit_type_check(&element_type, &element.ty, element.line)?;
            }
            emit_array(compiler, elements.len(), &element_type, line)?;
        }

        // ===== 变量 =====
        ExprKind::Variable(name) => {
            let variable = var::resolve(compiler, name, line)?;
            var::emit_get(compiler, variable, line)?;
        }
        ExprKind::Assign { target, value } => match &target.kind {
            ExprKind::Variable(name) => {
                compile_expr(compiler, value)?;
                compiler.emit_type_check(&target.ty, &value.ty, line)?;
                let variable = var::resolve(compiler, name, line)?;
                var::emit_set(compiler, variable, line)?;
            }
            ExprKind::Subscript { object, index } => {
                compile_indexing(compiler, object, index)?;
                compile_expr(compiler, value)?;
                compiler.emit_type_check(&target.ty, &value.ty, line)?;
                if object.ty.is_dynamic() || value.ty.is_dynamic() {
                    compiler.emit_op(OpCode::CheckAllotable, line);
                }
                compiler.emit_op(OpCode::SetArrayIndex, line);
            }
            _ => return Err(CompileError::InvalidAssignmentTarget { line }),
        },

        // ===== 运算 =====
        ExprKind::Unary { op, operand } => {
            compile_expr(compiler, operand)?;
            let dynamic = operand.ty.is_dynamic();
            let (check, instruction) = match op {
                UnaryOp::Negate => (OpCode::CheckNumeric, OpCode::Negate),
                UnaryOp::Not => (OpCode::CheckBool, OpCode::Not),
                UnaryOp::Copy => (OpCode::CheckReference, OpCode::Copy),
            };
            if dynamic {
                compiler.emit_op(check, line);
            }
            compiler.emit_op(instruction, line);
        }
        ExprKind::Binary { op, left, right } => {
            let needs_numeric = !matches!(op, BinaryOp::Equal | BinaryOp::NotEqual);
            compile_expr(compiler, left)?;
            if needs_numeric && left.ty.is_dynamic() {
                compiler.emit_op(OpCode::CheckNumeric, line);
            }
            compile_expr(compiler, right)?;
            if needs_numeric && right.ty.is_dynamic() {
                compiler.emit_op(OpCode::CheckNumeric, line);
            }
            match op {
                BinaryOp::Add => compiler.emit_op(OpCode::Add, line),
                BinaryOp::Subtract => compiler.emit_op(OpCode::Subtract, line),
                BinaryOp::Multiply => compiler.emit_op(OpCode::Multiply, line),
                BinaryOp::Divide => compiler.emit_op(OpCode::Divide, line),
                BinaryOp::Less => compiler.emit_op(OpCode::Less, line),
                BinaryOp::Greater => compiler.emit_op(OpCode::Greater, line),
                BinaryOp::Equal => compiler.emit_op(OpCode::Equal, line),
                BinaryOp::LessEqual => {
                    compiler.emit_op(OpCode::Greater, line);
                    compiler.emit_op(OpCode::Not, line);
                }
                BinaryOp::GreaterEqual => {
                    compiler.emit_op(OpCode::Less, line);
                    compiler.emit_op(OpCode::Not, line);
                }
                BinaryOp::NotEqual => {
                    compiler.emit_op(OpCode::Equal, line);
                    compiler.emit_op(OpCode::Not, line);
                }
            }
        }
        ExprKind::Logical { op, left, right } => {
            compile_condition(compiler, left)?;
            let jump_op = match op {
                LogicalOp::And => OpCode::JumpIfFalse,
                LogicalOp::Or => OpCode::JumpIfTrue,
            };
            let end_jump = compiler.emit_jump(jump_op, line);
            compiler.emit_op(OpCode::Pop, line);
            compile_condition(compiler, right)?;
            compiler.patch_jump(end_jump, line)?;
        }

        // ===== 调用与下标 =====
        ExprKind::Call { callee, args } => {
            compile_expr(compiler, callee)?;
            for arg in args {
                compile_expr(compiler, arg)?;
            }
            let argc = u8::try_from(args.len()).map_err(|_| CompileError::OperandTooLarge {
                line,
                what: "arguments",
                count: args.len(),
            })?;
            if callee.ty.is_dynamic() || args.iter().any(|a| a.ty.is_dynamic()) {
                compiler.emit_op(OpCode::CheckCallable, line);
                compiler.emit_byte(argc);
            }
            compiler.emit_op(OpCode::Call, line);
            compiler.emit_byte(argc);
        }
        ExprKind::Subscript { object, index } => {
            compile_indexing(compiler, object, index)?;
            compiler.emit_op(OpCode::GetArrayIndex, line);
        }
    }
    Ok(())
}

/// 编译条件表达式；动态类型需要 CHECK_BOOL
pub fn compile_condition(compiler: &mut Compiler, condition: &Expr) -> Result<(), CompileError> {
    compile_expr(compiler, condition)?;
    if condition.ty.is_dynamic() {
        compiler.emit_op(OpCode::CheckBool, condition.line);
    }
    Ok(())
}

/// 压入数组与下标，各自按需检查
fn compile_indexing(compiler: &mut Compiler, object: &Expr, index: &Expr) -> Result<(), CompileError> {
    compile_expr(compiler, object)?;
    if object.ty.is_dynamic() {
        compiler.emit_op(OpCode::CheckIndexable, object.line);
    }
    compile_expr(compiler, index)?;
    if index.ty.is_dynamic() {
        compiler.emit_op(OpCode::CheckInt, index.line);
    }
    Ok(())
}

/// ARRAY / ARRAY_LONG：元素个数 + 元素类型常量
fn emit_array(
    compiler: &mut Compiler,
    count: usize,
    element_type: &Type,
    line: u32,
) -> Result<(), CompileError> {
    if count > LONG_MAX {
        return Err(CompileError::OperandTooLarge {
            line,
            what: "array elements",
            count,
        });
    }
    let type_index = compiler.type_constant(element_type, line)?;
    if IndexedOp::is_wide(count) || IndexedOp::is_wide(type_index) {
        compiler.emit_op(OpCode::ArrayLong, line);
        let chunk = &mut compiler.current().chunk;
        chunk.write_long(count as u32);
        chunk.write_long(type_index as u32);
    } else {
        compiler.emit_op(OpCode::Array, line);
        compiler.emit_byte(count as u8);
        compiler.emit_byte(type_index as u8);
    }
    Ok(())
}
