//! 类型化 AST → 字节码代码生成器
//!
//! 每个正在生成的函数对应一个活动记录（[`Activation`]），按词法嵌套顺序
//! 存放在 `activations` 中，最后一个是当前函数。活动记录持有的函数对象和
//! 常量池都是 GC 根，因此生成过程中的分配不会回收半成品。
//!
//! 生成器信任分析器的输出：名称已解析、类型已填写。它只负责在静态类型
//! 为 `any` 的位置插入运行时检查指令。

pub mod error;
pub mod expr;
pub mod stmt;
pub mod var;

pub use error::CompileError;
pub use var::{Local, Upvalue};

use tracing::debug;

use crate::compiler::parser::Stmt;
use crate::core::bytecode::LONG_MAX;
use crate::core::{Chunk, IndexedOp, Obj, ObjFunction, ObjRef, OpCode, Type, Value};
use crate::runtime::gc::{Heap, Roots, Tracer};
use crate::runtime::stdlib::natives;

/// 循环上下文（break / continue 使用）
#[derive(Debug)]
pub(crate) struct LoopContext {
    /// 进入循环时的作用域深度
    pub depth: usize,
    /// `continue` 的向后跳转目标；`for` 循环的目标在增量之前，需要回填
    pub continue_target: Option<usize>,
    pub break_jumps: Vec<usize>,
    pub continue_jumps: Vec<usize>,
}

/// 单个函数的生成状态
#[derive(Debug)]
pub struct Activation {
    /// 堆上的函数对象，生成结束时装入 `chunk`
    pub(crate) function: ObjRef,
    pub(crate) chunk: Chunk,
    pub(crate) locals: Vec<Local>,
    pub(crate) upvalues: Vec<Upvalue>,
    pub(crate) scope_depth: usize,
    pub(crate) loops: Vec<LoopContext>,
    /// 声明的返回类型
    pub(crate) ret: Type,
}

impl Activation {
    fn new(function: ObjRef, ret: Type) -> Self {
        Self {
            function,
            chunk: Chunk::new(),
            // 槽位 0 保留给正在运行的闭包
            locals: vec![Local {
                name: String::new(),
                depth: 0,
                is_initialized: true,
                is_captured: false,
            }],
            upvalues: Vec::new(),
            scope_depth: 0,
            loops: Vec::new(),
            ret,
        }
    }
}

/// 活动记录链 + 外部根
struct ActivationRoots<'a> {
    activations: &'a [Activation],
    outer: &'a dyn Roots,
}

impl Roots for ActivationRoots<'_> {
    fn trace_roots(&self, heap: &Heap, tracer: &mut Tracer) {
        for activation in self.activations {
            tracer.object(activation.function);
            for constant in &activation.chunk.constants {
                tracer.value(constant);
            }
        }
        self.outer.trace_roots(heap, tracer);
    }
}

/// 代码生成器
pub struct Compiler<'a> {
    pub(crate) heap: &'a mut Heap,
    /// 生成器之外的根（例如 VM 状态）
    outer: &'a dyn Roots,
    pub(crate) activations: Vec<Activation>,
    errors: Vec<CompileError>,
}

impl<'a> Compiler<'a> {
    pub fn new(heap: &'a mut Heap, outer: &'a dyn Roots) -> Self {
        Self {
            heap,
            outer,
            activations: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// 是否出现过生成错误
    pub fn had_error(&self) -> bool {
        !self.errors.is_empty()
    }

    /// 生成整个程序，返回脚本函数
    ///
    /// 返回的函数不再被任何根引用，调用方必须在下一次分配前把它交给 VM。
    pub fn compile(mut self, program: &[Stmt]) -> Result<ObjRef, Vec<CompileError>> {
        if let Err(e) = self.begin_script() {
            return Err(vec![e]);
        }

        for stmt in program {
            let locals = self.activations[0].locals.len();
            if let Err(e) = stmt::compile_stmt(&mut self, stmt) {
                debug!(target: "enact::compiler", "recovering from {}", e);
                self.errors.push(e);
                // 丢弃失败声明留下的嵌套活动记录
                self.activations.truncate(1);
                let script = &mut self.activations[0];
                script.locals.truncate(locals);
                script.scope_depth = 0;
                script.loops.clear();
            }
        }

        let last_line = program.last().map(Stmt::line).unwrap_or(1);
        let (function, _) = self.end_function(last_line);
        if !self.had_error() {
            Ok(function)
        } else {
            Err(self.errors)
        }
    }

    /// 脚本前言：保留槽位 0，再把本地函数放进紧随其后的局部变量
    fn begin_script(&mut self) -> Result<(), CompileError> {
        self.begin_function(
            String::new(),
            0,
            Type::function(Vec::new(), Type::Nothing),
            Type::Nothing,
        );
        for native in natives() {
            let name = native.name;
            let r = self.alloc(Obj::Native(native));
            self.emit_constant(Value::Obj(r), 0)?;
            let slot = var::add_local(self, name, 0)?;
            var::mark_initialized(self, slot);
        }
        Ok(())
    }

    // ==================== 活动记录 ====================

    pub(crate) fn begin_function(&mut self, name: String, arity: usize, ty: Type, ret: Type) {
        let function = self.alloc(Obj::Function(ObjFunction {
            name,
            arity,
            upvalue_count: 0,
            chunk: Chunk::new(),
            ty,
        }));
        self.activations.push(Activation::new(function, ret));
    }

    /// 结束当前函数：补上隐式返回，把字节码装入函数对象
    ///
    /// 返回的函数对象已不在活动记录链上，调用方必须在下一次分配前把它放进常量池。
    pub(crate) fn end_function(&mut self, line: u32) -> (ObjRef, Vec<Upvalue>) {
        self.emit_op(OpCode::Nil, line);
        self.emit_op(OpCode::Return, line);

        let last = self.activations.len() - 1;
        let activation = self.activations.remove(last);
        let upvalue_count = activation.upvalues.len();
        let code_len = activation.chunk.len();
        let constants = activation.chunk.constants.len();
        if let Ok(function) = self.heap.function_mut(activation.function) {
            function.chunk = activation.chunk;
            function.upvalue_count = upvalue_count;
            debug!(
                target: "enact::compiler",
                "compiled '{}': {} bytes, {} constants, {} upvalues",
                function.name, code_len, constants, upvalue_count
            );
        }
        if let Err(e) = self.heap.recharge(activation.function) {
            debug!(target: "enact::compiler", "cannot recharge function: {}", e);
        }
        (activation.function, activation.upvalues)
    }

    pub(crate) fn current(&mut self) -> &mut Activation {
        let last = self.activations.len() - 1;
        &mut self.activations[last]
    }

    // ==================== 分配 ====================

    /// 经由收集器分配；活动记录链与外部根都会被扫描
    pub(crate) fn alloc(&mut self, obj: Obj) -> ObjRef {
        let roots = ActivationRoots {
            activations: &self.activations,
            outer: self.outer,
        };
        self.heap.alloc(obj, &roots)
    }

    // ==================== 写入 ====================

    pub(crate) fn emit_op(&mut self, op: OpCode, line: u32) {
        self.current().chunk.write_op(op, line);
    }

    pub(crate) fn emit_byte(&mut self, byte: u8) {
        self.current().chunk.write_byte(byte);
    }

    pub(crate) fn emit_indexed(
        &mut self,
        op: IndexedOp,
        index: usize,
        what: &'static str,
        line: u32,
    ) -> Result<(), CompileError> {
        if index > LONG_MAX {
            return Err(CompileError::OperandTooLarge {
                line,
                what,
                count: index,
            });
        }
        self.current().chunk.write_indexed(op, index, line);
        Ok(())
    }

    /// 把值放进常量池，返回索引
    pub(crate) fn make_constant(&mut self, value: Value, line: u32) -> Result<usize, CompileError> {
        let index = self.current().chunk.add_constant(value);
        if index > LONG_MAX {
            return Err(CompileError::TooManyConstants { line });
        }
        Ok(index)
    }

    /// 加载常量，自动选择 CONSTANT / CONSTANT_LONG
    pub(crate) fn emit_constant(&mut self, value: Value, line: u32) -> Result<(), CompileError> {
        let index = self.make_constant(value, line)?;
        self.current().chunk.write_indexed(IndexedOp::CONSTANT, index, line);
        Ok(())
    }

    /// 类型句柄常量
    pub(crate) fn type_constant(&mut self, ty: &Type, line: u32) -> Result<usize, CompileError> {
        let handle = self.alloc(Obj::type_handle(ty.clone()));
        self.make_constant(Value::Obj(handle), line)
    }

    /// 动态值流入有类型的位置时插入 CHECK_TYPE；int 流入 float 时同样插入，由检查完成提升
    pub(crate) fn emit_type_check(
        &mut self,
        expected: &Type,
        found: &Type,
        line: u32,
    ) -> Result<(), CompileError> {
        let dynamic = found.is_dynamic() && !expected.is_dynamic();
        let widening = *expected == Type::Float && *found == Type::Int;
        if dynamic || widening {
            let index = self.type_constant(expected, line)?;
            self.current().chunk.write_indexed(IndexedOp::CHECK_TYPE, index, line);
        }
        Ok(())
    }

    // ==================== 跳转 ====================

    /// 写入前向跳转，返回待回填的操作数偏移
    pub(crate) fn emit_jump(&mut self, op: OpCode, line: u32) -> usize {
        let chunk = &mut self.current().chunk;
        chunk.write_op(op, line);
        chunk.write_short(u16::MAX);
        chunk.len() - 2
    }

    /// 把前向跳转回填到当前位置
    pub(crate) fn patch_jump(&mut self, offset: usize, line: u32) -> Result<(), CompileError> {
        let chunk = &mut self.current().chunk;
        let distance = chunk.len() - offset - 2;
        let distance = u16::try_from(distance).map_err(|_| CompileError::JumpTooLarge { line })?;
        let [lo, hi] = distance.to_le_bytes();
        chunk.rewrite(offset, lo);
        chunk.rewrite(offset + 1, hi);
        Ok(())
    }

    /// 向后跳到 `start`
    pub(crate) fn emit_loop(&mut self, start: usize, line: u32) -> Result<(), CompileError> {
        let chunk = &mut self.current().chunk;
        chunk.write_op(OpCode::Loop, line);
        let distance = chunk.len() - start + 2;
        let distance = u16::try_from(distance).map_err(|_| CompileError::LoopTooLarge { line })?;
        chunk.write_short(distance);
        Ok(())
    }
}

/// 便捷入口
pub fn compile(
    heap: &mut Heap,
    roots: &dyn Roots,
    program: &[Stmt],
) -> Result<ObjRef, Vec<CompileError>> {
    Compiler::new(heap, roots).compile(program)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::parser::{analyse, parse_source, ExprKind, Expr};
    use crate::runtime::disasm::disassemble_function;
    use crate::runtime::gc::NoRoots;

    fn generate(heap: &mut Heap, source: &str) -> Result<ObjRef, Vec<CompileError>> {
        let mut program = parse_source(source).expect("parse failed");
        analyse(&mut program).expect("analysis failed");
        compile(heap, &NoRoots, &program)
    }

    /// 取脚本常量池中第一个函数常量
    fn first_function(heap: &Heap, script: ObjRef) -> ObjRef {
        heap.function(script)
            .unwrap()
            .chunk
            .constants
            .iter()
            .find_map(|c| match c {
                Value::Obj(r) if heap.function(*r).is_ok() => Some(*r),
                _ => None,
            })
            .expect("no function constant")
    }

    #[test]
    fn test_add_expression() {
        let mut heap = Heap::default();
        let script = generate(&mut heap, "fun f() int: return 1 + 2 end").unwrap();
        let f = first_function(&heap, script);
        let text = disassemble_function(&heap, f);
        let ops: Vec<&str> = text
            .lines()
            .skip(1)
            .filter_map(|l| l.split_whitespace().nth(2))
            .collect();
        assert_eq!(ops, ["CONSTANT", "CONSTANT", "ADD", "RETURN", "NIL", "RETURN"]);
        assert!(text.contains("CONSTANT         0 (1)"));
        assert!(text.contains("CONSTANT         1 (2)"));
    }

    #[test]
    fn test_script_prologue_and_statement() {
        let mut heap = Heap::default();
        let script = generate(&mut heap, "1 + 2").unwrap();
        let text = disassemble_function(&heap, script);
        assert!(text.starts_with("== <script> =="));
        assert!(text.contains("(<native fn print>)"));
        assert!(text.contains("(<native fn dis>)"));
        let tail: Vec<&str> = text.lines().rev().take(6).collect();
        assert!(tail[0].ends_with("RETURN"));
        assert!(tail[1].ends_with("NIL"));
        assert!(tail[2].ends_with("POP"));
        assert!(tail[3].ends_with("ADD"));
    }

    #[test]
    fn test_runtime_checks_only_for_dynamic() {
        let mut heap = Heap::default();
        let script = generate(&mut heap, "var a int = 1\nvar b = a + 2").unwrap();
        let text = disassemble_function(&heap, script);
        assert!(!text.contains("CHECK_"));

        let script = generate(&mut heap, "var a any = 1\nvar b int = a + 2").unwrap();
        let text = disassemble_function(&heap, script);
        assert!(text.contains("CHECK_NUMERIC"));
        assert!(text.contains("CHECK_TYPE"));
    }

    #[test]
    fn test_captured_local_is_closed() {
        let mut heap = Heap::default();
        let source = "block:\n var x = 1\n fun f() int: return x end\nend";
        let script = generate(&mut heap, source).unwrap();
        let text = disassemble_function(&heap, script);
        assert!(text.contains("CLOSURE"));
        assert!(text.contains("local 4"));
        assert!(text.contains("CLOSE_UPVALUE"));
    }

    #[test]
    fn test_chained_upvalue() {
        let mut heap = Heap::default();
        let source = "fun outer() nothing:\n var x = 1\n fun mid() nothing:\n  fun inner() int: return x end\n end\nend";
        let script = generate(&mut heap, source).unwrap();
        let text = disassemble_function(&heap, script);
        assert!(text.contains("upvalue 0"));
    }

    #[test]
    fn test_wide_constants() {
        let mut heap = Heap::default();
        let source: String = (0..300).map(|i| format!("{i}\n")).collect();
        let script = generate(&mut heap, &source).unwrap();
        let text = disassemble_function(&heap, script);
        // 前 3 个常量是本地函数，第 255 个常量起使用宽格式
        assert!(text.contains("CONSTANT         254 (251)"));
        assert!(text.contains("CONSTANT_LONG    255 (252)"));
    }

    #[test]
    fn test_jump_too_large_recovers() {
        let mut heap = Heap::default();
        let filler: Vec<Stmt> = (0..40_000)
            .map(|_| {
                let mut e = Expr::new(ExprKind::Bool(true), 1);
                e.ty = Type::Bool;
                Stmt::Expression(e)
            })
            .collect();
        let mut condition = Expr::new(ExprKind::Bool(true), 1);
        condition.ty = Type::Bool;
        let mut after = Expr::new(ExprKind::Int(1), 2);
        after.ty = Type::Int;
        let program = vec![
            Stmt::If {
                condition,
                then_branch: filler.clone(),
                else_branch: Vec::new(),
                line: 1,
            },
            Stmt::Expression(after),
            Stmt::While {
                condition: {
                    let mut c = Expr::new(ExprKind::Bool(false), 3);
                    c.ty = Type::Bool;
                    c
                },
                body: filler,
                line: 3,
            },
        ];
        let errors = compile(&mut heap, &NoRoots, &program).unwrap_err();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0], CompileError::JumpTooLarge { line: 1 });
        assert_eq!(errors[1].line(), 3);
    }

    #[test]
    fn test_function_under_construction_survives_stress_gc() {
        let config = enact_config::GcConfig {
            stress: true,
            ..Default::default()
        };
        let mut heap = Heap::new(&config);
        let source = "fun f() string:\n var s = \"a\"\n var t = [1, 2, 3]\n return s\nend";
        let script = generate(&mut heap, source).unwrap();
        let f = first_function(&heap, script);
        let text = disassemble_function(&heap, f);
        assert!(text.contains("(a)"));
        assert!(text.contains("ARRAY"));
    }
}
