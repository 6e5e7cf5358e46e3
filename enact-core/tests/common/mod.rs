//! 测试辅助工具
//!
//! 提供端到端测试的辅助函数：源码 -> 语法分析 -> 类型分析 -> 代码生成 -> 执行，
//! 程序输出写入可共享的缓冲区。

#![allow(dead_code)]

use std::cell::RefCell;
use std::io::{self, Write};
use std::rc::Rc;

use enact_core::compiler::parser::{analyse, parse_source, AnalysisError, ParseError};
use enact_core::runtime::{compile, CompileError, Completion, Heap, RuntimeError, VM};
use enact_core::EnactConfig;

/// 可克隆的输出缓冲区
#[derive(Clone, Default)]
pub struct SharedBuffer(Rc<RefCell<Vec<u8>>>);

impl SharedBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.borrow()).into_owned()
    }

    pub fn clear(&self) {
        self.0.borrow_mut().clear();
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// 各阶段的失败
#[derive(Debug)]
pub enum Failure {
    Parse(Vec<ParseError>),
    Analysis(Vec<AnalysisError>),
    Compile(Vec<CompileError>),
    Runtime(RuntimeError),
}

impl Failure {
    pub fn runtime(self) -> RuntimeError {
        match self {
            Failure::Runtime(e) => e,
            other => panic!("expected a runtime error, got {other:?}"),
        }
    }
}

/// 持有堆与 VM 的测试引擎，可以连续运行多段程序
pub struct Engine {
    pub heap: Heap,
    pub vm: VM,
    pub out: SharedBuffer,
}

impl Engine {
    pub fn new(config: &EnactConfig) -> Self {
        let out = SharedBuffer::default();
        Self {
            heap: Heap::new(&config.gc),
            vm: VM::with_output(&config.limits, Box::new(out.clone())),
            out,
        }
    }

    pub fn run(&mut self, source: &str) -> Result<Completion, Failure> {
        let mut program = parse_source(source).map_err(Failure::Parse)?;
        analyse(&mut program).map_err(Failure::Analysis)?;
        let script = compile(&mut self.heap, self.vm.roots(), &program).map_err(Failure::Compile)?;
        self.vm
            .interpret(&mut self.heap, script)
            .map_err(Failure::Runtime)
    }

    /// 取出并清空已产生的输出
    pub fn take_output(&mut self) -> String {
        let text = self.out.contents();
        self.out.clear();
        text
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(&EnactConfig::default())
    }
}

/// 以默认配置执行代码，返回程序输出
pub fn run_code(source: &str) -> Result<String, Failure> {
    let mut engine = Engine::default();
    engine.run(source)?;
    Ok(engine.take_output())
}

/// 每次分配前都回收
pub fn stress_config() -> EnactConfig {
    let mut config = EnactConfig::default();
    config.gc.stress = true;
    config
}
