//! Enact API - Execution orchestration layer
//!
//! Provides the run lifecycle on top of enact-core:
//! - `EnactContext` owning the heap and the VM
//! - Pipeline: parse -> analyse -> generate -> (disassemble) -> execute
//! - Process result codes (`InterpretResult`)
//! - Unified error handling (`EnactError`)
//!
//! At the end of every run (finished or failed) the VM is reset and the heap
//! collected with no roots. A paused run keeps its state until `resume`.

use std::fs;
use std::io::{self, Write};

use tracing::{debug, info, warn};

use enact_core::compiler::parser::{analyse, parse_source, Stmt};
use enact_core::runtime::disasm::disassemble_function;
use enact_core::runtime::{compile, Heap, HeapStats, NoRoots, VM};
use enact_core::ObjRef;

pub mod error;
pub mod types;
pub use error::EnactError;
pub use types::InterpretResult;

// Re-export core and config types
pub use enact_config::{DebugConfig, EnactConfig, GcConfig, LimitConfig, Phase};
pub use enact_core::runtime::{Completion, RuntimeError, RuntimeErrorKind};
pub use enact_core::Value;

/// Owns everything a run needs
pub struct EnactContext {
    config: EnactConfig,
    heap: Heap,
    vm: VM,
}

impl EnactContext {
    /// Program output goes to stdout
    pub fn new(config: EnactConfig) -> Self {
        Self::with_output(config, Box::new(io::stdout()))
    }

    /// Program output (and debug dumps) go to `out`
    pub fn with_output(config: EnactConfig, out: Box<dyn Write>) -> Self {
        let heap = Heap::new(&config.gc);
        let vm = VM::with_output(&config.limits, out);
        Self { config, heap, vm }
    }

    pub fn config(&self) -> &EnactConfig {
        &self.config
    }

    pub fn heap_stats(&self) -> HeapStats {
        self.heap.stats()
    }

    /// A paused program is waiting for `resume`
    pub fn is_suspended(&self) -> bool {
        self.vm.is_suspended()
    }

    /// Parse and analyse, producing the typed statement list
    pub fn check(&mut self, source: &str) -> Result<Vec<Stmt>, EnactError> {
        let mut program = parse_source(source).map_err(EnactError::Parse)?;
        if self.config.debug.print_ast {
            self.dump(&format!("{program:#?}\n"));
        }
        analyse(&mut program).map_err(EnactError::Analysis)?;
        debug!(target: "enact::analyser", "{} statements checked", program.len());
        Ok(program)
    }

    /// Generate the script function
    ///
    /// The returned function is not rooted: hand it to [`EnactContext::execute`]
    /// before anything else allocates.
    pub fn compile(&mut self, source: &str) -> Result<ObjRef, EnactError> {
        let program = self.check(source)?;
        let script = compile(&mut self.heap, self.vm.roots(), &program).map_err(EnactError::Compile)?;
        info!(target: "enact::compiler", "generated script {:?}", script);
        Ok(script)
    }

    /// Run a freshly generated script function
    pub fn execute(&mut self, script: ObjRef) -> Result<Completion, EnactError> {
        if self.config.debug.disassemble {
            let text = disassemble_function(&self.heap, script);
            self.dump(&text);
        }
        let outcome = self.vm.interpret(&mut self.heap, script);
        self.finish(outcome)
    }

    /// Continue a paused program
    pub fn resume(&mut self) -> Result<Completion, EnactError> {
        let outcome = self.vm.resume(&mut self.heap);
        self.finish(outcome)
    }

    /// Whole pipeline for one piece of source text
    pub fn run(&mut self, source: &str) -> Result<Completion, EnactError> {
        let script = match self.compile(source) {
            Ok(script) => script,
            Err(e) => {
                self.end_run();
                return Err(e);
            }
        };
        self.execute(script)
    }

    /// Run source text, reporting any error on stderr
    pub fn run_source(&mut self, source: &str) -> InterpretResult {
        match self.run(source) {
            Ok(_) => InterpretResult::Ok,
            Err(e) => report(&e),
        }
    }

    /// Read and run a source file
    pub fn run_file(&mut self, path: &str) -> InterpretResult {
        match fs::read_to_string(path) {
            Ok(source) => self.run_source(&source),
            Err(e) => report(&EnactError::File {
                path: path.to_string(),
                message: e.to_string(),
            }),
        }
    }

    fn finish(
        &mut self,
        outcome: Result<Completion, RuntimeError>,
    ) -> Result<Completion, EnactError> {
        match outcome {
            Ok(Completion::Suspended) => {
                info!(target: "enact::vm", "program paused");
                Ok(Completion::Suspended)
            }
            Ok(done) => {
                self.end_run();
                Ok(done)
            }
            Err(e) => {
                self.end_run();
                Err(e.into())
            }
        }
    }

    /// Drop execution state and reclaim every object
    fn end_run(&mut self) {
        self.vm.reset();
        self.heap.collect(&NoRoots);
        let stats = self.heap.stats();
        debug!(
            target: "enact::gc",
            "end of run: {} objects, {} bytes, next at {}",
            stats.objects,
            stats.bytes_allocated,
            stats.next_gc
        );
    }

    fn dump(&mut self, text: &str) {
        let out = self.vm.output();
        if let Err(e) = out.write_all(text.as_bytes()).and_then(|_| out.flush()) {
            warn!("failed to write debug output: {}", e);
        }
    }
}

fn report(error: &EnactError) -> InterpretResult {
    eprintln!("{error}");
    error.result()
}

/// Run source text once with explicit configuration
pub fn run(source: &str, config: &EnactConfig) -> InterpretResult {
    EnactContext::new(config.clone()).run_source(source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Clone, Default)]
    struct Capture(Rc<RefCell<Vec<u8>>>);

    impl Capture {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.borrow()).into_owned()
        }
    }

    impl Write for Capture {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn context(config: EnactConfig) -> (EnactContext, Capture) {
        let out = Capture::default();
        (EnactContext::with_output(config, Box::new(out.clone())), out)
    }

    #[test]
    fn test_result_codes_per_phase() {
        let (mut ctx, _) = context(EnactConfig::default());
        assert_eq!(ctx.run_source("print(1)"), InterpretResult::Ok);
        assert_eq!(ctx.run_source("var = 1"), InterpretResult::ParseError);
        assert_eq!(ctx.run_source("print(missing)"), InterpretResult::AnalysisError);
        assert_eq!(ctx.run_source("[1][4]"), InterpretResult::RuntimeError);
        assert_eq!(ctx.run_file("/nonexistent/enact/file.en"), InterpretResult::FileError);
    }

    #[test]
    fn test_heap_is_empty_after_run() {
        let (mut ctx, out) = context(EnactConfig::default());
        ctx.run("var s = \"a\" + \"b\"\nprint([s, s])").unwrap();
        assert_eq!(out.text(), "[ab, ab]\n");
        assert_eq!(ctx.heap_stats().objects, 0);

        assert!(ctx.run("[1, 2][9]").is_err());
        assert_eq!(ctx.heap_stats().objects, 0);
    }

    #[test]
    fn test_paused_run_keeps_state() {
        let (mut ctx, out) = context(EnactConfig::default());
        let paused = ctx.run("var s = \"kept\"\npause\nprint(s)").unwrap();
        assert_eq!(paused, Completion::Suspended);
        assert!(ctx.is_suspended());
        assert!(ctx.heap_stats().objects > 0);

        assert_eq!(ctx.resume().unwrap(), Completion::Finished(Value::Nil));
        assert_eq!(out.text(), "kept\n");
        assert_eq!(ctx.heap_stats().objects, 0);

        let err = ctx.resume().unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_disassemble_dump() {
        let mut config = EnactConfig::default();
        config.debug.disassemble = true;
        let (mut ctx, out) = context(config);
        ctx.run("print(2)").unwrap();
        let text = out.text();
        assert!(text.starts_with("== <script> =="));
        assert!(text.contains("CALL"));
        assert!(text.ends_with("2\n"));
    }
}
