//! Enact Core - Core compiler and runtime (pure logic, no file IO)
//!
//! Contains the scanner, parser, type analyser, code generator, virtual
//! machine and garbage collector. Program output goes to the writer the
//! VM was created with.
//!
//! Configuration is passed explicitly via parameters, not via global state.

pub mod compiler;
pub mod core;
pub mod runtime;

// Re-export common types
pub use crate::core::{Chunk, ObjRef, OpCode, Type, Value};
pub use compiler::parser::{analyse, parse_source, AnalysisError, ParseError, Stmt};
pub use runtime::{
    compile, CompileError, Completion, Heap, RuntimeError, RuntimeErrorKind, TraceFrame, VM,
};

// Re-export config types from enact-config
pub use enact_config::{DebugConfig, EnactConfig, GcConfig, LimitConfig, Phase};
