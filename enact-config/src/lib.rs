//! Enact Config - Pure configuration data structures
//!
//! This crate contains only data structures, no logic or global state.
//! It serves as the shared configuration vocabulary across all Enact crates.

use serde::Deserialize;

/// Configuration for the garbage collector
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct GcConfig {
    /// Collect before every allocation
    pub stress: bool,
    /// Allocated bytes that trigger the first collection
    pub initial_threshold: usize,
    /// Multiplier applied to the live bytes after a collection
    pub growth_factor: usize,
}

/// Configuration for execution limits
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LimitConfig {
    /// Maximum number of live call frames
    pub max_frames: usize,
}

/// Diagnostic switches
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    /// Dump the parsed statements before analysis
    pub print_ast: bool,
    /// Dump the generated bytecode before execution
    pub disassemble: bool,
    /// Trace every executed instruction
    pub trace_execution: bool,
    /// Trace collector activity
    pub log_gc: bool,
}

/// Complete run configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EnactConfig {
    pub gc: GcConfig,
    pub limits: LimitConfig,
    pub debug: DebugConfig,
}

impl EnactConfig {
    /// Parse a (possibly partial) JSON configuration
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Execution phase enum for phase-specific configuration
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Lexer,
    Parser,
    Analyser,
    Compiler,
    Vm,
    Gc,
}

impl Phase {
    /// Get the string name of the phase
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Lexer => "lexer",
            Phase::Parser => "parser",
            Phase::Analyser => "analyser",
            Phase::Compiler => "compiler",
            Phase::Vm => "vm",
            Phase::Gc => "gc",
        }
    }

    /// Get the log target name for this phase
    pub fn target(&self) -> String {
        format!("enact::{}", self.as_str())
    }

    /// Every phase, in pipeline order
    pub fn all() -> [Phase; 6] {
        [
            Phase::Lexer,
            Phase::Parser,
            Phase::Analyser,
            Phase::Compiler,
            Phase::Vm,
            Phase::Gc,
        ]
    }
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            stress: false,
            initial_threshold: 1024 * 1024,
            growth_factor: 2,
        }
    }
}

impl Default for LimitConfig {
    fn default() -> Self {
        Self { max_frames: 64 }
    }
}
