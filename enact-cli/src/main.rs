//! Enact CLI - Command line interface
//!
//! Runs a script file, or starts a line-by-line REPL when no file is given.
//! The process exit status is the `InterpretResult` code of the run.

use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process;

use clap::Parser;
use tracing::{info, Level};

use enact_api::{Completion, EnactConfig, EnactContext, EnactError, InterpretResult, Phase};

mod config;
mod logging;

use crate::config::LogConfig;
use crate::logging::LogFormat;

#[derive(Parser, Debug)]
#[command(name = "enact", about = "Enact programming language", version)]
struct Cli {
    /// Script to run (starts the REPL when omitted)
    #[arg(value_name = "FILE")]
    file: Option<PathBuf>,

    /// JSON configuration file (gc / limits / debug sections, all optional)
    #[arg(long, value_name = "JSON")]
    config: Option<PathBuf>,

    /// Print the parsed statements before analysis
    #[arg(long)]
    print_ast: bool,

    /// Print the generated bytecode before execution
    #[arg(long)]
    disassemble: bool,

    /// Trace every executed instruction (enact::vm at TRACE)
    #[arg(long)]
    trace_execution: bool,

    /// Collect garbage before every allocation
    #[arg(long)]
    stress_gc: bool,

    /// Trace collector activity (enact::gc at TRACE)
    #[arg(long)]
    log_gc: bool,

    /// Print AST and bytecode, log at DEBUG
    #[arg(long)]
    debug: bool,

    /// Global log level (error, warn, info, debug, trace)
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<Level>,

    /// Log output format
    #[arg(long, value_enum, default_value = "compact")]
    log_format: LogFormat,
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if e.use_stderr() => {
            let _ = e.print();
            process::exit(InterpretResult::InvalidArguments.code());
        }
        // --help / --version
        Err(e) => e.exit(),
    };

    let config = match build_config(&cli) {
        Ok(config) => config,
        Err((result, message)) => {
            eprintln!("{message}");
            process::exit(result.code());
        }
    };
    logging::init(&build_log_config(&cli, &config), cli.log_format);

    let mut ctx = EnactContext::new(config);
    let result = match &cli.file {
        Some(path) => run_file(&mut ctx, path),
        None => repl(&mut ctx),
    };
    process::exit(result.code());
}

/// Merge the optional JSON file with the command line switches
fn build_config(cli: &Cli) -> Result<EnactConfig, (InterpretResult, String)> {
    let mut config = match &cli.config {
        Some(path) => {
            let text = fs::read_to_string(path).map_err(|e| {
                (
                    InterpretResult::FileError,
                    format!("Could not read config \"{}\": {}", path.display(), e),
                )
            })?;
            EnactConfig::from_json(&text).map_err(|e| {
                (
                    InterpretResult::InvalidArguments,
                    format!("Invalid config \"{}\": {}", path.display(), e),
                )
            })?
        }
        None => EnactConfig::default(),
    };

    config.debug.print_ast |= cli.print_ast || cli.debug;
    config.debug.disassemble |= cli.disassemble || cli.debug;
    config.debug.trace_execution |= cli.trace_execution;
    config.debug.log_gc |= cli.log_gc;
    config.gc.stress |= cli.stress_gc;
    Ok(config)
}

fn build_log_config(cli: &Cli, config: &EnactConfig) -> LogConfig {
    let mut log = LogConfig::default();
    if cli.debug {
        log.global = Level::DEBUG;
    }
    if let Some(level) = cli.log_level {
        log.global = level;
    }
    if config.debug.trace_execution {
        log.set(Phase::Vm, Level::TRACE);
    }
    if config.debug.log_gc {
        log.set(Phase::Gc, Level::TRACE);
    }
    log
}

fn run_file(ctx: &mut EnactContext, path: &Path) -> InterpretResult {
    let source = match fs::read_to_string(path) {
        Ok(source) => source,
        Err(e) => {
            let error = EnactError::File {
                path: path.display().to_string(),
                message: e.to_string(),
            };
            eprintln!("{error}");
            return error.result();
        }
    };
    info!(target: "enact::cli", "running {}", path.display());
    run_to_completion(ctx, &source)
}

fn repl(ctx: &mut EnactContext) -> InterpretResult {
    let stdin = io::stdin();
    let mut lines = stdin.lock();
    let mut line = String::new();
    loop {
        print!("enact > ");
        let _ = io::stdout().flush();

        line.clear();
        match lines.read_line(&mut line) {
            Ok(0) => {
                println!();
                return InterpretResult::Ok;
            }
            Ok(_) => {
                // 每行独立运行，错误只报告不退出
                run_to_completion(ctx, &line);
            }
            Err(e) => {
                eprintln!("{e}");
                return InterpretResult::FileError;
            }
        }
    }
}

/// Run source text, resuming after every `pause`
fn run_to_completion(ctx: &mut EnactContext, source: &str) -> InterpretResult {
    let mut outcome = ctx.run(source);
    while let Ok(Completion::Suspended) = outcome {
        info!(target: "enact::cli", "paused, resuming");
        outcome = ctx.resume();
    }
    match outcome {
        Ok(_) => InterpretResult::Ok,
        Err(e) => {
            print_error_with_source(&e, source);
            e.result()
        }
    }
}

/// 打印错误，并附上出错的源码行
fn print_error_with_source(e: &EnactError, source: &str) {
    eprintln!("{e}");
    let Some(line) = e.line() else { return };
    if matches!(e, EnactError::Runtime(_)) {
        return;
    }
    if let Some(text) = source.lines().nth((line as usize).saturating_sub(1)) {
        eprintln!("{line:>4} | {}", text.trim_end());
    }
}
