//! Source text to byte code, with the log of what went wrong.
//!
//! A program that lexes, parses, verifies and generates code is then run once
//! in a probe instance with the compiling phase set: top-level statements,
//! `main`, and `reduce` if present. Frame and reduce bindings return defaults
//! there, so the probe needs no structure. Only a clean probe is serialized.

use tracing::debug;

use crate::config::DataSourceConfig;
use crate::diagnostic::{CompilerMessage, MessageLog};
use crate::flags::PhaseFlags;
use crate::program::Program;
use crate::state::{Frame, ProgramState};
use crate::vm::{CompiledProgram, ScriptError};
use crate::{ast, lexer, parser, verify, vm};

/// Entry point every program must define.
pub const MAIN: &str = "main";
/// Optional entry point run once after the global merge.
pub const REDUCE: &str = "reduce";

#[derive(Debug, Clone)]
pub struct CompileOutcome {
    /// Empty byte code unless `success`.
    pub program: Program,
    /// Sorted by `(line, sequence)`.
    pub messages: Vec<CompilerMessage>,
    pub success: bool,
}

impl CompileOutcome {
    pub fn errors(&self) -> impl Iterator<Item = &CompilerMessage> {
        self.messages.iter().filter(|m| m.is_error())
    }
}

/// Compiles with no configured arguments.
pub fn compile(source: &str) -> CompileOutcome {
    compile_with(source, &DataSourceConfig::default())
}

/// Compiles, probing with `config` so `arg1..arg8` hold the values the
/// program will see at run time.
pub fn compile_with(source: &str, config: &DataSourceConfig) -> CompileOutcome {
    let mut log = MessageLog::new(source);
    let byte_code = build(source, config, &mut log);
    let success = byte_code.is_some() && !log.has_errors();
    let messages = log.into_sorted();
    debug!(success, messages = messages.len(), "compiled program");
    let program = match byte_code {
        Some(bytes) if success => Program::new(source, bytes),
        _ => Program::invalid(source),
    };
    CompileOutcome { program, messages, success }
}

/// Parses and verifies without generating code.
pub fn parse_source(source: &str, log: &mut MessageLog) -> Option<ast::Program> {
    let tokens = match lexer::lex(source) {
        Ok(tokens) => tokens,
        Err(e) => {
            log.push((&e).into());
            return None;
        }
    };
    let (program, errors) = parser::parse(tokens);
    if !errors.is_empty() {
        for e in &errors {
            log.push(e.into());
        }
        return None;
    }
    if let Err(errors) = verify::verify(&program) {
        for e in &errors {
            log.push(e.into());
        }
        return None;
    }
    Some(program)
}

/// Full pipeline up to code generation, for tooling that wants the
/// compiled form rather than the artifact.
pub fn generate(source: &str, log: &mut MessageLog) -> Option<CompiledProgram> {
    if source.trim().is_empty() {
        log.push(CompilerMessage::error("program is empty"));
        return None;
    }
    let program = parse_source(source, log)?;
    match vm::compile(&program, source) {
        Ok(compiled) => Some(compiled),
        Err(e) => {
            log.push((&e).into());
            None
        }
    }
}

fn build(source: &str, config: &DataSourceConfig, log: &mut MessageLog) -> Option<Vec<u8>> {
    let compiled = generate(source, log)?;
    let bytes = match compiled.to_bytes() {
        Ok(bytes) if !bytes.is_empty() => bytes,
        _ => {
            log.push(CompilerMessage::error("failed to serialize byte code"));
            return None;
        }
    };
    // The probe runs the decoded artifact, so whatever compiles also loads.
    let decoded = match CompiledProgram::from_bytes(&bytes) {
        Ok(decoded) => decoded,
        Err(e) => {
            log.push((&ScriptError::from(e)).into());
            return None;
        }
    };
    probe(decoded, config, log);
    if log.has_errors() {
        return None;
    }
    Some(bytes)
}

/// Dry run in a throwaway instance. Errors and `print` output land in `log`.
fn probe(compiled: CompiledProgram, config: &DataSourceConfig, log: &mut MessageLog) {
    let mut state = ProgramState::probe(config.clone());

    let loaded = state.load_compiled(compiled);
    let failed = record(&mut state, loaded, log);
    if failed {
        return;
    }

    if !state.has_function(MAIN) {
        log.push(CompilerMessage::error(format!("entry function '{MAIN}' was not defined")));
        return;
    }
    let ran = state.call_entry(MAIN, Frame::default()).map(drop);
    if record(&mut state, ran, log) {
        return;
    }

    if state.has_function(REDUCE) {
        state.insert_phase(PhaseFlags::REDUCING);
        let ran = state.call_entry(REDUCE, Frame::default()).map(drop);
        record(&mut state, ran, log);
    }
}

/// Logs captured `print` output and then the error, if any. Returns whether
/// the step failed.
fn record(state: &mut ProgramState, result: Result<(), ScriptError>, log: &mut MessageLog) -> bool {
    for (line, text) in state.take_printed() {
        log.push(CompilerMessage::info(text).at_line(line));
    }
    match result {
        Ok(()) => false,
        Err(e) => {
            log.push((&e).into());
            true
        }
    }
}
