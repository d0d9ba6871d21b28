//! An embeddable formula language evaluated once per trajectory frame.
//!
//! [`compile`] turns source text into a [`Program`] and a sorted message log.
//! A [`ProgramState`] executes the program's `main` for one frame at a time
//! against a host [`Structure`]; [`run_trajectory`] drives a whole trajectory
//! across worker threads, merges the per-worker globals and runs `reduce`.

pub mod ast;
pub mod bindings;
pub mod compiler;
pub mod config;
pub mod diagnostic;
pub mod driver;
pub mod flags;
pub mod lexer;
pub mod parser;
pub mod program;
pub mod reduce;
pub mod state;
pub mod structure;
pub mod value;
pub mod verify;
pub mod vm;

pub use compiler::{CompileOutcome, compile, compile_with};
pub use config::{ConfigError, DataSourceConfig, MAX_ARGUMENTS};
pub use diagnostic::{CompilerMessage, Severity};
pub use driver::{RunOutcome, run_trajectory};
pub use flags::{OutputFlags, PhaseFlags};
pub use program::Program;
pub use reduce::{GlobalTable, merge_globals};
pub use state::{Frame, ProgramState};
pub use structure::{AtomId, Structure};
pub use value::{Mat3, Value, Vec2, Vec3};
pub use vm::{ScriptError, VmError};
