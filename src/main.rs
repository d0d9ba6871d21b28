use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

use trajscript::compiler::{self, CompileOutcome};
use trajscript::diagnostic::ansi::AnsiRenderer;
use trajscript::diagnostic::{CompilerMessage, MessageLog, json};
use trajscript::vm::CompiledProgram;
use trajscript::DataSourceConfig;

#[derive(Parser, Debug)]
#[command(name = "trajscript", version)]
#[command(about = "Check, compile and inspect per-frame trajectory formulas")]
struct Cli {
    /// Data source settings as JSON (`arguments`, `output_size`)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Value for the next argument slot (`arg1`, `arg2`, ...); overrides the config file
    #[arg(long = "arg", global = true, allow_negative_numbers = true)]
    args: Vec<i64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compile a program and report its messages
    Check {
        file: PathBuf,
        /// One JSON object per message
        #[arg(long)]
        json: bool,
    },
    /// Print the parsed program as JSON
    Ast { file: PathBuf },
    /// Write the byte code artifact
    Compile {
        file: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Print the instructions of a source file or byte code artifact
    Disasm { file: PathBuf },
}

/// Exit status for programs that fail to compile.
const EXIT_COMPILE: u8 = 1;
/// Exit status for unreadable input or bad settings.
const EXIT_USAGE: u8 = 2;

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn,trajscript=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref(), cli.args) {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            return ExitCode::from(EXIT_USAGE);
        }
    };

    match cli.command {
        Command::Check { file, json } => check(&file, &config, json),
        Command::Ast { file } => ast(&file),
        Command::Compile { file, output } => compile(&file, &output, &config),
        Command::Disasm { file } => disasm(&file),
    }
}

fn load_config(path: Option<&Path>, args: Vec<i64>) -> Result<DataSourceConfig, trajscript::ConfigError> {
    let mut config = match path {
        Some(path) => DataSourceConfig::load(path)?,
        None => DataSourceConfig::default(),
    };
    if !args.is_empty() {
        config.arguments = args;
    }
    config.validate()?;
    debug!(?config, "data source settings");
    Ok(config)
}

fn read_source(path: &Path) -> Result<String, ExitCode> {
    std::fs::read_to_string(path).map_err(|e| {
        error!("cannot read {}: {e}", path.display());
        ExitCode::from(EXIT_USAGE)
    })
}

fn print_messages(messages: &[CompilerMessage], source: &str, as_json: bool) {
    if as_json {
        for m in messages {
            println!("{}", json::render(m, Some(source)));
        }
        return;
    }
    let renderer = AnsiRenderer { use_color: std::io::stderr().is_terminal() };
    for m in messages {
        eprint!("{}", renderer.render(m, source));
    }
}

fn compile_file(path: &Path, config: &DataSourceConfig, as_json: bool) -> Result<CompileOutcome, ExitCode> {
    let source = read_source(path)?;
    let outcome = compiler::compile_with(&source, config);
    print_messages(&outcome.messages, &source, as_json);
    if outcome.success {
        Ok(outcome)
    } else {
        Err(ExitCode::from(EXIT_COMPILE))
    }
}

fn check(path: &Path, config: &DataSourceConfig, as_json: bool) -> ExitCode {
    match compile_file(path, config, as_json) {
        Ok(outcome) => {
            if !as_json {
                println!("ok: {} bytes of byte code", outcome.program.byte_code_size());
            }
            ExitCode::SUCCESS
        }
        Err(code) => code,
    }
}

fn ast(path: &Path) -> ExitCode {
    let source = match read_source(path) {
        Ok(source) => source,
        Err(code) => return code,
    };
    let mut log = MessageLog::new(&source);
    let Some(program) = compiler::parse_source(&source, &mut log) else {
        print_messages(&log.into_sorted(), &source, false);
        return ExitCode::from(EXIT_COMPILE);
    };
    match serde_json::to_string_pretty(&program) {
        Ok(text) => {
            println!("{text}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("cannot serialize program: {e}");
            ExitCode::from(EXIT_COMPILE)
        }
    }
}

fn compile(path: &Path, output: &Path, config: &DataSourceConfig) -> ExitCode {
    let outcome = match compile_file(path, config, false) {
        Ok(outcome) => outcome,
        Err(code) => return code,
    };
    if let Err(e) = std::fs::write(output, outcome.program.byte_code()) {
        error!("cannot write {}: {e}", output.display());
        return ExitCode::from(EXIT_USAGE);
    }
    debug!(bytes = outcome.program.byte_code_size(), output = %output.display(), "wrote byte code");
    ExitCode::SUCCESS
}

fn disasm(path: &Path) -> ExitCode {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => {
            error!("cannot read {}: {e}", path.display());
            return ExitCode::from(EXIT_USAGE);
        }
    };
    let compiled = if bytes.starts_with(b"TJSB") {
        match CompiledProgram::from_bytes(&bytes) {
            Ok(compiled) => compiled,
            Err(e) => {
                error!("{}: {e}", path.display());
                return ExitCode::from(EXIT_COMPILE);
            }
        }
    } else {
        let source = String::from_utf8_lossy(&bytes);
        let mut log = MessageLog::new(&source);
        match compiler::generate(&source, &mut log) {
            Some(compiled) => compiled,
            None => {
                print_messages(&log.into_sorted(), &source, false);
                return ExitCode::from(EXIT_COMPILE);
            }
        }
    };
    print!("{}", compiled.disassemble());
    ExitCode::SUCCESS
}
