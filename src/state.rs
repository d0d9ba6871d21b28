use tracing::debug;

use crate::bindings::CallContext;
use crate::config::{DataSourceConfig, MAX_ARGUMENTS};
use crate::flags::{OutputFlags, PhaseFlags};
use crate::program::Program;
use crate::reduce::GlobalTable;
use crate::structure::Structure;
use crate::value::Value;
use crate::vm::{CompiledProgram, Machine, ScriptError, VmError};

/// Per-instance data the bindings read and write.
#[derive(Debug, Default)]
pub(crate) struct InstanceData {
    pub(crate) phase: PhaseFlags,
    pub(crate) output_flags: OutputFlags,
    /// Per-frame results, visible to `dataread`/`datawrite` while reducing.
    pub(crate) series: Vec<f64>,
    /// 1-based index of the frame being executed, 0 outside a frame.
    pub(crate) data_pos: usize,
    pub(crate) data_size: usize,
    pub(crate) output: Vec<f64>,
    /// `print` output captured while compiling: (line, text).
    pub(crate) printed: Vec<(u32, String)>,
}

/// The structures one execution sees.
#[derive(Default)]
pub struct Frame<'a> {
    pub structure: Option<&'a mut dyn Structure>,
    pub reference: Option<&'a dyn Structure>,
    /// 1-based position of this frame in the trajectory.
    pub position: usize,
    /// Number of frames in the trajectory.
    pub count: usize,
}

impl<'a> Frame<'a> {
    pub fn new(structure: &'a mut dyn Structure) -> Self {
        Frame { structure: Some(structure), ..Frame::default() }
    }

    pub fn with_reference(mut self, reference: &'a dyn Structure) -> Self {
        self.reference = Some(reference);
        self
    }

    pub fn at(mut self, position: usize, count: usize) -> Self {
        self.position = position;
        self.count = count;
        self
    }
}

/// One program instance, owned by a single worker.
pub struct ProgramState {
    config: DataSourceConfig,
    data: InstanceData,
    machine: Option<Machine>,
    loaded: Option<Program>,
}

impl ProgramState {
    pub fn new(config: DataSourceConfig) -> Self {
        let data = InstanceData { output: vec![f64::NAN; config.output_size], ..InstanceData::default() };
        ProgramState { config, data, machine: None, loaded: None }
    }

    /// The throwaway instance the compiler probes a program with.
    pub(crate) fn probe(config: DataSourceConfig) -> Self {
        let mut state = ProgramState::new(config);
        state.data.phase.insert(PhaseFlags::COMPILING);
        state
    }

    pub fn config(&self) -> &DataSourceConfig {
        &self.config
    }

    pub fn phase(&self) -> PhaseFlags {
        self.data.phase
    }

    pub(crate) fn insert_phase(&mut self, phase: PhaseFlags) {
        self.data.phase.insert(phase);
    }

    pub fn output_flags(&self) -> OutputFlags {
        self.data.output_flags
    }

    pub fn output(&self) -> &[f64] {
        &self.data.output
    }

    pub fn is_initialized(&self) -> bool {
        self.machine.is_some()
    }

    pub fn has_function(&self, name: &str) -> bool {
        self.machine.as_ref().is_some_and(|m| m.has_function(name))
    }

    pub(crate) fn take_printed(&mut self) -> Vec<(u32, String)> {
        std::mem::take(&mut self.data.printed)
    }

    /// Decodes the program's byte code and runs its top-level statements.
    pub fn load(&mut self, program: &Program) -> Result<(), ScriptError> {
        self.loaded = None;
        let compiled = CompiledProgram::from_bytes(program.byte_code())?;
        self.load_compiled(compiled)?;
        self.loaded = Some(program.clone());
        Ok(())
    }

    pub(crate) fn load_compiled(&mut self, compiled: CompiledProgram) -> Result<(), ScriptError> {
        self.machine = None;
        let mut machine = Machine::new(compiled)?;
        seed_arguments(&mut machine, &self.config);
        let mut ctx = CallContext::new(&mut self.data, None, None);
        machine.run_top_level(&mut ctx)?;
        debug!(
            functions = machine.program().top_level,
            globals = machine.program().globals.len(),
            "program loaded"
        );
        self.machine = Some(machine);
        Ok(())
    }

    /// Calls a zero-argument entry point with the given frame.
    pub(crate) fn call_entry(&mut self, name: &str, frame: Frame<'_>) -> Result<Vec<Value>, ScriptError> {
        let Some(machine) = self.machine.as_mut() else {
            return Err(VmError::Runtime("no program loaded".into()).into());
        };
        // Re-coerce so the trait object's lifetime can shrink to this borrow.
        let structure = frame.structure.map(|s| s as &mut dyn Structure);
        let mut ctx = CallContext::new(&mut self.data, structure, frame.reference);
        machine.call(name, Vec::new(), &mut ctx)
    }

    /// Runs `main` for one frame and returns its result as a number.
    pub fn execute(&mut self, program: &Program, frame: Frame<'_>) -> Result<f64, ScriptError> {
        if self.loaded.as_ref() != Some(program) {
            self.load(program)?;
        }
        self.data.output_flags = OutputFlags::empty();
        self.data.output.clear();
        self.data.output.resize(self.config.output_size, f64::NAN);
        self.data.data_pos = frame.position;
        self.data.data_size = frame.count;
        if let Some(machine) = self.machine.as_mut() {
            seed_arguments(machine, &self.config);
        }
        let results = self.call_entry("main", frame)?;
        main_result(results.first())
    }

    /// Runs `reduce` over `series`, which it may rewrite through `datawrite`.
    /// Returns whether the program has a reduce entry point.
    pub fn run_reduce(&mut self, series: &mut Vec<f64>) -> Result<bool, ScriptError> {
        if !self.has_function("reduce") {
            return Ok(false);
        }
        self.data.phase.insert(PhaseFlags::REDUCING);
        self.data.output_flags = OutputFlags::empty();
        self.data.data_pos = 0;
        self.data.data_size = series.len();
        self.data.series = std::mem::take(series);
        let result = self.call_entry("reduce", Frame::default());
        *series = std::mem::take(&mut self.data.series);
        result.map(|_| true)
    }
}

fn seed_arguments(machine: &mut Machine, config: &DataSourceConfig) {
    for k in 1..=MAX_ARGUMENTS {
        machine.set_global(&format!("arg{k}"), Value::Number(config.argument(k) as f64));
    }
}

/// `nil` is NaN, booleans are 1 or 0; other kinds are an error.
fn main_result(value: Option<&Value>) -> Result<f64, ScriptError> {
    match value {
        None | Some(Value::Nil) => Ok(f64::NAN),
        Some(Value::Number(n)) => Ok(*n),
        Some(Value::Bool(b)) => Ok(if *b { 1.0 } else { 0.0 }),
        Some(other) => Err(VmError::Type(format!("'main' must return a number, got {}", other.type_name())).into()),
    }
}

impl GlobalTable for ProgramState {
    fn is_initialized(&self) -> bool {
        self.machine.is_some()
    }

    fn global_names(&self) -> Vec<String> {
        self.machine
            .iter()
            .flat_map(|m| m.globals())
            .filter(|(_, v)| !v.is_nil())
            .map(|(name, _)| name.to_string())
            .collect()
    }

    fn global(&self, name: &str) -> Option<Value> {
        self.machine.as_ref()?.global(name).filter(|v| !v.is_nil()).cloned()
    }

    fn set_global(&mut self, name: &str, value: Value) -> bool {
        self.machine.as_mut().is_some_and(|m| m.set_global(name, value))
    }

    fn mark_reducing(&mut self) {
        self.data.phase.insert(PhaseFlags::REDUCING);
    }
}
