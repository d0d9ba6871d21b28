//! The table of functions a program can call besides its own.
//!
//! Every binding is declared once with its arity, the phases it may run in and
//! the default it yields while a program is being compiled. The registry is
//! built on first use and shared by every program instance.

use std::collections::HashMap;
use std::sync::LazyLock;

use crate::flags::{OutputFlags, PhaseFlags};
use crate::state::InstanceData;
use crate::structure::Structure;
use crate::value::{Mat3, Value, Vec3};
use crate::vm::{VmError, VmResult};

mod data;
mod geometry;
mod math;
mod structure;

pub type NativeFn = fn(&mut CallContext<'_>, &[Value]) -> VmResult<Value>;
pub type NativePairFn = fn(&mut CallContext<'_>, &[Value]) -> VmResult<(Value, Value)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(u8),
    OneOf(&'static [u8]),
    AtLeast(u8),
}

impl Arity {
    pub fn accepts(self, n: usize) -> bool {
        match self {
            Arity::Exact(k) => n == k as usize,
            Arity::OneOf(ks) => ks.iter().any(|&k| n == k as usize),
            Arity::AtLeast(k) => n >= k as usize,
        }
    }

    pub fn describe(self) -> String {
        match self {
            Arity::Exact(k) => k.to_string(),
            Arity::OneOf(ks) => match ks {
                [] => "0".to_string(),
                [k] => k.to_string(),
                [init @ .., last] => {
                    let init: Vec<String> = init.iter().map(u8::to_string).collect();
                    format!("{} or {last}", init.join(", "))
                }
            },
            Arity::AtLeast(k) => format!("at least {k}"),
        }
    }
}

/// Phases a binding runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseClass {
    Any,
    /// Per-frame only; an error while reducing.
    Frame,
    /// Reduce only; an error during per-frame execution.
    Reduce,
}

/// What a Frame or Reduce binding yields while compiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Returns {
    Number,
    Bool,
    Vec3,
    /// `(Mat3, Vec3)`
    Transform,
}

impl Returns {
    fn default_results(self) -> Results {
        match self {
            Returns::Number => Results::One(Value::Number(0.0)),
            Returns::Bool => Results::One(Value::Bool(false)),
            Returns::Vec3 => Results::One(Value::Vec3(Vec3::ZERO)),
            Returns::Transform => Results::Two(Value::Mat3(Mat3::ZERO), Value::Vec3(Vec3::ZERO)),
        }
    }
}

#[derive(Clone, Copy)]
enum Native {
    One(NativeFn),
    Pair(NativePairFn),
    /// Plain `f64 -> f64` math function.
    Unary(fn(f64) -> f64),
}

pub struct Binding {
    pub name: &'static str,
    pub arity: Arity,
    pub phase: PhaseClass,
    pub returns: Returns,
    native: Native,
}

impl std::fmt::Debug for Binding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Binding")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .field("phase", &self.phase)
            .finish()
    }
}

/// Values a binding call produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Results {
    One(Value),
    Two(Value, Value),
}

impl Results {
    pub fn len(&self) -> usize {
        match self {
            Results::One(_) => 1,
            Results::Two(..) => 2,
        }
    }

    pub fn first(self) -> Value {
        match self {
            Results::One(v) | Results::Two(v, _) => v,
        }
    }
}

impl IntoIterator for Results {
    type Item = Value;
    type IntoIter = std::iter::Chain<std::iter::Once<Value>, std::option::IntoIter<Value>>;

    fn into_iter(self) -> Self::IntoIter {
        match self {
            Results::One(v) => std::iter::once(v).chain(None),
            Results::Two(v, w) => std::iter::once(v).chain(Some(w)),
        }
    }
}

// ── Registry ─────────────────────────────────────────────────────────

pub struct Registry {
    bindings: Vec<Binding>,
    index: HashMap<&'static str, usize>,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder { bindings: Vec::new() }
    }

    pub fn get(&self, name: &str) -> Option<&Binding> {
        self.index.get(name).map(|&i| &self.bindings[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Binding> {
        self.bindings.iter()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

pub struct RegistryBuilder {
    bindings: Vec<Binding>,
}

impl RegistryBuilder {
    fn push(mut self, name: &'static str, arity: Arity, phase: PhaseClass, returns: Returns, native: Native) -> Self {
        self.bindings.push(Binding { name, arity, phase, returns, native });
        self
    }

    /// A phase-independent binding.
    pub fn function(self, name: &'static str, arity: Arity, f: NativeFn) -> Self {
        self.push(name, arity, PhaseClass::Any, Returns::Number, Native::One(f))
    }

    pub fn math(self, name: &'static str, f: fn(f64) -> f64) -> Self {
        self.push(name, Arity::Exact(1), PhaseClass::Any, Returns::Number, Native::Unary(f))
    }

    pub fn frame(self, name: &'static str, arity: Arity, returns: Returns, f: NativeFn) -> Self {
        self.push(name, arity, PhaseClass::Frame, returns, Native::One(f))
    }

    pub fn frame_pair(self, name: &'static str, arity: Arity, returns: Returns, f: NativePairFn) -> Self {
        self.push(name, arity, PhaseClass::Frame, returns, Native::Pair(f))
    }

    pub fn reduce(self, name: &'static str, arity: Arity, returns: Returns, f: NativeFn) -> Self {
        self.push(name, arity, PhaseClass::Reduce, returns, Native::One(f))
    }

    pub fn with(self, register: fn(RegistryBuilder) -> RegistryBuilder) -> Self {
        register(self)
    }

    /// Later declarations of a name replace earlier ones.
    pub fn build(self) -> Registry {
        let index = self.bindings.iter().enumerate().map(|(i, b)| (b.name, i)).collect();
        Registry { bindings: self.bindings, index }
    }
}

static REGISTRY: LazyLock<Registry> = LazyLock::new(|| {
    Registry::builder()
        .with(math::register)
        .with(geometry::register)
        .with(data::register)
        .with(structure::register)
        .build()
});

pub fn registry() -> &'static Registry {
    &REGISTRY
}

pub fn lookup(name: &str) -> Option<&'static Binding> {
    REGISTRY.get(name)
}

/// Calls a binding after checking its arity and the instance's phase.
pub fn invoke(binding: &Binding, ctx: &mut CallContext<'_>, args: &[Value]) -> VmResult<Results> {
    if !binding.arity.accepts(args.len()) {
        return Err(VmError::Arity {
            function: binding.name.to_string(),
            expected: binding.arity.describe(),
            got: args.len(),
        });
    }
    let phase = ctx.data.phase;
    match binding.phase {
        PhaseClass::Any => {}
        _ if phase.contains(PhaseFlags::COMPILING) => return Ok(binding.returns.default_results()),
        PhaseClass::Frame if phase.contains(PhaseFlags::REDUCING) => {
            return Err(VmError::Phase { function: binding.name.to_string(), phase: "while reducing" });
        }
        PhaseClass::Reduce if !phase.contains(PhaseFlags::REDUCING) => {
            return Err(VmError::Phase {
                function: binding.name.to_string(),
                phase: "during per-frame execution",
            });
        }
        _ => {}
    }
    match binding.native {
        Native::One(f) => f(ctx, args).map(Results::One),
        Native::Pair(f) => f(ctx, args).map(|(a, b)| Results::Two(a, b)),
        Native::Unary(f) => {
            let x = crate::value::ops::number_arg(binding.name, args, 0)?;
            Ok(Results::One(Value::Number(f(x))))
        }
    }
}

// ── Call context ─────────────────────────────────────────────────────

/// Everything a binding may touch: its own instance's data and the
/// structures of the frame being executed.
pub struct CallContext<'a> {
    pub(crate) data: &'a mut InstanceData,
    structure: Option<&'a mut dyn Structure>,
    reference: Option<&'a dyn Structure>,
    /// Script line of the call in progress.
    pub(crate) line: u32,
}

impl<'a> CallContext<'a> {
    pub(crate) fn new(
        data: &'a mut InstanceData,
        structure: Option<&'a mut dyn Structure>,
        reference: Option<&'a dyn Structure>,
    ) -> Self {
        CallContext { data, structure, reference, line: 0 }
    }

    pub fn phase(&self) -> PhaseFlags {
        self.data.phase
    }

    pub(crate) fn structure(&mut self, function: &str) -> VmResult<&mut (dyn Structure + 'a)> {
        match self.structure.as_deref_mut() {
            Some(s) => Ok(s),
            None => Err(VmError::MissingStructure { function: function.to_string() }),
        }
    }

    pub(crate) fn reference(&self, function: &str) -> VmResult<&'a dyn Structure> {
        self.reference.ok_or_else(|| VmError::MissingReference { function: function.to_string() })
    }

    /// Superposes the structure onto the reference, once per frame.
    pub(crate) fn ensure_aligned(&mut self, function: &str) -> VmResult<()> {
        if self.data.output_flags.contains(OutputFlags::ALIGNED) {
            return Ok(());
        }
        let reference = self.reference(function)?;
        self.structure(function)?.superpose(reference);
        self.data.output_flags.insert(OutputFlags::ALIGNED);
        Ok(())
    }

    /// Output of the script's `print`.
    pub(crate) fn print(&mut self, text: String) {
        if self.data.phase.contains(PhaseFlags::COMPILING) {
            self.data.printed.push((self.line, text));
        } else {
            tracing::info!(target: "trajscript::script", line = self.line, "{text}");
        }
    }
}

// ── Argument helpers shared by the binding modules ──────────────────

pub(crate) use crate::value::ops::number_arg;

/// Integral numeric argument, such as a serial number or a 1-based slot.
pub(crate) fn int_arg(function: &str, args: &[Value], i: usize) -> VmResult<i64> {
    let n = number_arg(function, args, i)?;
    if n.fract() != 0.0 || !n.is_finite() {
        return Err(VmError::bad_argument(function, i, "integer", args.get(i)));
    }
    Ok(n as i64)
}

pub(crate) fn str_arg<'v>(function: &str, args: &'v [Value], i: usize) -> VmResult<&'v str> {
    match args.get(i) {
        Some(Value::Str(s)) => Ok(s),
        other => Err(VmError::bad_argument(function, i, "string", other)),
    }
}

pub(crate) fn vec3_arg(function: &str, args: &[Value], i: usize) -> VmResult<Vec3> {
    match args.get(i) {
        Some(Value::Vec3(v)) => Ok(*v),
        other => Err(VmError::bad_argument(function, i, "vec3", other)),
    }
}
