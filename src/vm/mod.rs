use serde::{Deserialize, Serialize};

use crate::config::MAX_ARGUMENTS;
use crate::value::Value;

pub mod compile;
pub mod exec;

pub use compile::compile;
pub use exec::Machine;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum VmError {
    #[error("wrong number of arguments to '{function}' (expected {expected}, got {got})")]
    Arity {
        function: String,
        expected: String,
        got: usize,
    },
    #[error("{0}")]
    Type(String),
    #[error("index {index} out of range for {type_name} (valid 1..{len})")]
    Index {
        type_name: &'static str,
        index: String,
        len: usize,
    },
    #[error("'{function}' cannot be called {phase}")]
    Phase { function: String, phase: &'static str },
    #[error("'{function}' needs a structure, but none is loaded")]
    MissingStructure { function: String },
    #[error("'{function}' needs a reference structure, but none is set")]
    MissingReference { function: String },
    #[error("undefined function: {name}")]
    UndefinedFunction { name: String },
    #[error("invalid byte code: {0}")]
    BadByteCode(String),
    #[error("stack overflow (more than {0} nested calls)")]
    StackOverflow(usize),
    #[error("{0}")]
    Runtime(String),
}

impl VmError {
    /// Operator applied to a pairing it has no rule for.
    pub fn operands(symbol: &str, a: &Value, b: &Value) -> Self {
        VmError::Type(format!(
            "cannot apply '{symbol}' to {} and {}",
            a.type_name(),
            b.type_name()
        ))
    }

    /// `position` is zero-based; messages count from 1.
    pub fn bad_argument(function: &str, position: usize, expected: &str, got: Option<&Value>) -> Self {
        let got = got.map_or("no value", Value::type_name);
        VmError::Type(format!(
            "bad argument #{} to '{function}' ({expected} expected, got {got})",
            position + 1
        ))
    }
}

pub type VmResult<T> = Result<T, VmError>;

/// A runtime error with the script line it was raised on.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptError {
    pub line: Option<u32>,
    pub error: VmError,
}

impl ScriptError {
    pub fn at(line: u32, error: VmError) -> Self {
        ScriptError { line: Some(line), error }
    }
}

impl std::fmt::Display for ScriptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.line {
            Some(line) => write!(f, "line {line}: {}", self.error),
            None => write!(f, "{}", self.error),
        }
    }
}

impl std::error::Error for ScriptError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

impl From<VmError> for ScriptError {
    fn from(error: VmError) -> Self {
        ScriptError { line: None, error }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CompileError {
    #[error("function '{function}' needs more than 250 registers")]
    TooManyRegisters { function: String },
    #[error("function '{function}' has more than 65535 constants")]
    TooManyConstants { function: String },
    #[error("too many globals (more than 65535)")]
    TooManyGlobals,
    #[error("jump too far in function '{function}'")]
    JumpTooFar { function: String },
    #[error("undefined function: {name}")]
    UndefinedFunction { name: String },
    #[error("unknown field '{field}'")]
    UnknownField { field: String },
    #[error("'break' outside a loop")]
    BreakOutsideLoop,
}

// ── Register-based opcodes (32-bit packed instructions) ─────────────
//
// ABC mode:  [OP:8 | A:8 | B:8 | C:8]
// ABx mode:  [OP:8 | A:8 | Bx:16]  (Bx unsigned, or signed jump offset)

pub(crate) const OP_MOVE: u8 = 0; // R[A] = R[B]
pub(crate) const OP_LOADK: u8 = 1; // R[A] = K[Bx]
pub(crate) const OP_LOADNIL: u8 = 2; // R[A..A+B] = nil
pub(crate) const OP_LOADBOOL: u8 = 3; // R[A] = B != 0
pub(crate) const OP_GETGLOBAL: u8 = 4; // R[A] = G[Bx]
pub(crate) const OP_SETGLOBAL: u8 = 5; // G[Bx] = R[A]
pub(crate) const OP_ADD: u8 = 6;
pub(crate) const OP_SUB: u8 = 7;
pub(crate) const OP_MUL: u8 = 8;
pub(crate) const OP_DIV: u8 = 9;
pub(crate) const OP_MOD: u8 = 10;
pub(crate) const OP_POW: u8 = 11;
pub(crate) const OP_CONCAT: u8 = 12;
pub(crate) const OP_EQ: u8 = 13;
pub(crate) const OP_NE: u8 = 14;
pub(crate) const OP_LT: u8 = 15;
pub(crate) const OP_LE: u8 = 16;
pub(crate) const OP_NOT: u8 = 17; // R[A] = not R[B]
pub(crate) const OP_NEG: u8 = 18; // R[A] = -R[B]
pub(crate) const OP_LEN: u8 = 19; // R[A] = #R[B]
pub(crate) const OP_GETINDEX: u8 = 20; // R[A] = R[B][R[C]]
pub(crate) const OP_SETINDEX: u8 = 21; // R[A][R[B]] = R[C]
pub(crate) const OP_GETFIELD: u8 = 22; // R[A] = R[B].<component C>
pub(crate) const OP_SETFIELD: u8 = 23; // R[A].<component B> = R[C]
pub(crate) const OP_NEWLIST: u8 = 24; // R[A] = {R[B], .., R[B+C-1]}
pub(crate) const OP_JMP: u8 = 25; // ip += sBx
pub(crate) const OP_JMPF: u8 = 26; // if not R[A] then ip += sBx
pub(crate) const OP_JMPT: u8 = 27; // if R[A] then ip += sBx
pub(crate) const OP_FORPREP: u8 = 28; // check R[A..A+3], skip loop by sBx if empty
pub(crate) const OP_FORLOOP: u8 = 29; // R[A] += R[A+2]; loop back by sBx while in range
pub(crate) const OP_CALL: u8 = 30; // R[A..] = callee(R[A..A+B]), C results; callee in next word
pub(crate) const OP_RET: u8 = 31; // return R[A..A+B]

/// Count operand meaning "everything up to the last multi-result call".
pub(crate) const MULTI: u8 = 0xFF;

/// Callee word kinds for the word following `OP_CALL`: `(kind << 24) | index`.
pub(crate) const CALLEE_USER: u32 = 0;
pub(crate) const CALLEE_NATIVE: u32 = 1;

const OP_NAMES: [&str; 32] = [
    "MOVE", "LOADK", "LOADNIL", "LOADBOOL", "GETGLOBAL", "SETGLOBAL", "ADD", "SUB", "MUL", "DIV",
    "MOD", "POW", "CONCAT", "EQ", "NE", "LT", "LE", "NOT", "NEG", "LEN", "GETINDEX", "SETINDEX",
    "GETFIELD", "SETFIELD", "NEWLIST", "JMP", "JMPF", "JMPT", "FORPREP", "FORLOOP", "CALL", "RET",
];

// ── Instruction encoding ────────────────────────────────────────────

#[inline(always)]
pub(crate) fn encode_abc(op: u8, a: u8, b: u8, c: u8) -> u32 {
    (op as u32) << 24 | (a as u32) << 16 | (b as u32) << 8 | c as u32
}

#[inline(always)]
pub(crate) fn encode_abx(op: u8, a: u8, bx: u16) -> u32 {
    (op as u32) << 24 | (a as u32) << 16 | bx as u32
}

#[inline(always)]
pub(crate) fn decode_op(inst: u32) -> u8 {
    (inst >> 24) as u8
}

#[inline(always)]
pub(crate) fn decode_a(inst: u32) -> u8 {
    ((inst >> 16) & 0xFF) as u8
}

#[inline(always)]
pub(crate) fn decode_b(inst: u32) -> u8 {
    ((inst >> 8) & 0xFF) as u8
}

#[inline(always)]
pub(crate) fn decode_c(inst: u32) -> u8 {
    (inst & 0xFF) as u8
}

#[inline(always)]
pub(crate) fn decode_bx(inst: u32) -> u16 {
    (inst & 0xFFFF) as u16
}

#[inline(always)]
pub(crate) fn decode_sbx(inst: u32) -> i16 {
    (inst & 0xFFFF) as u16 as i16
}

// ── Chunk ────────────────────────────────────────────────────────────

/// One compiled function body (or the top-level statements).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub name: String,
    pub code: Vec<u32>,
    /// Source line of each instruction, parallel to `code`.
    pub lines: Vec<u32>,
    pub constants: Vec<Value>,
    pub param_count: u8,
    pub reg_count: u8,
}

impl Chunk {
    pub(crate) fn new(name: &str, param_count: u8) -> Self {
        Chunk {
            name: name.to_string(),
            code: Vec::new(),
            lines: Vec::new(),
            constants: Vec::new(),
            param_count,
            reg_count: param_count,
        }
    }

    /// Adds a constant, reusing an existing slot holding the same value.
    pub(crate) fn add_const(&mut self, val: Value) -> Option<u16> {
        if let Some(i) = self.constants.iter().position(|c| same_constant(c, &val)) {
            return Some(i as u16);
        }
        let idx = u16::try_from(self.constants.len()).ok()?;
        self.constants.push(val);
        Some(idx)
    }

    pub(crate) fn emit(&mut self, inst: u32, line: u32) -> usize {
        let idx = self.code.len();
        self.code.push(inst);
        self.lines.push(line);
        idx
    }

    /// Points the jump at `jump_pos` to the next instruction to be emitted.
    pub(crate) fn patch_jump(&mut self, jump_pos: usize) -> bool {
        let target = self.code.len();
        let Ok(offset) = i16::try_from(target as i64 - jump_pos as i64 - 1) else {
            return false;
        };
        let inst = self.code[jump_pos];
        self.code[jump_pos] = (inst & 0xFFFF0000) | (offset as u16 as u32);
        true
    }

    pub fn line_at(&self, ip: usize) -> u32 {
        self.lines.get(ip).copied().unwrap_or(0)
    }
}

/// Constants dedup by bit pattern so `0` and `-0` stay distinct.
fn same_constant(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.to_bits() == y.to_bits(),
        _ => a == b,
    }
}

// ── Compiled program ─────────────────────────────────────────────────

pub const VERSION_GLOBAL: &str = "_VERSION";

/// Names every program gets as globals before its own: the version marker
/// followed by `arg1..argN`.
pub fn reserved_globals() -> impl Iterator<Item = String> {
    std::iter::once(VERSION_GLOBAL.to_string()).chain((1..=MAX_ARGUMENTS).map(|i| format!("arg{i}")))
}

pub fn is_reserved_global(name: &str) -> bool {
    if name == VERSION_GLOBAL {
        return true;
    }
    name.strip_prefix("arg")
        .and_then(|n| n.parse::<usize>().ok())
        .is_some_and(|n| (1..=MAX_ARGUMENTS).contains(&n) && !name.starts_with("arg0"))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledProgram {
    /// User functions in declaration order, then the top-level chunk.
    pub chunks: Vec<Chunk>,
    pub top_level: usize,
    /// Global slot names; slot `i` is addressed by `GETGLOBAL/SETGLOBAL i`.
    pub globals: Vec<String>,
    /// Bound functions referenced by `CALL`, by name.
    pub natives: Vec<String>,
}

const MAGIC: &[u8; 4] = b"TJSB";
const FORMAT_VERSION: u8 = 1;

impl CompiledProgram {
    /// Index of a user function by name.
    pub fn function(&self, name: &str) -> Option<usize> {
        self.chunks[..self.top_level].iter().position(|c| c.name == name)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        let body = serde_json::to_vec(self)?;
        let mut out = Vec::with_capacity(body.len() + 5);
        out.extend_from_slice(MAGIC);
        out.push(FORMAT_VERSION);
        out.extend_from_slice(&body);
        Ok(out)
    }

    pub fn from_bytes(bytes: &[u8]) -> VmResult<Self> {
        let body = bytes
            .strip_prefix(MAGIC.as_slice())
            .ok_or_else(|| VmError::BadByteCode("missing header".into()))?;
        match body.split_first() {
            Some((&FORMAT_VERSION, rest)) => {
                let program: CompiledProgram = serde_json::from_slice(rest)
                    .map_err(|e| VmError::BadByteCode(e.to_string()))?;
                program.validate()?;
                Ok(program)
            }
            Some((v, _)) => Err(VmError::BadByteCode(format!("unsupported format version {v}"))),
            None => Err(VmError::BadByteCode("truncated".into())),
        }
    }

    /// Structural checks so a decoded program cannot index out of bounds.
    fn validate(&self) -> VmResult<()> {
        if self.top_level >= self.chunks.len() {
            return Err(VmError::BadByteCode("missing top-level chunk".into()));
        }
        for chunk in &self.chunks {
            if chunk.code.len() != chunk.lines.len() {
                return Err(VmError::BadByteCode(format!("line table mismatch in '{}'", chunk.name)));
            }
            if chunk.reg_count < chunk.param_count {
                return Err(VmError::BadByteCode(format!("bad register count in '{}'", chunk.name)));
            }
            self.validate_code(chunk)?;
        }
        Ok(())
    }

    fn validate_code(&self, chunk: &Chunk) -> VmResult<()> {
        let regs = chunk.reg_count as usize;
        let bad = |ip: usize, what: &str| {
            VmError::BadByteCode(format!("{what} at {ip} in '{}'", chunk.name))
        };
        // A register span `start..start+len` must fit the frame; MULTI spans are sized at run time.
        let span_ok = |start: u8, len: u8| len == MULTI || start as usize + len as usize <= regs;
        let mut ip = 0;
        while ip < chunk.code.len() {
            let inst = chunk.code[ip];
            let (a, b, c) = (decode_a(inst), decode_b(inst), decode_c(inst));
            let reg_ok = |r: u8| (r as usize) < regs;
            let jump_ok = move || {
                let target = jump_target(ip, inst);
                target >= 0 && (target as usize) <= chunk.code.len()
            };
            let ok = match decode_op(inst) {
                OP_MOVE | OP_NOT | OP_NEG | OP_LEN => reg_ok(a) && reg_ok(b),
                OP_LOADK => reg_ok(a) && (decode_bx(inst) as usize) < chunk.constants.len(),
                OP_LOADNIL => span_ok(a, b) && b != MULTI,
                OP_LOADBOOL => reg_ok(a),
                OP_GETGLOBAL | OP_SETGLOBAL => {
                    reg_ok(a) && (decode_bx(inst) as usize) < self.globals.len()
                }
                OP_ADD..=OP_LE | OP_GETINDEX | OP_SETINDEX => reg_ok(a) && reg_ok(b) && reg_ok(c),
                OP_GETFIELD => reg_ok(a) && reg_ok(b),
                OP_SETFIELD => reg_ok(a) && reg_ok(c),
                OP_NEWLIST => reg_ok(a) && span_ok(b, c),
                OP_JMP => jump_ok(),
                OP_JMPF | OP_JMPT => reg_ok(a) && jump_ok(),
                OP_FORPREP | OP_FORLOOP => a as usize + 4 <= regs && jump_ok(),
                OP_CALL => {
                    ip += 1;
                    let callee = chunk.code.get(ip).copied().ok_or_else(|| bad(ip, "missing callee"))?;
                    let index = (callee & 0xFF_FFFF) as usize;
                    let target_ok = match callee >> 24 {
                        CALLEE_USER => index < self.top_level,
                        CALLEE_NATIVE => index < self.natives.len(),
                        _ => false,
                    };
                    target_ok && reg_ok(a) && span_ok(a, b)
                }
                OP_RET => span_ok(a, b) && (b == 0 || b == MULTI || reg_ok(a)),
                _ => false,
            };
            if !ok {
                return Err(bad(ip, "malformed instruction"));
            }
            ip += 1;
        }
        Ok(())
    }

    /// Human-readable listing of every chunk.
    pub fn disassemble(&self) -> String {
        let mut out = String::new();
        for (ci, chunk) in self.chunks.iter().enumerate() {
            let label = if ci == self.top_level { "<top level>" } else { chunk.name.as_str() };
            out.push_str(&format!(
                "function {label} (params {}, registers {}, constants {})\n",
                chunk.param_count,
                chunk.reg_count,
                chunk.constants.len()
            ));
            let mut ip = 0;
            while ip < chunk.code.len() {
                let at = ip;
                let inst = chunk.code[ip];
                let op = decode_op(inst);
                let name = OP_NAMES.get(op as usize).copied().unwrap_or("???");
                let (a, b, c) = (decode_a(inst), decode_b(inst), decode_c(inst));
                let operands = match op {
                    OP_LOADK => {
                        let k = decode_bx(inst);
                        let shown = chunk.constants.get(k as usize).map(|v| match v {
                            Value::Str(s) => format!("{s:?}"),
                            other => other.to_string(),
                        });
                        format!("r{a} k{k} ; {}", shown.unwrap_or_default())
                    }
                    OP_GETGLOBAL | OP_SETGLOBAL => {
                        let g = decode_bx(inst);
                        let shown = self.globals.get(g as usize).map(String::as_str).unwrap_or("?");
                        format!("r{a} g{g} ; {shown}")
                    }
                    OP_JMP => format!("{:+} ; to {}", decode_sbx(inst), jump_target(ip, inst)),
                    OP_JMPF | OP_JMPT | OP_FORPREP | OP_FORLOOP => {
                        format!("r{a} {:+} ; to {}", decode_sbx(inst), jump_target(ip, inst))
                    }
                    OP_CALL => {
                        let callee = chunk.code.get(ip + 1).copied().unwrap_or(0);
                        ip += 1;
                        let (kind, index) = (callee >> 24, (callee & 0xFF_FFFF) as usize);
                        let target = if kind == CALLEE_NATIVE {
                            self.natives.get(index).cloned()
                        } else {
                            self.chunks.get(index).map(|c| c.name.clone())
                        };
                        format!(
                            "r{a} {} {} ; {}",
                            count_text(b),
                            count_text(c),
                            target.unwrap_or_else(|| "?".into())
                        )
                    }
                    OP_RET => format!("r{a} {}", count_text(b)),
                    OP_LOADNIL | OP_LOADBOOL | OP_MOVE | OP_NOT | OP_NEG | OP_LEN => format!("r{a} {b}"),
                    _ => format!("r{a} {b} {c}"),
                };
                out.push_str(&format!("  {at:04} [{:>3}] {name:<10}{operands}\n", chunk.line_at(at)));
                ip += 1;
            }
        }
        out
    }
}

fn jump_target(ip: usize, inst: u32) -> i64 {
    ip as i64 + 1 + decode_sbx(inst) as i64
}

fn count_text(n: u8) -> String {
    if n == MULTI { "*".to_string() } else { n.to_string() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoding_roundtrips_fields() {
        let inst = encode_abc(OP_ADD, 1, 2, 3);
        assert_eq!(decode_op(inst), OP_ADD);
        assert_eq!((decode_a(inst), decode_b(inst), decode_c(inst)), (1, 2, 3));
        let jump = encode_abx(OP_JMP, 0, (-5i16) as u16);
        assert_eq!(decode_sbx(jump), -5);
    }

    #[test]
    fn constants_are_deduplicated() {
        let mut chunk = Chunk::new("main", 0);
        let a = chunk.add_const(Value::Number(1.0));
        let b = chunk.add_const(Value::Str("x".into()));
        let c = chunk.add_const(Value::Number(1.0));
        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_ne!(chunk.add_const(Value::Number(-0.0)), chunk.add_const(Value::Number(0.0)));
    }

    #[test]
    fn patch_jump_sets_forward_offset() {
        let mut chunk = Chunk::new("main", 0);
        let j = chunk.emit(encode_abx(OP_JMP, 0, 0), 1);
        chunk.emit(encode_abc(OP_MOVE, 0, 0, 0), 1);
        assert!(chunk.patch_jump(j));
        assert_eq!(decode_sbx(chunk.code[j]), 1);
    }

    #[test]
    fn reserved_names() {
        let names: Vec<String> = reserved_globals().collect();
        assert_eq!(names.len(), MAX_ARGUMENTS + 1);
        assert!(is_reserved_global("_VERSION"));
        assert!(is_reserved_global("arg1"));
        assert!(is_reserved_global("arg8"));
        assert!(!is_reserved_global("arg9"));
        assert!(!is_reserved_global("arg01"));
        assert!(!is_reserved_global("args"));
        assert!(!is_reserved_global("total"));
    }

    #[test]
    fn byte_code_rejects_bad_header() {
        assert!(matches!(CompiledProgram::from_bytes(b"nope"), Err(VmError::BadByteCode(_))));
        assert!(matches!(CompiledProgram::from_bytes(b"TJSB"), Err(VmError::BadByteCode(_))));
        assert!(matches!(CompiledProgram::from_bytes(b"TJSB\x09{}"), Err(VmError::BadByteCode(_))));
        assert!(matches!(CompiledProgram::from_bytes(b"TJSB\x01{"), Err(VmError::BadByteCode(_))));
    }

    #[test]
    fn script_error_display_includes_line() {
        let e = ScriptError::at(4, VmError::Runtime("boom".into()));
        assert_eq!(e.to_string(), "line 4: boom");
        assert_eq!(ScriptError::from(VmError::StackOverflow(200)).line, None);
    }
}
