use super::*;
use crate::bindings::{self, Binding, CallContext};
use crate::value::ops::{self, Arith};

/// Nested user calls allowed before a stack overflow is raised.
pub const MAX_CALL_DEPTH: usize = 200;

struct CallFrame {
    chunk: usize,
    ip: usize,
    base: usize,
    /// Absolute stack slot the caller wants results written to.
    ret: usize,
    want: u8,
}

/// A loaded program: byte code, resolved bindings and the global slots.
pub struct Machine {
    program: CompiledProgram,
    natives: Vec<&'static Binding>,
    globals: Vec<Value>,
    stack: Vec<Value>,
    frames: Vec<CallFrame>,
}

impl Machine {
    pub fn new(program: CompiledProgram) -> VmResult<Self> {
        let natives = program
            .natives
            .iter()
            .map(|name| {
                bindings::lookup(name).ok_or_else(|| VmError::UndefinedFunction { name: name.clone() })
            })
            .collect::<VmResult<Vec<_>>>()?;
        let mut globals = vec![Value::Nil; program.globals.len()];
        if let Some(slot) = program.globals.iter().position(|g| g == VERSION_GLOBAL) {
            globals[slot] = Value::Str(format!("trajscript {}", env!("CARGO_PKG_VERSION")));
        }
        Ok(Machine { program, natives, globals, stack: Vec::new(), frames: Vec::new() })
    }

    pub fn program(&self) -> &CompiledProgram {
        &self.program
    }

    pub fn has_function(&self, name: &str) -> bool {
        self.program.function(name).is_some()
    }

    fn slot(&self, name: &str) -> Option<usize> {
        self.program.globals.iter().position(|g| g == name)
    }

    pub fn global(&self, name: &str) -> Option<&Value> {
        self.slot(name).map(|i| &self.globals[i])
    }

    /// Returns false when the program never mentions `name`.
    pub fn set_global(&mut self, name: &str, value: Value) -> bool {
        match self.slot(name) {
            Some(i) => {
                self.globals[i] = value;
                true
            }
            None => false,
        }
    }

    /// Every global slot with its current value, in slot order.
    pub fn globals(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.program.globals.iter().map(String::as_str).zip(self.globals.iter())
    }

    /// Runs the top-level statements.
    pub fn run_top_level(&mut self, ctx: &mut CallContext<'_>) -> Result<(), ScriptError> {
        self.run(self.program.top_level, Vec::new(), ctx).map(|_| ())
    }

    pub fn call(&mut self, name: &str, args: Vec<Value>, ctx: &mut CallContext<'_>) -> Result<Vec<Value>, ScriptError> {
        let chunk = self
            .program
            .function(name)
            .ok_or_else(|| VmError::UndefinedFunction { name: name.to_string() })?;
        self.run(chunk, args, ctx)
    }

    fn run(&mut self, chunk: usize, args: Vec<Value>, ctx: &mut CallContext<'_>) -> Result<Vec<Value>, ScriptError> {
        self.stack.clear();
        self.frames.clear();
        let c = &self.program.chunks[chunk];
        let (params, regs) = (c.param_count as usize, c.reg_count as usize);
        let mut args = args.into_iter();
        for _ in 0..params {
            self.stack.push(args.next().unwrap_or_default());
        }
        self.stack.resize(regs, Value::Nil);
        self.frames.push(CallFrame { chunk, ip: 0, base: 0, ret: 0, want: MULTI });
        let result = self.execute(ctx);
        self.stack.clear();
        self.frames.clear();
        result
    }

    fn execute(&mut self, ctx: &mut CallContext<'_>) -> Result<Vec<Value>, ScriptError> {
        let Machine { program, natives, globals, stack, frames } = self;
        let Some(frame) = frames.last() else {
            return Ok(Vec::new());
        };
        let mut ci = frame.chunk;
        let mut ip = frame.ip;
        let mut base = frame.base;
        // End of the values produced by the last multi-result call.
        let mut top = base;

        loop {
            let chunk = &program.chunks[ci];

            macro_rules! fail {
                ($err:expr) => {
                    return Err(ScriptError::at(chunk.line_at(ip.saturating_sub(1)), $err))
                };
            }
            macro_rules! check {
                ($e:expr) => {
                    match $e {
                        Ok(v) => v,
                        Err(e) => fail!(e),
                    }
                };
            }

            let Some(&inst) = chunk.code.get(ip) else {
                fail!(VmError::BadByteCode(format!("ran off the end of '{}'", chunk.name)));
            };
            ip += 1;
            let a = decode_a(inst) as usize;
            let b = decode_b(inst) as usize;
            let c = decode_c(inst) as usize;

            match decode_op(inst) {
                OP_MOVE => stack[base + a] = stack[base + b].clone(),
                OP_LOADK => stack[base + a] = chunk.constants[decode_bx(inst) as usize].clone(),
                OP_LOADNIL => stack[base + a..base + a + b].fill(Value::Nil),
                OP_LOADBOOL => stack[base + a] = Value::Bool(b != 0),
                OP_GETGLOBAL => stack[base + a] = globals[decode_bx(inst) as usize].clone(),
                OP_SETGLOBAL => globals[decode_bx(inst) as usize] = stack[base + a].clone(),
                op @ OP_ADD..=OP_POW => {
                    let arith = match op {
                        OP_ADD => Arith::Add,
                        OP_SUB => Arith::Sub,
                        OP_MUL => Arith::Mul,
                        OP_DIV => Arith::Div,
                        OP_MOD => Arith::Mod,
                        _ => Arith::Pow,
                    };
                    let v = check!(ops::arith(arith, &stack[base + b], &stack[base + c]));
                    stack[base + a] = v;
                }
                OP_CONCAT => {
                    let v = check!(ops::concat(&stack[base + b], &stack[base + c]));
                    stack[base + a] = v;
                }
                OP_EQ => stack[base + a] = Value::Bool(stack[base + b] == stack[base + c]),
                OP_NE => stack[base + a] = Value::Bool(stack[base + b] != stack[base + c]),
                OP_LT => {
                    let v = check!(ops::less_than(&stack[base + b], &stack[base + c]));
                    stack[base + a] = Value::Bool(v);
                }
                OP_LE => {
                    let v = check!(ops::less_equal(&stack[base + b], &stack[base + c]));
                    stack[base + a] = Value::Bool(v);
                }
                OP_NOT => stack[base + a] = Value::Bool(!stack[base + b].is_truthy()),
                OP_NEG => {
                    let v = check!(ops::negate(&stack[base + b]));
                    stack[base + a] = v;
                }
                OP_LEN => {
                    let v = check!(ops::length(&stack[base + b]));
                    stack[base + a] = v;
                }
                OP_GETINDEX => {
                    let v = check!(ops::get_index(&stack[base + b], &stack[base + c]));
                    stack[base + a] = v;
                }
                OP_SETINDEX => {
                    let key = stack[base + b].clone();
                    let value = stack[base + c].clone();
                    check!(ops::set_index(&mut stack[base + a], &key, value));
                }
                OP_GETFIELD => {
                    let v = check!(ops::get_field(&stack[base + b], c as u8));
                    stack[base + a] = v;
                }
                OP_SETFIELD => {
                    let value = stack[base + c].clone();
                    check!(ops::set_field(&mut stack[base + a], b as u8, value));
                }
                OP_NEWLIST => {
                    let start = base + b;
                    let end = if c == MULTI as usize { top.min(stack.len()) } else { start + c };
                    let items = stack.get(start..end).map(<[Value]>::to_vec).unwrap_or_default();
                    stack[base + a] = Value::List(items);
                }
                OP_JMP => ip = offset(ip, inst),
                OP_JMPF => {
                    if !stack[base + a].is_truthy() {
                        ip = offset(ip, inst);
                    }
                }
                OP_JMPT => {
                    if stack[base + a].is_truthy() {
                        ip = offset(ip, inst);
                    }
                }
                OP_FORPREP => {
                    let r = base + a;
                    let Some(start) = stack[r].as_number() else {
                        fail!(VmError::Runtime("'for' initial value must be a number".into()));
                    };
                    let Some(limit) = stack[r + 1].as_number() else {
                        fail!(VmError::Runtime("'for' limit must be a number".into()));
                    };
                    let Some(step) = stack[r + 2].as_number() else {
                        fail!(VmError::Runtime("'for' step must be a number".into()));
                    };
                    if step == 0.0 {
                        fail!(VmError::Runtime("'for' step is zero".into()));
                    }
                    if in_range(start, limit, step) {
                        stack[r + 3] = Value::Number(start);
                    } else {
                        ip = offset(ip, inst);
                    }
                }
                OP_FORLOOP => {
                    let r = base + a;
                    let (Some(counter), Some(limit), Some(step)) =
                        (stack[r].as_number(), stack[r + 1].as_number(), stack[r + 2].as_number())
                    else {
                        fail!(VmError::BadByteCode("corrupt loop state".into()));
                    };
                    let next = counter + step;
                    stack[r] = Value::Number(next);
                    if in_range(next, limit, step) {
                        stack[r + 3] = Value::Number(next);
                        ip = offset(ip, inst);
                    }
                }
                OP_CALL => {
                    let callee = chunk.code[ip];
                    ip += 1;
                    let start = base + a;
                    let end = if b == MULTI as usize { top.min(stack.len()).max(start) } else { start + b };
                    let index = (callee & 0xFF_FFFF) as usize;

                    if callee >> 24 == CALLEE_NATIVE {
                        let binding = natives[index];
                        ctx.line = chunk.line_at(ip - 2);
                        let results = check!(bindings::invoke(binding, ctx, &stack[start..end]));
                        top = place_results(stack, start, c as u8, results.len(), results);
                        continue;
                    }

                    if frames.len() >= MAX_CALL_DEPTH {
                        fail!(VmError::StackOverflow(MAX_CALL_DEPTH));
                    }
                    if let Some(frame) = frames.last_mut() {
                        frame.ip = ip;
                    }
                    let target = &program.chunks[index];
                    let new_base = stack.len();
                    for i in 0..target.param_count as usize {
                        let arg = if start + i < end { stack[start + i].clone() } else { Value::Nil };
                        stack.push(arg);
                    }
                    stack.resize(new_base + target.reg_count as usize, Value::Nil);
                    frames.push(CallFrame { chunk: index, ip: 0, base: new_base, ret: start, want: c as u8 });
                    ci = index;
                    ip = 0;
                    base = new_base;
                    top = base;
                }
                OP_RET => {
                    let start = base + a;
                    let end = if b == MULTI as usize { top.min(stack.len()).max(start) } else { start + b };
                    let results: Vec<Value> = stack.drain(start..end).collect();
                    let Some(finished) = frames.pop() else {
                        return Ok(results);
                    };
                    let Some(caller) = frames.last() else {
                        return Ok(results);
                    };
                    stack.truncate(base);
                    ci = caller.chunk;
                    ip = caller.ip;
                    base = caller.base;
                    top = place_results(stack, finished.ret, finished.want, results.len(), results);
                }
                op => fail!(VmError::BadByteCode(format!("unknown opcode {op}"))),
            }
        }
    }
}

fn offset(ip: usize, inst: u32) -> usize {
    (ip as i64 + decode_sbx(inst) as i64) as usize
}

fn in_range(value: f64, limit: f64, step: f64) -> bool {
    if step > 0.0 { value <= limit } else { value >= limit }
}

/// Writes call results at `start`, padding with nil or truncating to `want`.
/// Returns the slot after the last value written.
fn place_results(
    stack: &mut Vec<Value>,
    start: usize,
    want: u8,
    count: usize,
    results: impl IntoIterator<Item = Value>,
) -> usize {
    let n = if want == MULTI { count } else { want as usize };
    if stack.len() < start + n {
        stack.resize(start + n, Value::Nil);
    }
    let mut results = results.into_iter();
    for slot in &mut stack[start..start + n] {
        *slot = results.next().unwrap_or_default();
    }
    start + n
}
