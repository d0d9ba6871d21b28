use std::collections::HashMap;

use super::*;
use crate::ast::{BinOp, Block, Expr, Literal, Program, SourceMap, Stmt, Target, UnaryOp};
use crate::bindings;
use crate::value::ops::field_component;

/// Registers per frame; 255 is reserved for `MULTI`.
pub(crate) const MAX_REGISTERS: usize = 250;

type CResult<T> = Result<T, CompileError>;

/// How many values an expression list must leave in consecutive registers.
#[derive(Clone, Copy)]
enum Want {
    Exactly(usize),
    /// Every value, expanding a trailing call to all of its results.
    All,
}

enum Step {
    Index(u8),
    Field(u8),
}

/// Compiles a parsed program into register byte code. `source` is the text the
/// program was parsed from and feeds the per-instruction line table.
pub fn compile(program: &Program, source: &str) -> Result<CompiledProgram, CompileError> {
    RegCompiler::new(source).compile_program(program)
}

// ── Register Compiler ────────────────────────────────────────────────

struct RegCompiler {
    map: SourceMap,
    chunks: Vec<Chunk>,
    current: Chunk,
    locals: Vec<(String, u8)>,
    next_reg: usize,
    max_reg: usize,
    /// Pending `break` jumps, one list per enclosing loop.
    loops: Vec<Vec<usize>>,
    functions: HashMap<String, usize>,
    globals: Vec<String>,
    global_slots: HashMap<String, u16>,
    natives: Vec<String>,
    native_slots: HashMap<String, u32>,
    line: u32,
}

impl RegCompiler {
    fn new(source: &str) -> Self {
        let mut compiler = RegCompiler {
            map: SourceMap::new(source),
            chunks: Vec::new(),
            current: Chunk::new("", 0),
            locals: Vec::new(),
            next_reg: 0,
            max_reg: 0,
            loops: Vec::new(),
            functions: HashMap::new(),
            globals: Vec::new(),
            global_slots: HashMap::new(),
            natives: Vec::new(),
            native_slots: HashMap::new(),
            line: 0,
        };
        for name in reserved_globals() {
            let slot = compiler.globals.len() as u16;
            compiler.global_slots.insert(name.clone(), slot);
            compiler.globals.push(name);
        }
        compiler
    }

    fn compile_program(mut self, program: &Program) -> CResult<CompiledProgram> {
        for (i, f) in program.functions.iter().enumerate() {
            self.functions.entry(f.name.clone()).or_insert(i);
        }

        for f in &program.functions {
            if f.params.len() > MAX_REGISTERS {
                return Err(CompileError::TooManyRegisters { function: f.name.clone() });
            }
            self.begin_chunk(&f.name, f.params.len());
            for (i, p) in f.params.iter().enumerate() {
                self.add_local(p, i as u8);
            }
            self.line = self.map.line(f.span.start);
            self.compile_block(&f.body)?;
            self.line = self.map.line(f.span.end.saturating_sub(1));
            self.emit_abc(OP_RET, 0, 0, 0);
            self.finish_chunk();
        }

        self.begin_chunk("", 0);
        self.compile_block(&program.body)?;
        self.emit_abc(OP_RET, 0, 0, 0);
        self.finish_chunk();

        Ok(CompiledProgram {
            top_level: self.chunks.len() - 1,
            chunks: self.chunks,
            globals: self.globals,
            natives: self.natives,
        })
    }

    fn begin_chunk(&mut self, name: &str, params: usize) {
        self.current = Chunk::new(name, params as u8);
        self.locals.clear();
        self.loops.clear();
        self.next_reg = params;
        self.max_reg = params;
    }

    fn finish_chunk(&mut self) {
        self.current.reg_count = self.max_reg as u8;
        let chunk = std::mem::replace(&mut self.current, Chunk::new("", 0));
        self.chunks.push(chunk);
    }

    fn too_many_registers(&self) -> CompileError {
        CompileError::TooManyRegisters { function: self.chunk_label() }
    }

    fn chunk_label(&self) -> String {
        if self.current.name.is_empty() {
            "<top level>".to_string()
        } else {
            self.current.name.clone()
        }
    }

    fn alloc_reg(&mut self) -> CResult<u8> {
        self.reserve(1)
    }

    /// Reserves `n` consecutive registers and returns the first.
    fn reserve(&mut self, n: usize) -> CResult<u8> {
        let r = self.next_reg;
        if r + n > MAX_REGISTERS {
            return Err(self.too_many_registers());
        }
        self.next_reg += n;
        self.max_reg = self.max_reg.max(self.next_reg);
        Ok(r as u8)
    }

    fn resolve_local(&self, name: &str) -> Option<u8> {
        self.locals.iter().rev().find(|(n, _)| n == name).map(|(_, r)| *r)
    }

    fn add_local(&mut self, name: &str, reg: u8) {
        self.locals.push((name.to_string(), reg));
    }

    fn global_slot(&mut self, name: &str) -> CResult<u16> {
        if let Some(&slot) = self.global_slots.get(name) {
            return Ok(slot);
        }
        let slot = u16::try_from(self.globals.len()).map_err(|_| CompileError::TooManyGlobals)?;
        self.global_slots.insert(name.to_string(), slot);
        self.globals.push(name.to_string());
        Ok(slot)
    }

    fn callee(&mut self, name: &str) -> CResult<u32> {
        if let Some(&index) = self.functions.get(name) {
            return Ok(CALLEE_USER << 24 | index as u32);
        }
        if let Some(&index) = self.native_slots.get(name) {
            return Ok(CALLEE_NATIVE << 24 | index);
        }
        if bindings::lookup(name).is_none() {
            return Err(CompileError::UndefinedFunction { name: name.to_string() });
        }
        let index = self.natives.len() as u32;
        self.native_slots.insert(name.to_string(), index);
        self.natives.push(name.to_string());
        Ok(CALLEE_NATIVE << 24 | index)
    }

    fn constant(&mut self, value: Value) -> CResult<u16> {
        self.current
            .add_const(value)
            .ok_or_else(|| CompileError::TooManyConstants { function: self.chunk_label() })
    }

    fn component(&self, field: &str) -> CResult<u8> {
        field_component(field).ok_or_else(|| CompileError::UnknownField { field: field.to_string() })
    }

    // ── Emission ─────────────────────────────────────────────────────

    fn emit_abc(&mut self, op: u8, a: u8, b: u8, c: u8) -> usize {
        self.current.emit(encode_abc(op, a, b, c), self.line)
    }

    fn emit_abx(&mut self, op: u8, a: u8, bx: u16) -> usize {
        self.current.emit(encode_abx(op, a, bx), self.line)
    }

    fn emit_jump(&mut self, op: u8, reg: u8) -> usize {
        self.emit_abx(op, reg, 0)
    }

    fn emit_jump_to(&mut self, op: u8, reg: u8, target: usize) -> CResult<()> {
        let pos = self.current.code.len();
        let offset = i16::try_from(target as i64 - pos as i64 - 1)
            .map_err(|_| CompileError::JumpTooFar { function: self.chunk_label() })?;
        self.emit_abx(op, reg, offset as u16);
        Ok(())
    }

    fn patch(&mut self, jump: usize) -> CResult<()> {
        if self.current.patch_jump(jump) {
            Ok(())
        } else {
            Err(CompileError::JumpTooFar { function: self.chunk_label() })
        }
    }

    // ── Statements ───────────────────────────────────────────────────

    fn compile_block(&mut self, block: &Block) -> CResult<()> {
        let saved_locals = self.locals.len();
        let saved_reg = self.next_reg;
        for stmt in block {
            self.line = self.map.line(stmt.span.start);
            self.compile_stmt(&stmt.node)?;
        }
        self.locals.truncate(saved_locals);
        self.next_reg = saved_reg;
        Ok(())
    }

    fn compile_stmt(&mut self, stmt: &Stmt) -> CResult<()> {
        let base = self.next_reg;
        match stmt {
            Stmt::Local { names, values } => {
                self.compile_expr_list(values, Want::Exactly(names.len()))?;
                for (i, name) in names.iter().enumerate() {
                    self.add_local(name, (base + i) as u8);
                }
                self.next_reg = base + names.len();
                return Ok(());
            }

            Stmt::Assign { targets, values } => {
                self.compile_expr_list(values, Want::Exactly(targets.len()))?;
                for (i, target) in targets.iter().enumerate() {
                    self.assign(target, (base + i) as u8)?;
                }
            }

            Stmt::Call(expr) => {
                if let Expr::Call { function, args, span } = expr {
                    self.compile_call(function, args, span.start, Some(0))?;
                } else {
                    self.expr_to_reg(expr)?;
                }
            }

            Stmt::If { branches, otherwise } => {
                let mut end_jumps = Vec::new();
                for (i, (condition, body)) in branches.iter().enumerate() {
                    let cond = self.expr_to_reg(condition)?;
                    let skip = self.emit_jump(OP_JMPF, cond);
                    self.next_reg = base;
                    self.compile_block(body)?;
                    let last = i + 1 == branches.len() && otherwise.is_none();
                    if !last {
                        end_jumps.push(self.emit_jump(OP_JMP, 0));
                    }
                    self.patch(skip)?;
                }
                if let Some(body) = otherwise {
                    self.compile_block(body)?;
                }
                for jump in end_jumps {
                    self.patch(jump)?;
                }
            }

            Stmt::While { condition, body } => {
                let start = self.current.code.len();
                let line = self.line;
                let cond = self.expr_to_reg(condition)?;
                let exit = self.emit_jump(OP_JMPF, cond);
                self.next_reg = base;
                self.loops.push(Vec::new());
                self.compile_block(body)?;
                self.line = line;
                self.emit_jump_to(OP_JMP, 0, start)?;
                self.patch(exit)?;
                self.patch_breaks()?;
            }

            Stmt::NumericFor { var, start, limit, step, body } => {
                let a = self.reserve(4)?;
                let line = self.line;
                self.compile_into(start, a)?;
                self.compile_into(limit, a + 1)?;
                match step {
                    Some(step) => self.compile_into(step, a + 2)?,
                    None => {
                        let one = self.constant(Value::Number(1.0))?;
                        self.emit_abx(OP_LOADK, a + 2, one);
                    }
                }
                let prep = self.emit_jump(OP_FORPREP, a);
                let body_start = self.current.code.len();
                self.loops.push(Vec::new());
                let saved_locals = self.locals.len();
                self.add_local(var, a + 3);
                self.compile_block(body)?;
                self.locals.truncate(saved_locals);
                self.line = line;
                self.emit_jump_to(OP_FORLOOP, a, body_start)?;
                self.patch(prep)?;
                self.patch_breaks()?;
            }

            Stmt::Do(body) => self.compile_block(body)?,

            Stmt::Break => {
                let jump = self.emit_jump(OP_JMP, 0);
                self.loops.last_mut().ok_or(CompileError::BreakOutsideLoop)?.push(jump);
            }

            Stmt::Return(values) => {
                let count = self.compile_expr_list(values, Want::All)?;
                self.emit_abc(OP_RET, base as u8, count, 0);
            }
        }
        self.next_reg = base;
        Ok(())
    }

    fn patch_breaks(&mut self) -> CResult<()> {
        for jump in self.loops.pop().unwrap_or_default() {
            self.patch(jump)?;
        }
        Ok(())
    }

    /// Stores register `value` into an assignment target.
    fn assign(&mut self, target: &Target, value: u8) -> CResult<()> {
        match target {
            Target::Name(name) => {
                match self.resolve_local(name) {
                    Some(reg) => {
                        self.emit_abc(OP_MOVE, reg, value, 0);
                    }
                    None => {
                        let slot = self.global_slot(name)?;
                        self.emit_abx(OP_SETGLOBAL, value, slot);
                    }
                }
                Ok(())
            }
            Target::Index { object, index } => {
                let key = self.expr_to_reg(index)?;
                self.update_place(object, Step::Index(key), value)
            }
            Target::Field { object, field } => {
                let component = self.component(field)?;
                self.update_place(object, Step::Field(component), value)
            }
        }
    }

    /// Writes `value` into `place[step]` and stores the modified container back
    /// into `place`, so nested updates like `a[i].x = v` reach the variable.
    fn update_place(&mut self, place: &Expr, step: Step, value: u8) -> CResult<()> {
        match place {
            Expr::Ref(name) => {
                if let Some(reg) = self.resolve_local(name) {
                    self.emit_step_set(reg, step, value);
                    return Ok(());
                }
                let slot = self.global_slot(name)?;
                let container = self.alloc_reg()?;
                self.emit_abx(OP_GETGLOBAL, container, slot);
                self.emit_step_set(container, step, value);
                self.emit_abx(OP_SETGLOBAL, container, slot);
                Ok(())
            }
            Expr::Index { object, index } => {
                let key = self.expr_to_reg(index)?;
                let outer = self.expr_to_reg(object)?;
                let container = self.alloc_reg()?;
                self.emit_abc(OP_GETINDEX, container, outer, key);
                self.emit_step_set(container, step, value);
                self.update_place(object, Step::Index(key), container)
            }
            Expr::Field { object, field } => {
                let component = self.component(field)?;
                let outer = self.expr_to_reg(object)?;
                let container = self.alloc_reg()?;
                self.emit_abc(OP_GETFIELD, container, outer, component);
                self.emit_step_set(container, step, value);
                self.update_place(object, Step::Field(component), container)
            }
            other => {
                // Temporaries like call results have nowhere to write back to.
                let container = self.expr_to_reg(other)?;
                self.emit_step_set(container, step, value);
                Ok(())
            }
        }
    }

    fn emit_step_set(&mut self, container: u8, step: Step, value: u8) {
        match step {
            Step::Index(key) => self.emit_abc(OP_SETINDEX, container, key, value),
            Step::Field(component) => self.emit_abc(OP_SETFIELD, container, component, value),
        };
    }

    // ── Expressions ──────────────────────────────────────────────────

    /// Evaluates `exprs` into consecutive registers starting at `next_reg` and
    /// returns the count operand for the instruction consuming them.
    fn compile_expr_list(&mut self, exprs: &[Expr], want: Want) -> CResult<u8> {
        let base = self.next_reg;
        let mut expanded = false;
        for (i, expr) in exprs.iter().enumerate() {
            let last = i + 1 == exprs.len();
            match expr {
                Expr::Call { function, args, span } if last => {
                    let results = match want {
                        Want::Exactly(n) => Some(n.saturating_sub(i)),
                        Want::All => None,
                    };
                    self.compile_call(function, args, span.start, results)?;
                    expanded = results.is_none();
                }
                _ => {
                    let r = self.alloc_reg()?;
                    self.compile_into(expr, r)?;
                }
            }
        }
        match want {
            Want::Exactly(n) => {
                let produced = self.next_reg - base;
                if produced < n {
                    let missing = n - produced;
                    let first = self.reserve(missing)?;
                    self.emit_abc(OP_LOADNIL, first, missing as u8, 0);
                }
                self.next_reg = base + n;
                if base + n > MAX_REGISTERS {
                    return Err(self.too_many_registers());
                }
                self.max_reg = self.max_reg.max(self.next_reg);
                Ok(n as u8)
            }
            Want::All if expanded => Ok(MULTI),
            Want::All => Ok(exprs.len() as u8),
        }
    }

    /// Emits a call with its arguments at `next_reg`. `results` is the number of
    /// values to keep there afterwards, or `None` to keep all of them.
    fn compile_call(&mut self, function: &str, args: &[Expr], at: usize, results: Option<usize>) -> CResult<u8> {
        let saved_line = self.line;
        self.line = self.map.line(at).max(saved_line);
        let base = self.next_reg;
        let nargs = self.compile_expr_list(args, Want::All)?;
        let callee = self.callee(function)?;
        let wanted = match results {
            Some(n) if n >= MAX_REGISTERS => return Err(self.too_many_registers()),
            Some(n) => n as u8,
            None => MULTI,
        };
        // Results land at `base` even when the call has no arguments.
        if base + 1 > MAX_REGISTERS {
            return Err(self.too_many_registers());
        }
        self.max_reg = self.max_reg.max(base + 1);
        self.emit_abc(OP_CALL, base as u8, nargs, wanted);
        self.current.emit(callee, self.line);
        self.next_reg = base;
        if let Some(n) = results {
            self.reserve(n)?;
        }
        self.line = saved_line;
        Ok(base as u8)
    }

    /// Returns a register holding the expression's value; locals are used in place.
    fn expr_to_reg(&mut self, expr: &Expr) -> CResult<u8> {
        if let Expr::Ref(name) = expr {
            if let Some(reg) = self.resolve_local(name) {
                return Ok(reg);
            }
        }
        let r = self.alloc_reg()?;
        self.compile_into(expr, r)?;
        Ok(r)
    }

    /// Evaluates `expr` into `dst`, releasing any temporaries it needed.
    fn compile_into(&mut self, expr: &Expr, dst: u8) -> CResult<()> {
        let saved = self.next_reg;
        match expr {
            Expr::Literal(Literal::Nil) => {
                self.emit_abc(OP_LOADNIL, dst, 1, 0);
            }
            Expr::Literal(Literal::Bool(b)) => {
                self.emit_abc(OP_LOADBOOL, dst, *b as u8, 0);
            }
            Expr::Literal(Literal::Number(n)) => {
                let k = self.constant(Value::Number(*n))?;
                self.emit_abx(OP_LOADK, dst, k);
            }
            Expr::Literal(Literal::Str(s)) => {
                let k = self.constant(Value::Str(s.clone()))?;
                self.emit_abx(OP_LOADK, dst, k);
            }
            Expr::Ref(name) => match self.resolve_local(name) {
                Some(reg) if reg == dst => {}
                Some(reg) => {
                    self.emit_abc(OP_MOVE, dst, reg, 0);
                }
                None => {
                    let slot = self.global_slot(name)?;
                    self.emit_abx(OP_GETGLOBAL, dst, slot);
                }
            },
            Expr::Field { object, field } => {
                let component = self.component(field)?;
                let obj = self.expr_to_reg(object)?;
                self.emit_abc(OP_GETFIELD, dst, obj, component);
            }
            Expr::Index { object, index } => {
                let obj = self.expr_to_reg(object)?;
                let key = self.expr_to_reg(index)?;
                self.emit_abc(OP_GETINDEX, dst, obj, key);
            }
            Expr::Call { function, args, span } => {
                let base = self.compile_call(function, args, span.start, Some(1))?;
                if base != dst {
                    self.emit_abc(OP_MOVE, dst, base, 0);
                }
            }
            Expr::BinOp { op: op @ (BinOp::And | BinOp::Or), left, right } => {
                self.compile_into(left, dst)?;
                let jump = match op {
                    BinOp::And => self.emit_jump(OP_JMPF, dst),
                    _ => self.emit_jump(OP_JMPT, dst),
                };
                self.compile_into(right, dst)?;
                self.patch(jump)?;
            }
            Expr::BinOp { op, left, right } => {
                let l = self.expr_to_reg(left)?;
                let r = self.expr_to_reg(right)?;
                // `a > b` is `b < a`, `a >= b` is `b <= a`
                let (opcode, b, c) = match op {
                    BinOp::Add => (OP_ADD, l, r),
                    BinOp::Subtract => (OP_SUB, l, r),
                    BinOp::Multiply => (OP_MUL, l, r),
                    BinOp::Divide => (OP_DIV, l, r),
                    BinOp::Modulo => (OP_MOD, l, r),
                    BinOp::Power => (OP_POW, l, r),
                    BinOp::Concat => (OP_CONCAT, l, r),
                    BinOp::Equals => (OP_EQ, l, r),
                    BinOp::NotEquals => (OP_NE, l, r),
                    BinOp::LessThan => (OP_LT, l, r),
                    BinOp::LessOrEqual => (OP_LE, l, r),
                    BinOp::GreaterThan => (OP_LT, r, l),
                    BinOp::GreaterOrEqual => (OP_LE, r, l),
                    BinOp::And | BinOp::Or => unreachable!("short-circuit operators handled above"),
                };
                self.emit_abc(opcode, dst, b, c);
            }
            Expr::UnaryOp { op, operand } => {
                let r = self.expr_to_reg(operand)?;
                let opcode = match op {
                    UnaryOp::Not => OP_NOT,
                    UnaryOp::Negate => OP_NEG,
                    UnaryOp::Length => OP_LEN,
                };
                self.emit_abc(opcode, dst, r, 0);
            }
            Expr::List(items) => {
                let base = self.next_reg as u8;
                let count = self.compile_expr_list(items, Want::All)?;
                self.emit_abc(OP_NEWLIST, dst, base, count);
            }
        }
        self.next_reg = saved;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{lexer, parser};

    fn compile_src(source: &str) -> CompiledProgram {
        let tokens = lexer::lex(source).unwrap();
        let (program, errors) = parser::parse(tokens);
        assert!(errors.is_empty(), "parse errors: {errors:?}");
        compile(&program, source).unwrap()
    }

    fn ops(chunk: &Chunk) -> Vec<u8> {
        let mut out = Vec::new();
        let mut ip = 0;
        while ip < chunk.code.len() {
            let op = decode_op(chunk.code[ip]);
            out.push(op);
            ip += if op == OP_CALL { 2 } else { 1 };
        }
        out
    }

    #[test]
    fn top_level_chunk_is_last() {
        let p = compile_src("x = 1\nfunction main() return x end");
        assert_eq!(p.top_level, 1);
        assert_eq!(p.chunks[0].name, "main");
        assert_eq!(p.function("main"), Some(0));
        assert_eq!(p.function("missing"), None);
    }

    #[test]
    fn reserved_globals_come_first() {
        let p = compile_src("total = 0");
        assert_eq!(p.globals[0], "_VERSION");
        assert_eq!(p.globals[1], "arg1");
        assert_eq!(p.globals.last().map(String::as_str), Some("total"));
    }

    #[test]
    fn greater_than_swaps_operands() {
        let p = compile_src("function main() local a, b = 1, 2 return a > b end");
        let chunk = &p.chunks[0];
        let lt = chunk.code.iter().find(|i| decode_op(**i) == OP_LT).copied().unwrap();
        // a lives in r0, b in r1
        assert_eq!((decode_b(lt), decode_c(lt)), (1, 0));
    }

    #[test]
    fn and_or_short_circuit() {
        let p = compile_src("function main() return nil and f() end\nfunction f() return 1 end");
        assert!(ops(&p.chunks[0]).contains(&OP_JMPF));
    }

    #[test]
    fn trailing_call_returns_all_results() {
        let p = compile_src("function main() return get_residue_transform(1) end");
        let ret = p.chunks[0].code.iter().rev().nth(1).copied().unwrap();
        assert_eq!(decode_op(ret), OP_RET);
        assert_eq!(decode_b(ret), MULTI);
    }

    #[test]
    fn natives_are_interned_once() {
        let p = compile_src("function main() return abs(1) + abs(2) + sqrt(4) end");
        assert_eq!(p.natives, vec!["abs".to_string(), "sqrt".to_string()]);
    }

    #[test]
    fn unknown_function_is_an_error() {
        let source = "function main() return nosuch(1) end";
        let (program, _) = parser::parse(lexer::lex(source).unwrap());
        let err = compile(&program, source).unwrap_err();
        assert_eq!(err, CompileError::UndefinedFunction { name: "nosuch".into() });
    }

    #[test]
    fn lines_follow_statements() {
        let p = compile_src("function main()\n  local a = 1\n\n  return a\nend");
        let chunk = &p.chunks[0];
        assert_eq!(chunk.lines[0], 2);
        assert!(chunk.lines.contains(&4));
    }

    #[test]
    fn numeric_for_reserves_four_registers() {
        let p = compile_src("function main() local s = 0 for i = 1, 3 do s = s + i end return s end");
        let chunk = &p.chunks[0];
        assert!(chunk.reg_count >= 5);
        let code = ops(chunk);
        assert!(code.contains(&OP_FORPREP));
        assert!(code.contains(&OP_FORLOOP));
    }

    #[test]
    fn compiled_program_survives_serialization() {
        let p = compile_src("function main() local v = vec3(1, 2, 3) v.x = 4 return v.x end");
        let bytes = p.to_bytes().unwrap();
        assert_eq!(CompiledProgram::from_bytes(&bytes).unwrap(), p);
        assert!(p.disassemble().contains("SETFIELD"));
    }
}
