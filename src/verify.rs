use std::collections::{HashMap, HashSet};

use crate::ast::*;
use crate::bindings;
use crate::value::ops::field_component;

/// Functions the host calls by name; they take no arguments.
pub const ENTRY_POINTS: [&str; 2] = ["main", "reduce"];

pub(crate) const TOP_LEVEL: &str = "<top level>";

#[derive(Debug, Clone, PartialEq)]
pub struct VerifyError {
    pub function: String,
    pub message: String,
    pub hint: Option<String>,
    pub span: Span,
}

impl std::fmt::Display for VerifyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "verify: {} in '{}'", self.message, self.function)?;
        if let Some(hint) = &self.hint {
            write!(f, "\n  hint: {hint}")?;
        }
        Ok(())
    }
}

fn closest_match<'a>(name: &str, candidates: impl Iterator<Item = &'a str>) -> Option<String> {
    let mut best: Option<(&str, usize)> = None;
    for candidate in candidates {
        let dist = levenshtein(name, candidate);
        if dist <= 3 && best.is_none_or(|(_, d)| dist < d) {
            best = Some((candidate, dist));
        }
    }
    best.map(|(s, _)| s.to_string())
}

/// Edit distance, keeping one row of the table at a time.
fn levenshtein(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut row: Vec<usize> = (0..=b.len()).collect();
    for (i, ca) in a.chars().enumerate() {
        let mut diagonal = row[0];
        row[0] = i + 1;
        for (j, &cb) in b.iter().enumerate() {
            let substitute = diagonal + usize::from(ca != cb);
            diagonal = row[j + 1];
            row[j + 1] = substitute.min(row[j] + 1).min(diagonal + 1);
        }
    }
    row[b.len()]
}

struct VerifyContext<'p> {
    /// User function name to parameter count.
    functions: HashMap<&'p str, usize>,
    /// Every name declared `local` in the top-level chunk.
    top_locals: HashSet<&'p str>,
    scopes: Vec<Vec<&'p str>>,
    loop_depth: usize,
    function: &'p str,
    span: Span,
    errors: Vec<VerifyError>,
}

impl<'p> VerifyContext<'p> {
    fn new() -> Self {
        Self {
            functions: HashMap::new(),
            top_locals: HashSet::new(),
            scopes: Vec::new(),
            loop_depth: 0,
            function: TOP_LEVEL,
            span: Span::UNKNOWN,
            errors: Vec::new(),
        }
    }

    fn err(&mut self, message: String, hint: Option<String>) {
        self.err_at(self.span, message, hint);
    }

    fn err_at(&mut self, span: Span, message: String, hint: Option<String>) {
        self.errors.push(VerifyError { function: self.function.to_string(), message, hint, span });
    }

    /// Phase 1: function table, duplicates, entry point shapes.
    fn collect_declarations(&mut self, program: &'p Program) {
        for decl in &program.functions {
            self.span = decl.span;
            self.function = &decl.name;
            if self.functions.contains_key(decl.name.as_str()) {
                self.err(format!("duplicate function definition '{}'", decl.name), None);
                continue;
            }
            if bindings::lookup(&decl.name).is_some() {
                self.err(
                    format!("function '{}' has the name of a built-in function", decl.name),
                    Some("rename the function".to_string()),
                );
            }
            if ENTRY_POINTS.contains(&decl.name.as_str()) && !decl.params.is_empty() {
                self.err(format!("entry function '{}' must not take parameters", decl.name), None);
            }
            self.functions.insert(&decl.name, decl.params.len());
        }
        self.function = TOP_LEVEL;
        collect_locals(&program.body, &mut self.top_locals);
    }

    /// Phase 2: function bodies, then the top-level chunk.
    fn verify_bodies(&mut self, program: &'p Program) {
        for decl in &program.functions {
            self.function = &decl.name;
            self.scopes = vec![decl.params.iter().map(String::as_str).collect()];
            self.loop_depth = 0;
            self.verify_block(&decl.body);
        }
        self.function = TOP_LEVEL;
        self.scopes = vec![Vec::new()];
        self.loop_depth = 0;
        self.verify_block(&program.body);
    }

    fn in_function(&self) -> bool {
        self.function != TOP_LEVEL
    }

    fn declare(&mut self, name: &'p str) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.push(name);
        }
    }

    fn is_local(&self, name: &str) -> bool {
        self.scopes.iter().any(|s| s.contains(&name))
    }

    /// A name that is neither a local here nor a global: a top-level local
    /// read from inside a function.
    fn check_name(&mut self, name: &str) {
        if self.in_function() && !self.is_local(name) && self.top_locals.contains(name) {
            self.err(
                format!("'{name}' is a local of the top-level chunk and is not visible here"),
                Some(format!("declare '{name}' without 'local' to make it a global")),
            );
        }
    }

    fn verify_block(&mut self, block: &'p Block) {
        self.scopes.push(Vec::new());
        for stmt in block {
            self.span = stmt.span;
            self.verify_stmt(&stmt.node);
        }
        self.scopes.pop();
    }

    fn verify_stmt(&mut self, stmt: &'p Stmt) {
        match stmt {
            Stmt::Local { names, values } => {
                self.verify_exprs(values);
                for name in names {
                    self.declare(name);
                }
            }
            Stmt::Assign { targets, values } => {
                self.verify_exprs(values);
                for target in targets {
                    match target {
                        Target::Name(name) => self.check_name(name),
                        Target::Index { object, index } => {
                            self.verify_expr(object);
                            self.verify_expr(index);
                        }
                        Target::Field { object, field } => {
                            self.verify_expr(object);
                            self.check_field(field);
                        }
                    }
                }
            }
            Stmt::Call(expr) => self.verify_expr(expr),
            Stmt::If { branches, otherwise } => {
                for (condition, body) in branches {
                    self.verify_expr(condition);
                    self.verify_block(body);
                }
                if let Some(body) = otherwise {
                    self.verify_block(body);
                }
            }
            Stmt::While { condition, body } => {
                self.verify_expr(condition);
                self.verify_loop(body, None);
            }
            Stmt::NumericFor { var, start, limit, step, body } => {
                self.verify_expr(start);
                self.verify_expr(limit);
                if let Some(step) = step {
                    self.verify_expr(step);
                }
                self.verify_loop(body, Some(var));
            }
            Stmt::Do(body) => self.verify_block(body),
            Stmt::Break => {
                if self.loop_depth == 0 {
                    self.err("'break' outside a loop".to_string(), None);
                }
            }
            Stmt::Return(values) => self.verify_exprs(values),
        }
    }

    fn verify_loop(&mut self, body: &'p Block, var: Option<&'p String>) {
        self.loop_depth += 1;
        self.scopes.push(var.map(String::as_str).into_iter().collect());
        self.verify_block(body);
        self.scopes.pop();
        self.loop_depth -= 1;
    }

    fn verify_exprs(&mut self, exprs: &'p [Expr]) {
        for e in exprs {
            self.verify_expr(e);
        }
    }

    fn check_field(&mut self, field: &str) {
        if field_component(field).is_none() {
            self.err(format!("unknown field '{field}'"), Some("fields are x, y and z".to_string()));
        }
    }

    fn verify_expr(&mut self, expr: &'p Expr) {
        match expr {
            Expr::Literal(_) => {}
            Expr::Ref(name) => self.check_name(name),
            Expr::Field { object, field } => {
                self.verify_expr(object);
                self.check_field(field);
            }
            Expr::Index { object, index } => {
                self.verify_expr(object);
                self.verify_expr(index);
            }
            Expr::Call { function, args, span } => {
                self.verify_exprs(args);
                self.check_call(function, args, *span);
            }
            Expr::BinOp { left, right, .. } => {
                self.verify_expr(left);
                self.verify_expr(right);
            }
            Expr::UnaryOp { operand, .. } => self.verify_expr(operand),
            Expr::List(items) => self.verify_exprs(items),
        }
    }

    fn check_call(&mut self, name: &str, args: &[Expr], span: Span) {
        let span = if span == Span::UNKNOWN { self.span } else { span };
        // A trailing call can expand to any number of arguments.
        let open_ended = args.last().is_some_and(Expr::is_call);
        if let Some(&params) = self.functions.get(name) {
            if !open_ended && args.len() != params {
                self.err_at(
                    span,
                    format!("arity mismatch: '{name}' takes {params} arguments, got {}", args.len()),
                    None,
                );
            }
            return;
        }
        if let Some(binding) = bindings::lookup(name) {
            if !open_ended && !binding.arity.accepts(args.len()) {
                self.err_at(
                    span,
                    format!(
                        "arity mismatch: '{name}' takes {} arguments, got {}",
                        binding.arity.describe(),
                        args.len()
                    ),
                    None,
                );
            }
            return;
        }
        let candidates = self
            .functions
            .keys()
            .copied()
            .chain(bindings::registry().iter().map(|b| b.name));
        let hint = closest_match(name, candidates).map(|s| format!("did you mean '{s}'?"));
        self.err_at(span, format!("undefined function '{name}'"), hint);
    }
}

fn collect_locals<'p>(block: &'p Block, out: &mut HashSet<&'p str>) {
    for stmt in block {
        match &stmt.node {
            Stmt::Local { names, .. } => out.extend(names.iter().map(String::as_str)),
            Stmt::If { branches, otherwise } => {
                for (_, body) in branches {
                    collect_locals(body, out);
                }
                if let Some(body) = otherwise {
                    collect_locals(body, out);
                }
            }
            Stmt::While { body, .. } | Stmt::Do(body) => collect_locals(body, out),
            Stmt::NumericFor { var, body, .. } => {
                out.insert(var);
                collect_locals(body, out);
            }
            _ => {}
        }
    }
}

/// Checks a parsed program before code generation. Every problem found is
/// reported, not just the first.
pub fn verify(program: &Program) -> Result<(), Vec<VerifyError>> {
    let mut ctx = VerifyContext::new();
    // Declarations first so calls may precede the function they name.
    ctx.collect_declarations(program);
    ctx.verify_bodies(program);
    if ctx.errors.is_empty() {
        Ok(())
    } else {
        Err(ctx.errors)
    }
}
