use crate::ast::*;
use crate::lexer::Token;

pub struct Parser {
    tokens: Vec<(Token, Span)>,
    pos: usize,
    /// Current nesting of blocks and subexpressions.
    depth: usize,
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("parse error at token {position}: {message}")]
pub struct ParseError {
    pub position: usize,
    pub span: Span,
    pub message: String,
}

type Result<T> = std::result::Result<T, ParseError>;

const MAX_ERRORS: usize = 20;
const MAX_NESTING: usize = 200;

/// Human-readable form of a token for "near ..." messages.
fn describe(tok: Option<&Token>) -> String {
    let Some(tok) = tok else {
        return "<eof>".to_string();
    };
    let text = match tok {
        Token::Ident(name) => return name.clone(),
        Token::Number(n) => return n.to_string(),
        Token::Str(s) => return format!("\"{s}\""),
        Token::Comment => "--",
        Token::And => "and",
        Token::Break => "break",
        Token::Do => "do",
        Token::Else => "else",
        Token::Elseif => "elseif",
        Token::End => "end",
        Token::False => "false",
        Token::For => "for",
        Token::Function => "function",
        Token::If => "if",
        Token::Local => "local",
        Token::Nil => "nil",
        Token::Not => "not",
        Token::Or => "or",
        Token::Return => "return",
        Token::Then => "then",
        Token::True => "true",
        Token::While => "while",
        Token::Plus => "+",
        Token::Minus => "-",
        Token::Star => "*",
        Token::Slash => "/",
        Token::Percent => "%",
        Token::Caret => "^",
        Token::Hash => "#",
        Token::DotDot => "..",
        Token::EqEq => "==",
        Token::NotEq => "~=",
        Token::Less => "<",
        Token::LessEq => "<=",
        Token::Greater => ">",
        Token::GreaterEq => ">=",
        Token::Assign => "=",
        Token::LParen => "(",
        Token::RParen => ")",
        Token::LBrace => "{",
        Token::RBrace => "}",
        Token::LBracket => "[",
        Token::RBracket => "]",
        Token::Semi => ";",
        Token::Comma => ",",
        Token::Dot => ".",
    };
    format!("'{text}'")
}

fn binop_for(tok: &Token) -> Option<BinOp> {
    Some(match tok {
        Token::Plus => BinOp::Add,
        Token::Minus => BinOp::Subtract,
        Token::Star => BinOp::Multiply,
        Token::Slash => BinOp::Divide,
        Token::Percent => BinOp::Modulo,
        Token::Caret => BinOp::Power,
        Token::DotDot => BinOp::Concat,
        Token::EqEq => BinOp::Equals,
        Token::NotEq => BinOp::NotEquals,
        Token::Less => BinOp::LessThan,
        Token::LessEq => BinOp::LessOrEqual,
        Token::Greater => BinOp::GreaterThan,
        Token::GreaterEq => BinOp::GreaterOrEqual,
        Token::And => BinOp::And,
        Token::Or => BinOp::Or,
        _ => return None,
    })
}

impl Parser {
    pub fn new(tokens: Vec<(Token, Span)>) -> Self {
        Parser { tokens, pos: 0, depth: 0 }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn peek_span(&self) -> Span {
        self.tokens
            .get(self.pos)
            .map(|(_, s)| *s)
            .or_else(|| self.tokens.last().map(|(_, s)| Span { start: s.end, end: s.end }))
            .unwrap_or(Span::UNKNOWN)
    }

    /// Span of the previously consumed token.
    fn prev_span(&self) -> Span {
        if self.pos > 0 {
            self.tokens[self.pos - 1].1
        } else {
            Span::UNKNOWN
        }
    }

    fn advance(&mut self) -> Option<&Token> {
        let tok = self.tokens.get(self.pos).map(|(t, _)| t);
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn check(&self, expected: &Token) -> bool {
        self.peek() == Some(expected)
    }

    fn accept(&mut self, expected: &Token) -> bool {
        if self.check(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: &Token) -> Result<Span> {
        if self.check(expected) {
            let span = self.peek_span();
            self.advance();
            Ok(span)
        } else {
            Err(self.error(format!(
                "{} expected near {}",
                describe(Some(expected)),
                describe(self.peek())
            )))
        }
    }

    /// Like `expect`, but names the construct being closed when it is on another line.
    fn expect_closing(&mut self, expected: &Token, opener: &str) -> Result<Span> {
        self.expect(expected).map_err(|mut e| {
            e.message = format!(
                "{} expected (to close '{}') near {}",
                describe(Some(expected)),
                opener,
                describe(self.peek())
            );
            e
        })
    }

    fn expect_ident(&mut self) -> Result<String> {
        match self.peek().cloned() {
            Some(Token::Ident(name)) => {
                self.advance();
                Ok(name)
            }
            tok => Err(self.error(format!("<name> expected near {}", describe(tok.as_ref())))),
        }
    }

    fn error(&self, message: String) -> ParseError {
        ParseError {
            position: self.pos,
            span: self.peek_span(),
            message,
        }
    }

    /// Runs `f` one nesting level deeper, failing past `MAX_NESTING`.
    fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        if self.depth >= MAX_NESTING {
            return Err(self.error(format!("too many nested levels (limit is {MAX_NESTING})")));
        }
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    /// Tokens that close a block.
    fn at_block_end(&self) -> bool {
        matches!(
            self.peek(),
            None | Some(Token::End) | Some(Token::Else) | Some(Token::Elseif)
        )
    }

    // ---- Top-level parsing ----

    pub fn parse_program(&mut self) -> (Program, Vec<ParseError>) {
        let mut functions = Vec::new();
        let mut body = Vec::new();
        let mut errors: Vec<ParseError> = Vec::new();

        while !self.at_end() {
            if errors.len() >= MAX_ERRORS {
                break;
            }
            let result = match self.peek() {
                Some(Token::Function) => self.parse_function().map(|f| functions.push(f)),
                Some(Token::End) => Err(self.error("'<eof>' expected near 'end'".into())),
                _ => self.parse_statement().map(|s| body.push(s)),
            };
            if let Err(e) = result {
                errors.push(e);
                self.sync_to_function_boundary();
            }
        }

        (Program { functions, body }, errors)
    }

    /// Skip ahead to the next `function` keyword that is not nested deeper than
    /// where the error happened. Always consumes at least one token.
    fn sync_to_function_boundary(&mut self) {
        if self.advance().is_none() {
            return;
        }
        let mut depth: isize = 0;
        while let Some(tok) = self.peek() {
            match tok {
                Token::Function if depth <= 0 => break,
                Token::Function | Token::If | Token::Do => depth += 1,
                Token::End => depth -= 1,
                _ => {}
            }
            self.advance();
        }
    }

    /// `function name(a, b) body end`
    fn parse_function(&mut self) -> Result<FunctionDecl> {
        let start = self.expect(&Token::Function)?;
        let name = self.expect_ident()?;
        self.expect(&Token::LParen)?;
        let mut params = Vec::new();
        if !self.check(&Token::RParen) {
            loop {
                params.push(self.expect_ident()?);
                if !self.accept(&Token::Comma) {
                    break;
                }
            }
        }
        self.expect(&Token::RParen)?;
        let body = self.parse_block()?;
        self.expect_closing(&Token::End, "function")?;
        Ok(FunctionDecl {
            name,
            params,
            body,
            span: start.merge(self.prev_span()),
        })
    }

    // ---- Blocks & statements ----

    fn parse_block(&mut self) -> Result<Block> {
        self.nested(Self::parse_statements)
    }

    fn parse_statements(&mut self) -> Result<Block> {
        let mut stmts = Vec::new();
        while !self.at_block_end() {
            if self.check(&Token::Function) {
                return Err(self.error("functions can only be declared at the top level".into()));
            }
            let is_return = self.check(&Token::Return);
            let stmt = self.parse_statement()?;
            stmts.push(stmt);
            if is_return {
                if !self.at_block_end() {
                    return Err(self.error(format!(
                        "'return' must be the last statement in a block, found {}",
                        describe(self.peek())
                    )));
                }
                break;
            }
        }
        Ok(stmts)
    }

    fn parse_statement(&mut self) -> Result<Spanned<Stmt>> {
        // Empty statements
        while self.accept(&Token::Semi) {}
        let start = self.peek_span();
        let stmt = match self.peek() {
            Some(Token::Local) => self.parse_local()?,
            Some(Token::If) => self.parse_if()?,
            Some(Token::While) => self.parse_while()?,
            Some(Token::For) => self.parse_for()?,
            Some(Token::Do) => {
                self.advance();
                let body = self.parse_block()?;
                self.expect_closing(&Token::End, "do")?;
                Stmt::Do(body)
            }
            Some(Token::Break) => {
                self.advance();
                Stmt::Break
            }
            Some(Token::Return) => {
                self.advance();
                let values = if self.at_block_end() || self.check(&Token::Semi) {
                    Vec::new()
                } else {
                    self.parse_expr_list()?
                };
                self.accept(&Token::Semi);
                Stmt::Return(values)
            }
            _ => self.parse_expr_statement()?,
        };
        Ok(Spanned::new(stmt, start.merge(self.prev_span())))
    }

    fn parse_local(&mut self) -> Result<Stmt> {
        self.expect(&Token::Local)?;
        if self.check(&Token::Function) {
            return Err(self.error("functions can only be declared at the top level".into()));
        }
        let mut names = vec![self.expect_ident()?];
        while self.accept(&Token::Comma) {
            names.push(self.expect_ident()?);
        }
        let values = if self.accept(&Token::Assign) {
            self.parse_expr_list()?
        } else {
            Vec::new()
        };
        Ok(Stmt::Local { names, values })
    }

    fn parse_if(&mut self) -> Result<Stmt> {
        self.expect(&Token::If)?;
        let mut branches = Vec::new();
        let condition = self.parse_expr()?;
        self.expect(&Token::Then)?;
        branches.push((condition, self.parse_block()?));

        let mut otherwise = None;
        loop {
            match self.peek() {
                Some(Token::Elseif) => {
                    self.advance();
                    let condition = self.parse_expr()?;
                    self.expect(&Token::Then)?;
                    branches.push((condition, self.parse_block()?));
                }
                Some(Token::Else) => {
                    self.advance();
                    otherwise = Some(self.parse_block()?);
                    self.expect_closing(&Token::End, "if")?;
                    break;
                }
                _ => {
                    self.expect_closing(&Token::End, "if")?;
                    break;
                }
            }
        }
        Ok(Stmt::If { branches, otherwise })
    }

    fn parse_loop_body(&mut self, opener: &str) -> Result<Block> {
        self.expect(&Token::Do)?;
        let body = self.parse_block()?;
        self.expect_closing(&Token::End, opener)?;
        Ok(body)
    }

    fn parse_while(&mut self) -> Result<Stmt> {
        self.expect(&Token::While)?;
        let condition = self.parse_expr()?;
        let body = self.parse_loop_body("while")?;
        Ok(Stmt::While { condition, body })
    }

    /// `for i = start, limit[, step] do body end`
    fn parse_for(&mut self) -> Result<Stmt> {
        self.expect(&Token::For)?;
        let var = self.expect_ident()?;
        if !self.check(&Token::Assign) {
            return Err(self.error(format!(
                "'=' expected near {} (only numeric for loops are supported)",
                describe(self.peek())
            )));
        }
        self.advance();
        let start = self.parse_expr()?;
        self.expect(&Token::Comma)?;
        let limit = self.parse_expr()?;
        let step = if self.accept(&Token::Comma) {
            Some(self.parse_expr()?)
        } else {
            None
        };
        let body = self.parse_loop_body("for")?;
        Ok(Stmt::NumericFor { var, start, limit, step, body })
    }

    /// Assignment or call statement.
    fn parse_expr_statement(&mut self) -> Result<Stmt> {
        let first = self.parse_suffixed()?;
        if self.check(&Token::Assign) || self.check(&Token::Comma) {
            let mut targets = vec![self.to_target(first)?];
            while self.accept(&Token::Comma) {
                let next = self.parse_suffixed()?;
                targets.push(self.to_target(next)?);
            }
            self.expect(&Token::Assign)?;
            let values = self.parse_expr_list()?;
            return Ok(Stmt::Assign { targets, values });
        }
        if first.is_call() {
            Ok(Stmt::Call(first))
        } else {
            Err(self.error(format!("syntax error near {}", describe(self.peek()))))
        }
    }

    fn to_target(&self, expr: Expr) -> Result<Target> {
        match expr {
            Expr::Ref(name) => Ok(Target::Name(name)),
            Expr::Index { object, index } => Ok(Target::Index { object, index }),
            Expr::Field { object, field } => Ok(Target::Field { object, field }),
            _ => Err(self.error("cannot assign to this expression".into())),
        }
    }

    // ---- Expressions ----

    fn parse_expr_list(&mut self) -> Result<Vec<Expr>> {
        let mut exprs = vec![self.parse_expr()?];
        while self.accept(&Token::Comma) {
            exprs.push(self.parse_expr()?);
        }
        Ok(exprs)
    }

    pub fn parse_expr(&mut self) -> Result<Expr> {
        self.parse_subexpr(0)
    }

    fn parse_subexpr(&mut self, limit: u8) -> Result<Expr> {
        self.nested(|p| p.climb(limit))
    }

    /// Precedence climbing: consume operators whose left binding power exceeds `limit`.
    fn climb(&mut self, limit: u8) -> Result<Expr> {
        let mut left = match self.peek() {
            Some(Token::Not) | Some(Token::Minus) | Some(Token::Hash) => {
                let op = match self.advance() {
                    Some(Token::Not) => UnaryOp::Not,
                    Some(Token::Minus) => UnaryOp::Negate,
                    _ => UnaryOp::Length,
                };
                let operand = self.parse_subexpr(UNARY_PRECEDENCE)?;
                fold_unary(op, operand)
            }
            _ => self.parse_simple()?,
        };

        while let Some(op) = self.peek().and_then(binop_for) {
            let (left_bp, right_bp) = op.precedence();
            if left_bp <= limit {
                break;
            }
            self.advance();
            let right = self.parse_subexpr(right_bp)?;
            left = Expr::BinOp {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_simple(&mut self) -> Result<Expr> {
        let expr = match self.peek().cloned() {
            Some(Token::Number(n)) => Expr::Literal(Literal::Number(n)),
            Some(Token::Str(s)) => Expr::Literal(Literal::Str(s)),
            Some(Token::Nil) => Expr::Literal(Literal::Nil),
            Some(Token::True) => Expr::Literal(Literal::Bool(true)),
            Some(Token::False) => Expr::Literal(Literal::Bool(false)),
            Some(Token::LBrace) => return self.parse_list(),
            Some(Token::Function) => {
                return Err(self.error("anonymous functions are not supported".into()));
            }
            _ => return self.parse_suffixed(),
        };
        self.advance();
        Ok(expr)
    }

    /// `{a, b, c}` with an optional trailing separator
    fn parse_list(&mut self) -> Result<Expr> {
        self.expect(&Token::LBrace)?;
        let mut items = Vec::new();
        while !self.check(&Token::RBrace) {
            items.push(self.parse_expr()?);
            if !self.accept(&Token::Comma) && !self.accept(&Token::Semi) {
                break;
            }
        }
        self.expect_closing(&Token::RBrace, "{")?;
        Ok(Expr::List(items))
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        match self.peek().cloned() {
            Some(Token::Ident(name)) => {
                let span = self.peek_span();
                self.advance();
                if self.check(&Token::LParen) {
                    let args = self.parse_call_args()?;
                    return Ok(Expr::Call {
                        function: name,
                        args,
                        span: span.merge(self.prev_span()),
                    });
                }
                Ok(Expr::Ref(name))
            }
            Some(Token::LParen) => {
                self.advance();
                let inner = self.parse_expr()?;
                self.expect_closing(&Token::RParen, "(")?;
                Ok(inner)
            }
            tok => Err(self.error(format!("unexpected symbol near {}", describe(tok.as_ref())))),
        }
    }

    fn parse_call_args(&mut self) -> Result<Vec<Expr>> {
        self.expect(&Token::LParen)?;
        let args = if self.check(&Token::RParen) {
            Vec::new()
        } else {
            self.parse_expr_list()?
        };
        self.expect_closing(&Token::RParen, "(")?;
        Ok(args)
    }

    /// Primary expression followed by `.field` / `[index]` suffixes.
    fn parse_suffixed(&mut self) -> Result<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek() {
                Some(Token::Dot) => {
                    self.advance();
                    let field = self.expect_ident()?;
                    expr = Expr::Field { object: Box::new(expr), field };
                }
                Some(Token::LBracket) => {
                    self.advance();
                    let index = self.parse_expr()?;
                    self.expect_closing(&Token::RBracket, "[")?;
                    expr = Expr::Index { object: Box::new(expr), index: Box::new(index) };
                }
                Some(Token::LParen) => {
                    return Err(self.error("only named functions can be called".into()));
                }
                _ => return Ok(expr),
            }
        }
    }
}

/// `-3` parses as a negative literal rather than a negation.
fn fold_unary(op: UnaryOp, operand: Expr) -> Expr {
    match (op, operand) {
        (UnaryOp::Negate, Expr::Literal(Literal::Number(n))) => Expr::Literal(Literal::Number(-n)),
        (op, operand) => Expr::UnaryOp { op, operand: Box::new(operand) },
    }
}

/// Parse a token stream, collecting up to 20 errors with recovery at function boundaries.
pub fn parse(tokens: Vec<(Token, Span)>) -> (Program, Vec<ParseError>) {
    Parser::new(tokens).parse_program()
}
