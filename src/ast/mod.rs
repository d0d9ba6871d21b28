use serde::{Deserialize, Serialize};

pub mod source_map;
pub use source_map::SourceMap;

/// Byte range within source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub const UNKNOWN: Span = Span { start: 0, end: 0 };

    /// Smallest span covering both.
    pub fn merge(self, other: Span) -> Span {
        Span { start: self.start.min(other.start), end: self.end.max(other.end) }
    }
}

/// A statement together with where it came from. Serializes as the bare node;
/// spans read back from JSON are [`Span::UNKNOWN`].
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned<T> {
    pub node: T,
    pub span: Span,
}

impl<T> Spanned<T> {
    pub fn new(node: T, span: Span) -> Self {
        Spanned { node, span }
    }
}

impl<T> std::ops::Deref for Spanned<T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.node
    }
}

impl<T: Serialize> Serialize for Spanned<T> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.node.serialize(serializer)
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Spanned<T> {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        T::deserialize(deserializer).map(|node| Spanned { node, span: Span::UNKNOWN })
    }
}

pub type Block = Vec<Spanned<Stmt>>;

/// `function name(params) body end`, only allowed at the top level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDecl {
    pub name: String,
    pub params: Vec<String>,
    pub body: Block,
    #[serde(skip)]
    pub span: Span,
}

/// Assignment target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Target {
    /// Local if declared, global otherwise
    Name(String),
    /// `object[index]`
    Index { object: Box<Expr>, index: Box<Expr> },
    /// `object.x`
    Field { object: Box<Expr>, field: String },
}

/// Statements
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Stmt {
    /// `local a, b = e1, e2`
    Local { names: Vec<String>, values: Vec<Expr> },

    /// `a, t[i] = e1, e2`
    Assign { targets: Vec<Target>, values: Vec<Expr> },

    /// Call evaluated for its side effects
    Call(Expr),

    /// `if c then .. elseif c then .. else .. end`
    If {
        branches: Vec<(Expr, Block)>,
        otherwise: Option<Block>,
    },

    /// `while cond do body end`
    While { condition: Expr, body: Block },

    /// `for var = start, limit[, step] do body end`
    NumericFor {
        var: String,
        start: Expr,
        limit: Expr,
        step: Option<Expr>,
        body: Block,
    },

    /// `do body end`
    Do(Block),

    Break,

    /// `return e1, e2`
    Return(Vec<Expr>),
}

/// Expressions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Literal(Literal),

    /// Variable reference
    Ref(String),

    /// Component access: `v.x`
    Field { object: Box<Expr>, field: String },

    /// Index access: `v[1]`, `list[i]`
    Index { object: Box<Expr>, index: Box<Expr> },

    /// Function call with positional args: `f(a, b)`
    Call {
        function: String,
        args: Vec<Expr>,
        #[serde(skip)]
        span: Span,
    },

    /// Infix binary op: `a + b`
    BinOp {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },

    /// `not e`, `-e`, `#e`
    UnaryOp {
        op: UnaryOp,
        operand: Box<Expr>,
    },

    /// List constructor `{a, b, c}`
    List(Vec<Expr>),
}

impl Expr {
    pub fn is_call(&self) -> bool {
        matches!(self, Expr::Call { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Nil,
    Bool(bool),
    Number(f64),
    Str(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Power,
    Concat,
    Equals,
    NotEquals,
    LessThan,
    LessOrEqual,
    GreaterThan,
    GreaterOrEqual,
    And,
    Or,
}

impl BinOp {
    /// Binding power as `(left, right)`; right-associative ops bind tighter on the left.
    pub fn precedence(self) -> (u8, u8) {
        match self {
            BinOp::Or => (1, 1),
            BinOp::And => (2, 2),
            BinOp::Equals
            | BinOp::NotEquals
            | BinOp::LessThan
            | BinOp::LessOrEqual
            | BinOp::GreaterThan
            | BinOp::GreaterOrEqual => (3, 3),
            BinOp::Concat => (5, 4),
            BinOp::Add | BinOp::Subtract => (6, 6),
            BinOp::Multiply | BinOp::Divide | BinOp::Modulo => (7, 7),
            BinOp::Power => (10, 9),
        }
    }
}

/// Unary operators bind tighter than everything except `^`.
pub const UNARY_PRECEDENCE: u8 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Not,
    Negate,
    Length,
}

/// Function declarations plus the statements of the top-level chunk, which
/// run once when a program is loaded.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Program {
    pub functions: Vec<FunctionDecl>,
    pub body: Block,
}

impl Program {
    pub fn function(&self, name: &str) -> Option<&FunctionDecl> {
        self.functions.iter().find(|f| f.name == name)
    }
}
