//! Syntax tree for snippet programs.
//!
//! The tree is produced by [`crate::script::parser::Parser`] and walked by
//! [`crate::script::interpreter::Interpreter`]. Function bodies are shared
//! behind `Rc` so closures can capture them without cloning statements.

use std::fmt;
use std::rc::Rc;

/// Line/column position in the snippet source (both 1-based).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SourceLocation {
    pub line: usize,
    pub column: usize,
}

impl SourceLocation {
    pub const fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// A parsed snippet.
#[derive(Debug, Clone, Default)]
pub struct Program {
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclKind {
    Let,
    Const,
    Var,
}

#[derive(Debug, Clone)]
pub enum Stmt {
    Expr(Expr),
    VarDecl {
        kind: DeclKind,
        declarations: Vec<(String, Option<Expr>)>,
        location: SourceLocation,
    },
    Function(Rc<FunctionDecl>),
    Return(Option<Expr>),
    If {
        test: Expr,
        consequent: Box<Stmt>,
        alternate: Option<Box<Stmt>>,
    },
    While {
        test: Expr,
        body: Box<Stmt>,
    },
    DoWhile {
        body: Box<Stmt>,
        test: Expr,
    },
    For {
        init: Option<Box<Stmt>>,
        test: Option<Expr>,
        update: Option<Expr>,
        body: Box<Stmt>,
    },
    ForOf {
        kind: DeclKind,
        name: String,
        iterable: Expr,
        body: Box<Stmt>,
    },
    Block(Vec<Stmt>),
    Break,
    Continue,
    Throw(Expr),
    Try {
        block: Vec<Stmt>,
        param: Option<String>,
        handler: Option<Vec<Stmt>>,
        finalizer: Option<Vec<Stmt>>,
    },
    Empty,
}

/// A function literal, declaration, or arrow function.
#[derive(Debug, Clone)]
pub struct FunctionDecl {
    pub name: Option<String>,
    pub params: Vec<String>,
    pub body: FunctionBody,
    pub is_arrow: bool,
    pub is_async: bool,
}

#[derive(Debug, Clone)]
pub enum FunctionBody {
    Block(Vec<Stmt>),
    /// Concise arrow body: `x => x + 1`.
    Expr(Box<Expr>),
}

#[derive(Debug, Clone)]
pub enum TemplatePart {
    Text(String),
    Expr(Expr),
}

#[derive(Debug, Clone)]
pub enum PropertyKey {
    Named(String),
    Computed(Expr),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
    Plus,
    Typeof,
    Void,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
    Eq,
    NotEq,
    StrictEq,
    StrictNotEq,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    InstanceOf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
    Nullish,
}

/// Assignment operators; `None` is plain `=`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Assign,
    Compound(BinaryOp),
    Logical(LogicalOp),
}

#[derive(Debug, Clone)]
pub enum Expr {
    Number(f64),
    Str(String),
    Template(Vec<TemplatePart>),
    Bool(bool),
    Null,
    Undefined,
    Ident(String, SourceLocation),
    Array(Vec<Expr>),
    Object(Vec<(PropertyKey, Expr)>),
    Function(Rc<FunctionDecl>),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Logical {
        op: LogicalOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Assign {
        op: AssignOp,
        target: Box<Expr>,
        value: Box<Expr>,
        location: SourceLocation,
    },
    Update {
        increment: bool,
        prefix: bool,
        target: Box<Expr>,
        location: SourceLocation,
    },
    Conditional {
        test: Box<Expr>,
        consequent: Box<Expr>,
        alternate: Box<Expr>,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
        location: SourceLocation,
    },
    New {
        callee: Box<Expr>,
        args: Vec<Expr>,
        location: SourceLocation,
    },
    Member {
        object: Box<Expr>,
        property: String,
        optional: bool,
        location: SourceLocation,
    },
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
        location: SourceLocation,
    },
    Await(Box<Expr>),
}

impl Expr {
    /// Source text used in "x is not a function" style messages.
    pub fn describe(&self) -> String {
        match self {
            Self::Ident(name, _) => name.clone(),
            Self::Member {
                object, property, ..
            } => format!("{}.{property}", object.describe()),
            Self::Index { object, .. } => format!("{}[...]", object.describe()),
            Self::Call { callee, .. } => format!("{}(...)", callee.describe()),
            Self::Str(s) => format!("\"{s}\""),
            Self::Number(n) => crate::script::value::format_number(*n),
            Self::Null => "null".to_string(),
            Self::Undefined => "undefined".to_string(),
            Self::Bool(b) => b.to_string(),
            _ => "expression".to_string(),
        }
    }
}
