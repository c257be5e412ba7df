//! Abstract syntax tree consumed by the resolver and the interpreter.
//!
//! Nodes are plain owned data so that function declarations can outlive the
//! source text they were parsed from (closures created in one REPL line are
//! called from later ones).  Every expression the resolver can bind (variable
//! reads, assignments, `this`, `super`) carries an [`ExprId`]: a synthetic
//! identity that keys the distance table.  Two syntactically identical
//! references always receive distinct ids.

use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::Serialize;

static NEXT_EXPR_ID: AtomicUsize = AtomicUsize::new(0);

/// Identity of a resolvable expression node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ExprId(usize);

impl ExprId {
    /// Allocate a process-unique id.
    pub fn fresh() -> Self {
        ExprId(NEXT_EXPR_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ExprId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A name as written in the source, with its line for diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Identifier {
    pub name: String,
    pub line: usize,
}

impl Identifier {
    pub fn new<S: Into<String>>(name: S, line: usize) -> Self {
        Self {
            name: name.into(),
            line,
        }
    }
}

/// A reference the resolver may bind to a local scope.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VarRef {
    pub id: ExprId,
    pub name: Identifier,
}

impl VarRef {
    pub fn new(name: Identifier) -> Self {
        Self {
            id: ExprId::fresh(),
            name,
        }
    }
}

/// A literal constant that appears directly in the source code.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum LiteralValue {
    Number(f64),
    Str(String),
    True,
    False,
    Nil,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UnaryOp {
    Negate,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Equal,
    NotEqual,
    Greater,
    GreaterEqual,
    Less,
    LessEqual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LogicalOp {
    And,
    Or,
}

impl UnaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            UnaryOp::Negate => "-",
            UnaryOp::Not => "!",
        }
    }
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Subtract => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
            BinaryOp::Equal => "==",
            BinaryOp::NotEqual => "!=",
            BinaryOp::Greater => ">",
            BinaryOp::GreaterEqual => ">=",
            BinaryOp::Less => "<",
            BinaryOp::LessEqual => "<=",
        }
    }
}

impl LogicalOp {
    pub fn symbol(self) -> &'static str {
        match self {
            LogicalOp::And => "and",
            LogicalOp::Or => "or",
        }
    }
}

/// Every kind of *expression*.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Expr {
    Literal(LiteralValue),

    /// Parenthesised sub‑expression.
    Grouping(Box<Expr>),

    /// *Example:* `!isReady` or `-42`
    Unary {
        operator: UnaryOp,
        line: usize,
        right: Box<Expr>,
    },

    /// *Example:* `a + b`, `x <= y`
    Binary {
        left: Box<Expr>,
        operator: BinaryOp,
        line: usize,
        right: Box<Expr>,
    },

    /// Short‑circuiting `and` / `or`.
    Logical {
        left: Box<Expr>,
        operator: LogicalOp,
        right: Box<Expr>,
    },

    Variable(VarRef),

    /// `identifier "=" expression`
    Assign { target: VarRef, value: Box<Expr> },

    Call {
        callee: Box<Expr>,
        /// Line of the closing `)`, for arity and call errors.
        paren_line: usize,
        arguments: Vec<Expr>,
    },

    /// object.property
    Get { object: Box<Expr>, name: Identifier },

    /// object.property = value
    Set {
        object: Box<Expr>,
        name: Identifier,
        value: Box<Expr>,
    },

    /// `this`, bound like a variable named "this".
    This(VarRef),

    /// `super.method`; `keyword` resolves to the scope holding "super".
    Super { keyword: VarRef, method: Identifier },
}

/// A named function or method: `name "(" params ")" "{" body "}"`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionDecl {
    pub name: Identifier,
    /// Parameter names (arity ≤ 255).
    pub params: Vec<Identifier>,
    pub body: Vec<Stmt>,
}

/// Complete executable constructs.  A program is a `Vec<Stmt>`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Stmt {
    Expression(Expr),

    Print(Expr),

    /// `"var" IDENT ("=" initializer)? ";"`
    Var {
        name: Identifier,
        initializer: Option<Expr>,
    },

    Block(Vec<Stmt>),

    If {
        condition: Expr,
        then_branch: Box<Stmt>,
        else_branch: Option<Box<Stmt>>,
    },

    While {
        condition: Expr,
        body: Box<Stmt>,
    },

    /// Shared so closures can hold the declaration without cloning the body.
    Function(Rc<FunctionDecl>),

    Return {
        /// Line of the `return` keyword.
        line: usize,
        value: Option<Expr>,
    },

    Class {
        name: Identifier,
        superclass: Option<VarRef>,
        methods: Vec<Rc<FunctionDecl>>,
    },
}
