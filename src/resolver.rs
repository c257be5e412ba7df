//! Static resolver pass.
//!
//! One walk over the AST does three things:
//! 1. Mirror the interpreter's lexical scopes (a stack of `HashMap<&str, bool>`
//!    tracking declared vs. defined).  The global scope is never pushed, so
//!    top-level names stay dynamic and can be redefined.
//! 2. Report static errors (redeclaration, reading a local in its own
//!    initializer, misplaced `return` / `this` / `super`, self-inheritance).
//!    Errors are collected; the walk never stops early.
//! 3. Record, for each variable-like reference, how many scopes out its
//!    binding lives.  References found in no pushed scope are left out of the
//!    table and looked up as globals at runtime.
//!
//! Scope creation here must match the interpreter exactly: blocks, function
//! calls, the `super` scope around a subclass's methods, and the `this` scope
//! created when a method is bound.

use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use log::{debug, info};

use crate::ast::{Expr, ExprId, FunctionDecl, Identifier, Stmt, VarRef};
use crate::callable::INITIALIZER;
use crate::error::LoxError;

/// Reference node → number of scope hops to its binding.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DistanceTable {
    distances: HashMap<ExprId, usize>,
}

impl DistanceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: ExprId) -> Option<usize> {
        self.distances.get(&id).copied()
    }

    pub fn len(&self) -> usize {
        self.distances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.distances.is_empty()
    }

    pub fn extend(&mut self, other: DistanceTable) {
        self.distances.extend(other.distances);
    }

    /// Entries ordered by node id, for stable output.
    pub fn sorted(&self) -> BTreeMap<ExprId, usize> {
        self.distances.iter().map(|(id, d)| (*id, *d)).collect()
    }

    fn record(&mut self, id: ExprId, distance: usize) {
        self.distances.insert(id, distance);
    }
}

/// What kind of function body we are in.  Used to validate `return`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum FunctionType {
    None,
    Function,
    Method,
    Initializer,
}

/// What kind of class body we are in.  Used to validate `this` and `super`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum ClassType {
    None,
    Class,
    Subclass,
}

pub struct Resolver<'a> {
    scopes: Vec<HashMap<&'a str, bool>>, // false=declared, true=defined
    table: DistanceTable,
    errors: Vec<LoxError>,
    current_function: FunctionType,
    current_class: ClassType,
}

impl Default for Resolver<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> Resolver<'a> {
    pub fn new() -> Self {
        Resolver {
            scopes: Vec::new(),
            table: DistanceTable::new(),
            errors: Vec::new(),
            current_function: FunctionType::None,
            current_class: ClassType::None,
        }
    }

    /// Walk all top‑level statements.  Returns the distance table, or every
    /// diagnostic raised along the way.
    pub fn resolve(
        mut self,
        statements: &'a [Stmt],
    ) -> std::result::Result<DistanceTable, Vec<LoxError>> {
        info!(
            "Beginning resolve pass over {} statement(s)",
            statements.len()
        );

        self.resolve_stmts(statements);

        info!(
            "Resolve pass finished: {} local reference(s), {} error(s)",
            self.table.len(),
            self.errors.len()
        );

        self.finish()
    }

    /// Resolve a standalone expression at global scope.
    pub fn resolve_expression(
        mut self,
        expr: &'a Expr,
    ) -> std::result::Result<DistanceTable, Vec<LoxError>> {
        self.resolve_expr(expr);
        self.finish()
    }

    fn finish(self) -> std::result::Result<DistanceTable, Vec<LoxError>> {
        if self.errors.is_empty() {
            Ok(self.table)
        } else {
            Err(self.errors)
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Statement resolution
    // ─────────────────────────────────────────────────────────────────────────

    fn resolve_stmts(&mut self, statements: &'a [Stmt]) {
        for stmt in statements {
            self.resolve_stmt(stmt);
        }
    }

    fn resolve_stmt(&mut self, stmt: &'a Stmt) {
        match stmt {
            Stmt::Block(statements) => {
                self.begin_scope();
                self.resolve_stmts(statements);
                self.end_scope();
            }

            Stmt::Var { name, initializer } => {
                // declare → resolve initializer → define
                self.declare(name);
                if let Some(expr) = initializer {
                    self.resolve_expr(expr);
                }
                self.define(name);
            }

            Stmt::Function(declaration) => {
                // Defined before the body so the function can call itself.
                self.declare(&declaration.name);
                self.define(&declaration.name);
                self.resolve_function(declaration, FunctionType::Function);
            }

            Stmt::Class {
                name,
                superclass,
                methods,
            } => self.resolve_class(name, superclass.as_ref(), methods),

            Stmt::Expression(expr) | Stmt::Print(expr) => self.resolve_expr(expr),

            Stmt::If {
                condition,
                then_branch,
                else_branch,
            } => {
                self.resolve_expr(condition);
                self.resolve_stmt(then_branch);
                if let Some(else_branch) = else_branch {
                    self.resolve_stmt(else_branch);
                }
            }

            Stmt::While { condition, body } => {
                self.resolve_expr(condition);
                self.resolve_stmt(body);
            }

            Stmt::Return { line, value } => {
                if self.current_function == FunctionType::None {
                    self.error(*line, "Can't return from top-level code.");
                }

                if let Some(expr) = value {
                    if self.current_function == FunctionType::Initializer {
                        self.error(*line, "Can't return a value from an initializer.");
                    }
                    self.resolve_expr(expr);
                }
            }
        }
    }

    fn resolve_class(
        &mut self,
        name: &'a Identifier,
        superclass: Option<&'a VarRef>,
        methods: &'a [Rc<FunctionDecl>],
    ) {
        let enclosing_class = self.current_class;
        self.current_class = ClassType::Class;

        self.declare(name);
        self.define(name);

        if let Some(superclass) = superclass {
            if superclass.name.name == name.name {
                self.error(superclass.name.line, "A class can't inherit from itself.");
            }

            self.current_class = ClassType::Subclass;
            self.resolve_local(superclass.id, &superclass.name);

            self.begin_scope();
            self.define_synthetic("super");
        }

        self.begin_scope();
        self.define_synthetic("this");

        for method in methods {
            let kind = if method.name.name == INITIALIZER {
                FunctionType::Initializer
            } else {
                FunctionType::Method
            };
            self.resolve_function(method, kind);
        }

        self.end_scope();

        if superclass.is_some() {
            self.end_scope();
        }

        self.current_class = enclosing_class;
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Expression resolution
    // ─────────────────────────────────────────────────────────────────────────

    fn resolve_expr(&mut self, expr: &'a Expr) {
        match expr {
            Expr::Literal(_) => {}

            Expr::Grouping(inner) => self.resolve_expr(inner),

            Expr::Unary { right, .. } => self.resolve_expr(right),

            Expr::Binary { left, right, .. } | Expr::Logical { left, right, .. } => {
                self.resolve_expr(left);
                self.resolve_expr(right);
            }

            Expr::Variable(var) => {
                if let Some(scope) = self.scopes.last() {
                    if scope.get(var.name.name.as_str()) == Some(&false) {
                        self.error(
                            var.name.line,
                            format!(
                                "Can't read local variable '{}' in its own initializer.",
                                var.name.name
                            ),
                        );
                    }
                }
                self.resolve_local(var.id, &var.name);
            }

            Expr::Assign { target, value } => {
                self.resolve_expr(value);
                self.resolve_local(target.id, &target.name);
            }

            Expr::Call {
                callee, arguments, ..
            } => {
                self.resolve_expr(callee);
                for argument in arguments {
                    self.resolve_expr(argument);
                }
            }

            Expr::Get { object, .. } => self.resolve_expr(object),

            Expr::Set { object, value, .. } => {
                self.resolve_expr(value);
                self.resolve_expr(object);
            }

            Expr::This(keyword) => {
                if self.current_class == ClassType::None {
                    self.error(keyword.name.line, "Can't use 'this' outside of a class.");
                    return;
                }
                self.resolve_local(keyword.id, &keyword.name);
            }

            Expr::Super { keyword, .. } => {
                match self.current_class {
                    ClassType::None => {
                        self.error(keyword.name.line, "Can't use 'super' outside of a class.")
                    }
                    ClassType::Class => self.error(
                        keyword.name.line,
                        "Can't use 'super' in a class with no superclass.",
                    ),
                    ClassType::Subclass => {}
                }
                self.resolve_local(keyword.id, &keyword.name);
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Function helper
    // ─────────────────────────────────────────────────────────────────────────

    /// Fresh scope for parameters + body, matching the scope a call creates.
    fn resolve_function(&mut self, declaration: &'a FunctionDecl, kind: FunctionType) {
        let enclosing = self.current_function;
        self.current_function = kind;

        self.begin_scope();
        for param in &declaration.params {
            self.declare(param);
            self.define(param);
        }
        self.resolve_stmts(&declaration.body);
        self.end_scope();

        self.current_function = enclosing;
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Scope management
    // ─────────────────────────────────────────────────────────────────────────

    #[inline]
    fn begin_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    #[inline]
    fn end_scope(&mut self) {
        self.scopes.pop();
    }

    fn declare(&mut self, name: &'a Identifier) {
        let Some(scope) = self.scopes.last_mut() else {
            return;
        };

        if scope.contains_key(name.name.as_str()) {
            self.error(
                name.line,
                format!(
                    "Already a variable named '{}' in this scope.",
                    name.name
                ),
            );
            return;
        }

        scope.insert(&name.name, false);
    }

    fn define(&mut self, name: &'a Identifier) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(&name.name, true);
        }
    }

    fn define_synthetic(&mut self, name: &'static str) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name, true);
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Binding‑distance helper
    // ─────────────────────────────────────────────────────────────────────────

    /// Record the hop count of the innermost scope declaring `name`; leave
    /// the reference unrecorded (global) if none does.
    fn resolve_local(&mut self, id: ExprId, name: &Identifier) {
        for (depth, scope) in self.scopes.iter().rev().enumerate() {
            if scope.contains_key(name.name.as_str()) {
                debug!("Resolved '{}' {} at depth {}", name.name, id, depth);
                self.table.record(id, depth);
                return;
            }
        }

        debug!("Resolved '{}' {} as global", name.name, id);
    }

    fn error<S: Into<String>>(&mut self, line: usize, message: S) {
        self.errors.push(LoxError::resolve(line, message));
    }
}

/// Resolve `statements` in one call.
pub fn resolve(statements: &[Stmt]) -> std::result::Result<DistanceTable, Vec<LoxError>> {
    Resolver::new().resolve(statements)
}

