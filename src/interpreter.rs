use std::collections::HashMap;
use std::io::{self, Write};
use std::mem;
use std::rc::Rc;

use chrono::Utc;
use log::{debug, info};

use crate::ast::{
    BinaryOp, Expr, FunctionDecl, Identifier, LiteralValue, LogicalOp, Stmt, UnaryOp, VarRef,
};
use crate::callable::{Callable, LoxClass, LoxFunction, NativeFunction, INITIALIZER};
use crate::environment::{EnvRef, Environment};
use crate::error::{LoxError, Result};
use crate::resolver::DistanceTable;
use crate::value::Value;

/// How a statement finished.  `Return` travels up to the nearest function
/// call boundary and must never reach [`Interpreter::interpret`].
#[derive(Debug)]
pub enum Completion {
    Normal,
    Return(Value),
}

pub struct Interpreter {
    globals: EnvRef,
    environment: EnvRef,
    locals: DistanceTable,
    out: Box<dyn Write>,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

/// Seconds since the Unix epoch, with sub-second precision.
fn clock(_args: &[Value]) -> std::result::Result<Value, String> {
    let now = Utc::now();
    Ok(Value::Number(now.timestamp_micros() as f64 / 1_000_000.0))
}

impl Interpreter {
    /// An interpreter printing to stdout.
    pub fn new() -> Self {
        Self::with_output(Box::new(io::stdout()))
    }

    /// An interpreter printing to `out`; builtins such as `clock` are
    /// installed in the global scope.
    pub fn with_output(out: Box<dyn Write>) -> Self {
        info!("Initializing Interpreter");

        let globals = Environment::new().into_ref();

        debug!("Defining native function 'clock'");
        globals.borrow_mut().define(
            "clock",
            Value::Callable(Callable::Native(Rc::new(NativeFunction {
                name: "clock",
                arity: 0,
                func: clock,
            }))),
        );

        Self {
            environment: Rc::clone(&globals),
            globals,
            locals: DistanceTable::new(),
            out,
        }
    }

    /// Merge a resolver's output.  Ids are process-unique, so tables from
    /// successive REPL lines never collide.
    ///
    /// Entries are never evicted: a closure defined on an earlier line still
    /// looks up its body's references by their original ids, so the table
    /// grows with every line a session runs.
    pub fn load_distances(&mut self, table: DistanceTable) {
        debug!("Loading {} resolved distance(s)", table.len());
        self.locals.extend(table);
    }

    /// Run a resolved program.  The first runtime error stops execution of
    /// the remaining statements and is returned to the caller.
    pub fn interpret(&mut self, statements: &[Stmt]) -> Result<()> {
        debug!("Interpreting {} statements", statements.len());

        let result = self.run_top_level(statements);
        self.out.flush()?;

        if result.is_ok() {
            info!("Interpretation completed successfully");
        }
        result
    }

    fn run_top_level(&mut self, statements: &[Stmt]) -> Result<()> {
        for stmt in statements {
            if let Completion::Return(_) = self.execute(stmt)? {
                return Err(LoxError::internal("'return' escaped to the top level"));
            }
        }
        Ok(())
    }

    /// Executes a single statement.
    pub fn execute(&mut self, stmt: &Stmt) -> Result<Completion> {
        match stmt {
            Stmt::Expression(expr) => {
                self.evaluate(expr)?;
            }

            Stmt::Print(expr) => {
                let value = self.evaluate(expr)?;
                writeln!(self.out, "{}", value)?;
            }

            Stmt::Var { name, initializer } => {
                let value = match initializer {
                    Some(expr) => self.evaluate(expr)?,
                    None => Value::Nil,
                };
                debug!("Defining variable '{}' = {}", name.name, value);
                self.environment.borrow_mut().define(&name.name, value);
            }

            Stmt::Block(statements) => {
                let environment = Environment::with_enclosing(Rc::clone(&self.environment));
                return self.execute_block(statements, environment.into_ref());
            }

            Stmt::If {
                condition,
                then_branch,
                else_branch,
            } => {
                if self.evaluate(condition)?.is_truthy() {
                    return self.execute(then_branch);
                } else if let Some(else_branch) = else_branch {
                    return self.execute(else_branch);
                }
            }

            Stmt::While { condition, body } => {
                while self.evaluate(condition)?.is_truthy() {
                    if let Completion::Return(value) = self.execute(body)? {
                        return Ok(Completion::Return(value));
                    }
                }
            }

            Stmt::Function(declaration) => {
                // Closing over the current scope and binding the name in that
                // same scope is what makes recursion work.
                let function =
                    LoxFunction::new(Rc::clone(declaration), Rc::clone(&self.environment), false);
                debug!("Defining function '{}'", declaration.name.name);
                self.environment.borrow_mut().define(
                    &declaration.name.name,
                    Value::Callable(Callable::Function(Rc::new(function))),
                );
            }

            Stmt::Return { value, .. } => {
                let value = match value {
                    Some(expr) => self.evaluate(expr)?,
                    None => Value::Nil,
                };
                return Ok(Completion::Return(value));
            }

            Stmt::Class {
                name,
                superclass,
                methods,
            } => self.execute_class(name, superclass.as_ref(), methods)?,
        }

        Ok(Completion::Normal)
    }

    /// Run `statements` with `environment` active, restoring the previous
    /// scope afterwards whether or not they succeed.
    pub fn execute_block(
        &mut self,
        statements: &[Stmt],
        environment: EnvRef,
    ) -> Result<Completion> {
        let previous = mem::replace(&mut self.environment, environment);
        let result = self.execute_statements(statements);
        self.environment = previous;
        result
    }

    fn execute_statements(&mut self, statements: &[Stmt]) -> Result<Completion> {
        for stmt in statements {
            if let Completion::Return(value) = self.execute(stmt)? {
                return Ok(Completion::Return(value));
            }
        }
        Ok(Completion::Normal)
    }

    fn execute_class(
        &mut self,
        name: &Identifier,
        superclass: Option<&VarRef>,
        methods: &[Rc<FunctionDecl>],
    ) -> Result<()> {
        debug!("Declaring class '{}'", name.name);

        // Bound before the superclass is evaluated so methods can refer to
        // their own class.
        self.environment.borrow_mut().define(&name.name, Value::Nil);

        let superclass = match superclass {
            Some(var) => match self.look_up_variable(var)? {
                Value::Callable(Callable::Class(class)) => Some(class),
                _ => {
                    return Err(LoxError::runtime(
                        var.name.line,
                        "Superclass must be a class.",
                    ))
                }
            },
            None => None,
        };

        let enclosing = superclass.as_ref().map(|class| {
            let mut environment = Environment::with_enclosing(Rc::clone(&self.environment));
            environment.define("super", Value::Callable(Callable::Class(Rc::clone(class))));
            mem::replace(&mut self.environment, environment.into_ref())
        });

        let methods: HashMap<String, Rc<LoxFunction>> = methods
            .iter()
            .map(|method| {
                let function = LoxFunction::new(
                    Rc::clone(method),
                    Rc::clone(&self.environment),
                    method.name.name == INITIALIZER,
                );
                (method.name.name.clone(), Rc::new(function))
            })
            .collect();

        let class = LoxClass::new(name.name.clone(), superclass, methods);

        if let Some(previous) = enclosing {
            self.environment = previous;
        }

        self.environment
            .borrow_mut()
            .assign(name, Value::Callable(Callable::Class(Rc::new(class))))
    }

    /// Evaluates an expression and returns a Value.
    pub fn evaluate(&mut self, expr: &Expr) -> Result<Value> {
        match expr {
            Expr::Literal(literal) => Ok(match literal {
                LiteralValue::Number(n) => Value::Number(*n),
                LiteralValue::Str(s) => Value::String(s.clone()),
                LiteralValue::True => Value::Bool(true),
                LiteralValue::False => Value::Bool(false),
                LiteralValue::Nil => Value::Nil,
            }),

            Expr::Grouping(inner) => self.evaluate(inner),

            Expr::Unary {
                operator,
                line,
                right,
            } => {
                let right = self.evaluate(right)?;
                match (operator, right) {
                    (UnaryOp::Not, value) => Ok(Value::Bool(!value.is_truthy())),
                    (UnaryOp::Negate, Value::Number(n)) => Ok(Value::Number(-n)),
                    (UnaryOp::Negate, other) => Err(LoxError::runtime(
                        *line,
                        format!(
                            "Operand must be a number for '-' (got {}).",
                            other.type_name()
                        ),
                    )),
                }
            }

            Expr::Binary {
                left,
                operator,
                line,
                right,
            } => {
                let left = self.evaluate(left)?;
                let right = self.evaluate(right)?;
                binary(*operator, *line, left, right)
            }

            Expr::Logical {
                left,
                operator,
                right,
            } => {
                let left = self.evaluate(left)?;
                let short_circuits = match operator {
                    LogicalOp::Or => left.is_truthy(),
                    LogicalOp::And => !left.is_truthy(),
                };

                if short_circuits {
                    Ok(left)
                } else {
                    self.evaluate(right)
                }
            }

            Expr::Variable(var) | Expr::This(var) => self.look_up_variable(var),

            Expr::Assign { target, value } => {
                let value = self.evaluate(value)?;

                match self.locals.get(target.id) {
                    Some(distance) => Environment::assign_at(
                        &self.environment,
                        distance,
                        &target.name.name,
                        value.clone(),
                    )?,
                    None => self
                        .globals
                        .borrow_mut()
                        .assign(&target.name, value.clone())?,
                }

                Ok(value)
            }

            Expr::Call {
                callee,
                paren_line,
                arguments,
            } => {
                let callee = self.evaluate(callee)?;

                let mut values = Vec::with_capacity(arguments.len());
                for argument in arguments {
                    values.push(self.evaluate(argument)?);
                }

                let callable = callee.as_callable().cloned().ok_or_else(|| {
                    LoxError::runtime(*paren_line, "Can only call functions and classes.")
                })?;

                callable.call(self, values, *paren_line)
            }

            Expr::Get { object, name } => match self.evaluate(object)? {
                Value::Instance(instance) => instance.get(name),
                _ => Err(LoxError::runtime(
                    name.line,
                    "Only instances have properties.",
                )),
            },

            Expr::Set {
                object,
                name,
                value,
            } => {
                let Value::Instance(instance) = self.evaluate(object)? else {
                    return Err(LoxError::runtime(name.line, "Only instances have fields."));
                };

                let value = self.evaluate(value)?;
                instance.set(&name.name, value.clone());
                Ok(value)
            }

            Expr::Super { keyword, method } => self.evaluate_super(keyword, method),
        }
    }

    fn evaluate_super(&mut self, keyword: &VarRef, method: &Identifier) -> Result<Value> {
        let distance = self
            .locals
            .get(keyword.id)
            .ok_or_else(|| LoxError::internal("'super' was not resolved"))?;

        let Value::Callable(Callable::Class(superclass)) =
            Environment::get_at(&self.environment, distance, "super")?
        else {
            return Err(LoxError::internal("'super' is not bound to a class"));
        };

        // The scope holding `this` always sits directly inside the one
        // holding `super`.
        let this_distance = distance
            .checked_sub(1)
            .ok_or_else(|| LoxError::internal("'super' resolved without a 'this' scope"))?;

        let Value::Instance(object) = Environment::get_at(&self.environment, this_distance, "this")?
        else {
            return Err(LoxError::internal("'this' is not bound to an instance"));
        };

        let method = superclass.find_method(&method.name).ok_or_else(|| {
            LoxError::runtime(method.line, format!("Undefined property '{}'.", method.name))
        })?;

        Ok(Value::Callable(Callable::Function(Rc::new(
            method.bind(object),
        ))))
    }

    /// Exact-hop lookup for resolved locals, global lookup by name otherwise.
    fn look_up_variable(&self, var: &VarRef) -> Result<Value> {
        match self.locals.get(var.id) {
            Some(distance) => Environment::get_at(&self.environment, distance, &var.name.name),
            None => self.globals.borrow().get(&var.name),
        }
    }
}

/// Arithmetic and comparison.  Only `+` is overloaded (numbers or strings);
/// equality is numeric-only like the ordering operators.
fn binary(operator: BinaryOp, line: usize, left: Value, right: Value) -> Result<Value> {
    match (operator, &left, &right) {
        (BinaryOp::Add, Value::Number(a), Value::Number(b)) => Ok(Value::Number(a + b)),

        (BinaryOp::Add, Value::String(a), Value::String(b)) => {
            Ok(Value::String(format!("{}{}", a, b)))
        }

        (BinaryOp::Add, _, _) => Err(operand_error(
            line,
            "Operands must be two numbers or two strings",
            operator,
            &left,
            &right,
        )),

        (_, Value::Number(a), Value::Number(b)) => {
            let (a, b) = (*a, *b);
            Ok(match operator {
                BinaryOp::Add => Value::Number(a + b),
                BinaryOp::Subtract => Value::Number(a - b),
                BinaryOp::Multiply => Value::Number(a * b),
                BinaryOp::Divide => Value::Number(a / b),
                BinaryOp::Equal => Value::Bool(a == b),
                BinaryOp::NotEqual => Value::Bool(a != b),
                BinaryOp::Greater => Value::Bool(a > b),
                BinaryOp::GreaterEqual => Value::Bool(a >= b),
                BinaryOp::Less => Value::Bool(a < b),
                BinaryOp::LessEqual => Value::Bool(a <= b),
            })
        }

        _ => Err(operand_error(
            line,
            "Operands must be numbers",
            operator,
            &left,
            &right,
        )),
    }
}

fn operand_error(
    line: usize,
    message: &str,
    operator: BinaryOp,
    left: &Value,
    right: &Value,
) -> LoxError {
    LoxError::runtime(
        line,
        format!(
            "{} for '{}' (got {} and {}).",
            message,
            operator.symbol(),
            left.type_name(),
            right.type_name()
        ),
    )
}
