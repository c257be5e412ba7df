//! Lexical scopes.
//!
//! An [`Environment`] is one scope's bindings plus a shared link to the scope
//! that encloses it.  Scopes are reference counted so that a closure or bound
//! method keeps its defining scope alive after the call that created it has
//! returned.
//!
//! Two lookup disciplines coexist:
//! - dynamic (`get` / `assign`): walk outward by name; used for globals,
//!   which the resolver leaves unbound.
//! - exact-hop (`get_at` / `assign_at`): jump `distance` links, then read that
//!   scope only.  The resolver certified the binding exists, so a miss is an
//!   internal error and never falls back to a dynamic search.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use log::debug;

use crate::ast::Identifier;
use crate::error::{LoxError, Result};
use crate::value::Value;

/// Shared handle to a scope.
pub type EnvRef = Rc<RefCell<Environment>>;

#[derive(Debug, Default)]
pub struct Environment {
    values: HashMap<String, Value>,
    enclosing: Option<EnvRef>,
}

impl Environment {
    pub fn new() -> Self {
        Environment {
            values: HashMap::new(),
            enclosing: None,
        }
    }

    pub fn with_enclosing(enclosing: EnvRef) -> Self {
        Environment {
            values: HashMap::new(),
            enclosing: Some(enclosing),
        }
    }

    /// Wrap into a shared handle.
    pub fn into_ref(self) -> EnvRef {
        Rc::new(RefCell::new(self))
    }

    pub fn enclosing(&self) -> Option<EnvRef> {
        self.enclosing.clone()
    }

    /// Upsert into this scope only.  Redefinition is allowed.
    pub fn define(&mut self, name: &str, value: Value) {
        self.values.insert(name.to_string(), value);
    }

    pub fn get(&self, name: &Identifier) -> Result<Value> {
        if let Some(value) = self.values.get(&name.name) {
            Ok(value.clone())
        } else if let Some(enclosing) = &self.enclosing {
            enclosing.borrow().get(name)
        } else {
            Err(LoxError::runtime(
                name.line,
                format!("Undefined variable '{}'.", name.name),
            ))
        }
    }

    /// Update the nearest existing binding; never creates one.
    pub fn assign(&mut self, name: &Identifier, value: Value) -> Result<()> {
        if let Some(slot) = self.values.get_mut(&name.name) {
            *slot = value;
            Ok(())
        } else if let Some(enclosing) = &self.enclosing {
            enclosing.borrow_mut().assign(name, value)
        } else {
            Err(LoxError::runtime(
                name.line,
                format!("Undefined variable '{}'.", name.name),
            ))
        }
    }

    /// Walk exactly `distance` enclosing links from `env`.
    pub fn ancestor(env: &EnvRef, distance: usize) -> Result<EnvRef> {
        let mut current = Rc::clone(env);

        for hop in 0..distance {
            let next = current.borrow().enclosing().ok_or_else(|| {
                LoxError::internal(format!(
                    "scope chain ended after {} of {} hops",
                    hop, distance
                ))
            })?;
            current = next;
        }

        Ok(current)
    }

    pub fn get_at(env: &EnvRef, distance: usize, name: &str) -> Result<Value> {
        let scope = Self::ancestor(env, distance)?;
        let value = scope.borrow().values.get(name).cloned();

        debug!("get_at({}, '{}') -> {:?}", distance, name, value.is_some());

        value.ok_or_else(|| {
            LoxError::internal(format!(
                "resolved binding '{}' missing at distance {}",
                name, distance
            ))
        })
    }

    /// Update in place at the certified scope.  A missing binding is an
    /// internal error rather than an implicit declaration.
    pub fn assign_at(env: &EnvRef, distance: usize, name: &str, value: Value) -> Result<()> {
        let scope = Self::ancestor(env, distance)?;
        let mut scope = scope.borrow_mut();

        match scope.values.get_mut(name) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(LoxError::internal(format!(
                "resolved binding '{}' missing at distance {}",
                name, distance
            ))),
        }
    }

    /// Number of bindings held directly by this scope.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ident(name: &str) -> Identifier {
        Identifier::new(name, 1)
    }

    #[test]
    fn get_walks_outward_and_inner_shadows() {
        let global = Environment::new().into_ref();
        global.borrow_mut().define("a", Value::Number(1.0));
        global.borrow_mut().define("b", Value::Number(2.0));

        let inner = Environment::with_enclosing(global.clone()).into_ref();
        inner.borrow_mut().define("a", Value::Number(10.0));

        assert_eq!(inner.borrow().get(&ident("a")).unwrap(), Value::Number(10.0));
        assert_eq!(inner.borrow().get(&ident("b")).unwrap(), Value::Number(2.0));
        assert!(inner.borrow().get(&ident("c")).is_err());
    }

    #[test]
    fn assign_updates_nearest_binding_and_rejects_unknown_names() {
        let global = Environment::new().into_ref();
        global.borrow_mut().define("a", Value::Number(1.0));
        let inner = Environment::with_enclosing(global.clone()).into_ref();

        inner
            .borrow_mut()
            .assign(&ident("a"), Value::Number(5.0))
            .unwrap();
        assert_eq!(global.borrow().get(&ident("a")).unwrap(), Value::Number(5.0));
        assert!(inner.borrow().is_empty());

        let err = inner
            .borrow_mut()
            .assign(&ident("missing"), Value::Nil)
            .unwrap_err();
        assert!(matches!(err, LoxError::Runtime { .. }));
    }

    #[test]
    fn define_redefines_in_place() {
        let env = Environment::new().into_ref();
        env.borrow_mut().define("a", Value::Number(1.0));
        env.borrow_mut().define("a", Value::from("two"));

        assert_eq!(env.borrow().len(), 1);
        assert_eq!(env.borrow().get(&ident("a")).unwrap(), Value::from("two"));
    }

    #[test]
    fn exact_hop_access_does_not_fall_back() {
        let global = Environment::new().into_ref();
        global.borrow_mut().define("x", Value::Number(1.0));
        let middle = Environment::with_enclosing(global.clone()).into_ref();
        let inner = Environment::with_enclosing(middle.clone()).into_ref();

        assert_eq!(Environment::get_at(&inner, 2, "x").unwrap(), Value::Number(1.0));

        // `x` lives two hops out, not one: this must not search further.
        let err = Environment::get_at(&inner, 1, "x").unwrap_err();
        assert!(matches!(err, LoxError::Internal(_)));

        let err = Environment::get_at(&inner, 5, "x").unwrap_err();
        assert!(matches!(err, LoxError::Internal(_)));
    }

    #[test]
    fn assign_at_updates_in_place_repeatedly() {
        let global = Environment::new().into_ref();
        let local = Environment::with_enclosing(global.clone()).into_ref();
        local.borrow_mut().define("i", Value::Number(0.0));

        for n in 1..=3 {
            Environment::assign_at(&local, 0, "i", Value::Number(n as f64)).unwrap();
        }

        assert_eq!(Environment::get_at(&local, 0, "i").unwrap(), Value::Number(3.0));
        assert_eq!(local.borrow().len(), 1);

        let err = Environment::assign_at(&local, 1, "i", Value::Nil).unwrap_err();
        assert!(matches!(err, LoxError::Internal(_)));
    }
}
