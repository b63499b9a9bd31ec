//! Lexically-scoped environments stored in an index-based arena (§3.3,
//! §9): closures hold an `EnvId` rather than an `Rc<Environment>`, which
//! avoids the reference cycle a closure capturing its own enclosing
//! environment would otherwise create between the environment and the
//! function value stored inside it.

use std::cell::RefCell;
use std::collections::HashMap;

use crate::error::ErrorKind;
use crate::value::{ErrorObject, Value};

pub type EnvId = usize;

#[derive(Debug)]
pub struct Environment {
    values: HashMap<String, Value>,
    parent: Option<EnvId>,
}

/// Owns every environment ever created during a run; nothing is ever
/// freed, which is acceptable for a tree-walking interpreter over
/// short-lived scripts (§5) and keeps `EnvId` a plain, `Copy` index
/// instead of a reference-counted handle.
#[derive(Debug, Default)]
pub struct EnvironmentArena {
    slots: RefCell<Vec<Environment>>,
}

impl EnvironmentArena {
    pub fn new() -> Self {
        Self {
            slots: RefCell::new(Vec::new()),
        }
    }

    pub fn create_root(&self) -> EnvId {
        let mut slots = self.slots.borrow_mut();
        slots.push(Environment {
            values: HashMap::new(),
            parent: None,
        });
        slots.len() - 1
    }

    pub fn create_child(&self, parent: EnvId) -> EnvId {
        let mut slots = self.slots.borrow_mut();
        slots.push(Environment {
            values: HashMap::new(),
            parent: Some(parent),
        });
        slots.len() - 1
    }

    pub fn define(&self, env: EnvId, name: &str, value: Value) {
        self.slots.borrow_mut()[env].values.insert(name.to_string(), value);
    }

    pub fn get(&self, env: EnvId, name: &str) -> Result<Value, ErrorObject> {
        let slots = self.slots.borrow();
        let mut current = Some(env);
        while let Some(id) = current {
            let scope = &slots[id];
            if let Some(v) = scope.values.get(name) {
                return Ok(v.clone());
            }
            current = scope.parent;
        }
        Err(ErrorObject::new(
            ErrorKind::Name.to_string(),
            format!("undefined name '{name}'"),
        ))
    }

    /// Finds the nearest enclosing scope that already defines `name` and
    /// overwrites the binding there; does not implicitly create a new
    /// global when the name is unbound (§4.5: `=` on an undeclared name
    /// is a `NameError`, `var` is required to introduce one).
    pub fn assign(&self, env: EnvId, name: &str, value: Value) -> Result<(), ErrorObject> {
        let mut slots = self.slots.borrow_mut();
        let mut current = Some(env);
        while let Some(id) = current {
            if slots[id].values.contains_key(name) {
                slots[id].values.insert(name.to_string(), value);
                return Ok(());
            }
            current = slots[id].parent;
        }
        Err(ErrorObject::new(
            ErrorKind::Name.to_string(),
            format!("undefined name '{name}'"),
        ))
    }

    pub fn defined_in_scope(&self, env: EnvId, name: &str) -> bool {
        self.slots.borrow()[env].values.contains_key(name)
    }

    pub fn parent_of(&self, env: EnvId) -> Option<EnvId> {
        self.slots.borrow()[env].parent
    }

    /// All names bound directly in `env` (not climbing to parents). Used
    /// by the module loader to discover which bindings a module marked
    /// as exported (§4.8).
    pub fn scope_keys(&self, env: EnvId) -> Vec<String> {
        self.slots.borrow()[env].values.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_sees_parent_bindings() {
        let arena = EnvironmentArena::new();
        let root = arena.create_root();
        arena.define(root, "x", Value::Number(1.0));
        let child = arena.create_child(root);
        assert!(matches!(arena.get(child, "x"), Ok(Value::Number(n)) if n == 1.0));
    }

    #[test]
    fn assign_climbs_to_defining_scope() {
        let arena = EnvironmentArena::new();
        let root = arena.create_root();
        arena.define(root, "x", Value::Number(1.0));
        let child = arena.create_child(root);
        arena.assign(child, "x", Value::Number(2.0)).unwrap();
        assert!(matches!(arena.get(root, "x"), Ok(Value::Number(n)) if n == 2.0));
    }

    #[test]
    fn assign_to_undeclared_name_errors() {
        let arena = EnvironmentArena::new();
        let root = arena.create_root();
        assert!(arena.assign(root, "missing", Value::Nil).is_err());
    }

    #[test]
    fn shadowing_does_not_leak_to_parent() {
        let arena = EnvironmentArena::new();
        let root = arena.create_root();
        arena.define(root, "x", Value::Number(1.0));
        let child = arena.create_child(root);
        arena.define(child, "x", Value::Number(9.0));
        assert!(matches!(arena.get(child, "x"), Ok(Value::Number(n)) if n == 9.0));
        assert!(matches!(arena.get(root, "x"), Ok(Value::Number(n)) if n == 1.0));
    }
}
