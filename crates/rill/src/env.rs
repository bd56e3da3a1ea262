//! Environments: chained name→value tables with lexical parents.

use std::{cell::RefCell, rc::Rc};

use ahash::AHashMap;

use crate::value::Value;

#[derive(Debug)]
struct EnvData {
    vars: AHashMap<String, Value>,
    parent: Option<Env>,
}

/// A shared, mutable environment frame.
///
/// Cloning an `Env` clones the handle, not the table. All access happens on
/// the executor thread; `RefCell` borrows are never held across evaluation
/// re-entry points.
#[derive(Debug, Clone)]
pub struct Env(Rc<RefCell<EnvData>>);

impl Env {
    /// Creates a new root environment (the session's global environment).
    pub fn global() -> Self {
        Self(Rc::new(RefCell::new(EnvData {
            vars: AHashMap::new(),
            parent: None,
        })))
    }

    /// Creates a child frame for a function call.
    pub fn child(parent: &Self) -> Self {
        Self(Rc::new(RefCell::new(EnvData {
            vars: AHashMap::new(),
            parent: Some(parent.clone()),
        })))
    }

    /// Looks a name up through the parent chain.
    pub fn get(&self, name: &str) -> Option<Value> {
        let data = self.0.borrow();
        if let Some(value) = data.vars.get(name) {
            return Some(value.clone());
        }
        data.parent.as_ref().and_then(|parent| parent.get(name))
    }

    /// Binds a name in this frame, shadowing any parent binding.
    pub fn set(&self, name: impl Into<String>, value: Value) {
        self.0.borrow_mut().vars.insert(name.into(), value);
    }

    /// Removes a binding from this frame. Returns whether it existed.
    pub fn remove(&self, name: &str) -> bool {
        self.0.borrow_mut().vars.remove(name).is_some()
    }

    /// Names bound directly in this frame, sorted for stable listings.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.0.borrow().vars.keys().cloned().collect();
        names.sort_unstable();
        names
    }
}
