//! Lexically scoped environment for the evaluator.
//!
//! The root scope doubles as the namespace handed to the entry-point
//! resolver after the program has run. Builtins are not stored here; they
//! are looked up in the fixed capability table after scopes are exhausted.

use std::collections::HashMap;

use super::value::Value;

pub struct Environment {
    /// `scopes[0]` is the global scope; the rest are block/call scopes.
    scopes: Vec<HashMap<String, Value>>,
}

impl Environment {
    pub fn new() -> Self {
        Self {
            scopes: vec![HashMap::new()],
        }
    }

    pub fn push_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    pub fn pop_scope(&mut self) {
        debug_assert!(self.scopes.len() > 1, "cannot pop the global scope");
        self.scopes.pop();
    }

    /// Define a name in the innermost scope.
    pub fn define(&mut self, name: &str, value: Value) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), value);
        }
    }

    /// Rebind an existing name, innermost scope first.
    pub fn assign(&mut self, name: &str, value: Value) -> bool {
        for scope in self.scopes.iter_mut().rev() {
            if let Some(slot) = scope.get_mut(name) {
                *slot = value;
                return true;
            }
        }
        false
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name))
            .cloned()
    }

    /// Swap in a fresh call frame: only the global scope plus `locals` are
    /// visible inside a function body. Returns the shelved outer frames.
    pub fn begin_call(&mut self, locals: HashMap<String, Value>) -> Vec<HashMap<String, Value>> {
        let shelved = self.scopes.split_off(1);
        self.scopes.push(locals);
        shelved
    }

    /// Restore the frames shelved by `begin_call`.
    pub fn end_call(&mut self, shelved: Vec<HashMap<String, Value>>) {
        self.scopes.truncate(1);
        self.scopes.extend(shelved);
    }

    /// Heap footprint of every binding in the visible scopes. Frames shelved
    /// by `begin_call` are not visible here; the process rlimit backstops
    /// the undercount.
    pub fn footprint(&self) -> usize {
        self.scopes
            .iter()
            .flat_map(|scope| scope.values())
            .map(Value::cost)
            .sum()
    }

    /// Read a global binding.
    pub fn global(&self, name: &str) -> Option<&Value> {
        self.scopes.first().and_then(|scope| scope.get(name))
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inner_scope_shadows_outer() {
        let mut env = Environment::new();
        env.define("x", Value::Int(1));
        env.push_scope();
        env.define("x", Value::Int(2));
        assert_eq!(env.get("x"), Some(Value::Int(2)));
        env.pop_scope();
        assert_eq!(env.get("x"), Some(Value::Int(1)));
    }

    #[test]
    fn assign_targets_nearest_binding() {
        let mut env = Environment::new();
        env.define("x", Value::Int(1));
        env.push_scope();
        assert!(env.assign("x", Value::Int(5)));
        env.pop_scope();
        assert_eq!(env.get("x"), Some(Value::Int(5)));
    }

    #[test]
    fn assign_to_unknown_name_fails() {
        let mut env = Environment::new();
        assert!(!env.assign("missing", Value::Int(1)));
    }

    #[test]
    fn footprint_tracks_visible_bindings() {
        let mut env = Environment::new();
        let empty = env.footprint();
        env.define("s", Value::Str("x".repeat(1000)));
        assert!(env.footprint() >= empty + 1000);
        env.push_scope();
        env.define("t", Value::Str("y".repeat(500)));
        let with_inner = env.footprint();
        env.pop_scope();
        assert!(env.footprint() < with_inner);
    }

    #[test]
    fn call_frames_hide_caller_locals() {
        let mut env = Environment::new();
        env.define("g", Value::Int(1));
        env.push_scope();
        env.define("local", Value::Int(2));

        let shelved = env.begin_call(HashMap::new());
        assert_eq!(env.get("g"), Some(Value::Int(1)));
        assert_eq!(env.get("local"), None);
        env.end_call(shelved);

        assert_eq!(env.get("local"), Some(Value::Int(2)));
    }
}
