/*
 * env.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! The variable environment shared by a template and everything it includes.
//!
//! Each key carries an independent lock bit. Plain writes to a locked key
//! are silently dropped, which is how values fixed on the command line or
//! in an earlier include layer win over defaults assigned in the template.

use std::collections::HashSet;

use indexmap::IndexMap;
use tracing::debug;

use crate::error::{ErrorKind, TemplateError, TemplateResult};
use crate::interp::builtins::{self, Builtin};
use crate::value::{Lock, Value};

/// Mapping from variable name to value, plus the set of locked names.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    values: IndexMap<String, Value>,
    locked: HashSet<String>,
}

impl Environment {
    /// An empty environment with no builtins.
    pub fn new() -> Self {
        Self::default()
    }

    /// An environment seeded with math constants and builtin functions.
    pub fn with_builtins() -> Self {
        let mut env = Self::new();
        for (name, value) in builtins::constants() {
            env.values.insert(name.to_string(), value);
        }
        for builtin in Builtin::ALL {
            env.values
                .insert(builtin.name().to_string(), Value::Builtin(*builtin));
        }
        env
    }

    /// Store `value` under `key` unless the key is locked.
    ///
    /// A value wrapped by `Immutable(..)` is stored and locked; one wrapped by
    /// `Mutable(..)` is stored even over a lock, and unlocks the key. Returns
    /// whether the write happened.
    pub fn set(&mut self, key: impl Into<String>, value: Value) -> bool {
        let key = key.into();
        match value {
            Value::Marked(Lock::Immutable, inner) => self.set_immutable(key, inner.unmarked()),
            Value::Marked(Lock::Mutable, inner) => {
                self.set_mutable(key, inner.unmarked());
                true
            }
            value => {
                if self.locked.contains(&key) {
                    debug!(name = %key, "ignoring write to immutable variable");
                    return false;
                }
                self.values.insert(key, value);
                true
            }
        }
    }

    /// Store and lock. A no-op when the key is already locked.
    pub fn set_immutable(&mut self, key: impl Into<String>, value: Value) -> bool {
        let key = key.into();
        if self.locked.contains(&key) {
            debug!(name = %key, "ignoring write to immutable variable");
            return false;
        }
        self.values.insert(key.clone(), value);
        self.locked.insert(key);
        true
    }

    /// Store and unlock, overriding any existing lock.
    pub fn set_mutable(&mut self, key: impl Into<String>, value: Value) {
        let key = key.into();
        self.locked.remove(&key);
        self.values.insert(key, value);
    }

    /// Lookup raising `KeyError` when missing.
    pub fn get(&self, key: &str) -> TemplateResult<&Value> {
        self.values
            .get(key)
            .ok_or_else(|| TemplateError::runtime(ErrorKind::KeyError, format!("'{key}'")))
    }

    pub fn lookup(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn is_locked(&self, key: &str) -> bool {
        self.locked.contains(key)
    }

    /// Remove a key and its lock bit.
    pub fn delete(&mut self, key: &str) -> Option<Value> {
        self.locked.remove(key);
        self.values.shift_remove(key)
    }

    /// Bulk update that keeps lock state: locked keys of `other` are locked
    /// here too, and locked keys here stay untouched.
    pub fn merge(&mut self, other: &Environment) {
        for (key, value) in &other.values {
            if other.locked.contains(key) {
                self.set_immutable(key.clone(), value.clone());
            } else {
                self.set(key.clone(), value.clone());
            }
        }
    }

    /// Lock every user variable currently defined. Builtin names stay
    /// writable so templates may shadow them.
    pub fn lock_all(&mut self) {
        for key in self.values.keys() {
            if !builtins::is_reserved(key) {
                self.locked.insert(key.clone());
            }
        }
    }

    /// Variables that are not builtins, in insertion order.
    pub fn user_vars(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values
            .iter()
            .filter(|(key, value)| !is_builtin_binding(key, value))
            .map(|(key, value)| (key.as_str(), value))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(key, value)| (key.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// A name still bound to its seeded builtin. Constants compare bitwise so
/// that the seeded `nan` matches itself.
fn is_builtin_binding(key: &str, value: &Value) -> bool {
    match value {
        Value::Builtin(builtin) => builtin.name() == key,
        Value::Float(x) => builtins::constants().iter().any(|(name, constant)| {
            *name == key && matches!(constant, Value::Float(c) if c.to_bits() == x.to_bits())
        }),
        _ => false,
    }
}

impl Extend<(String, Value)> for Environment {
    /// Plain writes, subject to existing locks.
    fn extend<I: IntoIterator<Item = (String, Value)>>(&mut self, iter: I) {
        for (key, value) in iter {
            self.set(key, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locked_write_is_noop() {
        let mut env = Environment::new();
        env.set_immutable("a", Value::Int(1));
        assert!(!env.set("a", Value::Int(2)));
        assert!(env.get("a").unwrap().py_eq(&Value::Int(1)));
    }

    #[test]
    fn test_immutable_wrapper_locks_and_mutable_unlocks() {
        let mut env = Environment::new();
        env.set("a", Value::Marked(Lock::Immutable, Box::new(Value::Int(1))));
        assert!(env.is_locked("a"));
        env.set("a", Value::Int(5));
        assert!(env.get("a").unwrap().py_eq(&Value::Int(1)));
        env.set("a", Value::Marked(Lock::Mutable, Box::new(Value::Int(3))));
        assert!(!env.is_locked("a"));
        env.set("a", Value::Int(4));
        assert!(env.get("a").unwrap().py_eq(&Value::Int(4)));
    }

    #[test]
    fn test_delete_clears_lock() {
        let mut env = Environment::new();
        env.set_immutable("a", Value::Int(1));
        assert!(env.delete("a").is_some());
        env.set("a", Value::Int(2));
        assert!(env.get("a").unwrap().py_eq(&Value::Int(2)));
        assert!(!env.is_locked("a"));
    }

    #[test]
    fn test_merge_unions_locks() {
        let mut base = Environment::new();
        base.set_immutable("kept", Value::Int(1));
        let mut other = Environment::new();
        other.set("kept", Value::Int(9));
        other.set_immutable("fixed", Value::Int(2));
        other.set("free", Value::Int(3));
        base.merge(&other);
        assert!(base.get("kept").unwrap().py_eq(&Value::Int(1)));
        assert!(base.is_locked("fixed"));
        assert!(!base.is_locked("free"));
    }

    #[test]
    fn test_missing_key() {
        let env = Environment::new();
        assert_eq!(env.get("nope").unwrap_err().class_name(), "KeyError");
    }

    #[test]
    fn test_builtins_hidden_from_user_vars() {
        let mut env = Environment::with_builtins();
        env.set("x", Value::Int(1));
        let names: Vec<&str> = env.user_vars().map(|(k, _)| k).collect();
        assert_eq!(names, vec!["x"]);
        env.set("nan", Value::Float(0.0));
        let names: Vec<&str> = env.user_vars().map(|(k, _)| k).collect();
        assert_eq!(names, vec!["nan", "x"]);
        env.lock_all();
        assert!(env.is_locked("x"));
        assert!(!env.is_locked("sqrt"));
    }
}
