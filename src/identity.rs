//! Per-collection id allocation.
//!
//! Two standard implementations are provided behind a pluggable trait: a
//! string manager with a pluggable successor function, and a numeric
//! manager counting from 1.
//!
use serde_json::Value;
use std::collections::HashSet;

/// Allocates ids unique within a collection, in a deterministic sequence,
/// remembering externally supplied ids so they are never reissued.
///
pub trait IdentityManager: std::fmt::Debug {
    /// Return the next id and advance the internal counter, skipping any
    /// id previously recorded via [`set`](#tymethod.set).
    ///
    fn next(&mut self) -> Value;

    /// Record `id` as used, so `next()` never returns it.
    ///
    fn set(&mut self, id: &Value);

    /// Membership test.
    ///
    fn has(&self, id: &Value) -> bool;

    /// Restore the initial counter and forget every recorded id.
    ///
    fn reset(&mut self);

    /// Clone this manager behind a fresh box, so schema setup can hand
    /// each collection its own instance from one default.
    ///
    fn boxed_clone(&self) -> Box<dyn IdentityManager + Send + Sync>;
}

/// Allocates ids `"1"`, `"2"`, ... by default; the successor function is
/// pluggable so callers can supply e.g. a zero-padded or prefixed
/// sequence.
///
pub struct StringIdentityManager {
    next_numeric: u64,
    used: HashSet<String>,
    successor: fn(u64) -> String,
}

impl std::fmt::Debug for StringIdentityManager {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("StringIdentityManager")
            .field("next_numeric", &self.next_numeric)
            .field("used", &self.used)
            .finish()
    }
}

fn default_successor(n: u64) -> String {
    n.to_string()
}

impl StringIdentityManager {
    pub fn new() -> Self {
        Self {
            next_numeric: 1,
            used: HashSet::new(),
            successor: default_successor,
        }
    }

    /// Use a custom id-rendering function, e.g. `|n| format!("u{n}")`.
    ///
    pub fn with_successor(successor: fn(u64) -> String) -> Self {
        Self {
            next_numeric: 1,
            used: HashSet::new(),
            successor,
        }
    }
}

impl Default for StringIdentityManager {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentityManager for StringIdentityManager {
    fn next(&mut self) -> Value {
        loop {
            let candidate = (self.successor)(self.next_numeric);
            self.next_numeric += 1;
            if !self.used.contains(&candidate) {
                self.used.insert(candidate.clone());
                return Value::String(candidate);
            }
        }
    }

    fn set(&mut self, id: &Value) {
        let s = match id {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        self.used.insert(s);
    }

    fn has(&self, id: &Value) -> bool {
        let s = match id {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        self.used.contains(&s)
    }

    fn reset(&mut self) {
        self.next_numeric = 1;
        self.used.clear();
    }

    fn boxed_clone(&self) -> Box<dyn IdentityManager + Send + Sync> {
        Box::new(Self {
            next_numeric: self.next_numeric,
            used: self.used.clone(),
            successor: self.successor,
        })
    }
}

/// Allocates ids `1`, `2`, ... as JSON numbers.
///
#[derive(Debug, Clone)]
pub struct NumericIdentityManager {
    next: u64,
    used: HashSet<u64>,
}

impl NumericIdentityManager {
    pub fn new() -> Self {
        Self {
            next: 1,
            used: HashSet::new(),
        }
    }
}

impl Default for NumericIdentityManager {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentityManager for NumericIdentityManager {
    fn next(&mut self) -> Value {
        while self.used.contains(&self.next) {
            self.next += 1;
        }
        let id = self.next;
        self.used.insert(id);
        self.next += 1;
        Value::from(id)
    }

    fn set(&mut self, id: &Value) {
        if let Some(n) = id.as_u64() {
            self.used.insert(n);
        }
    }

    fn has(&self, id: &Value) -> bool {
        id.as_u64().map(|n| self.used.contains(&n)).unwrap_or(false)
    }

    fn reset(&mut self) {
        self.next = 1;
        self.used.clear();
    }

    fn boxed_clone(&self) -> Box<dyn IdentityManager + Send + Sync> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn string_manager_default_sequence() {
        let mut m = StringIdentityManager::new();
        assert_eq!(m.next(), json!("1"));
        assert_eq!(m.next(), json!("2"));
    }

    #[test]
    fn string_manager_skips_set_ids() {
        let mut m = StringIdentityManager::new();
        m.set(&json!("1"));
        assert_eq!(m.next(), json!("2"));
        assert!(m.has(&json!("1")));
    }

    #[test]
    fn string_manager_custom_successor() {
        let mut m = StringIdentityManager::with_successor(|n| format!("u{n}"));
        assert_eq!(m.next(), json!("u1"));
    }

    #[test]
    fn numeric_manager_sequence_and_set() {
        let mut m = NumericIdentityManager::new();
        assert_eq!(m.next(), json!(1));
        m.set(&json!(5));
        assert_eq!(m.next(), json!(2));
        assert!(m.has(&json!(5)));
    }

    #[test]
    fn reset_restores_initial_counter() {
        let mut m = NumericIdentityManager::new();
        m.next();
        m.next();
        m.reset();
        assert_eq!(m.next(), json!(1));
    }
}
