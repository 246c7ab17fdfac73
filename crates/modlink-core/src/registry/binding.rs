//! Live binding cells.
//!
//! A cell is shared by reference between the exporting module and every
//! importer that captured it. Importers hold the cell, not its value, so a
//! binding assigned after the import was linked is still observed.

use serde_json::Value;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

/// Current state of a binding as seen by a reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Binding {
    /// Declared but not assigned yet, e.g. read during a cycle.
    Uninitialized,
    Initialized(Value),
}

impl Binding {
    #[must_use]
    pub fn value(self) -> Option<Value> {
        match self {
            Self::Initialized(v) => Some(v),
            Self::Uninitialized => None,
        }
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        matches!(self, Self::Initialized(_))
    }
}

enum Slot {
    Uninitialized,
    Value(Value),
    /// Re-export: reads go to another module's cell.
    Forward(BindingCell),
}

/// Shared, mutable binding cell.
#[derive(Clone)]
pub struct BindingCell(Arc<RwLock<Slot>>);

impl BindingCell {
    #[must_use]
    pub fn new() -> Self {
        Self(Arc::new(RwLock::new(Slot::Uninitialized)))
    }

    #[must_use]
    pub fn initialized(value: Value) -> Self {
        Self(Arc::new(RwLock::new(Slot::Value(value))))
    }

    /// Read through any forwards. Forward chains never loop, see
    /// [`BindingCell::forward_to`].
    #[must_use]
    pub fn get(&self) -> Binding {
        let mut current = self.clone();
        loop {
            let next = {
                let slot = current.0.read().unwrap_or_else(PoisonError::into_inner);
                match &*slot {
                    Slot::Uninitialized => return Binding::Uninitialized,
                    Slot::Value(v) => return Binding::Initialized(v.clone()),
                    Slot::Forward(target) => target.clone(),
                }
            };
            current = next;
        }
    }

    /// Last cell of the forward chain starting at `self`.
    fn terminal(&self) -> BindingCell {
        let mut current = self.clone();
        loop {
            let next = match &*current.0.read().unwrap_or_else(PoisonError::into_inner) {
                Slot::Forward(target) => target.clone(),
                _ => break,
            };
            current = next;
        }
        current
    }

    pub fn set(&self, value: Value) {
        *self.0.write().unwrap_or_else(PoisonError::into_inner) = Slot::Value(value);
    }

    /// Make this cell a live alias of `target`.
    ///
    /// Returns `false` and leaves the cell untouched when `target` already
    /// reads through this cell; such a re-export cycle never resolves.
    pub fn forward_to(&self, target: &BindingCell) -> bool {
        if target.terminal().ptr_eq(self) {
            tracing::debug!("re-export cycle left unresolved");
            return false;
        }
        *self.0.write().unwrap_or_else(PoisonError::into_inner) = Slot::Forward(target.clone());
        true
    }

    /// Mutate an initialized value in place; returns `false` when the binding
    /// is uninitialized or forwarded.
    pub fn update(&self, f: impl FnOnce(&mut Value)) -> bool {
        let mut slot = self.0.write().unwrap_or_else(PoisonError::into_inner);
        match &mut *slot {
            Slot::Value(v) => {
                f(v);
                true
            }
            _ => false,
        }
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.get().is_initialized()
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Default for BindingCell {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for BindingCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.get() {
            Binding::Uninitialized => f.write_str("BindingCell(<uninitialized>)"),
            Binding::Initialized(v) => write!(f, "BindingCell({v})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_captured_cell_sees_later_assignment() {
        let exported = BindingCell::new();
        let captured = exported.clone();
        assert_eq!(captured.get(), Binding::Uninitialized);

        exported.set(json!(42));
        assert_eq!(captured.get(), Binding::Initialized(json!(42)));
    }

    #[test]
    fn test_forward_is_live() {
        let source = BindingCell::new();
        let reexport = BindingCell::new();
        reexport.forward_to(&source);
        assert!(!reexport.is_initialized());

        source.set(json!("late"));
        assert_eq!(reexport.get().value(), Some(json!("late")));
    }

    #[test]
    fn test_forward_cycle_is_refused() {
        let a = BindingCell::new();
        let b = BindingCell::new();
        assert!(a.forward_to(&b));
        assert!(!b.forward_to(&a));
        assert!(!a.forward_to(&a.clone()));
        assert_eq!(a.get(), Binding::Uninitialized);

        // `b` holds no reference back to `a`.
        assert_eq!(Arc::strong_count(&a.0), 1);
        b.set(json!(5));
        assert_eq!(a.get().value(), Some(json!(5)));
    }

    #[test]
    fn test_long_forward_chain_resolves() {
        let source = BindingCell::initialized(json!("end"));
        let mut head = source.clone();
        for _ in 0..100 {
            let next = BindingCell::new();
            assert!(next.forward_to(&head));
            head = next;
        }
        assert_eq!(head.get().value(), Some(json!("end")));
    }

    #[test]
    fn test_update_in_place() {
        let cell = BindingCell::initialized(json!({}));
        assert!(cell.update(|v| v["x"] = json!(1)));
        assert_eq!(cell.get().value(), Some(json!({"x": 1})));
        assert!(!BindingCell::new().update(|_| {}));
    }
}
