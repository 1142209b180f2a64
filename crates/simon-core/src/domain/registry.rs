//! The key registry: which keys are intercepted and what each one triggers.
//!
//! The registry is written during setup and read on the hook thread for every
//! keystroke. Reads take an uncontended `RwLock` read guard and clone an `Arc`,
//! so a lookup never allocates. Insertion order is preserved for listing.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::info;

use super::binding::{BindingError, Challenge, KeyBinding};
use crate::keymap::KeyCode;

#[derive(Debug, Default)]
struct Entries {
    by_key: HashMap<KeyCode, Arc<KeyBinding>>,
    order: Vec<KeyCode>,
}

/// Ordered, thread-safe mapping from key to [`KeyBinding`].
#[derive(Debug, Default)]
pub struct KeyRegistry {
    entries: RwLock<Entries>,
}

impl KeyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `key` with `challenge`, replacing any existing binding.
    ///
    /// Returns the binding that was replaced, if any.
    ///
    /// # Errors
    ///
    /// Returns [`BindingError`] if the challenge has a zero length or an empty pattern.
    pub fn register(
        &self,
        key: KeyCode,
        challenge: Challenge,
    ) -> Result<Option<Arc<KeyBinding>>, BindingError> {
        match &challenge {
            Challenge::Length(0) => return Err(BindingError::NonPositiveLength(0)),
            Challenge::Pattern(steps) if steps.is_empty() => {
                return Err(BindingError::EmptyPattern)
            }
            _ => {}
        }

        let binding = Arc::new(KeyBinding::new(key, challenge));
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let previous = entries.by_key.insert(key, Arc::clone(&binding));
        if previous.is_none() {
            entries.order.push(key);
        }
        info!(
            %key,
            complexity = binding.challenge.complexity(),
            replaced = previous.is_some(),
            "registered key"
        );
        Ok(previous)
    }

    /// Looks up the binding for `key`.
    pub fn lookup(&self, key: KeyCode) -> Option<Arc<KeyBinding>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .by_key
            .get(&key)
            .cloned()
    }

    /// Returns `true` if `key` has a binding.
    pub fn contains(&self, key: KeyCode) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .by_key
            .contains_key(&key)
    }

    /// Returns all bindings in registration order.
    pub fn bindings(&self) -> Vec<Arc<KeyBinding>> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries
            .order
            .iter()
            .filter_map(|k| entries.by_key.get(k).cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .by_key
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes every binding.
    pub fn clear(&self) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.by_key.clear();
        entries.order.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: KeyCode = KeyCode(0x41);
    const W: KeyCode = KeyCode(0x57);

    #[test]
    fn test_register_then_lookup() {
        // Arrange
        let registry = KeyRegistry::new();

        // Act
        registry
            .register(A, Challenge::Pattern(vec![3, 1, 3, 1]))
            .expect("valid binding");

        // Assert
        let binding = registry.lookup(A).expect("A must be registered");
        assert_eq!(binding.key, A);
        assert_eq!(binding.challenge, Challenge::Pattern(vec![3, 1, 3, 1]));
        assert!(registry.lookup(W).is_none());
    }

    #[test]
    fn test_register_replaces_existing_binding() {
        let registry = KeyRegistry::new();
        registry.register(A, Challenge::Length(3)).unwrap();

        let previous = registry.register(A, Challenge::Length(5)).unwrap();

        assert_eq!(previous.map(|b| b.challenge.clone()), Some(Challenge::Length(3)));
        assert_eq!(registry.lookup(A).unwrap().challenge, Challenge::Length(5));
        assert_eq!(registry.len(), 1, "replacement must not add a second entry");
    }

    #[test]
    fn test_register_rejects_zero_length_and_empty_pattern() {
        let registry = KeyRegistry::new();

        assert_eq!(
            registry.register(A, Challenge::Length(0)),
            Err(BindingError::NonPositiveLength(0))
        );
        assert_eq!(
            registry.register(A, Challenge::Pattern(vec![])),
            Err(BindingError::EmptyPattern)
        );
        assert!(registry.is_empty());
    }

    #[test]
    fn test_bindings_preserve_registration_order() {
        let registry = KeyRegistry::new();
        registry.register(W, Challenge::Length(5)).unwrap();
        registry.register(A, Challenge::Length(4)).unwrap();
        registry.register(W, Challenge::Length(6)).unwrap();

        let keys: Vec<KeyCode> = registry.bindings().iter().map(|b| b.key).collect();

        assert_eq!(keys, vec![W, A]);
    }

    #[test]
    fn test_clear_empties_registry() {
        let registry = KeyRegistry::new();
        registry.register(A, Challenge::Length(1)).unwrap();

        registry.clear();

        assert!(registry.is_empty());
        assert!(!registry.contains(A));
    }
}
