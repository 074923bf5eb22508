// src/refs/reference.rs
//! Validator and watch bookkeeping shared by mutable references
//!
//! Each reference owns one `RefCore`. Validators gate candidate values before
//! they are committed; watches are notified after a commit, synchronously on
//! the committing thread. Watches registered on one reference fire in no
//! particular order.

use crate::utils::errors::{RefError, Result};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::trace;

/// Predicate a candidate value must satisfy to be committed
pub type Validator<V> = Arc<dyn Fn(&V) -> bool + Send + Sync>;

/// Callback invoked with `(key, reference, old, new)` after each commit
pub type WatchFn<R, V> = Arc<dyn Fn(&str, &R, &V, &V) + Send + Sync>;

pub(crate) struct RefCore<R, V> {
    validator: RwLock<Option<Validator<V>>>,
    watches: DashMap<String, WatchFn<R, V>>,
}

impl<R, V> RefCore<R, V> {
    pub(crate) fn new(validator: Option<Validator<V>>) -> Self {
        Self {
            validator: RwLock::new(validator),
            watches: DashMap::new(),
        }
    }

    /// Run the validator (if any) against a candidate value
    pub(crate) fn validate(&self, candidate: &V) -> Result<()> {
        // Clone out so user code never runs under the lock.
        let validator = self.validator.read().clone();
        match validator {
            Some(validator) if !validator(candidate) => {
                trace!("Validator rejected candidate value");
                Err(RefError::ValidationRejected)
            }
            _ => Ok(()),
        }
    }

    /// Install a validator after checking it accepts the current value
    pub(crate) fn set_validator(&self, validator: Option<Validator<V>>, current: &V) -> Result<()> {
        if let Some(validator) = &validator {
            if !validator(current) {
                return Err(RefError::ValidationRejected);
            }
        }
        *self.validator.write() = validator;
        Ok(())
    }

    pub(crate) fn validator(&self) -> Option<Validator<V>> {
        self.validator.read().clone()
    }

    pub(crate) fn add_watch(&self, key: String, watch: WatchFn<R, V>) {
        self.watches.insert(key, watch);
    }

    pub(crate) fn remove_watch(&self, key: &str) -> bool {
        self.watches.remove(key).is_some()
    }

    pub(crate) fn watch_keys(&self) -> Vec<String> {
        self.watches.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Notify every watch of a committed transition
    pub(crate) fn notify(&self, reference: &R, old: &V, new: &V) {
        if self.watches.is_empty() {
            return;
        }
        // Snapshot so callbacks may add or remove watches on this reference.
        let watches: Vec<(String, WatchFn<R, V>)> = self
            .watches
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();

        for (key, watch) in watches {
            watch(&key, reference, old, new);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_validate() {
        let non_negative: Validator<i64> = Arc::new(|v: &i64| *v >= 0);
        let core: RefCore<(), i64> = RefCore::new(Some(non_negative));
        assert!(core.validate(&5).is_ok());
        assert_eq!(core.validate(&-1), Err(RefError::ValidationRejected));
    }

    #[test]
    fn test_set_validator_checks_current() {
        let core: RefCore<(), i64> = RefCore::new(None);
        let positive: Validator<i64> = Arc::new(|v: &i64| *v > 0);

        assert!(core.set_validator(Some(positive.clone()), &0).is_err());
        assert!(core.validator().is_none());

        core.set_validator(Some(positive), &1).unwrap();
        assert!(core.validator().is_some());

        core.set_validator(None, &-10).unwrap();
        assert!(core.validate(&-10).is_ok());
    }

    #[test]
    fn test_watches() {
        let core: RefCore<&'static str, i64> = RefCore::new(None);
        let seen = Arc::new(Mutex::new(Vec::new()));

        let s = Arc::clone(&seen);
        let watch: WatchFn<&'static str, i64> =
            Arc::new(move |key: &str, reference: &&'static str, old: &i64, new: &i64| {
                s.lock().push((key.to_string(), reference.to_string(), *old, *new));
            });
        core.add_watch("log".to_string(), watch);

        core.notify(&"counter", &1, &2);
        assert_eq!(
            *seen.lock(),
            vec![("log".to_string(), "counter".to_string(), 1, 2)]
        );

        assert!(core.remove_watch("log"));
        assert!(!core.remove_watch("log"));
        core.notify(&"counter", &2, &3);
        assert_eq!(seen.lock().len(), 1);
    }

    #[test]
    fn test_watch_replaced_by_key() {
        let core: RefCore<(), i64> = RefCore::new(None);
        let noop: WatchFn<(), i64> = Arc::new(|_: &str, _: &(), _: &i64, _: &i64| {});
        core.add_watch("w".to_string(), Arc::clone(&noop));
        core.add_watch("w".to_string(), noop);
        assert_eq!(core.watch_keys(), vec!["w".to_string()]);
    }
}
