// src/refs/atom.rs
//! Atom: compare-and-set mutable cell
//!
//! The value lives behind an `ArcSwap`. Every update is a read, a pure
//! computation, a validation and a pointer compare-and-set; a lost race means
//! the computation is re-run against the fresh value. Update functions may
//! therefore run more than once per call and must not have side effects.

use crate::observability::ATOM_CAS_RETRIES;
use crate::refs::reference::{RefCore, Validator};
use crate::refs::Dereferenceable;
use crate::utils::errors::Result;
use arc_swap::ArcSwap;
use crossbeam::utils::Backoff;
use std::fmt;
use std::sync::Arc;
use tracing::trace;
use ulid::Ulid;

struct AtomInner<V> {
    id: Ulid,
    value: ArcSwap<V>,
    core: RefCore<Atom<V>, V>,
}

/// Shared, atomically updated cell
pub struct Atom<V> {
    inner: Arc<AtomInner<V>>,
}

impl<V> Clone for Atom<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V> Atom<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Create an atom without a validator
    pub fn new(initial: V) -> Self {
        Self::build(initial, None)
    }

    /// Create an atom whose every value must satisfy `validator`
    ///
    /// Fails with `ValidationRejected` if `initial` does not.
    pub fn with_validator<F>(initial: V, validator: F) -> Result<Self>
    where
        F: Fn(&V) -> bool + Send + Sync + 'static,
    {
        let validator: Validator<V> = Arc::new(validator);
        let atom = Self::build(initial, Some(validator));
        atom.inner.core.validate(&atom.inner.value.load())?;
        Ok(atom)
    }

    fn build(initial: V, validator: Option<Validator<V>>) -> Self {
        Self {
            inner: Arc::new(AtomInner {
                id: Ulid::new(),
                value: ArcSwap::from_pointee(initial),
                core: RefCore::new(validator),
            }),
        }
    }

    pub fn id(&self) -> Ulid {
        self.inner.id
    }

    /// Current value; never blocks
    pub fn deref(&self) -> V {
        V::clone(&self.inner.value.load())
    }

    /// Replace the value unconditionally (after validation)
    pub fn reset(&self, value: V) -> Result<V> {
        self.reset_vals(value).map(|(_, new)| new)
    }

    /// Replace the value, returning `(old, new)`
    pub fn reset_vals(&self, value: V) -> Result<(V, V)> {
        self.inner.core.validate(&value)?;
        let new = Arc::new(value);
        let old = self.inner.value.swap(Arc::clone(&new));
        self.inner.core.notify(self, &old, &new);
        Ok((V::clone(&old), V::clone(&new)))
    }

    /// Apply `f` to the current value until the result is committed
    pub fn swap<F>(&self, f: F) -> Result<V>
    where
        F: FnMut(&V) -> Result<V>,
    {
        self.swap_vals(f).map(|(_, new)| new)
    }

    /// Like [`swap`](Self::swap), returning `(old, new)` of the winning attempt
    pub fn swap_vals<F>(&self, mut f: F) -> Result<(V, V)>
    where
        F: FnMut(&V) -> Result<V>,
    {
        let backoff = Backoff::new();
        loop {
            let current = self.inner.value.load_full();
            let next = f(&current)?;
            self.inner.core.validate(&next)?;

            let next = Arc::new(next);
            let previous = self.inner.value.compare_and_swap(&current, Arc::clone(&next));
            if Arc::ptr_eq(&previous, &current) {
                self.inner.core.notify(self, &current, &next);
                return Ok((V::clone(&current), V::clone(&next)));
            }

            trace!("Atom {} lost compare-and-set, retrying", self.inner.id);
            metrics::counter!(ATOM_CAS_RETRIES).increment(1);
            backoff.spin();
        }
    }

    /// Commit `new` only if the current value equals `old`
    ///
    /// `new` is validated before the comparison. Returns whether it was
    /// committed.
    pub fn compare_and_set(&self, old: &V, new: V) -> Result<bool>
    where
        V: PartialEq,
    {
        self.inner.core.validate(&new)?;
        let new = Arc::new(new);
        loop {
            let current = self.inner.value.load_full();
            if *current != *old {
                return Ok(false);
            }

            let previous = self.inner.value.compare_and_swap(&current, Arc::clone(&new));
            if Arc::ptr_eq(&previous, &current) {
                self.inner.core.notify(self, &current, &new);
                return Ok(true);
            }
            // Another writer got in between; compare again with its value.
        }
    }

    /// Install a validator; fails if it rejects the current value
    pub fn set_validator<F>(&self, validator: F) -> Result<()>
    where
        F: Fn(&V) -> bool + Send + Sync + 'static,
    {
        self.inner
            .core
            .set_validator(Some(Arc::new(validator)), &self.inner.value.load())
    }

    pub fn clear_validator(&self) {
        // Removing a validator cannot fail.
        let _ = self.inner.core.set_validator(None, &self.inner.value.load());
    }

    pub fn validator(&self) -> Option<Validator<V>> {
        self.inner.core.validator()
    }

    /// Register `watch` under `key`, replacing any watch with the same key
    pub fn add_watch<F>(&self, key: impl Into<String>, watch: F)
    where
        F: Fn(&str, &Atom<V>, &V, &V) + Send + Sync + 'static,
    {
        self.inner.core.add_watch(key.into(), Arc::new(watch));
    }

    pub fn remove_watch(&self, key: &str) -> bool {
        self.inner.core.remove_watch(key)
    }

    pub fn watch_keys(&self) -> Vec<String> {
        self.inner.core.watch_keys()
    }
}

impl<V> Dereferenceable for Atom<V>
where
    V: Clone + Send + Sync + 'static,
{
    type Value = V;

    fn deref(&self) -> Result<V> {
        Ok(Atom::deref(self))
    }
}

impl<V: fmt::Debug> fmt::Debug for Atom<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Atom")
            .field("id", &self.inner.id)
            .field("value", &*self.inner.value.load())
            .finish()
    }
}
