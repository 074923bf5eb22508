// src/refs/volatile.rs
//! Volatile: visible, non-atomic mutable cell
//!
//! Writes are published immediately to every reader, but `swap` is a plain
//! read, compute, write. Two concurrent swaps can both read the same value
//! and one update is lost. Use it for state with a single logical writer and
//! many readers; use [`Atom`](crate::refs::Atom) otherwise.

use crate::refs::reference::{RefCore, Validator};
use crate::refs::Dereferenceable;
use crate::utils::errors::Result;
use arc_swap::ArcSwap;
use std::fmt;
use std::sync::Arc;

struct VolatileInner<V> {
    value: ArcSwap<V>,
    core: RefCore<Volatile<V>, V>,
}

pub struct Volatile<V> {
    inner: Arc<VolatileInner<V>>,
}

impl<V> Clone for Volatile<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V> Volatile<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new(initial: V) -> Self {
        Self {
            inner: Arc::new(VolatileInner {
                value: ArcSwap::from_pointee(initial),
                core: RefCore::new(None),
            }),
        }
    }

    pub fn with_validator<F>(initial: V, validator: F) -> Result<Self>
    where
        F: Fn(&V) -> bool + Send + Sync + 'static,
    {
        let volatile = Self::new(initial);
        volatile.set_validator(validator)?;
        Ok(volatile)
    }

    pub fn deref(&self) -> V {
        V::clone(&self.inner.value.load())
    }

    pub fn reset(&self, value: V) -> Result<V> {
        self.inner.core.validate(&value)?;
        let new = Arc::new(value);
        let old = self.inner.value.swap(Arc::clone(&new));
        self.inner.core.notify(self, &old, &new);
        Ok(V::clone(&new))
    }

    /// Read once, apply `f` once, write once
    pub fn swap<F>(&self, f: F) -> Result<V>
    where
        F: FnOnce(&V) -> Result<V>,
    {
        let old = self.inner.value.load_full();
        let next = f(&old)?;
        self.inner.core.validate(&next)?;

        let new = Arc::new(next);
        self.inner.value.store(Arc::clone(&new));
        self.inner.core.notify(self, &old, &new);
        Ok(V::clone(&new))
    }

    pub fn set_validator<F>(&self, validator: F) -> Result<()>
    where
        F: Fn(&V) -> bool + Send + Sync + 'static,
    {
        self.inner
            .core
            .set_validator(Some(Arc::new(validator)), &self.inner.value.load())
    }

    pub fn clear_validator(&self) {
        let _ = self.inner.core.set_validator(None, &self.inner.value.load());
    }

    pub fn validator(&self) -> Option<Validator<V>> {
        self.inner.core.validator()
    }

    pub fn add_watch<F>(&self, key: impl Into<String>, watch: F)
    where
        F: Fn(&str, &Volatile<V>, &V, &V) + Send + Sync + 'static,
    {
        self.inner.core.add_watch(key.into(), Arc::new(watch));
    }

    pub fn remove_watch(&self, key: &str) -> bool {
        self.inner.core.remove_watch(key)
    }
}

impl<V> Dereferenceable for Volatile<V>
where
    V: Clone + Send + Sync + 'static,
{
    type Value = V;

    fn deref(&self) -> Result<V> {
        Ok(Volatile::deref(self))
    }
}

impl<V: fmt::Debug> fmt::Debug for Volatile<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Volatile")
            .field("value", &*self.inner.value.load())
            .finish()
    }
}
