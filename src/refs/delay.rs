// src/refs/delay.rs
//! Delay: lazily evaluated cell
//!
//! The thunk runs on the first `force`. Concurrent first callers block on the
//! same initialization instead of running the thunk again; afterwards every
//! caller gets the cached value or the cached failure.

use crate::refs::{Dereferenceable, Pending};
use crate::utils::errors::{RefError, Result};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::trace;

type Thunk<V> = Box<dyn FnOnce() -> Result<V> + Send>;

struct DelayInner<V> {
    thunk: Mutex<Option<Thunk<V>>>,
    cell: OnceCell<Result<V>>,
}

pub struct Delay<V> {
    inner: Arc<DelayInner<V>>,
}

impl<V> Clone for Delay<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V> Delay<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new<F>(thunk: F) -> Self
    where
        F: FnOnce() -> Result<V> + Send + 'static,
    {
        Self {
            inner: Arc::new(DelayInner {
                thunk: Mutex::new(Some(Box::new(thunk))),
                cell: OnceCell::new(),
            }),
        }
    }

    /// Evaluate on first call; return the cached outcome afterwards
    pub fn force(&self) -> Result<V> {
        self.inner
            .cell
            .get_or_init(|| {
                trace!("Realizing delay");
                match self.inner.thunk.lock().take() {
                    Some(thunk) => catch_unwind(AssertUnwindSafe(thunk))
                        .unwrap_or_else(|payload| Err(RefError::from_panic(payload))),
                    None => Err(RefError::failure("delay thunk already consumed")),
                }
            })
            .clone()
    }

    pub fn deref(&self) -> Result<V> {
        self.force()
    }

    pub fn is_realized(&self) -> bool {
        self.inner.cell.get().is_some()
    }
}

impl<V> Dereferenceable for Delay<V>
where
    V: Clone + Send + Sync + 'static,
{
    type Value = V;

    fn deref(&self) -> Result<V> {
        self.force()
    }
}

impl<V> Pending for Delay<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn is_realized(&self) -> bool {
        Delay::is_realized(self)
    }
}

impl<V: fmt::Debug> fmt::Debug for Delay<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delay")
            .field("value", &self.inner.cell.get())
            .finish()
    }
}
