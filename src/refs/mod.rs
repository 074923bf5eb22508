// src/refs/mod.rs
//! Synchronous reference types
//!
//! - **Atom**: compare-and-set cell; `swap` retries until it wins
//! - **Volatile**: visible but non-atomic cell for single-writer use
//! - **Delay**: lazily evaluated, computed at most once
//!
//! Every reference in the crate (including futures, promises and agents)
//! implements [`Dereferenceable`]. Reads of atoms, volatiles and agents never
//! block; only futures, promises and an unrealized delay can.

pub mod atom;
pub mod delay;
pub mod reference;
pub mod volatile;

use crate::utils::errors::Result;
use std::time::Duration;

// Re-export commonly used types
pub use atom::Atom;
pub use delay::Delay;
pub use reference::{Validator, WatchFn};
pub use volatile::Volatile;

/// Uniform read access to a reference
pub trait Dereferenceable {
    type Value;

    /// Current (or eventual) value, blocking if the reference is not yet complete
    fn deref(&self) -> Result<Self::Value>;

    /// Like [`deref`](Self::deref), but gives up after `timeout` and returns
    /// `timeout_value` instead. References that never block ignore the timeout.
    fn deref_timeout(&self, timeout: Duration, timeout_value: Self::Value) -> Result<Self::Value> {
        let _ = (timeout, timeout_value);
        self.deref()
    }
}

/// References whose value is produced once, at some point after creation
pub trait Pending {
    /// Whether the value (or failure) is available without blocking
    fn is_realized(&self) -> bool;
}
