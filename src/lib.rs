// src/lib.rs
//! Sentra Lab Reference Types Library
//!
//! This library provides the concurrency primitives of an embeddable
//! scripting runtime: shared references that scripts can read and update from
//! any thread without touching raw threads themselves.
//!
//! # Architecture
//!
//! The crate is structured into several key modules:
//!
//! - **refs**: Atom, Volatile and Delay; synchronous references
//! - **deferred**: Future and Promise; values completed later
//! - **agent**: Agents with ordered mailboxes and the await coordinator
//! - **runtime**: Worker pools, context propagation, sandbox, interruption
//! - **observability**: Tracing setup and metric names
//! - **utils**: Configuration and errors
//!
//! # Example
//!
//! ```no_run
//! use sentra_lab_refs::{await_agents, Agent, Atom, PoolManager};
//! use std::sync::Arc;
//!
//! # fn main() -> sentra_lab_refs::Result<()> {
//! let pools = Arc::new(PoolManager::default());
//!
//! let counter = Atom::new(0);
//! counter.swap(|v| Ok(v + 1))?;
//!
//! let agent = Agent::new(&pools, 100);
//! agent.send(|v| Ok(v + 5))?;
//! agent.send_off(|v| Ok(v + 7))?;
//! await_agents(&[&agent])?;
//! assert_eq!(agent.deref(), 112);
//! # Ok(())
//! # }
//! ```

// Public module exports
pub mod agent;
pub mod deferred;
pub mod observability;
pub mod refs;
pub mod runtime;
pub mod utils;

// Re-export commonly used types
pub use agent::{await_agents, await_for, Agent, AgentBuilder, AgentStatus, Awaitable, ErrorMode};
pub use deferred::{Future, Promise};
pub use refs::{Atom, Delay, Dereferenceable, Pending, Volatile};
pub use runtime::interrupt::InterruptHandle;
pub use runtime::pool_manager::{Dispatch, PoolManager};
pub use utils::config::RuntimeConfig;
pub use utils::errors::{RefError, Result};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
