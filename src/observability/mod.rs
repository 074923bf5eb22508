// src/observability/mod.rs
//! Logging and metrics
//!
//! The library only emits through the `tracing` and `metrics` facades. Hosts
//! that want output call [`init_tracing`] once and install their own metrics
//! recorder.

use crate::utils::config::LoggingConfig;
use crate::utils::errors::{RefError, Result};
use tracing_subscriber::EnvFilter;

/// Tasks accepted by a worker pool (label: `pool`)
pub const POOL_TASKS_SUBMITTED: &str = "refs_pool_tasks_submitted_total";

/// Tasks that finished running on a worker pool (label: `pool`)
pub const POOL_TASKS_COMPLETED: &str = "refs_pool_tasks_completed_total";

/// Submissions refused after shutdown (label: `pool`)
pub const POOL_TASKS_REJECTED: &str = "refs_pool_tasks_rejected_total";

/// Agent actions whose result was committed
pub const AGENT_ACTIONS_COMMITTED: &str = "refs_agent_actions_committed_total";

/// Agent actions that raised or failed validation
pub const AGENT_ACTIONS_FAILED: &str = "refs_agent_actions_failed_total";

/// Atom compare-and-set attempts lost to a concurrent writer
pub const ATOM_CAS_RETRIES: &str = "refs_atom_cas_retries_total";

/// Install a global `tracing` subscriber
///
/// `RUST_LOG` takes precedence over `config.level`. Calling this more than
/// once is harmless; later calls keep the first subscriber.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| RefError::Config(format!("invalid log filter: {}", e)))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(true);

    // Already-installed subscriber is not an error.
    if config.json {
        let _ = builder.json().try_init();
    } else {
        let _ = builder.try_init();
    }

    Ok(())
}
