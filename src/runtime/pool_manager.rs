// src/runtime/pool_manager.rs
//! Owner of the two worker pools
//!
//! Futures and `Agent::send` run on the bounded pool; `Agent::send_off`
//! actions, which may block, run on the cached pool so they cannot starve
//! the bounded one. Both pools are created on first use and shut down
//! together. A `PoolManager` is constructed by the embedding runtime and
//! handed to every future and agent; there is no global instance.

use crate::runtime::context::ExecutionContext;
use crate::runtime::interrupt;
use crate::runtime::sandbox::{self, AllowAll, Authorizer, Operation, Sandbox};
use crate::runtime::worker_pool::{Job, PoolKind, PoolStats, WorkerPool, WorkerPoolConfig};
use crate::utils::config::{PoolConfig, RuntimeConfig};
use crate::utils::errors::{RefError, Result};
use once_cell::sync::OnceCell;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

const BOUNDED_POOL: &str = "bounded";
const BLOCKING_POOL: &str = "blocking";

/// Which pool a unit of work runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Bounded pool (futures, `send`)
    Pooled,
    /// Cached pool for work that may block (`send_off`)
    Blocking,
}

/// Shared executor context for futures and agents
pub struct PoolManager {
    config: PoolConfig,
    authorizer: Arc<dyn Authorizer>,
    max_size: AtomicUsize,
    bounded: OnceCell<WorkerPool>,
    blocking: OnceCell<WorkerPool>,
    shutdown: AtomicBool,
}

impl PoolManager {
    /// Pools with the given sizing; every operation is authorized
    pub fn new(config: PoolConfig) -> Self {
        Self::with_authorizer(config, Arc::new(AllowAll))
    }

    /// Pools guarded by an external authorizer
    pub fn with_authorizer(config: PoolConfig, authorizer: Arc<dyn Authorizer>) -> Self {
        let max_size = config.max_size.max(1);
        Self {
            config,
            authorizer,
            max_size: AtomicUsize::new(max_size),
            bounded: OnceCell::new(),
            blocking: OnceCell::new(),
            shutdown: AtomicBool::new(false),
        }
    }

    /// Pools and sandbox policy from a loaded configuration
    pub fn from_config(config: &RuntimeConfig) -> Result<Arc<Self>> {
        config.validate()?;
        let authorizer = Arc::new(Sandbox::new(config.sandbox.clone()));
        Ok(Arc::new(Self::with_authorizer(config.pools.clone(), authorizer)))
    }

    pub fn authorizer(&self) -> &dyn Authorizer {
        self.authorizer.as_ref()
    }

    /// Check `operation` for the calling thread
    pub fn authorize(&self, operation: Operation) -> Result<()> {
        sandbox::authorize(self.authorizer.as_ref(), operation)
    }

    /// Authorize, then run `job` on a pool with the caller's context installed
    pub fn submit<F>(&self, dispatch: Dispatch, operation: Operation, job: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.authorize(operation)?;
        let context = ExecutionContext::capture();
        self.execute(
            dispatch,
            Box::new(move || {
                let _context = context.install();
                job();
            }),
        )
    }

    /// Run an already-authorized job as is
    pub(crate) fn execute(&self, dispatch: Dispatch, job: Job) -> Result<()> {
        self.pool(dispatch)?.submit(job)
    }

    fn pool(&self, dispatch: Dispatch) -> Result<&WorkerPool> {
        let name = match dispatch {
            Dispatch::Pooled => BOUNDED_POOL,
            Dispatch::Blocking => BLOCKING_POOL,
        };
        if self.is_shutdown() {
            return Err(RefError::PoolShutdown {
                pool: name.to_string(),
            });
        }

        let pool = match dispatch {
            Dispatch::Pooled => self.bounded.get_or_init(|| {
                WorkerPool::new(WorkerPoolConfig {
                    name: BOUNDED_POOL.to_string(),
                    kind: PoolKind::Bounded,
                    max_size: self.max_size.load(Ordering::SeqCst),
                    keep_alive: self.config.keep_alive(),
                    thread_name_prefix: self.config.thread_name_prefix.clone(),
                })
            }),
            Dispatch::Blocking => self.blocking.get_or_init(|| {
                WorkerPool::new(WorkerPoolConfig {
                    name: BLOCKING_POOL.to_string(),
                    kind: PoolKind::Cached,
                    max_size: self.config.blocking_max_size,
                    keep_alive: self.config.keep_alive(),
                    thread_name_prefix: self.config.thread_name_prefix.clone(),
                })
            }),
        };

        // Created concurrently with shutdown(): close it so submit rejects.
        if self.is_shutdown() {
            pool.shutdown();
        }
        Ok(pool)
    }

    /// Thread limit of the bounded pool
    pub fn maximum_size(&self) -> usize {
        self.max_size.load(Ordering::SeqCst)
    }

    /// Change the thread limit of the bounded pool
    pub fn resize(&self, max_size: usize) -> Result<()> {
        let max_size = max_size.max(1);
        self.max_size.store(max_size, Ordering::SeqCst);
        match self.bounded.get() {
            Some(pool) => pool.resize(max_size),
            None => Ok(()),
        }
    }

    /// Stop both pools from accepting work; submitted work still finishes
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Shutting down worker pools");
        if let Some(pool) = self.bounded.get() {
            pool.shutdown();
        }
        if let Some(pool) = self.blocking.get() {
            pool.shutdown();
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Wait for both pools to drain after `shutdown`
    ///
    /// Returns `Ok(false)` if the timeout elapsed first, including when
    /// `shutdown` was never called.
    pub fn await_termination(&self, timeout: Duration) -> Result<bool> {
        let deadline = interrupt::deadline_after(timeout);
        if !self.is_shutdown() {
            interrupt::sleep(timeout)?;
            return Ok(false);
        }
        for pool in [self.bounded.get(), self.blocking.get()].into_iter().flatten() {
            let remaining = match deadline {
                Some(deadline) => deadline.saturating_duration_since(Instant::now()),
                None => timeout,
            };
            if !pool.await_termination(remaining)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Statistics for the pools created so far
    pub fn stats(&self) -> Vec<PoolStats> {
        [self.bounded.get(), self.blocking.get()]
            .into_iter()
            .flatten()
            .map(WorkerPool::stats)
            .collect()
    }
}

impl Default for PoolManager {
    fn default() -> Self {
        Self::new(PoolConfig::default())
    }
}

impl Drop for PoolManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::context;
    use crate::runtime::sandbox::{SandboxConfig, SandboxContext};
    use serde_json::json;
    use std::sync::mpsc;

    #[test]
    fn test_pools_are_lazy() {
        let pools = PoolManager::default();
        assert!(pools.stats().is_empty());
        assert_eq!(pools.maximum_size(), 100);
    }

    #[test]
    fn test_submit_propagates_context() {
        let pools = PoolManager::default();
        let (tx, rx) = mpsc::channel();

        let _binding = context::bind("user", json!("ada"));
        let _sandbox = SandboxContext::for_principal("ada").enter();
        pools
            .submit(Dispatch::Pooled, Operation::PoolTask, move || {
                let seen = (
                    context::lookup("user"),
                    SandboxContext::current().principal().map(str::to_string),
                );
                tx.send(seen).unwrap();
            })
            .unwrap();

        let (binding, principal) = rx.recv().unwrap();
        assert_eq!(binding, Some(json!("ada")));
        assert_eq!(principal.as_deref(), Some("ada"));
    }

    #[test]
    fn test_worker_does_not_retain_bindings() {
        let pools = PoolManager::new(PoolConfig {
            max_size: 1,
            ..Default::default()
        });
        let (tx, rx) = mpsc::channel();

        {
            let _binding = context::bind("secret", json!(42));
            pools
                .submit(Dispatch::Pooled, Operation::PoolTask, || {})
                .unwrap();
        }
        // Raw job: nothing installs a context, so it sees what the worker kept.
        pools
            .execute(
                Dispatch::Pooled,
                Box::new(move || {
                    tx.send(context::lookup("secret")).unwrap();
                }),
            )
            .unwrap();

        assert_eq!(rx.recv().unwrap(), None);
    }

    #[test]
    fn test_denied_before_any_thread() {
        let config = RuntimeConfig {
            sandbox: SandboxConfig {
                allow_blocking_actions: false,
                ..Default::default()
            },
            ..Default::default()
        };
        let pools = PoolManager::from_config(&config).unwrap();

        let err = pools
            .submit(Dispatch::Blocking, Operation::SendOffAction, || {})
            .unwrap_err();
        assert!(err.is_security());
        assert!(pools.stats().is_empty());
    }

    #[test]
    fn test_shutdown_and_await() {
        let pools = PoolManager::default();
        pools
            .submit(Dispatch::Pooled, Operation::PoolTask, || {
                std::thread::sleep(Duration::from_millis(50));
            })
            .unwrap();

        assert!(!pools.await_termination(Duration::from_millis(1)).unwrap());
        pools.shutdown();
        assert!(pools.is_shutdown());
        assert!(pools.await_termination(Duration::from_secs(5)).unwrap());

        let err = pools
            .submit(Dispatch::Blocking, Operation::PoolTask, || {})
            .unwrap_err();
        assert!(matches!(err, RefError::PoolShutdown { .. }));
    }

    #[test]
    fn test_await_termination_unbounded_timeout() {
        let pools = PoolManager::default();
        pools
            .submit(Dispatch::Blocking, Operation::PoolTask, || {
                std::thread::sleep(Duration::from_millis(20));
            })
            .unwrap();
        pools.shutdown();
        assert!(pools.await_termination(Duration::MAX).unwrap());
    }

    #[test]
    fn test_resize_before_and_after_creation() {
        let pools = PoolManager::default();
        pools.resize(4).unwrap();
        assert_eq!(pools.maximum_size(), 4);

        pools
            .submit(Dispatch::Pooled, Operation::PoolTask, || {})
            .unwrap();
        assert_eq!(pools.stats()[0].max_size, 4);

        pools.resize(2).unwrap();
        assert_eq!(pools.stats()[0].max_size, 2);
    }
}
