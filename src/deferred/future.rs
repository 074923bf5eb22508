// src/deferred/future.rs
//! Future: one-shot computation on the bounded pool
//!
//! `submit` authorizes the operation and captures the caller's bindings and
//! sandbox context before anything is queued; the task body runs with that
//! snapshot installed and with the future's own interrupt handle, so
//! [`Future::cancel`] reaches it through `interrupt::is_interrupted()` or an
//! interruptible wait.
//!
//! # Lifecycle
//!
//! ```text
//! submit ──► queued ──► running ──► done(value | failure)
//!              │           │
//!              └─ cancel ──┴──► done(Cancelled)   (task result discarded)
//! ```

use crate::deferred::completion::Completion;
use crate::refs::{Dereferenceable, Pending};
use crate::runtime::interrupt::{self, InterruptHandle};
use crate::runtime::pool_manager::{Dispatch, PoolManager};
use crate::runtime::sandbox::Operation;
use crate::utils::errors::{RefError, Result};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};
use ulid::Ulid;

struct FutureInner<V> {
    id: Ulid,
    completion: Completion<V>,
    cancelled: AtomicBool,
    task_interrupt: InterruptHandle,
}

impl<V> FutureInner<V>
where
    V: Clone + Send + 'static,
{
    fn run<F>(&self, task: F)
    where
        F: FnOnce() -> Result<V>,
    {
        if self.completion.is_done() {
            trace!("Future {} cancelled before it started", self.id);
            return;
        }

        let _interrupt = interrupt::install(self.task_interrupt.clone());
        let outcome = catch_unwind(AssertUnwindSafe(task))
            .unwrap_or_else(|payload| Err(RefError::from_panic(payload)));

        if !self.completion.complete(outcome) {
            trace!("Future {} finished after cancellation; result dropped", self.id);
        }
    }
}

/// Handle to an asynchronous computation
pub struct Future<V> {
    inner: Arc<FutureInner<V>>,
}

impl<V> Clone for Future<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V> Future<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Run `task` on the bounded pool
    ///
    /// Authorization happens here, on the calling thread; a denial returns
    /// `AuthorizationDenied` and nothing is queued.
    pub fn submit<F>(pools: &PoolManager, task: F) -> Result<Self>
    where
        F: FnOnce() -> Result<V> + Send + 'static,
    {
        let future = Self {
            inner: Arc::new(FutureInner {
                id: Ulid::new(),
                completion: Completion::new(),
                cancelled: AtomicBool::new(false),
                task_interrupt: InterruptHandle::new(),
            }),
        };

        let inner = Arc::clone(&future.inner);
        pools.submit(Dispatch::Pooled, Operation::SubmitFuture, move || inner.run(task))?;

        debug!("Future {} submitted", future.inner.id);
        Ok(future)
    }

    pub fn id(&self) -> Ulid {
        self.inner.id
    }

    /// Block until the task finishes
    ///
    /// A failed task's error is returned as is. If the calling thread is
    /// interrupted while waiting, the future is cancelled and `Interrupted`
    /// is returned.
    pub fn deref(&self) -> Result<V> {
        self.await_outcome(None)?.ok_or(RefError::Interrupted)
    }

    /// Like [`deref`](Self::deref), returning `timeout_value` if the task is
    /// still running after `timeout`. The task is not cancelled.
    pub fn deref_timeout(&self, timeout: Duration, timeout_value: V) -> Result<V> {
        let deadline = interrupt::deadline_after(timeout);
        Ok(self.await_outcome(deadline)?.unwrap_or(timeout_value))
    }

    fn await_outcome(&self, deadline: Option<Instant>) -> Result<Option<V>> {
        match self.inner.completion.wait(deadline) {
            Ok(Some(outcome)) => outcome.map(Some),
            Ok(None) => Ok(None),
            Err(RefError::Interrupted) => {
                debug!("Wait on future {} interrupted, cancelling", self.inner.id);
                self.cancel();
                Err(RefError::Interrupted)
            }
            Err(e) => Err(e),
        }
    }

    /// Request cancellation; returns false if the future already completed
    pub fn cancel(&self) -> bool {
        if !self.inner.completion.complete(Err(RefError::Cancelled)) {
            return false;
        }
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.task_interrupt.interrupt();
        debug!("Future {} cancelled", self.inner.id);
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    pub fn is_done(&self) -> bool {
        self.inner.completion.is_done()
    }

    /// Block until every future is done
    ///
    /// Returns `Ok(false)` if `timeout` elapses first. If the calling thread
    /// is interrupted, every future in the set is cancelled and
    /// `Interrupted` is returned.
    pub fn wait_all(futures: &[Future<V>], timeout: Option<Duration>) -> Result<bool> {
        let deadline = timeout.and_then(interrupt::deadline_after);
        for future in futures {
            match future.inner.completion.wait(deadline) {
                Ok(Some(_)) => {}
                Ok(None) => return Ok(false),
                Err(e) => {
                    if e == RefError::Interrupted {
                        for future in futures {
                            future.cancel();
                        }
                    }
                    return Err(e);
                }
            }
        }
        Ok(true)
    }
}

impl<V> Dereferenceable for Future<V>
where
    V: Clone + Send + Sync + 'static,
{
    type Value = V;

    fn deref(&self) -> Result<V> {
        Future::deref(self)
    }

    fn deref_timeout(&self, timeout: Duration, timeout_value: V) -> Result<V> {
        Future::deref_timeout(self, timeout, timeout_value)
    }
}

impl<V> Pending for Future<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn is_realized(&self) -> bool {
        self.is_done()
    }
}

impl<V: fmt::Debug + Clone + Send + 'static> fmt::Debug for Future<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Future")
            .field("id", &self.inner.id)
            .field("outcome", &self.inner.completion.peek())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::context;
    use crate::runtime::sandbox::{Sandbox, SandboxConfig};
    use crate::utils::config::PoolConfig;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;
    use std::thread;

    #[test]
    fn test_deref_blocks_for_result() {
        let pools = PoolManager::default();
        let future = Future::submit(&pools, || {
            thread::sleep(Duration::from_millis(20));
            Ok(100)
        })
        .unwrap();

        assert_eq!(future.deref().unwrap(), 100);
        assert!(future.is_done());
        assert!(!future.is_cancelled());
        // Repeated deref never re-runs the task.
        assert_eq!(future.deref().unwrap(), 100);
    }

    #[test]
    fn test_timeout_value_then_result() {
        let pools = PoolManager::default();
        let future = Future::submit(&pools, || {
            thread::sleep(Duration::from_millis(300));
            Ok(100)
        })
        .unwrap();

        assert_eq!(future.deref_timeout(Duration::from_millis(50), -1).unwrap(), -1);
        assert!(!future.is_cancelled());
        assert_eq!(future.deref().unwrap(), 100);
    }

    #[test]
    fn test_unbounded_timeouts() {
        let pools = PoolManager::default();
        let future = Future::submit(&pools, || Ok(3)).unwrap();

        assert_eq!(future.deref_timeout(Duration::MAX, -1).unwrap(), 3);
        assert!(Future::wait_all(&[future], Some(Duration::MAX)).unwrap());
    }

    #[test]
    fn test_task_failure_returned_verbatim() {
        let pools = PoolManager::default();
        let future: Future<i32> = Future::submit(&pools, || {
            Err(RefError::AuthorizationDenied {
                operation: Operation::PoolTask,
                reason: "inner check".to_string(),
            })
        })
        .unwrap();

        let err = future.deref().unwrap_err();
        assert!(err.is_security());
        assert_eq!(future.deref().unwrap_err(), err);
    }

    #[test]
    fn test_panic_becomes_error() {
        let pools = PoolManager::default();
        let future: Future<i32> = Future::submit(&pools, || panic!("task blew up")).unwrap();
        assert_eq!(
            future.deref(),
            Err(RefError::Panicked("task blew up".to_string()))
        );
    }

    #[test]
    fn test_cancel_running_task() {
        let pools = PoolManager::default();
        let (started_tx, started_rx) = mpsc::channel();
        let future = Future::submit(&pools, move || {
            started_tx.send(()).unwrap();
            interrupt::sleep(Duration::from_secs(30))?;
            Ok(1)
        })
        .unwrap();

        started_rx.recv().unwrap();
        assert!(future.cancel());
        assert!(future.is_cancelled());
        assert!(future.is_done());
        assert_eq!(future.deref(), Err(RefError::Cancelled));
        assert!(!future.cancel());
    }

    #[test]
    fn test_cancel_before_start_skips_body() {
        let pools = PoolManager::new(PoolConfig {
            max_size: 1,
            ..Default::default()
        });
        let ran = Arc::new(AtomicUsize::new(0));

        let (release_tx, release_rx) = mpsc::channel::<()>();
        let blocker = Future::submit(&pools, move || {
            let _ = release_rx.recv();
            Ok(0)
        })
        .unwrap();

        let r = Arc::clone(&ran);
        let queued = Future::submit(&pools, move || {
            r.fetch_add(1, Ordering::SeqCst);
            Ok(1)
        })
        .unwrap();

        assert!(queued.cancel());
        release_tx.send(()).unwrap();
        blocker.deref().unwrap();

        pools.shutdown();
        assert!(pools.await_termination(Duration::from_secs(5)).unwrap());
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert_eq!(queued.deref(), Err(RefError::Cancelled));
    }

    #[test]
    fn test_interrupted_deref_cancels() {
        let pools = Arc::new(PoolManager::default());
        let future = Future::submit(&pools, || {
            interrupt::sleep(Duration::from_secs(30))?;
            Ok(1)
        })
        .unwrap();

        let (handle_tx, handle_rx) = mpsc::channel();
        let waiter = {
            let future = future.clone();
            thread::spawn(move || {
                handle_tx.send(interrupt::current()).unwrap();
                future.deref()
            })
        };

        let handle = handle_rx.recv().unwrap();
        thread::sleep(Duration::from_millis(20));
        handle.interrupt();

        assert_eq!(waiter.join().unwrap(), Err(RefError::Interrupted));
        assert!(future.is_cancelled());
    }

    #[test]
    fn test_bindings_conveyed_not_shared() {
        let pools = PoolManager::default();
        let _binding = context::bind("level", json!(1));

        let future = Future::submit(&pools, || {
            let seen = context::lookup("level");
            context::set("level", json!(2));
            Ok(seen)
        })
        .unwrap();

        assert_eq!(future.deref().unwrap(), Some(json!(1)));
        assert_eq!(context::lookup("level"), Some(json!(1)));
    }

    #[test]
    fn test_denied_submission() {
        let pools = PoolManager::with_authorizer(
            PoolConfig::default(),
            Arc::new(Sandbox::new(SandboxConfig {
                allow_futures: false,
                ..Default::default()
            })),
        );

        let err = Future::submit(&pools, || Ok(1)).unwrap_err();
        assert!(matches!(
            err,
            RefError::AuthorizationDenied { operation: Operation::SubmitFuture, .. }
        ));
        assert!(pools.stats().is_empty());
    }

    #[test]
    fn test_wait_all() {
        let pools = PoolManager::default();
        let futures: Vec<_> = (0..4)
            .map(|i| {
                Future::submit(&pools, move || {
                    thread::sleep(Duration::from_millis(10 * i));
                    Ok(i)
                })
                .unwrap()
            })
            .collect();

        assert!(Future::wait_all(&futures, Some(Duration::from_secs(5))).unwrap());
        let sum: u64 = futures.iter().map(|f| f.deref().unwrap()).sum();
        assert_eq!(sum, 6);

        let slow = vec![Future::submit(&pools, || {
            thread::sleep(Duration::from_millis(200));
            Ok(0_u64)
        })
        .unwrap()];
        assert!(!Future::wait_all(&slow, Some(Duration::from_millis(10))).unwrap());
    }
}
