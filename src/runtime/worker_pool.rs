// src/runtime/worker_pool.rs
//! Worker thread pool
//!
//! One implementation serves both pools the runtime needs:
//!
//! - **Bounded**: at most `max_size` jobs run at once; surplus jobs wait in
//!   the queue. Threads are created lazily and only retire when the pool
//!   shrinks, as soon as they finish their current job.
//! - **Cached**: a thread per concurrently running job (up to `max_size`),
//!   idle threads retire after `keep_alive`. Used for work that may block.
//!
//! ```text
//! submit() ──► [ crossbeam channel ] ──► worker 1 ─┐
//!                                   └──► worker 2 ─┼─► pending == 0 → notify
//!                                   └──► worker N ─┘
//! ```
//!
//! Shutdown drops the sending side: queued jobs still run, then workers see
//! the disconnect and exit.

use crate::observability::{POOL_TASKS_COMPLETED, POOL_TASKS_REJECTED, POOL_TASKS_SUBMITTED};
use crate::runtime::interrupt::{self, Signal};
use crate::utils::errors::{RefError, Result};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// A unit of work executed on a pool thread
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Sizing policy of a pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolKind {
    Bounded,
    Cached,
}

/// Configuration for a single worker pool
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Pool name, used in thread names, logs and metric labels
    pub name: String,

    /// Sizing policy
    pub kind: PoolKind,

    /// Maximum number of worker threads
    pub max_size: usize,

    /// Idle time before a surplus (or cached) worker retires
    pub keep_alive: Duration,

    /// Prefix for worker thread names
    pub thread_name_prefix: String,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            name: "pool".to_string(),
            kind: PoolKind::Bounded,
            max_size: 100,
            keep_alive: Duration::from_secs(60),
            thread_name_prefix: "refs".to_string(),
        }
    }
}

struct PoolState {
    sender: Option<Sender<Job>>,
    max_size: usize,
    live: usize,
    idle: usize,
    running: usize,
    queued: usize,
    pending: usize,
    completed: u64,
    shutdown: bool,
    next_worker_id: u64,
}

struct PoolShared {
    name: String,
    kind: PoolKind,
    keep_alive: Duration,
    thread_name_prefix: String,
    receiver: Receiver<Job>,
    state: Arc<Signal<PoolState>>,
}

/// Thread pool executing boxed jobs
pub struct WorkerPool {
    shared: Arc<PoolShared>,
}

impl WorkerPool {
    /// Create a pool; no threads are started until the first submission
    pub fn new(config: WorkerPoolConfig) -> Self {
        let (sender, receiver) = unbounded();
        let max_size = config.max_size.max(1);

        debug!(
            "Worker pool '{}' created ({:?}, max {} threads)",
            config.name, config.kind, max_size
        );

        let state = PoolState {
            sender: Some(sender),
            max_size,
            live: 0,
            idle: 0,
            running: 0,
            queued: 0,
            pending: 0,
            completed: 0,
            shutdown: false,
            next_worker_id: 0,
        };

        Self {
            shared: Arc::new(PoolShared {
                name: config.name,
                kind: config.kind,
                keep_alive: config.keep_alive,
                thread_name_prefix: config.thread_name_prefix,
                receiver,
                state: Arc::new(Signal::new(state)),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn kind(&self) -> PoolKind {
        self.shared.kind
    }

    /// Queue a job, starting a worker if none is free and the pool may grow
    pub fn submit(&self, job: Job) -> Result<()> {
        let mut state = self.shared.state.lock();

        let sender = match state.sender.as_ref() {
            Some(sender) => sender.clone(),
            None => {
                metrics::counter!(POOL_TASKS_REJECTED, "pool" => self.shared.name.clone())
                    .increment(1);
                return Err(RefError::PoolShutdown {
                    pool: self.shared.name.clone(),
                });
            }
        };

        state.queued += 1;
        state.pending += 1;

        if state.queued > state.idle && state.live < state.max_size {
            if let Err(e) = self.spawn_worker(&mut state) {
                if state.live == 0 {
                    state.queued -= 1;
                    state.pending -= 1;
                    return Err(e);
                }
                warn!("Pool '{}' could not grow, job will wait: {}", self.shared.name, e);
            }
        }

        // The shared receiver keeps the channel connected while the pool exists.
        sender.send(job).map_err(|_| RefError::PoolShutdown {
            pool: self.shared.name.clone(),
        })?;

        trace!("Job queued on pool '{}' ({} pending)", self.shared.name, state.pending);
        metrics::counter!(POOL_TASKS_SUBMITTED, "pool" => self.shared.name.clone()).increment(1);
        Ok(())
    }

    fn spawn_worker(&self, state: &mut PoolState) -> Result<()> {
        let worker_id = state.next_worker_id;
        let thread_name = format!(
            "{}-{}-{}",
            self.shared.thread_name_prefix, self.shared.name, worker_id
        );
        let shared = Arc::clone(&self.shared);

        thread::Builder::new()
            .name(thread_name)
            .spawn(move || run_worker(shared))?;

        state.next_worker_id += 1;
        state.live += 1;
        state.idle += 1;
        debug!("Pool '{}' started worker #{} ({} live)", self.shared.name, worker_id, state.live);
        Ok(())
    }

    /// Current thread limit
    pub fn maximum_size(&self) -> usize {
        self.shared.state.lock().max_size
    }

    /// Change the thread limit
    ///
    /// Shrinking takes effect for the next job: no more than the new limit
    /// run at once, and surplus workers retire after their current job.
    pub fn resize(&self, max_size: usize) -> Result<()> {
        let mut state = self.shared.state.lock();
        state.max_size = max_size.max(1);
        info!("Pool '{}' resized to {} threads", self.shared.name, state.max_size);
        self.shared.state.notify_all();

        while state.sender.is_some() && state.queued > state.idle && state.live < state.max_size {
            self.spawn_worker(&mut state)?;
        }
        Ok(())
    }

    /// Stop accepting jobs; queued and running jobs still complete
    pub fn shutdown(&self) {
        let mut state = self.shared.state.lock();
        if state.shutdown {
            return;
        }
        state.shutdown = true;
        state.sender = None;
        self.shared.state.notify_all();
        info!(
            "Pool '{}' shutting down ({} jobs pending)",
            self.shared.name, state.pending
        );
    }

    pub fn is_shutdown(&self) -> bool {
        self.shared.state.lock().shutdown
    }

    /// Shut down and every submitted job finished
    pub fn is_terminated(&self) -> bool {
        let state = self.shared.state.lock();
        state.shutdown && state.pending == 0
    }

    /// Block until shut down and drained, or the timeout elapses
    pub fn await_termination(&self, timeout: Duration) -> Result<bool> {
        self.shared
            .state
            .wait_until(interrupt::deadline_after(timeout), |state| {
                state.shutdown && state.pending == 0
            })
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.shared.state.lock();
        PoolStats {
            name: self.shared.name.clone(),
            kind: self.shared.kind,
            max_size: state.max_size,
            live_workers: state.live,
            idle_workers: state.idle,
            running_jobs: state.running,
            queued_jobs: state.queued,
            pending_jobs: state.pending,
            completed_jobs: state.completed,
            shutdown: state.shutdown,
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Lets the worker threads exit once the queue drains.
        self.shutdown();
    }
}

fn run_worker(shared: Arc<PoolShared>) {
    loop {
        match shared.receiver.recv_timeout(shared.keep_alive) {
            Ok(job) => {
                {
                    let mut state = shared.state.lock();
                    state.queued = state.queued.saturating_sub(1);
                    state.idle = state.idle.saturating_sub(1);
                    // A shrink may leave more workers than slots.
                    while state.running >= state.max_size {
                        shared.state.wait(&mut state);
                    }
                    state.running += 1;
                }

                if let Err(payload) = catch_unwind(AssertUnwindSafe(job)) {
                    error!(
                        "Job on pool '{}' panicked: {}",
                        shared.name,
                        RefError::from_panic(payload)
                    );
                }

                let mut state = shared.state.lock();
                state.idle += 1;
                state.running -= 1;
                state.pending = state.pending.saturating_sub(1);
                state.completed += 1;
                shared.state.notify_all();
                metrics::counter!(POOL_TASKS_COMPLETED, "pool" => shared.name.clone()).increment(1);

                if state.live > state.max_size {
                    retire(&shared, &mut state);
                    return;
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                let mut state = shared.state.lock();
                if state.queued > 0 {
                    continue;
                }
                let surplus = state.live > state.max_size;
                if surplus || shared.kind == PoolKind::Cached || state.shutdown {
                    retire(&shared, &mut state);
                    return;
                }
            }
            Err(RecvTimeoutError::Disconnected) => {
                let mut state = shared.state.lock();
                retire(&shared, &mut state);
                return;
            }
        }
    }
}

fn retire(shared: &PoolShared, state: &mut PoolState) {
    state.live = state.live.saturating_sub(1);
    state.idle = state.idle.saturating_sub(1);
    shared.state.notify_all();
    trace!("Worker on pool '{}' retired ({} live)", shared.name, state.live);
}

/// Pool statistics
#[derive(Debug, Clone)]
pub struct PoolStats {
    pub name: String,
    pub kind: PoolKind,
    pub max_size: usize,
    pub live_workers: usize,
    pub idle_workers: usize,
    pub running_jobs: usize,
    pub queued_jobs: usize,
    pub pending_jobs: usize,
    pub completed_jobs: u64,
    pub shutdown: bool,
}

impl PoolStats {
    /// Workers holding a job, running or waiting for a slot
    pub fn busy_workers(&self) -> usize {
        self.live_workers.saturating_sub(self.idle_workers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::time::Instant;

    fn pool(kind: PoolKind, max_size: usize) -> WorkerPool {
        WorkerPool::new(WorkerPoolConfig {
            name: "test".to_string(),
            kind,
            max_size,
            keep_alive: Duration::from_millis(50),
            ..Default::default()
        })
    }

    #[test]
    fn test_lazy_start() {
        let pool = pool(PoolKind::Bounded, 4);
        let stats = pool.stats();
        assert_eq!(stats.live_workers, 0);
        assert_eq!(stats.max_size, 4);
    }

    #[test]
    fn test_runs_all_jobs() {
        let pool = pool(PoolKind::Bounded, 4);
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..100 {
            let counter = Arc::clone(&counter);
            pool.submit(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        }

        pool.shutdown();
        assert!(pool.await_termination(Duration::from_secs(5)).unwrap());
        assert_eq!(counter.load(Ordering::SeqCst), 100);
        assert!(pool.stats().live_workers <= 4);
    }

    #[test]
    fn test_bounded_limit() {
        let pool = pool(PoolKind::Bounded, 2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for _ in 0..8 {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            pool.submit(Box::new(move || {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(10));
                running.fetch_sub(1, Ordering::SeqCst);
            }))
            .unwrap();
        }

        pool.shutdown();
        assert!(pool.await_termination(Duration::from_secs(5)).unwrap());
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[test]
    fn test_cached_grows_for_blocking_jobs() {
        let pool = pool(PoolKind::Cached, 16);
        let barrier = Arc::new(Barrier::new(5));

        // All four jobs must run at once for the barrier to release.
        for _ in 0..4 {
            let barrier = Arc::clone(&barrier);
            pool.submit(Box::new(move || {
                barrier.wait();
            }))
            .unwrap();
        }
        barrier.wait();

        pool.shutdown();
        assert!(pool.await_termination(Duration::from_secs(5)).unwrap());
    }

    #[test]
    fn test_cached_workers_retire() {
        let pool = pool(PoolKind::Cached, 16);
        pool.submit(Box::new(|| {})).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while pool.stats().live_workers > 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(pool.stats().live_workers, 0);
    }

    #[test]
    fn test_rejects_after_shutdown() {
        let pool = pool(PoolKind::Bounded, 2);
        pool.shutdown();
        assert!(pool.is_shutdown());

        let err = pool.submit(Box::new(|| {})).unwrap_err();
        assert!(matches!(err, RefError::PoolShutdown { .. }));
        assert!(pool.is_terminated());
    }

    #[test]
    fn test_await_termination_times_out_while_running() {
        let pool = pool(PoolKind::Bounded, 1);
        pool.submit(Box::new(|| thread::sleep(Duration::from_millis(200))))
            .unwrap();
        pool.shutdown();

        assert!(!pool.await_termination(Duration::from_millis(10)).unwrap());
        assert!(pool.await_termination(Duration::from_secs(5)).unwrap());
    }

    #[test]
    fn test_panicking_job_does_not_kill_pool() {
        let pool = pool(PoolKind::Bounded, 1);
        let counter = Arc::new(AtomicUsize::new(0));

        pool.submit(Box::new(|| panic!("job failure"))).unwrap();
        let c = Arc::clone(&counter);
        pool.submit(Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }))
        .unwrap();

        pool.shutdown();
        assert!(pool.await_termination(Duration::from_secs(5)).unwrap());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(pool.stats().completed_jobs, 2);
    }

    #[test]
    fn test_shrinking_busy_pool_limits_concurrency() {
        let pool = pool(PoolKind::Bounded, 4);
        let started = Arc::new(Barrier::new(5));
        let (release_tx, release_rx) = crossbeam_channel::unbounded::<()>();

        for _ in 0..4 {
            let started = Arc::clone(&started);
            let release_rx = release_rx.clone();
            pool.submit(Box::new(move || {
                started.wait();
                let _ = release_rx.recv();
            }))
            .unwrap();
        }
        started.wait();
        assert_eq!(pool.stats().live_workers, 4);

        pool.resize(1).unwrap();
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        for _ in 0..8 {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            pool.submit(Box::new(move || {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(5));
                running.fetch_sub(1, Ordering::SeqCst);
            }))
            .unwrap();
        }
        drop(release_tx);

        let deadline = Instant::now() + Duration::from_secs(5);
        while pool.stats().live_workers > 1 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert!(pool.stats().live_workers <= 1);

        pool.shutdown();
        assert!(pool.await_termination(Duration::from_secs(5)).unwrap());
        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert_eq!(pool.stats().completed_jobs, 12);
    }

    #[test]
    fn test_await_termination_unbounded_timeout() {
        let pool = pool(PoolKind::Cached, 4);
        pool.submit(Box::new(|| thread::sleep(Duration::from_millis(10))))
            .unwrap();
        pool.shutdown();
        assert!(pool.await_termination(Duration::MAX).unwrap());
    }

    #[test]
    fn test_resize() {
        let pool = pool(PoolKind::Bounded, 2);
        pool.resize(8).unwrap();
        assert_eq!(pool.maximum_size(), 8);
        pool.resize(0).unwrap();
        assert_eq!(pool.maximum_size(), 1);
    }
}
