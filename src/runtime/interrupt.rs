// src/runtime/interrupt.rs
//! Cooperative thread interruption
//!
//! Rust threads cannot be interrupted from the outside, so every thread gets
//! an [`InterruptHandle`] instead. Interrupting a handle sets a flag and wakes
//! whatever [`Signal`] the owning thread is currently blocked on, so a blocked
//! `deref` or `await` returns [`RefError::Interrupted`] without polling.
//!
//! Worker threads install the handle of the task they run, which is how
//! `Future::cancel` reaches a running task body.

use crate::utils::errors::{RefError, Result};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Something a blocked thread can be woken from
pub(crate) trait Wake: Send + Sync {
    fn wake(&self);
}

struct InterruptState {
    interrupted: AtomicBool,
    parked: Mutex<Option<Arc<dyn Wake>>>,
    sleep: Arc<Signal<()>>,
}

/// Interrupt flag for one thread (or one task)
#[derive(Clone)]
pub struct InterruptHandle {
    state: Arc<InterruptState>,
}

impl InterruptHandle {
    pub fn new() -> Self {
        Self {
            state: Arc::new(InterruptState {
                interrupted: AtomicBool::new(false),
                parked: Mutex::new(None),
                sleep: Arc::new(Signal::new(())),
            }),
        }
    }

    /// Set the flag and wake the owner if it is blocked
    pub fn interrupt(&self) {
        self.state.interrupted.store(true, Ordering::SeqCst);

        let parked = self.state.parked.lock().clone();
        if let Some(target) = parked {
            target.wake();
        }
        self.state.sleep.wake();
    }

    pub fn is_interrupted(&self) -> bool {
        self.state.interrupted.load(Ordering::SeqCst)
    }

    /// Clear the flag, returning whether it was set
    pub fn clear(&self) -> bool {
        self.state.interrupted.swap(false, Ordering::SeqCst)
    }

    pub fn same_as(&self, other: &InterruptHandle) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }

    fn park_on(&self, target: Arc<dyn Wake>) -> ParkGuard<'_> {
        *self.state.parked.lock() = Some(target);
        ParkGuard { handle: self }
    }
}

impl Default for InterruptHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InterruptHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterruptHandle")
            .field("interrupted", &self.is_interrupted())
            .finish()
    }
}

struct ParkGuard<'a> {
    handle: &'a InterruptHandle,
}

impl Drop for ParkGuard<'_> {
    fn drop(&mut self) {
        *self.handle.state.parked.lock() = None;
    }
}

thread_local! {
    static CURRENT: RefCell<InterruptHandle> = RefCell::new(InterruptHandle::new());
}

/// Handle for the calling thread
pub fn current() -> InterruptHandle {
    CURRENT.with(|current| current.borrow().clone())
}

/// Whether the calling thread (or the task it runs) has been interrupted
pub fn is_interrupted() -> bool {
    CURRENT.with(|current| current.borrow().is_interrupted())
}

/// Clear the calling thread's flag, returning whether it was set
pub fn clear() -> bool {
    CURRENT.with(|current| current.borrow().clear())
}

/// Return `Interrupted` (and clear the flag) if the calling thread was interrupted
pub fn check() -> Result<()> {
    if clear() {
        Err(RefError::Interrupted)
    } else {
        Ok(())
    }
}

/// Deadline `timeout` from now; `None` when it lies beyond what `Instant` can hold
pub(crate) fn deadline_after(timeout: Duration) -> Option<Instant> {
    Instant::now().checked_add(timeout)
}

/// Sleep that ends early with `Interrupted`
pub fn sleep(duration: Duration) -> Result<()> {
    let handle = current();
    let deadline = deadline_after(duration);
    let signal = Arc::clone(&handle.state.sleep);

    let mut guard = signal.lock();
    loop {
        if handle.clear() {
            return Err(RefError::Interrupted);
        }
        match deadline {
            Some(deadline) => {
                if signal.condvar.wait_until(&mut guard, deadline).timed_out() {
                    return if handle.clear() {
                        Err(RefError::Interrupted)
                    } else {
                        Ok(())
                    };
                }
            }
            None => signal.condvar.wait(&mut guard),
        }
    }
}

/// Make `handle` the calling thread's handle until the guard drops
pub(crate) fn install(handle: InterruptHandle) -> InstallGuard {
    let previous = CURRENT.with(|current| current.replace(handle));
    InstallGuard {
        previous: Some(previous),
    }
}

pub(crate) struct InstallGuard {
    previous: Option<InterruptHandle>,
}

impl Drop for InstallGuard {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            CURRENT.with(|current| {
                current.replace(previous);
            });
        }
    }
}

/// Mutex-protected state plus a condition variable, wakeable by interrupts
pub(crate) struct Signal<T> {
    state: Mutex<T>,
    condvar: Condvar,
}

impl<T> Signal<T> {
    pub(crate) fn new(state: T) -> Self {
        Self {
            state: Mutex::new(state),
            condvar: Condvar::new(),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, T> {
        self.state.lock()
    }

    pub(crate) fn notify_all(&self) {
        self.condvar.notify_all();
    }

    /// Park on the condition variable without watching for interrupts
    pub(crate) fn wait(&self, guard: &mut MutexGuard<'_, T>) {
        self.condvar.wait(guard);
    }
}

impl<T: Send + 'static> Signal<T> {
    /// Block until `ready` holds, the deadline passes, or the thread is interrupted
    ///
    /// Returns `Ok(true)` when ready and `Ok(false)` on timeout.
    pub(crate) fn wait_until<F>(
        self: &Arc<Self>,
        deadline: Option<Instant>,
        mut ready: F,
    ) -> Result<bool>
    where
        F: FnMut(&T) -> bool,
    {
        let handle = current();
        let waker: Arc<dyn Wake> = self.clone();
        let _parked = handle.park_on(waker);

        let mut guard = self.state.lock();
        loop {
            if ready(&guard) {
                return Ok(true);
            }
            if handle.clear() {
                return Err(RefError::Interrupted);
            }
            match deadline {
                Some(deadline) => {
                    if self.condvar.wait_until(&mut guard, deadline).timed_out() {
                        return Ok(ready(&guard));
                    }
                }
                None => self.condvar.wait(&mut guard),
            }
        }
    }
}

impl<T: Send> Wake for Signal<T> {
    fn wake(&self) {
        let _guard = self.state.lock();
        self.condvar.notify_all();
    }
}
