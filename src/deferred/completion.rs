// src/deferred/completion.rs
//! Single-assignment completion slot
//!
//! The first `complete` wins and the outcome never changes afterwards.
//! Waiters block on an interruptible [`Signal`].

use crate::runtime::interrupt::Signal;
use crate::utils::errors::Result;
use std::sync::Arc;
use std::time::Instant;

pub(crate) struct Completion<V> {
    signal: Arc<Signal<Option<Result<V>>>>,
}

impl<V> Completion<V>
where
    V: Clone + Send + 'static,
{
    pub(crate) fn new() -> Self {
        Self {
            signal: Arc::new(Signal::new(None)),
        }
    }

    /// Store `outcome` unless one is already stored; returns whether it was
    pub(crate) fn complete(&self, outcome: Result<V>) -> bool {
        let mut slot = self.signal.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(outcome);
        self.signal.notify_all();
        true
    }

    pub(crate) fn is_done(&self) -> bool {
        self.signal.lock().is_some()
    }

    pub(crate) fn peek(&self) -> Option<Result<V>> {
        self.signal.lock().clone()
    }

    /// Block until completed or `deadline`; `Ok(None)` means timed out
    pub(crate) fn wait(&self, deadline: Option<Instant>) -> Result<Option<Result<V>>> {
        if self.signal.wait_until(deadline, Option::is_some)? {
            Ok(self.peek())
        } else {
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::errors::RefError;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_first_completion_wins() {
        let completion = Completion::new();
        assert!(!completion.is_done());
        assert!(completion.complete(Ok(1)));
        assert!(!completion.complete(Ok(2)));
        assert!(!completion.complete(Err(RefError::Cancelled)));
        assert_eq!(completion.peek(), Some(Ok(1)));
    }

    #[test]
    fn test_wait_wakes_on_complete() {
        let completion = Arc::new(Completion::new());
        let c = Arc::clone(&completion);
        let producer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            c.complete(Ok("ready"));
        });

        assert_eq!(completion.wait(None).unwrap(), Some(Ok("ready")));
        producer.join().unwrap();
    }

    #[test]
    fn test_wait_times_out() {
        let completion: Completion<i32> = Completion::new();
        let deadline = Instant::now() + Duration::from_millis(10);
        assert_eq!(completion.wait(Some(deadline)).unwrap(), None);
    }
}
