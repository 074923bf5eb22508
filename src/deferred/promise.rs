// src/deferred/promise.rs
//! Promise: single-assignment value delivered by any thread

use crate::deferred::completion::Completion;
use crate::refs::{Dereferenceable, Pending};
use crate::runtime::interrupt;
use crate::utils::errors::{RefError, Result};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

pub struct Promise<V> {
    completion: Arc<Completion<V>>,
}

impl<V> Clone for Promise<V> {
    fn clone(&self) -> Self {
        Self {
            completion: Arc::clone(&self.completion),
        }
    }
}

impl<V> Promise<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            completion: Arc::new(Completion::new()),
        }
    }

    /// Deliver `value` and wake every reader
    ///
    /// Only the first delivery counts; later ones are ignored and return
    /// false.
    pub fn deliver(&self, value: V) -> bool {
        let delivered = self.completion.complete(Ok(value));
        if !delivered {
            trace!("Promise already delivered; ignoring value");
        }
        delivered
    }

    /// Block until delivered; `Interrupted` if the calling thread is interrupted
    pub fn deref(&self) -> Result<V> {
        match self.completion.wait(None)? {
            Some(outcome) => outcome,
            None => Err(RefError::Interrupted),
        }
    }

    /// Like [`deref`](Self::deref), returning `timeout_value` after `timeout`
    pub fn deref_timeout(&self, timeout: Duration, timeout_value: V) -> Result<V> {
        match self.completion.wait(interrupt::deadline_after(timeout))? {
            Some(outcome) => outcome,
            None => Ok(timeout_value),
        }
    }

    pub fn is_realized(&self) -> bool {
        self.completion.is_done()
    }
}

impl<V> Default for Promise<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<V> Dereferenceable for Promise<V>
where
    V: Clone + Send + Sync + 'static,
{
    type Value = V;

    fn deref(&self) -> Result<V> {
        Promise::deref(self)
    }

    fn deref_timeout(&self, timeout: Duration, timeout_value: V) -> Result<V> {
        Promise::deref_timeout(self, timeout, timeout_value)
    }
}

impl<V> Pending for Promise<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn is_realized(&self) -> bool {
        Promise::is_realized(self)
    }
}

impl<V: fmt::Debug + Clone + Send + 'static> fmt::Debug for Promise<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise")
            .field("value", &self.completion.peek())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;

    #[test]
    fn test_first_delivery_wins() {
        let promise = Promise::new();
        assert!(!promise.is_realized());
        assert!(promise.deliver(10));
        assert!(!promise.deliver(20));
        assert!(promise.is_realized());
        assert_eq!(promise.deref().unwrap(), 10);
    }

    #[test]
    fn test_readers_wake_on_delivery() {
        let promise: Promise<String> = Promise::new();
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let promise = promise.clone();
                thread::spawn(move || promise.deref())
            })
            .collect();

        thread::sleep(Duration::from_millis(20));
        promise.deliver("hello".to_string());

        for reader in readers {
            assert_eq!(reader.join().unwrap().unwrap(), "hello");
        }
    }

    #[test]
    fn test_timeout_value() {
        let promise = Promise::new();
        assert_eq!(promise.deref_timeout(Duration::from_millis(10), 0).unwrap(), 0);
        assert!(!promise.is_realized());
        promise.deliver(5);
        assert_eq!(promise.deref_timeout(Duration::from_millis(10), 0).unwrap(), 5);
    }

    #[test]
    fn test_unbounded_timeout() {
        let promise = Promise::new();
        promise.deliver(1);
        assert_eq!(promise.deref_timeout(Duration::MAX, 0).unwrap(), 1);
    }

    #[test]
    fn test_interrupted_reader() {
        let promise: Promise<i32> = Promise::new();
        let (tx, rx) = mpsc::channel();
        let reader = {
            let promise = promise.clone();
            thread::spawn(move || {
                tx.send(interrupt::current()).unwrap();
                promise.deref()
            })
        };

        rx.recv().unwrap().interrupt();
        assert_eq!(reader.join().unwrap(), Err(RefError::Interrupted));
        assert!(!promise.is_realized());
    }
}
