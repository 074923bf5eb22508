// src/agent/mailbox.rs
//! Agent mailbox: ordered queue of actions and await barriers

use crate::agent::await_coord::AwaitLatch;
use crate::runtime::context::ExecutionContext;
use crate::runtime::pool_manager::Dispatch;
use crate::utils::errors::{RefError, Result};
use std::collections::VecDeque;
use std::sync::Arc;

pub(crate) type ActionFn<V> = Box<dyn FnOnce(&V) -> Result<V> + Send>;

/// One queued state transition
pub(crate) struct Action<V> {
    pub(crate) f: ActionFn<V>,
    pub(crate) dispatch: Dispatch,
    /// Sender's bindings and sandbox context at send time
    pub(crate) context: ExecutionContext,
}

pub(crate) enum Entry<V> {
    Action(Action<V>),
    Barrier(Arc<AwaitLatch>),
}

/// Mailbox state, guarded by the agent's mutex
///
/// `running` is true from the moment an action is handed to a pool until the
/// agent goes idle again, so at most one action of an agent is in flight.
pub(crate) struct Mailbox<V> {
    queue: VecDeque<Entry<V>>,
    running: bool,
    error: Option<RefError>,
}

impl<V> Mailbox<V> {
    pub(crate) fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            running: false,
            error: None,
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running
    }

    pub(crate) fn error(&self) -> Option<&RefError> {
        self.error.as_ref()
    }

    /// Number of actions waiting behind the one in flight
    pub(crate) fn queued_actions(&self) -> usize {
        self.queue
            .iter()
            .filter(|entry| matches!(entry, Entry::Action(_)))
            .count()
    }

    #[cfg(test)]
    pub(crate) fn entries(&self) -> usize {
        self.queue.len()
    }

    /// Error to report to a sender or awaiter if the agent is failed
    pub(crate) fn check_healthy(&self) -> Result<()> {
        match &self.error {
            Some(error) => Err(RefError::AgentFailed(Box::new(error.clone()))),
            None => Ok(()),
        }
    }

    /// Queue `action`, or hand it back for immediate dispatch if idle
    pub(crate) fn push(&mut self, action: Action<V>) -> Option<Action<V>> {
        if self.running {
            self.queue.push_back(Entry::Action(action));
            None
        } else {
            self.running = true;
            Some(action)
        }
    }

    /// Place a barrier behind everything queued; an idle agent releases it now
    pub(crate) fn push_barrier(&mut self, latch: &Arc<AwaitLatch>) {
        if self.running {
            self.queue.push_back(Entry::Barrier(Arc::clone(latch)));
        } else {
            latch.count_down();
        }
    }

    /// Release leading barriers and take the next action; goes idle if none
    pub(crate) fn next_action(&mut self) -> Option<Action<V>> {
        while let Some(entry) = self.queue.pop_front() {
            match entry {
                Entry::Barrier(latch) => latch.count_down(),
                Entry::Action(action) => {
                    self.running = true;
                    return Some(action);
                }
            }
        }
        self.running = false;
        None
    }

    /// Enter the failed state, keeping queued actions for a later restart
    pub(crate) fn fail(&mut self, error: RefError) {
        self.running = false;
        let reported = RefError::AgentFailed(Box::new(error.clone()));
        self.queue.retain(|entry| match entry {
            Entry::Barrier(latch) => {
                latch.fail(reported.clone());
                false
            }
            Entry::Action(_) => true,
        });
        self.error = Some(error);
    }

    /// Leave the failed state; the caller resumes dispatch via `next_action`
    pub(crate) fn clear_error(&mut self, discard_queued: bool) -> Option<RefError> {
        if discard_queued {
            self.queue.clear();
        }
        self.running = true;
        self.error.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn action(n: i32) -> Action<i32> {
        Action {
            f: Box::new(move |v: &i32| Ok(v + n)),
            dispatch: Dispatch::Pooled,
            context: ExecutionContext::default(),
        }
    }

    #[test]
    fn test_first_push_dispatches_rest_queue() {
        let mut mailbox = Mailbox::new();
        assert!(mailbox.push(action(1)).is_some());
        assert!(mailbox.is_running());
        assert!(mailbox.push(action(2)).is_none());
        assert!(mailbox.push(action(3)).is_none());
        assert_eq!(mailbox.queued_actions(), 2);

        let next = mailbox.next_action().unwrap();
        assert_eq!((next.f)(&0).unwrap(), 2);
        let next = mailbox.next_action().unwrap();
        assert_eq!((next.f)(&0).unwrap(), 3);
        assert!(mailbox.next_action().is_none());
        assert!(!mailbox.is_running());
    }

    #[test]
    fn test_fail_keeps_actions() {
        let mut mailbox = Mailbox::new();
        mailbox.push(action(1));
        mailbox.push(action(2));

        mailbox.fail(RefError::failure("bad"));
        assert!(!mailbox.is_running());
        assert_eq!(mailbox.queued_actions(), 1);
        assert!(matches!(mailbox.check_healthy(), Err(RefError::AgentFailed(_))));

        assert_eq!(mailbox.clear_error(false), Some(RefError::failure("bad")));
        assert!(mailbox.check_healthy().is_ok());
        assert!(mailbox.next_action().is_some());
    }

    #[test]
    fn test_clear_error_discarding() {
        let mut mailbox = Mailbox::new();
        mailbox.push(action(1));
        mailbox.push(action(2));
        mailbox.fail(RefError::failure("bad"));

        mailbox.clear_error(true);
        assert_eq!(mailbox.queued_actions(), 0);
        assert!(mailbox.next_action().is_none());
        assert!(!mailbox.is_running());
    }
}
