// src/agent/scope.rs
//! Per-thread state of a running agent action
//!
//! While an action runs, the worker thread records which agent it belongs to
//! and collects any sends the action makes. Held sends are dispatched only
//! after the action commits and dropped if it fails.

use std::cell::{Cell, RefCell};
use ulid::Ulid;

pub(crate) type HeldSend = Box<dyn FnOnce()>;

thread_local! {
    static CURRENT_AGENT: Cell<Option<Ulid>> = const { Cell::new(None) };
    static HELD: RefCell<Option<Vec<HeldSend>>> = const { RefCell::new(None) };
}

/// Id of the agent whose action is running on this thread
pub fn current_agent_id() -> Option<Ulid> {
    CURRENT_AGENT.with(Cell::get)
}

/// Dispatch the sends held by the running action now instead of at commit
///
/// Returns how many were released; zero outside of an action.
pub fn release_pending_sends() -> usize {
    let sends = HELD.with(|held| held.borrow_mut().as_mut().map(std::mem::take));
    let sends = sends.unwrap_or_default();
    let count = sends.len();
    for send in sends {
        send();
    }
    count
}

/// Whether sends on this thread are being held for a running action
pub(crate) fn is_holding() -> bool {
    HELD.with(|held| held.borrow().is_some())
}

/// Queue `send` until the running action finishes; runs it now outside one
pub(crate) fn hold(send: HeldSend) {
    let send = HELD.with(|held| match held.borrow_mut().as_mut() {
        Some(sends) => {
            sends.push(send);
            None
        }
        None => Some(send),
    });
    if let Some(send) = send {
        send();
    }
}

/// Marks this thread as running an action of `agent` until [`exit`](Self::exit)
pub(crate) struct ActionScope {
    previous_agent: Option<Ulid>,
    previous_held: Option<Vec<HeldSend>>,
    exited: bool,
}

impl ActionScope {
    pub(crate) fn enter(agent: Ulid) -> Self {
        let previous_agent = CURRENT_AGENT.with(|current| current.replace(Some(agent)));
        let previous_held = HELD.with(|held| held.replace(Some(Vec::new())));
        Self {
            previous_agent,
            previous_held,
            exited: false,
        }
    }

    /// Leave the scope, returning the sends the action held
    pub(crate) fn exit(mut self) -> Vec<HeldSend> {
        self.exited = true;
        self.restore().unwrap_or_default()
    }

    fn restore(&mut self) -> Option<Vec<HeldSend>> {
        CURRENT_AGENT.with(|current| current.set(self.previous_agent));
        let previous = self.previous_held.take();
        HELD.with(|held| held.replace(previous))
    }
}

impl Drop for ActionScope {
    fn drop(&mut self) {
        if !self.exited {
            self.restore();
        }
    }
}
