// src/agent/await_coord.rs
//! Waiting for agents to drain
//!
//! `await_agents` places a barrier at the tail of every agent's mailbox. A
//! barrier is released when the agent reaches it, which happens only after
//! every action queued ahead of it has committed or been handled by the error
//! policy. Actions sent after the barrier was placed are not waited for.
//!
//! An idle agent releases its barrier immediately. A failed agent releases it
//! with `AgentFailed`, both when already failed and when it fails while the
//! caller is waiting.

use crate::agent::scope;
use crate::runtime::interrupt::{self, Signal};
use crate::utils::errors::{RefError, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

struct LatchState {
    remaining: usize,
    failure: Option<RefError>,
}

/// Countdown shared by the barriers of one await call
pub struct AwaitLatch {
    signal: Arc<Signal<LatchState>>,
}

impl AwaitLatch {
    fn new(count: usize) -> Self {
        Self {
            signal: Arc::new(Signal::new(LatchState {
                remaining: count,
                failure: None,
            })),
        }
    }

    pub(crate) fn count_down(&self) {
        let mut state = self.signal.lock();
        state.remaining = state.remaining.saturating_sub(1);
        if state.remaining == 0 {
            self.signal.notify_all();
        }
    }

    pub(crate) fn fail(&self, error: RefError) {
        let mut state = self.signal.lock();
        if state.failure.is_none() {
            state.failure = Some(error);
        }
        self.signal.notify_all();
    }

    fn wait(&self, deadline: Option<Instant>) -> Result<bool> {
        let released = self
            .signal
            .wait_until(deadline, |state| state.remaining == 0 || state.failure.is_some())?;
        match self.signal.lock().failure.clone() {
            Some(error) => Err(error),
            None => Ok(released),
        }
    }
}

/// A reference that can be awaited
pub trait Awaitable {
    /// Release `latch` once everything currently queued has been processed
    ///
    /// Fails with `AgentFailed` if the reference is failed.
    fn enqueue_barrier(&self, latch: &Arc<AwaitLatch>) -> Result<()>;
}

/// Block until every agent has processed the actions queued so far
pub fn await_agents(agents: &[&dyn Awaitable]) -> Result<()> {
    await_until(None, agents).map(|_| ())
}

/// Like [`await_agents`], giving up after `timeout`
///
/// Returns `Ok(false)` on timeout.
pub fn await_for(timeout: Duration, agents: &[&dyn Awaitable]) -> Result<bool> {
    await_until(interrupt::deadline_after(timeout), agents)
}

fn await_until(deadline: Option<Instant>, agents: &[&dyn Awaitable]) -> Result<bool> {
    if let Some(agent) = scope::current_agent_id() {
        debug!("Refusing await inside action of agent {}", agent);
        return Err(RefError::AwaitInAction);
    }
    if agents.is_empty() {
        return Ok(true);
    }

    let latch = Arc::new(AwaitLatch::new(agents.len()));
    for agent in agents {
        agent.enqueue_barrier(&latch)?;
    }
    latch.wait(deadline)
}
