// src/agent/actor.rs
//! Agent: asynchronous, ordered state transitions
//!
//! An agent owns a value that changes only by applying actions sent to it.
//! Actions are queued in a mailbox and applied one at a time, in send order,
//! on the worker pools: `send` uses the bounded pool and `send_off` the
//! cached pool for actions that may block. Reading the value never blocks.
//!
//! # State machine
//!
//! ```text
//!            send / send_off
//!   Idle ─────────────────────► Running ◄──┐ next action
//!    ▲                            │  │      │
//!    │        mailbox empty       │  └──────┘
//!    └────────────────────────────┤
//!    │                            │ action fails, mode = Fail
//!    │      restart(state)        ▼
//!    └───────────────────────── Failed   (send/await rejected)
//! ```
//!
//! A failing action never changes the value. With [`ErrorMode::Continue`] the
//! error handler is told and the mailbox moves on; with [`ErrorMode::Fail`]
//! the agent keeps the error and stops dispatching until restarted.

use crate::agent::await_coord::{AwaitLatch, Awaitable};
use crate::agent::mailbox::{Action, ActionFn, Mailbox};
use crate::agent::scope::{self, ActionScope};
use crate::observability::{AGENT_ACTIONS_COMMITTED, AGENT_ACTIONS_FAILED};
use crate::refs::reference::{RefCore, Validator};
use crate::refs::Dereferenceable;
use crate::runtime::context::ExecutionContext;
use crate::runtime::pool_manager::{Dispatch, PoolManager};
use crate::runtime::sandbox::Operation;
use crate::utils::errors::{RefError, Result};
use arc_swap::ArcSwap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error, trace, warn};
use ulid::Ulid;

/// Callback told about every failed action: `(agent, error)`
pub type ErrorHandler<V> = Arc<dyn Fn(&Agent<V>, &RefError) + Send + Sync>;

/// What a failed action does to the agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorMode {
    /// Report to the error handler and keep processing
    Continue,
    /// Keep the error and reject further actions until restarted
    Fail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Idle,
    Running,
    Failed,
}

struct ErrorPolicy<V> {
    mode: ErrorMode,
    handler: Option<ErrorHandler<V>>,
}

struct AgentInner<V> {
    id: Ulid,
    pools: Arc<PoolManager>,
    state: ArcSwap<V>,
    core: RefCore<Agent<V>, V>,
    mailbox: Mutex<Mailbox<V>>,
    policy: RwLock<ErrorPolicy<V>>,
}

/// Handle to an agent; clones share the same agent
pub struct Agent<V> {
    inner: Arc<AgentInner<V>>,
}

impl<V> Clone for Agent<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Builder for agents with a validator or an error policy
pub struct AgentBuilder<V> {
    initial: V,
    validator: Option<Validator<V>>,
    error_handler: Option<ErrorHandler<V>>,
    error_mode: Option<ErrorMode>,
}

impl<V> AgentBuilder<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn validator<F>(mut self, validator: F) -> Self
    where
        F: Fn(&V) -> bool + Send + Sync + 'static,
    {
        self.validator = Some(Arc::new(validator));
        self
    }

    /// Handler for failed actions; implies [`ErrorMode::Continue`] unless a
    /// mode is set explicitly
    pub fn error_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Agent<V>, &RefError) + Send + Sync + 'static,
    {
        self.error_handler = Some(Arc::new(handler));
        self
    }

    pub fn error_mode(mut self, mode: ErrorMode) -> Self {
        self.error_mode = Some(mode);
        self
    }

    /// Create the agent; fails if the validator rejects the initial value
    pub fn build(self, pools: &Arc<PoolManager>) -> Result<Agent<V>> {
        let mode = match (self.error_mode, &self.error_handler) {
            (Some(mode), _) => mode,
            (None, Some(_)) => ErrorMode::Continue,
            (None, None) => ErrorMode::Fail,
        };

        let core = RefCore::new(self.validator);
        core.validate(&self.initial)?;

        let agent = Agent {
            inner: Arc::new(AgentInner {
                id: Ulid::new(),
                pools: Arc::clone(pools),
                state: ArcSwap::from_pointee(self.initial),
                core,
                mailbox: Mutex::new(Mailbox::new()),
                policy: RwLock::new(ErrorPolicy {
                    mode,
                    handler: self.error_handler,
                }),
            }),
        };
        debug!("Created agent {} ({:?} mode)", agent.inner.id, mode);
        Ok(agent)
    }
}

impl<V> Agent<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Agent in [`ErrorMode::Fail`] without validator or handler
    pub fn new(pools: &Arc<PoolManager>, initial: V) -> Self {
        let agent = Self {
            inner: Arc::new(AgentInner {
                id: Ulid::new(),
                pools: Arc::clone(pools),
                state: ArcSwap::from_pointee(initial),
                core: RefCore::new(None),
                mailbox: Mutex::new(Mailbox::new()),
                policy: RwLock::new(ErrorPolicy {
                    mode: ErrorMode::Fail,
                    handler: None,
                }),
            }),
        };
        debug!("Created agent {}", agent.inner.id);
        agent
    }

    pub fn builder(initial: V) -> AgentBuilder<V> {
        AgentBuilder {
            initial,
            validator: None,
            error_handler: None,
            error_mode: None,
        }
    }

    pub fn id(&self) -> Ulid {
        self.inner.id
    }

    /// Last committed value; never blocks
    pub fn deref(&self) -> V {
        V::clone(&self.inner.state.load())
    }

    /// Queue `action` for the bounded pool
    ///
    /// Fails synchronously if the agent is failed or the sandbox denies the
    /// send. Sends made from inside another action are held until that action
    /// commits.
    pub fn send<F>(&self, action: F) -> Result<()>
    where
        F: FnOnce(&V) -> Result<V> + Send + 'static,
    {
        self.dispatch(Box::new(action), Dispatch::Pooled)
    }

    /// Queue `action` for the cached pool; for actions that may block
    pub fn send_off<F>(&self, action: F) -> Result<()>
    where
        F: FnOnce(&V) -> Result<V> + Send + 'static,
    {
        self.dispatch(Box::new(action), Dispatch::Blocking)
    }

    fn dispatch(&self, f: ActionFn<V>, dispatch: Dispatch) -> Result<()> {
        self.inner.mailbox.lock().check_healthy()?;

        let operation = match dispatch {
            Dispatch::Pooled => Operation::SendAction,
            Dispatch::Blocking => Operation::SendOffAction,
        };
        self.inner.pools.authorize(operation)?;

        let action = Action {
            f,
            dispatch,
            context: ExecutionContext::capture(),
        };

        if scope::is_holding() {
            trace!("Holding send to agent {} until the running action commits", self.inner.id);
            let agent = self.clone();
            scope::hold(Box::new(move || {
                if let Err(e) = agent.enqueue(action) {
                    warn!("Dropped held send to agent {}: {}", agent.inner.id, e);
                }
            }));
            return Ok(());
        }
        self.enqueue(action)
    }

    fn enqueue(&self, action: Action<V>) -> Result<()> {
        let action = {
            let mut mailbox = self.inner.mailbox.lock();
            mailbox.check_healthy()?;
            match mailbox.push(action) {
                Some(action) => action,
                None => {
                    trace!("Queued action on busy agent {}", self.inner.id);
                    return Ok(());
                }
            }
        };

        if let Err(e) = self.execute(action) {
            // Nothing ran; let whatever queued up behind it proceed.
            self.advance(None);
            return Err(e);
        }
        Ok(())
    }

    fn execute(&self, action: Action<V>) -> Result<()> {
        let agent = self.clone();
        let dispatch = action.dispatch;
        self.inner
            .pools
            .execute(dispatch, Box::new(move || agent.run(action)))
    }

    /// Apply one action on a worker thread, then move the mailbox on
    fn run(&self, action: Action<V>) {
        let Action { f, context, .. } = action;
        let _context = context.install();
        let scope = ActionScope::enter(self.inner.id);

        let outcome = catch_unwind(AssertUnwindSafe(|| self.apply(f)))
            .unwrap_or_else(|payload| Err(RefError::from_panic(payload)));

        let held = scope.exit();
        let failure = match outcome {
            Ok(()) => {
                metrics::counter!(AGENT_ACTIONS_COMMITTED).increment(1);
                for send in held {
                    send();
                }
                None
            }
            Err(e) => {
                metrics::counter!(AGENT_ACTIONS_FAILED).increment(1);
                drop(held);
                self.handle_failure(e)
            }
        };
        self.advance(failure);
    }

    fn apply(&self, f: ActionFn<V>) -> Result<()> {
        self.inner.pools.authorize(Operation::RunAction)?;

        let current = self.inner.state.load_full();
        let next = f(&current)?;
        self.inner.core.validate(&next)?;

        let next = Arc::new(next);
        self.inner.state.store(Arc::clone(&next));
        trace!("Agent {} committed new state", self.inner.id);
        self.inner.core.notify(self, &current, &next);
        Ok(())
    }

    /// Tell the error handler; returns the error if the agent must fail
    fn handle_failure(&self, e: RefError) -> Option<RefError> {
        let (mode, handler) = {
            let policy = self.inner.policy.read();
            (policy.mode, policy.handler.clone())
        };

        if let Some(handler) = handler {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| handler(self, &e))) {
                warn!(
                    "Error handler of agent {} panicked: {}",
                    self.inner.id,
                    RefError::from_panic(payload)
                );
            }
        }

        match mode {
            ErrorMode::Continue => {
                warn!("Action on agent {} failed, continuing: {}", self.inner.id, e);
                None
            }
            ErrorMode::Fail => {
                error!("Action on agent {} failed, agent needs restart: {}", self.inner.id, e);
                Some(e)
            }
        }
    }

    /// Dispatch the next queued action, go idle, or enter the failed state
    fn advance(&self, mut failure: Option<RefError>) {
        loop {
            let action = {
                let mut mailbox = self.inner.mailbox.lock();
                if let Some(e) = failure.take() {
                    mailbox.fail(e);
                    return;
                }
                match mailbox.next_action() {
                    Some(action) => action,
                    None => return,
                }
            };

            match self.execute(action) {
                Ok(()) => return,
                Err(e) => {
                    metrics::counter!(AGENT_ACTIONS_FAILED).increment(1);
                    failure = self.handle_failure(e);
                }
            }
        }
    }

    /// Leave the failed state with `state`, then run the actions still queued
    ///
    /// `state` must pass the validator. Watches see the transition.
    pub fn restart(&self, state: V) -> Result<()> {
        self.restart_with(state, false)
    }

    /// Like [`restart`](Self::restart), discarding the actions queued before
    /// the failure
    pub fn restart_clearing(&self, state: V) -> Result<()> {
        self.restart_with(state, true)
    }

    fn restart_with(&self, state: V, discard_queued: bool) -> Result<()> {
        if self.error().is_none() {
            return Err(RefError::AgentNotFailed);
        }
        self.inner.core.validate(&state)?;

        let next = Arc::new(state);
        let previous = {
            let mut mailbox = self.inner.mailbox.lock();
            if mailbox.error().is_none() {
                return Err(RefError::AgentNotFailed);
            }
            let cleared = mailbox.clear_error(discard_queued);
            let previous = self.inner.state.swap(Arc::clone(&next));
            debug!(
                "Restarted agent {} after {:?} ({} queued actions)",
                self.inner.id,
                cleared,
                mailbox.queued_actions()
            );
            previous
        };

        self.inner.core.notify(self, &previous, &next);
        self.advance(None);
        Ok(())
    }

    /// The error that failed the agent, if it is failed
    pub fn error(&self) -> Option<RefError> {
        self.inner.mailbox.lock().error().cloned()
    }

    pub fn error_mode(&self) -> ErrorMode {
        self.inner.policy.read().mode
    }

    pub fn set_error_mode(&self, mode: ErrorMode) {
        self.inner.policy.write().mode = mode;
    }

    pub fn error_handler(&self) -> Option<ErrorHandler<V>> {
        self.inner.policy.read().handler.clone()
    }

    pub fn set_error_handler<F>(&self, handler: F)
    where
        F: Fn(&Agent<V>, &RefError) + Send + Sync + 'static,
    {
        self.inner.policy.write().handler = Some(Arc::new(handler));
    }

    pub fn clear_error_handler(&self) {
        self.inner.policy.write().handler = None;
    }

    pub fn status(&self) -> AgentStatus {
        let mailbox = self.inner.mailbox.lock();
        if mailbox.error().is_some() {
            AgentStatus::Failed
        } else if mailbox.is_running() {
            AgentStatus::Running
        } else {
            AgentStatus::Idle
        }
    }

    /// Actions waiting behind the one in flight
    pub fn queue_len(&self) -> usize {
        self.inner.mailbox.lock().queued_actions()
    }

    /// Install a validator; fails if it rejects the current value
    pub fn set_validator<F>(&self, validator: F) -> Result<()>
    where
        F: Fn(&V) -> bool + Send + Sync + 'static,
    {
        self.inner
            .core
            .set_validator(Some(Arc::new(validator)), &self.inner.state.load())
    }

    pub fn clear_validator(&self) {
        let _ = self.inner.core.set_validator(None, &self.inner.state.load());
    }

    pub fn validator(&self) -> Option<Validator<V>> {
        self.inner.core.validator()
    }

    /// Register `watch` under `key`; it runs on the worker after each commit
    pub fn add_watch<F>(&self, key: impl Into<String>, watch: F)
    where
        F: Fn(&str, &Agent<V>, &V, &V) + Send + Sync + 'static,
    {
        self.inner.core.add_watch(key.into(), Arc::new(watch));
    }

    pub fn remove_watch(&self, key: &str) -> bool {
        self.inner.core.remove_watch(key)
    }
}

impl<V> Awaitable for Agent<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn enqueue_barrier(&self, latch: &Arc<AwaitLatch>) -> Result<()> {
        let mut mailbox = self.inner.mailbox.lock();
        mailbox.check_healthy()?;
        mailbox.push_barrier(latch);
        Ok(())
    }
}

impl<V> Dereferenceable for Agent<V>
where
    V: Clone + Send + Sync + 'static,
{
    type Value = V;

    fn deref(&self) -> Result<V> {
        Ok(Agent::deref(self))
    }
}

impl<V: fmt::Debug> fmt::Debug for Agent<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Agent")
            .field("id", &self.inner.id)
            .field("state", &*self.inner.state.load())
            .finish()
    }
}
