// src/runtime/sandbox.rs
//! Sandbox authorization for asynchronous work
//!
//! Every unit of asynchronous work (future, agent action, pool task) is
//! checked against an [`Authorizer`] before a thread is touched. The check
//! sees the submitting thread's [`SandboxContext`], which travels with the
//! work as part of its execution context.
//!
//! Provides:
//! - Per-operation switches (futures, agent actions, blocking actions)
//! - Principal deny list

use crate::runtime::context;
use crate::utils::errors::{RefError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{trace, warn};

/// Kinds of asynchronous work subject to authorization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Operation {
    /// Creating a future
    SubmitFuture,
    /// `Agent::send`
    SendAction,
    /// `Agent::send_off`
    SendOffAction,
    /// A dispatched agent action about to run on a worker
    RunAction,
    /// A raw pool task
    PoolTask,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::SubmitFuture => "submit-future",
            Operation::SendAction => "send",
            Operation::SendOffAction => "send-off",
            Operation::RunAction => "run-action",
            Operation::PoolTask => "pool-task",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity the current thread runs as
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SandboxContext {
    principal: Option<String>,
}

impl SandboxContext {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn for_principal(principal: impl Into<String>) -> Self {
        Self {
            principal: Some(principal.into()),
        }
    }

    pub fn principal(&self) -> Option<&str> {
        self.principal.as_deref()
    }

    /// Sandbox context of the calling thread
    pub fn current() -> Self {
        context::current_sandbox()
    }

    /// Run the calling thread as this context until the guard drops
    pub fn enter(self) -> SandboxGuard {
        SandboxGuard {
            previous: Some(context::replace_sandbox(self)),
        }
    }
}

/// Restores the previous sandbox context on drop
#[must_use = "the sandbox context is left when the guard drops"]
pub struct SandboxGuard {
    previous: Option<SandboxContext>,
}

impl Drop for SandboxGuard {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            context::replace_sandbox(previous);
        }
    }
}

/// External authorization capability
pub trait Authorizer: Send + Sync {
    /// `Err(reason)` denies the operation
    fn authorize(
        &self,
        context: &SandboxContext,
        operation: Operation,
    ) -> std::result::Result<(), String>;
}

/// Authorizer that permits everything
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl Authorizer for AllowAll {
    fn authorize(
        &self,
        _context: &SandboxContext,
        _operation: Operation,
    ) -> std::result::Result<(), String> {
        Ok(())
    }
}

/// Sandbox policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Permit creating futures
    pub allow_futures: bool,

    /// Permit `send` and running agent actions
    pub allow_agent_actions: bool,

    /// Permit `send_off` (actions that may block)
    pub allow_blocking_actions: bool,

    /// Principals denied all asynchronous work
    pub denied_principals: Vec<String>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            allow_futures: true,
            allow_agent_actions: true,
            allow_blocking_actions: true,
            denied_principals: vec![],
        }
    }
}

/// Policy authorizer driven by [`SandboxConfig`]
#[derive(Debug, Clone)]
pub struct Sandbox {
    config: SandboxConfig,
}

impl Sandbox {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }
}

impl Default for Sandbox {
    fn default() -> Self {
        Self::new(SandboxConfig::default())
    }
}

impl Authorizer for Sandbox {
    fn authorize(
        &self,
        context: &SandboxContext,
        operation: Operation,
    ) -> std::result::Result<(), String> {
        if let Some(principal) = context.principal() {
            if self.config.denied_principals.iter().any(|denied| denied == principal) {
                return Err(format!("principal '{}' may not start asynchronous work", principal));
            }
        }

        let allowed = match operation {
            Operation::SubmitFuture => self.config.allow_futures,
            Operation::SendAction | Operation::RunAction => self.config.allow_agent_actions,
            Operation::SendOffAction => {
                self.config.allow_agent_actions && self.config.allow_blocking_actions
            }
            Operation::PoolTask => true,
        };

        if allowed {
            Ok(())
        } else {
            Err(format!("{} is disabled by sandbox policy", operation))
        }
    }
}

/// Check `operation` for the calling thread's sandbox context
pub fn authorize(authorizer: &dyn Authorizer, operation: Operation) -> Result<()> {
    authorize_as(authorizer, &SandboxContext::current(), operation)
}

/// Check `operation` for an explicit sandbox context
pub fn authorize_as(
    authorizer: &dyn Authorizer,
    context: &SandboxContext,
    operation: Operation,
) -> Result<()> {
    match authorizer.authorize(context, operation) {
        Ok(()) => {
            trace!("Authorized {} for {:?}", operation, context.principal());
            Ok(())
        }
        Err(reason) => {
            warn!("Denied {} for {:?}: {}", operation, context.principal(), reason);
            Err(RefError::AuthorizationDenied { operation, reason })
        }
    }
}
