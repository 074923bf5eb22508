// src/runtime/context.rs
//! Thread-local bindings and their propagation to worker threads
//!
//! Scripts bind dynamic names per thread. When work is submitted to a pool
//! the submitter's bindings and sandbox context are captured into an
//! [`ExecutionContext`] (a copy, not a share) and installed on the worker for
//! the duration of that unit of work only:
//!
//! ```text
//! submitter thread          worker thread
//! ─────────────────         ─────────────────────────────
//! capture() ──snapshot──►   install() → run task → guard drop
//!                           (previous context restored)
//! ```

use crate::runtime::sandbox::SandboxContext;
use serde_json::Value;
use std::cell::RefCell;
use std::collections::HashMap;

/// Snapshot of a thread's bindings and sandbox context
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionContext {
    bindings: HashMap<String, Value>,
    sandbox: SandboxContext,
}

thread_local! {
    static CURRENT: RefCell<ExecutionContext> = RefCell::new(ExecutionContext::default());
}

impl ExecutionContext {
    /// Copy the calling thread's context
    pub fn capture() -> Self {
        CURRENT.with(|current| current.borrow().clone())
    }

    /// Replace the calling thread's context until the guard drops
    pub fn install(self) -> ContextGuard {
        let previous = CURRENT.with(|current| current.replace(self));
        ContextGuard {
            previous: Some(previous),
        }
    }

    pub fn with_binding(mut self, name: impl Into<String>, value: Value) -> Self {
        self.bindings.insert(name.into(), value);
        self
    }

    pub fn with_sandbox(mut self, sandbox: SandboxContext) -> Self {
        self.sandbox = sandbox;
        self
    }

    pub fn bindings(&self) -> &HashMap<String, Value> {
        &self.bindings
    }

    pub fn sandbox(&self) -> &SandboxContext {
        &self.sandbox
    }
}

/// Restores the previously installed context on drop
#[must_use = "the context is uninstalled when the guard drops"]
pub struct ContextGuard {
    previous: Option<ExecutionContext>,
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            CURRENT.with(|current| {
                current.replace(previous);
            });
        }
    }
}

/// Bind `name` on the calling thread until the guard drops
pub fn bind(name: impl Into<String>, value: Value) -> BindingGuard {
    let name = name.into();
    let previous = CURRENT.with(|current| {
        current
            .borrow_mut()
            .bindings
            .insert(name.clone(), value)
    });
    BindingGuard { name, previous }
}

/// Overwrite `name` on the calling thread without scoping
pub fn set(name: impl Into<String>, value: Value) {
    CURRENT.with(|current| {
        current.borrow_mut().bindings.insert(name.into(), value);
    });
}

/// Current thread's value for `name`
pub fn lookup(name: &str) -> Option<Value> {
    CURRENT.with(|current| current.borrow().bindings.get(name).cloned())
}

/// Restores a single binding on drop
#[must_use = "the binding is removed when the guard drops"]
pub struct BindingGuard {
    name: String,
    previous: Option<Value>,
}

impl Drop for BindingGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT.with(|current| {
            let mut current = current.borrow_mut();
            match previous {
                Some(value) => {
                    current.bindings.insert(self.name.clone(), value);
                }
                None => {
                    current.bindings.remove(&self.name);
                }
            }
        });
    }
}

pub(crate) fn current_sandbox() -> SandboxContext {
    CURRENT.with(|current| current.borrow().sandbox.clone())
}

pub(crate) fn replace_sandbox(sandbox: SandboxContext) -> SandboxContext {
    CURRENT.with(|current| std::mem::replace(&mut current.borrow_mut().sandbox, sandbox))
}
