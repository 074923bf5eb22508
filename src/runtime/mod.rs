// src/runtime/mod.rs
//! Execution runtime shared by futures and agents
//!
//! This module provides the machinery that asynchronous references run on:
//!
//! - **Pool Manager**: the bounded pool and the blocking-safe cached pool
//! - **Worker Pool**: lazily grown thread pool over a crossbeam channel
//! - **Context**: thread-local bindings copied into worker threads
//! - **Sandbox**: authorization checked before any asynchronous work starts
//! - **Interrupt**: cooperative cancellation of blocked waits and task bodies
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                      PoolManager                         │
//! │   authorize(op) ──► capture context ──► dispatch         │
//! │                                           │              │
//! │              ┌────────────────────────────┴───┐          │
//! │              ▼                                ▼          │
//! │   ┌─────────────────────┐      ┌─────────────────────┐   │
//! │   │ bounded (max 100)   │      │ cached (blocking)   │   │
//! │   │ futures, send       │      │ send_off            │   │
//! │   └─────────────────────┘      └─────────────────────┘   │
//! └──────────────────────────────────────────────────────────┘
//! ```

pub mod context;
pub mod interrupt;
pub mod pool_manager;
pub mod sandbox;
pub mod worker_pool;

// Re-export commonly used types
pub use context::{ExecutionContext, ContextGuard, BindingGuard};
pub use interrupt::InterruptHandle;
pub use pool_manager::{Dispatch, PoolManager};
pub use sandbox::{AllowAll, Authorizer, Operation, Sandbox, SandboxConfig, SandboxContext};
pub use worker_pool::{PoolKind, PoolStats, WorkerPool, WorkerPoolConfig};
