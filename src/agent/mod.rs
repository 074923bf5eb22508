// src/agent/mod.rs
//! Agents and the await coordinator
//!
//! - **Agent**: value changed only by actions applied in send order
//! - **Mailbox**: the queue of pending actions and await barriers
//! - **Scope**: per-thread state of a running action (held sends)
//! - **Await**: block until agents drain what is queued right now
//!
//! # Dispatch
//!
//! ```text
//! send(f) ──► authorize ──► mailbox ──► bounded pool ──┐
//! send_off(f) ─────────────────┘  └───► cached pool ───┤
//!                                                       ▼
//!                 validate ◄── f(state) ◄── install sender context
//!                    │
//!                    ├─ ok ──► commit, watches, release held sends
//!                    └─ err ─► error policy (Continue | Fail)
//! ```

pub mod actor;
pub mod await_coord;
mod mailbox;
pub mod scope;

// Re-export commonly used types
pub use actor::{Agent, AgentBuilder, AgentStatus, ErrorHandler, ErrorMode};
pub use await_coord::{await_agents, await_for, Awaitable};
pub use scope::{current_agent_id, release_pending_sends};
