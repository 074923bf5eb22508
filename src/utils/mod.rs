// src/utils/mod.rs
//! Shared utilities: error taxonomy and runtime configuration

pub mod config;
pub mod errors;

pub use config::{LoggingConfig, PoolConfig, RuntimeConfig};
pub use errors::{RefError, Result};
