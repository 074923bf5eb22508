// src/deferred/mod.rs
//! Deferred values: futures computed on the worker pools and promises
//! delivered by hand

mod completion;
pub mod future;
pub mod promise;

// Re-export commonly used types
pub use future::Future;
pub use promise::Promise;
