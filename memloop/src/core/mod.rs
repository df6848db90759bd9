//! Deterministic, pure logic behind the agent loop.
//!
//! Core modules are free of I/O side effects. They operate on in-memory
//! documents and return deterministic outputs suitable for tests.

pub mod codec;
pub mod error;
pub mod eviction;
pub mod executor;
pub mod path;
pub mod state;
pub mod store;
pub mod types;
