//! Autonomous agent loop over a two-tier hierarchical memory.
//!
//! An agent keeps a small, size-bounded *working* document that is shown to the
//! model every iteration and an unbounded *persistent* document it reaches only
//! through explicit actions. The model answers in a tagged-text protocol; each
//! `<action>` block is decoded, executed against one of the two documents and
//! its outcome recorded back into the working document for the next iteration.
//!
//! - **[`core`]**: Pure, deterministic logic (paths, stores, codec, executor,
//!   eviction, state machine). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting collaborators (config, model clients,
//!   persistence, prompt rendering, iteration artifacts).
//!
//! Orchestration modules ([`step`], [`looping`]) coordinate core logic with
//! I/O to implement CLI commands.

pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod looping;
pub mod step;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod tree;
