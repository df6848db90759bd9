//! I/O collaborators for the agent loop.

pub mod config;
pub mod init;
pub mod iteration_log;
pub mod llm;
pub mod persistence;
pub mod process;
pub mod prompt;
