//! Stable exit codes for memloop CLI commands.

/// Command succeeded, or `run` reached its iteration cap.
pub const OK: i32 = 0;
/// Command failed due to missing layout, invalid config or other setup errors.
pub const INVALID: i32 = 1;
/// `memloop run` stopped on SIGINT/SIGTERM.
pub const INTERRUPTED: i32 = 130;
