//! Stable exit codes for `gotest` commands.

/// Command succeeded; for `run`, nothing failed.
pub const OK: i32 = 0;
/// Invalid usage, configuration or target, or an internal error.
pub const INVALID: i32 = 1;
/// `gotest run` finished with at least one failed node.
pub const FAILED: i32 = 2;
/// `gotest run` was cancelled (timeout).
pub const CANCELLED: i32 = 3;
