//! Stable exit codes for dispatcher CLI commands.

/// Command succeeded.
pub const OK: i32 = 0;
/// Command failed due to invalid arguments, store state or other errors.
pub const INVALID: i32 = 1;
/// `dispatcher step` found nothing pending.
pub const IDLE: i32 = 2;
/// `dispatcher step` hit the daily completion cap.
pub const CAPPED: i32 = 3;
