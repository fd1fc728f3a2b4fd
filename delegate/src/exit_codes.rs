//! Stable exit codes for delegate CLI commands.

/// Command succeeded (for `daemon`, it stopped cleanly).
pub const OK: i32 = 0;
/// Bootstrap failed (no repository root, unusable home) or the command errored.
pub const BOOTSTRAP: i32 = 1;
