//! Transition rules for a claimed task after its agent has run.
//!
//! ```text
//! Queued --claim--> Claimed --exit 0--------------------------> Completed
//!                      |----exit != 0, attempt + 1 <  max ----> Retrying -> Queued
//!                      |----exit != 0, attempt + 1 >= max ----> Failed
//! ```

use crate::core::types::{ExitOutcome, FailureReason};

/// Maximum number of trailing stderr characters kept as `lastError`.
pub const LAST_ERROR_CHARS: usize = 5_000;

/// Decision for a task whose agent process has exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Complete,
    /// Requeue with `attempt` set to `next_attempt`.
    Retry { next_attempt: u32 },
    Fail { reason: FailureReason },
}

/// Decide the next state from the current attempt counter and the exit status.
pub fn after_execution(attempt: u32, max_attempts: u32, exit: ExitOutcome) -> Transition {
    if exit.success() {
        return Transition::Complete;
    }
    let next_attempt = attempt.saturating_add(1);
    if next_attempt < max_attempts {
        Transition::Retry { next_attempt }
    } else {
        Transition::Fail {
            reason: FailureReason::from_exit(exit),
        }
    }
}

/// Last `limit` characters of `stderr`, or a description of `exit` when
/// stderr carries nothing useful.
pub fn last_error(stderr: &str, exit: ExitOutcome, limit: usize) -> String {
    let trimmed = stderr.trim_end();
    if trimmed.trim().is_empty() {
        return format!("agent exited with {exit}");
    }
    let count = trimmed.chars().count();
    if count <= limit {
        return trimmed.to_string();
    }
    trimmed.chars().skip(count - limit).collect()
}
