//! Shared deterministic types for task lifecycle decisions.
//!
//! These types define stable contracts between the pure lifecycle rules and the
//! I/O layer. Their string forms appear in the event log and run summaries, so
//! they must stay stable across releases.

use std::fmt;

use serde::{Deserialize, Serialize};

/// How an agent process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    /// Process exited normally with this code.
    Code(i32),
    /// Process was terminated by this signal number.
    Signal(i32),
}

impl ExitOutcome {
    pub fn success(self) -> bool {
        matches!(self, ExitOutcome::Code(0))
    }

    pub fn code(self) -> Option<i32> {
        match self {
            ExitOutcome::Code(code) => Some(code),
            ExitOutcome::Signal(_) => None,
        }
    }

    pub fn signal(self) -> Option<i32> {
        match self {
            ExitOutcome::Code(_) => None,
            ExitOutcome::Signal(signal) => Some(signal),
        }
    }
}

impl fmt::Display for ExitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitOutcome::Code(code) => write!(f, "exit code {code}"),
            ExitOutcome::Signal(signal) => write!(f, "signal {signal}"),
        }
    }
}

/// Reason a task landed in `failed/`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    InvalidJson,
    MissingPrompt,
    InvalidTask,
    Exit(i32),
    Signal(i32),
    RuntimeException,
}

impl FailureReason {
    pub fn from_exit(exit: ExitOutcome) -> Self {
        match exit {
            ExitOutcome::Code(code) => FailureReason::Exit(code),
            ExitOutcome::Signal(signal) => FailureReason::Signal(signal),
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::InvalidJson => f.write_str("invalid_json"),
            FailureReason::MissingPrompt => f.write_str("missing_prompt"),
            FailureReason::InvalidTask => f.write_str("invalid_task"),
            FailureReason::Exit(code) => write!(f, "exit_{code}"),
            FailureReason::Signal(signal) => write!(f, "signal_{signal}"),
            FailureReason::RuntimeException => f.write_str("runtime_exception"),
        }
    }
}

/// Status recorded in a run summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Completed,
    Failed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_reasons_render_stable_strings() {
        assert_eq!(FailureReason::InvalidJson.to_string(), "invalid_json");
        assert_eq!(FailureReason::MissingPrompt.to_string(), "missing_prompt");
        assert_eq!(FailureReason::Exit(1).to_string(), "exit_1");
        assert_eq!(FailureReason::Signal(9).to_string(), "signal_9");
        assert_eq!(
            FailureReason::RuntimeException.to_string(),
            "runtime_exception"
        );
    }

    #[test]
    fn only_exit_zero_is_success() {
        assert!(ExitOutcome::Code(0).success());
        assert!(!ExitOutcome::Code(2).success());
        assert!(!ExitOutcome::Signal(15).success());
    }
}
