//! File-queue daemon that delegates tasks to external AI coding agents.
//!
//! A task is a JSON file; the directory it sits in under the delegate home is
//! its lifecycle state. The daemon claims tasks by atomic rename, routes each
//! to a registered agent, optionally isolates it in a git worktree, runs the
//! agent as a subprocess, and records every attempt. The crate keeps a strict
//! separation:
//!
//! - **[`core`]**: Pure, deterministic logic (routing, transitions, naming).
//!   No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (filesystem, git, process execution).
//!   Isolated to enable scripted runners in tests.
//!
//! Orchestration modules ([`step`], [`looping`], [`recover`], [`submit`],
//! [`status`]) coordinate core logic with I/O to implement CLI commands.

pub mod agent;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod looping;
pub mod recover;
pub mod settings;
pub mod status;
pub mod step;
pub mod submit;
pub mod task;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
