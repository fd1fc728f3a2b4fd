//! Side-effecting adapters: filesystem, git, and child processes.

pub mod config;
pub mod events;
pub mod executor;
pub mod git;
pub mod init;
pub mod process;
pub mod queue;
pub mod registry;
pub mod run_log;
pub mod schema;
pub mod which;
pub mod worktree;
