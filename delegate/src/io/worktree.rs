//! Per-task git worktrees under `<home>/worktrees`.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::{info, instrument, warn};

use crate::core::slug::worktree_names;
use crate::io::git::Git;

/// A worktree created for one execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Worktree {
    pub branch: String,
    pub path: PathBuf,
}

/// Creates and removes execution worktrees for one repository.
#[derive(Debug, Clone)]
pub struct WorktreeManager {
    git: Git,
    worktrees_dir: PathBuf,
    branch_prefix: String,
}

impl WorktreeManager {
    pub fn new(
        repo_root: impl Into<PathBuf>,
        worktrees_dir: impl Into<PathBuf>,
        branch_prefix: impl Into<String>,
    ) -> Self {
        Self {
            git: Git::new(repo_root),
            worktrees_dir: worktrees_dir.into(),
            branch_prefix: branch_prefix.into(),
        }
    }

    /// Create a fresh worktree on a new branch started at the repository's `HEAD`.
    ///
    /// The error carries git's own diagnostic text.
    #[instrument(skip_all, fields(agent = agent_name, task_id))]
    pub fn create(&self, agent_name: &str, task_id: &str, at: DateTime<Utc>) -> Result<Worktree> {
        let names = worktree_names(&self.branch_prefix, agent_name, task_id, at);
        fs::create_dir_all(&self.worktrees_dir)
            .with_context(|| format!("create directory {}", self.worktrees_dir.display()))?;
        let path = self.worktrees_dir.join(&names.dir_name);
        self.git.worktree_add_new_branch(&path, &names.branch)?;
        info!(branch = %names.branch, path = %path.display(), "worktree created");
        Ok(Worktree {
            branch: names.branch,
            path,
        })
    }

    /// Remove a worktree. Failures are logged and never escalate.
    #[instrument(skip_all)]
    pub fn cleanup(&self, worktree: &Worktree) {
        match self.git.worktree_remove(&worktree.path) {
            Ok(()) => info!(path = %worktree.path.display(), "worktree removed"),
            Err(err) => warn!(
                path = %worktree.path.display(),
                err = %format!("{err:#}"),
                "worktree cleanup failed"
            ),
        }
    }
}
