//! Git adapter for worktree management.
//!
//! Only the handful of plumbing calls the daemon needs, each run as a `git`
//! subprocess so diagnostics come straight from git's stderr.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    /// Absolute path of the top-level directory of the enclosing repository.
    #[instrument(skip_all)]
    pub fn show_toplevel(&self) -> Result<PathBuf> {
        let out = self.run_capture(&["rev-parse", "--show-toplevel"])?;
        let top = PathBuf::from(out.trim());
        debug!(toplevel = %top.display(), "resolved repository root");
        Ok(top)
    }

    /// Create `path` as a new worktree on a fresh branch started at `HEAD`.
    #[instrument(skip_all, fields(branch))]
    pub fn worktree_add_new_branch(&self, path: &Path, branch: &str) -> Result<()> {
        let path_arg = path.to_string_lossy();
        debug!(path = %path.display(), "adding worktree");
        self.run_checked(&["worktree", "add", "-b", branch, &path_arg, "HEAD"])?;
        Ok(())
    }

    /// Remove a worktree, discarding any uncommitted changes in it.
    ///
    /// If git no longer recognises the worktree, the directory is deleted and
    /// stale administrative entries are pruned instead.
    #[instrument(skip_all)]
    pub fn worktree_remove(&self, path: &Path) -> Result<()> {
        let path_arg = path.to_string_lossy();
        match self.run_checked(&["worktree", "remove", "--force", &path_arg]) {
            Ok(_) => Ok(()),
            Err(err) => {
                warn!(path = %path.display(), err = %format!("{err:#}"), "worktree remove failed, pruning");
                if path.exists() {
                    std::fs::remove_dir_all(path)
                        .with_context(|| format!("remove {}", path.display()))?;
                }
                self.worktree_prune()
            }
        }
    }

    pub fn worktree_prune(&self) -> Result<()> {
        self.run_checked(&["worktree", "prune"])?;
        Ok(())
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = self.run_checked(args)?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("git {} failed: {}", args.join(" "), stderr.trim()));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))
    }
}
