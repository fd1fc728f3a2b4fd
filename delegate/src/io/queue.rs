//! Directory-backed task queue.
//!
//! A task's lifecycle state is the directory its file sits in. Every state
//! change is a `rename(2)` within the home root, which is atomic on a local
//! filesystem: when several daemons race to claim the same file, exactly one
//! rename succeeds and the others see the source vanish. Network filesystems
//! that do not preserve rename atomicity are not supported.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::{debug, instrument, warn};

use crate::core::slug::compact_timestamp;
use crate::io::init::HomePaths;

const TASK_EXTENSION: &str = ".json";

/// Provenance marker for a task moved back into `inbox/`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequeueTag {
    /// Agent failed with attempts left.
    Retry,
    /// Found in `processing/` at startup.
    Recovered,
    /// No agent was available.
    Waiting,
}

impl RequeueTag {
    const ALL: [RequeueTag; 3] = [RequeueTag::Retry, RequeueTag::Recovered, RequeueTag::Waiting];

    pub fn prefix(self) -> &'static str {
        match self {
            RequeueTag::Retry => "retry-",
            RequeueTag::Recovered => "recovered-",
            RequeueTag::Waiting => "waiting-",
        }
    }
}

/// Where a claimed task goes next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    Completed,
    Failed,
    Inbox(RequeueTag),
}

/// Result of a claim attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// This caller now exclusively owns the task.
    Claimed(ClaimedTask),
    /// Another process renamed the file first; skip it.
    AlreadyClaimed,
}

/// A task file currently held in `processing/` by this process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimedTask {
    pub file_name: String,
    pub path: PathBuf,
}

impl ClaimedTask {
    /// File name without the `.json` extension.
    pub fn stem(&self) -> &str {
        self.file_name
            .strip_suffix(TASK_EXTENSION)
            .unwrap_or(&self.file_name)
    }
}

/// Queue operations over the directories of one home root.
#[derive(Debug, Clone)]
pub struct QueueStore {
    paths: HomePaths,
}

impl QueueStore {
    pub fn new(paths: &HomePaths) -> Self {
        Self {
            paths: paths.clone(),
        }
    }

    /// Task file names in `inbox/`, lexicographically sorted.
    ///
    /// Submission names start with a timestamp, so this order approximates
    /// first-in-first-out.
    pub fn list_pending(&self) -> Result<Vec<String>> {
        list_task_files(&self.paths.inbox_dir)
    }

    /// Task file names left in `processing/`.
    pub fn list_processing(&self) -> Result<Vec<String>> {
        list_task_files(&self.paths.processing_dir)
    }

    /// Atomically move `inbox/<file_name>` into `processing/`.
    #[instrument(skip_all, fields(file = file_name))]
    pub fn claim(&self, file_name: &str) -> Result<ClaimOutcome> {
        let from = self.paths.inbox_dir.join(file_name);
        let to = self.paths.processing_dir.join(file_name);
        match fs::rename(&from, &to) {
            Ok(()) => {
                debug!("claimed task");
                Ok(ClaimOutcome::Claimed(ClaimedTask {
                    file_name: file_name.to_string(),
                    path: to,
                }))
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("task already claimed elsewhere");
                Ok(ClaimOutcome::AlreadyClaimed)
            }
            Err(err) => Err(err).with_context(|| {
                format!("claim {} -> {}", from.display(), to.display())
            }),
        }
    }

    /// Take ownership of a file already sitting in `processing/`, as left
    /// behind by a process that died mid-execution.
    pub fn orphaned(&self, file_name: &str) -> ClaimedTask {
        ClaimedTask {
            file_name: file_name.to_string(),
            path: self.paths.processing_dir.join(file_name),
        }
    }

    /// Replace the content of a claimed task file (temp file + rename).
    pub fn rewrite_claimed(&self, claimed: &ClaimedTask, contents: &str) -> Result<()> {
        let tmp_path = self
            .paths
            .processing_dir
            .join(format!(".{}.tmp", claimed.file_name));
        fs::write(&tmp_path, contents)
            .with_context(|| format!("write temp task {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &claimed.path)
            .with_context(|| format!("replace task {}", claimed.path.display()))
    }

    /// Move a claimed task out of `processing/`, returning its new path.
    #[instrument(skip_all, fields(file = %claimed.file_name, ?destination))]
    pub fn move_claimed(
        &self,
        claimed: &ClaimedTask,
        destination: Destination,
        at: DateTime<Utc>,
    ) -> Result<PathBuf> {
        let (dir, name) = match destination {
            Destination::Completed => (
                &self.paths.completed_dir,
                terminal_name(&claimed.file_name, at),
            ),
            Destination::Failed => (&self.paths.failed_dir, terminal_name(&claimed.file_name, at)),
            Destination::Inbox(tag) => (&self.paths.inbox_dir, requeue_name(&claimed.file_name, tag)),
        };
        let target = unique_target(dir, &name);
        fs::rename(&claimed.path, &target).with_context(|| {
            format!(
                "move {} -> {}",
                claimed.path.display(),
                target.display()
            )
        })?;
        debug!(target = %target.display(), "moved task");
        Ok(target)
    }

    /// Write a new task file into `inbox/` (temp file + rename), never
    /// replacing an existing one. Returns the final path.
    pub fn enqueue(&self, file_name: &str, contents: &str) -> Result<PathBuf> {
        let tmp_path = self.paths.inbox_dir.join(format!(".{file_name}.tmp"));
        fs::write(&tmp_path, contents)
            .with_context(|| format!("write temp task {}", tmp_path.display()))?;
        let target = unique_target(&self.paths.inbox_dir, file_name);
        fs::rename(&tmp_path, &target)
            .with_context(|| format!("enqueue task {}", target.display()))?;
        Ok(target)
    }

    /// Number of task files in `dir`, tolerating a missing directory.
    pub fn count(dir: &Path) -> Result<usize> {
        if !dir.exists() {
            return Ok(0);
        }
        Ok(list_task_files(dir)?.len())
    }
}

fn list_task_files(dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("read {}", dir.display()))? {
        let entry = entry.with_context(|| format!("read entry in {}", dir.display()))?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            warn!(dir = %dir.display(), name = ?name, "skipping non-utf8 file name");
            continue;
        };
        if name.starts_with('.') || !name.ends_with(TASK_EXTENSION) {
            continue;
        }
        let is_file = entry.file_type().map(|ft| ft.is_file()).unwrap_or(false);
        if is_file {
            names.push(name.to_string());
        }
    }
    names.sort();
    Ok(names)
}

/// Strip every leading requeue marker so markers never pile up.
fn strip_requeue_tags(file_name: &str) -> &str {
    let mut name = file_name;
    'outer: loop {
        for tag in RequeueTag::ALL {
            if let Some(rest) = name.strip_prefix(tag.prefix())
                && !rest.is_empty()
            {
                name = rest;
                continue 'outer;
            }
        }
        return name;
    }
}

fn requeue_name(file_name: &str, tag: RequeueTag) -> String {
    format!("{}{}", tag.prefix(), strip_requeue_tags(file_name))
}

fn terminal_name(file_name: &str, at: DateTime<Utc>) -> String {
    format!("{}-{}", compact_timestamp(at), strip_requeue_tags(file_name))
}

/// `dir/name`, or `dir/<stem>-N.json` for the first free N when taken.
fn unique_target(dir: &Path, name: &str) -> PathBuf {
    let candidate = dir.join(name);
    if !candidate.exists() {
        return candidate;
    }
    let (stem, ext) = match name.strip_suffix(TASK_EXTENSION) {
        Some(stem) => (stem, TASK_EXTENSION),
        None => (name, ""),
    };
    let mut n = 2u32;
    loop {
        let candidate = dir.join(format!("{stem}-{n}{ext}"));
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}
