//! Orchestration for a single control-loop iteration.
//!
//! A step claims at most one task and drives it through routing, isolation,
//! execution, and the final transition. Every stage after the claim reports
//! failure as an explicit [`Abort`] value, so a claimed task always leaves
//! `processing/` with a recorded reason.

use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::{debug, error, info, instrument, warn};

use crate::agent::Agent;
use crate::core::lifecycle::{LAST_ERROR_CHARS, Transition, after_execution, last_error};
use crate::core::router::select_agent;
use crate::core::slug::rfc3339_millis;
use crate::core::types::FailureReason;
use crate::io::config::DaemonConfig;
use crate::io::events::{Event, EventLog, EventStatus};
use crate::io::executor::{AgentRunner, build_request, resolve_workdir};
use crate::io::process::CommandOutput;
use crate::io::queue::{ClaimOutcome, ClaimedTask, Destination, QueueStore, RequeueTag};
use crate::io::run_log::{RunContext, RunDir, RunLedger};
use crate::io::worktree::{Worktree, WorktreeManager};
use crate::settings::Settings;
use crate::task::Task;

/// What one iteration did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IterationOutcome {
    /// `inbox/` had nothing this process could claim.
    Idle,
    /// A task was claimed but no agent is available; it went back to `inbox/`.
    Waiting { task_id: String, task_file: PathBuf },
    /// A task was claimed and reached a new lifecycle state.
    Processed(TaskOutcome),
}

impl IterationOutcome {
    /// Whether the loop should sleep before the next iteration.
    pub fn should_sleep(&self) -> bool {
        !matches!(self, IterationOutcome::Processed(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed {
        task_id: String,
        task_file: PathBuf,
        run_dir: PathBuf,
    },
    Retrying {
        task_id: String,
        task_file: PathBuf,
        attempt: u32,
    },
    Failed {
        task_id: String,
        task_file: PathBuf,
        reason: FailureReason,
    },
}

/// Everything a step needs besides the runner, loaded fresh per iteration.
#[derive(Debug, Clone)]
pub struct StepContext<'a> {
    pub settings: &'a Settings,
    pub config: &'a DaemonConfig,
    pub agents: &'a [Agent],
}

/// Claim the first pending task this process can get and process it.
///
/// Files another process claims first are skipped, never retried.
pub fn process_next<R: AgentRunner>(ctx: &StepContext<'_>, runner: &R) -> Result<IterationOutcome> {
    let queue = QueueStore::new(&ctx.settings.paths);
    for file_name in queue.list_pending()? {
        match queue.claim(&file_name)? {
            ClaimOutcome::Claimed(claimed) => return process_claimed(ctx, runner, &queue, &claimed),
            ClaimOutcome::AlreadyClaimed => continue,
        }
    }
    Ok(IterationOutcome::Idle)
}

/// A stage failure for a claimed task.
#[derive(Debug)]
struct Abort {
    reason: FailureReason,
    error: Option<String>,
    run_dir: Option<PathBuf>,
    worktree: Option<Worktree>,
}

impl Abort {
    fn runtime(err: &anyhow::Error) -> Self {
        Self {
            reason: FailureReason::RuntimeException,
            error: Some(format!("{err:#}")),
            run_dir: None,
            worktree: None,
        }
    }
}

#[instrument(skip_all, fields(file = %claimed.file_name))]
fn process_claimed<R: AgentRunner>(
    ctx: &StepContext<'_>,
    runner: &R,
    queue: &QueueStore,
    claimed: &ClaimedTask,
) -> Result<IterationOutcome> {
    let events = EventLog::new(&ctx.settings.paths.events_path);

    let raw = match read_claimed(claimed) {
        Ok(raw) => raw,
        Err(abort) => return fail_unparsed(queue, &events, claimed, abort),
    };
    let task = match Task::parse(&raw, claimed.stem(), ctx.config.default_max_attempts) {
        Ok(task) => task,
        Err(rejection) => {
            info!(reason = %rejection.reason(), "task rejected");
            let abort = Abort {
                reason: rejection.reason(),
                error: rejection.detail().map(str::to_string),
                run_dir: None,
                worktree: None,
            };
            return fail_unparsed(queue, &events, claimed, abort);
        }
    };

    let Some(agent) = select_agent(&task, ctx.agents, &ctx.config.routing_order) else {
        let already_waiting = claimed.file_name.starts_with(RequeueTag::Waiting.prefix());
        let task_file = queue.move_claimed(claimed, Destination::Inbox(RequeueTag::Waiting), Utc::now())?;
        // Parked tasks are re-claimed on every poll; record only the first.
        if already_waiting {
            debug!(task_id = %task.id, "still no agent available");
        } else {
            info!(task_id = %task.id, "no agent available, requeueing");
            let mut event = Event::new(EventStatus::Waiting, Utc::now());
            event.task_id = Some(task.id.clone());
            event.task_file = Some(task_file.display().to_string());
            append_event(&events, &event);
        }
        return Ok(IterationOutcome::Waiting {
            task_id: task.id,
            task_file,
        });
    };

    info!(task_id = %task.id, agent = %agent.name(), attempt = task.attempt.saturating_add(1), "executing task");
    match execute(ctx, runner, queue, &events, claimed, task.clone(), agent) {
        Ok(outcome) => Ok(IterationOutcome::Processed(outcome)),
        Err(abort) => fail_parsed(ctx, queue, &events, claimed, task, agent, abort),
    }
}

fn read_claimed(claimed: &ClaimedTask) -> std::result::Result<String, Abort> {
    match fs::read_to_string(&claimed.path) {
        Ok(raw) => Ok(raw),
        Err(err) if err.kind() == ErrorKind::InvalidData => Err(Abort {
            reason: FailureReason::InvalidJson,
            error: Some(err.to_string()),
            run_dir: None,
            worktree: None,
        }),
        Err(err) => {
            let err = anyhow::Error::new(err).context(format!("read {}", claimed.path.display()));
            Err(Abort::runtime(&err))
        }
    }
}

/// Run the claimed task on `agent` and apply the resulting transition.
fn execute<R: AgentRunner>(
    ctx: &StepContext<'_>,
    runner: &R,
    queue: &QueueStore,
    events: &EventLog,
    claimed: &ClaimedTask,
    mut task: Task,
    agent: &Agent,
) -> std::result::Result<TaskOutcome, Abort> {
    let started_at = Utc::now();
    let ledger = RunLedger::new(&ctx.settings.paths.runs_dir);
    let run = ledger
        .open(&task, &task.prompt, started_at)
        .map_err(|err| Abort::runtime(&err))?;

    let mut run_ctx = RunContext {
        task_id: task.id.clone(),
        attempt: task.attempt.saturating_add(1),
        max_attempts: task.max_attempts,
        agent: agent.name().to_string(),
        executable: agent.executable.display().to_string(),
        started_at,
        worktree_path: None,
        branch: None,
    };

    let worktree = if agent.use_worktree() {
        let manager = WorktreeManager::new(
            &ctx.settings.repo_root,
            &ctx.settings.paths.worktrees_dir,
            &ctx.settings.branch_prefix,
        );
        match manager.create(agent.name(), &task.id, started_at) {
            Ok(wt) => Some(wt),
            Err(err) => return Err(abort_run(&run, &run_ctx, &err, None)),
        }
    } else {
        None
    };
    if let Some(wt) = &worktree {
        run_ctx.worktree_path = Some(wt.path.clone());
        run_ctx.branch = Some(wt.branch.clone());
    }

    let base = worktree
        .as_ref()
        .map_or(ctx.settings.repo_root.as_path(), |wt| wt.path.as_path());
    let request = build_request(agent, &task, &task.prompt, resolve_workdir(base, task.cwd.as_deref()));
    let output = match runner.run(&request) {
        Ok(output) => output,
        Err(err) => return Err(abort_run(&run, &run_ctx, &err, worktree)),
    };

    let finished_at = Utc::now();
    let summary = run_ctx.finished(&run, &output, finished_at);
    let recorded = run
        .write_output(&output)
        .and_then(|()| run.write_summary(&summary));
    if let Err(err) = recorded {
        return Err(Abort {
            run_dir: Some(run.path.clone()),
            worktree,
            ..Abort::runtime(&err)
        });
    }

    let finished = Finished {
        run: &run,
        run_ctx: &run_ctx,
        output: &output,
        worktree: worktree.as_ref(),
        at: finished_at,
    };
    apply_transition(ctx, queue, events, claimed, &mut task, agent, &finished).map_err(|err| Abort {
        run_dir: Some(run.path.clone()),
        worktree: worktree.clone(),
        ..Abort::runtime(&err)
    })
}

/// A run whose agent process exited.
struct Finished<'a> {
    run: &'a RunDir,
    run_ctx: &'a RunContext,
    output: &'a CommandOutput,
    worktree: Option<&'a Worktree>,
    at: DateTime<Utc>,
}

fn apply_transition(
    ctx: &StepContext<'_>,
    queue: &QueueStore,
    events: &EventLog,
    claimed: &ClaimedTask,
    task: &mut Task,
    agent: &Agent,
    finished: &Finished<'_>,
) -> Result<TaskOutcome> {
    let at = finished.at;
    let exit = finished.output.exit;
    let mut event = Event::new(EventStatus::Completed, at);
    event.task_id = Some(task.id.clone());
    event.run_dir = Some(finished.run.path.display().to_string());
    event.agent = Some(agent.name().to_string());
    event.tool = Some(agent.command().to_string());
    event.branch = finished.worktree.map(|wt| wt.branch.clone());
    event.max_attempts = Some(task.max_attempts);

    match after_execution(task.attempt, task.max_attempts, exit) {
        Transition::Complete => {
            let task_file = queue.move_claimed(claimed, Destination::Completed, at)?;
            info!(task_id = %task.id, "task completed");
            event.task_file = Some(task_file.display().to_string());
            event.attempt = Some(finished.run_ctx.attempt);
            append_event(events, &event);
            if ctx.config.cleanup_worktree_on_success {
                cleanup(ctx, finished.worktree);
            }
            Ok(TaskOutcome::Completed {
                task_id: task.id.clone(),
                task_file,
                run_dir: finished.run.path.clone(),
            })
        }
        Transition::Retry { next_attempt } => {
            let stderr = String::from_utf8_lossy(&finished.output.stderr);
            task.attempt = next_attempt;
            task.last_error = Some(last_error(&stderr, exit, LAST_ERROR_CHARS));
            task.last_tried_at = Some(rfc3339_millis(at));
            queue.rewrite_claimed(claimed, &task.to_json_pretty()?)?;
            let task_file = queue.move_claimed(claimed, Destination::Inbox(RequeueTag::Retry), at)?;
            warn!(task_id = %task.id, attempt = next_attempt, max_attempts = task.max_attempts, "task will retry");
            event.status = EventStatus::Retrying;
            event.task_file = Some(task_file.display().to_string());
            event.attempt = Some(next_attempt);
            event.error = task.last_error.clone();
            append_event(events, &event);
            // The next attempt gets a fresh worktree.
            if ctx.config.cleanup_worktree_on_failure {
                cleanup(ctx, finished.worktree);
            }
            Ok(TaskOutcome::Retrying {
                task_id: task.id.clone(),
                task_file,
                attempt: next_attempt,
            })
        }
        Transition::Fail { reason } => {
            let stderr = String::from_utf8_lossy(&finished.output.stderr);
            task.last_error = Some(last_error(&stderr, exit, LAST_ERROR_CHARS));
            task.last_tried_at = Some(rfc3339_millis(at));
            queue.rewrite_claimed(claimed, &task.to_json_pretty()?)?;
            let task_file = queue.move_claimed(claimed, Destination::Failed, at)?;
            warn!(task_id = %task.id, %reason, "task failed");
            event.status = EventStatus::Failed;
            event.reason = Some(reason.to_string());
            event.task_file = Some(task_file.display().to_string());
            event.attempt = Some(finished.run_ctx.attempt);
            event.error = task.last_error.clone();
            append_event(events, &event);
            if ctx.config.cleanup_worktree_on_failure {
                cleanup(ctx, finished.worktree);
            }
            Ok(TaskOutcome::Failed {
                task_id: task.id.clone(),
                task_file,
                reason,
            })
        }
    }
}

/// Record a run that never produced an exit status.
fn abort_run(
    run: &RunDir,
    run_ctx: &RunContext,
    err: &anyhow::Error,
    worktree: Option<Worktree>,
) -> Abort {
    let message = format!("{err:#}");
    error!(run_id = %run.id, err = %message, "run aborted before completion");
    let summary = run_ctx.aborted(run, &message, Utc::now());
    if let Err(write_err) = run.write_summary(&summary) {
        warn!(run_id = %run.id, err = %format!("{write_err:#}"), "failed to write run summary");
    }
    Abort {
        reason: FailureReason::RuntimeException,
        error: Some(message),
        run_dir: Some(run.path.clone()),
        worktree,
    }
}

/// Fail a task whose content never parsed; its file moves as-is.
fn fail_unparsed(
    queue: &QueueStore,
    events: &EventLog,
    claimed: &ClaimedTask,
    abort: Abort,
) -> Result<IterationOutcome> {
    let at = Utc::now();
    let task_file = queue.move_claimed(claimed, Destination::Failed, at)?;
    warn!(reason = %abort.reason, "task failed before execution");
    let mut event = Event::new(EventStatus::Failed, at);
    event.task_id = Some(claimed.stem().to_string());
    event.reason = Some(abort.reason.to_string());
    event.task_file = Some(task_file.display().to_string());
    event.error = abort.error;
    append_event(events, &event);
    Ok(IterationOutcome::Processed(TaskOutcome::Failed {
        task_id: claimed.stem().to_string(),
        task_file,
        reason: abort.reason,
    }))
}

/// Fail a parsed task after a stage aborted; `attempt` is left untouched.
fn fail_parsed(
    ctx: &StepContext<'_>,
    queue: &QueueStore,
    events: &EventLog,
    claimed: &ClaimedTask,
    mut task: Task,
    agent: &Agent,
    abort: Abort,
) -> Result<IterationOutcome> {
    let at = Utc::now();
    task.last_error = abort.error.clone();
    task.last_tried_at = Some(rfc3339_millis(at));
    // The file may already have left processing/ if a late stage failed.
    if claimed.path.exists() {
        match task.to_json_pretty() {
            Ok(contents) => {
                if let Err(err) = queue.rewrite_claimed(claimed, &contents) {
                    warn!(err = %format!("{err:#}"), "could not record lastError");
                }
            }
            Err(err) => warn!(err = %format!("{err:#}"), "could not serialize task"),
        }
    }
    let task_file = if claimed.path.exists() {
        queue
            .move_claimed(claimed, Destination::Failed, at)
            .context("move aborted task to failed")?
    } else {
        claimed.path.clone()
    };

    error!(task_id = %task.id, reason = %abort.reason, "task failed");
    let mut event = Event::new(EventStatus::Failed, at);
    event.task_id = Some(task.id.clone());
    event.reason = Some(abort.reason.to_string());
    event.task_file = Some(task_file.display().to_string());
    event.run_dir = abort.run_dir.as_ref().map(|p| p.display().to_string());
    event.agent = Some(agent.name().to_string());
    event.tool = Some(agent.command().to_string());
    event.branch = abort.worktree.as_ref().map(|wt| wt.branch.clone());
    event.attempt = Some(task.attempt.saturating_add(1));
    event.max_attempts = Some(task.max_attempts);
    event.error = abort.error;
    append_event(events, &event);

    if ctx.config.cleanup_worktree_on_failure {
        cleanup(ctx, abort.worktree.as_ref());
    }
    Ok(IterationOutcome::Processed(TaskOutcome::Failed {
        task_id: task.id,
        task_file,
        reason: abort.reason,
    }))
}

fn cleanup(ctx: &StepContext<'_>, worktree: Option<&Worktree>) {
    if let Some(wt) = worktree {
        WorktreeManager::new(
            &ctx.settings.repo_root,
            &ctx.settings.paths.worktrees_dir,
            &ctx.settings.branch_prefix,
        )
        .cleanup(wt);
    }
}

fn append_event(events: &EventLog, event: &Event) {
    if let Err(err) = events.append(event) {
        warn!(path = %events.path().display(), err = %format!("{err:#}"), "failed to append event");
    }
}
