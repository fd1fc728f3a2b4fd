//! The daemon control loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::{debug, error, info, instrument};

use crate::io::config::load_config_or_default;
use crate::io::executor::AgentRunner;
use crate::io::init::ensure_layout;
use crate::io::registry::load_agents;
use crate::recover::recover_processing;
use crate::settings::Settings;
use crate::step::{IterationOutcome, StepContext, process_next};

/// Longest uninterrupted sleep; a stop request is noticed within this bound.
const SLEEP_SLICE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, Default)]
pub struct LoopOptions {
    /// Run exactly one iteration, then return.
    pub once: bool,
}

/// Reason why `run_daemon` returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopStop {
    /// Single-shot mode finished its iteration.
    Once,
    /// The stop flag was observed between iterations.
    Stopped,
}

/// Summary of a daemon run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopOutcome {
    pub recovered: usize,
    pub iterations: u64,
    /// Iterations that moved a task to a new lifecycle state.
    pub processed: u64,
    pub stop: LoopStop,
}

/// Bootstrap the home layout, recover orphans, then iterate until stopped.
///
/// Only bootstrap failures are returned as errors. A failing iteration is
/// logged and followed by a normal sleep. An in-flight agent is never
/// interrupted; `stop` is checked between iterations and while sleeping.
#[instrument(skip_all, fields(home = %settings.paths.home.display(), once = options.once))]
pub fn run_daemon<R: AgentRunner>(
    settings: &Settings,
    runner: &R,
    options: LoopOptions,
    stop: &AtomicBool,
) -> Result<LoopOutcome> {
    ensure_layout(&settings.paths).context("bootstrap delegate home")?;
    let recovered = recover_processing(&settings.paths)
        .context("recover tasks left in processing")?
        .len();
    if recovered > 0 {
        info!(recovered, "recovered interrupted tasks");
    }
    info!(repo = %settings.repo_root.display(), "daemon started");

    let mut outcome = LoopOutcome {
        recovered,
        iterations: 0,
        processed: 0,
        stop: LoopStop::Stopped,
    };
    loop {
        if stop.load(Ordering::SeqCst) {
            info!("stop requested");
            break;
        }

        let (result, poll_interval) = run_iteration(settings, runner);
        outcome.iterations += 1;
        let sleep = match result {
            Ok(iteration) => {
                if !iteration.should_sleep() {
                    outcome.processed += 1;
                }
                debug!(?iteration, "iteration finished");
                iteration.should_sleep()
            }
            Err(err) => {
                error!(err = %format!("{err:#}"), "iteration failed");
                true
            }
        };

        if options.once {
            outcome.stop = LoopStop::Once;
            break;
        }
        if sleep {
            sleep_unless_stopped(poll_interval, stop);
        }
    }
    info!(
        iterations = outcome.iterations,
        processed = outcome.processed,
        "daemon stopped"
    );
    Ok(outcome)
}

/// One iteration with freshly loaded config and agents.
///
/// Returns the step result and the poll interval in effect for it.
pub fn run_iteration<R: AgentRunner>(
    settings: &Settings,
    runner: &R,
) -> (Result<IterationOutcome>, Duration) {
    let config = load_config_or_default(&settings.paths.config_path);
    let poll_interval = settings
        .poll_interval
        .unwrap_or_else(|| config.poll_interval());
    let registry = load_agents(&settings.agent_dirs(), &settings.repo_root);
    let ctx = StepContext {
        settings,
        config: &config,
        agents: &registry.agents,
    };
    (process_next(&ctx, runner), poll_interval)
}

fn sleep_unless_stopped(duration: Duration, stop: &AtomicBool) {
    let deadline = Instant::now() + duration;
    loop {
        if stop.load(Ordering::SeqCst) {
            return;
        }
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        thread::sleep((deadline - now).min(SLEEP_SLICE));
    }
}
