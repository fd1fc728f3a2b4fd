//! `delegate`: hand tasks to external AI coding agents through a file queue.
//!
//! Tasks are JSON files under `<home>/inbox/`. `delegate daemon` claims them one
//! at a time, runs the matching agent, and files them under `completed/` or
//! `failed/`, keeping a run record for every attempt.

use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use tracing::info;

use delegate::exit_codes;
use delegate::io::config::load_config_or_default;
use delegate::io::executor::ProcessRunner;
use delegate::io::init::{InitOptions, ensure_layout, init_home};
use delegate::logging;
use delegate::looping::{LoopOptions, run_daemon};
use delegate::settings::{Settings, SettingsInput};
use delegate::status::collect_status;
use delegate::submit::{SubmitRequest, parse_env_pairs, submit_task};

#[derive(Parser)]
#[command(
    name = "delegate",
    version,
    about = "File-queue daemon that delegates tasks to AI coding agents"
)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,
    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct GlobalArgs {
    /// Delegate home directory (default: <repo>/.delegate).
    #[arg(long, env = "DELEGATE_HOME", global = true)]
    home: Option<PathBuf>,
    /// Repository root (default: git top-level of the current directory).
    #[arg(long, global = true)]
    repo: Option<PathBuf>,
    /// Prefix for worktree branch names.
    #[arg(long, env = "DELEGATE_BRANCH_PREFIX", global = true)]
    branch_prefix: Option<String>,
    /// Shared agent definitions, overridden by <home>/agents.
    #[arg(long, env = "DELEGATE_GLOBAL_AGENTS_DIR", global = true)]
    global_agents_dir: Option<PathBuf>,
    /// Ignore the shared agent directory.
    #[arg(long, env = "DELEGATE_NO_GLOBAL_AGENTS", global = true)]
    no_global_agents: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Run the control loop until interrupted.
    Daemon {
        /// Process at most one task, then exit.
        #[arg(long)]
        once: bool,
        /// Sleep between idle iterations (overrides pollIntervalMs).
        #[arg(long)]
        poll_interval_ms: Option<u64>,
    },
    /// Create the home layout, default config, and an example agent.
    Init {
        /// Overwrite existing files.
        #[arg(short, long)]
        force: bool,
    },
    /// Queue a new task.
    Submit(SubmitArgs),
    /// Show queue counts and registered agents.
    Status {
        /// Print JSON instead of text.
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args)]
struct SubmitArgs {
    #[arg(long)]
    title: Option<String>,
    #[arg(long)]
    id: Option<String>,
    /// Preferred agent name.
    #[arg(long)]
    agent: Option<String>,
    /// Preferred agent command.
    #[arg(long)]
    tool: Option<String>,
    /// Working directory, relative to the worktree or repository root.
    #[arg(long)]
    cwd: Option<String>,
    #[arg(long)]
    max_attempts: Option<u32>,
    /// Environment override, KEY=VALUE (repeatable).
    #[arg(long = "env", value_name = "KEY=VALUE")]
    env: Vec<String>,
    /// Extra agent argument (repeatable).
    #[arg(long = "arg", value_name = "ARG", allow_hyphen_values = true)]
    args: Vec<String>,
    /// Prompt text, or `-` to read it from stdin.
    prompt: String,
}

fn main() {
    logging::init("info");
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{err:#}");
            std::process::exit(exit_codes::BOOTSTRAP);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let poll_interval_ms = match &cli.command {
        Command::Daemon {
            poll_interval_ms, ..
        } => *poll_interval_ms,
        _ => None,
    };
    let cwd = std::env::current_dir().context("resolve current directory")?;
    let settings = Settings::resolve(
        SettingsInput {
            home: cli.global.home,
            repo: cli.global.repo,
            branch_prefix: cli.global.branch_prefix,
            global_agents_dir: cli.global.global_agents_dir,
            no_global_agents: cli.global.no_global_agents,
            poll_interval_ms,
        },
        &cwd,
    )?;

    match cli.command {
        Command::Daemon { once, .. } => cmd_daemon(&settings, once),
        Command::Init { force } => cmd_init(&settings, force),
        Command::Submit(args) => cmd_submit(&settings, args),
        Command::Status { json } => cmd_status(&settings, json),
    }
}

fn cmd_daemon(settings: &Settings, once: bool) -> Result<i32> {
    let stop = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&stop);
    ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);
    })
    .context("install stop signal handler")?;

    let outcome = run_daemon(settings, &ProcessRunner, LoopOptions { once }, &stop)?;
    info!(?outcome, "daemon exited");
    Ok(exit_codes::OK)
}

fn cmd_init(settings: &Settings, force: bool) -> Result<i32> {
    init_home(&settings.paths, &InitOptions { force })?;
    println!("initialized {}", settings.paths.home.display());
    Ok(exit_codes::OK)
}

fn cmd_submit(settings: &Settings, args: SubmitArgs) -> Result<i32> {
    let prompt = if args.prompt == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("read prompt from stdin")?;
        buf
    } else {
        args.prompt
    };

    ensure_layout(&settings.paths)?;
    let config = load_config_or_default(&settings.paths.config_path);
    let request = SubmitRequest {
        prompt,
        title: args.title,
        id: args.id,
        agent: args.agent,
        tool: args.tool,
        cwd: args.cwd,
        max_attempts: args.max_attempts,
        env: parse_env_pairs(&args.env)?,
        command_args: args.args,
    };
    let submitted = submit_task(
        &settings.paths,
        request,
        config.default_max_attempts,
        Utc::now(),
    )?;
    println!("{}\t{}", submitted.id, submitted.path.display());
    Ok(exit_codes::OK)
}

fn cmd_status(settings: &Settings, json: bool) -> Result<i32> {
    let report = collect_status(settings)?;
    if json {
        let payload = serde_json::to_string_pretty(&report).context("serialize status")?;
        println!("{payload}");
    } else {
        print!("{}", report.render());
    }
    Ok(exit_codes::OK)
}
