//! Child-process execution with bounded, deadlock-free output capture.

use std::io::{Read, Write};
use std::process::{Command, ExitStatus, Stdio};
use std::thread;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};

use crate::core::types::ExitOutcome;

/// Per-stream cap on captured agent output.
pub const OUTPUT_LIMIT_BYTES: usize = 20 * 1024 * 1024;

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub exit: ExitOutcome,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// Bytes read past the limit and discarded.
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
}

/// Run a command to completion and capture stdout/stderr.
///
/// Both pipes are drained concurrently with the stdin writer, so a child that
/// fills one pipe before reading its input cannot wedge the daemon. Bytes past
/// `output_limit_bytes` are discarded while the pipe keeps draining.
#[instrument(skip_all, fields(output_limit_bytes, stdin = stdin.is_some()))]
pub fn run_command(
    mut cmd: Command,
    stdin: Option<Vec<u8>>,
    output_limit_bytes: usize,
) -> Result<CommandOutput> {
    if stdin.is_some() {
        cmd.stdin(Stdio::piped());
    } else {
        cmd.stdin(Stdio::null());
    }
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    // Own process group: a terminal Ctrl-C reaches the daemon's stop handler
    // but not the running agent.
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    debug!("spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };

    let stdin_handle = match stdin {
        Some(input) => {
            let mut child_stdin = child
                .stdin
                .take()
                .ok_or_else(|| anyhow!("stdin was not piped"))?;
            Some(thread::spawn(move || {
                // The child may exit without reading; a broken pipe is not our failure.
                if let Err(e) = child_stdin.write_all(&input)
                    && e.kind() != std::io::ErrorKind::BrokenPipe
                {
                    warn!(err = %e, "failed to write child stdin");
                }
            }))
        }
        None => None,
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let stdout_handle = thread::spawn(move || read_stream_limited(stdout, output_limit_bytes));
    let stderr_handle = thread::spawn(move || read_stream_limited(stderr, output_limit_bytes));

    let status = child.wait().context("wait for command")?;

    if let Some(handle) = stdin_handle
        && handle.join().is_err()
    {
        warn!("stdin writer thread panicked");
    }
    let (stdout, stdout_truncated) = join_output(stdout_handle).context("join stdout")?;
    let (stderr, stderr_truncated) = join_output(stderr_handle).context("join stderr")?;

    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    let exit = exit_outcome(status);
    debug!(%exit, "command finished");
    Ok(CommandOutput {
        exit,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
    })
}

/// Map a platform exit status to an exit code or terminating signal.
pub fn exit_outcome(status: ExitStatus) -> ExitOutcome {
    if let Some(code) = status.code() {
        return ExitOutcome::Code(code);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return ExitOutcome::Signal(signal);
        }
    }
    ExitOutcome::Code(-1)
}

fn join_output(handle: thread::JoinHandle<Result<(Vec<u8>, usize)>>) -> Result<(Vec<u8>, usize)> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

fn read_stream_limited<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        let remaining = limit.saturating_sub(buf.len());
        if remaining > 0 {
            let keep = n.min(remaining);
            buf.extend_from_slice(&chunk[..keep]);
            truncated += n.saturating_sub(keep);
        } else {
            truncated += n;
        }
    }

    Ok((buf, truncated))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[test]
    fn captures_streams_and_exit_code() {
        let out = run_command(sh("echo out; echo err >&2; exit 3"), None, 1024).expect("run");
        assert_eq!(out.exit, ExitOutcome::Code(3));
        assert_eq!(out.stdout, b"out\n");
        assert_eq!(out.stderr, b"err\n");
    }

    #[test]
    fn stdin_is_delivered() {
        let out = run_command(sh("cat"), Some(b"hello".to_vec()), 1024).expect("run");
        assert!(out.exit.success());
        assert_eq!(out.stdout, b"hello");
    }

    #[test]
    fn large_stdin_with_large_output_does_not_deadlock() {
        let input = vec![b'x'; 512 * 1024];
        let out = run_command(sh("cat; cat /dev/null"), Some(input), 1024).expect("run");
        assert_eq!(out.stdout.len(), 1024);
        assert_eq!(out.stdout_truncated, 512 * 1024 - 1024);
    }

    #[test]
    fn child_ignoring_stdin_is_not_an_error() {
        let out = run_command(sh("exit 0"), Some(vec![b'y'; 1024 * 1024]), 64).expect("run");
        assert!(out.exit.success());
    }

    #[test]
    fn signal_termination_is_reported() {
        let out = run_command(sh("kill -9 $$"), None, 64).expect("run");
        assert_eq!(out.exit, ExitOutcome::Signal(9));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn child_leads_its_own_process_group() {
        // Field 5 of /proc/<pid>/stat is the process group id.
        let pgrp_of = |stat: &str| -> String {
            let after_comm = &stat[stat.rfind(')').expect("comm") + 2..];
            after_comm.split(' ').nth(2).expect("pgrp").to_string()
        };
        let own = std::fs::read_to_string("/proc/self/stat").expect("own stat");

        let out = run_command(sh("echo $$; cat /proc/$$/stat"), None, 4096).expect("run");

        let text = String::from_utf8(out.stdout).expect("utf8");
        let (pid, stat) = text.split_once('\n').expect("two lines");
        let child_pgrp = pgrp_of(stat);
        assert_eq!(child_pgrp, pid.trim());
        assert_ne!(child_pgrp, pgrp_of(&own));
    }

    #[test]
    fn spawn_failure_is_an_error() {
        let err = run_command(Command::new("/nonexistent/agent-binary"), None, 64).unwrap_err();
        assert!(err.to_string().contains("spawn command"));
    }
}
