//! Scoped subprocess execution.
//!
//! One lifecycle for every capability that spawns a child: spawn →
//! feed stdin → wait with a deadline → hard-kill on timeout → bounded
//! wait for the reap → drain both pipes. Pipes are read concurrently
//! with the wait so a chatty child can never deadlock against a full
//! pipe buffer.

use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{ChildStderr, ChildStdout, Command};
use tokio::task::JoinHandle;
use tokio::time::timeout;

pub const KILL_WAIT: Duration = Duration::from_secs(3);

pub struct ProcessBudget {
    /// Maximum run time before the child is killed.
    pub run: Duration,
    /// How long to wait for the kill to be reaped.
    pub kill_wait: Duration,
}

#[derive(Debug)]
pub struct ProcessOutcome {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// -1 when the child was signal-terminated or never reaped.
    pub exit_code: i64,
    pub timed_out: bool,
    /// True when the child did not exit normally (signal or unreaped).
    pub crashed: bool,
    pub elapsed_ms: u64,
}

/// Run a configured command to completion under the budget.
///
/// A spawn failure is the only `Err`; once the child starts, the result
/// is always a [`ProcessOutcome`] with the drained output.
pub async fn run_with_budget(
    mut command: Command,
    stdin_bytes: Option<Vec<u8>>,
    budget: ProcessBudget,
) -> Result<ProcessOutcome, String> {
    command
        .stdin(if stdin_bytes.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let started = Instant::now();
    let mut child = command.spawn().map_err(|e| e.to_string())?;

    let stdout_reader = spawn_stdout_reader(child.stdout.take());
    let stderr_reader = spawn_stderr_reader(child.stderr.take());

    if let Some(bytes) = stdin_bytes {
        if let Some(mut stdin) = child.stdin.take() {
            // The write task closes the pipe when it finishes, which is
            // what signals EOF to the child.
            tokio::spawn(async move {
                let _ = stdin.write_all(&bytes).await;
                let _ = stdin.shutdown().await;
            });
        }
    }

    let mut timed_out = false;
    let status = match timeout(budget.run, child.wait()).await {
        Ok(Ok(status)) => Some(status),
        Ok(Err(e)) => return Err(e.to_string()),
        Err(_) => {
            timed_out = true;
            let _ = child.start_kill();
            match timeout(budget.kill_wait, child.wait()).await {
                Ok(Ok(status)) => Some(status),
                _ => None,
            }
        }
    };

    let stdout = drain_reader(stdout_reader).await;
    let stderr = drain_reader(stderr_reader).await;

    let (exit_code, crashed) = match status {
        Some(status) => (
            status.code().map(i64::from).unwrap_or(-1),
            status.code().is_none(),
        ),
        None => (-1, true),
    };

    Ok(ProcessOutcome {
        stdout,
        stderr,
        exit_code,
        timed_out,
        crashed,
        elapsed_ms: started.elapsed().as_millis() as u64,
    })
}

fn spawn_stdout_reader(stdout: Option<ChildStdout>) -> Option<JoinHandle<Vec<u8>>> {
    stdout.map(|mut pipe| {
        tokio::spawn(async move {
            let mut buffer = Vec::new();
            let _ = pipe.read_to_end(&mut buffer).await;
            buffer
        })
    })
}

fn spawn_stderr_reader(stderr: Option<ChildStderr>) -> Option<JoinHandle<Vec<u8>>> {
    stderr.map(|mut pipe| {
        tokio::spawn(async move {
            let mut buffer = Vec::new();
            let _ = pipe.read_to_end(&mut buffer).await;
            buffer
        })
    })
}

async fn drain_reader(reader: Option<JoinHandle<Vec<u8>>>) -> Vec<u8> {
    match reader {
        Some(handle) => handle.await.unwrap_or_default(),
        None => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn budget(run_ms: u64) -> ProcessBudget {
        ProcessBudget {
            run: Duration::from_millis(run_ms),
            kill_wait: KILL_WAIT,
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn captures_stdout_and_exit_code() {
        let mut command = Command::new("sh");
        command.arg("-c").arg("printf hello; exit 7");
        let outcome = run_with_budget(command, None, budget(10_000)).await.unwrap();
        assert_eq!(outcome.stdout, b"hello");
        assert_eq!(outcome.exit_code, 7);
        assert!(!outcome.timed_out);
        assert!(!outcome.crashed);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn captures_stderr_separately() {
        let mut command = Command::new("sh");
        command.arg("-c").arg("printf out; printf err >&2");
        let outcome = run_with_budget(command, None, budget(10_000)).await.unwrap();
        assert_eq!(outcome.stdout, b"out");
        assert_eq!(outcome.stderr, b"err");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn feeds_stdin_to_the_child() {
        let command = Command::new("cat");
        let outcome = run_with_budget(command, Some(b"ping".to_vec()), budget(10_000))
            .await
            .unwrap();
        assert_eq!(outcome.stdout, b"ping");
        assert_eq!(outcome.exit_code, 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn kills_the_child_on_timeout() {
        let mut command = Command::new("sleep");
        command.arg("30");
        let started = Instant::now();
        let outcome = run_with_budget(command, None, budget(100)).await.unwrap();
        assert!(outcome.timed_out);
        assert!(outcome.crashed);
        assert_eq!(outcome.exit_code, -1);
        assert!(started.elapsed() < Duration::from_secs(10), "kill must not hang");
    }

    #[tokio::test]
    async fn spawn_failure_is_an_error() {
        let command = Command::new("definitely-not-a-real-binary-9f3a");
        assert!(run_with_budget(command, None, budget(1_000)).await.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn large_output_does_not_deadlock() {
        let mut command = Command::new("sh");
        // Well past any pipe buffer size.
        command.arg("-c").arg("head -c 1048576 /dev/zero");
        let outcome = run_with_budget(command, None, budget(30_000)).await.unwrap();
        assert_eq!(outcome.stdout.len(), 1_048_576);
    }
}
