//! # Command Runner - Deadline-Bounded Process Execution
//!
//! Thin abstraction over external CLI invocations (container runtime, SMART
//! tooling, ping, reboot). Every call carries its own deadline; the child
//! process is killed when the deadline expires. The [`CommandRunner`] trait
//! is the seam that makes every actuator and watchdog testable without
//! touching the host: production wires [`SystemCommandRunner`], tests wire
//! [`ScriptedRunner`] with canned outputs and an invocation journal.
//!
//! Non-zero exit is not an error at this layer. Callers inspect
//! [`CommandOutput::success`] and decide; only spawn failures and expired
//! deadlines surface as [`SentinelError`].

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use crate::{Result, SentinelError};

/// Captured output of one external command invocation
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    /// Decoded stdout (lossy UTF-8)
    pub stdout: String,
    /// Decoded stderr (lossy UTF-8)
    pub stderr: String,
    /// Process exit code; -1 when the process was terminated by a signal
    pub exit_code: i32,
}

impl CommandOutput {
    /// True when the process exited with status zero
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Convenience constructor for scripted successes
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            exit_code: 0,
        }
    }

    /// Convenience constructor for scripted failures
    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            exit_code,
        }
    }
}

/// Seam for external CLI execution
///
/// Implementations must be safe to call concurrently; the sentinel never
/// queues invocations behind a lock, so two callers may run the same command
/// in parallel (the container list path tolerates the resulting
/// double-fetch).
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args`, killing the child once `deadline` expires
    async fn run(&self, program: &str, args: &[&str], deadline: Duration) -> Result<CommandOutput>;
}

/// Production runner backed by `tokio::process`
pub struct SystemCommandRunner;

impl SystemCommandRunner {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SystemCommandRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandRunner for SystemCommandRunner {
    async fn run(&self, program: &str, args: &[&str], deadline: Duration) -> Result<CommandOutput> {
        debug!(program, ?args, deadline_ms = deadline.as_millis() as u64, "running external command");

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SentinelError::Command(format!("failed to spawn {program}: {e}")))?;

        let output = tokio::time::timeout(deadline, child.wait_with_output())
            .await
            .map_err(|_| {
                // kill_on_drop reaps the child when the future is dropped here
                SentinelError::Timeout(format!(
                    "{program} exceeded {}s deadline",
                    deadline.as_secs_f64()
                ))
            })?
            .map_err(|e| SentinelError::Command(format!("failed to collect {program}: {e}")))?;

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code().unwrap_or(-1),
        })
    }
}

/// Scripted runner for tests
///
/// Responses are keyed by `"program arg0 arg1 …"`. Each key holds a FIFO of
/// responses; when the FIFO runs dry the configured fallback answers. Every
/// invocation is journalled so tests can assert exact call counts (for
/// example: exactly one reboot after an OOM loop).
pub struct ScriptedRunner {
    responses: Mutex<HashMap<String, VecDeque<Result<CommandOutput>>>>,
    fallback: Mutex<Result<CommandOutput>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(HashMap::new()),
            fallback: Mutex::new(Err(SentinelError::Command("unscripted command".into()))),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Set the answer used when no scripted response matches
    pub fn set_fallback(&self, response: Result<CommandOutput>) {
        *self.fallback.lock() = response;
    }

    /// Queue one response for an exact command line
    pub fn script(&self, command_line: &str, response: Result<CommandOutput>) {
        self.responses
            .lock()
            .entry(command_line.to_string())
            .or_default()
            .push_back(response);
    }

    /// Queue a success with the given stdout for an exact command line
    pub fn script_ok(&self, command_line: &str, stdout: &str) {
        self.script(command_line, Ok(CommandOutput::ok(stdout)));
    }

    /// Journalled command lines, oldest first
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    /// Number of journalled invocations whose command line starts with `prefix`
    pub fn call_count(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|line| line.starts_with(prefix))
            .count()
    }
}

impl Default for ScriptedRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, program: &str, args: &[&str], _deadline: Duration) -> Result<CommandOutput> {
        let mut line = program.to_string();
        for arg in args {
            line.push(' ');
            line.push_str(arg);
        }
        self.calls.lock().push(line.clone());

        if let Some(queue) = self.responses.lock().get_mut(&line) {
            if let Some(response) = queue.pop_front() {
                return response;
            }
        }
        self.fallback.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn system_runner_captures_stdout() {
        let runner = SystemCommandRunner::new();
        let out = runner
            .run("echo", &["hello"], Duration::from_secs(5))
            .await
            .unwrap();
        assert!(out.success());
        assert_eq!(out.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn system_runner_reports_nonzero_exit() {
        let runner = SystemCommandRunner::new();
        let out = runner
            .run("sh", &["-c", "echo boom >&2; exit 3"], Duration::from_secs(5))
            .await
            .unwrap();
        assert!(!out.success());
        assert_eq!(out.exit_code, 3);
        assert_eq!(out.stderr.trim(), "boom");
    }

    #[tokio::test]
    async fn system_runner_enforces_deadline() {
        let runner = SystemCommandRunner::new();
        let err = runner
            .run("sleep", &["5"], Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, SentinelError::Timeout(_)));
    }

    #[tokio::test]
    async fn scripted_runner_replays_in_order_and_journals() {
        let runner = ScriptedRunner::new();
        runner.script_ok("docker ps -a", "first");
        runner.script_ok("docker ps -a", "second");

        let a = runner.run("docker", &["ps", "-a"], Duration::from_secs(1)).await.unwrap();
        let b = runner.run("docker", &["ps", "-a"], Duration::from_secs(1)).await.unwrap();
        assert_eq!(a.stdout, "first");
        assert_eq!(b.stdout, "second");

        let c = runner.run("docker", &["ps", "-a"], Duration::from_secs(1)).await;
        assert!(c.is_err());

        assert_eq!(runner.call_count("docker ps"), 3);
    }
}
