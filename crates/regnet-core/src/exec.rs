//! Remote command execution inside sandboxes.

use crate::error::{CoreError, Result};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Result of one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    /// Process exit code (-1 if terminated by a signal).
    pub exit_code: i32,
    /// Standard output.
    pub stdout: String,
    /// Standard error.
    pub stderr: String,
}

impl ExecOutput {
    /// Check if the command succeeded (exit code 0).
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs an executable inside a named sandbox.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `exe args` inside `sandbox` and return its stdout.
    ///
    /// `args` is split on whitespace. A non-zero exit or a spawn failure
    /// is a [`CoreError::Command`].
    async fn run(&self, sandbox: &str, exe: &str, args: &str) -> Result<String>;

    /// Run several argument strings in order, stopping at the first failure.
    ///
    /// Later commands never run once one has failed. Outputs of the
    /// successful commands are concatenated.
    async fn run_batch(&self, sandbox: &str, exe: &str, batch: &[String]) -> Result<String> {
        let mut output = String::new();
        for args in batch {
            output.push_str(&self.run(sandbox, exe, args).await?);
        }
        Ok(output)
    }
}

/// Runs commands through the `docker exec` CLI.
#[derive(Debug, Clone)]
pub struct DockerExecRunner {
    program: String,
    timeout: Duration,
}

impl Default for DockerExecRunner {
    fn default() -> Self {
        Self {
            program: "docker".into(),
            timeout: Duration::from_secs(300),
        }
    }
}

impl DockerExecRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a different engine CLI (e.g. `podman`).
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Per-command timeout (default: 300s).
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run and capture the full output without judging the exit code.
    pub async fn exec(&self, sandbox: &str, exe: &str, args: &str) -> std::io::Result<ExecOutput> {
        let mut command = Command::new(&self.program);
        command
            .arg("exec")
            .arg(sandbox)
            .arg(exe)
            .args(args.split_whitespace())
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = command.output().await?;
        Ok(ExecOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[async_trait]
impl CommandRunner for DockerExecRunner {
    async fn run(&self, sandbox: &str, exe: &str, args: &str) -> Result<String> {
        tracing::debug!(sandbox = %sandbox, exe = %exe, args = %args, "Executing remote command");

        let failure = |message: String| CoreError::Command {
            sandbox: sandbox.to_owned(),
            exe: exe.to_owned(),
            args: args.to_owned(),
            message,
        };

        let output = tokio::time::timeout(self.timeout, self.exec(sandbox, exe, args))
            .await
            .map_err(|_| failure(format!("timed out after {:?}", self.timeout)))?
            .map_err(|e| failure(e.to_string()))?;

        tracing::debug!(
            sandbox = %sandbox,
            exit_code = output.exit_code,
            stdout_len = output.stdout.len(),
            "Remote command completed"
        );
        tracing::trace!(stdout = %output.stdout, stderr = %output.stderr, "Remote command output");

        if !output.success() {
            let stderr = output.stderr.trim();
            return Err(failure(if stderr.is_empty() {
                format!("exit code {}", output.exit_code)
            } else {
                format!("exit code {}: {}", output.exit_code, stderr)
            }));
        }
        Ok(output.stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Fails on a chosen argument string, records everything it runs.
    struct Recorder {
        fail_on: &'static str,
        ran: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl CommandRunner for Recorder {
        async fn run(&self, sandbox: &str, exe: &str, args: &str) -> Result<String> {
            self.ran.lock().unwrap().push(args.to_owned());
            if args == self.fail_on {
                return Err(CoreError::Command {
                    sandbox: sandbox.into(),
                    exe: exe.into(),
                    args: args.into(),
                    message: "exit code 1".into(),
                });
            }
            Ok(format!("{args}\n"))
        }
    }

    #[tokio::test]
    async fn test_run_batch_short_circuits() {
        let runner = Recorder {
            fail_on: "b",
            ran: Mutex::new(Vec::new()),
        };
        let batch: Vec<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();

        let result = runner.run_batch("node", "cli", &batch).await;

        assert!(matches!(result, Err(CoreError::Command { ref args, .. }) if args == "b"));
        assert_eq!(*runner.ran.lock().unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_run_batch_concatenates() {
        let runner = Recorder {
            fail_on: "",
            ran: Mutex::new(Vec::new()),
        };
        let batch: Vec<String> = vec!["x".into(), "y".into()];

        let output = runner.run_batch("node", "cli", &batch).await.unwrap();
        assert_eq!(output, "x\ny\n");
    }

    #[tokio::test]
    async fn test_docker_exec_missing_program() {
        let runner = DockerExecRunner::new().with_program("/nonexistent/regnet-engine-cli");
        let result = runner.run("node", "cli", "getinfo").await;
        assert!(matches!(result, Err(CoreError::Command { .. })));
    }

    #[test]
    fn test_exec_output_success() {
        let ok = ExecOutput {
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
        };
        assert!(ok.success());
        assert!(!ExecOutput { exit_code: 1, ..ok }.success());
    }
}
