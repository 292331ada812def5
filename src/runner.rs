//! External command execution.
//!
//! Everything sheriff shells out to (git, osv-scanner) goes through the
//! [`CommandRunner`] trait so tests can substitute scripted fakes.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;

/// Exit code reported when a child was terminated without one (signal).
pub const LAUNCH_FAILURE_CODE: i32 = -1;

/// Captured outcome of one external command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: Vec<u8>,
    pub exit_code: i32,
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Runs `program` with `args`, capturing stdout and the exit code.
    ///
    /// A non-zero exit is not an error here: stdout and the real code are
    /// returned and callers interpret them. Only a launch failure (program
    /// missing or not executable) is an `Err`.
    async fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput>;
}

/// Runs commands as real subprocesses.
///
/// Children are spawned `kill_on_drop`, so cancelling a patrol reaps any
/// in-flight scanner or clone.
pub struct ShellRunner;

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("failed to launch {program}"))?;

        Ok(CommandOutput {
            stdout: output.stdout,
            exit_code: output.status.code().unwrap_or(LAUNCH_FAILURE_CODE),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_captures_stdout_and_zero_exit() {
        let output = ShellRunner.run("echo", &["hello"]).await.unwrap();
        assert_eq!(output.exit_code, 0);
        assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "hello");
    }

    #[tokio::test]
    async fn test_run_nonzero_exit_is_not_an_error() {
        let output = ShellRunner.run("false", &[]).await.unwrap();
        assert_eq!(output.exit_code, 1);
    }

    #[tokio::test]
    async fn test_run_missing_program_is_launch_failure() {
        let result = ShellRunner.run("definitely-not-a-real-program-xyz", &[]).await;
        assert!(result.is_err());
    }
}
