use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

use crate::error::{ControllerError, Result};

/// What to do after a line of remote output has been seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineAction {
    Continue,
    /// Stop the remote command; output collected so far is returned
    Stop,
}

/// Called for every non-empty line of remote stdout.
pub type LineFilter = Box<dyn FnMut(&str) -> LineAction + Send>;

/// Result of a remote command
#[derive(Debug, Clone, Default)]
pub struct ExecutionResult {
    pub success: bool,
    /// True when a [`LineFilter`] asked to stop the command
    pub stopped: bool,
    pub output: String,
    pub errors: String,
}

/// Runs commands on worker machines.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Run `command` on the worker at `address` and wait for it to finish,
    /// or for `filter` to return [`LineAction::Stop`].
    async fn execute(
        &self,
        address: &str,
        command: &str,
        filter: Option<LineFilter>,
    ) -> Result<ExecutionResult>;

    /// Local command line equivalent to `execute(address, command)`, kept on
    /// the worker for diagnostics.
    fn describe(&self, address: &str, command: &str) -> String;
}

/// Executes remote commands through an ssh client: `ssh <address> <command>`.
#[derive(Debug, Clone)]
pub struct SshExecutor {
    program: String,
}

impl Default for SshExecutor {
    fn default() -> Self {
        Self::new("ssh")
    }
}

impl SshExecutor {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn execute(
        &self,
        address: &str,
        command: &str,
        mut filter: Option<LineFilter>,
    ) -> Result<ExecutionResult> {
        tracing::info!(program = %self.program, address, command, "Running remote command");

        let remote_error = |source| ControllerError::Remote {
            address: address.to_string(),
            source,
        };

        let mut child = Command::new(&self.program)
            .arg(address)
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(remote_error)?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ControllerError::Internal("child stdout not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ControllerError::Internal("child stderr not captured".to_string()))?;

        let mut out_lines = BufReader::new(stdout).lines();
        let mut err_lines = BufReader::new(stderr).lines();
        let (mut out_open, mut err_open) = (true, true);
        let mut result = ExecutionResult::default();

        while out_open || err_open {
            tokio::select! {
                line = out_lines.next_line(), if out_open => match line {
                    Ok(Some(line)) => {
                        result.output.push_str(&line);
                        result.output.push('\n');
                        if line.is_empty() {
                            continue;
                        }
                        if let Some(filter) = filter.as_mut() {
                            if filter(&line) == LineAction::Stop {
                                result.stopped = true;
                                break;
                            }
                        }
                    }
                    Ok(None) => out_open = false,
                    Err(e) => {
                        tracing::warn!(address, error = %e, "Failed to read remote output");
                        out_open = false;
                    }
                },
                line = err_lines.next_line(), if err_open => match line {
                    Ok(Some(line)) => {
                        if !line.is_empty() {
                            tracing::warn!(address, line = %line, "Remote error output");
                        }
                        result.errors.push_str(&line);
                        result.errors.push('\n');
                    }
                    Ok(None) => err_open = false,
                    Err(e) => {
                        tracing::warn!(address, error = %e, "Failed to read remote error output");
                        err_open = false;
                    }
                },
            }
        }

        if result.stopped {
            if let Err(e) = child.start_kill() {
                tracing::warn!(address, error = %e, "Failed to stop remote command");
            }
        }

        let status = child.wait().await.map_err(remote_error)?;
        result.success = status.success();
        tracing::debug!(address, exit_code = ?status.code(), stopped = result.stopped, "Remote command finished");

        Ok(result)
    }

    fn describe(&self, address: &str, command: &str) -> String {
        format!("{} {} {}", self.program, address, command)
    }
}
