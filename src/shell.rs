//! Implementation of cancellable shell commands.

use std::process::ExitStatus;
use std::process::Stdio;

use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// The default shell used to run commands.
pub const DEFAULT_SHELL: &str = "sh";

/// An error that occurs when running a shell command.
#[derive(Debug, thiserror::Error)]
pub enum ShellError {
    /// The shell could not be spawned.
    #[error("failed to spawn `{shell}` to run `{command}`")]
    Spawn {
        /// The shell program.
        shell: String,
        /// The command.
        command: String,
        /// The I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The command exited unsuccessfully.
    #[error("command `{command}` failed ({status}): {stderr}")]
    Failed {
        /// The command.
        command: String,
        /// The exit status of the command.
        status: ExitStatus,
        /// The trimmed standard error of the command.
        stderr: String,
    },
    /// The command was canceled before it completed.
    #[error("command `{command}` was canceled")]
    Canceled {
        /// The command.
        command: String,
    },
}

/// Runs commands through a shell.
#[derive(Debug, Clone)]
pub struct Shell {
    /// The shell program; commands are passed to it with `-c`.
    program: String,
}

impl Shell {
    /// Constructs a new shell with the given program.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Runs the given command, returning its standard output.
    ///
    /// The command is killed if the token is canceled before it completes.
    pub async fn run(&self, command: &str, token: &CancellationToken) -> Result<String, ShellError> {
        let child = Command::new(&self.program)
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ShellError::Spawn {
                shell: self.program.clone(),
                command: command.to_string(),
                source,
            })?;

        let output = tokio::select! {
            biased;
            _ = token.cancelled() => {
                return Err(ShellError::Canceled { command: command.to_string() });
            }
            output = child.wait_with_output() => output.map_err(|source| ShellError::Spawn {
                shell: self.program.clone(),
                command: command.to_string(),
                source,
            })?,
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr);
        trace!(command, %stdout, %stderr, status = %output.status, "command completed");

        if !output.status.success() {
            return Err(ShellError::Failed {
                command: command.to_string(),
                status: output.status,
                stderr: stderr.trim().to_string(),
            });
        }

        Ok(stdout)
    }
}

impl Default for Shell {
    fn default() -> Self {
        Self::new(DEFAULT_SHELL)
    }
}
