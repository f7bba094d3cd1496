//! Running external command-line tools.

use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;

/// Errors raised while invoking an external tool.
#[derive(Debug, Error)]
pub enum ToolError {
    /// The program could not be started at all.
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        /// Program that failed to start
        program: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The program ran and exited non-zero.
    #[error("{program}: {message}")]
    Failed {
        /// Program that failed
        program: String,
        /// Exit code, if the process was not killed by a signal
        status: Option<i32>,
        /// Trimmed combined output of the program
        message: String,
    },
}

impl ToolError {
    /// Name of the program this error refers to.
    pub fn program(&self) -> &str {
        match self {
            Self::Spawn { program, .. } | Self::Failed { program, .. } => program,
        }
    }
}

/// Captured output of a successful tool run.
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    /// Stdout followed by stderr.
    pub fn combined(&self) -> String {
        let mut out = String::with_capacity(self.stdout.len() + self.stderr.len());
        out.push_str(&self.stdout);
        out.push_str(&self.stderr);
        out
    }
}

/// Render a command as `program arg1 arg2 ...` for logs and progress output.
pub fn describe(cmd: &Command) -> String {
    let std = cmd.as_std();
    let mut parts = vec![std.get_program().to_string_lossy().into_owned()];
    parts.extend(std.get_args().map(|a| a.to_string_lossy().into_owned()));
    parts.join(" ")
}

fn program_of(cmd: &Command) -> String {
    cmd.as_std().get_program().to_string_lossy().into_owned()
}

/// Run a command to completion and capture its output.
///
/// Stdin is closed. A non-zero exit is reported as [`ToolError::Failed`]
/// whose message is the trimmed combined output, or the exit status when the
/// tool printed nothing.
pub async fn run_tool(cmd: &mut Command) -> Result<ToolOutput, ToolError> {
    let program = program_of(cmd);
    tracing::debug!(command = %describe(cmd), "Running tool");

    let output = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|source| ToolError::Spawn {
            program: program.clone(),
            source,
        })?;

    let captured = ToolOutput {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    };
    tracing::trace!(
        program = %program,
        stdout = %captured.stdout,
        stderr = %captured.stderr,
        "Tool output"
    );

    if !output.status.success() {
        let combined = captured.combined();
        let trimmed = combined.trim();
        let message = if trimmed.is_empty() {
            format!("exited with {}", output.status)
        } else {
            trimmed.to_string()
        };
        tracing::debug!(program = %program, status = ?output.status.code(), "Tool failed");
        return Err(ToolError::Failed {
            program,
            status: output.status.code(),
            message,
        });
    }

    Ok(captured)
}
