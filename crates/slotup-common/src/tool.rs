//! External tool execution with captured output.
//!
//! The engine shells out for the operations the platform owns: loop
//! mounts, the bootloader environment editor, and the reboot request.
//! Every invocation is synchronous, captures stdout/stderr, and maps a
//! non-zero exit to a structured error carrying the tool's stderr.

use std::ffi::OsStr;
use std::process::Command;

use thiserror::Error;
use tracing::debug;

/// Errors from running an external tool.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("failed to execute {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{tool} failed with exit code {code}: {stderr}")]
    Failed {
        tool: String,
        code: i32,
        stderr: String,
    },

    #[error("{tool} terminated by signal")]
    Killed { tool: String },
}

/// Result type alias for tool execution.
pub type Result<T> = std::result::Result<T, ToolError>;

/// Captured output of a successful tool run.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Run a tool to completion and capture its output.
///
/// Succeeds only on exit code zero.
pub fn run_tool<S, I, A>(program: S, args: I) -> Result<ToolOutput>
where
    S: AsRef<OsStr>,
    I: IntoIterator<Item = A>,
    A: AsRef<OsStr>,
{
    let tool = program.as_ref().to_string_lossy().into_owned();
    let mut command = Command::new(program.as_ref());
    command.args(args);

    debug!(tool = %tool, "running external tool");

    let output = command.output().map_err(|source| ToolError::Spawn {
        tool: tool.clone(),
        source,
    })?;

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

    match output.status.code() {
        Some(0) => Ok(ToolOutput { stdout, stderr }),
        Some(code) => Err(ToolError::Failed {
            tool,
            code,
            stderr: stderr.trim().to_string(),
        }),
        None => Err(ToolError::Killed { tool }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn captures_stdout() {
        let out = run_tool("sh", ["-c", "echo hello"]).unwrap();
        assert_eq!(out.stdout.trim(), "hello");
    }

    #[test]
    fn nonzero_exit_is_failed_with_stderr() {
        let err = run_tool("sh", ["-c", "echo oops >&2; exit 3"]).unwrap_err();
        match err {
            ToolError::Failed { code, stderr, .. } => {
                assert_eq!(code, 3);
                assert_eq!(stderr, "oops");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn missing_tool_is_spawn_error() {
        let err = run_tool("/nonexistent/tool-xyz", [] as [&str; 0]).unwrap_err();
        assert!(matches!(err, ToolError::Spawn { .. }));
    }
}
