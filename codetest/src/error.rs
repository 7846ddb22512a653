//! Error taxonomy for an engine run.
//!
//! Errors travel through `anyhow::Result`; orchestration code recovers the
//! typed variants with `downcast_ref` to decide exit codes and watch-mode
//! behavior.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::core::format::format_duration;
use crate::core::types::Role;

/// Invalid or incomplete declarative specification. Raised before the first case.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("configuration error: {message}")]
pub struct ConfigurationError {
    pub message: String,
}

impl ConfigurationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// A source file failed to compile. Aborts the whole run.
#[derive(Debug, Clone, Error)]
#[error("failed to compile {} (exit code {exit_code:?})\n{diagnostics}", .source_path.display())]
pub struct CompileError {
    pub source_path: PathBuf,
    pub exit_code: Option<i32>,
    pub diagnostics: String,
}

/// Why a program invocation failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionFailure {
    TimedOut(Duration),
    Signaled { signal: i32, description: String },
    ExitCode(i32),
}

impl std::fmt::Display for ExecutionFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionFailure::TimedOut(limit) => {
                write!(f, "timed out after {}", format_duration(*limit))
            }
            ExecutionFailure::Signaled { description, .. } => {
                write!(f, "terminated by {description}")
            }
            ExecutionFailure::ExitCode(code) => write!(f, "exited with status {code}"),
        }
    }
}

/// Golden or candidate program failed on one case.
#[derive(Debug, Clone, Error)]
#[error("{role} program {failure} on case {case}{}", stderr_suffix(.stderr))]
pub struct ExecutionError {
    pub role: Role,
    pub case: String,
    pub failure: ExecutionFailure,
    pub stderr: String,
}

fn stderr_suffix(stderr: &str) -> String {
    let trimmed = stderr.trim_end();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("\n--- stderr ---\n{trimmed}")
    }
}

/// Candidate output differs from the golden output.
#[derive(Debug, Clone, Error)]
#[error("output mismatch on case {case}\n{listing}")]
pub struct DiffError {
    pub case: String,
    pub listing: String,
}

/// The run was cancelled by a restart request (watch mode only).
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("run cancelled")]
pub struct Cancelled;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execution_error_includes_stderr_excerpt() {
        let err = ExecutionError {
            role: Role::Candidate,
            case: "N = 3".to_string(),
            failure: ExecutionFailure::ExitCode(2),
            stderr: "boom\n".to_string(),
        };
        let rendered = err.to_string();
        assert!(rendered.starts_with("candidate program exited with status 2 on case N = 3"));
        assert!(rendered.ends_with("--- stderr ---\nboom"));
    }

    #[test]
    fn timeout_renders_limit() {
        let failure = ExecutionFailure::TimedOut(Duration::from_millis(1500));
        assert_eq!(failure.to_string(), "timed out after 1.5 s");
    }
}
