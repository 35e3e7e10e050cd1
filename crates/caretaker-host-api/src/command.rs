//! Command execution results

use std::time::Duration;
use thiserror::Error;

/// Captured output of a command that exited successfully
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn from_stdout(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Non-empty, trimmed stdout lines
    pub fn lines(&self) -> Vec<String> {
        self.stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// Errors from command execution
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CommandError {
    /// The deadline passed; the command was killed
    #[error("Command timed out after {}s", .timeout.as_secs())]
    TimedOut { timeout: Duration, partial: String },

    /// The command could not be spawned or exited unsuccessfully
    #[error("Command failed (status {status:?}): {message}")]
    ExecFailed {
        status: Option<i32>,
        message: String,
    },
}

impl CommandError {
    pub fn exec(message: impl Into<String>) -> Self {
        Self::ExecFailed {
            status: None,
            message: message.into(),
        }
    }
}

pub type CommandResult<T> = Result<T, CommandError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_skip_blank() {
        let out = CommandOutput::from_stdout("git\n\n  node \n\n");
        assert_eq!(out.lines(), vec!["git".to_string(), "node".to_string()]);
    }

    #[test]
    fn timeout_message() {
        let err = CommandError::TimedOut {
            timeout: Duration::from_secs(600),
            partial: String::new(),
        };
        assert!(matches!(err, CommandError::TimedOut { .. }));
        assert_eq!(err.to_string(), "Command timed out after 600s");
    }
}
