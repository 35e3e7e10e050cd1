//! Shell command execution with a hard deadline

use async_trait::async_trait;
use caretaker_host_api::{CommandError, CommandOutput, CommandResult, CommandRunner};
use nix::errno::Errno;
use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// How long to wait for pipes to drain after the process group is killed
const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Runs command lines through `<shell> -c`.
///
/// Each command gets its own process group. A timeout, or dropping the run
/// future before the shell exits, kills the whole group and not only the
/// shell.
pub struct ShellCommandRunner {
    shell: PathBuf,
}

impl ShellCommandRunner {
    pub fn new(shell: impl Into<PathBuf>) -> Self {
        Self {
            shell: shell.into(),
        }
    }
}

impl Default for ShellCommandRunner {
    fn default() -> Self {
        Self::new("/bin/sh")
    }
}

#[async_trait]
impl CommandRunner for ShellCommandRunner {
    async fn run(&self, cmdline: &str, timeout: Duration) -> CommandResult<CommandOutput> {
        let mut child = tokio::process::Command::new(&self.shell)
            .arg("-c")
            .arg(cmdline)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                CommandError::exec(format!("Failed to start {}: {}", self.shell.display(), e))
            })?;

        let pid = child.id();
        debug!(pid = ?pid, command = %cmdline, "Command started");
        let mut group = ProcessGroup::new(pid);

        let stdout = tokio::spawn(read_all(child.stdout.take()));
        let stderr = tokio::spawn(read_all(child.stderr.take()));

        match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => {
                group.disarm();
                let output = CommandOutput {
                    stdout: drain(stdout).await,
                    stderr: drain(stderr).await,
                };
                if status.success() {
                    Ok(output)
                } else {
                    let message = match output.stderr.trim() {
                        "" => format!("exited with {}", status),
                        stderr => stderr.to_string(),
                    };
                    Err(CommandError::ExecFailed {
                        status: status.code(),
                        message,
                    })
                }
            }
            Ok(Err(e)) => Err(CommandError::exec(format!("Failed to wait: {}", e))),
            Err(_) => {
                group.kill();
                if let Err(e) = child.kill().await {
                    debug!(error = %e, "Kill after timeout failed");
                }

                warn!(command = %cmdline, timeout_secs = timeout.as_secs(), "Command timed out");
                Err(CommandError::TimedOut {
                    timeout,
                    partial: drain(stdout).await,
                })
            }
        }
    }
}

/// Process group of a running command, killed on drop unless disarmed
struct ProcessGroup {
    pgid: Option<Pid>,
}

impl ProcessGroup {
    fn new(leader: Option<u32>) -> Self {
        Self {
            pgid: leader
                .and_then(|p| i32::try_from(p).ok())
                .map(Pid::from_raw),
        }
    }

    /// The leader was reaped; its pgid may be reused from here on
    fn disarm(&mut self) {
        self.pgid = None;
    }

    fn kill(&mut self) {
        let Some(pgid) = self.pgid.take() else {
            return;
        };
        match killpg(pgid, Signal::SIGKILL) {
            Ok(()) => debug!(pgid = pgid.as_raw(), "Process group killed"),
            Err(Errno::ESRCH) => {}
            Err(e) => debug!(pgid = pgid.as_raw(), error = %e, "killpg failed"),
        }
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.kill();
    }
}

async fn read_all<R: AsyncRead + Unpin>(reader: Option<R>) -> String {
    let Some(mut reader) = reader else {
        return String::new();
    };
    let mut buf = Vec::new();
    if let Err(e) = reader.read_to_end(&mut buf).await {
        debug!(error = %e, "Output read ended early");
    }
    String::from_utf8_lossy(&buf).into_owned()
}

async fn drain(task: JoinHandle<String>) -> String {
    match tokio::time::timeout(DRAIN_TIMEOUT, task).await {
        Ok(Ok(output)) => output,
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ProcDirectory;
    use caretaker_host_api::ProcessDirectory;

    const LONG: Duration = Duration::from_secs(10);

    #[tokio::test]
    async fn captures_stdout() {
        let runner = ShellCommandRunner::default();
        let output = runner.run("printf 'git\\nnode\\n'", LONG).await.unwrap();
        assert_eq!(output.lines(), vec!["git".to_string(), "node".to_string()]);
    }

    #[tokio::test]
    async fn nonzero_exit_reports_stderr() {
        let runner = ShellCommandRunner::default();
        let err = runner.run("echo broken >&2; exit 3", LONG).await.unwrap_err();
        assert_eq!(
            err,
            CommandError::ExecFailed {
                status: Some(3),
                message: "broken".into(),
            }
        );
    }

    #[tokio::test]
    async fn timeout_kills_and_keeps_partial_output() {
        let runner = ShellCommandRunner::default();
        let started = std::time::Instant::now();
        let err = runner
            .run("echo first; sleep 30; echo never", Duration::from_millis(500))
            .await
            .unwrap_err();

        assert!(started.elapsed() < Duration::from_secs(5));
        match err {
            CommandError::TimedOut { partial, .. } => assert_eq!(partial.trim(), "first"),
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn dropped_run_kills_the_whole_group() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("sleeper.pid");
        let runner = ShellCommandRunner::default();
        let cmdline = format!(
            "sleep 31337 & echo $! > '{}'; wait; echo done",
            pid_file.display()
        );

        let run = runner.run(&cmdline, LONG);
        assert!(
            tokio::time::timeout(Duration::from_millis(300), run)
                .await
                .is_err()
        );

        let sleeper: u32 = std::fs::read_to_string(&pid_file)
            .unwrap()
            .trim()
            .parse()
            .unwrap();
        let directory = ProcDirectory::new();
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while directory.is_alive(sleeper) && std::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(!directory.is_alive(sleeper), "pid {} survived", sleeper);
    }

    #[tokio::test]
    async fn missing_shell_is_exec_failure() {
        let runner = ShellCommandRunner::new("/nonexistent/shell");
        let err = runner.run("true", LONG).await.unwrap_err();
        assert!(matches!(err, CommandError::ExecFailed { status: None, .. }));
    }
}
