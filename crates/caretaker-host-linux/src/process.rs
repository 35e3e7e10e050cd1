//! Process directory backed by /proc

use async_trait::async_trait;
use caretaker_api::AppDescriptor;
use caretaker_host_api::{HostError, HostResult, ProcessDirectory, ProcessInfo};
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;
use tracing::{debug, info, warn};

const DESKTOP_EXTENSION: &str = "desktop";
const DESKTOP_LAUNCHER: &str = "gtk-launch";

/// Reads the process table from procfs and signals processes with nix
pub struct ProcDirectory {
    root: PathBuf,
    terminate_grace: Duration,
    poll_interval: Duration,
}

impl ProcDirectory {
    pub fn new() -> Self {
        Self::with_root("/proc")
    }

    /// Use an alternate procfs mount
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            terminate_grace: Duration::from_millis(500),
            poll_interval: Duration::from_millis(50),
        }
    }

    /// How long `terminate` waits for a signalled process to disappear
    pub fn with_terminate_grace(mut self, grace: Duration) -> Self {
        self.terminate_grace = grace;
        self
    }

    fn read_process(&self, pid: u32) -> Option<ProcessInfo> {
        let dir = self.root.join(pid.to_string());
        let name = read_name(&dir)?;
        let mut info = ProcessInfo::new(pid, name);
        if let Ok(exe) = std::fs::read_link(dir.join("exe")) {
            info = info.with_exe(exe);
        }
        Some(info)
    }

    fn is_zombie(&self, pid: u32) -> bool {
        std::fs::read_to_string(self.root.join(pid.to_string()).join("stat"))
            .ok()
            .and_then(|stat| process_state(&stat))
            .is_some_and(|state| state == 'Z' || state == 'X')
    }

    async fn wait_gone(&self, pid: u32) -> bool {
        let deadline = tokio::time::Instant::now() + self.terminate_grace;
        loop {
            if !self.is_alive(pid) {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

impl Default for ProcDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProcessDirectory for ProcDirectory {
    fn running(&self) -> Vec<ProcessInfo> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(root = %self.root.display(), error = %e, "Failed to read process table");
                return Vec::new();
            }
        };

        let mut processes: Vec<ProcessInfo> = entries
            .flatten()
            .filter_map(|entry| entry.file_name().to_str()?.parse::<u32>().ok())
            .filter_map(|pid| self.read_process(pid))
            .collect();
        processes.sort_by_key(|p| p.pid);
        processes
    }

    fn is_alive(&self, pid: u32) -> bool {
        let Ok(raw) = i32::try_from(pid) else {
            return false;
        };
        match signal::kill(Pid::from_raw(raw), None) {
            Ok(()) | Err(Errno::EPERM) => !self.is_zombie(pid),
            Err(_) => false,
        }
    }

    async fn terminate(&self, process: &ProcessInfo, force: bool) -> bool {
        let Ok(raw) = i32::try_from(process.pid) else {
            return false;
        };
        let sig = if force { Signal::SIGKILL } else { Signal::SIGTERM };

        match signal::kill(Pid::from_raw(raw), sig) {
            Ok(()) => debug!(pid = process.pid, signal = %sig, "Signal sent"),
            Err(Errno::ESRCH) => return true,
            Err(e) => {
                warn!(
                    pid = process.pid,
                    name = %process.name,
                    error = %e,
                    "Failed to signal process"
                );
                return false;
            }
        }

        self.wait_gone(process.pid).await
    }

    async fn launch(&self, app: &AppDescriptor) -> HostResult<()> {
        if !app.location.exists() {
            return Err(HostError::LaunchFailed(format!(
                "{} does not exist",
                app.location.display()
            )));
        }

        if is_desktop_entry(&app.location) {
            launch_desktop_entry(&app.location).await
        } else {
            spawn_detached(&app.location)
        }
    }

    fn resolve_bundle_id(&self, location: &Path) -> Option<String> {
        if is_desktop_entry(location) {
            return location
                .file_stem()
                .and_then(|s| s.to_str())
                .map(str::to_string);
        }
        Some(location.to_string_lossy().into_owned())
    }
}

fn is_desktop_entry(location: &Path) -> bool {
    location.extension().and_then(|e| e.to_str()) == Some(DESKTOP_EXTENSION)
}

/// Process name: basename of argv[0], or `comm` for kernel threads and
/// processes that clear their command line.
fn read_name(dir: &Path) -> Option<String> {
    if let Ok(cmdline) = std::fs::read(dir.join("cmdline"))
        && let Some(name) = name_from_cmdline(&cmdline)
    {
        return Some(name);
    }
    let comm = std::fs::read_to_string(dir.join("comm")).ok()?;
    let comm = comm.trim();
    (!comm.is_empty()).then(|| comm.to_string())
}

fn name_from_cmdline(cmdline: &[u8]) -> Option<String> {
    let argv0 = cmdline.split(|b| *b == 0).next()?;
    if argv0.is_empty() {
        return None;
    }
    let argv0 = String::from_utf8_lossy(argv0);
    // Some processes rewrite argv into one space separated string
    let program = argv0.split(' ').next().unwrap_or(&argv0);
    let base = Path::new(program).file_name()?.to_str()?;
    Some(base.to_string())
}

/// Single-character state from /proc/<pid>/stat. The command field may
/// contain spaces or parentheses, so parse from the last ')'.
fn process_state(stat: &str) -> Option<char> {
    let close = stat.rfind(')')?;
    stat[close + 1..].split_whitespace().next()?.chars().next()
}

fn spawn_detached(program: &Path) -> HostResult<()> {
    let mut cmd = Command::new(program);
    cmd.stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());

    // SAFETY: setsid is async-signal-safe and runs in the forked child
    unsafe {
        cmd.pre_exec(|| {
            nix::unistd::setsid().map_err(std::io::Error::from)?;
            Ok(())
        });
    }

    let mut child = cmd.spawn().map_err(|e| {
        HostError::LaunchFailed(format!("Failed to start {}: {}", program.display(), e))
    })?;
    let pid = child.id();
    info!(pid, program = %program.display(), "Launched");

    // Reap the child so it does not linger as a zombie after exit
    tokio::task::spawn_blocking(move || match child.wait() {
        Ok(status) => debug!(pid, status = %status, "Launched process exited"),
        Err(e) => warn!(pid, error = %e, "Failed to reap launched process"),
    });

    Ok(())
}

async fn launch_desktop_entry(entry: &Path) -> HostResult<()> {
    let Some(id) = entry.file_stem().and_then(|s| s.to_str()) else {
        return Err(HostError::LaunchFailed(format!(
            "Invalid desktop entry {}",
            entry.display()
        )));
    };

    let output = tokio::process::Command::new(DESKTOP_LAUNCHER)
        .arg(id)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output();
    let output = tokio::time::timeout(Duration::from_secs(10), output)
        .await
        .map_err(|_| HostError::LaunchFailed(format!("{} {} timed out", DESKTOP_LAUNCHER, id)))?
        .map_err(|e| {
            HostError::LaunchFailed(format!("Failed to run {}: {}", DESKTOP_LAUNCHER, e))
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(HostError::LaunchFailed(format!(
            "{} {}: {}",
            DESKTOP_LAUNCHER,
            id,
            stderr.trim()
        )));
    }

    info!(desktop_id = %id, "Launched desktop entry");
    Ok(())
}
