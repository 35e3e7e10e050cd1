//! Scripted collaborators for testing
//!
//! Every mock records the calls it receives so tests can assert on exact
//! call sequences (launch counts, escalation steps, permission requests).

use async_trait::async_trait;
use caretaker_api::{AppDescriptor, OsEvent, PermissionStatus};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::{
    CommandError, CommandOutput, CommandResult, CommandRunner, EventSource, HostError,
    HostResult, Notifier, NotifyError, NotifyResult, ProcessDirectory, ProcessInfo,
};

/// A call received by [`MockProcessDirectory`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectoryCall {
    Terminate { pid: u32, force: bool },
    Launch { name: String },
}

/// Mock process state
#[derive(Debug, Clone)]
pub struct MockProcess {
    pub info: ProcessInfo,
    /// Survives a graceful terminate
    pub resists_graceful: bool,
    /// Survives a forced terminate
    pub resists_force: bool,
}

/// Mock process table
pub struct MockProcessDirectory {
    next_pid: AtomicU32,
    processes: Arc<Mutex<Vec<MockProcess>>>,
    calls: Mutex<Vec<DirectoryCall>>,

    /// Configure launch to fail
    pub fail_launch: Mutex<bool>,
}

impl MockProcessDirectory {
    pub fn new() -> Self {
        Self {
            next_pid: AtomicU32::new(1000),
            processes: Arc::new(Mutex::new(Vec::new())),
            calls: Mutex::new(Vec::new()),
            fail_launch: Mutex::new(false),
        }
    }

    /// Add a process that exits on the first terminate request
    pub fn spawn(&self, name: &str) -> ProcessInfo {
        self.spawn_with(name, false, false)
    }

    /// Add a process instance of `app`
    pub fn spawn_app(&self, app: &AppDescriptor) -> ProcessInfo {
        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        let info = ProcessInfo::new(pid, app.display_name.clone()).with_exe(app.location.clone());
        self.insert(info.clone(), false, false);
        info
    }

    /// Add a process with explicit resistance to termination
    pub fn spawn_with(
        &self,
        name: &str,
        resists_graceful: bool,
        resists_force: bool,
    ) -> ProcessInfo {
        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        let info = ProcessInfo::new(pid, name);
        self.insert(info.clone(), resists_graceful, resists_force);
        info
    }

    fn insert(&self, info: ProcessInfo, resists_graceful: bool, resists_force: bool) {
        self.processes.lock().unwrap().push(MockProcess {
            info,
            resists_graceful,
            resists_force,
        });
    }

    /// Remove a process immediately
    pub fn exit(&self, pid: u32) {
        self.processes.lock().unwrap().retain(|p| p.info.pid != pid);
    }

    /// Remove a process after `delay` (virtual time under a paused runtime)
    pub fn exit_after(&self, pid: u32, delay: Duration) {
        let processes = self.processes.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            processes.lock().unwrap().retain(|p| p.info.pid != pid);
        });
    }

    pub fn calls(&self) -> Vec<DirectoryCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn launch_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, DirectoryCall::Launch { .. }))
            .count()
    }

    pub fn terminate_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, DirectoryCall::Terminate { .. }))
            .count()
    }
}

impl Default for MockProcessDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProcessDirectory for MockProcessDirectory {
    fn running(&self) -> Vec<ProcessInfo> {
        self.processes
            .lock()
            .unwrap()
            .iter()
            .map(|p| p.info.clone())
            .collect()
    }

    fn is_alive(&self, pid: u32) -> bool {
        self.processes.lock().unwrap().iter().any(|p| p.info.pid == pid)
    }

    async fn terminate(&self, process: &ProcessInfo, force: bool) -> bool {
        self.calls.lock().unwrap().push(DirectoryCall::Terminate {
            pid: process.pid,
            force,
        });

        let mut processes = self.processes.lock().unwrap();
        let Some(index) = processes.iter().position(|p| p.info.pid == process.pid) else {
            return true;
        };
        let resists = if force {
            processes[index].resists_force
        } else {
            processes[index].resists_graceful
        };
        if resists {
            false
        } else {
            processes.remove(index);
            true
        }
    }

    async fn launch(&self, app: &AppDescriptor) -> HostResult<()> {
        self.calls.lock().unwrap().push(DirectoryCall::Launch {
            name: app.display_name.clone(),
        });

        if *self.fail_launch.lock().unwrap() {
            return Err(HostError::LaunchFailed("Mock launch failure".into()));
        }

        self.spawn_app(app);
        Ok(())
    }
}

/// Scripted reply for [`MockCommandRunner`]
#[derive(Debug, Clone)]
pub struct MockReply {
    pub result: CommandResult<CommandOutput>,
    /// How long the command "runs" before replying
    pub delay: Duration,
}

impl MockReply {
    pub fn stdout(stdout: &str) -> Self {
        Self {
            result: Ok(CommandOutput::from_stdout(stdout)),
            delay: Duration::ZERO,
        }
    }

    pub fn failure(message: &str) -> Self {
        Self {
            result: Err(CommandError::ExecFailed {
                status: Some(1),
                message: message.into(),
            }),
            delay: Duration::ZERO,
        }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// Mock command runner
///
/// Replies are matched by command-line prefix and consumed in order; once a
/// prefix has one reply left it keeps answering with it. Unmatched commands
/// succeed with empty output. A reply whose delay exceeds the timeout
/// produces `CommandError::TimedOut`.
pub struct MockCommandRunner {
    replies: Mutex<Vec<(String, VecDeque<MockReply>)>>,
    calls: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockCommandRunner {
    pub fn new() -> Self {
        Self {
            replies: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Script a reply for commands starting with `prefix`
    pub fn reply(&self, prefix: &str, reply: MockReply) {
        let mut replies = self.replies.lock().unwrap();
        if let Some((_, queue)) = replies.iter_mut().find(|(p, _)| p == prefix) {
            queue.push_back(reply);
        } else {
            replies.push((prefix.to_string(), VecDeque::from([reply])));
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_starting_with(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }

    /// Highest number of commands observed running at once
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn next_reply(&self, cmdline: &str) -> MockReply {
        let mut replies = self.replies.lock().unwrap();
        match replies.iter_mut().find(|(p, _)| cmdline.starts_with(p.as_str())) {
            Some((_, queue)) if queue.len() > 1 => queue.pop_front().unwrap(),
            Some((_, queue)) => queue.front().cloned().unwrap(),
            None => MockReply::stdout(""),
        }
    }
}

impl Default for MockCommandRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandRunner for MockCommandRunner {
    async fn run(&self, cmdline: &str, timeout: Duration) -> CommandResult<CommandOutput> {
        self.calls.lock().unwrap().push(cmdline.to_string());
        let reply = self.next_reply(cmdline);

        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);

        let result = if reply.delay > timeout {
            tokio::time::sleep(timeout).await;
            Err(CommandError::TimedOut {
                timeout,
                partial: String::new(),
            })
        } else {
            if !reply.delay.is_zero() {
                tokio::time::sleep(reply.delay).await;
            }
            reply.result
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// Mock notification service
pub struct MockNotifier {
    status: Mutex<PermissionStatus>,
    /// Status reported after a permission request
    pub status_after_request: Mutex<PermissionStatus>,
    requests: AtomicUsize,
    posted: Mutex<Vec<(String, String)>>,

    /// Configure delivery to fail
    pub fail_post: Mutex<bool>,
}

impl MockNotifier {
    pub fn new(status: PermissionStatus) -> Self {
        Self {
            status: Mutex::new(status),
            status_after_request: Mutex::new(status),
            requests: AtomicUsize::new(0),
            posted: Mutex::new(Vec::new()),
            fail_post: Mutex::new(false),
        }
    }

    pub fn authorized() -> Self {
        Self::new(PermissionStatus::Authorized)
    }

    pub fn set_status(&self, status: PermissionStatus) {
        *self.status.lock().unwrap() = status;
    }

    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    pub fn posted(&self) -> Vec<(String, String)> {
        self.posted.lock().unwrap().clone()
    }

    pub fn titles(&self) -> Vec<String> {
        self.posted().into_iter().map(|(t, _)| t).collect()
    }
}

impl Default for MockNotifier {
    fn default() -> Self {
        Self::authorized()
    }
}

#[async_trait]
impl Notifier for MockNotifier {
    async fn authorization_status(&self) -> PermissionStatus {
        *self.status.lock().unwrap()
    }

    async fn request_authorization(&self) {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let granted = *self.status_after_request.lock().unwrap();
        *self.status.lock().unwrap() = granted;
    }

    async fn post(&self, title: &str, body: &str) -> NotifyResult<()> {
        if *self.fail_post.lock().unwrap() {
            return Err(NotifyError::Delivery("Mock delivery failure".into()));
        }
        self.posted
            .lock()
            .unwrap()
            .push((title.to_string(), body.to_string()));
        Ok(())
    }
}

/// Mock event source driven by [`MockEventSource::emit`]
pub struct MockEventSource {
    sender: Mutex<Option<mpsc::UnboundedSender<OsEvent>>>,
    stops: AtomicUsize,
}

impl MockEventSource {
    pub fn new() -> Self {
        Self {
            sender: Mutex::new(None),
            stops: AtomicUsize::new(0),
        }
    }

    /// Deliver an event. Returns false when no one is watching.
    pub fn emit(&self, event: OsEvent) -> bool {
        match self.sender.lock().unwrap().as_ref() {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }

    pub fn is_started(&self) -> bool {
        self.sender.lock().unwrap().is_some()
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

impl Default for MockEventSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventSource for MockEventSource {
    async fn start(&self) -> HostResult<mpsc::UnboundedReceiver<OsEvent>> {
        let mut sender = self.sender.lock().unwrap();
        if sender.is_some() {
            return Err(HostError::AlreadyStarted);
        }
        let (tx, rx) = mpsc::unbounded_channel();
        *sender = Some(tx);
        Ok(rx)
    }

    async fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.sender.lock().unwrap().take();
    }
}
