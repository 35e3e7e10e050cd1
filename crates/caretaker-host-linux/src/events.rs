//! OS lifecycle events from process table polling

use async_trait::async_trait;
use caretaker_api::OsEvent;
use caretaker_host_api::{EventSource, HostError, HostResult, ProcessDirectory, ProcessInfo};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Wall-clock time passing this much faster than monotonic time between
/// two polls means the machine was suspended in between.
const WAKE_THRESHOLD: Duration = Duration::from_secs(10);

struct Running {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Emits `ProcessTerminated` by diffing successive process snapshots and
/// `SystemDidWake` when the monotonic clock lags the wall clock.
///
/// Linux has no pre-suspend notification without logind inhibitors, so
/// `SystemWillSleep` is never produced.
pub struct PollingEventSource {
    directory: Arc<dyn ProcessDirectory>,
    interval: Duration,
    running: Mutex<Option<Running>>,
}

impl PollingEventSource {
    pub fn new(directory: Arc<dyn ProcessDirectory>, interval: Duration) -> Self {
        Self {
            directory,
            interval,
            running: Mutex::new(None),
        }
    }
}

#[async_trait]
impl EventSource for PollingEventSource {
    async fn start(&self) -> HostResult<mpsc::UnboundedReceiver<OsEvent>> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(HostError::AlreadyStarted);
        }
        if self.interval.is_zero() {
            return Err(HostError::Internal("poll interval must be positive".into()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(poll_loop(
            self.directory.clone(),
            self.interval,
            tx,
            cancel.clone(),
        ));

        *running = Some(Running { cancel, task });
        info!(interval_ms = self.interval.as_millis() as u64, "Event polling started");
        Ok(rx)
    }

    async fn stop(&self) {
        let Some(running) = self.running.lock().await.take() else {
            return;
        };
        running.cancel.cancel();
        if let Err(e) = running.task.await {
            warn!(error = %e, "Event poller ended abnormally");
        }
        info!("Event polling stopped");
    }
}

fn snapshot(directory: &dyn ProcessDirectory) -> HashMap<u32, ProcessInfo> {
    directory
        .running()
        .into_iter()
        .map(|p| (p.pid, p))
        .collect()
}

/// Whether more wall time than monotonic time passed, beyond the threshold
fn slept_between(wall_elapsed: chrono::TimeDelta, mono_elapsed: Duration) -> bool {
    let Ok(wall) = wall_elapsed.to_std() else {
        return false;
    };
    wall.saturating_sub(mono_elapsed) > WAKE_THRESHOLD
}

async fn poll_loop(
    directory: Arc<dyn ProcessDirectory>,
    interval: Duration,
    tx: mpsc::UnboundedSender<OsEvent>,
    cancel: CancellationToken,
) {
    let mut known = snapshot(directory.as_ref());
    let mut last_wall: DateTime<Utc> = Utc::now();
    let mut last_mono = Instant::now();

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let (wall, mono) = (Utc::now(), Instant::now());
        let mut events = Vec::new();
        if slept_between(wall - last_wall, mono - last_mono) {
            debug!("Clock gap detected, treating as wake");
            events.push(OsEvent::SystemDidWake);
        }
        (last_wall, last_mono) = (wall, mono);

        let current = snapshot(directory.as_ref());
        let mut gone: Vec<&ProcessInfo> = known
            .iter()
            .filter(|(pid, _)| !current.contains_key(pid))
            .map(|(_, p)| p)
            .collect();
        gone.sort_by_key(|p| p.pid);
        events.extend(gone.into_iter().map(|p| OsEvent::ProcessTerminated {
            app: p.to_descriptor(),
        }));
        known = current;

        for event in events {
            if tx.send(event).is_err() {
                debug!("Event receiver dropped, poller exiting");
                return;
            }
        }
    }
}
