//! Fixed-interval polling of a [`SnapshotSource`].
//!
//! One task runs the poll; each poll (retries included) completes before
//! the next one is scheduled. Readers only ever see the snapshot of the
//! last *successful* poll, and only while the most recent poll succeeded.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Notify, RwLock, watch};
use tokio::task;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::api::SnapshotSource;
use crate::config::PollSettings;
use crate::error::{Error, Result};
use crate::property::Snapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Auth,
    Connectivity,
    Other,
}

impl From<&Error> for FailureKind {
    fn from(err: &Error) -> Self {
        match err {
            Error::InvalidAuth => FailureKind::Auth,
            Error::CannotConnect(_) => FailureKind::Connectivity,
            _ => FailureKind::Other,
        }
    }
}

/// Outcome of the most recent poll, as broadcast to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateStatus {
    Pending,
    Updated { at: DateTime<Utc>, devices: usize },
    Failed { kind: FailureKind, message: String },
}

impl UpdateStatus {
    pub fn is_available(&self) -> bool {
        matches!(self, UpdateStatus::Updated { .. })
    }
}

#[derive(Debug, Default)]
struct State {
    snapshot: Option<Arc<Snapshot>>,
    last_update_success: bool,
    last_success_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
    consecutive_failures: u32,
}

#[derive(Clone)]
pub struct Coordinator {
    source: Arc<dyn SnapshotSource>,
    settings: PollSettings,
    state: Arc<RwLock<State>>,
    status: Arc<watch::Sender<UpdateStatus>>,
}

impl Coordinator {
    pub fn new(source: Arc<dyn SnapshotSource>, settings: PollSettings) -> Self {
        let (status, _) = watch::channel(UpdateStatus::Pending);
        Self {
            source,
            settings,
            state: Arc::new(RwLock::new(State::default())),
            status: Arc::new(status),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<UpdateStatus> {
        self.status.subscribe()
    }

    pub fn status(&self) -> UpdateStatus {
        self.status.borrow().clone()
    }

    /// The latest snapshot, or `None` while the coordinator is unavailable.
    pub async fn snapshot(&self) -> Option<Arc<Snapshot>> {
        let state = self.state.read().await;
        if state.last_update_success {
            state.snapshot.clone()
        } else {
            None
        }
    }

    pub async fn last_update_success(&self) -> bool {
        self.state.read().await.last_update_success
    }

    pub async fn last_success_at(&self) -> Option<DateTime<Utc>> {
        self.state.read().await.last_success_at
    }

    pub async fn last_error(&self) -> Option<String> {
        self.state.read().await.last_error.clone()
    }

    pub async fn consecutive_failures(&self) -> u32 {
        self.state.read().await.consecutive_failures
    }

    /// Initial fetch before the loop is started. The error is handed back
    /// so the caller can decide whether to give up (bad credentials) or
    /// keep going.
    pub async fn first_refresh(&self) -> Result<Arc<Snapshot>> {
        self.refresh().await.inspect_err(|e| {
            error!(error = %e, "initial HydroLink refresh failed");
        })
    }

    /// One poll, retrying connectivity failures with exponential backoff.
    pub async fn refresh(&self) -> Result<Arc<Snapshot>> {
        let attempts = self.settings.retry_attempts.max(1);
        let mut backoff = self.settings.retry_backoff();
        let mut attempt = 1;

        let result = loop {
            match self.source.fetch_snapshot().await {
                Ok(snapshot) => break Ok(snapshot),
                Err(e) if e.is_connectivity() && attempt < attempts => {
                    warn!(attempt, attempts, error = %e, retry_in = ?backoff, "HydroLink poll failed, retrying");
                    time::sleep(backoff).await;
                    backoff = backoff.saturating_mul(2);
                    attempt += 1;
                }
                Err(e) => break Err(e),
            }
        };

        match result {
            Ok(snapshot) => Ok(self.store(snapshot).await),
            Err(e) => {
                self.record_failure(&e).await;
                Err(e)
            }
        }
    }

    async fn store(&self, snapshot: Snapshot) -> Arc<Snapshot> {
        let snapshot = Arc::new(snapshot);
        let devices = snapshot.devices.len();
        let at = snapshot.fetched_at;
        {
            let mut state = self.state.write().await;
            if !state.last_update_success && state.consecutive_failures > 0 {
                info!(after_failures = state.consecutive_failures, "HydroLink polling recovered");
            }
            state.snapshot = Some(snapshot.clone());
            state.last_update_success = true;
            state.last_success_at = Some(at);
            state.last_error = None;
            state.consecutive_failures = 0;
        }
        self.status.send_replace(UpdateStatus::Updated { at, devices });
        snapshot
    }

    async fn record_failure(&self, err: &Error) {
        let kind = FailureKind::from(err);
        {
            let mut state = self.state.write().await;
            state.last_update_success = false;
            state.last_error = Some(err.to_string());
            state.consecutive_failures += 1;
            match kind {
                FailureKind::Auth => error!(failures = state.consecutive_failures, "HydroLink rejected the credentials"),
                _ => warn!(failures = state.consecutive_failures, error = %err, "HydroLink poll failed, data unavailable until next poll"),
            }
        }
        self.status.send_replace(UpdateStatus::Failed {
            kind,
            message: err.to_string(),
        });
    }

    /// Starts the polling loop. The first poll happens one interval from
    /// now; use [`Coordinator::first_refresh`] beforehand.
    pub fn spawn(&self) -> CoordinatorHandle {
        let shutdown = Arc::new(Notify::new());
        let coordinator = self.clone();
        let shutdown_clone = shutdown.clone();
        let handle = task::spawn(coordinator.run(shutdown_clone));
        CoordinatorHandle { shutdown, handle }
    }

    async fn run(self, shutdown: Arc<Notify>) {
        let period = self.settings.interval();
        let mut interval = time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval = ?period, "HydroLink polling started");

        loop {
            tokio::select! {
                _ = shutdown.notified() => {
                    info!("Shutting down HydroLink polling");
                    break;
                }
                _ = interval.tick() => {
                    // failures are recorded and logged by refresh
                    let _ = self.refresh().await;
                }
            }
        }
    }
}

pub struct CoordinatorHandle {
    shutdown: Arc<Notify>,
    handle: task::JoinHandle<()>,
}

impl CoordinatorHandle {
    /// Stops the loop after any in-flight poll and waits for it.
    pub async fn shutdown(self) {
        self.shutdown.notify_one();
        if let Err(e) = self.handle.await {
            error!("HydroLink polling task ended abnormally: {:?}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::property::Device;

    struct Scripted {
        results: Mutex<VecDeque<Result<Snapshot>>>,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(results: Vec<Result<Snapshot>>) -> Arc<Self> {
            Arc::new(Self {
                results: Mutex::new(results.into()),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SnapshotSource for Scripted {
        async fn fetch_snapshot(&self) -> Result<Snapshot> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(Error::CannotConnect("script exhausted".into())))
        }
    }

    fn snapshot(ids: &[&str]) -> Snapshot {
        Snapshot::new(
            ids.iter()
                .map(|id| serde_json::from_value::<Device>(serde_json::json!({"id": id})).unwrap())
                .collect(),
        )
    }

    fn settings(retry_attempts: u32) -> PollSettings {
        PollSettings {
            interval_secs: 300,
            retry_attempts,
            retry_backoff_ms: 1_000,
            request_timeout_secs: 10,
        }
    }

    #[tokio::test]
    async fn success_caches_snapshot_and_marks_available() {
        let source = Scripted::new(vec![Ok(snapshot(&["a", "b"]))]);
        let coordinator = Coordinator::new(source.clone(), settings(3));

        assert_eq!(coordinator.status(), UpdateStatus::Pending);
        assert!(coordinator.snapshot().await.is_none());

        coordinator.first_refresh().await.unwrap();

        let snap = coordinator.snapshot().await.unwrap();
        assert_eq!(snap.devices.len(), 2);
        assert!(coordinator.last_update_success().await);
        assert!(coordinator.last_success_at().await.is_some());
        assert!(matches!(coordinator.status(), UpdateStatus::Updated { devices: 2, .. }));
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn connectivity_failures_are_retried_with_backoff() {
        let source = Scripted::new(vec![
            Err(Error::CannotConnect("down".into())),
            Err(Error::CannotConnect("still down".into())),
            Ok(snapshot(&["a"])),
        ]);
        let coordinator = Coordinator::new(source.clone(), settings(3));

        let started = Instant::now();
        coordinator.refresh().await.unwrap();

        assert_eq!(source.calls(), 3);
        // 1s + 2s
        assert!(started.elapsed() >= Duration::from_secs(3));
        assert!(coordinator.last_update_success().await);
    }

    #[tokio::test]
    async fn auth_failures_are_not_retried() {
        let source = Scripted::new(vec![Err(Error::InvalidAuth), Ok(snapshot(&["a"]))]);
        let coordinator = Coordinator::new(source.clone(), settings(3));

        let err = coordinator.refresh().await.unwrap_err();
        assert!(err.is_auth());
        assert_eq!(source.calls(), 1);
        assert!(matches!(
            coordinator.status(),
            UpdateStatus::Failed { kind: FailureKind::Auth, .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_poll_hides_stale_snapshot_until_recovery() {
        let source = Scripted::new(vec![
            Ok(snapshot(&["a"])),
            Err(Error::CannotConnect("down".into())),
            Err(Error::CannotConnect("down".into())),
            Ok(snapshot(&["a", "b"])),
        ]);
        let coordinator = Coordinator::new(source.clone(), settings(2));

        coordinator.refresh().await.unwrap();
        assert!(coordinator.snapshot().await.is_some());

        assert!(coordinator.refresh().await.unwrap_err().is_connectivity());
        assert!(coordinator.snapshot().await.is_none());
        assert!(!coordinator.last_update_success().await);
        assert_eq!(coordinator.consecutive_failures().await, 1);
        assert!(coordinator.last_error().await.unwrap().contains("down"));

        coordinator.refresh().await.unwrap();
        assert_eq!(coordinator.snapshot().await.unwrap().devices.len(), 2);
        assert_eq!(coordinator.consecutive_failures().await, 0);
        assert!(coordinator.last_error().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn spawned_loop_polls_on_interval_and_shuts_down() {
        let source = Scripted::new(vec![Ok(snapshot(&["a"])), Ok(snapshot(&["a", "b"]))]);
        let coordinator = Coordinator::new(source.clone(), settings(1));
        let mut updates = coordinator.subscribe();

        let handle = coordinator.spawn();

        updates.changed().await.unwrap();
        assert!(updates.borrow_and_update().is_available());
        assert_eq!(source.calls(), 1);

        updates.changed().await.unwrap();
        assert!(matches!(
            *updates.borrow_and_update(),
            UpdateStatus::Updated { devices: 2, .. }
        ));
        assert_eq!(source.calls(), 2);

        handle.shutdown().await;
    }
}
