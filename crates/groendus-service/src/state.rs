//! Collector state shared between the sync task and its observers.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use serde::Serialize;
use time::OffsetDateTime;
use tokio::sync::{RwLock, watch};

use crate::engine::Snapshot;

/// Latest snapshot, availability and counters for one device.
pub struct SyncStatus {
    /// Set once the first pass succeeded.
    available: AtomicBool,
    running: AtomicBool,
    /// When the collector was started (Unix timestamp).
    started_at: AtomicU64,
    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
    last_snapshot: RwLock<Option<Snapshot>>,
    stats: RwLock<SyncStats>,
}

impl SyncStatus {
    pub fn new(device_id: impl Into<String>, poll_interval: u64) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        Self {
            available: AtomicBool::new(false),
            running: AtomicBool::new(false),
            started_at: AtomicU64::new(0),
            stop_tx,
            stop_rx,
            last_snapshot: RwLock::new(None),
            stats: RwLock::new(SyncStats {
                device_id: device_id.into(),
                poll_interval,
                ..Default::default()
            }),
        }
    }

    /// Whether a pass has ever succeeded.
    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Mark the collector as started or finished.
    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
        if running {
            let now = OffsetDateTime::now_utc().unix_timestamp().max(0) as u64;
            self.started_at.store(now, Ordering::SeqCst);
        }
    }

    pub fn started_at(&self) -> Option<OffsetDateTime> {
        let ts = self.started_at.load(Ordering::SeqCst);
        if ts == 0 {
            None
        } else {
            OffsetDateTime::from_unix_timestamp(ts as i64).ok()
        }
    }

    /// Get a receiver for the stop signal.
    pub fn subscribe_stop(&self) -> watch::Receiver<bool> {
        self.stop_rx.clone()
    }

    /// Signal the collector to stop after the pass in flight.
    pub fn signal_stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    pub async fn last_snapshot(&self) -> Option<Snapshot> {
        self.last_snapshot.read().await.clone()
    }

    pub async fn stats(&self) -> SyncStats {
        self.stats.read().await.clone()
    }

    /// Record a successful pass and make the device available.
    pub async fn record_success(&self, snapshot: Snapshot) {
        {
            let mut stats = self.stats.write().await;
            stats.success_count += 1;
            stats.consecutive_failures = 0;
            stats.last_sync_at = Some(snapshot.synced_at);
        }
        *self.last_snapshot.write().await = Some(snapshot);
        self.available.store(true, Ordering::SeqCst);
    }

    /// Record a failed pass. The previous snapshot is kept.
    ///
    /// Returns the length of the current failure streak.
    pub async fn record_failure(&self, error: &str) -> u32 {
        let mut stats = self.stats.write().await;
        stats.failure_count += 1;
        stats.consecutive_failures = stats.consecutive_failures.saturating_add(1);
        stats.last_error = Some(error.to_string());
        stats.last_error_at = Some(OffsetDateTime::now_utc());
        stats.consecutive_failures
    }
}

/// Collection statistics for the device.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncStats {
    pub device_id: String,
    /// Poll interval in seconds.
    pub poll_interval: u64,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_sync_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_error_at: Option<OffsetDateTime>,
    pub last_error: Option<String>,
    pub success_count: u64,
    pub failure_count: u64,
    pub consecutive_failures: u32,
}
