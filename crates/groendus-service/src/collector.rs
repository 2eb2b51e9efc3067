//! Background collector.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at, sleep};
use tracing::{debug, error, info, warn};

use groendus_core::RetryConfig;

use crate::engine::SyncEngine;
use crate::state::SyncStatus;

/// Runs sync passes for one device on a fixed interval.
///
/// Until the first pass succeeds the device stays unavailable and the pass
/// is retried on an exponential backoff instead of the poll interval.
pub struct Collector {
    engine: SyncEngine,
    status: Arc<SyncStatus>,
    poll_interval: Duration,
    first_sync: RetryConfig,
}

impl Collector {
    pub fn new(engine: SyncEngine, status: Arc<SyncStatus>, poll_interval: Duration) -> Self {
        Self {
            engine,
            status,
            poll_interval,
            first_sync: RetryConfig::for_first_sync(),
        }
    }

    /// Override the backoff used until the first pass succeeds.
    #[must_use]
    pub fn with_first_sync_backoff(mut self, config: RetryConfig) -> Self {
        self.first_sync = config;
        self
    }

    /// Spawn the collection task. Stop it with [`SyncStatus::signal_stop`].
    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Collect until a stop is signalled. A pass in flight always completes.
    pub async fn run(mut self) {
        let mut stop = self.status.subscribe_stop();
        self.status.set_running(true);
        info!(
            "Starting collector for {} (interval: {}s)",
            self.engine.device_id(),
            self.poll_interval.as_secs()
        );

        let mut attempt = 0u32;
        loop {
            if *stop.borrow() {
                self.finish();
                return;
            }
            if self.pass().await {
                break;
            }
            let delay = self.first_sync.delay_for_attempt(attempt);
            attempt = attempt.saturating_add(1);
            info!(
                "First sync of {} failed, retrying in {:.0}s",
                self.engine.device_id(),
                delay.as_secs_f64()
            );
            tokio::select! {
                _ = sleep(delay) => {}
                _ = stop.changed() => {}
            }
        }

        let mut timer = interval_at(Instant::now() + self.poll_interval, self.poll_interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = timer.tick() => {}
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                    continue;
                }
            }
            self.pass().await;
        }

        self.finish();
    }

    /// Run one pass and record its outcome. Returns whether it succeeded.
    async fn pass(&mut self) -> bool {
        let device_id = self.engine.device_id().to_string();
        match self.engine.run().await {
            Ok(snapshot) => {
                debug!(
                    "Pass for {} succeeded: {:.3} kWh",
                    device_id, snapshot.total_energy_kwh
                );
                self.status.record_success(snapshot).await;
                true
            }
            Err(e) => {
                let consecutive_failures = self.status.record_failure(&e.to_string()).await;
                if consecutive_failures <= 3 {
                    warn!(
                        "Failed to sync {}: {} (attempt {})",
                        device_id, e, consecutive_failures
                    );
                } else if consecutive_failures == 4 {
                    error!(
                        "Failed to sync {} after {} attempts, will continue trying silently",
                        device_id, consecutive_failures
                    );
                }
                false
            }
        }
    }

    fn finish(&self) {
        self.status.set_running(false);
        info!("Collector for {} stopped", self.engine.device_id());
    }
}
