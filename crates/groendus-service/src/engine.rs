//! One sync pass: fetch, fold new sessions into the accumulator, persist.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use groendus_core::{ChargingApi, PageRequest};
use groendus_store::{AccumulatorState, AccumulatorStore};
use groendus_types::{Driver, TransactionRecord};

/// Transactions requested per page.
pub const PAGE_SIZE: u32 = 50;
/// Completed sessions reported per snapshot.
pub const LATEST_SESSIONS_LIMIT: usize = 10;

/// Result of a successful pass.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub driver: Driver,
    pub device_id: String,
    /// Running total in kWh; never decreases.
    pub total_energy_kwh: f64,
    /// Number of transaction ids remembered by the accumulator.
    pub seen_transactions: usize,
    /// Completed sessions for the device, most recent first.
    pub latest_sessions: Vec<TransactionRecord>,
    #[serde(with = "time::serde::rfc3339")]
    pub synced_at: OffsetDateTime,
}

impl Snapshot {
    /// The most recent completed session, if any was fetched.
    pub fn last_session(&self) -> Option<&TransactionRecord> {
        self.latest_sessions.first()
    }

    /// Energy of the most recent session in kWh.
    pub fn last_session_energy(&self) -> Option<f64> {
        self.last_session().and_then(|tx| tx.total_energy_kwh)
    }

    /// Cost of the most recent session.
    pub fn last_session_cost(&self) -> Option<f64> {
        self.last_session().and_then(|tx| tx.total_cost)
    }
}

/// A pass failed; the previous snapshot and accumulator stay valid.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    #[error("Update failed: {0}")]
    UpdateFailed(String),
}

impl SyncError {
    fn from_error(err: impl std::fmt::Display) -> Self {
        Self::UpdateFailed(err.to_string())
    }
}

/// What one pass gathered from the portal.
struct Scan {
    fetched: Vec<TransactionRecord>,
    fresh: Vec<TransactionRecord>,
    pages: u32,
}

/// Runs sync passes for one chargepoint.
///
/// The accumulator is loaded on the first pass and kept in memory
/// afterwards. Each pass works on a copy that replaces the resident state
/// only once everything, including the save, has succeeded.
pub struct SyncEngine {
    api: Arc<dyn ChargingApi>,
    store: AccumulatorStore,
    device_id: String,
    max_pages: u32,
    state: Option<AccumulatorState>,
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("device_id", &self.device_id)
            .field("max_pages", &self.max_pages)
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

impl SyncEngine {
    pub fn new(
        api: Arc<dyn ChargingApi>,
        store: AccumulatorStore,
        device_id: impl Into<String>,
        max_pages: u32,
    ) -> Self {
        Self {
            api,
            store,
            device_id: device_id.into(),
            max_pages: max_pages.max(1),
            state: None,
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// The resident accumulator, or a zero one before the first load.
    pub fn accumulator(&self) -> AccumulatorState {
        self.state.clone().unwrap_or_default()
    }

    /// Run one pass.
    pub async fn run(&mut self) -> Result<Snapshot, SyncError> {
        if self.state.is_none() {
            let loaded = self.store.load().await.map_err(SyncError::from_error)?;
            self.state = Some(loaded);
        }
        let resident = self.accumulator();

        let driver = self
            .api
            .fetch_metadata()
            .await
            .map_err(SyncError::from_error)?;
        if driver.chargepoint(&self.device_id).is_none() {
            warn!(
                "Chargepoint {} is not among the driver's chargepoints {:?}",
                self.device_id,
                driver.chargepoint_ids()
            );
        }

        let scan = self.scan(&resident).await?;

        let mut working = resident;
        let added_energy: f64 = scan.fresh.iter().map(|tx| tx.energy_contribution()).sum();
        if added_energy > 0.0 {
            let previous = working.total_energy_kwh();
            let candidate = previous + added_energy;
            if !working.advance_total(candidate) {
                warn!(
                    "Computed total energy decreased (old={} new={}); keeping old total",
                    previous, candidate
                );
            }
        }

        if !scan.fresh.is_empty() {
            working.record_seen(scan.fresh.iter().map(|tx| tx.id.clone()));
            self.store
                .save(&working)
                .await
                .map_err(SyncError::from_error)?;
        }

        info!(
            "Synced {}: {} new session(s) over {} page(s), +{:.3} kWh, total {:.3} kWh",
            self.device_id,
            scan.fresh.len(),
            scan.pages,
            added_energy,
            working.total_energy_kwh()
        );

        let snapshot = Snapshot {
            driver,
            device_id: self.device_id.clone(),
            total_energy_kwh: working.total_energy_kwh(),
            seen_transactions: working.seen_count(),
            latest_sessions: latest_sessions(&scan.fetched, &self.device_id),
            synced_at: OffsetDateTime::now_utc(),
        };
        self.state = Some(working);
        Ok(snapshot)
    }

    /// Page newest-first until a page contains an already-counted session,
    /// a page comes back empty, or `max_pages` is reached.
    ///
    /// The page holding the boundary is still scanned to its end, so a
    /// session listed out of order on that page is not lost.
    async fn scan(&self, state: &AccumulatorState) -> Result<Scan, SyncError> {
        let mut scan = Scan {
            fetched: Vec::new(),
            fresh: Vec::new(),
            pages: 0,
        };
        let mut queued: HashSet<String> = HashSet::new();

        for page in 1..=self.max_pages {
            let request = PageRequest::newest_first(page, PAGE_SIZE);
            let result = self
                .api
                .list_transactions(&request)
                .await
                .map_err(SyncError::from_error)?;
            scan.pages = page;

            if result.items.is_empty() {
                debug!("Page {} is empty, stopping", page);
                break;
            }

            let mut hit_boundary = false;
            for tx in &result.items {
                if !tx.belongs_to(&self.device_id) || !tx.is_completed() || tx.id.is_empty() {
                    continue;
                }
                if state.has_seen(&tx.id) {
                    hit_boundary = true;
                } else if queued.insert(tx.id.clone()) {
                    scan.fresh.push(tx.clone());
                }
            }

            debug!(
                "Page {}: {} item(s), {} new so far",
                page,
                result.items.len(),
                scan.fresh.len()
            );
            scan.fetched.extend(result.items);

            if hit_boundary {
                debug!("Page {} reached already counted sessions, stopping", page);
                break;
            }
        }

        Ok(scan)
    }
}

/// Completed sessions for `device_id`, most recent start first, one per id.
fn latest_sessions(fetched: &[TransactionRecord], device_id: &str) -> Vec<TransactionRecord> {
    let mut sessions: Vec<TransactionRecord> = Vec::new();
    let mut ids: HashSet<&str> = HashSet::new();
    for tx in fetched {
        if !tx.belongs_to(device_id) || !tx.is_completed() {
            continue;
        }
        if !tx.id.is_empty() && !ids.insert(tx.id.as_str()) {
            continue;
        }
        sessions.push(tx.clone());
    }

    sessions.sort_by(|a, b| b.chronological_key().cmp(&a.chronological_key()));
    sessions.truncate(LATEST_SESSIONS_LIMIT);
    sessions
}

#[cfg(test)]
mod tests {
    use super::*;
    use groendus_core::MockChargingApi;
    use groendus_core::mock::{active_session, completed_session};
    use groendus_store::Store;
    use time::macros::datetime;
    use tokio::sync::Mutex;

    const DEVICE: &str = "NL-GRO-0001";

    fn engine(api: Arc<MockChargingApi>) -> SyncEngine {
        let store = Arc::new(Mutex::new(Store::open_in_memory().unwrap()));
        SyncEngine::new(api, AccumulatorStore::new(store, DEVICE), DEVICE, 5)
    }

    #[tokio::test]
    async fn test_first_pass_counts_completed_sessions_only() {
        let api = Arc::new(MockChargingApi::for_chargepoint(DEVICE));
        let base = datetime!(2024-05-01 08:00 UTC);
        api.set_transactions(vec![
            active_session("t4", DEVICE, base + time::Duration::days(3)),
            completed_session("t3", "OTHER", base + time::Duration::days(2), 40.0),
            completed_session("t2", DEVICE, base + time::Duration::days(1), 7.5),
            completed_session("t1", DEVICE, base, 5.0),
        ])
        .await;

        let mut engine = engine(api);
        let snapshot = engine.run().await.unwrap();

        assert_eq!(snapshot.total_energy_kwh, 12.5);
        assert_eq!(snapshot.seen_transactions, 2);
        assert_eq!(
            engine.accumulator().seen_transaction_ids(),
            ["t2", "t1"]
        );
        let ids: Vec<&str> = snapshot.latest_sessions.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, ["t2", "t1"]);
        assert_eq!(snapshot.last_session_energy(), Some(7.5));
        assert_eq!(snapshot.last_session_cost(), Some(2.25));
    }

    #[tokio::test]
    async fn test_missing_chargepoint_is_not_fatal() {
        let api = Arc::new(MockChargingApi::for_chargepoint("SOMEONE-ELSE"));
        api.set_transactions(vec![completed_session(
            "t1",
            DEVICE,
            datetime!(2024-05-01 08:00 UTC),
            3.0,
        )])
        .await;

        let snapshot = engine(api).run().await.unwrap();
        assert_eq!(snapshot.total_energy_kwh, 3.0);
    }

    #[tokio::test]
    async fn test_no_sessions_yields_zero_snapshot() {
        let api = Arc::new(MockChargingApi::for_chargepoint(DEVICE));
        let snapshot = engine(api.clone()).run().await.unwrap();

        assert_eq!(snapshot.total_energy_kwh, 0.0);
        assert!(snapshot.latest_sessions.is_empty());
        assert_eq!(snapshot.last_session(), None);
        assert_eq!(api.requested_pages().await, vec![1]);
    }

    #[tokio::test]
    async fn test_out_of_order_boundary_page_is_scanned_fully() {
        let api = Arc::new(MockChargingApi::for_chargepoint(DEVICE));
        let base = datetime!(2024-05-01 08:00 UTC);
        api.set_transactions(vec![completed_session("t1", DEVICE, base, 1.0)])
            .await;

        let mut engine = engine(api.clone());
        engine.run().await.unwrap();

        // A late-arriving session listed after the already counted one.
        api.set_transactions(vec![
            completed_session("t2", DEVICE, base + time::Duration::days(1), 2.0),
            completed_session("t1", DEVICE, base, 1.0),
            completed_session("t0", DEVICE, base - time::Duration::days(1), 4.0),
        ])
        .await;

        let snapshot = engine.run().await.unwrap();
        assert_eq!(snapshot.total_energy_kwh, 7.0);
        assert_eq!(
            engine.accumulator().seen_transaction_ids(),
            ["t2", "t0", "t1"]
        );
    }

    #[test]
    fn test_latest_sessions_sorted_deduplicated_and_capped() {
        let base = datetime!(2024-05-01 08:00 UTC);
        let mut fetched: Vec<TransactionRecord> = (0..12)
            .map(|i| {
                completed_session(&format!("t{i}"), DEVICE, base + time::Duration::hours(i), 1.0)
            })
            .collect();
        fetched.push(completed_session("t11", DEVICE, base + time::Duration::hours(11), 1.0));
        fetched.push(active_session("live", DEVICE, base + time::Duration::days(2)));

        let sessions = latest_sessions(&fetched, DEVICE);
        assert_eq!(sessions.len(), LATEST_SESSIONS_LIMIT);
        assert_eq!(sessions[0].id, "t11");
        assert_eq!(sessions[1].id, "t10");
        assert_eq!(sessions[9].id, "t2");
    }

    #[tokio::test]
    async fn test_last_session_without_numeric_values() {
        let api = Arc::new(MockChargingApi::for_chargepoint(DEVICE));
        let mut unreadable = completed_session("t2", DEVICE, datetime!(2024-05-02 08:00 UTC), 0.0);
        unreadable.total_energy_kwh = None;
        unreadable.total_cost = None;
        api.set_transactions(vec![
            unreadable,
            completed_session("t1", DEVICE, datetime!(2024-05-01 08:00 UTC), 4.0),
        ])
        .await;

        let snapshot = engine(api).run().await.unwrap();

        assert_eq!(snapshot.last_session().map(|t| t.id.as_str()), Some("t2"));
        assert_eq!(snapshot.last_session_energy(), None);
        assert_eq!(snapshot.last_session_cost(), None);
        assert_eq!(snapshot.total_energy_kwh, 4.0);
    }

    #[tokio::test]
    async fn test_failed_pass_reports_update_failed() {
        let api = Arc::new(MockChargingApi::for_chargepoint(DEVICE));
        api.set_should_fail(true, Some("portal down")).await;

        let err = engine(api).run().await.unwrap_err();
        let SyncError::UpdateFailed(message) = err;
        assert!(message.contains("portal down"));
    }
}
