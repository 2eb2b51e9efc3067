//! Mock collaborators for testing without the portal.
//!
//! - [`MockClock`]: a settable clock for aging credentials
//! - [`MockAuthenticator`]: issues numbered fake credentials, with
//!   latency simulation and failure injection
//! - [`MockChargingApi`]: an in-memory transaction list served page by page,
//!   with call counting and failure injection
//!
//! # Example
//!
//! ```
//! use groendus_core::mock::{self, MockChargingApi};
//! use groendus_core::{ChargingApi, PageRequest};
//! use time::macros::datetime;
//!
//! #[tokio::main]
//! async fn main() {
//!     let api = MockChargingApi::new();
//!     api.set_transactions(vec![
//!         mock::completed_session("tx-1", "CP-1", datetime!(2024-03-01 10:00 UTC), 12.5),
//!     ])
//!     .await;
//!
//!     let page = api.list_transactions(&PageRequest::newest_first(1, 50)).await.unwrap();
//!     assert_eq!(page.items.len(), 1);
//!     assert_eq!(api.list_calls(), 1);
//! }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::sync::RwLock;

use groendus_types::{Chargepoint, Driver, PageInfo, TransactionPage, TransactionRecord};

use crate::auth::Authenticator;
use crate::credential::{Clock, Credential, DEFAULT_TTL_SECONDS, SystemClock};
use crate::error::{Error, Result};
use crate::traits::{ChargingApi, PageRequest};

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct MockClock {
    unix_nanos: AtomicI64,
}

impl MockClock {
    /// Create a clock frozen at `at`.
    pub fn new(at: OffsetDateTime) -> Self {
        Self {
            unix_nanos: AtomicI64::new(to_nanos(at)),
        }
    }

    /// Move the clock forward (or backward, for negative durations).
    pub fn advance(&self, by: time::Duration) {
        let delta = i64::try_from(by.whole_nanoseconds()).unwrap_or(i64::MAX);
        self.unix_nanos.fetch_add(delta, Ordering::SeqCst);
    }

    /// Jump to an absolute instant.
    pub fn set(&self, at: OffsetDateTime) {
        self.unix_nanos.store(to_nanos(at), Ordering::SeqCst);
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new(time::macros::datetime!(2024-01-01 00:00:00 UTC))
    }
}

impl Clock for MockClock {
    fn now(&self) -> OffsetDateTime {
        let nanos = self.unix_nanos.load(Ordering::SeqCst);
        OffsetDateTime::from_unix_timestamp_nanos(i128::from(nanos))
            .unwrap_or(OffsetDateTime::UNIX_EPOCH)
    }
}

fn to_nanos(at: OffsetDateTime) -> i64 {
    i64::try_from(at.unix_timestamp_nanos()).unwrap_or(i64::MAX)
}

/// An authenticator that hands out `id-token-<n>` credentials.
///
/// Each call increments the counter before any simulated latency, so
/// overlapping calls are visible in [`MockAuthenticator::call_count`].
pub struct MockAuthenticator {
    clock: Arc<dyn Clock>,
    ttl_seconds: AtomicU64,
    latency_ms: AtomicU64,
    calls: AtomicU32,
    remaining_failures: AtomicU32,
}

impl std::fmt::Debug for MockAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockAuthenticator")
            .field("calls", &self.calls.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Default for MockAuthenticator {
    fn default() -> Self {
        Self::new()
    }
}

impl MockAuthenticator {
    /// Create an authenticator stamping credentials with wall-clock time.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create an authenticator stamping credentials with `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            ttl_seconds: AtomicU64::new(DEFAULT_TTL_SECONDS),
            latency_ms: AtomicU64::new(0),
            calls: AtomicU32::new(0),
            remaining_failures: AtomicU32::new(0),
        }
    }

    /// Lifetime of issued credentials.
    pub fn set_ttl(&self, seconds: u64) {
        self.ttl_seconds.store(seconds, Ordering::SeqCst);
    }

    /// Delay every exchange by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        let ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self.latency_ms.store(ms, Ordering::SeqCst);
    }

    /// Reject the next `count` exchanges.
    pub fn fail_next(&self, count: u32) {
        self.remaining_failures.store(count, Ordering::SeqCst);
    }

    /// Number of exchanges started so far.
    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Authenticator for MockAuthenticator {
    async fn authenticate(&self, _email: &str, _password: &str) -> Result<Credential> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;

        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        let failing = self
            .remaining_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| {
                left.checked_sub(1)
            })
            .is_ok();
        if failing {
            return Err(Error::authentication(
                "NotAuthorizedException: Incorrect username or password.",
            ));
        }

        Ok(Credential::new(
            format!("id-token-{n}"),
            format!("access-token-{n}"),
            Some(format!("refresh-token-{n}")),
            self.clock.now(),
            self.ttl_seconds.load(Ordering::SeqCst),
        ))
    }
}

/// An in-memory portal.
///
/// Transactions are held newest first and sliced into pages on request, so
/// inserting a new session shifts every later page like the real list does.
pub struct MockChargingApi {
    driver: RwLock<Driver>,
    transactions: RwLock<Vec<TransactionRecord>>,
    requested_pages: RwLock<Vec<u32>>,
    metadata_calls: AtomicU32,
    list_calls: AtomicU32,
    should_fail: AtomicBool,
    fail_message: RwLock<String>,
}

impl std::fmt::Debug for MockChargingApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockChargingApi")
            .field("metadata_calls", &self.metadata_calls.load(Ordering::Relaxed))
            .field("list_calls", &self.list_calls.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Default for MockChargingApi {
    fn default() -> Self {
        Self::new()
    }
}

impl MockChargingApi {
    /// Create an empty portal with no driver and no transactions.
    pub fn new() -> Self {
        Self {
            driver: RwLock::new(Driver::default()),
            transactions: RwLock::new(Vec::new()),
            requested_pages: RwLock::new(Vec::new()),
            metadata_calls: AtomicU32::new(0),
            list_calls: AtomicU32::new(0),
            should_fail: AtomicBool::new(false),
            fail_message: RwLock::new("Mock failure".to_string()),
        }
    }

    /// Create a portal whose driver owns a single chargepoint.
    pub fn for_chargepoint(chargepoint_id: &str) -> Self {
        Self {
            driver: RwLock::new(driver_with_chargepoint(chargepoint_id)),
            ..Self::new()
        }
    }

    pub async fn set_driver(&self, driver: Driver) {
        *self.driver.write().await = driver;
    }

    /// Replace the whole list (newest first).
    pub async fn set_transactions(&self, transactions: Vec<TransactionRecord>) {
        *self.transactions.write().await = transactions;
    }

    /// Add sessions at the head of the list, keeping their order.
    pub async fn push_newest(&self, transactions: Vec<TransactionRecord>) {
        let mut list = self.transactions.write().await;
        let older = std::mem::replace(&mut *list, transactions);
        list.extend(older);
    }

    /// Make every call fail with an API error until cleared.
    pub async fn set_should_fail(&self, fail: bool, message: Option<&str>) {
        self.should_fail.store(fail, Ordering::SeqCst);
        if let Some(msg) = message {
            *self.fail_message.write().await = msg.to_string();
        }
    }

    pub fn metadata_calls(&self) -> u32 {
        self.metadata_calls.load(Ordering::SeqCst)
    }

    pub fn list_calls(&self) -> u32 {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// Page numbers requested so far, in order.
    pub async fn requested_pages(&self) -> Vec<u32> {
        self.requested_pages.read().await.clone()
    }

    /// Reset call counters and the page log.
    pub async fn reset_counts(&self) {
        self.metadata_calls.store(0, Ordering::SeqCst);
        self.list_calls.store(0, Ordering::SeqCst);
        self.requested_pages.write().await.clear();
    }

    async fn check_failure(&self) -> Result<()> {
        if self.should_fail.load(Ordering::SeqCst) {
            let message = self.fail_message.read().await.clone();
            return Err(Error::api(message, Value::Null));
        }
        Ok(())
    }
}

#[async_trait]
impl ChargingApi for MockChargingApi {
    async fn fetch_metadata(&self) -> Result<Driver> {
        self.metadata_calls.fetch_add(1, Ordering::SeqCst);
        self.check_failure().await?;
        Ok(self.driver.read().await.clone())
    }

    async fn list_transactions(&self, request: &PageRequest) -> Result<TransactionPage> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.check_failure().await?;
        if request.page == 0 {
            return Err(Error::invalid_config("page numbers start at 1"));
        }
        self.requested_pages.write().await.push(request.page);

        let list = self.transactions.read().await;
        let size = request.size as usize;
        let start = (request.page as usize - 1).saturating_mul(size);
        let items = list.iter().skip(start).take(size).cloned().collect();

        Ok(TransactionPage {
            total_count: Some(list.len() as u64),
            page: Some(PageInfo {
                page: Some(u64::from(request.page)),
                size: Some(u64::from(request.size)),
                sort: request
                    .sort
                    .as_ref()
                    .map(|s| Value::String(s.to_string())),
            }),
            items,
        })
    }
}

/// A driver owning exactly one chargepoint.
pub fn driver_with_chargepoint(chargepoint_id: &str) -> Driver {
    Driver {
        id: Some("driver-1".to_string()),
        first_name: Some("Test".to_string()),
        last_name: Some("Driver".to_string()),
        email: Some("driver@example.com".to_string()),
        chargepoints: vec![Chargepoint {
            id: Some("cp-internal-1".to_string()),
            chargepoint_id: Some(chargepoint_id.to_string()),
            is_public: Some(false),
            ..Default::default()
        }],
        ..Default::default()
    }
}

/// A finished two-hour session.
pub fn completed_session(
    id: &str,
    device_id: &str,
    started: OffsetDateTime,
    energy_kwh: f64,
) -> TransactionRecord {
    TransactionRecord {
        end_time: (started + time::Duration::hours(2)).format(&Rfc3339).ok(),
        total_energy_kwh: Some(energy_kwh),
        total_cost: Some((energy_kwh * 0.30 * 100.0).round() / 100.0),
        status: Some("COMPLETED".to_string()),
        ..active_session(id, device_id, started)
    }
}

/// A session that is still charging.
pub fn active_session(id: &str, device_id: &str, started: OffsetDateTime) -> TransactionRecord {
    TransactionRecord {
        id: id.to_string(),
        kind: Some("CHARGE".to_string()),
        device_id: Some(device_id.to_string()),
        charge_card: Some("NL-XYZ-000001-1".to_string()),
        start_time: started.format(&Rfc3339).ok(),
        status: Some("CHARGING".to_string()),
        ..Default::default()
    }
}
