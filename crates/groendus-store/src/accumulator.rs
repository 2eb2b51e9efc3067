//! Durable accumulator for one configured charger entry.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::Result;
use crate::models::AccumulatorState;
use crate::store::Store;

/// Version written alongside every accumulator payload.
pub const STORE_VERSION: i64 = 1;

const KEY_PREFIX: &str = "athlon_groendus.";

/// Persistence key for a configured entry.
pub fn storage_key(entry_id: &str) -> String {
    format!("{KEY_PREFIX}{entry_id}")
}

/// Loads and saves the [`AccumulatorState`] of a single entry.
///
/// Cloning is cheap; clones share the underlying [`Store`].
#[derive(Clone)]
pub struct AccumulatorStore {
    store: Arc<Mutex<Store>>,
    key: String,
}

impl std::fmt::Debug for AccumulatorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccumulatorStore")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

impl AccumulatorStore {
    pub fn new(store: Arc<Mutex<Store>>, entry_id: &str) -> Self {
        Self {
            store,
            key: storage_key(entry_id),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Load the persisted state.
    ///
    /// Nothing stored yields a zero state, as does an unreadable payload or
    /// one written by a newer version (logged at `warn`). Database faults
    /// are returned to the caller.
    pub async fn load(&self) -> Result<AccumulatorState> {
        let entry = {
            let store = self.store.lock().await;
            store.get_entry(&self.key)?
        };

        let Some(entry) = entry else {
            debug!("No stored accumulator for {}", self.key);
            return Ok(AccumulatorState::new());
        };

        if entry.version > STORE_VERSION {
            warn!(
                "Accumulator {} has version {} (newer than {}), starting fresh",
                self.key, entry.version, STORE_VERSION
            );
            return Ok(AccumulatorState::new());
        }

        let value = match entry.json() {
            Ok(value) => value,
            Err(e) => {
                warn!("Accumulator {} is not valid JSON ({}), starting fresh", self.key, e);
                return Ok(AccumulatorState::new());
            }
        };

        match AccumulatorState::from_json(&value) {
            Ok(state) => {
                debug!(
                    "Loaded accumulator {}: {:.3} kWh, {} seen ids",
                    self.key,
                    state.total_energy_kwh(),
                    state.seen_count()
                );
                Ok(state)
            }
            Err(e) => {
                warn!("Accumulator {} is corrupt ({}), starting fresh", self.key, e);
                Ok(AccumulatorState::new())
            }
        }
    }

    /// Persist `state`, replacing any previous version.
    pub async fn save(&self, state: &AccumulatorState) -> Result<()> {
        let store = self.store.lock().await;
        store.put_entry(&self.key, STORE_VERSION, &state.to_json())
    }

    /// Entry ids of every accumulator in the shared database, sorted.
    pub async fn entry_ids(&self) -> Result<Vec<String>> {
        let keys = self.store.lock().await.list_keys()?;
        Ok(keys
            .iter()
            .filter_map(|key| key.strip_prefix(KEY_PREFIX))
            .map(str::to_string)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn shared_store() -> Arc<Mutex<Store>> {
        Arc::new(Mutex::new(Store::open_in_memory().unwrap()))
    }

    #[test]
    fn test_storage_key() {
        assert_eq!(storage_key("NL-GRO-1"), "athlon_groendus.NL-GRO-1");
    }

    #[tokio::test]
    async fn test_load_missing_is_zero() {
        let acc = AccumulatorStore::new(shared_store(), "cp");
        assert_eq!(acc.load().await.unwrap(), AccumulatorState::new());
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let store = shared_store();
        let acc = AccumulatorStore::new(store.clone(), "cp");
        let state = AccumulatorState::from_parts(12.5, ["t2", "t1"]);
        acc.save(&state).await.unwrap();

        let reloaded = AccumulatorStore::new(store, "cp").load().await.unwrap();
        assert_eq!(reloaded, state);
    }

    #[tokio::test]
    async fn test_entries_are_isolated() {
        let store = shared_store();
        let a = AccumulatorStore::new(store.clone(), "a");
        let b = AccumulatorStore::new(store, "b");
        a.save(&AccumulatorState::from_parts(1.0, ["x"])).await.unwrap();

        assert_eq!(b.load().await.unwrap(), AccumulatorState::new());
    }

    #[tokio::test]
    async fn test_entry_ids_lists_accumulators_only() {
        let store = shared_store();
        let b = AccumulatorStore::new(store.clone(), "b");
        b.save(&AccumulatorState::new()).await.unwrap();
        AccumulatorStore::new(store.clone(), "a")
            .save(&AccumulatorState::from_parts(2.0, ["x"]))
            .await
            .unwrap();
        store.lock().await.put_entry("unrelated", 1, &json!({})).unwrap();

        assert_eq!(b.entry_ids().await.unwrap(), ["a", "b"]);
    }

    #[tokio::test]
    async fn test_corrupt_payloads_start_fresh() {
        let store = shared_store();
        let acc = AccumulatorStore::new(store.clone(), "cp");

        store.lock().await.put_raw(acc.key(), 1, "not json{").unwrap();
        assert_eq!(acc.load().await.unwrap(), AccumulatorState::new());

        store
            .lock()
            .await
            .put_entry(acc.key(), 1, &json!({"total_energy_kwh": true}))
            .unwrap();
        assert_eq!(acc.load().await.unwrap(), AccumulatorState::new());
    }

    #[tokio::test]
    async fn test_newer_version_starts_fresh() {
        let store = shared_store();
        let acc = AccumulatorStore::new(store.clone(), "cp");
        store
            .lock()
            .await
            .put_entry(
                acc.key(),
                STORE_VERSION + 1,
                &json!({"total_energy_kwh": 5.0, "seen_transaction_ids": ["a"]}),
            )
            .unwrap();

        assert_eq!(acc.load().await.unwrap(), AccumulatorState::new());
    }

    #[tokio::test]
    async fn test_load_sanitizes_stored_ids() {
        let store = shared_store();
        let acc = AccumulatorStore::new(store.clone(), "cp");
        let ids: Vec<String> = (0..600).map(|i| format!("id-{}", i % 550)).collect();
        store
            .lock()
            .await
            .put_entry(
                acc.key(),
                1,
                &json!({"total_energy_kwh": -1.0, "seen_transaction_ids": ids}),
            )
            .unwrap();

        let state = acc.load().await.unwrap();
        assert_eq!(state.total_energy_kwh(), 0.0);
        assert_eq!(state.seen_count(), 500);
        assert_eq!(state.seen_transaction_ids()[0], "id-0");
        assert_eq!(state.seen_transaction_ids()[499], "id-499");
    }
}
