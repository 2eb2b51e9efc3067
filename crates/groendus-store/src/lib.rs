//! Local persistence for Groendus charging-energy sync.
//!
//! A small SQLite-backed key-value table holds one versioned JSON document
//! per configured charger entry. On top of it, [`AccumulatorStore`] loads and
//! saves the [`AccumulatorState`]: the running energy total plus the ids of
//! the transactions already folded into it.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use groendus_store::{AccumulatorStore, Store};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), groendus_store::Error> {
//! let store = Arc::new(tokio::sync::Mutex::new(Store::open_in_memory()?));
//! let accumulator = AccumulatorStore::new(store, "NL-GRO-0001");
//!
//! let mut state = accumulator.load().await?;
//! state.record_seen(["tx-1"]);
//! state.advance_total(7.5);
//! accumulator.save(&state).await?;
//!
//! assert_eq!(accumulator.load().await?.total_energy_kwh(), 7.5);
//! # Ok(())
//! # }
//! ```

mod accumulator;
mod error;
mod models;
mod schema;
mod store;

pub use accumulator::{AccumulatorStore, STORE_VERSION, storage_key};
pub use error::{Error, Result};
pub use models::{AccumulatorState, KvEntry, MAX_SEEN_IDS, MalformedState};
pub use store::Store;

/// Default database path following platform conventions.
///
/// - Linux: `~/.local/share/groendus/data.db`
/// - macOS: `~/Library/Application Support/groendus/data.db`
/// - Windows: `C:\Users\<user>\AppData\Local\groendus\data.db`
pub fn default_db_path() -> std::path::PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("groendus")
        .join("data.db")
}
