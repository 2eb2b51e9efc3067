//! Background collector for Groendus/Athlon charging energy.
//!
//! This crate keeps a monotonic charging-energy total for one chargepoint:
//! - Polls the portal's transaction list on a schedule
//! - Counts each completed session exactly once, across passes and restarts
//! - Persists the running total and the ids already counted
//! - Reports the most recent completed sessions
//!
//! # Configuration
//!
//! The service reads configuration from `~/.config/groendus/service.toml`:
//!
//! ```toml
//! [account]
//! email = "driver@example.com"
//! # password = "..."   # or GROENDUS_PASSWORD
//!
//! [device]
//! chargepoint_id = "NL-GRO-0001"
//! poll_interval = 300
//! max_pages = 5
//!
//! [storage]
//! path = "~/.local/share/groendus/data.db"
//! ```

pub mod collector;
pub mod config;
pub mod engine;
pub mod state;

pub use collector::Collector;
pub use config::{AccountConfig, ApiConfig, Config, ConfigError, DeviceConfig, StorageConfig};
pub use engine::{LATEST_SESSIONS_LIMIT, PAGE_SIZE, Snapshot, SyncEngine, SyncError};
pub use state::{SyncStats, SyncStatus};
