//! Wire types for the Athlon/Groendus charging portal.
//!
//! This crate holds the records exchanged with the portal's GraphQL API and
//! nothing else, so it can be shared by the client (groendus-core), the
//! persistence layer (groendus-store) and the sync service.
//!
//! # Example
//!
//! ```
//! use groendus_types::{SortSpec, TransactionRecord};
//!
//! let tx: TransactionRecord = serde_json::from_str(
//!     r#"{"id": "tx-1", "chargepointId": "CP-1", "endDateTime": "2024-03-01T12:00:00Z", "totalEnergy": "8.5"}"#,
//! ).unwrap();
//! assert!(tx.is_completed());
//! assert_eq!(tx.energy_contribution(), 8.5);
//! assert_eq!(SortSpec::newest_first().to_string(), "startDateTime:DESC");
//! ```

pub mod error;
pub mod types;

pub use error::ParseError;
pub use types::{
    Chargepoint, Driver, Evse, PageInfo, SortDirection, SortSpec, Tariff, TransactionPage,
    TransactionRecord,
};
