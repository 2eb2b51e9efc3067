//! Authenticated access to the Athlon/Groendus charging portal.
//!
//! The portal is an AWS AppSync GraphQL API behind an AWS Cognito user
//! pool. This crate handles both halves:
//!
//! - **Authentication**: the Cognito `USER_SRP_AUTH` password verifier
//!   ([`SrpAuthSession`], with the math in [`srp`]), producing a short-lived
//!   [`Credential`]
//! - **Requests**: [`GraphQlClient`], which keeps one credential per
//!   instance, renews it shortly before expiry, and recovers once from a
//!   mid-flight authorization failure
//! - **Operations**: the [`ChargingApi`] trait (driver metadata and
//!   transaction pages), implemented by the client and by
//!   [`MockChargingApi`] for tests
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use groendus_core::{ChargingApi, GraphQlClient, PageRequest, SrpAuthSession};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let auth = Arc::new(SrpAuthSession::new(Duration::from_secs(30))?);
//!     let client = GraphQlClient::new("driver@example.com", "secret", auth)?;
//!
//!     let driver = client.fetch_metadata().await?;
//!     println!("Chargepoints: {:?}", driver.chargepoint_ids());
//!
//!     let page = client.list_transactions(&PageRequest::newest_first(1, 10)).await?;
//!     println!("{} transactions in total", page.total_count.unwrap_or(0));
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod client;
pub mod credential;
pub mod error;
pub mod mock;
pub mod queries;
pub mod retry;
pub mod srp;
pub mod traits;

pub use auth::{Authenticator, ClientMetadata, SrpAuthSession, UserPool};
pub use client::{ClientOptions, GraphQlClient};
pub use credential::{Clock, Credential, SystemClock};
pub use error::{Error, Result};
pub use mock::{MockAuthenticator, MockChargingApi, MockClock};
pub use retry::RetryConfig;
pub use srp::SrpClient;
pub use traits::{ChargingApi, PageRequest};

// Re-export from groendus-types
pub use groendus_types::{Driver, SortSpec, TransactionPage, TransactionRecord};
