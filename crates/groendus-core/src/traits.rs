//! Trait abstractions for portal operations.
//!
//! [`ChargingApi`] abstracts over the real [`crate::GraphQlClient`] and the
//! [`crate::MockChargingApi`] used in tests, so the sync engine can be
//! exercised without a network.

use async_trait::async_trait;
use serde_json::Value;

use groendus_types::{Driver, SortSpec, TransactionPage};

use crate::error::Result;

/// A window into the reverse-chronological transaction list.
#[derive(Debug, Clone, PartialEq)]
pub struct PageRequest {
    /// 1-based page number.
    pub page: u32,
    pub size: u32,
    /// Sort order; `None` leaves ordering to the portal.
    pub sort: Option<SortSpec>,
    /// Portal filter expression, passed through as-is.
    pub filter: Option<Value>,
}

impl PageRequest {
    /// Page `page` of `size` items, newest first.
    pub fn newest_first(page: u32, size: u32) -> Self {
        Self {
            page,
            size,
            sort: Some(SortSpec::newest_first()),
            filter: None,
        }
    }

    /// Page `page` of `size` items in the portal's default order.
    pub fn unsorted(page: u32, size: u32) -> Self {
        Self {
            page,
            size,
            sort: None,
            filter: None,
        }
    }

    /// GraphQL variables for [`crate::queries::TRANSACTION_LIST_PAGE`].
    pub fn variables(&self) -> Value {
        let mut page = serde_json::json!({ "page": self.page, "size": self.size });
        if let Some(sort) = &self.sort {
            page["sort"] = Value::String(sort.to_string());
        }
        serde_json::json!({ "page": page, "filter": self.filter })
    }
}

/// Operations the sync engine needs from the portal.
#[async_trait]
pub trait ChargingApi: Send + Sync {
    /// Fetch the driver profile and linked chargepoints.
    ///
    /// Returns an empty [`Driver`] when the portal reports no driver.
    async fn fetch_metadata(&self) -> Result<Driver>;

    /// Fetch one page of transactions.
    ///
    /// Fails with [`crate::Error::InvalidConfig`] for page 0.
    async fn list_transactions(&self, request: &PageRequest) -> Result<TransactionPage>;
}
