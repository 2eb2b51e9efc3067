//! Records returned by the charging portal's GraphQL schema.
//!
//! The portal is loosely typed: numbers sometimes arrive as strings, lists
//! arrive as `null`, and optional fields disappear entirely. Every record
//! here decodes leniently so that one odd field never fails a whole page.

use core::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::error::ParseError;

/// A single charging transaction as listed by `listTransactions`.
///
/// A transaction without an end time is still in progress.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    /// Stable transaction identifier. Empty when the portal omitted it.
    #[serde(default, deserialize_with = "lenient::string")]
    pub id: String,
    /// Transaction type as reported by the portal.
    #[serde(rename = "type", default, deserialize_with = "lenient::opt_string")]
    pub kind: Option<String>,
    /// Chargepoint the session ran on.
    #[serde(
        rename = "chargepointId",
        default,
        deserialize_with = "lenient::opt_string"
    )]
    pub device_id: Option<String>,
    /// Printed number of the charge card used.
    #[serde(
        rename = "visualNumber",
        default,
        deserialize_with = "lenient::opt_string"
    )]
    pub charge_card: Option<String>,
    /// Tariff payload, passed through untouched.
    #[serde(default)]
    pub tariff: Option<Value>,
    /// Session start, as the raw timestamp string.
    #[serde(
        rename = "startDateTime",
        default,
        deserialize_with = "lenient::opt_string"
    )]
    pub start_time: Option<String>,
    /// Session end, as the raw timestamp string.
    #[serde(
        rename = "endDateTime",
        default,
        deserialize_with = "lenient::opt_string"
    )]
    pub end_time: Option<String>,
    /// Energy delivered in kWh.
    #[serde(rename = "totalEnergy", default, deserialize_with = "lenient::number")]
    pub total_energy_kwh: Option<f64>,
    /// Session cost in the tariff currency.
    #[serde(rename = "totalCost", default, deserialize_with = "lenient::number")]
    pub total_cost: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub status: Option<String>,
    #[serde(rename = "errorCode", default, deserialize_with = "lenient::opt_string")]
    pub error_code: Option<String>,
    #[serde(rename = "invoicePeriod", default)]
    pub invoice_period: Option<Value>,
}

impl TransactionRecord {
    /// Whether this transaction ran on the given chargepoint.
    pub fn belongs_to(&self, device_id: &str) -> bool {
        self.device_id.as_deref() == Some(device_id)
    }

    /// Whether the session has finished (has a non-empty end time).
    pub fn is_completed(&self) -> bool {
        self.end_time
            .as_deref()
            .is_some_and(|end| !end.trim().is_empty())
    }

    /// Parsed start time, if the raw value is RFC 3339.
    pub fn started_at(&self) -> Option<OffsetDateTime> {
        parse_timestamp(self.start_time.as_deref()?)
    }

    /// Parsed end time, if the raw value is RFC 3339.
    pub fn ended_at(&self) -> Option<OffsetDateTime> {
        parse_timestamp(self.end_time.as_deref()?)
    }

    /// Energy this transaction may add to a running total.
    ///
    /// Missing, negative and non-finite values contribute nothing.
    pub fn energy_contribution(&self) -> f64 {
        match self.total_energy_kwh {
            Some(kwh) if kwh.is_finite() && kwh > 0.0 => kwh,
            _ => 0.0,
        }
    }

    /// Sort key ordering transactions chronologically by start time.
    ///
    /// Parsed timestamps compare as instants; records whose start time does
    /// not parse sort before every parsed one and fall back to the raw string.
    pub fn chronological_key(&self) -> (Option<OffsetDateTime>, Option<String>) {
        (self.started_at(), self.start_time.clone())
    }
}

fn parse_timestamp(raw: &str) -> Option<OffsetDateTime> {
    OffsetDateTime::parse(raw.trim(), &Rfc3339).ok()
}

/// One page of `listTransactions`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionPage {
    #[serde(default, deserialize_with = "lenient::count")]
    pub total_count: Option<u64>,
    #[serde(default)]
    pub page: Option<PageInfo>,
    #[serde(default, deserialize_with = "lenient::null_as_default")]
    pub items: Vec<TransactionRecord>,
}

/// Echo of the requested page window.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageInfo {
    #[serde(default, deserialize_with = "lenient::count")]
    pub page: Option<u64>,
    #[serde(default, deserialize_with = "lenient::count")]
    pub size: Option<u64>,
    #[serde(default)]
    pub sort: Option<Value>,
}

/// The signed-in driver and the chargepoints linked to the account.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Driver {
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub first_name: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub last_name: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub email: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub iban: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub installation_state: Option<String>,
    #[serde(default, deserialize_with = "lenient::null_as_default")]
    pub chargepoints: Vec<Chargepoint>,
}

impl Driver {
    /// First and last name joined, or `None` when both are blank.
    pub fn display_name(&self) -> Option<String> {
        let name = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        (!name.is_empty()).then_some(name)
    }

    /// Find a linked chargepoint by its public chargepoint id.
    pub fn chargepoint(&self, chargepoint_id: &str) -> Option<&Chargepoint> {
        self.chargepoints
            .iter()
            .find(|cp| cp.chargepoint_id.as_deref() == Some(chargepoint_id))
    }

    /// Public ids of all linked chargepoints, skipping blank ones.
    pub fn chargepoint_ids(&self) -> Vec<&str> {
        self.chargepoints
            .iter()
            .filter_map(|cp| cp.chargepoint_id.as_deref())
            .filter(|id| !id.is_empty())
            .collect()
    }
}

/// A chargepoint linked to the driver account.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chargepoint {
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub chargepoint_id: Option<String>,
    #[serde(default)]
    pub is_public: Option<bool>,
    #[serde(default)]
    pub current_tariff: Option<Tariff>,
    #[serde(default, deserialize_with = "lenient::null_as_default")]
    pub evses: Vec<Evse>,
}

/// Tariff currently applied to a chargepoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tariff {
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub currency: Option<String>,
    /// Price per kWh; only present on simple tariffs.
    #[serde(default, deserialize_with = "lenient::number")]
    pub energy_price: Option<f64>,
}

/// A single connector (EVSE) of a chargepoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Evse {
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub evse_id: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub status: Option<String>,
}

/// Direction of a [`SortSpec`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SortDirection {
    Ascending,
    Descending,
}

/// Sort order for list queries, sent as the opaque string `field:DIR`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SortSpec {
    pub field: String,
    pub direction: SortDirection,
}

impl SortSpec {
    /// Newest transactions first (`startDateTime:DESC`).
    pub fn newest_first() -> Self {
        Self {
            field: "startDateTime".to_string(),
            direction: SortDirection::Descending,
        }
    }
}

impl fmt::Display for SortSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dir = match self.direction {
            SortDirection::Ascending => "ASC",
            SortDirection::Descending => "DESC",
        };
        write!(f, "{}:{}", self.field, dir)
    }
}

impl FromStr for SortSpec {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (field, dir) = s
            .split_once(':')
            .ok_or_else(|| ParseError::InvalidSort(s.to_string()))?;
        let direction = match dir.to_ascii_uppercase().as_str() {
            "ASC" => SortDirection::Ascending,
            "DESC" => SortDirection::Descending,
            _ => return Err(ParseError::InvalidSort(s.to_string())),
        };
        if field.is_empty() {
            return Err(ParseError::InvalidSort(s.to_string()));
        }
        Ok(Self {
            field: field.to_string(),
            direction,
        })
    }
}

impl Serialize for SortSpec {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SortSpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

mod lenient {
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    pub fn number<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
        let value = Option::<Value>::deserialize(d)?;
        Ok(value
            .and_then(|v| match v {
                Value::Number(n) => n.as_f64(),
                Value::String(s) => s.trim().parse::<f64>().ok(),
                _ => None,
            })
            .filter(|n| n.is_finite()))
    }

    pub fn count<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u64>, D::Error> {
        let value = Option::<Value>::deserialize(d)?;
        Ok(value.and_then(|v| match v {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse::<u64>().ok(),
            _ => None,
        }))
    }

    pub fn opt_string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
        let value = Option::<Value>::deserialize(d)?;
        Ok(value.and_then(|v| match v {
            Value::String(s) => Some(s),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }))
    }

    pub fn string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
        Ok(opt_string(d)?.unwrap_or_default())
    }

    pub fn null_as_default<'de, D, T>(d: D) -> Result<T, D::Error>
    where
        D: Deserializer<'de>,
        T: Default + Deserialize<'de>,
    {
        Ok(Option::<T>::deserialize(d)?.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_transaction_decodes_portal_shape() {
        let tx: TransactionRecord = serde_json::from_value(json!({
            "id": "tx-1",
            "type": "CHARGE",
            "chargepointId": "CP-1",
            "visualNumber": "NL-ABC-123",
            "tariff": {"energyPrice": 0.31},
            "startDateTime": "2024-03-01T10:00:00Z",
            "endDateTime": "2024-03-01T12:30:00Z",
            "totalEnergy": 12.5,
            "totalCost": "3.90",
            "status": "COMPLETED",
            "errorCode": null,
            "invoicePeriod": "2024-03"
        }))
        .unwrap();

        assert_eq!(tx.id, "tx-1");
        assert!(tx.belongs_to("CP-1"));
        assert!(!tx.belongs_to("CP-2"));
        assert!(tx.is_completed());
        assert_eq!(tx.total_energy_kwh, Some(12.5));
        assert_eq!(tx.total_cost, Some(3.9));
        assert_eq!(tx.charge_card.as_deref(), Some("NL-ABC-123"));
        assert!(tx.started_at().unwrap() < tx.ended_at().unwrap());
    }

    #[test]
    fn test_transaction_lenient_numbers() {
        let tx: TransactionRecord = serde_json::from_value(json!({
            "id": 42,
            "totalEnergy": "not a number",
            "totalCost": {"amount": 1}
        }))
        .unwrap();

        assert_eq!(tx.id, "42");
        assert_eq!(tx.total_energy_kwh, None);
        assert_eq!(tx.total_cost, None);
        assert_eq!(tx.energy_contribution(), 0.0);
        assert!(!tx.is_completed());
    }

    #[test]
    fn test_energy_contribution_ignores_negative() {
        let tx = TransactionRecord {
            total_energy_kwh: Some(-4.0),
            ..Default::default()
        };
        assert_eq!(tx.energy_contribution(), 0.0);

        let tx = TransactionRecord {
            total_energy_kwh: Some(7.25),
            ..Default::default()
        };
        assert_eq!(tx.energy_contribution(), 7.25);
    }

    #[test]
    fn test_blank_end_time_is_in_progress() {
        let tx = TransactionRecord {
            end_time: Some("  ".to_string()),
            ..Default::default()
        };
        assert!(!tx.is_completed());
    }

    #[test]
    fn test_page_with_null_items() {
        let page: TransactionPage = serde_json::from_value(json!({
            "totalCount": 0,
            "page": {"page": 1, "size": 50, "sort": "startDateTime:DESC"},
            "items": null
        }))
        .unwrap();
        assert!(page.items.is_empty());
        assert_eq!(page.total_count, Some(0));
        assert_eq!(page.page.unwrap().size, Some(50));
    }

    #[test]
    fn test_driver_chargepoint_lookup() {
        let driver: Driver = serde_json::from_value(json!({
            "id": "d-1",
            "firstName": "Sam",
            "lastName": " ",
            "chargepoints": [
                {"id": "1", "chargepointId": "CP-1", "isPublic": false,
                 "currentTariff": {"id": "t", "currency": "EUR", "energyPrice": "0.29"},
                 "evses": null},
                {"id": "2", "chargepointId": ""}
            ]
        }))
        .unwrap();

        assert_eq!(driver.display_name().as_deref(), Some("Sam"));
        assert_eq!(driver.chargepoint_ids(), vec!["CP-1"]);
        let cp = driver.chargepoint("CP-1").unwrap();
        assert_eq!(cp.current_tariff.as_ref().unwrap().energy_price, Some(0.29));
        assert!(cp.evses.is_empty());
        assert!(driver.chargepoint("CP-9").is_none());
    }

    #[test]
    fn test_sort_spec_display_and_parse() {
        assert_eq!(SortSpec::newest_first().to_string(), "startDateTime:DESC");
        let spec: SortSpec = "endDateTime:asc".parse().unwrap();
        assert_eq!(spec.direction, SortDirection::Ascending);
        assert!("startDateTime".parse::<SortSpec>().is_err());
        assert!(":DESC".parse::<SortSpec>().is_err());
        assert_eq!(
            serde_json::to_value(SortSpec::newest_first()).unwrap(),
            json!("startDateTime:DESC")
        );
    }

    #[test]
    fn test_chronological_key_orders_unparsable_first() {
        let parsed = TransactionRecord {
            start_time: Some("2024-03-01T10:00:00Z".to_string()),
            ..Default::default()
        };
        let garbage = TransactionRecord {
            start_time: Some("yesterday".to_string()),
            ..Default::default()
        };
        assert!(garbage.chronological_key() < parsed.chronological_key());
    }
}
