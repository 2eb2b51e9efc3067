//! Persisted data models.

use std::collections::HashSet;

use serde_json::{Value, json};
use time::OffsetDateTime;

/// Maximum number of transaction ids remembered per entry.
pub const MAX_SEEN_IDS: usize = 500;

/// A raw row of the key-value table.
#[derive(Debug, Clone, PartialEq)]
pub struct KvEntry {
    pub key: String,
    pub version: i64,
    /// JSON text as written by [`crate::Store::put_entry`].
    pub data: String,
    pub updated_at: OffsetDateTime,
}

impl KvEntry {
    /// Parse the stored JSON text.
    pub fn json(&self) -> Result<Value, serde_json::Error> {
        serde_json::from_str(&self.data)
    }
}

/// The stored payload could not be interpreted as an accumulator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed accumulator payload: {0}")]
pub struct MalformedState(pub String);

/// Running energy total plus the ids already folded into it.
///
/// The id list is kept most-recent-first and capped at [`MAX_SEEN_IDS`];
/// a set mirrors it for membership tests.
#[derive(Debug, Clone, Default)]
pub struct AccumulatorState {
    total_energy_kwh: f64,
    seen_ids: Vec<String>,
    seen_lookup: HashSet<String>,
}

impl PartialEq for AccumulatorState {
    fn eq(&self, other: &Self) -> bool {
        self.total_energy_kwh == other.total_energy_kwh && self.seen_ids == other.seen_ids
    }
}

impl AccumulatorState {
    /// A zero-valued state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a state from possibly untrusted parts.
    ///
    /// Duplicate and empty ids are dropped (first occurrence wins), the list
    /// is truncated to [`MAX_SEEN_IDS`], and a negative or non-finite total
    /// becomes zero.
    pub fn from_parts<I, S>(total_energy_kwh: f64, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let total_energy_kwh = if total_energy_kwh.is_finite() && total_energy_kwh > 0.0 {
            total_energy_kwh
        } else {
            0.0
        };

        let mut state = Self {
            total_energy_kwh,
            ..Self::default()
        };
        for id in ids {
            if state.seen_ids.len() >= MAX_SEEN_IDS {
                break;
            }
            let id = id.into();
            if id.is_empty() || state.seen_lookup.contains(&id) {
                continue;
            }
            state.seen_lookup.insert(id.clone());
            state.seen_ids.push(id);
        }
        state
    }

    pub fn total_energy_kwh(&self) -> f64 {
        self.total_energy_kwh
    }

    /// Remembered ids, most recent first.
    pub fn seen_transaction_ids(&self) -> &[String] {
        &self.seen_ids
    }

    pub fn seen_count(&self) -> usize {
        self.seen_ids.len()
    }

    pub fn has_seen(&self, id: &str) -> bool {
        self.seen_lookup.contains(id)
    }

    /// Adopt `candidate` as the new total if it does not go backwards.
    ///
    /// Returns `false` (leaving the total untouched) for a decrease or a
    /// non-finite value.
    pub fn advance_total(&mut self, candidate: f64) -> bool {
        if !candidate.is_finite() || candidate < self.total_energy_kwh {
            return false;
        }
        self.total_energy_kwh = candidate;
        true
    }

    /// Prepend `ids` (given most-recent-first) and drop the oldest entries
    /// beyond [`MAX_SEEN_IDS`].
    ///
    /// Ids already present or empty are skipped. Returns how many were added.
    pub fn record_seen<I, S>(&mut self, ids: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut fresh = Vec::new();
        for id in ids {
            let id = id.into();
            if id.is_empty() || self.seen_lookup.contains(&id) {
                continue;
            }
            self.seen_lookup.insert(id.clone());
            fresh.push(id);
        }

        let added = fresh.len();
        if added == 0 {
            return 0;
        }

        fresh.append(&mut self.seen_ids);
        if fresh.len() > MAX_SEEN_IDS {
            for dropped in fresh.drain(MAX_SEEN_IDS..) {
                self.seen_lookup.remove(&dropped);
            }
        }
        self.seen_ids = fresh;
        added
    }

    /// Encode as `{"total_energy_kwh": .., "seen_transaction_ids": [..]}`.
    pub fn to_json(&self) -> Value {
        json!({
            "total_energy_kwh": self.total_energy_kwh,
            "seen_transaction_ids": self.seen_ids,
        })
    }

    /// Decode a stored payload.
    ///
    /// Missing fields default to empty. A numeric string total is accepted.
    /// Any other shape is rejected.
    pub fn from_json(value: &Value) -> Result<Self, MalformedState> {
        let object = value
            .as_object()
            .ok_or_else(|| MalformedState(format!("expected object, got {}", kind(value))))?;

        let total = match object.get("total_energy_kwh") {
            None | Some(Value::Null) => 0.0,
            Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
            Some(Value::String(s)) => s.trim().parse::<f64>().map_err(|_| {
                MalformedState(format!("total_energy_kwh is not numeric: {s:?}"))
            })?,
            Some(other) => {
                return Err(MalformedState(format!(
                    "total_energy_kwh has type {}",
                    kind(other)
                )));
            }
        };

        let ids = match object.get("seen_transaction_ids") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| match item {
                    Value::String(s) => Ok(s.clone()),
                    Value::Number(n) => Ok(n.to_string()),
                    other => Err(MalformedState(format!(
                        "seen_transaction_ids contains {}",
                        kind(other)
                    ))),
                })
                .collect::<Result<Vec<_>, _>>()?,
            Some(other) => {
                return Err(MalformedState(format!(
                    "seen_transaction_ids has type {}",
                    kind(other)
                )));
            }
        };

        Ok(Self::from_parts(total, ids))
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_new_is_zero() {
        let state = AccumulatorState::new();
        assert_eq!(state.total_energy_kwh(), 0.0);
        assert_eq!(state.seen_count(), 0);
    }

    #[test]
    fn test_from_parts_sanitizes() {
        let state = AccumulatorState::from_parts(-4.0, ["a", "", "b", "a", "c"]);
        assert_eq!(state.total_energy_kwh(), 0.0);
        assert_eq!(state.seen_transaction_ids(), ["a", "b", "c"]);

        let state = AccumulatorState::from_parts(f64::NAN, Vec::<String>::new());
        assert_eq!(state.total_energy_kwh(), 0.0);
    }

    #[test]
    fn test_advance_total_refuses_decrease() {
        let mut state = AccumulatorState::from_parts(10.0, Vec::<String>::new());
        assert!(!state.advance_total(9.5));
        assert!(!state.advance_total(f64::INFINITY));
        assert_eq!(state.total_energy_kwh(), 10.0);
        assert!(state.advance_total(12.5));
        assert_eq!(state.total_energy_kwh(), 12.5);
    }

    #[test]
    fn test_record_seen_prepends_newest_first() {
        let mut state = AccumulatorState::from_parts(0.0, ["old1", "old2"]);
        let added = state.record_seen(["new1", "new2", "old1"]);
        assert_eq!(added, 2);
        assert_eq!(
            state.seen_transaction_ids(),
            ["new1", "new2", "old1", "old2"]
        );
        assert!(state.has_seen("new2"));
    }

    #[test]
    fn test_record_seen_drops_oldest_beyond_cap() {
        let ids: Vec<String> = (0..MAX_SEEN_IDS).map(|i| format!("old-{i}")).collect();
        let mut state = AccumulatorState::from_parts(0.0, ids);
        state.record_seen(["fresh"]);

        assert_eq!(state.seen_count(), MAX_SEEN_IDS);
        assert_eq!(state.seen_transaction_ids()[0], "fresh");
        assert!(!state.has_seen(&format!("old-{}", MAX_SEEN_IDS - 1)));
        assert!(state.has_seen("old-0"));
    }

    #[test]
    fn test_json_round_trip_shape() {
        let state = AccumulatorState::from_parts(3.25, ["x", "y"]);
        let encoded = state.to_json();
        assert_eq!(
            encoded,
            json!({"total_energy_kwh": 3.25, "seen_transaction_ids": ["x", "y"]})
        );
        assert_eq!(AccumulatorState::from_json(&encoded).unwrap(), state);
    }

    #[test]
    fn test_from_json_lenient_and_strict() {
        let state = AccumulatorState::from_json(&json!({"total_energy_kwh": "7.5"})).unwrap();
        assert_eq!(state.total_energy_kwh(), 7.5);
        assert_eq!(state.seen_count(), 0);

        assert!(AccumulatorState::from_json(&json!([1, 2])).is_err());
        assert!(AccumulatorState::from_json(&json!({"total_energy_kwh": "lots"})).is_err());
        assert!(AccumulatorState::from_json(&json!({"seen_transaction_ids": "abc"})).is_err());
        assert!(
            AccumulatorState::from_json(&json!({"seen_transaction_ids": [{"id": 1}]})).is_err()
        );
    }

    proptest! {
        #[test]
        fn prop_seen_ids_capped_and_unique(
            batches in prop::collection::vec(
                prop::collection::vec("[a-z0-9]{1,6}", 0..200),
                1..8,
            )
        ) {
            let mut state = AccumulatorState::new();
            for batch in batches {
                state.record_seen(batch);
                let ids = state.seen_transaction_ids();
                prop_assert!(ids.len() <= MAX_SEEN_IDS);
                let unique: HashSet<&String> = ids.iter().collect();
                prop_assert_eq!(unique.len(), ids.len());
                for id in ids {
                    prop_assert!(state.has_seen(id));
                }
            }
        }

        #[test]
        fn prop_total_never_decreases(steps in prop::collection::vec(-50.0f64..50.0, 0..50)) {
            let mut state = AccumulatorState::new();
            let mut previous = 0.0;
            for step in steps {
                state.advance_total(state.total_energy_kwh() + step);
                prop_assert!(state.total_energy_kwh() >= previous);
                previous = state.total_energy_kwh();
            }
        }
    }
}
