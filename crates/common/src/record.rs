//! Schema-tolerant access to inventory records.
//!
//! Records come from several collections and several generations of naming
//! conventions, so a semantic field (say, "next calibration date") may live
//! under any of a handful of keys. Lookups take an ordered candidate list and
//! return the first present, non-blank value.

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::time::{parse_timestamp, to_record_value};

/// Ordered candidate keys for each semantic field.
pub mod fields {
    pub const BORROWER: &[&str] = &["Borrower", "borrower"];
    pub const BORROWER_EMAIL: &[&str] = &["BorrowerEmail", "borrowerEmail"];
    pub const NOTIFY_EMAILS: &[&str] = &["notifyEmails", "NotifyEmails"];
    pub const TEAM: &[&str] = &["Team", "team"];
    pub const EQUIPMENT: &[&str] = &["Equipment", "equipment"];
    pub const BRAND: &[&str] = &["Brand", "brand"];
    pub const TYPE: &[&str] = &["Type", "type"];
    pub const MODEL: &[&str] = &["Model", "model"];
    pub const SERIAL: &[&str] = &["serial", "Serial", "SerialNo", "SN", "sn", "Serial No"];
    pub const LOCATION: &[&str] = &["Location", "location"];
    pub const EQUIPMENT_CODE: &[&str] = &[
        "equipmentCode",
        "EquipmentCode",
        "Equipment Code",
        "equipment_code",
        "EQCode",
        "eq_code",
        "Code",
        "code",
    ];
    pub const LATEST_CAL: &[&str] = &["performDate", "PerformDate", "latest_cal", "LatestCal"];
    pub const NEXT_CAL: &[&str] = &["dueDate", "DueDate", "next_cal", "NextCal"];
    pub const BORROW_DATE: &[&str] = &["borrow_date", "borrowDate"];
    pub const RETURN_DATE: &[&str] = &["return_date", "returnDate"];
    pub const ITEM: &[&str] = &["Item", "item"];
    pub const REQUESTER: &[&str] = &["Requester", "requester"];
    pub const TAKEN: &[&str] = &["Taken", "taken"];
    pub const TOTAL: &[&str] = &["Total", "total"];
    pub const WITHDRAWN_AT: &[&str] = &[
        "withdraw_date",
        "issued_date",
        "issuedAt",
        "createdAt",
        "created_at",
    ];
    pub const RECORDED_AT: &[&str] = &["timestamp"];

    /// Every key that holds an instant.
    pub const TIMESTAMP_KEYS: &[&[&str]] = &[
        LATEST_CAL,
        NEXT_CAL,
        BORROW_DATE,
        RETURN_DATE,
        WITHDRAWN_AT,
        RECORDED_AT,
    ];

    /// Keys the lookahead scan filters Masters on, in query order.
    pub const NEXT_CAL_QUERY: &[&str] = &["dueDate", "next_cal"];
    /// Key the lookahead scan filters Infusion-Pump records on.
    pub const RETURN_DATE_QUERY: &str = "return_date";
}

/// A loosely-typed inventory record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    pub fn new() -> Self {
        Self(Map::new())
    }

    pub fn from_map(map: Map<String, Value>) -> Self {
        Self(map)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(key.into(), value);
    }

    /// Shallow merge: keys in `other` overwrite keys in `self`.
    pub fn merge(&mut self, other: Map<String, Value>) {
        for (k, v) in other {
            self.0.insert(k, v);
        }
    }

    /// First present, non-blank value among `keys`.
    pub fn lookup(&self, keys: &[&str]) -> Option<&Value> {
        keys.iter()
            .filter_map(|k| self.0.get(*k))
            .find(|v| is_present(v))
    }

    /// Whether any of `keys` carries a present, non-blank value.
    pub fn has(&self, keys: &[&str]) -> bool {
        self.lookup(keys).is_some()
    }

    /// First present value among `keys`, rendered as trimmed text.
    pub fn text(&self, keys: &[&str]) -> Option<String> {
        self.lookup(keys).and_then(value_text)
    }

    /// First present value among `keys`, interpreted as an instant.
    ///
    /// A present but unparsable value yields `None`; callers that must tell
    /// the two apart use [`Record::has`].
    pub fn timestamp(&self, keys: &[&str], zone: &FixedOffset) -> Option<DateTime<Utc>> {
        self.lookup(keys).and_then(|v| parse_timestamp(v, zone))
    }

    /// Rewrite every parsable timestamp field as an RFC 3339 UTC string.
    ///
    /// Applied once when a record enters the store so range queries and
    /// later reads see a single representation. Unparsable values are left
    /// untouched.
    pub fn normalize_timestamps(&mut self, zone: &FixedOffset) {
        for keys in fields::TIMESTAMP_KEYS {
            for key in *keys {
                let parsed = self.0.get(*key).and_then(|v| parse_timestamp(v, zone));
                if let Some(instant) = parsed {
                    self.0.insert((*key).to_string(), to_record_value(instant));
                }
            }
        }
    }

    /// All addresses found under `keys`.
    ///
    /// Each value may be an array or a `,`/`;` delimited string; every
    /// candidate key contributes, not just the first.
    pub fn address_list(&self, keys: &[&str]) -> Vec<String> {
        keys.iter()
            .filter_map(|k| self.0.get(*k))
            .flat_map(split_addresses)
            .collect()
    }
}

/// Null, blank strings and empty arrays count as absent.
fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.trim().is_empty(),
        Value::Array(items) => !items.is_empty(),
        _ => true,
    }
}

fn value_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Array(items) => items
            .iter()
            .filter_map(value_text)
            .collect::<Vec<_>>()
            .join(", "),
        Value::Null | Value::Object(_) => return None,
    };
    (!text.is_empty()).then_some(text)
}

fn split_addresses(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items.iter().flat_map(split_addresses).collect(),
        Value::String(s) => s
            .split([',', ';'])
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_lookup_takes_first_present_candidate() {
        let r = record(json!({
            "dueDate": "  ",
            "DueDate": null,
            "next_cal": "2025-04-01",
            "NextCal": "2025-05-01"
        }));
        assert_eq!(r.lookup(fields::NEXT_CAL), Some(&json!("2025-04-01")));
    }

    #[test]
    fn test_text_trims_and_stringifies() {
        let r = record(json!({"Serial": "  SN-1 ", "Taken": 3, "Team": ""}));
        assert_eq!(r.text(fields::SERIAL).as_deref(), Some("SN-1"));
        assert_eq!(r.text(fields::TAKEN).as_deref(), Some("3"));
        assert_eq!(r.text(fields::TEAM), None);
        assert!(!r.has(fields::TEAM));
    }

    #[test]
    fn test_address_list_splits_and_unions_candidates() {
        let r = record(json!({
            "notifyEmails": "a@x.com; b@x.com,, c@x.com",
            "NotifyEmails": ["d@x.com", " e@x.com ; f@x.com", ""]
        }));
        assert_eq!(
            r.address_list(fields::NOTIFY_EMAILS),
            vec!["a@x.com", "b@x.com", "c@x.com", "d@x.com", "e@x.com", "f@x.com"]
        );
    }

    #[test]
    fn test_timestamp_unparsable_is_none_but_present() {
        let zone = crate::time::default_zone();
        let r = record(json!({"performDate": "sometime"}));
        assert!(r.has(fields::LATEST_CAL));
        assert_eq!(r.timestamp(fields::LATEST_CAL, &zone), None);
    }

    #[test]
    fn test_normalize_timestamps() {
        let zone = crate::time::default_zone();
        let mut r = record(json!({
            "dueDate": "17/03/2025",
            "borrow_date": {"_seconds": 1740787200, "_nanoseconds": 0},
            "return_date": "whenever",
            "Team": "17/03/2025"
        }));
        r.normalize_timestamps(&zone);

        assert_eq!(r.lookup(fields::NEXT_CAL), Some(&json!("2025-03-16T17:00:00.000Z")));
        assert_eq!(r.lookup(fields::BORROW_DATE), Some(&json!("2025-03-01T00:00:00.000Z")));
        assert_eq!(r.lookup(fields::RETURN_DATE), Some(&json!("whenever")));
        assert_eq!(r.text(fields::TEAM).as_deref(), Some("17/03/2025"));
    }

    #[test]
    fn test_normalize_keeps_unrepresentable_dates() {
        let earliest = chrono::NaiveDate::MIN.format("%Y-%m-%d").to_string();
        let mut r = record(json!({"dueDate": earliest}));
        r.normalize_timestamps(&crate::time::default_zone());
        assert_eq!(r.lookup(fields::NEXT_CAL), Some(&json!(earliest)));
    }

    #[test]
    fn test_merge_overwrites() {
        let mut r = record(json!({"Team": "A", "Location": "ICU"}));
        let mut patch = Map::new();
        patch.insert("Team".to_string(), json!("B"));
        r.merge(patch);
        assert_eq!(r.text(fields::TEAM).as_deref(), Some("B"));
        assert_eq!(r.text(fields::LOCATION).as_deref(), Some("ICU"));
    }
}
