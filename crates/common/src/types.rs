use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::record::Record;

/// The record collections that raise notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    /// Calibration master loans
    Master,
    InfusionPump,
    CleaningSupply,
}

impl RecordKind {
    pub const ALL: [RecordKind; 3] = [
        RecordKind::Master,
        RecordKind::InfusionPump,
        RecordKind::CleaningSupply,
    ];

    /// Collection name used in URLs.
    pub fn collection(&self) -> &'static str {
        match self {
            RecordKind::Master => "masters",
            RecordKind::InfusionPump => "infusion_pumps",
            RecordKind::CleaningSupply => "cleaning_supplies",
        }
    }

    pub fn from_collection(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.collection() == name)
    }
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordKind::Master => write!(f, "master"),
            RecordKind::InfusionPump => write!(f, "infusion_pump"),
            RecordKind::CleaningSupply => write!(f, "cleaning_supply"),
        }
    }
}

/// A record as persisted in the `records` namespace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub id: String,
    pub kind: RecordKind,
    pub data: Record,
    pub created_at: DateTime<Utc>,
}

/// An outgoing email.
///
/// Absent optional fields and an empty `bcc` are skipped on serialization so
/// the queue never stores nulls or empty lists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailMessage {
    pub to: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bcc: Vec<String>,
    pub subject: String,
    pub html: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// Context kept alongside a job for inspection; never used for delivery.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobMeta {
    pub equipment_code: String,
    pub location: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub perform_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<DateTime<Utc>>,
}

/// A persisted, retryable unit of pending email delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MailJob {
    pub id: String,
    pub message: MailMessage,
    pub meta: JobMeta,
    pub attempts: i32,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_tried_at: Option<DateTime<Utc>>,
}

/// A device registry entry, keyed by equipment code.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct DeviceEntry {
    pub equipment_code: String,
    #[serde(default)]
    pub perform_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub team: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub notify_emails: Vec<String>,
    #[serde(default)]
    pub equipment: Option<String>,
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub serial: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_kind_collections() {
        for kind in RecordKind::ALL {
            assert_eq!(RecordKind::from_collection(kind.collection()), Some(kind));
        }
        assert_eq!(RecordKind::from_collection("Masters"), None);
    }

    #[test]
    fn test_message_serialization_skips_empty() {
        let msg = MailMessage {
            to: "a@x.com".to_string(),
            bcc: vec![],
            subject: "s".to_string(),
            html: "<p>h</p>".to_string(),
            text: None,
        };
        let value = serde_json::to_value(&msg).unwrap();
        let obj = value.as_object().unwrap();
        assert!(!obj.contains_key("bcc"));
        assert!(!obj.contains_key("text"));
        assert_eq!(obj.len(), 3);
    }

    #[test]
    fn test_meta_uses_camel_case() {
        let meta = JobMeta {
            equipment_code: "EQ-1".to_string(),
            location: "ICU".to_string(),
            perform_date: None,
            due_date: None,
        };
        let value = serde_json::to_value(&meta).unwrap();
        assert_eq!(value, serde_json::json!({"equipmentCode": "EQ-1", "location": "ICU"}));
    }
}
