//! Registry enrichment for Master records.
//!
//! A Master record may lack calibration dates, team, location or a notify
//! list that the device registry already knows. Missing fields are filled
//! from the registry entry with the same equipment code and written back onto
//! the stored record. Enrichment is best-effort: any failure is logged and the
//! record's own fields are used as-is.

use serde_json::{Map, Value};

use assetmail_common::Record;
use assetmail_common::record::fields;
use assetmail_common::time::to_record_value;
use assetmail_common::types::{DeviceEntry, StoredRecord};

use crate::store::{DeviceRegistry, RecordStore};

/// Key the canonical equipment code is written under.
const CANONICAL_CODE_KEY: &str = "EquipmentCode";

/// Fields of `entry` the record does not carry yet.
pub fn registry_patch(record: &Record, entry: &DeviceEntry) -> Map<String, Value> {
    let mut patch = Map::new();

    if !record.has(fields::LATEST_CAL) {
        if let Some(perform) = entry.perform_date {
            patch.insert("performDate".to_string(), to_record_value(perform));
        }
    }
    if !record.has(fields::NEXT_CAL) {
        if let Some(due) = entry.due_date {
            patch.insert("dueDate".to_string(), to_record_value(due));
        }
    }
    if !record.has(fields::TEAM) {
        if let Some(team) = non_blank(entry.team.as_deref()) {
            patch.insert("Team".to_string(), Value::String(team));
        }
    }
    if !record.has(&[CANONICAL_CODE_KEY]) {
        if let Some(code) = non_blank(Some(&entry.equipment_code)) {
            patch.insert(CANONICAL_CODE_KEY.to_string(), Value::String(code));
        }
    }
    if !record.has(fields::LOCATION) {
        if let Some(location) = non_blank(entry.location.as_deref()) {
            patch.insert("Location".to_string(), Value::String(location));
        }
    }
    if record.address_list(fields::NOTIFY_EMAILS).is_empty() && !entry.notify_emails.is_empty() {
        let list = entry
            .notify_emails
            .iter()
            .cloned()
            .map(Value::String)
            .collect();
        patch.insert("notifyEmails".to_string(), Value::Array(list));
    }

    patch
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Fill a Master record from the registry and persist the additions.
///
/// Returns the record the notification should be built from. The registry
/// patch is applied in memory even when persisting it fails.
pub async fn enrich_from_registry(
    registry: &dyn DeviceRegistry,
    records: &dyn RecordStore,
    stored: &StoredRecord,
) -> Record {
    let mut record = stored.data.clone();

    let Some(code) = record.text(fields::EQUIPMENT_CODE) else {
        return record;
    };

    let entry = match registry.get_device(&code).await {
        Ok(Some(entry)) => entry,
        Ok(None) => {
            tracing::debug!(record_id = %stored.id, equipment_code = %code, "No registry entry");
            return record;
        }
        Err(e) => {
            tracing::error!(
                record_id = %stored.id,
                equipment_code = %code,
                error = %e,
                "Registry lookup failed, continuing without enrichment"
            );
            return record;
        }
    };

    let patch = registry_patch(&record, &entry);
    if patch.is_empty() {
        return record;
    }

    if let Err(e) = records.merge_record(&stored.id, &patch).await {
        tracing::error!(
            record_id = %stored.id,
            equipment_code = %code,
            error = %e,
            "Failed to persist registry enrichment"
        );
    } else {
        tracing::info!(
            record_id = %stored.id,
            equipment_code = %code,
            fields = patch.len(),
            "Record enriched from registry"
        );
    }

    record.merge(patch);
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use assetmail_common::types::RecordKind;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn entry() -> DeviceEntry {
        DeviceEntry {
            equipment_code: "EQ-001".to_string(),
            perform_date: Some(Utc.with_ymd_and_hms(2024, 3, 15, 17, 0, 0).unwrap()),
            due_date: Some(Utc.with_ymd_and_hms(2025, 3, 15, 17, 0, 0).unwrap()),
            team: Some("Biomed".to_string()),
            location: Some("Ward 5".to_string()),
            notify_emails: vec!["team@x.com".to_string()],
            ..Default::default()
        }
    }

    fn record(value: Value) -> Record {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_patch_fills_only_missing_fields() {
        let r = record(json!({
            "Code": "EQ-001",
            "next_cal": "2025-06-01",
            "team": "Lab",
            "NotifyEmails": "own@x.com"
        }));
        let patch = registry_patch(&r, &entry());

        assert_eq!(patch["performDate"], json!("2024-03-15T17:00:00.000Z"));
        assert_eq!(patch["EquipmentCode"], json!("EQ-001"));
        assert_eq!(patch["Location"], json!("Ward 5"));
        assert!(!patch.contains_key("dueDate"));
        assert!(!patch.contains_key("Team"));
        assert!(!patch.contains_key("notifyEmails"));
    }

    #[test]
    fn test_patch_empty_when_record_complete() {
        let r = record(json!({
            "EquipmentCode": "EQ-001",
            "performDate": "2024-01-01",
            "dueDate": "2025-01-01",
            "Team": "Lab",
            "Location": "OR",
            "notifyEmails": ["own@x.com"]
        }));
        assert!(registry_patch(&r, &entry()).is_empty());
    }

    #[tokio::test]
    async fn test_enrichment_is_persisted() {
        let store = MemoryStore::new();
        store.upsert_device(&entry()).await.unwrap();
        let stored = store
            .insert_record(RecordKind::Master, &record(json!({"EquipmentCode": "EQ-001"})))
            .await
            .unwrap();

        let enriched = enrich_from_registry(&store, &store, &stored).await;
        assert_eq!(enriched.text(fields::TEAM).as_deref(), Some("Biomed"));

        let reread = store.get_record(&stored.id).await.unwrap().unwrap();
        assert_eq!(reread.data, enriched);
        assert_eq!(
            reread.data.address_list(fields::NOTIFY_EMAILS),
            vec!["team@x.com"]
        );
    }

    #[tokio::test]
    async fn test_registry_failure_is_swallowed() {
        let store = MemoryStore::new();
        store.upsert_device(&entry()).await.unwrap();
        store.set_registry_down(true);
        let original = record(json!({"EquipmentCode": "EQ-001", "Borrower": "Nok"}));
        let stored = store
            .insert_record(RecordKind::Master, &original)
            .await
            .unwrap();

        let enriched = enrich_from_registry(&store, &store, &stored).await;
        assert_eq!(enriched, original);
    }
}
