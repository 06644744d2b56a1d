//! Storage contracts for records and the device registry.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use assetmail_common::Record;
use assetmail_common::types::{DeviceEntry, RecordKind, StoredRecord};

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Persist a new record under a fresh id.
    async fn insert_record(&self, kind: RecordKind, data: &Record) -> anyhow::Result<StoredRecord>;

    async fn get_record(&self, id: &str) -> anyhow::Result<Option<StoredRecord>>;

    /// Merge `fields` into the stored record, overwriting same-named keys.
    async fn merge_record(&self, id: &str, fields: &Map<String, Value>) -> anyhow::Result<()>;

    /// Records of `kind` whose `field` holds an instant within `[start, end]`.
    async fn records_due_between(
        &self,
        kind: RecordKind,
        field: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> anyhow::Result<Vec<StoredRecord>>;
}

#[async_trait]
pub trait DeviceRegistry: Send + Sync {
    async fn get_device(&self, equipment_code: &str) -> anyhow::Result<Option<DeviceEntry>>;

    /// Create or merge an entry; absent fields keep their stored values.
    async fn upsert_device(&self, entry: &DeviceEntry) -> anyhow::Result<()>;
}
