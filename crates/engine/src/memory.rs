//! In-process store used by tests and local runs without Postgres.
//!
//! Mirrors the semantics of [`crate::postgres::PgStore`]: store-assigned
//! timestamps, oldest-first job listing and merge-on-upsert registry entries.
//! Store-assigned timestamps are strictly increasing so insertion order is
//! also `created_at` order.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, TimeDelta, Utc};
use serde_json::{Map, Value};
use uuid::Uuid;

use assetmail_common::Record;
use assetmail_common::time::{default_zone, parse_timestamp};
use assetmail_common::types::{
    DeviceEntry, JobMeta, MailJob, MailMessage, RecordKind, StoredRecord,
};

use crate::queue::JobStore;
use crate::store::{DeviceRegistry, RecordStore};

struct StoredJob {
    job: MailJob,
    raw: Map<String, Value>,
}

#[derive(Default)]
struct State {
    records: Vec<StoredRecord>,
    devices: HashMap<String, DeviceEntry>,
    jobs: Vec<StoredJob>,
    dead: Vec<MailJob>,
    last_stamp: Option<DateTime<Utc>>,
    failing_jobs: HashSet<String>,
    registry_down: bool,
}

impl State {
    fn stamp(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let stamp = match self.last_stamp {
            Some(last) if now <= last => last + TimeDelta::microseconds(1),
            _ => now,
        };
        self.last_stamp = Some(stamp);
        stamp
    }

    fn check_job_writable(&self, id: &str) -> anyhow::Result<()> {
        if self.failing_jobs.contains(id) {
            anyhow::bail!("write rejected for job {}", id);
        }
        Ok(())
    }
}

pub struct MemoryStore {
    state: Mutex<State>,
    /// Zone for reading record dates that were not normalized at ingest.
    zone: FixedOffset,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::with_zone(default_zone())
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_zone(zone: FixedOffset) -> Self {
        Self {
            state: Mutex::new(State::default()),
            zone,
        }
    }

    fn state(&self) -> anyhow::Result<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store lock poisoned"))
    }

    /// The message exactly as it was written at enqueue time.
    pub fn raw_message(&self, id: &str) -> Option<Map<String, Value>> {
        let state = self.state().ok()?;
        state
            .jobs
            .iter()
            .find(|j| j.job.id == id)
            .map(|j| j.raw.clone())
    }

    /// Jobs moved to the dead-letter namespace, in move order.
    pub fn dead_letters(&self) -> Vec<MailJob> {
        self.state().map(|s| s.dead.clone()).unwrap_or_default()
    }

    /// Overwrite a job's attempt count.
    pub fn set_attempts(&self, id: &str, attempts: i32) {
        if let Ok(mut state) = self.state() {
            if let Some(stored) = state.jobs.iter_mut().find(|j| j.job.id == id) {
                stored.job.attempts = attempts;
            }
        }
    }

    /// Make every subsequent write to job `id` fail.
    pub fn fail_writes_for(&self, id: &str) {
        if let Ok(mut state) = self.state() {
            state.failing_jobs.insert(id.to_string());
        }
    }

    /// Make registry reads fail until reset.
    pub fn set_registry_down(&self, down: bool) {
        if let Ok(mut state) = self.state() {
            state.registry_down = down;
        }
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn insert_record(&self, kind: RecordKind, data: &Record) -> anyhow::Result<StoredRecord> {
        let mut state = self.state()?;
        let record = StoredRecord {
            id: Uuid::new_v4().to_string(),
            kind,
            data: data.clone(),
            created_at: state.stamp(),
        };
        state.records.push(record.clone());
        Ok(record)
    }

    async fn get_record(&self, id: &str) -> anyhow::Result<Option<StoredRecord>> {
        let state = self.state()?;
        Ok(state.records.iter().find(|r| r.id == id).cloned())
    }

    async fn merge_record(&self, id: &str, fields: &Map<String, Value>) -> anyhow::Result<()> {
        let mut state = self.state()?;
        let Some(record) = state.records.iter_mut().find(|r| r.id == id) else {
            anyhow::bail!("record {} not found", id);
        };
        record.data.merge(fields.clone());
        Ok(())
    }

    async fn records_due_between(
        &self,
        kind: RecordKind,
        field: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> anyhow::Result<Vec<StoredRecord>> {
        let state = self.state()?;
        Ok(state
            .records
            .iter()
            .filter(|r| r.kind == kind)
            .filter(|r| {
                r.data
                    .as_map()
                    .get(field)
                    .and_then(|v| parse_timestamp(v, &self.zone))
                    .is_some_and(|t| t >= start && t <= end)
            })
            .cloned()
            .collect())
    }
}

#[async_trait]
impl DeviceRegistry for MemoryStore {
    async fn get_device(&self, equipment_code: &str) -> anyhow::Result<Option<DeviceEntry>> {
        let state = self.state()?;
        if state.registry_down {
            anyhow::bail!("device registry unavailable");
        }
        Ok(state.devices.get(equipment_code).cloned())
    }

    async fn upsert_device(&self, entry: &DeviceEntry) -> anyhow::Result<()> {
        let mut state = self.state()?;
        let merged = match state.devices.remove(&entry.equipment_code) {
            Some(existing) => DeviceEntry {
                equipment_code: entry.equipment_code.clone(),
                perform_date: entry.perform_date.or(existing.perform_date),
                due_date: entry.due_date.or(existing.due_date),
                team: entry.team.clone().or(existing.team),
                location: entry.location.clone().or(existing.location),
                notify_emails: if entry.notify_emails.is_empty() {
                    existing.notify_emails
                } else {
                    entry.notify_emails.clone()
                },
                equipment: entry.equipment.clone().or(existing.equipment),
                brand: entry.brand.clone().or(existing.brand),
                serial: entry.serial.clone().or(existing.serial),
            },
            None => entry.clone(),
        };
        state.devices.insert(merged.equipment_code.clone(), merged);
        Ok(())
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn insert_job(
        &self,
        id: &str,
        message: Map<String, Value>,
        meta: &JobMeta,
    ) -> anyhow::Result<()> {
        let parsed: MailMessage = serde_json::from_value(Value::Object(message.clone()))?;
        let mut state = self.state()?;
        if state.jobs.iter().any(|j| j.job.id == id) {
            anyhow::bail!("job {} already exists", id);
        }
        let created_at = state.stamp();
        state.jobs.push(StoredJob {
            job: MailJob {
                id: id.to_string(),
                message: parsed,
                meta: meta.clone(),
                attempts: 0,
                created_at,
                last_error: None,
                last_tried_at: None,
            },
            raw: message,
        });
        Ok(())
    }

    async fn oldest_jobs(&self, limit: i64) -> anyhow::Result<Vec<MailJob>> {
        let state = self.state()?;
        let mut jobs: Vec<MailJob> = state.jobs.iter().map(|j| j.job.clone()).collect();
        jobs.sort_by_key(|j| j.created_at);
        jobs.truncate(usize::try_from(limit.max(0)).unwrap_or(0));
        Ok(jobs)
    }

    async fn delete_job(&self, id: &str) -> anyhow::Result<()> {
        let mut state = self.state()?;
        state.check_job_writable(id)?;
        state.jobs.retain(|j| j.job.id != id);
        Ok(())
    }

    async fn record_failure(&self, id: &str, attempts: i32, error: &str) -> anyhow::Result<()> {
        let mut state = self.state()?;
        state.check_job_writable(id)?;
        let tried_at = state.stamp();
        if let Some(stored) = state.jobs.iter_mut().find(|j| j.job.id == id) {
            stored.job.attempts = attempts;
            stored.job.last_error = Some(error.to_string());
            stored.job.last_tried_at = Some(tried_at);
        }
        Ok(())
    }

    async fn dead_letter_job(&self, job: &MailJob) -> anyhow::Result<()> {
        let mut state = self.state()?;
        state.check_job_writable(&job.id)?;
        let Some(pos) = state.jobs.iter().position(|j| j.job.id == job.id) else {
            return Ok(());
        };
        let stored = state.jobs.remove(pos);
        if !state.dead.iter().any(|d| d.id == stored.job.id) {
            state.dead.push(stored.job);
        }
        Ok(())
    }
}
