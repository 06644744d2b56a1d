//! Durable mail queue, enqueue side.
//!
//! Jobs are written once by an event source and afterwards touched only by
//! the dispatch worker. Enqueue does no read-before-write: the generated key
//! is assumed unique.

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{FixedOffset, Utc};
use serde_json::{Map, Value};

use assetmail_common::types::{JobMeta, MailJob, MailMessage};

use crate::job_key::generate_job_key;

/// Storage contract for mail jobs.
///
/// `created_at` and `last_tried_at` are assigned by the store.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a new job with `attempts = 0`.
    async fn insert_job(
        &self,
        id: &str,
        message: Map<String, Value>,
        meta: &JobMeta,
    ) -> anyhow::Result<()>;

    /// Up to `limit` pending jobs, oldest `created_at` first.
    async fn oldest_jobs(&self, limit: i64) -> anyhow::Result<Vec<MailJob>>;

    async fn delete_job(&self, id: &str) -> anyhow::Result<()>;

    /// Store the new attempt count and error, stamping `last_tried_at`.
    async fn record_failure(&self, id: &str, attempts: i32, error: &str) -> anyhow::Result<()>;

    /// Move an exhausted job out of the queue into the dead-letter namespace.
    async fn dead_letter_job(&self, job: &MailJob) -> anyhow::Result<()>;
}

/// Enqueue handle shared by the event sources.
#[derive(Clone)]
pub struct MailQueue {
    store: Arc<dyn JobStore>,
    zone: FixedOffset,
}

impl MailQueue {
    pub fn new(store: Arc<dyn JobStore>, zone: FixedOffset) -> Self {
        Self { store, zone }
    }

    /// Persist `message` as a pending job and return its id.
    pub async fn enqueue(&self, message: &MailMessage, meta: &JobMeta) -> anyhow::Result<String> {
        let body = compact_message(message)?;
        let id = generate_job_key(Utc::now(), &self.zone, &meta.location, &meta.equipment_code);

        self.store
            .insert_job(&id, body, meta)
            .await
            .with_context(|| format!("failed to enqueue mail job {}", id))?;

        tracing::info!(
            job_id = %id,
            to = %message.to,
            bcc = message.bcc.len(),
            subject = %message.subject,
            "Mail job enqueued"
        );

        Ok(id)
    }
}

/// Serialize a message, dropping nulls and empty collections.
pub fn compact_message(message: &MailMessage) -> anyhow::Result<Map<String, Value>> {
    let value = serde_json::to_value(message).context("failed to serialize mail message")?;
    let Value::Object(mut map) = value else {
        anyhow::bail!("mail message did not serialize to an object");
    };
    map.retain(|_, v| match v {
        Value::Null => false,
        Value::Array(items) => !items.is_empty(),
        Value::Object(fields) => !fields.is_empty(),
        _ => true,
    });
    Ok(map)
}
