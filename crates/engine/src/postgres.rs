//! PostgreSQL-backed store for records, the device registry and mail jobs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::PgPool;
use sqlx::types::Json;
use uuid::Uuid;

use assetmail_common::Record;
use assetmail_common::types::{
    DeviceEntry, JobMeta, MailJob, MailMessage, RecordKind, StoredRecord,
};

use crate::queue::JobStore;
use crate::store::{DeviceRegistry, RecordStore};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[derive(sqlx::FromRow)]
struct RecordRow {
    id: String,
    kind: RecordKind,
    data: Json<Record>,
    created_at: DateTime<Utc>,
}

impl From<RecordRow> for StoredRecord {
    fn from(row: RecordRow) -> Self {
        StoredRecord {
            id: row.id,
            kind: row.kind,
            data: row.data.0,
            created_at: row.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct JobRow {
    id: String,
    message: Json<MailMessage>,
    meta: Json<JobMeta>,
    attempts: i32,
    created_at: DateTime<Utc>,
    last_error: Option<String>,
    last_tried_at: Option<DateTime<Utc>>,
}

impl From<JobRow> for MailJob {
    fn from(row: JobRow) -> Self {
        MailJob {
            id: row.id,
            message: row.message.0,
            meta: row.meta.0,
            attempts: row.attempts,
            created_at: row.created_at,
            last_error: row.last_error,
            last_tried_at: row.last_tried_at,
        }
    }
}

#[async_trait]
impl RecordStore for PgStore {
    async fn insert_record(&self, kind: RecordKind, data: &Record) -> anyhow::Result<StoredRecord> {
        let id = Uuid::new_v4().to_string();

        let row: RecordRow = sqlx::query_as(
            r#"
            INSERT INTO records (id, kind, data)
            VALUES ($1, $2, $3)
            RETURNING id, kind, data, created_at
            "#,
        )
        .bind(&id)
        .bind(kind)
        .bind(Json(data))
        .fetch_one(&self.pool)
        .await?;

        tracing::debug!(record_id = %id, kind = %kind, "Record inserted");
        Ok(row.into())
    }

    async fn get_record(&self, id: &str) -> anyhow::Result<Option<StoredRecord>> {
        let row: Option<RecordRow> =
            sqlx::query_as("SELECT id, kind, data, created_at FROM records WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(Into::into))
    }

    async fn merge_record(&self, id: &str, fields: &Map<String, Value>) -> anyhow::Result<()> {
        let result = sqlx::query("UPDATE records SET data = data || $2 WHERE id = $1")
            .bind(id)
            .bind(Json(fields))
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            anyhow::bail!("record {} not found", id);
        }
        Ok(())
    }

    async fn records_due_between(
        &self,
        kind: RecordKind,
        field: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> anyhow::Result<Vec<StoredRecord>> {
        let rows: Vec<RecordRow> = sqlx::query_as(
            r#"
            SELECT id, kind, data, created_at
            FROM records
            WHERE kind = $1
              AND try_timestamptz(data->>$2) BETWEEN $3 AND $4
            ORDER BY created_at ASC
            "#,
        )
        .bind(kind)
        .bind(field)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }
}

#[async_trait]
impl DeviceRegistry for PgStore {
    async fn get_device(&self, equipment_code: &str) -> anyhow::Result<Option<DeviceEntry>> {
        let entry: Option<DeviceEntry> = sqlx::query_as(
            r#"
            SELECT equipment_code, perform_date, due_date, team, location,
                   notify_emails, equipment, brand, serial
            FROM device_registry
            WHERE equipment_code = $1 AND active
            "#,
        )
        .bind(equipment_code)
        .fetch_optional(&self.pool)
        .await?;

        Ok(entry)
    }

    async fn upsert_device(&self, entry: &DeviceEntry) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO device_registry
                (equipment_code, perform_date, due_date, team, location,
                 notify_emails, equipment, brand, serial, active, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, true, NOW())
            ON CONFLICT (equipment_code) DO UPDATE SET
                perform_date = COALESCE(EXCLUDED.perform_date, device_registry.perform_date),
                due_date = COALESCE(EXCLUDED.due_date, device_registry.due_date),
                team = COALESCE(EXCLUDED.team, device_registry.team),
                location = COALESCE(EXCLUDED.location, device_registry.location),
                notify_emails = CASE
                    WHEN cardinality(EXCLUDED.notify_emails) > 0 THEN EXCLUDED.notify_emails
                    ELSE device_registry.notify_emails
                END,
                equipment = COALESCE(EXCLUDED.equipment, device_registry.equipment),
                brand = COALESCE(EXCLUDED.brand, device_registry.brand),
                serial = COALESCE(EXCLUDED.serial, device_registry.serial),
                active = true,
                updated_at = NOW()
            "#,
        )
        .bind(&entry.equipment_code)
        .bind(entry.perform_date)
        .bind(entry.due_date)
        .bind(&entry.team)
        .bind(&entry.location)
        .bind(&entry.notify_emails)
        .bind(&entry.equipment)
        .bind(&entry.brand)
        .bind(&entry.serial)
        .execute(&self.pool)
        .await?;

        tracing::debug!(equipment_code = %entry.equipment_code, "Device registry entry upserted");
        Ok(())
    }
}

#[async_trait]
impl JobStore for PgStore {
    async fn insert_job(
        &self,
        id: &str,
        message: Map<String, Value>,
        meta: &JobMeta,
    ) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO mail_jobs (id, message, meta, attempts)
            VALUES ($1, $2, $3, 0)
            "#,
        )
        .bind(id)
        .bind(Json(message))
        .bind(Json(meta))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn oldest_jobs(&self, limit: i64) -> anyhow::Result<Vec<MailJob>> {
        let rows: Vec<JobRow> = sqlx::query_as(
            r#"
            SELECT id, message, meta, attempts, created_at, last_error, last_tried_at
            FROM mail_jobs
            ORDER BY created_at ASC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn delete_job(&self, id: &str) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM mail_jobs WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn record_failure(&self, id: &str, attempts: i32, error: &str) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE mail_jobs
            SET attempts = $2, last_error = $3, last_tried_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(attempts)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn dead_letter_job(&self, job: &MailJob) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO mail_jobs_dead
                (id, message, meta, attempts, created_at, last_error, last_tried_at)
            SELECT id, message, meta, attempts, created_at, last_error, last_tried_at
            FROM mail_jobs
            WHERE id = $1
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(&job.id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM mail_jobs WHERE id = $1")
            .bind(&job.id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}
