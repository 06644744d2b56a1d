//! Event sources: record-created notifications and the due-date lookahead.
//!
//! Each source resolves recipients, renders a body with its display policy
//! and enqueues one job per record:
//! 1. Master created: enrich from the registry first, then notify
//! 2. Infusion pump created: model instead of type, no equipment code
//! 3. Cleaning supply created: no equipment code
//! 4. Lookahead scan: Masters due and pumps to return exactly N days ahead

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Utc};

use assetmail_common::Record;
use assetmail_common::record::fields;
use assetmail_common::time::{DayWindow, day_window, local_date};
use assetmail_common::types::{JobMeta, MailMessage, RecordKind, StoredRecord};

use crate::enrichment::enrich_from_registry;
use crate::queue::MailQueue;
use crate::recipients::resolve_recipients;
use crate::renderer::{RenderContext, RenderOptions, render_html};
use crate::store::{DeviceRegistry, RecordStore};

const MASTER_TITLE: &str = "New master loan recorded";
const INFUSION_TITLE: &str = "New infusion pump loan recorded";
const CLEANING_TITLE: &str = "New cleaning supply withdrawal";
const CALIBRATION_REMINDER_TITLE: &str = "Calibration reminder";
const RETURN_REMINDER_TITLE: &str = "Infusion pump return reminder";

const NO_CODE: &str = "-";

/// Display policy, meta and titles per record kind.
fn render_options(kind: RecordKind) -> RenderOptions {
    match kind {
        RecordKind::Master => RenderOptions::default(),
        RecordKind::InfusionPump => RenderOptions {
            hide_equipment_code: true,
            prefer_model: true,
        },
        RecordKind::CleaningSupply => RenderOptions {
            hide_equipment_code: true,
            prefer_model: false,
        },
    }
}

fn job_meta(kind: RecordKind, record: &Record, zone: &FixedOffset) -> JobMeta {
    let location = record.text(fields::LOCATION).unwrap_or_default();
    match kind {
        RecordKind::Master => JobMeta {
            equipment_code: record
                .text(fields::EQUIPMENT_CODE)
                .unwrap_or_else(|| NO_CODE.to_string()),
            location,
            perform_date: record.timestamp(fields::LATEST_CAL, zone),
            due_date: record.timestamp(fields::NEXT_CAL, zone),
        },
        RecordKind::InfusionPump => JobMeta {
            equipment_code: NO_CODE.to_string(),
            location,
            perform_date: record.timestamp(fields::BORROW_DATE, zone),
            due_date: record.timestamp(fields::RETURN_DATE, zone),
        },
        RecordKind::CleaningSupply => JobMeta {
            equipment_code: NO_CODE.to_string(),
            location,
            perform_date: None,
            due_date: None,
        },
    }
}

/// Outcome of one lookahead scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookaheadSummary {
    pub window: DayWindow,
    pub masters_matched: usize,
    pub pumps_matched: usize,
    pub enqueued: usize,
    pub failed: usize,
}

/// Outcome of persisting a new record and notifying about it.
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub record: StoredRecord,
    /// `None` when the notification step failed; the record is kept regardless.
    pub job_id: Option<String>,
}

/// Wires the event sources to the stores and the queue.
#[derive(Clone)]
pub struct NotificationPipeline {
    records: Arc<dyn RecordStore>,
    registry: Arc<dyn DeviceRegistry>,
    queue: MailQueue,
    audit_address: String,
    zone: FixedOffset,
    lookahead_days: i64,
}

impl NotificationPipeline {
    pub fn new(
        records: Arc<dyn RecordStore>,
        registry: Arc<dyn DeviceRegistry>,
        queue: MailQueue,
        audit_address: impl Into<String>,
        zone: FixedOffset,
        lookahead_days: i64,
    ) -> Self {
        Self {
            records,
            registry,
            queue,
            audit_address: audit_address.into(),
            zone,
            lookahead_days,
        }
    }

    pub fn zone(&self) -> FixedOffset {
        self.zone
    }

    /// Persist a new record, then run its record-created source.
    ///
    /// Timestamp fields are normalized before the insert. A failing
    /// notification is logged and does not undo the insert.
    pub async fn ingest_record(
        &self,
        kind: RecordKind,
        mut data: Record,
        now: DateTime<Utc>,
    ) -> anyhow::Result<IngestOutcome> {
        data.normalize_timestamps(&self.zone);
        let record = self.records.insert_record(kind, &data).await?;

        let job_id = match self.on_record_created(&record, now).await {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::error!(
                    record_id = %record.id,
                    kind = %kind,
                    error = %format!("{:#}", e),
                    "Record-created notification failed"
                );
                None
            }
        };

        Ok(IngestOutcome { record, job_id })
    }

    /// Build and enqueue the notification for a freshly created record.
    pub async fn on_record_created(
        &self,
        stored: &StoredRecord,
        now: DateTime<Utc>,
    ) -> anyhow::Result<String> {
        let (record, title) = match stored.kind {
            RecordKind::Master => (
                enrich_from_registry(self.registry.as_ref(), self.records.as_ref(), stored).await,
                MASTER_TITLE,
            ),
            RecordKind::InfusionPump => (stored.data.clone(), INFUSION_TITLE),
            RecordKind::CleaningSupply => (stored.data.clone(), CLEANING_TITLE),
        };

        let job_id = self
            .notify(stored.kind, &record, title.to_string(), title, now)
            .await?;

        tracing::info!(
            record_id = %stored.id,
            kind = %stored.kind,
            job_id = %job_id,
            "Record-created notification queued"
        );
        Ok(job_id)
    }

    /// Enqueue reminders for records due exactly `lookahead_days` from `now`.
    ///
    /// Per-record and per-query failures are logged and counted; the scan
    /// always visits every match it can read.
    pub async fn run_lookahead(&self, now: DateTime<Utc>) -> LookaheadSummary {
        let window = day_window(now, self.lookahead_days, &self.zone);
        let mut summary = LookaheadSummary {
            window,
            masters_matched: 0,
            pumps_matched: 0,
            enqueued: 0,
            failed: 0,
        };

        let mut seen = HashSet::new();
        let mut masters = Vec::new();
        for field in fields::NEXT_CAL_QUERY {
            match self.matching(RecordKind::Master, field, &window).await {
                Ok(found) => masters.extend(found.into_iter().filter(|r| seen.insert(r.id.clone()))),
                Err(_) => summary.failed += 1,
            }
        }
        summary.masters_matched = masters.len();

        let calibration_subject = format!(
            "{}-day notice: equipment calibration due (Masters)",
            self.lookahead_days
        );
        for record in &masters {
            let result = self
                .notify(
                    RecordKind::Master,
                    &record.data,
                    calibration_subject.clone(),
                    CALIBRATION_REMINDER_TITLE,
                    now,
                )
                .await;
            self.tally(&mut summary, record, result);
        }

        let pumps = match self
            .matching(RecordKind::InfusionPump, fields::RETURN_DATE_QUERY, &window)
            .await
        {
            Ok(found) => found,
            Err(_) => {
                summary.failed += 1;
                Vec::new()
            }
        };
        summary.pumps_matched = pumps.len();

        let return_subject = format!(
            "{}-day notice: infusion pump return due",
            self.lookahead_days
        );
        for record in &pumps {
            let result = self
                .notify(
                    RecordKind::InfusionPump,
                    &record.data,
                    return_subject.clone(),
                    RETURN_REMINDER_TITLE,
                    now,
                )
                .await;
            self.tally(&mut summary, record, result);
        }

        tracing::info!(
            date = %summary.window.date,
            masters = summary.masters_matched,
            pumps = summary.pumps_matched,
            enqueued = summary.enqueued,
            failed = summary.failed,
            "Lookahead scan complete"
        );
        summary
    }

    async fn matching(
        &self,
        kind: RecordKind,
        field: &str,
        window: &DayWindow,
    ) -> anyhow::Result<Vec<StoredRecord>> {
        self.records
            .records_due_between(kind, field, window.start, window.end)
            .await
            .inspect_err(|e| {
                tracing::error!(
                    kind = %kind,
                    field = %field,
                    error = %format!("{:#}", e),
                    "Lookahead query failed"
                );
            })
    }

    fn tally(
        &self,
        summary: &mut LookaheadSummary,
        record: &StoredRecord,
        result: anyhow::Result<String>,
    ) {
        match result {
            Ok(job_id) => {
                tracing::debug!(record_id = %record.id, job_id = %job_id, "Reminder queued");
                summary.enqueued += 1;
            }
            Err(e) => {
                tracing::warn!(
                    record_id = %record.id,
                    kind = %record.kind,
                    error = %format!("{:#}", e),
                    "Failed to queue reminder, skipping record"
                );
                summary.failed += 1;
            }
        }
    }

    async fn notify(
        &self,
        kind: RecordKind,
        record: &Record,
        subject: String,
        title: &str,
        now: DateTime<Utc>,
    ) -> anyhow::Result<String> {
        let recipients = resolve_recipients(record, &self.audit_address);
        let ctx = RenderContext {
            today: local_date(now, &self.zone),
            zone: self.zone,
        };
        let html = render_html(record, title, render_options(kind), &ctx);

        let message = MailMessage {
            to: recipients.to,
            bcc: recipients.bcc,
            subject,
            html,
            text: None,
        };
        let meta = job_meta(kind, record, &self.zone);

        self.queue.enqueue(&message, &meta).await
    }
}
