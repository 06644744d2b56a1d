//! End-to-end notification scenarios against the in-process store.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde_json::{Value, json};

use assetmail_common::Record;
use assetmail_common::record::fields;
use assetmail_common::time::{default_zone, local_to_utc, to_record_value};
use assetmail_common::types::{DeviceEntry, MailJob, RecordKind};
use assetmail_engine::{
    DeviceRegistry, JobStore, MailQueue, MemoryStore, NotificationPipeline, RecordStore,
};

const AUDIT: &str = "ops@x.com";

// ============================================================
// Helpers
// ============================================================

/// 09:00 on 1 March 2025, Bangkok.
fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 2, 0, 0).unwrap()
}

fn local_midnight(y: i32, m: u32, d: u32) -> DateTime<Utc> {
    let date = NaiveDate::from_ymd_opt(y, m, d).unwrap();
    local_to_utc(date.and_hms_opt(0, 0, 0).unwrap(), &default_zone()).unwrap()
}

fn pipeline(store: &Arc<MemoryStore>) -> NotificationPipeline {
    let zone = default_zone();
    NotificationPipeline::new(
        store.clone(),
        store.clone(),
        MailQueue::new(store.clone(), zone),
        AUDIT,
        zone,
        15,
    )
}

fn record(value: Value) -> Record {
    serde_json::from_value(value).unwrap()
}

async fn jobs(store: &MemoryStore) -> Vec<MailJob> {
    store.oldest_jobs(100).await.unwrap()
}

async fn seed(store: &MemoryStore, kind: RecordKind, value: Value) -> String {
    let mut data = record(value);
    data.normalize_timestamps(&default_zone());
    store.insert_record(kind, &data).await.unwrap().id
}

// ============================================================
// Record-created sources
// ============================================================

#[tokio::test]
async fn test_loan_record_goes_to_borrower_with_audit_bcc() {
    let store = Arc::new(MemoryStore::new());
    let outcome = pipeline(&store)
        .ingest_record(
            RecordKind::Master,
            record(json!({"BorrowerEmail": "a@x.com", "Equipment": "Scale"})),
            now(),
        )
        .await
        .unwrap();

    let jobs = jobs(&store).await;
    assert_eq!(jobs.len(), 1);
    assert_eq!(Some(jobs[0].id.clone()), outcome.job_id);
    assert_eq!(jobs[0].message.to, "a@x.com");
    assert_eq!(jobs[0].message.bcc, vec![AUDIT]);
    assert_eq!(jobs[0].attempts, 0);

    let raw = store.raw_message(&jobs[0].id).unwrap();
    assert!(!raw.contains_key("text"));
}

#[tokio::test]
async fn test_several_borrower_addresses_keep_audit_copy() {
    let store = Arc::new(MemoryStore::new());
    pipeline(&store)
        .ingest_record(
            RecordKind::InfusionPump,
            record(json!({"BorrowerEmail": "a@x.com, b@x.com"})),
            now(),
        )
        .await
        .unwrap();

    let jobs = jobs(&store).await;
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].message.to, "a@x.com");
    assert_eq!(jobs[0].message.bcc, vec!["b@x.com", AUDIT]);
}

#[tokio::test]
async fn test_master_enriched_from_registry_shows_due_date() {
    let store = Arc::new(MemoryStore::new());
    store
        .upsert_device(&DeviceEntry {
            equipment_code: "EQ-001".to_string(),
            due_date: Some(local_midnight(2025, 3, 16)),
            team: Some("Biomed".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();

    let outcome = pipeline(&store)
        .ingest_record(
            RecordKind::Master,
            record(json!({"EquipmentCode": "EQ-001", "Borrower": "Nok"})),
            now(),
        )
        .await
        .unwrap();

    let jobs = jobs(&store).await;
    assert_eq!(jobs.len(), 1);
    let html = &jobs[0].message.html;
    assert!(html.contains("Due date (next): <b>16/03/2025</b> (<b>15 days remaining</b>)"));
    assert!(html.contains("Team / department: <b>Biomed</b>"));
    assert_eq!(jobs[0].meta.due_date, Some(local_midnight(2025, 3, 16)));
    assert_eq!(jobs[0].meta.equipment_code, "EQ-001");

    // the merge is persisted on the originating record
    let stored = store.get_record(&outcome.record.id).await.unwrap().unwrap();
    assert_eq!(
        stored.data.lookup(fields::NEXT_CAL),
        Some(&to_record_value(local_midnight(2025, 3, 16)))
    );
}

#[tokio::test]
async fn test_registry_outage_still_notifies() {
    let store = Arc::new(MemoryStore::new());
    store.set_registry_down(true);

    let outcome = pipeline(&store)
        .ingest_record(
            RecordKind::Master,
            record(json!({"EquipmentCode": "EQ-001", "BorrowerEmail": "a@x.com"})),
            now(),
        )
        .await
        .unwrap();

    assert!(outcome.job_id.is_some());
    let jobs = jobs(&store).await;
    assert_eq!(jobs.len(), 1);
    assert!(!jobs[0].message.html.contains("Due date"));
}

#[tokio::test]
async fn test_cleaning_supply_hides_equipment_code() {
    let store = Arc::new(MemoryStore::new());
    pipeline(&store)
        .ingest_record(
            RecordKind::CleaningSupply,
            record(json!({
                "Item": "Alcohol 70%",
                "Taken": 3,
                "Total": 20,
                "EquipmentCode": "CS-1",
                "notifyEmails": "store@x.com"
            })),
            now(),
        )
        .await
        .unwrap();

    let jobs = jobs(&store).await;
    assert_eq!(jobs.len(), 1);
    let job = &jobs[0];
    assert_eq!(job.message.to, AUDIT);
    assert_eq!(job.message.bcc, vec!["store@x.com"]);
    assert!(!job.message.html.contains("Equipment code"));
    assert!(job.message.html.contains("Quantity taken: <b>3</b> of total: <b>20</b>"));
    assert_eq!(job.meta.equipment_code, "-");
}

#[tokio::test]
async fn test_audit_address_on_every_job() {
    let store = Arc::new(MemoryStore::new());
    let p = pipeline(&store);
    let bodies = [
        json!({"BorrowerEmail": "a@x.com"}),
        json!({"notifyEmails": ["OPS@x.com", "b@x.com"]}),
        json!({"BorrowerEmail": "ops@x.com", "NotifyEmails": "c@x.com;ops@x.com"}),
        json!({}),
    ];

    for kind in RecordKind::ALL {
        for body in &bodies {
            p.ingest_record(kind, record(body.clone()), now()).await.unwrap();
        }
    }

    let jobs = jobs(&store).await;
    assert_eq!(jobs.len(), RecordKind::ALL.len() * bodies.len());
    for job in &jobs {
        let m = &job.message;
        let in_to = m.to.eq_ignore_ascii_case(AUDIT);
        let in_bcc = m.bcc.iter().any(|b| b.eq_ignore_ascii_case(AUDIT));
        assert!(in_to || in_bcc, "audit missing from {}", job.id);
        assert!(!m.bcc.iter().any(|b| b.eq_ignore_ascii_case(&m.to)));
    }
}

// ============================================================
// Lookahead scan
// ============================================================

#[tokio::test]
async fn test_lookahead_matches_exactly_fifteen_days_ahead() {
    let store = Arc::new(MemoryStore::new());
    seed(
        &store,
        RecordKind::Master,
        json!({"dueDate": "2025-03-16", "Location": "ICU"}),
    )
    .await;
    seed(&store, RecordKind::Master, json!({"dueDate": "2025-03-17"})).await;
    seed(&store, RecordKind::Master, json!({"dueDate": "2025-03-15"})).await;

    let summary = pipeline(&store).run_lookahead(now()).await;

    assert_eq!(summary.window.date, NaiveDate::from_ymd_opt(2025, 3, 16).unwrap());
    assert_eq!(summary.masters_matched, 1);
    assert_eq!(summary.enqueued, 1);
    assert_eq!(summary.failed, 0);

    let jobs = jobs(&store).await;
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].message.subject, "15-day notice: equipment calibration due (Masters)");
    assert!(jobs[0].message.html.contains("(<b>15 days remaining</b>)"));
    assert!(jobs[0].id.contains("-ICU-NO-CODE-"));
}

#[tokio::test]
async fn test_lookahead_dedups_masters_across_field_names() {
    let store = Arc::new(MemoryStore::new());
    seed(
        &store,
        RecordKind::Master,
        json!({"dueDate": "2025-03-16", "next_cal": "2025-03-16"}),
    )
    .await;
    seed(&store, RecordKind::Master, json!({"next_cal": "16/03/2025"})).await;

    let summary = pipeline(&store).run_lookahead(now()).await;
    assert_eq!(summary.masters_matched, 2);
    assert_eq!(jobs(&store).await.len(), 2);
}

#[tokio::test]
async fn test_lookahead_reminds_pump_returns() {
    let store = Arc::new(MemoryStore::new());
    seed(
        &store,
        RecordKind::InfusionPump,
        json!({"return_date": "2025-03-16", "BorrowerEmail": "nurse@x.com", "Model": "P-1"}),
    )
    .await;
    seed(&store, RecordKind::InfusionPump, json!({"return_date": "2025-03-20"})).await;
    // a cleaning record never takes part in the scan
    seed(&store, RecordKind::CleaningSupply, json!({"return_date": "2025-03-16"})).await;

    let summary = pipeline(&store).run_lookahead(now()).await;
    assert_eq!(summary.pumps_matched, 1);
    assert_eq!(summary.masters_matched, 0);

    let jobs = jobs(&store).await;
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].message.to, "nurse@x.com");
    assert_eq!(jobs[0].message.subject, "15-day notice: infusion pump return due");
    assert!(jobs[0].message.html.contains("Infusion pump return reminder"));
    assert!(!jobs[0].message.html.contains("Equipment code"));
}

#[tokio::test]
async fn test_lookahead_with_nothing_due_enqueues_nothing() {
    let store = Arc::new(MemoryStore::new());
    let summary = pipeline(&store).run_lookahead(now()).await;
    assert_eq!(summary.enqueued, 0);
    assert!(jobs(&store).await.is_empty());
}
