//! Record-created events.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde_json::{Value, json};

use assetmail_common::Record;
use assetmail_common::error::AppError;
use assetmail_common::types::{RecordKind, StoredRecord};

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/records/{kind}", post(create_record))
        .route("/api/records/{kind}/{id}", get(get_record))
}

fn parse_kind(raw: &str) -> Result<RecordKind, AppError> {
    RecordKind::from_collection(raw).ok_or_else(|| {
        AppError::Validation(format!(
            "unknown record collection '{}', expected one of: masters, infusion_pumps, cleaning_supplies",
            raw
        ))
    })
}

/// POST /api/records/:kind: Store a record and queue its notification.
///
/// The record is kept even if queuing the notification fails; `jobId` is
/// then `null`.
async fn create_record(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    Json(record): Json<Record>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let kind = parse_kind(&kind)?;
    if record.as_map().is_empty() {
        return Err(AppError::Validation("record body must not be empty".to_string()));
    }

    let outcome = state.pipeline.ingest_record(kind, record, Utc::now()).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "id": outcome.record.id,
            "kind": kind,
            "jobId": outcome.job_id,
        })),
    ))
}

/// GET /api/records/:kind/:id: Read a stored record, including enrichment.
async fn get_record(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, String)>,
) -> Result<Json<StoredRecord>, AppError> {
    let kind = parse_kind(&kind)?;
    match state.records.get_record(&id).await? {
        Some(record) if record.kind == kind => Ok(Json(record)),
        _ => Err(AppError::NotFound(format!("{} record {} not found", kind, id))),
    }
}
