//! Device registry upserts, the write surface for the spreadsheet importer.

use axum::extract::{Path, State};
use axum::routing::put;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use assetmail_common::Record;
use assetmail_common::error::AppError;
use assetmail_common::time::parse_timestamp;
use assetmail_common::types::DeviceEntry;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/api/devices/{code}", put(upsert_device))
}

/// Request body for a registry upsert. Every field is optional; omitted
/// fields keep their stored values.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceUpsert {
    pub perform_date: Option<Value>,
    pub due_date: Option<Value>,
    pub team: Option<String>,
    pub location: Option<String>,
    /// An array or a `,`/`;` separated string.
    pub notify_emails: Option<Value>,
    pub equipment: Option<String>,
    pub brand: Option<String>,
    pub serial: Option<String>,
}

impl DeviceUpsert {
    fn into_entry(self, code: String, state: &AppState) -> Result<DeviceEntry, AppError> {
        let zone = state.pipeline.zone();
        let date = |field: &str, value: Option<Value>| -> Result<Option<DateTime<Utc>>, AppError> {
            match value {
                None | Some(Value::Null) => Ok(None),
                Some(v) => parse_timestamp(&v, &zone)
                    .map(Some)
                    .ok_or_else(|| AppError::Validation(format!("{} is not a valid date", field))),
            }
        };

        let notify_emails = match self.notify_emails {
            Some(value) => {
                let mut holder = Record::new();
                holder.insert("notifyEmails", value);
                holder.address_list(&["notifyEmails"])
            }
            None => Vec::new(),
        };

        Ok(DeviceEntry {
            equipment_code: code,
            perform_date: date("performDate", self.perform_date)?,
            due_date: date("dueDate", self.due_date)?,
            team: trimmed(self.team),
            location: trimmed(self.location),
            notify_emails,
            equipment: trimmed(self.equipment),
            brand: trimmed(self.brand),
            serial: trimmed(self.serial),
        })
    }
}

fn trimmed(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// PUT /api/devices/:code: Create or merge a registry entry.
async fn upsert_device(
    State(state): State<AppState>,
    Path(code): Path<String>,
    Json(body): Json<DeviceUpsert>,
) -> Result<Json<DeviceEntry>, AppError> {
    let code = code.trim().to_string();
    if code.is_empty() {
        return Err(AppError::Validation("equipment code must not be blank".to_string()));
    }

    let entry = body.into_entry(code.clone(), &state)?;
    state.registry.upsert_device(&entry).await?;

    tracing::info!(equipment_code = %code, "Device registry entry updated");

    let stored = state
        .registry
        .get_device(&code)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Device {} not found", code)))?;
    Ok(Json(stored))
}
