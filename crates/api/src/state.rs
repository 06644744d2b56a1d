//! Shared application state for the Axum API server.

use std::sync::Arc;

use assetmail_engine::{DeviceRegistry, NotificationPipeline, RecordStore};

/// Application state shared across all route handlers via Axum `State`.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: NotificationPipeline,
    pub records: Arc<dyn RecordStore>,
    pub registry: Arc<dyn DeviceRegistry>,
}

impl AppState {
    pub fn new(
        pipeline: NotificationPipeline,
        records: Arc<dyn RecordStore>,
        registry: Arc<dyn DeviceRegistry>,
    ) -> Self {
        Self {
            pipeline,
            records,
            registry,
        }
    }
}
