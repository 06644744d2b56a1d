pub mod devices;
pub mod health;
pub mod records;

use axum::Router;

use crate::state::AppState;

/// Build the complete API router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(health::router())
        .merge(records::router())
        .merge(devices::router())
        .with_state(state)
}
