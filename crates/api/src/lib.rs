//! HTTP surface: record-created events and device registry upserts.

pub mod routes;
pub mod state;
