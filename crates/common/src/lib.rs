//! Shared building blocks for the AssetMail services.

pub mod config;
pub mod db;
pub mod error;
pub mod record;
pub mod time;
pub mod types;

pub use record::Record;
