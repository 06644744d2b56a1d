//! Notification core: recipients, rendering, job keys, the durable queue
//! and the event sources that feed it.

pub mod enrichment;
pub mod job_key;
pub mod memory;
pub mod postgres;
pub mod queue;
pub mod recipients;
pub mod renderer;
pub mod sources;
pub mod store;

pub use memory::MemoryStore;
pub use postgres::PgStore;
pub use queue::{JobStore, MailQueue};
pub use sources::NotificationPipeline;
pub use store::{DeviceRegistry, RecordStore};
