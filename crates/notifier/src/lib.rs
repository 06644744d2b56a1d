//! Mail delivery: SMTP transport, the dispatch worker and the run lease.

pub mod lease;
pub mod scheduler;
pub mod transport;
pub mod worker;

pub use transport::{MailTransport, SmtpMailer, TransportError};
pub use worker::{Dispatcher, RunSummary, TerminalPolicy};
