//! Recipient resolution.
//!
//! The primary recipient is the record's own notification address, falling
//! back to the audit address. When the borrower field lists several addresses
//! the first is `to` and the rest join bcc. Everyone on the record's notify
//! lists plus the audit address go to bcc. Addresses are compared case-insensitively and
//! never validated here; bad addresses surface as delivery failures.

use std::collections::HashSet;

use assetmail_common::Record;
use assetmail_common::record::fields;

/// Resolved `to` + `bcc` for one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipients {
    pub to: String,
    /// Deduplicated, first-seen order, never contains `to`.
    pub bcc: Vec<String>,
}

impl Recipients {
    /// Whether `address` is among the recipients, ignoring case.
    pub fn contains(&self, address: &str) -> bool {
        self.to.eq_ignore_ascii_case(address)
            || self.bcc.iter().any(|b| b.eq_ignore_ascii_case(address))
    }
}

pub fn resolve_recipients(record: &Record, audit_address: &str) -> Recipients {
    let audit = audit_address.trim();
    let mut borrowers = record.address_list(fields::BORROWER_EMAIL).into_iter();
    let to = borrowers.next().unwrap_or_else(|| audit.to_string());

    let mut seen: HashSet<String> = HashSet::new();
    seen.insert(to.to_lowercase());

    let bcc = borrowers
        .chain(record.address_list(fields::NOTIFY_EMAILS))
        .chain(std::iter::once(audit.to_string()))
        .filter(|addr| !addr.is_empty())
        .filter(|addr| seen.insert(addr.to_lowercase()))
        .collect();

    Recipients { to, bcc }
}
