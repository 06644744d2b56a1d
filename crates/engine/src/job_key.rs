//! Mail job identifiers.
//!
//! Keys look like `01-Mar-2025-09.05-Ward 5-EQ-001-3FA9C2D17B0E`: local time
//! to the minute (no colons), the location, the upper-cased equipment code and
//! a random hex suffix. They sort roughly by time when listed and say what the
//! job is about without opening it. The store is never consulted; the suffix
//! is the only collision defense.

use chrono::{DateTime, FixedOffset, Utc};
use rand::Rng;
use unicode_normalization::UnicodeNormalization;

/// Random bytes in the suffix.
pub const SUFFIX_BYTES: usize = 6;

const TIME_FORMAT: &str = "%d-%b-%Y-%H.%M";
const UNKNOWN_LOCATION: &str = "UNKNOWN";
const NO_CODE: &str = "NO-CODE";

pub fn generate_job_key(
    now: DateTime<Utc>,
    zone: &FixedOffset,
    location: &str,
    equipment_code: &str,
) -> String {
    let time_part = now.with_timezone(zone).format(TIME_FORMAT);

    let place = Some(sanitize(location, true))
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| UNKNOWN_LOCATION.to_string());
    let code = Some(sanitize(&equipment_code.to_uppercase(), false))
        .filter(|s| !s.is_empty() && s != "-")
        .unwrap_or_else(|| NO_CODE.to_string());

    format!("{}-{}-{}-{}", time_part, place, code, random_suffix())
}

/// NFKC-normalize, collapse whitespace (to one space or nothing), and replace
/// runs of path-hostile characters with a single `-`.
pub fn sanitize(raw: &str, keep_spaces: bool) -> String {
    let normalized: String = raw.nfkc().collect();
    let mut out = String::with_capacity(normalized.len());
    let mut pending_space = false;
    let mut in_disallowed = false;

    for ch in normalized.chars() {
        if ch.is_whitespace() {
            pending_space = keep_spaces;
            in_disallowed = false;
            continue;
        }
        if ch.is_control() {
            continue;
        }
        if pending_space {
            out.push(' ');
            pending_space = false;
        }
        if is_disallowed(ch) {
            if !in_disallowed {
                out.push('-');
                in_disallowed = true;
            }
            continue;
        }
        in_disallowed = false;
        out.push(ch);
    }

    out.trim().to_string()
}

fn is_disallowed(ch: char) -> bool {
    matches!(ch, '/' | '\\' | '#' | '?' | '[' | ']' | ':')
}

fn random_suffix() -> String {
    let bytes: [u8; SUFFIX_BYTES] = rand::thread_rng().r#gen();
    bytes.iter().map(|b| format!("{:02X}", b)).collect()
}
