//! Content fingerprints for duplicate detection.
//!
//! The fingerprint is a SHA-256 hex digest over the seven identity fields of
//! a [`TollFields`], in a fixed order:
//!
//! `date(YYYY-MM-DD)|time|entrance_ic|exit_ic|toll_amount|car_number|etc_card_number`
//!
//! Each field is written as `{byte length}:{value}` before joining, so a `|`
//! inside a gate name cannot shift text from one field into the next.
//!
//! Anything else on a record (device id, source row link, ids, timestamps)
//! does not participate.

use sha2::{Digest, Sha256};

use crate::record::TollFields;

/// Length of a fingerprint in hex characters.
pub const FINGERPRINT_LEN: usize = 64;

pub fn fingerprint(fields: &TollFields) -> String {
    let canonical = canonical_string(fields);
    let digest = Sha256::digest(canonical.as_bytes());
    format!("{digest:x}")
}

fn canonical_string(fields: &TollFields) -> String {
    let parts = [
        fields.date.format("%Y-%m-%d").to_string(),
        fields.time.clone(),
        fields.entrance_ic.clone(),
        fields.exit_ic.clone(),
        fields.toll_amount.to_string(),
        fields.car_number.clone(),
        fields.etc_card_number.clone(),
    ];
    parts
        .iter()
        .map(|part| format!("{}:{part}", part.len()))
        .collect::<Vec<_>>()
        .join("|")
}

/// Whether `s` has the shape of a fingerprint (64 lower-case hex chars).
pub fn is_fingerprint(s: &str) -> bool {
    s.len() == FINGERPRINT_LEN && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}
