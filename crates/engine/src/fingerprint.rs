// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Deterministic request identity.
//!
//! The request id is the sole idempotency key for accounting: equal
//! submissions hash to the same id, so a duplicate reserve is a no-op and a
//! replay after restart cannot double-charge.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use sha2::{Digest, Sha256};

/// Length of the hex digest prefix used as the request id.
const REQUEST_ID_LEN: usize = 24;

/// Compute the request id for a submission.
///
/// The digest covers the canonical JSON encoding of the inputs: keys sorted
/// (serde_json maps are ordered), compact separators, channel and language
/// lower-cased, VIN upper-cased.  `client_key` enters the payload only when
/// non-empty, so manual resubmissions can opt out of coalescing.
pub fn request_id(
    channel: &str,
    user_id: &str,
    vin: &str,
    language: &str,
    options: &BTreeMap<String, String>,
    client_key: Option<&str>,
) -> String {
    let mut payload = serde_json::Map::new();
    payload.insert("channel".to_owned(), channel.trim().to_lowercase().into());
    payload.insert("user_id".to_owned(), user_id.into());
    payload.insert("vin".to_owned(), vin.trim().to_uppercase().into());
    payload.insert("language".to_owned(), language.trim().to_lowercase().into());
    payload.insert(
        "options".to_owned(),
        serde_json::Value::Object(
            options.iter().map(|(k, v)| (k.clone(), v.clone().into())).collect(),
        ),
    );
    if let Some(key) = client_key.map(str::trim).filter(|k| !k.is_empty()) {
        payload.insert("client_key".to_owned(), key.into());
    }

    let packed = serde_json::Value::Object(payload).to_string();
    let digest = Sha256::digest(packed.as_bytes());
    let mut hex = String::with_capacity(REQUEST_ID_LEN);
    for byte in digest.iter().take(REQUEST_ID_LEN / 2) {
        let _ = write!(hex, "{byte:02x}");
    }
    hex
}

#[cfg(test)]
#[path = "fingerprint_tests.rs"]
mod tests;
