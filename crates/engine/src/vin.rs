// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! VIN normalization and grammar checks.

use std::sync::OnceLock;

use regex::Regex;

/// 17-character VIN grammar. I, O and Q are excluded by the standard.
const VIN_PATTERN: &str = r"^[A-HJ-NPR-Z0-9]{17}$";

fn vin_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        #[allow(clippy::unwrap_used)] // constant pattern
        Regex::new(VIN_PATTERN).unwrap()
    })
}

/// Normalize raw chat input into canonical VIN form: uppercase, with
/// whitespace and separator characters stripped.
pub fn normalize_vin(raw: &str) -> String {
    raw.trim()
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-' && *c != '.')
        .collect::<String>()
        .to_uppercase()
}

/// Whether a normalized VIN matches the grammar.
pub fn is_valid_vin(vin: &str) -> bool {
    vin_re().is_match(vin)
}

#[cfg(test)]
#[path = "vin_tests.rs"]
mod tests;
