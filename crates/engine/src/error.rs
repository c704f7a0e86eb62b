// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Domain error taxonomies.
//!
//! These are values the dispatcher branches on, not exceptions: upstream and
//! authorization failures are converted into tags at the boundary where they
//! occur, and carried through results.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a submission was denied before any credit was reserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmitError {
    NotActive,
    Expired,
    DailyLimit,
    MonthlyLimit,
}

impl AdmitError {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotActive => "NOT_ACTIVE",
            Self::Expired => "EXPIRED",
            Self::DailyLimit => "DAILY_LIMIT",
            Self::MonthlyLimit => "MONTHLY_LIMIT",
        }
    }

    /// Catalog key for the user-facing rejection message.
    pub fn message_key(&self) -> &'static str {
        match self {
            Self::NotActive => "auth.not_active",
            Self::Expired => "auth.expired",
            Self::DailyLimit => "limit.daily",
            Self::MonthlyLimit => "limit.monthly",
        }
    }

    /// The quota that was exhausted, when the denial is a cap.
    pub fn limit_kind(&self) -> Option<LimitKind> {
        match self {
            Self::DailyLimit => Some(LimitKind::Daily),
            Self::MonthlyLimit => Some(LimitKind::Monthly),
            _ => None,
        }
    }
}

impl fmt::Display for AdmitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which quota a `LimitReached` event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitKind {
    Daily,
    Monthly,
}

/// Classified upstream fetch failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchErrorKind {
    Timeout,
    Upstream5xx,
    Unauthorized,
    InvalidVin,
    Malformed,
    Transport,
    Unknown,
}

impl FetchErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "TIMEOUT",
            Self::Upstream5xx => "UPSTREAM_5XX",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::InvalidVin => "INVALID_VIN",
            Self::Malformed => "MALFORMED",
            Self::Transport => "TRANSPORT",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Whether another attempt may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout | Self::Upstream5xx | Self::Malformed | Self::Transport | Self::Unknown => {
                true
            }
            Self::Unauthorized | Self::InvalidVin => false,
        }
    }

    /// Catalog key for the user-facing failure message.
    ///
    /// Unauthorized deliberately maps to the generic fetch message: token
    /// problems are an operator concern, not something users can act on.
    pub fn message_key(&self) -> &'static str {
        match self {
            Self::Timeout => "report.error.timeout",
            Self::InvalidVin => "report.error.invalid_vin",
            Self::Unauthorized | Self::Upstream5xx | Self::Malformed | Self::Transport => {
                "report.error.fetch"
            }
            Self::Unknown => "report.error.generic",
        }
    }
}

impl fmt::Display for FetchErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
