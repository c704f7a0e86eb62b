// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable user and reservation store backed by sled.
//!
//! Named trees:
//!   users        — user id bytes    → json(UserRecord)
//!   reservations — request id bytes → json(Reservation)
//!   audit        — u64 be bytes     → json(AuditEntry)
//!
//! The reservations tree is the exactly-once journal: its rows surviving a
//! restart is what makes reserve/commit/refund idempotent across replays.

use std::path::Path;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Subscription plan assigned by an operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Plan {
    Trial,
    Monthly,
    Custom,
}

/// Authoritative per-user entitlement state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: String,
    pub plan: Plan,
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activation_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry_date: Option<NaiveDate>,
    /// Daily report cap. Zero means unlimited.
    pub daily_cap: u32,
    /// Monthly report cap. Zero means unlimited.
    pub monthly_cap: u32,
    pub daily_used: u32,
    pub monthly_used: u32,
    /// Day the daily counter last applied to.
    pub last_day: NaiveDate,
    /// Month (`YYYY-MM`) the monthly counter last applied to.
    pub last_month: String,
    pub total_reports: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_report_ts: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_language: Option<String>,
}

impl UserRecord {
    /// A fresh, inactive record as created on first contact.
    pub fn new(id: &str, today: NaiveDate) -> Self {
        Self {
            id: id.to_owned(),
            plan: Plan::Trial,
            active: false,
            activation_date: None,
            expiry_date: None,
            daily_cap: 0,
            monthly_cap: 0,
            daily_used: 0,
            monthly_used: 0,
            last_day: today,
            last_month: month_key(today),
            total_reports: 0,
            last_report_ts: None,
            preferred_language: None,
        }
    }
}

/// `YYYY-MM` key for monthly counter roll-over.
pub fn month_key(day: NaiveDate) -> String {
    day.format("%Y-%m").to_string()
}

/// Reservation lifecycle. Terminal states are sticky.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationState {
    Reserved,
    Committed,
    Refunded,
}

/// One row of the exactly-once accounting journal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reservation {
    pub request_id: String,
    pub user_id: String,
    pub state: ReservationState,
    pub created_at_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finalized_at_ms: Option<u64>,
}

/// Audit record for admin mutations of the ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub ts_ms: u64,
    pub action: String,
    pub user_id: String,
    pub detail: String,
}

/// Persistent engine state.
pub struct Store {
    db: sled::Db,
    users: sled::Tree,
    reservations: sled::Tree,
    audit: sled::Tree,
}

impl Store {
    /// Open or create the store at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let db = sled::open(path)?;
        let users = db.open_tree("users")?;
        let reservations = db.open_tree("reservations")?;
        let audit = db.open_tree("audit")?;
        Ok(Self { db, users, reservations, audit })
    }

    // ── Users ────────────────────────────────────────────────────────────

    pub fn get_user(&self, id: &str) -> anyhow::Result<Option<UserRecord>> {
        match self.users.get(id.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn put_user(&self, user: &UserRecord) -> anyhow::Result<()> {
        let bytes = serde_json::to_vec(user)?;
        self.users.insert(user.id.as_bytes(), bytes)?;
        Ok(())
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    // ── Reservations ─────────────────────────────────────────────────────

    pub fn get_reservation(&self, rid: &str) -> anyhow::Result<Option<Reservation>> {
        match self.reservations.get(rid.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn put_reservation(&self, reservation: &Reservation) -> anyhow::Result<()> {
        let bytes = serde_json::to_vec(reservation)?;
        self.reservations.insert(reservation.request_id.as_bytes(), bytes)?;
        Ok(())
    }

    // ── Audit ────────────────────────────────────────────────────────────

    pub fn append_audit(&self, entry: &AuditEntry) -> anyhow::Result<()> {
        let key = self.db.generate_id()?.to_be_bytes();
        self.audit.insert(key, serde_json::to_vec(entry)?)?;
        Ok(())
    }

    /// All audit entries in insertion order.
    pub fn audit_entries(&self) -> anyhow::Result<Vec<AuditEntry>> {
        let mut out = Vec::new();
        for item in self.audit.iter() {
            let (_, bytes) = item?;
            out.push(serde_json::from_slice(&bytes)?);
        }
        Ok(out)
    }

    /// Flush all pending writes to disk.
    pub fn flush(&self) -> anyhow::Result<()> {
        self.db.flush()?;
        Ok(())
    }
}
