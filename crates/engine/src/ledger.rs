// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Entitlement ledger: authorization, idempotent credit accounting, and
//! admin adjustments.
//!
//! All counter mutation runs under an exclusive per-user lock, so the
//! reservation journal and the usage counters can never disagree.  Daily and
//! monthly counters roll transparently on first touch after a day or month
//! boundary.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Datelike, Days, NaiveDate, Utc};
use serde::Serialize;

use crate::error::AdmitError;
use crate::events::epoch_ms;
use crate::store::{
    month_key, AuditEntry, Plan, Reservation, ReservationState, Store, UserRecord,
};

/// Result of an authorization check.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthDecision {
    Allowed,
    Denied(AdmitError),
}

/// Result of a reserve call, keyed by request id.
#[derive(Debug, Clone, PartialEq)]
pub enum ReserveOutcome {
    /// A new credit was reserved.
    Reserved,
    /// The request id already holds a live reservation; nothing charged.
    AlreadyReserved,
    /// The request id was already finalized; nothing charged.
    Finalized(ReservationState),
    Denied(AdmitError),
}

/// Result of a commit or refund call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeOutcome {
    Applied,
    /// The reservation is already in the requested terminal state.
    AlreadyDone,
    /// The reservation is in the opposite terminal state, or unknown.
    AlreadyFinalized,
}

/// Read-only quota header shown to users.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuotaSnapshot {
    /// Monthly reports remaining; `None` means unlimited.
    pub monthly_remaining: Option<u32>,
    pub daily_used: u32,
    /// Daily cap; `None` means unlimited.
    pub daily_cap: Option<u32>,
    pub days_left: DaysLeft,
}

/// Remaining subscription time, as rendered in the progress header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DaysLeft {
    Days(u32),
    Today,
    Expired,
    Unlimited,
}

/// The entitlement ledger.
pub struct Ledger {
    store: Arc<Store>,
    locks: std::sync::Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl Ledger {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store, locks: std::sync::Mutex::new(HashMap::new()) }
    }

    /// Acquire the exclusive lock for one user's counters.
    async fn lock_user(&self, id: &str) -> tokio::sync::OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(locks.entry(id.to_owned()).or_default())
        };
        lock.lock_owned().await
    }

    /// Load a user, creating the default inactive record on first contact.
    pub async fn ensure_user(&self, id: &str) -> anyhow::Result<UserRecord> {
        let _guard = self.lock_user(id).await;
        let today = today();
        match self.store.get_user(id)? {
            Some(user) => Ok(user),
            None => {
                let user = UserRecord::new(id, today);
                self.store.put_user(&user)?;
                Ok(user)
            }
        }
    }

    /// Check whether a user may start a report run right now.
    ///
    /// Rolls stale counters as a side effect, persisting the roll.
    pub async fn authorize(&self, id: &str) -> anyhow::Result<AuthDecision> {
        let _guard = self.lock_user(id).await;
        let today = today();
        let mut user = self.load_or_new(id, today)?;
        if roll_counters(&mut user, today) {
            self.store.put_user(&user)?;
        }
        Ok(match admission_check(&user, today) {
            Some(err) => AuthDecision::Denied(err),
            None => AuthDecision::Allowed,
        })
    }

    /// Reserve one report credit under `rid`.
    ///
    /// Idempotent: a rid that already holds a reservation is a no-op
    /// success, and a finalized rid reports its terminal state without
    /// touching counters.
    pub async fn reserve(&self, id: &str, rid: &str) -> anyhow::Result<ReserveOutcome> {
        let _guard = self.lock_user(id).await;

        if let Some(existing) = self.store.get_reservation(rid)? {
            return Ok(match existing.state {
                ReservationState::Reserved => ReserveOutcome::AlreadyReserved,
                state => ReserveOutcome::Finalized(state),
            });
        }

        let today = today();
        let mut user = self.load_or_new(id, today)?;
        let rolled = roll_counters(&mut user, today);
        if let Some(err) = admission_check(&user, today) {
            if rolled {
                self.store.put_user(&user)?;
            }
            return Ok(ReserveOutcome::Denied(err));
        }

        user.daily_used += 1;
        user.monthly_used += 1;
        self.store.put_user(&user)?;
        self.store.put_reservation(&Reservation {
            request_id: rid.to_owned(),
            user_id: id.to_owned(),
            state: ReservationState::Reserved,
            created_at_ms: epoch_ms(),
            finalized_at_ms: None,
        })?;
        self.store.flush()?;
        tracing::debug!(user = %id, rid = %rid, "credit reserved");
        Ok(ReserveOutcome::Reserved)
    }

    /// Finalize a reservation as consumed.
    pub async fn commit(&self, rid: &str) -> anyhow::Result<FinalizeOutcome> {
        let Some(peek) = self.store.get_reservation(rid)? else {
            return Ok(FinalizeOutcome::AlreadyFinalized);
        };
        let _guard = self.lock_user(&peek.user_id).await;

        // Re-read under the lock; a racing finalizer may have won.
        let Some(mut reservation) = self.store.get_reservation(rid)? else {
            return Ok(FinalizeOutcome::AlreadyFinalized);
        };
        match reservation.state {
            ReservationState::Committed => Ok(FinalizeOutcome::AlreadyDone),
            ReservationState::Refunded => Ok(FinalizeOutcome::AlreadyFinalized),
            ReservationState::Reserved => {
                reservation.state = ReservationState::Committed;
                reservation.finalized_at_ms = Some(epoch_ms());

                let today = today();
                let mut user = self.load_or_new(&reservation.user_id, today)?;
                user.total_reports += 1;
                user.last_report_ts = Some(epoch_ms() / 1000);
                self.store.put_user(&user)?;
                self.store.put_reservation(&reservation)?;
                self.store.flush()?;
                tracing::debug!(user = %reservation.user_id, rid = %rid, "credit committed");
                Ok(FinalizeOutcome::Applied)
            }
        }
    }

    /// Finalize a reservation as returned: both usage counters go back down,
    /// never below zero.
    pub async fn refund(&self, rid: &str) -> anyhow::Result<FinalizeOutcome> {
        let Some(peek) = self.store.get_reservation(rid)? else {
            return Ok(FinalizeOutcome::AlreadyFinalized);
        };
        let _guard = self.lock_user(&peek.user_id).await;

        let Some(mut reservation) = self.store.get_reservation(rid)? else {
            return Ok(FinalizeOutcome::AlreadyFinalized);
        };
        match reservation.state {
            ReservationState::Refunded => Ok(FinalizeOutcome::AlreadyDone),
            ReservationState::Committed => Ok(FinalizeOutcome::AlreadyFinalized),
            ReservationState::Reserved => {
                reservation.state = ReservationState::Refunded;
                reservation.finalized_at_ms = Some(epoch_ms());

                let today = today();
                let mut user = self.load_or_new(&reservation.user_id, today)?;
                user.daily_used = user.daily_used.saturating_sub(1);
                user.monthly_used = user.monthly_used.saturating_sub(1);
                self.store.put_user(&user)?;
                self.store.put_reservation(&reservation)?;
                self.store.flush()?;
                tracing::debug!(user = %reservation.user_id, rid = %rid, "credit refunded");
                Ok(FinalizeOutcome::Applied)
            }
        }
    }

    /// Quota header snapshot for a user, with counters rolled first.
    pub async fn snapshot(&self, id: &str) -> anyhow::Result<QuotaSnapshot> {
        let _guard = self.lock_user(id).await;
        let today = today();
        let mut user = self.load_or_new(id, today)?;
        if roll_counters(&mut user, today) {
            self.store.put_user(&user)?;
        }
        Ok(snapshot_of(&user, today))
    }

    /// Stored language preference, if any.
    pub async fn preferred_language(&self, id: &str) -> anyhow::Result<Option<String>> {
        Ok(self.store.get_user(id)?.and_then(|u| u.preferred_language))
    }

    // ── Admin operations ─────────────────────────────────────────────────

    /// Activate (or re-activate) a user on a plan for `days` days.
    pub async fn activate(
        &self,
        id: &str,
        plan: Plan,
        days: u32,
        daily_cap: u32,
        monthly_cap: u32,
    ) -> anyhow::Result<UserRecord> {
        let _guard = self.lock_user(id).await;
        let today = today();
        let mut user = self.load_or_new(id, today)?;
        user.plan = plan;
        user.active = true;
        user.activation_date.get_or_insert(today);
        user.expiry_date = today.checked_add_days(Days::new(u64::from(days)));
        user.daily_cap = daily_cap;
        user.monthly_cap = monthly_cap;
        roll_counters(&mut user, today);
        self.store.put_user(&user)?;
        self.audit(id, "activate", &format!("plan={plan:?} days={days} daily={daily_cap} monthly={monthly_cap}"))?;
        Ok(user)
    }

    /// Adjust daily/monthly caps. Zero means unlimited.
    pub async fn set_limits(&self, id: &str, daily_cap: u32, monthly_cap: u32) -> anyhow::Result<UserRecord> {
        let _guard = self.lock_user(id).await;
        let mut user = self.load_or_new(id, today())?;
        user.daily_cap = daily_cap;
        user.monthly_cap = monthly_cap;
        self.store.put_user(&user)?;
        self.audit(id, "set_limits", &format!("daily={daily_cap} monthly={monthly_cap}"))?;
        Ok(user)
    }

    pub async fn deactivate(&self, id: &str) -> anyhow::Result<UserRecord> {
        let _guard = self.lock_user(id).await;
        let mut user = self.load_or_new(id, today())?;
        user.active = false;
        self.store.put_user(&user)?;
        self.audit(id, "deactivate", "")?;
        Ok(user)
    }

    /// Zero today's usage counter.
    pub async fn reset_today(&self, id: &str) -> anyhow::Result<UserRecord> {
        let _guard = self.lock_user(id).await;
        let today = today();
        let mut user = self.load_or_new(id, today)?;
        user.daily_used = 0;
        user.last_day = today;
        self.store.put_user(&user)?;
        self.audit(id, "reset_today", "")?;
        Ok(user)
    }

    /// Store a user's report language preference.
    pub async fn set_language(&self, id: &str, language: &str) -> anyhow::Result<UserRecord> {
        let _guard = self.lock_user(id).await;
        let mut user = self.load_or_new(id, today())?;
        user.preferred_language = Some(language.to_lowercase());
        self.store.put_user(&user)?;
        Ok(user)
    }

    // ── Internals ────────────────────────────────────────────────────────

    fn load_or_new(&self, id: &str, today: NaiveDate) -> anyhow::Result<UserRecord> {
        Ok(self.store.get_user(id)?.unwrap_or_else(|| UserRecord::new(id, today)))
    }

    fn audit(&self, user_id: &str, action: &str, detail: &str) -> anyhow::Result<()> {
        self.store.append_audit(&AuditEntry {
            ts_ms: epoch_ms(),
            action: action.to_owned(),
            user_id: user_id.to_owned(),
            detail: detail.to_owned(),
        })
    }
}

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

/// Reset stale counters in place. Returns whether anything changed.
pub fn roll_counters(user: &mut UserRecord, today: NaiveDate) -> bool {
    let mut changed = false;
    if user.last_day < today {
        user.daily_used = 0;
        user.last_day = today;
        changed = true;
    }
    let month = month_key(today);
    if user.last_month != month {
        user.monthly_used = 0;
        user.last_month = month;
        changed = true;
    }
    changed
}

/// Admission requires an active, unexpired plan with headroom in both caps.
pub fn admission_check(user: &UserRecord, today: NaiveDate) -> Option<AdmitError> {
    if !user.active {
        return Some(AdmitError::NotActive);
    }
    if let Some(expiry) = user.expiry_date {
        if expiry < today {
            return Some(AdmitError::Expired);
        }
    }
    if user.daily_cap > 0 && user.daily_used >= user.daily_cap {
        return Some(AdmitError::DailyLimit);
    }
    if user.monthly_cap > 0 && user.monthly_used >= user.monthly_cap {
        return Some(AdmitError::MonthlyLimit);
    }
    None
}

/// Build the quota header snapshot from a rolled record.
pub fn snapshot_of(user: &UserRecord, today: NaiveDate) -> QuotaSnapshot {
    let monthly_remaining = (user.monthly_cap > 0)
        .then(|| user.monthly_cap.saturating_sub(user.monthly_used));
    let daily_cap = (user.daily_cap > 0).then_some(user.daily_cap);
    let days_left = match user.expiry_date {
        None => DaysLeft::Unlimited,
        Some(expiry) if expiry < today => DaysLeft::Expired,
        Some(expiry) if expiry == today => DaysLeft::Today,
        Some(expiry) => {
            let days = expiry.num_days_from_ce() - today.num_days_from_ce();
            DaysLeft::Days(days.max(0) as u32)
        }
    };
    QuotaSnapshot { monthly_remaining, daily_used: user.daily_used, daily_cap, days_left }
}

#[cfg(test)]
#[path = "ledger_tests.rs"]
mod tests;
