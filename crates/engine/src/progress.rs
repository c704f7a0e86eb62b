// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-run progress channel.
//!
//! One cooperative ticker per run advances an integer percent toward a cap
//! and fans the rendered frame out to every subscriber of the (user, VIN)
//! key.  The dispatcher raises the cap when delivery starts and sends the
//! terminal 100% frame itself after stopping the ticker.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::catalog::{t, tf};
use crate::inflight::InflightRegistry;
use crate::ledger::{DaysLeft, QuotaSnapshot};
use crate::port::{ChatPort, SubscriberTarget};

/// Percent ceiling while the fetch is running.
pub const DEFAULT_CAP: u32 = 80;
/// Percent ceiling once delivery has started.
pub const DELIVERY_CAP: u32 = 95;

/// Minimum interval between unchanged-frame edits (upstream edit-rate limits).
const EDIT_KEEPALIVE: Duration = Duration::from_secs(5);

/// Width of the rendered progress bar, in cells.
const BAR_CELLS: u32 = 10;

/// Shared percent/cap state for one run.
pub struct ProgressChannel {
    percent: AtomicU32,
    cap: AtomicU32,
}

impl ProgressChannel {
    pub fn new() -> Self {
        Self { percent: AtomicU32::new(0), cap: AtomicU32::new(DEFAULT_CAP) }
    }

    /// Advance one step toward the cap and return the new percent.
    /// Monotonic: the percent never goes down, even across cap changes.
    pub fn advance(&self) -> u32 {
        let cap = self.cap.load(Ordering::Relaxed);
        let current = self.percent.load(Ordering::Relaxed);
        let next = current.max((current + step_for(cap)).min(cap));
        self.percent.store(next, Ordering::Relaxed);
        next
    }

    pub fn percent(&self) -> u32 {
        self.percent.load(Ordering::Relaxed)
    }

    /// Raise the ceiling; lowering is ignored.
    pub fn raise_cap(&self, cap: u32) {
        self.cap.fetch_max(cap, Ordering::Relaxed);
    }

    pub fn cap(&self) -> u32 {
        self.cap.load(Ordering::Relaxed)
    }
}

impl Default for ProgressChannel {
    fn default() -> Self {
        Self::new()
    }
}

/// Step size: slower near the top so the bar does not stall visibly.
pub fn step_for(cap: u32) -> u32 {
    if cap <= DEFAULT_CAP {
        5
    } else {
        3
    }
}

/// Fixed-width bar plus numeric percent, e.g. `▓▓▓▓░░░░░░ 40%`.
pub fn render_bar(percent: u32) -> String {
    let filled = (percent.min(100) * BAR_CELLS / 100) as usize;
    let mut bar = String::new();
    for _ in 0..filled {
        bar.push('▓');
    }
    for _ in filled..BAR_CELLS as usize {
        bar.push('░');
    }
    format!("{bar} {}%", percent.min(100))
}

/// Localized quota header shown above the bar.
pub fn render_header(snapshot: &QuotaSnapshot, vin: &str, lang: &str) -> String {
    let monthly = match snapshot.monthly_remaining {
        Some(n) => n.to_string(),
        None => "∞".to_owned(),
    };
    let daily = match snapshot.daily_cap {
        Some(cap) => format!("{}/{}", snapshot.daily_used, cap),
        None => "∞".to_owned(),
    };
    let days = match snapshot.days_left {
        DaysLeft::Days(n) => n.to_string(),
        DaysLeft::Today => t("progress.days.today", lang),
        DaysLeft::Expired => t("progress.days.expired", lang),
        DaysLeft::Unlimited => "∞".to_owned(),
    };
    tf(
        "progress.header",
        lang,
        &[("monthly", &monthly), ("daily", &daily), ("days", &days), ("vin", vin)],
    )
}

/// Full frame: header, bar, optional trailing note.
pub fn render_frame(header: &str, percent: u32, note: Option<&str>) -> String {
    match note {
        Some(note) => format!("{header}\n{}\n{note}", render_bar(percent)),
        None => format!("{header}\n{}", render_bar(percent)),
    }
}

/// Push one frame to every target; a failing subscriber never aborts the run.
pub async fn push_frame(port: &dyn ChatPort, targets: &[SubscriberTarget], text: &str) {
    for target in targets {
        if let Err(e) = port.edit_progress(target, text).await {
            tracing::debug!(chat = target.chat_id, err = %e, "progress edit failed");
        }
    }
}

/// Spawn the per-run ticker. It stops when `cancel` fires; the terminal
/// frame is the dispatcher's job.
pub fn spawn_ticker(
    channel: Arc<ProgressChannel>,
    port: Arc<dyn ChatPort>,
    registry: Arc<InflightRegistry>,
    user: String,
    vin: String,
    header: String,
    tick: Duration,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(tick);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut last_pushed: Option<(u32, tokio::time::Instant)> = None;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = timer.tick() => {}
            }

            let percent = channel.advance();
            let changed = last_pushed.map(|(p, _)| p != percent).unwrap_or(true);
            let stale = last_pushed.map(|(_, at)| at.elapsed() >= EDIT_KEEPALIVE).unwrap_or(true);
            if !changed && !stale {
                continue;
            }

            let text = render_frame(&header, percent, None);
            push_frame(port.as_ref(), &registry.fanout_targets(&user, &vin), &text).await;
            last_pushed = Some((percent, tokio::time::Instant::now()));
        }
    })
}

#[cfg(test)]
#[path = "progress_tests.rs"]
mod tests;
