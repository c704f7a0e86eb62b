// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Lifecycle event bus.
//!
//! Fans out run lifecycle events to observability consumers (dashboards)
//! over a broadcast channel.  Producers never block: publishing with no
//! subscribers is a no-op.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::{FetchErrorKind, LimitKind};

/// What happened, tagged for wire consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    ReportRequested,
    ReportAdmitted,
    ReportSucceeded { remaining: Option<u32> },
    ReportFailed { reason: FetchErrorKind },
    ReportRefunded,
    LimitReached { kind: LimitKind },
}

/// A single lifecycle event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineEvent {
    pub ts_ms: u64,
    pub user: String,
    pub vin: String,
    #[serde(flatten)]
    pub kind: EventKind,
}

/// Broadcast hub for engine events.
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(256);
        Self { tx }
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    /// Publish an event. Never blocks; lagging receivers drop frames.
    pub fn publish(&self, user: &str, vin: &str, kind: EventKind) {
        let _ = self.tx.send(EngineEvent {
            ts_ms: epoch_ms(),
            user: user.to_owned(),
            vin: vin.to_owned(),
            kind,
        });
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Return current epoch millis.
pub fn epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
