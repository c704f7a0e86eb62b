// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Two-level admission gate.
//!
//! A run must hold a per-user permit and a global permit before it may touch
//! the upstream provider.  Acquisition order is fixed (user first, then
//! global) so two runs can never deadlock against each other, and both
//! semaphores queue FIFO.  Permits are RAII: dropping an [`Admission`]
//! releases them on every exit path, including panics and cancellation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

/// Both permits for one admitted run.
pub struct Admission {
    _user: OwnedSemaphorePermit,
    _global: OwnedSemaphorePermit,
}

/// The gate. There is no queue beyond the semaphores themselves; waiting
/// submissions are the back-pressure.
pub struct AdmissionGate {
    global: Arc<Semaphore>,
    per_user: Mutex<HashMap<String, Arc<Semaphore>>>,
    user_limit: usize,
}

impl AdmissionGate {
    pub fn new(user_limit: usize, global_limit: usize) -> Self {
        Self {
            global: Arc::new(Semaphore::new(global_limit)),
            per_user: Mutex::new(HashMap::new()),
            user_limit,
        }
    }

    fn user_semaphore(&self, user: &str) -> Arc<Semaphore> {
        let mut map = self.per_user.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(
            map.entry(user.to_owned()).or_insert_with(|| Arc::new(Semaphore::new(self.user_limit))),
        )
    }

    /// Wait for both permits, user level first.
    ///
    /// Returns `None` when `cancel` fires while waiting; a permit already
    /// held at that point is released by drop.
    pub async fn admit(&self, user: &str, cancel: &CancellationToken) -> Option<Admission> {
        let user_sem = self.user_semaphore(user);
        let user_permit = tokio::select! {
            _ = cancel.cancelled() => return None,
            permit = user_sem.acquire_owned() => permit.ok()?,
        };

        let global_permit = tokio::select! {
            _ = cancel.cancelled() => return None,
            permit = Arc::clone(&self.global).acquire_owned() => permit.ok()?,
        };

        Some(Admission { _user: user_permit, _global: global_permit })
    }

    /// Free global permits right now (observability and tests).
    pub fn global_available(&self) -> usize {
        self.global.available_permits()
    }
}

#[cfg(test)]
#[path = "gate_tests.rs"]
mod tests;
