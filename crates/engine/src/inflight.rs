// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-flight run registry.
//!
//! Tracks one entry per (user, VIN) so rapid duplicate submissions coalesce
//! onto a single upstream fetch.  The first submission becomes the primary
//! and drives the work; later ones only join the subscriber set.  Entries
//! older than the TTL are pruned before every lookup, so a crashed run can
//! never block a VIN forever.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::port::SubscriberTarget;

/// Outcome of a registration attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Registered {
    /// The entry was created; this submission drives the run.
    Primary,
    /// An equal run is already in flight; the subscriber was attached.
    Attached {
        /// Request id of the run that is doing the work.
        primary_rid: String,
    },
}

struct Entry {
    first_seen: Instant,
    primary_rid: String,
    subscribers: Vec<SubscriberTarget>,
}

/// Registry of in-flight (user, VIN) runs. One coarse lock; contention is
/// bounded by submission rate, not run duration.
pub struct InflightRegistry {
    ttl: Duration,
    inner: Mutex<HashMap<(String, String), Entry>>,
}

impl InflightRegistry {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, inner: Mutex::new(HashMap::new()) }
    }

    /// Register a run, or attach to the one already in flight.
    pub fn register(
        &self,
        user: &str,
        vin: &str,
        rid: &str,
        subscriber: SubscriberTarget,
    ) -> Registered {
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Self::prune(&mut map, self.ttl, Instant::now());

        match map.get_mut(&key(user, vin)) {
            Some(entry) => {
                if !entry.subscribers.contains(&subscriber) {
                    entry.subscribers.push(subscriber);
                }
                Registered::Attached { primary_rid: entry.primary_rid.clone() }
            }
            None => {
                map.insert(
                    key(user, vin),
                    Entry {
                        first_seen: Instant::now(),
                        primary_rid: rid.to_owned(),
                        subscribers: vec![subscriber],
                    },
                );
                Registered::Primary
            }
        }
    }

    /// Attach a subscriber to an existing run. Returns false when no run is
    /// in flight for this (user, VIN).
    pub fn attach(&self, user: &str, vin: &str, subscriber: SubscriberTarget) -> bool {
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Self::prune(&mut map, self.ttl, Instant::now());

        match map.get_mut(&key(user, vin)) {
            Some(entry) => {
                if !entry.subscribers.contains(&subscriber) {
                    entry.subscribers.push(subscriber);
                }
                true
            }
            None => false,
        }
    }

    /// Snapshot of the current subscriber set, primary first.
    pub fn fanout_targets(&self, user: &str, vin: &str) -> Vec<SubscriberTarget> {
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Self::prune(&mut map, self.ttl, Instant::now());
        map.get(&key(user, vin)).map(|e| e.subscribers.clone()).unwrap_or_default()
    }

    /// Drop the entry for a finished run.
    pub fn unregister(&self, user: &str, vin: &str) {
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        map.remove(&key(user, vin));
    }

    /// Number of live entries (after pruning).
    pub fn active_count(&self) -> usize {
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Self::prune(&mut map, self.ttl, Instant::now());
        map.len()
    }

    fn prune(map: &mut HashMap<(String, String), Entry>, ttl: Duration, now: Instant) {
        map.retain(|_, entry| now.duration_since(entry.first_seen) < ttl);
    }
}

fn key(user: &str, vin: &str) -> (String, String) {
    (user.to_owned(), vin.to_uppercase())
}

#[cfg(test)]
#[path = "inflight_tests.rs"]
mod tests;
