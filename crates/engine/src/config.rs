// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the report-dispatch engine.
///
/// Resolved once at startup; jobs read the typed value through the clamped
/// accessors, never the environment.
#[derive(Debug, Clone, clap::Args)]
pub struct EngineConfig {
    /// Max concurrent report runs per user.
    #[arg(long, default_value_t = 2, env = "VINHUB_PER_USER_CONCURRENCY")]
    pub per_user_concurrency: usize,

    /// Max concurrent report runs across all users.
    #[arg(long, default_value_t = 4, env = "VINHUB_GLOBAL_CONCURRENCY")]
    pub global_concurrency: usize,

    /// Seconds before an in-flight entry is pruned.
    #[arg(long, default_value_t = 900, env = "VINHUB_INFLIGHT_TTL_SECS")]
    pub inflight_ttl_secs: u64,

    /// End-to-end deadline for a single report run, in seconds.
    #[arg(long, default_value_t = 120, env = "VINHUB_TOTAL_DEADLINE_SECS")]
    pub total_deadline_secs: u64,

    /// Per-attempt deadline for upstream and delivery sends, in seconds.
    #[arg(long, default_value_t = 60, env = "VINHUB_SEND_DEADLINE_SECS")]
    pub send_deadline_secs: u64,

    /// Upstream fetch attempts per run.
    #[arg(long, default_value_t = 3, env = "VINHUB_GENERATE_RETRIES")]
    pub generate_retries: u32,

    /// Delivery attempts per subscriber.
    #[arg(long, default_value_t = 3, env = "VINHUB_DELIVERY_RETRIES")]
    pub delivery_retries: u32,

    /// Progress ticker interval in milliseconds.
    #[arg(long, default_value_t = 500, env = "VINHUB_PROGRESS_TICK_MS")]
    pub progress_tick_ms: u64,

    /// Fallback report language for users with no preference.
    #[arg(long, default_value = "ar", env = "VINHUB_DEFAULT_LANG")]
    pub default_language: String,

    /// Directory for the durable user/reservation store.
    #[arg(long, default_value = "./vinhub-data", env = "VINHUB_DATA_DIR")]
    pub data_dir: PathBuf,

    /// Base URL of the report provider.
    #[arg(long, default_value = "https://reports.invalid", env = "VINHUB_UPSTREAM_URL")]
    pub upstream_url: String,

    /// Bearer token for the report provider. If unset, requests go unauthenticated.
    #[arg(long, env = "VINHUB_UPSTREAM_TOKEN")]
    pub upstream_token: Option<String>,
}

impl EngineConfig {
    /// Per-user permit count, clamped to 1–6.
    pub fn per_user_limit(&self) -> usize {
        self.per_user_concurrency.clamp(1, 6)
    }

    /// Global permit count, clamped to 1–30.
    pub fn global_limit(&self) -> usize {
        self.global_concurrency.clamp(1, 30)
    }

    pub fn inflight_ttl(&self) -> Duration {
        Duration::from_secs(self.inflight_ttl_secs)
    }

    /// Total run deadline, clamped to 10–300 s.
    pub fn total_deadline(&self) -> Duration {
        Duration::from_secs(self.total_deadline_secs.clamp(10, 300))
    }

    pub fn send_deadline(&self) -> Duration {
        Duration::from_secs(self.send_deadline_secs)
    }

    /// Upstream attempts, clamped to 1–6.
    pub fn generate_attempts(&self) -> u32 {
        self.generate_retries.clamp(1, 6)
    }

    /// Delivery attempts, clamped to 1–6.
    pub fn delivery_attempts(&self) -> u32 {
        self.delivery_retries.clamp(1, 6)
    }

    pub fn progress_tick(&self) -> Duration {
        Duration::from_millis(self.progress_tick_ms)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            per_user_concurrency: 2,
            global_concurrency: 4,
            inflight_ttl_secs: 900,
            total_deadline_secs: 120,
            send_deadline_secs: 60,
            generate_retries: 3,
            delivery_retries: 3,
            progress_tick_ms: 500,
            default_language: "ar".to_owned(),
            data_dir: PathBuf::from("./vinhub-data"),
            upstream_url: "https://reports.invalid".to_owned(),
            upstream_token: None,
        }
    }
}
