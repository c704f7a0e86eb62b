// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Upstream report fetch: HTTP client, failure classification, and the
//! shared retry schedule.
//!
//! Provider exceptions never escape this module; every attempt collapses
//! into a [`ReportOutcome`] the dispatcher can branch on.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use tokio::time::Instant;

use crate::catalog::t;
use crate::error::FetchErrorKind;

/// Capped backoff schedule shared by upstream fetch and PDF delivery.
pub const RETRY_BACKOFF_SECS: [u64; 6] = [0, 1, 3, 7, 12, 20];

/// Delay before the given attempt (0-based). Attempts beyond the schedule
/// reuse the final slot.
pub fn backoff_delay(attempt: usize) -> Duration {
    Duration::from_secs(RETRY_BACKOFF_SECS[attempt.min(RETRY_BACKOFF_SECS.len() - 1)])
}

/// Result of one upstream fetch, classified.
#[derive(Debug, Clone, Default)]
pub struct ReportOutcome {
    pub success: bool,
    pub pdf: Option<Bytes>,
    pub filename: Option<String>,
    pub errors: Vec<FetchErrorKind>,
    /// Explicit provider message meant for the end user.
    pub user_message: Option<String>,
    pub raw_status: Option<u16>,
}

impl ReportOutcome {
    pub fn failure(kind: FetchErrorKind, raw_status: Option<u16>) -> Self {
        Self { errors: vec![kind], raw_status, ..Self::default() }
    }

    pub fn primary_error(&self) -> FetchErrorKind {
        self.errors.first().copied().unwrap_or(FetchErrorKind::Unknown)
    }

    /// Whether another attempt may succeed.
    ///
    /// Permanent: unauthorized, rejected VIN, or an unclassified failure that
    /// carries an explicit provider message.  An empty error list counts as
    /// transient.
    pub fn is_retryable(&self) -> bool {
        if self.success {
            return false;
        }
        if self.errors.iter().any(|kind| !kind.is_transient()) {
            return false;
        }
        if self.errors.iter().all(|kind| *kind == FetchErrorKind::Unknown)
            && !self.errors.is_empty()
            && self.user_message.is_some()
        {
            return false;
        }
        true
    }

    /// Localized failure text for the terminal frame.
    pub fn user_text(&self, lang: &str) -> String {
        match self.primary_error() {
            FetchErrorKind::Unauthorized => t("report.error.fetch", lang),
            FetchErrorKind::Timeout => t("report.error.timeout", lang),
            FetchErrorKind::InvalidVin => t("report.error.invalid_vin", lang),
            kind => self
                .user_message
                .clone()
                .unwrap_or_else(|| t(kind.message_key(), lang)),
        }
    }
}

/// One upstream fetch attempt under a per-attempt deadline.
#[async_trait]
pub trait ReportFetcher: Send + Sync {
    async fn fetch(&self, vin: &str, language: &str, attempt_deadline: Duration) -> ReportOutcome;
}

/// HTTP client for the report provider.
pub struct UpstreamClient {
    base_url: String,
    auth_token: Option<String>,
    client: Client,
}

impl UpstreamClient {
    pub fn new(base_url: String, auth_token: Option<String>) -> Self {
        // Per-attempt timeouts are applied per request; no client-wide cap.
        let client = Client::builder().build().unwrap_or_default();
        Self { base_url: base_url.trim_end_matches('/').to_owned(), auth_token, client }
    }
}

#[async_trait]
impl ReportFetcher for UpstreamClient {
    async fn fetch(&self, vin: &str, language: &str, attempt_deadline: Duration) -> ReportOutcome {
        let req = self
            .client
            .get(format!("{}/api/v1/report", self.base_url))
            .query(&[("vin", vin), ("lang", language)])
            .timeout(attempt_deadline);
        let req = match &self.auth_token {
            Some(token) => req.bearer_auth(token),
            None => req,
        };

        let resp = match req.send().await {
            Ok(resp) => resp,
            Err(e) => return classify_send_error(&e),
        };

        let status = resp.status().as_u16();
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let body = match resp.bytes().await {
            Ok(body) => body,
            Err(e) => return classify_send_error(&e),
        };

        classify_response(vin, language, status, content_type.as_deref(), body)
    }
}

fn classify_send_error(err: &reqwest::Error) -> ReportOutcome {
    let kind =
        if err.is_timeout() { FetchErrorKind::Timeout } else { FetchErrorKind::Transport };
    tracing::debug!(err = %err, "upstream request failed");
    ReportOutcome::failure(kind, err.status().map(|s| s.as_u16()))
}

/// Map an HTTP response into the outcome taxonomy.
pub(crate) fn classify_response(
    vin: &str,
    language: &str,
    status: u16,
    content_type: Option<&str>,
    body: Bytes,
) -> ReportOutcome {
    if status == 200 {
        let looks_pdf = content_type.is_some_and(|ct| ct.contains("pdf"))
            || body.starts_with(b"%PDF");
        if looks_pdf && !body.is_empty() {
            return ReportOutcome {
                success: true,
                filename: Some(format!("report_{vin}_{language}.pdf")),
                pdf: Some(body),
                raw_status: Some(status),
                ..ReportOutcome::default()
            };
        }
        let mut outcome = ReportOutcome::failure(FetchErrorKind::Malformed, Some(status));
        outcome.user_message = body_message(&body);
        return outcome;
    }

    let (codes, message) = body_errors(&body);
    let kind = if status == 401 || status == 403 || codes.iter().any(|c| c.contains("invalid_token"))
    {
        FetchErrorKind::Unauthorized
    } else if codes.iter().any(|c| c.contains("invalid_vin")) {
        FetchErrorKind::InvalidVin
    } else if status >= 500 {
        FetchErrorKind::Upstream5xx
    } else {
        FetchErrorKind::Unknown
    };

    let mut outcome = ReportOutcome::failure(kind, Some(status));
    outcome.user_message = message;
    outcome
}

/// Error codes and user message from a JSON error body, when present.
fn body_errors(body: &[u8]) -> (Vec<String>, Option<String>) {
    let Ok(value) = serde_json::from_slice::<serde_json::Value>(body) else {
        return (Vec::new(), None);
    };
    let codes = value
        .get("errors")
        .and_then(|e| e.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(str::to_lowercase))
                .collect()
        })
        .unwrap_or_default();
    let message = value
        .get("message")
        .and_then(|m| m.as_str())
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(str::to_owned);
    (codes, message)
}

fn body_message(body: &[u8]) -> Option<String> {
    body_errors(body).1
}

/// Drive a fetcher through the retry schedule inside the run's deadline.
///
/// Per-attempt budget is `min(remaining, send_deadline)`.  Stops early on
/// success, on a permanent failure, or when the next backoff would cross the
/// deadline; in the last case the caller sees a timeout.
pub async fn fetch_with_retries(
    fetcher: &dyn ReportFetcher,
    vin: &str,
    language: &str,
    attempts: u32,
    deadline: Instant,
    send_deadline: Duration,
) -> ReportOutcome {
    let mut last: Option<ReportOutcome> = None;

    for attempt in 0..attempts {
        let delay = backoff_delay(attempt as usize);
        if !delay.is_zero() {
            if Instant::now() + delay >= deadline {
                break;
            }
            tokio::time::sleep(delay).await;
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }

        let outcome = fetcher.fetch(vin, language, remaining.min(send_deadline)).await;
        let finished = outcome.success || !outcome.is_retryable();
        if !finished {
            tracing::warn!(
                vin,
                attempt = attempt + 1,
                kind = %outcome.primary_error(),
                "report fetch attempt failed, will retry"
            );
        }
        last = Some(outcome);
        if finished {
            break;
        }
    }

    last.unwrap_or_else(|| ReportOutcome::failure(FetchErrorKind::Timeout, None))
}

#[cfg(test)]
#[path = "fetcher_tests.rs"]
mod tests;
