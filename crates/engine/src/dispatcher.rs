// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The dispatcher: one engine object owning all shared state, and the
//! per-run state machine.
//!
//! A run walks Received → Authorized → Reserved → Admitted → Running →
//! Delivering → Finalized.  Failures before the reservation reject without
//! touching counters; failures after it always refund.  Every exit path runs
//! the finalizer: refund unless committed, terminal frame, in-flight entry
//! unregistered, permits released by drop.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::catalog::{resolve_language, t};
use crate::config::EngineConfig;
use crate::error::FetchErrorKind;
use crate::events::{EngineEvent, EventBus, EventKind};
use crate::fetcher::{
    backoff_delay, fetch_with_retries, ReportFetcher, ReportOutcome, UpstreamClient,
};
use crate::fingerprint::request_id;
use crate::gate::AdmissionGate;
use crate::inflight::{InflightRegistry, Registered};
use crate::ledger::{AuthDecision, FinalizeOutcome, Ledger, QuotaSnapshot, ReserveOutcome};
use crate::port::{ChatPort, SubscriberTarget};
use crate::progress::{self, ProgressChannel, DELIVERY_CAP};
use crate::store::Store;
use crate::vin::{is_valid_vin, normalize_vin};

/// A report submission from a chat adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Originating platform, e.g. `telegram` or `whatsapp`.
    pub channel: String,
    pub user_id: String,
    pub vin: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub options: BTreeMap<String, String>,
    /// Optional caller key to opt a manual resubmission out of coalescing.
    #[serde(default)]
    pub client_key: Option<String>,
    pub subscriber: SubscriberTarget,
}

/// Immediate acknowledgement for a submission.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Submitted {
    /// This submission drives a new run.
    Registered { request_id: String },
    /// Joined an equal run already in flight.
    Attached,
    /// Denied before any credit was reserved; `reason` is localized.
    Rejected { reason: String },
}

/// How a run ended. Everything except `Succeeded` refunds.
enum RunEnd {
    Succeeded { remaining: Option<u32> },
    FetchFailed(ReportOutcome),
    DeliveryFailed,
    DeadlineExceeded,
    Cancelled,
    Internal,
}

struct RunContext {
    user_id: String,
    vin: String,
    lang: String,
    rid: String,
}

/// The report-dispatch engine. One instance per process, injected into every
/// chat adapter.
pub struct Engine {
    config: EngineConfig,
    store: Arc<Store>,
    ledger: Ledger,
    inflight: Arc<InflightRegistry>,
    gate: AdmissionGate,
    events: EventBus,
    fetcher: Arc<dyn ReportFetcher>,
    port: Arc<dyn ChatPort>,
    shutdown: CancellationToken,
}

impl Engine {
    /// Build an engine over an already-open store and injected collaborators.
    pub fn new(
        config: EngineConfig,
        store: Arc<Store>,
        fetcher: Arc<dyn ReportFetcher>,
        port: Arc<dyn ChatPort>,
    ) -> Arc<Self> {
        let ledger = Ledger::new(Arc::clone(&store));
        let inflight = Arc::new(InflightRegistry::new(config.inflight_ttl()));
        let gate = AdmissionGate::new(config.per_user_limit(), config.global_limit());
        Arc::new(Self {
            config,
            store,
            ledger,
            inflight,
            gate,
            events: EventBus::new(),
            fetcher,
            port,
            shutdown: CancellationToken::new(),
        })
    }

    /// Open the store at the configured path and wire the HTTP upstream.
    pub fn open(config: EngineConfig, port: Arc<dyn ChatPort>) -> anyhow::Result<Arc<Self>> {
        let store = Arc::new(Store::open(&config.data_dir)?);
        let fetcher = Arc::new(UpstreamClient::new(
            config.upstream_url.clone(),
            config.upstream_token.clone(),
        ));
        Ok(Self::new(config, store, fetcher, port))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Subscribe to lifecycle events.
    pub fn events(&self) -> tokio::sync::broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Stop accepting work and cancel in-flight runs.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        if let Err(e) = self.store.flush() {
            tracing::warn!(err = %e, "store flush on shutdown failed");
        }
    }

    /// Quota header snapshot for a user.
    pub async fn snapshot(&self, user_id: &str) -> anyhow::Result<QuotaSnapshot> {
        self.ledger.snapshot(user_id).await
    }

    /// Attach a subscriber to an in-flight run, if one exists.
    pub fn subscribe(&self, user_id: &str, vin: &str, target: SubscriberTarget) -> bool {
        self.inflight.attach(user_id, &normalize_vin(vin), target)
    }

    /// Submit a job: authorize, reserve, register, and (for the primary)
    /// spawn the run task. Returns immediately.
    pub async fn submit(self: &Arc<Self>, job: Job) -> anyhow::Result<Submitted> {
        let vin = normalize_vin(&job.vin);
        let user = self.ledger.ensure_user(&job.user_id).await?;
        let lang = resolve_language(
            job.language.as_deref(),
            user.preferred_language.as_deref(),
            &self.config.default_language,
        );

        if !is_valid_vin(&vin) {
            return Ok(Submitted::Rejected { reason: t("vin.invalid_format", &lang) });
        }

        match self.ledger.authorize(&job.user_id).await? {
            AuthDecision::Denied(err) => {
                tracing::info!(user = %job.user_id, vin = %vin, reason = %err, "submission rejected");
                if let Some(kind) = err.limit_kind() {
                    self.events.publish(&job.user_id, &vin, EventKind::LimitReached { kind });
                }
                return Ok(Submitted::Rejected { reason: t(err.message_key(), &lang) });
            }
            AuthDecision::Allowed => {}
        }

        let rid = request_id(
            &job.channel,
            &job.user_id,
            &vin,
            &lang,
            &job.options,
            job.client_key.as_deref(),
        );
        let reserved = self.ledger.reserve(&job.user_id, &rid).await?;
        if let ReserveOutcome::Denied(err) = &reserved {
            if let Some(kind) = err.limit_kind() {
                self.events.publish(&job.user_id, &vin, EventKind::LimitReached { kind });
            }
            return Ok(Submitted::Rejected { reason: t(err.message_key(), &lang) });
        }

        match self.inflight.register(&job.user_id, &vin, &rid, job.subscriber) {
            Registered::Attached { primary_rid } => {
                // A distinct rid (client-keyed resubmission) coalesced onto a
                // live run: return its fresh credit, the primary's commit
                // covers the work.
                if primary_rid != rid && reserved == ReserveOutcome::Reserved {
                    let _ = self.ledger.refund(&rid).await;
                }
                tracing::info!(user = %job.user_id, vin = %vin, "attached to in-flight run");
                Ok(Submitted::Attached)
            }
            Registered::Primary => {
                self.events.publish(&job.user_id, &vin, EventKind::ReportRequested);
                let ctx = RunContext {
                    user_id: job.user_id,
                    vin,
                    lang,
                    rid: rid.clone(),
                };
                let engine = Arc::clone(self);
                tokio::spawn(async move { engine.run_job(ctx).await });
                Ok(Submitted::Registered { request_id: rid })
            }
        }
    }

    // ── Run state machine ────────────────────────────────────────────────

    async fn run_job(self: Arc<Self>, ctx: RunContext) {
        let deadline = Instant::now() + self.config.total_deadline();
        let cancel = self.shutdown.child_token();
        let ticker_cancel = cancel.child_token();
        let channel = Arc::new(ProgressChannel::new());

        let header = match self.ledger.snapshot(&ctx.user_id).await {
            Ok(snapshot) => progress::render_header(&snapshot, &ctx.vin, &ctx.lang),
            Err(e) => {
                tracing::warn!(rid = %ctx.rid, err = %e, "quota snapshot failed; blank header");
                String::new()
            }
        };

        let end = tokio::select! {
            _ = cancel.cancelled() => RunEnd::Cancelled,
            _ = tokio::time::sleep_until(deadline) => RunEnd::DeadlineExceeded,
            result = self.drive(&ctx, &channel, &header, deadline, &cancel, &ticker_cancel) => {
                match result {
                    Ok(end) => end,
                    Err(e) => {
                        tracing::error!(rid = %ctx.rid, user = %ctx.user_id, err = %format!("{e:#}"), "run failed internally");
                        RunEnd::Internal
                    }
                }
            }
        };

        self.finalize(&ctx, &header, &ticker_cancel, end).await;
    }

    /// Admitted → Running → Delivering. Permits live on this stack frame, so
    /// dropping the future (deadline, cancellation) releases them.
    async fn drive(
        &self,
        ctx: &RunContext,
        channel: &Arc<ProgressChannel>,
        header: &str,
        deadline: Instant,
        cancel: &CancellationToken,
        ticker_cancel: &CancellationToken,
    ) -> anyhow::Result<RunEnd> {
        let Some(_permits) = self.gate.admit(&ctx.user_id, cancel).await else {
            return Ok(RunEnd::Cancelled);
        };
        self.events.publish(&ctx.user_id, &ctx.vin, EventKind::ReportAdmitted);
        tracing::info!(user = %ctx.user_id, vin = %ctx.vin, rid = %ctx.rid, "report run admitted");

        let _ticker = progress::spawn_ticker(
            Arc::clone(channel),
            Arc::clone(&self.port),
            Arc::clone(&self.inflight),
            ctx.user_id.clone(),
            ctx.vin.clone(),
            header.to_owned(),
            self.config.progress_tick(),
            ticker_cancel.clone(),
        );

        let outcome = fetch_with_retries(
            self.fetcher.as_ref(),
            &ctx.vin,
            &ctx.lang,
            self.config.generate_attempts(),
            deadline,
            self.config.send_deadline(),
        )
        .await;
        if !outcome.success {
            return Ok(RunEnd::FetchFailed(outcome));
        }

        channel.raise_cap(DELIVERY_CAP);
        let delivered = self.deliver(ctx, &outcome, deadline).await;
        if delivered == 0 {
            return Ok(RunEnd::DeliveryFailed);
        }

        if self.ledger.commit(&ctx.rid).await? == FinalizeOutcome::AlreadyFinalized {
            tracing::warn!(rid = %ctx.rid, "reservation was already refunded at commit time");
        }
        let snapshot = self.ledger.snapshot(&ctx.user_id).await?;
        Ok(RunEnd::Succeeded { remaining: snapshot.monthly_remaining })
    }

    /// Deliver the PDF to every subscriber. Failures are independent; the
    /// count of successful deliveries comes back.
    async fn deliver(&self, ctx: &RunContext, outcome: &ReportOutcome, deadline: Instant) -> usize {
        let Some(pdf) = outcome.pdf.as_ref() else {
            return 0;
        };
        let filename = outcome
            .filename
            .clone()
            .unwrap_or_else(|| format!("report_{}_{}.pdf", ctx.vin, ctx.lang));

        let mut delivered = 0;
        for target in self.inflight.fanout_targets(&ctx.user_id, &ctx.vin) {
            if self.deliver_one(&target, &filename, pdf, deadline).await {
                delivered += 1;
            } else {
                tracing::warn!(
                    chat = target.chat_id,
                    rid = %ctx.rid,
                    "pdf delivery failed for subscriber"
                );
            }
        }
        delivered
    }

    /// One subscriber, under the shared retry schedule and deadline budget.
    async fn deliver_one(
        &self,
        target: &SubscriberTarget,
        filename: &str,
        pdf: &Bytes,
        deadline: Instant,
    ) -> bool {
        for attempt in 0..self.config.delivery_attempts() {
            let delay = backoff_delay(attempt as usize);
            if !delay.is_zero() {
                if Instant::now() + delay >= deadline {
                    return false;
                }
                tokio::time::sleep(delay).await;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }

            let attempt_budget = remaining.min(self.config.send_deadline());
            match tokio::time::timeout(attempt_budget, self.port.deliver_pdf(target, filename, pdf))
                .await
            {
                Ok(Ok(())) => return true,
                Ok(Err(e)) => {
                    tracing::debug!(chat = target.chat_id, attempt, err = %e, "delivery attempt failed");
                }
                Err(_) => {
                    tracing::debug!(chat = target.chat_id, attempt, "delivery attempt timed out");
                }
            }
        }
        false
    }

    /// Terminal work for every run, success or not.
    async fn finalize(
        &self,
        ctx: &RunContext,
        header: &str,
        ticker_cancel: &CancellationToken,
        end: RunEnd,
    ) {
        ticker_cancel.cancel();

        let note = match &end {
            RunEnd::Succeeded { remaining } => {
                self.events.publish(
                    &ctx.user_id,
                    &ctx.vin,
                    EventKind::ReportSucceeded { remaining: *remaining },
                );
                tracing::info!(user = %ctx.user_id, vin = %ctx.vin, rid = %ctx.rid, "report run committed");
                t("report.note.success", &ctx.lang)
            }
            failure => {
                let (reason, text) = match failure {
                    RunEnd::FetchFailed(outcome) => {
                        (outcome.primary_error(), outcome.user_text(&ctx.lang))
                    }
                    RunEnd::DeliveryFailed => {
                        (FetchErrorKind::Transport, t("report.error.delivery", &ctx.lang))
                    }
                    RunEnd::DeadlineExceeded => {
                        (FetchErrorKind::Timeout, t("report.error.timeout", &ctx.lang))
                    }
                    _ => (FetchErrorKind::Unknown, t("report.error.generic", &ctx.lang)),
                };
                self.events.publish(&ctx.user_id, &ctx.vin, EventKind::ReportFailed { reason });
                match self.ledger.refund(&ctx.rid).await {
                    Ok(_) => {
                        self.events.publish(&ctx.user_id, &ctx.vin, EventKind::ReportRefunded);
                    }
                    Err(e) => {
                        tracing::error!(rid = %ctx.rid, err = %e, "refund failed");
                    }
                }
                tracing::warn!(
                    user = %ctx.user_id,
                    vin = %ctx.vin,
                    rid = %ctx.rid,
                    reason = %reason,
                    "report run refunded"
                );
                format!("{text}\n{}", t("report.note.refund", &ctx.lang))
            }
        };

        let text = progress::render_frame(header, 100, Some(&note));
        let targets = self.inflight.fanout_targets(&ctx.user_id, &ctx.vin);
        progress::push_frame(self.port.as_ref(), &targets, &text).await;
        self.inflight.unregister(&ctx.user_id, &ctx.vin);
    }
}
