// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for end-to-end engine scenarios.
//!
//! Builds an in-process engine wired to a scripted mock upstream (a real
//! axum server on an ephemeral port) and a recording chat port, so the
//! scenarios exercise the same HTTP classification path production uses.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use bytes::Bytes;

use vinhub::dispatcher::Engine;
use vinhub::fetcher::UpstreamClient;
use vinhub::port::{ChatPort, SubscriberTarget};
use vinhub::store::Store;
use vinhub::{EngineConfig, EngineEvent, Job};

pub const VIN: &str = "1HGCM82633A123456";

static CRYPTO_INIT: Once = Once::new();

/// Install the ring crypto provider for reqwest/rustls.
/// Safe to call multiple times — only the first call has effect.
pub fn ensure_crypto() {
    CRYPTO_INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

// -- Mock upstream ------------------------------------------------------------

/// Scripted behavior for one upstream request.
#[derive(Debug, Clone)]
pub enum Scripted {
    /// 200 with a PDF body.
    Pdf,
    /// PDF after a delay (keeps a run in flight).
    PdfAfter(Duration),
    /// Bare status code, empty body.
    Status(u16),
    /// 422 with an `invalid_vin` error body.
    InvalidVin,
    /// 200 with an HTML body.
    NonPdf,
}

struct UpstreamInner {
    script: Mutex<VecDeque<Scripted>>,
    hits: AtomicU32,
    current: AtomicU32,
    max_concurrent: AtomicU32,
}

/// A scripted report provider. Unscripted requests return a PDF.
pub struct MockUpstream {
    pub base_url: String,
    inner: Arc<UpstreamInner>,
}

impl MockUpstream {
    pub async fn start() -> anyhow::Result<Self> {
        let inner = Arc::new(UpstreamInner {
            script: Mutex::new(VecDeque::new()),
            hits: AtomicU32::new(0),
            current: AtomicU32::new(0),
            max_concurrent: AtomicU32::new(0),
        });

        let router = Router::new()
            .route("/api/v1/report", get(report_handler))
            .with_state(Arc::clone(&inner));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });

        Ok(Self { base_url: format!("http://{addr}"), inner })
    }

    pub fn enqueue(&self, action: Scripted) {
        self.inner.script.lock().unwrap_or_else(|e| e.into_inner()).push_back(action);
    }

    /// Total requests served.
    pub fn hits(&self) -> u32 {
        self.inner.hits.load(Ordering::SeqCst)
    }

    /// Highest number of requests in flight at once.
    pub fn max_concurrent(&self) -> u32 {
        self.inner.max_concurrent.load(Ordering::SeqCst)
    }
}

async fn report_handler(State(inner): State<Arc<UpstreamInner>>) -> Response {
    inner.hits.fetch_add(1, Ordering::SeqCst);
    let now = inner.current.fetch_add(1, Ordering::SeqCst) + 1;
    inner.max_concurrent.fetch_max(now, Ordering::SeqCst);

    let action = inner
        .script
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .pop_front()
        .unwrap_or(Scripted::Pdf);

    let resp = match action {
        Scripted::Pdf => pdf_response(),
        Scripted::PdfAfter(delay) => {
            tokio::time::sleep(delay).await;
            pdf_response()
        }
        Scripted::Status(code) => StatusCode::from_u16(code)
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            .into_response(),
        Scripted::InvalidVin => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(serde_json::json!({ "errors": ["invalid_vin"], "message": "VIN rejected" })),
        )
            .into_response(),
        Scripted::NonPdf => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/html")],
            "<html>maintenance</html>",
        )
            .into_response(),
    };

    inner.current.fetch_sub(1, Ordering::SeqCst);
    resp
}

fn pdf_response() -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/pdf")],
        Bytes::from_static(b"%PDF-1.4 vinhub spec fixture"),
    )
        .into_response()
}

// -- Recording chat port ------------------------------------------------------

/// Chat port that records all traffic and can fail deliveries on demand.
pub struct RecordingPort {
    pub edits: Mutex<Vec<(SubscriberTarget, String)>>,
    pub deliveries: Mutex<Vec<(SubscriberTarget, String, usize)>>,
    /// Deliveries to fail before succeeding again.
    pub fail_deliveries: AtomicU32,
}

impl RecordingPort {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            edits: Mutex::new(Vec::new()),
            deliveries: Mutex::new(Vec::new()),
            fail_deliveries: AtomicU32::new(0),
        })
    }

    pub fn fail_next_deliveries(&self, n: u32) {
        self.fail_deliveries.store(n, Ordering::SeqCst);
    }

    pub fn delivered(&self) -> Vec<(SubscriberTarget, String, usize)> {
        self.deliveries.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// All frames pushed to one target, in order.
    pub fn frames_for(&self, target: SubscriberTarget) -> Vec<String> {
        self.edits
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|(t, _)| *t == target)
            .map(|(_, text)| text.clone())
            .collect()
    }
}

#[async_trait]
impl ChatPort for RecordingPort {
    async fn edit_progress(&self, target: &SubscriberTarget, text: &str) -> anyhow::Result<()> {
        self.edits.lock().unwrap_or_else(|e| e.into_inner()).push((*target, text.to_owned()));
        Ok(())
    }

    async fn deliver_pdf(
        &self,
        target: &SubscriberTarget,
        filename: &str,
        pdf: &Bytes,
    ) -> anyhow::Result<()> {
        let remaining = self.fail_deliveries.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_deliveries.store(remaining - 1, Ordering::SeqCst);
            anyhow::bail!("scripted delivery failure");
        }
        self.deliveries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((*target, filename.to_owned(), pdf.len()));
        Ok(())
    }
}

/// Percent parsed out of a rendered frame, e.g. `▓▓░░ 40%` → 40.
pub fn percent_of(frame: &str) -> u32 {
    frame
        .split_whitespace()
        .find_map(|token| token.strip_suffix('%'))
        .and_then(|n| n.parse().ok())
        .unwrap_or(0)
}

// -- Harness ------------------------------------------------------------------

/// One engine instance over a fresh store and a scripted upstream.
pub struct Harness {
    pub engine: Arc<Engine>,
    pub port: Arc<RecordingPort>,
    pub upstream: MockUpstream,
    pub dir: tempfile::TempDir,
}

impl Harness {
    pub async fn start() -> anyhow::Result<Self> {
        Self::start_with(|_| {}).await
    }

    /// Start with config tweaks applied on top of the fast test defaults.
    pub async fn start_with(tweak: impl FnOnce(&mut EngineConfig)) -> anyhow::Result<Self> {
        ensure_crypto();
        let upstream = MockUpstream::start().await?;
        let dir = tempfile::TempDir::new()?;

        let mut config = fast_config(&upstream.base_url, &dir);
        tweak(&mut config);

        let port = RecordingPort::new();
        let engine = build_engine(&config, Arc::clone(&port) as Arc<dyn ChatPort>)?;
        Ok(Self { engine, port, upstream, dir })
    }

    /// Activate a user on the standard monthly plan used by the scenarios.
    pub async fn activate(&self, user: &str, daily: u32, monthly: u32) -> anyhow::Result<()> {
        self.engine
            .ledger()
            .activate(user, vinhub::store::Plan::Monthly, 30, daily, monthly)
            .await?;
        Ok(())
    }

    pub fn job(&self, user: &str, vin: &str, target: SubscriberTarget) -> Job {
        Job {
            channel: "telegram".to_owned(),
            user_id: user.to_owned(),
            vin: vin.to_owned(),
            language: Some("en".to_owned()),
            options: BTreeMap::new(),
            client_key: None,
            subscriber: target,
        }
    }

    pub async fn user(&self, id: &str) -> anyhow::Result<vinhub::store::UserRecord> {
        self.engine.ledger().ensure_user(id).await
    }
}

/// Fast-but-real timings for scenario runs.
pub fn fast_config(upstream_url: &str, dir: &tempfile::TempDir) -> EngineConfig {
    EngineConfig {
        progress_tick_ms: 10,
        total_deadline_secs: 15,
        send_deadline_secs: 5,
        upstream_url: upstream_url.to_owned(),
        data_dir: dir.path().join("db"),
        ..EngineConfig::default()
    }
}

/// Build an engine over `config.data_dir` with the real HTTP fetcher.
pub fn build_engine(
    config: &EngineConfig,
    port: Arc<dyn ChatPort>,
) -> anyhow::Result<Arc<Engine>> {
    let store = Arc::new(Store::open(&config.data_dir)?);
    let fetcher = Arc::new(UpstreamClient::new(config.upstream_url.clone(), None));
    Ok(Engine::new(config.clone(), store, fetcher, port))
}

pub fn target(n: i64) -> SubscriberTarget {
    SubscriberTarget { chat_id: n, message_id: n * 100 }
}

/// Wait for the next event matching `pred`, draining others.
pub async fn wait_for_event(
    rx: &mut tokio::sync::broadcast::Receiver<EngineEvent>,
    timeout: Duration,
    pred: impl Fn(&EngineEvent) -> bool,
) -> Option<EngineEvent> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return None;
        }
        match tokio::time::timeout(remaining, rx.recv()).await {
            Ok(Ok(event)) if pred(&event) => return Some(event),
            Ok(Ok(_)) => continue,
            Ok(Err(_)) | Err(_) => return None,
        }
    }
}
