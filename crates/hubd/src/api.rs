// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP handlers for the engine and admin APIs.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use vinhub::port::SubscriberTarget;
use vinhub::store::Plan;
use vinhub::Job;

use crate::auth;
use crate::error::HubError;
use crate::HubState;

/// Build the axum `Router` with all hubd routes.
pub fn build_router(state: Arc<HubState>) -> Router {
    Router::new()
        .route("/api/v1/health", get(health))
        // Engine API
        .route("/api/v1/reports", post(submit_report))
        .route("/api/v1/reports/subscribe", post(subscribe))
        .route("/api/v1/users/{id}/snapshot", get(user_snapshot))
        // Entitlement admin API
        .route("/api/v1/users/{id}/activate", post(activate_user))
        .route("/api/v1/users/{id}/limits", post(set_limits))
        .route("/api/v1/users/{id}/deactivate", post(deactivate_user))
        .route("/api/v1/users/{id}/reset-today", post(reset_today))
        .route("/api/v1/users/{id}/language", post(set_language))
        // Middleware
        .layer(middleware::from_fn_with_state(state.clone(), auth::auth_layer))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// -- Request/Response types ---------------------------------------------------

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub users: usize,
}

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    #[serde(default = "default_channel")]
    pub channel: String,
    pub user_id: String,
    pub vin: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub options: BTreeMap<String, String>,
    #[serde(default)]
    pub client_key: Option<String>,
    pub chat_id: i64,
    pub message_id: i64,
}

fn default_channel() -> String {
    "http".to_owned()
}

#[derive(Debug, Deserialize)]
pub struct SubscribeRequest {
    pub user_id: String,
    pub vin: String,
    pub chat_id: i64,
    pub message_id: i64,
}

#[derive(Debug, Serialize)]
pub struct SubscribeResponse {
    pub attached: bool,
}

#[derive(Debug, Deserialize)]
pub struct ActivateRequest {
    pub plan: Plan,
    pub days: u32,
    pub daily_cap: u32,
    pub monthly_cap: u32,
}

#[derive(Debug, Deserialize)]
pub struct LimitsRequest {
    pub daily_cap: u32,
    pub monthly_cap: u32,
}

#[derive(Debug, Deserialize)]
pub struct LanguageRequest {
    pub language: String,
}

// -- Handlers -----------------------------------------------------------------

/// `GET /api/v1/health`
pub async fn health(State(s): State<Arc<HubState>>) -> impl IntoResponse {
    Json(HealthResponse { status: "running".to_owned(), users: s.engine.store().user_count() })
}

/// `POST /api/v1/reports` — submit a report job.
pub async fn submit_report(
    State(s): State<Arc<HubState>>,
    Json(req): Json<SubmitRequest>,
) -> Response {
    let job = Job {
        channel: req.channel,
        user_id: req.user_id,
        vin: req.vin,
        language: req.language,
        options: req.options,
        client_key: req.client_key,
        subscriber: SubscriberTarget { chat_id: req.chat_id, message_id: req.message_id },
    };
    match s.engine.submit(job).await {
        Ok(submitted) => Json(submitted).into_response(),
        Err(e) => internal(&e, "submit failed"),
    }
}

/// `POST /api/v1/reports/subscribe` — join an in-flight run.
pub async fn subscribe(
    State(s): State<Arc<HubState>>,
    Json(req): Json<SubscribeRequest>,
) -> impl IntoResponse {
    let target = SubscriberTarget { chat_id: req.chat_id, message_id: req.message_id };
    let attached = s.engine.subscribe(&req.user_id, &req.vin, target);
    Json(SubscribeResponse { attached })
}

/// `GET /api/v1/users/{id}/snapshot`
pub async fn user_snapshot(State(s): State<Arc<HubState>>, Path(id): Path<String>) -> Response {
    match s.engine.snapshot(&id).await {
        Ok(snapshot) => Json(snapshot).into_response(),
        Err(e) => internal(&e, "snapshot failed"),
    }
}

/// `POST /api/v1/users/{id}/activate`
pub async fn activate_user(
    State(s): State<Arc<HubState>>,
    Path(id): Path<String>,
    Json(req): Json<ActivateRequest>,
) -> Response {
    match s.engine.ledger().activate(&id, req.plan, req.days, req.daily_cap, req.monthly_cap).await
    {
        Ok(user) => Json(user).into_response(),
        Err(e) => internal(&e, "activate failed"),
    }
}

/// `POST /api/v1/users/{id}/limits`
pub async fn set_limits(
    State(s): State<Arc<HubState>>,
    Path(id): Path<String>,
    Json(req): Json<LimitsRequest>,
) -> Response {
    match s.engine.ledger().set_limits(&id, req.daily_cap, req.monthly_cap).await {
        Ok(user) => Json(user).into_response(),
        Err(e) => internal(&e, "set limits failed"),
    }
}

/// `POST /api/v1/users/{id}/deactivate`
pub async fn deactivate_user(State(s): State<Arc<HubState>>, Path(id): Path<String>) -> Response {
    match s.engine.ledger().deactivate(&id).await {
        Ok(user) => Json(user).into_response(),
        Err(e) => internal(&e, "deactivate failed"),
    }
}

/// `POST /api/v1/users/{id}/reset-today`
pub async fn reset_today(State(s): State<Arc<HubState>>, Path(id): Path<String>) -> Response {
    match s.engine.ledger().reset_today(&id).await {
        Ok(user) => Json(user).into_response(),
        Err(e) => internal(&e, "reset failed"),
    }
}

/// `POST /api/v1/users/{id}/language`
pub async fn set_language(
    State(s): State<Arc<HubState>>,
    Path(id): Path<String>,
    Json(req): Json<LanguageRequest>,
) -> Response {
    let lang = req.language.trim().to_lowercase();
    if !vinhub::catalog::is_supported(&lang) {
        return HubError::BadRequest.to_http_response("unsupported language").into_response();
    }
    match s.engine.ledger().set_language(&id, &lang).await {
        Ok(user) => Json(user).into_response(),
        Err(e) => internal(&e, "set language failed"),
    }
}

fn internal(err: &anyhow::Error, what: &str) -> Response {
    tracing::error!(err = %format!("{err:#}"), "{what}");
    HubError::Internal.to_http_response(what).into_response()
}
