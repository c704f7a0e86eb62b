// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bearer-token authentication for the hubd API.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::error::HubError;
use crate::HubState;

/// Compare two tokens without leaking the mismatch position through timing:
/// every byte pair is folded into one accumulator before the verdict.
fn tokens_match(presented: &str, expected: &str) -> bool {
    if presented.len() != expected.len() {
        return false;
    }
    let diff = presented
        .bytes()
        .zip(expected.bytes())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b));
    diff == 0
}

/// Validate a Bearer token from HTTP headers.
pub fn validate_bearer(headers: &HeaderMap, expected: Option<&str>) -> Result<(), HubError> {
    let Some(expected) = expected else {
        // Auth disabled.
        return Ok(());
    };

    let presented = headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .and_then(|header| header.strip_prefix("Bearer "))
        .ok_or(HubError::Unauthorized)?;

    if !tokens_match(presented, expected) {
        return Err(HubError::Unauthorized);
    }
    Ok(())
}

/// Axum middleware that enforces Bearer token authentication.
///
/// Exempt: `/api/v1/health`.
pub async fn auth_layer(
    State(state): State<Arc<HubState>>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let open = req.uri().path() == "/api/v1/health";
    if !open {
        if let Err(code) = validate_bearer(req.headers(), state.auth_token.as_deref()) {
            return code.to_http_response("missing or invalid bearer token").into_response();
        }
    }
    next.run(req).await
}
