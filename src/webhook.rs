//! Meta webhook endpoint.
//!
//! GET answers the subscription handshake; POST accepts event
//! notifications. Events are logged and acknowledged, nothing more.

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;

use crate::state::AppState;

/// Subscription handshake parameters.
#[derive(Debug, Default, Deserialize)]
pub struct VerifyQuery {
    #[serde(rename = "hub.mode")]
    pub mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    pub verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    pub challenge: Option<String>,
}

/// Challenge to echo back, if the handshake is valid.
pub fn verify_challenge(query: VerifyQuery, expected_token: Option<&str>) -> Option<String> {
    let expected = expected_token?;
    if query.mode.as_deref() == Some("subscribe") && query.verify_token.as_deref() == Some(expected)
    {
        Some(query.challenge.unwrap_or_default())
    } else {
        None
    }
}

/// GET /webhooks/meta
pub async fn verify(
    State(state): State<AppState>,
    Query(query): Query<VerifyQuery>,
) -> impl IntoResponse {
    match verify_challenge(query, state.config.meta_verify_token.as_deref()) {
        Some(challenge) => {
            tracing::info!("Webhook subscription verified");
            (StatusCode::OK, challenge)
        }
        None => {
            tracing::warn!("Webhook verification rejected");
            (StatusCode::FORBIDDEN, "Forbidden".to_string())
        }
    }
}

/// POST /webhooks/meta
///
/// Always 200, so Meta does not retry or disable the subscription.
pub async fn receive(body: Bytes) -> impl IntoResponse {
    match serde_json::from_slice::<serde_json::Value>(&body) {
        Ok(event) => {
            let object = event.get("object").and_then(|o| o.as_str()).unwrap_or("unknown");
            let entries = event
                .get("entry")
                .and_then(|e| e.as_array())
                .map_or(0, |e| e.len());
            tracing::info!(object = object, entries = entries, "Webhook event received");
            tracing::debug!(payload = %event, "Webhook payload");
        }
        Err(_) => {
            tracing::info!(bytes = body.len(), "Non-JSON webhook payload received");
        }
    }

    (StatusCode::OK, "OK")
}
