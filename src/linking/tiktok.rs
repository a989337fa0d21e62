//! TikTok callback forwarding.
//!
//! TikTok is not linked by this service. Its callback is bounced, code and
//! state intact, to whichever service is configured to finish the flow.

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use reqwest::Url;
use serde::Deserialize;

use crate::error::{LinkError, Result};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct TikTokCallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
}

/// Build the upstream URL carrying `code` and `state`.
pub fn forward_url(base: &str, code: &str, state: &str) -> Result<String> {
    let mut url = Url::parse(base)
        .map_err(|e| LinkError::Internal(format!("invalid TikTok forward URL: {}", e)))?;

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != "code" && k != "state")
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    url.query_pairs_mut()
        .clear()
        .extend_pairs(kept)
        .append_pair("code", code)
        .append_pair("state", state);

    Ok(url.into())
}

/// GET /tiktok/callback?code=...&state=...
pub async fn callback(
    State(state): State<AppState>,
    Query(query): Query<TikTokCallbackQuery>,
) -> Result<Response> {
    let (code, oauth_state) = match (
        query.code.as_deref().filter(|c| !c.is_empty()),
        query.state.as_deref().filter(|s| !s.is_empty()),
    ) {
        (Some(code), Some(s)) => (code, s),
        _ => return Err(LinkError::BadRequest("Missing code or state".to_string())),
    };

    let base = state
        .config
        .tiktok_callback_forward_url
        .as_deref()
        .ok_or_else(|| LinkError::NotConfigured("TikTok callback forwarding".to_string()))?;

    let location = forward_url(base, code, oauth_state)?;
    tracing::info!("Forwarding TikTok callback");

    Ok((StatusCode::FOUND, [(header::LOCATION, location)]).into_response())
}
