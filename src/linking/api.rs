//! Linking and publishing endpoints.
//!
//! GET|POST /auth/:provider/start
//! GET      /auth/:provider/callback
//! POST     /publish/facebook
//! POST     /publish/instagram

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::flow::Completion;
use super::pages::{connected_html, error_html};
use super::types::{FacebookPost, InstagramMedia, Provider, PublishPayload, StartAuthResponse};
use crate::error::{LinkError, Result};
use crate::identity::bearer_token;
use crate::state::AppState;

/// Query parameters for OAuth start.
#[derive(Debug, Default, Deserialize)]
pub struct StartQuery {
    /// Scopes to request, in the provider's delimiter convention.
    pub scopes: Option<String>,
    /// Absolute URL to return the browser to once linked.
    pub return_to: Option<String>,
    /// `1` answers with a redirect instead of JSON.
    pub redirect: Option<String>,
}

/// Query parameters for OAuth callback.
///
/// Either `code` or `error` is present, depending on whether the user
/// granted access.
#[derive(Debug, Default, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

fn parse_provider(name: &str) -> Result<Provider> {
    name.parse().map_err(LinkError::BadRequest)
}

fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location.to_string())]).into_response()
}

/// Start an OAuth flow.
///
/// Returns `{ "authUrl": ... }`, or redirects there when `redirect=1`.
pub async fn auth_start(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    Query(query): Query<StartQuery>,
) -> Result<Response> {
    let provider = parse_provider(&provider)?;

    let auth_url = state
        .links
        .start(
            bearer_token(&headers),
            provider,
            query.scopes.as_deref(),
            query.return_to.as_deref(),
        )
        .await?;

    if query.redirect.as_deref() == Some("1") {
        return Ok(found(&auth_url));
    }

    Ok(Json(StartAuthResponse { auth_url }).into_response())
}

/// Handle the provider's redirect back to us.
///
/// Failures render an HTML page rather than JSON: the caller is a browser.
pub async fn auth_callback(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Query(query): Query<CallbackQuery>,
) -> Response {
    let provider = match parse_provider(&provider) {
        Ok(p) => p,
        Err(e) => return callback_error(e),
    };

    if let Some(ref error) = query.error {
        let err = state.links.deny(
            provider,
            query.state.as_deref(),
            error,
            query.error_description.as_deref(),
        );
        return callback_error(err);
    }

    match state
        .links
        .complete(provider, query.code.as_deref(), query.state.as_deref())
        .await
    {
        Ok(Completion::Redirect(url)) => found(&url),
        Ok(Completion::Confirmed(provider)) => connected_html(provider).into_response(),
        Err(e) => callback_error(e),
    }
}

fn callback_error(err: LinkError) -> Response {
    if let LinkError::Internal(ref detail) = err {
        tracing::error!(error = detail.as_str(), "OAuth callback failed");
    } else {
        tracing::warn!(error = %err, "OAuth callback rejected");
    }
    (err.status_code(), error_html(&err.public_message())).into_response()
}

/// Parse a JSON request body. An empty body yields the default value; a
/// malformed one is rejected rather than defaulted.
fn parse_body<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| {
        tracing::debug!(error = %e, "Rejected request body");
        LinkError::BadRequest("Invalid JSON body".to_string())
    })
}

/// Post a message to the user's first Facebook page.
///
/// Body: { "message": "..." } (optional)
pub async fn publish_facebook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse> {
    let post: FacebookPost = parse_body(&body)?;
    let response = state
        .links
        .publish(bearer_token(&headers), PublishPayload::Facebook(post))
        .await?;
    Ok(Json(response))
}

/// Publish an image to the user's Instagram business account.
///
/// Body: { "imageUrl": "...", "caption": "..." }
pub async fn publish_instagram(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse> {
    let media: InstagramMedia = parse_body(&body)?;
    let response = state
        .links
        .publish(bearer_token(&headers), PublishPayload::Instagram(media))
        .await?;
    Ok(Json(response))
}
