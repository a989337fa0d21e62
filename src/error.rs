//! Error types for the linking service.
//!
//! Every handler failure is a [`LinkError`]. Variants map one-to-one onto
//! HTTP status codes; JSON endpoints render `{ "error": "..." }`, while the
//! browser-facing OAuth callback renders an HTML page instead (see
//! `linking::pages`).

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

/// Result type alias for linking operations.
pub type Result<T> = std::result::Result<T, LinkError>;

/// Terminal failure of a linking, publishing or webhook request.
///
/// None of these are retried. Provider error bodies are logged where they
/// occur and never carried into the client-facing message.
#[derive(Error, Debug)]
pub enum LinkError {
    /// Missing, malformed or rejected bearer credential.
    #[error("Missing or invalid Authorization")]
    Unauthenticated,

    /// Provider app credentials (or another required setting) are unset.
    #[error("{0} not configured")]
    NotConfigured(String),

    /// A required request parameter is missing or malformed.
    #[error("{0}")]
    BadRequest(String),

    /// The state token is unknown, expired, already consumed, or was
    /// issued for a different provider.
    #[error("Invalid state")]
    InvalidState,

    /// The user (or provider) declined the authorization request.
    #[error("Authorization denied: {0}")]
    AuthorizationDenied(String),

    /// A token endpoint call failed (non-success status, timeout, bad body).
    #[error("{0}")]
    ExchangeFailed(String),

    /// No credential is stored for this user and provider.
    #[error("Not connected")]
    NotConnected,

    /// The Instagram business-account mapping was never resolved.
    #[error("Missing igBusinessId mapping")]
    MissingMapping,

    /// The Facebook user manages no pages to publish to.
    #[error("No managed pages")]
    NoManagedPages,

    /// A publishing call to the provider failed.
    #[error("{0}")]
    PublishFailed(String),

    /// Anything unexpected. The detail is logged, not returned.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl LinkError {
    /// HTTP status for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            LinkError::Unauthenticated => StatusCode::UNAUTHORIZED,
            LinkError::NotConfigured(_) | LinkError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            LinkError::BadRequest(_)
            | LinkError::InvalidState
            | LinkError::AuthorizationDenied(_)
            | LinkError::ExchangeFailed(_)
            | LinkError::NotConnected
            | LinkError::MissingMapping
            | LinkError::NoManagedPages
            | LinkError::PublishFailed(_) => StatusCode::BAD_REQUEST,
        }
    }

    /// Message safe to show to the caller.
    pub fn public_message(&self) -> String {
        match self {
            LinkError::Internal(_) => "Internal error".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for LinkError {
    fn into_response(self) -> Response {
        if let LinkError::Internal(ref detail) = self {
            tracing::error!(error = detail.as_str(), "Request failed with internal error");
        }

        (
            self.status_code(),
            Json(serde_json::json!({ "error": self.public_message() })),
        )
            .into_response()
    }
}
