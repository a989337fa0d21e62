//! OAuth provider capability and Graph API client.
//!
//! Facebook and Instagram share one three-legged flow against the Graph
//! API. They differ only in their default scopes and in what happens after
//! the long-lived exchange, which is what [`OAuthProvider`] captures.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::config::{LinkConfig, ResolvedCredentials};
use super::facebook::FacebookProvider;
use super::instagram::InstagramProvider;
use super::types::{ExtraUpdate, Provider, TokenResponse};
use crate::error::LinkError;

/// Failure of a single Graph API call.
#[derive(Error, Debug)]
pub enum GraphError {
    /// Connection failure or timeout.
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// Non-success status. `body` is the provider's raw error body.
    #[error("provider returned {status}")]
    Status { status: StatusCode, body: String },

    /// Success status with a body we could not parse.
    #[error("unexpected response body: {0}")]
    Decode(String),
}

impl GraphError {
    /// Log this failure with the provider's raw body, if any.
    pub fn log(&self, context: &str) {
        match self {
            GraphError::Status { status, body } => {
                tracing::error!(status = %status, body = body.as_str(), "{} failed", context);
            }
            GraphError::Transport(e) if e.is_timeout() => {
                tracing::error!(error = %e, "{} timed out", context);
            }
            other => {
                tracing::error!(error = %other, "{} failed", context);
            }
        }
    }
}

/// Id returned by Graph when an object is created.
#[derive(Debug, Clone, Deserialize)]
pub struct CreatedObject {
    pub id: String,
}

/// HTTP client for the Graph API, with a bounded per-request timeout.
#[derive(Clone)]
pub struct GraphClient {
    http: Client,
    config: Arc<LinkConfig>,
}

impl GraphClient {
    pub fn new(config: Arc<LinkConfig>) -> Result<Self, LinkError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .build()
            .map_err(|e| LinkError::Internal(format!("build HTTP client: {}", e)))?;

        Ok(Self { http, config })
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// GET `url` with query parameters.
    pub async fn get<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<T, GraphError> {
        let response = self.http.get(url).query(query).send().await?;
        Self::read(response).await
    }

    /// POST to `url` with parameters in the query string and no body.
    pub async fn post_query<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<T, GraphError> {
        let response = self.http.post(url).query(query).send().await?;
        Self::read(response).await
    }

    /// POST a JSON body to `url`.
    pub async fn post_json<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<T, GraphError> {
        let response = self.http.post(url).json(body).send().await?;
        Self::read(response).await
    }

    async fn read<T: DeserializeOwned>(response: Response) -> Result<T, GraphError> {
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(GraphError::Status { status, body });
        }

        serde_json::from_str(&body).map_err(|e| GraphError::Decode(e.to_string()))
    }
}

/// One social provider's view of the OAuth linking flow.
#[async_trait]
pub trait OAuthProvider: Send + Sync {
    fn provider(&self) -> Provider;

    /// Scopes requested when the caller does not choose any.
    fn default_scopes(&self) -> &'static [&'static str];

    /// Separator between scopes in the `scope` parameter.
    fn scope_delimiter(&self) -> &'static str {
        ","
    }

    fn authorization_endpoint(&self, config: &LinkConfig) -> String {
        config.dialog_url()
    }

    fn token_endpoint(&self, config: &LinkConfig) -> String {
        config.token_url()
    }

    /// Exchange an authorization code for a short-lived token.
    ///
    /// `redirect_uri` must be byte-identical to the one sent to the dialog.
    async fn exchange_code(
        &self,
        graph: &GraphClient,
        credentials: ResolvedCredentials<'_>,
        code: &str,
    ) -> Result<TokenResponse, LinkError> {
        let url = self.token_endpoint(graph.config());
        graph
            .get(
                &url,
                &[
                    ("client_id", credentials.app_id),
                    ("redirect_uri", credentials.callback_url),
                    ("client_secret", credentials.app_secret),
                    ("code", code),
                ],
            )
            .await
            .map_err(|e| {
                e.log(&format!("{} short token exchange", self.provider().display_name()));
                LinkError::ExchangeFailed("Failed to exchange code".to_string())
            })
    }

    /// Exchange a short-lived token for a long-lived one.
    async fn exchange_long_lived(
        &self,
        graph: &GraphClient,
        credentials: ResolvedCredentials<'_>,
        short_token: &str,
    ) -> Result<TokenResponse, LinkError> {
        let url = self.token_endpoint(graph.config());
        graph
            .get(
                &url,
                &[
                    ("grant_type", "fb_exchange_token"),
                    ("client_id", credentials.app_id),
                    ("client_secret", credentials.app_secret),
                    ("fb_exchange_token", short_token),
                ],
            )
            .await
            .map_err(|e| {
                e.log(&format!("{} long token exchange", self.provider().display_name()));
                LinkError::ExchangeFailed("Failed to get long-lived token".to_string())
            })
    }

    /// Runs after the long-lived exchange. Failures here must not fail the
    /// link; they are reflected in the returned update instead.
    async fn post_exchange(&self, _graph: &GraphClient, _access_token: &str) -> ExtraUpdate {
        ExtraUpdate::Keep
    }
}

/// The linkable implementation for `provider`. TikTok has none.
pub fn oauth_provider(provider: Provider) -> Option<&'static dyn OAuthProvider> {
    match provider {
        Provider::Facebook => Some(&FacebookProvider),
        Provider::Instagram => Some(&InstagramProvider),
        Provider::TikTok => None,
    }
}

/// Map a failed publishing call to `PublishFailed`, logging the detail.
pub fn publish_failed(context: &str, error: GraphError) -> LinkError {
    error.log(context);
    LinkError::PublishFailed(format!("{} failed", context))
}
