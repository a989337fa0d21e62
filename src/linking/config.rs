//! Linking service configuration.
//!
//! Provider app credentials, Graph API endpoints, and identity-token
//! settings, loaded once from environment variables at startup.

use std::env;

use super::types::Provider;
use crate::error::LinkError;

/// Graph API version used for dialogs, token exchange and publishing.
pub const DEFAULT_GRAPH_API_VERSION: &str = "v18.0";

/// Default pending-authorization lifetime in seconds (15 minutes).
pub const DEFAULT_STATE_TTL_SECS: i64 = 900;

/// Default timeout for each outbound provider call.
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 10;

/// Facebook scopes requested when the caller does not pass `scopes`.
pub const FACEBOOK_SCOPES: &[&str] = &[
    "public_profile",
    "email",
    "pages_show_list",
    "pages_read_engagement",
    "pages_manage_posts",
];

/// Instagram scopes requested when the caller does not pass `scopes`.
pub const INSTAGRAM_SCOPES: &[&str] = &[
    "instagram_basic",
    "instagram_content_publish",
    "pages_show_list",
];

/// App credentials registered with a provider.
#[derive(Debug, Clone, Default)]
pub struct ProviderCredentials {
    /// OAuth client id.
    pub app_id: Option<String>,
    /// OAuth client secret.
    pub app_secret: Option<String>,
    /// Redirect URI registered with the provider. Must be identical at
    /// authorization and exchange time.
    pub callback_url: Option<String>,
}

/// Borrowed view of fully configured credentials.
#[derive(Debug, Clone, Copy)]
pub struct ResolvedCredentials<'a> {
    pub app_id: &'a str,
    pub app_secret: &'a str,
    pub callback_url: &'a str,
}

impl ProviderCredentials {
    fn from_env(prefix: &str) -> Self {
        Self {
            app_id: var(&format!("{}_APP_ID", prefix)),
            app_secret: var(&format!("{}_APP_SECRET", prefix)),
            callback_url: var(&format!("{}_CALLBACK_URL", prefix)),
        }
    }

    /// Check if all three settings are present.
    pub fn is_complete(&self) -> bool {
        self.app_id.is_some() && self.app_secret.is_some() && self.callback_url.is_some()
    }

    /// Borrow the credentials, or fail with `NotConfigured`.
    pub fn resolve(&self, provider: Provider) -> Result<ResolvedCredentials<'_>, LinkError> {
        match (
            self.app_id.as_deref(),
            self.app_secret.as_deref(),
            self.callback_url.as_deref(),
        ) {
            (Some(app_id), Some(app_secret), Some(callback_url)) => Ok(ResolvedCredentials {
                app_id,
                app_secret,
                callback_url,
            }),
            _ => Err(LinkError::NotConfigured(provider.display_name().to_string())),
        }
    }
}

/// Identity-token verification settings.
#[derive(Debug, Clone)]
pub struct IdentityConfig {
    /// HMAC secret or PEM public key. Without it every credential is rejected.
    pub jwt_key: Option<String>,
    /// JWT algorithm name, e.g. "HS256" or "RS256".
    pub jwt_algorithm: String,
    /// Expected `iss` claim, if any.
    pub issuer: Option<String>,
    /// Expected `aud` claim, if any.
    pub audience: Option<String>,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            jwt_key: None,
            jwt_algorithm: "HS256".to_string(),
            issuer: None,
            audience: None,
        }
    }
}

/// Linking service configuration.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    pub facebook: ProviderCredentials,
    pub instagram: ProviderCredentials,

    /// Graph API version segment, e.g. "v18.0".
    pub graph_api_version: String,
    /// Base URL for token exchange and Graph calls.
    pub graph_base_url: String,
    /// Base URL for the OAuth consent dialog.
    pub dialog_base_url: String,

    /// Token Meta sends back during webhook subscription.
    pub meta_verify_token: Option<String>,

    /// Upstream URL the TikTok callback is forwarded to.
    pub tiktok_callback_forward_url: Option<String>,

    pub identity: IdentityConfig,

    /// Directory for persisting linked credentials.
    /// When set, credentials are saved to `{data_dir}/credentials.json`.
    pub data_dir: Option<String>,

    /// Pending authorizations older than this are treated as absent.
    pub state_ttl_secs: i64,
    /// Timeout applied to every outbound provider request.
    pub http_timeout_secs: u64,
}

impl LinkConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self {
            facebook: ProviderCredentials::from_env("FACEBOOK"),
            instagram: ProviderCredentials::from_env("INSTAGRAM"),
            graph_api_version: var("GRAPH_API_VERSION")
                .unwrap_or_else(|| DEFAULT_GRAPH_API_VERSION.to_string()),
            graph_base_url: var("GRAPH_BASE_URL")
                .unwrap_or_else(|| "https://graph.facebook.com".to_string()),
            dialog_base_url: var("DIALOG_BASE_URL")
                .unwrap_or_else(|| "https://www.facebook.com".to_string()),
            meta_verify_token: var("META_VERIFY_TOKEN"),
            tiktok_callback_forward_url: var("TIKTOK_CALLBACK_FORWARD_URL"),
            identity: IdentityConfig {
                jwt_key: var("IDENTITY_JWT_KEY"),
                jwt_algorithm: var("IDENTITY_JWT_ALGORITHM").unwrap_or_else(|| "HS256".to_string()),
                issuer: var("IDENTITY_JWT_ISSUER"),
                audience: var("IDENTITY_JWT_AUDIENCE"),
            },
            data_dir: var("DATA_DIR"),
            state_ttl_secs: DEFAULT_STATE_TTL_SECS,
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
        }
    }

    /// App credentials for a provider. TikTok has none: it is not linked here.
    pub fn credentials(&self, provider: Provider) -> Option<&ProviderCredentials> {
        match provider {
            Provider::Facebook => Some(&self.facebook),
            Provider::Instagram => Some(&self.instagram),
            Provider::TikTok => None,
        }
    }

    /// Check if Facebook linking is configured.
    pub fn facebook_enabled(&self) -> bool {
        self.facebook.is_complete()
    }

    /// Check if Instagram linking is configured.
    pub fn instagram_enabled(&self) -> bool {
        self.instagram.is_complete()
    }

    /// OAuth consent dialog URL.
    pub fn dialog_url(&self) -> String {
        format!(
            "{}/{}/dialog/oauth",
            self.dialog_base_url.trim_end_matches('/'),
            self.graph_api_version
        )
    }

    /// Token endpoint, used for both the code and the long-lived exchange.
    pub fn token_url(&self) -> String {
        self.graph_url("oauth/access_token")
    }

    /// Versioned Graph API URL for `path`.
    pub fn graph_url(&self, path: &str) -> String {
        format!(
            "{}/{}/{}",
            self.graph_base_url.trim_end_matches('/'),
            self.graph_api_version,
            path.trim_start_matches('/')
        )
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            facebook: ProviderCredentials::default(),
            instagram: ProviderCredentials::default(),
            graph_api_version: DEFAULT_GRAPH_API_VERSION.to_string(),
            graph_base_url: "https://graph.facebook.com".to_string(),
            dialog_base_url: "https://www.facebook.com".to_string(),
            meta_verify_token: None,
            tiktok_callback_forward_url: None,
            identity: IdentityConfig::default(),
            data_dir: None,
            state_ttl_secs: DEFAULT_STATE_TTL_SECS,
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
        }
    }
}

/// Read an environment variable, treating blank values as unset.
fn var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}
