//! Linking service types.
//!
//! Types for providers, pending authorizations, stored credentials, and the
//! request/response bodies of the linking and publishing endpoints.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Supported social providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Facebook,
    Instagram,
    #[serde(rename = "tiktok")]
    TikTok,
}

impl Provider {
    /// Get the provider name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Facebook => "facebook",
            Provider::Instagram => "instagram",
            Provider::TikTok => "tiktok",
        }
    }

    /// Human-readable name, used in messages and pages.
    pub fn display_name(&self) -> &'static str {
        match self {
            Provider::Facebook => "Facebook",
            Provider::Instagram => "Instagram",
            Provider::TikTok => "TikTok",
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "facebook" => Ok(Provider::Facebook),
            "instagram" => Ok(Provider::Instagram),
            "tiktok" => Ok(Provider::TikTok),
            other => Err(format!("Unsupported provider: {}", other)),
        }
    }
}

/// A pending authorization, stored between the start and callback legs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingAuthorization {
    /// Random state token sent to the provider and echoed back.
    pub state_token: String,
    /// The user the linked credential will belong to.
    pub user_id: String,
    /// The provider being linked.
    pub provider: Provider,
    /// Where to send the browser once linking completes.
    pub return_to: Option<String>,
    /// When this authorization was started.
    pub created_at: DateTime<Utc>,
}

impl PendingAuthorization {
    /// Age of this record in whole seconds.
    pub fn age_secs(&self, now: DateTime<Utc>) -> i64 {
        now.timestamp() - self.created_at.timestamp()
    }

    /// Whether this record is older than `ttl_secs`.
    pub fn is_expired(&self, now: DateTime<Utc>, ttl_secs: i64) -> bool {
        self.age_secs(now) > ttl_secs
    }
}

/// Provider-specific data resolved during linking.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderExtra {
    /// Instagram business account id used for publishing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ig_business_id: Option<String>,
    /// Facebook page the business account was resolved through.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_id: Option<String>,
}

/// The latest credential a user has linked for a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkedCredential {
    pub user_id: String,
    pub provider: Provider,
    pub access_token: String,
    pub token_type: String,
    /// Lifetime reported by the provider. `None` means unknown.
    pub expires_in_seconds: Option<u64>,
    /// `None` when the provider did not report a (nonzero) lifetime.
    pub expires_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_extra: Option<ProviderExtra>,
}

/// How an upsert treats `provider_extra`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtraUpdate {
    /// Leave whatever is stored.
    Keep,
    /// Overwrite with a freshly resolved value.
    Replace(ProviderExtra),
    /// Remove a previously stored value.
    Clear,
}

/// Fields written by a successful link. Merged into any existing record.
#[derive(Debug, Clone)]
pub struct CredentialUpdate {
    pub access_token: String,
    pub token_type: String,
    pub expires_in_seconds: Option<u64>,
    pub expires_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub provider_extra: ExtraUpdate,
}

impl CredentialUpdate {
    /// Build an update from a long-lived token response received at `now`.
    pub fn from_token(token: TokenResponse, now: DateTime<Utc>, extra: ExtraUpdate) -> Self {
        let expires_at = token
            .expires_in
            .filter(|secs| *secs > 0)
            .and_then(|secs| i64::try_from(secs).ok())
            .map(|secs| now + Duration::seconds(secs));

        Self {
            access_token: token.access_token,
            token_type: token.token_type.unwrap_or_else(|| "bearer".to_string()),
            expires_in_seconds: token.expires_in,
            expires_at,
            updated_at: now,
            provider_extra: extra,
        }
    }

    /// Merge into an existing credential, or create one.
    pub fn apply(
        self,
        existing: Option<LinkedCredential>,
        user_id: &str,
        provider: Provider,
    ) -> LinkedCredential {
        let previous_extra = existing.and_then(|c| c.provider_extra);
        let provider_extra = match self.provider_extra {
            ExtraUpdate::Keep => previous_extra,
            ExtraUpdate::Replace(extra) => Some(extra),
            ExtraUpdate::Clear => None,
        };

        LinkedCredential {
            user_id: user_id.to_string(),
            provider,
            access_token: self.access_token,
            token_type: self.token_type,
            expires_in_seconds: self.expires_in_seconds,
            expires_at: self.expires_at,
            updated_at: self.updated_at,
            provider_extra,
        }
    }
}

/// Token endpoint response (short- and long-lived exchanges).
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: Option<String>,
    pub expires_in: Option<u64>,
}

/// Response from starting an OAuth flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartAuthResponse {
    /// The URL to send the user to.
    pub auth_url: String,
}

/// Body of `POST /publish/facebook`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FacebookPost {
    pub message: Option<String>,
}

/// Body of `POST /publish/instagram`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstagramMedia {
    pub image_url: Option<String>,
    pub caption: Option<String>,
}

/// Something to publish, tagged by the provider it goes to.
#[derive(Debug, Clone)]
pub enum PublishPayload {
    Facebook(FacebookPost),
    Instagram(InstagramMedia),
}

impl PublishPayload {
    pub fn provider(&self) -> Provider {
        match self {
            PublishPayload::Facebook(_) => Provider::Facebook,
            PublishPayload::Instagram(_) => Provider::Instagram,
        }
    }
}

/// Result of a successful publish.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishResponse {
    pub ok: bool,
    /// Page the post went to (Facebook only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_id: Option<String>,
    pub post_id: String,
}
