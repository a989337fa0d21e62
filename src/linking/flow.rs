//! The linking flow.
//!
//! `start` records a pending authorization and builds the consent URL.
//! `complete` consumes it, runs both token exchanges and stores the
//! long-lived credential. `publish` uses that credential for one provider
//! call.

use std::sync::Arc;

use chrono::Utc;
use reqwest::Url;

use super::config::{LinkConfig, ResolvedCredentials};
use super::facebook;
use super::instagram;
use super::provider::{oauth_provider, GraphClient, OAuthProvider};
use super::store::{StateStore, TokenStore};
use super::types::{
    CredentialUpdate, LinkedCredential, PendingAuthorization, Provider, PublishPayload,
    PublishResponse,
};
use crate::error::{LinkError, Result};
use crate::identity::IdentityVerifier;

/// Outcome of a successful callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    /// Send the browser to this URL.
    Redirect(String),
    /// No return URL was recorded; show a confirmation page.
    Confirmed(Provider),
}

/// Orchestrates linking and publishing over the stores and the Graph API.
#[derive(Clone)]
pub struct LinkService {
    config: Arc<LinkConfig>,
    states: Arc<dyn StateStore>,
    tokens: Arc<dyn TokenStore>,
    identity: Arc<dyn IdentityVerifier>,
    graph: GraphClient,
}

impl LinkService {
    pub fn new(
        config: Arc<LinkConfig>,
        states: Arc<dyn StateStore>,
        tokens: Arc<dyn TokenStore>,
        identity: Arc<dyn IdentityVerifier>,
    ) -> Result<Self> {
        let graph = GraphClient::new(config.clone())?;
        Ok(Self {
            config,
            states,
            tokens,
            identity,
            graph,
        })
    }

    async fn authenticate(&self, credential: Option<&str>) -> Result<String> {
        let credential = credential.ok_or(LinkError::Unauthenticated)?;
        self.identity.verify(credential).await
    }

    // ── Start ────────────────────────────────────────────────────────────

    /// Record a pending authorization and return the consent URL.
    ///
    /// `scopes` is passed through as given; when absent the provider's
    /// default set is requested.
    pub async fn start(
        &self,
        credential: Option<&str>,
        provider: Provider,
        scopes: Option<&str>,
        return_to: Option<&str>,
    ) -> Result<String> {
        let user_id = self.authenticate(credential).await?;

        let oauth = oauth_provider(provider)
            .ok_or_else(|| LinkError::NotConfigured(provider.display_name().to_string()))?;
        let creds = self
            .config
            .credentials(provider)
            .ok_or_else(|| LinkError::NotConfigured(provider.display_name().to_string()))?
            .resolve(provider)?;

        let return_to = return_to.filter(|r| !r.is_empty());
        if let Some(url) = return_to {
            validate_return_to(url)?;
        }

        let mut auth_url = Url::parse(&oauth.authorization_endpoint(&self.config)).map_err(|e| {
            LinkError::Internal(format!("invalid authorization endpoint: {}", e))
        })?;

        let state_token = hex::encode(rand::random::<[u8; 32]>());
        self.states.insert(PendingAuthorization {
            state_token: state_token.clone(),
            user_id: user_id.clone(),
            provider,
            return_to: return_to.map(str::to_string),
            created_at: Utc::now(),
        })?;

        let scope = match scopes.map(str::trim).filter(|s| !s.is_empty()) {
            Some(requested) => requested.to_string(),
            None => oauth.default_scopes().join(oauth.scope_delimiter()),
        };

        auth_url
            .query_pairs_mut()
            .append_pair("client_id", creds.app_id)
            .append_pair("redirect_uri", creds.callback_url)
            .append_pair("state", &state_token)
            .append_pair("response_type", "code")
            .append_pair("scope", &scope);

        tracing::info!(user_id = %user_id, provider = %provider, "Started OAuth link");

        Ok(auth_url.into())
    }

    // ── Complete ─────────────────────────────────────────────────────────

    /// Handle the provider callback.
    ///
    /// The pending record is taken before any exchange so that concurrent
    /// callbacks cannot both proceed. It is put back if the exchange or
    /// persistence fails, and only stays consumed once the credential is
    /// stored.
    pub async fn complete(
        &self,
        provider: Provider,
        code: Option<&str>,
        state: Option<&str>,
    ) -> Result<Completion> {
        let (code, state) = match (
            code.filter(|c| !c.is_empty()),
            state.filter(|s| !s.is_empty()),
        ) {
            (Some(code), Some(state)) => (code, state),
            _ => return Err(LinkError::BadRequest("Missing code or state".to_string())),
        };

        let oauth = oauth_provider(provider)
            .ok_or_else(|| LinkError::NotConfigured(provider.display_name().to_string()))?;
        let creds = self
            .config
            .credentials(provider)
            .ok_or_else(|| LinkError::NotConfigured(provider.display_name().to_string()))?
            .resolve(provider)?;

        let pending = self.states.take(state).ok_or(LinkError::InvalidState)?;
        if pending.provider != provider {
            tracing::warn!(
                expected = %pending.provider,
                got = %provider,
                "State token used on the wrong provider callback"
            );
            return Err(LinkError::InvalidState);
        }

        let stored = match self.exchange_and_store(oauth, creds, code, &pending).await {
            Ok(stored) => stored,
            Err(e) => {
                self.restore_pending(pending);
                return Err(e);
            }
        };

        tracing::info!(
            user_id = %stored.user_id,
            provider = %provider,
            expires_in = ?stored.expires_in_seconds,
            "Linked account"
        );

        match pending.return_to {
            Some(return_to) => Ok(Completion::Redirect(connected_url(&return_to, provider)?)),
            None => Ok(Completion::Confirmed(provider)),
        }
    }

    async fn exchange_and_store(
        &self,
        oauth: &dyn OAuthProvider,
        creds: ResolvedCredentials<'_>,
        code: &str,
        pending: &PendingAuthorization,
    ) -> Result<LinkedCredential> {
        let short = oauth.exchange_code(&self.graph, creds, code).await?;
        let long = oauth
            .exchange_long_lived(&self.graph, creds, &short.access_token)
            .await?;

        let extra = oauth.post_exchange(&self.graph, &long.access_token).await;
        let update = CredentialUpdate::from_token(long, Utc::now(), extra);
        self.tokens.upsert(&pending.user_id, pending.provider, update)
    }

    /// Put a taken record back after a failed callback. It keeps its
    /// original `created_at`, so the TTL still applies.
    fn restore_pending(&self, pending: PendingAuthorization) {
        let provider = pending.provider;
        if let Err(e) = self.states.insert(pending) {
            tracing::warn!(provider = %provider, error = %e, "Could not restore pending authorization");
        }
    }

    /// Handle a callback carrying `error` instead of a code.
    ///
    /// The pending record, if the provider echoed its state, is consumed.
    pub fn deny(
        &self,
        provider: Provider,
        state: Option<&str>,
        error: &str,
        description: Option<&str>,
    ) -> LinkError {
        if let Some(pending) = state.and_then(|s| self.states.take(s)) {
            tracing::info!(
                user_id = %pending.user_id,
                provider = %provider,
                error = error,
                "Authorization denied"
            );
        }

        let reason = description.filter(|d| !d.is_empty()).unwrap_or(error);
        LinkError::AuthorizationDenied(reason.to_string())
    }

    // ── Publish ──────────────────────────────────────────────────────────

    pub async fn publish(
        &self,
        credential: Option<&str>,
        payload: PublishPayload,
    ) -> Result<PublishResponse> {
        let user_id = self.authenticate(credential).await?;
        let linked = self.linked(&user_id, payload.provider())?;

        match payload {
            PublishPayload::Facebook(post) => facebook::publish(&self.graph, &linked, post).await,
            PublishPayload::Instagram(media) => {
                instagram::publish(&self.graph, &linked, media).await
            }
        }
    }

    fn linked(&self, user_id: &str, provider: Provider) -> Result<LinkedCredential> {
        self.tokens
            .get(user_id, provider)
            .ok_or(LinkError::NotConnected)
    }

    // ── Housekeeping ─────────────────────────────────────────────────────

    /// Drop expired pending authorizations.
    pub fn purge_expired(&self) -> usize {
        self.states.purge_expired(Utc::now())
    }

    pub fn pending_count(&self) -> usize {
        self.states.len()
    }

    pub fn credential_count(&self) -> usize {
        self.tokens.len()
    }
}

fn validate_return_to(return_to: &str) -> Result<()> {
    let invalid = || LinkError::BadRequest("return_to must be an absolute http(s) URL".to_string());
    let url = Url::parse(return_to).map_err(|_| invalid())?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(invalid());
    }
    Ok(())
}

/// `return_to` with `<provider>=connected` set, other parameters kept.
pub fn connected_url(return_to: &str, provider: Provider) -> Result<String> {
    let mut url = Url::parse(return_to)
        .map_err(|e| LinkError::Internal(format!("stored return_to unparsable: {}", e)))?;

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != provider.as_str())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    url.query_pairs_mut()
        .clear()
        .extend_pairs(kept)
        .append_pair(provider.as_str(), "connected");

    Ok(url.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linking::config::ProviderCredentials;
    use crate::linking::store::{CredentialStore, MemoryStateStore};
    use crate::linking::types::{
        ExtraUpdate, FacebookPost, InstagramMedia, ProviderExtra, TokenResponse,
    };
    use async_trait::async_trait;
    use chrono::Duration;
    use mockito::{Matcher, Server};
    use serde_json::json;

    /// Accepts `token-<uid>` and yields `<uid>`.
    struct StaticVerifier;

    #[async_trait]
    impl IdentityVerifier for StaticVerifier {
        async fn verify(&self, credential: &str) -> Result<String> {
            credential
                .strip_prefix("token-")
                .map(str::to_string)
                .ok_or(LinkError::Unauthenticated)
        }
    }

    const CALLBACK: &str = "https://linker.example/auth/facebook/callback";

    fn app(id: &str) -> ProviderCredentials {
        ProviderCredentials {
            app_id: Some(id.to_string()),
            app_secret: Some(format!("{}-secret", id)),
            callback_url: Some(CALLBACK.to_string()),
        }
    }

    struct Fixture {
        service: LinkService,
        states: MemoryStateStore,
        tokens: CredentialStore,
    }

    fn fixture_with(config: LinkConfig) -> Fixture {
        let states = MemoryStateStore::new(config.state_ttl_secs);
        let tokens = CredentialStore::new(None);
        let service = LinkService::new(
            Arc::new(config),
            Arc::new(states.clone()),
            Arc::new(tokens.clone()),
            Arc::new(StaticVerifier),
        )
        .unwrap();
        Fixture {
            service,
            states,
            tokens,
        }
    }

    fn fixture(graph_base_url: &str) -> Fixture {
        fixture_with(LinkConfig {
            facebook: app("fb-app"),
            instagram: app("ig-app"),
            graph_base_url: graph_base_url.to_string(),
            ..LinkConfig::default()
        })
    }

    fn seed_pending(states: &MemoryStateStore, token: &str, provider: Provider, return_to: Option<&str>) {
        states
            .insert(PendingAuthorization {
                state_token: token.to_string(),
                user_id: "u1".to_string(),
                provider,
                return_to: return_to.map(str::to_string),
                created_at: Utc::now(),
            })
            .unwrap();
    }

    fn seed_credential(tokens: &CredentialStore, provider: Provider, extra: ExtraUpdate) {
        let update = CredentialUpdate::from_token(
            TokenResponse {
                access_token: "long".to_string(),
                token_type: None,
                expires_in: None,
            },
            Utc::now(),
            extra,
        );
        tokens.upsert("u1", provider, update).unwrap();
    }

    fn query_param(url: &str, name: &str) -> Option<String> {
        Url::parse(url)
            .unwrap()
            .query_pairs()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
    }

    async fn mock_exchanges(server: &mut Server, expires_in: u64) -> (mockito::Mock, mockito::Mock) {
        let short = server
            .mock("GET", "/v18.0/oauth/access_token")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("code".into(), "abc".into()),
                Matcher::UrlEncoded("redirect_uri".into(), CALLBACK.into()),
            ]))
            .with_status(200)
            .with_body(r#"{"access_token":"short","token_type":"bearer"}"#)
            .create_async()
            .await;
        let long = server
            .mock("GET", "/v18.0/oauth/access_token")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".into(), "fb_exchange_token".into()),
                Matcher::UrlEncoded("fb_exchange_token".into(), "short".into()),
            ]))
            .with_status(200)
            .with_body(
                json!({"access_token": "long", "token_type": "bearer", "expires_in": expires_in})
                    .to_string(),
            )
            .create_async()
            .await;
        (short, long)
    }

    // ── Start ────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_start_records_one_pending_authorization() {
        let f = fixture("http://127.0.0.1:9");

        let url = f
            .service
            .start(Some("token-u1"), Provider::Facebook, None, None)
            .await
            .unwrap();

        assert!(url.starts_with("https://www.facebook.com/v18.0/dialog/oauth?"));
        assert_eq!(f.states.len(), 1);

        let state = query_param(&url, "state").unwrap();
        assert_eq!(state.len(), 64);
        assert_eq!(query_param(&url, "client_id").as_deref(), Some("fb-app"));
        assert_eq!(query_param(&url, "redirect_uri").as_deref(), Some(CALLBACK));
        assert_eq!(query_param(&url, "response_type").as_deref(), Some("code"));

        let pending = f.states.take(&state).unwrap();
        assert_eq!(pending.user_id, "u1");
        assert_eq!(pending.provider, Provider::Facebook);
    }

    #[tokio::test]
    async fn test_start_default_and_custom_scopes() {
        let f = fixture("http://127.0.0.1:9");

        let url = f
            .service
            .start(Some("token-u1"), Provider::Facebook, None, None)
            .await
            .unwrap();
        assert_eq!(
            query_param(&url, "scope").as_deref(),
            Some("public_profile,email,pages_show_list,pages_read_engagement,pages_manage_posts")
        );

        let url = f
            .service
            .start(Some("token-u1"), Provider::Instagram, None, None)
            .await
            .unwrap();
        assert_eq!(
            query_param(&url, "scope").as_deref(),
            Some("instagram_basic,instagram_content_publish,pages_show_list")
        );

        let url = f
            .service
            .start(Some("token-u1"), Provider::Facebook, Some("email"), None)
            .await
            .unwrap();
        assert_eq!(query_param(&url, "scope").as_deref(), Some("email"));
    }

    #[tokio::test]
    async fn test_start_requires_identity() {
        let f = fixture("http://127.0.0.1:9");

        let missing = f.service.start(None, Provider::Facebook, None, None).await;
        assert!(matches!(missing, Err(LinkError::Unauthenticated)));

        let invalid = f
            .service
            .start(Some("garbage"), Provider::Facebook, None, None)
            .await;
        assert!(matches!(invalid, Err(LinkError::Unauthenticated)));

        assert_eq!(f.states.len(), 0);
    }

    #[tokio::test]
    async fn test_start_not_configured() {
        let f = fixture_with(LinkConfig::default());
        let result = f
            .service
            .start(Some("token-u1"), Provider::Facebook, None, None)
            .await;
        assert!(matches!(result, Err(LinkError::NotConfigured(_))));

        let f = fixture("http://127.0.0.1:9");
        let result = f
            .service
            .start(Some("token-u1"), Provider::TikTok, None, None)
            .await;
        assert!(matches!(result, Err(LinkError::NotConfigured(_))));
        assert_eq!(f.states.len(), 0);
    }

    #[tokio::test]
    async fn test_start_rejects_relative_return_to() {
        let f = fixture("http://127.0.0.1:9");

        for bad in ["/dashboard", "javascript:alert(1)", "not a url"] {
            let result = f
                .service
                .start(Some("token-u1"), Provider::Facebook, None, Some(bad))
                .await;
            assert!(matches!(result, Err(LinkError::BadRequest(_))), "{}", bad);
        }
        assert_eq!(f.states.len(), 0);
    }

    // ── Complete ─────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_complete_links_and_redirects() {
        let mut server = Server::new_async().await;
        let (short, long) = mock_exchanges(&mut server, 5_184_000).await;
        let f = fixture(&server.url());
        seed_pending(&f.states, "S", Provider::Facebook, Some("https://app/dash"));

        let completion = f
            .service
            .complete(Provider::Facebook, Some("abc"), Some("S"))
            .await
            .unwrap();

        assert_eq!(
            completion,
            Completion::Redirect("https://app/dash?facebook=connected".to_string())
        );
        short.assert_async().await;
        long.assert_async().await;

        let cred = f.tokens.get("u1", Provider::Facebook).unwrap();
        assert_eq!(cred.access_token, "long");
        assert_eq!(cred.expires_in_seconds, Some(5_184_000));
        assert_eq!(
            cred.expires_at,
            Some(cred.updated_at + Duration::seconds(5_184_000))
        );
        assert_eq!(f.states.len(), 0);

        let replay = f
            .service
            .complete(Provider::Facebook, Some("abc"), Some("S"))
            .await;
        assert!(matches!(replay, Err(LinkError::InvalidState)));
    }

    #[tokio::test]
    async fn test_complete_without_return_to_confirms() {
        let mut server = Server::new_async().await;
        let _mocks = mock_exchanges(&mut server, 0).await;
        let f = fixture(&server.url());
        seed_pending(&f.states, "S", Provider::Facebook, None);

        let completion = f
            .service
            .complete(Provider::Facebook, Some("abc"), Some("S"))
            .await
            .unwrap();
        assert_eq!(completion, Completion::Confirmed(Provider::Facebook));

        let cred = f.tokens.get("u1", Provider::Facebook).unwrap();
        assert!(cred.expires_at.is_none());
    }

    #[tokio::test]
    async fn test_complete_unknown_state_makes_no_calls() {
        let mut server = Server::new_async().await;
        let guard = server
            .mock("GET", Matcher::Any)
            .expect(0)
            .create_async()
            .await;
        let f = fixture(&server.url());

        for code in ["abc", "", "%%%"] {
            let result = f
                .service
                .complete(Provider::Facebook, Some(code), Some("unknown"))
                .await;
            if code.is_empty() {
                assert!(matches!(result, Err(LinkError::BadRequest(_))));
            } else {
                assert!(matches!(result, Err(LinkError::InvalidState)));
            }
        }
        guard.assert_async().await;
    }

    #[tokio::test]
    async fn test_complete_missing_params() {
        let f = fixture("http://127.0.0.1:9");
        assert!(matches!(
            f.service.complete(Provider::Facebook, None, Some("S")).await,
            Err(LinkError::BadRequest(_))
        ));
        assert!(matches!(
            f.service.complete(Provider::Facebook, Some("abc"), None).await,
            Err(LinkError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_complete_rejects_state_from_other_provider() {
        let f = fixture("http://127.0.0.1:9");
        seed_pending(&f.states, "S", Provider::Instagram, None);

        let result = f
            .service
            .complete(Provider::Facebook, Some("abc"), Some("S"))
            .await;
        assert!(matches!(result, Err(LinkError::InvalidState)));
        assert_eq!(f.states.len(), 0);
    }

    #[tokio::test]
    async fn test_failed_exchange_keeps_state_pending() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/v18.0/oauth/access_token")
            .match_query(Matcher::Any)
            .with_status(400)
            .with_body(r#"{"error":{"message":"redirect_uri mismatch"}}"#)
            .create_async()
            .await;
        let f = fixture(&server.url());
        seed_pending(&f.states, "S", Provider::Facebook, None);

        let result = f
            .service
            .complete(Provider::Facebook, Some("abc"), Some("S"))
            .await;
        match result {
            Err(LinkError::ExchangeFailed(message)) => {
                assert_eq!(message, "Failed to exchange code")
            }
            other => panic!("expected ExchangeFailed, got {:?}", other),
        }
        assert_eq!(f.states.len(), 1);
        assert_eq!(f.tokens.len(), 0);

        let pending = f.states.take("S").unwrap();
        assert_eq!(pending.user_id, "u1");
    }

    #[tokio::test]
    async fn test_failed_long_exchange_allows_retry() {
        let mut server = Server::new_async().await;
        let _short = server
            .mock("GET", "/v18.0/oauth/access_token")
            .match_query(Matcher::UrlEncoded("code".into(), "abc".into()))
            .with_status(200)
            .with_body(r#"{"access_token":"short"}"#)
            .create_async()
            .await;
        let long_fail = server
            .mock("GET", "/v18.0/oauth/access_token")
            .match_query(Matcher::UrlEncoded(
                "grant_type".into(),
                "fb_exchange_token".into(),
            ))
            .with_status(500)
            .with_body(r#"{"error":{"message":"temporarily unavailable"}}"#)
            .expect(1)
            .create_async()
            .await;
        let f = fixture(&server.url());
        seed_pending(&f.states, "S", Provider::Facebook, Some("https://app/dash"));

        let first = f
            .service
            .complete(Provider::Facebook, Some("abc"), Some("S"))
            .await;
        assert!(matches!(first, Err(LinkError::ExchangeFailed(_))));
        assert_eq!(f.states.len(), 1);
        long_fail.assert_async().await;
        long_fail.remove_async().await;

        let _long_ok = server
            .mock("GET", "/v18.0/oauth/access_token")
            .match_query(Matcher::UrlEncoded(
                "grant_type".into(),
                "fb_exchange_token".into(),
            ))
            .with_status(200)
            .with_body(r#"{"access_token":"long","expires_in":60}"#)
            .create_async()
            .await;

        let second = f
            .service
            .complete(Provider::Facebook, Some("abc"), Some("S"))
            .await
            .unwrap();
        assert_eq!(
            second,
            Completion::Redirect("https://app/dash?facebook=connected".to_string())
        );
        assert_eq!(f.states.len(), 0);
        assert_eq!(f.tokens.get("u1", Provider::Facebook).unwrap().access_token, "long");
    }

    #[tokio::test]
    async fn test_failed_persistence_keeps_state_pending() {
        let mut server = Server::new_async().await;
        let _mocks = mock_exchanges(&mut server, 60).await;
        let blocker = tempfile::NamedTempFile::new().unwrap();
        let config = LinkConfig {
            facebook: app("fb-app"),
            graph_base_url: server.url(),
            ..LinkConfig::default()
        };
        let states = MemoryStateStore::new(config.state_ttl_secs);
        // A regular file where the data directory should be.
        let tokens = CredentialStore::new(blocker.path().to_str());
        let service = LinkService::new(
            Arc::new(config),
            Arc::new(states.clone()),
            Arc::new(tokens.clone()),
            Arc::new(StaticVerifier),
        )
        .unwrap();
        seed_pending(&states, "S", Provider::Facebook, None);

        let result = service
            .complete(Provider::Facebook, Some("abc"), Some("S"))
            .await;
        assert!(matches!(result, Err(LinkError::Internal(_))));
        assert_eq!(states.len(), 1);
        assert!(tokens.get("u1", Provider::Facebook).is_none());
    }

    #[tokio::test]
    async fn test_instagram_link_resolves_business_account() {
        let mut server = Server::new_async().await;
        let _exchanges = mock_exchanges(&mut server, 5_184_000).await;
        let _pages = server
            .mock("GET", "/v18.0/me/accounts")
            .match_query(Matcher::UrlEncoded("access_token".into(), "long".into()))
            .with_status(200)
            .with_body(r#"{"data":[{"id":"P1","access_token":"page-token","name":"Shop"}]}"#)
            .create_async()
            .await;
        let _page = server
            .mock("GET", "/v18.0/P1")
            .match_query(Matcher::UrlEncoded(
                "fields".into(),
                "instagram_business_account{id}".into(),
            ))
            .with_status(200)
            .with_body(r#"{"instagram_business_account":{"id":"1784"},"id":"P1"}"#)
            .create_async()
            .await;
        let f = fixture(&server.url());
        seed_pending(&f.states, "S", Provider::Instagram, Some("https://app/dash?tab=social"));

        let completion = f
            .service
            .complete(Provider::Instagram, Some("abc"), Some("S"))
            .await
            .unwrap();
        assert_eq!(
            completion,
            Completion::Redirect("https://app/dash?tab=social&instagram=connected".to_string())
        );

        let cred = f.tokens.get("u1", Provider::Instagram).unwrap();
        assert_eq!(
            cred.provider_extra,
            Some(ProviderExtra {
                ig_business_id: Some("1784".to_string()),
                page_id: Some("P1".to_string()),
            })
        );
    }

    #[tokio::test]
    async fn test_instagram_mapping_failure_still_links() {
        let mut server = Server::new_async().await;
        let _exchanges = mock_exchanges(&mut server, 5_184_000).await;
        let _pages = server
            .mock("GET", "/v18.0/me/accounts")
            .match_query(Matcher::Any)
            .with_status(500)
            .with_body(r#"{"error":{"message":"boom"}}"#)
            .create_async()
            .await;
        let f = fixture(&server.url());
        seed_credential(
            &f.tokens,
            Provider::Instagram,
            ExtraUpdate::Replace(ProviderExtra {
                ig_business_id: Some("stale".to_string()),
                page_id: None,
            }),
        );
        seed_pending(&f.states, "S", Provider::Instagram, None);

        f.service
            .complete(Provider::Instagram, Some("abc"), Some("S"))
            .await
            .unwrap();

        let cred = f.tokens.get("u1", Provider::Instagram).unwrap();
        assert_eq!(cred.access_token, "long");
        assert!(cred.provider_extra.is_none());
    }

    #[tokio::test]
    async fn test_deny_consumes_state() {
        let f = fixture("http://127.0.0.1:9");
        seed_pending(&f.states, "S", Provider::Facebook, None);

        let err = f.service.deny(
            Provider::Facebook,
            Some("S"),
            "access_denied",
            Some("Permissions error"),
        );
        match err {
            LinkError::AuthorizationDenied(reason) => assert_eq!(reason, "Permissions error"),
            other => panic!("expected AuthorizationDenied, got {:?}", other),
        }
        assert_eq!(f.states.len(), 0);
    }

    // ── Publish ──────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_publish_not_connected_makes_no_calls() {
        let mut server = Server::new_async().await;
        let get_guard = server.mock("GET", Matcher::Any).expect(0).create_async().await;
        let post_guard = server.mock("POST", Matcher::Any).expect(0).create_async().await;
        let f = fixture(&server.url());

        let fb = f
            .service
            .publish(Some("token-u1"), PublishPayload::Facebook(FacebookPost::default()))
            .await;
        assert!(matches!(fb, Err(LinkError::NotConnected)));

        let ig = f
            .service
            .publish(Some("token-u1"), PublishPayload::Instagram(InstagramMedia::default()))
            .await;
        assert!(matches!(ig, Err(LinkError::NotConnected)));

        get_guard.assert_async().await;
        post_guard.assert_async().await;
    }

    #[tokio::test]
    async fn test_publish_requires_identity() {
        let f = fixture("http://127.0.0.1:9");
        let result = f
            .service
            .publish(None, PublishPayload::Facebook(FacebookPost::default()))
            .await;
        assert!(matches!(result, Err(LinkError::Unauthenticated)));
    }

    #[tokio::test]
    async fn test_publish_facebook_uses_page_token() {
        let mut server = Server::new_async().await;
        let _pages = server
            .mock("GET", "/v18.0/me/accounts")
            .match_query(Matcher::UrlEncoded("access_token".into(), "long".into()))
            .with_status(200)
            .with_body(r#"{"data":[{"id":"P1","access_token":"page-token"},{"id":"P2"}]}"#)
            .create_async()
            .await;
        let feed = server
            .mock("POST", "/v18.0/P1/feed")
            .match_body(Matcher::Json(json!({
                "message": "Hello from Social Poster",
                "access_token": "page-token",
            })))
            .with_status(200)
            .with_body(r#"{"id":"P1_555"}"#)
            .create_async()
            .await;
        let f = fixture(&server.url());
        seed_credential(&f.tokens, Provider::Facebook, ExtraUpdate::Keep);

        let response = f
            .service
            .publish(Some("token-u1"), PublishPayload::Facebook(FacebookPost { message: None }))
            .await
            .unwrap();

        assert!(response.ok);
        assert_eq!(response.page_id.as_deref(), Some("P1"));
        assert_eq!(response.post_id, "P1_555");
        feed.assert_async().await;
    }

    #[tokio::test]
    async fn test_publish_facebook_without_pages() {
        let mut server = Server::new_async().await;
        let _pages = server
            .mock("GET", "/v18.0/me/accounts")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"data":[]}"#)
            .create_async()
            .await;
        let f = fixture(&server.url());
        seed_credential(&f.tokens, Provider::Facebook, ExtraUpdate::Keep);

        let result = f
            .service
            .publish(
                Some("token-u1"),
                PublishPayload::Facebook(FacebookPost {
                    message: Some("hi".to_string()),
                }),
            )
            .await;
        assert!(matches!(result, Err(LinkError::NoManagedPages)));
    }

    #[tokio::test]
    async fn test_publish_instagram_requires_mapping_and_image() {
        let f = fixture("http://127.0.0.1:9");
        seed_credential(&f.tokens, Provider::Instagram, ExtraUpdate::Clear);

        let media = InstagramMedia {
            image_url: Some("https://img.example/1.jpg".to_string()),
            caption: None,
        };
        let result = f
            .service
            .publish(Some("token-u1"), PublishPayload::Instagram(media))
            .await;
        assert!(matches!(result, Err(LinkError::MissingMapping)));

        seed_credential(
            &f.tokens,
            Provider::Instagram,
            ExtraUpdate::Replace(ProviderExtra {
                ig_business_id: Some("1784".to_string()),
                page_id: None,
            }),
        );
        let result = f
            .service
            .publish(Some("token-u1"), PublishPayload::Instagram(InstagramMedia::default()))
            .await;
        match result {
            Err(LinkError::BadRequest(message)) => assert_eq!(message, "imageUrl required"),
            other => panic!("expected BadRequest, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_publish_instagram_two_step() {
        let mut server = Server::new_async().await;
        let container = server
            .mock("POST", "/v18.0/1784/media")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("image_url".into(), "https://img.example/1.jpg".into()),
                Matcher::UrlEncoded("caption".into(), "launch day".into()),
                Matcher::UrlEncoded("access_token".into(), "long".into()),
            ]))
            .with_status(200)
            .with_body(r#"{"id":"C1"}"#)
            .create_async()
            .await;
        let publish = server
            .mock("POST", "/v18.0/1784/media_publish")
            .match_query(Matcher::UrlEncoded("creation_id".into(), "C1".into()))
            .with_status(200)
            .with_body(r#"{"id":"M1"}"#)
            .create_async()
            .await;
        let f = fixture(&server.url());
        seed_credential(
            &f.tokens,
            Provider::Instagram,
            ExtraUpdate::Replace(ProviderExtra {
                ig_business_id: Some("1784".to_string()),
                page_id: Some("P1".to_string()),
            }),
        );

        let response = f
            .service
            .publish(
                Some("token-u1"),
                PublishPayload::Instagram(InstagramMedia {
                    image_url: Some("https://img.example/1.jpg".to_string()),
                    caption: Some("launch day".to_string()),
                }),
            )
            .await
            .unwrap();

        assert!(response.ok);
        assert_eq!(response.post_id, "M1");
        assert!(response.page_id.is_none());
        container.assert_async().await;
        publish.assert_async().await;
    }

    #[tokio::test]
    async fn test_publish_failure_hides_provider_body() {
        let mut server = Server::new_async().await;
        let _container = server
            .mock("POST", "/v18.0/1784/media")
            .match_query(Matcher::Any)
            .with_status(400)
            .with_body(r#"{"error":{"message":"secret detail"}}"#)
            .create_async()
            .await;
        let f = fixture(&server.url());
        seed_credential(
            &f.tokens,
            Provider::Instagram,
            ExtraUpdate::Replace(ProviderExtra {
                ig_business_id: Some("1784".to_string()),
                page_id: None,
            }),
        );

        let result = f
            .service
            .publish(
                Some("token-u1"),
                PublishPayload::Instagram(InstagramMedia {
                    image_url: Some("https://img.example/1.jpg".to_string()),
                    caption: None,
                }),
            )
            .await;
        match result {
            Err(LinkError::PublishFailed(message)) => assert!(!message.contains("secret detail")),
            other => panic!("expected PublishFailed, got {:?}", other),
        }
    }

    // ── Helpers ──────────────────────────────────────────────────────────

    #[test]
    fn test_connected_url_sets_flag_once() {
        assert_eq!(
            connected_url("https://app/dash", Provider::Facebook).unwrap(),
            "https://app/dash?facebook=connected"
        );
        assert_eq!(
            connected_url("https://app/dash?tab=x&facebook=connected", Provider::Facebook).unwrap(),
            "https://app/dash?tab=x&facebook=connected"
        );
    }

    #[tokio::test]
    async fn test_purge_and_counts() {
        let f = fixture("http://127.0.0.1:9");
        f.states
            .insert(PendingAuthorization {
                state_token: "old".to_string(),
                user_id: "u1".to_string(),
                provider: Provider::Facebook,
                return_to: None,
                created_at: Utc::now() - Duration::seconds(3600),
            })
            .unwrap();
        seed_pending(&f.states, "fresh", Provider::Facebook, None);

        assert_eq!(f.service.pending_count(), 2);
        assert_eq!(f.service.purge_expired(), 1);
        assert_eq!(f.service.pending_count(), 1);
        assert_eq!(f.service.credential_count(), 0);
    }
}
