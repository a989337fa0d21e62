//! Facebook linking and page publishing.
//!
//! Posts go to the first page the user manages, using that page's own
//! access token rather than the user's.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::config::FACEBOOK_SCOPES;
use super::provider::{publish_failed, CreatedObject, GraphClient, GraphError, OAuthProvider};
use super::types::{FacebookPost, LinkedCredential, Provider, PublishResponse};
use crate::error::{LinkError, Result};

/// Message posted when the request body carries none.
pub const DEFAULT_MESSAGE: &str = "Hello from Social Poster";

pub struct FacebookProvider;

#[async_trait]
impl OAuthProvider for FacebookProvider {
    fn provider(&self) -> Provider {
        Provider::Facebook
    }

    fn default_scopes(&self) -> &'static [&'static str] {
        FACEBOOK_SCOPES
    }
}

/// A page the user manages.
#[derive(Debug, Clone, Deserialize)]
pub struct Page {
    pub id: String,
    /// Page access token. Present when the user token has page permissions.
    pub access_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PageList {
    #[serde(default)]
    data: Vec<Page>,
}

/// First page managed by the owner of `access_token`, if any.
pub async fn first_managed_page(
    graph: &GraphClient,
    access_token: &str,
) -> std::result::Result<Option<Page>, GraphError> {
    let url = graph.config().graph_url("me/accounts");
    let pages: PageList = graph.get(&url, &[("access_token", access_token)]).await?;
    Ok(pages.data.into_iter().next())
}

/// Post `post` to the user's first managed page.
pub async fn publish(
    graph: &GraphClient,
    credential: &LinkedCredential,
    post: FacebookPost,
) -> Result<PublishResponse> {
    let page = first_managed_page(graph, &credential.access_token)
        .await
        .map_err(|e| publish_failed("Fetch managed pages", e))?
        .ok_or(LinkError::NoManagedPages)?;

    let page_token = page.access_token.as_deref().ok_or_else(|| {
        tracing::error!(page_id = %page.id, "Managed page has no access token");
        LinkError::PublishFailed("Page access token unavailable".to_string())
    })?;

    let message = post
        .message
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| DEFAULT_MESSAGE.to_string());

    let url = graph.config().graph_url(&format!("{}/feed", page.id));
    let created: CreatedObject = graph
        .post_json(
            &url,
            &json!({
                "message": message,
                "access_token": page_token,
            }),
        )
        .await
        .map_err(|e| publish_failed("Page post", e))?;

    tracing::info!(
        user_id = %credential.user_id,
        page_id = %page.id,
        post_id = %created.id,
        "Published to Facebook page"
    );

    Ok(PublishResponse {
        ok: true,
        page_id: Some(page.id),
        post_id: created.id,
    })
}
