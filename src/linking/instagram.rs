//! Instagram linking and media publishing.
//!
//! Instagram is linked through Facebook Login. After the long-lived
//! exchange the business account behind the user's first page is looked up
//! and stored with the credential; publishing needs it.

use async_trait::async_trait;
use serde::Deserialize;

use super::config::INSTAGRAM_SCOPES;
use super::facebook::first_managed_page;
use super::provider::{publish_failed, CreatedObject, GraphClient, GraphError, OAuthProvider};
use super::types::{
    ExtraUpdate, InstagramMedia, LinkedCredential, Provider, ProviderExtra, PublishResponse,
};
use crate::error::{LinkError, Result};

pub struct InstagramProvider;

#[async_trait]
impl OAuthProvider for InstagramProvider {
    fn provider(&self) -> Provider {
        Provider::Instagram
    }

    fn default_scopes(&self) -> &'static [&'static str] {
        INSTAGRAM_SCOPES
    }

    async fn post_exchange(&self, graph: &GraphClient, access_token: &str) -> ExtraUpdate {
        match resolve_business_account(graph, access_token).await {
            Ok(Some(extra)) => {
                tracing::info!(
                    ig_business_id = ?extra.ig_business_id,
                    page_id = ?extra.page_id,
                    "Resolved Instagram business account"
                );
                ExtraUpdate::Replace(extra)
            }
            Ok(None) => {
                tracing::warn!("No Instagram business account linked to a managed page");
                ExtraUpdate::Clear
            }
            Err(e) => {
                e.log("Instagram business account lookup");
                ExtraUpdate::Clear
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct BusinessAccountRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct PageBusinessAccount {
    instagram_business_account: Option<BusinessAccountRef>,
}

/// Find the Instagram business account attached to the user's first page.
async fn resolve_business_account(
    graph: &GraphClient,
    access_token: &str,
) -> std::result::Result<Option<ProviderExtra>, GraphError> {
    let Some(page) = first_managed_page(graph, access_token).await? else {
        return Ok(None);
    };

    let url = graph.config().graph_url(&page.id);
    let details: PageBusinessAccount = graph
        .get(
            &url,
            &[
                ("fields", "instagram_business_account{id}"),
                ("access_token", access_token),
            ],
        )
        .await?;

    Ok(details.instagram_business_account.map(|account| ProviderExtra {
        ig_business_id: Some(account.id),
        page_id: Some(page.id),
    }))
}

/// Create a media container for `media` and publish it.
pub async fn publish(
    graph: &GraphClient,
    credential: &LinkedCredential,
    media: InstagramMedia,
) -> Result<PublishResponse> {
    let ig_business_id = credential
        .provider_extra
        .as_ref()
        .and_then(|extra| extra.ig_business_id.as_deref())
        .ok_or(LinkError::MissingMapping)?;

    let image_url = media
        .image_url
        .as_deref()
        .filter(|u| !u.is_empty())
        .ok_or_else(|| LinkError::BadRequest("imageUrl required".to_string()))?;
    let caption = media.caption.as_deref().unwrap_or("");
    let token = credential.access_token.as_str();

    let container: CreatedObject = graph
        .post_query(
            &graph.config().graph_url(&format!("{}/media", ig_business_id)),
            &[
                ("image_url", image_url),
                ("caption", caption),
                ("access_token", token),
            ],
        )
        .await
        .map_err(|e| publish_failed("Media container creation", e))?;

    let published: CreatedObject = graph
        .post_query(
            &graph
                .config()
                .graph_url(&format!("{}/media_publish", ig_business_id)),
            &[("creation_id", container.id.as_str()), ("access_token", token)],
        )
        .await
        .map_err(|e| publish_failed("Media publish", e))?;

    tracing::info!(
        user_id = %credential.user_id,
        ig_business_id = %ig_business_id,
        post_id = %published.id,
        "Published to Instagram"
    );

    Ok(PublishResponse {
        ok: true,
        page_id: None,
        post_id: published.id,
    })
}
