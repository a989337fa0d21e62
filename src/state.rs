//! Server state management.
//!
//! Owns the stores and the linking service shared by every handler.

use std::sync::Arc;

use crate::error::Result;
use crate::identity::IdentityVerifier;
use crate::linking::{CredentialStore, LinkConfig, LinkService, MemoryStateStore};

/// Shared server state.
#[derive(Clone)]
pub struct AppState {
    pub links: LinkService,

    /// Resolved configuration, also reachable through `links`.
    pub config: Arc<LinkConfig>,
}

impl AppState {
    /// Build the stores and linking service, loading persisted credentials.
    pub fn new(config: LinkConfig, identity: Arc<dyn IdentityVerifier>) -> Result<Self> {
        let config = Arc::new(config);

        let states = MemoryStateStore::new(config.state_ttl_secs);
        let tokens = CredentialStore::new(config.data_dir.as_deref());
        let loaded = tokens.load_from_disk();
        if loaded > 0 {
            tracing::info!(count = loaded, "Loaded linked credentials from disk");
        }

        let links = LinkService::new(
            config.clone(),
            Arc::new(states),
            Arc::new(tokens),
            identity,
        )?;

        Ok(Self { links, config })
    }

    /// Drop expired pending authorizations.
    pub fn cleanup_expired(&self) {
        let removed = self.links.purge_expired();
        if removed > 0 {
            tracing::info!(removed = removed, "Purged expired pending authorizations");
        }
    }
}
