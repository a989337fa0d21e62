//! Social account linking.
//!
//! Users link Facebook and Instagram accounts through a three-legged OAuth
//! flow. The resulting long-lived credential is stored per user and
//! provider, and used to publish on the user's behalf.
//!
//! ## Flow
//!
//! 1. Client calls `/auth/{provider}/start` with its identity token
//! 2. A pending authorization is recorded under a random state token
//! 3. The browser is sent to the consent dialog
//! 4. The provider redirects to `/auth/{provider}/callback`
//! 5. The state is taken, the code exchanged twice, the credential stored
//! 6. The browser returns to `return_to?{provider}=connected`

pub mod api;
pub mod config;
pub mod facebook;
pub mod flow;
pub mod instagram;
pub mod pages;
pub mod provider;
pub mod store;
pub mod tiktok;
pub mod types;

pub use config::LinkConfig;
pub use flow::LinkService;
pub use store::{CredentialStore, MemoryStateStore};
