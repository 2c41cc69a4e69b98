//! `hermes-memory` — client for the external retrieval-augmented memory
//! store.
//!
//! The store itself is an external collaborator; this crate only carries
//! the [`RetrievalStore`] trait the core consumes, a REST implementation
//! ([`RestRetrievalClient`]), and a no-op fallback used when the
//! collaborator is not configured.
//!
//! Use [`create_store`] to build the right implementation from config.

pub mod rest;
pub mod store;

pub use rest::RestRetrievalClient;
pub use store::{NoopRetrievalStore, Procedure, RetrievalStore};

use std::sync::Arc;

use hermes_domain::config::RetrievalConfig;

/// Build the retrieval-store client. An empty base URL yields the no-op
/// implementation: retrieval context is simply absent.
pub fn create_store(config: &RetrievalConfig) -> Arc<dyn RetrievalStore> {
    if config.base_url.is_empty() {
        tracing::info!("retrieval store not configured — using no-op client");
        Arc::new(NoopRetrievalStore)
    } else {
        Arc::new(RestRetrievalClient::new(config))
    }
}
