//! The `RetrievalStore` trait defines the interface to the external RAG
//! collaborator (REST backend or test double).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use hermes_domain::Result;

/// A stored procedure: something the agent did successfully, kept so
/// similar future requests can reuse the approach.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Procedure {
    pub description: String,
    pub solution: String,
    pub tool_used: String,
}

/// Abstraction over the retrieval store consumed by the core.
#[async_trait]
pub trait RetrievalStore: Send + Sync {
    /// Fetch context relevant to a query, pre-formatted for prompt
    /// injection. Empty string means nothing relevant.
    async fn retrieve_context(&self, query: &str) -> Result<String>;

    /// Record a successfully executed procedure.
    async fn record_procedure(&self, procedure: Procedure) -> Result<()>;

    /// Search stored procedures (tool filter optional).
    async fn search_procedures(
        &self,
        query: &str,
        max_results: usize,
        tool_filter: Option<&str>,
    ) -> Result<Vec<Procedure>>;

    /// Add a free-form knowledge entry. Returns its id.
    async fn add_entry(&self, content: &str, category: Option<&str>) -> Result<String>;

    /// Remove an entry by id.
    async fn remove_entry(&self, id: &str) -> Result<()>;

    /// List entries, newest first.
    async fn list_entries(&self, limit: usize) -> Result<Vec<serde_json::Value>>;
}

/// Fallback used when no store is configured: retrieval yields nothing and
/// writes are dropped.
pub struct NoopRetrievalStore;

#[async_trait]
impl RetrievalStore for NoopRetrievalStore {
    async fn retrieve_context(&self, _query: &str) -> Result<String> {
        Ok(String::new())
    }

    async fn record_procedure(&self, _procedure: Procedure) -> Result<()> {
        Ok(())
    }

    async fn search_procedures(
        &self,
        _query: &str,
        _max_results: usize,
        _tool_filter: Option<&str>,
    ) -> Result<Vec<Procedure>> {
        Ok(Vec::new())
    }

    async fn add_entry(&self, _content: &str, _category: Option<&str>) -> Result<String> {
        Ok(String::new())
    }

    async fn remove_entry(&self, _id: &str) -> Result<()> {
        Ok(())
    }

    async fn list_entries(&self, _limit: usize) -> Result<Vec<serde_json::Value>> {
        Ok(Vec::new())
    }
}
