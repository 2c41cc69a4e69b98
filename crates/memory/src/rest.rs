//! REST implementation of [`RetrievalStore`].

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use hermes_domain::config::RetrievalConfig;
use hermes_domain::{Error, Result};

use crate::store::{Procedure, RetrievalStore};

pub struct RestRetrievalClient {
    http: reqwest::Client,
    base_url: String,
}

impl RestRetrievalClient {
    pub fn new(config: &RetrievalConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .unwrap_or_default();
        Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post_json(&self, path: &str, body: Value) -> Result<Value> {
        let resp = self
            .http
            .post(self.url(path))
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Retrieval(e.to_string()))?;
        let status = resp.status();
        let value: Value = resp
            .json()
            .await
            .map_err(|e| Error::Retrieval(e.to_string()))?;
        if !status.is_success() {
            return Err(Error::Retrieval(format!("HTTP {status}: {value}")));
        }
        Ok(value)
    }
}

#[async_trait]
impl RetrievalStore for RestRetrievalClient {
    async fn retrieve_context(&self, query: &str) -> Result<String> {
        let value = self
            .post_json("/context", serde_json::json!({ "query": query }))
            .await?;
        Ok(value
            .get("context")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string())
    }

    async fn record_procedure(&self, procedure: Procedure) -> Result<()> {
        self.post_json(
            "/procedures",
            serde_json::to_value(&procedure).map_err(Error::Json)?,
        )
        .await?;
        Ok(())
    }

    async fn search_procedures(
        &self,
        query: &str,
        max_results: usize,
        tool_filter: Option<&str>,
    ) -> Result<Vec<Procedure>> {
        let value = self
            .post_json(
                "/procedures/search",
                serde_json::json!({
                    "query": query,
                    "max_results": max_results,
                    "tool_filter": tool_filter,
                }),
            )
            .await?;
        let results = value
            .get("procedures")
            .cloned()
            .unwrap_or(Value::Array(Vec::new()));
        serde_json::from_value(results).map_err(Error::Json)
    }

    async fn add_entry(&self, content: &str, category: Option<&str>) -> Result<String> {
        let value = self
            .post_json(
                "/entries",
                serde_json::json!({ "content": content, "category": category }),
            )
            .await?;
        Ok(value
            .get("id")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string())
    }

    async fn remove_entry(&self, id: &str) -> Result<()> {
        let resp = self
            .http
            .delete(self.url(&format!("/entries/{id}")))
            .send()
            .await
            .map_err(|e| Error::Retrieval(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(Error::Retrieval(format!(
                "delete failed: HTTP {}",
                resp.status()
            )));
        }
        Ok(())
    }

    async fn list_entries(&self, limit: usize) -> Result<Vec<Value>> {
        let resp = self
            .http
            .get(self.url(&format!("/entries?limit={limit}")))
            .send()
            .await
            .map_err(|e| Error::Retrieval(e.to_string()))?;
        let value: Value = resp
            .json()
            .await
            .map_err(|e| Error::Retrieval(e.to_string()))?;
        Ok(value
            .get("entries")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default())
    }
}
