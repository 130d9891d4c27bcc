use std::collections::HashSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::PipelineError;

/// One vector ready for upsert: id is the chunk's content hash, metadata is
/// the display payload served back at query time.
#[derive(Debug, Clone, Serialize)]
pub struct VectorRecord {
    pub id: String,
    pub values: Vec<f32>,
    pub metadata: Value,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueryMatch {
    pub id: String,
    pub score: f32,
    #[serde(default)]
    pub metadata: Option<Value>,
}

/// Vector store contract. Upsert must be idempotent on id: writing the same
/// id twice leaves the item count unchanged.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn upsert(&self, vectors: &[VectorRecord]) -> Result<(), PipelineError>;
    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<QueryMatch>, PipelineError>;
    /// Total vectors in the store's namespace.
    async fn stats(&self) -> Result<u64, PipelineError>;
    /// Which of the given ids the store already holds.
    async fn known_ids(&self, ids: &[String]) -> Result<HashSet<String>, PipelineError>;
}

/// Pinecone index client, scoped to one namespace.
pub struct PineconeStore {
    client: reqwest::Client,
    api_key: String,
    index_host: String,
    namespace: String,
}

impl PineconeStore {
    pub fn new(
        api_key: impl Into<String>,
        index_host: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Self {
        let host = index_host.into();
        let index_host = if host.starts_with("http") {
            host
        } else {
            format!("https://{}", host)
        };
        PineconeStore {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            index_host,
            namespace: namespace.into(),
        }
    }

    async fn post_json(&self, path: &str, body: &Value) -> Result<Value, PipelineError> {
        let url = format!("{}{}", self.index_host, path);
        let response = self
            .client
            .post(&url)
            .header("Api-Key", &self.api_key)
            .json(body)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(PipelineError::from_status(status, text));
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl VectorStore for PineconeStore {
    async fn upsert(&self, vectors: &[VectorRecord]) -> Result<(), PipelineError> {
        if vectors.is_empty() {
            return Ok(());
        }
        self.post_json(
            "/vectors/upsert",
            &json!({
                "vectors": vectors,
                "namespace": self.namespace,
            }),
        )
        .await?;
        Ok(())
    }

    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<QueryMatch>, PipelineError> {
        let response = self
            .post_json(
                "/query",
                &json!({
                    "vector": vector,
                    "topK": top_k,
                    "namespace": self.namespace,
                    "includeMetadata": true,
                }),
            )
            .await?;

        let matches = response
            .get("matches")
            .cloned()
            .unwrap_or_else(|| json!([]));
        Ok(serde_json::from_value(matches)?)
    }

    async fn stats(&self) -> Result<u64, PipelineError> {
        let response = self.post_json("/describe_index_stats", &json!({})).await?;
        let count = response
            .pointer(&format!("/namespaces/{}/vectorCount", self.namespace))
            .and_then(|v| v.as_u64())
            .or_else(|| response.get("totalVectorCount").and_then(|v| v.as_u64()))
            .unwrap_or(0);
        Ok(count)
    }

    async fn known_ids(&self, ids: &[String]) -> Result<HashSet<String>, PipelineError> {
        if ids.is_empty() {
            return Ok(HashSet::new());
        }
        let url = format!("{}/vectors/fetch", self.index_host);
        let mut query: Vec<(&str, &str)> = ids.iter().map(|id| ("ids", id.as_str())).collect();
        query.push(("namespace", self.namespace.as_str()));

        let response = self
            .client
            .get(&url)
            .header("Api-Key", &self.api_key)
            .query(&query)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(PipelineError::from_status(status, text));
        }
        let payload: Value = response.json().await?;

        Ok(payload
            .get("vectors")
            .and_then(|v| v.as_object())
            .map(|v| v.keys().cloned().collect())
            .unwrap_or_default())
    }
}
