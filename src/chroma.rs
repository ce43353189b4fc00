//! Minimal Chroma vector database client (HTTP API v2).
//!
//! Covers what the application needs: heartbeat, get-or-create a collection
//! by name, add embedded chunks, and nearest-neighbour queries.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::ChromaConfig;
use crate::health::ServiceHealth;

/// A record to insert into a collection.
#[derive(Debug, Clone)]
pub struct ChromaRecord {
    pub id: String,
    pub embedding: Vec<f32>,
    pub document: String,
    pub metadata: Value,
}

#[derive(Deserialize)]
struct CollectionResponse {
    id: String,
}

#[derive(Serialize)]
struct AddRequest<'a> {
    ids: Vec<&'a str>,
    embeddings: Vec<&'a [f32]>,
    documents: Vec<&'a str>,
    metadatas: Vec<&'a Value>,
}

#[derive(Serialize)]
struct QueryRequest<'a> {
    query_embeddings: [&'a [f32]; 1],
    n_results: usize,
    include: [&'static str; 1],
}

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(default)]
    documents: Option<Vec<Vec<Option<String>>>>,
}

#[derive(Clone)]
pub struct ChromaClient {
    base: String,
    tenant: String,
    database: String,
    http: reqwest::Client,
}

impl ChromaClient {
    pub fn new(config: &ChromaConfig) -> Result<Self> {
        Ok(Self {
            base: config.url.trim_end_matches('/').to_string(),
            tenant: config.tenant.clone(),
            database: config.database.clone(),
            http: reqwest::Client::builder().build()?,
        })
    }

    fn collections_url(&self) -> String {
        format!(
            "{}/api/v2/tenants/{}/databases/{}/collections",
            self.base, self.tenant, self.database
        )
    }

    /// `GET /api/v2/heartbeat`; `true` when the server answers 2xx.
    pub async fn heartbeat(&self) -> Result<bool> {
        let resp = self
            .http
            .get(format!("{}/api/v2/heartbeat", self.base))
            .send()
            .await?;
        Ok(resp.status().is_success())
    }

    /// Look up a collection by name, creating it when absent. Returns its id.
    pub async fn get_or_create_collection(&self, name: &str) -> Result<String> {
        let resp = self
            .http
            .post(self.collections_url())
            .json(&serde_json::json!({ "name": name, "get_or_create": true }))
            .send()
            .await?;
        let resp = check_status(resp, "create collection").await?;
        let collection: CollectionResponse = resp.json().await?;
        Ok(collection.id)
    }

    pub async fn add(&self, collection_id: &str, records: &[ChromaRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let body = AddRequest {
            ids: records.iter().map(|r| r.id.as_str()).collect(),
            embeddings: records.iter().map(|r| r.embedding.as_slice()).collect(),
            documents: records.iter().map(|r| r.document.as_str()).collect(),
            metadatas: records.iter().map(|r| &r.metadata).collect(),
        };
        let resp = self
            .http
            .post(format!("{}/{}/add", self.collections_url(), collection_id))
            .json(&body)
            .send()
            .await?;
        check_status(resp, "add records").await?;
        Ok(())
    }

    /// Return the documents of the `n_results` nearest records, best first.
    pub async fn query(
        &self,
        collection_id: &str,
        embedding: &[f32],
        n_results: usize,
    ) -> Result<Vec<String>> {
        let body = QueryRequest {
            query_embeddings: [embedding],
            n_results,
            include: ["documents"],
        };
        let resp = self
            .http
            .post(format!("{}/{}/query", self.collections_url(), collection_id))
            .json(&body)
            .send()
            .await?;
        let resp = check_status(resp, "query").await?;
        let parsed: QueryResponse = resp.json().await?;
        Ok(first_row_documents(parsed))
    }
}

fn first_row_documents(resp: QueryResponse) -> Vec<String> {
    resp.documents
        .and_then(|rows| rows.into_iter().next())
        .unwrap_or_default()
        .into_iter()
        .flatten()
        .collect()
}

async fn check_status(resp: reqwest::Response, what: &str) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    bail!("Chroma {} failed ({}): {}", what, status, body);
}

/// Probe the Chroma heartbeat.
pub async fn chroma_health(config: &ChromaConfig) -> ServiceHealth {
    let Ok(client) = ChromaClient::new(config) else {
        return ServiceHealth::error("ChromaDB is not reachable");
    };
    match client.heartbeat().await {
        Ok(true) => ServiceHealth::ok(),
        Ok(false) => ServiceHealth::error("ChromaDB is not responding"),
        Err(_) => ServiceHealth::error("ChromaDB is not reachable"),
    }
}
