// src/qdrant.rs
//
// =============================================================================
// MINDLOOM: OBJECT STORE CLIENT (v 0.1 )
// =============================================================================
//
// Minimal Qdrant HTTP client: collection management, point upsert, and
// vector search. Collections are created on demand with the encoder's
// dimensionality. An empty base URL means "not configured" and every call
// degrades to its deterministic fallback.

use anyhow::{anyhow, Result};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

pub const TEXT_COLLECTION: &str = "text";
pub const VISION_COLLECTION: &str = "vision";

const TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct QdrantClient {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Debug, Clone)]
pub struct SearchHit {
    pub id: String,
    pub score: f64,
    pub payload: Value,
}

impl QdrantClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.base_url.is_empty()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Create the collection if it does not already exist. A 409 from a
    /// racing creator counts as success.
    pub async fn ensure_collection(&self, name: &str, vector_size: usize) -> Result<()> {
        if !self.is_configured() {
            return Err(anyhow!("object store not configured"));
        }

        let probe = self
            .client
            .get(self.url(&format!("/collections/{}", name)))
            .timeout(TIMEOUT)
            .send()
            .await;
        if let Ok(resp) = probe {
            if resp.status().is_success() {
                return Ok(());
            }
        }

        let body = json!({
            "vectors": { "size": vector_size, "distance": "Cosine" }
        });
        let resp = self
            .client
            .put(self.url(&format!("/collections/{}", name)))
            .json(&body)
            .timeout(TIMEOUT)
            .send()
            .await?;

        if resp.status().is_success() || resp.status().as_u16() == 409 {
            log::info!("[QDRANT] collection '{}' ready (dim={})", name, vector_size);
            Ok(())
        } else {
            Err(anyhow!(
                "collection create failed: {} {}",
                resp.status(),
                resp.text().await.unwrap_or_default()
            ))
        }
    }

    /// Upsert a single point with wait=true so a following search sees it.
    pub async fn upsert_point(
        &self,
        collection: &str,
        point_id: &str,
        vector: &[f32],
        payload: Value,
    ) -> Result<()> {
        if !self.is_configured() {
            return Err(anyhow!("object store not configured"));
        }
        let body = json!({
            "points": [
                { "id": point_id, "vector": vector, "payload": payload }
            ]
        });
        let resp = self
            .client
            .put(self.url(&format!("/collections/{}/points", collection)))
            .query(&[("wait", "true")])
            .json(&body)
            .timeout(TIMEOUT)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(anyhow!(
                "point upsert failed: {} {}",
                resp.status(),
                resp.text().await.unwrap_or_default()
            ));
        }
        Ok(())
    }

    /// Nearest-neighbor search. Returns an empty list on any failure so the
    /// retrieval engine can keep going on its other signals.
    pub async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
        filter: Option<Value>,
    ) -> Vec<SearchHit> {
        if !self.is_configured() {
            return Vec::new();
        }

        #[derive(Deserialize)]
        struct SearchResponse {
            #[serde(default)]
            result: Vec<RawHit>,
        }
        #[derive(Deserialize)]
        struct RawHit {
            id: Value,
            score: f64,
            #[serde(default)]
            payload: Value,
        }

        let mut body = json!({
            "vector": vector,
            "limit": limit,
            "with_payload": true
        });
        if let Some(f) = filter {
            body["filter"] = f;
        }

        let resp = self
            .client
            .post(self.url(&format!("/collections/{}/points/search", collection)))
            .json(&body)
            .timeout(TIMEOUT)
            .send()
            .await;

        let resp = match resp {
            Ok(r) if r.status().is_success() => r,
            Ok(r) => {
                log::warn!("[QDRANT] search on '{}' failed: {}", collection, r.status());
                return Vec::new();
            }
            Err(e) => {
                log::warn!("[QDRANT] search on '{}' unreachable: {}", collection, e);
                return Vec::new();
            }
        };

        match resp.json::<SearchResponse>().await {
            Ok(data) => data
                .result
                .into_iter()
                .map(|h| SearchHit {
                    id: match h.id {
                        Value::String(s) => s,
                        other => other.to_string(),
                    },
                    score: h.score,
                    payload: h.payload,
                })
                .collect(),
            Err(e) => {
                log::warn!("[QDRANT] search decode failed: {}", e);
                Vec::new()
            }
        }
    }
}
