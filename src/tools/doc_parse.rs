// src/tools/doc_parse.rs
//
// Document parsing: pre-read text passes straight through; binary formats
// go to the Tika collaborator when one is configured; the last resort is a
// lossy direct read. Parse failure is fatal to the ingest pipeline, so
// errors here are real errors.

use super::ToolContext;
use crate::contracts::ToolEnvelope;
use crate::registry::Tool;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::path::Path;
use std::time::Duration;

pub struct DocParseTool {
    ctx: ToolContext,
}

impl DocParseTool {
    pub fn new(ctx: ToolContext) -> Self {
        Self { ctx }
    }

    async fn extract_via_tika(&self, path: &str) -> Result<String> {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Cannot read {}", path))?;
        let client = reqwest::Client::new();
        let resp = client
            .put(format!("{}/tika", self.ctx.config.tika_url))
            .header("Accept", "text/plain")
            .body(bytes)
            .timeout(Duration::from_secs(30))
            .send()
            .await
            .context("Tika unreachable")?;
        if !resp.status().is_success() {
            anyhow::bail!("Tika returned {}", resp.status());
        }
        Ok(resp.text().await.context("Tika response unreadable")?)
    }
}

#[async_trait]
impl Tool for DocParseTool {
    fn name(&self) -> &'static str {
        "doc_parse"
    }

    fn version(&self) -> &'static str {
        "0.3.0"
    }

    async fn execute(&self, envelope: &ToolEnvelope) -> Result<Map<String, Value>> {
        let text = envelope.input_str("text");
        let path = envelope.input_str("path");

        let content_text = if !text.is_empty() {
            text.to_string()
        } else if !self.ctx.config.tika_url.is_empty() {
            match self.extract_via_tika(path).await {
                Ok(extracted) => extracted,
                Err(e) => {
                    log::warn!("[PARSE]  Tika failed for {} ({}), reading directly", path, e);
                    read_lossy(path).await?
                }
            }
        } else {
            read_lossy(path).await?
        };

        let mime = crate::capture::detect_mime_by_extension(Path::new(path));

        let mut out = Map::new();
        out.insert("content_text".into(), json!(content_text.trim()));
        out.insert("mime".into(), json!(mime));
        Ok(out)
    }
}

async fn read_lossy(path: &str) -> Result<String> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Cannot read {}", path))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
