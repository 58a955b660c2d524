// src/tools/caption.rs
//
// Image captioning. The good path is a generative multimodal model behind
// Ollama (image shipped as base64); the fallback is a filename heuristic
// that only states verifiable facts. The `model` field tells the
// orchestrator which branch produced the caption — generative captions can
// stand in as the card summary, heuristic ones cannot.

use super::ToolContext;
use crate::contracts::ToolEnvelope;
use crate::llm;
use crate::registry::Tool;
use anyhow::Result;
use async_trait::async_trait;
use base64::Engine;
use serde_json::{json, Map, Value};
use std::path::Path;
use std::time::Duration;

const MAX_CAPTION_CHARS: usize = 300;

pub struct ImageCaptionTool {
    ctx: ToolContext,
}

impl ImageCaptionTool {
    pub fn new(ctx: ToolContext) -> Self {
        Self { ctx }
    }

    async fn caption_generative(&self, image_path: &str) -> Option<String> {
        if !self.ctx.llm.available().await {
            return None;
        }
        let bytes = tokio::fs::read(image_path).await.ok()?;
        let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
        let caption = self
            .ctx
            .llm
            .generate(
                llm::caption_prompt(),
                None,
                false,
                Some(vec![encoded]),
                Duration::from_secs(60),
            )
            .await
            .ok()?;
        let caption = caption.trim();
        if caption.is_empty() {
            None
        } else {
            Some(caption.chars().take(MAX_CAPTION_CHARS).collect())
        }
    }
}

#[async_trait]
impl Tool for ImageCaptionTool {
    fn name(&self) -> &'static str {
        "image_caption"
    }

    fn version(&self) -> &'static str {
        "0.2.0"
    }

    async fn execute(&self, envelope: &ToolEnvelope) -> Result<Map<String, Value>> {
        let image_path = envelope.input_str("image_path");

        let mut out = Map::new();
        if !Path::new(image_path).is_file() {
            out.insert("caption".into(), json!(""));
            out.insert("model".into(), json!("none"));
            out.insert("status".into(), json!("failed"));
            out.insert("error".into(), json!(format!("File not found: {}", image_path)));
            out.insert("subjects".into(), json!([]));
            out.insert("tags".into(), json!([]));
            return Ok(out);
        }

        if let Some(caption) = self.caption_generative(image_path).await {
            log::info!(
                "[CAPTION] generative caption for {}: {}",
                basename(image_path),
                caption.chars().take(80).collect::<String>()
            );
            out.insert("caption".into(), json!(caption));
            out.insert("model".into(), json!("generative"));
            out.insert("status".into(), json!("success"));
            out.insert("subjects".into(), json!([]));
            out.insert("tags".into(), json!([]));
            return Ok(out);
        }

        // Heuristic: only verifiable information — no hallucinated content,
        // no subject labels to feed into the entity graph.
        let stem = Path::new(image_path)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image".into());
        let clean_name = stem.replace(['-', '_', '.'], " ").trim().to_string();
        let fmt = Path::new(image_path)
            .extension()
            .map(|e| e.to_string_lossy().to_uppercase())
            .unwrap_or_default();
        let caption: String = format!("Image: {} ({})", clean_name, fmt)
            .chars()
            .take(MAX_CAPTION_CHARS)
            .collect();

        log::info!("[CAPTION] heuristic caption for {}: {}", basename(image_path), caption);
        out.insert("caption".into(), json!(caption));
        out.insert("model".into(), json!("heuristic"));
        out.insert("status".into(), json!("success"));
        out.insert("subjects".into(), json!([]));
        out.insert("tags".into(), json!([]));
        Ok(out)
    }
}

fn basename(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string())
}
