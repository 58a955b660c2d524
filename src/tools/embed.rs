// src/tools/embed.rs
//
// =============================================================================
// MINDLOOM: EMBEDDING TOOLS (v 0.1 )
// =============================================================================
//
// text_embed / vision_embed: encode with the process-wide deterministic
// encoder and upsert to the object store. When the object store is
// unconfigured or unreachable the tool still succeeds — vector_ref comes
// back empty and the card records the fallback.

use super::ToolContext;
use crate::contracts::{utcnow_iso, ToolEnvelope};
use crate::embedder;
use crate::qdrant::{TEXT_COLLECTION, VISION_COLLECTION};
use crate::registry::Tool;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Map, Value};

const MAX_EMBED_CHARS: usize = 8192;

// ============================================================================
// 1. TEXT
// ============================================================================

pub struct TextEmbedTool {
    ctx: ToolContext,
}

impl TextEmbedTool {
    pub fn new(ctx: ToolContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Tool for TextEmbedTool {
    fn name(&self) -> &'static str {
        "text_embed"
    }

    fn version(&self) -> &'static str {
        "0.4.0"
    }

    async fn execute(&self, envelope: &ToolEnvelope) -> Result<Map<String, Value>> {
        let text = envelope.input_str("text");
        let memory_id = envelope.input_str("memory_id");
        let source_type = {
            let st = envelope.input_str("source_type");
            if st.is_empty() { "file_capture" } else { st }
        };

        let mut out = Map::new();
        if text.trim().is_empty() {
            out.insert("vector_ref".into(), json!(""));
            return Ok(out);
        }

        let truncated: String = text.chars().take(MAX_EMBED_CHARS).collect();
        let encoder = embedder::text_encoder();
        let vector = encoder.encode_text(&truncated);

        if !self.ctx.qdrant.is_configured() {
            out.insert("vector_ref".into(), json!(""));
            return Ok(out);
        }

        let point_id = if memory_id.is_empty() {
            crate::contracts::new_id()
        } else {
            memory_id.to_string()
        };
        let payload = json!({
            "memory_id": point_id,
            "modality": "text",
            "source_type": source_type,
            "created_at": utcnow_iso(),
            "text_preview": truncated.chars().take(200).collect::<String>(),
        });

        let upsert = async {
            self.ctx
                .qdrant
                .ensure_collection(TEXT_COLLECTION, encoder.dim())
                .await?;
            self.ctx
                .qdrant
                .upsert_point(TEXT_COLLECTION, &point_id, &vector, payload)
                .await
        };

        match upsert.await {
            Ok(()) => {
                let vector_ref = format!("qdrant:{}:{}", TEXT_COLLECTION, point_id);
                log::info!("[EMBED]  text vector upserted: {}", vector_ref);
                out.insert("vector_ref".into(), json!(vector_ref));
            }
            Err(e) => {
                log::warn!("[EMBED]  object store unavailable ({}), empty vector_ref", e);
                out.insert("vector_ref".into(), json!(""));
                out.insert("error".into(), json!(e.to_string()));
            }
        }
        Ok(out)
    }
}

// ============================================================================
// 2. VISION
// ============================================================================

pub struct VisionEmbedTool {
    ctx: ToolContext,
}

impl VisionEmbedTool {
    pub fn new(ctx: ToolContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Tool for VisionEmbedTool {
    fn name(&self) -> &'static str {
        "vision_embed"
    }

    fn version(&self) -> &'static str {
        "0.3.0"
    }

    async fn execute(&self, envelope: &ToolEnvelope) -> Result<Map<String, Value>> {
        let image_path = envelope.input_str("image_path");
        let memory_id = envelope.input_str("memory_id");

        // Content-addressed encoding: the image bytes are the signal.
        let bytes = tokio::fs::read(image_path).await?;
        let encoder = embedder::vision_encoder();
        let vector = tokio::task::spawn_blocking(move || encoder.encode_bytes(&bytes)).await?;

        let mut out = Map::new();
        out.insert("model".into(), json!(self.ctx.config.openclip_mode));

        if !self.ctx.qdrant.is_configured() {
            out.insert("vector_ref".into(), json!(""));
            return Ok(out);
        }

        let point_id = if memory_id.is_empty() {
            crate::contracts::new_id()
        } else {
            memory_id.to_string()
        };
        let payload = json!({
            "memory_id": point_id,
            "modality": "vision",
            "source_type": envelope.input_str("source_type"),
            "created_at": utcnow_iso(),
        });

        let upsert = async {
            self.ctx
                .qdrant
                .ensure_collection(VISION_COLLECTION, encoder.dim())
                .await?;
            self.ctx
                .qdrant
                .upsert_point(VISION_COLLECTION, &point_id, &vector, payload)
                .await
        };

        match upsert.await {
            Ok(()) => {
                let vector_ref = format!("qdrant:{}:{}", VISION_COLLECTION, point_id);
                log::info!("[EMBED]  vision vector upserted: {}", vector_ref);
                out.insert("vector_ref".into(), json!(vector_ref));
            }
            Err(e) => {
                log::warn!("[EMBED]  object store unavailable ({}), empty vector_ref", e);
                out.insert("vector_ref".into(), json!(""));
                out.insert("error".into(), json!(e.to_string()));
            }
        }
        Ok(out)
    }
}
