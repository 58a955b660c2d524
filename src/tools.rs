// src/tools.rs
//
// =============================================================================
// MINDLOOM: TOOL IMPLEMENTATIONS (v 0.1 )
// =============================================================================
//
// The opaque leaves behind the dispatch contract. Each tool does one job
// and declares its schema at registration; timeout/byte-cap/persistence
// enforcement lives in the wrapper (registry.rs), never here.

use crate::config::Config;
use crate::db::Store;
use crate::llm::LlmClient;
use crate::qdrant::QdrantClient;
use crate::registry::ToolRegistry;
use serde_json::json;
use std::sync::Arc;

pub mod asr;
pub mod caption;
pub mod chat;
pub mod doc_parse;
pub mod embed;
pub mod extract;
pub mod graph_build;
pub mod ocr;
pub mod summarize;

/// Shared context threaded into every tool at construction.
#[derive(Clone)]
pub struct ToolContext {
    pub store: Store,
    pub config: Config,
    pub llm: LlmClient,
    pub qdrant: QdrantClient,
}

impl ToolContext {
    pub fn new(store: Store, config: Config) -> Self {
        let llm = LlmClient::new(config.ollama_url.clone(), config.ollama_model.clone());
        let qdrant = QdrantClient::new(config.qdrant_url.clone());
        Self {
            store,
            config,
            llm,
            qdrant,
        }
    }
}

/// Build the full registry: every processing step the orchestrator can
/// dispatch, with its declared schemas.
pub fn build_registry(ctx: ToolContext) -> ToolRegistry {
    let ctx = Arc::new(ctx);
    let mut registry = ToolRegistry::new();

    {
        let ctx = ctx.clone();
        registry.register(
            "doc_parse",
            "0.3.0",
            "Parse a document into plain text (Tika when configured, direct read otherwise).",
            json!({"type": "object", "properties": {
                "text": {"type": "string"}, "path": {"type": "string"}, "blob_id": {"type": "string"}
            }}),
            json!({"type": "object", "properties": {
                "content_text": {"type": "string"}, "mime": {"type": "string"}
            }}),
            Box::new(move || Box::new(doc_parse::DocParseTool::new((*ctx).clone()))),
        );
    }
    {
        let ctx = ctx.clone();
        registry.register(
            "ocr",
            "0.2.0",
            "Extract text from an image via Tesseract.",
            json!({"type": "object", "properties": {"image_path": {"type": "string"}},
                   "required": ["image_path"]}),
            json!({"type": "object", "properties": {
                "text": {"type": "string"}, "status": {"type": "string"},
                "avg_confidence": {"type": "number"}
            }}),
            Box::new(move || Box::new(ocr::OcrTool::new((*ctx).clone()))),
        );
    }
    {
        let ctx = ctx.clone();
        registry.register(
            "asr",
            "0.2.0",
            "Transcribe audio to text (external whisper binary or stub).",
            json!({"type": "object", "properties": {"audio_path": {"type": "string"}},
                   "required": ["audio_path"]}),
            json!({"type": "object", "properties": {
                "text": {"type": "string"}, "model": {"type": "string"}
            }}),
            Box::new(move || Box::new(asr::AsrTool::new((*ctx).clone()))),
        );
    }
    {
        let ctx = ctx.clone();
        registry.register(
            "text_embed",
            "0.4.0",
            "Embed text and upsert the vector to the object store.",
            json!({"type": "object", "properties": {
                "text": {"type": "string"}, "memory_id": {"type": "string"},
                "source_type": {"type": "string"}
            }, "required": ["text"]}),
            json!({"type": "object", "properties": {"vector_ref": {"type": "string"}}}),
            Box::new(move || Box::new(embed::TextEmbedTool::new((*ctx).clone()))),
        );
    }
    {
        let ctx = ctx.clone();
        registry.register(
            "vision_embed",
            "0.3.0",
            "Embed an image and upsert the vector to the object store.",
            json!({"type": "object", "properties": {
                "image_path": {"type": "string"}, "memory_id": {"type": "string"}
            }, "required": ["image_path"]}),
            json!({"type": "object", "properties": {"vector_ref": {"type": "string"}}}),
            Box::new(move || Box::new(embed::VisionEmbedTool::new((*ctx).clone()))),
        );
    }
    {
        let ctx = ctx.clone();
        registry.register(
            "image_caption",
            "0.2.0",
            "Generate a short image caption (generative model or filename heuristic).",
            json!({"type": "object", "properties": {"image_path": {"type": "string"}},
                   "required": ["image_path"]}),
            json!({"type": "object", "properties": {
                "caption": {"type": "string"}, "model": {"type": "string"},
                "status": {"type": "string"}, "subjects": {"type": "array"},
                "tags": {"type": "array"}
            }}),
            Box::new(move || Box::new(caption::ImageCaptionTool::new((*ctx).clone()))),
        );
    }
    {
        let ctx = ctx.clone();
        registry.register(
            "summarizer",
            "0.6.0",
            "Produce a 1-3 sentence summary via the local LLM; sentence fallback offline.",
            json!({"type": "object", "properties": {
                "content_text": {"type": "string"}, "title": {"type": ["string", "null"]},
                "max_chars": {"type": "integer", "default": 400}
            }, "required": ["content_text"]}),
            json!({"type": "object", "properties": {
                "summary": {"type": "string"}, "llm_used": {"type": "boolean"}
            }}),
            Box::new(move || Box::new(summarize::SummarizerTool::new((*ctx).clone()))),
        );
    }
    {
        let ctx = ctx.clone();
        registry.register(
            "extractor",
            "0.6.0",
            "Extract entities, tags, and actions via the local LLM; empty offline.",
            json!({"type": "object", "properties": {
                "content_text": {"type": "string"}, "title": {"type": ["string", "null"]},
                "max_entities": {"type": "integer", "default": 30}
            }, "required": ["content_text"]}),
            json!({"type": "object", "properties": {
                "entities": {"type": "array"}, "tags": {"type": "array"},
                "actions": {"type": "array"}
            }}),
            Box::new(move || Box::new(extract::ExtractorTool::new((*ctx).clone()))),
        );
    }
    {
        let ctx = ctx.clone();
        registry.register(
            "graph_builder",
            "0.3.0",
            "Canonicalize extracted entities into graph nodes and MENTIONS edges.",
            json!({"type": "object", "properties": {
                "entities": {"type": "array"}, "memory_id": {"type": "string"},
                "source": {"type": "object"}
            }}),
            json!({"type": "object", "properties": {
                "nodes": {"type": "array"}, "edges": {"type": "array"}
            }}),
            Box::new(move || Box::new(graph_build::GraphBuilderTool::new((*ctx).clone()))),
        );
    }
    {
        let ctx = ctx.clone();
        registry.register(
            "retrieval",
            "0.3.0",
            "Full-text search over memory cards; honours pre-computed overrides.",
            json!({"type": "object", "properties": {
                "query": {"type": "string"}, "limit": {"type": "integer", "default": 10}
            }, "required": ["query"]}),
            json!({"type": "object", "properties": {"results": {"type": "array"}}}),
            Box::new(move || Box::new(chat::RetrievalTool::new((*ctx).clone()))),
        );
    }
    {
        let ctx = ctx.clone();
        registry.register(
            "weaver",
            "0.3.0",
            "Weave retrieved evidence into a cited answer; honours pre-computed overrides.",
            json!({"type": "object", "properties": {
                "question": {"type": "string"}, "evidence": {"type": "array"}
            }}),
            json!({"type": "object", "properties": {
                "answer": {"type": "string"}, "citations": {"type": "array"}
            }}),
            Box::new(move || Box::new(chat::WeaverTool::new((*ctx).clone()))),
        );
    }
    {
        registry.register(
            "verifier",
            "0.3.0",
            "Verify an answer against its evidence; honours pre-computed overrides.",
            json!({"type": "object", "properties": {
                "question": {"type": "string"}, "answer": {"type": "string"},
                "evidence": {"type": "array"}, "citations": {"type": "array"}
            }}),
            json!({"type": "object", "properties": {
                "verdict": {"type": "string"}, "revised_answer": {"type": "string"},
                "issues": {"type": "array"}
            }}),
            Box::new(move || Box::new(chat::VerifierTool::new((*ctx).clone()))),
        );
    }

    registry
}
