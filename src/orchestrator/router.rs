// src/orchestrator/router.rs
//
// Pipeline selection and step templates. The mime prefix decides first,
// the extension breaks ties for mislabelled files; everything that is
// neither image nor audio goes through doc_parse.

use super::PipelineType;
use serde_json::{json, Map, Value};
use std::path::Path;

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "bmp", "tiff", "webp", "svg"];
const AUDIO_EXTENSIONS: &[&str] = &["mp3", "wav", "flac", "ogg", "m4a", "aac", "wma", "opus"];

pub fn choose_pipeline(mime: &str, path: &str) -> PipelineType {
    let ext = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    if mime.starts_with("image/") || IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        return PipelineType::Ocr;
    }
    if mime.starts_with("audio/") || AUDIO_EXTENSIONS.contains(&ext.as_str()) {
        return PipelineType::Asr;
    }
    PipelineType::DocParse
}

pub fn is_image_pipeline(pipeline: PipelineType) -> bool {
    pipeline == PipelineType::Ocr
}

/// One step in a sequential plan. Inputs left empty here are filled by the
/// orchestrator from upstream outputs at runtime.
#[derive(Debug, Clone)]
pub struct ToolStep {
    pub tool_name: &'static str,
    pub intent: &'static str,
    pub inputs: Map<String, Value>,
    pub timeout_ms: u64,
}

impl ToolStep {
    fn new(tool_name: &'static str, intent: &'static str, timeout_ms: u64) -> Self {
        Self {
            tool_name,
            intent,
            inputs: Map::new(),
            timeout_ms,
        }
    }
}

/// Ordered steps for the sequential pipelines. The image pipeline is wired
/// directly in ingest.rs (parallel fan-out does not fit a linear plan).
pub fn build_ingest_steps(pipeline: PipelineType, path: &str, blob_id: &str) -> Vec<ToolStep> {
    match pipeline {
        PipelineType::DocParse => {
            let mut parse = ToolStep::new("doc_parse", "ingest.parse", 15_000);
            parse.inputs.insert("text".into(), json!(""));
            parse.inputs.insert("path".into(), json!(path));
            parse.inputs.insert("blob_id".into(), json!(blob_id));
            vec![
                parse,
                ToolStep::new("summarizer", "ingest.summarize", 180_000),
                ToolStep::new("extractor", "ingest.extract", 180_000),
                ToolStep::new("text_embed", "ingest.embed", 60_000),
                ToolStep::new("graph_builder", "ingest.graph", 10_000),
            ]
        }
        PipelineType::Asr => {
            let mut asr = ToolStep::new("asr", "ingest.asr", 300_000);
            asr.inputs.insert("audio_path".into(), json!(path));
            vec![
                asr,
                ToolStep::new("summarizer", "ingest.summarize", 180_000),
                ToolStep::new("extractor", "ingest.extract", 180_000),
                ToolStep::new("text_embed", "ingest.embed", 60_000),
                ToolStep::new("graph_builder", "ingest.graph", 10_000),
            ]
        }
        PipelineType::Ocr => {
            unreachable!("image pipeline is wired directly by ingest_image")
        }
    }
}
