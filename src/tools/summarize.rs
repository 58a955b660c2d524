// src/tools/summarize.rs
//
// Summarization via the local LLM, with a sentence-boundary fallback that
// never touches the network. `llm_used` in the outputs records which path
// produced the summary.

use super::ToolContext;
use crate::contracts::ToolEnvelope;
use crate::llm;
use crate::registry::Tool;
use crate::repo::truncate_at_sentence;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::time::Duration;

const MAX_SUMMARY_CHARS: usize = 400;

/// First sentences of the text, capped. Used whenever the LLM is out.
pub fn fallback_summary(content_text: &str, max_chars: usize) -> String {
    let text = content_text.trim();
    if text.is_empty() {
        return "(empty document)".into();
    }
    truncate_at_sentence(text, max_chars)
}

pub struct SummarizerTool {
    ctx: ToolContext,
}

impl SummarizerTool {
    pub fn new(ctx: ToolContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Tool for SummarizerTool {
    fn name(&self) -> &'static str {
        "summarizer"
    }

    fn version(&self) -> &'static str {
        "0.6.0"
    }

    async fn execute(&self, envelope: &ToolEnvelope) -> Result<Map<String, Value>> {
        let content_text = envelope.input_str("content_text");
        let title = {
            let t = envelope.input_str("title");
            if t.is_empty() { None } else { Some(t) }
        };
        let max_chars = envelope
            .inputs
            .get("max_chars")
            .and_then(Value::as_u64)
            .map(|v| v as usize)
            .unwrap_or(MAX_SUMMARY_CHARS);

        let mut out = Map::new();
        if content_text.trim().is_empty() {
            out.insert("summary".into(), json!("(empty document)"));
            out.insert("llm_used".into(), json!(false));
            return Ok(out);
        }

        if self.ctx.llm.available().await {
            let prompt = llm::summarizer_prompt(content_text, title, max_chars);
            match self
                .ctx
                .llm
                .generate(&prompt, None, false, None, Duration::from_secs(60))
                .await
            {
                Ok(raw) => {
                    let mut summary = truncate_at_sentence(raw.trim(), max_chars);
                    // A summary that merely echoes the opening of the text
                    // is no summary at all.
                    if content_text.starts_with(&summary) {
                        summary = fallback_summary(content_text, max_chars);
                    }
                    log::info!("[SUMM]   LLM summary produced ({} chars)", summary.len());
                    out.insert("summary".into(), json!(summary));
                    out.insert("llm_used".into(), json!(true));
                    return Ok(out);
                }
                Err(e) => {
                    log::info!("[SUMM]   LLM failed ({}), using fallback", e);
                }
            }
        }

        out.insert("summary".into(), json!(fallback_summary(content_text, max_chars)));
        out.insert("llm_used".into(), json!(false));
        Ok(out)
    }
}
