// src/tools/chat.rs
//
// =============================================================================
// MINDLOOM: CHAT-SIDE TOOLS (v 0.1 )
// =============================================================================
//
// retrieval / weaver / verifier. All three honour `_llm_override`: when the
// orchestrator has already computed the result (hybrid retrieval ran
// outside, or the LLM was invoked once up front), the pre-computed value
// flows through the dispatch machinery verbatim so the step is traced
// without being re-executed.

use super::ToolContext;
use crate::contracts::ToolEnvelope;
use crate::registry::Tool;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Map, Value};

/// Pull `_llm_override` out of the inputs as the outputs map, if present.
fn take_override(envelope: &ToolEnvelope) -> Option<Map<String, Value>> {
    match envelope.inputs.get("_llm_override") {
        Some(Value::Object(map)) => Some(map.clone()),
        _ => None,
    }
}

// ============================================================================
// 1. RETRIEVAL
// ============================================================================

pub struct RetrievalTool {
    ctx: ToolContext,
}

impl RetrievalTool {
    pub fn new(ctx: ToolContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Tool for RetrievalTool {
    fn name(&self) -> &'static str {
        "retrieval"
    }

    fn version(&self) -> &'static str {
        "0.3.0"
    }

    async fn execute(&self, envelope: &ToolEnvelope) -> Result<Map<String, Value>> {
        if let Some(out) = take_override(envelope) {
            return Ok(out);
        }

        let query = envelope.input_str("query").to_string();
        let limit = envelope
            .inputs
            .get("limit")
            .and_then(Value::as_u64)
            .unwrap_or(10) as usize;

        let sanitized = crate::retrieval::sanitize_fts_query(&query);
        let store = self.ctx.store.clone();
        let hits = tokio::task::spawn_blocking(move || {
            store.fts_search_cards(&sanitized, limit, None, None, None)
        })
        .await??;

        let ids: Vec<String> = hits.iter().map(|(mid, _)| mid.clone()).collect();
        let store = self.ctx.store.clone();
        let cards = tokio::task::spawn_blocking(move || store.fetch_memory_cards_by_ids(&ids))
            .await??;
        let summaries: std::collections::HashMap<String, String> = cards
            .into_iter()
            .map(|c| (c.memory_id.clone(), c.summary))
            .collect();

        let results: Vec<Value> = hits
            .into_iter()
            .map(|(mid, score)| {
                json!({
                    "memory_id": mid,
                    "summary": summaries.get(&mid).cloned().unwrap_or_default(),
                    "score": score,
                })
            })
            .collect();

        let mut out = Map::new();
        out.insert("results".into(), json!(results));
        Ok(out)
    }
}

// ============================================================================
// 2. WEAVER
// ============================================================================

pub struct WeaverTool {
    #[allow(dead_code)]
    ctx: ToolContext,
}

impl WeaverTool {
    pub fn new(ctx: ToolContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Tool for WeaverTool {
    fn name(&self) -> &'static str {
        "weaver"
    }

    fn version(&self) -> &'static str {
        "0.3.0"
    }

    async fn execute(&self, envelope: &ToolEnvelope) -> Result<Map<String, Value>> {
        if let Some(out) = take_override(envelope) {
            return Ok(out);
        }

        // Stub weave: stitch the top evidence summaries into a cited answer.
        let evidence = envelope
            .inputs
            .get("evidence")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut out = Map::new();
        if evidence.is_empty() {
            out.insert("answer".into(), json!(""));
            out.insert("citations".into(), json!([]));
            out.insert("llm_used".into(), json!(false));
            return Ok(out);
        }

        let mut answer = String::from("Based on what I have recorded: ");
        let mut citations = Vec::new();
        for (i, ev) in evidence.iter().take(3).enumerate() {
            let summary = ev.get("summary").and_then(Value::as_str).unwrap_or("");
            if summary.is_empty() {
                continue;
            }
            if i > 0 {
                answer.push(' ');
            }
            answer.push_str(&format!("{} [{}]", summary.trim_end_matches('.'), i + 1));
            answer.push('.');
            if let Some(mid) = ev.get("memory_id").and_then(Value::as_str) {
                let quote: String = summary.chars().take(200).collect();
                citations.push(json!({ "memory_id": mid, "quote": quote }));
            }
        }

        out.insert("answer".into(), json!(answer));
        out.insert("citations".into(), json!(citations));
        out.insert("llm_used".into(), json!(false));
        Ok(out)
    }
}

// ============================================================================
// 3. VERIFIER
// ============================================================================

pub struct VerifierTool {
    #[allow(dead_code)]
    ctx: ToolContext,
}

impl VerifierTool {
    pub fn new(ctx: ToolContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Tool for VerifierTool {
    fn name(&self) -> &'static str {
        "verifier"
    }

    fn version(&self) -> &'static str {
        "0.3.0"
    }

    async fn execute(&self, envelope: &ToolEnvelope) -> Result<Map<String, Value>> {
        if let Some(out) = take_override(envelope) {
            return Ok(out);
        }

        let evidence = envelope
            .inputs
            .get("evidence")
            .and_then(Value::as_array)
            .map(|a| a.len())
            .unwrap_or(0);
        let citations = envelope
            .inputs
            .get("citations")
            .and_then(Value::as_array)
            .map(|a| a.len())
            .unwrap_or(0);
        let answer = envelope.input_str("answer");

        // Stub verdict: no evidence or an uncited/empty answer cannot be
        // trusted; everything else passes.
        let (verdict, issues) = if evidence == 0 || answer.trim().is_empty() {
            ("abstain", vec!["no_supporting_evidence"])
        } else if citations == 0 {
            ("abstain", vec!["no_citations"])
        } else {
            ("pass", vec![])
        };

        let mut out = Map::new();
        out.insert("verdict".into(), json!(verdict));
        out.insert("revised_answer".into(), json!(""));
        out.insert("issues".into(), json!(issues));
        out.insert("llm_used".into(), json!(false));
        Ok(out)
    }
}
