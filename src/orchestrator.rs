// src/orchestrator.rs
//
// =============================================================================
// MINDLOOM: ACTIVE ORCHESTRATOR (v 0.1 )
// =============================================================================
//
// The wiring center of every pipeline.
//
// Responsibilities:
// 1. Select and drive ingest pipelines (see orchestrator/ingest.rs).
// 2. Drive the chat pipeline: retrieve -> weave -> verify -> persist.
// 3. Wire provenance: every dispatch leaves a tool_call + exec_node, and
//    sequential steps leave an exec_edge to their predecessor. Parallel
//    siblings never connect to each other.
// 4. Enforce the trace state machine: running -> done | error | rejected,
//    written once.

use crate::config::Config;
use crate::contracts::{new_id, ToolEnvelope};
use crate::db::Store;
use crate::llm::{self, LlmClient};
use crate::qdrant::QdrantClient;
use crate::registry::ToolRegistry;
use crate::repo::ChatCitation;
use crate::retrieval::{RetrievalEngine, RetrieveRequest};
use anyhow::Result;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;

pub mod ingest;
pub mod router;

/// Chat inputs longer than this are rejected outright.
const MAX_CHAT_INPUT_LEN: usize = 50_000;

/// Citations surviving validation are capped here.
const MAX_CITATIONS: usize = 8;

// ============================================================================
// 1. MODELS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineType {
    DocParse,
    Ocr,
    Asr,
}

impl PipelineType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineType::DocParse => "doc_parse",
            PipelineType::Ocr => "ocr",
            PipelineType::Asr => "asr",
        }
    }
}

/// Result of one orchestrated tool step.
#[derive(Debug, Clone, Serialize)]
pub struct StepResult {
    pub tool_name: String,
    pub call_id: String,
    pub exec_node_id: String,
    pub status: String,
    pub outputs: Map<String, Value>,
    pub elapsed_ms: i64,
    pub error: Option<String>,
}

impl StepResult {
    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }

    pub fn output_str(&self, key: &str) -> &str {
        self.outputs.get(key).and_then(Value::as_str).unwrap_or("")
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestResult {
    pub trace_id: String,
    pub pipeline: String,
    pub memory_id: Option<String>,
    pub steps: Vec<StepResult>,
    pub status: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatResult {
    pub trace_id: String,
    pub answer: String,
    pub verdict: String,
    pub citations: Vec<ChatCitation>,
    pub evidence: Vec<Value>,
    pub steps: Vec<StepResult>,
    pub status: String,
}

// ============================================================================
// 2. THE ORCHESTRATOR
// ============================================================================

#[derive(Clone)]
pub struct Orchestrator {
    store: Store,
    config: Config,
    registry: Arc<ToolRegistry>,
    llm: LlmClient,
    retrieval: RetrievalEngine,
}

impl Orchestrator {
    pub fn new(store: Store, config: Config, registry: Arc<ToolRegistry>) -> Self {
        let llm = LlmClient::new(config.ollama_url.clone(), config.ollama_model.clone());
        let qdrant = QdrantClient::new(config.qdrant_url.clone());
        let retrieval = RetrievalEngine::new(store.clone(), qdrant);
        Self {
            store,
            config,
            registry,
            llm,
            retrieval,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    // -------------------------------------------------------------------------
    // Dispatch plumbing
    // -------------------------------------------------------------------------

    /// Dispatch one tool through the wrapper, then wire provenance: look up
    /// the wrapper-persisted exec node for (tool_name, trace_id) and, when
    /// this call has a predecessor, record a sequential exec edge.
    pub(crate) async fn dispatch_tool(
        &self,
        trace_id: &str,
        tool_name: &str,
        intent: &str,
        inputs: Map<String, Value>,
        timeout_ms: u64,
        prev_exec_node_id: Option<&str>,
    ) -> StepResult {
        if self.registry.get(tool_name).is_none() {
            log::error!("[ORCH]   tool '{}' not found in registry", tool_name);
            return StepResult {
                tool_name: tool_name.to_string(),
                call_id: String::new(),
                exec_node_id: String::new(),
                status: "error".into(),
                outputs: Map::new(),
                elapsed_ms: 0,
                error: Some(format!("Tool '{}' not registered", tool_name)),
            };
        }

        log::info!(
            "[ORCH]   trace={} — dispatching {} (intent={})",
            &trace_id[..12.min(trace_id.len())],
            tool_name,
            intent
        );

        let envelope = ToolEnvelope::new(trace_id, tool_name)
            .with_intent(intent)
            .with_timeout_ms(timeout_ms)
            .with_inputs(inputs);

        let result = match self.registry.dispatch(&self.store, envelope).await {
            Ok(r) => r,
            Err(e) => {
                return StepResult {
                    tool_name: tool_name.to_string(),
                    call_id: String::new(),
                    exec_node_id: String::new(),
                    status: "error".into(),
                    outputs: Map::new(),
                    elapsed_ms: 0,
                    error: Some(e.to_string()),
                };
            }
        };

        let node_ref = self
            .store
            .latest_exec_node_for_call(tool_name, trace_id)
            .ok()
            .flatten();

        let (call_id, exec_node_id) = match node_ref {
            Some(r) => (r.call_id, r.exec_node_id),
            None => (result.span_id.clone(), result.span_id.clone()),
        };

        if let Some(prev) = prev_exec_node_id {
            if !exec_node_id.is_empty() {
                if let Err(e) =
                    self.store
                        .insert_exec_edge(prev, &exec_node_id, "sequential", trace_id)
                {
                    log::warn!("[ORCH]   exec edge insert failed: {}", e);
                }
            }
        }

        log::info!(
            "[ORCH]   trace={} — {} finished status={} elapsed={}ms",
            &trace_id[..12.min(trace_id.len())],
            tool_name,
            result.status.as_str(),
            result.elapsed_ms
        );

        StepResult {
            tool_name: tool_name.to_string(),
            call_id,
            exec_node_id,
            status: result.status.as_str().to_string(),
            outputs: result.outputs,
            elapsed_ms: result.elapsed_ms,
            error: result.error.map(|e| e.message),
        }
    }

    // -------------------------------------------------------------------------
    // Chat pipeline
    // -------------------------------------------------------------------------

    pub async fn chat(
        &self,
        user_text: &str,
        top_k: usize,
        use_graph: bool,
        hops: usize,
    ) -> Result<ChatResult> {
        let trace_id = new_id();
        self.store.insert_exec_trace(
            &trace_id,
            &json!({
                "pipeline": "chat",
                "user_text": user_text.chars().take(200).collect::<String>(),
            }),
        )?;

        // ── Step 0: security check ────────────────────────────────────────
        if let Some(reason) = security_check(user_text) {
            log::warn!(
                "[ORCH]   trace={} — security check failed: {}",
                &trace_id[..12],
                reason
            );
            self.store.finish_exec_trace(&trace_id, "rejected")?;
            return Ok(ChatResult {
                trace_id,
                answer: format!("Request rejected: {}", reason),
                verdict: String::new(),
                citations: Vec::new(),
                evidence: Vec::new(),
                steps: Vec::new(),
                status: "rejected".into(),
            });
        }

        let mut steps: Vec<StepResult> = Vec::new();

        // ── Step 1: hybrid retrieval, traced as a tool dispatch ───────────
        let mut retrieve_req = RetrieveRequest::new(user_text);
        retrieve_req.top_k = top_k * 3;
        retrieve_req.use_graph = use_graph;
        retrieve_req.hops = hops;
        let retrieve_resp = self.retrieval.retrieve(&retrieve_req).await?;
        let raw_results: Vec<Value> = retrieve_resp
            .results
            .iter()
            .map(|r| serde_json::to_value(r).unwrap_or(Value::Null))
            .collect();

        let mut retrieval_inputs = Map::new();
        retrieval_inputs.insert("query".into(), json!(user_text));
        retrieval_inputs.insert("limit".into(), json!(top_k * 3));
        retrieval_inputs.insert("hops".into(), json!(hops));
        retrieval_inputs.insert("_llm_override".into(), json!({ "results": raw_results }));

        let sr_retrieval = self
            .dispatch_tool(&trace_id, "retrieval", "chat.retrieve", retrieval_inputs, 15_000, None)
            .await;
        let mut prev_node = sr_retrieval.exec_node_id.clone();
        steps.push(sr_retrieval);

        // ── Evidence list ─────────────────────────────────────────────────
        let evidence = self.build_evidence(&retrieve_resp.results, top_k)?;

        // ── Step 2: weave ─────────────────────────────────────────────────
        let use_llm = self.llm.available().await;
        let mut weave_inputs = Map::new();
        weave_inputs.insert("question".into(), json!(user_text));
        weave_inputs.insert("evidence".into(), json!(evidence));
        let weave_timeout = if use_llm {
            log::info!("[ORCH]   trace={} — using LLM for weave", &trace_id[..12]);
            match llm::weave_with_llm(&self.llm, user_text, &evidence).await {
                Ok(precomputed) => {
                    weave_inputs.insert("_llm_override".into(), Value::Object(precomputed));
                }
                Err(e) => log::warn!("[ORCH]   weave LLM call failed ({}), stub path", e),
            }
            180_000
        } else {
            30_000
        };

        let sr_weave = self
            .dispatch_tool(
                &trace_id,
                "weaver",
                "chat.weave",
                weave_inputs,
                weave_timeout,
                Some(&prev_node),
            )
            .await;
        prev_node = sr_weave.exec_node_id.clone();

        let mut answer = sr_weave.output_str("answer").to_string();
        let raw_citations = sr_weave
            .outputs
            .get("citations")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        steps.push(sr_weave);

        // Validate citations against the evidence list, cap at 8.
        let evidence_ids: std::collections::HashSet<&str> = evidence
            .iter()
            .filter_map(|e| e.get("memory_id").and_then(Value::as_str))
            .collect();
        let citations: Vec<Value> = raw_citations
            .into_iter()
            .filter(|c| {
                c.get("memory_id")
                    .and_then(Value::as_str)
                    .map(|mid| evidence_ids.contains(mid))
                    .unwrap_or(false)
            })
            .take(MAX_CITATIONS)
            .collect();

        // ── Step 3: verify ────────────────────────────────────────────────
        let mut verify_inputs = Map::new();
        verify_inputs.insert("question".into(), json!(user_text));
        verify_inputs.insert("answer".into(), json!(answer));
        verify_inputs.insert("evidence".into(), json!(evidence));
        verify_inputs.insert("citations".into(), json!(citations));
        let verify_timeout = if use_llm {
            match llm::verify_with_llm(&self.llm, user_text, &answer, &evidence).await {
                Ok(precomputed) => {
                    verify_inputs.insert("_llm_override".into(), Value::Object(precomputed));
                }
                Err(e) => log::warn!("[ORCH]   verify LLM call failed ({}), stub path", e),
            }
            60_000
        } else {
            15_000
        };

        let sr_verify = self
            .dispatch_tool(
                &trace_id,
                "verifier",
                "chat.verify",
                verify_inputs,
                verify_timeout,
                Some(&prev_node),
            )
            .await;

        let verdict = {
            let v = sr_verify.output_str("verdict");
            if v.is_empty() { "pass" } else { v }.to_string()
        };
        let revised_answer = sr_verify.output_str("revised_answer").to_string();
        let issues: Vec<String> = sr_verify
            .outputs
            .get("issues")
            .and_then(Value::as_array)
            .map(|a| {
                a.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        steps.push(sr_verify);

        if verdict == "revise" && !revised_answer.is_empty() {
            answer = revised_answer;
        } else if verdict == "abstain" {
            answer = if issues.is_empty() {
                "I don't have enough evidence to answer this question reliably.".to_string()
            } else {
                format!(
                    "I don't have enough evidence to answer this question reliably. Issues: {}",
                    issues.join("; ")
                )
            };
        }

        // ── Step 4: persist turn + citations ──────────────────────────────
        let ev_map: std::collections::HashMap<&str, &Value> = evidence
            .iter()
            .filter_map(|e| e.get("memory_id").and_then(Value::as_str).map(|m| (m, e)))
            .collect();
        let enriched: Vec<ChatCitation> = citations
            .iter()
            .filter_map(|c| {
                let mid = c.get("memory_id").and_then(Value::as_str)?;
                let ev = ev_map.get(mid);
                Some(ChatCitation {
                    memory_id: mid.to_string(),
                    quote: c
                        .get("quote")
                        .and_then(Value::as_str)
                        .unwrap_or("")
                        .to_string(),
                    source_type: ev
                        .and_then(|e| e.get("source_type"))
                        .and_then(Value::as_str)
                        .unwrap_or("")
                        .to_string(),
                    created_at: ev
                        .and_then(|e| e.get("created_at"))
                        .and_then(Value::as_str)
                        .unwrap_or("")
                        .to_string(),
                })
            })
            .collect();

        let turn_id = new_id();
        self.store
            .insert_conversation_turn(&turn_id, user_text, &answer, &trace_id, &verdict)?;
        self.store.insert_chat_citations(&turn_id, &enriched)?;

        self.store.finish_exec_trace(&trace_id, "done")?;

        Ok(ChatResult {
            trace_id,
            answer,
            verdict,
            citations: enriched,
            evidence,
            steps,
            status: "ok".into(),
        })
    }

    /// Top-k evidence items with card content attached: memory_id, summary,
    /// an 800-char snippet, source_type, created_at, score, reasons.
    fn build_evidence(
        &self,
        results: &[crate::retrieval::RetrievedCard],
        top_k: usize,
    ) -> Result<Vec<Value>> {
        let memory_ids: Vec<String> = results
            .iter()
            .take(top_k * 2)
            .map(|r| r.memory_id.clone())
            .collect();
        if memory_ids.is_empty() {
            return Ok(Vec::new());
        }

        let cards = self.store.fetch_memory_cards_by_ids(&memory_ids)?;
        let cards_by_id: std::collections::HashMap<&str, _> = cards
            .iter()
            .map(|c| (c.memory_id.as_str(), c))
            .collect();

        let mut evidence = Vec::new();
        for r in results.iter().take(top_k) {
            let card = cards_by_id.get(r.memory_id.as_str());
            let snippet: String = card
                .and_then(|c| c.content_text.as_deref())
                .unwrap_or(&r.summary)
                .chars()
                .take(800)
                .collect();
            evidence.push(json!({
                "memory_id": r.memory_id,
                "summary": r.summary,
                "content_text": snippet,
                "source_type": r.source_type,
                "created_at": r.created_at,
                "score": r.final_score,
                "reasons": r.reasons,
            }));
        }
        Ok(evidence)
    }
}

/// Reject oversized or binary chat input before any tool runs.
fn security_check(user_text: &str) -> Option<String> {
    if user_text.chars().count() > MAX_CHAT_INPUT_LEN {
        return Some(format!(
            "Input too long ({} chars, max {})",
            user_text.chars().count(),
            MAX_CHAT_INPUT_LEN
        ));
    }
    if user_text.contains('\0') {
        return Some("Binary content detected".into());
    }
    None
}
