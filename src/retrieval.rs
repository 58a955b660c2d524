// src/retrieval.rs
//
// =============================================================================
// MINDLOOM: HYBRID RETRIEVAL ENGINE (v 0.1 )
// =============================================================================
//
// Merges four signals into one explainable ranking:
//   1. SQLite FTS5 over card summaries      (lexical)
//   2. Object-store vector search           (semantic)
//   3. Graph expansion from top seeds       (associative)
//   4. Recency + source-type weighting
//
// Each signal is normalized to [0, 1]; the fused score carries a
// per-signal breakdown and reason tags so every result can explain itself.

use crate::db::Store;
use crate::embedder;
use crate::qdrant::{QdrantClient, TEXT_COLLECTION};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeSet, HashMap};

pub mod expand;

// ============================================================================
// 1. SCORING CONSTANTS
// ============================================================================

pub const W_SEMANTIC: f64 = 0.45;
pub const W_FTS: f64 = 0.35;
pub const W_GRAPH: f64 = 0.15;
pub const W_RECENCY: f64 = 0.05;

/// Results below this floor are noise and dropped.
pub const MIN_SCORE: f64 = 0.18;

const RECENCY_HALFLIFE_DAYS: f64 = 30.0;

pub fn source_boost(source_type: &str) -> f64 {
    match source_type {
        "browser_highlight" => 0.10,
        "browser_bookmark" => 0.05,
        "file_capture" => 0.03,
        "audio_note" => 0.03,
        "browser_visit" => -0.10,
        _ => 0.0,
    }
}

/// exp(-days_since / 30), clamped to [0, 1]. Unparseable timestamps score 0.
pub fn recency_score(created_at: &str, now: DateTime<Utc>) -> f64 {
    let normalized = created_at.replace(' ', "T");
    let parsed = DateTime::parse_from_rfc3339(&normalized)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            // Dates without an offset are assumed UTC.
            chrono::NaiveDateTime::parse_from_str(&normalized, "%Y-%m-%dT%H:%M:%S%.f")
                .map(|naive| naive.and_utc())
        });
    let Ok(dt) = parsed else { return 0.0 };
    let days_ago = ((now - dt).num_seconds().max(0) as f64) / 86_400.0;
    (-days_ago / RECENCY_HALFLIFE_DAYS).exp().clamp(0.0, 1.0)
}

/// Strip FTS5 syntax, quote each surviving token, join with OR. A query of
/// pure punctuation sanitizes to "".
pub fn sanitize_fts_query(query: &str) -> String {
    let cleaned: String = query
        .chars()
        .map(|c| {
            if matches!(c, '"' | '*' | ':' | '^' | '(' | ')' | '{' | '}' | '?' | '!') {
                ' '
            } else {
                c
            }
        })
        .collect();

    let tokens: Vec<String> = cleaned
        .split_whitespace()
        .filter(|t| t.chars().any(|c| c.is_alphanumeric()))
        .map(|t| format!("\"{}\"", t))
        .collect();

    tokens.join(" OR ")
}

// ============================================================================
// 2. REQUEST / RESPONSE MODELS
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrieveRequest {
    pub query: String,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default)]
    pub time_min: Option<String>,
    #[serde(default)]
    pub time_max: Option<String>,
    #[serde(default)]
    pub source_types: Option<Vec<String>>,
    #[serde(default = "default_true")]
    pub use_semantic: bool,
    #[serde(default = "default_true")]
    pub use_graph: bool,
    #[serde(default = "default_hops")]
    pub hops: usize,
    #[serde(default = "default_signal_k")]
    pub fts_k: usize,
    #[serde(default = "default_signal_k")]
    pub vec_k: usize,
    #[serde(default = "default_seed_k")]
    pub seed_k: usize,
}

fn default_top_k() -> usize {
    10
}
fn default_true() -> bool {
    true
}
fn default_hops() -> usize {
    1
}
fn default_signal_k() -> usize {
    50
}
fn default_seed_k() -> usize {
    10
}

impl RetrieveRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            top_k: default_top_k(),
            time_min: None,
            time_max: None,
            source_types: None,
            use_semantic: true,
            use_graph: true,
            hops: default_hops(),
            fts_k: default_signal_k(),
            vec_k: default_signal_k(),
            seed_k: default_seed_k(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SignalBreakdown {
    pub fts: f64,
    pub semantic: f64,
    pub graph: f64,
    pub recency: f64,
    pub source_boost: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphPath {
    pub via_entity_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RetrievedCard {
    pub memory_id: String,
    pub summary: String,
    pub created_at: String,
    pub source_type: String,
    pub final_score: f64,
    pub signals: SignalBreakdown,
    pub reasons: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graph_path: Option<GraphPath>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RetrieveResponse {
    pub results: Vec<RetrievedCard>,
}

// ============================================================================
// 3. THE ENGINE
// ============================================================================

#[derive(Default)]
struct Candidate {
    fts_score: f64,
    semantic_score: f64,
    graph_score: f64,
    via_entity_ids: Vec<String>,
    reasons: BTreeSet<&'static str>,
}

#[derive(Clone)]
pub struct RetrievalEngine {
    store: Store,
    qdrant: QdrantClient,
}

impl RetrievalEngine {
    pub fn new(store: Store, qdrant: QdrantClient) -> Self {
        Self { store, qdrant }
    }

    pub async fn retrieve(&self, req: &RetrieveRequest) -> Result<RetrieveResponse> {
        let mut candidates: HashMap<String, Candidate> = HashMap::new();

        // ── Stage 1: lexical ─────────────────────────────────────────────
        let fts_query = sanitize_fts_query(&req.query);
        if !fts_query.is_empty() {
            let store = self.store.clone();
            let q = fts_query.clone();
            let (limit, tmin, tmax, types) = (
                req.fts_k,
                req.time_min.clone(),
                req.time_max.clone(),
                req.source_types.clone(),
            );
            let hits = tokio::task::spawn_blocking(move || {
                store.fts_search_cards(&q, limit, tmin.as_deref(), tmax.as_deref(), types.as_deref())
            })
            .await??;
            for (mid, score) in hits {
                let c = candidates.entry(mid).or_default();
                c.fts_score = score;
                c.reasons.insert("fts_match");
            }
        }

        // ── Stage 2: semantic ────────────────────────────────────────────
        if req.use_semantic {
            let vector = embedder::text_encoder().encode_text(&req.query);
            let filter = req.source_types.as_ref().map(|types| {
                json!({ "must": [{ "key": "source_type", "match": { "any": types } }] })
            });
            let hits = self
                .qdrant
                .search(TEXT_COLLECTION, &vector, req.vec_k, filter)
                .await;
            for hit in hits {
                let mid = hit
                    .payload
                    .get("memory_id")
                    .and_then(Value::as_str)
                    .unwrap_or(&hit.id)
                    .to_string();
                // Normalized vectors: cosine already sits in [0, 1].
                let score = hit.score.clamp(0.0, 1.0);
                let c = candidates.entry(mid).or_default();
                c.semantic_score = score;
                c.reasons.insert("semantic_text");
            }
        }

        // ── Stage 3: graph expansion from top seeds ──────────────────────
        if req.use_graph && req.hops > 0 {
            let seeds = top_seed_ids(&candidates, req.seed_k);
            if !seeds.is_empty() {
                let store = self.store.clone();
                let hops = req.hops;
                let graph_hits = tokio::task::spawn_blocking(move || {
                    expand::expand_from_seeds(&store, &seeds, hops, expand::MAX_CANDIDATES)
                })
                .await??;
                for gc in graph_hits {
                    let c = candidates.entry(gc.memory_id.clone()).or_default();
                    if gc.graph_score > c.graph_score {
                        c.graph_score = gc.graph_score;
                        c.via_entity_ids = gc.via_entity_ids;
                    }
                    c.reasons.insert("graph_expand");
                }
            }
        }

        // ── Stage 4: fusion ──────────────────────────────────────────────
        let all_ids: Vec<String> = candidates.keys().cloned().collect();
        let cards = {
            let store = self.store.clone();
            let ids = all_ids.clone();
            tokio::task::spawn_blocking(move || store.fetch_memory_cards_by_ids(&ids)).await??
        };
        let cards_by_id: HashMap<String, _> = cards
            .into_iter()
            .map(|c| (c.memory_id.clone(), c))
            .collect();

        let now = Utc::now();
        let mut results: Vec<RetrievedCard> = Vec::new();

        for (mid, cand) in candidates {
            let Some(card) = cards_by_id.get(&mid) else {
                continue; // dangling reference
            };

            let created_at = card.created_at.replace(' ', "T");
            let source_type = card.source_type();

            // Time window filter (graph-expanded candidates bypassed the
            // in-store filters).
            if let Some(tmin) = &req.time_min {
                if created_at < tmin.replace(' ', "T") {
                    continue;
                }
            }
            if let Some(tmax) = &req.time_max {
                if created_at > tmax.replace(' ', "T") {
                    continue;
                }
            }
            if let Some(types) = &req.source_types {
                if !types.is_empty() && !types.contains(&source_type) {
                    continue;
                }
            }

            let recency = recency_score(&created_at, now);
            let boost = source_boost(&source_type);

            let final_score = (W_SEMANTIC * cand.semantic_score
                + W_FTS * cand.fts_score
                + W_GRAPH * cand.graph_score
                + W_RECENCY * recency
                + boost)
                .clamp(0.0, 1.0);

            let graph_path = if cand.via_entity_ids.is_empty() {
                None
            } else {
                Some(GraphPath {
                    via_entity_ids: cand.via_entity_ids.clone(),
                })
            };

            results.push(RetrievedCard {
                memory_id: mid,
                summary: card.summary.clone(),
                created_at,
                source_type,
                final_score,
                signals: SignalBreakdown {
                    fts: cand.fts_score,
                    semantic: cand.semantic_score,
                    graph: cand.graph_score,
                    recency,
                    source_boost: boost,
                },
                reasons: cand.reasons.iter().map(|r| r.to_string()).collect(),
                graph_path,
            });
        }

        results.sort_by(|a, b| {
            b.final_score
                .partial_cmp(&a.final_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.retain(|r| r.final_score >= MIN_SCORE);
        results.truncate(req.top_k);

        Ok(RetrieveResponse { results })
    }
}

/// Top-k memory ids by preliminary (semantic·W + lexical·W) score, used to
/// seed the graph expansion.
fn top_seed_ids(candidates: &HashMap<String, Candidate>, k: usize) -> Vec<String> {
    let mut scored: Vec<(&String, f64)> = candidates
        .iter()
        .map(|(mid, c)| (mid, c.semantic_score * W_SEMANTIC + c.fts_score * W_FTS))
        .collect();
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored.into_iter().take(k).map(|(mid, _)| mid.clone()).collect()
}
