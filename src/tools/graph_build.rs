// src/tools/graph_build.rs
//
// Deterministic graph construction from extracted entities: canonicalize
// names, derive stable `ent:` node ids, and emit MENTIONS edges from the
// memory node to each entity. The orchestrator rewrites the from-side to
// the committed memory id and stamps provenance before the upsert.

use super::ToolContext;
use crate::contracts::ToolEnvelope;
use crate::graph::canonical::{
    canonicalize_entity_name, choose_display_name, entity_node_id, memory_node_id,
    normalize_entity_type,
};
use crate::registry::Tool;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Map, Value};

pub struct GraphBuilderTool {
    #[allow(dead_code)]
    ctx: ToolContext,
}

impl GraphBuilderTool {
    pub fn new(ctx: ToolContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Tool for GraphBuilderTool {
    fn name(&self) -> &'static str {
        "graph_builder"
    }

    fn version(&self) -> &'static str {
        "0.3.0"
    }

    async fn execute(&self, envelope: &ToolEnvelope) -> Result<Map<String, Value>> {
        let entities = envelope
            .inputs
            .get("entities")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let memory_id = envelope.input_str("memory_id");
        let source = envelope
            .inputs
            .get("source")
            .cloned()
            .unwrap_or(Value::Null);
        let trace_id = source
            .get("trace_id")
            .and_then(Value::as_str)
            .unwrap_or(&envelope.trace_id)
            .to_string();

        let mem_node = memory_node_id(memory_id);
        let mut nodes: Vec<Value> = Vec::new();
        let mut edges: Vec<Value> = Vec::new();
        let mut seen: std::collections::HashSet<String> = std::collections::HashSet::new();

        for ent in &entities {
            let raw_name = ent.get("name").and_then(Value::as_str).unwrap_or("").trim();
            if raw_name.is_empty() {
                continue;
            }
            let raw_type = ent.get("type").and_then(Value::as_str).unwrap_or("Other");
            let norm_type = normalize_entity_type(raw_type);
            let canonical = canonicalize_entity_name(raw_name, norm_type);
            if canonical.is_empty() {
                continue;
            }
            let node_id = entity_node_id(norm_type, &canonical);
            if !seen.insert(node_id.clone()) {
                continue; // same canonical entity mentioned twice
            }

            let confidence = ent
                .get("confidence")
                .and_then(Value::as_f64)
                .unwrap_or(0.5)
                .clamp(0.0, 1.0);
            let display = choose_display_name(raw_name, &canonical, norm_type);

            nodes.push(json!({
                "node_id": node_id,
                "node_type": norm_type,
                "props": {
                    "name": display,
                    "raw_name": raw_name,
                    "canonical": canonical,
                    "confidence": confidence,
                },
            }));

            edges.push(json!({
                "from_node_id": mem_node,
                "to_node_id": node_id,
                "edge_type": "MENTIONS",
                "weight": confidence,
                "provenance": {
                    "tool": "graph_builder",
                    "trace_id": trace_id,
                },
            }));
        }

        let mut out = Map::new();
        out.insert("nodes".into(), json!(nodes));
        out.insert("edges".into(), json!(edges));
        Ok(out)
    }
}
