// src/tools/extract.rs
//
// Entity / tag / action extraction via the local LLM. The model gets one
// retry with a repair prompt when the first response is not valid JSON;
// after that the extraction is empty rather than wrong. Validation
// normalizes types, clamps confidences, and enforces the item caps.

use super::ToolContext;
use crate::contracts::ToolEnvelope;
use crate::graph::canonical::normalize_entity_type;
use crate::llm;
use crate::registry::Tool;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::time::Duration;

const MIN_CONFIDENCE: f64 = 0.55;
const MAX_ENTITIES: usize = 30;
const MAX_TAGS: usize = 12;
const MAX_ACTIONS: usize = 10;

pub struct ExtractorTool {
    ctx: ToolContext,
}

impl ExtractorTool {
    pub fn new(ctx: ToolContext) -> Self {
        Self { ctx }
    }
}

fn empty_extraction() -> Map<String, Value> {
    let mut out = Map::new();
    out.insert("entities".into(), json!([]));
    out.insert("tags".into(), json!([]));
    out.insert("actions".into(), json!([]));
    out
}

/// Validate and clean raw model output into the declared shape.
pub fn validate_and_clean(data: &Value) -> Map<String, Value> {
    let mut entities = Vec::new();
    for ent in data
        .get("entities")
        .and_then(Value::as_array)
        .map(|a| a.as_slice())
        .unwrap_or_default()
        .iter()
        .take(MAX_ENTITIES)
    {
        let Some(obj) = ent.as_object() else { continue };
        let name = obj
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or("")
            .trim()
            .to_string();
        if name.chars().count() < 2 {
            continue;
        }
        let etype = normalize_entity_type(obj.get("type").and_then(Value::as_str).unwrap_or("Other"));
        let confidence = obj
            .get("confidence")
            .and_then(Value::as_f64)
            .unwrap_or(0.5)
            .clamp(0.0, 1.0);
        if confidence < MIN_CONFIDENCE {
            continue;
        }
        entities.push(json!({
            "name": clean_entity_name(&name, etype),
            "type": etype,
            "confidence": (confidence * 100.0).round() / 100.0,
        }));
    }

    let mut tags = Vec::new();
    for tag in data
        .get("tags")
        .and_then(Value::as_array)
        .map(|a| a.as_slice())
        .unwrap_or_default()
        .iter()
        .take(MAX_TAGS)
    {
        if let Some(t) = tag.as_str() {
            let t = t.trim().to_lowercase();
            if t.chars().count() >= 2 {
                tags.push(json!(t));
            }
        }
    }

    let mut actions = Vec::new();
    for act in data
        .get("actions")
        .and_then(Value::as_array)
        .map(|a| a.as_slice())
        .unwrap_or_default()
        .iter()
        .take(MAX_ACTIONS)
    {
        let Some(obj) = act.as_object() else { continue };
        let text = obj
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or("")
            .trim()
            .to_string();
        if text.is_empty() {
            continue;
        }
        actions.push(json!({
            "text": text,
            "due": obj.get("due").cloned().unwrap_or(Value::Null),
            "priority": obj.get("priority").cloned().unwrap_or(Value::Null),
        }));
    }

    let mut out = Map::new();
    out.insert("entities".into(), json!(entities));
    out.insert("tags".into(), json!(tags));
    out.insert("actions".into(), json!(actions));
    out
}

/// Collapse whitespace; title-case the proper-noun types.
fn clean_entity_name(name: &str, entity_type: &str) -> String {
    let collapsed = name.split_whitespace().collect::<Vec<_>>().join(" ");
    if matches!(entity_type, "Person" | "Org" | "Project") {
        collapsed
            .split_whitespace()
            .map(|w| {
                let mut chars = w.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                    None => String::new(),
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    } else {
        collapsed
    }
}

#[async_trait]
impl Tool for ExtractorTool {
    fn name(&self) -> &'static str {
        "extractor"
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
        let max_entities = envelope
            .inputs
            .get("max_entities")
            .and_then(Value::as_u64)
            .map(|v| v as usize)
            .unwrap_or(MAX_ENTITIES);

        if content_text.trim().is_empty() || !self.ctx.llm.available().await {
            return Ok(empty_extraction());
        }

        let prompt = llm::extractor_prompt(content_text, title, max_entities);
        let raw = match self
            .ctx
            .llm
            .generate(
                &prompt,
                Some(llm::extractor_system()),
                true,
                None,
                Duration::from_secs(120),
            )
            .await
        {
            Ok(raw) => raw,
            Err(e) => {
                log::info!("[EXTRACT] LLM failed ({}), returning empty extraction", e);
                return Ok(empty_extraction());
            }
        };

        let mut parsed = llm::try_parse_json(&raw);
        if parsed.is_none() {
            log::warn!("[EXTRACT] invalid JSON on first attempt, retrying");
            let retry_prompt = format!("{}\n\n{}", prompt, llm::extractor_retry_prompt());
            if let Ok(raw2) = self
                .ctx
                .llm
                .generate(&retry_prompt, None, false, None, Duration::from_secs(60))
                .await
            {
                parsed = llm::try_parse_json(&raw2);
            }
        }

        let Some(parsed) = parsed else {
            log::warn!("[EXTRACT] invalid JSON after retry, returning empty");
            return Ok(empty_extraction());
        };

        let result = validate_and_clean(&parsed);
        log::info!(
            "[EXTRACT] {} entities, {} tags, {} actions",
            result.get("entities").and_then(Value::as_array).map(|a| a.len()).unwrap_or(0),
            result.get("tags").and_then(Value::as_array).map(|a| a.len()).unwrap_or(0),
            result.get("actions").and_then(Value::as_array).map(|a| a.len()).unwrap_or(0),
        );
        Ok(result)
    }
}
