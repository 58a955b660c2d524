// src/orchestrator/ingest.rs
//
// =============================================================================
// MINDLOOM: INGEST PIPELINES (v 0.1 )
// =============================================================================
//
// Three pipeline shapes behind one entry point:
//
//   doc-parse  : doc_parse -> summarizer -> extractor -> text_embed -> graph_builder
//   asr        : asr       -> summarizer -> extractor -> text_embed -> graph_builder
//   image      : [ ocr || vision_embed ] -> (caption?) -> per-source plan
//
// Failure policy: parse/asr failures are fatal; summarizer, extractor,
// graph_builder, and caption failures degrade to best-effort defaults;
// a text_embed failure loses the embedding but never the card (the ingest
// reports `partial`).

use super::{router, IngestResult, Orchestrator, PipelineType, StepResult};
use crate::config::TEXT_EXTENSIONS;
use crate::contracts::new_id;
use crate::graph::canonical::{edge_id, memory_node_id};
use crate::graph::{GraphEdgeIn, GraphNodeIn, GraphService};
use crate::tools::ocr::is_meaningful_ocr;
use crate::tools::summarize::fallback_summary;
use anyhow::Result;
use serde_json::{json, Map, Value};
use std::path::Path;

fn basename(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string())
}

fn is_text_extension(path: &str) -> bool {
    Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| TEXT_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

impl Orchestrator {
    // =========================================================================
    // 1. ENTRY POINT
    // =========================================================================

    pub async fn ingest_blob(
        &self,
        blob_id: &str,
        source_id: &str,
        path: &str,
        mime: &str,
        size_bytes: u64,
        trace_id: Option<String>,
    ) -> Result<IngestResult> {
        let trace_id = trace_id.unwrap_or_else(new_id);

        // Idempotency: a card already referencing this blob short-circuits
        // the whole pipeline.
        if let Some(existing) = self.store().find_memory_card_by_blob(blob_id)? {
            log::info!(
                "[ORCH]   trace={} — idempotent skip, card exists for blob={}",
                &trace_id[..12],
                &blob_id[..12.min(blob_id.len())]
            );
            return Ok(IngestResult {
                trace_id,
                pipeline: "skip".into(),
                memory_id: Some(existing),
                steps: Vec::new(),
                status: "idempotent_skip".into(),
            });
        }

        let pipeline = router::choose_pipeline(mime, path);
        log::info!(
            "[ORCH]   trace={} — pipeline={} for {} ({})",
            &trace_id[..12],
            pipeline.as_str(),
            basename(path),
            mime
        );

        self.store().insert_exec_trace(
            &trace_id,
            &json!({
                "blob_id": blob_id,
                "source_id": source_id,
                "path": path,
                "mime": mime,
                "pipeline": pipeline.as_str(),
            }),
        )?;

        // Oversize policy: register a placeholder card, run no tools.
        if size_bytes > self.config().max_file_bytes {
            return self
                .ingest_oversized(&trace_id, pipeline, blob_id, source_id, path, mime, size_bytes);
        }

        if router::is_image_pipeline(pipeline) {
            self.ingest_image(&trace_id, blob_id, source_id, path, mime, size_bytes)
                .await
        } else {
            self.ingest_sequential(&trace_id, pipeline, blob_id, source_id, path, mime, size_bytes)
                .await
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn ingest_oversized(
        &self,
        trace_id: &str,
        pipeline: PipelineType,
        blob_id: &str,
        source_id: &str,
        path: &str,
        mime: &str,
        size_bytes: u64,
    ) -> Result<IngestResult> {
        let fname = basename(path);
        log::info!(
            "[ROUTE]  {} oversized ({} bytes) — placeholder only",
            fname,
            size_bytes
        );

        let memory_id = new_id();
        self.store().insert_memory_card(
            &memory_id,
            "file_capture_placeholder",
            &format!(
                "File captured; oversized — parsing skipped.\nFile: {} | Size: {} bytes | MIME: {}",
                fname, size_bytes, mime
            ),
            None,
            &json!({
                "blob_id": blob_id,
                "source_id": source_id,
                "file_path": path,
                "mime": mime,
                "size_bytes": size_bytes,
                "trace_id": trace_id,
                "pipeline": pipeline.as_str(),
                "source_type": "file_capture",
                "skipped_reason": "oversized",
            }),
            None,
        )?;
        self.store().finish_exec_trace(trace_id, "done")?;

        Ok(IngestResult {
            trace_id: trace_id.to_string(),
            pipeline: pipeline.as_str().into(),
            memory_id: Some(memory_id),
            steps: Vec::new(),
            status: "ok".into(),
        })
    }

    // =========================================================================
    // 2. SEQUENTIAL PIPELINES (doc_parse, asr)
    // =========================================================================

    #[allow(clippy::too_many_arguments)]
    async fn ingest_sequential(
        &self,
        trace_id: &str,
        pipeline: PipelineType,
        blob_id: &str,
        source_id: &str,
        path: &str,
        mime: &str,
        size_bytes: u64,
    ) -> Result<IngestResult> {
        let fname = basename(path);
        let mut steps_def = router::build_ingest_steps(pipeline, path, blob_id);

        // Text-like files are read directly; anything else lets doc_parse
        // delegate to the extraction collaborator.
        let mut extracted_text = String::new();
        if pipeline == PipelineType::DocParse && is_text_extension(path) {
            match tokio::fs::read(path).await {
                Ok(bytes) => {
                    extracted_text = String::from_utf8_lossy(&bytes).into_owned();
                    steps_def[0].inputs.insert("text".into(), json!(extracted_text));
                }
                Err(e) => {
                    log::error!(
                        "[ORCH]   trace={} — cannot read file {}: {}",
                        &trace_id[..12],
                        path,
                        e
                    );
                    self.store().finish_exec_trace(trace_id, "error")?;
                    return Ok(IngestResult {
                        trace_id: trace_id.to_string(),
                        pipeline: pipeline.as_str().into(),
                        memory_id: None,
                        steps: vec![StepResult {
                            tool_name: "read_file".into(),
                            call_id: new_id(),
                            exec_node_id: new_id(),
                            status: "error".into(),
                            outputs: Map::new(),
                            elapsed_ms: 0,
                            error: Some(e.to_string()),
                        }],
                        status: "error".into(),
                    });
                }
            }
        }

        // Reserved up front so downstream tools key into the right card.
        let memory_id = new_id();
        let source_type = match pipeline {
            PipelineType::Asr => "audio_note",
            _ => "file_capture",
        };

        let mut step_results: Vec<StepResult> = Vec::new();
        let mut prev_node: Option<String> = None;
        let mut summary = String::new();
        let mut summary_llm_used = false;
        let mut entities: Vec<Value> = Vec::new();
        let mut tags: Vec<Value> = Vec::new();
        let mut actions: Vec<Value> = Vec::new();
        let mut text_vector_ref = String::new();
        let mut embed_failed = false;

        for step_def in std::mem::take(&mut steps_def) {
            let mut inputs = step_def.inputs;
            match step_def.tool_name {
                "summarizer" | "extractor" => {
                    inputs.insert("content_text".into(), json!(extracted_text));
                    inputs.insert("title".into(), json!(fname));
                }
                "text_embed" => {
                    inputs.insert("text".into(), json!(extracted_text));
                    inputs.insert("memory_id".into(), json!(memory_id));
                    inputs.insert("source_type".into(), json!(source_type));
                }
                "graph_builder" => {
                    inputs.insert("entities".into(), json!(entities));
                    inputs.insert("memory_id".into(), json!(memory_id));
                    inputs.insert(
                        "source".into(),
                        json!({
                            "blob_id": blob_id,
                            "source_id": source_id,
                            "path": path,
                            "mime": mime,
                            "trace_id": trace_id,
                        }),
                    );
                }
                _ => {}
            }

            let sr = self
                .dispatch_tool(
                    trace_id,
                    step_def.tool_name,
                    step_def.intent,
                    inputs,
                    step_def.timeout_ms,
                    prev_node.as_deref(),
                )
                .await;
            prev_node = Some(sr.exec_node_id.clone());

            if sr.is_ok() {
                match step_def.tool_name {
                    "doc_parse" => {
                        let parsed = sr.output_str("content_text");
                        if !parsed.is_empty() {
                            extracted_text = parsed.to_string();
                        }
                    }
                    "asr" => {
                        extracted_text = sr.output_str("text").to_string();
                    }
                    "summarizer" => {
                        summary = sr.output_str("summary").to_string();
                        summary_llm_used = sr
                            .outputs
                            .get("llm_used")
                            .and_then(Value::as_bool)
                            .unwrap_or(false);
                    }
                    "extractor" => {
                        entities = sr
                            .outputs
                            .get("entities")
                            .and_then(Value::as_array)
                            .cloned()
                            .unwrap_or_default();
                        tags = sr
                            .outputs
                            .get("tags")
                            .and_then(Value::as_array)
                            .cloned()
                            .unwrap_or_default();
                        actions = sr
                            .outputs
                            .get("actions")
                            .and_then(Value::as_array)
                            .cloned()
                            .unwrap_or_default();
                    }
                    "text_embed" => {
                        text_vector_ref = sr.output_str("vector_ref").to_string();
                    }
                    _ => {}
                }
            } else {
                log::warn!(
                    "[ORCH]   trace={} — step {} failed: {:?}",
                    &trace_id[..12],
                    step_def.tool_name,
                    sr.error
                );
                match step_def.tool_name {
                    // Extraction failures mean there is nothing to ingest.
                    "doc_parse" | "asr" => {
                        step_results.push(sr);
                        self.store().finish_exec_trace(trace_id, "error")?;
                        return Ok(IngestResult {
                            trace_id: trace_id.to_string(),
                            pipeline: pipeline.as_str().into(),
                            memory_id: None,
                            steps: step_results,
                            status: "error".into(),
                        });
                    }
                    "text_embed" => {
                        embed_failed = true;
                    }
                    // summarizer / extractor / graph_builder: best-effort.
                    _ => {}
                }
            }
            step_results.push(sr);
        }

        if summary.is_empty() {
            summary = fallback_summary(&extracted_text, 400);
        }

        let metadata = json!({
            "blob_id": blob_id,
            "source_id": source_id,
            "file_path": path,
            "mime": mime,
            "size_bytes": size_bytes,
            "trace_id": trace_id,
            "pipeline": pipeline.as_str(),
            "source_type": source_type,
            "summary_llm_used": summary_llm_used,
            "entities": entities,
            "tags": tags,
            "actions": actions,
            "embedding_refs": {
                "text": if text_vector_ref.is_empty() { Value::Null } else { json!(text_vector_ref) },
            },
        });

        self.store().insert_memory_card(
            &memory_id,
            source_type,
            &summary,
            if extracted_text.is_empty() {
                None
            } else {
                Some(extracted_text.as_str())
            },
            &metadata,
            None,
        )?;

        if !text_vector_ref.is_empty() {
            self.store()
                .insert_embedding(&memory_id, "text", &text_vector_ref)?;
        }

        log::info!(
            "[ORCH]   trace={} — memory_card={} created (summary={} chars, entities={})",
            &trace_id[..12],
            &memory_id[..12],
            summary.chars().count(),
            entities.len()
        );

        if let Err(e) = self.upsert_graph(&memory_id, &summary, &step_results) {
            log::warn!(
                "[ORCH]   trace={} — graph upsert failed (non-fatal): {}",
                &trace_id[..12],
                e
            );
        }

        self.store().finish_exec_trace(trace_id, "done")?;

        Ok(IngestResult {
            trace_id: trace_id.to_string(),
            pipeline: pipeline.as_str().into(),
            memory_id: Some(memory_id),
            steps: step_results,
            status: if embed_failed { "partial" } else { "ok" }.into(),
        })
    }

    // =========================================================================
    // 3. IMAGE PIPELINE (parallel + conditional)
    // =========================================================================

    #[allow(clippy::too_many_arguments)]
    async fn ingest_image(
        &self,
        trace_id: &str,
        blob_id: &str,
        source_id: &str,
        path: &str,
        mime: &str,
        size_bytes: u64,
    ) -> Result<IngestResult> {
        let fname = basename(path);
        let memory_id = new_id();
        let mut step_results: Vec<StepResult> = Vec::new();

        log::info!(
            "[ROUTE]  image detected → parallel branches: OCR + VisionEmbed for {}",
            fname
        );

        // ── Parallel fan-out: OCR and vision embedding are independent
        //    roots — neither gets a predecessor edge.
        let mut ocr_inputs = Map::new();
        ocr_inputs.insert("image_path".into(), json!(path));

        let mut vision_inputs = Map::new();
        vision_inputs.insert("image_path".into(), json!(path));
        vision_inputs.insert("blob_id".into(), json!(blob_id));
        vision_inputs.insert("memory_id".into(), json!(memory_id));
        vision_inputs.insert("mime".into(), json!(mime));
        vision_inputs.insert("source_type".into(), json!("file_capture"));

        let (sr_ocr, sr_vision) = tokio::join!(
            self.dispatch_tool(trace_id, "ocr", "ingest.ocr", ocr_inputs, 30_000, None),
            self.dispatch_tool(
                trace_id,
                "vision_embed",
                "ingest.vision_embed",
                vision_inputs,
                300_000,
                None
            ),
        );

        let ocr_exec_node = sr_ocr.exec_node_id.clone();
        let ocr_ok = sr_ocr.is_ok();
        let vision_ok = sr_vision.is_ok();

        let (ocr_text, ocr_status, ocr_error, ocr_avg_confidence) = if ocr_ok {
            (
                sr_ocr.output_str("text").to_string(),
                {
                    let s = sr_ocr.output_str("status");
                    if s.is_empty() { "success" } else { s }.to_string()
                },
                sr_ocr
                    .outputs
                    .get("error")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                sr_ocr.outputs.get("avg_confidence").and_then(Value::as_f64),
            )
        } else {
            (
                String::new(),
                "failed".to_string(),
                sr_ocr
                    .error
                    .clone()
                    .or_else(|| Some("OCR tool dispatch failed".into())),
                None,
            )
        };
        let vision_vector_ref = if vision_ok {
            sr_vision.output_str("vector_ref").to_string()
        } else {
            String::new()
        };
        let vision_status = sr_vision.status.clone();

        step_results.push(sr_ocr);
        step_results.push(sr_vision);

        // ── Decide base_text ──────────────────────────────────────────────
        let ocr_meaningful = is_meaningful_ocr(&ocr_text, ocr_avg_confidence);
        let ocr_salvageable =
            ocr_text.chars().filter(|c| !c.is_whitespace()).count() >= 20;

        let mut base_text;
        let base_text_source;
        let mut caption_text = String::new();
        let mut caption_model = String::new();
        let mut caption_subjects: Vec<Value> = Vec::new();
        let mut caption_tags: Vec<Value> = Vec::new();

        if ocr_meaningful {
            base_text = ocr_text.clone();
            base_text_source = "ocr";
            log::info!(
                "[IMAGE]  ocr_status={} ocr_len={} -> using ocr",
                ocr_status,
                ocr_text.chars().count()
            );
        } else if ocr_salvageable {
            // Low-quality but substantial OCR beats a generic caption for
            // technical diagrams.
            base_text = ocr_text.clone();
            base_text_source = "ocr";
            log::info!(
                "[IMAGE]  ocr_status={} ocr_len={} quality=low -> still using ocr",
                ocr_status,
                ocr_text.chars().count()
            );
        } else {
            log::info!(
                "[IMAGE]  ocr_status={} ocr_len={} -> using caption",
                ocr_status,
                ocr_text.chars().count()
            );
            let mut caption_inputs = Map::new();
            caption_inputs.insert("image_path".into(), json!(path));
            let sr_caption = self
                .dispatch_tool(
                    trace_id,
                    "image_caption",
                    "ingest.caption",
                    caption_inputs,
                    60_000,
                    Some(&ocr_exec_node),
                )
                .await;

            if sr_caption.is_ok() {
                caption_text = sr_caption.output_str("caption").to_string();
                caption_model = sr_caption.output_str("model").to_string();
                caption_subjects = sr_caption
                    .outputs
                    .get("subjects")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();
                caption_tags = sr_caption
                    .outputs
                    .get("tags")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();
            } else {
                log::warn!(
                    "[ORCH]   trace={} — caption also failed, filename fallback",
                    &trace_id[..12]
                );
            }
            step_results.push(sr_caption);

            if !caption_text.is_empty() {
                base_text = caption_text.clone();
                base_text_source = "caption";
            } else {
                base_text = format!("Image: {}", fname);
                base_text_source = "filename";
            }
        }

        log::info!(
            "[ORCH]   trace={} — OCR {} ({} chars), VisionEmbed {} (ref={}), base_text_source={}",
            &trace_id[..12],
            ocr_status,
            ocr_text.chars().count(),
            vision_status,
            if vision_vector_ref.is_empty() { "—" } else { &vision_vector_ref },
            base_text_source
        );

        // ── Per-source tool plan ──────────────────────────────────────────
        let mut summary = String::new();
        let mut entities: Vec<Value> = Vec::new();
        let mut tags: Vec<Value> = Vec::new();
        let mut actions: Vec<Value> = Vec::new();
        let mut text_vector_ref = String::new();

        if !base_text.trim().is_empty() {
            let is_ocr = base_text_source == "ocr";
            let is_generative_caption =
                base_text_source == "caption" && caption_model == "generative";

            if is_ocr {
                let mut inputs = Map::new();
                inputs.insert("content_text".into(), json!(base_text));
                inputs.insert("title".into(), json!(fname));
                let sr = self
                    .dispatch_tool(
                        trace_id,
                        "summarizer",
                        "ingest.summarize",
                        inputs,
                        180_000,
                        Some(&ocr_exec_node),
                    )
                    .await;
                if sr.is_ok() {
                    summary = sr.output_str("summary").to_string();
                }
                step_results.push(sr);
            }

            if is_ocr || is_generative_caption {
                let mut inputs = Map::new();
                inputs.insert("content_text".into(), json!(base_text));
                inputs.insert("title".into(), json!(fname));
                let sr = self
                    .dispatch_tool(
                        trace_id,
                        "extractor",
                        "ingest.extract",
                        inputs,
                        180_000,
                        Some(&ocr_exec_node),
                    )
                    .await;
                if sr.is_ok() {
                    entities = sr
                        .outputs
                        .get("entities")
                        .and_then(Value::as_array)
                        .cloned()
                        .unwrap_or_default();
                    tags = sr
                        .outputs
                        .get("tags")
                        .and_then(Value::as_array)
                        .cloned()
                        .unwrap_or_default();
                    actions = sr
                        .outputs
                        .get("actions")
                        .and_then(Value::as_array)
                        .cloned()
                        .unwrap_or_default();
                }
                step_results.push(sr);

                if is_generative_caption {
                    // The generative caption IS the summary.
                    summary = base_text.clone();
                }
            } else if base_text_source == "caption" {
                // Heuristic caption: too thin for LLM tools. Entities come
                // from the caption tool's own subject labels.
                summary = base_text.clone();
                for subj in &caption_subjects {
                    let confidence = subj
                        .get("confidence")
                        .and_then(Value::as_f64)
                        .unwrap_or(0.0);
                    if confidence < 0.20 || entities.len() >= 5 {
                        continue;
                    }
                    if let Some(name) = subj.get("name").and_then(Value::as_str) {
                        entities.push(json!({
                            "name": name,
                            "type": "Topic",
                            "confidence": confidence,
                        }));
                    }
                }
                tags = caption_tags.clone();
                log::info!(
                    "[ORCH]   trace={} — caption-sourced (model={}), {} entities from subjects",
                    &trace_id[..12],
                    caption_model,
                    entities.len()
                );
            } else {
                summary = base_text.clone();
            }

            // text_embed always runs on the base text.
            let mut inputs = Map::new();
            inputs.insert("text".into(), json!(base_text));
            inputs.insert("memory_id".into(), json!(memory_id));
            inputs.insert("source_type".into(), json!("file_capture"));
            let sr = self
                .dispatch_tool(
                    trace_id,
                    "text_embed",
                    "ingest.embed",
                    inputs,
                    120_000,
                    Some(&ocr_exec_node),
                )
                .await;
            if sr.is_ok() {
                text_vector_ref = sr.output_str("vector_ref").to_string();
            }
            step_results.push(sr);
        } else {
            log::info!(
                "[ORCH]   trace={} — skipping summarizer/extractor/text_embed (no base_text)",
                &trace_id[..12]
            );
        }

        if !entities.is_empty() {
            let prev = step_results
                .last()
                .map(|sr| sr.exec_node_id.clone())
                .unwrap_or_default();
            let mut inputs = Map::new();
            inputs.insert("entities".into(), json!(entities));
            inputs.insert("memory_id".into(), json!(memory_id));
            inputs.insert(
                "source".into(),
                json!({
                    "blob_id": blob_id,
                    "source_id": source_id,
                    "path": path,
                    "mime": mime,
                    "trace_id": trace_id,
                }),
            );
            let sr = self
                .dispatch_tool(
                    trace_id,
                    "graph_builder",
                    "ingest.graph",
                    inputs,
                    10_000,
                    Some(&prev),
                )
                .await;
            step_results.push(sr);
        } else {
            log::info!(
                "[ORCH]   trace={} — skipping graph_builder (no entities)",
                &trace_id[..12]
            );
        }

        // Fallback summary — never store OCR noise as the headline.
        if summary.is_empty() {
            summary = if base_text.trim().is_empty() {
                format!("Image: {}", fname)
            } else {
                fallback_summary(&base_text, 400)
            };
        }

        let any_ok = ocr_ok || vision_ok;
        let overall_status = if any_ok { "ok" } else { "error" };

        let metadata = json!({
            "blob_id": blob_id,
            "source_id": source_id,
            "file_path": path,
            "mime": mime,
            "size_bytes": size_bytes,
            "trace_id": trace_id,
            "pipeline": "ocr",
            "source_type": "file_capture",
            "base_text_source": base_text_source,
            "ocr_status": ocr_status,
            "ocr_error": ocr_error,
            "ocr_text_len": ocr_text.chars().count(),
            "ocr_avg_confidence": ocr_avg_confidence,
            "caption_text": if caption_text.is_empty() { Value::Null } else { json!(caption_text) },
            "caption_model": if caption_model.is_empty() { Value::Null } else { json!(caption_model) },
            "vision_status": vision_status,
            "entities": entities,
            "tags": tags,
            "actions": actions,
            "embedding_refs": {
                "text": if text_vector_ref.is_empty() { Value::Null } else { json!(text_vector_ref) },
                "vision": if vision_vector_ref.is_empty() { Value::Null } else { json!(vision_vector_ref) },
            },
        });

        if base_text.trim().is_empty() {
            base_text = String::new();
        }

        self.store().insert_memory_card(
            &memory_id,
            "file_capture",
            &summary,
            if base_text.is_empty() { None } else { Some(base_text.as_str()) },
            &metadata,
            None,
        )?;

        if !text_vector_ref.is_empty() {
            self.store()
                .insert_embedding(&memory_id, "text", &text_vector_ref)?;
        }
        if !vision_vector_ref.is_empty() {
            self.store()
                .insert_embedding(&memory_id, "vision", &vision_vector_ref)?;
        }

        log::info!(
            "[ORCH]   trace={} — memory_card={} created (base_text_source={}, ocr={}, vision={}, entities={})",
            &trace_id[..12],
            &memory_id[..12],
            base_text_source,
            ocr_status,
            vision_status,
            entities.len()
        );

        if let Err(e) = self.upsert_graph(&memory_id, &summary, &step_results) {
            log::warn!(
                "[ORCH]   trace={} — graph upsert failed (non-fatal): {}",
                &trace_id[..12],
                e
            );
        }

        self.store().finish_exec_trace(
            trace_id,
            if overall_status == "error" { "error" } else { "done" },
        )?;

        Ok(IngestResult {
            trace_id: trace_id.to_string(),
            pipeline: "ocr".into(),
            memory_id: Some(memory_id),
            steps: step_results,
            status: overall_status.into(),
        })
    }

    // =========================================================================
    // 4. CAPTURE-EMBED PATH (browser captures arriving via the job queue)
    // =========================================================================

    pub async fn ingest_capture(&self, payload: &Value) -> Result<IngestResult> {
        let trace_id = new_id();
        let url = payload.get("url").and_then(Value::as_str).unwrap_or("");
        let title = payload.get("title").and_then(Value::as_str).unwrap_or("");
        let text = payload.get("text").and_then(Value::as_str).unwrap_or("");
        let source_type = payload
            .get("source_type")
            .and_then(Value::as_str)
            .unwrap_or("browser_highlight");

        self.store().insert_exec_trace(
            &trace_id,
            &json!({
                "pipeline": "capture_embed",
                "url": url,
                "source_type": source_type,
            }),
        )?;

        let memory_id = new_id();
        let mut inputs = Map::new();
        inputs.insert("text".into(), json!(text));
        inputs.insert("memory_id".into(), json!(memory_id));
        inputs.insert("source_type".into(), json!(source_type));
        let sr_embed = self
            .dispatch_tool(&trace_id, "text_embed", "capture.embed", inputs, 60_000, None)
            .await;

        let vector_ref = if sr_embed.is_ok() {
            sr_embed.output_str("vector_ref").to_string()
        } else {
            String::new()
        };
        let steps = vec![sr_embed];

        let summary = if !title.is_empty() {
            title.to_string()
        } else {
            fallback_summary(text, 400)
        };

        self.store().insert_memory_card(
            &memory_id,
            source_type,
            &summary,
            if text.is_empty() { None } else { Some(text) },
            &json!({
                "url": url,
                "title": title,
                "trace_id": trace_id,
                "pipeline": "capture_embed",
                "source_type": source_type,
                "embedding_refs": {
                    "text": if vector_ref.is_empty() { Value::Null } else { json!(vector_ref) },
                },
            }),
            payload.get("source_time").and_then(Value::as_str),
        )?;

        if !vector_ref.is_empty() {
            self.store().insert_embedding(&memory_id, "text", &vector_ref)?;
        }

        self.store().finish_exec_trace(&trace_id, "done")?;

        Ok(IngestResult {
            trace_id,
            pipeline: "capture_embed".into(),
            memory_id: Some(memory_id),
            steps,
            status: "ok".into(),
        })
    }

    // =========================================================================
    // 5. GRAPH UPSERT
    // =========================================================================

    /// Best-effort upsert of the card's graph footprint: always a
    /// MemoryCard node, plus whatever the graph_builder step returned —
    /// with every edge re-rooted at `mem:<memory_id>`, its id recomputed,
    /// and provenance stamped with the builder's call id.
    fn upsert_graph(
        &self,
        memory_id: &str,
        summary: &str,
        step_results: &[StepResult],
    ) -> Result<()> {
        let graph = GraphService::new(self.store().clone());
        let mem_node_id = memory_node_id(memory_id);

        let mut nodes: Vec<GraphNodeIn> = vec![GraphNodeIn {
            node_id: mem_node_id.clone(),
            node_type: "MemoryCard".into(),
            props: json!({ "summary": summary.chars().take(200).collect::<String>() }),
        }];
        let mut edges: Vec<GraphEdgeIn> = Vec::new();

        for sr in step_results {
            if sr.tool_name != "graph_builder" || !sr.is_ok() {
                continue;
            }
            if let Some(raw_nodes) = sr.outputs.get("nodes").and_then(Value::as_array) {
                for n in raw_nodes {
                    if let Ok(node) = serde_json::from_value::<GraphNodeIn>(n.clone()) {
                        nodes.push(node);
                    }
                }
            }
            if let Some(raw_edges) = sr.outputs.get("edges").and_then(Value::as_array) {
                for e in raw_edges {
                    let Ok(mut edge) = serde_json::from_value::<GraphEdgeIn>(e.clone()) else {
                        continue;
                    };
                    if edge.from_node_id.starts_with("mem:") {
                        edge.from_node_id = mem_node_id.clone();
                    }
                    edge.edge_id = Some(edge_id(
                        &edge.from_node_id,
                        &edge.edge_type,
                        &edge.to_node_id,
                        edge.valid_from.as_deref(),
                        edge.valid_to.as_deref(),
                    ));
                    if let Some(prov) = edge.provenance.as_object_mut() {
                        prov.entry("tool_call_id".to_string())
                            .or_insert_with(|| json!(sr.call_id));
                    } else {
                        edge.provenance = json!({ "tool_call_id": sr.call_id });
                    }
                    edges.push(edge);
                }
            }
        }

        graph.upsert_nodes(&nodes)?;
        if !edges.is_empty() {
            graph.upsert_edges(&edges)?;
        }
        Ok(())
    }
}
