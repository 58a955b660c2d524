// src/tools/ocr.rs
//
// =============================================================================
// MINDLOOM: OCR TOOL & QUALITY GATE (v 0.1 )
// =============================================================================
//
// Tesseract runs as an external process; its stdout is the extracted text.
// The quality gate decides whether that text is real content or noise from
// a photo of a landscape — the orchestrator uses it to pick between OCR
// text and a caption.

use super::ToolContext;
use crate::contracts::ToolEnvelope;
use crate::registry::Tool;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::path::Path;
use std::time::Duration;
use tokio::process::Command;

const TESSERACT_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// 1. THE TOOL
// ============================================================================

pub struct OcrTool {
    #[allow(dead_code)]
    ctx: ToolContext,
}

impl OcrTool {
    pub fn new(ctx: ToolContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Tool for OcrTool {
    fn name(&self) -> &'static str {
        "ocr"
    }

    fn version(&self) -> &'static str {
        "0.2.0"
    }

    async fn execute(&self, envelope: &ToolEnvelope) -> Result<Map<String, Value>> {
        let image_path = envelope.input_str("image_path");

        let mut out = Map::new();
        if !Path::new(image_path).is_file() {
            out.insert("text".into(), json!(""));
            out.insert("status".into(), json!("failed"));
            out.insert("error".into(), json!(format!("File not found: {}", image_path)));
            return Ok(out);
        }

        let spawn = Command::new("tesseract")
            .arg(image_path)
            .arg("stdout")
            .kill_on_drop(true)
            .output();

        match tokio::time::timeout(TESSERACT_TIMEOUT, spawn).await {
            Ok(Ok(output)) if output.status.success() => {
                let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
                log::info!(
                    "[OCR]    extracted {} chars from {}",
                    text.len(),
                    Path::new(image_path)
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_default()
                );
                out.insert("text".into(), json!(text));
                out.insert("status".into(), json!("success"));
            }
            Ok(Ok(output)) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                let tail: String = stderr.chars().take(200).collect();
                log::warn!("[OCR]    tesseract failed (rc={:?}): {}", output.status.code(), tail);
                out.insert("text".into(), json!(""));
                out.insert("status".into(), json!("failed"));
                out.insert("error".into(), json!(tail));
            }
            Ok(Err(e)) => {
                // Binary missing or unspawnable — a failed OCR, not a panic.
                out.insert("text".into(), json!(""));
                out.insert("status".into(), json!("failed"));
                out.insert("error".into(), json!(format!("tesseract unavailable: {}", e)));
            }
            Err(_) => {
                out.insert("text".into(), json!(""));
                out.insert("status".into(), json!("failed"));
                out.insert("error".into(), json!("OCR timeout"));
            }
        }
        Ok(out)
    }
}

// ============================================================================
// 2. QUALITY GATE
// ============================================================================

const OCR_FAILURE_TOKENS: &[&str] = &[
    "error",
    "tesseract",
    "exception",
    "could not",
    "failed",
    "ocr error",
    "ocr timeout",
    "not installed",
    "file not found",
];

/// True only if OCR text looks like real, usable content.
///
/// All gates must pass:
///   length >= 30 chars, >= 3 words (2+ letter runs),
///   avg confidence >= 40 when reported, no failure tokens,
///   alpha ratio >= 0.30, garbage ratio <= 0.50,
///   not dominated by a single character repeated 5+ times.
pub fn is_meaningful_ocr(text: &str, avg_confidence: Option<f64>) -> bool {
    let stripped = text.trim();
    if stripped.is_empty() || stripped.chars().count() < 30 {
        return false;
    }

    if count_words(stripped) < 3 {
        return false;
    }

    if let Some(conf) = avg_confidence {
        if conf < 40.0 {
            return false;
        }
    }

    let lower = stripped.to_lowercase();
    if OCR_FAILURE_TOKENS.iter().any(|t| lower.contains(t)) {
        return false;
    }

    let total = stripped.chars().count();
    let alpha = stripped.chars().filter(|c| c.is_alphabetic()).count();
    if (alpha as f64) / (total as f64) < 0.30 {
        return false;
    }

    let garbage = stripped
        .chars()
        .filter(|c| !c.is_alphanumeric() && !c.is_whitespace())
        .count();
    if (garbage as f64) / (total as f64) > 0.50 {
        return false;
    }

    if has_repeated_run(stripped, 5) {
        let unique: std::collections::HashSet<char> = stripped.chars().collect();
        if unique.len() < 10 {
            return false;
        }
    }

    true
}

/// Words are runs of 2+ alphabetic characters.
fn count_words(text: &str) -> usize {
    let mut count = 0;
    let mut run = 0;
    for c in text.chars() {
        if c.is_alphabetic() {
            run += 1;
        } else {
            if run >= 2 {
                count += 1;
            }
            run = 0;
        }
    }
    if run >= 2 {
        count += 1;
    }
    count
}

fn has_repeated_run(text: &str, min_run: usize) -> bool {
    let mut prev: Option<char> = None;
    let mut run = 0;
    for c in text.chars() {
        if Some(c) == prev {
            run += 1;
            if run >= min_run {
                return true;
            }
        } else {
            prev = Some(c);
            run = 1;
        }
    }
    false
}
