// src/tools/asr.rs
//
// Audio transcription. WHISPER_MODE=local shells out to a whisper binary
// (same clean-slate process pattern as OCR); stub mode produces a
// deterministic placeholder transcript so offline pipelines stay
// functional end to end.

use super::ToolContext;
use crate::contracts::ToolEnvelope;
use crate::registry::Tool;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::path::Path;
use std::time::Duration;
use tokio::process::Command;

const WHISPER_TIMEOUT: Duration = Duration::from_secs(300);

pub struct AsrTool {
    ctx: ToolContext,
}

impl AsrTool {
    pub fn new(ctx: ToolContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Tool for AsrTool {
    fn name(&self) -> &'static str {
        "asr"
    }

    fn version(&self) -> &'static str {
        "0.2.0"
    }

    async fn execute(&self, envelope: &ToolEnvelope) -> Result<Map<String, Value>> {
        let audio_path = envelope.input_str("audio_path");
        let stem = Path::new(audio_path)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "audio".into());

        let mut out = Map::new();

        if self.ctx.config.whisper_mode != "local" {
            let cleaned = stem.replace(['-', '_', '.'], " ");
            out.insert("text".into(), json!(format!("Audio note: {}", cleaned.trim())));
            out.insert("model".into(), json!("stub"));
            return Ok(out);
        }

        if !Path::new(audio_path).is_file() {
            anyhow::bail!("Audio file not found: {}", audio_path);
        }

        let spawn = Command::new("whisper")
            .arg(audio_path)
            .arg("--output_format")
            .arg("txt")
            .arg("--output_dir")
            .arg(std::env::temp_dir())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(WHISPER_TIMEOUT, spawn)
            .await
            .map_err(|_| anyhow::anyhow!("whisper timed out"))??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!(
                "whisper exited with {:?}: {}",
                output.status.code(),
                stderr.chars().take(200).collect::<String>()
            );
        }

        // Whisper writes <stem>.txt next to --output_dir.
        let transcript_path = std::env::temp_dir().join(format!("{}.txt", stem));
        let text = match tokio::fs::read_to_string(&transcript_path).await {
            Ok(t) => {
                tokio::fs::remove_file(&transcript_path).await.ok();
                t.trim().to_string()
            }
            Err(_) => String::from_utf8_lossy(&output.stdout).trim().to_string(),
        };

        log::info!("[ASR]    transcribed {} chars from {}", text.len(), stem);
        out.insert("text".into(), json!(text));
        out.insert("model".into(), json!("whisper"));
        Ok(out)
    }
}
