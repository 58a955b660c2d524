// src/contracts.rs
//
// =============================================================================
// MINDLOOM: TOOL CONTRACT SCHEMA AUTHORITY (v 0.1 )
// =============================================================================
//
// The strict data contracts between the orchestrator and every tool.
//
// Design Principles:
// 1. One envelope in, one result out — no side channels.
// 2. Constraints travel with the request; enforcement lives in the
//    dispatch wrapper, never in tool implementations.
// 3. Every result is serializable and persisted verbatim.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

// ============================================================================
// 1. IDENTIFIERS & TIME
// ============================================================================

/// Opaque 128-bit hex identifier (lowercase, no hyphens).
pub fn new_id() -> String {
    Uuid::new_v4().simple().to_string()
}

pub fn utcnow_iso() -> String {
    Utc::now().to_rfc3339()
}

// ============================================================================
// 2. CONSTRAINTS
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PrivacyMode {
    LocalOnly,
    Redact,
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolConstraints {
    pub timeout_ms: u64,
    pub max_output_bytes: usize,
    pub privacy_mode: PrivacyMode,
}

impl Default for ToolConstraints {
    fn default() -> Self {
        Self {
            timeout_ms: 8_000,
            max_output_bytes: 200_000,
            privacy_mode: PrivacyMode::LocalOnly,
        }
    }
}

// ============================================================================
// 3. ENVELOPE (REQUEST)
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolEnvelope {
    pub trace_id: String,
    pub span_id: String,
    pub caller: String,
    /// Tool name being invoked.
    pub callee: String,
    #[serde(default)]
    pub intent: Option<String>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
    #[serde(default)]
    pub constraints: ToolConstraints,
    #[serde(default)]
    pub inputs: Map<String, Value>,
}

impl ToolEnvelope {
    pub fn new(trace_id: impl Into<String>, callee: impl Into<String>) -> Self {
        Self {
            trace_id: trace_id.into(),
            span_id: new_id(),
            caller: "orchestrator".into(),
            callee: callee.into(),
            intent: None,
            idempotency_key: None,
            constraints: ToolConstraints::default(),
            inputs: Map::new(),
        }
    }

    pub fn with_intent(mut self, intent: impl Into<String>) -> Self {
        self.intent = Some(intent.into());
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.constraints.timeout_ms = timeout_ms;
        self
    }

    pub fn with_inputs(mut self, inputs: Map<String, Value>) -> Self {
        self.inputs = inputs;
        self
    }

    /// Convenience accessor: string input or "".
    pub fn input_str(&self, key: &str) -> &str {
        self.inputs.get(key).and_then(Value::as_str).unwrap_or("")
    }
}

// ============================================================================
// 4. RESULT (RESPONSE)
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    Ok,
    Error,
    Timeout,
}

impl ToolStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolStatus::Ok => "ok",
            ToolStatus::Error => "error",
            ToolStatus::Timeout => "timeout",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolErrorDetail {
    /// Concrete error kind, e.g. "timeout", "max_output_bytes_exceeded".
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub trace_id: String,
    pub span_id: String,
    pub tool_name: String,
    pub status: ToolStatus,
    pub outputs: Map<String, Value>,
    #[serde(default)]
    pub error: Option<ToolErrorDetail>,
    pub started_at: String,
    pub finished_at: String,
    pub elapsed_ms: i64,
}

pub fn elapsed_ms(started: DateTime<Utc>, finished: DateTime<Utc>) -> i64 {
    (finished - started).num_milliseconds().max(0)
}
