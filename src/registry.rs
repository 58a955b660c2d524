// src/registry.rs
//
// =============================================================================
// MINDLOOM: TOOL REGISTRY & DISPATCH WRAPPER (v 0.1 )
// =============================================================================
//
// The Hexagonal Port.
//
// Responsibilities:
// 1. Define the `Tool` trait (The Contract).
// 2. Map tool names to factories with declared schemas.
// 3. Provide the ONE dispatch wrapper that enforces timeouts, output byte
//    caps, and call/exec-node persistence. Tool implementations never
//    replicate these concerns.

use crate::contracts::{
    elapsed_ms, new_id, ToolEnvelope, ToolErrorDetail, ToolResult, ToolStatus,
};
use crate::db::Store;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

// ============================================================================
// 1. THE TOOL TRAIT (The Contract)
// ============================================================================

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;

    fn version(&self) -> &'static str {
        "0.1.0"
    }

    /// Produce the outputs map. Errors bubble to the wrapper, which records
    /// them with a concrete kind.
    async fn execute(&self, envelope: &ToolEnvelope) -> Result<Map<String, Value>>;
}

pub type ToolFactory = Box<dyn Fn() -> Box<dyn Tool> + Send + Sync>;

pub struct ToolEntry {
    pub name: String,
    pub version: String,
    pub description: String,
    pub input_schema: Value,
    pub output_schema: Value,
    factory: ToolFactory,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ToolInfo {
    pub name: String,
    pub version: String,
    pub description: String,
}

// ============================================================================
// 2. THE REGISTRY
// ============================================================================

#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, ToolEntry>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        name: &str,
        version: &str,
        description: &str,
        input_schema: Value,
        output_schema: Value,
        factory: ToolFactory,
    ) {
        self.tools.insert(
            name.to_string(),
            ToolEntry {
                name: name.to_string(),
                version: version.to_string(),
                description: description.to_string(),
                input_schema,
                output_schema,
                factory,
            },
        );
    }

    pub fn get(&self, name: &str) -> Option<&ToolEntry> {
        self.tools.get(name)
    }

    pub fn list(&self) -> Vec<ToolInfo> {
        self.tools
            .values()
            .map(|t| ToolInfo {
                name: t.name.clone(),
                version: t.version.clone(),
                description: t.description.clone(),
            })
            .collect()
    }

    // -------------------------------------------------------------------------
    // THE DISPATCH WRAPPER
    // -------------------------------------------------------------------------

    /// Run one tool invocation through the full contract:
    ///
    /// 1. Persist tool_call (running) + exec_node (running, with the
    ///    declared timeout and trace_id).
    /// 2. Invoke execute with a wall-clock cancellation at timeout_ms.
    /// 3. Enforce max_output_bytes on the serialized outputs.
    /// 4. Map cancellation to `timeout`, any other failure to `error` with
    ///    the concrete kind.
    /// 5. Update both records atomically.
    /// 6. Return the result.
    pub async fn dispatch(&self, store: &Store, envelope: ToolEnvelope) -> Result<ToolResult> {
        let entry = self
            .get(&envelope.callee)
            .ok_or_else(|| anyhow!("Tool '{}' not registered", envelope.callee))?;

        let tool = (entry.factory)();
        let call_id = new_id();
        let exec_node_id = new_id();
        let started = Utc::now();
        let started_at = started.to_rfc3339();

        // Inputs are persisted with the envelope metadata folded in, so a
        // call record is self-describing.
        let mut full_inputs = envelope.inputs.clone();
        full_inputs.insert(
            "_meta".into(),
            json!({
                "trace_id": envelope.trace_id,
                "span_id": envelope.span_id,
                "caller": envelope.caller,
                "intent": envelope.intent,
                "idempotency_key": envelope.idempotency_key,
            }),
        );

        {
            let store = store.clone();
            let call_id = call_id.clone();
            let exec_node_id = exec_node_id.clone();
            let trace_id = envelope.trace_id.clone();
            let tool_name = tool.name().to_string();
            let timeout_ms = envelope.constraints.timeout_ms;
            let inputs = Value::Object(full_inputs);
            tokio::task::spawn_blocking(move || -> Result<()> {
                store.insert_tool_call(&call_id, &tool_name, &inputs, "running")?;
                store.insert_exec_node(&exec_node_id, &call_id, &trace_id, "running", 1, timeout_ms)?;
                Ok(())
            })
            .await??;
        }

        let timeout = Duration::from_millis(envelope.constraints.timeout_ms);
        let max_bytes = envelope.constraints.max_output_bytes;

        let mut status = ToolStatus::Ok;
        let mut error: Option<ToolErrorDetail> = None;
        let mut outputs: Map<String, Value> = Map::new();

        match tokio::time::timeout(timeout, tool.execute(&envelope)).await {
            Ok(Ok(out)) => {
                outputs = out;
                // Byte-cap enforcement on the serialized form.
                let serialized = serde_json::to_vec(&outputs).unwrap_or_default();
                if serialized.len() > max_bytes {
                    let preview_len = serialized.len().min(500);
                    let preview =
                        String::from_utf8_lossy(&serialized[..preview_len]).to_string();
                    outputs = Map::new();
                    outputs.insert("truncated".into(), json!(true));
                    outputs.insert("preview".into(), json!(preview));
                    status = ToolStatus::Error;
                    error = Some(ToolErrorDetail {
                        kind: "max_output_bytes_exceeded".into(),
                        message: format!(
                            "Output of {} bytes exceeded the {} byte cap",
                            serialized.len(),
                            max_bytes
                        ),
                    });
                }
            }
            Ok(Err(e)) => {
                status = ToolStatus::Error;
                error = Some(ToolErrorDetail {
                    kind: error_kind(&e),
                    message: e.to_string(),
                });
            }
            Err(_elapsed) => {
                status = ToolStatus::Timeout;
                error = Some(ToolErrorDetail {
                    kind: "timeout".into(),
                    message: format!(
                        "Tool {} exceeded {}ms",
                        tool.name(),
                        envelope.constraints.timeout_ms
                    ),
                });
            }
        }

        let finished = Utc::now();

        {
            let store = store.clone();
            let call_id = call_id.clone();
            let exec_node_id = exec_node_id.clone();
            let status_str = status.as_str().to_string();
            let outputs_val = Value::Object(outputs.clone());
            tokio::task::spawn_blocking(move || {
                store.finalize_call_records(&call_id, &exec_node_id, &outputs_val, &status_str)
            })
            .await??;
        }

        Ok(ToolResult {
            trace_id: envelope.trace_id,
            span_id: envelope.span_id,
            tool_name: tool.name().to_string(),
            status,
            outputs,
            error,
            started_at,
            finished_at: finished.to_rfc3339(),
            elapsed_ms: elapsed_ms(started, finished),
        })
    }
}

/// Concrete error kind for the taxonomy. Downcasts the well-known cases;
/// everything else is a tool logic error.
fn error_kind(e: &anyhow::Error) -> String {
    if e.downcast_ref::<std::io::Error>().is_some() {
        "io_error".into()
    } else if e.downcast_ref::<reqwest::Error>().is_some() {
        "dependency_unreachable".into()
    } else if e.downcast_ref::<rusqlite::Error>().is_some() {
        "storage_error".into()
    } else if e.downcast_ref::<crate::llm::LlmError>().is_some() {
        "llm_unavailable".into()
    } else {
        "tool_error".into()
    }
}

// ============================================================================
// 3. PROCESS-WIDE REGISTRY
// ============================================================================
//
// The registry's lifetime is the process. Installed once at startup; tests
// build their own instances instead.

static GLOBAL_REGISTRY: OnceLock<Arc<ToolRegistry>> = OnceLock::new();

pub fn install_global(registry: Arc<ToolRegistry>) -> Arc<ToolRegistry> {
    GLOBAL_REGISTRY.get_or_init(|| registry).clone()
}

pub fn global() -> Option<Arc<ToolRegistry>> {
    GLOBAL_REGISTRY.get().cloned()
}
