use anyhow::Result;
use async_trait::async_trait;
use mindloom::contracts::{new_id, ToolEnvelope, ToolStatus};
use mindloom::db::Store;
use mindloom::registry::{Tool, ToolRegistry};
use serde_json::{json, Map, Value};

fn temp_store() -> Store {
    let path = std::env::temp_dir().join(format!("mindloom_contract_{}.db", new_id()));
    Store::open(path).expect("store open")
}

struct BigOutputTool;

#[async_trait]
impl Tool for BigOutputTool {
    fn name(&self) -> &'static str {
        "big_output"
    }

    async fn execute(&self, _envelope: &ToolEnvelope) -> Result<Map<String, Value>> {
        let mut out = Map::new();
        out.insert("payload".into(), json!("x".repeat(10_000)));
        Ok(out)
    }
}

struct SleepyTool;

#[async_trait]
impl Tool for SleepyTool {
    fn name(&self) -> &'static str {
        "sleepy"
    }

    async fn execute(&self, _envelope: &ToolEnvelope) -> Result<Map<String, Value>> {
        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
        Ok(Map::new())
    }
}

struct FailingTool;

#[async_trait]
impl Tool for FailingTool {
    fn name(&self) -> &'static str {
        "failing"
    }

    async fn execute(&self, _envelope: &ToolEnvelope) -> Result<Map<String, Value>> {
        anyhow::bail!("deliberate failure")
    }
}

fn test_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(
        "big_output",
        "0.1.0",
        "returns more bytes than allowed",
        json!({}),
        json!({}),
        Box::new(|| Box::new(BigOutputTool)),
    );
    registry.register(
        "sleepy",
        "0.1.0",
        "sleeps past its budget",
        json!({}),
        json!({}),
        Box::new(|| Box::new(SleepyTool)),
    );
    registry.register(
        "failing",
        "0.1.0",
        "always errors",
        json!({}),
        json!({}),
        Box::new(|| Box::new(FailingTool)),
    );
    registry
}

#[tokio::test]
async fn test_output_cap_enforcement() {
    let store = temp_store();
    let registry = test_registry();

    let mut envelope = ToolEnvelope::new(new_id(), "big_output");
    envelope.constraints.max_output_bytes = 1_000;

    let result = registry.dispatch(&store, envelope).await.unwrap();
    assert_eq!(result.status, ToolStatus::Error);
    let err = result.error.expect("cap violation carries an error");
    assert_eq!(err.kind, "max_output_bytes_exceeded");

    // Outputs are replaced with a truncated preview.
    assert_eq!(result.outputs.get("truncated"), Some(&json!(true)));
    let preview = result
        .outputs
        .get("preview")
        .and_then(Value::as_str)
        .expect("preview present");
    assert!(preview.len() <= 500);
}

#[tokio::test]
async fn test_timeout_enforcement() {
    let store = temp_store();
    let registry = test_registry();

    let envelope = ToolEnvelope::new(new_id(), "sleepy").with_timeout_ms(50);
    let result = registry.dispatch(&store, envelope).await.unwrap();

    assert_eq!(result.status, ToolStatus::Timeout);
    assert_eq!(result.error.unwrap().kind, "timeout");
    assert!(result.elapsed_ms < 5_000, "wrapper must not wait out the sleep");
}

#[tokio::test]
async fn test_dispatch_persists_call_and_exec_node() {
    let store = temp_store();
    let registry = test_registry();
    let trace_id = new_id();

    let envelope = ToolEnvelope::new(&trace_id, "failing");
    let result = registry.dispatch(&store, envelope).await.unwrap();
    assert_eq!(result.status, ToolStatus::Error);

    // The wrapper persisted an exec node for this (tool, trace) and closed
    // it with the same state as the result.
    let node = store
        .latest_exec_node_for_call("failing", &trace_id)
        .unwrap()
        .expect("exec node recorded");
    assert!(!node.call_id.is_empty());

    let conn = store.conn().unwrap();
    let (state, timeout_ms): (String, i64) = conn
        .query_row(
            "SELECT state, timeout_ms FROM exec_node WHERE exec_node_id = ?1",
            [&node.exec_node_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .unwrap();
    assert_eq!(state, "error");
    assert_eq!(timeout_ms, 8_000);

    let (call_status, outputs): (String, Option<String>) = conn
        .query_row(
            "SELECT status, outputs FROM tool_call WHERE call_id = ?1",
            [&node.call_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .unwrap();
    assert_eq!(call_status, "error");
    assert!(outputs.is_some(), "final update writes outputs even on error");
}

#[tokio::test]
async fn test_unknown_tool_is_a_local_error() {
    let store = temp_store();
    let registry = test_registry();

    let envelope = ToolEnvelope::new(new_id(), "no_such_tool");
    let err = registry.dispatch(&store, envelope).await.unwrap_err();
    assert!(err.to_string().contains("not registered"));
}

#[test]
fn test_summary_content_invariants() {
    let store = temp_store();

    // A summary that is a pure prefix of the content must be adjusted.
    let memory_id = new_id();
    let content = "The quarterly report shows strong growth. Revenue is up 20 percent. \
                   The team expanded to twelve people.";
    let prefix_summary = "The quarterly report shows strong growth.";
    store
        .insert_memory_card(&memory_id, "file_capture", prefix_summary, Some(content), &json!({}), None)
        .unwrap();

    let card = store.fetch_memory_card(&memory_id).unwrap().unwrap();
    assert!(
        !card.content_text.as_deref().unwrap().starts_with(&card.summary),
        "stored summary must not be a pure prefix of content"
    );
    assert!(card.summary.chars().count() <= 400);

    // Oversized inputs are hard-capped.
    let memory_id2 = new_id();
    let long_summary = "word ".repeat(200);
    let long_content = "sentence one. ".repeat(30_000);
    store
        .insert_memory_card(&memory_id2, "file_capture", &long_summary, Some(long_content.as_str()), &json!({}), None)
        .unwrap();
    let card2 = store.fetch_memory_card(&memory_id2).unwrap().unwrap();
    assert!(card2.summary.chars().count() <= 400);
    assert!(card2.content_text.as_deref().unwrap().chars().count() <= 200_000);
}

#[test]
fn test_fts_best_effort_on_card_insert() {
    let store = temp_store();
    let memory_id = new_id();
    store
        .insert_memory_card(
            &memory_id,
            "file_capture",
            "Searchable summary about llamas.",
            Some("Full text body."),
            &json!({}),
            None,
        )
        .unwrap();

    let hits = store
        .fts_search_cards("\"llamas\"", 10, None, None, None)
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].0, memory_id);
    assert!(hits[0].1 > 0.0 && hits[0].1 <= 1.0);
}
