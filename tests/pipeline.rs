use anyhow::Result;
use async_trait::async_trait;
use mindloom::config::Config;
use mindloom::contracts::{new_id, ToolEnvelope};
use mindloom::db::Store;
use mindloom::graph::canonical::entity_node_id;
use mindloom::graph::{Direction, GraphService};
use mindloom::orchestrator::Orchestrator;
use mindloom::registry::Tool;
use mindloom::tools::{build_registry, ToolContext};
use mindloom::watcher::scan_once;
use mindloom::worker::Worker;
use serde_json::{json, Map, Value};
use std::sync::Arc;

/// Extractor stand-in with fixed output, so pipelines exercise the entity
/// path without a live model.
struct FixedExtractor;

#[async_trait]
impl Tool for FixedExtractor {
    fn name(&self) -> &'static str {
        "extractor"
    }

    async fn execute(&self, _envelope: &ToolEnvelope) -> Result<Map<String, Value>> {
        let mut out = Map::new();
        out.insert(
            "entities".into(),
            json!([
                {"name": "Alice", "type": "Person", "confidence": 0.9},
                {"name": "Acme", "type": "Org", "confidence": 0.85},
                {"name": "Project Phoenix", "type": "Project", "confidence": 0.8},
            ]),
        );
        out.insert("tags".into(), json!(["work"]));
        out.insert("actions".into(), json!([]));
        Ok(out)
    }
}

struct Harness {
    store: Store,
    config: Config,
    orchestrator: Orchestrator,
}

fn harness(watch_root: Option<std::path::PathBuf>) -> Harness {
    let dir = std::env::temp_dir().join(format!("mindloom_pipe_{}", new_id()));
    std::fs::create_dir_all(&dir).unwrap();
    let mut config = Config::offline(dir.join("mindloom.db"));
    if let Some(root) = watch_root {
        config.watch_roots = vec![root];
    }
    let store = Store::open(&config.db_path).unwrap();

    let mut registry = build_registry(ToolContext::new(store.clone(), config.clone()));
    registry.register(
        "extractor",
        "0.0.0-test",
        "fixed extraction for tests",
        json!({}),
        json!({}),
        Box::new(|| Box::new(FixedExtractor)),
    );

    let orchestrator = Orchestrator::new(store.clone(), config.clone(), Arc::new(registry));
    Harness {
        store,
        config,
        orchestrator,
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_text_ingest_end_to_end() {
    let watch_dir = std::env::temp_dir().join(format!("mindloom_watch_{}", new_id()));
    std::fs::create_dir_all(&watch_dir).unwrap();
    let body = "Alice works at Acme on Project Phoenix.";
    std::fs::write(watch_dir.join("notes.txt"), body).unwrap();

    let h = harness(Some(watch_dir.clone()));

    // ── Watcher tick ─────────────────────────────────────────────────────
    scan_once(&h.store, &h.config, 1).unwrap();
    assert_eq!(h.store.count_blobs().unwrap(), 1);
    assert_eq!(h.store.count_jobs(Some("queued")).unwrap(), 1);

    // ── Worker tick ──────────────────────────────────────────────────────
    let job = h.store.claim_job().unwrap().expect("job claimable");
    assert_eq!(job.status, "running");
    let worker = Worker::new(h.orchestrator.clone());
    worker.handle_job(&job).await.unwrap();
    h.store.complete_job(&job.job_id, None).unwrap();
    assert_eq!(h.store.count_jobs(Some("done")).unwrap(), 1);

    // ── One card, faithful content, capped summary ───────────────────────
    assert_eq!(h.store.count_memory_cards().unwrap(), 1);
    let conn = h.store.conn().unwrap();
    let memory_id: String = conn
        .query_row("SELECT memory_id FROM memory_card", [], |r| r.get(0))
        .unwrap();
    drop(conn);
    let card = h.store.fetch_memory_card(&memory_id).unwrap().unwrap();
    assert_eq!(card.content_text.as_deref(), Some(body));
    assert!(card.summary.chars().count() <= 400);
    assert!(
        !card.content_text.as_deref().unwrap().starts_with(&card.summary),
        "summary must not be a pure prefix of content"
    );

    let entities = card.metadata.get("entities").and_then(Value::as_array).unwrap();
    assert!(entities.iter().any(|e| {
        e.get("name").and_then(Value::as_str) == Some("Alice")
            && e.get("type").and_then(Value::as_str) == Some("Person")
    }));

    // ── Trace completeness: one exec node per dispatched tool ────────────
    let trace_id = card
        .metadata
        .get("trace_id")
        .and_then(Value::as_str)
        .unwrap()
        .to_string();
    assert_eq!(h.store.get_exec_trace_status(&trace_id).unwrap().as_deref(), Some("done"));

    let nodes = h.store.exec_nodes_for_trace(&trace_id).unwrap();
    let mut tool_names: Vec<&str> = nodes
        .iter()
        .filter_map(|n| n.tool_name.as_deref())
        .collect();
    tool_names.sort_unstable();
    assert_eq!(
        tool_names,
        vec!["doc_parse", "extractor", "graph_builder", "summarizer", "text_embed"]
    );
    for n in &nodes {
        assert_eq!(n.state, "ok");
        assert_eq!(n.attempt, 1);
    }

    // Sequential pipeline: edges equal the predecessor/successor pairs.
    let edges = h.store.exec_edges_for_trace(&trace_id).unwrap();
    assert_eq!(edges.len(), 4);
    assert!(edges.iter().all(|(_, _, cond)| cond == "sequential"));

    // ── Graph footprint ──────────────────────────────────────────────────
    let graph = GraphService::new(h.store.clone());
    let alice_id = entity_node_id("Person", "alice");
    let alice = graph.get_node(&alice_id).unwrap().expect("Alice entity node");
    assert_eq!(alice.node_type, "Person");
    assert_eq!(alice.props.get("name").and_then(Value::as_str), Some("Alice"));

    let resp = graph
        .neighbors(&alice_id, Direction::In, None, None, None, 10)
        .unwrap();
    assert_eq!(resp.edges.len(), 1);
    assert_eq!(resp.edges[0].edge_type, "MENTIONS");
    assert_eq!(resp.edges[0].from_node_id, format!("mem:{}", memory_id));
    assert!(
        resp.edges[0]
            .provenance
            .get("tool_call_id")
            .and_then(Value::as_str)
            .is_some(),
        "edge provenance carries the builder call id"
    );

    // ── S2: unchanged file, second tick is a no-op ───────────────────────
    scan_once(&h.store, &h.config, 2).unwrap();
    assert_eq!(h.store.count_jobs(None).unwrap(), 1, "no duplicate job for unchanged file");

    // ── Idempotent re-ingest ─────────────────────────────────────────────
    let blob_id = card.metadata.get("blob_id").and_then(Value::as_str).unwrap();
    let source_id = card.metadata.get("source_id").and_then(Value::as_str).unwrap();
    let path = card.metadata.get("file_path").and_then(Value::as_str).unwrap();
    let again = h
        .orchestrator
        .ingest_blob(blob_id, source_id, path, "text/plain", body.len() as u64, None)
        .await
        .unwrap();
    assert_eq!(again.status, "idempotent_skip");
    assert_eq!(again.pipeline, "skip");
    assert_eq!(again.memory_id.as_deref(), Some(memory_id.as_str()));
    assert_eq!(h.store.count_memory_cards().unwrap(), 1);
    assert!(again.steps.is_empty(), "no tools run on the idempotent path");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_oversized_file_gets_placeholder() {
    let h = harness(None);

    let result = h
        .orchestrator
        .ingest_blob(
            &new_id(),
            &new_id(),
            "/data/huge-export.csv",
            "text/csv",
            64 * 1024 * 1024,
            None,
        )
        .await
        .unwrap();

    assert_eq!(result.status, "ok");
    assert!(result.steps.is_empty(), "oversize policy runs no tools");
    let card = h
        .store
        .fetch_memory_card(result.memory_id.as_deref().unwrap())
        .unwrap()
        .unwrap();
    assert_eq!(card.card_type, "file_capture_placeholder");
    assert!(card.summary.contains("skipped"));
    assert_eq!(
        h.store.get_exec_trace_status(&result.trace_id).unwrap().as_deref(),
        Some("done")
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_missing_file_fails_pipeline() {
    let h = harness(None);

    let result = h
        .orchestrator
        .ingest_blob(
            &new_id(),
            &new_id(),
            "/nowhere/missing.txt",
            "text/plain",
            10,
            None,
        )
        .await
        .unwrap();

    assert_eq!(result.status, "error");
    assert!(result.memory_id.is_none(), "no card for a failed parse");
    assert_eq!(
        h.store.get_exec_trace_status(&result.trace_id).unwrap().as_deref(),
        Some("error")
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_chat_abstains_on_empty_memory() {
    let h = harness(None);

    let result = h.orchestrator.chat("Who is Bob?", 8, true, 1).await.unwrap();

    assert_eq!(result.status, "ok");
    assert_eq!(result.verdict, "abstain");
    assert!(
        result.answer.starts_with("I don't have enough evidence"),
        "unexpected answer: {}",
        result.answer
    );
    assert!(result.citations.is_empty());
    assert_eq!(h.store.count_chat_citations().unwrap(), 0);

    // Chat pipeline is fully traced: retrieval -> weaver -> verifier.
    let nodes = h.store.exec_nodes_for_trace(&result.trace_id).unwrap();
    let mut tool_names: Vec<&str> = nodes
        .iter()
        .filter_map(|n| n.tool_name.as_deref())
        .collect();
    tool_names.sort_unstable();
    assert_eq!(tool_names, vec!["retrieval", "verifier", "weaver"]);
    let edges = h.store.exec_edges_for_trace(&result.trace_id).unwrap();
    assert_eq!(edges.len(), 2);
    assert_eq!(
        h.store.get_exec_trace_status(&result.trace_id).unwrap().as_deref(),
        Some("done")
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_chat_answers_with_citations_from_memory() {
    let h = harness(None);

    // Seed one card directly.
    let memory_id = new_id();
    h.store
        .insert_memory_card(
            &memory_id,
            "file_capture",
            "Alice works at Acme on Project Phoenix.",
            Some("Alice works at Acme on Project Phoenix. Kickoff is Monday."),
            &json!({"source_type": "file_capture"}),
            None,
        )
        .unwrap();

    let result = h.orchestrator.chat("Phoenix", 8, true, 1).await.unwrap();

    assert_eq!(result.verdict, "pass");
    assert!(!result.answer.is_empty());
    assert!(!result.evidence.is_empty());
    assert!(!result.citations.is_empty());
    assert!(result.citations.iter().all(|c| c.memory_id == memory_id));
    assert!(h.store.count_chat_citations().unwrap() >= 1);

    // The persisted turn carries the verdict and trace linkage.
    let conn = h.store.conn().unwrap();
    let (verdict, trace_id): (String, String) = conn
        .query_row(
            "SELECT verdict, trace_id FROM conversation_turn",
            [],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .unwrap();
    assert_eq!(verdict, "pass");
    assert_eq!(trace_id, result.trace_id);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_chat_rejects_hostile_input() {
    let h = harness(None);

    let long_input = "x".repeat(60_000);
    let result = h.orchestrator.chat(&long_input, 8, false, 0).await.unwrap();
    assert_eq!(result.status, "rejected");
    assert!(result.answer.starts_with("Request rejected"));
    assert_eq!(
        h.store.get_exec_trace_status(&result.trace_id).unwrap().as_deref(),
        Some("rejected")
    );
    assert!(result.steps.is_empty(), "no tools run after rejection");

    let nul_input = "hello\0world";
    let result = h.orchestrator.chat(nul_input, 8, false, 0).await.unwrap();
    assert_eq!(result.status, "rejected");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_capture_job_flows_through_worker() {
    let h = harness(None);

    let job_id = h
        .store
        .enqueue_job(
            "ingest_capture",
            &json!({
                "url": "https://example.com/articles/42",
                "title": "On the care of phoenixes",
                "text": "Feed your phoenix daily. Keep away from water.",
                "source_type": "browser_highlight",
            }),
        )
        .unwrap();

    let job = h.store.claim_job().unwrap().expect("capture job claimable");
    assert_eq!(job.job_id, job_id);
    let worker = Worker::new(h.orchestrator.clone());
    worker.handle_job(&job).await.unwrap();

    assert_eq!(h.store.count_memory_cards().unwrap(), 1);
    let conn = h.store.conn().unwrap();
    let (card_type, summary): (String, String) = conn
        .query_row("SELECT type, summary FROM memory_card", [], |r| {
            Ok((r.get(0)?, r.get(1)?))
        })
        .unwrap();
    assert_eq!(card_type, "browser_highlight");
    assert_eq!(summary, "On the care of phoenixes");
}

#[test]
fn test_enqueue_dedup_and_claim_order() {
    let h = harness(None);

    let payload = json!({"blob_id": "b1", "path": "/tmp/a"});
    let first = h.store.enqueue_job("ingest_blob", &payload).unwrap();
    let second = h.store.enqueue_job("ingest_blob", &payload).unwrap();
    assert_eq!(first, second, "idempotent enqueue on identical payload");

    // A payload with the same keys in different order hashes identically.
    let reordered = json!({"path": "/tmp/a", "blob_id": "b1"});
    let third = h.store.enqueue_job("ingest_blob", &reordered).unwrap();
    assert_eq!(first, third);

    let other = h
        .store
        .enqueue_job("ingest_blob", &json!({"blob_id": "b2", "path": "/tmp/b"}))
        .unwrap();
    assert_ne!(first, other);

    // Oldest first; attempts increment on claim.
    let claimed = h.store.claim_job().unwrap().unwrap();
    assert_eq!(claimed.job_id, first);
    assert_eq!(claimed.attempts, 1);

    // A completed job no longer blocks re-enqueue.
    h.store.complete_job(&first, None).unwrap();
    let fresh = h.store.enqueue_job("ingest_blob", &payload).unwrap();
    assert_ne!(fresh, first);
}
