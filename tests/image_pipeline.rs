use mindloom::config::Config;
use mindloom::contracts::new_id;
use mindloom::db::Store;
use mindloom::orchestrator::Orchestrator;
use mindloom::tools::ocr::is_meaningful_ocr;
use mindloom::tools::{build_registry, ToolContext};
use serde_json::Value;
use std::sync::Arc;

#[test]
fn test_ocr_quality_gate() {
    // Real content passes.
    assert!(is_meaningful_ocr(
        "Quarterly Revenue Report 2024: revenue grew 20 percent year over year.",
        Some(78.0)
    ));
    // Too short.
    assert!(!is_meaningful_ocr("hi", None));
    // Too few words.
    assert!(!is_meaningful_ocr("a1 b2 c3 d4 e5 f6 g7 h8 i9 j0 k1 l2", None));
    // Low confidence fails even with clean text.
    assert!(!is_meaningful_ocr(
        "This is perfectly readable text with many words in it.",
        Some(12.0)
    ));
    // Failure tokens are never meaningful.
    assert!(!is_meaningful_ocr("[OCR error: tesseract crashed while reading]", None));
    // Garbage-heavy strings fail the alpha / symbol ratios.
    assert!(!is_meaningful_ocr("|| // \\\\ ~~ ## || // \\\\ ~~ ## || // \\\\ ~~", None));
    // Dominated by a repeated character.
    assert!(!is_meaningful_ocr("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa aa aa", None));
    // Confidence gate only applies when a value is reported.
    assert!(is_meaningful_ocr(
        "Meeting notes from the platform sync on Tuesday morning.",
        None
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_image_pipeline_falls_back_to_caption() {
    let dir = std::env::temp_dir().join(format!("mindloom_img_{}", new_id()));
    std::fs::create_dir_all(&dir).unwrap();
    // Not a decodable image — OCR yields nothing useful either way, which
    // is exactly the caption-fallback path.
    let image_path = dir.join("holiday-sunset.png");
    std::fs::write(&image_path, b"\x89PNG\r\n\x1a\nnot really pixels").unwrap();

    let config = Config::offline(dir.join("mindloom.db"));
    let store = Store::open(&config.db_path).unwrap();
    let registry = build_registry(ToolContext::new(store.clone(), config.clone()));
    let orchestrator = Orchestrator::new(store.clone(), config, Arc::new(registry));

    let result = orchestrator
        .ingest_blob(
            &new_id(),
            &new_id(),
            image_path.to_str().unwrap(),
            "image/png",
            32,
            None,
        )
        .await
        .unwrap();

    // Vision embedding succeeded (deterministic encoder), so the pipeline
    // is ok even though OCR found nothing.
    assert_eq!(result.status, "ok");
    assert_eq!(result.pipeline, "ocr");
    let memory_id = result.memory_id.clone().expect("card created");

    let dispatched: Vec<&str> = result.steps.iter().map(|s| s.tool_name.as_str()).collect();
    assert!(dispatched.contains(&"ocr"));
    assert!(dispatched.contains(&"vision_embed"));
    assert!(dispatched.contains(&"image_caption"));
    assert!(dispatched.contains(&"text_embed"));
    assert!(
        !dispatched.contains(&"graph_builder"),
        "heuristic captions yield no entities, so no graph step"
    );

    let card = store.fetch_memory_card(&memory_id).unwrap().unwrap();
    assert_eq!(
        card.metadata.get("base_text_source").and_then(Value::as_str),
        Some("caption")
    );
    assert_eq!(
        card.metadata.get("caption_model").and_then(Value::as_str),
        Some("heuristic")
    );
    // The heuristic caption IS the summary (modulo the prefix-invariant
    // marker, since the caption is also the card content).
    let caption_text = card
        .metadata
        .get("caption_text")
        .and_then(Value::as_str)
        .unwrap();
    assert!(caption_text.contains("holiday sunset"));
    assert!(card.summary.starts_with("Image: holiday sunset"));
    assert_eq!(card.content_text.as_deref(), Some(caption_text));
    assert!(
        !card.content_text.as_deref().unwrap().starts_with(&card.summary),
        "summary keeps the non-prefix invariant even when it derives from the caption"
    );

    // Parallel roots never connect to each other; the caption and embed
    // steps both chain off the OCR node.
    let edges = store.exec_edges_for_trace(&result.trace_id).unwrap();
    assert_eq!(edges.len(), 2);
    let ocr_node = result
        .steps
        .iter()
        .find(|s| s.tool_name == "ocr")
        .unwrap()
        .exec_node_id
        .clone();
    let vision_node = result
        .steps
        .iter()
        .find(|s| s.tool_name == "vision_embed")
        .unwrap()
        .exec_node_id
        .clone();
    for (from, to, cond) in &edges {
        assert_eq!(from, &ocr_node);
        assert_ne!(to, &vision_node);
        assert_eq!(cond, "sequential");
    }

    assert_eq!(
        store.get_exec_trace_status(&result.trace_id).unwrap().as_deref(),
        Some("done")
    );
}
