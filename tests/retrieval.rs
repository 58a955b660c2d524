use chrono::{Duration, Utc};
use mindloom::config::Config;
use mindloom::contracts::new_id;
use mindloom::db::Store;
use mindloom::qdrant::QdrantClient;
use mindloom::retrieval::{
    recency_score, sanitize_fts_query, source_boost, RetrievalEngine, RetrieveRequest, MIN_SCORE,
};
use serde_json::json;

fn temp_store() -> Store {
    let path = std::env::temp_dir().join(format!("mindloom_retr_{}.db", new_id()));
    Store::open(path).expect("store open")
}

fn offline_engine(store: &Store) -> RetrievalEngine {
    let config = Config::offline(store.path());
    RetrievalEngine::new(store.clone(), QdrantClient::new(config.qdrant_url))
}

fn insert_card(store: &Store, summary: &str, content: &str, source_type: &str) -> String {
    let memory_id = new_id();
    store
        .insert_memory_card(
            &memory_id,
            source_type,
            summary,
            Some(content),
            &json!({"source_type": source_type}),
            None,
        )
        .unwrap();
    memory_id
}

#[test]
fn test_sanitize_fts_query() {
    assert_eq!(sanitize_fts_query("phoenix"), "\"phoenix\"");
    assert_eq!(sanitize_fts_query("alice acme"), "\"alice\" OR \"acme\"");
    // FTS syntax characters are stripped, not quoted into operators.
    assert_eq!(sanitize_fts_query("who? is* \"bob\"!"), "\"who\" OR \"is\" OR \"bob\"");
    assert_eq!(sanitize_fts_query("(a:b)^{c}"), "\"a\" OR \"b\" OR \"c\"");
    // Pure punctuation sanitizes to nothing.
    assert_eq!(sanitize_fts_query("?!*^"), "");
    assert_eq!(sanitize_fts_query(""), "");
}

#[test]
fn test_recency_monotonically_decreasing() {
    let now = Utc::now();
    let mut last = f64::INFINITY;
    for days in [0i64, 1, 7, 30, 90, 365] {
        let ts = (now - Duration::days(days)).to_rfc3339();
        let score = recency_score(&ts, now);
        assert!(score <= last, "recency must not increase with age");
        assert!((0.0..=1.0).contains(&score));
        last = score;
    }
    // Fresh content scores near 1, year-old content near 0.
    assert!(recency_score(&now.to_rfc3339(), now) > 0.99);
    assert!(recency_score(&(now - Duration::days(365)).to_rfc3339(), now) < 0.01);
    // Space-separated ISO timestamps are normalized before parsing.
    let spaced = now.to_rfc3339().replace('T', " ");
    assert!(recency_score(&spaced, now) > 0.99);
    // Garbage never panics.
    assert_eq!(recency_score("not a date", now), 0.0);
}

#[test]
fn test_source_boosts() {
    assert_eq!(source_boost("browser_highlight"), 0.10);
    assert_eq!(source_boost("browser_bookmark"), 0.05);
    assert_eq!(source_boost("file_capture"), 0.03);
    assert_eq!(source_boost("audio_note"), 0.03);
    assert_eq!(source_boost("browser_visit"), -0.10);
    assert_eq!(source_boost("anything_else"), 0.0);
}

#[tokio::test]
async fn test_lexical_retrieval_scores_clamped() {
    let store = temp_store();
    let phoenix = insert_card(
        &store,
        "Alice works at Acme on Project Phoenix.",
        "Alice works at Acme on Project Phoenix. The kickoff is next week.",
        "file_capture",
    );
    insert_card(
        &store,
        "Grocery list for the weekend.",
        "Milk, eggs, bread.",
        "file_capture",
    );

    let engine = offline_engine(&store);
    let resp = engine
        .retrieve(&RetrieveRequest::new("phoenix"))
        .await
        .unwrap();

    assert!(!resp.results.is_empty(), "lexical match must surface the card");
    let top = &resp.results[0];
    assert_eq!(top.memory_id, phoenix);
    assert!(top.reasons.iter().any(|r| r == "fts_match"));

    for r in &resp.results {
        assert!(
            (MIN_SCORE..=1.0).contains(&r.final_score),
            "final score {} outside [{}, 1.0]",
            r.final_score,
            MIN_SCORE
        );
        for s in [r.signals.fts, r.signals.semantic, r.signals.graph, r.signals.recency] {
            assert!((0.0..=1.0).contains(&s));
        }
    }
}

#[tokio::test]
async fn test_source_type_filter() {
    let store = temp_store();
    insert_card(&store, "Phoenix launch notes.", "Phoenix details here.", "file_capture");
    insert_card(&store, "Phoenix article highlight.", "A phoenix rises.", "browser_highlight");

    let engine = offline_engine(&store);
    let mut req = RetrieveRequest::new("phoenix");
    req.source_types = Some(vec!["browser_highlight".into()]);

    let resp = engine.retrieve(&req).await.unwrap();
    assert!(!resp.results.is_empty());
    for r in &resp.results {
        assert_eq!(r.source_type, "browser_highlight");
    }
}

#[tokio::test]
async fn test_graph_expansion_surfaces_related_card() {
    use mindloom::graph::canonical::entity_node_id;
    use mindloom::graph::{GraphEdgeIn, GraphNodeIn, GraphService};

    let store = temp_store();
    // Card A matches the query; card B shares an entity with A but does
    // not mention the query term in its summary.
    let card_a = insert_card(
        &store,
        "Project Phoenix status update.",
        "Phoenix is on track.",
        "file_capture",
    );
    let card_b = insert_card(
        &store,
        "Architecture review meeting notes.",
        "We discussed the new service boundaries.",
        "file_capture",
    );

    let graph = GraphService::new(store.clone());
    let ent = entity_node_id("Project", "phoenix");
    graph
        .upsert_nodes(&[GraphNodeIn {
            node_id: ent.clone(),
            node_type: "Project".into(),
            props: json!({"name": "Phoenix", "canonical": "phoenix"}),
        }])
        .unwrap();
    let edge = |mem: &str| GraphEdgeIn {
        edge_id: None,
        from_node_id: format!("mem:{}", mem),
        to_node_id: ent.clone(),
        edge_type: "MENTIONS".into(),
        weight: 0.9,
        valid_from: None,
        valid_to: None,
        provenance: json!({}),
    };
    graph.upsert_edges(&[edge(&card_a), edge(&card_b)]).unwrap();

    let engine = offline_engine(&store);
    let mut req = RetrieveRequest::new("phoenix");
    req.hops = 1;

    let resp = engine.retrieve(&req).await.unwrap();
    let b = resp
        .results
        .iter()
        .find(|r| r.memory_id == card_b)
        .expect("graph expansion must surface the related card");
    assert!(b.reasons.iter().any(|r| r == "graph_expand"));
    let path = b.graph_path.as_ref().expect("expanded card carries its entity path");
    assert_eq!(path.via_entity_ids, vec![ent]);
    assert!(b.signals.graph > 0.0);
}

#[tokio::test]
async fn test_hop2_only_candidate_falls_below_floor() {
    use mindloom::graph::canonical::entity_node_id;
    use mindloom::graph::{GraphEdgeIn, GraphNodeIn, GraphService};

    let store = temp_store();
    // Chain: A (matches query) —ent1— B —ent2— C. C's only signal is the
    // hop-2 graph score: 0.15·0.4 + 0.05·recency + 0.03 stays under 0.18.
    let card_a = insert_card(&store, "Phoenix kickoff agenda.", "Phoenix agenda.", "file_capture");
    let card_b = insert_card(&store, "Budget spreadsheet notes.", "Numbers.", "file_capture");
    let card_c = insert_card(&store, "Holiday photos from the lake.", "Photos.", "file_capture");

    let graph = GraphService::new(store.clone());
    let ent1 = entity_node_id("Project", "phoenix");
    let ent2 = entity_node_id("Topic", "budget");
    graph
        .upsert_nodes(&[
            GraphNodeIn { node_id: ent1.clone(), node_type: "Project".into(), props: json!({}) },
            GraphNodeIn { node_id: ent2.clone(), node_type: "Topic".into(), props: json!({}) },
        ])
        .unwrap();
    let edge = |mem: &str, ent: &str| GraphEdgeIn {
        edge_id: None,
        from_node_id: format!("mem:{}", mem),
        to_node_id: ent.to_string(),
        edge_type: "MENTIONS".into(),
        weight: 0.9,
        valid_from: None,
        valid_to: None,
        provenance: json!({}),
    };
    graph
        .upsert_edges(&[
            edge(&card_a, &ent1),
            edge(&card_b, &ent1),
            edge(&card_b, &ent2),
            edge(&card_c, &ent2),
        ])
        .unwrap();

    let engine = offline_engine(&store);
    let mut req = RetrieveRequest::new("phoenix");
    req.hops = 2;

    let resp = engine.retrieve(&req).await.unwrap();
    assert!(
        !resp.results.iter().any(|r| r.memory_id == card_c),
        "a hop-2-only candidate cannot clear the relevance floor"
    );
}
