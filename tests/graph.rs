use mindloom::contracts::new_id;
use mindloom::db::Store;
use mindloom::graph::canonical::{edge_id, entity_node_id};
use mindloom::graph::compact;
use mindloom::graph::{Direction, ExpandRequest, GraphEdgeIn, GraphNodeIn, GraphService};
use serde_json::json;

fn temp_store() -> Store {
    let path = std::env::temp_dir().join(format!("mindloom_graph_{}.db", new_id()));
    Store::open(path).expect("store open")
}

fn node(node_id: &str, node_type: &str, props: serde_json::Value) -> GraphNodeIn {
    GraphNodeIn {
        node_id: node_id.into(),
        node_type: node_type.into(),
        props,
    }
}

fn mentions(from: &str, to: &str) -> GraphEdgeIn {
    GraphEdgeIn {
        edge_id: None,
        from_node_id: from.into(),
        to_node_id: to.into(),
        edge_type: "MENTIONS".into(),
        weight: 0.9,
        valid_from: None,
        valid_to: None,
        provenance: json!({}),
    }
}

#[test]
fn test_edge_upsert_idempotent() {
    let graph = GraphService::new(temp_store());

    graph
        .upsert_nodes(&[
            node("mem:m1", "MemoryCard", json!({"summary": "s"})),
            node("ent:e1", "Person", json!({"name": "Alice"})),
        ])
        .unwrap();

    graph.upsert_edges(&[mentions("mem:m1", "ent:e1")]).unwrap();
    graph.upsert_edges(&[mentions("mem:m1", "ent:e1")]).unwrap();
    assert_eq!(graph.count_edges().unwrap(), 1, "re-insertion must not duplicate");

    // The stored edge id matches the deterministic derivation.
    let resp = graph
        .neighbors("mem:m1", Direction::Both, None, None, None, 10)
        .unwrap();
    assert_eq!(resp.edges.len(), 1);
    assert_eq!(
        resp.edges[0].edge_id,
        edge_id("mem:m1", "MENTIONS", "ent:e1", None, None)
    );
    assert_eq!(resp.neighbors.len(), 1);
    assert_eq!(resp.neighbors[0].node_id, "ent:e1");
}

#[test]
fn test_node_upsert_overwrites() {
    let graph = GraphService::new(temp_store());

    graph
        .upsert_nodes(&[node("ent:x", "Other", json!({"name": "phoenix"}))])
        .unwrap();
    graph
        .upsert_nodes(&[node("ent:x", "Project", json!({"name": "Phoenix", "confidence": 0.8}))])
        .unwrap();

    assert_eq!(graph.count_nodes().unwrap(), 1);
    let n = graph.get_node("ent:x").unwrap().unwrap();
    assert_eq!(n.node_type, "Project");
    assert_eq!(n.props.get("confidence").and_then(|v| v.as_f64()), Some(0.8));
}

#[test]
fn test_bounded_expand() {
    let graph = GraphService::new(temp_store());

    // A chain: mem:a - ent:1 - mem:b - ent:2 - mem:c, plus a cycle edge.
    graph
        .upsert_nodes(&[
            node("mem:a", "MemoryCard", json!({})),
            node("mem:b", "MemoryCard", json!({})),
            node("mem:c", "MemoryCard", json!({})),
            node("ent:1", "Person", json!({"name": "Alice"})),
            node("ent:2", "Project", json!({"name": "Phoenix"})),
        ])
        .unwrap();
    graph
        .upsert_edges(&[
            mentions("mem:a", "ent:1"),
            mentions("mem:b", "ent:1"),
            mentions("mem:b", "ent:2"),
            mentions("mem:c", "ent:2"),
            // Cycle back to the seed.
            mentions("mem:b", "ent:1"),
        ])
        .unwrap();

    let resp = graph
        .expand(&ExpandRequest {
            seed_node_ids: vec!["mem:a".into()],
            hops: 2,
            ..Default::default()
        })
        .unwrap();

    // Two hops from mem:a reach ent:1 then mem:b (and nothing further).
    let ids: Vec<&str> = resp.nodes.iter().map(|n| n.node_id.as_str()).collect();
    assert!(ids.contains(&"mem:a"));
    assert!(ids.contains(&"ent:1"));
    assert!(ids.contains(&"mem:b"));
    assert!(!ids.contains(&"mem:c"), "mem:c is three hops away");

    // Every discovered non-seed node has a path of length <= hops.
    for p in &resp.paths {
        assert!(p.via_edge_ids.len() <= 2, "path for {} too long", p.target_node_id);
        assert!(!p.via_edge_ids.is_empty());
    }
    let ent1_path = resp
        .paths
        .iter()
        .find(|p| p.target_node_id == "ent:1")
        .expect("ent:1 must have a path");
    assert_eq!(ent1_path.via_edge_ids.len(), 1);
}

#[test]
fn test_expand_respects_caps() {
    let graph = GraphService::new(temp_store());

    let mut nodes = vec![node("mem:hub", "MemoryCard", json!({}))];
    let mut edges = Vec::new();
    for i in 0..20 {
        let ent = format!("ent:{:03}", i);
        nodes.push(node(&ent, "Topic", json!({})));
        edges.push(mentions("mem:hub", &ent));
    }
    graph.upsert_nodes(&nodes).unwrap();
    graph.upsert_edges(&edges).unwrap();

    let resp = graph
        .expand(&ExpandRequest {
            seed_node_ids: vec!["mem:hub".into()],
            hops: 1,
            max_nodes: 5,
            max_edges: 4,
            ..Default::default()
        })
        .unwrap();

    assert!(resp.nodes.len() <= 5);
    assert!(resp.edges.len() <= 4);
}

#[test]
fn test_compaction_merges_duplicates() {
    let store = temp_store();
    let graph = GraphService::new(store.clone());

    // Same canonical "phoenix" under two types; Project outranks Topic.
    let topic_id = entity_node_id("Topic", "phoenix");
    let project_id = entity_node_id("Project", "phoenix");
    graph
        .upsert_nodes(&[
            node(&topic_id, "Topic", json!({"name": "phoenix", "canonical": "phoenix", "confidence": 0.5})),
            node(&project_id, "Project", json!({"name": "Phoenix", "canonical": "phoenix", "confidence": 0.9})),
            node("mem:m1", "MemoryCard", json!({})),
        ])
        .unwrap();
    graph.upsert_edges(&[mentions("mem:m1", &topic_id)]).unwrap();

    let stats = compact::compact(&store, false).unwrap();
    assert_eq!(stats.groups_found, 1);
    assert_eq!(stats.nodes_deleted, 1);

    // The duplicate is gone and its edge now points at the primary.
    assert!(graph.get_node(&topic_id).unwrap().is_none());
    let resp = graph
        .neighbors(&project_id, Direction::Both, None, None, None, 10)
        .unwrap();
    assert_eq!(resp.neighbors.len(), 1);
    assert_eq!(resp.neighbors[0].node_id, "mem:m1");
}

#[test]
fn test_compaction_dry_run_touches_nothing() {
    let store = temp_store();
    let graph = GraphService::new(store.clone());

    let a = entity_node_id("Topic", "rust");
    let b = entity_node_id("Technology", "rust");
    graph
        .upsert_nodes(&[
            node(&a, "Topic", json!({"canonical": "rust"})),
            node(&b, "Technology", json!({"canonical": "rust"})),
        ])
        .unwrap();

    let stats = compact::compact(&store, true).unwrap();
    assert_eq!(stats.groups_found, 1);
    assert_eq!(graph.count_nodes().unwrap(), 2, "dry run must not delete");
}
