// src/graph/compact.rs
//
// =============================================================================
// MINDLOOM: GRAPH COMPACTION (v 0.1 )
// =============================================================================
//
// Maintenance pass that merges duplicate entity nodes left behind by
// earlier ingests or differing extractor spellings.
//
// Groups entity nodes by canonical string ACROSS types (so ("Other","dog")
// and ("Topic","dog") collapse), picks a primary by type priority then
// highest confidence, repoints all edges, deletes the duplicates.

use super::canonical::{
    canonicalize_entity_name, entity_node_id, normalize_entity_type, type_priority,
};
use crate::db::Store;
use anyhow::Result;
use rusqlite::params;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, Default, Serialize)]
pub struct CompactionStats {
    pub groups_found: usize,
    pub nodes_deleted: usize,
    pub edges_repointed: usize,
}

#[derive(Debug, Clone)]
struct EntityNode {
    node_id: String,
    node_type: String,
    confidence: f64,
}

pub fn compact(store: &Store, dry_run: bool) -> Result<CompactionStats> {
    let mut stats = CompactionStats::default();
    let mut conn = store.conn()?;

    // 1. Load all entity nodes and group by canonical name.
    let mut groups: HashMap<String, Vec<EntityNode>> = HashMap::new();
    {
        let mut stmt = conn.prepare(
            "SELECT node_id, node_type, props FROM graph_node WHERE node_id LIKE 'ent:%'",
        )?;
        let rows = stmt.query_map([], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, Option<String>>(2)?,
            ))
        })?;

        for row in rows.filter_map(|r| r.ok()) {
            let (node_id, raw_type, props_raw) = row;
            let props: Value = props_raw
                .and_then(|p| serde_json::from_str(&p).ok())
                .unwrap_or(Value::Null);
            let norm_type = normalize_entity_type(&raw_type);

            // Prefer the stored canonical; derive it from the name otherwise.
            let canon = props
                .get("canonical")
                .and_then(Value::as_str)
                .map(str::to_string)
                .filter(|c| !c.is_empty())
                .unwrap_or_else(|| {
                    let raw_name = props
                        .get("name")
                        .or_else(|| props.get("raw_name"))
                        .and_then(Value::as_str)
                        .unwrap_or("");
                    canonicalize_entity_name(raw_name, norm_type)
                });
            if canon.is_empty() {
                continue;
            }

            let confidence = props
                .get("confidence")
                .and_then(Value::as_f64)
                .unwrap_or(0.0);

            groups.entry(canon).or_default().push(EntityNode {
                node_id,
                node_type: norm_type.to_string(),
                confidence,
            });
        }
    }

    // 2. Merge each duplicate group into its primary.
    let tx = conn.transaction()?;
    for (canon, mut nodes) in groups {
        if nodes.len() < 2 {
            continue;
        }
        stats.groups_found += 1;

        let best_type = nodes
            .iter()
            .map(|n| n.node_type.as_str())
            .max_by_key(|t| type_priority(t))
            .unwrap_or("Other")
            .to_string();
        let target_id = entity_node_id(&best_type, &canon);

        // Primary: the node whose id already matches the canonical id for
        // the winning type, else the highest-confidence node.
        let primary_id = match nodes.iter().find(|n| n.node_id == target_id) {
            Some(n) => n.node_id.clone(),
            None => {
                nodes.sort_by(|a, b| {
                    b.confidence
                        .partial_cmp(&a.confidence)
                        .unwrap_or(std::cmp::Ordering::Equal)
                });
                nodes[0].node_id.clone()
            }
        };

        let duplicates: Vec<&EntityNode> =
            nodes.iter().filter(|n| n.node_id != primary_id).collect();

        log::info!(
            "[COMPACT] canon={:?} type={}: primary={}, merging {} duplicates",
            canon,
            best_type,
            primary_id,
            duplicates.len()
        );

        if dry_run {
            stats.nodes_deleted += duplicates.len();
            continue;
        }

        for dup in duplicates {
            let repointed_from = tx.execute(
                "UPDATE OR IGNORE graph_edge SET from_node_id = ?1 WHERE from_node_id = ?2",
                params![primary_id, dup.node_id],
            )?;
            let repointed_to = tx.execute(
                "UPDATE OR IGNORE graph_edge SET to_node_id = ?1 WHERE to_node_id = ?2",
                params![primary_id, dup.node_id],
            )?;
            // Edges whose repoint collided with an existing edge are
            // duplicates themselves.
            tx.execute(
                "DELETE FROM graph_edge WHERE from_node_id = ?1 OR to_node_id = ?1",
                params![dup.node_id],
            )?;
            tx.execute(
                "DELETE FROM graph_node WHERE node_id = ?1",
                params![dup.node_id],
            )?;
            stats.edges_repointed += repointed_from + repointed_to;
            stats.nodes_deleted += 1;
        }
    }
    tx.commit()?;

    Ok(stats)
}
