// src/retrieval/expand.rs
//
// =============================================================================
// MINDLOOM: RETRIEVAL GRAPH EXPANSION (v 0.1 )
// =============================================================================
//
// Bounded expansion for retrieval augmentation: from seed memory cards,
// walk through shared entities to discover related cards.
//
//   seed mem ──edge── entity ──edge── other mem        (hop 1, score 0.7)
//   hop-1 mem ──edge── entity ──edge── further mem     (hop 2, score 0.4)
//
// The entity path that first reached each new card is recorded for
// explainability.

use crate::db::Store;
use anyhow::Result;
use rusqlite::Connection;
use std::collections::{HashMap, HashSet};

pub const MAX_CANDIDATES: usize = 200;

const HOP1_SCORE: f64 = 0.7;
const HOP2_SCORE: f64 = 0.4;

#[derive(Debug, Clone)]
pub struct GraphCandidate {
    pub memory_id: String,
    pub graph_score: f64,
    pub via_entity_ids: Vec<String>,
    pub hop: usize,
}

pub fn expand_from_seeds(
    store: &Store,
    seed_memory_ids: &[String],
    hops: usize,
    max_candidates: usize,
) -> Result<Vec<GraphCandidate>> {
    if seed_memory_ids.is_empty() || hops == 0 {
        return Ok(Vec::new());
    }
    let hops = hops.min(2);
    let conn = store.conn()?;

    let seed_node_ids: Vec<String> = seed_memory_ids
        .iter()
        .map(|mid| format!("mem:{}", mid))
        .collect();
    let seed_set: HashSet<&String> = seed_memory_ids.iter().collect();

    let mut candidates: HashMap<String, GraphCandidate> = HashMap::new();

    // ── Hop 1: seed mem → entity → other mem ─────────────────────────────
    let hop1_entities = entity_neighbours_of_mem_nodes(&conn, &seed_node_ids)?;
    if hop1_entities.is_empty() {
        return Ok(Vec::new());
    }

    let entity_ids_hop1: Vec<String> = hop1_entities
        .iter()
        .map(|(_, ent)| ent.clone())
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();

    let hop1_mems = mem_neighbours_of_entities(&conn, &entity_ids_hop1)?;
    for (memory_id, entity_id) in hop1_mems {
        if seed_set.contains(&memory_id) {
            continue;
        }
        match candidates.get_mut(&memory_id) {
            Some(c) => {
                if !c.via_entity_ids.contains(&entity_id) {
                    c.via_entity_ids.push(entity_id);
                }
            }
            None => {
                candidates.insert(
                    memory_id.clone(),
                    GraphCandidate {
                        memory_id,
                        graph_score: HOP1_SCORE,
                        via_entity_ids: vec![entity_id],
                        hop: 1,
                    },
                );
            }
        }
        if candidates.len() >= max_candidates {
            break;
        }
    }

    // ── Hop 2 (optional) ─────────────────────────────────────────────────
    if hops >= 2 && candidates.len() < max_candidates {
        let hop1_mem_node_ids: Vec<String> = candidates
            .keys()
            .map(|mid| format!("mem:{}", mid))
            .collect();
        let hop2_entities = entity_neighbours_of_mem_nodes(&conn, &hop1_mem_node_ids)?;
        if !hop2_entities.is_empty() {
            let entity_ids_hop2: Vec<String> = hop2_entities
                .iter()
                .map(|(_, ent)| ent.clone())
                .collect::<HashSet<_>>()
                .into_iter()
                .collect();
            let hop2_mems = mem_neighbours_of_entities(&conn, &entity_ids_hop2)?;
            for (memory_id, entity_id) in hop2_mems {
                if seed_set.contains(&memory_id) || candidates.contains_key(&memory_id) {
                    continue;
                }
                candidates.insert(
                    memory_id.clone(),
                    GraphCandidate {
                        memory_id,
                        graph_score: HOP2_SCORE,
                        via_entity_ids: vec![entity_id],
                        hop: 2,
                    },
                );
                if candidates.len() >= max_candidates {
                    break;
                }
            }
        }
    }

    let mut result: Vec<GraphCandidate> = candidates.into_values().collect();
    result.sort_by(|a, b| {
        b.graph_score
            .partial_cmp(&a.graph_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    result.truncate(max_candidates);
    Ok(result)
}

// ── SQL helpers ──────────────────────────────────────────────────────────

/// (mem_node_id, entity_node_id) pairs for entities touching the given
/// mem:* nodes, in either edge direction.
fn entity_neighbours_of_mem_nodes(
    conn: &Connection,
    mem_node_ids: &[String],
) -> Result<Vec<(String, String)>> {
    if mem_node_ids.is_empty() {
        return Ok(Vec::new());
    }
    let ph = vec!["?"; mem_node_ids.len()].join(",");
    let sql = format!(
        "SELECT from_node_id AS mem_node_id, to_node_id AS entity_node_id
         FROM graph_edge
         WHERE from_node_id IN ({ph}) AND to_node_id LIKE 'ent:%'
         UNION
         SELECT to_node_id AS mem_node_id, from_node_id AS entity_node_id
         FROM graph_edge
         WHERE to_node_id IN ({ph}) AND from_node_id LIKE 'ent:%'"
    );
    let mut stmt = conn.prepare(&sql)?;
    let args: Vec<&String> = mem_node_ids.iter().chain(mem_node_ids.iter()).collect();
    let rows = stmt.query_map(rusqlite::params_from_iter(args), |r| {
        Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
    })?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

/// (memory_id, entity_node_id) pairs for cards touching the given entities.
fn mem_neighbours_of_entities(
    conn: &Connection,
    entity_node_ids: &[String],
) -> Result<Vec<(String, String)>> {
    if entity_node_ids.is_empty() {
        return Ok(Vec::new());
    }
    let ph = vec!["?"; entity_node_ids.len()].join(",");
    let sql = format!(
        "SELECT to_node_id AS mem_node_id, from_node_id AS entity_node_id
         FROM graph_edge
         WHERE from_node_id IN ({ph}) AND to_node_id LIKE 'mem:%'
         UNION
         SELECT from_node_id AS mem_node_id, to_node_id AS entity_node_id
         FROM graph_edge
         WHERE to_node_id IN ({ph}) AND from_node_id LIKE 'mem:%'"
    );
    let mut stmt = conn.prepare(&sql)?;
    let args: Vec<&String> = entity_node_ids.iter().chain(entity_node_ids.iter()).collect();
    let rows = stmt.query_map(rusqlite::params_from_iter(args), |r| {
        let mem_node_id: String = r.get(0)?;
        let memory_id = mem_node_id
            .strip_prefix("mem:")
            .unwrap_or(&mem_node_id)
            .to_string();
        Ok((memory_id, r.get::<_, String>(1)?))
    })?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}
