// src/graph.rs
//
// =============================================================================
// MINDLOOM: PROPERTY GRAPH SERVICE (v 0.1 )
// =============================================================================
//
// SQLite-backed property graph with deterministic identifiers.
//
// Responsibilities:
// 1. Upsert nodes and edges (insert-or-replace by stable id).
// 2. One-hop neighbor queries with direction / edge-type / time filters.
// 3. Bounded BFS expansion with first-path recording and cycle refusal.
// 4. Compaction of duplicate entities (see graph/compact.rs).

use crate::contracts::utcnow_iso;
use crate::db::Store;
use anyhow::Result;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};

pub mod canonical;
pub mod compact;

// ============================================================================
// 1. MODELS
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNodeIn {
    pub node_id: String,
    #[serde(default = "default_node_type")]
    pub node_type: String,
    #[serde(default)]
    pub props: Value,
}

fn default_node_type() -> String {
    "Entity".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphEdgeIn {
    /// Derived deterministically when absent.
    #[serde(default)]
    pub edge_id: Option<String>,
    pub from_node_id: String,
    pub to_node_id: String,
    #[serde(default = "default_edge_type")]
    pub edge_type: String,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default)]
    pub valid_from: Option<String>,
    #[serde(default)]
    pub valid_to: Option<String>,
    #[serde(default)]
    pub provenance: Value,
}

fn default_edge_type() -> String {
    "RELATED".into()
}

fn default_weight() -> f64 {
    1.0
}

#[derive(Debug, Clone, Serialize)]
pub struct GraphNodeOut {
    pub node_id: String,
    pub node_type: String,
    pub created_at: String,
    pub props: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct GraphEdgeOut {
    pub edge_id: String,
    pub from_node_id: String,
    pub to_node_id: String,
    pub edge_type: String,
    pub weight: f64,
    pub valid_from: Option<String>,
    pub valid_to: Option<String>,
    pub provenance: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Out,
    In,
    Both,
}

#[derive(Debug, Clone, Serialize)]
pub struct NeighborsResponse {
    pub node: Option<GraphNodeOut>,
    pub neighbors: Vec<GraphNodeOut>,
    pub edges: Vec<GraphEdgeOut>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PathInfo {
    pub target_node_id: String,
    pub via_edge_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExpandResponse {
    pub nodes: Vec<GraphNodeOut>,
    pub edges: Vec<GraphEdgeOut>,
    pub paths: Vec<PathInfo>,
}

#[derive(Debug, Clone)]
pub struct ExpandRequest {
    pub seed_node_ids: Vec<String>,
    pub hops: usize,
    pub direction: Direction,
    pub edge_types: Option<Vec<String>>,
    pub time_min: Option<String>,
    pub time_max: Option<String>,
    pub max_nodes: usize,
    pub max_edges: usize,
}

impl Default for ExpandRequest {
    fn default() -> Self {
        Self {
            seed_node_ids: Vec::new(),
            hops: 1,
            direction: Direction::Both,
            edge_types: None,
            time_min: None,
            time_max: None,
            max_nodes: 300,
            max_edges: 1000,
        }
    }
}

// ============================================================================
// 2. SERVICE
// ============================================================================

#[derive(Clone)]
pub struct GraphService {
    store: Store,
}

impl GraphService {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    // -------------------------------------------------------------------------
    // Upserts
    // -------------------------------------------------------------------------

    pub fn upsert_nodes(&self, nodes: &[GraphNodeIn]) -> Result<usize> {
        if nodes.is_empty() {
            return Ok(0);
        }
        let mut conn = self.store.conn()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO graph_node (node_id, node_type, props, created_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(node_id) DO UPDATE SET
                     node_type = excluded.node_type,
                     props     = excluded.props",
            )?;
            for n in nodes {
                stmt.execute(params![
                    n.node_id,
                    n.node_type,
                    serde_json::to_string(&n.props)?,
                    utcnow_iso()
                ])?;
            }
        }
        tx.commit()?;
        Ok(nodes.len())
    }

    pub fn upsert_edges(&self, edges: &[GraphEdgeIn]) -> Result<usize> {
        if edges.is_empty() {
            return Ok(0);
        }
        let mut conn = self.store.conn()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO graph_edge
                     (edge_id, from_node_id, to_node_id, edge_type,
                      weight, valid_from, valid_to, provenance)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(edge_id) DO UPDATE SET
                     edge_type  = excluded.edge_type,
                     weight     = excluded.weight,
                     valid_from = excluded.valid_from,
                     valid_to   = excluded.valid_to,
                     provenance = excluded.provenance",
            )?;
            for e in edges {
                let eid = e.edge_id.clone().unwrap_or_else(|| {
                    canonical::edge_id(
                        &e.from_node_id,
                        &e.edge_type,
                        &e.to_node_id,
                        e.valid_from.as_deref(),
                        e.valid_to.as_deref(),
                    )
                });
                stmt.execute(params![
                    eid,
                    e.from_node_id,
                    e.to_node_id,
                    e.edge_type,
                    e.weight,
                    e.valid_from,
                    e.valid_to,
                    serde_json::to_string(&e.provenance)?
                ])?;
            }
        }
        tx.commit()?;
        Ok(edges.len())
    }

    // -------------------------------------------------------------------------
    // Lookups
    // -------------------------------------------------------------------------

    pub fn get_node(&self, node_id: &str) -> Result<Option<GraphNodeOut>> {
        let conn = self.store.conn()?;
        let row = conn
            .query_row(
                "SELECT node_id, node_type, created_at, props
                 FROM graph_node WHERE node_id = ?1",
                params![node_id],
                row_to_node,
            )
            .optional()?;
        Ok(row)
    }

    pub fn count_nodes(&self) -> Result<i64> {
        let conn = self.store.conn()?;
        Ok(conn.query_row("SELECT COUNT(*) FROM graph_node", [], |r| r.get(0))?)
    }

    pub fn count_edges(&self) -> Result<i64> {
        let conn = self.store.conn()?;
        Ok(conn.query_row("SELECT COUNT(*) FROM graph_edge", [], |r| r.get(0))?)
    }

    /// One-hop neighborhood of a node.
    pub fn neighbors(
        &self,
        node_id: &str,
        direction: Direction,
        edge_types: Option<&[String]>,
        time_min: Option<&str>,
        time_max: Option<&str>,
        limit: usize,
    ) -> Result<NeighborsResponse> {
        let center = self.get_node(node_id)?;
        let conn = self.store.conn()?;

        let edges = fetch_edges(
            &conn,
            &[node_id.to_string()],
            direction,
            edge_types,
            time_min,
            time_max,
            limit,
        )?;

        let mut neighbor_ids: HashSet<String> = HashSet::new();
        for e in &edges {
            if e.from_node_id != node_id {
                neighbor_ids.insert(e.from_node_id.clone());
            }
            if e.to_node_id != node_id {
                neighbor_ids.insert(e.to_node_id.clone());
            }
        }
        let neighbors = fetch_nodes(&conn, &neighbor_ids.into_iter().collect::<Vec<_>>())?;

        Ok(NeighborsResponse {
            node: center,
            neighbors,
            edges,
        })
    }

    // -------------------------------------------------------------------------
    // Bounded BFS expansion
    // -------------------------------------------------------------------------

    /// Breadth-first traversal from the seed set. Stops when either cap is
    /// reached. Visited nodes are never re-enqueued (cycles are safe). For
    /// each discovered node, `paths` records the edge-id sequence of the
    /// first path that reached it; ties break by edge encounter order.
    pub fn expand(&self, req: &ExpandRequest) -> Result<ExpandResponse> {
        let hops = req.hops.min(2);
        let conn = self.store.conn()?;

        let mut visited: HashSet<String> = req.seed_node_ids.iter().cloned().collect();
        let mut collected_edges: Vec<GraphEdgeOut> = Vec::new();
        let mut paths: HashMap<String, Vec<String>> = HashMap::new();
        let mut frontier: VecDeque<String> = req.seed_node_ids.iter().cloned().collect();

        for _hop in 0..hops {
            if frontier.is_empty() {
                break;
            }
            let batch: Vec<String> = frontier.drain(..).collect();
            let remaining = req.max_edges.saturating_sub(collected_edges.len());
            if remaining == 0 {
                break;
            }

            let edge_rows = fetch_edges(
                &conn,
                &batch,
                req.direction,
                req.edge_types.as_deref(),
                req.time_min.as_deref(),
                req.time_max.as_deref(),
                remaining,
            )?;

            let mut next_frontier: Vec<String> = Vec::new();
            let mut capped = false;

            for edge in edge_rows {
                if collected_edges.len() >= req.max_edges {
                    capped = true;
                    break;
                }

                // Which end of the edge is new territory?
                let (parent, other) = if visited.contains(&edge.from_node_id) {
                    (edge.from_node_id.clone(), edge.to_node_id.clone())
                } else {
                    (edge.to_node_id.clone(), edge.from_node_id.clone())
                };

                collected_edges.push(edge.clone());

                if !visited.contains(&other) {
                    visited.insert(other.clone());
                    next_frontier.push(other.clone());
                    let mut path = paths.get(&parent).cloned().unwrap_or_default();
                    path.push(edge.edge_id.clone());
                    paths.insert(other.clone(), path);
                    if visited.len() >= req.max_nodes {
                        capped = true;
                        break;
                    }
                } else if !paths.contains_key(&other) && !req.seed_node_ids.contains(&other) {
                    // Already visited via this batch; still record the first
                    // path that touched it.
                    let mut path = paths.get(&parent).cloned().unwrap_or_default();
                    path.push(edge.edge_id.clone());
                    paths.insert(other.clone(), path);
                }
            }

            if capped {
                break;
            }
            frontier.extend(next_frontier);
        }

        let all_ids: Vec<String> = visited.into_iter().collect();
        let nodes = fetch_nodes(&conn, &all_ids)?;
        let path_infos = paths
            .into_iter()
            .map(|(target_node_id, via_edge_ids)| PathInfo {
                target_node_id,
                via_edge_ids,
            })
            .collect();

        Ok(ExpandResponse {
            nodes,
            edges: collected_edges,
            paths: path_infos,
        })
    }
}

// ============================================================================
// 3. ROW HELPERS
// ============================================================================

fn row_to_node(row: &rusqlite::Row<'_>) -> rusqlite::Result<GraphNodeOut> {
    let props_raw: Option<String> = row.get(3)?;
    Ok(GraphNodeOut {
        node_id: row.get(0)?,
        node_type: row.get(1)?,
        created_at: row.get(2)?,
        props: props_raw
            .and_then(|p| serde_json::from_str(&p).ok())
            .unwrap_or(Value::Null),
    })
}

fn row_to_edge(row: &rusqlite::Row<'_>) -> rusqlite::Result<GraphEdgeOut> {
    let prov_raw: Option<String> = row.get(7)?;
    Ok(GraphEdgeOut {
        edge_id: row.get(0)?,
        from_node_id: row.get(1)?,
        to_node_id: row.get(2)?,
        edge_type: row.get(3)?,
        weight: row.get(4)?,
        valid_from: row.get(5)?,
        valid_to: row.get(6)?,
        provenance: prov_raw
            .and_then(|p| serde_json::from_str(&p).ok())
            .unwrap_or(Value::Null),
    })
}

pub(crate) fn fetch_nodes(conn: &Connection, node_ids: &[String]) -> Result<Vec<GraphNodeOut>> {
    if node_ids.is_empty() {
        return Ok(Vec::new());
    }
    let placeholders = vec!["?"; node_ids.len()].join(",");
    let mut stmt = conn.prepare(&format!(
        "SELECT node_id, node_type, created_at, props
         FROM graph_node WHERE node_id IN ({})",
        placeholders
    ))?;
    let rows = stmt.query_map(rusqlite::params_from_iter(node_ids.iter()), row_to_node)?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

fn fetch_edges(
    conn: &Connection,
    node_ids: &[String],
    direction: Direction,
    edge_types: Option<&[String]>,
    time_min: Option<&str>,
    time_max: Option<&str>,
    limit: usize,
) -> Result<Vec<GraphEdgeOut>> {
    if node_ids.is_empty() {
        return Ok(Vec::new());
    }

    let placeholders = vec!["?"; node_ids.len()].join(",");
    let mut filters: Vec<String> = Vec::new();
    let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

    match direction {
        Direction::Out => {
            filters.push(format!("from_node_id IN ({})", placeholders));
            for id in node_ids {
                args.push(Box::new(id.clone()));
            }
        }
        Direction::In => {
            filters.push(format!("to_node_id IN ({})", placeholders));
            for id in node_ids {
                args.push(Box::new(id.clone()));
            }
        }
        Direction::Both => {
            filters.push(format!(
                "(from_node_id IN ({ph}) OR to_node_id IN ({ph}))",
                ph = placeholders
            ));
            for id in node_ids {
                args.push(Box::new(id.clone()));
            }
            for id in node_ids {
                args.push(Box::new(id.clone()));
            }
        }
    }

    if let Some(types) = edge_types {
        if !types.is_empty() {
            let type_ph = vec!["?"; types.len()].join(",");
            filters.push(format!("edge_type IN ({})", type_ph));
            for t in types {
                args.push(Box::new(t.clone()));
            }
        }
    }

    // Edges without validity bounds are always valid.
    if let Some(tmin) = time_min {
        filters.push("(valid_to IS NULL OR valid_to >= ?)".into());
        args.push(Box::new(tmin.to_string()));
    }
    if let Some(tmax) = time_max {
        filters.push("(valid_from IS NULL OR valid_from <= ?)".into());
        args.push(Box::new(tmax.to_string()));
    }

    let sql = format!(
        "SELECT edge_id, from_node_id, to_node_id, edge_type,
                weight, valid_from, valid_to, provenance
         FROM graph_edge
         WHERE {}
         ORDER BY rowid
         LIMIT ?",
        filters.join(" AND ")
    );
    args.push(Box::new(limit as i64));

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(
        rusqlite::params_from_iter(args.iter().map(|b| b.as_ref())),
        row_to_edge,
    )?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}
