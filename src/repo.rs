// src/repo.rs
//
// =============================================================================
// MINDLOOM: RECORD REPOSITORY (v 0.1 )
// =============================================================================
//
// CRUD over the provenance and knowledge tables: tool calls, exec
// nodes/edges/traces, memory cards, embeddings, conversation turns, and
// chat citations. The capture-side tables (file_state, source, blob, jobs)
// live in capture.rs / queue.rs.
//
// Every method opens its own short-lived connection (see db.rs).

use crate::contracts::{new_id, utcnow_iso};
use crate::db::Store;
use anyhow::Result;
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// -----------------------------------------------------------------------------
// Card constants & helpers
// -----------------------------------------------------------------------------

pub const MAX_SUMMARY_CHARS: usize = 400;
pub const MAX_CONTENT_CHARS: usize = 200_000;

/// Truncate to at most `max_chars`, preferring a sentence boundary when one
/// exists past the first 40 characters.
pub fn truncate_at_sentence(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= max_chars {
        return trimmed.to_string();
    }
    let cut: String = trimmed.chars().take(max_chars).collect();
    for sep in [". ", ".\n", "! ", "? "] {
        if let Some(idx) = cut.rfind(sep) {
            if idx > 40 {
                return cut[..idx + 1].trim().to_string();
            }
        }
    }
    let hard: String = trimmed.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{}...", hard.trim_end())
}

// -----------------------------------------------------------------------------
// View models
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryCardRow {
    pub memory_id: String,
    pub card_type: String,
    pub summary: String,
    pub content_text: Option<String>,
    pub metadata: Value,
    pub created_at: String,
    pub source_time: Option<String>,
}

impl MemoryCardRow {
    /// source_type comes from metadata when present, else the card type.
    pub fn source_type(&self) -> String {
        self.metadata
            .get("source_type")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| self.card_type.clone())
    }
}

#[derive(Debug, Clone)]
pub struct ExecNodeRef {
    pub exec_node_id: String,
    pub call_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecNodeRow {
    pub exec_node_id: String,
    pub call_id: String,
    pub tool_name: Option<String>,
    pub state: String,
    pub attempt: i64,
    pub timeout_ms: i64,
    pub started_ts: Option<String>,
    pub finished_ts: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatCitation {
    pub memory_id: String,
    pub quote: String,
    pub source_type: String,
    pub created_at: String,
}

// -----------------------------------------------------------------------------
// Repository
// -----------------------------------------------------------------------------

impl Store {
    // -------------------------------------------------------------------------
    // tool_call
    // -------------------------------------------------------------------------

    pub fn insert_tool_call(
        &self,
        call_id: &str,
        tool_name: &str,
        inputs: &Value,
        status: &str,
    ) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO tool_call (call_id, tool_name, ts, inputs, outputs, status)
             VALUES (?1, ?2, ?3, ?4, NULL, ?5)",
            params![
                call_id,
                tool_name,
                utcnow_iso(),
                serde_json::to_string(inputs)?,
                status
            ],
        )?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // exec_node / exec_edge
    // -------------------------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    pub fn insert_exec_node(
        &self,
        exec_node_id: &str,
        call_id: &str,
        trace_id: &str,
        state: &str,
        attempt: i64,
        timeout_ms: u64,
    ) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO exec_node
                 (exec_node_id, call_id, trace_id, state, attempt, timeout_ms, started_ts)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                exec_node_id,
                call_id,
                trace_id,
                state,
                attempt,
                timeout_ms as i64,
                utcnow_iso()
            ],
        )?;
        Ok(())
    }

    /// The most recent exec node recorded by the dispatch wrapper for a
    /// (tool, trace) pair. The orchestrator uses this to wire exec edges.
    pub fn latest_exec_node_for_call(
        &self,
        tool_name: &str,
        trace_id: &str,
    ) -> Result<Option<ExecNodeRef>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT en.exec_node_id, en.call_id
                 FROM exec_node en
                 JOIN tool_call tc ON en.call_id = tc.call_id
                 WHERE tc.tool_name = ?1 AND en.trace_id = ?2
                 ORDER BY en.started_ts DESC, en.rowid DESC
                 LIMIT 1",
                params![tool_name, trace_id],
                |r| {
                    Ok(ExecNodeRef {
                        exec_node_id: r.get(0)?,
                        call_id: r.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    pub fn insert_exec_edge(
        &self,
        from_exec_node_id: &str,
        to_exec_node_id: &str,
        condition: &str,
        trace_id: &str,
    ) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO exec_edge
                 (exec_edge_id, from_exec_node_id, to_exec_node_id, condition, trace_id)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![new_id(), from_exec_node_id, to_exec_node_id, condition, trace_id],
        )?;
        Ok(())
    }

    /// Final update for one dispatch: tool_call outputs/status and exec_node
    /// state land in a single transaction so the records can never disagree.
    pub fn finalize_call_records(
        &self,
        call_id: &str,
        exec_node_id: &str,
        outputs: &Value,
        status: &str,
    ) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "UPDATE tool_call SET outputs = ?1, status = ?2 WHERE call_id = ?3",
            params![serde_json::to_string(outputs)?, status, call_id],
        )?;
        tx.execute(
            "UPDATE exec_node SET state = ?1, finished_ts = ?2 WHERE exec_node_id = ?3",
            params![status, utcnow_iso(), exec_node_id],
        )?;
        tx.commit()?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // exec_trace
    // -------------------------------------------------------------------------

    pub fn insert_exec_trace(&self, trace_id: &str, metadata: &Value) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR IGNORE INTO exec_trace (trace_id, started_ts, status, metadata_json)
             VALUES (?1, ?2, 'running', ?3)",
            params![trace_id, utcnow_iso(), serde_json::to_string(metadata)?],
        )?;
        Ok(())
    }

    /// Terminal states are written once: a trace already out of `running`
    /// is never revised.
    pub fn finish_exec_trace(&self, trace_id: &str, status: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE exec_trace SET finished_ts = ?1, status = ?2
             WHERE trace_id = ?3 AND status = 'running'",
            params![utcnow_iso(), status, trace_id],
        )?;
        Ok(())
    }

    pub fn get_exec_trace_status(&self, trace_id: &str) -> Result<Option<String>> {
        let conn = self.conn()?;
        let status = conn
            .query_row(
                "SELECT status FROM exec_trace WHERE trace_id = ?1",
                params![trace_id],
                |r| r.get::<_, String>(0),
            )
            .optional()?;
        Ok(status)
    }

    pub fn exec_nodes_for_trace(&self, trace_id: &str) -> Result<Vec<ExecNodeRow>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT en.exec_node_id, en.call_id, tc.tool_name, en.state,
                    en.attempt, en.timeout_ms, en.started_ts, en.finished_ts
             FROM exec_node en
             LEFT JOIN tool_call tc ON en.call_id = tc.call_id
             WHERE en.trace_id = ?1
             ORDER BY en.started_ts, en.rowid",
        )?;
        let rows = stmt.query_map(params![trace_id], |r| {
            Ok(ExecNodeRow {
                exec_node_id: r.get(0)?,
                call_id: r.get(1)?,
                tool_name: r.get(2)?,
                state: r.get(3)?,
                attempt: r.get(4)?,
                timeout_ms: r.get(5)?,
                started_ts: r.get(6)?,
                finished_ts: r.get(7)?,
            })
        })?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn exec_edges_for_trace(&self, trace_id: &str) -> Result<Vec<(String, String, String)>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT from_exec_node_id, to_exec_node_id, COALESCE(condition, '')
             FROM exec_edge WHERE trace_id = ?1",
        )?;
        let rows = stmt.query_map(params![trace_id], |r| {
            Ok((r.get(0)?, r.get(1)?, r.get(2)?))
        })?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    // -------------------------------------------------------------------------
    // memory_card
    // -------------------------------------------------------------------------

    /// Insert a card, enforcing the summary/content invariants:
    /// - summary hard-capped at 400 chars (sentence-boundary cut),
    /// - content capped at 200 000 chars,
    /// - summary must not be a pure prefix of content (an ellipsis marker
    ///   is appended when it would be).
    /// The FTS index write is best-effort and never fails the card.
    pub fn insert_memory_card(
        &self,
        memory_id: &str,
        card_type: &str,
        summary: &str,
        content_text: Option<&str>,
        metadata: &Value,
        source_time: Option<&str>,
    ) -> Result<()> {
        let mut summary = truncate_at_sentence(summary, MAX_SUMMARY_CHARS);
        let content_text = content_text.map(|t| {
            if t.chars().count() > MAX_CONTENT_CHARS {
                truncate_at_sentence(t, MAX_CONTENT_CHARS)
            } else {
                t.to_string()
            }
        });

        if let Some(content) = &content_text {
            if !summary.is_empty() && content.starts_with(&summary) {
                summary = truncate_at_sentence(&summary, MAX_SUMMARY_CHARS - 2);
                summary.push_str(" …");
            }
        }

        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO memory_card
                 (memory_id, type, summary, content_text, metadata_json, created_at, source_time)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                memory_id,
                card_type,
                summary,
                content_text,
                serde_json::to_string(metadata)?,
                utcnow_iso(),
                source_time
            ],
        )?;

        // Sync FTS shadow table. Best-effort: a failed index write must not
        // fail the card write.
        let fts = conn.execute(
            "INSERT INTO memory_card_fts (rowid, summary)
             SELECT rowid, summary FROM memory_card WHERE memory_id = ?1",
            params![memory_id],
        );
        if let Err(e) = fts {
            log::warn!("FTS index write failed for card {}: {}", memory_id, e);
        }

        Ok(())
    }

    /// Idempotency probe: does any card already reference this blob?
    pub fn find_memory_card_by_blob(&self, blob_id: &str) -> Result<Option<String>> {
        let conn = self.conn()?;
        for pattern in [
            format!("%\"blob_id\":\"{}\"%", blob_id),
            format!("%\"blob_id\": \"{}\"%", blob_id),
        ] {
            let row: Option<String> = conn
                .query_row(
                    "SELECT memory_id FROM memory_card WHERE metadata_json LIKE ?1 LIMIT 1",
                    params![pattern],
                    |r| r.get(0),
                )
                .optional()?;
            if row.is_some() {
                return Ok(row);
            }
        }
        Ok(None)
    }

    pub fn fetch_memory_card(&self, memory_id: &str) -> Result<Option<MemoryCardRow>> {
        Ok(self
            .fetch_memory_cards_by_ids(&[memory_id.to_string()])?
            .into_iter()
            .next())
    }

    pub fn fetch_memory_cards_by_ids(&self, memory_ids: &[String]) -> Result<Vec<MemoryCardRow>> {
        if memory_ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.conn()?;
        let placeholders = vec!["?"; memory_ids.len()].join(",");
        let mut stmt = conn.prepare(&format!(
            "SELECT memory_id, type, summary, content_text, metadata_json, created_at, source_time
             FROM memory_card WHERE memory_id IN ({})",
            placeholders
        ))?;
        let rows = stmt.query_map(rusqlite::params_from_iter(memory_ids.iter()), |r| {
            let meta_raw: Option<String> = r.get(4)?;
            Ok(MemoryCardRow {
                memory_id: r.get(0)?,
                card_type: r.get(1)?,
                summary: r.get(2)?,
                content_text: r.get(3)?,
                metadata: meta_raw
                    .and_then(|m| serde_json::from_str(&m).ok())
                    .unwrap_or(Value::Null),
                created_at: r.get(5)?,
                source_time: r.get(6)?,
            })
        })?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn count_memory_cards(&self) -> Result<i64> {
        let conn = self.conn()?;
        Ok(conn.query_row("SELECT COUNT(*) FROM memory_card", [], |r| r.get(0))?)
    }

    /// FTS5 search over card summaries. `query` must already be sanitized
    /// (see retrieval::sanitize_fts_query). Time and source filters are
    /// applied in-store; the lexical score is 1 / (1 + |rank|).
    pub fn fts_search_cards(
        &self,
        query: &str,
        limit: usize,
        time_min: Option<&str>,
        time_max: Option<&str>,
        source_types: Option<&[String]>,
    ) -> Result<Vec<(String, f64)>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.conn()?;

        let mut sql = String::from(
            "SELECT mc.memory_id, rank
             FROM memory_card_fts
             JOIN memory_card mc ON mc.rowid = memory_card_fts.rowid
             WHERE memory_card_fts MATCH ?1",
        );
        let mut args: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(query.to_string())];

        if let Some(tmin) = time_min {
            sql.push_str(&format!(" AND mc.created_at >= ?{}", args.len() + 1));
            args.push(Box::new(tmin.replace(' ', "T")));
        }
        if let Some(tmax) = time_max {
            sql.push_str(&format!(" AND mc.created_at <= ?{}", args.len() + 1));
            args.push(Box::new(tmax.replace(' ', "T")));
        }
        if let Some(types) = source_types {
            if !types.is_empty() {
                let ph: Vec<String> = (0..types.len())
                    .map(|i| format!("?{}", args.len() + 1 + i))
                    .collect();
                sql.push_str(&format!(" AND mc.type IN ({})", ph.join(",")));
                for t in types {
                    args.push(Box::new(t.clone()));
                }
            }
        }
        sql.push_str(&format!(" ORDER BY rank LIMIT ?{}", args.len() + 1));
        args.push(Box::new(limit as i64));

        let mut stmt = match conn.prepare(&sql) {
            Ok(s) => s,
            // An empty database may not have the FTS table populated yet.
            Err(_) => return Ok(Vec::new()),
        };
        let result = stmt.query_map(
            rusqlite::params_from_iter(args.iter().map(|b| b.as_ref())),
            |r| {
                let mid: String = r.get(0)?;
                let rank: f64 = r.get(1)?;
                Ok((mid, 1.0 / (1.0 + rank.abs())))
            },
        );
        match result {
            Ok(rows) => Ok(rows.filter_map(|r| r.ok()).collect()),
            Err(_) => Ok(Vec::new()), // malformed MATCH never breaks retrieval
        }
    }

    // -------------------------------------------------------------------------
    // embedding
    // -------------------------------------------------------------------------

    pub fn insert_embedding(&self, memory_id: &str, modality: &str, vector_ref: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO embedding (embedding_id, memory_id, modality, vector_ref)
             VALUES (?1, ?2, ?3, ?4)",
            params![new_id(), memory_id, modality, vector_ref],
        )?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // conversation_turn / chat_citation
    // -------------------------------------------------------------------------

    pub fn insert_conversation_turn(
        &self,
        turn_id: &str,
        user_text: &str,
        assistant_text: &str,
        trace_id: &str,
        verdict: &str,
    ) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO conversation_turn
                 (turn_id, ts, user_text, assistant_text, trace_id, verdict)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![turn_id, utcnow_iso(), user_text, assistant_text, trace_id, verdict],
        )?;
        Ok(())
    }

    pub fn insert_chat_citations(&self, turn_id: &str, citations: &[ChatCitation]) -> Result<()> {
        if citations.is_empty() {
            return Ok(());
        }
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "INSERT INTO chat_citation
                 (citation_id, turn_id, memory_id, quote, source_type, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )?;
        for c in citations {
            stmt.execute(params![
                new_id(),
                turn_id,
                c.memory_id,
                c.quote,
                c.source_type,
                c.created_at
            ])?;
        }
        Ok(())
    }

    pub fn count_chat_citations(&self) -> Result<i64> {
        let conn = self.conn()?;
        Ok(conn.query_row("SELECT COUNT(*) FROM chat_citation", [], |r| r.get(0))?)
    }
}
