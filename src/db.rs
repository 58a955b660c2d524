// src/db.rs
//
// =============================================================================
// MINDLOOM: RELATIONAL STORE (v 0.1 )
// =============================================================================
//
// The Persistence Substrate.
//
// Architecture:
// - SQLite using the "Hybrid Relational" pattern.
// - High-traffic fields (status, timestamps, ids) are columns.
// - Complex data (metadata, inputs, outputs, props) is JSON text.
// - Connections are short-lived: one per call, foreign keys enforced.
// - Migrations are additive and idempotent: CREATE IF NOT EXISTS plus
//   introspection-guarded ADD COLUMN. Never destructive.

use anyhow::{Context, Result};
use rusqlite::Connection;
use std::path::{Path, PathBuf};

#[derive(Clone)]
pub struct Store {
    path: PathBuf,
}

impl Store {
    /// Open (or create) the database at `path` and apply the schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let store = Self { path };
        store.migrate()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Short-lived connection with FK enforcement and a busy timeout so the
    /// watcher, worker, and retrieval readers can interleave.
    pub fn conn(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path).context("Failed to open SQLite store")?;
        conn.execute_batch(
            "PRAGMA foreign_keys=ON;
             PRAGMA busy_timeout=10000;",
        )?;
        Ok(conn)
    }

    // -------------------------------------------------------------------------
    // SCHEMA
    // -------------------------------------------------------------------------

    fn migrate(&self) -> Result<()> {
        let conn = self.conn()?;

        conn.execute_batch(
            "BEGIN;

            -- Capture substrate
            CREATE TABLE IF NOT EXISTS file_state (
                path         TEXT PRIMARY KEY,
                mtime_ns     INTEGER NOT NULL,
                size_bytes   INTEGER NOT NULL,
                sha256       TEXT NOT NULL,
                last_seen_ts TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS source (
                source_id   TEXT PRIMARY KEY,
                source_type TEXT NOT NULL,
                uri         TEXT NOT NULL UNIQUE
            );

            CREATE TABLE IF NOT EXISTS blob (
                blob_id    TEXT PRIMARY KEY,
                sha256     TEXT NOT NULL,
                path       TEXT NOT NULL,
                mime       TEXT NOT NULL,
                size_bytes INTEGER NOT NULL,
                source_id  TEXT,
                UNIQUE(sha256, path)
            );

            CREATE TABLE IF NOT EXISTS jobs (
                job_id       TEXT PRIMARY KEY,
                type         TEXT NOT NULL,
                status       TEXT NOT NULL,
                payload_json TEXT NOT NULL,
                attempts     INTEGER NOT NULL DEFAULT 0,
                created_ts   TEXT NOT NULL,
                updated_ts   TEXT NOT NULL,
                error_text   TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);

            -- Knowledge memory
            CREATE TABLE IF NOT EXISTS memory_card (
                memory_id  TEXT PRIMARY KEY,
                type       TEXT NOT NULL,
                summary    TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS embedding (
                embedding_id TEXT PRIMARY KEY,
                memory_id    TEXT NOT NULL,
                modality     TEXT NOT NULL,
                vector_ref   TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_embedding_memory ON embedding(memory_id);

            -- Property graph
            CREATE TABLE IF NOT EXISTS graph_node (
                node_id    TEXT PRIMARY KEY,
                node_type  TEXT NOT NULL,
                props      TEXT,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS graph_edge (
                edge_id      TEXT PRIMARY KEY,
                from_node_id TEXT NOT NULL,
                to_node_id   TEXT NOT NULL,
                edge_type    TEXT NOT NULL,
                weight       REAL NOT NULL DEFAULT 1.0,
                valid_from   TEXT,
                valid_to     TEXT,
                provenance   TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_graph_edge_from ON graph_edge(from_node_id);
            CREATE INDEX IF NOT EXISTS idx_graph_edge_to   ON graph_edge(to_node_id);

            -- Execution provenance
            CREATE TABLE IF NOT EXISTS tool_call (
                call_id   TEXT PRIMARY KEY,
                tool_name TEXT NOT NULL,
                ts        TEXT NOT NULL,
                inputs    TEXT,
                outputs   TEXT,
                status    TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_tool_call_name ON tool_call(tool_name);

            CREATE TABLE IF NOT EXISTS exec_node (
                exec_node_id TEXT PRIMARY KEY,
                call_id      TEXT NOT NULL,
                state        TEXT NOT NULL,
                attempt      INTEGER NOT NULL DEFAULT 1,
                timeout_ms   INTEGER NOT NULL DEFAULT 8000
            );

            CREATE TABLE IF NOT EXISTS exec_edge (
                exec_edge_id      TEXT PRIMARY KEY,
                from_exec_node_id TEXT NOT NULL,
                to_exec_node_id   TEXT NOT NULL,
                condition         TEXT
            );

            CREATE TABLE IF NOT EXISTS exec_trace (
                trace_id      TEXT PRIMARY KEY,
                started_ts    TEXT NOT NULL,
                finished_ts   TEXT,
                status        TEXT NOT NULL,
                metadata_json TEXT
            );

            -- Conversations
            CREATE TABLE IF NOT EXISTS conversation_turn (
                turn_id        TEXT PRIMARY KEY,
                ts             TEXT NOT NULL,
                user_text      TEXT NOT NULL,
                assistant_text TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS chat_citation (
                citation_id TEXT PRIMARY KEY,
                turn_id     TEXT NOT NULL,
                memory_id   TEXT NOT NULL,
                quote       TEXT,
                source_type TEXT,
                created_at  TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_citation_turn ON chat_citation(turn_id);

            COMMIT;",
        )?;

        // Full-text index over card summaries. Kept outside the transaction:
        // a failure here must not block the relational schema.
        conn.execute_batch(
            "CREATE VIRTUAL TABLE IF NOT EXISTS memory_card_fts
             USING fts5(summary, content='memory_card', content_rowid='rowid');",
        )
        .ok();

        // Additive columns used by current code paths. Older databases gain
        // them on startup; existing rows keep NULLs.
        self.add_column_if_missing(&conn, "memory_card", "content_text", "TEXT")?;
        self.add_column_if_missing(&conn, "memory_card", "metadata_json", "TEXT")?;
        self.add_column_if_missing(&conn, "memory_card", "source_time", "TEXT")?;
        self.add_column_if_missing(&conn, "exec_node", "trace_id", "TEXT")?;
        self.add_column_if_missing(&conn, "exec_node", "started_ts", "TEXT")?;
        self.add_column_if_missing(&conn, "exec_node", "finished_ts", "TEXT")?;
        self.add_column_if_missing(&conn, "exec_edge", "trace_id", "TEXT")?;
        self.add_column_if_missing(&conn, "conversation_turn", "trace_id", "TEXT")?;
        self.add_column_if_missing(&conn, "conversation_turn", "verdict", "TEXT")?;
        self.add_column_if_missing(&conn, "jobs", "payload_hash", "TEXT")?;

        conn.execute_batch(
            "CREATE INDEX IF NOT EXISTS idx_jobs_payload_hash ON jobs(type, payload_hash);
             CREATE INDEX IF NOT EXISTS idx_exec_node_trace ON exec_node(trace_id);",
        )?;

        Ok(())
    }

    /// Introspection-guarded ADD COLUMN. SQLite has no IF NOT EXISTS for
    /// columns, so we check PRAGMA table_info first.
    fn add_column_if_missing(
        &self,
        conn: &Connection,
        table: &str,
        column: &str,
        sql_type: &str,
    ) -> Result<()> {
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
        let existing: Vec<String> = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .filter_map(|r| r.ok())
            .collect();

        if !existing.iter().any(|c| c == column) {
            conn.execute(
                &format!("ALTER TABLE {} ADD COLUMN {} {}", table, column, sql_type),
                [],
            )?;
        }
        Ok(())
    }
}
