// src/queue.rs
//
// =============================================================================
// MINDLOOM: JOB QUEUE (v 0.1 )
// =============================================================================
//
// Single-writer claim semantics over the jobs table.
//
// Invariants:
// - enqueue_job is idempotent on (type, payload_hash) across any
//   non-terminal status.
// - claim_job is the only place a row transitions queued -> running, done
//   in one transaction.

use crate::capture::sha256_bytes;
use crate::contracts::{new_id, utcnow_iso};
use crate::db::Store;
use anyhow::Result;
use rusqlite::{params, OptionalExtension};
use serde_json::{Map, Value};

pub const JOB_INGEST_BLOB: &str = "ingest_blob";
pub const JOB_INGEST_CAPTURE: &str = "ingest_capture";

#[derive(Debug, Clone)]
pub struct Job {
    pub job_id: String,
    pub job_type: String,
    pub status: String,
    pub payload: Value,
    pub attempts: i64,
}

/// Hash of the payload with keys in canonical order, so that two maps with
/// the same entries always collide.
fn payload_hash(payload: &Value) -> String {
    let canonical = match payload.as_object() {
        Some(obj) => {
            let mut keys: Vec<&String> = obj.keys().collect();
            keys.sort();
            let mut ordered = Map::new();
            for k in keys {
                ordered.insert(k.clone(), obj[k].clone());
            }
            serde_json::to_string(&Value::Object(ordered)).unwrap_or_default()
        }
        None => payload.to_string(),
    };
    sha256_bytes(canonical.as_bytes())
}

impl Store {
    /// Create a queued job unless an equivalent one is already queued or
    /// running. Returns the job_id either way.
    pub fn enqueue_job(&self, job_type: &str, payload: &Value) -> Result<String> {
        let hash = payload_hash(payload);
        let conn = self.conn()?;

        let existing: Option<String> = conn
            .query_row(
                "SELECT job_id FROM jobs
                 WHERE type = ?1 AND payload_hash = ?2
                   AND status IN ('queued', 'running')",
                params![job_type, hash],
                |r| r.get(0),
            )
            .optional()?;
        if let Some(jid) = existing {
            return Ok(jid);
        }

        let jid = new_id();
        let now = utcnow_iso();
        conn.execute(
            "INSERT INTO jobs
                 (job_id, type, status, payload_json, payload_hash, attempts,
                  created_ts, updated_ts)
             VALUES (?1, ?2, 'queued', ?3, ?4, 0, ?5, ?5)",
            params![jid, job_type, serde_json::to_string(payload)?, hash, now],
        )?;
        Ok(jid)
    }

    /// Atomically claim the oldest queued job: flip to running, bump
    /// attempts, return it. None when the queue is empty.
    pub fn claim_job(&self) -> Result<Option<Job>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let row: Option<(String, String, String, i64)> = tx
            .query_row(
                "SELECT job_id, type, payload_json, attempts FROM jobs
                 WHERE status = 'queued'
                 ORDER BY created_ts ASC
                 LIMIT 1",
                [],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
            )
            .optional()?;

        let Some((job_id, job_type, payload_json, attempts)) = row else {
            return Ok(None);
        };

        tx.execute(
            "UPDATE jobs
             SET status = 'running', updated_ts = ?1, attempts = attempts + 1
             WHERE job_id = ?2",
            params![utcnow_iso(), job_id],
        )?;
        tx.commit()?;

        Ok(Some(Job {
            payload: serde_json::from_str(&payload_json).unwrap_or(Value::Null),
            job_id,
            job_type,
            status: "running".into(),
            attempts: attempts + 1,
        }))
    }

    /// Mark a job done, or error when a message is given.
    pub fn complete_job(&self, job_id: &str, error: Option<&str>) -> Result<()> {
        let status = if error.is_some() { "error" } else { "done" };
        let conn = self.conn()?;
        conn.execute(
            "UPDATE jobs SET status = ?1, updated_ts = ?2, error_text = ?3 WHERE job_id = ?4",
            params![status, utcnow_iso(), error, job_id],
        )?;
        Ok(())
    }

    pub fn count_jobs(&self, status: Option<&str>) -> Result<i64> {
        let conn = self.conn()?;
        let count = match status {
            Some(s) => conn.query_row(
                "SELECT COUNT(*) FROM jobs WHERE status = ?1",
                params![s],
                |r| r.get(0),
            )?,
            None => conn.query_row("SELECT COUNT(*) FROM jobs", [], |r| r.get(0))?,
        };
        Ok(count)
    }
}
