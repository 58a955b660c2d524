// src/capture.rs
//
// =============================================================================
// MINDLOOM: CAPTURE SUBSTRATE (v 0.1 )
// =============================================================================
//
// Content addressing and origin bookkeeping for everything the watcher sees.
//
// Responsibilities:
// 1. Streaming SHA-256 (files are never loaded whole).
// 2. MIME detection: extension table first, Tika /detect/stream when
//    configured.
// 3. Upserts for file_state, source, and blob rows (dedup by natural key).

use crate::contracts::{new_id, utcnow_iso};
use crate::db::Store;
use anyhow::{Context, Result};
use rusqlite::{params, OptionalExtension};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::Path;

// ============================================================================
// 1. HASHING
// ============================================================================

/// Streamed SHA-256 of a file. 64 KiB buffer for throughput.
pub fn sha256_file(path: impl AsRef<Path>) -> Result<String> {
    let path = path.as_ref();
    let mut file =
        File::open(path).with_context(|| format!("Failed to open for hashing: {:?}", path))?;

    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 65536];
    loop {
        let count = file.read(&mut buffer)?;
        if count == 0 {
            break;
        }
        hasher.update(&buffer[..count]);
    }
    Ok(hex::encode(hasher.finalize()))
}

pub fn sha256_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

// ============================================================================
// 2. MIME DETECTION
// ============================================================================

/// Extension-based MIME lookup. The watcher prefers the Tika detector when
/// one is configured; this table is the offline answer.
pub fn detect_mime_by_extension(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "txt" | "log" => "text/plain",
        "md" => "text/markdown",
        "csv" => "text/csv",
        "json" => "application/json",
        "pdf" => "application/pdf",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "html" | "htm" => "text/html",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        "tiff" => "image/tiff",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "flac" => "audio/flac",
        "ogg" => "audio/ogg",
        "m4a" => "audio/mp4",
        "aac" => "audio/aac",
        "wma" => "audio/x-ms-wma",
        "opus" => "audio/opus",
        "mp4" => "video/mp4",
        "zip" => "application/zip",
        _ => "application/octet-stream",
    }
}

/// Ask Tika's /detect/stream for the MIME of a file. Returns None on any
/// failure so callers can fall back to the extension table.
pub async fn detect_mime_via_tika(tika_url: &str, path: &Path) -> Option<String> {
    if tika_url.is_empty() {
        return None;
    }
    let bytes = tokio::fs::read(path).await.ok()?;
    let client = reqwest::Client::new();
    let resp = client
        .put(format!("{}/detect/stream", tika_url))
        .body(bytes)
        .timeout(std::time::Duration::from_secs(10))
        .send()
        .await
        .ok()?;
    if !resp.status().is_success() {
        return None;
    }
    let mime = resp.text().await.ok()?.trim().to_string();
    if mime.is_empty() {
        None
    } else {
        Some(mime)
    }
}

// ============================================================================
// 3. FILE STATE / SOURCE / BLOB REPO
// ============================================================================

#[derive(Debug, Clone)]
pub struct FileState {
    pub path: String,
    pub mtime_ns: i64,
    pub size_bytes: i64,
    pub sha256: String,
}

impl Store {
    pub fn get_file_state(&self, path: &str) -> Result<Option<FileState>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT path, mtime_ns, size_bytes, sha256 FROM file_state WHERE path = ?1",
                params![path],
                |r| {
                    Ok(FileState {
                        path: r.get(0)?,
                        mtime_ns: r.get(1)?,
                        size_bytes: r.get(2)?,
                        sha256: r.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    pub fn upsert_file_state(
        &self,
        path: &str,
        mtime_ns: i64,
        size_bytes: i64,
        sha256: &str,
    ) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO file_state (path, mtime_ns, size_bytes, sha256, last_seen_ts)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(path) DO UPDATE SET
                 mtime_ns     = excluded.mtime_ns,
                 size_bytes   = excluded.size_bytes,
                 sha256       = excluded.sha256,
                 last_seen_ts = excluded.last_seen_ts",
            params![path, mtime_ns, size_bytes, sha256, utcnow_iso()],
        )?;
        Ok(())
    }

    /// Insert-or-return by unique URI.
    pub fn upsert_source(&self, uri: &str, source_type: &str) -> Result<String> {
        let conn = self.conn()?;
        let existing: Option<String> = conn
            .query_row(
                "SELECT source_id FROM source WHERE uri = ?1",
                params![uri],
                |r| r.get(0),
            )
            .optional()?;
        if let Some(sid) = existing {
            return Ok(sid);
        }
        let sid = new_id();
        conn.execute(
            "INSERT INTO source (source_id, source_type, uri) VALUES (?1, ?2, ?3)",
            params![sid, source_type, uri],
        )?;
        Ok(sid)
    }

    /// Insert-or-return by (sha256, path). Size/mime are refreshed on hit.
    pub fn upsert_blob(
        &self,
        sha256: &str,
        path: &str,
        mime: &str,
        size_bytes: i64,
        source_id: &str,
    ) -> Result<String> {
        let conn = self.conn()?;
        let existing: Option<String> = conn
            .query_row(
                "SELECT blob_id FROM blob WHERE sha256 = ?1 AND path = ?2",
                params![sha256, path],
                |r| r.get(0),
            )
            .optional()?;
        if let Some(bid) = existing {
            conn.execute(
                "UPDATE blob SET mime = ?1, size_bytes = ?2, source_id = ?3 WHERE blob_id = ?4",
                params![mime, size_bytes, source_id, bid],
            )?;
            return Ok(bid);
        }
        let bid = new_id();
        conn.execute(
            "INSERT INTO blob (blob_id, sha256, path, mime, size_bytes, source_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![bid, sha256, path, mime, size_bytes, source_id],
        )?;
        Ok(bid)
    }

    pub fn count_blobs(&self) -> Result<i64> {
        let conn = self.conn()?;
        Ok(conn.query_row("SELECT COUNT(*) FROM blob", [], |r| r.get(0))?)
    }
}
