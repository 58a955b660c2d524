// src/watcher.rs
//
// =============================================================================
// MINDLOOM: FILE WATCHER (v 0.1 )
// =============================================================================
//
// Polled scanner over the configured watch roots. No inotify: the roots
// may live on network mounts, so we stat everything each tick and compare
// (mtime_ns, size) against file_state. Watched directories are read-only
// inputs — the watcher never writes back.

use crate::capture::{detect_mime_by_extension, detect_mime_via_tika, sha256_file};
use crate::config::Config;
use crate::db::Store;
use crate::queue::JOB_INGEST_BLOB;
use anyhow::Result;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Directory names that are never descended into.
const IGNORED_DIRS: &[&str] = &[".git", ".svn", "node_modules", "target", "__pycache__"];

fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

fn format_size(n: u64) -> String {
    let mut size = n as f64;
    for unit in ["B", "KB", "MB", "GB"] {
        if size < 1024.0 {
            return if unit == "B" {
                format!("{} {}", n, unit)
            } else {
                format!("{:.1} {}", size, unit)
            };
        }
        size /= 1024.0;
    }
    format!("{:.1} TB", size)
}

pub struct Watcher {
    store: Store,
    config: Config,
}

impl Watcher {
    pub fn new(store: Store, config: Config) -> Self {
        Self { store, config }
    }

    /// Scan every root every POLL_INTERVAL seconds until shutdown.
    pub async fn run(self, shutdown: Arc<AtomicBool>) {
        log::info!(
            "Watcher started — roots={:?}, interval={}s",
            self.config.watch_roots,
            self.config.poll_interval_secs
        );
        let mut scan_count: u64 = 0;
        while !shutdown.load(Ordering::SeqCst) {
            scan_count += 1;
            let store = self.store.clone();
            let config = self.config.clone();
            let n = scan_count;
            let scan = tokio::task::spawn_blocking(move || scan_once(&store, &config, n)).await;
            match scan {
                Ok(Err(e)) => log::error!("Watcher scan error: {}", e),
                Err(e) => log::error!("Watcher scan panicked: {}", e),
                _ => {}
            }
            tokio::time::sleep(Duration::from_secs_f64(self.config.poll_interval_secs)).await;
        }
        log::info!("Watcher stopped.");
    }
}

/// One full pass over all roots. Per-file errors are logged and the scan
/// continues.
pub fn scan_once(store: &Store, config: &Config, scan_number: u64) -> Result<()> {
    let mut files_seen = 0usize;
    let mut files_changed = 0usize;

    for root in &config.watch_roots {
        if !root.is_dir() {
            log::warn!("Watch root does not exist: {:?}", root);
            continue;
        }
        let mut stack: Vec<PathBuf> = vec![root.clone()];
        while let Some(dir) = stack.pop() {
            let entries = match std::fs::read_dir(&dir) {
                Ok(e) => e,
                Err(e) => {
                    log::warn!("Cannot read dir {:?}: {}", dir, e);
                    continue;
                }
            };
            for entry in entries.flatten() {
                let name = entry.file_name().to_string_lossy().into_owned();
                let path = entry.path();
                let Ok(file_type) = entry.file_type() else { continue };

                if file_type.is_dir() {
                    if !is_hidden(&name) && !IGNORED_DIRS.contains(&name.as_str()) {
                        stack.push(path);
                    }
                    continue;
                }
                if !file_type.is_file() || is_hidden(&name) {
                    continue;
                }

                files_seen += 1;
                match process_file(store, config, &path) {
                    Ok(changed) => {
                        if changed {
                            files_changed += 1;
                        }
                    }
                    Err(e) => log::error!("Error processing {:?}: {}", path, e),
                }
            }
        }
    }

    if files_changed > 0 {
        log::info!(
            "[SCAN #{}] Scanned {} files — {} new/modified",
            scan_number,
            files_seen,
            files_changed
        );
    }
    Ok(())
}

/// Check one file against file_state; on change, hash it, upsert the
/// capture rows, and enqueue an ingest job. Returns true when the file was
/// new or modified.
fn process_file(store: &Store, config: &Config, path: &Path) -> Result<bool> {
    let meta = std::fs::metadata(path)?;
    let path_str = path.to_string_lossy().into_owned();
    let mtime_ns = meta
        .modified()?
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0);
    let size_bytes = meta.len() as i64;

    // ── Step 1: dedup against file_state ──────────────────────────────────
    if let Some(existing) = store.get_file_state(&path_str)? {
        if existing.mtime_ns == mtime_ns && existing.size_bytes == size_bytes {
            return Ok(false); // unchanged
        }
        log::info!(
            "[DETECT] MODIFIED file: {} ({})",
            path_str,
            format_size(meta.len())
        );
    } else {
        log::info!("[DETECT] NEW file: {} ({})", path_str, format_size(meta.len()));
    }

    // ── Step 2: streaming SHA-256 ─────────────────────────────────────────
    let sha = sha256_file(path)?;
    log::info!("[HASH]   sha256={}…{}", &sha[..12], &sha[sha.len() - 8..]);

    // ── Step 3: upsert file_state ─────────────────────────────────────────
    store.upsert_file_state(&path_str, mtime_ns, size_bytes, &sha)?;

    // ── Step 4: upsert source ─────────────────────────────────────────────
    let source_id = store.upsert_source(&path_str, "filesystem")?;

    // ── Step 5: detect MIME ───────────────────────────────────────────────
    let mime = if config.tika_url.is_empty() {
        detect_mime_by_extension(path).to_string()
    } else {
        // The scan runs on a blocking thread; hop back onto the runtime for
        // the HTTP probe and fall back to the extension table on failure.
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle
                .block_on(detect_mime_via_tika(&config.tika_url, path))
                .unwrap_or_else(|| detect_mime_by_extension(path).to_string()),
            Err(_) => detect_mime_by_extension(path).to_string(),
        }
    };
    log::info!("[MIME]   {} → {}", path_str, mime);

    // ── Step 6: upsert blob ───────────────────────────────────────────────
    let blob_id = store.upsert_blob(&sha, &path_str, &mime, size_bytes, &source_id)?;

    // ── Step 7: enqueue ingest job ────────────────────────────────────────
    let job_id = store.enqueue_job(
        JOB_INGEST_BLOB,
        &json!({
            "blob_id": blob_id,
            "source_id": source_id,
            "path": path_str,
            "sha256": sha,
            "mime": mime,
            "size_bytes": size_bytes,
        }),
    )?;
    log::info!(
        "[JOB]    Enqueued ingest_blob job={} source={} blob={}",
        &job_id[..12],
        &source_id[..8],
        &blob_id[..8]
    );

    Ok(true)
}
