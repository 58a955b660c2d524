// src/config.rs
//
// =============================================================================
// MINDLOOM: RUNTIME CONFIGURATION (v 0.1 )
// =============================================================================
//
// All knobs come from the environment. Collaborator URLs left empty mean
// "not configured" and the corresponding tool falls back to its
// deterministic offline path.

use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Config {
    /// Root data directory (DB file, model caches).
    pub data_dir: PathBuf,
    /// SQLite database file path.
    pub db_path: PathBuf,
    /// Qdrant base URL. Empty = vectors are not persisted (stub refs).
    pub qdrant_url: String,
    /// Tika base URL. Empty = direct file reads, extension-based mime.
    pub tika_url: String,
    /// Local model cache directory.
    pub models_dir: PathBuf,
    /// Directories scanned by the watcher.
    pub watch_roots: Vec<PathBuf>,
    /// Watcher poll interval in seconds.
    pub poll_interval_secs: f64,
    /// Maximum file size before the oversize placeholder policy kicks in.
    pub max_file_bytes: u64,
    /// "local" runs the external whisper binary; "stub" never touches audio.
    pub whisper_mode: String,
    /// "local" or "stub" for the vision encoder.
    pub openclip_mode: String,
    /// Ollama base URL. Empty = stub weaver/verifier/summarizer paths.
    pub ollama_url: String,
    /// Ollama model name used for all generate calls.
    pub ollama_model: String,
    /// Shared secret required from external capture callers.
    pub capture_api_key: String,
}

/// Extensions whose content is read directly instead of going through Tika.
pub const TEXT_EXTENSIONS: &[&str] = &["txt", "md", "json", "csv", "log"];

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

impl Config {
    pub fn from_env() -> Self {
        let data_dir = PathBuf::from(env_or("DATA_DIR", "./data"));
        let db_path = env::var("DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("mindloom.db"));

        let watch_roots = env_or("WATCH_ROOTS", "")
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .collect();

        let max_file_mb: f64 = env_or("MAX_FILE_MB", "20").parse().unwrap_or(20.0);

        Self {
            db_path,
            qdrant_url: env_or("QDRANT_URL", ""),
            tika_url: env_or("TIKA_URL", ""),
            models_dir: env::var("MODELS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| data_dir.join("models")),
            watch_roots,
            poll_interval_secs: env_or("POLL_INTERVAL", "2").parse().unwrap_or(2.0),
            max_file_bytes: (max_file_mb * 1024.0 * 1024.0) as u64,
            whisper_mode: env_or("WHISPER_MODE", "stub"),
            openclip_mode: env_or("OPENCLIP_MODE", "stub"),
            ollama_url: env_or("OLLAMA_URL", ""),
            ollama_model: env_or("OLLAMA_MODEL", "phi3:mini"),
            capture_api_key: env_or("CAPTURE_API_KEY", ""),
            data_dir,
        }
    }

    /// A config with every collaborator unset. Used by tests and one-shot
    /// CLI runs against a throwaway database.
    pub fn offline(db_path: impl Into<PathBuf>) -> Self {
        let db_path = db_path.into();
        let data_dir = db_path
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));
        Self {
            models_dir: data_dir.join("models"),
            data_dir,
            db_path,
            qdrant_url: String::new(),
            tika_url: String::new(),
            watch_roots: Vec::new(),
            poll_interval_secs: 2.0,
            max_file_bytes: 20 * 1024 * 1024,
            whisper_mode: "stub".into(),
            openclip_mode: "stub".into(),
            ollama_url: String::new(),
            ollama_model: "phi3:mini".into(),
            capture_api_key: String::new(),
        }
    }
}
