// src/main.rs
//
// =============================================================================
// MINDLOOM: COMMANDER & ENTRY POINT (v 0.1 )
// =============================================================================
//
// The wiring center of the entire architecture.
//
// Modes:
// 1. SERVE:   Migrate the DB, register tools, run watcher + worker loops.
// 2. INGEST:  One-shot pipeline run for a single file.
// 3. CHAT:    One grounded question against the memory.
// 4. COMPACT: Merge duplicate entity nodes.
// 5. TOOLS:   List the registered tool surface.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::signal;

use mindloom::capture::{detect_mime_by_extension, sha256_file};
use mindloom::config::Config;
use mindloom::db::Store;
use mindloom::graph::compact;
use mindloom::orchestrator::Orchestrator;
use mindloom::registry;
use mindloom::tools::{build_registry, ToolContext};
use mindloom::watcher::Watcher;
use mindloom::worker::Worker;

// ============================================================================
// 1. CLI DEFINITION
// ============================================================================

#[derive(Parser)]
#[command(name = "mindloom", version, about = "Personal knowledge engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full service: watcher + worker until Ctrl-C.
    Serve,

    /// Ingest a single file through the pipeline and print the result.
    Ingest {
        /// Path to the file.
        #[arg(long)]
        path: String,
    },

    /// Ask one question against the memory.
    Chat {
        /// The question text.
        #[arg(long)]
        message: String,

        /// Number of evidence cards to keep.
        #[arg(long, default_value_t = 8)]
        top_k: usize,

        /// Disable graph expansion.
        #[arg(long)]
        no_graph: bool,

        /// Graph expansion hops (0-2).
        #[arg(long, default_value_t = 1)]
        hops: usize,
    },

    /// Merge duplicate entity nodes in the knowledge graph.
    Compact {
        /// Preview without writing.
        #[arg(long)]
        dry_run: bool,
    },

    /// List registered tools.
    Tools,
}

// ============================================================================
// 2. ENTRY POINT
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = Config::from_env();
    let store = Store::open(&config.db_path).context("DB init")?;

    let ctx = ToolContext::new(store.clone(), config.clone());
    let reg = registry::install_global(Arc::new(build_registry(ctx)));
    let orchestrator = Orchestrator::new(store.clone(), config.clone(), reg.clone());

    match cli.command {
        Commands::Serve => run_service(store, config, orchestrator).await,
        Commands::Ingest { path } => run_ingest(store, orchestrator, path).await,
        Commands::Chat {
            message,
            top_k,
            no_graph,
            hops,
        } => run_chat(orchestrator, message, top_k, !no_graph, hops).await,
        Commands::Compact { dry_run } => run_compact(store, dry_run),
        Commands::Tools => {
            for tool in reg.list() {
                println!("{:<14} {:<8} {}", tool.name, tool.version, tool.description);
            }
            Ok(())
        }
    }
}

// ============================================================================
// 3. RUNTIME: SERVICE (Watcher + Worker)
// ============================================================================

async fn run_service(store: Store, config: Config, orchestrator: Orchestrator) -> Result<()> {
    if config.watch_roots.is_empty() {
        return Err(anyhow!(
            "No watch roots configured. Set WATCH_ROOTS=/path/a,/path/b"
        ));
    }

    log::info!(
        "🚀 Booting mindloom | db={:?} | roots={:?} | poll={}s",
        config.db_path,
        config.watch_roots,
        config.poll_interval_secs
    );

    let shutdown = Arc::new(AtomicBool::new(false));

    // Signal handling: one Ctrl-C stops both loops.
    let sig = shutdown.clone();
    tokio::spawn(async move {
        signal::ctrl_c().await.ok();
        log::warn!("🛑 Interrupt received. Stopping...");
        sig.store(true, Ordering::SeqCst);
    });

    let watcher = Watcher::new(store.clone(), config.clone());
    let worker = Worker::new(orchestrator);

    let watcher_handle = tokio::spawn(watcher.run(shutdown.clone()));
    let worker_handle = tokio::spawn(worker.run(shutdown.clone()));

    let _ = tokio::join!(watcher_handle, worker_handle);

    log::info!("👋 Shutdown complete.");
    Ok(())
}

// ============================================================================
// 4. ONE-SHOT MODES
// ============================================================================

async fn run_ingest(store: Store, orchestrator: Orchestrator, path: String) -> Result<()> {
    let abs = std::fs::canonicalize(&path).with_context(|| format!("File not found: {}", path))?;
    let path_str = abs.to_string_lossy().into_owned();
    let meta = std::fs::metadata(&abs)?;

    let sha = sha256_file(&abs)?;
    let mime = detect_mime_by_extension(Path::new(&path_str)).to_string();
    let source_id = store.upsert_source(&path_str, "filesystem")?;
    let blob_id = store.upsert_blob(&sha, &path_str, &mime, meta.len() as i64, &source_id)?;

    let result = orchestrator
        .ingest_blob(&blob_id, &source_id, &path_str, &mime, meta.len(), None)
        .await?;

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

async fn run_chat(
    orchestrator: Orchestrator,
    message: String,
    top_k: usize,
    use_graph: bool,
    hops: usize,
) -> Result<()> {
    let result = orchestrator.chat(&message, top_k, use_graph, hops).await?;

    println!("verdict: {}", result.verdict);
    println!("\n{}\n", result.answer);
    if !result.citations.is_empty() {
        println!("citations:");
        for c in &result.citations {
            println!("  [{}] {}", &c.memory_id[..12.min(c.memory_id.len())], c.quote);
        }
    }
    println!("trace: {}", result.trace_id);
    Ok(())
}

fn run_compact(store: Store, dry_run: bool) -> Result<()> {
    let stats = compact::compact(&store, dry_run)?;
    println!(
        "{} duplicate groups, {} nodes {}, {} edges repointed",
        stats.groups_found,
        stats.nodes_deleted,
        if dry_run { "would be deleted" } else { "deleted" },
        stats.edges_repointed
    );
    Ok(())
}
