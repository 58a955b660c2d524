// src/worker.rs
//
// =============================================================================
// MINDLOOM: JOB WORKER (v 0.1 )
// =============================================================================
//
// The loop between the queue and the orchestrator: claim the oldest queued
// job, dispatch by type, log the per-step outcome with its trace id, and
// close the job. Unknown job types complete with an error instead of
// wedging the queue.

use crate::orchestrator::Orchestrator;
use crate::queue::{Job, JOB_INGEST_BLOB, JOB_INGEST_CAPTURE};
use anyhow::{anyhow, Result};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

const IDLE_SLEEP: Duration = Duration::from_millis(500);

pub struct Worker {
    orchestrator: Orchestrator,
}

impl Worker {
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self { orchestrator }
    }

    pub async fn run(self, shutdown: Arc<AtomicBool>) {
        log::info!("Job worker started");
        let mut jobs_processed: u64 = 0;

        while !shutdown.load(Ordering::SeqCst) {
            let store = self.orchestrator.store().clone();
            let claimed = tokio::task::spawn_blocking(move || store.claim_job()).await;

            let job = match claimed {
                Ok(Ok(Some(job))) => job,
                Ok(Ok(None)) => {
                    tokio::time::sleep(IDLE_SLEEP).await;
                    continue;
                }
                Ok(Err(e)) => {
                    log::error!("Worker claim error: {}", e);
                    tokio::time::sleep(IDLE_SLEEP).await;
                    continue;
                }
                Err(e) => {
                    log::error!("Worker claim panicked: {}", e);
                    tokio::time::sleep(IDLE_SLEEP).await;
                    continue;
                }
            };

            jobs_processed += 1;
            log::info!(
                "[CLAIM]  Job #{} — id={} type={} attempt={}",
                jobs_processed,
                &job.job_id[..12],
                job.job_type,
                job.attempts
            );

            let job_id = job.job_id.clone();
            let outcome = self.handle_job(&job).await;
            let store = self.orchestrator.store();
            match outcome {
                Ok(()) => {
                    if let Err(e) = store.complete_job(&job_id, None) {
                        log::error!("[FAIL]   Could not close job {}: {}", &job_id[..12], e);
                    } else {
                        log::info!("[OK]     Job {} completed", &job_id[..12]);
                    }
                }
                Err(e) => {
                    log::error!("[FAIL]   Job {} failed: {}", &job_id[..12], e);
                    if let Err(e2) = store.complete_job(&job_id, Some(&e.to_string())) {
                        log::error!("[FAIL]   Could not record failure: {}", e2);
                    }
                }
            }
        }
        log::info!("Job worker stopped.");
    }

    pub async fn handle_job(&self, job: &Job) -> Result<()> {
        match job.job_type.as_str() {
            JOB_INGEST_BLOB => {
                let p = &job.payload;
                let blob_id = required_str(p, "blob_id")?;
                let source_id = required_str(p, "source_id")?;
                let path = required_str(p, "path")?;
                let mime = p
                    .get("mime")
                    .and_then(Value::as_str)
                    .unwrap_or("application/octet-stream");
                let size_bytes = p.get("size_bytes").and_then(Value::as_u64).unwrap_or(0);

                let result = self
                    .orchestrator
                    .ingest_blob(blob_id, source_id, path, mime, size_bytes, None)
                    .await?;

                log::info!(
                    "[INGEST] trace={} pipeline={} status={} card={:?} steps={}",
                    &result.trace_id[..12],
                    result.pipeline,
                    result.status,
                    result.memory_id.as_deref().map(|m| &m[..12.min(m.len())]),
                    result.steps.len()
                );
                for sr in &result.steps {
                    log::info!(
                        "[STEP]   trace={} {} -> {} ({}ms)",
                        &result.trace_id[..12],
                        sr.tool_name,
                        sr.status,
                        sr.elapsed_ms
                    );
                }
                if result.status == "error" {
                    return Err(anyhow!("ingest pipeline failed"));
                }
                Ok(())
            }
            JOB_INGEST_CAPTURE => {
                let result = self.orchestrator.ingest_capture(&job.payload).await?;
                log::info!(
                    "[INGEST] trace={} pipeline={} status={}",
                    &result.trace_id[..12],
                    result.pipeline,
                    result.status
                );
                Ok(())
            }
            other => Err(anyhow!("Unknown job type: {}", other)),
        }
    }
}

fn required_str<'a>(payload: &'a Value, key: &str) -> Result<&'a str> {
    payload
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("job payload missing '{}'", key))
}
