//! Background import workers.
//!
//! Each worker polls for a claimable job, runs the full pipeline (parse ->
//! normalize -> provision -> map controls -> reconcile), and drives the job to
//! exactly one terminal status. A heartbeat task extends the claim lease while
//! the pipeline runs so only genuinely dead claims become reclaimable.

use std::time::Duration;

use sqlx::PgPool;
use tokio::task::JoinHandle;

use crate::errors::AppError;
use crate::models::job::{ImportCounts, ScanImportJob};
use crate::parsers::{parser_for, ParseFailure};
use crate::services::{control_map, jobs, normalizer, provisioning, reconciliation};
use crate::AppState;

/// Pipeline failure, either fatal parse errors or storage errors. The Display
/// form becomes the job's error_message.
#[derive(Debug, thiserror::Error)]
enum ImportError {
    #[error(transparent)]
    Parse(#[from] ParseFailure),

    #[error(transparent)]
    Storage(#[from] AppError),
}

/// Spawn the configured number of import workers.
pub fn spawn_workers(state: AppState) -> Vec<JoinHandle<()>> {
    let pid = std::process::id();
    (0..state.config.worker_count)
        .map(|i| {
            let state = state.clone();
            let worker_id = format!("fismatic-{pid}-w{i}");
            tokio::spawn(async move {
                worker_loop(state, worker_id).await;
            })
        })
        .collect()
}

/// Claim-and-run loop for one worker.
async fn worker_loop(state: AppState, worker_id: String) {
    let poll = Duration::from_secs(state.config.worker_poll_secs);
    tracing::info!(worker = %worker_id, "Import worker started");

    loop {
        match jobs::claim_next(&state.db, &worker_id, state.config.job_lease_secs).await {
            Ok(Some(job)) => {
                run_claimed_job(&state, &worker_id, job).await;
            }
            Ok(None) => {
                tokio::time::sleep(poll).await;
            }
            Err(e) => {
                tracing::warn!(worker = %worker_id, error = %e, "Claim attempt failed");
                tokio::time::sleep(poll).await;
            }
        }
    }
}

/// Execute one claimed job under a heartbeat, ending in a terminal transition.
async fn run_claimed_job(state: &AppState, worker_id: &str, job: ScanImportJob) {
    tracing::info!(worker = %worker_id, job_id = %job.id, system_id = %job.system_id, "Processing import job");

    let heartbeat = spawn_heartbeat(
        state.db.clone(),
        job.id,
        worker_id.to_string(),
        state.config.job_lease_secs,
    );

    let outcome = execute_job(&state.db, &job).await;
    heartbeat.abort();

    let terminal = match outcome {
        Ok(counts) => {
            tracing::info!(
                job_id = %job.id,
                new = counts.new_findings,
                updated = counts.updated_findings,
                unchanged = counts.unchanged_findings,
                "Import job completed"
            );
            jobs::complete(&state.db, job.id, &counts).await
        }
        Err(e) => {
            tracing::warn!(job_id = %job.id, error = %e, "Import job failed");
            jobs::fail(&state.db, job.id, &e.to_string()).await
        }
    };

    if let Err(e) = terminal {
        // Lease expired mid-run and another worker took over; nothing to do.
        tracing::warn!(job_id = %job.id, error = %e, "Terminal transition rejected");
    }
}

/// Periodically extend the claim lease while the pipeline runs.
fn spawn_heartbeat(
    pool: PgPool,
    job_id: uuid::Uuid,
    worker_id: String,
    lease_secs: i64,
) -> JoinHandle<()> {
    let period = Duration::from_secs((lease_secs as u64 / 3).max(1));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.tick().await;
        loop {
            interval.tick().await;
            if let Err(e) = jobs::heartbeat(&pool, job_id, &worker_id, lease_secs).await {
                tracing::warn!(job_id = %job_id, error = %e, "Heartbeat failed");
            }
        }
    })
}

/// Run the import pipeline for one job and assemble its aggregate counts.
async fn execute_job(pool: &PgPool, job: &ScanImportJob) -> Result<ImportCounts, ImportError> {
    let data = tokio::fs::read(&job.stored_path)
        .await
        .map_err(|e| AppError::Internal(format!("Cannot read stored upload: {e}")))?;

    let parser = parser_for(job.scanner_kind);
    let outcome = parser.parse(&data)?;

    for err in &outcome.errors {
        tracing::warn!(
            job_id = %job.id,
            host = %err.host,
            record = err.record_index,
            "Skipped unparseable record: {}",
            err.message
        );
    }

    let normalized = normalizer::normalize(outcome.records, job.min_severity);

    let asset_ids = provisioning::ensure_assets(
        pool,
        job.system_id,
        job.id,
        &normalized.findings,
        job.auto_create_assets,
    )
    .await?;

    let control_ids = if job.auto_map_controls {
        let keys = control_map::lookup_keys(&normalized.findings);
        control_map::controls_for(pool, &keys).await?
    } else {
        Default::default()
    };

    let counts = reconciliation::reconcile(
        pool,
        job.system_id,
        job.id,
        &normalized.findings,
        &asset_ids,
        &control_ids,
    )
    .await?;

    Ok(ImportCounts {
        hosts_scanned: normalized.hosts_scanned as i32,
        findings_total: normalized.findings.len() as i32,
        findings_by_severity: normalized.findings_by_severity,
        new_findings: counts.new_findings,
        updated_findings: counts.updated_findings,
        unchanged_findings: counts.unchanged_findings,
        duplicate_findings: normalized.duplicates as i32,
        resolved_findings: counts.resolved_reobserved,
        parse_errors: serde_json::to_value(&outcome.errors).unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn import_error_keeps_parse_failure_message() {
        let err = ImportError::from(ParseFailure::UnsupportedFormat("qualys".to_string()));
        assert_eq!(err.to_string(), "unsupported scanner format: qualys");
    }

    #[test]
    fn import_error_keeps_storage_message() {
        let err = ImportError::from(AppError::Internal("disk full".to_string()));
        assert_eq!(err.to_string(), "Internal error: disk full");
    }
}
