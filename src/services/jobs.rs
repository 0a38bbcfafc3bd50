//! Import job lifecycle: creation, exclusive claiming, and terminal transitions.
//!
//! Status only ever moves along `pending -> processing -> {completed|failed}`.
//! Claiming is an atomic conditional transition (`FOR UPDATE SKIP LOCKED`) so
//! exactly one worker owns a job; claims carry a lease that a live worker
//! keeps extending, and an expired lease makes the job reclaimable instead of
//! stuck in `processing` after a crash.

use sqlx::PgPool;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::finding::{Disposition, FindingSummary, Severity};
use crate::models::job::{ImportCounts, JobStatus, JobSummary, ScanImportJob};
use crate::models::pagination::{ListQuery, Paged};
use crate::parsers::ScannerKind;

/// Column list for `scan_import_jobs` queries.
const JOB_COLUMNS: &str = "\
    id, system_id, scanner_kind, scanner_version, scan_name, file_name, stored_path, \
    status, auto_create_assets, auto_map_controls, min_severity, \
    hosts_scanned, findings_total, findings_by_severity, \
    new_findings, updated_findings, unchanged_findings, duplicate_findings, resolved_findings, \
    parse_errors, error_message, claimed_by, lease_expires_at, \
    created_at, started_at, completed_at";

/// Input for creating a pending import job.
#[derive(Debug, Clone)]
pub struct CreateImportJob {
    pub system_id: Uuid,
    pub scanner_kind: ScannerKind,
    pub scanner_version: Option<String>,
    pub scan_name: Option<String>,
    pub file_name: String,
    pub stored_path: String,
    pub auto_create_assets: bool,
    pub auto_map_controls: bool,
    pub min_severity: Severity,
}

/// Filters for the job listing endpoint.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct JobFilters {
    pub system_id: Option<Uuid>,
    pub status: Option<JobStatus>,
}

/// Filters for the job-scoped finding listing.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct JobFindingFilters {
    pub min_severity: Option<Severity>,
    pub disposition: Option<Disposition>,
}

/// Validate the target system and insert a `pending` job.
///
/// Returns before any parsing happens; the background worker picks the job up.
pub async fn create(pool: &PgPool, input: &CreateImportJob) -> Result<ScanImportJob, AppError> {
    let system_exists = sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS(SELECT 1 FROM systems WHERE id = $1)",
    )
    .bind(input.system_id)
    .fetch_one(pool)
    .await?;

    if !system_exists {
        return Err(AppError::NotFound(format!(
            "System {} not found",
            input.system_id
        )));
    }

    let query = format!(
        "INSERT INTO scan_import_jobs ( \
             system_id, scanner_kind, scanner_version, scan_name, file_name, stored_path, \
             auto_create_assets, auto_map_controls, min_severity \
         ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
         RETURNING {JOB_COLUMNS}"
    );

    let job = sqlx::query_as::<_, ScanImportJob>(&query)
        .bind(input.system_id)
        .bind(input.scanner_kind)
        .bind(&input.scanner_version)
        .bind(&input.scan_name)
        .bind(&input.file_name)
        .bind(&input.stored_path)
        .bind(input.auto_create_assets)
        .bind(input.auto_map_controls)
        .bind(input.min_severity)
        .fetch_one(pool)
        .await?;

    tracing::info!(job_id = %job.id, system_id = %job.system_id, scanner = %job.scanner_kind, "Created import job");
    Ok(job)
}

/// Get a job by id.
pub async fn get(pool: &PgPool, id: Uuid) -> Result<ScanImportJob, AppError> {
    let query = format!("SELECT {JOB_COLUMNS} FROM scan_import_jobs WHERE id = $1");
    sqlx::query_as::<_, ScanImportJob>(&query)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound("Import job not found".to_string()))
}

/// Atomically claim the next runnable job for a worker.
///
/// Runnable means `pending`, or `processing` with an expired lease (a prior
/// claimant stopped heartbeating). `FOR UPDATE SKIP LOCKED` prevents
/// double-dispatch across concurrent workers; terminal jobs are never
/// eligible, so a claim after completion is a no-op by construction.
pub async fn claim_next(
    pool: &PgPool,
    worker_id: &str,
    lease_secs: i64,
) -> Result<Option<ScanImportJob>, AppError> {
    let query = format!(
        "UPDATE scan_import_jobs \
         SET status = 'processing', claimed_by = $1, \
             lease_expires_at = NOW() + make_interval(secs => $2), \
             started_at = COALESCE(started_at, NOW()) \
         WHERE id = ( \
             SELECT id FROM scan_import_jobs \
             WHERE status = 'pending' \
                OR (status = 'processing' AND lease_expires_at < NOW()) \
             ORDER BY created_at ASC \
             LIMIT 1 \
             FOR UPDATE SKIP LOCKED \
         ) \
         RETURNING {JOB_COLUMNS}"
    );

    let job = sqlx::query_as::<_, ScanImportJob>(&query)
        .bind(worker_id)
        .bind(lease_secs as f64)
        .fetch_optional(pool)
        .await?;

    Ok(job)
}

/// Extend the lease on a claimed job. No-ops if another worker took it over.
pub async fn heartbeat(
    pool: &PgPool,
    job_id: Uuid,
    worker_id: &str,
    lease_secs: i64,
) -> Result<(), AppError> {
    sqlx::query(
        "UPDATE scan_import_jobs \
         SET lease_expires_at = NOW() + make_interval(secs => $3) \
         WHERE id = $1 AND claimed_by = $2 AND status = 'processing'",
    )
    .bind(job_id)
    .bind(worker_id)
    .bind(lease_secs as f64)
    .execute(pool)
    .await?;
    Ok(())
}

/// Terminal transition to `completed`, writing the aggregate counts exactly once.
pub async fn complete(pool: &PgPool, job_id: Uuid, counts: &ImportCounts) -> Result<(), AppError> {
    let result = sqlx::query(
        "UPDATE scan_import_jobs \
         SET status = 'completed', \
             hosts_scanned = $2, findings_total = $3, findings_by_severity = $4, \
             new_findings = $5, updated_findings = $6, unchanged_findings = $7, \
             duplicate_findings = $8, resolved_findings = $9, parse_errors = $10, \
             lease_expires_at = NULL, completed_at = NOW() \
         WHERE id = $1 AND status = 'processing'",
    )
    .bind(job_id)
    .bind(counts.hosts_scanned)
    .bind(counts.findings_total)
    .bind(&counts.findings_by_severity)
    .bind(counts.new_findings)
    .bind(counts.updated_findings)
    .bind(counts.unchanged_findings)
    .bind(counts.duplicate_findings)
    .bind(counts.resolved_findings)
    .bind(&counts.parse_errors)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::InvalidTransition(format!(
            "Job {job_id} is not in processing"
        )));
    }
    Ok(())
}

/// Terminal transition to `failed`. Always records the error message.
pub async fn fail(pool: &PgPool, job_id: Uuid, error_message: &str) -> Result<(), AppError> {
    let result = sqlx::query(
        "UPDATE scan_import_jobs \
         SET status = 'failed', error_message = $2, \
             lease_expires_at = NULL, completed_at = NOW() \
         WHERE id = $1 AND status = 'processing'",
    )
    .bind(job_id)
    .bind(error_message)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::InvalidTransition(format!(
            "Job {job_id} is not in processing"
        )));
    }
    Ok(())
}

/// List jobs with optional system/status filters, newest first.
pub async fn list(
    pool: &PgPool,
    filters: &JobFilters,
    query: &ListQuery,
) -> Result<Paged<JobSummary>, AppError> {
    let mut conditions: Vec<String> = Vec::new();
    let mut bind_idx: u32 = 1;

    if filters.system_id.is_some() {
        conditions.push(format!("system_id = ${bind_idx}"));
        bind_idx += 1;
    }
    if filters.status.is_some() {
        conditions.push(format!("status = ${bind_idx}"));
        bind_idx += 1;
    }

    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    };

    let count_sql = format!("SELECT COUNT(*) FROM scan_import_jobs {where_clause}");
    let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
    if let Some(system_id) = filters.system_id {
        count_query = count_query.bind(system_id);
    }
    if let Some(status) = filters.status {
        count_query = count_query.bind(status);
    }
    let total = count_query.fetch_one(pool).await?;

    let list_sql = format!(
        "SELECT id, system_id, scanner_kind, scan_name, file_name, status, \
                findings_total, new_findings, updated_findings, error_message, \
                created_at, completed_at \
         FROM scan_import_jobs \
         {where_clause} \
         ORDER BY created_at DESC \
         LIMIT ${bind_idx} OFFSET ${}",
        bind_idx + 1,
    );

    let mut list_query = sqlx::query_as::<_, JobSummary>(&list_sql);
    if let Some(system_id) = filters.system_id {
        list_query = list_query.bind(system_id);
    }
    if let Some(status) = filters.status {
        list_query = list_query.bind(status);
    }
    let jobs = list_query
        .bind(query.limit())
        .bind(query.offset())
        .fetch_all(pool)
        .await?;

    Ok(Paged::new(jobs, total, query))
}

/// List the findings surfaced by one job (first- or last-seen there).
pub async fn findings_for_job(
    pool: &PgPool,
    job_id: Uuid,
    filters: &JobFindingFilters,
    query: &ListQuery,
) -> Result<Paged<FindingSummary>, AppError> {
    // 404 for unknown jobs rather than an empty page.
    let _ = get(pool, job_id).await?;

    let mut conditions =
        vec!["(last_seen_job_id = $1 OR first_seen_job_id = $1)".to_string()];
    let mut bind_idx: u32 = 2;

    if filters.min_severity.is_some() {
        conditions.push(format!("severity >= ${bind_idx}"));
        bind_idx += 1;
    }
    if filters.disposition.is_some() {
        conditions.push(format!("disposition = ${bind_idx}"));
        bind_idx += 1;
    }

    let where_clause = format!("WHERE {}", conditions.join(" AND "));

    let count_sql = format!("SELECT COUNT(*) FROM findings {where_clause}");
    let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql).bind(job_id);
    if let Some(min_severity) = filters.min_severity {
        count_query = count_query.bind(min_severity);
    }
    if let Some(disposition) = filters.disposition {
        count_query = count_query.bind(disposition);
    }
    let total = count_query.fetch_one(pool).await?;

    let list_sql = format!(
        "SELECT id, system_id, asset_id, identity_key, signature, title, severity, \
                cve_ids, control_ids, disposition, first_seen_job_id, last_seen_job_id, updated_at \
         FROM findings \
         {where_clause} \
         ORDER BY severity DESC, title ASC \
         LIMIT ${bind_idx} OFFSET ${}",
        bind_idx + 1,
    );

    let mut list_query = sqlx::query_as::<_, FindingSummary>(&list_sql).bind(job_id);
    if let Some(min_severity) = filters.min_severity {
        list_query = list_query.bind(min_severity);
    }
    if let Some(disposition) = filters.disposition {
        list_query = list_query.bind(disposition);
    }
    let findings = list_query
        .bind(query.limit())
        .bind(query.offset())
        .fetch_all(pool)
        .await?;

    Ok(Paged::new(findings, total, query))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_filters_deserialize_from_query() {
        let filters: JobFilters =
            serde_json::from_str(r#"{"status":"completed"}"#).unwrap();
        assert_eq!(filters.status, Some(JobStatus::Completed));
        assert!(filters.system_id.is_none());
    }

    #[test]
    fn finding_filters_deserialize_from_query() {
        let filters: JobFindingFilters =
            serde_json::from_str(r#"{"min_severity":"high","disposition":"open"}"#).unwrap();
        assert_eq!(filters.min_severity, Some(Severity::High));
        assert_eq!(filters.disposition, Some(Disposition::Open));
    }
}
