//! Import routes: scan upload, job polling, and job-scoped finding listing.

use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use crate::errors::{ApiResponse, AppError};
use crate::models::finding::{FindingSummary, Severity};
use crate::models::job::{JobSummary, ScanImportJob};
use crate::models::pagination::{ListQuery, Paged};
use crate::parsers::ScannerKind;
use crate::services::jobs::{self, CreateImportJob, JobFilters, JobFindingFilters};
use crate::AppState;

/// Accumulated multipart fields for an upload.
#[derive(Debug, Default)]
struct UploadFields {
    file_data: Option<Vec<u8>>,
    file_name: String,
    system_id: Option<Uuid>,
    scanner: Option<ScannerKind>,
    scanner_version: Option<String>,
    scan_name: Option<String>,
    auto_create_assets: bool,
    auto_map_controls: bool,
    min_severity: Option<Severity>,
}

/// POST /api/v1/imports — accept a scan upload and create a pending job.
///
/// Returns 202 with the job resource before any parsing happens; clients poll
/// the job until it reaches a terminal status.
pub async fn upload(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<ApiResponse<ScanImportJob>>), AppError> {
    let fields = read_upload_fields(multipart).await?;

    let data = fields.file_data.ok_or_else(|| {
        AppError::Validation("Missing 'file' field in multipart request".to_string())
    })?;
    let system_id = fields
        .system_id
        .ok_or_else(|| AppError::Validation("Missing 'system_id' field".to_string()))?;
    let scanner = fields
        .scanner
        .ok_or_else(|| AppError::Validation("Missing 'scanner' field".to_string()))?;

    // Persist the upload so any worker on any host can pick the job up.
    tokio::fs::create_dir_all(&state.config.upload_dir).await?;
    let stored_path = format!("{}/{}.xml", state.config.upload_dir, Uuid::new_v4());
    tokio::fs::write(&stored_path, &data).await?;

    let job = jobs::create(
        &state.db,
        &CreateImportJob {
            system_id,
            scanner_kind: scanner,
            scanner_version: fields.scanner_version,
            scan_name: fields.scan_name,
            file_name: fields.file_name,
            stored_path,
            auto_create_assets: fields.auto_create_assets,
            auto_map_controls: fields.auto_map_controls,
            min_severity: fields.min_severity.unwrap_or(Severity::Info),
        },
    )
    .await?;

    Ok((StatusCode::ACCEPTED, ApiResponse::success(job)))
}

/// Drain the multipart stream into typed fields.
async fn read_upload_fields(mut multipart: Multipart) -> Result<UploadFields, AppError> {
    let mut fields = UploadFields {
        file_name: "unknown".to_string(),
        ..Default::default()
    };

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("Multipart error: {e}")))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "file" => {
                if let Some(fname) = field.file_name() {
                    fields.file_name = fname.to_string();
                }
                fields.file_data = Some(
                    field
                        .bytes()
                        .await
                        .map_err(|e| AppError::Validation(format!("Failed to read file: {e}")))?
                        .to_vec(),
                );
            }
            "system_id" => {
                let text = read_text(field, "system_id").await?;
                fields.system_id = Some(text.parse().map_err(|_| {
                    AppError::Validation(format!("Invalid system_id '{text}'"))
                })?);
            }
            "scanner" => {
                let text = read_text(field, "scanner").await?;
                fields.scanner =
                    Some(serde_json::from_value(serde_json::Value::String(text.clone()))
                        .map_err(|_| {
                            AppError::Validation(format!(
                                "Invalid scanner '{text}'. Supported: nessus, openvas"
                            ))
                        })?);
            }
            "scanner_version" => {
                fields.scanner_version = Some(read_text(field, "scanner_version").await?);
            }
            "scan_name" => {
                fields.scan_name = Some(read_text(field, "scan_name").await?);
            }
            "auto_create_assets" => {
                fields.auto_create_assets = parse_bool(&read_text(field, "auto_create_assets").await?);
            }
            "auto_map_controls" => {
                fields.auto_map_controls = parse_bool(&read_text(field, "auto_map_controls").await?);
            }
            "min_severity" => {
                let text = read_text(field, "min_severity").await?;
                fields.min_severity =
                    Some(serde_json::from_value(serde_json::Value::String(text.clone()))
                        .map_err(|_| {
                            AppError::Validation(format!(
                                "Invalid min_severity '{text}'. Supported: info, low, medium, high, critical"
                            ))
                        })?);
            }
            _ => {}
        }
    }

    Ok(fields)
}

async fn read_text(field: axum::extract::multipart::Field<'_>, name: &str) -> Result<String, AppError> {
    field
        .text()
        .await
        .map_err(|e| AppError::Validation(format!("Failed to read {name}: {e}")))
}

fn parse_bool(text: &str) -> bool {
    matches!(text.trim(), "true" | "1")
}

/// GET /api/v1/imports — list import jobs.
pub async fn list(
    State(state): State<AppState>,
    Query(pagination): Query<ListQuery>,
    Query(filters): Query<JobFilters>,
) -> Result<Json<ApiResponse<Paged<JobSummary>>>, AppError> {
    let result = jobs::list(&state.db, &filters, &pagination).await?;
    Ok(ApiResponse::success(result))
}

/// GET /api/v1/imports/:id — poll one job's status and counts.
pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<ScanImportJob>>, AppError> {
    let job = jobs::get(&state.db, id).await?;
    Ok(ApiResponse::success(job))
}

/// GET /api/v1/imports/:id/findings — list findings surfaced by one job.
pub async fn job_findings(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(pagination): Query<ListQuery>,
    Query(filters): Query<JobFindingFilters>,
) -> Result<Json<ApiResponse<Paged<FindingSummary>>>, AppError> {
    let result = jobs::findings_for_job(&state.db, id, &filters, &pagination).await?;
    Ok(ApiResponse::success(result))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bool_fields_accept_true_and_one() {
        assert!(parse_bool("true"));
        assert!(parse_bool("1"));
        assert!(!parse_bool("false"));
        assert!(!parse_bool("yes"));
        assert!(!parse_bool(""));
    }
}
