//! Scan import job model and its explicit status state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::models::finding::Severity;
use crate::parsers::ScannerKind;

/// Import job lifecycle status.
///
/// Monotonic: `pending -> processing -> {completed | failed}`. Terminal states
/// have no outgoing transitions; every mutation goes through the transition
/// functions in `services::jobs`, never through ad-hoc field writes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "import_job_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether a transition along the status graph is valid.
    pub fn can_transition_to(&self, to: &JobStatus) -> bool {
        matches!(
            (self, to),
            (JobStatus::Pending, JobStatus::Processing)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Failed)
        )
    }
}

/// One scan import job per uploaded file.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ScanImportJob {
    pub id: Uuid,
    pub system_id: Uuid,
    pub scanner_kind: ScannerKind,
    pub scanner_version: Option<String>,
    pub scan_name: Option<String>,
    pub file_name: String,
    /// Path of the stored upload the worker reads back.
    pub stored_path: String,
    pub status: JobStatus,
    pub auto_create_assets: bool,
    pub auto_map_controls: bool,
    pub min_severity: Severity,
    pub hosts_scanned: i32,
    pub findings_total: i32,
    pub findings_by_severity: serde_json::Value,
    pub new_findings: i32,
    pub updated_findings: i32,
    pub unchanged_findings: i32,
    pub duplicate_findings: i32,
    pub resolved_findings: i32,
    pub parse_errors: serde_json::Value,
    pub error_message: Option<String>,
    pub claimed_by: Option<String>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Job listing row without count detail.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct JobSummary {
    pub id: Uuid,
    pub system_id: Uuid,
    pub scanner_kind: ScannerKind,
    pub scan_name: Option<String>,
    pub file_name: String,
    pub status: JobStatus,
    pub findings_total: i32,
    pub new_findings: i32,
    pub updated_findings: i32,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Aggregate counts written exactly once, at the completed transition.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportCounts {
    pub hosts_scanned: i32,
    pub findings_total: i32,
    pub findings_by_severity: serde_json::Value,
    pub new_findings: i32,
    pub updated_findings: i32,
    pub unchanged_findings: i32,
    pub duplicate_findings: i32,
    pub resolved_findings: i32,
    pub parse_errors: serde_json::Value,
}
