//! Core finding model with the canonical severity and disposition enums.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// -- Enums matching PostgreSQL --

/// Canonical 5-point severity scale.
///
/// Variant order is the ordinal order (`info < low < medium < high < critical`)
/// and matches the declaration order of the `severity_level` Postgres enum, so
/// `severity >= $1` comparisons behave identically in Rust and SQL.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[sqlx(type_name = "severity_level", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Map a CVSS base score onto the canonical scale using the standard bands.
    pub fn from_cvss(score: f32) -> Self {
        match score {
            s if s >= 9.0 => Self::Critical,
            s if s >= 7.0 => Self::High,
            s if s >= 4.0 => Self::Medium,
            s if s > 0.0 => Self::Low,
            _ => Self::Info,
        }
    }

    /// Lowercase wire label, also used as the `findings_by_severity` histogram key.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

/// Operator-assigned finding disposition.
///
/// The pipeline never changes a disposition; transitions go through the
/// disposition endpoint and are validated server-side.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "finding_disposition", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    Open,
    AcceptedRisk,
    FalsePositive,
    Resolved,
}

impl Disposition {
    /// Valid operator transitions. Any non-open disposition may be reverted to
    /// open; open may move to any of the three others.
    pub fn can_transition_to(&self, to: &Disposition) -> bool {
        match (self, to) {
            (a, b) if a == b => false,
            (Disposition::Open, _) => true,
            (_, Disposition::Open) => true,
            _ => false,
        }
    }
}

// -- Core Finding --

/// A normalized vulnerability observation for one host within one system scope.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Finding {
    pub id: Uuid,
    pub system_id: Uuid,
    pub asset_id: Option<Uuid>,
    /// Deterministic hash of (host identity, vulnerability signature); unique
    /// per system scope.
    pub identity_key: String,
    /// Vulnerability signature: first CVE if any, else `plugin:<id>`.
    pub signature: String,
    pub plugin_id: String,
    pub title: String,
    pub description: String,
    pub severity: Severity,
    pub original_severity: String,
    pub cve_ids: serde_json::Value,
    pub port: Option<i32>,
    pub protocol: Option<String>,
    pub service: Option<String>,
    pub proof: Option<String>,
    pub solution: Option<String>,
    pub control_ids: serde_json::Value,
    pub disposition: Disposition,
    pub first_seen_job_id: Uuid,
    pub last_seen_job_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Response DTO excluding proof/solution bodies for list views.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct FindingSummary {
    pub id: Uuid,
    pub system_id: Uuid,
    pub asset_id: Option<Uuid>,
    pub identity_key: String,
    pub signature: String,
    pub title: String,
    pub severity: Severity,
    pub cve_ids: serde_json::Value,
    pub control_ids: serde_json::Value,
    pub disposition: Disposition,
    pub first_seen_job_id: Uuid,
    pub last_seen_job_id: Uuid,
    pub updated_at: DateTime<Utc>,
}

/// Request body for the operator disposition endpoint.
#[derive(Debug, Deserialize)]
pub struct DispositionUpdateRequest {
    pub disposition: Disposition,
    pub justification: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_ordinal_ordering() {
        assert!(Severity::Info < Severity::Low);
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::Medium < Severity::High);
        assert!(Severity::High < Severity::Critical);
    }

    #[test]
    fn severity_serialization_is_lowercase() {
        assert_eq!(serde_json::to_string(&Severity::High).unwrap(), "\"high\"");
        let s: Severity = serde_json::from_str("\"critical\"").unwrap();
        assert_eq!(s, Severity::Critical);
    }

    #[test]
    fn severity_from_cvss_bands() {
        assert_eq!(Severity::from_cvss(10.0), Severity::Critical);
        assert_eq!(Severity::from_cvss(9.0), Severity::Critical);
        assert_eq!(Severity::from_cvss(8.9), Severity::High);
        assert_eq!(Severity::from_cvss(7.0), Severity::High);
        assert_eq!(Severity::from_cvss(5.5), Severity::Medium);
        assert_eq!(Severity::from_cvss(2.1), Severity::Low);
        assert_eq!(Severity::from_cvss(0.0), Severity::Info);
    }

    #[test]
    fn disposition_serialization() {
        assert_eq!(
            serde_json::to_string(&Disposition::AcceptedRisk).unwrap(),
            "\"accepted_risk\""
        );
        let d: Disposition = serde_json::from_str("\"false_positive\"").unwrap();
        assert_eq!(d, Disposition::FalsePositive);
    }

    #[test]
    fn disposition_transitions_from_open() {
        assert!(Disposition::Open.can_transition_to(&Disposition::Resolved));
        assert!(Disposition::Open.can_transition_to(&Disposition::AcceptedRisk));
        assert!(Disposition::Open.can_transition_to(&Disposition::FalsePositive));
        assert!(!Disposition::Open.can_transition_to(&Disposition::Open));
    }

    #[test]
    fn disposition_non_open_only_reverts_to_open() {
        assert!(Disposition::Resolved.can_transition_to(&Disposition::Open));
        assert!(!Disposition::Resolved.can_transition_to(&Disposition::FalsePositive));
        assert!(!Disposition::AcceptedRisk.can_transition_to(&Disposition::Resolved));
    }
}
