//! Remediation plan (POA&M) model produced by the generator stage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::models::finding::Severity;

/// Plan status. `Open` and `InProgress` count as open for the
/// one-open-plan-per-finding invariant.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "plan_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Open,
    InProgress,
    Completed,
    Cancelled,
}

impl PlanStatus {
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open | Self::InProgress)
    }
}

/// Key used to aggregate findings into remediation plans.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "grouping_strategy", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum GroupingStrategy {
    BySignature,
    ByAsset,
    ByCve,
    Individual,
}

/// A generated remediation-tracking record aggregating one or more findings.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RemediationPlan {
    pub id: Uuid,
    pub system_id: Uuid,
    pub strategy: GroupingStrategy,
    /// The grouping key the plan was created under (signature, asset id, CVE,
    /// or finding identity key for `individual`).
    pub group_key: String,
    pub title: String,
    /// Max severity of the linked findings.
    pub severity: Severity,
    pub status: PlanStatus,
    pub owner: Option<String>,
    pub created_from_job_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Plan detail DTO with the linked finding and asset ids.
#[derive(Debug, Clone, Serialize)]
pub struct RemediationPlanDetail {
    #[serde(flatten)]
    pub plan: RemediationPlan,
    pub finding_ids: Vec<Uuid>,
    pub asset_ids: Vec<Uuid>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_statuses() {
        assert!(PlanStatus::Open.is_open());
        assert!(PlanStatus::InProgress.is_open());
        assert!(!PlanStatus::Completed.is_open());
        assert!(!PlanStatus::Cancelled.is_open());
    }

    #[test]
    fn strategy_serialization() {
        assert_eq!(
            serde_json::to_string(&GroupingStrategy::BySignature).unwrap(),
            "\"by_signature\""
        );
        let s: GroupingStrategy = serde_json::from_str("\"by_cve\"").unwrap();
        assert_eq!(s, GroupingStrategy::ByCve);
        let s: GroupingStrategy = serde_json::from_str("\"individual\"").unwrap();
        assert_eq!(s, GroupingStrategy::Individual);
    }

    #[test]
    fn plan_status_serialization() {
        assert_eq!(
            serde_json::to_string(&PlanStatus::InProgress).unwrap(),
            "\"in_progress\""
        );
    }
}
