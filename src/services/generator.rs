//! Remediation-plan (POA&M) generation from a completed import job.
//!
//! A separate, re-triggerable stage: reads the findings a completed job
//! surfaced, filters by severity and disposition flags, groups them under the
//! requested strategy, and writes plan records. Re-runs are idempotent —
//! findings already linked to an open plan are skipped, and a grouping key
//! with an existing open plan absorbs newly eligible findings instead of
//! getting a duplicate plan.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;
use validator::Validate;

use crate::errors::AppError;
use crate::models::finding::{Disposition, Severity};
use crate::models::job::JobStatus;
use crate::models::remediation_plan::GroupingStrategy;
use crate::services::jobs;

fn default_true() -> bool {
    true
}

/// Generator invocation parameters.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct GenerateRequest {
    pub job_id: Uuid,
    pub min_severity: Severity,
    pub group_by: GroupingStrategy,
    #[serde(default = "default_true")]
    pub exclude_accepted_risk: bool,
    #[serde(default = "default_true")]
    pub exclude_false_positive: bool,
    #[validate(length(max = 200))]
    pub default_owner: Option<String>,
}

/// Generator invocation result.
#[derive(Debug, Serialize)]
pub struct GenerateResult {
    pub plans_created: i64,
    pub findings_linked: i64,
}

/// A finding considered for plan generation.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CandidateFinding {
    pub id: Uuid,
    pub asset_id: Option<Uuid>,
    pub host_key: Option<String>,
    pub signature: String,
    pub title: String,
    pub severity: Severity,
    pub cve_ids: serde_json::Value,
    pub disposition: Disposition,
}

impl CandidateFinding {
    /// Lexicographically-first CVE, if the finding has any.
    fn primary_cve(&self) -> Option<String> {
        serde_json::from_value::<Vec<String>>(self.cve_ids.clone())
            .ok()
            .and_then(|cves| cves.into_iter().min())
    }
}

/// Whether the disposition flags exclude a finding from generation.
pub fn disposition_excluded(
    disposition: Disposition,
    exclude_accepted_risk: bool,
    exclude_false_positive: bool,
) -> bool {
    match disposition {
        Disposition::AcceptedRisk => exclude_accepted_risk,
        Disposition::FalsePositive => exclude_false_positive,
        _ => false,
    }
}

/// Grouping key for one finding under a strategy.
///
/// `None` means the strategy cannot place the finding (no asset for
/// `by_asset`, no CVE for `by_cve`) and it is left out of this run. A finding
/// with several CVEs goes under its first CVE only, keeping it on a single
/// open plan.
pub fn group_key(strategy: GroupingStrategy, finding: &CandidateFinding) -> Option<String> {
    match strategy {
        GroupingStrategy::BySignature => Some(finding.signature.clone()),
        GroupingStrategy::ByAsset => finding.asset_id.map(|id| id.to_string()),
        GroupingStrategy::ByCve => finding.primary_cve(),
        GroupingStrategy::Individual => Some(finding.id.to_string()),
    }
}

/// Group eligible findings by strategy key, in deterministic key order.
pub fn group_findings(
    strategy: GroupingStrategy,
    findings: &[CandidateFinding],
) -> BTreeMap<String, Vec<&CandidateFinding>> {
    let mut groups: BTreeMap<String, Vec<&CandidateFinding>> = BTreeMap::new();
    for finding in findings {
        if let Some(key) = group_key(strategy, finding) {
            groups.entry(key).or_default().push(finding);
        }
    }
    groups
}

/// Plan title for one group.
fn plan_title(strategy: GroupingStrategy, key: &str, group: &[&CandidateFinding]) -> String {
    let first = group[0];
    match strategy {
        GroupingStrategy::BySignature => {
            let assets = group.iter().filter(|f| f.asset_id.is_some()).count().max(1);
            format!("Remediate {} ({} affected asset(s))", first.title, assets)
        }
        GroupingStrategy::ByAsset => {
            let host = first.host_key.as_deref().unwrap_or(key);
            format!("Remediate {} finding(s) on {host}", group.len())
        }
        GroupingStrategy::ByCve => format!("Remediate {key}: {}", first.title),
        GroupingStrategy::Individual => first.title.clone(),
    }
}

/// Run the generator for a completed job.
pub async fn generate(pool: &PgPool, request: &GenerateRequest) -> Result<GenerateResult, AppError> {
    let job = jobs::get(pool, request.job_id).await?;
    if job.status != JobStatus::Completed {
        return Err(AppError::Validation(format!(
            "Plan generation requires a completed import job (job is {:?})",
            job.status
        )));
    }

    let candidates = load_candidates(pool, job.system_id, job.id, request.min_severity).await?;

    let eligible: Vec<CandidateFinding> = candidates
        .into_iter()
        .filter(|f| {
            !disposition_excluded(
                f.disposition,
                request.exclude_accepted_risk,
                request.exclude_false_positive,
            )
        })
        .collect();

    let groups = group_findings(request.group_by, &eligible);

    // No eligible findings is a normal outcome, not an error.
    if groups.is_empty() {
        return Ok(GenerateResult {
            plans_created: 0,
            findings_linked: 0,
        });
    }

    let mut tx = pool.begin().await?;
    let mut plans_created = 0i64;
    let mut findings_linked = 0i64;

    for (key, group) in &groups {
        let max_severity = group
            .iter()
            .map(|f| f.severity)
            .max()
            .unwrap_or(request.min_severity);

        // An open plan under the same key absorbs the new findings.
        let existing = sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM remediation_plans \
             WHERE system_id = $1 AND strategy = $2 AND group_key = $3 \
               AND status IN ('open', 'in_progress') \
             LIMIT 1",
        )
        .bind(job.system_id)
        .bind(request.group_by)
        .bind(key)
        .fetch_optional(&mut *tx)
        .await?;

        let plan_id = match existing {
            Some(plan_id) => {
                sqlx::query(
                    "UPDATE remediation_plans \
                     SET severity = GREATEST(severity, $2), updated_at = NOW() \
                     WHERE id = $1",
                )
                .bind(plan_id)
                .bind(max_severity)
                .execute(&mut *tx)
                .await?;
                plan_id
            }
            None => {
                let plan_id = sqlx::query_scalar::<_, Uuid>(
                    "INSERT INTO remediation_plans ( \
                         system_id, strategy, group_key, title, severity, \
                         status, owner, created_from_job_id \
                     ) VALUES ($1, $2, $3, $4, $5, 'open', $6, $7) \
                     RETURNING id",
                )
                .bind(job.system_id)
                .bind(request.group_by)
                .bind(key)
                .bind(plan_title(request.group_by, key, group))
                .bind(max_severity)
                .bind(&request.default_owner)
                .bind(job.id)
                .fetch_one(&mut *tx)
                .await?;
                plans_created += 1;
                plan_id
            }
        };

        for finding in group {
            let result = sqlx::query(
                "INSERT INTO remediation_plan_findings (plan_id, finding_id) \
                 VALUES ($1, $2) \
                 ON CONFLICT (plan_id, finding_id) DO NOTHING",
            )
            .bind(plan_id)
            .bind(finding.id)
            .execute(&mut *tx)
            .await?;
            findings_linked += result.rows_affected() as i64;
        }
    }

    tx.commit().await?;

    tracing::info!(
        job_id = %request.job_id,
        strategy = ?request.group_by,
        plans_created,
        findings_linked,
        "Plan generation finished"
    );

    Ok(GenerateResult {
        plans_created,
        findings_linked,
    })
}

/// Load the findings a job surfaced, at or above the minimum severity, that
/// are not already linked to an open plan.
async fn load_candidates(
    pool: &PgPool,
    system_id: Uuid,
    job_id: Uuid,
    min_severity: Severity,
) -> Result<Vec<CandidateFinding>, AppError> {
    let rows = sqlx::query_as::<_, CandidateFinding>(
        r#"
        SELECT f.id, f.asset_id, a.host_key, f.signature, f.title, f.severity,
               f.cve_ids, f.disposition
        FROM findings f
        LEFT JOIN assets a ON a.id = f.asset_id
        WHERE f.system_id = $1
          AND (f.last_seen_job_id = $2 OR f.first_seen_job_id = $2)
          AND f.severity >= $3
          AND NOT EXISTS (
              SELECT 1
              FROM remediation_plan_findings pf
              JOIN remediation_plans p ON p.id = pf.plan_id
              WHERE pf.finding_id = f.id
                AND p.status IN ('open', 'in_progress')
          )
        ORDER BY f.severity DESC, f.title ASC
        "#,
    )
    .bind(system_id)
    .bind(job_id)
    .bind(min_severity)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(
        id_byte: u8,
        asset_byte: Option<u8>,
        signature: &str,
        severity: Severity,
        cves: &[&str],
    ) -> CandidateFinding {
        CandidateFinding {
            id: Uuid::from_bytes([id_byte; 16]),
            asset_id: asset_byte.map(|b| Uuid::from_bytes([b; 16])),
            host_key: asset_byte.map(|b| format!("10.0.0.{b}")),
            signature: signature.to_string(),
            title: format!("Vulnerability {signature}"),
            severity,
            cve_ids: serde_json::json!(cves),
            disposition: Disposition::Open,
        }
    }

    /// Two findings on different assets sharing a signature, one distinct.
    fn sample_set() -> Vec<CandidateFinding> {
        vec![
            candidate(1, Some(10), "CVE-2024-0001", Severity::High, &["CVE-2024-0001"]),
            candidate(2, Some(11), "CVE-2024-0001", Severity::Medium, &["CVE-2024-0001"]),
            candidate(3, Some(10), "plugin:57582", Severity::Medium, &[]),
        ]
    }

    #[test]
    fn by_signature_groups_shared_signature() {
        let findings = sample_set();
        let groups = group_findings(GroupingStrategy::BySignature, &findings);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups["CVE-2024-0001"].len(), 2);
        assert_eq!(groups["plugin:57582"].len(), 1);
    }

    #[test]
    fn by_asset_groups_per_distinct_asset() {
        let findings = sample_set();
        let groups = group_findings(GroupingStrategy::ByAsset, &findings);
        assert_eq!(groups.len(), 2);
        let sizes: Vec<usize> = groups.values().map(|g| g.len()).collect();
        assert!(sizes.contains(&2));
        assert!(sizes.contains(&1));
    }

    #[test]
    fn individual_creates_one_group_per_finding() {
        let findings = sample_set();
        let groups = group_findings(GroupingStrategy::Individual, &findings);
        assert_eq!(groups.len(), 3);
        assert!(groups.values().all(|g| g.len() == 1));
    }

    #[test]
    fn by_cve_excludes_findings_without_cves() {
        let findings = sample_set();
        let groups = group_findings(GroupingStrategy::ByCve, &findings);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups["CVE-2024-0001"].len(), 2);
    }

    #[test]
    fn by_cve_uses_first_cve_of_multi_cve_finding() {
        let findings = vec![candidate(
            1,
            Some(10),
            "CVE-2023-21689",
            Severity::Critical,
            &["CVE-2023-21690", "CVE-2023-21689"],
        )];
        let groups = group_findings(GroupingStrategy::ByCve, &findings);
        assert_eq!(groups.len(), 1);
        assert!(groups.contains_key("CVE-2023-21689"));
    }

    #[test]
    fn by_asset_excludes_assetless_findings() {
        let findings = vec![candidate(1, None, "plugin:1", Severity::High, &[])];
        let groups = group_findings(GroupingStrategy::ByAsset, &findings);
        assert!(groups.is_empty());
    }

    #[test]
    fn exclusion_flags_apply_per_disposition() {
        assert!(disposition_excluded(Disposition::FalsePositive, true, true));
        assert!(!disposition_excluded(Disposition::FalsePositive, true, false));
        assert!(disposition_excluded(Disposition::AcceptedRisk, true, false));
        assert!(!disposition_excluded(Disposition::AcceptedRisk, false, true));
        assert!(!disposition_excluded(Disposition::Open, true, true));
        assert!(!disposition_excluded(Disposition::Resolved, true, true));
    }

    #[test]
    fn request_defaults_exclude_both_dispositions() {
        let request: GenerateRequest = serde_json::from_str(
            r#"{
                "job_id": "00000000-0000-0000-0000-000000000000",
                "min_severity": "medium",
                "group_by": "by_signature"
            }"#,
        )
        .unwrap();
        assert!(request.exclude_accepted_risk);
        assert!(request.exclude_false_positive);
        assert!(request.default_owner.is_none());
    }

    #[test]
    fn plan_titles_reflect_strategy() {
        let findings = sample_set();
        let groups = group_findings(GroupingStrategy::BySignature, &findings);
        let group = &groups["CVE-2024-0001"];
        let title = plan_title(GroupingStrategy::BySignature, "CVE-2024-0001", group);
        assert!(title.contains("2 affected asset(s)"));

        let groups = group_findings(GroupingStrategy::ByCve, &findings);
        let title = plan_title(
            GroupingStrategy::ByCve,
            "CVE-2024-0001",
            &groups["CVE-2024-0001"],
        );
        assert!(title.starts_with("Remediate CVE-2024-0001"));
    }
}
