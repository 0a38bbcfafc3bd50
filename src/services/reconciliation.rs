//! Reconciliation of normalized findings against the stored inventory.
//!
//! Classifies each incoming finding as new, updated, or unchanged relative to
//! what is already stored for the target system, then persists through an
//! identity-key upsert so concurrent imports against the same scope never
//! race into duplicate rows. Stored findings absent from the import are left
//! untouched; resolving is an operator action, never a pipeline side-effect.

use std::collections::HashMap;

use sqlx::PgPool;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::finding::{Disposition, Severity};
use crate::services::normalizer::NormalizedFinding;

/// Classification of one incoming finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileClass {
    /// Identity key not present in storage.
    New,
    /// Identity key present with at least one tracked attribute differing.
    Updated,
    /// Identity key present and all tracked attributes identical.
    Unchanged,
}

/// Tracked attributes of a stored finding, loaded once per import.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredFinding {
    pub id: Uuid,
    pub identity_key: String,
    pub severity: Severity,
    pub title: String,
    pub description: String,
    pub proof: Option<String>,
    pub disposition: Disposition,
    pub control_ids: serde_json::Value,
}

/// Counts emitted by one reconciliation run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileCounts {
    pub new_findings: i32,
    pub updated_findings: i32,
    pub unchanged_findings: i32,
    /// Re-observations of findings an operator had already marked resolved.
    pub resolved_reobserved: i32,
}

/// Compare an incoming finding against its stored counterpart.
///
/// Tracked attributes are severity, title, description, and proof.
pub fn classify(incoming: &NormalizedFinding, stored: Option<&StoredFinding>) -> ReconcileClass {
    match stored {
        None => ReconcileClass::New,
        Some(existing) => {
            let changed = existing.severity != incoming.severity
                || existing.title != incoming.title
                || existing.description != incoming.description
                || existing.proof != incoming.proof;
            if changed {
                ReconcileClass::Updated
            } else {
                ReconcileClass::Unchanged
            }
        }
    }
}

/// Load the stored findings for a system, keyed by identity key.
pub async fn load_stored(
    pool: &PgPool,
    system_id: Uuid,
) -> Result<HashMap<String, StoredFinding>, AppError> {
    let rows = sqlx::query_as::<_, StoredFinding>(
        r#"
        SELECT id, identity_key, severity, title, description, proof, disposition, control_ids
        FROM findings
        WHERE system_id = $1
        "#,
    )
    .bind(system_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| (row.identity_key.clone(), row))
        .collect())
}

/// Union of stored control ids and the mapped control ids for a signature.
fn merge_control_ids(stored: Option<&StoredFinding>, mapped: &[String]) -> Vec<String> {
    let mut merged: Vec<String> = stored
        .and_then(|s| serde_json::from_value::<Vec<String>>(s.control_ids.clone()).ok())
        .unwrap_or_default();
    for control in mapped {
        if !merged.contains(control) {
            merged.push(control.clone());
        }
    }
    merged.sort();
    merged
}

/// Reconcile one import's normalized findings into storage.
///
/// `asset_ids` maps host keys to provisioned asset rows (may be sparse when
/// provisioning is disabled); `control_ids` maps vulnerability signatures to
/// compliance controls (empty when mapping is disabled).
pub async fn reconcile(
    pool: &PgPool,
    system_id: Uuid,
    job_id: Uuid,
    findings: &[NormalizedFinding],
    asset_ids: &HashMap<String, Uuid>,
    control_ids: &HashMap<String, Vec<String>>,
) -> Result<ReconcileCounts, AppError> {
    let stored = load_stored(pool, system_id).await?;
    let mut counts = ReconcileCounts::default();

    for finding in findings {
        let existing = stored.get(&finding.identity_key);

        match classify(finding, existing) {
            ReconcileClass::New => counts.new_findings += 1,
            ReconcileClass::Updated => counts.updated_findings += 1,
            ReconcileClass::Unchanged => counts.unchanged_findings += 1,
        }
        if existing.is_some_and(|e| e.disposition == Disposition::Resolved) {
            counts.resolved_reobserved += 1;
        }

        let mut mapped: Vec<String> = Vec::new();
        for key in [finding.signature.clone(), format!("plugin:{}", finding.plugin_id)] {
            if let Some(controls) = control_ids.get(&key) {
                mapped.extend(controls.iter().cloned());
            }
        }
        let merged_controls = merge_control_ids(existing, &mapped);

        upsert_finding(pool, system_id, job_id, finding, asset_ids, &merged_controls).await?;
    }

    Ok(counts)
}

/// Insert-or-update one finding keyed by the (system, identity key) constraint.
///
/// Disposition is deliberately not touched on conflict: the pipeline refreshes
/// attributes and observation metadata, operators own the disposition.
async fn upsert_finding(
    pool: &PgPool,
    system_id: Uuid,
    job_id: Uuid,
    finding: &NormalizedFinding,
    asset_ids: &HashMap<String, Uuid>,
    control_ids: &[String],
) -> Result<(), AppError> {
    let asset_id = asset_ids.get(&finding.host_key).copied();
    let cve_json = serde_json::to_value(&finding.cve_ids).unwrap_or_default();
    let controls_json = serde_json::to_value(control_ids).unwrap_or_default();

    sqlx::query(
        r#"
        INSERT INTO findings (
            system_id, asset_id, identity_key, signature, plugin_id,
            title, description, severity, original_severity, cve_ids,
            port, protocol, service, proof, solution, control_ids,
            disposition, first_seen_job_id, last_seen_job_id
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
                $11, $12, $13, $14, $15, $16, 'open', $17, $17)
        ON CONFLICT (system_id, identity_key) DO UPDATE SET
            asset_id = COALESCE(findings.asset_id, EXCLUDED.asset_id),
            title = EXCLUDED.title,
            description = EXCLUDED.description,
            severity = EXCLUDED.severity,
            original_severity = EXCLUDED.original_severity,
            cve_ids = EXCLUDED.cve_ids,
            port = EXCLUDED.port,
            protocol = EXCLUDED.protocol,
            service = EXCLUDED.service,
            proof = EXCLUDED.proof,
            solution = EXCLUDED.solution,
            control_ids = EXCLUDED.control_ids,
            last_seen_job_id = EXCLUDED.last_seen_job_id,
            updated_at = NOW()
        "#,
    )
    .bind(system_id)
    .bind(asset_id)
    .bind(&finding.identity_key)
    .bind(&finding.signature)
    .bind(&finding.plugin_id)
    .bind(&finding.title)
    .bind(&finding.description)
    .bind(finding.severity)
    .bind(&finding.original_severity)
    .bind(&cve_json)
    .bind(finding.port)
    .bind(&finding.protocol)
    .bind(&finding.service)
    .bind(&finding.proof)
    .bind(&finding.solution)
    .bind(&controls_json)
    .bind(job_id)
    .execute(pool)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsers::RawHost;

    fn incoming(severity: Severity, title: &str, proof: Option<&str>) -> NormalizedFinding {
        NormalizedFinding {
            host_key: "10.0.0.5".to_string(),
            host: RawHost::default(),
            identity_key: "abc".to_string(),
            signature: "CVE-2024-0001".to_string(),
            plugin_id: "100".to_string(),
            title: title.to_string(),
            description: "desc".to_string(),
            severity,
            original_severity: "3".to_string(),
            cve_ids: vec!["CVE-2024-0001".to_string()],
            port: None,
            protocol: None,
            service: None,
            proof: proof.map(|p| p.to_string()),
            solution: None,
        }
    }

    fn stored(severity: Severity, title: &str, proof: Option<&str>) -> StoredFinding {
        StoredFinding {
            id: Uuid::nil(),
            identity_key: "abc".to_string(),
            severity,
            title: title.to_string(),
            description: "desc".to_string(),
            proof: proof.map(|p| p.to_string()),
            disposition: Disposition::Open,
            control_ids: serde_json::json!([]),
        }
    }

    #[test]
    fn absent_key_is_new() {
        let f = incoming(Severity::Medium, "t", None);
        assert_eq!(classify(&f, None), ReconcileClass::New);
    }

    #[test]
    fn identical_attributes_are_unchanged() {
        let f = incoming(Severity::Medium, "t", Some("p"));
        let s = stored(Severity::Medium, "t", Some("p"));
        assert_eq!(classify(&f, Some(&s)), ReconcileClass::Unchanged);
    }

    #[test]
    fn severity_change_is_updated() {
        let f = incoming(Severity::High, "t", None);
        let s = stored(Severity::Medium, "t", None);
        assert_eq!(classify(&f, Some(&s)), ReconcileClass::Updated);
    }

    #[test]
    fn proof_change_is_updated() {
        let f = incoming(Severity::Medium, "t", Some("new evidence"));
        let s = stored(Severity::Medium, "t", Some("old evidence"));
        assert_eq!(classify(&f, Some(&s)), ReconcileClass::Updated);
    }

    #[test]
    fn title_change_is_updated() {
        let f = incoming(Severity::Medium, "renamed check", None);
        let s = stored(Severity::Medium, "t", None);
        assert_eq!(classify(&f, Some(&s)), ReconcileClass::Updated);
    }

    #[test]
    fn reimport_of_identical_set_counts_all_unchanged() {
        // Re-import idempotence at the classification level: a second pass
        // over the same attributes yields no new and no updated.
        let f = incoming(Severity::Medium, "t", Some("p"));
        let s = stored(Severity::Medium, "t", Some("p"));
        let classes: Vec<_> = (0..3).map(|_| classify(&f, Some(&s))).collect();
        assert!(classes.iter().all(|c| *c == ReconcileClass::Unchanged));
    }

    #[test]
    fn control_merge_is_additive_union() {
        let mut s = stored(Severity::Medium, "t", None);
        s.control_ids = serde_json::json!(["RA-5", "SI-2"]);
        let merged = merge_control_ids(Some(&s), &["SI-2".to_string(), "CM-6".to_string()]);
        assert_eq!(merged, vec!["CM-6", "RA-5", "SI-2"]);
    }

    #[test]
    fn control_merge_without_stored_row() {
        let merged = merge_control_ids(None, &["RA-5".to_string()]);
        assert_eq!(merged, vec!["RA-5"]);
    }
}
