//! Asset provisioning for hosts observed by an import.
//!
//! Matches scanner hosts against inventory by exact IP, then hostname, then
//! asset tag. Creation only happens when the import requested it, and goes
//! through the (system, host key) uniqueness constraint so two concurrent
//! imports provisioning the same host converge on a single row.

use std::collections::HashMap;

use sqlx::PgPool;
use uuid::Uuid;

use crate::errors::AppError;
use crate::parsers::RawHost;
use crate::services::normalizer::NormalizedFinding;

/// Distinct hosts across an import's findings, keyed by host key.
///
/// The first occurrence of a host wins; scanners repeat identical host blocks
/// for every finding.
pub fn distinct_hosts(findings: &[NormalizedFinding]) -> HashMap<String, RawHost> {
    let mut hosts: HashMap<String, RawHost> = HashMap::new();
    for finding in findings {
        hosts
            .entry(finding.host_key.clone())
            .or_insert_with(|| finding.host.clone());
    }
    hosts
}

/// Resolve (and optionally create) asset rows for every host in the import.
///
/// Returns a host-key to asset-id map; hosts without a match stay absent from
/// the map when creation is disabled, and their findings are recorded without
/// an asset link.
pub async fn ensure_assets(
    pool: &PgPool,
    system_id: Uuid,
    job_id: Uuid,
    findings: &[NormalizedFinding],
    auto_create: bool,
) -> Result<HashMap<String, Uuid>, AppError> {
    let hosts = distinct_hosts(findings);
    let mut resolved: HashMap<String, Uuid> = HashMap::new();

    for (key, host) in hosts {
        if let Some(asset_id) = match_existing(pool, system_id, &host).await? {
            resolved.insert(key, asset_id);
            continue;
        }

        if !auto_create {
            continue;
        }

        let asset_id = create_asset(pool, system_id, job_id, &key, &host).await?;
        tracing::debug!(system_id = %system_id, host = %key, asset_id = %asset_id, "Provisioned asset");
        resolved.insert(key, asset_id);
    }

    Ok(resolved)
}

/// Match an existing asset by IP, hostname, then asset tag.
async fn match_existing(
    pool: &PgPool,
    system_id: Uuid,
    host: &RawHost,
) -> Result<Option<Uuid>, AppError> {
    let candidates = [
        ("ip_address", host.ip.as_deref()),
        ("hostname", host.hostname.as_deref()),
        ("asset_tag", host.asset_tag.as_deref()),
    ];

    for (column, value) in candidates {
        let Some(value) = value else { continue };
        let query = format!("SELECT id FROM assets WHERE system_id = $1 AND {column} = $2");
        let found = sqlx::query_scalar::<_, Uuid>(&query)
            .bind(system_id)
            .bind(value)
            .fetch_optional(pool)
            .await?;
        if found.is_some() {
            return Ok(found);
        }
    }

    Ok(None)
}

/// Create an asset through the uniqueness constraint.
///
/// `ON CONFLICT DO UPDATE ... RETURNING id` makes a concurrent race resolve
/// the loser to the winner's row instead of erroring.
async fn create_asset(
    pool: &PgPool,
    system_id: Uuid,
    job_id: Uuid,
    key: &str,
    host: &RawHost,
) -> Result<Uuid, AppError> {
    let asset_id = sqlx::query_scalar::<_, Uuid>(
        r#"
        INSERT INTO assets (
            system_id, host_key, ip_address, hostname, asset_tag,
            operating_system, created_from_job_id
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (system_id, host_key) DO UPDATE SET updated_at = NOW()
        RETURNING id
        "#,
    )
    .bind(system_id)
    .bind(key)
    .bind(&host.ip)
    .bind(&host.hostname)
    .bind(&host.asset_tag)
    .bind(&host.operating_system)
    .bind(job_id)
    .fetch_one(pool)
    .await?;

    Ok(asset_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::finding::Severity;
    use crate::services::normalizer::host_key;

    fn finding(ip: &str, plugin: &str) -> NormalizedFinding {
        let host = RawHost {
            name: ip.to_string(),
            ip: Some(ip.to_string()),
            hostname: None,
            asset_tag: None,
            operating_system: None,
        };
        NormalizedFinding {
            host_key: host_key(&host),
            host,
            identity_key: format!("{ip}-{plugin}"),
            signature: format!("plugin:{plugin}"),
            plugin_id: plugin.to_string(),
            title: "t".to_string(),
            description: "d".to_string(),
            severity: Severity::Medium,
            original_severity: "2".to_string(),
            cve_ids: vec![],
            port: None,
            protocol: None,
            service: None,
            proof: None,
            solution: None,
        }
    }

    #[test]
    fn distinct_hosts_deduplicates() {
        let findings = vec![
            finding("10.0.0.1", "100"),
            finding("10.0.0.1", "200"),
            finding("10.0.0.2", "100"),
        ];
        let hosts = distinct_hosts(&findings);
        assert_eq!(hosts.len(), 2);
        assert!(hosts.contains_key("10.0.0.1"));
        assert!(hosts.contains_key("10.0.0.2"));
    }

    #[test]
    fn distinct_hosts_keeps_first_occurrence() {
        let mut a = finding("10.0.0.1", "100");
        a.host.operating_system = Some("Ubuntu 22.04".to_string());
        let mut b = finding("10.0.0.1", "200");
        b.host.operating_system = Some("Debian 12".to_string());

        let hosts = distinct_hosts(&[a, b]);
        assert_eq!(
            hosts["10.0.0.1"].operating_system.as_deref(),
            Some("Ubuntu 22.04")
        );
    }
}
