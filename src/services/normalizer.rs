//! Normalization of raw scanner records into canonical findings.
//!
//! Resolves the host key, derives the vulnerability signature and identity
//! key, applies the minimum-severity recording filter, and merges records
//! that collapse onto the same identity key within one import (first record
//! wins, the rest are counted as in-import duplicates).

use std::collections::{BTreeMap, HashSet};

use crate::models::finding::Severity;
use crate::parsers::{RawFinding, RawHost};
use crate::services::identity;

/// A finding in canonical shape, ready for reconciliation.
#[derive(Debug, Clone)]
pub struct NormalizedFinding {
    pub host_key: String,
    pub host: RawHost,
    pub identity_key: String,
    pub signature: String,
    pub plugin_id: String,
    pub title: String,
    pub description: String,
    pub severity: Severity,
    pub original_severity: String,
    pub cve_ids: Vec<String>,
    pub port: Option<i32>,
    pub protocol: Option<String>,
    pub service: Option<String>,
    pub proof: Option<String>,
    pub solution: Option<String>,
}

/// Result of normalizing one import's raw records.
#[derive(Debug)]
pub struct NormalizeOutcome {
    pub findings: Vec<NormalizedFinding>,
    /// Records dropped because an earlier record in the same import had the
    /// same identity key.
    pub duplicates: usize,
    /// Distinct hosts across all raw records, before any severity filtering.
    pub hosts_scanned: usize,
    /// Histogram of recorded findings keyed by canonical severity label.
    pub findings_by_severity: serde_json::Value,
}

/// Resolve the host matching key: IP, then hostname, then asset tag, then the
/// report's own host label.
pub fn host_key(host: &RawHost) -> String {
    host.ip
        .as_deref()
        .or(host.hostname.as_deref())
        .or(host.asset_tag.as_deref())
        .unwrap_or(&host.name)
        .to_string()
}

/// Normalize raw records into deduplicated canonical findings.
pub fn normalize(records: Vec<RawFinding>, min_severity: Severity) -> NormalizeOutcome {
    let mut hosts: HashSet<String> = HashSet::new();
    let mut seen_keys: HashSet<String> = HashSet::new();
    let mut findings: Vec<NormalizedFinding> = Vec::new();
    let mut duplicates = 0usize;
    let mut histogram: BTreeMap<&'static str, u64> = BTreeMap::new();

    for record in records {
        let key = host_key(&record.host);
        hosts.insert(key.clone());

        if record.severity < min_severity {
            continue;
        }

        let mut cve_ids = record.cve_ids.clone();
        cve_ids.sort();
        cve_ids.dedup();

        let signature = identity::signature_for(&cve_ids, &record.plugin_id);
        let identity_key = identity::compute(&key, &signature);

        if !seen_keys.insert(identity_key.clone()) {
            duplicates += 1;
            continue;
        }

        let title = if record.plugin_name.is_empty() {
            format!("Plugin {}", record.plugin_id)
        } else {
            record.plugin_name.clone()
        };

        *histogram.entry(record.severity.as_str()).or_insert(0) += 1;

        findings.push(NormalizedFinding {
            host_key: key,
            host: record.host,
            identity_key,
            signature,
            plugin_id: record.plugin_id,
            title,
            description: record.description,
            severity: record.severity,
            original_severity: record.original_severity,
            cve_ids,
            port: record.port,
            protocol: record.protocol,
            service: record.service,
            proof: record.proof,
            solution: record.solution,
        });
    }

    NormalizeOutcome {
        findings,
        duplicates,
        hosts_scanned: hosts.len(),
        findings_by_severity: serde_json::to_value(&histogram).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(ip: &str, plugin: &str, severity: Severity, cves: &[&str]) -> RawFinding {
        RawFinding {
            host: RawHost {
                name: ip.to_string(),
                ip: Some(ip.to_string()),
                hostname: None,
                asset_tag: None,
                operating_system: None,
            },
            plugin_id: plugin.to_string(),
            plugin_name: format!("Check {plugin}"),
            severity,
            original_severity: "test".to_string(),
            port: None,
            protocol: None,
            service: None,
            cve_ids: cves.iter().map(|c| c.to_string()).collect(),
            description: "desc".to_string(),
            synopsis: None,
            solution: None,
            proof: None,
        }
    }

    #[test]
    fn host_key_precedence() {
        let mut host = RawHost {
            name: "report-label".to_string(),
            ip: Some("10.0.0.1".to_string()),
            hostname: Some("a.example.gov".to_string()),
            asset_tag: Some("TAG-1".to_string()),
            operating_system: None,
        };
        assert_eq!(host_key(&host), "10.0.0.1");
        host.ip = None;
        assert_eq!(host_key(&host), "a.example.gov");
        host.hostname = None;
        assert_eq!(host_key(&host), "TAG-1");
        host.asset_tag = None;
        assert_eq!(host_key(&host), "report-label");
    }

    #[test]
    fn merges_same_identity_within_import() {
        let records = vec![
            record("10.0.0.1", "100", Severity::High, &["CVE-2024-0001"]),
            record("10.0.0.1", "200", Severity::Medium, &["CVE-2024-0001"]),
            record("10.0.0.2", "100", Severity::High, &["CVE-2024-0001"]),
        ];
        let outcome = normalize(records, Severity::Info);
        // Records 1 and 2 share (host, CVE signature); the first wins.
        assert_eq!(outcome.findings.len(), 2);
        assert_eq!(outcome.duplicates, 1);
        assert_eq!(outcome.findings[0].severity, Severity::High);
    }

    #[test]
    fn min_severity_is_a_subset_filter() {
        let records = vec![
            record("10.0.0.1", "1", Severity::Info, &[]),
            record("10.0.0.1", "2", Severity::Low, &[]),
            record("10.0.0.1", "3", Severity::Medium, &[]),
            record("10.0.0.1", "4", Severity::High, &[]),
            record("10.0.0.1", "5", Severity::Critical, &[]),
        ];

        let all = normalize(records.clone(), Severity::Info);
        let medium_up = normalize(records.clone(), Severity::Medium);
        let high_up = normalize(records, Severity::High);

        assert_eq!(all.findings.len(), 5);
        assert_eq!(medium_up.findings.len(), 3);
        assert_eq!(high_up.findings.len(), 2);

        // Raising the threshold yields a subset of the lower threshold's keys.
        let medium_keys: Vec<_> = medium_up.findings.iter().map(|f| &f.identity_key).collect();
        for f in &high_up.findings {
            assert!(medium_keys.contains(&&f.identity_key));
        }
    }

    #[test]
    fn hosts_counted_before_filtering() {
        let records = vec![
            record("10.0.0.1", "1", Severity::Info, &[]),
            record("10.0.0.2", "2", Severity::Info, &[]),
        ];
        let outcome = normalize(records, Severity::Critical);
        assert_eq!(outcome.findings.len(), 0);
        assert_eq!(outcome.hosts_scanned, 2);
    }

    #[test]
    fn severity_histogram_counts_recorded_findings() {
        let records = vec![
            record("10.0.0.1", "1", Severity::High, &[]),
            record("10.0.0.1", "2", Severity::High, &[]),
            record("10.0.0.1", "3", Severity::Low, &[]),
        ];
        let outcome = normalize(records, Severity::Low);
        assert_eq!(outcome.findings_by_severity["high"], 2);
        assert_eq!(outcome.findings_by_severity["low"], 1);
    }

    #[test]
    fn signature_distinguishes_plugins_without_cves() {
        let records = vec![
            record("10.0.0.1", "100", Severity::Medium, &[]),
            record("10.0.0.1", "200", Severity::Medium, &[]),
        ];
        let outcome = normalize(records, Severity::Info);
        assert_eq!(outcome.findings.len(), 2);
        assert_eq!(outcome.findings[0].signature, "plugin:100");
        assert_eq!(outcome.findings[1].signature, "plugin:200");
    }

    #[test]
    fn title_falls_back_to_plugin_id() {
        let mut r = record("10.0.0.1", "42", Severity::Low, &[]);
        r.plugin_name = String::new();
        let outcome = normalize(vec![r], Severity::Info);
        assert_eq!(outcome.findings[0].title, "Plugin 42");
    }
}
