//! Compliance-control lookup keyed by vulnerability signature.
//!
//! Read-only over the `control_mappings` table and purely additive to
//! findings; a signature with no mapping is simply not linked.

use std::collections::{HashMap, HashSet};

use sqlx::PgPool;

use crate::errors::AppError;
use crate::models::control_mapping::ControlMapping;
use crate::services::normalizer::NormalizedFinding;

/// Signature keys an import needs mappings for: the finding signature itself
/// plus the `plugin:<id>` form, so a CVE-signed finding still picks up
/// mappings keyed by its scanner check id.
pub fn lookup_keys(findings: &[NormalizedFinding]) -> Vec<String> {
    let mut keys: HashSet<String> = HashSet::new();
    for finding in findings {
        keys.insert(finding.signature.clone());
        keys.insert(format!("plugin:{}", finding.plugin_id));
    }
    let mut keys: Vec<String> = keys.into_iter().collect();
    keys.sort();
    keys
}

/// Fetch control ids for a set of signatures in one round trip.
pub async fn controls_for(
    pool: &PgPool,
    signatures: &[String],
) -> Result<HashMap<String, Vec<String>>, AppError> {
    if signatures.is_empty() {
        return Ok(HashMap::new());
    }

    let rows = sqlx::query_as::<_, ControlMapping>(
        r#"
        SELECT id, signature, control_id, created_at
        FROM control_mappings
        WHERE signature = ANY($1)
        ORDER BY signature, control_id
        "#,
    )
    .bind(signatures)
    .fetch_all(pool)
    .await?;

    let mut map: HashMap<String, Vec<String>> = HashMap::new();
    for mapping in rows {
        map.entry(mapping.signature).or_default().push(mapping.control_id);
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::finding::Severity;
    use crate::parsers::RawHost;

    fn finding(signature: &str, plugin: &str) -> NormalizedFinding {
        NormalizedFinding {
            host_key: "10.0.0.1".to_string(),
            host: RawHost::default(),
            identity_key: format!("{signature}-{plugin}"),
            signature: signature.to_string(),
            plugin_id: plugin.to_string(),
            title: "t".to_string(),
            description: "d".to_string(),
            severity: Severity::Low,
            original_severity: "1".to_string(),
            cve_ids: vec![],
            port: None,
            protocol: None,
            service: None,
            proof: None,
            solution: None,
        }
    }

    #[test]
    fn lookup_keys_include_both_forms() {
        let findings = vec![finding("CVE-2024-0001", "100")];
        let keys = lookup_keys(&findings);
        assert_eq!(keys, vec!["CVE-2024-0001", "plugin:100"]);
    }

    #[test]
    fn lookup_keys_collapse_plugin_signatures() {
        // A finding without CVEs already has the plugin form as its signature.
        let findings = vec![finding("plugin:100", "100"), finding("plugin:100", "100")];
        let keys = lookup_keys(&findings);
        assert_eq!(keys, vec!["plugin:100"]);
    }

    #[test]
    fn lookup_keys_are_sorted_and_distinct() {
        let findings = vec![
            finding("CVE-2024-0002", "200"),
            finding("CVE-2024-0001", "100"),
            finding("CVE-2024-0001", "100"),
        ];
        let keys = lookup_keys(&findings);
        assert_eq!(
            keys,
            vec![
                "CVE-2024-0001",
                "CVE-2024-0002",
                "plugin:100",
                "plugin:200"
            ]
        );
    }
}
