//! Identity key computation for deduplicating findings across imports.
//!
//! The key is a deterministic hash of the host identity and the vulnerability
//! signature. It stays stable across re-scans (volatile fields like proof text
//! or port state are excluded) so a re-observed vulnerability lands on the
//! same row.

use sha2::{Digest, Sha256};

/// Compute a finding identity key from host identity and vulnerability signature.
///
/// The signature prefers a CVE when one exists and falls back to the scanner
/// check id in `plugin:<id>` form (see `signature_for`).
pub fn compute(host_key: &str, signature: &str) -> String {
    hash(&format!("FND:{host_key}:{signature}"))
}

/// Derive the vulnerability signature for a set of CVEs and a plugin id.
///
/// The lexicographically-first CVE wins so the signature is independent of the
/// order the scanner listed them in.
pub fn signature_for(cve_ids: &[String], plugin_id: &str) -> String {
    cve_ids
        .iter()
        .min()
        .cloned()
        .unwrap_or_else(|| format!("plugin:{plugin_id}"))
}

/// SHA-256 hash a string and return hex-encoded digest.
fn hash(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_inputs_same_key() {
        let k1 = compute("10.0.0.5", "CVE-2021-3449");
        let k2 = compute("10.0.0.5", "CVE-2021-3449");
        assert_eq!(k1, k2);
    }

    #[test]
    fn different_host_different_key() {
        let k1 = compute("10.0.0.5", "CVE-2021-3449");
        let k2 = compute("10.0.0.9", "CVE-2021-3449");
        assert_ne!(k1, k2);
    }

    #[test]
    fn different_signature_different_key() {
        let k1 = compute("10.0.0.5", "CVE-2021-3449");
        let k2 = compute("10.0.0.5", "plugin:51192");
        assert_ne!(k1, k2);
    }

    #[test]
    fn key_is_hex_sha256() {
        let k = compute("host", "sig");
        assert_eq!(k.len(), 64);
        assert!(k.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn signature_prefers_cve() {
        let sig = signature_for(
            &["CVE-2023-21690".to_string(), "CVE-2023-21689".to_string()],
            "171340",
        );
        assert_eq!(sig, "CVE-2023-21689");
    }

    #[test]
    fn signature_is_order_independent() {
        let a = signature_for(
            &["CVE-2023-21689".to_string(), "CVE-2023-21690".to_string()],
            "171340",
        );
        let b = signature_for(
            &["CVE-2023-21690".to_string(), "CVE-2023-21689".to_string()],
            "171340",
        );
        assert_eq!(a, b);
    }

    #[test]
    fn signature_falls_back_to_plugin() {
        let sig = signature_for(&[], "57582");
        assert_eq!(sig, "plugin:57582");
    }
}
