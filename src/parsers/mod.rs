//! Scanner report parsers producing raw per-host, per-finding records.
//!
//! Each parser implements the `ScanParser` trait over an XML byte stream,
//! reading events incrementally (no DOM) so large reports never require the
//! whole document in memory. A malformed individual record is reported as a
//! `RecordError` and skipped; only an unreadable container or an unrecognized
//! dialect aborts the parse.

pub mod nessus;
pub mod openvas;

use serde::{Deserialize, Serialize};

use crate::models::finding::Severity;

/// Supported scanner dialects. Adding a dialect means adding a parser module
/// and a `parser_for` arm; downstream stages are untouched.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "scanner_kind", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ScannerKind {
    Nessus,
    Openvas,
}

impl std::fmt::Display for ScannerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Nessus => write!(f, "nessus"),
            Self::Openvas => write!(f, "openvas"),
        }
    }
}

/// Host identity as reported by the scanner.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawHost {
    /// The report's own host label (often an IP, sometimes a name).
    pub name: String,
    pub ip: Option<String>,
    pub hostname: Option<String>,
    pub asset_tag: Option<String>,
    pub operating_system: Option<String>,
}

/// One raw per-host, per-finding record before normalization.
#[derive(Debug, Clone)]
pub struct RawFinding {
    pub host: RawHost,
    pub plugin_id: String,
    pub plugin_name: String,
    pub severity: Severity,
    pub original_severity: String,
    pub port: Option<i32>,
    pub protocol: Option<String>,
    pub service: Option<String>,
    pub cve_ids: Vec<String>,
    pub description: String,
    pub synopsis: Option<String>,
    pub solution: Option<String>,
    pub proof: Option<String>,
}

/// Error recovered while parsing an individual record.
///
/// Recorded for visibility on the job; never fatal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordError {
    pub host: String,
    pub record_index: usize,
    pub message: String,
}

/// Result of parsing a scan report.
#[derive(Debug, Default)]
pub struct ParseOutcome {
    pub records: Vec<RawFinding>,
    pub errors: Vec<RecordError>,
    pub scanner_version: Option<String>,
}

/// Fatal parse failures that terminate the import job.
#[derive(Debug, thiserror::Error)]
pub enum ParseFailure {
    /// Container unreadable (broken XML, truncated file, not XML at all).
    #[error("malformed scan input: {0}")]
    MalformedInput(String),

    /// Container readable but the dialect is not the declared scanner's.
    #[error("unsupported scanner format: {0}")]
    UnsupportedFormat(String),
}

/// Trait for pluggable scanner report parsers.
pub trait ScanParser: Send + Sync {
    /// Parse a raw report into per-finding records plus recovered record errors.
    fn parse(&self, data: &[u8]) -> Result<ParseOutcome, ParseFailure>;

    /// The scanner dialect this parser handles.
    fn scanner(&self) -> ScannerKind;

    /// Map a dialect severity label onto the canonical scale.
    ///
    /// Total: every input maps to exactly one canonical value; unknown labels
    /// map to `info`.
    fn map_severity(&self, raw: &str) -> Severity;
}

/// Select the parser implementation for a declared scanner kind.
pub fn parser_for(kind: ScannerKind) -> Box<dyn ScanParser> {
    match kind {
        ScannerKind::Nessus => Box::new(nessus::NessusParser::new()),
        ScannerKind::Openvas => Box::new(openvas::OpenvasParser::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scanner_kind_display() {
        assert_eq!(ScannerKind::Nessus.to_string(), "nessus");
        assert_eq!(ScannerKind::Openvas.to_string(), "openvas");
    }

    #[test]
    fn scanner_kind_deserialization() {
        let k: ScannerKind = serde_json::from_str("\"nessus\"").unwrap();
        assert_eq!(k, ScannerKind::Nessus);
        let k: ScannerKind = serde_json::from_str("\"openvas\"").unwrap();
        assert_eq!(k, ScannerKind::Openvas);
    }

    #[test]
    fn parser_dispatch_matches_kind() {
        assert_eq!(
            parser_for(ScannerKind::Nessus).scanner(),
            ScannerKind::Nessus
        );
        assert_eq!(
            parser_for(ScannerKind::Openvas).scanner(),
            ScannerKind::Openvas
        );
    }

    #[test]
    fn record_error_serialization() {
        let err = RecordError {
            host: "10.0.0.5".to_string(),
            record_index: 3,
            message: "missing plugin id".to_string(),
        };
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["host"], "10.0.0.5");
        assert_eq!(json["record_index"], 3);
    }
}
