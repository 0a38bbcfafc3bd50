//! OpenVAS / Greenbone XML report parser.
//!
//! Streams `<report>` documents (bare or wrapped in `get_reports_response`).
//! Findings come from `<result>` elements; host identity from the `<host>`
//! element and its `<hostname>` child. Severity uses the threat label with a
//! CVSS-score fallback for reports that only carry the numeric value.

use quick_xml::events::Event;
use quick_xml::Reader;
use regex::Regex;

use crate::models::finding::Severity;
use crate::parsers::{
    ParseFailure, ParseOutcome, RawFinding, RawHost, RecordError, ScanParser, ScannerKind,
};

/// Roots this dialect accepts.
const ACCEPTED_ROOTS: [&str; 2] = ["report", "get_reports_response"];

/// Parser for OpenVAS/Greenbone XML report exports.
#[derive(Debug, Default)]
pub struct OpenvasParser;

impl OpenvasParser {
    pub fn new() -> Self {
        Self
    }
}

impl ScanParser for OpenvasParser {
    fn parse(&self, data: &[u8]) -> Result<ParseOutcome, ParseFailure> {
        let mut reader = Reader::from_reader(data);
        reader.config_mut().trim_text(true);

        let cve_regex = Regex::new(r"CVE-\d{4}-\d{4,}")
            .map_err(|e| ParseFailure::MalformedInput(format!("internal regex error: {e}")))?;

        let mut outcome = ParseOutcome::default();
        let mut buf = Vec::new();

        let mut root_seen = false;
        let mut current: Option<ResultState> = None;
        let mut current_element = String::new();
        let mut in_nvt = false;
        let mut record_index = 0usize;

        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                    let name = String::from_utf8_lossy(e.name().as_ref()).to_string();

                    if !root_seen {
                        if !ACCEPTED_ROOTS.contains(&name.as_str()) {
                            return Err(ParseFailure::UnsupportedFormat(format!(
                                "expected an OpenVAS report root, found <{name}>"
                            )));
                        }
                        root_seen = true;
                        buf.clear();
                        continue;
                    }

                    match name.as_str() {
                        "result" => {
                            current = Some(ResultState::default());
                        }
                        "nvt" if current.is_some() => {
                            in_nvt = true;
                            for attr in e.attributes().filter_map(|a| a.ok()) {
                                if attr.key.as_ref() == b"oid" {
                                    if let Ok(value) = attr.unescape_value() {
                                        if let Some(state) = current.as_mut() {
                                            state.nvt_oid = value.to_string();
                                        }
                                    }
                                }
                            }
                        }
                        "ref" if in_nvt => {
                            let mut ref_type = String::new();
                            let mut ref_id = String::new();
                            for attr in e.attributes().filter_map(|a| a.ok()) {
                                if let Ok(value) = attr.unescape_value() {
                                    match attr.key.as_ref() {
                                        b"type" => ref_type = value.to_string(),
                                        b"id" => ref_id = value.to_string(),
                                        _ => {}
                                    }
                                }
                            }
                            if ref_type == "cve" && !ref_id.is_empty() {
                                if let Some(state) = current.as_mut() {
                                    state.cve_ids.push(ref_id);
                                }
                            }
                        }
                        _ => {}
                    }
                    current_element = name;
                }
                Ok(Event::End(e)) => {
                    let name = String::from_utf8_lossy(e.name().as_ref()).to_string();

                    match name.as_str() {
                        "result" => {
                            if let Some(state) = current.take() {
                                match self.finish_result(state, record_index, &cve_regex) {
                                    Ok(finding) => outcome.records.push(finding),
                                    Err(err) => outcome.errors.push(err),
                                }
                                record_index += 1;
                            }
                        }
                        "nvt" => in_nvt = false,
                        _ => {}
                    }
                    current_element.clear();
                }
                Ok(Event::Text(e)) => {
                    let decoded = e.decode().unwrap_or_default();
                    let text = quick_xml::escape::unescape(&decoded)
                        .unwrap_or_default()
                        .to_string();

                    if let Some(state) = current.as_mut() {
                        match current_element.as_str() {
                            "host" => state.host = text,
                            "hostname" => state.hostname = Some(text),
                            "asset" => {}
                            "port" => state.port_raw = Some(text),
                            "name" if in_nvt => state.nvt_name = text,
                            "name" if state.name.is_empty() => state.name = text,
                            "threat" => state.threat = Some(text),
                            "severity" => state.cvss = text.parse().ok(),
                            "description" => state.description = Some(text),
                            "solution" => state.solution = Some(text),
                            "tags" if in_nvt => state.tags = Some(text),
                            "cve" => state.legacy_cves = Some(text),
                            _ => {}
                        }
                    } else if current_element == "omp_version" || current_element == "version" {
                        outcome.scanner_version = Some(text);
                    }
                }
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(e) => {
                    return Err(ParseFailure::MalformedInput(format!(
                        "XML error at byte {}: {e}",
                        reader.buffer_position()
                    )));
                }
            }
            buf.clear();
        }

        if !root_seen {
            return Err(ParseFailure::MalformedInput(
                "document contains no XML elements".to_string(),
            ));
        }

        Ok(outcome)
    }

    fn scanner(&self) -> ScannerKind {
        ScannerKind::Openvas
    }

    fn map_severity(&self, raw: &str) -> Severity {
        match raw.trim().to_ascii_lowercase().as_str() {
            "critical" => Severity::Critical,
            "high" | "alarm" => Severity::High,
            "medium" => Severity::Medium,
            "low" => Severity::Low,
            _ => Severity::Info,
        }
    }
}

impl OpenvasParser {
    /// Validate and convert a completed `<result>` into a raw finding.
    fn finish_result(
        &self,
        state: ResultState,
        record_index: usize,
        cve_regex: &Regex,
    ) -> Result<RawFinding, RecordError> {
        if state.nvt_oid.is_empty() {
            return Err(RecordError {
                host: state.host.clone(),
                record_index,
                message: "result missing nvt oid".to_string(),
            });
        }
        if state.host.is_empty() {
            return Err(RecordError {
                host: String::new(),
                record_index,
                message: "result missing host".to_string(),
            });
        }

        // Threat label when present, CVSS band otherwise. "Log" and unknown
        // labels fall back to the numeric score before landing on info.
        let (severity, original_severity) = match state.threat.as_deref() {
            Some(threat) => {
                let mapped = self.map_severity(threat);
                if mapped == Severity::Info {
                    if let Some(score) = state.cvss.filter(|s| *s > 0.0) {
                        (Severity::from_cvss(score), threat.to_string())
                    } else {
                        (mapped, threat.to_string())
                    }
                } else {
                    (mapped, threat.to_string())
                }
            }
            None => match state.cvss {
                Some(score) => (Severity::from_cvss(score), format!("{score:.1}")),
                None => (Severity::Info, String::new()),
            },
        };

        // "443/tcp", "general/tcp", or a bare number.
        let (port, protocol) = match state.port_raw.as_deref() {
            Some(raw) => {
                let mut parts = raw.splitn(2, '/');
                let port = parts.next().and_then(|p| p.parse::<i32>().ok());
                let protocol = parts.next().map(|p| p.to_string());
                (port.filter(|p| *p > 0), protocol)
            }
            None => (None, None),
        };

        // CVEs from <ref type="cve"> entries, legacy <cve> lists, and NVT tags.
        let mut cve_ids = state.cve_ids;
        for blob in [state.legacy_cves.as_deref(), state.tags.as_deref()]
            .into_iter()
            .flatten()
        {
            for m in cve_regex.find_iter(blob) {
                cve_ids.push(m.as_str().to_string());
            }
        }
        cve_ids.sort();
        cve_ids.dedup();

        let solution = state.solution.or_else(|| {
            state
                .tags
                .as_deref()
                .and_then(|tags| extract_tag_field(tags, "solution"))
        });

        let title = if state.nvt_name.is_empty() {
            state.name.clone()
        } else {
            state.nvt_name.clone()
        };

        let host = RawHost {
            name: state.host.clone(),
            ip: Some(state.host.clone()),
            hostname: state.hostname,
            asset_tag: None,
            operating_system: None,
        };

        Ok(RawFinding {
            host,
            plugin_id: state.nvt_oid,
            plugin_name: title,
            severity,
            original_severity,
            port,
            protocol,
            service: None,
            cve_ids,
            description: state.description.unwrap_or_default(),
            synopsis: None,
            solution,
            proof: None,
        })
    }
}

/// Pull one `key=value` field out of an NVT pipe-separated tags string.
fn extract_tag_field(tags: &str, key: &str) -> Option<String> {
    tags.split('|').find_map(|part| {
        part.strip_prefix(key)
            .and_then(|rest| rest.strip_prefix('='))
            .map(|v| v.to_string())
    })
}

/// Accumulator for one `<result>` while its child elements stream by.
#[derive(Debug, Default)]
struct ResultState {
    name: String,
    host: String,
    hostname: Option<String>,
    port_raw: Option<String>,
    nvt_oid: String,
    nvt_name: String,
    threat: Option<String>,
    cvss: Option<f32>,
    description: Option<String>,
    solution: Option<String>,
    tags: Option<String>,
    cve_ids: Vec<String>,
    legacy_cves: Option<String>,
}
