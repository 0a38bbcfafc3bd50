//! Nessus (.nessus v2) report parser.
//!
//! Streams `NessusClientData_v2` documents with the quick-xml event reader.
//! Host identity comes from `HostProperties` tags (`host-ip`, `host-fqdn`,
//! `asset-tag`, `operating-system`); findings come from `ReportItem` elements.
//! Severity is Nessus's numeric 0-4 scale.

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::models::finding::Severity;
use crate::parsers::{
    ParseFailure, ParseOutcome, RawFinding, RawHost, RecordError, ScanParser, ScannerKind,
};

/// Parser for the Nessus v2 XML export format.
#[derive(Debug, Default)]
pub struct NessusParser;

impl NessusParser {
    pub fn new() -> Self {
        Self
    }
}

impl ScanParser for NessusParser {
    fn parse(&self, data: &[u8]) -> Result<ParseOutcome, ParseFailure> {
        let mut reader = Reader::from_reader(data);
        reader.config_mut().trim_text(true);

        let mut outcome = ParseOutcome::default();
        let mut buf = Vec::new();

        let mut root_seen = false;
        let mut current_host: Option<RawHost> = None;
        let mut current_item: Option<ItemState> = None;
        let mut current_element = String::new();
        // Set while inside HostProperties: the name attribute of the open tag.
        let mut host_tag: Option<String> = None;
        let mut record_index = 0usize;

        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                    let name = String::from_utf8_lossy(e.name().as_ref()).to_string();

                    if !root_seen {
                        if name != "NessusClientData_v2" {
                            return Err(ParseFailure::UnsupportedFormat(format!(
                                "expected NessusClientData_v2 root, found <{name}>"
                            )));
                        }
                        root_seen = true;
                        buf.clear();
                        continue;
                    }

                    match name.as_str() {
                        "ReportHost" => {
                            let mut host = RawHost::default();
                            for attr in e.attributes().filter_map(|a| a.ok()) {
                                if attr.key.as_ref() == b"name" {
                                    if let Ok(value) = attr.unescape_value() {
                                        host.name = value.to_string();
                                    }
                                }
                            }
                            current_host = Some(host);
                        }
                        "tag" if current_host.is_some() && current_item.is_none() => {
                            host_tag = None;
                            for attr in e.attributes().filter_map(|a| a.ok()) {
                                if attr.key.as_ref() == b"name" {
                                    if let Ok(value) = attr.unescape_value() {
                                        host_tag = Some(value.to_string());
                                    }
                                }
                            }
                        }
                        "ReportItem" => {
                            let mut item = ItemState::default();
                            for attr in e.attributes().filter_map(|a| a.ok()) {
                                let key =
                                    String::from_utf8_lossy(attr.key.as_ref()).to_string();
                                if let Ok(value) = attr.unescape_value() {
                                    match key.as_str() {
                                        "port" => item.port = value.parse().ok(),
                                        "svc_name" => item.service = Some(value.to_string()),
                                        "protocol" => item.protocol = Some(value.to_string()),
                                        "severity" => item.severity_raw = value.to_string(),
                                        "pluginID" => item.plugin_id = value.to_string(),
                                        "pluginName" => item.plugin_name = value.to_string(),
                                        _ => {}
                                    }
                                }
                            }
                            current_item = Some(item);
                        }
                        _ => {}
                    }
                    current_element = name;
                }
                Ok(Event::End(e)) => {
                    let name = String::from_utf8_lossy(e.name().as_ref()).to_string();

                    match name.as_str() {
                        "ReportItem" => {
                            if let (Some(host), Some(item)) =
                                (&current_host, current_item.take())
                            {
                                match self.finish_item(host, item, record_index) {
                                    Ok(finding) => outcome.records.push(finding),
                                    Err(err) => outcome.errors.push(err),
                                }
                                record_index += 1;
                            }
                        }
                        "ReportHost" => current_host = None,
                        "tag" => host_tag = None,
                        _ => {}
                    }
                    current_element.clear();
                }
                Ok(Event::Text(e)) => {
                    let decoded = e.decode().unwrap_or_default();
                    let text = quick_xml::escape::unescape(&decoded)
                        .unwrap_or_default()
                        .to_string();
                    apply_text(
                        &mut current_item,
                        &mut current_host,
                        host_tag.as_deref(),
                        &current_element,
                        text,
                    );
                }
                Ok(Event::CData(e)) => {
                    let text = String::from_utf8_lossy(&e.into_inner()).to_string();
                    apply_text(
                        &mut current_item,
                        &mut current_host,
                        host_tag.as_deref(),
                        &current_element,
                        text,
                    );
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
        ScannerKind::Nessus
    }

    fn map_severity(&self, raw: &str) -> Severity {
        match raw.trim().to_ascii_lowercase().as_str() {
            "4" | "critical" => Severity::Critical,
            "3" | "high" => Severity::High,
            "2" | "medium" => Severity::Medium,
            "1" | "low" => Severity::Low,
            _ => Severity::Info,
        }
    }
}

impl NessusParser {
    /// Validate and convert a completed `ReportItem` into a raw finding.
    fn finish_item(
        &self,
        host: &RawHost,
        item: ItemState,
        record_index: usize,
    ) -> Result<RawFinding, RecordError> {
        if item.plugin_id.is_empty() {
            return Err(RecordError {
                host: host.name.clone(),
                record_index,
                message: "ReportItem missing pluginID attribute".to_string(),
            });
        }

        let severity = self.map_severity(&item.severity_raw);

        // Port 0 marks host-level plugins with no network endpoint.
        let port = item.port.filter(|p| *p > 0);

        let description = item
            .description
            .or_else(|| item.synopsis.clone())
            .unwrap_or_default();

        Ok(RawFinding {
            host: host.clone(),
            plugin_id: item.plugin_id,
            plugin_name: item.plugin_name,
            severity,
            original_severity: item.severity_raw,
            port,
            protocol: item.protocol,
            service: item.service,
            cve_ids: item.cve_ids,
            description,
            synopsis: item.synopsis,
            solution: item.solution,
            proof: item.proof,
        })
    }
}

/// Route element text into the open `ReportItem` or `HostProperties` tag.
fn apply_text(
    current_item: &mut Option<ItemState>,
    current_host: &mut Option<RawHost>,
    host_tag: Option<&str>,
    current_element: &str,
    text: String,
) {
    if let Some(item) = current_item.as_mut() {
        match current_element {
            "description" => item.description = Some(text),
            "synopsis" => item.synopsis = Some(text),
            "solution" => item.solution = Some(text),
            "plugin_output" => item.proof = Some(text),
            "cve" => item.cve_ids.push(text),
            _ => {}
        }
    } else if let (Some(host), Some(tag), "tag") = (current_host.as_mut(), host_tag, current_element)
    {
        match tag {
            "host-ip" => host.ip = Some(text),
            "host-fqdn" => host.hostname = Some(text),
            "asset-tag" => host.asset_tag = Some(text),
            "operating-system" => host.operating_system = Some(text),
            _ => {}
        }
    }
}

/// Accumulator for one `ReportItem` while its child elements stream by.
#[derive(Debug, Default)]
struct ItemState {
    plugin_id: String,
    plugin_name: String,
    severity_raw: String,
    port: Option<i32>,
    protocol: Option<String>,
    service: Option<String>,
    cve_ids: Vec<String>,
    description: Option<String>,
    synopsis: Option<String>,
    solution: Option<String>,
    proof: Option<String>,
}
