//! Proxy sources and the formats they publish in
//!
//! A source is one URL plus a [`SourceFormat`]. Fetching is shared; each
//! format only differs in how the body is turned into candidates. Every
//! record a format looks at is either emitted as a candidate or counted as
//! invalid, so per-source statistics always add up.

use crate::error::{Error, Result};
use crate::proxy::models::{CandidateEndpoint, ProtocolHint, ProxyType};
use crate::proxy::parser::ProxyParser;
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::time::Duration;

/// Protocol family a source is configured for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ScrapeMethod {
    Http,
    Https,
    Socks4,
    Socks5,
    /// Mixed SOCKS4/SOCKS5 lists
    Socks,
}

impl ScrapeMethod {
    /// Hint attached to endpoints that carry no protocol of their own
    pub fn hint(&self) -> ProtocolHint {
        match self {
            ScrapeMethod::Http => ProtocolHint::Http,
            ScrapeMethod::Https => ProtocolHint::Https,
            ScrapeMethod::Socks4 => ProtocolHint::Socks4,
            ScrapeMethod::Socks5 => ProtocolHint::Socks5,
            ScrapeMethod::Socks => ProtocolHint::Unknown,
        }
    }

    /// Methods a user request for `self` covers
    pub fn expand(&self) -> Vec<ScrapeMethod> {
        match self {
            ScrapeMethod::Socks => vec![ScrapeMethod::Socks, ScrapeMethod::Socks4, ScrapeMethod::Socks5],
            other => vec![*other],
        }
    }

    /// Whether an endpoint explicitly tagged `scheme` belongs to this method
    pub fn accepts(&self, scheme: ProxyType) -> bool {
        match self {
            ScrapeMethod::Http => scheme == ProxyType::Http,
            ScrapeMethod::Https => scheme == ProxyType::Https,
            ScrapeMethod::Socks4 => scheme == ProxyType::Socks4,
            ScrapeMethod::Socks5 => scheme == ProxyType::Socks5,
            ScrapeMethod::Socks => matches!(scheme, ProxyType::Socks4 | ProxyType::Socks5),
        }
    }
}

impl fmt::Display for ScrapeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScrapeMethod::Http => "http",
            ScrapeMethod::Https => "https",
            ScrapeMethod::Socks4 => "socks4",
            ScrapeMethod::Socks5 => "socks5",
            ScrapeMethod::Socks => "socks",
        };
        f.write_str(name)
    }
}

/// How a source lays out its endpoints
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceFormat {
    /// Newline-delimited `host:port` tokens
    PlainText,
    /// Rows of an HTML table, IP and port in fixed columns
    HtmlTable {
        table_selector: String,
        ip_column: usize,
        port_column: usize,
    },
    /// Repeated block elements with IP and port in child cells or data attributes
    HtmlDiv {
        row_selector: String,
        cell_selector: String,
    },
    /// JSON document with the endpoint list at a field path
    JsonApi { list_path: Vec<String> },
    /// Raw file from a code-hosting site; lines may carry a `scheme://` tag
    RawFile,
}

impl SourceFormat {
    pub fn html_table(table_selector: &str) -> Self {
        SourceFormat::HtmlTable {
            table_selector: table_selector.to_string(),
            ip_column: 0,
            port_column: 1,
        }
    }

    pub fn html_div(row_selector: &str, cell_selector: &str) -> Self {
        SourceFormat::HtmlDiv {
            row_selector: row_selector.to_string(),
            cell_selector: cell_selector.to_string(),
        }
    }

    pub fn json_api(list_path: &[&str]) -> Self {
        SourceFormat::JsonApi {
            list_path: list_path.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SourceFormat::PlainText => "plain-text",
            SourceFormat::HtmlTable { .. } => "html-table",
            SourceFormat::HtmlDiv { .. } => "html-div",
            SourceFormat::JsonApi { .. } => "json-api",
            SourceFormat::RawFile => "raw-file",
        }
    }
}

/// Candidates produced by one source before filtering
#[derive(Debug, Clone, Default)]
pub struct ParsedSource {
    pub candidates: Vec<CandidateEndpoint>,
    /// Records that could not be read as an endpoint
    pub invalid_format: usize,
}

impl ParsedSource {
    fn push(&mut self, host: &str, port: &str, hint: ProtocolHint, source_id: &str) {
        let host = host.trim().trim_matches('\u{a0}');
        match port.trim().trim_matches('\u{a0}').parse::<u16>() {
            Ok(port) if !host.is_empty() => {
                self.candidates
                    .push(CandidateEndpoint::new(host, port, hint, source_id));
            }
            _ => {
                tracing::debug!(source = source_id, host, port, "skipping record without usable host/port");
                self.invalid_format += 1;
            }
        }
    }

    /// Records looked at: emitted plus invalid
    pub fn records(&self) -> usize {
        self.candidates.len() + self.invalid_format
    }
}

/// One external site, API or repository
#[derive(Debug, Clone)]
pub struct ProxySource {
    /// Unique id, `<site>/<protocol>`
    pub id: String,
    pub url: String,
    pub method: ScrapeMethod,
    pub format: SourceFormat,
    /// Fetch deadline override for slow sources
    pub timeout: Option<Duration>,
}

impl ProxySource {
    pub fn new(id: &str, url: &str, method: ScrapeMethod, format: SourceFormat) -> Self {
        Self {
            id: id.to_string(),
            url: url.to_string(),
            method,
            format,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Fetch the source and parse its body
    pub async fn fetch(&self, client: &Client) -> Result<ParsedSource> {
        let response = client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| Error::source_fetch(&self.id, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::source_fetch(&self.id, format!("HTTP status: {}", status)));
        }

        let body = response
            .text()
            .await
            .map_err(|e| Error::source_fetch(&self.id, e))?;
        self.parse(&body)
    }

    /// Turn a fetched body into candidates according to the source format
    pub fn parse(&self, body: &str) -> Result<ParsedSource> {
        match &self.format {
            SourceFormat::PlainText => Ok(self.parse_plain_text(body)),
            SourceFormat::RawFile => Ok(self.parse_raw_file(body)),
            SourceFormat::HtmlTable {
                table_selector,
                ip_column,
                port_column,
            } => self.parse_html_table(body, table_selector, *ip_column, *port_column),
            SourceFormat::HtmlDiv {
                row_selector,
                cell_selector,
            } => self.parse_html_div(body, row_selector, cell_selector),
            SourceFormat::JsonApi { list_path } => self.parse_json(body, list_path),
        }
    }

    fn parse_plain_text(&self, body: &str) -> ParsedSource {
        let (candidates, invalid_format) =
            ProxyParser::parse_string(body, self.method.hint(), &self.id);
        ParsedSource {
            candidates,
            invalid_format,
        }
    }

    fn parse_raw_file(&self, body: &str) -> ParsedSource {
        let mut parsed = ParsedSource::default();
        let mut off_protocol = 0usize;

        for line in body.lines() {
            match ProxyParser::parse_line(line) {
                None => {}
                Some(Ok(line)) => match line.scheme {
                    Some(scheme) if !self.method.accepts(scheme) => off_protocol += 1,
                    scheme => {
                        let hint = scheme.map(ProtocolHint::from).unwrap_or(self.method.hint());
                        parsed
                            .candidates
                            .push(CandidateEndpoint::new(line.host, line.port, hint, &self.id));
                    }
                },
                Some(Err(e)) => {
                    tracing::debug!(source = %self.id, "skipping line: {}", e);
                    parsed.invalid_format += 1;
                }
            }
        }

        if off_protocol > 0 {
            tracing::debug!(source = %self.id, off_protocol, "ignored lines tagged with another protocol");
        }
        parsed
    }

    fn parse_html_table(
        &self,
        body: &str,
        table_selector: &str,
        ip_column: usize,
        port_column: usize,
    ) -> Result<ParsedSource> {
        let document = Html::parse_document(body);
        let table_sel = selector(table_selector)?;
        let row_sel = selector("tr")?;
        let header_sel = selector("th")?;
        let cell_sel = selector("td")?;

        let table = document
            .select(&table_sel)
            .next()
            .ok_or_else(|| Error::source_fetch(&self.id, "no proxy table found"))?;

        let headers: Vec<String> = table
            .select(&header_sel)
            .map(|th| element_text(&th).to_lowercase())
            .collect();
        let https_column = headers.iter().position(|h| h == "https");
        let protocol_column = headers
            .iter()
            .position(|h| matches!(h.as_str(), "version" | "protocol" | "type"));

        let mut parsed = ParsedSource::default();
        for row in table.select(&row_sel) {
            let cells: Vec<String> = row.select(&cell_sel).map(|td| element_text(&td)).collect();
            if cells.is_empty() {
                continue;
            }

            let hint = self.row_hint(&cells, https_column, protocol_column);
            match (cells.get(ip_column), cells.get(port_column)) {
                (Some(ip), Some(port)) => parsed.push(ip, port, hint, &self.id),
                _ => parsed.invalid_format += 1,
            }
        }
        Ok(parsed)
    }

    fn row_hint(
        &self,
        cells: &[String],
        https_column: Option<usize>,
        protocol_column: Option<usize>,
    ) -> ProtocolHint {
        if let Some(text) = protocol_column.and_then(|i| cells.get(i)) {
            let guessed = ProtocolHint::guess(text);
            if guessed != ProtocolHint::Unknown {
                return guessed;
            }
        }
        if let Some(flag) = https_column.and_then(|i| cells.get(i)) {
            return if flag.eq_ignore_ascii_case("yes") {
                ProtocolHint::Https
            } else {
                ProtocolHint::Http
            };
        }
        self.method.hint()
    }

    fn parse_html_div(&self, body: &str, row_selector: &str, cell_selector: &str) -> Result<ParsedSource> {
        let document = Html::parse_document(body);
        let row_sel = selector(row_selector)?;
        let cell_sel = selector(cell_selector)?;

        let mut parsed = ParsedSource::default();
        let mut rows = 0usize;
        for row in document.select(&row_sel) {
            rows += 1;
            let element = row.value();
            if let (Some(ip), Some(port)) = (element.attr("data-ip"), element.attr("data-port")) {
                let hint = element
                    .attr("data-protocol")
                    .map(ProtocolHint::guess)
                    .filter(|h| *h != ProtocolHint::Unknown)
                    .unwrap_or(self.method.hint());
                parsed.push(ip, port, hint, &self.id);
                continue;
            }

            let cells: Vec<String> = row.select(&cell_sel).map(|c| element_text(&c)).collect();
            match cells.as_slice() {
                [ip, port, rest @ ..] => {
                    let hint = rest
                        .iter()
                        .map(|c| ProtocolHint::guess(c))
                        .find(|h| *h != ProtocolHint::Unknown)
                        .unwrap_or(self.method.hint());
                    parsed.push(ip, port, hint, &self.id);
                }
                _ => parsed.invalid_format += 1,
            }
        }

        if rows == 0 {
            return Err(Error::source_fetch(&self.id, "no proxy cards found"));
        }
        Ok(parsed)
    }

    fn parse_json(&self, body: &str, list_path: &[String]) -> Result<ParsedSource> {
        let document: Value =
            serde_json::from_str(body).map_err(|e| Error::source_fetch(&self.id, e))?;

        let mut node = &document;
        for key in list_path {
            node = node.get(key.as_str()).ok_or_else(|| {
                Error::source_fetch(&self.id, format!("missing field {:?} in response", key))
            })?;
        }
        let items = node
            .as_array()
            .ok_or_else(|| Error::source_fetch(&self.id, "endpoint list is not an array"))?;

        let mut parsed = ParsedSource::default();
        for item in items {
            let ip = item.get("ip").and_then(Value::as_str);
            let port = item.get("port").and_then(json_port);
            match (ip, port) {
                (Some(ip), Some(port)) => {
                    let hint = json_hint(item).unwrap_or(self.method.hint());
                    parsed.push(ip, &port, hint, &self.id);
                }
                _ => parsed.invalid_format += 1,
            }
        }
        Ok(parsed)
    }
}

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| Error::configuration(format!("bad selector {:?}: {:?}", css, e)))
}

fn element_text(element: &ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}

fn json_port(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn json_hint(item: &Value) -> Option<ProtocolHint> {
    let text = match item.get("protocols").or_else(|| item.get("protocol"))? {
        Value::Array(values) => values.first()?.as_str()?.to_string(),
        Value::String(s) => s.clone(),
        _ => return None,
    };
    Some(ProtocolHint::guess(&text)).filter(|h| *h != ProtocolHint::Unknown)
}
