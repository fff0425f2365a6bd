//! Proxy parser module for the `host:port` line grammar and list files

use crate::error::{Error, Result};
use crate::proxy::models::{CandidateEndpoint, ProtocolHint, ProxyType};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fs;
use std::path::Path;

/// Optional `scheme://` prefix on a list line
static SCHEME_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?i)([a-z][a-z0-9+.-]*)://(.*)$").expect("Invalid scheme regex")
});

/// One meaningful line of a proxy list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedLine {
    pub host: String,
    pub port: u16,
    /// Protocol named by a `scheme://` prefix, if any
    pub scheme: Option<ProxyType>,
}

/// Proxy parser for proxy list lines and files
pub struct ProxyParser;

impl ProxyParser {
    /// Parse a single list line.
    ///
    /// Returns `None` for blank lines and `#` comments. Otherwise the first
    /// whitespace-separated token must be one of:
    /// - HOST:PORT
    /// - [IPV6]:PORT
    /// - scheme://HOST:PORT (http, https, socks4, socks5)
    pub fn parse_line(line: &str) -> Option<Result<ParsedLine>> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return None;
        }
        let token = line.split_whitespace().next().unwrap_or(line);
        Some(Self::parse_token(token))
    }

    fn parse_token(token: &str) -> Result<ParsedLine> {
        let (scheme, rest) = match SCHEME_REGEX.captures(token) {
            Some(caps) => {
                let scheme = caps[1]
                    .parse::<ProxyType>()
                    .map_err(|e| Error::invalid_format(token, e))?;
                (Some(scheme), caps.get(2).map_or("", |m| m.as_str()))
            }
            None => (None, token),
        };

        let rest = rest.trim_end_matches('/');
        if rest.contains('@') {
            return Err(Error::invalid_format(token, "credentials are not supported"));
        }

        let (host, port) = Self::split_host_port(rest)
            .ok_or_else(|| Error::invalid_format(token, "expected HOST:PORT"))?;

        let port: u16 = port
            .parse()
            .map_err(|_| Error::invalid_format(token, "port is not a number in 0-65535"))?;

        Ok(ParsedLine {
            host: host.to_string(),
            port,
            scheme,
        })
    }

    fn split_host_port(s: &str) -> Option<(&str, &str)> {
        if let Some(bracketed) = s.strip_prefix('[') {
            let (host, rest) = bracketed.split_once(']')?;
            let port = rest.strip_prefix(':')?;
            return (!host.is_empty()).then_some((host, port));
        }

        let (host, port) = s.rsplit_once(':')?;
        if host.is_empty() || host.contains(':') || port.is_empty() {
            return None;
        }
        if !port.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        Some((host, port))
    }

    /// Parse a list body into candidates, skipping lines that fail the grammar.
    ///
    /// Returns the candidates and the number of skipped lines.
    pub fn parse_string(
        content: &str,
        hint: ProtocolHint,
        source_id: &str,
    ) -> (Vec<CandidateEndpoint>, usize) {
        let mut candidates = Vec::new();
        let mut skipped = 0;

        for (number, line) in content.lines().enumerate() {
            match Self::parse_line(line) {
                None => {}
                Some(Ok(parsed)) => {
                    let hint = parsed.scheme.map(ProtocolHint::from).unwrap_or(hint);
                    candidates.push(CandidateEndpoint::new(parsed.host, parsed.port, hint, source_id));
                }
                Some(Err(e)) => {
                    tracing::debug!(line = number + 1, "skipping list line: {}", e);
                    skipped += 1;
                }
            }
        }

        (candidates, skipped)
    }

    /// Load candidates from a list file. Lines failing the grammar are ignored.
    pub fn parse_file<P: AsRef<Path>>(
        path: P,
        hint: ProtocolHint,
    ) -> Result<(Vec<CandidateEndpoint>, usize)> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let source_id = path.display().to_string();
        Ok(Self::parse_string(&content, hint, &source_id))
    }

    /// Save endpoints one `host:port` per line, sorted, with a trailing newline
    pub fn save_to_file<P: AsRef<Path>>(endpoints: &[CandidateEndpoint], path: P) -> Result<()> {
        let mut lines: Vec<String> = endpoints.iter().map(|e| e.to_simple_string()).collect();
        lines.sort();
        lines.dedup();

        let mut content = lines.join("\n");
        if !content.is_empty() {
            content.push('\n');
        }

        fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> ParsedLine {
        ProxyParser::parse_line(line).unwrap().unwrap()
    }

    #[test]
    fn test_parse_simple_format() {
        let parsed = parse("192.168.1.1:8080");
        assert_eq!(parsed.host, "192.168.1.1");
        assert_eq!(parsed.port, 8080);
        assert!(parsed.scheme.is_none());
    }

    #[test]
    fn test_parse_url_format() {
        let parsed = parse("socks5://1.2.3.4:1080");
        assert_eq!(parsed.host, "1.2.3.4");
        assert_eq!(parsed.port, 1080);
        assert_eq!(parsed.scheme, Some(ProxyType::Socks5));

        let parsed = parse("HTTP://1.2.3.4:80/");
        assert_eq!(parsed.scheme, Some(ProxyType::Http));
    }

    #[test]
    fn test_parse_trailing_columns() {
        let parsed = parse("1.2.3.4:3128 US-H-S +");
        assert_eq!(parsed.host, "1.2.3.4");
        assert_eq!(parsed.port, 3128);
    }

    #[test]
    fn test_parse_ipv6_and_hostname() {
        let parsed = parse("[2001:db8::1]:8080");
        assert_eq!(parsed.host, "2001:db8::1");
        assert_eq!(parsed.port, 8080);

        let parsed = parse("proxy.example.com:3128");
        assert_eq!(parsed.host, "proxy.example.com");
    }

    #[test]
    fn test_parse_empty_and_comment_lines() {
        assert!(ProxyParser::parse_line("").is_none());
        assert!(ProxyParser::parse_line("   ").is_none());
        assert!(ProxyParser::parse_line("# This is a comment").is_none());
    }

    #[test]
    fn test_parse_invalid_format() {
        for line in [
            "not-a-line",
            "192.168.1.1",
            "192.168.1.1:abc",
            "192.168.1.1:70000",
            "2001:db8::1:8080",
            "ftp://1.2.3.4:21",
            "user:pass@1.2.3.4:8080",
            ":8080",
        ] {
            assert!(
                matches!(ProxyParser::parse_line(line), Some(Err(_))),
                "{} should be rejected",
                line
            );
        }
    }

    #[test]
    fn test_parse_string_counts_skipped_lines() {
        let content = "1.2.3.4:8080\n10.0.0.5:3128\nnot-a-line\n\n# comment\n5.6.7.8:80";
        let (candidates, skipped) = ProxyParser::parse_string(content, ProtocolHint::Http, "test");
        assert_eq!(candidates.len(), 3);
        assert_eq!(skipped, 1);
        assert!(candidates.iter().all(|c| c.source_id == "test"));
        assert!(candidates.iter().all(|c| c.protocol_hint == ProtocolHint::Http));
    }

    #[test]
    fn test_parse_string_scheme_overrides_hint() {
        let (candidates, _) =
            ProxyParser::parse_string("socks4://1.2.3.4:1080", ProtocolHint::Http, "test");
        assert_eq!(candidates[0].protocol_hint, ProtocolHint::Socks4);
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("proxies.txt");
        let endpoints = vec![
            CandidateEndpoint::new("5.6.7.8", 80, ProtocolHint::Http, "a"),
            CandidateEndpoint::new("1.2.3.4", 8080, ProtocolHint::Http, "a"),
        ];

        ProxyParser::save_to_file(&endpoints, &path).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "1.2.3.4:8080\n5.6.7.8:80\n");

        let (loaded, skipped) = ProxyParser::parse_file(&path, ProtocolHint::Socks5).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(skipped, 0);
        assert_eq!(loaded[0].protocol_hint, ProtocolHint::Socks5);
    }

    #[test]
    fn test_save_empty_list() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.txt");
        ProxyParser::save_to_file(&[], &path).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "");
    }
}
