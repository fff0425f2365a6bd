//! Proxy data models

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Transport a proxy can be spoken to with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProxyType {
    #[default]
    Http,
    Https,
    Socks4,
    Socks5,
}

impl ProxyType {
    /// Every protocol the checker knows how to probe, in default fallback order
    pub const ALL: [ProxyType; 4] = [
        ProxyType::Http,
        ProxyType::Socks5,
        ProxyType::Socks4,
        ProxyType::Https,
    ];

    /// Scheme of a proxy URL for this transport. SOCKS targets are resolved
    /// by the proxy, not locally.
    pub fn proxy_scheme(&self) -> &'static str {
        match self {
            ProxyType::Http => "http",
            ProxyType::Https => "https",
            ProxyType::Socks4 => "socks4a",
            ProxyType::Socks5 => "socks5h",
        }
    }

    pub fn scheme(&self) -> &'static str {
        match self {
            ProxyType::Http => "http",
            ProxyType::Https => "https",
            ProxyType::Socks4 => "socks4",
            ProxyType::Socks5 => "socks5",
        }
    }
}

impl fmt::Display for ProxyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.scheme())
    }
}

impl FromStr for ProxyType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "http" => Ok(ProxyType::Http),
            "https" => Ok(ProxyType::Https),
            "socks4" | "socks4a" => Ok(ProxyType::Socks4),
            "socks5" | "socks5h" => Ok(ProxyType::Socks5),
            other => Err(format!(
                "Invalid proxy type: {}. Use: http, https, socks4, socks5",
                other
            )),
        }
    }
}

/// Protocol a source claims for an endpoint. Not verified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolHint {
    Http,
    Https,
    Socks4,
    Socks5,
    #[default]
    Unknown,
}

impl ProtocolHint {
    pub fn proxy_type(&self) -> Option<ProxyType> {
        match self {
            ProtocolHint::Http => Some(ProxyType::Http),
            ProtocolHint::Https => Some(ProxyType::Https),
            ProtocolHint::Socks4 => Some(ProxyType::Socks4),
            ProtocolHint::Socks5 => Some(ProxyType::Socks5),
            ProtocolHint::Unknown => None,
        }
    }

    /// Protocols to attempt for this hint: the hinted one first, then the rest
    pub fn probe_order(&self) -> Vec<ProxyType> {
        let hinted = self.proxy_type();
        hinted
            .into_iter()
            .chain(ProxyType::ALL.iter().copied().filter(|p| Some(*p) != hinted))
            .collect()
    }

    /// Best-effort hint from free text such as a table cell or a JSON field
    pub fn guess(text: &str) -> ProtocolHint {
        let text = text.trim().to_lowercase();
        if text.contains("socks5") {
            ProtocolHint::Socks5
        } else if text.contains("socks4") {
            ProtocolHint::Socks4
        } else if text.contains("https") {
            ProtocolHint::Https
        } else if text.contains("http") {
            ProtocolHint::Http
        } else {
            ProtocolHint::Unknown
        }
    }
}

impl From<ProxyType> for ProtocolHint {
    fn from(value: ProxyType) -> Self {
        match value {
            ProxyType::Http => ProtocolHint::Http,
            ProxyType::Https => ProtocolHint::Https,
            ProxyType::Socks4 => ProtocolHint::Socks4,
            ProxyType::Socks5 => ProtocolHint::Socks5,
        }
    }
}

impl fmt::Display for ProtocolHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.proxy_type() {
            Some(proxy_type) => write!(f, "{}", proxy_type),
            None => write!(f, "unknown"),
        }
    }
}

/// An unverified `host:port` pair claimed to operate as a proxy.
///
/// Identity is the `(host, port)` pair; the hint and the source are carried
/// for observability only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateEndpoint {
    pub host: String,
    pub port: u16,
    pub protocol_hint: ProtocolHint,
    pub source_id: String,
}

impl CandidateEndpoint {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        protocol_hint: ProtocolHint,
        source_id: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            protocol_hint,
            source_id: source_id.into(),
        }
    }

    /// Dedup key
    pub fn key(&self) -> (String, u16) {
        (self.host.to_ascii_lowercase(), self.port)
    }

    /// Get the proxy URL string for the given transport
    pub fn url(&self, proxy_type: ProxyType) -> String {
        if self.host.contains(':') {
            format!("{}://[{}]:{}", proxy_type.proxy_scheme(), self.host, self.port)
        } else {
            format!("{}://{}:{}", proxy_type.proxy_scheme(), self.host, self.port)
        }
    }

    /// Get the endpoint in HOST:PORT format
    pub fn to_simple_string(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl PartialEq for CandidateEndpoint {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for CandidateEndpoint {}

impl std::hash::Hash for CandidateEndpoint {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl fmt::Display for CandidateEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_simple_string())
    }
}

/// Terminal classification of one probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeOutcome {
    Alive,
    Timeout,
    ConnectionRefused,
    ProtocolError(String),
    HttpError(u16),
}

impl ProbeOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            ProbeOutcome::Alive => "alive",
            ProbeOutcome::Timeout => "timeout",
            ProbeOutcome::ConnectionRefused => "connection_refused",
            ProbeOutcome::ProtocolError(_) => "protocol_error",
            ProbeOutcome::HttpError(_) => "http_error",
        }
    }
}

impl fmt::Display for ProbeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeOutcome::ProtocolError(detail) => write!(f, "protocol_error ({})", detail),
            ProbeOutcome::HttpError(status) => write!(f, "http_error ({})", status),
            other => f.write_str(other.label()),
        }
    }
}

/// Detailed result of a proxy check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationResult {
    pub endpoint: CandidateEndpoint,
    pub outcome: ProbeOutcome,
    /// Present only when alive
    pub latency: Option<Duration>,
    /// Protocol the successful request went through
    pub verified_protocol: Option<ProxyType>,
    /// Protocols tried, in order
    pub attempted: Vec<ProxyType>,
}

impl VerificationResult {
    pub fn alive(
        endpoint: CandidateEndpoint,
        protocol: ProxyType,
        latency: Duration,
        attempted: Vec<ProxyType>,
    ) -> Self {
        Self {
            endpoint,
            outcome: ProbeOutcome::Alive,
            latency: Some(latency),
            verified_protocol: Some(protocol),
            attempted,
        }
    }

    pub fn dead(endpoint: CandidateEndpoint, outcome: ProbeOutcome, attempted: Vec<ProxyType>) -> Self {
        Self {
            endpoint,
            outcome,
            latency: None,
            verified_protocol: None,
            attempted,
        }
    }

    pub fn is_alive(&self) -> bool {
        matches!(self.outcome, ProbeOutcome::Alive)
    }

    pub fn latency_ms(&self) -> Option<u64> {
        self.latency.map(|d| d.as_millis() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidate_creation() {
        let candidate = CandidateEndpoint::new("1.2.3.4", 8080, ProtocolHint::Http, "test");
        assert_eq!(candidate.host, "1.2.3.4");
        assert_eq!(candidate.port, 8080);
        assert_eq!(candidate.protocol_hint, ProtocolHint::Http);
        assert_eq!(candidate.source_id, "test");
    }

    #[test]
    fn test_candidate_identity_ignores_hint_and_source() {
        let a = CandidateEndpoint::new("1.2.3.4", 8080, ProtocolHint::Http, "a");
        let b = CandidateEndpoint::new("1.2.3.4", 8080, ProtocolHint::Socks5, "b");
        let c = CandidateEndpoint::new("1.2.3.4", 8081, ProtocolHint::Http, "a");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_candidate_url() {
        let candidate = CandidateEndpoint::new("1.2.3.4", 1080, ProtocolHint::Unknown, "x");
        assert_eq!(candidate.url(ProxyType::Socks5), "socks5h://1.2.3.4:1080");
        assert_eq!(candidate.url(ProxyType::Socks4), "socks4a://1.2.3.4:1080");
        assert_eq!(candidate.to_simple_string(), "1.2.3.4:1080");

        let v6 = CandidateEndpoint::new("2001:db8::1", 3128, ProtocolHint::Http, "x");
        assert_eq!(v6.url(ProxyType::Http), "http://[2001:db8::1]:3128");
        assert_eq!(v6.to_string(), "[2001:db8::1]:3128");
    }

    #[test]
    fn test_probe_order_hint_first() {
        assert_eq!(
            ProtocolHint::Socks4.probe_order(),
            vec![ProxyType::Socks4, ProxyType::Http, ProxyType::Socks5, ProxyType::Https]
        );
        assert_eq!(ProtocolHint::Unknown.probe_order(), ProxyType::ALL.to_vec());
    }

    #[test]
    fn test_proxy_type_from_str() {
        assert_eq!("HTTP".parse::<ProxyType>(), Ok(ProxyType::Http));
        assert_eq!("socks5h".parse::<ProxyType>(), Ok(ProxyType::Socks5));
        assert!("ftp".parse::<ProxyType>().is_err());
    }

    #[test]
    fn test_hint_guess() {
        assert_eq!(ProtocolHint::guess("Socks5"), ProtocolHint::Socks5);
        assert_eq!(ProtocolHint::guess("HTTPS"), ProtocolHint::Https);
        assert_eq!(ProtocolHint::guess("anonymous"), ProtocolHint::Unknown);
    }

    #[test]
    fn test_verification_result() {
        let candidate = CandidateEndpoint::new("5.6.7.8", 80, ProtocolHint::Http, "x");

        let result = VerificationResult::alive(
            candidate.clone(),
            ProxyType::Http,
            Duration::from_millis(120),
            vec![ProxyType::Http],
        );
        assert!(result.is_alive());
        assert_eq!(result.latency_ms(), Some(120));
        assert_eq!(result.verified_protocol, Some(ProxyType::Http));

        let result = VerificationResult::dead(candidate, ProbeOutcome::Timeout, vec![ProxyType::Http]);
        assert!(!result.is_alive());
        assert!(result.latency.is_none());
        assert!(result.verified_protocol.is_none());
    }
}
