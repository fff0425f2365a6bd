//! Geolocation of proxy addresses
//!
//! Lookups go through the [`GeoLookup`] trait: an HTTP provider
//! (ip-api.com compatible) by default, or an offline MaxMind database.
//! [`GeoEnricher`] adds the CDN and datacenter tags on top and keeps
//! reserved addresses away from the provider entirely.

use crate::error::{Error, Result};
use crate::proxy::crawler::CrawlResult;
use crate::proxy::filter::{is_private_ip, AddressFilter};
use crate::proxy::models::CandidateEndpoint;
use async_trait::async_trait;
use maxminddb::{geoip2, Reader};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const DEFAULT_BASE_URL: &str = "http://ip-api.com/json";
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_DELAY_MS: u64 = 100;
const IP_API_FIELDS: &str = "status,message,country,countryCode,region,city,org,isp,as";

const CDN_KEYWORDS: &[&str] = &["cloudflare", "akamai", "fastly", "cloudfront"];

const DATACENTER_KEYWORDS: &[&str] = &[
    "datacenter",
    "data center",
    "hosting",
    "server",
    "cloud",
    "digital ocean",
    "digitalocean",
    "aws",
    "amazon",
    "google",
    "microsoft",
    "hetzner",
    "ovh",
    "linode",
    "vultr",
];

/// Geographic location information for an IP address
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct GeoLocation {
    /// ISO 3166-1 alpha-2 country code (e.g., "US", "CN")
    pub country_code: Option<String>,
    /// Country name in English
    pub country_name: Option<String>,
    /// City name in English
    pub city_name: Option<String>,
    pub region: Option<String>,
    pub isp: Option<String>,
    pub org: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// Timezone (e.g., "America/New_York")
    pub timezone: Option<String>,
}

impl GeoLocation {
    /// Check if the location has any meaningful data
    pub fn is_empty(&self) -> bool {
        self.country_code.is_none()
            && self.country_name.is_none()
            && self.city_name.is_none()
            && self.org.is_none()
    }

    /// Get a short display string for the location
    pub fn short_display(&self) -> String {
        match (&self.country_code, &self.city_name) {
            (Some(cc), Some(city)) => format!("{}, {}", city, cc),
            (Some(cc), None) => cc.clone(),
            (None, Some(city)) => city.clone(),
            (None, None) => String::from("Unknown"),
        }
    }

    fn mentions(&self, keywords: &[&str]) -> bool {
        [&self.org, &self.isp].into_iter().flatten().any(|field| {
            let field = field.to_lowercase();
            keywords.iter().any(|keyword| field.contains(keyword))
        })
    }
}

impl std::fmt::Display for GeoLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = [
            self.city_name.clone(),
            self.region.clone(),
            self.country_name.clone(),
        ]
        .into_iter()
        .flatten()
        .collect();

        if parts.is_empty() {
            write!(f, "Unknown Location")
        } else {
            write!(f, "{}", parts.join(", "))
        }
    }
}

/// A geolocation provider
#[async_trait]
pub trait GeoLookup: Send + Sync {
    /// Fails with `LookupUnavailable` when the provider cannot answer
    async fn lookup(&self, ip: IpAddr) -> Result<GeoLocation>;
}

/// Offline lookups from a MaxMind City database
#[derive(Clone)]
pub struct GeoLocator {
    reader: Arc<Reader<Vec<u8>>>,
}

impl GeoLocator {
    /// Create a new GeoLocator from an MMDB file path
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = Reader::open_readfile(path.as_ref()).map_err(|e| {
            Error::configuration(format!(
                "cannot open MMDB {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Ok(Self {
            reader: Arc::new(reader),
        })
    }

    /// Look up the geolocation for an IpAddr
    pub fn lookup_ip(&self, ip: IpAddr) -> Result<GeoLocation> {
        let lookup_result = self
            .reader
            .lookup(ip)
            .map_err(|e| Error::lookup_unavailable(ip.to_string(), e))?;
        let city: Option<geoip2::City> = lookup_result
            .decode()
            .map_err(|e| Error::lookup_unavailable(ip.to_string(), e))?;

        let Some(city) = city else {
            return Err(Error::lookup_unavailable(ip.to_string(), "address not in database"));
        };

        Ok(GeoLocation {
            country_code: city.country.iso_code.map(String::from),
            country_name: city.country.names.english.map(String::from),
            city_name: city.city.names.english.map(String::from),
            region: None,
            isp: None,
            org: None,
            latitude: city.location.latitude,
            longitude: city.location.longitude,
            timezone: city.location.time_zone.map(String::from),
        })
    }
}

#[async_trait]
impl GeoLookup for GeoLocator {
    async fn lookup(&self, ip: IpAddr) -> Result<GeoLocation> {
        self.lookup_ip(ip)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IpApiResponse {
    status: String,
    message: Option<String>,
    country: Option<String>,
    country_code: Option<String>,
    region: Option<String>,
    city: Option<String>,
    org: Option<String>,
    isp: Option<String>,
}

/// Lookups against an ip-api.com compatible JSON endpoint
pub struct IpApiLocator {
    client: Client,
    base_url: String,
}

impl IpApiLocator {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(base_url, client))
    }

    pub fn with_client(base_url: &str, client: Client) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl GeoLookup for IpApiLocator {
    async fn lookup(&self, ip: IpAddr) -> Result<GeoLocation> {
        let unavailable = |reason: String| Error::lookup_unavailable(ip.to_string(), reason);
        let url = format!("{}/{}?fields={}", self.base_url, ip, IP_API_FIELDS);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| unavailable(e.to_string()))?;
        if !response.status().is_success() {
            return Err(unavailable(format!("HTTP status: {}", response.status())));
        }
        let body = response.text().await.map_err(|e| unavailable(e.to_string()))?;
        let data: IpApiResponse =
            serde_json::from_str(&body).map_err(|e| unavailable(e.to_string()))?;

        if data.status != "success" {
            return Err(unavailable(
                data.message.unwrap_or_else(|| format!("status {}", data.status)),
            ));
        }

        Ok(GeoLocation {
            country_code: data.country_code,
            country_name: data.country,
            city_name: data.city,
            region: data.region,
            isp: data.isp,
            org: data.org,
            ..Default::default()
        })
    }
}

/// Configuration for the geolocation tool
#[derive(Debug, Clone)]
pub struct GeoConfig {
    pub base_url: String,
    pub timeout: Duration,
    /// Pause between remote lookups
    pub delay: Duration,
    /// Use this MaxMind database instead of the HTTP provider
    pub mmdb_path: Option<PathBuf>,
}

impl Default for GeoConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            delay: Duration::from_millis(DEFAULT_DELAY_MS),
            mmdb_path: None,
        }
    }
}

impl GeoConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.to_string();
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_mmdb_path(mut self, path: PathBuf) -> Self {
        self.mmdb_path = Some(path);
        self
    }
}

/// An address to geolocate, with the port it was listed under
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeoTarget {
    pub ip: IpAddr,
    pub port: Option<u16>,
}

impl GeoTarget {
    pub fn new(ip: IpAddr, port: Option<u16>) -> Self {
        Self { ip, port }
    }

    /// `None` for host names; only literal addresses are looked up
    pub fn from_candidate(candidate: &CandidateEndpoint) -> Option<Self> {
        candidate
            .host
            .parse()
            .ok()
            .map(|ip| Self::new(ip, Some(candidate.port)))
    }
}

/// One row of the analysis document
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeoRecord {
    pub ip: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    pub country: Option<String>,
    pub country_code: Option<String>,
    pub city: Option<String>,
    pub region: Option<String>,
    pub isp: Option<String>,
    pub org: Option<String>,
    pub is_cdn: bool,
    pub is_datacenter: bool,
}

impl GeoRecord {
    fn local(target: GeoTarget, org: &str, country: &str) -> Self {
        Self {
            ip: target.ip.to_string(),
            port: target.port,
            country: Some(country.to_string()),
            country_code: None,
            city: None,
            region: None,
            isp: None,
            org: Some(org.to_string()),
            is_cdn: false,
            is_datacenter: false,
        }
    }

    pub fn endpoint(&self) -> String {
        match self.port {
            Some(port) if self.ip.contains(':') => format!("[{}]:{}", self.ip, port),
            Some(port) => format!("{}:{}", self.ip, port),
            None => self.ip.clone(),
        }
    }

    /// One console line: tag, endpoint, location, organisation
    pub fn describe(&self) -> String {
        let tag = if self.is_cdn {
            "CDN"
        } else if self.is_datacenter {
            "DC "
        } else {
            "   "
        };
        let location = match (&self.city, &self.country) {
            (Some(city), Some(country)) if !city.is_empty() => format!("{}, {}", city, country),
            (_, Some(country)) => country.clone(),
            _ => "Unknown".to_string(),
        };

        let mut line = format!("{} {} - {}", tag, self.endpoint(), location);
        if let Some(org) = &self.org {
            line.push_str(&format!(" | {}", org));
        }
        if let Some(isp) = self.isp.as_ref().filter(|isp| Some(*isp) != self.org.as_ref()) {
            line.push_str(&format!(" | ISP: {}", isp));
        }
        line
    }
}

/// Aggregate counts of one analysis
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GeoSummary {
    pub total: usize,
    pub with_geo: usize,
    pub cdn: usize,
    pub datacenter: usize,
    pub failed_lookups: usize,
    /// "Country (CC)" -> count
    pub countries: BTreeMap<String, usize>,
}

/// The JSON analysis document
#[derive(Debug, Clone, Default, Serialize)]
pub struct GeoReport {
    pub results: Vec<GeoRecord>,
    pub summary: GeoSummary,
}

impl GeoReport {
    fn push(&mut self, record: GeoRecord) {
        if let Some(country) = &record.country {
            self.summary.with_geo += 1;
            let key = match &record.country_code {
                Some(code) => format!("{} ({})", country, code),
                None => country.clone(),
            };
            *self.summary.countries.entry(key).or_default() += 1;
        }
        self.summary.cdn += record.is_cdn as usize;
        self.summary.datacenter += record.is_datacenter as usize;
        self.results.push(record);
    }

    /// Countries by descending count
    pub fn countries_by_count(&self) -> Vec<(&str, usize)> {
        let mut countries: Vec<_> = self
            .summary
            .countries
            .iter()
            .map(|(name, count)| (name.as_str(), *count))
            .collect();
        countries.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
        countries
    }
}

/// Adds location, CDN and datacenter annotations to addresses
pub struct GeoEnricher {
    lookup: Box<dyn GeoLookup>,
    filter: AddressFilter,
    delay: Duration,
}

impl GeoEnricher {
    pub fn new(lookup: Box<dyn GeoLookup>, filter: AddressFilter, delay: Duration) -> Self {
        Self {
            lookup,
            filter,
            delay,
        }
    }

    /// HTTP provider, or the MMDB file when one is configured
    pub fn from_config(config: &GeoConfig, filter: AddressFilter) -> Result<Self> {
        let lookup: Box<dyn GeoLookup> = match &config.mmdb_path {
            Some(path) => Box::new(GeoLocator::from_path(path)?),
            None => Box::new(IpApiLocator::new(&config.base_url, config.timeout)?),
        };
        let delay = if config.mmdb_path.is_some() {
            Duration::ZERO
        } else {
            config.delay
        };
        Ok(Self::new(lookup, filter, delay))
    }

    /// Annotation for addresses that are never sent to the provider
    fn special_address(target: GeoTarget) -> Option<GeoRecord> {
        let ip = target.ip;
        let (org, country) = if ip.is_unspecified() {
            ("Reserved: 'This host' address", "Invalid")
        } else if ip.is_loopback() {
            ("Loopback address", "Local")
        } else if is_private_ip(ip) {
            ("Private network address", "Local")
        } else {
            return None;
        };
        Some(GeoRecord::local(target, org, country))
    }

    /// Locate one address
    pub async fn enrich(&self, target: GeoTarget) -> Result<GeoRecord> {
        if let Some(record) = Self::special_address(target) {
            return Ok(record);
        }

        let location = self.lookup.lookup(target.ip).await?;
        let in_cdn_range = self.filter.table().provider_of(target.ip).is_some();

        Ok(GeoRecord {
            ip: target.ip.to_string(),
            port: target.port,
            is_cdn: in_cdn_range || location.mentions(CDN_KEYWORDS),
            is_datacenter: location.mentions(DATACENTER_KEYWORDS),
            country: location.country_name,
            country_code: location.country_code,
            city: location.city_name,
            region: location.region,
            isp: location.isp,
            org: location.org,
        })
    }

    /// Locate addresses one after another, pausing between remote lookups.
    /// Failed lookups are left out of the results and counted.
    pub async fn analyze(&self, targets: &[GeoTarget]) -> GeoReport {
        let mut report = GeoReport::default();
        report.summary.total = targets.len();

        for (i, target) in targets.iter().enumerate() {
            info!("analyzing {}/{}: {}", i + 1, targets.len(), target.ip);
            let remote = Self::special_address(*target).is_none();

            match self.enrich(*target).await {
                Ok(record) => report.push(record),
                Err(e) => {
                    warn!("{}", e);
                    report.summary.failed_lookups += 1;
                }
            }

            if remote && !self.delay.is_zero() && i + 1 < targets.len() {
                tokio::time::sleep(self.delay).await;
            }
        }

        report
    }
}

/// Which sources currently list which of the given endpoints
#[derive(Debug, Clone, Serialize)]
pub struct SourceMapping {
    pub analysis_type: &'static str,
    pub total_mapped: usize,
    pub sources: BTreeMap<String, Vec<String>>,
}

impl SourceMapping {
    pub fn build(endpoints: &[CandidateEndpoint], results: &[CrawlResult]) -> Self {
        let wanted: HashSet<(String, u16)> = endpoints.iter().map(|e| e.key()).collect();
        let mut sources: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();

        for result in results {
            for candidate in &result.parsed.candidates {
                if wanted.contains(&candidate.key()) {
                    sources
                        .entry(result.source_id.clone())
                        .or_default()
                        .insert(candidate.to_simple_string());
                }
            }
        }

        let sources: BTreeMap<String, Vec<String>> = sources
            .into_iter()
            .map(|(id, endpoints)| (id, endpoints.into_iter().collect()))
            .collect();
        let total_mapped = sources.values().map(Vec::len).sum();

        Self {
            analysis_type: "source_mapping",
            total_mapped,
            sources,
        }
    }

    /// Sources by descending match count
    pub fn by_count(&self) -> Vec<(&str, &[String])> {
        let mut sources: Vec<_> = self
            .sources
            .iter()
            .map(|(id, endpoints)| (id.as_str(), endpoints.as_slice()))
            .collect();
        sources.sort_by(|a, b| b.1.len().cmp(&a.1.len()).then(a.0.cmp(b.0)));
        sources
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::models::ProtocolHint;
    use crate::proxy::source::ParsedSource;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    struct FakeLookup {
        answers: HashMap<IpAddr, GeoLocation>,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl GeoLookup for FakeLookup {
        async fn lookup(&self, ip: IpAddr) -> Result<GeoLocation> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.answers
                .get(&ip)
                .cloned()
                .ok_or_else(|| Error::lookup_unavailable(ip.to_string(), "no answer"))
        }
    }

    fn location(country: &str, code: &str, org: &str) -> GeoLocation {
        GeoLocation {
            country_code: Some(code.to_string()),
            country_name: Some(country.to_string()),
            city_name: Some("Somewhere".to_string()),
            org: Some(org.to_string()),
            isp: Some(org.to_string()),
            ..Default::default()
        }
    }

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn enricher(answers: Vec<(&str, GeoLocation)>) -> (GeoEnricher, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let lookup = FakeLookup {
            answers: answers.into_iter().map(|(addr, loc)| (ip(addr), loc)).collect(),
            calls: Arc::clone(&calls),
        };
        let enricher = GeoEnricher::new(Box::new(lookup), AddressFilter::default(), Duration::ZERO);
        (enricher, calls)
    }

    #[test]
    fn test_geo_location_short_display() {
        assert_eq!(GeoLocation::default().short_display(), "Unknown");
        assert!(GeoLocation::default().is_empty());

        let loc = location("United States", "US", "Example");
        assert_eq!(loc.short_display(), "Somewhere, US");
        assert_eq!(loc.to_string(), "Somewhere, United States");
        assert_eq!(format!("{}", GeoLocation::default()), "Unknown Location");
    }

    #[tokio::test]
    async fn test_special_addresses_skip_the_provider() {
        let (enricher, calls) = enricher(vec![]);

        let record = enricher.enrich(GeoTarget::new(ip("192.168.1.10"), Some(8080))).await.unwrap();
        assert_eq!(record.org.as_deref(), Some("Private network address"));
        assert_eq!(record.country.as_deref(), Some("Local"));

        let record = enricher.enrich(GeoTarget::new(ip("0.0.0.0"), None)).await.unwrap();
        assert_eq!(record.country.as_deref(), Some("Invalid"));

        let record = enricher.enrich(GeoTarget::new(ip("127.0.0.1"), None)).await.unwrap();
        assert_eq!(record.org.as_deref(), Some("Loopback address"));

        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cdn_and_datacenter_tags() {
        let (enricher, _) = enricher(vec![
            ("104.16.1.31", location("Canada", "CA", "Cloudflare, Inc.")),
            ("5.6.7.8", location("Germany", "DE", "Example Hosting GmbH")),
            ("9.9.9.9", location("Japan", "JP", "Akamai Technologies")),
            ("8.8.4.4", location("Brazil", "BR", "Residential Telecom")),
        ]);

        let cdn_range = enricher.enrich(GeoTarget::new(ip("104.16.1.31"), None)).await.unwrap();
        assert!(cdn_range.is_cdn);

        let hosting = enricher.enrich(GeoTarget::new(ip("5.6.7.8"), Some(80))).await.unwrap();
        assert!(!hosting.is_cdn);
        assert!(hosting.is_datacenter);

        let named_cdn = enricher.enrich(GeoTarget::new(ip("9.9.9.9"), None)).await.unwrap();
        assert!(named_cdn.is_cdn);

        let residential = enricher.enrich(GeoTarget::new(ip("8.8.4.4"), None)).await.unwrap();
        assert!(!residential.is_cdn);
        assert!(!residential.is_datacenter);
    }

    #[tokio::test]
    async fn test_analyze_counts_failed_lookups() {
        let (enricher, calls) = enricher(vec![
            ("5.6.7.8", location("Germany", "DE", "Example Hosting GmbH")),
            ("8.8.4.4", location("Germany", "DE", "Residential Telecom")),
        ]);
        let targets = vec![
            GeoTarget::new(ip("5.6.7.8"), Some(80)),
            GeoTarget::new(ip("8.8.4.4"), Some(3128)),
            GeoTarget::new(ip("1.2.3.4"), Some(8080)),
            GeoTarget::new(ip("10.0.0.1"), Some(8080)),
        ];

        let report = enricher.analyze(&targets).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(report.results.len(), 3);
        assert_eq!(report.summary.total, 4);
        assert_eq!(report.summary.failed_lookups, 1);
        assert_eq!(report.summary.with_geo, 3);
        assert_eq!(report.summary.datacenter, 1);
        assert_eq!(report.summary.countries.get("Germany (DE)"), Some(&2));
        assert_eq!(report.countries_by_count()[0], ("Germany (DE)", 2));
        assert!(report.results.iter().all(|r| r.ip != "1.2.3.4"));
    }

    #[tokio::test]
    async fn test_single_address_lookup_failure_is_counted() {
        let (enricher, calls) = enricher(vec![]);
        let report = enricher.analyze(&[GeoTarget::new(ip("5.6.7.8"), None)]).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(report.results.is_empty());
        assert_eq!(report.summary.total, 1);
        assert_eq!(report.summary.failed_lookups, 1);
        assert_eq!(report.summary.with_geo, 0);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["results"], serde_json::json!([]));
        assert_eq!(json["summary"]["failed_lookups"], 1);
    }

    #[tokio::test]
    async fn test_report_json_shape() {
        let (enricher, _) = enricher(vec![("5.6.7.8", location("Germany", "DE", "Example"))]);
        let report = enricher
            .analyze(&[GeoTarget::new(ip("5.6.7.8"), Some(80)), GeoTarget::new(ip("8.8.4.4"), None)])
            .await;

        let json = serde_json::to_value(&report).unwrap();
        let row = &json["results"][0];
        assert_eq!(row["ip"], "5.6.7.8");
        assert_eq!(row["port"], 80);
        assert_eq!(row["is_cdn"], false);
        assert!(row.get("isp").is_some());
        assert_eq!(json["summary"]["failed_lookups"], 1);
        assert_eq!(json["summary"]["total"], 2);
    }

    #[test]
    fn test_geo_target_from_candidate() {
        let c = CandidateEndpoint::new("5.6.7.8", 80, ProtocolHint::Http, "t");
        assert_eq!(GeoTarget::from_candidate(&c), Some(GeoTarget::new(ip("5.6.7.8"), Some(80))));
        let named = CandidateEndpoint::new("proxy.example.com", 80, ProtocolHint::Http, "t");
        assert!(GeoTarget::from_candidate(&named).is_none());
    }

    #[test]
    fn test_record_describe() {
        let record = GeoRecord {
            ip: "5.6.7.8".to_string(),
            port: Some(80),
            country: Some("Germany".to_string()),
            country_code: Some("DE".to_string()),
            city: Some("Berlin".to_string()),
            region: None,
            isp: Some("Telecom".to_string()),
            org: Some("Example".to_string()),
            is_cdn: false,
            is_datacenter: true,
        };
        assert_eq!(record.describe(), "DC  5.6.7.8:80 - Berlin, Germany | Example | ISP: Telecom");
    }

    #[test]
    fn test_source_mapping() {
        let file = vec![
            CandidateEndpoint::new("5.6.7.8", 80, ProtocolHint::Http, "file"),
            CandidateEndpoint::new("1.2.3.4", 8080, ProtocolHint::Http, "file"),
        ];
        let parsed = |id: &str, hosts: &[(&str, u16)]| {
            CrawlResult::success(
                id.to_string(),
                ParsedSource {
                    candidates: hosts
                        .iter()
                        .map(|(h, p)| CandidateEndpoint::new(*h, *p, ProtocolHint::Http, id))
                        .collect(),
                    invalid_format: 0,
                },
            )
        };
        let results = vec![
            parsed("a/http", &[("5.6.7.8", 80), ("1.2.3.4", 8080), ("9.9.9.9", 80)]),
            parsed("b/http", &[("5.6.7.8", 80)]),
            parsed("c/http", &[("9.9.9.9", 80)]),
        ];

        let mapping = SourceMapping::build(&file, &results);
        assert_eq!(mapping.total_mapped, 3);
        assert_eq!(mapping.sources.len(), 2);
        assert_eq!(mapping.by_count()[0].0, "a/http");

        let json = serde_json::to_value(&mapping).unwrap();
        assert_eq!(json["analysis_type"], "source_mapping");
        assert_eq!(json["sources"]["b/http"][0], "5.6.7.8:80");
    }

    async fn serve_json(body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 2048];
                let _ = socket.read(&mut buf).await;
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });
        format!("http://{}/json", addr)
    }

    fn local_client() -> Client {
        Client::builder().no_proxy().build().unwrap()
    }

    #[tokio::test]
    async fn test_ip_api_success() {
        let url = serve_json(
            r#"{"status":"success","country":"Germany","countryCode":"DE","region":"BE","city":"Berlin","org":"Example","isp":"Telecom","as":"AS1 Example"}"#,
        )
        .await;
        let locator = IpApiLocator::with_client(&url, local_client());

        let loc = locator.lookup(ip("5.6.7.8")).await.unwrap();
        assert_eq!(loc.country_name.as_deref(), Some("Germany"));
        assert_eq!(loc.country_code.as_deref(), Some("DE"));
        assert_eq!(loc.city_name.as_deref(), Some("Berlin"));
        assert_eq!(loc.isp.as_deref(), Some("Telecom"));
    }

    #[tokio::test]
    async fn test_ip_api_failures_are_lookup_unavailable() {
        let url = serve_json(r#"{"status":"fail","message":"reserved range"}"#).await;
        let locator = IpApiLocator::with_client(&url, local_client());
        let err = locator.lookup(ip("5.6.7.8")).await.unwrap_err();
        assert!(matches!(err, Error::LookupUnavailable { .. }));
        assert!(err.to_string().contains("reserved range"));

        let closed = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/json", closed.local_addr().unwrap());
        drop(closed);
        let locator = IpApiLocator::with_client(&url, local_client());
        let err = locator.lookup(ip("5.6.7.8")).await.unwrap_err();
        assert!(matches!(err, Error::LookupUnavailable { .. }));
    }

    #[test]
    fn test_missing_mmdb_is_a_configuration_error() {
        let err = GeoLocator::from_path("/nonexistent/GeoLite2-City.mmdb").err().unwrap();
        assert!(err.is_fatal());
    }
}
