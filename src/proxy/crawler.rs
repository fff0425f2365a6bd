//! Proxy crawler: runs every source, then merges, filters and deduplicates
//!
//! Sources are fetched concurrently, each under its own deadline. Their
//! results are merged by a single owner after all of them finished, in
//! source order, so the merged set and the statistics do not depend on which
//! source answered first.

use crate::error::Result;
use crate::proxy::filter::{AddressFilter, FilterVerdict};
use crate::proxy::models::CandidateEndpoint;
use crate::proxy::source::{ParsedSource, ProxySource};
use futures::future::join_all;
use reqwest::Client;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default fetch deadline per source in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Default user agent for source requests
const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

/// Result of crawling a single source
#[derive(Debug, Clone)]
pub struct CrawlResult {
    pub source_id: String,
    pub parsed: ParsedSource,
    /// Error message if crawling failed
    pub error: Option<String>,
}

impl CrawlResult {
    pub fn success(source_id: String, parsed: ParsedSource) -> Self {
        Self {
            source_id,
            parsed,
            error: None,
        }
    }

    pub fn failure(source_id: String, error: String) -> Self {
        Self {
            source_id,
            parsed: ParsedSource::default(),
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Per-source counters. Every record a source looked at lands in exactly one
/// of `valid`, `dropped_private_or_infrastructure` or `invalid_format`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SourceStats {
    pub records: usize,
    pub valid: usize,
    pub dropped_private_or_infrastructure: usize,
    pub invalid_format: usize,
    pub error: Option<String>,
}

impl SourceStats {
    fn count(&mut self, verdict: FilterVerdict) {
        self.records += 1;
        if !verdict.valid {
            self.invalid_format += 1;
        } else if verdict.is_accepted() {
            self.valid += 1;
        } else {
            self.dropped_private_or_infrastructure += 1;
        }
    }

    fn add(&mut self, other: &SourceStats) {
        self.records += other.records;
        self.valid += other.valid;
        self.dropped_private_or_infrastructure += other.dropped_private_or_infrastructure;
        self.invalid_format += other.invalid_format;
    }

    /// Records looked at equal the three outcome counters
    pub fn is_balanced(&self) -> bool {
        self.records == self.valid + self.dropped_private_or_infrastructure + self.invalid_format
    }
}

/// Outcome of one scrape run
#[derive(Debug, Clone, Default)]
pub struct CrawlReport {
    /// Unique accepted candidates, first-seen hint and source kept
    pub candidates: Vec<CandidateEndpoint>,
    /// Statistics per source, in source order
    pub stats: Vec<(String, SourceStats)>,
    pub totals: SourceStats,
}

impl CrawlReport {
    pub fn unique(&self) -> usize {
        self.candidates.len()
    }

    /// Accepted records that repeated an endpoint already kept
    pub fn duplicates(&self) -> usize {
        self.totals.valid.saturating_sub(self.unique())
    }

    pub fn failed_sources(&self) -> usize {
        self.stats.iter().filter(|(_, s)| s.error.is_some()).count()
    }
}

/// Merge source results into one filtered, deduplicated candidate set.
///
/// Each unique endpoint is classified once; the verdict is then charged to
/// every source that emitted it. A result whose id was seen before adds to
/// that source's counters.
pub fn merge(filter: &AddressFilter, results: Vec<CrawlResult>) -> CrawlReport {
    let mut verdicts: HashMap<(String, u16), FilterVerdict> = HashMap::new();
    let mut seen: HashSet<(String, u16)> = HashSet::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut report = CrawlReport::default();

    for result in results {
        let mut stats = SourceStats {
            error: result.error.clone(),
            ..Default::default()
        };

        for _ in 0..result.parsed.invalid_format {
            stats.count(FilterVerdict::default());
        }

        for candidate in result.parsed.candidates {
            let key = candidate.key();
            let verdict = *verdicts
                .entry(key.clone())
                .or_insert_with(|| filter.classify(&candidate.host, candidate.port));
            stats.count(verdict);

            if !verdict.is_accepted() {
                debug!(source = %result.source_id, endpoint = %candidate, ?verdict, "dropping candidate");
                continue;
            }
            if seen.insert(key) {
                report.candidates.push(candidate);
            }
        }

        report.totals.add(&stats);
        match index.get(&result.source_id) {
            Some(&i) => {
                let existing = &mut report.stats[i].1;
                existing.add(&stats);
                if existing.error.is_none() {
                    existing.error = stats.error;
                }
            }
            None => {
                index.insert(result.source_id.clone(), report.stats.len());
                report.stats.push((result.source_id, stats));
            }
        }
    }

    report
}

/// Configuration for proxy crawler
#[derive(Debug, Clone)]
pub struct CrawlerConfig {
    /// Fetch deadline for sources without their own
    pub timeout: Duration,
    pub user_agent: String,
    /// Honour `HTTP_PROXY` / `HTTPS_PROXY` / `ALL_PROXY` from the environment
    pub use_system_proxy: bool,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            use_system_proxy: true,
        }
    }
}

impl CrawlerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_user_agent(mut self, user_agent: String) -> Self {
        self.user_agent = user_agent;
        self
    }

    pub fn with_system_proxy(mut self, enabled: bool) -> Self {
        self.use_system_proxy = enabled;
        self
    }
}

/// Proxy crawler for fetching proxies from configured sources
pub struct ProxyCrawler {
    config: CrawlerConfig,
    client: Client,
    filter: AddressFilter,
}

impl ProxyCrawler {
    /// Create a new proxy crawler with default configuration
    pub fn new() -> Result<Self> {
        Self::with_config(CrawlerConfig::default())
    }

    /// Create a new proxy crawler with custom configuration
    pub fn with_config(config: CrawlerConfig) -> Result<Self> {
        let mut builder = Client::builder().user_agent(&config.user_agent);
        if !config.use_system_proxy {
            builder = builder.no_proxy();
        }
        let client = builder.build()?;

        Ok(Self {
            config,
            client,
            filter: AddressFilter::default(),
        })
    }

    /// Replace the address filter (e.g. with a custom infrastructure table)
    pub fn with_filter(mut self, filter: AddressFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn filter(&self) -> &AddressFilter {
        &self.filter
    }

    /// Fetch one source. Never fails: errors and timeouts become a failed result.
    pub async fn crawl_source(&self, source: &ProxySource) -> CrawlResult {
        let deadline = source.timeout.unwrap_or(self.config.timeout);

        match tokio::time::timeout(deadline, source.fetch(&self.client)).await {
            Ok(Ok(parsed)) => {
                info!(
                    source = %source.id,
                    candidates = parsed.candidates.len(),
                    invalid = parsed.invalid_format,
                    "source scraped"
                );
                CrawlResult::success(source.id.clone(), parsed)
            }
            Ok(Err(e)) => {
                warn!(source = %source.id, "{}", e);
                CrawlResult::failure(source.id.clone(), e.to_string())
            }
            Err(_) => {
                warn!(source = %source.id, "timed out after {:?}", deadline);
                CrawlResult::failure(source.id.clone(), format!("timed out after {:?}", deadline))
            }
        }
    }

    /// Fetch all sources concurrently; results come back in source order
    pub async fn crawl_sources(&self, sources: &[ProxySource]) -> Vec<CrawlResult> {
        join_all(sources.iter().map(|source| self.crawl_source(source))).await
    }

    /// Fetch, merge, filter and deduplicate
    pub async fn crawl(&self, sources: &[ProxySource]) -> CrawlReport {
        let results = self.crawl_sources(sources).await;
        merge(&self.filter, results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::models::ProtocolHint;
    use crate::proxy::source::{ScrapeMethod, SourceFormat};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    const SCENARIO_BODY: &str = "1.2.3.4:8080\n10.0.0.5:3128\nnot-a-line\n5.6.7.8:80";

    fn plain_source(id: &str, url: &str) -> ProxySource {
        ProxySource::new(id, url, ScrapeMethod::Http, SourceFormat::PlainText)
    }

    fn parsed(id: &str, body: &str) -> CrawlResult {
        let parsed = plain_source(id, "http://127.0.0.1/").parse(body).unwrap();
        CrawlResult::success(id.to_string(), parsed)
    }

    fn keys(report: &CrawlReport) -> Vec<String> {
        let mut keys: Vec<_> = report.candidates.iter().map(|c| c.to_string()).collect();
        keys.sort();
        keys
    }

    /// Serve `body` to every request until the test ends
    async fn serve_body(body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut request = Vec::new();
                    let mut buf = [0u8; 1024];
                    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                        match socket.read(&mut buf).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => request.extend_from_slice(&buf[..n]),
                        }
                    }
                    let response = format!(
                        "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                        body.len(),
                        body
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });
        format!("http://{}/proxies.txt", addr)
    }

    fn local_crawler(timeout: Duration) -> ProxyCrawler {
        let config = CrawlerConfig::new()
            .with_timeout(timeout)
            .with_system_proxy(false);
        ProxyCrawler::with_config(config).unwrap()
    }

    #[test]
    fn test_crawler_config_builder() {
        let config = CrawlerConfig::new()
            .with_timeout(Duration::from_secs(60))
            .with_user_agent("Custom Agent".to_string())
            .with_system_proxy(false);

        assert_eq!(config.timeout, Duration::from_secs(60));
        assert_eq!(config.user_agent, "Custom Agent");
        assert!(!config.use_system_proxy);
        assert_eq!(CrawlerConfig::default().timeout, Duration::from_secs(DEFAULT_TIMEOUT_SECS));
    }

    #[test]
    fn test_crawl_result_failure() {
        let result = CrawlResult::failure("x/http".to_string(), "Connection failed".to_string());
        assert!(!result.is_success());
        assert!(result.parsed.candidates.is_empty());
        assert_eq!(result.error, Some("Connection failed".to_string()));
    }

    #[test]
    fn test_merge_plain_text_scenario() {
        let report = merge(&AddressFilter::default(), vec![parsed("list/http", SCENARIO_BODY)]);

        assert_eq!(keys(&report), vec!["1.2.3.4:8080", "5.6.7.8:80"]);
        let (id, stats) = &report.stats[0];
        assert_eq!(id, "list/http");
        assert_eq!(stats.valid, 2);
        assert_eq!(stats.dropped_private_or_infrastructure, 1);
        assert_eq!(stats.invalid_format, 1);
        assert_eq!(stats.records, 4);
        assert!(stats.is_balanced());
    }

    #[test]
    fn test_merge_is_idempotent_for_repeated_sources() {
        let once = merge(&AddressFilter::default(), vec![parsed("a/http", SCENARIO_BODY)]);
        let twice = merge(
            &AddressFilter::default(),
            vec![parsed("a/http", SCENARIO_BODY), parsed("a/http", SCENARIO_BODY)],
        );

        assert_eq!(once.unique(), twice.unique());
        assert_eq!(keys(&once), keys(&twice));
        assert_eq!(twice.stats.len(), 1);
        assert_eq!(twice.stats[0].1.valid, 4);
        assert_eq!(twice.duplicates(), 2);
    }

    #[test]
    fn test_merge_keeps_first_seen_hint_and_source() {
        let mut socks = parsed("b/socks5", "5.6.7.8:80");
        for candidate in &mut socks.parsed.candidates {
            candidate.protocol_hint = ProtocolHint::Socks5;
        }
        let report = merge(
            &AddressFilter::default(),
            vec![socks, parsed("a/http", "5.6.7.8:80\n9.9.9.9:3128")],
        );

        assert_eq!(report.unique(), 2);
        let kept = &report.candidates[0];
        assert_eq!(kept.source_id, "b/socks5");
        assert_eq!(kept.protocol_hint, ProtocolHint::Socks5);
        assert_eq!(report.duplicates(), 1);
    }

    #[test]
    fn test_merge_conservation_across_sources() {
        let results = vec![
            parsed("a/http", SCENARIO_BODY),
            parsed("b/http", "104.16.1.31:80\n192.168.1.1:8080\n5.6.7.8:80\n8.8.4.4:53\n:80"),
            CrawlResult::failure("c/http".to_string(), "HTTP status: 503".to_string()),
        ];
        let emitted: usize = results.iter().map(|r| r.parsed.records()).sum();
        let report = merge(&AddressFilter::default(), results);

        let totals = &report.totals;
        assert_eq!(totals.records, emitted);
        assert!(totals.is_balanced());
        assert!(report.stats.iter().all(|(_, s)| s.is_balanced()));
        assert_eq!(report.stats[1].1.dropped_private_or_infrastructure, 2);
        assert_eq!(report.failed_sources(), 1);
        assert_eq!(report.stats[2].1, SourceStats {
            error: Some("HTTP status: 503".to_string()),
            ..Default::default()
        });
    }

    #[test]
    fn test_merge_is_independent_of_result_order() {
        let a = || parsed("a/http", SCENARIO_BODY);
        let b = || parsed("b/http", "5.6.7.8:80\n8.8.4.4:53");
        let forward = merge(&AddressFilter::default(), vec![a(), b()]);
        let backward = merge(&AddressFilter::default(), vec![b(), a()]);
        assert_eq!(keys(&forward), keys(&backward));
        assert_eq!(forward.totals, backward.totals);
    }

    #[tokio::test]
    async fn test_crawl_against_local_source() {
        let url = serve_body(SCENARIO_BODY).await;
        let crawler = local_crawler(Duration::from_secs(5));

        let report = crawler.crawl(&[plain_source("local/http", &url)]).await;
        assert_eq!(keys(&report), vec!["1.2.3.4:8080", "5.6.7.8:80"]);
        assert_eq!(report.stats[0].1.valid, 2);
        assert_eq!(report.failed_sources(), 0);
    }

    #[tokio::test]
    async fn test_failing_sources_do_not_abort_siblings() {
        let good = serve_body("5.6.7.8:80\n").await;

        let closed = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let closed_url = format!("http://{}/", closed.local_addr().unwrap());
        drop(closed);

        let silent = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let silent_url = format!("http://{}/", silent.local_addr().unwrap());

        let crawler = local_crawler(Duration::from_millis(300));
        let sources = vec![
            plain_source("closed/http", &closed_url),
            plain_source("good/http", &good),
            plain_source("silent/http", &silent_url),
        ];
        let report = crawler.crawl(&sources).await;
        drop(silent);

        assert_eq!(keys(&report), vec!["5.6.7.8:80"]);
        assert_eq!(report.failed_sources(), 2);
        assert!(report.stats[0].1.error.is_some());
        assert!(report.stats[1].1.error.is_none());
        assert!(report.stats[2].1.error.as_deref().unwrap_or("").contains("timed out"));
    }
}
