//! Proxy checker: routes one request through every candidate, bounded concurrency

use crate::error::{Error, Result};
use crate::proxy::models::{
    CandidateEndpoint, ProbeOutcome, ProxyType, VerificationResult,
};
use crate::proxy::shutdown::Shutdown;
use futures::stream::{self, Stream, StreamExt};
use rand::seq::SliceRandom;
use reqwest::redirect::Policy;
use reqwest::{Client, Proxy as ReqwestProxy, StatusCode};
use std::error::Error as StdError;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::Instant;
use tracing::debug;

/// Default timeout for proxy checks in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 20;

/// Default number of concurrent checks
const DEFAULT_CONCURRENCY: usize = 10;

/// Default URL to test proxies against
const DEFAULT_TEST_URL: &str = "https://httpbin.org/ip";

/// Extra user agents are read from this file when it exists
pub const USER_AGENTS_FILE: &str = "user_agents.txt";

const DEFAULT_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36 Edg/124.0.2478.80",
];

/// Prefix `https://` onto a target given without a scheme
pub fn normalize_test_url(url: &str) -> String {
    let url = url.trim();
    if url.contains("://") {
        url.to_string()
    } else {
        format!("https://{}", url)
    }
}

/// Read a user-agent pool, one per line; blank lines and `#` comments skipped
pub fn load_user_agents<P: AsRef<Path>>(path: P) -> Result<Vec<String>> {
    let content = fs::read_to_string(path)?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(String::from)
        .collect())
}

/// Configuration for proxy checker
#[derive(Debug, Clone)]
pub struct CheckerConfig {
    /// Budget for one candidate, shared by all protocols tried
    pub timeout: Duration,
    /// Maximum probes in flight
    pub concurrency: usize,
    pub test_url: String,
    pub user_agents: Vec<String>,
    /// Pick a fresh user agent per probe instead of always the first
    pub random_user_agent: bool,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            concurrency: DEFAULT_CONCURRENCY,
            test_url: DEFAULT_TEST_URL.to_string(),
            user_agents: DEFAULT_USER_AGENTS.iter().map(|s| s.to_string()).collect(),
            random_user_agent: false,
        }
    }
}

impl CheckerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_test_url(mut self, url: &str) -> Self {
        self.test_url = normalize_test_url(url);
        self
    }

    /// Append to the user-agent pool
    pub fn with_user_agents(mut self, user_agents: Vec<String>) -> Self {
        for agent in user_agents {
            if !self.user_agents.contains(&agent) {
                self.user_agents.push(agent);
            }
        }
        self
    }

    pub fn with_random_user_agent(mut self, random: bool) -> Self {
        self.random_user_agent = random;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.timeout.is_zero() {
            return Err(Error::configuration("timeout must be greater than zero"));
        }
        if self.concurrency == 0 {
            return Err(Error::configuration("max threads must be greater than zero"));
        }
        reqwest::Url::parse(&self.test_url).map_err(|e| {
            Error::configuration(format!("invalid test URL {}: {}", self.test_url, e))
        })?;
        Ok(())
    }

    fn user_agent(&self) -> &str {
        let agent = if self.random_user_agent {
            self.user_agents.choose(&mut rand::thread_rng())
        } else {
            self.user_agents.first()
        };
        agent.map(String::as_str).unwrap_or(DEFAULT_USER_AGENTS[0])
    }
}

/// One event of a verification run
#[derive(Debug, Clone)]
pub enum ProbeEvent {
    Finished(VerificationResult),
    /// Cancelled before a verdict was reached
    Incomplete(CandidateEndpoint),
}

/// Collected events of a verification run
#[derive(Debug, Clone, Default)]
pub struct VerificationReport {
    pub results: Vec<VerificationResult>,
    pub incomplete: Vec<CandidateEndpoint>,
}

impl VerificationReport {
    pub fn record(&mut self, event: ProbeEvent) {
        match event {
            ProbeEvent::Finished(result) => self.results.push(result),
            ProbeEvent::Incomplete(candidate) => self.incomplete.push(candidate),
        }
    }

    pub fn alive(&self) -> impl Iterator<Item = &VerificationResult> {
        self.results.iter().filter(|r| r.is_alive())
    }

    pub fn alive_endpoints(&self) -> Vec<CandidateEndpoint> {
        self.alive().map(|r| r.endpoint.clone()).collect()
    }

    pub fn alive_count(&self) -> usize {
        self.alive().count()
    }

    pub fn dead_count(&self) -> usize {
        self.results.len() - self.alive_count()
    }

    /// Every submitted candidate: alive + dead + incomplete
    pub fn total(&self) -> usize {
        self.results.len() + self.incomplete.len()
    }

    pub fn is_complete(&self) -> bool {
        self.incomplete.is_empty()
    }

    /// Alive share of the probes that finished, in percent
    pub fn success_rate(&self) -> f64 {
        if self.results.is_empty() {
            0.0
        } else {
            self.alive_count() as f64 / self.results.len() as f64 * 100.0
        }
    }
}

/// Proxy checker for validating proxies
#[derive(Debug, Clone, Default)]
pub struct ProxyChecker {
    config: CheckerConfig,
}

impl ProxyChecker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: CheckerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CheckerConfig {
        &self.config
    }

    /// Probe one candidate, hinted protocol first.
    ///
    /// Refused connections and protocol mismatches move on to the next
    /// protocol; a timeout or an HTTP error status ends the probe.
    pub async fn probe(&self, candidate: &CandidateEndpoint) -> VerificationResult {
        let deadline = Instant::now() + self.config.timeout;
        let mut attempted = Vec::new();
        let mut failure: Option<ProbeOutcome> = None;
        // Attempts that failed on this host never tested the proxy
        let mut local_failure: Option<ProbeOutcome> = None;

        for protocol in candidate.protocol_hint.probe_order() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                failure = Some(ProbeOutcome::Timeout);
                break;
            }

            let client = match self.create_client(candidate, protocol, remaining) {
                Ok(client) => client,
                Err(e) => {
                    debug!(endpoint = %candidate, %protocol, "protocol unsupported: {}", e);
                    continue;
                }
            };
            attempted.push(protocol);

            let start = Instant::now();
            let outcome = match tokio::time::timeout(remaining, self.request(&client)).await {
                Ok(Ok(status)) if status.is_success() || status.is_redirection() => {
                    return VerificationResult::alive(
                        candidate.clone(),
                        protocol,
                        start.elapsed(),
                        attempted,
                    );
                }
                Ok(Ok(status)) => ProbeOutcome::HttpError(status.as_u16()),
                Ok(Err(e)) if is_local_failure(&e) => {
                    debug!(endpoint = %candidate, %protocol, "proxy never reached: {}", e);
                    local_failure.get_or_insert_with(|| classify_error(&e));
                    continue;
                }
                Ok(Err(e)) => classify_error(&e),
                Err(_) => ProbeOutcome::Timeout,
            };
            debug!(endpoint = %candidate, %protocol, %outcome, "attempt failed");

            let terminal = matches!(outcome, ProbeOutcome::Timeout | ProbeOutcome::HttpError(_));
            failure = Some(match failure {
                Some(previous) if severity(&previous) > severity(&outcome) => previous,
                _ => outcome,
            });
            if terminal {
                break;
            }
        }

        let outcome = failure
            .or(local_failure)
            .unwrap_or_else(|| ProbeOutcome::ProtocolError("no supported protocol".to_string()));
        VerificationResult::dead(candidate.clone(), outcome, attempted)
    }

    async fn request(&self, client: &Client) -> reqwest::Result<StatusCode> {
        let response = client.get(&self.config.test_url).send().await?;
        Ok(response.status())
    }

    /// Create a reqwest client routed through the candidate
    fn create_client(
        &self,
        candidate: &CandidateEndpoint,
        protocol: ProxyType,
        timeout: Duration,
    ) -> Result<Client> {
        let proxy = ReqwestProxy::all(candidate.url(protocol))?;
        let client = Client::builder()
            .proxy(proxy)
            .timeout(timeout)
            .redirect(Policy::none())
            .user_agent(self.config.user_agent())
            .build()?;
        Ok(client)
    }

    /// Probe candidates with at most `concurrency` in flight. Yields exactly
    /// one event per candidate, in completion order.
    pub fn probe_stream(
        &self,
        candidates: Vec<CandidateEndpoint>,
        shutdown: Shutdown,
    ) -> impl Stream<Item = ProbeEvent> + '_ {
        let concurrency = self.config.concurrency.max(1);
        let semaphore = Arc::new(Semaphore::new(concurrency));

        stream::iter(candidates)
            .map(move |candidate| {
                let sem = Arc::clone(&semaphore);
                let mut shutdown = shutdown.clone();
                async move {
                    let probe = async {
                        let _permit = sem.acquire().await.ok();
                        self.probe(&candidate).await
                    };
                    tokio::select! {
                        biased;
                        _ = shutdown.cancelled() => ProbeEvent::Incomplete(candidate.clone()),
                        result = probe => ProbeEvent::Finished(result),
                    }
                }
            })
            .buffer_unordered(concurrency)
    }

    /// Probe every candidate and collect the events
    pub async fn verify_all(
        &self,
        candidates: Vec<CandidateEndpoint>,
        shutdown: &Shutdown,
    ) -> VerificationReport {
        let mut report = VerificationReport::default();
        let events: Vec<ProbeEvent> = self.probe_stream(candidates, shutdown.clone()).collect().await;
        for event in events {
            report.record(event);
        }
        report
    }

    /// Probe in a background task, delivering events over a channel
    pub fn verify_stream(
        &self,
        candidates: Vec<CandidateEndpoint>,
        shutdown: Shutdown,
    ) -> mpsc::Receiver<ProbeEvent> {
        let (tx, rx) = mpsc::channel(self.config.concurrency.max(1) * 2);
        let checker = self.clone();

        tokio::spawn(async move {
            let events = checker.probe_stream(candidates, shutdown);
            futures::pin_mut!(events);
            while let Some(event) = events.next().await {
                if tx.send(event).await.is_err() {
                    break;
                }
            }
        });

        rx
    }
}

/// Ranking used to keep the most telling failure across attempts
fn severity(outcome: &ProbeOutcome) -> u8 {
    match outcome {
        ProbeOutcome::ConnectionRefused => 0,
        ProbeOutcome::ProtocolError(_) => 1,
        ProbeOutcome::Timeout | ProbeOutcome::HttpError(_) => 2,
        ProbeOutcome::Alive => 3,
    }
}

/// Name resolution failed on this host before a connection was attempted
fn is_local_failure(error: &reqwest::Error) -> bool {
    let mut source: Option<&(dyn StdError + 'static)> = Some(error);
    while let Some(err) = source {
        let message = err.to_string().to_lowercase();
        if message.contains("dns error") || message.contains("failed to lookup address") {
            return true;
        }
        source = err.source();
    }
    false
}

fn classify_error(error: &reqwest::Error) -> ProbeOutcome {
    if error.is_timeout() {
        return ProbeOutcome::Timeout;
    }

    let mut source: Option<&(dyn StdError + 'static)> = Some(error);
    let mut detail = error.to_string();
    while let Some(err) = source {
        if let Some(io_err) = err.downcast_ref::<io::Error>() {
            match io_err.kind() {
                io::ErrorKind::ConnectionRefused => return ProbeOutcome::ConnectionRefused,
                io::ErrorKind::TimedOut => return ProbeOutcome::Timeout,
                _ => {}
            }
        }
        let message = err.to_string();
        // socks connectors flatten the io error into their message
        if message.to_lowercase().contains("connection refused") {
            return ProbeOutcome::ConnectionRefused;
        }
        detail = message;
        source = err.source();
    }

    ProbeOutcome::ProtocolError(detail)
}
