//! Proxy module for scraping, filtering, checking and locating proxies
//!
//! This module provides functionality for:
//! - Parsing `host:port` records out of plain text, HTML tables and JSON APIs
//! - Dropping private, reserved and cloud/CDN infrastructure addresses
//! - Crawling the source catalog and merging results with per-source statistics
//! - Checking proxy liveness with bounded concurrency and cancellation
//! - Enriching addresses with geolocation, CDN and datacenter tags

pub mod catalog;
pub mod checker;
pub mod crawler;
pub mod filter;
pub mod geo;
pub mod models;
pub mod parser;
pub mod shutdown;
pub mod source;

pub use catalog::{default_sources, sources_for};
pub use checker::{CheckerConfig, ProbeEvent, ProxyChecker, VerificationReport};
pub use crawler::{CrawlReport, CrawlResult, CrawlerConfig, ProxyCrawler, SourceStats};
pub use filter::{AddressFilter, FilterVerdict, InfrastructureTable};
pub use geo::{
    GeoConfig, GeoEnricher, GeoLocation, GeoLocator, GeoLookup, GeoRecord, GeoReport, GeoTarget,
    IpApiLocator, SourceMapping,
};
pub use models::{CandidateEndpoint, ProbeOutcome, ProtocolHint, ProxyType, VerificationResult};
pub use parser::ProxyParser;
pub use shutdown::{shutdown_channel, Shutdown, ShutdownTrigger};
pub use source::{ParsedSource, ProxySource, ScrapeMethod, SourceFormat};
