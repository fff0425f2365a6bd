use anyhow::Result;
use clap::Parser;
use proxy_harvest::{
    cli::init_logging,
    proxy::{
        default_sources, AddressFilter, CandidateEndpoint, CrawlerConfig, GeoConfig, GeoEnricher,
        GeoReport, GeoTarget, ProtocolHint, ProxyCrawler, ProxyParser, SourceMapping,
    },
    Error,
};
use serde::Serialize;
use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

/// Locate proxies and tag CDN and datacenter addresses
#[derive(Parser)]
#[command(name = "proxyGeolocation")]
#[command(about = "Locate proxies and tag CDN and datacenter addresses")]
struct Cli {
    /// Look up a single address
    #[arg(short, long, conflicts_with = "file")]
    ip: Option<IpAddr>,

    /// Proxy list to analyze
    #[arg(short, long, default_value = "output.txt")]
    file: PathBuf,

    /// Analyze only the first N proxies
    #[arg(short, long)]
    limit: Option<usize>,

    /// Map proxies to the sources currently listing them
    #[arg(short, long)]
    sources: bool,

    /// Write the analysis as JSON
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Only print the summary
    #[arg(long)]
    no_details: bool,

    /// Offline lookups from a MaxMind city database
    #[arg(long)]
    mmdb: Option<PathBuf>,

    /// Info logging
    #[arg(short, long)]
    verbose: bool,

    /// Debug logging
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.debug);

    let mut config = GeoConfig::new();
    if let Some(path) = &cli.mmdb {
        config = config.with_mmdb_path(path.clone());
    }
    let enricher = GeoEnricher::from_config(&config, AddressFilter::default())?;

    if let Some(ip) = cli.ip {
        let report = enricher.analyze(&[GeoTarget::new(ip, None)]).await;
        return finish(&cli, &report);
    }

    let endpoints = load_endpoints(&cli.file, cli.limit)?;
    if endpoints.is_empty() {
        println!("No proxies to analyze in {}", cli.file.display());
        return Ok(());
    }

    if cli.sources {
        return map_sources(&endpoints, cli.output.as_deref()).await;
    }

    let targets: Vec<GeoTarget> = endpoints.iter().filter_map(GeoTarget::from_candidate).collect();
    let skipped = endpoints.len() - targets.len();
    if skipped > 0 {
        println!("Skipping {} host names (only IP addresses are located)", skipped);
    }

    println!("Analyzing {} proxies...", targets.len());
    let report = enricher.analyze(&targets).await;
    finish(&cli, &report)
}

/// Print the analysis and save the JSON document when asked to
fn finish(cli: &Cli, report: &GeoReport) -> Result<()> {
    if !cli.no_details {
        println!();
        for record in &report.results {
            println!("{}", record.describe());
        }
    }
    print_summary(report);

    if let Some(path) = &cli.output {
        write_json(report, path)?;
        println!("\nResults saved to {}", path.display());
    }
    Ok(())
}

fn load_endpoints(path: &Path, limit: Option<usize>) -> Result<Vec<CandidateEndpoint>> {
    if !path.exists() {
        eprintln!("Run proxy_scraper first to create {}", path.display());
        return Err(Error::configuration(format!("proxy list {} not found", path.display())).into());
    }

    let (mut endpoints, _) = ProxyParser::parse_file(path, ProtocolHint::Unknown)?;
    if let Some(limit) = limit {
        endpoints.truncate(limit);
    }
    Ok(endpoints)
}

async fn map_sources(endpoints: &[CandidateEndpoint], output: Option<&Path>) -> Result<()> {
    let sources = default_sources();
    println!(
        "Mapping {} proxies against {} sources...",
        endpoints.len(),
        sources.len()
    );

    let crawler = ProxyCrawler::with_config(CrawlerConfig::new())?;
    let results = crawler.crawl_sources(&sources).await;
    let mapping = SourceMapping::build(endpoints, &results);

    println!();
    for (id, listed) in mapping.by_count() {
        println!("{:<40} {}", id, listed.len());
    }
    println!("\nTotal mapped: {}", mapping.total_mapped);

    if let Some(path) = output {
        write_json(&mapping, path)?;
        println!("Mapping saved to {}", path.display());
    }
    Ok(())
}

fn print_summary(report: &GeoReport) {
    let summary = &report.summary;
    println!();
    println!("Total analyzed:   {}", summary.total);
    println!("With location:    {}", summary.with_geo);
    println!("Cloudflare/CDN:   {}", summary.cdn);
    println!("Datacenter:       {}", summary.datacenter);
    if summary.failed_lookups > 0 {
        println!("Failed lookups:   {}", summary.failed_lookups);
    }

    let countries = report.countries_by_count();
    if !countries.is_empty() {
        println!("\nCountries:");
        for (country, count) in countries {
            println!("  {:<32} {}", country, count);
        }
    }
}

fn write_json<T: Serialize>(value: &T, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json)?;
    Ok(())
}
