use anyhow::Result;
use clap::Parser;
use proxy_harvest::{
    cli::init_logging,
    proxy::{
        sources_for, AddressFilter, CrawlReport, CrawlerConfig, InfrastructureTable,
        ProxyCrawler, ProxyParser, ScrapeMethod,
    },
};
use std::path::PathBuf;
use std::time::Instant;

/// Scrape public proxy lists into one filtered, deduplicated file
#[derive(Parser)]
#[command(name = "proxy_scraper")]
#[command(about = "Scrape public proxy lists into one filtered, deduplicated file")]
struct Cli {
    /// Protocol family to scrape (socks covers socks4 and socks5)
    #[arg(short = 'p', long = "proxy", value_enum)]
    method: ScrapeMethod,

    /// Output file, one host:port per line
    #[arg(short, long, default_value = "output.txt")]
    output: PathBuf,

    /// Print per-source statistics
    #[arg(short, long)]
    verbose: bool,

    /// Debug logging
    #[arg(long)]
    debug: bool,

    /// Replace the bundled CDN/cloud range table
    #[arg(long)]
    ranges: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.debug);

    let filter = match &cli.ranges {
        Some(path) => AddressFilter::new(InfrastructureTable::from_file(path)?),
        None => AddressFilter::default(),
    };

    let sources = sources_for(cli.method);
    let crawler = ProxyCrawler::with_config(CrawlerConfig::new())?.with_filter(filter);

    if cli.verbose {
        println!("Scraping {} sources for {} proxies...", sources.len(), cli.method);
    }

    let started = Instant::now();
    let report = crawler.crawl(&sources).await;
    ProxyParser::save_to_file(&report.candidates, &cli.output)?;

    if cli.verbose {
        print_statistics(&report);
        println!();
        println!("Unique proxies: {}", report.unique());
        println!("Duplicates removed: {}", report.duplicates());
        println!("Failed sources: {}/{}", report.failed_sources(), report.stats.len());
        println!("Elapsed: {:.2}s", started.elapsed().as_secs_f64());
    }

    println!(
        "Saved {} proxies to {}",
        report.unique(),
        cli.output.display()
    );

    Ok(())
}

fn print_statistics(report: &CrawlReport) {
    let width = report
        .stats
        .iter()
        .map(|(id, _)| id.len())
        .max()
        .unwrap_or(0)
        .max("Source".len());

    println!();
    println!(
        "{:<width$}  {:>7}  {:>7}  {:>7}  {:>7}  {}",
        "Source",
        "Records",
        "Valid",
        "Dropped",
        "Invalid",
        "Status",
        width = width
    );
    println!("{}", "-".repeat(width + 48));

    for (id, stats) in &report.stats {
        let status = stats.error.as_deref().unwrap_or("ok");
        println!(
            "{:<width$}  {:>7}  {:>7}  {:>7}  {:>7}  {}",
            id,
            stats.records,
            stats.valid,
            stats.dropped_private_or_infrastructure,
            stats.invalid_format,
            status,
            width = width
        );
    }

    let totals = &report.totals;
    println!("{}", "-".repeat(width + 48));
    println!(
        "{:<width$}  {:>7}  {:>7}  {:>7}  {:>7}",
        "Total",
        totals.records,
        totals.valid,
        totals.dropped_private_or_infrastructure,
        totals.invalid_format,
        width = width
    );
}
