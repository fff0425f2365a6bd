use anyhow::Result;
use clap::Parser;
use proxy_harvest::{
    cli::init_logging,
    proxy::{
        checker::{load_user_agents, USER_AGENTS_FILE},
        shutdown_channel, CheckerConfig, ProbeEvent, ProtocolHint, ProxyChecker, ProxyParser,
        ProxyType, VerificationReport,
    },
    tui::ProxyCheckerApp,
    Error,
};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Exit status after an interrupted run
const EXIT_INTERRUPTED: i32 = 130;

/// Check which proxies in a list are alive and keep only those
#[derive(Parser)]
#[command(name = "proxy_checker")]
#[command(about = "Check which proxies in a list are alive and keep only those")]
struct Cli {
    /// Proxy list to check
    #[arg(short, long, default_value = "output.txt")]
    list: PathBuf,

    /// Protocol to try first for entries without a scheme
    #[arg(short = 'p', long = "proxy", default_value = "http")]
    proxy_type: ProxyType,

    /// Timeout per proxy in seconds
    #[arg(short, long, default_value = "20")]
    timeout: u64,

    /// URL to request through each proxy
    #[arg(short = 's', long = "site")]
    site: Option<String>,

    /// Pick a random user agent per request
    #[arg(short, long)]
    random_agent: bool,

    /// Maximum concurrent checks
    #[arg(long, default_value = "10")]
    max_threads: usize,

    /// Print every result
    #[arg(short, long)]
    verbose: bool,

    /// Check only the first N proxies
    #[arg(long)]
    limit: Option<usize>,

    /// Debug logging
    #[arg(long)]
    debug: bool,

    /// Where to write alive proxies (defaults to the list itself)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Live progress view
    #[arg(long)]
    tui: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.debug);

    let config = build_config(&cli)?;
    if !cli.list.exists() {
        return Err(Error::configuration(format!(
            "proxy list {} not found",
            cli.list.display()
        ))
        .into());
    }

    let (mut candidates, invalid) =
        ProxyParser::parse_file(&cli.list, ProtocolHint::from(cli.proxy_type))?;
    if let Some(limit) = cli.limit {
        candidates.truncate(limit);
    }

    println!("Loaded {} proxies from {}", candidates.len(), cli.list.display());
    if invalid > 0 {
        println!("Skipped {} unparseable lines", invalid);
    }
    println!(
        "Checking with {} threads, timeout: {}s",
        config.concurrency,
        config.timeout.as_secs()
    );
    println!("Test URL: {}", config.test_url);
    println!();

    let checker = ProxyChecker::with_config(config);
    let (trigger, shutdown) = shutdown_channel();
    let started = Instant::now();

    let report = if cli.tui {
        ProxyCheckerApp::new(candidates, checker, trigger, shutdown.clone())
            .run()
            .await?
    } else {
        let on_signal = trigger.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                on_signal.trigger();
            }
        });

        let mut report = VerificationReport::default();
        let mut events = checker.verify_stream(candidates, shutdown.clone());
        while let Some(event) = events.recv().await {
            if cli.verbose {
                print_event(&event);
            }
            report.record(event);
        }
        report
    };

    let output = cli.output.as_deref().unwrap_or(&cli.list);
    save_alive(&report, output)?;
    print_summary(&report, started.elapsed());
    println!("Saved {} alive proxies to {}", report.alive_count(), output.display());

    if !report.is_complete() {
        println!("Interrupted: {} proxies were not checked", report.incomplete.len());
        std::process::exit(EXIT_INTERRUPTED);
    }

    Ok(())
}

fn build_config(cli: &Cli) -> Result<CheckerConfig> {
    let mut config = CheckerConfig::new()
        .with_timeout(Duration::from_secs(cli.timeout))
        .with_concurrency(cli.max_threads)
        .with_random_user_agent(cli.random_agent);

    if let Some(site) = &cli.site {
        config = config.with_test_url(site);
    }
    if Path::new(USER_AGENTS_FILE).exists() {
        config = config.with_user_agents(load_user_agents(USER_AGENTS_FILE)?);
    }

    config.validate()?;
    Ok(config)
}

fn print_event(event: &ProbeEvent) {
    if let ProbeEvent::Finished(result) = event {
        match (result.latency_ms(), result.verified_protocol) {
            (Some(ms), Some(protocol)) => {
                println!("  [ALIVE] {} {} ({}ms)", result.endpoint, protocol, ms)
            }
            _ => println!("  [DEAD]  {} {}", result.endpoint, result.outcome),
        }
    }
}

fn save_alive(report: &VerificationReport, path: &Path) -> Result<()> {
    ProxyParser::save_to_file(&report.alive_endpoints(), path)?;
    Ok(())
}

fn print_summary(report: &VerificationReport, elapsed: Duration) {
    println!();
    println!("Total:        {}", report.total());
    println!("Alive:        {}", report.alive_count());
    println!("Dead:         {}", report.dead_count());
    println!("Incomplete:   {}", report.incomplete.len());
    println!("Success rate: {:.1}%", report.success_rate());
    println!("Elapsed:      {:.2}s", elapsed.as_secs_f64());
}
