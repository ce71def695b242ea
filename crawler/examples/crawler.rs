//! Example of running the DHT spider and printing harvested torrents.

use clap::Parser;
use dht_spider_crawler::{CrawlerBuilder, FetchConfiguration, TorrentRecord, DEFAULT_SEEDS};
use log::LevelFilter;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// UDP address to listen on.
    #[arg(short = 'a', long, default_value = "0.0.0.0:6881")]
    listen: SocketAddr,

    /// Bootstrap node as host:port, may be repeated (defaults to the well-known routers).
    #[arg(short, long)]
    seed: Vec<String>,

    /// Seconds between reseed checks.
    #[arg(short, long, default_value = "15")]
    reseed_interval: u64,

    /// Maximum number of concurrent metadata fetch sessions.
    #[arg(short, long, default_value = "64")]
    concurrent_tasks: usize,

    /// Seconds allowed for a whole metadata fetch session.
    #[arg(short = 't', long, default_value = "60")]
    session_timeout: u64,

    /// Only accept announcements carrying a token we issued.
    #[arg(long)]
    verify_tokens: bool,

    /// Log level.
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let log_level = match args.log_level.to_lowercase().as_str() {
        "error" => LevelFilter::Error,
        "warn" => LevelFilter::Warn,
        "info" => LevelFilter::Info,
        "debug" => LevelFilter::Debug,
        "trace" => LevelFilter::Trace,
        _ => LevelFilter::Info,
    };

    // Configure fern logger
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{}] {} - {}",
                record.level(),
                record.target(),
                message
            ))
        })
        .level(log_level)
        .chain(std::io::stderr())
        .apply()?;

    log::info!("CRAWLING THE BITTORRENT DHT");

    let seeds = if args.seed.is_empty() {
        DEFAULT_SEEDS.iter().map(|seed| seed.to_string()).collect()
    } else {
        args.seed.clone()
    };
    log::debug!("Bootstrapping from {seeds:?}");

    let crawler = CrawlerBuilder::new()
        .with_listen_addr(args.listen)
        .with_seeds(seeds)
        .with_reseed_interval(Duration::from_secs(args.reseed_interval))?
        .with_fetch_workers(args.concurrent_tasks)?
        .with_fetch_configuration(
            FetchConfiguration::default()
                .with_session_timeout(Duration::from_secs(args.session_timeout)),
        )
        .with_token_verification(args.verify_tokens)
        .build();

    let (records_tx, mut records_rx) = mpsc::channel::<TorrentRecord>(1000);
    let handle = crawler
        .start(records_tx)
        .await
        .map_err(|e| format!("Crawler error: {e}"))?;

    loop {
        tokio::select! {
            Some(record) = records_rx.recv() => {
                println!("{record}");
                for file in &record.files {
                    println!("    {} ({} bytes)", file.name, file.length);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                log::info!("Shutting down: {}", handle.stats());
                break;
            }
        }
    }

    handle.shutdown().await;
    Ok(())
}
