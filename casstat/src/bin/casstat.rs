use std::net::SocketAddr;
use std::sync::Arc;

use casstat::config::{Config, MINIMUM_SCRAPE_INTERVAL};
use casstat::jolokia::{Client, MetricSource};
use casstat::scraper::Scraper;
use casstat::server::Httpd;
use casstat::signals::Shutdown;
use casstat::{config, jolokia, server};
use clap::Parser;
use tokio::runtime::Builder;
use tokio::signal;
use tokio::task::JoinSet;
use tokio::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, util::SubscriberInitExt};

/// Connections the HTTP server accepts at once before shedding load.
const HTTPD_CONNECTION_LIMIT: usize = 100;

/// How long to wait for tasks to wind down after the runtime is told to
/// stop.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[derive(thiserror::Error, Debug)]
enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("Failed to load casstat config: {0}")]
    Config(#[from] config::Error),
    #[error("Could not reach the Jolokia agent: {0}")]
    Probe(jolokia::Error),
    #[error("Casstat HTTP server returned an error: {0}")]
    Server(#[from] server::Error),
}

fn default_endpoint() -> String {
    "http://localhost:8778".to_string()
}

#[derive(Parser)]
#[clap(version, about, long_about = None)]
struct Args {
    /// base URL of the Jolokia agent running alongside Cassandra
    #[clap(long, default_value_t = default_endpoint())]
    endpoint: String,
    /// seconds between scrape cycles, floored at 10
    #[clap(long, default_value_t = 30)]
    interval_seconds: u64,
    /// address to bind the metrics server to
    #[clap(long, default_value = "0.0.0.0:8080")]
    binding_addr: SocketAddr,
    /// seconds before an individual request to the agent times out
    #[clap(long, default_value_t = 3)]
    timeout_seconds: u64,
    /// how many per-table fetches run at once within a cycle
    #[clap(long, default_value_t = 10)]
    concurrency: usize,
    /// path on disk to a YAML configuration file, which replaces the
    /// flag-derived configuration entirely
    #[clap(long)]
    config_path: Option<String>,
}

fn get_config(args: &Args) -> Result<Config, Error> {
    if let Some(ref path) = args.config_path {
        return Ok(Config::from_path(path)?);
    }
    Ok(Config {
        endpoint: args.endpoint.clone(),
        interval_seconds: args.interval_seconds,
        binding_addr: args.binding_addr,
        timeout_seconds: args.timeout_seconds,
        concurrency: args.concurrency,
    })
}

async fn inner_main(config: Config) -> Result<(), Error> {
    let shutdown = Shutdown::new();

    let interval = config.scrape_interval();
    if interval > Duration::from_secs(config.interval_seconds) {
        warn!(
            "scrape interval of {requested}s is below the {floor}s floor, clamping",
            requested = config.interval_seconds,
            floor = MINIMUM_SCRAPE_INTERVAL.as_secs(),
        );
    }

    let client =
        Client::new(&config.endpoint, config.request_timeout()).map_err(Error::Probe)?;

    // Probe once before starting anything. A permanently unreachable agent
    // is a deployment problem and should fail loudly, not produce an
    // exporter that silently exposes nothing.
    let version = client.version().await.map_err(Error::Probe)?;
    info!(
        "connected to Jolokia {version} at {endpoint}",
        endpoint = config.endpoint
    );

    let source = Arc::new(client);

    let scraper = Scraper::new(Arc::clone(&source), config.concurrency, shutdown.clone());
    let snapshots = scraper.snapshot_handle();
    let httpd = Httpd::new(
        config.binding_addr,
        HTTPD_CONNECTION_LIMIT,
        Arc::clone(&source),
        snapshots,
        shutdown.clone(),
    );

    let mut scraper_joinset = JoinSet::new();
    scraper_joinset.spawn(scraper.run(interval));
    let mut httpd_joinset = JoinSet::new();
    httpd_joinset.spawn(httpd.run());

    #[cfg(unix)]
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
    #[cfg(not(unix))]
    let mut sigterm = NeverSignal;

    let res = loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("received ctrl-c, shutting down");
                break Ok(());
            },
            _ = sigterm.recv() => {
                info!("received SIGTERM, shutting down");
                break Ok(());
            },
            Some(res) = httpd_joinset.join_next() => {
                match res {
                    Ok(Ok(())) => {
                        info!("HTTP server shut down");
                        break Ok(());
                    }
                    Ok(Err(err)) => {
                        error!("HTTP server shut down unexpectedly: {err}");
                        break Err(Error::Server(err));
                    }
                    Err(err) => {
                        error!("Could not join the spawned HTTP server task: {err}");
                        break Ok(());
                    }
                }
            },
            Some(res) = scraper_joinset.join_next() => {
                if let Err(err) = res {
                    error!("Could not join the spawned scraper task: {err}");
                }
                info!("scraper shut down");
                break Ok(());
            },
        }
    };

    shutdown.signal();
    while scraper_joinset.join_next().await.is_some() {}
    while httpd_joinset.join_next().await.is_some() {}
    res
}

#[cfg(not(unix))]
struct NeverSignal;

#[cfg(not(unix))]
impl NeverSignal {
    async fn recv(&mut self) -> Option<()> {
        std::future::pending().await
    }
}

fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_ansi(false)
        .finish()
        .init();

    let version = env!("CARGO_PKG_VERSION");
    info!("Starting casstat {version}.");

    let args = Args::parse();
    let config = get_config(&args)?;

    let runtime = Builder::new_multi_thread()
        .enable_io()
        .enable_time()
        .build()?;
    let res = runtime.block_on(inner_main(config));

    info!(
        "Shutting down runtime with a {} second delay. May leave orphaned tasks.",
        SHUTDOWN_GRACE.as_secs(),
    );
    runtime.shutdown_timeout(SHUTDOWN_GRACE);
    res
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_map_onto_the_config() {
        let args = Args::parse_from([
            "casstat",
            "--endpoint",
            "http://cassandra-0:8778",
            "--interval-seconds",
            "45",
            "--binding-addr",
            "127.0.0.1:9500",
            "--timeout-seconds",
            "5",
            "--concurrency",
            "2",
        ]);
        let config = get_config(&args).expect("flags must produce a config");
        assert_eq!(config.endpoint, "http://cassandra-0:8778");
        assert_eq!(config.scrape_interval(), Duration::from_secs(45));
        assert_eq!(
            config.binding_addr,
            SocketAddr::from(([127, 0, 0, 1], 9500))
        );
        assert_eq!(config.request_timeout(), Duration::from_secs(5));
        assert_eq!(config.concurrency, 2);
    }

    #[test]
    fn default_flags_match_the_config_defaults() {
        let args = Args::parse_from(["casstat"]);
        let config = get_config(&args).expect("defaults must produce a config");
        assert_eq!(config, Config::default());
    }
}
