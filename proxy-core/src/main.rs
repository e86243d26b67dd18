//! The data-plane binary: accepts proxy client connections, forwards them to
//! an upstream SOCKS5 proxy (or dials direct for private/whitelisted hosts),
//! and persists per-connection statistics. See SPEC_FULL.md §2.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use clap::Parser;
use proxy_common::{Config, Database, RequestIdGen, StatsCollector};
use tokio::sync::Notify;

mod connect;
mod dial;
mod forward;
mod relay;
mod request;
mod selector;
mod server;
mod tracker;
mod writer;

use connect::ConnectHandler;
use forward::{direct_http_client, HttpForwarder};
use selector::UpstreamSelector;
use server::ProxyServer;

/// Bounded capacity of the stats write queue feeding the storage drainer
/// (SPEC_FULL.md §5). Not config-exposed: it is an internal absorption
/// buffer, not a tunable the operator is expected to reason about.
const STATS_QUEUE_CAPACITY: usize = 1024;

/// Best-effort drain window on shutdown before remaining sockets are force-closed.
const DRAIN_DEADLINE: Duration = Duration::from_secs(10);

#[derive(Parser, Debug)]
#[command(name = "proxy-core", about = "Forward HTTP/HTTPS proxy data plane")]
struct Cli {
    #[arg(long, default_value = "./config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match Config::load(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("fatal: failed to load config {:?}: {}", cli.config, e);
            std::process::exit(1);
        }
    };

    writer::init(config.log_path.as_deref());
    log::info!("proxy-core starting, listening on {}", config.addr);

    let whitelist = Arc::new(ArcSwap::from_pointee(config.compiled_whitelist()));

    let database = match Database::new(&config.sqlite_path) {
        Ok(db) => Arc::new(db),
        Err(e) => {
            log::error!("fatal: failed to open database '{}': {}", config.sqlite_path, e);
            std::process::exit(1);
        }
    };
    let collector = match StatsCollector::new(database, config.enable_database) {
        Ok(c) => Arc::new(c),
        Err(e) => {
            log::error!("fatal: failed to initialize stats collector: {}", e);
            std::process::exit(1);
        }
    };

    let tracker = tracker::ConnectionTracker::spawn(collector, STATS_QUEUE_CAPACITY);
    let request_ids = Arc::new(RequestIdGen::new());
    let dial_timeout = Duration::from_secs(config.dial_timeout_secs);

    let selector = Arc::new(UpstreamSelector::new(
        config.socks_addr.clone(),
        dial_timeout,
        whitelist,
    ));

    let forwarder = Arc::new(HttpForwarder {
        selector: selector.clone(),
        tracker: tracker.clone(),
        request_ids: request_ids.clone(),
        http_idle_timeout: Duration::from_secs(config.http_idle_timeout_secs),
        direct_client: direct_http_client(),
    });

    let connect_handler = Arc::new(ConnectHandler {
        selector,
        tracker,
        request_ids,
        connect_idle_timeout: Duration::from_secs(config.connect_idle_timeout_secs),
    });

    let server = ProxyServer {
        forwarder,
        connect_handler,
        drain_deadline: DRAIN_DEADLINE,
    };

    let shutdown = Arc::new(Notify::new());
    {
        let shutdown = shutdown.clone();
        ctrlc::set_handler(move || {
            log::info!("SIGINT received, initiating graceful shutdown");
            shutdown.notify_waiters();
        })
        .expect("failed to install SIGINT handler");
    }

    match server.run(&config.addr, shutdown).await {
        Ok(()) => {
            log::info!("proxy-core shut down cleanly");
            std::process::exit(0);
        }
        Err(e) => {
            log::error!("fatal: failed to bind listener on {}: {}", config.addr, e);
            std::process::exit(1);
        }
    }
}
