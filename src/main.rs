//! riskfeed server - main entry point
//!
//! Loads configuration, wires the registry/broadcast/heartbeat stack, and
//! serves the feed WebSocket endpoint plus the operational HTTP surface.

use clap::{Parser, Subcommand};
use riskfeed::auth::StaticTokenValidator;
use riskfeed::config::RiskfeedConfig;
use riskfeed::observability::{init_default_logging, StatsServer};
use riskfeed::server::{BroadcastEngine, FeedServer, HeartbeatSweeper, SubscriberRegistry};
use riskfeed::tier::TierLimitSource;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

/// Real-time risk alert distribution server
#[derive(Parser)]
#[command(name = "riskfeed")]
#[command(about = "Real-time risk alert distribution server")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the feed server
    Run,
    /// Validate configuration
    Config {
        /// Show the resolved configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_default_logging();
    info!("Starting riskfeed v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_configuration(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run => run_server(config).await,
        Commands::Config { show } => handle_config_command(config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }

    info!("Shutdown complete");
}

fn load_configuration(
    config_path: &Option<PathBuf>,
) -> Result<RiskfeedConfig, Box<dyn std::error::Error>> {
    match config_path {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            Ok(RiskfeedConfig::load_from_file(path)?)
        }
        None => {
            let default_paths = ["riskfeed.toml", "config/riskfeed.toml"];
            for path_str in default_paths {
                let path = PathBuf::from(path_str);
                if path.exists() {
                    info!("Loading configuration from: {}", path.display());
                    return Ok(RiskfeedConfig::load_from_file(&path)?);
                }
            }
            error!("No configuration file found. Provide one with -c/--config or create riskfeed.toml");
            process::exit(1);
        }
    }
}

async fn run_server(config: RiskfeedConfig) -> Result<(), Box<dyn std::error::Error>> {
    info!(service_id = %config.service.id, "Bringing up feed server");

    let bind_addr: SocketAddr = config.server.bind_addr.parse()?;

    let limits: Arc<dyn TierLimitSource> = Arc::new(config.tiers.to_limit_source());
    let registry = Arc::new(SubscriberRegistry::new(
        Arc::clone(&limits),
        config.defaults.thresholds,
    ));

    if config.auth.tokens.is_empty() {
        warn!("No tokens configured under [auth]; every handshake will be rejected");
    }
    let validator = Arc::new(StaticTokenValidator::from_config(&config.auth));

    // The offline-delivery collaborator is external; hand-offs are logged
    // until one is wired in
    let notifier = Arc::new(LoggingNotifier);
    let engine = Arc::new(BroadcastEngine::new(
        Arc::clone(&registry),
        limits,
        notifier,
    ));

    let sweeper = Arc::new(HeartbeatSweeper::new(
        Arc::clone(&registry),
        config.server.heartbeat_interval(),
        config.server.heartbeat_timeout(),
    ));
    let sweeper_handle = sweeper.start();

    let stats_server = Arc::new(StatsServer::new(
        config.service.id.clone(),
        config.server.stats_port,
        Arc::clone(&registry),
    ));
    tokio::spawn(async move {
        stats_server.start().await;
    });

    let feed_server = Arc::new(FeedServer::new(
        registry,
        engine,
        validator,
        config.server.heartbeat_interval(),
    ));
    let routes = feed_server.routes();

    info!(addr = %bind_addr, stats_port = config.server.stats_port, "Feed server listening");
    let (_, serving) =
        warp::serve(routes).bind_with_graceful_shutdown(bind_addr, shutdown_signal());
    serving.await;

    // Live sockets drop with the process; clients treat the abrupt closure
    // as a transport failure and reconnect when the server returns
    sweeper_handle.abort();
    info!("Feed server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        error!("Failed to install shutdown handler: {}", e);
    }
    info!("Shutdown signal received");
}

fn handle_config_command(
    config: RiskfeedConfig,
    show: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    info!("Configuration is valid");
    if show {
        println!("{}", toml::to_string_pretty(&config)?);
    }
    Ok(())
}

/// Stand-in offline-delivery collaborator: records the hand-off in the log
struct LoggingNotifier;

#[async_trait::async_trait]
impl riskfeed::server::OfflineNotifier for LoggingNotifier {
    async fn notify(&self, subscriber_id: &str, event: &riskfeed::protocol::AlertEvent) {
        info!(
            subscriber_id = %subscriber_id,
            score = event.reading.score,
            band = event.band.as_str(),
            "Offline notification handed off"
        );
    }
}
