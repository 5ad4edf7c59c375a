//! tvtuner-broker: network broker for a TV tuner driver.
//!
//! Clients connect over TCP, open frontends and LNBs by handle or name, and
//! receive the filter output queue descriptor of the driver.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use log::{error, info, warn};

use tvtuner_broker::hal::simulated::{SimulatedConnector, SimulatedDriverConfig};
use tvtuner_broker::logging;
use tvtuner_broker::server::{Server, ServerConfig};
use tvtuner_broker::service::{TunerService, DEFAULT_DRIVER_TIMEOUT};

const DEFAULT_LISTEN: &str = "0.0.0.0:12346";
const DEFAULT_CONFIG_FILE: &str = "tvtuner-broker.toml";

/// tvtuner-broker - Network broker for a TV tuner driver
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to listen on
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Configuration file path
    #[arg(short = 'f', long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Directory where log files are stored
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Number of days to keep log files
    #[arg(long)]
    log_retention_days: Option<u64>,

    /// Maximum concurrent connections
    #[arg(short = 'c', long)]
    max_connections: Option<usize>,

    /// Upper bound on binding the tuner driver, in milliseconds
    #[arg(long)]
    driver_timeout_ms: Option<u64>,
}

/// Configuration file format.
#[derive(Debug, serde::Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    server: ServerSection,
    #[serde(default)]
    logging: LoggingSection,
    #[serde(default)]
    driver: DriverSection,
}

#[derive(Debug, serde::Deserialize, Default)]
struct ServerSection {
    listen: Option<String>,
    max_connections: Option<usize>,
}

#[derive(Debug, serde::Deserialize, Default)]
struct LoggingSection {
    log_dir: Option<String>,
    retention_days: Option<u64>,
    level: Option<String>,
}

#[derive(Debug, serde::Deserialize, Default)]
struct DriverSection {
    timeout_ms: Option<u64>,
    /// Bind the driver at startup instead of on the first request.
    #[serde(default)]
    bind_on_start: bool,
    #[serde(flatten)]
    simulated: SimulatedDriverConfig,
}

fn load_config(path: &PathBuf) -> Result<ConfigFile, Box<dyn std::error::Error>> {
    let contents = std::fs::read_to_string(path)?;
    let config: ConfigFile = toml::from_str(&contents)?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Load config file: explicit path > auto-detect > default
    let config_path = args.config.clone().or_else(|| {
        let default_path = PathBuf::from(DEFAULT_CONFIG_FILE);
        if default_path.exists() {
            Some(default_path)
        } else {
            None
        }
    });
    let file_config = if let Some(config_path) = &config_path {
        match load_config(config_path) {
            Ok(c) => {
                eprintln!("Loaded config from: {}", config_path.display());
                c
            }
            Err(e) => {
                eprintln!("Failed to load config file: {}", e);
                return Err(e);
            }
        }
    } else {
        ConfigFile::default()
    };

    // Command line takes precedence over the file
    let log_dir = args.log_dir.clone().unwrap_or_else(|| {
        PathBuf::from(file_config.logging.log_dir.as_deref().unwrap_or("logs"))
    });
    let log_retention_days = args
        .log_retention_days
        .or(file_config.logging.retention_days)
        .unwrap_or(7);

    logging::init_logging(
        &log_dir,
        log_retention_days,
        args.verbose,
        file_config.logging.level.as_deref(),
    )?;

    let listen_addr: SocketAddr = match args.listen {
        Some(addr) => addr,
        None => file_config
            .server
            .listen
            .as_deref()
            .unwrap_or(DEFAULT_LISTEN)
            .parse()?,
    };
    let max_connections = args
        .max_connections
        .or(file_config.server.max_connections)
        .unwrap_or(64);
    let driver_timeout = args
        .driver_timeout_ms
        .or(file_config.driver.timeout_ms)
        .map(Duration::from_millis)
        .unwrap_or(DEFAULT_DRIVER_TIMEOUT);

    let driver_config = file_config.driver.simulated;
    info!("tvtuner-broker starting...");
    info!("  Listen address: {}", listen_addr);
    info!("  Max connections: {}", max_connections);
    info!("  Driver timeout: {:?}", driver_timeout);
    info!(
        "  Simulated driver: {} frontends, {} lnbs",
        driver_config.frontends.len(),
        driver_config.lnbs.len()
    );

    let connector = Arc::new(SimulatedConnector::new(driver_config));
    let service = Arc::new(TunerService::new(connector, driver_timeout));

    if file_config.driver.bind_on_start {
        let bind_service = Arc::clone(&service);
        match tokio::task::spawn_blocking(move || bind_service.ensure_driver_bound()).await? {
            Ok(_) => info!("Tuner driver bound at startup"),
            Err(e) => warn!("Tuner driver not available at startup: {}", e),
        }
    }

    let server = Server::new(
        ServerConfig {
            listen_addr,
            max_connections,
        },
        Arc::clone(&service),
    );

    tokio::select! {
        result = server.run() => {
            if let Err(e) = &result {
                error!("Server error: {}", e);
            }
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    let shutdown_service = Arc::clone(server.service());
    tokio::task::spawn_blocking(move || shutdown_service.shutdown()).await?;
    info!("tvtuner-broker stopped");

    Ok(())
}
