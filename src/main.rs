//! APV backend entry point.

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use apv_backend::config::{Config, VERBOSE_LOG_FILTER};
use apv_backend::database::{host_from_uri, MongoConnector};
use apv_backend::utils::shutdown_signal;
use apv_backend::Bootstrap;

/// APV backend HTTP service.
#[derive(Parser, Debug)]
#[command(name = "apv-backend")]
#[command(about = "HTTP API for APV records backed by MongoDB")]
#[command(version)]
struct Args {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Connect to the database and serve HTTP (default).
    Run,

    /// Check configuration validity without connecting.
    CheckConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let args = Args::parse();

    // Load configuration; its log settings drive the subscriber
    let config = Config::load();

    // Initialize logging
    let filter = match &config {
        Ok(c) => EnvFilter::try_new(c.log_filter(args.verbose))
            .unwrap_or_else(|_| EnvFilter::new("info")),
        Err(_) if args.verbose => EnvFilter::new(VERBOSE_LOG_FILTER),
        Err(_) => EnvFilter::new("info"),
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    match args.command {
        Some(Command::CheckConfig) => cmd_check_config(config),
        Some(Command::Run) | None => cmd_run(config).await,
    }
}

/// Check configuration validity.
fn cmd_check_config(loaded: Result<Config, envy::Error>) -> anyhow::Result<()> {
    println!("======================================================================");
    println!("APV BACKEND - CONFIGURATION CHECK");
    println!("======================================================================");

    // Load configuration
    print!("Loading configuration... ");
    let config = match loaded {
        Ok(c) => {
            println!("OK");
            c
        }
        Err(e) => {
            println!("FAILED");
            println!("  Error: {}", e);
            return Err(anyhow::anyhow!("Configuration load failed"));
        }
    };

    // Validate configuration
    print!("Validating configuration... ");
    match config.validate() {
        Ok(()) => println!("OK"),
        Err(e) => {
            println!("FAILED");
            println!("  Error: {}", e);
            return Err(anyhow::anyhow!("Configuration validation failed"));
        }
    }

    let allow_list = config.allow_list();

    // Show configuration summary
    println!("----------------------------------------------------------------------");
    println!("Configuration Summary:");
    println!("  Port: {}", config.port);
    println!(
        "  Database Host: {}",
        config.mongo_uri().map(host_from_uri).unwrap_or_default()
    );
    println!(
        "  Server Selection Timeout: {}ms",
        config.db_server_selection_timeout_ms
    );
    println!("  Socket Timeout: {}ms", config.db_socket_timeout_ms);
    println!("  Connect Retries: {}", config.db_connect_retries);
    println!(
        "  Heartbeat: every {}s, gives up after {} failures",
        config.db_heartbeat_secs, config.db_heartbeat_max_failures
    );
    println!("  Body Limit: {} bytes", config.body_limit_bytes);
    if allow_list.is_empty() {
        println!("  Allowed Origins: (local only)");
    } else {
        println!("  Allowed Origins: {}", allow_list.sorted().join(", "));
    }
    println!(
        "  Maintenance: {}",
        if config.maintenance_enabled() { "ON" } else { "Off" }
    );
    println!("  Fault Policy: {}", config.fault_policy);
    println!("  Log Filter: {}", config.log_filter(false));
    match config.metrics_port {
        Some(port) => println!("  Metrics Port: {}", port),
        None => println!("  Metrics: Disabled"),
    }
    println!("======================================================================");
    println!("CONFIGURATION CHECK PASSED");
    println!("======================================================================");

    Ok(())
}

/// Connect to the database and serve until a shutdown signal arrives.
async fn cmd_run(loaded: Result<Config, envy::Error>) -> anyhow::Result<()> {
    info!("Loading configuration...");
    let config = loaded.map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    let running = Bootstrap::new(config, MongoConnector).start().await?;
    running.serve(shutdown_signal()).await?;

    info!("Shutdown complete");
    Ok(())
}
