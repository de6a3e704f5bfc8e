//! Chatty - peer-to-peer TCP chat
//!
//! Listens for peers on the given port while letting the user dial, list,
//! message and drop connections from an interactive prompt.

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chatty::{
    config::ConfigManager,
    net, Config, ConnectionManager, Console, Output, ShutdownCoordinator, StdOutput,
};

/// CLI arguments for Chatty
#[derive(Parser, Debug)]
#[command(name = "chatty")]
#[command(about = "Chatty - peer-to-peer TCP chat")]
#[command(version)]
#[command(long_about = "
Chatty - peer-to-peer TCP chat

Listens for incoming connections on the given port and lets you open
outbound connections, list them, send messages and terminate them from an
interactive prompt.

Configuration priority (highest to lowest):
1. Command-line arguments
2. Configuration file
3. Environment variables
4. Built-in defaults

Environment variables:
  CHATTY_BIND_IP        - Address to listen on (default: discovered outbound address)
  CHATTY_PORT           - Port to listen on
  CHATTY_DIAL_TIMEOUT   - Outbound dial timeout (e.g., 10s)
  CHATTY_LOG_LEVEL      - Log level (trace, debug, info, warn, error)
")]
pub struct CliArgs {
    /// Configuration file path
    #[arg(short, long, default_value = "chatty.toml", help = "Path to configuration file")]
    pub config: PathBuf,

    /// Port to listen on (overrides config file)
    #[arg(short, long, help = "Port to listen on for incoming connections")]
    pub port: Option<u16>,

    /// Bind address (overrides config file)
    #[arg(short, long, help = "Address to listen on (e.g., 0.0.0.0)")]
    pub bind: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, help = "Log level")]
    pub log_level: Option<String>,

    /// Enable verbose logging (sets log level to debug)
    #[arg(short, long, help = "Enable verbose logging")]
    pub verbose: bool,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration and exit")]
    pub validate_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    // CLI args > config file > environment > defaults
    let mut config = ConfigManager::load(&args.config)?;
    config
        .merge_with_cli_args(args.bind.as_deref(), args.port, args.log_level.as_deref())
        .context("Invalid command-line arguments")?;
    config
        .validate()
        .context("Final configuration validation failed")?;

    init_tracing(&args, &config)?;

    if args.validate_config {
        info!("Configuration is valid");
        println!("Configuration is valid");
        println!("  Bind address: {}", config.server.bind_ip.map_or("<outbound address>".to_string(), |ip| ip.to_string()));
        println!("  Port: {}", config.server.port);
        println!("  Dial timeout: {:?}", config.server.dial_timeout);
        println!("  Max message length: {} bytes", config.server.max_message_len);
        return Ok(());
    }

    info!("Starting Chatty v{}", env!("CARGO_PKG_VERSION"));

    let outbound_ip = net::outbound_ip().await;
    if config.server.bind_ip.is_none() {
        config.server.bind_ip = Some(outbound_ip);
    }

    let shutdown = ShutdownCoordinator::new(config.server.shutdown_timeout);
    let output: Arc<dyn Output> = Arc::new(StdOutput);

    let manager = Arc::new(
        ConnectionManager::bind(Arc::new(config), Arc::clone(&output), shutdown.clone())
            .await
            .context("Failed to start listener")?,
    );
    let accept_handle = manager.spawn_accept_loop();

    let console = Console::new(Arc::clone(&manager), Arc::clone(&output)).with_display_ip(
        manager
            .config()
            .server
            .bind_ip
            .filter(|ip| !ip.is_unspecified())
            .unwrap_or(outbound_ip),
    );
    console.startup_text();

    // SIGINT / SIGTERM run the same teardown as the exit command
    let signal_manager = Arc::clone(&manager);
    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        match signal_shutdown.listen_for_signals().await {
            Ok(()) => signal_manager.exit(),
            Err(e) => error!("Error setting up signal handlers: {}", e),
        }
    });

    console.run(spawn_stdin_reader(), &shutdown).await;

    manager
        .wait_for_connections_to_close(shutdown.timeout())
        .await?;

    match tokio::time::timeout(shutdown.timeout(), accept_handle).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => warn!("Accept loop ended with error: {}", e),
        Ok(Err(e)) => {
            if !e.is_cancelled() {
                error!("Accept loop task failed: {}", e);
            }
        }
        Err(_) => warn!("Accept loop did not stop within {:?}", shutdown.timeout()),
    }

    info!("Shutdown complete");
    Ok(())
}

/// Read stdin on a dedicated thread. A blocking read on a runtime worker
/// would keep the runtime from shutting down.
fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(line) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("Failed to read from stdin: {}", e);
                    break;
                }
            }
        }
    });
    rx
}

/// Initialize tracing/logging. Logs go to stderr so they stay out of the
/// chat output.
fn init_tracing(args: &CliArgs, config: &Config) -> Result<()> {
    let log_level = if args.verbose {
        "debug"
    } else {
        config.monitoring.log_level.as_str()
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(true),
        )
        .with(env_filter)
        .init();

    Ok(())
}
