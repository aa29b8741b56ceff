//! mixproxy - mixed SOCKS5/HTTP forward proxy
//!
//! Binary entry point: parses arguments, loads the configuration, wires
//! up logging and runs the server until a termination signal arrives.

use anyhow::Result;
use clap::Parser;
use mixproxy::config::load_config;
use mixproxy::server::Server;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// Mixed SOCKS5/HTTP forward proxy with rule-based egress routing
#[derive(Parser, Debug)]
#[command(name = "mixproxy")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); the config file's
    /// log.level takes precedence when set
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Enable JSON logging format
    #[arg(long)]
    json_log: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = load_config(&args.config)?;

    let level = config.log.level.as_deref().unwrap_or(args.log_level.as_str());
    setup_logging(level, args.json_log)?;

    info!("{} v{}", mixproxy::NAME, mixproxy::VERSION);
    info!("configuration loaded from {:?}", args.config);

    let server = Server::new(&config)?;
    server.start().await?;

    wait_for_signal().await;

    info!("shutting down");
    server.stop().await;
    Ok(())
}

/// Block until a termination signal arrives
async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sighup = signal(SignalKind::hangup()).expect("failed to install SIGHUP handler");
        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        let mut sigquit = signal(SignalKind::quit()).expect("failed to install SIGQUIT handler");

        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("received SIGINT"),
            _ = sighup.recv() => info!("received SIGHUP"),
            _ = sigterm.recv() => info!("received SIGTERM"),
            _ = sigquit.recv() => info!("received SIGQUIT"),
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("received Ctrl+C");
    }
}

/// Configure the global tracing subscriber
fn setup_logging(level: &str, json: bool) -> Result<()> {
    let level = match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    if json {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(level)
            .json()
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(level)
            .with_target(true)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }

    Ok(())
}
