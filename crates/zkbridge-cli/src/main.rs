//! zkbridged: ZK9500 fingerprint bridge daemon.
//!
//! Owns the scanner attached to this workstation and exposes it to browser
//! clients over a persistent WebSocket channel and a plain HTTP API.
//!
//! # Usage
//!
//! ```text
//! zkbridged [OPTIONS]
//!
//! Options:
//!   --config <PATH>         TOML configuration file
//!   --ws-bind <ADDR>        WebSocket listen address [default: 0.0.0.0:8765]
//!   --api-bind <ADDR>       HTTP API listen address [default: 0.0.0.0:8080]
//!   --no-api                Do not start the HTTP API
//!   --com-port <PORT>       Serial port to try when auto-detection fails
//!   --baud-rate <BAUD>      Baud rate tried before the built-in list
//!   --scan-timeout <SECS>   Default capture timeout
//!   --log-level <FILTER>    Log filter, overrides RUST_LOG
//! ```
//!
//! Every option can also be set through a `ZKBRIDGE_*` environment variable;
//! command-line values win.
//!
//! # Lifecycle
//!
//! Startup makes one connect attempt and only logs if it fails; clients can
//! connect later. On Ctrl+C or SIGTERM both front-ends stop accepting, their
//! tasks drain, and the device is disconnected once before exit.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use zkbridge_core::{BridgeConfig, ClientIdentity};
use zkbridge_hardware::{ConnectionManager, DeviceService};
use zkbridge_network::{Dispatcher, WsServer, http};

/// ZK9500 fingerprint bridge.
#[derive(Debug, Parser)]
#[command(name = "zkbridged", about = "WebSocket and HTTP bridge for ZK9500 fingerprint scanners", version)]
struct Cli {
    /// TOML configuration file. Defaults apply when omitted.
    #[arg(long, env = "ZKBRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// WebSocket listen address.
    #[arg(long, env = "ZKBRIDGE_WS_BIND")]
    ws_bind: Option<SocketAddr>,

    /// HTTP API listen address.
    #[arg(long, env = "ZKBRIDGE_API_BIND")]
    api_bind: Option<SocketAddr>,

    /// Run the WebSocket channel only.
    #[arg(long, env = "ZKBRIDGE_NO_API")]
    no_api: bool,

    /// Serial port tried when auto-detection finds nothing (e.g. COM3).
    #[arg(long, env = "ZKBRIDGE_COM_PORT")]
    com_port: Option<String>,

    /// Baud rate tried before the built-in list.
    #[arg(long, env = "ZKBRIDGE_BAUD_RATE")]
    baud_rate: Option<u32>,

    /// Default capture timeout in seconds.
    #[arg(long, env = "ZKBRIDGE_SCAN_TIMEOUT")]
    scan_timeout: Option<u64>,

    /// Log filter (e.g. `debug`, `zkbridge_hardware=trace`). Overrides RUST_LOG.
    #[arg(long, env = "ZKBRIDGE_LOG_LEVEL")]
    log_level: Option<String>,
}

impl Cli {
    /// Load the configuration file, then apply command-line overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if the
    /// merged configuration is invalid.
    fn into_bridge_config(self) -> anyhow::Result<BridgeConfig> {
        let mut config = match &self.config {
            Some(path) => BridgeConfig::load(path)
                .with_context(|| format!("failed to load configuration from {}", path.display()))?,
            None => BridgeConfig::default(),
        };

        if let Some(addr) = self.ws_bind {
            config.websocket.bind_addr = addr;
        }
        if let Some(addr) = self.api_bind {
            config.api.bind_addr = addr;
        }
        if self.no_api {
            config.api.enabled = false;
        }
        if let Some(port) = self.com_port {
            config.device.com_port = Some(port);
        }
        if let Some(baud) = self.baud_rate {
            config.device.baud_rate = Some(baud);
        }
        if let Some(secs) = self.scan_timeout {
            config.device.scan_timeout_secs = secs;
        }

        config.validate().context("invalid configuration")?;
        Ok(config)
    }
}

fn init_tracing(log_level: Option<&str>) -> anyhow::Result<()> {
    let filter = match log_level {
        Some(directives) => {
            EnvFilter::try_new(directives).with_context(|| format!("invalid log filter '{directives}'"))?
        }
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    tracing_subscriber::fmt().with_env_filter(filter).init();
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref())?;

    let config = cli.into_bridge_config()?;
    run(config).await
}

async fn run(config: BridgeConfig) -> anyhow::Result<()> {
    let identity = ClientIdentity::resolve(config.identity.advertise_ip);
    info!(
        hostname = %identity.hostname,
        ip = %identity.ip,
        version = zkbridge_core::VERSION,
        "ZK9500 bridge starting"
    );

    let manager = ConnectionManager::new(&config.device, identity);
    let service = DeviceService::new(manager, &config.device);

    match service.connect().await {
        Ok(outcome) if outcome.is_connected() => info!(outcome = ?outcome, "Device connected at startup"),
        Ok(outcome) => warn!(reason = outcome.message(), "No device at startup; clients may connect later"),
        Err(e) => warn!(error = %e, "Startup connect did not finish"),
    }

    let dispatcher = Dispatcher::new(service.clone());
    let shutdown = CancellationToken::new();
    let tracker = TaskTracker::new();

    let ws = WsServer::bind(&config.websocket, dispatcher.clone())
        .await
        .context("failed to start WebSocket server")?;
    tracker.spawn({
        let shutdown = shutdown.clone();
        async move {
            if let Err(e) = ws.run(shutdown).await {
                error!(error = %e, "WebSocket server failed");
            }
        }
    });

    if config.api.enabled {
        let listener = TcpListener::bind(config.api.bind_addr)
            .await
            .with_context(|| format!("failed to bind HTTP API on {}", config.api.bind_addr))?;
        tracker.spawn({
            let shutdown = shutdown.clone();
            async move {
                if let Err(e) = http::serve_on(listener, dispatcher, shutdown).await {
                    error!(error = %e, "HTTP API failed");
                }
            }
        });
    } else {
        info!("HTTP API disabled");
    }
    tracker.close();

    wait_for_signal().await?;

    info!("Shutting down");
    shutdown.cancel();
    tracker.wait().await;

    if let Err(e) = service.disconnect().await {
        warn!(error = %e, "Device did not disconnect cleanly");
    }
    info!("Exiting");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() -> anyhow::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for Ctrl+C")?;
            info!("Received SIGINT");
        }
        _ = sigterm.recv() => info!("Received SIGTERM"),
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_signal() -> anyhow::Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl+C")?;
    info!("Received Ctrl+C");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_arguments() {
        let cli = Cli::parse_from(["zkbridged"]);
        let config = cli.into_bridge_config().unwrap();
        assert_eq!(config, BridgeConfig::default());
    }

    #[test]
    fn test_overrides_apply() {
        let cli = Cli::parse_from([
            "zkbridged",
            "--ws-bind",
            "127.0.0.1:9001",
            "--no-api",
            "--com-port",
            "COM7",
            "--baud-rate",
            "57600",
            "--scan-timeout",
            "20",
        ]);
        let config = cli.into_bridge_config().unwrap();

        assert_eq!(config.websocket.bind_addr, "127.0.0.1:9001".parse().unwrap());
        assert!(!config.api.enabled);
        assert_eq!(config.device.com_port.as_deref(), Some("COM7"));
        assert_eq!(config.device.baud_rate, Some(57600));
        assert_eq!(config.device.scan_timeout_secs, 20);
    }

    #[test]
    fn test_zero_scan_timeout_is_rejected() {
        let cli = Cli::parse_from(["zkbridged", "--scan-timeout", "0"]);
        assert!(cli.into_bridge_config().is_err());
    }

    #[test]
    fn test_oversized_scan_timeout_is_rejected() {
        let cli = Cli::parse_from(["zkbridged", "--scan-timeout", "18446744073709551615"]);
        let err = cli.into_bridge_config().unwrap_err();
        assert!(format!("{err:#}").contains("scan_timeout_secs"));
    }

    #[test]
    fn test_missing_config_file_names_path() {
        let cli = Cli::parse_from(["zkbridged", "--config", "/nonexistent/zkbridge.toml"]);
        let err = cli.into_bridge_config().unwrap_err();
        assert!(format!("{err:#}").contains("/nonexistent/zkbridge.toml"));
    }

    #[test]
    fn test_bad_bind_address_fails_parse() {
        assert!(Cli::try_parse_from(["zkbridged", "--api-bind", "not-an-addr"]).is_err());
    }
}
