//! `sockbridge` – socket-to-bus bridge.
//!
//! Two subcommands:
//!
//! * `serve [HOST] [PORT]` runs the bridge server on an in-process
//!   [`EventBus`], logging every bus event as JSON on target
//!   `sockbridge::bus`.
//! * `client HOST PORT` runs the manual test client, which keeps creating a
//!   channel and publishing on it.
//!
//! Ctrl-C (and SIGTERM) cancel a shared token so both commands exit cleanly.

mod client;
mod config;
mod telemetry;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use colored::Colorize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use sockbridge_middleware::EventBus;
use sockbridge_server::{BridgeServer, Dispatcher};
use sockbridge_types::BridgeError;

#[derive(Debug, Parser)]
#[command(name = "sockbridge", version, about = "TCP text-protocol bridge to a pub/sub bus")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the bridge server.
    Serve {
        /// Interface to listen on (overrides config and environment).
        host: Option<String>,
        /// Port to listen on (overrides config and environment).
        port: Option<u16>,
        /// Config file to read instead of ~/.sockbridge/config.toml.
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Repeatedly create a channel and publish on it.
    Client {
        host: String,
        port: u16,
        /// Delay between rounds, in milliseconds.
        #[arg(long, default_value_t = 500)]
        interval_ms: u64,
        #[arg(long, default_value = client::DEFAULT_CHANNEL)]
        channel: String,
        #[arg(long, default_value = client::DEFAULT_SCHEMA)]
        schema: String,
        /// JSON object published each round.
        #[arg(long, default_value = client::DEFAULT_PAYLOAD)]
        payload: String,
        /// Stop after this many rounds.
        #[arg(long)]
        count: Option<u64>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let _tracing = telemetry::init_tracing("sockbridge");

    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        eprintln!("{}", "⚠  Interrupt received – shutting down …".yellow().bold());
        on_signal.cancel();
    }) {
        warn!(error = %e, "failed to install Ctrl-C handler; graceful shutdown on Ctrl-C will not be available");
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => return fail(&BridgeError::Io(e)),
    };

    let result = runtime.block_on(run(cli.command, shutdown));

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => fail(&e),
    }
}

async fn run(command: Commands, shutdown: CancellationToken) -> Result<(), BridgeError> {
    match command {
        Commands::Serve { host, port, config } => {
            let cfg = resolve_config(config, host, port)?;
            serve(cfg, shutdown).await
        }
        Commands::Client {
            host,
            port,
            interval_ms,
            channel,
            schema,
            payload,
            count,
        } => {
            let options = client::ClientOptions {
                addr: format!("{host}:{port}"),
                interval: Duration::from_millis(interval_ms),
                channel,
                schema,
                payload,
                count,
            };
            client::run(options, shutdown).await
        }
    }
}

fn fail(err: &BridgeError) -> ExitCode {
    eprintln!("{}: {}", "error".red().bold(), err);
    ExitCode::FAILURE
}

/// Merge defaults, the config file, `SOCKBRIDGE_*` variables and the
/// positional arguments, in that order.
fn resolve_config(
    path: Option<PathBuf>,
    host: Option<String>,
    port: Option<u16>,
) -> Result<config::Config, BridgeError> {
    let path = path.unwrap_or_else(config::config_path);
    let mut cfg = match config::load_from(&path) {
        Ok(Some(cfg)) => {
            info!(path = %path.display(), "config loaded");
            cfg
        }
        Ok(None) => config::Config::default(),
        Err(e) => {
            warn!(error = %e, "using default configuration");
            config::Config::default()
        }
    };
    config::apply_env_overrides(&mut cfg);
    if let Some(host) = host {
        cfg.host = host;
    }
    if let Some(port) = port {
        cfg.port = port;
    }
    cfg.validate()?;
    Ok(cfg)
}

async fn serve(cfg: config::Config, shutdown: CancellationToken) -> Result<(), BridgeError> {
    let bus = EventBus::new(cfg.bus_capacity);
    spawn_bus_tap(&bus, shutdown.clone());

    let dispatcher = Arc::new(Dispatcher::with_bus(Arc::new(bus)));
    info!(schemas = ?dispatcher.schemas().names(), "schemas registered");

    BridgeServer::bind(cfg.bind_addr(), dispatcher)
        .await?
        .with_max_frame_len(cfg.max_frame_len)
        .run(shutdown)
        .await
}

/// Log every event published on `bus` until `shutdown` is cancelled.
fn spawn_bus_tap(bus: &EventBus, shutdown: CancellationToken) {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                _ = shutdown.cancelled() => break,
                received = rx.recv() => received,
            };
            match event {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(json) => info!(target: "sockbridge::bus", channel = %event.channel, "{json}"),
                    Err(e) => warn!(target: "sockbridge::bus", error = %e, "event not serialisable"),
                },
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!(target: "sockbridge::bus", skipped = n, "bus tap lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positional_arguments_override_config_file() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "host = \"127.0.0.1\"\nport = 7000\nbus_capacity = 8\n").expect("write");

        let cfg = resolve_config(Some(path.clone()), None, Some(7100)).expect("resolve");
        assert_eq!(cfg.bind_addr(), "127.0.0.1:7100");
        assert_eq!(cfg.bus_capacity, 8);

        let cfg = resolve_config(Some(path), Some("::1".to_string()), None).expect("resolve");
        assert_eq!(cfg.host, "::1");
        assert_eq!(cfg.port, 7000);
    }

    #[test]
    fn unreadable_config_falls_back_to_defaults() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "this is not toml = = =").expect("write");

        let cfg = resolve_config(Some(path), None, None).expect("resolve");
        assert_eq!(cfg.bus_capacity, config::Config::default().bus_capacity);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "bus_capacity = 0\n").expect("write");

        let err = resolve_config(Some(path), None, None).unwrap_err();
        assert!(matches!(err, BridgeError::Config(_)));
    }

    #[test]
    fn cli_parses_client_defaults() {
        let cli = Cli::try_parse_from(["sockbridge", "client", "localhost", "9000"]).expect("parse");
        let Commands::Client {
            host,
            port,
            interval_ms,
            channel,
            count,
            ..
        } = cli.command
        else {
            panic!("expected client subcommand");
        };
        assert_eq!(host, "localhost");
        assert_eq!(port, 9000);
        assert_eq!(interval_ms, 500);
        assert_eq!(channel, client::DEFAULT_CHANNEL);
        assert_eq!(count, None);
    }

    #[test]
    fn cli_parses_serve_without_arguments() {
        let cli = Cli::try_parse_from(["sockbridge", "serve"]).expect("parse");
        assert!(matches!(
            cli.command,
            Commands::Serve {
                host: None,
                port: None,
                config: None
            }
        ));
    }

    #[test]
    fn cli_requires_client_port() {
        assert!(Cli::try_parse_from(["sockbridge", "client", "localhost"]).is_err());
    }
}
