//! tracelink command-line entry point.
//!
//! ```text
//! tracelink flat-server [port]
//! tracelink flat-client [host] [port]
//! tracelink rpc-server  [port]
//! tracelink rpc-client  [host] [port] [username] [password]
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use tracelink::client;
use tracelink::config::{load_config, TracelinkConfig};
use tracelink::lifecycle::{signals, Shutdown};
use tracelink::observability::{logging, metrics};
use tracelink::{Error, Server, TransportKind};

const FLAT_PORT: u16 = 8443;
const RPC_PORT: u16 = 830;

#[derive(Parser)]
#[command(name = "tracelink", version)]
#[command(about = "Trace-context propagation over structured RPC and flat text sessions", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log filter directive (overrides the configured one)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve flat-text sessions
    FlatServer { port: Option<u16> },
    /// Send one trace context over flat text
    FlatClient { host: Option<String>, port: Option<u16> },
    /// Serve structured-RPC sessions
    RpcServer { port: Option<u16> },
    /// Run get-config then edit-config over structured RPC
    RpcClient {
        host: Option<String>,
        port: Option<u16>,
        username: Option<String>,
        password: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let (mut config, from_file) = match &cli.config {
        Some(path) => match load_config(path) {
            Ok(config) => (config, true),
            Err(e) => {
                eprintln!("tracelink: {}: {e}", path.display());
                return ExitCode::FAILURE;
            }
        },
        None => (TracelinkConfig::default(), false),
    };
    if let Some(filter) = &cli.log_level {
        config.observability.log_filter = filter.clone();
    }

    logging::init(&config.observability.log_filter);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "tracelink starting");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    match run(cli.command, config, from_file).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "tracelink failed");
            eprintln!("tracelink: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Commands, mut config: TracelinkConfig, from_file: bool) -> Result<(), Error> {
    // Without a config file each subcommand falls back to its own well-known port.
    let fallback = |port: Option<u16>, default: u16| port.or((!from_file).then_some(default));

    match command {
        Commands::FlatServer { port } => {
            if let Some(port) = fallback(port, FLAT_PORT) {
                config.listener.bind_address = with_port(&config.listener.bind_address, port);
            }
            serve(config, TransportKind::FlatText).await
        }
        Commands::RpcServer { port } => {
            if let Some(port) = fallback(port, RPC_PORT) {
                config.listener.bind_address = with_port(&config.listener.bind_address, port);
            }
            serve(config, TransportKind::StructuredRpc).await
        }
        Commands::FlatClient { host, port } => {
            if let Some(host) = host {
                config.client.host = host;
            }
            if let Some(port) = fallback(port, FLAT_PORT) {
                config.client.port = port;
            }
            let exchange = client::run_flat_exchange(&config).await?;
            println!("{}", serde_json::to_string_pretty(&exchange)?);
            Ok(())
        }
        Commands::RpcClient {
            host,
            port,
            username,
            password,
        } => {
            if let Some(host) = host {
                config.client.host = host;
            }
            if let Some(port) = fallback(port, RPC_PORT) {
                config.client.port = port;
            }
            if let Some(username) = username {
                config.client.username = username;
            }
            if let Some(password) = password {
                config.client.password = password;
            }
            let exchange = client::run_rpc_exchange(&config).await?;
            println!("{}", serde_json::to_string_pretty(&exchange)?);
            Ok(())
        }
    }
}

async fn serve(config: TracelinkConfig, kind: TransportKind) -> Result<(), Error> {
    let shutdown = Arc::new(Shutdown::new());
    signals::spawn_signal_handler(Arc::clone(&shutdown));

    let server = Server::new(config, kind);
    let listener = server.bind().await?;
    server.run(listener, shutdown.token()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Replace the port of a `host:port` address.
fn with_port(address: &str, port: u16) -> String {
    match address.rsplit_once(':') {
        Some((host, _)) => format!("{host}:{port}"),
        None => format!("{address}:{port}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_port_replaces_existing_port() {
        assert_eq!(with_port("0.0.0.0:8443", 830), "0.0.0.0:830");
        assert_eq!(with_port("[::1]:1", 2), "[::1]:2");
        assert_eq!(with_port("localhost", 9), "localhost:9");
    }

    #[test]
    fn cli_parses_positionals() {
        let cli = Cli::try_parse_from(["tracelink", "rpc-client", "10.0.0.1", "2830", "ops"]).unwrap();
        match cli.command {
            Commands::RpcClient {
                host,
                port,
                username,
                password,
            } => {
                assert_eq!(host.as_deref(), Some("10.0.0.1"));
                assert_eq!(port, Some(2830));
                assert_eq!(username.as_deref(), Some("ops"));
                assert_eq!(password, None);
            }
            _ => panic!("wrong subcommand"),
        }
    }

    #[test]
    fn global_flags_follow_subcommand() {
        let cli = Cli::try_parse_from(["tracelink", "flat-server", "--log-level", "debug"]).unwrap();
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        assert!(matches!(cli.command, Commands::FlatServer { port: None }));
    }
}
