//! courier: run a courier server or poke one from the command line
//!
//! ## Commands
//!
//! - `serve`: accept clients, answer `ping` and `echo`, broadcast `ping`
//! - `call`: connect, send one request, print the result as JSON

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use courier_client::Client;
use courier_core::{ClientConfig, Request, ServerConfig, config::DEFAULT_PORT};
use courier_messenger::builtin::{now_millis, register_builtins};
use courier_messenger::{ReceptorRegistry, TokenAuthenticator};
use courier_server::Server;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "courier")]
#[command(about = "Line-delimited JSON request/response over TCP or Unix sockets")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a server exposing the built-in receptors
    Serve {
        /// Address to bind
        #[arg(long, env = "COURIER_BIND", default_value = "0.0.0.0")]
        bind: String,

        /// Port to listen on
        #[arg(long, env = "COURIER_PORT", default_value_t = DEFAULT_PORT)]
        port: u16,

        /// Listen on a Unix socket instead of TCP
        #[arg(long, env = "COURIER_SOCKET")]
        socket: Option<PathBuf>,

        /// Request timeout in milliseconds
        #[arg(long, env = "COURIER_TIMEOUT_MS", default_value = "5000")]
        timeout_ms: u64,

        /// Require this token in every request's `token` parameter
        #[arg(long, env = "COURIER_TOKEN")]
        token: Option<String>,

        /// Broadcast a ping to every client this often (0 = never)
        #[arg(long, env = "COURIER_PING_INTERVAL_MS", default_value = "5000")]
        ping_interval_ms: u64,
    },

    /// Send one request and print its result
    Call {
        /// Method to invoke
        method: String,

        /// Request parameter as key=value; the value is parsed as JSON,
        /// falling back to a plain string
        #[arg(long = "param", short = 'p', value_parser = parse_param)]
        params: Vec<(String, Value)>,

        /// Server host
        #[arg(long, env = "COURIER_HOST", default_value = "127.0.0.1")]
        host: String,

        /// Server port
        #[arg(long, env = "COURIER_PORT", default_value_t = DEFAULT_PORT)]
        port: u16,

        /// Connect to a Unix socket instead of TCP
        #[arg(long, env = "COURIER_SOCKET")]
        socket: Option<PathBuf>,

        /// Request timeout in milliseconds
        #[arg(long, env = "COURIER_TIMEOUT_MS", default_value = "5000")]
        timeout_ms: u64,
    },
}

fn parse_param(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", raw))?;
    if key.is_empty() {
        return Err(format!("empty parameter name in '{}'", raw));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

async fn serve(
    config: ServerConfig,
    socket: Option<PathBuf>,
    token: Option<String>,
    ping_interval: Duration,
) -> Result<()> {
    let mut receptors = ReceptorRegistry::new();
    register_builtins(&mut receptors);

    let mut builder = Server::builder(config).receptors(Arc::new(receptors));
    if let Some(token) = token {
        info!("Token authentication enabled");
        builder = builder.authenticator(Arc::new(TokenAuthenticator::new(token)));
    }

    let server = match socket {
        #[cfg(unix)]
        Some(path) => builder.bind_unix(path).await?,
        #[cfg(not(unix))]
        Some(_) => anyhow::bail!("Unix sockets are not supported on this platform"),
        None => builder.bind().await?,
    };
    server.start()?;

    let mut ticker = (!ping_interval.is_zero()).then(|| tokio::time::interval(ping_interval));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
            _ = async {
                match ticker.as_mut() {
                    Some(ticker) => ticker.tick().await,
                    None => std::future::pending().await,
                }
            } => broadcast_ping(&server).await,
        }
    }

    server.close().await;
    Ok(())
}

async fn broadcast_ping(server: &Server) {
    let results = server
        .send_request_as::<i64>(Request::new("ping").param("init", now_millis()))
        .await;
    for (id, result) in results {
        match result {
            Ok(Some(elapsed)) => info!("Ping {}: {}ms", id, elapsed),
            Ok(None) => info!("Ping {}: no answer (no ping receptor)", id),
            Err(err) => warn!("Ping {} failed: {}", id, err),
        }
    }
}

async fn call(config: ClientConfig, socket: Option<PathBuf>, request: Request) -> Result<()> {
    let client = match socket {
        #[cfg(unix)]
        Some(path) => Client::builder(config).connect_unix(path).await?,
        #[cfg(not(unix))]
        Some(_) => anyhow::bail!("Unix sockets are not supported on this platform"),
        None => Client::connect(config).await?,
    };

    let method = request.method.clone();
    let result = client.request(request).await;
    client.close().await;

    let object = result.with_context(|| format!("Request '{}' failed", method))?;
    println!("{}", serde_json::to_string_pretty(&object.unwrap_or(Value::Null))?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so `call` output stays clean
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("courier=info")))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr),
        )
        .init();

    match Cli::parse().command {
        Commands::Serve {
            bind,
            port,
            socket,
            timeout_ms,
            token,
            ping_interval_ms,
        } => {
            let config = ServerConfig {
                bind,
                port,
                timeout: Duration::from_millis(timeout_ms),
            };
            serve(config, socket, token, Duration::from_millis(ping_interval_ms)).await
        }
        Commands::Call {
            method,
            params,
            host,
            port,
            socket,
            timeout_ms,
        } => {
            let config = ClientConfig {
                host,
                port,
                timeout: Duration::from_millis(timeout_ms),
                ..Default::default()
            };
            let request = params
                .into_iter()
                .fold(Request::new(method), |request, (key, value)| {
                    request.param(key, value)
                });
            call(config, socket, request).await
        }
    }
}
