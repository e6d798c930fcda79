//! Wirecall RPC host and command-line client.
//!
//! `serve` hosts the built-in actions on a TCP listener and prints the bound
//! port; `call` connects to a running host and invokes one action.

mod services;

use anyhow::Result;
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;
use wirecall::{Server, ServerOptions, Session, SessionOptions};

#[derive(Parser, Debug)]
#[command(name = "wirecall-rpc")]
#[command(about = "Host and client for wirecall sessions")]
struct Args {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the built-in actions
    Serve {
        /// Port to listen on (0 = auto-assign)
        #[arg(short, long, default_value = "0")]
        port: u16,

        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Maximum concurrent sessions
        #[arg(long)]
        max_connections: Option<usize>,
    },
    /// Invoke one action on a running host
    Call {
        /// Endpoint as host:port
        endpoint: String,

        /// Action name
        action: String,

        /// Arguments as JSON values; anything that is not valid JSON is sent as a string
        args: Vec<String>,

        /// Reply deadline in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging
    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    let options = SessionOptions::from_env()?;

    match args.command {
        Command::Serve {
            port,
            host,
            max_connections,
        } => serve(&host, port, max_connections, options).await,
        Command::Call {
            endpoint,
            action,
            args,
            timeout_ms,
        } => call(&endpoint, &action, &args, timeout_ms, options).await,
    }
}

async fn serve(
    host: &str,
    port: u16,
    max_connections: Option<usize>,
    session: SessionOptions,
) -> Result<()> {
    info!("Starting wirecall RPC host");

    let registry = services::build_registry()?;
    let mut server_options = ServerOptions {
        session,
        ..Default::default()
    };
    if let Some(max) = max_connections {
        server_options.max_connections = max;
    }

    let bind_addr = format!("{}:{}", host, port);
    let mut handle = Server::start(Arc::new(registry), &bind_addr, server_options).await?;

    // Print port for launchers to read (intentional stdout)
    println!("RPC_PORT={}", handle.port);

    info!("RPC host running on {}", handle.addr());

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, exiting");
    handle.shutdown();

    Ok(())
}

async fn call(
    endpoint: &str,
    action: &str,
    raw_args: &[String],
    timeout_ms: Option<u64>,
    options: SessionOptions,
) -> Result<()> {
    let timeout = timeout_ms
        .map(Duration::from_millis)
        .unwrap_or(options.call_timeout);
    let session = Session::builder().options(options).build();
    session.connect(endpoint).await?;

    let args = raw_args.iter().map(|raw| parse_arg(raw)).collect();
    let reply: Value = session.call_with_timeout(action, args, timeout).await?;
    println!("{}", serde_json::to_string_pretty(&reply)?);

    session.close();
    Ok(())
}

/// Interpret a command-line argument as JSON, falling back to a plain string.
fn parse_arg(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_arg() {
        assert_eq!(parse_arg("42"), json!(42));
        assert_eq!(parse_arg("[1, 2]"), json!([1, 2]));
        assert_eq!(parse_arg("\"quoted\""), json!("quoted"));
        assert_eq!(parse_arg("hello"), json!("hello"));
    }

    #[test]
    fn test_cli_parses_call() {
        let args = Args::parse_from([
            "wirecall-rpc",
            "call",
            "127.0.0.1:9000",
            "Echo",
            "hi",
            "--timeout-ms",
            "500",
        ]);
        match args.command {
            Command::Call {
                endpoint,
                action,
                args,
                timeout_ms,
            } => {
                assert_eq!(endpoint, "127.0.0.1:9000");
                assert_eq!(action, "Echo");
                assert_eq!(args, vec!["hi"]);
                assert_eq!(timeout_ms, Some(500));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_cli_serve_defaults() {
        let args = Args::parse_from(["wirecall-rpc", "--debug", "serve"]);
        assert!(args.debug);
        match args.command {
            Command::Serve { port, host, max_connections } => {
                assert_eq!(port, 0);
                assert_eq!(host, "127.0.0.1");
                assert_eq!(max_connections, None);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
