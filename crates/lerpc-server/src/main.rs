//! lerpc server - HTTP/WebSocket RPC endpoint with demo handlers.

use anyhow::Result;
use clap::Parser;
use lerpc_core::config::ProtocolConfig;
use lerpc_core::handler::{auth_none, auth_token};
use lerpc_core::{ExecutorConfig, HandlerRegistry, ServerConfig};
use lerpc_server::{handlers, start_server};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "lerpc-server")]
#[command(about = "RPC server exposing /execute, /connect and /download")]
struct Args {
    /// Port to listen on (0 = auto-assign)
    #[arg(short, long, default_value_t = ProtocolConfig::DEFAULT_PORT)]
    port: u16,

    /// Host to bind to
    #[arg(long, default_value = ProtocolConfig::DEFAULT_HOST)]
    host: String,

    /// Maximum number of queued requests
    #[arg(long, default_value_t = ProtocolConfig::QUEUE_CAPACITY)]
    queue_capacity: usize,

    /// Executor tick interval in milliseconds
    #[arg(long, default_value_t = 1)]
    tick_ms: u64,

    /// Upper bound on a single handler run, in milliseconds
    #[arg(long)]
    handler_timeout_ms: Option<u64>,

    /// Default download lifetime in seconds
    #[arg(long, default_value_t = 5)]
    download_lifetime_secs: u64,

    /// Default download use limit
    #[arg(long, default_value_t = ProtocolConfig::DOWNLOAD_LIMIT)]
    download_limit: u32,

    /// Token required by the demo handlers (none = open)
    #[arg(long)]
    token: Option<String>,

    /// Directory `download/file.prepare` serves from
    #[arg(long, default_value = ".")]
    serve_root: PathBuf,

    /// Send internal error messages to callers
    #[arg(long)]
    expose_errors: bool,

    /// Enable debug logging (ignored when RUST_LOG is set)
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging; RUST_LOG overrides --debug
    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_string().to_lowercase()));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    info!("Starting lerpc server");

    let executor = ExecutorConfig::new()
        .with_queue_capacity(args.queue_capacity)
        .with_tick_interval(Duration::from_millis(args.tick_ms))
        .with_handler_timeout(args.handler_timeout_ms.map(Duration::from_millis));
    let config = ServerConfig::new()
        .with_host(args.host)
        .with_port(args.port)
        .with_executor(executor)
        .with_download_defaults(
            Duration::from_secs(args.download_lifetime_secs),
            args.download_limit,
        )
        .with_expose_errors(args.expose_errors);

    let auth = match args.token {
        Some(token) => auth_token(token),
        None => auth_none(),
    };
    let registry = Arc::new(HandlerRegistry::new());
    handlers::register(&registry, auth, args.serve_root);
    info!("Registered {} handlers", registry.len());

    let server = start_server(config, registry).await?;
    info!("lerpc server running on {}", server.addr());

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, exiting");
    server.shutdown().await;

    Ok(())
}
