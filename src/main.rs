use std::path::PathBuf;

use clap::Parser;
use tracing::info;

use pgmock::config::ServerConfig;
use pgmock::server::Server;

#[derive(Parser, Debug)]
#[command(name = "pgmock")]
#[command(about = "PostgreSQL wire protocol server emulator")]
struct Args {
    /// Host to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = 5432)]
    port: u16,

    /// Maximum number of concurrent connections
    #[arg(short, long = "max-conn", default_value_t = 100)]
    max_connections: usize,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log file (default: stderr)
    #[arg(short, long)]
    log_file: Option<PathBuf>,

    /// Enable SSL (requires a TLS-terminating listener; the core still
    /// answers SSLRequest with 'N')
    #[arg(short, long)]
    ssl: bool,

    /// SSL certificate file
    #[arg(long)]
    ssl_cert: Option<PathBuf>,

    /// SSL key file
    #[arg(long)]
    ssl_key: Option<PathBuf>,

    /// Enable verbose (debug) logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let log_level = if args.verbose {
        "debug"
    } else {
        args.log_level.as_str()
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("pgmock={}", log_level)));

    match &args.log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::sync::Arc::new(file))
                .with_ansi(false)
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }

    let config = ServerConfig {
        host: args.host,
        port: args.port,
        max_connections: args.max_connections,
        ssl_enabled: args.ssl,
        ssl_cert: args.ssl_cert,
        ssl_key: args.ssl_key,
        ..Default::default()
    };

    info!(
        addr = %config.addr(),
        max_connections = config.max_connections,
        ssl = config.ssl_enabled,
        "starting pgmock"
    );

    let server = Server::new(config);
    let shutdown = server.shutdown_token();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, shutting down");
            shutdown.cancel();
        }
    });

    server.run().await?;

    info!("server shutdown complete");
    Ok(())
}
