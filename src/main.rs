//! logkv server binary

use clap::Parser;
use logkv::{LogKvServer, Result, ServerConfig};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about = "Append-only key-value store over TCP", long_about = None)]
struct Args {
    /// Socket address to listen on
    #[arg(long, default_value = "0.0.0.0:12347")]
    listen: String,

    /// Record log file
    #[arg(long, default_value = "users.db")]
    db: PathBuf,

    /// Maximum number of connections served at once
    #[arg(long, default_value_t = 1024)]
    max_connections: usize,

    /// Per-connection read/write deadline in seconds, 0 to disable
    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,

    /// Keep an in-memory index rebuilt from the log at startup
    #[arg(long)]
    indexed: bool,
}

impl From<Args> for ServerConfig {
    fn from(args: Args) -> Self {
        Self {
            bind_addr: args.listen,
            db_path: args.db,
            max_connections: args.max_connections,
            io_timeout: (args.timeout_secs > 0).then(|| Duration::from_secs(args.timeout_secs)),
            indexed: args.indexed,
        }
    }
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = ServerConfig::from(Args::parse());
    let server = Arc::new(LogKvServer::bind(config).await?);

    let server_clone = Arc::clone(&server);
    tokio::spawn(async move {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl+C");
            return;
        }

        info!("received Ctrl+C, shutting down");
        server_clone.shutdown();
    });

    server.run().await?;

    Ok(())
}
