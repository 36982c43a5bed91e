use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "coinstreak-server", version)]
struct Args {
    /// Address to listen on.
    #[arg(long, default_value = "127.0.0.1:39401")]
    addr: SocketAddr,

    /// Sqlite database path. Defaults to ~/.coinstreak/coinstreak.db.
    #[arg(long)]
    db: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let db_path = args.db.unwrap_or_else(|| {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".coinstreak")
            .join("coinstreak.db")
    });

    tracing::info!("listening on ws://{} (db {})", args.addr, db_path.display());
    coinstreak_server::serve(args.addr, db_path).await
}
