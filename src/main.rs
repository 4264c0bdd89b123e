use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use relayfs::proxy::demo::round_trip_demo;
use relayfs::remote::RemoteStorage;
use relayfs::server::{self, store::FileStore};
use relayfs::wire::client::TcpRemoteClient;

#[derive(Parser)]
#[command(name = "relayfs", about = "Caching file-access proxy and its storage server")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the storage server.
    Serve {
        #[arg(long, default_value_t = 9461)]
        port: u16,
        /// Root directory holding the backing files.
        #[arg(long)]
        root: PathBuf,
    },
    /// Run an end-to-end round trip through a proxy.
    Demo {
        /// Storage server address; spawns an in-process one when omitted.
        #[arg(long)]
        server: Option<String>,
        /// Local cache directory for the proxy.
        #[arg(long)]
        cache_dir: Option<PathBuf>,
        /// Cache capacity in bytes.
        #[arg(long, default_value_t = 64 * 1024 * 1024)]
        capacity: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match Cli::parse().command {
        Command::Serve { port, root } => serve(port, root).await,
        Command::Demo {
            server,
            cache_dir,
            capacity,
        } => demo(server, cache_dir, capacity).await,
    }
}

async fn serve(port: u16, root: PathBuf) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(&root)
        .await
        .with_context(|| format!("storage root {}", root.display()))?;
    let store = Arc::new(FileStore::new(root));
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;

    tokio::select! {
        result = server::net::serve(listener, store) => result?,
        _ = tokio::signal::ctrl_c() => info!("shutting down"),
    }
    Ok(())
}

async fn demo(
    server: Option<String>,
    cache_dir: Option<PathBuf>,
    capacity: u64,
) -> anyhow::Result<()> {
    let cache_dir = cache_dir
        .or_else(|| dirs::cache_dir().map(|d| d.join("relayfs")))
        .unwrap_or_else(|| std::env::temp_dir().join("relayfs-cache"));

    let remote: Arc<dyn RemoteStorage> = match server {
        Some(addr) => Arc::new(TcpRemoteClient::new(addr)),
        None => {
            let root = std::env::temp_dir().join("relayfs-demo-storage");
            tokio::fs::create_dir_all(&root).await?;
            let store = Arc::new(FileStore::new(root));
            let listener = TcpListener::bind(("127.0.0.1", 0)).await?;
            let addr = listener.local_addr()?;
            tokio::spawn(server::net::serve(listener, store));
            info!(%addr, "spawned in-process storage server");
            Arc::new(TcpRemoteClient::new(addr.to_string()))
        }
    };

    round_trip_demo(remote, &cache_dir, capacity)
        .await
        .map_err(|e| anyhow::anyhow!("demo failed: {e}"))?;
    println!("demo: OK");
    Ok(())
}
