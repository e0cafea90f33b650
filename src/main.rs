//! treecast server binary
//!
//! Reads `PORT` from the environment (default 3000) and serves until
//! interrupted.

use tracing_subscriber::EnvFilter;

use treecast::{ServerConfig, TreecastServer};

#[tokio::main]
async fn main() -> treecast::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("treecast=info")),
        )
        .init();

    let config = ServerConfig::from_env()?;
    let server = TreecastServer::new(config);

    server
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
}
