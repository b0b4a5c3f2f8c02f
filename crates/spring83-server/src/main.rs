//! Spring '83 board server.

use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use spring83_server::clock::SystemClock;
use spring83_server::engine::{self, ProtocolEngine};
use spring83_server::{Args, http};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Args::parse().into_config()?;
    let engine = Arc::new(ProtocolEngine::open(&config, Arc::new(SystemClock))?);

    if let Some(every) = config.sweep_interval() {
        tracing::info!("Expiry sweep every {}s", every.as_secs());
        engine::spawn_sweeper(engine.clone(), every);
    }

    let app = http::router(engine, config.request_timeout());

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Spring '83 server listening on {addr}");
    tracing::info!("Storage: {:?}", config.storage);
    tracing::info!("Timestamp policy: {:?}", config.timestamp_policy);

    axum::serve(listener, app).await?;
    Ok(())
}
