// ABOUTME: Capsule server entry point
// ABOUTME: Wires the Docker provider, reaper, and HTTP transport together

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::{HeaderValue, Method};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use tracing_subscriber::EnvFilter;

use capsule_sandbox::{DockerProvider, Reaper};

mod config;

use config::Config;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = Config::from_env()?;

    let provider = Arc::new(DockerProvider::with_pull_timeout(config.image_pull_timeout).await?);
    let reaper = Reaper::spawn(provider.clone(), config.reaper_interval);

    let cors = match &config.cors_origin {
        Some(origin) => CorsLayer::new()
            .allow_origin(origin.parse::<HeaderValue>()?)
            .allow_methods([Method::GET, Method::POST])
            .allow_headers(Any),
        // development posture: the terminal endpoint accepts any origin
        None => CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST])
            .allow_headers(Any),
    };

    let app = capsule_api::create_router(provider).layer(cors);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("capsule server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    reaper.shutdown().await;
    info!("capsule server stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", e);
    }
}
