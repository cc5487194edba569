mod config;
mod engine;
mod server;
mod types;
mod xlm_roberta_engine;

use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use config::Config;
use server::AppState;
use xlm_roberta_engine::{XLMRobertaConfig, XLMRobertaEngine};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,arabic_toxic_detector=debug".into());
    if config.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!("Starting toxicity detector with config: {:?}", config);

    if let Some(addr) = config.metrics_address()? {
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .map_err(|e| anyhow::anyhow!("Failed to start metrics exporter: {e}"))?;
        tracing::info!("Metrics exporter listening on http://{}", addr);
    }

    tracing::info!("Loading XLM-RoBERTa model...");
    let engine = XLMRobertaEngine::new(XLMRobertaConfig::from(&config)).await?;
    tracing::info!("Model loaded successfully");

    let app = server::router(AppState::new(Arc::new(engine)));

    let listener = TcpListener::bind(&config.server_address()).await?;
    tracing::info!("Server running on http://{}", config.server_address());

    axum::serve(listener, app).await?;
    Ok(())
}
