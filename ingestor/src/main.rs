use anyhow::Context;
use axum::{routing::get, Router};
use ingestor::config::Config;
use ingestor::writer::LogSink;
use ingestor::{db, metrics, rest};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env();

    info!("Starting event log ingestor");
    info!("HTTP server: {}", config.http_addr);
    info!("Database: {}", config.database_url);
    info!(
        "Default thresholds: warn={} stage2={}",
        config.thresholds.warn_threshold, config.thresholds.stage2_threshold
    );

    metrics::init_metrics().context("registering metrics")?;

    let pool = db::make_pool(&config.database_url)
        .await
        .context("connecting to database")?;

    info!("Writer queue capacity: {}", config.channel_capacity);
    let (sink, writer_handle) = LogSink::spawn(pool, config.channel_capacity);

    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .merge(rest::create_router(sink, config.thresholds));

    let listener = tokio::net::TcpListener::bind(&config.http_addr)
        .await
        .with_context(|| format!("binding {}", config.http_addr))?;

    info!("HTTP server listening on {}", config.http_addr);

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("HTTP server error: {}", e);
        }
    });

    tokio::select! {
        _ = writer_handle => {
            error!("Log writer terminated");
        }
        _ = server_handle => {
            error!("HTTP server terminated");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    info!("Shutting down");
    Ok(())
}

async fn metrics_handler() -> String {
    metrics::gather_metrics()
}
