use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::{routing::get, Extension, Router};
use axum_prometheus::PrometheusMetricLayer;
use billing_records::billing::{RecordsService, StripeAdapter};
use billing_records::config;
use billing_records::routes::api_routes;
use tracing_subscriber::{fmt, EnvFilter};

async fn root() -> &'static str {
    "Billing Records API"
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // `.env` must be loaded before the filter reads RUST_LOG.
    dotenvy::dotenv().ok();

    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    let adapter = StripeAdapter::from_env()?;
    tracing::info!(
        base_url = config::BILLING_API_BASE_URL.as_str(),
        page_size = *config::BILLING_LIST_PAGE_SIZE,
        "billing provider configured"
    );
    let service = RecordsService::new(Arc::new(adapter));

    let (prometheus_layer, metrics_handle) = PrometheusMetricLayer::pair();
    let app = Router::new()
        .route("/", get(root))
        .route(
            "/metrics",
            get(move || async move { metrics_handle.render() }),
        )
        .merge(api_routes())
        .layer(prometheus_layer)
        .layer(Extension(service));

    let addr: SocketAddr = format!("{}:{}", config::BIND_ADDRESS.as_str(), *config::BIND_PORT)
        .parse()
        .context("invalid BIND_ADDRESS/BIND_PORT")?;
    tracing::info!(%addr, "Listening for incoming connections");
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}
