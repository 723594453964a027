mod prometheus_metrics;

use std::env;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use axum::{routing::get, Extension, Router};
use prometheus::Registry;
use tracing::{error, info};

use self::prometheus_metrics::metrics_handler;

const METRICS_ADDR_ENV: &str = "WEBCHECKER_METRICS_ADDR";
const DEFAULT_METRICS_ADDR: SocketAddr =
    SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 9464);

pub fn metrics_router(registry: Arc<Registry>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .layer(Extension(registry))
}

fn metrics_addr(configured: Option<&str>) -> SocketAddr {
    configured
        .and_then(|addr| match addr.parse() {
            Ok(addr) => Some(addr),
            Err(e) => {
                error!(addr, error = %e, "Invalid {}, using {}", METRICS_ADDR_ENV, DEFAULT_METRICS_ADDR);
                None
            }
        })
        .unwrap_or(DEFAULT_METRICS_ADDR)
}

/// Serves the Prometheus registry at `/metrics` until the process exits.
pub async fn start_prometheus_server(registry: Arc<Registry>) {
    let addr = metrics_addr(env::var(METRICS_ADDR_ENV).ok().as_deref());
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(%addr, error = %e, "Failed to bind Prometheus metrics server");
            return;
        }
    };

    info!(%addr, "Serving Prometheus metrics");
    if let Err(e) = axum::serve(listener, metrics_router(registry)).await {
        error!(error = %e, "Prometheus metrics server stopped");
    }
}
