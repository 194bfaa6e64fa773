//! Prometheus recorder and scrape endpoint.
//!
//! A run is short-lived, so the endpoint only lives as long as the process:
//! scrape it while a long batch is being enriched, or leave metrics disabled.

use axum::{Router, extract::State, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use snafu::prelude::*;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::error::{MetricsError, PrometheusInitSnafu};

/// Install the global Prometheus recorder and serve `/metrics` and `/health`
/// on `addr` in a background task.
pub fn init(addr: SocketAddr) -> Result<(), MetricsError> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .context(PrometheusInitSnafu)?;

    tokio::spawn(serve(addr, handle));

    Ok(())
}

fn router(handle: PrometheusHandle) -> Router {
    Router::new()
        .route("/metrics", get(render))
        .route("/health", get(|| async { "ok\n" }))
        .with_state(handle)
}

async fn serve(addr: SocketAddr, handle: PrometheusHandle) {
    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(%addr, error = %e, "Failed to bind metrics endpoint");
            return;
        }
    };
    info!(%addr, "Metrics endpoint listening");

    if let Err(e) = axum::serve(listener, router(handle)).await {
        error!(error = %e, "Metrics endpoint stopped");
    }
}

async fn render(State(handle): State<PrometheusHandle>) -> String {
    handle.render()
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics::counter;

    #[tokio::test]
    async fn test_render_exposes_recorded_counters() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        metrics::with_local_recorder(&recorder, || {
            counter!("labelwise_records_processed_total", "status" => "success").increment(2);
        });

        let body = render(State(handle)).await;
        assert!(body.contains("labelwise_records_processed_total{status=\"success\"} 2"));
    }
}
