use axum::{http::StatusCode, response::IntoResponse, Extension};
use prometheus::{Encoder, Registry, TextEncoder};
use std::sync::Arc;
use tracing::warn;

pub async fn metrics_handler(Extension(registry): Extension<Arc<Registry>>) -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = registry.gather();
    let mut buffer = vec![];

    match encoder.encode(&metric_families, &mut buffer) {
        Ok(_) => (
            StatusCode::OK,
            [("content-type", encoder.format_type())],
            buffer,
        )
            .into_response(),
        Err(e) => {
            warn!(error = %e, "Failed to encode Prometheus metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to encode metrics: {}", e),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod prometheus_metrics_tests {
    use std::sync::Arc;

    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use prometheus::{IntCounter, Registry};
    use tower::ServiceExt;

    use crate::web_server::metrics_router;

    #[tokio::test]
    async fn test_metrics_endpoint_serves_registry() {
        let registry = Registry::new();
        let checks = IntCounter::new("webchecker_checks", "checks run").unwrap();
        registry.register(Box::new(checks.clone())).unwrap();
        checks.inc_by(3);

        let response = metrics_router(Arc::new(registry))
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(StatusCode::OK, response.status());
        assert!(response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("text/plain")));

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = String::from_utf8(body.to_vec()).unwrap();
        assert!(body.contains("webchecker_checks 3"));
    }

    #[tokio::test]
    async fn test_unknown_path_is_not_found() {
        let response = metrics_router(Arc::new(Registry::new()))
            .oneshot(Request::builder().uri("/reload").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(StatusCode::NOT_FOUND, response.status());
    }
}
