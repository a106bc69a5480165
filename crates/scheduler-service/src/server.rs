//! HTTP surface (C12, §4.8/§4.12): `/health`, `/metrics`, `/metrics/prometheus`.
//! Grounded on the teacher's `build_router`/`run_http_server` shape (axum
//! `Router` built from a shared `AppState`, `TraceLayer` for request logging,
//! served via `axum::serve`), trimmed to this crate's three read-only routes —
//! no auth/admin middleware, no TLS, no product/order/cart routes.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;

use scheduler_core::health::check_health;
use scheduler_core::metrics::{render_prometheus, MetricsSnapshot};

use crate::state::AppState;

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/metrics/prometheus", get(prometheus_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let report = check_health(state.as_ref(), state.version(), state.uptime_seconds()).await;
    let status = match report.status {
        scheduler_core::health::HealthStatus::Healthy => StatusCode::OK,
        scheduler_core::health::HealthStatus::Degraded => StatusCode::OK,
        scheduler_core::health::HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status, Json(report))
}

async fn snapshot(state: &AppState) -> scheduler_core::Result<MetricsSnapshot> {
    let queue = state.ctx.queue.counts().await?;
    let dead_letter = state.ctx.queue.dead_letter().count().await?;
    let process = state.process().sample();
    Ok(MetricsSnapshot::new(queue, dead_letter, process, state.uptime_seconds()))
}

async fn metrics_handler(State(state): State<Arc<AppState>>) -> Response {
    match snapshot(&state).await {
        Ok(snapshot) => Json(snapshot).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn prometheus_handler(State(state): State<Arc<AppState>>) -> Response {
    let snapshot = match snapshot(&state).await {
        Ok(snapshot) => snapshot,
        Err(e) => return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    };
    let report = check_health(state.as_ref(), state.version(), state.uptime_seconds()).await;
    let body = render_prometheus(&snapshot, &report);
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use scheduler_core::domain::HandlerContext;
    use scheduler_core::graphql::GraphQlClient;
    use scheduler_core::jobs::JobQueue;
    use scheduler_core::redis::RedisPool;
    use std::time::Duration;
    use tower::ServiceExt;

    async fn test_state() -> Option<Arc<AppState>> {
        let pool = RedisPool::new("redis://127.0.0.1:6379/15").await.ok()?;
        let queue = Arc::new(JobQueue::new(pool.clone()));
        let graphql = Arc::new(
            GraphQlClient::new("http://localhost:1/graphql", "test-token", 1000, Duration::from_secs(30)).unwrap(),
        );
        let ctx = HandlerContext::new(graphql, queue);
        Some(Arc::new(AppState::new(ctx, pool)))
    }

    #[tokio::test]
    async fn health_route_responds() {
        let Some(state) = test_state().await else { return };
        let app = build_router(state);
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert!(response.status() == StatusCode::OK || response.status() == StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn prometheus_route_returns_text_exposition() {
        let Some(state) = test_state().await else { return };
        let app = build_router(state);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/metrics/prometheus")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
