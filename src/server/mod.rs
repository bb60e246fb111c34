//! HTTP server: the host UI's entry into the experiment.
//!
//! Serves a small JSON API over `SessionHost`. CORS is open so a static
//! front end on another origin can drive it.

pub mod routes;

use anyhow::{Context, Result};
use axum::{
    http::{header, HeaderValue, Method},
    routing::{get, post},
    Router,
};
use std::future::Future;
use std::net::SocketAddr;
use tower_http::cors::CorsLayer;
use tracing::info;

use routes::AppState;

/// Build the Axum router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(HeaderValue::from_static("*"))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/api/sessions", post(routes::create_session))
        .route("/api/sessions/:id", get(routes::get_session))
        .route("/api/sessions/:id/start", post(routes::start))
        .route("/api/sessions/:id/safe", post(routes::choose_safe))
        .route("/api/sessions/:id/risk", post(routes::choose_risk))
        .route("/api/sessions/:id/continue", post(routes::continue_round))
        .route("/api/sessions/:id/next-block", post(routes::continue_block))
        .route("/api/outbox", get(routes::get_outbox))
        .route("/api/outbox/retry", post(routes::retry_outbox))
        .route("/health", get(routes::health))
        .layer(cors)
        .with_state(state)
}

/// Serve until `shutdown` resolves.
pub async fn serve<F>(state: AppState, addr: SocketAddr, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!(%addr, "Experiment server listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("Server error")?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExperimentConfig;
    use crate::host::SessionHost;
    use crate::storage::MemoryRecorder;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn test_state() -> AppState {
        let config = ExperimentConfig {
            rounds_per_block: 2,
            min_break_secs: 0,
            rng_seed: Some(5),
            ..ExperimentConfig::default()
        };
        Arc::new(SessionHost::new(config, Arc::new(MemoryRecorder::new())))
    }

    async fn send(app: &Router, method: &str, uri: &str) -> (StatusCode, serde_json::Value) {
        let resp = app
            .clone()
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = resp.status();
        let body = axum::body::to_bytes(resp.into_body(), 100_000).await.unwrap();
        let json = if body.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&body).unwrap()
        };
        (status, json)
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let app = build_router(test_state());
        let (status, _) = send(&app, "GET", "/health").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_create_session() {
        let app = build_router(test_state());
        let (status, json) = send(&app, "POST", "/api/sessions").await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(json["phase"], "not_started");
        assert_eq!(json["balance"], 20);
        assert!(json["order_name"].as_str().unwrap().starts_with("Order"));
    }

    #[tokio::test]
    async fn test_play_a_round() {
        let app = build_router(test_state());
        let (_, created) = send(&app, "POST", "/api/sessions").await;
        let id = created["participant_id"].as_str().unwrap().to_string();

        let (status, json) = send(&app, "POST", &format!("/api/sessions/{id}/start")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["phase"], "playing");

        let (status, json) = send(&app, "POST", &format!("/api/sessions/{id}/risk")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["trial"]["choice"], "risk");
        assert_eq!(json["trial"]["p_win"], 0.5);
        assert_eq!(json["session"]["phase"], "awaiting_feedback");

        let (status, json) = send(&app, "POST", &format!("/api/sessions/{id}/continue")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["round"], 1);
    }

    #[tokio::test]
    async fn test_wrong_phase_is_conflict() {
        let app = build_router(test_state());
        let (_, created) = send(&app, "POST", "/api/sessions").await;
        let id = created["participant_id"].as_str().unwrap().to_string();

        let (status, json) = send(&app, "POST", &format!("/api/sessions/{id}/safe")).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(json["error"].as_str().unwrap().contains("NOT_STARTED"));

        let (status, _) = send(&app, "POST", &format!("/api/sessions/{id}/next-block")).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_unknown_session_is_not_found() {
        let app = build_router(test_state());
        let uri = format!("/api/sessions/{}", uuid::Uuid::new_v4());
        let (status, _) = send(&app, "GET", &uri).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_break_and_next_block() {
        let app = build_router(test_state());
        let (_, created) = send(&app, "POST", "/api/sessions").await;
        let id = created["participant_id"].as_str().unwrap().to_string();
        send(&app, "POST", &format!("/api/sessions/{id}/start")).await;

        for _ in 0..2 {
            send(&app, "POST", &format!("/api/sessions/{id}/safe")).await;
            send(&app, "POST", &format!("/api/sessions/{id}/continue")).await;
        }
        let (_, json) = send(&app, "GET", &format!("/api/sessions/{id}")).await;
        assert_eq!(json["phase"], "on_break");

        let (status, json) = send(&app, "POST", &format!("/api/sessions/{id}/next-block")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["block"], 2);
        assert_eq!(json["round"], 0);
        assert_eq!(json["balance"], 20);
    }

    #[tokio::test]
    async fn test_outbox_endpoints() {
        let app = build_router(test_state());
        let (status, json) = send(&app, "GET", "/api/outbox").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["pending"], 0);

        let (status, json) = send(&app, "POST", "/api/outbox/retry").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["delivered"], 0);
    }
}
