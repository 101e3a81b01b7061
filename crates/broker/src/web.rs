//! HTTP side channel (spec §6.2): health/model-status/initialize-model
//! plus the `/ws` signaling upgrade and a Prometheus-text `/metrics`
//! endpoint. Grounded in the teacher's `health_check`/`health_check_detailed`
//! /`metrics` trio in `crates/server/src/web.rs`, minus the JWT gate — this
//! system has no login concept (rooms are anonymous).

use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use glint_detector::Detector;
use glint_protocol::GlintConfig;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;

use crate::engine::Engine;
use crate::rooms::RoomRegistry;
use crate::signaling;
use crate::time::now_ms;

pub struct AppState {
    pub config: GlintConfig,
    pub rooms: RoomRegistry,
    pub engine: Arc<Engine>,
    pub detector: Arc<Detector>,
    pub started_at: std::time::Instant,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/model-status", get(model_status))
        .route("/initialize-model", post(initialize_model))
        .route("/metrics", get(metrics))
        .route("/ws", get(ws_upgrade))
        .layer(RequestBodyLimitLayer::new(65_536))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// GET /health - minimal liveness check for load balancers (spec §6.2).
async fn health_check() -> impl IntoResponse {
    Json(json!({ "status": "ok", "timestamp": now_ms() }))
}

/// GET /model-status - whether the detector is ready to run inference.
async fn model_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let model_loaded = state.detector.is_ready().await;
    Json(json!({
        "modelLoaded": model_loaded,
        "modelPath": state.config.detector.model_path,
        "timestamp": now_ms(),
    }))
}

/// POST /initialize-model - explicit lazy-load trigger over HTTP (the
/// WebSocket `initialize-server-model` message covers the in-band case;
/// this mirrors it for callers that aren't already holding a socket open).
async fn initialize_model(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.detector.initialize().await {
        Ok(load_time_ms) => Json(json!({
            "success": true,
            "load_time_ms": load_time_ms,
        }))
        .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "success": false, "error": e.to_string() })),
        )
            .into_response(),
    }
}

/// GET /metrics - Prometheus-text engine counters (ambient, spec §1).
async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let uptime_secs = state.started_at.elapsed().as_secs();
    let accepted = state.engine.metrics.frames_accepted.load(Ordering::Relaxed);
    let throttled = state.engine.metrics.frames_throttled.load(Ordering::Relaxed);
    let failed = state.engine.metrics.frames_failed.load(Ordering::Relaxed);
    let rooms = state.rooms.read().await.len();

    let body = format!(
        "# HELP glint_uptime_seconds Broker uptime in seconds\n\
         # TYPE glint_uptime_seconds gauge\n\
         glint_uptime_seconds {uptime_secs}\n\
         \n\
         # HELP glint_active_rooms Number of active rooms\n\
         # TYPE glint_active_rooms gauge\n\
         glint_active_rooms {rooms}\n\
         \n\
         # HELP glint_frames_accepted_total Frames accepted for inference\n\
         # TYPE glint_frames_accepted_total counter\n\
         glint_frames_accepted_total {accepted}\n\
         \n\
         # HELP glint_frames_throttled_total Frames dropped by per-room throttling\n\
         # TYPE glint_frames_throttled_total counter\n\
         glint_frames_throttled_total {throttled}\n\
         \n\
         # HELP glint_frames_failed_total Frames that failed preprocessing or inference\n\
         # TYPE glint_frames_failed_total counter\n\
         glint_frames_failed_total {failed}\n"
    );

    (
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        body,
    )
        .into_response()
}

/// GET /ws - WebSocket upgrade for the signaling control connection.
async fn ws_upgrade(State(state): State<Arc<AppState>>, ws: WebSocketUpgrade) -> impl IntoResponse {
    let rooms = state.rooms.clone();
    let engine = Arc::clone(&state.engine);
    let detector = Arc::clone(&state.detector);
    ws.max_message_size(65_536)
        .on_upgrade(move |socket| signaling::handle_ws(socket, rooms, engine, detector))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn test_state() -> Arc<AppState> {
        let config = GlintConfig::default();
        let detector = Detector::new(&config.detector.model_path, config.detector.input_size, true);
        let engine = Engine::spawn(
            Arc::clone(&detector),
            config.detector.score_threshold,
            config.detector.nms_iou_threshold,
            config.room.min_interframe_ms,
        );
        Arc::new(AppState {
            config,
            rooms: crate::rooms::new_room_registry(),
            engine,
            detector,
            started_at: std::time::Instant::now(),
        })
    }

    async fn body_json(response: axum::response::Response<Body>) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_returns_ok() {
        let app = build_router(test_state());
        let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["status"], "ok");
        assert!(json["timestamp"].as_u64().is_some());
    }

    #[tokio::test]
    async fn model_status_reports_not_ready_before_init() {
        let app = build_router(test_state());
        let request = Request::builder().uri("/model-status").body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["modelLoaded"], false);
        assert!(json["modelPath"].as_str().is_some());
        assert!(json["timestamp"].as_u64().is_some());
    }

    #[tokio::test]
    async fn metrics_returns_prometheus_format() {
        let app = build_router(test_state());
        let request = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = std::str::from_utf8(&bytes).unwrap();
        assert!(body.contains("glint_active_rooms"));
        assert!(body.contains("glint_frames_accepted_total"));
    }
}
