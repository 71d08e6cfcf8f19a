//! HTTP surface: WebSocket upgrade, health/status, meeting summaries and
//! the per-client API throttle.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::rejection::JsonRejection;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::config::HTTP_KIND;
use crate::error::RelayError;
use crate::rate_limit::{Admission, RateLimiter};
use crate::router::SignalingRouter;
use crate::summary::SummaryClient;
use crate::ws::ws_handler;

/// Shared state for all HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub router: SignalingRouter,
    summary: Arc<SummaryClient>,
    http_limiter: Arc<RateLimiter>,
    started: Instant,
}

impl AppState {
    pub fn new(router: SignalingRouter, summary: SummaryClient, http_limiter: RateLimiter) -> Self {
        Self {
            router,
            summary: Arc::new(summary),
            http_limiter: Arc::new(http_limiter),
            started: Instant::now(),
        }
    }

    pub fn http_limiter(&self) -> &RateLimiter {
        &self.http_limiter
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = match &self {
            RelayError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            RelayError::RoomFull { .. } => StatusCode::CONFLICT,
            RelayError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            RelayError::TargetUnreachable(_) => StatusCode::NOT_FOUND,
            RelayError::Upstream(_) => StatusCode::BAD_GATEWAY,
            RelayError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        let mut response = (status, Json(json!({ "error": self.to_string() }))).into_response();
        if let Some(secs) = self.retry_after() {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

/// Build the application router.
pub fn app(state: AppState) -> Router {
    let api = Router::new()
        .route("/status", get(status))
        .route("/summarize", post(summarize))
        .route_layer(middleware::from_fn_with_state(state.clone(), throttle));

    Router::new()
        .route("/health", get(health))
        .route("/ws", get(ws_handler))
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn status(State(state): State<AppState>) -> impl IntoResponse {
    let stats = state.router.stats();
    Json(json!({
        "rooms": stats.rooms,
        "connections": stats.connections,
        "uptime_secs": state.started.elapsed().as_secs(),
    }))
}

#[derive(Debug, Deserialize)]
struct SummarizeRequest {
    #[serde(default)]
    transcript: String,
    #[serde(default)]
    participants: Vec<String>,
}

async fn summarize(
    State(state): State<AppState>,
    payload: Result<Json<SummarizeRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return RelayError::invalid(rejection.body_text()).into_response(),
    };
    match state
        .summary
        .summarize(&request.transcript, &request.participants)
        .await
    {
        Ok(summary) => Json(summary).into_response(),
        Err(err) => {
            warn!(error = %err, "Summary request failed");
            err.into_response()
        }
    }
}

/// Client key for the throttle: peer IP when known.
fn client_key(request: &Request) -> String {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

async fn throttle(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let key = client_key(&request);
    match state.http_limiter.admit(HTTP_KIND, &key) {
        Admission::Allowed => next.run(request).await,
        Admission::Denied { retry_after, log } => {
            if log {
                warn!(client = %key, retry_after, "HTTP rate limit exceeded");
            }
            RelayError::RateLimited {
                kind: "API".to_string(),
                retry_after,
            }
            .into_response()
        }
    }
}
