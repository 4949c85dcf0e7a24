//! HTTP service implementation for per-service ID allocation.
//!
//! This module defines the [`router`] exposing the [`Engine`] over HTTP and
//! the mapping from engine errors to status codes.
//!
//! ## Responsibilities
//!
//! - Normalize and validate incoming requests before they reach the engine.
//! - Wrap every response in the `{ code, msg, data, traceId }` envelope.
//! - Report readiness through `/health`, which flips to 503 as soon as
//!   shutdown begins.

use super::trace::trace_id;
use axum::{
    Extension, Json, Router,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use core::sync::atomic::{AtomicBool, Ordering};
use idalloc::{Engine, Error, RequestContext, ServiceSnapshot};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

const MAX_SERVICE_NAME_LEN: usize = 64;
const DEFAULT_ALLOC_COUNT: i64 = 1;

#[derive(Clone)]
pub struct AppState {
    engine: Arc<Engine>,
    serving: Arc<AtomicBool>,
}

impl AppState {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            serving: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Marks the service as draining; `/health` reports 503 from now on.
    pub fn set_not_serving(&self) {
        self.serving.store(false, Ordering::Release);
    }

    fn is_serving(&self) -> bool {
        self.serving.load(Ordering::Acquire)
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/alloc", post(alloc))
        .route("/alloc/{service}", get(snapshot))
        .route("/health", get(health))
        .layer(middleware::from_fn(trace_id))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocRequest {
    #[serde(default)]
    pub service_name: String,
    #[serde(default)]
    pub count: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AllocData {
    pub ids: Vec<i64>,
}

/// Response envelope shared by every endpoint.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
    pub code: u16,
    pub msg: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    pub trace_id: String,
}

impl<T> ApiResponse<T> {
    fn ok(ctx: &RequestContext, data: T) -> Json<Self> {
        Json(Self {
            code: 0,
            msg: "OK".to_string(),
            data: Some(data),
            trace_id: ctx.trace_id().to_string(),
        })
    }
}

/// An engine error bound to the request that produced it.
#[derive(Debug)]
pub struct ApiError {
    error: Error,
    trace_id: String,
}

impl ApiError {
    fn new(ctx: &RequestContext, error: Error) -> Self {
        Self {
            error,
            trace_id: ctx.trace_id().to_string(),
        }
    }

    fn invalid(ctx: &RequestContext, reason: impl Into<String>) -> Self {
        Self::new(
            ctx,
            Error::InvalidRequest {
                reason: reason.into(),
            },
        )
    }
}

/// Maps an engine error to its HTTP status.
pub const fn status_for(error: &Error) -> StatusCode {
    match error {
        Error::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
        Error::DataIntegrity { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        Error::Transient { .. }
        | Error::LockContended { .. }
        | Error::Busy { .. }
        | Error::ServiceStopped => StatusCode::SERVICE_UNAVAILABLE,
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorData {
    retryable: bool,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.error);
        if self.error.is_critical() {
            tracing::error!(trace_id = %self.trace_id, error = %self.error, "Request failed");
        } else if status.is_server_error() {
            tracing::warn!(trace_id = %self.trace_id, error = %self.error, "Request failed");
        }

        let body = ApiResponse {
            code: status.as_u16(),
            msg: self.error.to_string(),
            data: Some(ErrorData {
                retryable: self.error.is_retryable(),
            }),
            trace_id: self.trace_id,
        };
        (status, Json(body)).into_response()
    }
}

/// Trims and lowercases a service name, rejecting empty or overlong names.
fn normalize_service_name(ctx: &RequestContext, raw: &str) -> Result<String, ApiError> {
    let name = raw.trim().to_lowercase();
    if name.is_empty() || name.len() > MAX_SERVICE_NAME_LEN {
        return Err(ApiError::invalid(
            ctx,
            format!("serviceName must be 1 to {MAX_SERVICE_NAME_LEN} characters"),
        ));
    }
    Ok(name)
}

async fn alloc(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    payload: Result<Json<AllocRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<AllocData>>, ApiError> {
    let Json(req) = payload.map_err(|rejection| ApiError::invalid(&ctx, rejection.body_text()))?;

    let service = normalize_service_name(&ctx, &req.service_name)?;
    let max = state.engine.config().max_alloc_count;
    let count = match req.count {
        None | Some(0) => DEFAULT_ALLOC_COUNT,
        Some(count) if (1..=max).contains(&count) => count,
        Some(count) => {
            return Err(ApiError::invalid(
                &ctx,
                format!("count must be between 1 and {max} (got {count})"),
            ));
        }
    };

    let ids = state
        .engine
        .allocate(&ctx, &service, count)
        .await
        .map_err(|e| ApiError::new(&ctx, e))?;
    Ok(ApiResponse::ok(&ctx, AllocData { ids }))
}

async fn snapshot(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(service): Path<String>,
) -> Result<Json<ApiResponse<ServiceSnapshot>>, ApiError> {
    let service = normalize_service_name(&ctx, &service)?;
    let snapshot = state
        .engine
        .snapshot(&ctx, &service)
        .await
        .map_err(|e| ApiError::new(&ctx, e))?;
    Ok(ApiResponse::ok(&ctx, snapshot))
}

async fn health(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
) -> Response {
    if state.is_serving() {
        ApiResponse::ok(&ctx, "SERVING").into_response()
    } else {
        ApiError::new(&ctx, Error::ServiceStopped).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::{Body, to_bytes},
        http::{Request, header},
    };
    use core::time::Duration;
    use idalloc::{EngineConfig, cache::MemoryCache, store::MemoryStore};
    use serde_json::{Value, json};
    use tower::ServiceExt;

    fn state() -> AppState {
        let engine = Engine::new(
            EngineConfig {
                batch_size: 100,
                max_alloc_count: 10,
                ..EngineConfig::default()
            },
            Arc::new(MemoryCache::new()),
            Arc::new(MemoryStore::new()),
        )
        .unwrap();
        AppState::new(Arc::new(engine))
    }

    fn post_alloc(body: Value) -> Request<Body> {
        Request::post("/alloc")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn send(state: &AppState, req: Request<Body>) -> (StatusCode, Option<String>, Value) {
        let res = router(state.clone()).oneshot(req).await.unwrap();
        let status = res.status();
        let trace_id = res
            .headers()
            .get(&super::super::trace::TRACE_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        (status, trace_id, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn alloc_returns_envelope() {
        let state = state();
        let (status, trace_id, body) = send(
            &state,
            post_alloc(json!({ "serviceName": "  Orders ", "count": 3 })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["code"], 0);
        assert_eq!(body["msg"], "OK");
        assert_eq!(body["data"]["ids"], json!([1, 2, 3]));
        assert_eq!(trace_id.as_deref(), body["traceId"].as_str());
        // The name was normalized before reaching the engine.
        assert_eq!(state.engine.services(), vec!["orders".to_string()]);
        state.engine.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn missing_count_defaults_to_one() {
        let state = state();
        let (status, _, body) = send(&state, post_alloc(json!({ "serviceName": "users" }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["ids"], json!([1]));
        state.engine.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn invalid_requests_are_rejected() {
        let state = state();
        for payload in [
            json!({ "serviceName": "", "count": 1 }),
            json!({ "serviceName": "   " }),
            json!({ "serviceName": "x".repeat(65) }),
            json!({ "serviceName": "orders", "count": 11 }),
            json!({ "serviceName": "orders", "count": -1 }),
        ] {
            let (status, _, body) = send(&state, post_alloc(payload.clone())).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{payload}");
            assert_eq!(body["code"], 400);
            assert_eq!(body["data"]["retryable"], false);
        }
        assert!(state.engine.services().is_empty());
    }

    #[tokio::test]
    async fn malformed_json_is_a_bad_request() {
        let req = Request::post("/alloc")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let (status, _, body) = send(&state(), req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], 400);
    }

    #[tokio::test]
    async fn incoming_trace_id_is_reused() {
        let state = state();
        let mut req = post_alloc(json!({ "serviceName": "orders" }));
        req.headers_mut()
            .insert("x-trace-id", "abc123".parse().unwrap());

        let (_, trace_id, body) = send(&state, req).await;
        assert_eq!(trace_id.as_deref(), Some("abc123"));
        assert_eq!(body["traceId"], "abc123");
        state.engine.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn snapshot_reports_counter() {
        let state = state();
        send(&state, post_alloc(json!({ "serviceName": "orders" }))).await;

        let req = Request::get("/alloc/orders").body(Body::empty()).unwrap();
        let (status, _, body) = send(&state, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["serviceName"], "orders");
        assert_eq!(body["data"]["active"], true);
        assert!(body["data"]["cache"]["dataVersion"].as_i64().unwrap() >= 1);
        state.engine.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn health_flips_on_shutdown() {
        let state = state();
        let health = || Request::get("/health").body(Body::empty()).unwrap();

        let (status, _, body) = send(&state, health()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"], "SERVING");

        state.set_not_serving();
        let (status, _, body) = send(&state, health()).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["data"]["retryable"], false);
    }

    #[tokio::test]
    async fn stopped_engine_maps_to_unavailable() {
        let state = state();
        state.engine.shutdown(Duration::from_secs(1)).await;

        let (status, _, body) = send(&state, post_alloc(json!({ "serviceName": "orders" }))).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["msg"], "Service stopped");
    }

    #[test]
    fn status_mapping() {
        assert_eq!(status_for(&Error::transient("x")), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            status_for(&Error::Busy {
                service: "orders".to_string()
            }),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_for(&Error::data_integrity("x")),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status_for(&Error::InvalidRequest {
                reason: "x".to_string()
            }),
            StatusCode::BAD_REQUEST
        );
    }
}
