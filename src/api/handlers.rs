use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Serialize;
use log::warn;

use crate::data::CachedRecord;
use crate::error::FeedError;
use crate::multiplexer::{FeedMultiplexer, ServiceActionResponse, SubscriptionResponse};
use crate::service::{ServiceName, StatusRecord};

#[derive(Clone)]
pub struct ApiState {
    pub multiplexer: Arc<FeedMultiplexer>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct DataResponse {
    pub success: bool,
    pub service: String,
    pub records: Vec<CachedRecord>,
    pub total: usize,
}

#[derive(Debug, Serialize)]
pub struct RecordResponse {
    pub success: bool,
    pub record: CachedRecord,
}

#[derive(Debug, Serialize)]
pub struct ClearResponse {
    pub success: bool,
    pub cleared: usize,
}

type ApiError = (StatusCode, Json<ErrorResponse>);
type ApiResult<T> = Result<Json<T>, ApiError>;

fn api_error(status: StatusCode, error: String) -> ApiError {
    (status, Json(ErrorResponse { success: false, error }))
}

impl From<FeedError> for (StatusCode, Json<ErrorResponse>) {
    fn from(e: FeedError) -> Self {
        let status = match e {
            FeedError::UnknownService(_) => StatusCode::NOT_FOUND,
            _ if e.is_misuse() => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        warn!("API request rejected: {}", e);
        api_error(status, e.to_string())
    }
}

/// Upstream failures are reported as 502 with the same body shape.
fn action_result(response: ServiceActionResponse) -> Result<Json<ServiceActionResponse>, (StatusCode, Json<ServiceActionResponse>)> {
    if response.success {
        Ok(Json(response))
    } else {
        Err((StatusCode::BAD_GATEWAY, Json(response)))
    }
}

// GET /api/health - Liveness plus per-service health
pub async fn health_check(State(state): State<ApiState>) -> Json<serde_json::Value> {
    let services: BTreeMap<ServiceName, bool> = state
        .multiplexer
        .get_all_services_status()
        .into_iter()
        .map(|(name, status)| (name, status.is_healthy))
        .collect();

    Json(serde_json::json!({
        "status": "healthy",
        "service": "feed_mux",
        "services": services,
        "timestamp": chrono::Utc::now()
    }))
}

// GET /api/feeds
pub async fn list_feeds(State(state): State<ApiState>) -> Json<BTreeMap<ServiceName, StatusRecord>> {
    Json(state.multiplexer.get_all_services_status())
}

// GET /api/feeds/:service
pub async fn feed_status(State(state): State<ApiState>, Path(service): Path<String>) -> ApiResult<StatusRecord> {
    Ok(Json(state.multiplexer.get_service_status(&service)?))
}

// POST /api/feeds/:service/start
pub async fn start_feed(
    State(state): State<ApiState>,
    Path(service): Path<String>,
) -> Result<Json<ServiceActionResponse>, (StatusCode, Json<ServiceActionResponse>)> {
    match state.multiplexer.start_service(&service).await {
        Ok(response) => action_result(response),
        Err(e) => Err(misuse(e)),
    }
}

// POST /api/feeds/:service/stop
pub async fn stop_feed(
    State(state): State<ApiState>,
    Path(service): Path<String>,
) -> Result<Json<ServiceActionResponse>, (StatusCode, Json<ServiceActionResponse>)> {
    match state.multiplexer.stop_service(&service).await {
        Ok(response) => action_result(response),
        Err(e) => Err(misuse(e)),
    }
}

// POST /api/feeds/:service/restart
pub async fn restart_feed(
    State(state): State<ApiState>,
    Path(service): Path<String>,
) -> Result<Json<ServiceActionResponse>, (StatusCode, Json<ServiceActionResponse>)> {
    match state.multiplexer.restart_service(&service).await {
        Ok(response) => action_result(response),
        Err(e) => Err(misuse(e)),
    }
}

fn misuse(e: FeedError) -> (StatusCode, Json<ServiceActionResponse>) {
    let (status, Json(body)) = ApiError::from(e);
    (status, Json(ServiceActionResponse { success: false, message: None, error: Some(body.error) }))
}

// POST /api/feeds/:service/subscriptions/:symbol
pub async fn subscribe_symbol(
    State(state): State<ApiState>,
    Path((service, symbol)): Path<(String, String)>,
) -> ApiResult<SubscriptionResponse> {
    Ok(Json(state.multiplexer.subscribe(&service, &symbol)?))
}

// DELETE /api/feeds/:service/subscriptions/:symbol
pub async fn unsubscribe_symbol(
    State(state): State<ApiState>,
    Path((service, symbol)): Path<(String, String)>,
) -> ApiResult<SubscriptionResponse> {
    Ok(Json(state.multiplexer.unsubscribe(&service, &symbol)?))
}

// GET /api/feeds/:service/data
pub async fn get_feed_data(State(state): State<ApiState>, Path(service): Path<String>) -> ApiResult<DataResponse> {
    let records = state.multiplexer.get_all_data(&service)?;
    Ok(Json(DataResponse {
        success: true,
        service: service.trim().to_ascii_lowercase(),
        total: records.len(),
        records,
    }))
}

// DELETE /api/feeds/:service/data
pub async fn clear_feed_data(State(state): State<ApiState>, Path(service): Path<String>) -> ApiResult<ClearResponse> {
    let cleared = state.multiplexer.clear_data(&service)?;
    Ok(Json(ClearResponse { success: true, cleared }))
}

// GET /api/feeds/:service/data/:symbol
pub async fn get_symbol_data(
    State(state): State<ApiState>,
    Path((service, symbol)): Path<(String, String)>,
) -> ApiResult<RecordResponse> {
    match state.multiplexer.get_data(&service, &symbol)? {
        Some(record) => Ok(Json(RecordResponse { success: true, record })),
        None => Err(api_error(StatusCode::NOT_FOUND, format!("no data for {} on {}", symbol, service))),
    }
}

pub fn create_api_router(state: ApiState) -> Router {
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/feeds", get(list_feeds))
        .route("/feeds/:service", get(feed_status))
        .route("/feeds/:service/start", post(start_feed))
        .route("/feeds/:service/stop", post(stop_feed))
        .route("/feeds/:service/restart", post(restart_feed))
        .route(
            "/feeds/:service/subscriptions/:symbol",
            post(subscribe_symbol).delete(unsubscribe_symbol),
        )
        .route("/feeds/:service/data", get(get_feed_data).delete(clear_feed_data))
        .route("/feeds/:service/data/:symbol", get(get_symbol_data))
        .with_state(state);

    Router::new().nest("/api", api_routes)
}
