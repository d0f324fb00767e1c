use crate::aggregate::{AggregateStats, IntensityGrid};
use crate::compute::ComputeStatus;
use crate::errors::ApiError;
use crate::models::*;
use crate::notifier::OperationStatus;
use crate::state::AppState;
use axum::{
    extract::{Path, Query, Request, State},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};

pub const API_KEY_HEADER: &str = "X-API-KEY";
pub const SUBMITTER_HEADER: &str = "X-SUBMITTER";

#[derive(Debug, Deserialize)]
pub struct ListReportsParams {
    pub offset: Option<usize>,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ComputeStatusResponse {
    pub status: ComputeStatus,
}

pub fn router(state: AppState) -> Router {
    let protected_routes = Router::new()
        .route("/api/v1/reports", post(submit_report))
        .route("/api/v1/reports/:id/decrypt", post(decrypt_report))
        .route("/api/v1/compute/init", post(init_compute))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/api/v1/reports", get(list_reports))
        .route("/api/v1/reports/refresh", post(refresh_reports))
        .route("/api/v1/stats", get(get_stats))
        .route("/api/v1/heatmap", get(get_heatmap))
        .route("/api/v1/status", get(get_status))
        .route("/api/v1/availability", get(get_availability))
        .route("/api/v1/compute", get(get_compute))
        .merge(protected_routes)
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

/// Check the API key and attach the caller's [`Session`].
///
/// A valid key without `X-SUBMITTER` yields a session with no address; operations
/// that sign ledger writes reject it.
async fn auth_middleware(State(state): State<AppState>, mut request: Request, next: Next) -> Result<Response, ApiError> {
    let headers = request.headers();
    let authorized = headers
        .get(API_KEY_HEADER)
        .is_some_and(|provided| provided.as_bytes() == state.api_key.as_bytes());

    if !authorized {
        tracing::warn!("unauthorized access attempt");
        return Err(ApiError::Unauthorized("missing or invalid API key".to_string()));
    }

    let address = headers
        .get(SUBMITTER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    request.extensions_mut().insert(Session {
        connected: true,
        address,
    });
    Ok(next.run(request).await)
}

async fn list_reports(
    State(state): State<AppState>,
    Query(params): Query<ListReportsParams>,
) -> Json<RecordListResponse> {
    let offset = params.offset.unwrap_or(0);
    let limit = params.limit.unwrap_or(100).min(500);

    let snapshot = state.orchestrator.snapshot().await;
    Json(RecordListResponse {
        total: snapshot.len(),
        records: snapshot.iter().skip(offset).take(limit).cloned().collect(),
    })
}

async fn refresh_reports(State(state): State<AppState>) -> Result<Json<RecordListResponse>, ApiError> {
    let records = state.orchestrator.refresh().await?;
    Ok(Json(RecordListResponse {
        total: records.len(),
        records: records.as_ref().clone(),
    }))
}

async fn submit_report(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Json(req): Json<ReportRequest>,
) -> Result<Json<ReportResponse>, ApiError> {
    if req.label.trim().is_empty() {
        return Err(ApiError::BadRequest("label must not be empty".to_string()));
    }

    let input = ReportInput {
        label: req.label.trim().to_string(),
        decibel: req.decibel,
        category: req.category.unwrap_or(0),
        public_aux2: req.public_aux2.unwrap_or(0),
        description: req.description.unwrap_or_default(),
    };

    let prepared = match req.request_id {
        Some(id) if id.trim().is_empty() => {
            return Err(ApiError::BadRequest("request_id must not be empty".to_string()));
        }
        Some(id) => PreparedReport { id, input },
        None => state.orchestrator.prepare_report(input),
    };

    let submitted = state.orchestrator.submit_report(&session, &prepared).await?;

    Ok(Json(ReportResponse {
        id: submitted.id,
        tx_id: submitted.tx_id,
        record: submitted.record,
    }))
}

async fn decrypt_report(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(id): Path<String>,
) -> Result<Json<RevealResponse>, ApiError> {
    Ok(Json(state.orchestrator.reveal(&session, &id).await?))
}

async fn get_stats(State(state): State<AppState>) -> Json<AggregateStats> {
    Json(state.orchestrator.stats().await)
}

async fn get_heatmap(State(state): State<AppState>) -> Json<IntensityGrid> {
    Json(state.orchestrator.heatmap().await)
}

async fn get_status(State(state): State<AppState>) -> Json<OperationStatus> {
    Json(state.orchestrator.notifier().current())
}

async fn get_availability(State(state): State<AppState>) -> Result<Json<AvailabilityResponse>, ApiError> {
    let available = state.orchestrator.check_availability().await?;
    Ok(Json(AvailabilityResponse { available }))
}

async fn get_compute(State(state): State<AppState>) -> Json<ComputeStatusResponse> {
    Json(ComputeStatusResponse {
        status: state.orchestrator.compute().status(),
    })
}

async fn init_compute(State(state): State<AppState>) -> Result<Json<ComputeStatusResponse>, ApiError> {
    state.orchestrator.initialize_compute().await?;
    Ok(Json(ComputeStatusResponse {
        status: state.orchestrator.compute().status(),
    }))
}
