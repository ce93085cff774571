//! REST API for upload sessions
//!
//! Endpoints:
//! - `GET  /api/health`
//! - `GET  /api/schema` - mappable groups and field paths
//! - `POST /api/columns` - header of a stored source
//! - `POST /api/mappings/resolve` - validate a mapping without building
//! - `POST /api/generate` - build, publish and encode every row
//! - `GET  /product/:id/json` - retrieve a published document
//!
//! Source names in request bodies are resolved inside the configured source
//! directory. File access and row building run on the blocking pool.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use crate::error::{DppError, PublishError, SourceError};
use crate::mapping::{FieldMapping, ResolvedMapping};
use crate::pipeline::{ColumnListing, GenerationReport, Pipeline};
use crate::schema::GroupFields;

// =============================================================================
// STATE
// =============================================================================

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
}

impl AppState {
    pub fn new(pipeline: Pipeline) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
        }
    }
}

// =============================================================================
// API TYPES
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct ColumnsRequest {
    /// Stored source name, relative to the source directory
    pub source: String,
}

#[derive(Debug, Deserialize)]
pub struct MappingRequest {
    pub source: String,
    #[serde(default)]
    pub mapping: FieldMapping,
}

/// Error with the status it maps to
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    error: DppError,
}

impl From<DppError> for ApiError {
    fn from(error: DppError) -> Self {
        let status = match &error {
            DppError::Source(SourceError::NotFound { .. }) => StatusCode::NOT_FOUND,
            DppError::Source(SourceError::TooLarge { .. } | SourceError::TooManyRows { .. }) => {
                StatusCode::PAYLOAD_TOO_LARGE
            }
            DppError::Source(SourceError::Io { .. }) => StatusCode::INTERNAL_SERVER_ERROR,
            DppError::Source(_) => StatusCode::BAD_REQUEST,
            DppError::Mapping(_) => StatusCode::UNPROCESSABLE_ENTITY,
            DppError::Publish(PublishError::NotFound { .. }) => StatusCode::NOT_FOUND,
            DppError::Publish(PublishError::InvalidIdentifier { .. }) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self { status, error }
    }
}

impl From<SourceError> for ApiError {
    fn from(error: SourceError) -> Self {
        DppError::from(error).into()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            warn!(error = %self.error, "request failed");
        }
        let details = match &self.error {
            DppError::Mapping(errors) => json!({ "errors": errors }),
            _ => serde_json::Value::Null,
        };
        let body = json!({
            "success": false,
            "data": details,
            "error": self.error.to_string(),
        });
        (self.status, Json(body)).into_response()
    }
}

// =============================================================================
// ROUTER
// =============================================================================

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health_check))
        .route("/api/schema", get(get_schema))
        .route("/api/columns", post(list_columns))
        .route("/api/mappings/resolve", post(resolve_mapping))
        .route("/api/generate", post(generate))
        .route("/product/:id/json", get(get_product_json))
        .with_state(state)
}

async fn health_check() -> Json<ApiResponse<String>> {
    ApiResponse::ok("OK".to_string())
}

async fn get_schema(State(state): State<AppState>) -> Json<ApiResponse<Vec<GroupFields>>> {
    ApiResponse::ok(state.pipeline.schema().fields())
}

async fn list_columns(
    State(state): State<AppState>,
    Json(req): Json<ColumnsRequest>,
) -> Result<Json<ApiResponse<ColumnListing>>, ApiError> {
    let path = state.pipeline.source_path(&req.source)?;
    let listing = run_blocking(move || state.pipeline.columns(&path)).await?;
    Ok(ApiResponse::ok(listing))
}

async fn resolve_mapping(
    State(state): State<AppState>,
    Json(req): Json<MappingRequest>,
) -> Result<Json<ApiResponse<ResolvedMapping>>, ApiError> {
    let path = state.pipeline.source_path(&req.source)?;
    let resolved = run_blocking(move || state.pipeline.resolve(&path, &req.mapping)).await?;
    Ok(ApiResponse::ok(resolved))
}

async fn generate(
    State(state): State<AppState>,
    Json(req): Json<MappingRequest>,
) -> Result<Json<ApiResponse<GenerationReport>>, ApiError> {
    let path = state.pipeline.source_path(&req.source)?;
    let report = run_blocking(move || state.pipeline.generate(&path, &req.mapping)).await?;
    info!(
        source = %report.source,
        published = report.summary.published,
        "generate request served"
    );
    Ok(ApiResponse::ok(report))
}

async fn get_product_json(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let lookup = match run_blocking(move || Ok(state.pipeline.document(&id))).await {
        Ok(lookup) => lookup,
        Err(e) => return e.into_response(),
    };
    match lookup {
        Ok(bytes) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/json")],
            bytes,
        )
            .into_response(),
        Err(PublishError::NotFound { .. }) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "message": "Product not found" })),
        )
            .into_response(),
        Err(e @ PublishError::InvalidIdentifier { .. }) => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "message": e.to_string() })),
        )
            .into_response(),
        Err(e) => ApiError::from(DppError::from(e)).into_response(),
    }
}

async fn run_blocking<T, F>(work: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, DppError> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(work).await {
        Ok(result) => result.map_err(ApiError::from),
        Err(e) => {
            warn!(error = %e, "blocking task failed");
            Err(ApiError {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                error: DppError::Internal(e.to_string()),
            })
        }
    }
}
