//! HTTP request handlers with OpenAPI documentation.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::{error, warn};
use utoipa::OpenApi;

use crate::app::AppState;
use crate::domain::{
    ApiResponse, AppError, BlockchainError, DatabaseError, ErrorDetail, ErrorResponse,
    ExternalServiceError, HealthResponse, HealthStatus, SendRewardRequest,
};

/// Header carrying the shared API key
pub const API_KEY_HEADER: &str = "x-api-key";

/// OpenAPI documentation structure
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Solana Reward Relayer API",
        version = "0.1.0",
        description = "Queues Solana SPL reward transfers and reports their outcome to the backend",
        license(
            name = "MIT"
        )
    ),
    paths(
        transfer_nft_handler,
        health_check_handler,
    ),
    components(
        schemas(
            SendRewardRequest,
            ApiResponse<bool>,
            HealthResponse,
            HealthStatus,
            ErrorResponse,
            ErrorDetail,
        )
    ),
    tags(
        (name = "rewards", description = "Reward transfer intake"),
        (name = "health", description = "Health check endpoints")
    )
)]
pub struct ApiDoc;

/// Queue a reward transfer
///
/// The response acknowledges that the job is durable. The transfer itself
/// runs in the background and its outcome is posted to the backend webhook.
#[utoipa::path(
    post,
    path = "/api/nft/solana/transfer-nft",
    tag = "rewards",
    request_body = SendRewardRequest,
    params(
        ("x-api-key" = String, Header, description = "Shared API key")
    ),
    responses(
        (status = 200, description = "Reward queued", body = ApiResponse<bool>),
        (status = 400, description = "Validation error", body = ErrorResponse),
        (status = 401, description = "Missing or invalid API key", body = ErrorResponse),
        (status = 503, description = "Queue unavailable", body = ErrorResponse)
    )
)]
pub async fn transfer_nft_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<SendRewardRequest>,
) -> Result<Json<ApiResponse<bool>>, AppError> {
    state.service.enqueue_reward(&payload).await?;
    Ok(Json(ApiResponse::ok(true)))
}

/// Queue and chain health
#[utoipa::path(
    get,
    path = "/api/health",
    tag = "health",
    responses(
        (status = 200, description = "Service is healthy or degraded", body = HealthResponse),
        (status = 503, description = "Queue storage is unreachable", body = HealthResponse)
    )
)]
pub async fn health_check_handler(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<HealthResponse>) {
    let health = state.service.health_check().await;
    let status = match health.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status, Json(health))
}

/// OpenAPI document
pub async fn openapi_handler() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Reject requests whose `x-api-key` header does not match the configured key
pub async fn require_api_key(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let provided = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Authentication("Missing x-api-key header".to_string()))?;

    if !keys_match(provided.as_bytes(), state.api_key.as_bytes()) {
        warn!(path = %request.uri().path(), "Rejected request with invalid API key");
        return Err(AppError::Authentication("Invalid API key".to_string()));
    }
    Ok(next.run(request).await)
}

/// Comparison whose duration does not depend on where the inputs differ
fn keys_match(provided: &[u8], expected: &[u8]) -> bool {
    provided.len() == expected.len()
        && provided
            .iter()
            .zip(expected)
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match &self {
            AppError::Database(db_err) => match db_err {
                DatabaseError::Connection(_) => (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "database_error",
                    self.to_string(),
                ),
                DatabaseError::NotFound(_) => {
                    (StatusCode::NOT_FOUND, "not_found", self.to_string())
                }
                DatabaseError::Duplicate(_) => {
                    (StatusCode::CONFLICT, "duplicate", self.to_string())
                }
                _ => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "database_error",
                    self.to_string(),
                ),
            },
            AppError::Blockchain(bc_err) => match bc_err {
                BlockchainError::Connection(_) => (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "blockchain_error",
                    self.to_string(),
                ),
                BlockchainError::InsufficientBalance { .. } => (
                    StatusCode::PAYMENT_REQUIRED,
                    "insufficient_balance",
                    self.to_string(),
                ),
                BlockchainError::Timeout(_) => {
                    (StatusCode::GATEWAY_TIMEOUT, "timeout", self.to_string())
                }
                _ => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "blockchain_error",
                    self.to_string(),
                ),
            },
            AppError::ExternalService(ext_err) => match ext_err {
                ExternalServiceError::Timeout(_) => {
                    (StatusCode::GATEWAY_TIMEOUT, "timeout", self.to_string())
                }
                _ => (
                    StatusCode::BAD_GATEWAY,
                    "external_service_error",
                    self.to_string(),
                ),
            },
            AppError::Config(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "configuration_error",
                self.to_string(),
            ),
            AppError::Validation(_) => (
                StatusCode::BAD_REQUEST,
                "validation_error",
                self.to_string(),
            ),
            AppError::Authentication(_) => (
                StatusCode::UNAUTHORIZED,
                "authentication_error",
                self.to_string(),
            ),
        };

        if status.is_server_error() {
            error!(error_type = %error_type, message = %message, "Server error");
        }

        let body = Json(ErrorResponse {
            error: ErrorDetail {
                r#type: error_type.to_string(),
                message,
            },
        });

        (status, body).into_response()
    }
}
