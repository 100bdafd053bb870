//! REST API
//!
//! Company endpoints:
//! - POST /api/companies/merge - duplicate detection and merge pipeline
//! - POST /api/companies/clean - per-field cleanup
//! - POST /api/companies/purge - removal classification
//! - GET  /api/health          - liveness and version
//!
//! Every endpoint requires the service API key plus a CRM provider
//! credential header. Error responses carry a request id and a sanitized
//! message; raw upstream detail goes to the server log only.

pub mod auth;
pub mod routes;

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use uuid::Uuid;

use crate::error::{AuthError, PipelineError, QuotaError, StoreError, ValidationError};
use crate::inference::StructuredInference;

use auth::{AccessGate, CredentialValidator};

/// Shared handler state. The store client is not here: it is built per
/// request from the detected provider credential.
#[derive(Clone)]
pub struct AppState {
    pub inference: Arc<dyn StructuredInference>,
    pub validator: Arc<dyn CredentialValidator>,
    pub gate: Arc<dyn AccessGate>,
}

impl AppState {
    pub fn new(
        inference: Arc<dyn StructuredInference>,
        validator: Arc<dyn CredentialValidator>,
        gate: Arc<dyn AccessGate>,
    ) -> Self {
        Self {
            inference,
            validator,
            gate,
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/companies/merge", post(routes::merge_company))
        .route("/api/companies/clean", post(routes::clean_company))
        .route("/api/companies/purge", post(routes::purge_company))
        .route("/api/health", get(routes::health_check))
        .with_state(state)
}

/// Error response: an HTTP status plus a structured body. Constructors
/// log what the caller must not see.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub request_id: Uuid,
}

impl ApiError {
    pub fn validation(request_id: Uuid, error: ValidationError) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: error.to_string(),
            request_id,
        }
    }

    pub fn auth(request_id: Uuid, error: AuthError) -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            message: error.to_string(),
            request_id,
        }
    }

    pub fn quota(request_id: Uuid, error: QuotaError) -> Self {
        Self {
            status: StatusCode::PAYMENT_REQUIRED,
            message: error.to_string(),
            request_id,
        }
    }

    pub fn record_not_found(request_id: Uuid, record_id: &str) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: format!("record '{record_id}' not found"),
            request_id,
        }
    }

    /// Sanitize a pipeline failure: callers get a generic description of
    /// the failing stage, the log gets the real error chain.
    pub fn pipeline(request_id: Uuid, error: &PipelineError) -> Self {
        tracing::error!(request_id = %request_id, error = %error, "pipeline failure");
        let (status, message) = match error {
            PipelineError::Store(StoreError::NotFound { id }) => (
                StatusCode::NOT_FOUND,
                format!("record '{id}' not found"),
            ),
            PipelineError::Store(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "record store operation failed".to_string(),
            ),
            PipelineError::Inference(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "inference stage failed".to_string(),
            ),
        };
        Self {
            status,
            message,
            request_id,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": self.message,
            "requestId": self.request_id,
        });
        (self.status, Json(body)).into_response()
    }
}
