use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use engine::services::errors::ErrorSeverity;
use engine::MigrationError;
use serde_json::{json, Value};
use tracing::{error, warn};

/// Engine error on its way out as an HTTP response
#[derive(Debug)]
pub struct ApiError(pub MigrationError);

impl From<MigrationError> for ApiError {
    fn from(error: MigrationError) -> Self {
        ApiError(error)
    }
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match &self.0 {
            MigrationError::Unauthorized { .. } | MigrationError::TargetSessionMissing => {
                StatusCode::UNAUTHORIZED
            }
            MigrationError::MigrationDisabled { .. } => StatusCode::SERVICE_UNAVAILABLE,
            MigrationError::UpstreamRejected { .. } | MigrationError::InvalidRequest { .. } => {
                StatusCode::BAD_REQUEST
            }
            MigrationError::UpstreamUnavailable { .. } => StatusCode::BAD_GATEWAY,
            MigrationError::VerificationFailed { .. } | MigrationError::InvalidState { .. } => {
                StatusCode::CONFLICT
            }
            MigrationError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            MigrationError::Storage(_) | MigrationError::Configuration { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn detail(&self) -> Option<Value> {
        match &self.0 {
            MigrationError::VerificationFailed {
                report: Some(report),
                ..
            } => serde_json::to_value(report).ok(),
            MigrationError::UpstreamRejected {
                operation, source, ..
            } => Some(json!({
                "operation": operation,
                "errorCode": source.error_code(),
            })),
            MigrationError::UpstreamUnavailable {
                operation,
                attempts,
                ..
            } => Some(json!({ "operation": operation, "attempts": attempts })),
            MigrationError::RateLimited { cooldown_secs } => {
                Some(json!({ "cooldownSecs": cooldown_secs }))
            }
            MigrationError::InvalidState { expected, .. } => {
                Some(json!({ "expected": expected }))
            }
            MigrationError::InvalidRequest { field, .. } => Some(json!({ "field": field })),
            _ => None,
        }
    }

    fn log(&self) {
        match self.0.severity() {
            ErrorSeverity::Critical | ErrorSeverity::High => {
                error!(kind = self.0.kind(), "{}", self.0)
            }
            ErrorSeverity::Medium => warn!(kind = self.0.kind(), "{}", self.0),
            ErrorSeverity::Low => {}
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        self.log();
        let status = self.status_code();

        let mut body = json!({
            "success": false,
            "message": self.0.to_string(),
            "error": self.0.kind(),
            "retryable": self.0.is_retryable(),
        });
        if let Some(phase) = self.0.phase() {
            body["phase"] = json!(phase);
        }
        if let Some(detail) = self.detail() {
            body["detail"] = detail;
        }

        let mut response = (status, Json(body)).into_response();
        if let MigrationError::RateLimited { cooldown_secs } = self.0 {
            if let Ok(value) = cooldown_secs.to_string().parse() {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}
