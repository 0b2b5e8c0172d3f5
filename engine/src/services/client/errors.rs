use thiserror::Error;

/// Remote account client errors
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    /// Request never produced an HTTP response
    #[error("Network error: {message}")]
    Network { message: String },

    /// 4xx response other than auth and rate limiting
    #[error("PDS operation '{operation}' rejected ({status}): {message}")]
    Rejected {
        operation: String,
        status: u16,
        error_code: Option<String>,
        message: String,
    },

    /// 5xx response
    #[error("PDS operation '{operation}' unavailable ({status}): {message}")]
    Unavailable {
        operation: String,
        status: u16,
        message: String,
    },

    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("Session expired")]
    SessionExpired,

    #[error("PDS operation '{operation}' rate limited")]
    RateLimited {
        operation: String,
        retry_after_secs: Option<u64>,
    },

    /// Body larger than the caller accepts
    #[error("PDS operation '{operation}' returned {size} bytes, limit is {limit}")]
    TooLarge {
        operation: String,
        size: u64,
        limit: u64,
    },

    #[error("Serialization error: {message}")]
    Serialization { message: String },

    #[error("Invalid response format: expected {expected}, got {got}")]
    InvalidResponse { expected: String, got: String },
}

impl ClientError {
    /// Whether retrying the same request can succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ClientError::Network { .. }
                | ClientError::Unavailable { .. }
                | ClientError::RateLimited { .. }
        )
    }

    pub fn is_auth(&self) -> bool {
        matches!(
            self,
            ClientError::AuthenticationFailed { .. } | ClientError::SessionExpired
        )
    }

    /// AT Protocol error code such as "AlreadyExists"
    pub fn error_code(&self) -> Option<&str> {
        match self {
            ClientError::Rejected { error_code, .. } => error_code.as_deref(),
            _ => None,
        }
    }

    /// Classify a non-success HTTP response
    pub fn from_status(
        operation: &str,
        status: u16,
        body: &str,
        retry_after_secs: Option<u64>,
    ) -> Self {
        let parsed = serde_json::from_str::<serde_json::Value>(body).ok();
        let error_code = parsed
            .as_ref()
            .and_then(|json| json.get("error"))
            .and_then(|e| e.as_str())
            .map(|s| s.to_string());
        let message = parsed
            .as_ref()
            .and_then(|json| json.get("message"))
            .and_then(|m| m.as_str())
            .map(|s| s.to_string())
            .unwrap_or_else(|| body.to_string());

        match status {
            401 if error_code.as_deref() == Some("ExpiredToken") => ClientError::SessionExpired,
            401 => ClientError::AuthenticationFailed { message },
            429 => ClientError::RateLimited {
                operation: operation.to_string(),
                retry_after_secs,
            },
            400..=499 => ClientError::Rejected {
                operation: operation.to_string(),
                status,
                error_code,
                message,
            },
            _ => ClientError::Unavailable {
                operation: operation.to_string(),
                status,
                message,
            },
        }
    }

    /// Read and classify a failed response
    pub(crate) async fn from_response(operation: &str, response: reqwest::Response) -> Self {
        let status = response.status().as_u16();
        let retry_after_secs = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<u64>().ok());
        let body = response.text().await.unwrap_or_default();
        Self::from_status(operation, status, &body, retry_after_secs)
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ClientError::InvalidResponse {
                expected: "JSON body".to_string(),
                got: err.to_string(),
            }
        } else {
            ClientError::Network {
                message: err.to_string(),
            }
        }
    }
}

/// Result type for client operations
pub type ClientResult<T> = Result<T, ClientError>;
