use thiserror::Error;

use crate::migration::status::StatusReport;
use crate::migration::types::MigrationPhase;
use crate::services::client::ClientError;

pub use crate::services::session::StoreError;

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("Not logged in to the source account: {message}")]
    Unauthorized { message: String },

    #[error("No usable session for the target account")]
    TargetSessionMissing,

    #[error("{message}")]
    MigrationDisabled { message: String },

    /// 4xx from either provider. Never retried.
    #[error("{operation} rejected during {phase}: {source}")]
    UpstreamRejected {
        phase: MigrationPhase,
        operation: String,
        #[source]
        source: ClientError,
    },

    /// Network or 5xx failure that outlasted local retries
    #[error("{operation} unavailable during {phase} after {attempts} attempt(s): {source}")]
    UpstreamUnavailable {
        phase: MigrationPhase,
        operation: String,
        attempts: u32,
        #[source]
        source: ClientError,
    },

    #[error("Verification failed during {phase}: {reason}")]
    VerificationFailed {
        phase: MigrationPhase,
        reason: String,
        report: Option<Box<StatusReport>>,
    },

    #[error("Rate limited, retry in {cooldown_secs}s")]
    RateLimited { cooldown_secs: u64 },

    #[error("Operation requires phase {expected}, migration is in {actual}")]
    InvalidState {
        expected: String,
        actual: MigrationPhase,
    },

    #[error("Invalid request: {field} - {message}")]
    InvalidRequest { field: String, message: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("Configuration error: {field} = {value}")]
    Configuration { field: String, value: String },
}

pub type MigrationResult<T> = Result<T, MigrationError>;

impl MigrationError {
    /// Classify a failed call against the source account
    pub fn from_source(
        phase: MigrationPhase,
        operation: &str,
        attempts: u32,
        error: ClientError,
    ) -> Self {
        if error.is_auth() {
            return MigrationError::Unauthorized {
                message: error.to_string(),
            };
        }
        Self::upstream(phase, operation, attempts, error)
    }

    /// Classify a failed call against the target account
    pub fn from_target(
        phase: MigrationPhase,
        operation: &str,
        attempts: u32,
        error: ClientError,
    ) -> Self {
        if error.is_auth() {
            return MigrationError::TargetSessionMissing;
        }
        Self::upstream(phase, operation, attempts, error)
    }

    fn upstream(phase: MigrationPhase, operation: &str, attempts: u32, error: ClientError) -> Self {
        if let ClientError::RateLimited {
            retry_after_secs, ..
        } = error
        {
            return MigrationError::RateLimited {
                cooldown_secs: retry_after_secs.unwrap_or(0),
            };
        }
        if error.is_transient() {
            MigrationError::UpstreamUnavailable {
                phase,
                operation: operation.to_string(),
                attempts,
                source: error,
            }
        } else {
            MigrationError::UpstreamRejected {
                phase,
                operation: operation.to_string(),
                source: error,
            }
        }
    }

    pub fn invalid_request(field: &str, message: impl Into<String>) -> Self {
        MigrationError::InvalidRequest {
            field: field.to_string(),
            message: message.into(),
        }
    }

    pub fn invalid_state(expected: impl Into<String>, actual: MigrationPhase) -> Self {
        MigrationError::InvalidState {
            expected: expected.into(),
            actual,
        }
    }

    /// Phase the failure happened in, when known
    pub fn phase(&self) -> Option<MigrationPhase> {
        match self {
            MigrationError::UpstreamRejected { phase, .. }
            | MigrationError::UpstreamUnavailable { phase, .. }
            | MigrationError::VerificationFailed { phase, .. } => Some(*phase),
            MigrationError::InvalidState { actual, .. } => Some(*actual),
            _ => None,
        }
    }

    /// Whether the user can repeat the same action and expect progress
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MigrationError::UpstreamUnavailable { .. }
                | MigrationError::VerificationFailed { .. }
                | MigrationError::RateLimited { .. }
        )
    }

    /// Get error severity for logging/alerting purposes
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            MigrationError::Storage(_) => ErrorSeverity::Critical,
            MigrationError::Configuration { .. } => ErrorSeverity::High,
            MigrationError::UpstreamRejected { .. } => ErrorSeverity::High,
            MigrationError::UpstreamUnavailable { .. } => ErrorSeverity::Medium,
            MigrationError::VerificationFailed { .. } => ErrorSeverity::Medium,
            MigrationError::Unauthorized { .. } | MigrationError::TargetSessionMissing => {
                ErrorSeverity::Low
            }
            _ => ErrorSeverity::Low,
        }
    }

    /// Short machine-readable error name
    pub fn kind(&self) -> &'static str {
        match self {
            MigrationError::Unauthorized { .. } => "Unauthorized",
            MigrationError::TargetSessionMissing => "TargetSessionMissing",
            MigrationError::MigrationDisabled { .. } => "MigrationDisabled",
            MigrationError::UpstreamRejected { .. } => "UpstreamRejected",
            MigrationError::UpstreamUnavailable { .. } => "UpstreamUnavailable",
            MigrationError::VerificationFailed { .. } => "VerificationFailed",
            MigrationError::RateLimited { .. } => "RateLimited",
            MigrationError::InvalidState { .. } => "InvalidState",
            MigrationError::InvalidRequest { .. } => "InvalidRequest",
            MigrationError::Storage(_) => "Storage",
            MigrationError::Configuration { .. } => "Configuration",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification_by_side() {
        let expired = ClientError::SessionExpired;
        assert!(matches!(
            MigrationError::from_source(MigrationPhase::Created, "getRepo", 1, expired.clone()),
            MigrationError::Unauthorized { .. }
        ));
        assert!(matches!(
            MigrationError::from_target(MigrationPhase::Created, "importRepo", 1, expired),
            MigrationError::TargetSessionMissing
        ));
    }

    #[test]
    fn test_transient_becomes_unavailable() {
        let err = MigrationError::from_target(
            MigrationPhase::Created,
            "importRepo",
            3,
            ClientError::from_status("importRepo", 502, "bad gateway", None),
        );
        assert_eq!(err.kind(), "UpstreamUnavailable");
        assert!(err.is_retryable());
        assert_eq!(err.phase(), Some(MigrationPhase::Created));
        assert!(err.to_string().contains("3 attempt"));

        let err = MigrationError::from_target(
            MigrationPhase::Pending,
            "createAccount",
            1,
            ClientError::from_status("createAccount", 400, r#"{"error":"InvalidHandle"}"#, None),
        );
        assert_eq!(err.kind(), "UpstreamRejected");
        assert!(!err.is_retryable());
        assert_eq!(err.severity(), ErrorSeverity::High);
    }

    #[test]
    fn test_exhausted_rate_limit_keeps_cooldown() {
        let err = MigrationError::from_source(
            MigrationPhase::Created,
            "getRepo",
            3,
            ClientError::RateLimited {
                operation: "getRepo".to_string(),
                retry_after_secs: Some(45),
            },
        );
        assert!(matches!(err, MigrationError::RateLimited { cooldown_secs: 45 }));
        assert_eq!(err.kind(), "RateLimited");
    }
}
