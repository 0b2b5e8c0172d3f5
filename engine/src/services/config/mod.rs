use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::migration::retry::RetryPolicy;
use crate::services::errors::MigrationError;

const DEFAULT_USER_AGENT: &str = concat!("pds-migration-engine/", env!("CARGO_PKG_VERSION"));

/// Engine configuration. Every section has defaults so a partial TOML file is enough.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationConfig {
    /// Global kill switch
    pub migration_enabled: bool,
    /// Shown to callers while migrations are disabled
    pub maintenance_message: String,
    pub retry: RetryConfig,
    pub blob: BlobConfig,
    pub identity: IdentityConfig,
    pub verification: VerificationConfig,
    pub session: SessionConfig,
    pub http: HttpConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub base_delay_ms: u64,
    /// Ceiling on any single wait, server `Retry-After` included
    pub max_delay_ms: u64,
    pub repo_attempts: u32,
    pub blob_enumeration_attempts: u32,
    pub blob_download_attempts: u32,
    pub blob_upload_attempts: u32,
    pub preferences_attempts: u32,
    pub identity_attempts: u32,
    pub account_attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BlobConfig {
    /// Blobs above this size are recorded as failed without an upload attempt
    pub max_blob_bytes: u64,
    pub page_size: u32,
    /// When false, any failed blob fails the whole blob step
    pub allow_partial_failures: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Minimum gap between two identity token emails
    pub token_cooldown_secs: u64,
    pub service_auth_ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationConfig {
    /// Failed verifications required before "continue anyway" is accepted
    pub force_advance_after: u32,
    pub allow_identity_force_advance: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub client_cache_capacity: usize,
    pub client_cache_ttl_secs: u64,
    pub refresh_leeway_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub user_agent: String,
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            migration_enabled: true,
            maintenance_message: "Account migration is temporarily disabled.".to_string(),
            retry: RetryConfig::default(),
            blob: BlobConfig::default(),
            identity: IdentityConfig::default(),
            verification: VerificationConfig::default(),
            session: SessionConfig::default(),
            http: HttpConfig::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            repo_attempts: 3,
            blob_enumeration_attempts: 3,
            blob_download_attempts: 5,
            blob_upload_attempts: 3,
            preferences_attempts: 3,
            identity_attempts: 3,
            account_attempts: 3,
        }
    }
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Backoff policy for a step allowed `attempts` tries
    pub fn policy(&self, attempts: u32) -> RetryPolicy {
        RetryPolicy::new(attempts, self.base_delay()).with_max_delay(self.max_delay())
    }

    /// No waiting between attempts, for tests
    pub fn immediate() -> Self {
        Self {
            base_delay_ms: 0,
            max_delay_ms: 0,
            ..Self::default()
        }
    }
}

impl Default for BlobConfig {
    fn default() -> Self {
        Self {
            max_blob_bytes: 50 * 1024 * 1024, // 50MB
            page_size: 500,
            allow_partial_failures: true,
        }
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            token_cooldown_secs: 60,
            service_auth_ttl_secs: 3600,
        }
    }
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            force_advance_after: 2,
            allow_identity_force_advance: false,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            client_cache_capacity: 256,
            client_cache_ttl_secs: 300,
            refresh_leeway_secs: 300,
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout_secs: 120,
            connect_timeout_secs: 15,
        }
    }
}

impl MigrationConfig {
    /// Validate configuration values
    pub fn validate(&self) -> Result<(), MigrationError> {
        let attempts = [
            ("retry.repo_attempts", self.retry.repo_attempts),
            (
                "retry.blob_enumeration_attempts",
                self.retry.blob_enumeration_attempts,
            ),
            (
                "retry.blob_download_attempts",
                self.retry.blob_download_attempts,
            ),
            ("retry.blob_upload_attempts", self.retry.blob_upload_attempts),
            ("retry.preferences_attempts", self.retry.preferences_attempts),
            ("retry.identity_attempts", self.retry.identity_attempts),
            ("retry.account_attempts", self.retry.account_attempts),
        ];
        for (field, value) in attempts {
            if value == 0 || value > 10 {
                return Err(invalid(field, value));
            }
        }

        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            return Err(invalid("retry.max_delay_ms", self.retry.max_delay_ms));
        }

        if self.blob.page_size == 0 || self.blob.page_size > 1000 {
            return Err(invalid("blob.page_size", self.blob.page_size));
        }
        if self.blob.max_blob_bytes == 0 {
            return Err(invalid("blob.max_blob_bytes", self.blob.max_blob_bytes));
        }
        if self.verification.force_advance_after == 0 {
            return Err(invalid(
                "verification.force_advance_after",
                self.verification.force_advance_after,
            ));
        }
        if self.session.client_cache_capacity == 0 {
            return Err(invalid(
                "session.client_cache_capacity",
                self.session.client_cache_capacity,
            ));
        }
        if self.http.timeout_secs == 0 {
            return Err(invalid("http.timeout_secs", self.http.timeout_secs));
        }

        Ok(())
    }
}

fn invalid(field: &str, value: impl ToString) -> MigrationError {
    MigrationError::Configuration {
        field: field.to_string(),
        value: value.to_string(),
    }
}
