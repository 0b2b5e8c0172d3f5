//! Identity rotation ceremony
//!
//! 1. The source emails a one-time token (rate limited by a cooldown).
//! 2. With that token, a fresh rotation key is prepended to the target's
//!    recommended credentials, the source signs the update, and the target
//!    submits it to the directory.

use std::fmt;

use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::migration::keys::{RecoveryKeyExport, RotationKeyMaterial};
use crate::migration::retry::{retry_with_backoff, RetryCallback, RetryPolicy, Retryable};
use crate::migration::types::MigrationPhase;
use crate::services::client::types::current_time_secs;
use crate::services::client::{ClientError, SourceClient, TargetClient};
use crate::services::config::{IdentityConfig, RetryConfig};
use crate::services::errors::{MigrationError, MigrationResult};

const PHASE: MigrationPhase = MigrationPhase::DataMigrated;

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TokenRequestOutcome {
    pub requested: bool,
    pub rate_limited: bool,
    pub cooldown_remaining: u64,
}

/// A provider 429 on the token request is an answer, not a fault to retry
struct TokenRequestError(ClientError);

impl fmt::Display for TokenRequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl Retryable for TokenRequestError {
    fn is_transient(&self) -> bool {
        self.0.is_transient() && !matches!(self.0, ClientError::RateLimited { .. })
    }
}

#[derive(Clone)]
pub struct IdentityCeremony {
    retry: RetryConfig,
    identity: IdentityConfig,
    on_retry: RetryCallback,
}

impl IdentityCeremony {
    pub fn new(retry: RetryConfig, identity: IdentityConfig, on_retry: RetryCallback) -> Self {
        Self {
            retry,
            identity,
            on_retry,
        }
    }

    fn policy(&self) -> RetryPolicy {
        self.retry.policy(self.retry.identity_attempts)
    }

    /// Seconds left before another token may be requested
    pub fn cooldown_remaining(&self, requested_at: Option<u64>, now: u64) -> u64 {
        match requested_at {
            Some(at) => (at + self.identity.token_cooldown_secs).saturating_sub(now),
            None => 0,
        }
    }

    /// Ask the source to email a token. Inside the cooldown window this is a no-op.
    #[instrument(skip(self, source), err)]
    pub async fn request_token(
        &self,
        source: &SourceClient,
        requested_at: Option<u64>,
    ) -> MigrationResult<TokenRequestOutcome> {
        let remaining = self.cooldown_remaining(requested_at, current_time_secs());
        if remaining > 0 {
            info!("Identity token requested recently, {}s cooldown left", remaining);
            return Ok(TokenRequestOutcome {
                requested: false,
                rate_limited: true,
                cooldown_remaining: remaining,
            });
        }

        let sent = retry_with_backoff(
            self.policy(),
            "requestPlcOperationSignature",
            &self.on_retry,
            || async { source.request_identity_signature().await.map_err(TokenRequestError) },
        )
        .await;

        if let Err(exhausted) = sent {
            let TokenRequestError(error) = exhausted.error;
            if let ClientError::RateLimited {
                retry_after_secs, ..
            } = error
            {
                let remaining = retry_after_secs.unwrap_or(self.identity.token_cooldown_secs);
                info!("Provider is rate limiting token requests, {}s left", remaining);
                return Ok(TokenRequestOutcome {
                    requested: false,
                    rate_limited: true,
                    cooldown_remaining: remaining,
                });
            }
            return Err(MigrationError::from_source(
                PHASE,
                "requestPlcOperationSignature",
                exhausted.attempts,
                error,
            ));
        }

        info!("Identity token sent to the account email");
        Ok(TokenRequestOutcome {
            requested: true,
            rate_limited: false,
            cooldown_remaining: self.identity.token_cooldown_secs,
        })
    }

    /// Both sessions must belong to the account being migrated
    pub fn check_same_account(
        &self,
        source: &SourceClient,
        target: &TargetClient,
        expected_did: &str,
    ) -> MigrationResult<()> {
        let source_did = source.account_did();
        let target_did = target.account_did();
        if source_did == Some(expected_did) && target_did == Some(expected_did) {
            return Ok(());
        }

        warn!(
            "DID mismatch: expected {}, source {:?}, target {:?}",
            expected_did, source_did, target_did
        );
        Err(MigrationError::VerificationFailed {
            phase: PHASE,
            reason: format!(
                "Source ({}) and target ({}) sessions do not belong to {}",
                source_did.unwrap_or("none"),
                target_did.unwrap_or("none"),
                expected_did
            ),
            report: None,
        })
    }

    /// Sign and submit the identity update. The returned key export is the only copy.
    #[instrument(skip(self, source, target, token), err)]
    pub async fn sign_and_submit(
        &self,
        source: &SourceClient,
        target: &TargetClient,
        token: &str,
    ) -> MigrationResult<RecoveryKeyExport> {
        let key = RotationKeyMaterial::generate();
        let rotation_key = key.did_key();

        let mut credentials = retry_with_backoff(
            self.policy(),
            "getRecommendedDidCredentials",
            &self.on_retry,
            || target.get_recommended_identity_credentials(),
        )
        .await
        .map_err(|exhausted| {
            MigrationError::from_target(
                PHASE,
                "getRecommendedDidCredentials",
                exhausted.attempts,
                exhausted.error,
            )
        })?;
        credentials.prepend_rotation_key(&rotation_key);

        // The token is single use, so a rejection here is final
        let operation = retry_with_backoff(self.policy(), "signPlcOperation", &self.on_retry, || {
            source.sign_identity_operation(token, &credentials)
        })
        .await
        .map_err(|exhausted| {
            MigrationError::from_source(PHASE, "signPlcOperation", exhausted.attempts, exhausted.error)
        })?;

        retry_with_backoff(self.policy(), "submitPlcOperation", &self.on_retry, || {
            target.submit_identity_operation(&operation)
        })
        .await
        .map_err(|exhausted| {
            MigrationError::from_target(
                PHASE,
                "submitPlcOperation",
                exhausted.attempts,
                exhausted.error,
            )
        })?;

        info!("Identity operation submitted with rotation key {}", rotation_key);
        Ok(key.export())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::testing::{FakeProvider, ALICE_DID, PLC_TOKEN, SOURCE_URL, TARGET_URL};

    #[test]
    fn test_cooldown_arithmetic() {
        let ceremony = FakeProvider::with_source_account().ceremony();
        assert_eq!(ceremony.cooldown_remaining(None, 1_000), 0);
        assert_eq!(ceremony.cooldown_remaining(Some(1_000), 1_010), 50);
        assert_eq!(ceremony.cooldown_remaining(Some(1_000), 1_060), 0);
        assert_eq!(ceremony.cooldown_remaining(Some(1_000), 5_000), 0);
    }

    #[tokio::test]
    async fn test_second_request_inside_cooldown_sends_nothing() {
        let provider = FakeProvider::with_source_account();
        let source = provider.source_client().await;
        let ceremony = provider.ceremony();

        let first = ceremony.request_token(&source, None).await.unwrap();
        assert!(first.requested);

        let second = ceremony
            .request_token(&source, Some(current_time_secs()))
            .await
            .unwrap();
        assert!(second.rate_limited);
        assert!(second.cooldown_remaining > 0);
        assert_eq!(provider.emails_sent(SOURCE_URL, ALICE_DID), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_upstream_rate_limit_returns_at_once() {
        let provider = FakeProvider::with_source_account();
        let source = provider.source_client().await;
        provider.fail_next(
            SOURCE_URL,
            "requestPlcOperationSignature",
            ClientError::RateLimited {
                operation: "requestPlcOperationSignature".to_string(),
                retry_after_secs: Some(600),
            },
            3,
        );

        let start = tokio::time::Instant::now();
        let outcome = provider
            .ceremony()
            .request_token(&source, None)
            .await
            .unwrap();

        assert_eq!(
            outcome,
            TokenRequestOutcome {
                requested: false,
                rate_limited: true,
                cooldown_remaining: 600,
            }
        );
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(
            provider.call_count(SOURCE_URL, "requestPlcOperationSignature"),
            1
        );
        assert_eq!(provider.emails_sent(SOURCE_URL, ALICE_DID), 0);
    }

    #[tokio::test]
    async fn test_token_request_still_retries_outages() {
        let provider = FakeProvider::with_source_account();
        let source = provider.source_client().await;
        provider.fail_next(
            SOURCE_URL,
            "requestPlcOperationSignature",
            ClientError::from_status("requestPlcOperationSignature", 503, "", None),
            2,
        );

        let outcome = provider
            .ceremony()
            .request_token(&source, None)
            .await
            .unwrap();
        assert!(outcome.requested);
        assert_eq!(
            provider.call_count(SOURCE_URL, "requestPlcOperationSignature"),
            3
        );
    }

    #[tokio::test]
    async fn test_sign_and_submit_prepends_new_key() {
        let provider = FakeProvider::with_source_account();
        let (source, target) = provider.connected_pair().await;
        let ceremony = provider.ceremony();
        ceremony.request_token(&source, None).await.unwrap();

        let export = ceremony
            .sign_and_submit(&source, &target, PLC_TOKEN)
            .await
            .unwrap();

        let operation = provider.submitted_operation(ALICE_DID).unwrap();
        assert_eq!(operation.0["rotationKeys"][0], export.public_key.as_str());
        assert!(operation.0.to_string().find(&export.private_key_hex).is_none());
        assert_eq!(provider.directory_entry(ALICE_DID).as_deref(), Some(TARGET_URL));
    }

    #[tokio::test]
    async fn test_consumed_token_fails_predictably() {
        let provider = FakeProvider::with_source_account();
        let (source, target) = provider.connected_pair().await;
        let ceremony = provider.ceremony();
        ceremony.request_token(&source, None).await.unwrap();
        ceremony
            .sign_and_submit(&source, &target, PLC_TOKEN)
            .await
            .unwrap();

        let again = ceremony.sign_and_submit(&source, &target, PLC_TOKEN).await;
        assert!(matches!(again, Err(MigrationError::UpstreamRejected { .. })));
    }

    #[tokio::test]
    async fn test_mismatched_accounts_are_rejected() {
        let provider = FakeProvider::with_source_account();
        provider.seed_target_account("did:plc:someoneelse", "bob.target.test", "pw");
        let source = provider.source_client().await;
        let target = provider
            .target_client_for("did:plc:someoneelse", "pw")
            .await;

        let result = provider
            .ceremony()
            .check_same_account(&source, &target, ALICE_DID);
        assert!(matches!(result, Err(MigrationError::VerificationFailed { .. })));
    }
}
