use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::migration::retry::{retry_with_backoff, RetryCallback, RetryPolicy};
use crate::migration::types::{MigrationPhase, MigrationSession};
use crate::services::client::types::current_time_secs;
use crate::services::client::{
    AccountClient, ClientFactory, ClientSessionCredentials, CreateAccountRequest,
    DescribeServerResponse, SourceClient,
};
use crate::services::config::{IdentityConfig, RetryConfig};
use crate::services::errors::{MigrationError, MigrationResult};

const CREATE_ACCOUNT_METHOD: &str = "com.atproto.server.createAccount";

#[derive(Serialize, Debug, Clone)]
pub struct AccountCreation {
    pub did: String,
    pub handle: String,
    /// The account already existed and was logged into instead
    pub resumed: bool,
    #[serde(skip)]
    pub credentials: ClientSessionCredentials,
}

/// Creates the target account under the user's existing DID
#[derive(Clone)]
pub struct AccountProvisioner {
    retry: RetryConfig,
    identity: IdentityConfig,
    on_retry: RetryCallback,
}

impl AccountProvisioner {
    pub fn new(retry: RetryConfig, identity: IdentityConfig, on_retry: RetryCallback) -> Self {
        Self {
            retry,
            identity,
            on_retry,
        }
    }

    fn policy(&self) -> RetryPolicy {
        self.retry.policy(self.retry.account_attempts)
    }

    #[instrument(skip(self, target), fields(pds = %target.service_url()), err)]
    pub async fn describe_target(
        &self,
        target: &dyn AccountClient,
    ) -> MigrationResult<DescribeServerResponse> {
        retry_with_backoff(self.policy(), "describeServer", &self.on_retry, || {
            target.describe_server()
        })
        .await
        .map_err(|exhausted| {
            MigrationError::from_target(
                MigrationPhase::Pending,
                "describeServer",
                exhausted.attempts,
                exhausted.error,
            )
        })
    }

    /// Create the account, or log into it if a previous attempt already created it
    #[instrument(skip(self, source, target, factory, migration), fields(did = %migration.source_did), err)]
    pub async fn provision(
        &self,
        source: &SourceClient,
        target: &dyn AccountClient,
        factory: &dyn ClientFactory,
        migration: &MigrationSession,
    ) -> MigrationResult<AccountCreation> {
        let server = self.describe_target(target).await?;
        if server.invite_required() && migration.invite_code.is_none() {
            return Err(MigrationError::invalid_request(
                "invite_code",
                format!("{} requires an invite code", migration.target_service_url),
            ));
        }

        let expires_at = current_time_secs() + self.identity.service_auth_ttl_secs;
        let service_auth = retry_with_backoff(self.policy(), "getServiceAuth", &self.on_retry, || {
            source.get_service_auth(&server.did, CREATE_ACCOUNT_METHOD, Some(expires_at))
        })
        .await
        .map_err(|exhausted| {
            MigrationError::from_source(
                MigrationPhase::Pending,
                "getServiceAuth",
                exhausted.attempts,
                exhausted.error,
            )
        })?;

        let request = CreateAccountRequest {
            did: migration.source_did.clone(),
            handle: migration.target_handle.clone(),
            email: migration.target_email.clone(),
            password: migration.target_password.clone(),
            invite_code: migration.invite_code.clone(),
            service_auth_token: Some(service_auth),
        };

        let created = retry_with_backoff(self.policy(), "createAccount", &self.on_retry, || {
            target.create_account(&request)
        })
        .await;

        let (credentials, resumed) = match created {
            Ok(credentials) => (credentials, false),
            Err(exhausted) if exhausted.error.error_code() == Some("AlreadyExists") => {
                warn!(
                    "Account {} already exists on {}, resuming with login",
                    migration.source_did, migration.target_service_url
                );
                let credentials = factory
                    .login(
                        &migration.target_service_url,
                        &migration.source_did,
                        &migration.target_password,
                    )
                    .await
                    .map_err(|e| {
                        MigrationError::from_target(MigrationPhase::Pending, "createSession", 1, e)
                    })?;
                (credentials, true)
            }
            Err(exhausted) => {
                return Err(MigrationError::from_target(
                    MigrationPhase::Pending,
                    "createAccount",
                    exhausted.attempts,
                    exhausted.error,
                ))
            }
        };

        info!(
            "Target account ready for {} (resumed: {})",
            credentials.did, resumed
        );
        Ok(AccountCreation {
            did: credentials.did.clone(),
            handle: credentials.handle.clone(),
            resumed,
            credentials,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::client::ClientError;
    use crate::testing::{sample_migration, FakeProvider, ALICE_DID, TARGET_URL};

    #[tokio::test]
    async fn test_account_created_with_service_auth() {
        let provider = FakeProvider::with_source_account();
        let source = provider.source_client().await;
        let target = provider.anonymous(TARGET_URL);

        let created = provider
            .provisioner()
            .provision(&source, target.as_ref(), &provider, &sample_migration("target-pw"))
            .await
            .unwrap();

        assert_eq!(created.did, ALICE_DID);
        assert!(!created.resumed);
        assert!(provider.has_account(TARGET_URL, ALICE_DID));
        assert_eq!(provider.call_count(TARGET_URL, "createAccount"), 1);
    }

    #[tokio::test]
    async fn test_existing_account_is_resumed() {
        let provider = FakeProvider::with_source_account();
        provider.seed_target_account(ALICE_DID, "alice.target.test", "target-pw");
        let source = provider.source_client().await;
        let target = provider.anonymous(TARGET_URL);

        let created = provider
            .provisioner()
            .provision(&source, target.as_ref(), &provider, &sample_migration("target-pw"))
            .await
            .unwrap();
        assert!(created.resumed);
    }

    #[tokio::test]
    async fn test_invite_code_required() {
        let provider = FakeProvider::with_source_account();
        provider.require_invite(TARGET_URL);
        let source = provider.source_client().await;
        let target = provider.anonymous(TARGET_URL);

        let result = provider
            .provisioner()
            .provision(&source, target.as_ref(), &provider, &sample_migration("target-pw"))
            .await;
        assert!(matches!(
            result,
            Err(MigrationError::InvalidRequest { ref field, .. }) if field == "invite_code"
        ));
        assert_eq!(provider.call_count(TARGET_URL, "createAccount"), 0);

        let mut migration = sample_migration("target-pw");
        migration.invite_code = Some(crate::testing::INVITE_CODE.to_string());
        provider
            .provisioner()
            .provision(&source, target.as_ref(), &provider, &migration)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_unreachable_target_is_unavailable() {
        let provider = FakeProvider::with_source_account();
        provider.fail_next(
            TARGET_URL,
            "describeServer",
            ClientError::Network {
                message: "connection refused".to_string(),
            },
            3,
        );
        let source = provider.source_client().await;
        let target = provider.anonymous(TARGET_URL);

        let result = provider
            .provisioner()
            .provision(&source, target.as_ref(), &provider, &sample_migration("pw"))
            .await;
        assert!(matches!(
            result,
            Err(MigrationError::UpstreamUnavailable { attempts: 3, .. })
        ));
    }
}
