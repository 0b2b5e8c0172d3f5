use std::fmt;

use serde::Serialize;
use tracing::{info, instrument};

use super::DataTransferEngine;
use crate::migration::retry::{retry_with_backoff, Retryable};
use crate::migration::types::MigrationPhase;
use crate::services::client::{ClientError, SourceClient, TargetClient};
use crate::services::errors::{MigrationError, MigrationResult};

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct RepositoryTransferReport {
    pub car_bytes: usize,
}

/// Which half of the export/import pair failed
enum RepoFailure {
    Export(ClientError),
    Import(ClientError),
}

impl fmt::Display for RepoFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepoFailure::Export(e) => write!(f, "export failed: {}", e),
            RepoFailure::Import(e) => write!(f, "import failed: {}", e),
        }
    }
}

impl Retryable for RepoFailure {
    fn is_transient(&self) -> bool {
        match self {
            RepoFailure::Export(e) | RepoFailure::Import(e) => e.is_transient(),
        }
    }
}

impl DataTransferEngine {
    /// Export the repository snapshot and import it into the target, retried as a unit
    #[instrument(skip(self, source, target), err)]
    pub async fn transfer_repository(
        &self,
        source: &SourceClient,
        target: &TargetClient,
        did: &str,
    ) -> MigrationResult<RepositoryTransferReport> {
        let policy = self.policy(self.retry.repo_attempts);

        let car_bytes = retry_with_backoff(policy, "repository transfer", &self.on_retry, || async {
            let car = source.export_repo(did).await.map_err(RepoFailure::Export)?;
            let size = car.len();
            target.import_repo(car).await.map_err(RepoFailure::Import)?;
            Ok(size)
        })
        .await
        .map_err(|exhausted| match exhausted.error {
            RepoFailure::Export(e) => {
                MigrationError::from_source(MigrationPhase::Created, "getRepo", exhausted.attempts, e)
            }
            RepoFailure::Import(e) => MigrationError::from_target(
                MigrationPhase::Created,
                "importRepo",
                exhausted.attempts,
                e,
            ),
        })?;

        info!("Repository migrated ({} bytes)", car_bytes);
        Ok(RepositoryTransferReport { car_bytes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeProvider, ALICE_DID, SOURCE_URL, TARGET_URL};

    #[tokio::test]
    async fn test_repository_copied_to_target() {
        let provider = FakeProvider::with_source_account();
        let (source, target) = provider.connected_pair().await;
        let engine = provider.transfer_engine();

        let report = engine
            .transfer_repository(&source, &target, ALICE_DID)
            .await
            .unwrap();
        assert!(report.car_bytes > 0);

        let status = target.check_account_status().await.unwrap();
        assert!(status.repo_commit_present());
        assert_eq!(status.indexed_records, 42);
    }

    #[tokio::test]
    async fn test_transient_import_failure_retries_whole_unit() {
        let provider = FakeProvider::with_source_account();
        let (source, target) = provider.connected_pair().await;
        provider.fail_next(
            TARGET_URL,
            "importRepo",
            ClientError::from_status("importRepo", 503, "", None),
            1,
        );

        provider
            .transfer_engine()
            .transfer_repository(&source, &target, ALICE_DID)
            .await
            .unwrap();
        assert_eq!(provider.call_count(SOURCE_URL, "getRepo"), 2);
        assert_eq!(provider.call_count(TARGET_URL, "importRepo"), 2);
    }

    #[tokio::test]
    async fn test_rejected_import_is_not_retried() {
        let provider = FakeProvider::with_source_account();
        let (source, target) = provider.connected_pair().await;
        provider.fail_next(
            TARGET_URL,
            "importRepo",
            ClientError::from_status("importRepo", 400, r#"{"error":"InvalidRequest"}"#, None),
            1,
        );

        let result = provider
            .transfer_engine()
            .transfer_repository(&source, &target, ALICE_DID)
            .await;
        assert!(matches!(result, Err(MigrationError::UpstreamRejected { .. })));
        assert_eq!(provider.call_count(TARGET_URL, "importRepo"), 1);
    }
}
