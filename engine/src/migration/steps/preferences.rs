use tracing::{info, instrument};

use super::DataTransferEngine;
use crate::migration::retry::retry_with_backoff;
use crate::migration::types::MigrationPhase;
use crate::services::client::{SourceClient, TargetClient};
use crate::services::errors::{MigrationError, MigrationResult};

impl DataTransferEngine {
    /// Copy the preferences document verbatim. Re-running overwrites the target copy.
    #[instrument(skip(self, source, target), err)]
    pub async fn transfer_preferences(
        &self,
        source: &SourceClient,
        target: &TargetClient,
    ) -> MigrationResult<()> {
        let policy = self.policy(self.retry.preferences_attempts);

        let preferences = retry_with_backoff(policy, "getPreferences", &self.on_retry, || {
            source.get_preferences()
        })
        .await
        .map_err(|exhausted| {
            MigrationError::from_source(
                MigrationPhase::Created,
                "getPreferences",
                exhausted.attempts,
                exhausted.error,
            )
        })?;

        retry_with_backoff(policy, "putPreferences", &self.on_retry, || {
            target.put_preferences(preferences.clone())
        })
        .await
        .map_err(|exhausted| {
            MigrationError::from_target(
                MigrationPhase::Created,
                "putPreferences",
                exhausted.attempts,
                exhausted.error,
            )
        })?;

        info!("Preferences migrated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::testing::{FakeProvider, ALICE_DID, TARGET_URL};

    #[tokio::test]
    async fn test_preferences_copied_verbatim() {
        let provider = FakeProvider::with_source_account();
        let (source, target) = provider.connected_pair().await;
        let engine = provider.transfer_engine();

        engine.transfer_preferences(&source, &target).await.unwrap();
        let expected = source.get_preferences().await.unwrap();
        assert_eq!(provider.preferences(TARGET_URL, ALICE_DID), expected);

        // Second run overwrites with the same document
        engine.transfer_preferences(&source, &target).await.unwrap();
        assert_eq!(provider.preferences(TARGET_URL, ALICE_DID), expected);
    }
}
