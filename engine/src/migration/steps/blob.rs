//! Content blob transfer
//!
//! Blob ids are enumerated from the source page by page and each page is
//! processed one blob at a time. Per-blob failures are recorded and the run
//! continues. Only a failed enumeration aborts the step.

use std::collections::HashSet;

use serde::Serialize;
use tracing::{info, instrument, warn};

use super::DataTransferEngine;
use crate::migration::retry::retry_with_backoff;
use crate::migration::types::MigrationPhase;
use crate::services::client::{BlobData, BlobId, ClientError, SourceClient, TargetClient};
use crate::services::errors::{MigrationError, MigrationResult};

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BlobStatus {
    Pending,
    Migrated,
    Failed,
}

/// Outcome for a single blob within one transfer run
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct BlobTransferRecord {
    pub content_id: String,
    pub size_bytes: Option<u64>,
    pub status: BlobStatus,
    pub last_error: Option<String>,
}

impl BlobTransferRecord {
    fn pending(content_id: &str) -> Self {
        Self {
            content_id: content_id.to_string(),
            size_bytes: None,
            status: BlobStatus::Pending,
            last_error: None,
        }
    }

    fn fail(&mut self, error: impl ToString) {
        self.status = BlobStatus::Failed;
        self.last_error = Some(error.to_string());
    }
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BlobTransferStatus {
    Complete,
    CompleteWithFailures,
    Failed,
}

#[derive(Serialize, Debug, Clone)]
pub struct BlobTransferReport {
    pub total: usize,
    pub migrated: usize,
    pub failed: usize,
    pub status: BlobTransferStatus,
    /// Records of failed blobs only
    pub failures: Vec<BlobTransferRecord>,
}

impl BlobTransferReport {
    fn from_records(records: Vec<BlobTransferRecord>) -> Self {
        let total = records.len();
        let migrated = records
            .iter()
            .filter(|r| r.status == BlobStatus::Migrated)
            .count();
        let failures: Vec<_> = records
            .into_iter()
            .filter(|r| r.status != BlobStatus::Migrated)
            .collect();
        let failed = failures.len();

        let status = if failed == 0 {
            BlobTransferStatus::Complete
        } else if migrated > 0 {
            BlobTransferStatus::CompleteWithFailures
        } else {
            BlobTransferStatus::Failed
        };

        Self {
            total,
            migrated,
            failed,
            status,
            failures,
        }
    }

    /// Whether the step counts as done under the given tolerance
    pub fn is_acceptable(&self, allow_partial_failures: bool) -> bool {
        match self.status {
            BlobTransferStatus::Complete => true,
            BlobTransferStatus::CompleteWithFailures => allow_partial_failures,
            BlobTransferStatus::Failed => false,
        }
    }
}

impl DataTransferEngine {
    pub fn allow_partial_blob_failures(&self) -> bool {
        self.blob.allow_partial_failures
    }

    #[instrument(skip(self, source, target), err)]
    pub async fn transfer_blobs(
        &self,
        source: &SourceClient,
        target: &TargetClient,
        did: &str,
    ) -> MigrationResult<BlobTransferReport> {
        let enumeration = self.policy(self.retry.blob_enumeration_attempts);
        let mut cursor: Option<String> = None;
        let mut seen = HashSet::new();
        let mut records = Vec::new();

        loop {
            let page = retry_with_backoff(enumeration, "listBlobs", &self.on_retry, || {
                source.list_blobs(did, cursor.as_deref(), self.blob.page_size)
            })
            .await
            .map_err(|exhausted| {
                MigrationError::from_source(
                    MigrationPhase::Created,
                    "listBlobs",
                    exhausted.attempts,
                    exhausted.error,
                )
            })?;

            for cid in &page.cids {
                if !seen.insert(cid.clone()) {
                    continue;
                }
                let record = self.transfer_one(source, target, did, cid).await?;
                records.push(record);
            }

            match page.next_cursor() {
                Some(next) if Some(next) != cursor.as_deref() => cursor = Some(next.to_string()),
                _ => break,
            }
        }

        let report = BlobTransferReport::from_records(records);
        info!(
            "Blob transfer finished: {}/{} migrated, {} failed",
            report.migrated, report.total, report.failed
        );
        Ok(report)
    }

    /// Copy one blob. Auth failures abort the whole step, anything else is recorded.
    async fn transfer_one(
        &self,
        source: &SourceClient,
        target: &TargetClient,
        did: &str,
        cid: &str,
    ) -> MigrationResult<BlobTransferRecord> {
        let mut record = BlobTransferRecord::pending(cid);

        let blob_id = match BlobId::parse(cid) {
            Ok(blob_id) => blob_id,
            Err(e) => {
                warn!("Skipping blob with invalid id {:?}: {}", cid, e);
                record.fail(e);
                return Ok(record);
            }
        };

        let download = self.policy(self.retry.blob_download_attempts);
        let max_bytes = self.blob.max_blob_bytes;
        let blob = match retry_with_backoff(download, "getBlob", &self.on_retry, || {
            source.get_blob(did, blob_id.as_str(), max_bytes)
        })
        .await
        {
            Ok(blob) => blob,
            Err(exhausted) => {
                abort_on_auth(&exhausted.error, true)?;
                if let ClientError::TooLarge { size, limit, .. } = &exhausted.error {
                    warn!("Blob {} is {} bytes, above the {} byte limit", cid, size, limit);
                    record.size_bytes = Some(*size);
                    record.fail(format!(
                        "Blob size {} exceeds limit of {} bytes",
                        size, limit
                    ));
                    return Ok(record);
                }
                warn!("Failed to download blob {}: {}", cid, exhausted.error);
                record.fail(exhausted.error);
                return Ok(record);
            }
        };
        record.size_bytes = Some(blob.bytes.len() as u64);

        let BlobData {
            bytes,
            content_type,
        } = blob;
        let content_type = content_type.unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());
        let upload = self.policy(self.retry.blob_upload_attempts);
        match retry_with_backoff(upload, "uploadBlob", &self.on_retry, || {
            target.upload_blob(bytes.clone(), &content_type)
        })
        .await
        {
            Ok(()) => record.status = BlobStatus::Migrated,
            Err(exhausted) => {
                abort_on_auth(&exhausted.error, false)?;
                warn!("Failed to upload blob {}: {}", cid, exhausted.error);
                record.fail(exhausted.error);
            }
        }

        Ok(record)
    }
}

fn abort_on_auth(error: &ClientError, on_source: bool) -> MigrationResult<()> {
    if !error.is_auth() {
        return Ok(());
    }
    if on_source {
        Err(MigrationError::Unauthorized {
            message: error.to_string(),
        })
    } else {
        Err(MigrationError::TargetSessionMissing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fake_cid, FakeProvider, ALICE_DID, SOURCE_URL, TARGET_URL};

    #[tokio::test]
    async fn test_all_blobs_migrated() {
        let provider = FakeProvider::with_source_account();
        let (source, target) = provider.connected_pair().await;

        let report = provider
            .transfer_engine()
            .transfer_blobs(&source, &target, ALICE_DID)
            .await
            .unwrap();

        assert_eq!(report.total, 10);
        assert_eq!(report.migrated, 10);
        assert_eq!(report.status, BlobTransferStatus::Complete);
        assert_eq!(provider.blob_count(TARGET_URL, ALICE_DID), 10);
    }

    #[tokio::test]
    async fn test_partial_failures_are_counted() {
        let provider = FakeProvider::with_source_account();
        let (source, target) = provider.connected_pair().await;
        provider.fail_blob(&fake_cid(3));
        provider.fail_blob(&fake_cid(7));

        let report = provider
            .transfer_engine()
            .transfer_blobs(&source, &target, ALICE_DID)
            .await
            .unwrap();

        assert_eq!(report.migrated + report.failed, report.total);
        assert_eq!(report.failed, 2);
        assert_eq!(report.status, BlobTransferStatus::CompleteWithFailures);
        assert!(report.is_acceptable(true));
        assert!(!report.is_acceptable(false));
        assert!(report.failures.iter().all(|r| r.status == BlobStatus::Failed));
    }

    #[tokio::test]
    async fn test_every_blob_failing_is_not_a_hard_error() {
        let provider = FakeProvider::with_source_account();
        let (source, target) = provider.connected_pair().await;
        for n in 0..10 {
            provider.fail_blob(&fake_cid(n));
        }

        let report = provider
            .transfer_engine()
            .transfer_blobs(&source, &target, ALICE_DID)
            .await
            .unwrap();
        assert_eq!(report.failed, 10);
        assert_eq!(report.status, BlobTransferStatus::Failed);
        assert!(!report.is_acceptable(true));
    }

    #[tokio::test]
    async fn test_enumeration_failure_is_hard_failure() {
        let provider = FakeProvider::with_source_account();
        let (source, target) = provider.connected_pair().await;
        provider.fail_next(
            SOURCE_URL,
            "listBlobs",
            ClientError::from_status("listBlobs", 500, "", None),
            5,
        );

        let result = provider
            .transfer_engine()
            .transfer_blobs(&source, &target, ALICE_DID)
            .await;
        match result {
            Err(MigrationError::UpstreamUnavailable { attempts, .. }) => assert_eq!(attempts, 3),
            other => panic!("expected UpstreamUnavailable, got {:?}", other.map(|r| r.total)),
        }
    }

    #[tokio::test]
    async fn test_oversized_blob_recorded_without_upload() {
        let provider = FakeProvider::with_source_account();
        let (source, target) = provider.connected_pair().await;
        provider.add_source_blob(ALICE_DID, fake_cid(99), vec![0u8; 128]);

        let blob = crate::services::config::BlobConfig {
            max_blob_bytes: 64,
            ..Default::default()
        };
        let engine = DataTransferEngine::new(
            crate::services::config::RetryConfig::immediate(),
            blob,
            crate::migration::retry::log_retry(),
        );
        let report = engine
            .transfer_blobs(&source, &target, ALICE_DID)
            .await
            .unwrap();

        let oversized = report
            .failures
            .iter()
            .find(|r| r.content_id == fake_cid(99))
            .unwrap();
        assert_eq!(oversized.size_bytes, Some(128));
        assert!(oversized.last_error.as_deref().unwrap().contains("exceeds"));
        assert_eq!(report.migrated, 10);
        assert_eq!(provider.call_count(TARGET_URL, "uploadBlob"), 10);

        // Refused on its length: one request, no retries, body never served
        assert_eq!(provider.call_count(SOURCE_URL, "getBlob"), 11);
        assert_eq!(provider.call_count(SOURCE_URL, "getBlobBody"), 10);
    }

    #[tokio::test]
    async fn test_pagination_and_invalid_ids() {
        let provider = FakeProvider::with_source_account();
        provider.set_page_size_cap(3);
        provider.add_raw_source_blob_id(ALICE_DID, "not-a-cid");
        let (source, target) = provider.connected_pair().await;

        let report = provider
            .transfer_engine()
            .transfer_blobs(&source, &target, ALICE_DID)
            .await
            .unwrap();
        assert_eq!(report.total, 11);
        assert_eq!(report.migrated, 10);
        assert_eq!(report.failures[0].content_id, "not-a-cid");
        assert!(provider.call_count(SOURCE_URL, "listBlobs") >= 4);
    }

    #[tokio::test]
    async fn test_expired_target_session_aborts() {
        let provider = FakeProvider::with_source_account();
        let (source, target) = provider.connected_pair().await;
        provider.revoke_sessions(TARGET_URL);

        let result = provider
            .transfer_engine()
            .transfer_blobs(&source, &target, ALICE_DID)
            .await;
        assert!(matches!(result, Err(MigrationError::TargetSessionMissing)));
    }
}
