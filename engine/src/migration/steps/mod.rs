//! Migration steps
//!
//! - **account**: target account provisioning
//! - **repository**, **blob**, **preferences**: the data transfer engine
//! - **plc**: the identity rotation ceremony

pub mod account;
pub mod blob;
pub mod plc;
pub mod preferences;
pub mod repository;

use crate::migration::retry::{RetryCallback, RetryPolicy};
use crate::services::config::{BlobConfig, RetryConfig};

pub use account::AccountProvisioner;
pub use blob::{BlobStatus, BlobTransferRecord, BlobTransferReport, BlobTransferStatus};
pub use plc::{IdentityCeremony, TokenRequestOutcome};
pub use repository::RepositoryTransferReport;

/// Bulk content copy from the source account to the target account
#[derive(Clone)]
pub struct DataTransferEngine {
    retry: RetryConfig,
    blob: BlobConfig,
    on_retry: RetryCallback,
}

impl DataTransferEngine {
    pub fn new(retry: RetryConfig, blob: BlobConfig, on_retry: RetryCallback) -> Self {
        Self {
            retry,
            blob,
            on_retry,
        }
    }

    fn policy(&self, attempts: u32) -> RetryPolicy {
        self.retry.policy(attempts)
    }
}
