// Core types for the migration state machine
use serde::{Deserialize, Serialize};
use std::fmt;

use super::status::{StatusReport, VerificationPhase};
use super::steps::blob::BlobTransferReport;
use crate::services::client::types::current_time_secs;

/// Where a migration stands. Only moves forward, except for an explicit reset.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MigrationPhase {
    #[default]
    Pending,
    Created,
    DataMigrated,
    IdentityMigrated,
    Finalized,
    Error,
}

impl MigrationPhase {
    /// Phase entered once the verification guarding this one passes
    pub fn next(self) -> Option<MigrationPhase> {
        match self {
            MigrationPhase::Pending => Some(MigrationPhase::Created),
            MigrationPhase::Created => Some(MigrationPhase::DataMigrated),
            MigrationPhase::DataMigrated => Some(MigrationPhase::IdentityMigrated),
            MigrationPhase::IdentityMigrated => Some(MigrationPhase::Finalized),
            MigrationPhase::Finalized | MigrationPhase::Error => None,
        }
    }

    /// Verification that must pass to leave this phase
    pub fn exit_verification(self) -> Option<VerificationPhase> {
        match self {
            MigrationPhase::Pending => Some(VerificationPhase::AccountCreated),
            MigrationPhase::Created => Some(VerificationPhase::DataImported),
            MigrationPhase::DataMigrated => Some(VerificationPhase::IdentityUpdated),
            MigrationPhase::IdentityMigrated => Some(VerificationPhase::Activated),
            MigrationPhase::Finalized | MigrationPhase::Error => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, MigrationPhase::Finalized | MigrationPhase::Error)
    }

    /// Position in the forward sequence. Error sorts after everything.
    fn rank(self) -> u8 {
        match self {
            MigrationPhase::Pending => 0,
            MigrationPhase::Created => 1,
            MigrationPhase::DataMigrated => 2,
            MigrationPhase::IdentityMigrated => 3,
            MigrationPhase::Finalized => 4,
            MigrationPhase::Error => 5,
        }
    }

    /// True when `self` is a later successful phase than `other`
    pub fn is_past(self, other: MigrationPhase) -> bool {
        self != MigrationPhase::Error && self.rank() > other.rank()
    }
}

impl fmt::Display for MigrationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MigrationPhase::Pending => "Pending",
            MigrationPhase::Created => "Created",
            MigrationPhase::DataMigrated => "DataMigrated",
            MigrationPhase::IdentityMigrated => "IdentityMigrated",
            MigrationPhase::Finalized => "Finalized",
            MigrationPhase::Error => "Error",
        };
        f.write_str(name)
    }
}

/// Completed data sub-steps, so repeating one is a no-op
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct DataProgress {
    pub repository: bool,
    pub blobs: bool,
    pub preferences: bool,
    pub blob_summary: Option<BlobSummary>,
}

impl DataProgress {
    pub fn is_complete(&self) -> bool {
        self.repository && self.blobs && self.preferences
    }

    pub fn is_done(&self, step: DataStep) -> bool {
        match step {
            DataStep::Repository => self.repository,
            DataStep::Blobs => self.blobs,
            DataStep::Preferences => self.preferences,
        }
    }

    /// Whether running `step` again can change the target. A blob step that
    /// was accepted with failures stays eligible so the failed ids are retried.
    pub fn needs_run(&self, step: DataStep) -> bool {
        match step {
            DataStep::Blobs => {
                !self.blobs || self.blob_summary.as_ref().is_some_and(|s| s.failed > 0)
            }
            _ => !self.is_done(step),
        }
    }
}

/// Sub-steps of the data phase, in execution order
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DataStep {
    Repository,
    Blobs,
    Preferences,
}

impl DataStep {
    pub const ALL: [DataStep; 3] = [DataStep::Repository, DataStep::Blobs, DataStep::Preferences];
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct BlobSummary {
    pub total: usize,
    pub migrated: usize,
    pub failed: usize,
}

impl From<&BlobTransferReport> for BlobSummary {
    fn from(report: &BlobTransferReport) -> Self {
        Self {
            total: report.total,
            migrated: report.migrated,
            failed: report.failed,
        }
    }
}

/// A mutating step finished but its verification has not passed yet
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PendingVerification {
    pub phase: VerificationPhase,
    /// Failed verification attempts, the post-operation check included
    pub failures: u32,
}

/// Target account details supplied by the user
#[derive(Deserialize, Clone)]
pub struct CreateAccountInput {
    pub target_service_url: String,
    pub handle: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub invite_code: Option<String>,
}

impl fmt::Debug for CreateAccountInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CreateAccountInput")
            .field("target_service_url", &self.target_service_url)
            .field("handle", &self.handle)
            .field("email", &self.email)
            .field("invite_code", &self.invite_code.is_some())
            .finish_non_exhaustive()
    }
}

/// Per-user migration record, persisted in the session store
#[derive(Serialize, Deserialize, Clone)]
pub struct MigrationSession {
    pub source_did: String,
    pub source_handle: String,
    pub source_service_url: String,
    pub target_service_url: String,
    pub target_handle: String,
    pub target_email: String,
    /// Write-once. Cleared after finalization.
    pub target_password: String,
    pub invite_code: Option<String>,
    pub phase: MigrationPhase,
    pub account_created: bool,
    #[serde(default)]
    pub data: DataProgress,
    pub pending_verification: Option<PendingVerification>,
    pub token_requested_at: Option<u64>,
    /// Public half of the rotation key added during the identity phase
    pub rotation_key_did: Option<String>,
    pub last_error: Option<String>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl MigrationSession {
    pub fn new(
        source_did: &str,
        source_handle: &str,
        source_service_url: &str,
        input: &CreateAccountInput,
    ) -> Self {
        let now = current_time_secs();
        Self {
            source_did: source_did.to_string(),
            source_handle: source_handle.to_string(),
            source_service_url: source_service_url.to_string(),
            target_service_url: input.target_service_url.trim_end_matches('/').to_string(),
            target_handle: input.handle.clone(),
            target_email: input.email.clone(),
            target_password: input.password.clone(),
            invite_code: input.invite_code.clone().filter(|code| !code.is_empty()),
            phase: MigrationPhase::Pending,
            account_created: false,
            data: DataProgress::default(),
            pending_verification: None,
            token_requested_at: None,
            rotation_key_did: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether `input` describes the same migration attempt
    pub fn matches_input(&self, input: &CreateAccountInput) -> bool {
        self.target_service_url == input.target_service_url.trim_end_matches('/')
            && self.target_password == input.password
    }

    pub fn touch(&mut self) {
        self.updated_at = current_time_secs();
    }

    /// Move to the next phase and clear verification bookkeeping
    pub fn advance(&mut self) {
        if let Some(next) = self.phase.next() {
            self.phase = next;
        }
        self.pending_verification = None;
        self.last_error = None;
        self.touch();
    }

    /// Record a failed verification for the phase being left
    pub fn record_verification_failure(&mut self, report: &StatusReport) -> u32 {
        let failures = match &mut self.pending_verification {
            Some(pending) if pending.phase == report.phase => {
                pending.failures += 1;
                pending.failures
            }
            _ => {
                self.pending_verification = Some(PendingVerification {
                    phase: report.phase,
                    failures: 1,
                });
                1
            }
        };
        self.last_error = report.reason.clone();
        self.touch();
        failures
    }

    pub fn summary(&self) -> MigrationSummary {
        MigrationSummary {
            source_did: self.source_did.clone(),
            source_handle: self.source_handle.clone(),
            target_service_url: self.target_service_url.clone(),
            target_handle: self.target_handle.clone(),
            target_email: self.target_email.clone(),
            phase: self.phase,
            account_created: self.account_created,
            data: self.data.clone(),
            pending_verification: self.pending_verification.clone(),
            token_requested_at: self.token_requested_at,
            rotation_key_did: self.rotation_key_did.clone(),
            last_error: self.last_error.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

impl fmt::Debug for MigrationSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationSession")
            .field("source_did", &self.source_did)
            .field("target_service_url", &self.target_service_url)
            .field("target_handle", &self.target_handle)
            .field("phase", &self.phase)
            .field("account_created", &self.account_created)
            .field("pending_verification", &self.pending_verification)
            .finish_non_exhaustive()
    }
}

/// MigrationSession as shown to callers, without the password
#[derive(Serialize, Debug, Clone)]
pub struct MigrationSummary {
    pub source_did: String,
    pub source_handle: String,
    pub target_service_url: String,
    pub target_handle: String,
    pub target_email: String,
    pub phase: MigrationPhase,
    pub account_created: bool,
    pub data: DataProgress,
    pub pending_verification: Option<PendingVerification>,
    pub token_requested_at: Option<u64>,
    pub rotation_key_did: Option<String>,
    pub last_error: Option<String>,
    pub created_at: u64,
    pub updated_at: u64,
}

/// Result of one phase operation
#[derive(Serialize, Debug)]
pub struct PhaseReport<T = ()> {
    /// Phase after the operation
    pub phase: MigrationPhase,
    pub message: String,
    /// The operation had already succeeded and nothing was sent to the target
    pub already_complete: bool,
    /// Whether the step's own work finished (blob failures can leave it unfinished)
    pub completed: bool,
    pub verification: Option<StatusReport>,
    pub details: Option<T>,
}

impl<T> PhaseReport<T> {
    pub fn already_complete(phase: MigrationPhase, message: &str) -> Self {
        Self {
            phase,
            message: message.to_string(),
            already_complete: true,
            completed: true,
            verification: None,
            details: None,
        }
    }
}

/// Public state of the service and of the caller's migration
#[derive(Serialize, Debug)]
pub struct MigrationState {
    pub enabled: bool,
    pub message: Option<String>,
    pub logged_in: bool,
    pub phase: MigrationPhase,
    pub migration: Option<MigrationSummary>,
}
