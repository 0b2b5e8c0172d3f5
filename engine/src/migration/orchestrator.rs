//! Migration orchestrator - the four-phase state machine
//!
//! Every operation is one user action: resolve both clients through the
//! broker, run at most one phase of work, then ask the reconciler whether the
//! phase may be left. Progress is written back to the session store after
//! each mutating step so a retried request resumes instead of starting over.

use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, instrument, warn};

use super::keys::RecoveryKeyExport;
use super::retry::{log_retry, retry_with_backoff, RetryCallback};
use super::status::{StatusReconciler, StatusReport, VerificationPhase};
use super::steps::account::AccountCreation;
use super::steps::{
    AccountProvisioner, BlobTransferReport, DataTransferEngine, IdentityCeremony,
    RepositoryTransferReport, TokenRequestOutcome,
};
use super::types::*;
use crate::services::client::types::current_time_secs;
use crate::services::client::{ClientFactory, SourceClient, TargetClient};
use crate::services::config::MigrationConfig;
use crate::services::errors::{MigrationError, MigrationResult};
use crate::services::session::{SessionBroker, SessionStore};

/// Source account identity after login
#[derive(Serialize, Debug, Clone)]
pub struct SourceLogin {
    pub did: String,
    pub handle: String,
    pub service_url: String,
}

/// What the data phase did in one call
#[derive(Serialize, Debug, Default)]
pub struct DataTransferDetails {
    pub repository: Option<RepositoryTransferReport>,
    pub blobs: Option<BlobTransferReport>,
    pub preferences_migrated: bool,
    /// Sub-steps that had already finished and were not repeated
    pub skipped: Vec<DataStep>,
}

/// Result of the identity ceremony. Holds the only copy of the recovery key.
#[derive(Serialize, Debug)]
pub struct IdentityReport {
    pub phase: MigrationPhase,
    pub message: String,
    pub already_complete: bool,
    pub recovery_key: Option<RecoveryKeyExport>,
    pub verification: Option<StatusReport>,
}

enum Gate {
    Run,
    AlreadyDone,
}

pub struct MigrationOrchestrator {
    config: MigrationConfig,
    broker: SessionBroker,
    provisioner: AccountProvisioner,
    transfer: DataTransferEngine,
    ceremony: IdentityCeremony,
    reconciler: StatusReconciler,
    on_retry: RetryCallback,
}

impl MigrationOrchestrator {
    pub fn new(
        config: MigrationConfig,
        factory: Arc<dyn ClientFactory>,
        store: Arc<dyn SessionStore>,
    ) -> Self {
        Self::with_retry_callback(config, factory, store, log_retry())
    }

    pub fn with_retry_callback(
        config: MigrationConfig,
        factory: Arc<dyn ClientFactory>,
        store: Arc<dyn SessionStore>,
        on_retry: RetryCallback,
    ) -> Self {
        Self {
            broker: SessionBroker::new(factory, store, config.session.clone()),
            provisioner: AccountProvisioner::new(
                config.retry.clone(),
                config.identity.clone(),
                on_retry.clone(),
            ),
            transfer: DataTransferEngine::new(
                config.retry.clone(),
                config.blob.clone(),
                on_retry.clone(),
            ),
            ceremony: IdentityCeremony::new(
                config.retry.clone(),
                config.identity.clone(),
                on_retry.clone(),
            ),
            reconciler: StatusReconciler,
            on_retry,
            config,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.migration_enabled
    }

    fn ensure_enabled(&self) -> MigrationResult<()> {
        if self.is_enabled() {
            Ok(())
        } else {
            Err(MigrationError::MigrationDisabled {
                message: self.config.maintenance_message.clone(),
            })
        }
    }

    /// State for a caller without a session
    pub fn service_state(&self) -> MigrationState {
        let enabled = self.is_enabled();
        MigrationState {
            enabled,
            message: (!enabled).then(|| self.config.maintenance_message.clone()),
            logged_in: false,
            phase: MigrationPhase::Pending,
            migration: None,
        }
    }

    pub async fn migration_state(&self, session_id: &str) -> MigrationResult<MigrationState> {
        let mut state = self.service_state();
        state.logged_in = self.broker.source_session(session_id).await?.is_some();
        if let Some(migration) = self.broker.load_migration(session_id).await? {
            state.phase = migration.phase;
            state.migration = Some(migration.summary());
        }
        Ok(state)
    }

    #[instrument(skip(self, password), err)]
    pub async fn login(
        &self,
        session_id: &str,
        service_url: &str,
        identifier: &str,
        password: &str,
    ) -> MigrationResult<SourceLogin> {
        self.ensure_enabled()?;
        require_field("service_url", service_url)?;
        require_url("service_url", service_url)?;
        require_field("identifier", identifier)?;
        require_field("password", password)?;

        let credentials = self
            .broker
            .login_source(session_id, service_url, identifier, password)
            .await?;

        // A different source account starts a new migration attempt
        if let Some(existing) = self.broker.load_migration(session_id).await? {
            if existing.source_did != credentials.did {
                info!(
                    "Source account changed from {} to {}, dropping previous migration",
                    existing.source_did, credentials.did
                );
                self.broker.clear_migration(session_id).await?;
            }
        }

        Ok(SourceLogin {
            did: credentials.did,
            handle: credentials.handle,
            service_url: credentials.pds,
        })
    }

    pub async fn logout(&self, session_id: &str) -> MigrationResult<()> {
        self.broker.logout(session_id).await
    }

    pub async fn session_summary(&self, session_id: &str) -> MigrationResult<Option<MigrationSummary>> {
        Ok(self
            .broker
            .load_migration(session_id)
            .await?
            .map(|m| m.summary()))
    }

    /// Pending -> Created
    #[instrument(skip(self, input), fields(target_url = %input.target_service_url), err)]
    pub async fn create_account(
        &self,
        session_id: &str,
        input: CreateAccountInput,
    ) -> MigrationResult<PhaseReport<AccountCreation>> {
        self.ensure_enabled()?;
        validate_account_input(&input)?;

        let source = self.broker.source_client(session_id).await?;
        let (source_did, source_handle, source_url) = match source.session() {
            Some(s) => (s.did.clone(), s.handle.clone(), s.pds.clone()),
            None => return Err(MigrationError::Unauthorized {
                message: "source client has no session".to_string(),
            }),
        };

        let existing = self
            .broker
            .load_migration(session_id)
            .await?
            .filter(|m| m.source_did == source_did);

        let mut migration = match existing {
            Some(m) if m.phase == MigrationPhase::Error => {
                return Err(MigrationError::invalid_state("Pending", m.phase))
            }
            Some(m) if m.phase.is_past(MigrationPhase::Pending) => {
                return Ok(PhaseReport::already_complete(
                    m.phase,
                    "Account already created",
                ))
            }
            Some(m) if m.account_created && m.matches_input(&input) => m,
            _ => MigrationSession::new(&source_did, &source_handle, &source_url, &input),
        };

        let (target, creation) = if migration.account_created {
            (self.broker.target_client(&migration).await?, None)
        } else {
            let anonymous = self.broker.anonymous(&migration.target_service_url);
            let creation = match self
                .provisioner
                .provision(
                    &source,
                    anonymous.as_ref(),
                    self.broker.factory().as_ref(),
                    &migration,
                )
                .await
            {
                Ok(creation) => creation,
                Err(e) => return Err(self.record_failure(session_id, &mut migration, e).await),
            };

            let target = self.broker.adopt_target(creation.credentials.clone()).await;
            migration.account_created = true;
            migration.touch();
            self.broker.save_migration(session_id, &migration).await?;
            (target, Some(creation))
        };

        let report = self
            .verify_transition(session_id, &mut migration, &source, Some(&target))
            .await?;
        let mut outcome = self.phase_outcome(&migration, report, "Account created")?;
        outcome.details = creation;
        Ok(outcome)
    }

    pub async fn migrate_repository(
        &self,
        session_id: &str,
    ) -> MigrationResult<PhaseReport<DataTransferDetails>> {
        self.run_data_steps(session_id, &[DataStep::Repository]).await
    }

    pub async fn migrate_blobs(
        &self,
        session_id: &str,
    ) -> MigrationResult<PhaseReport<DataTransferDetails>> {
        self.run_data_steps(session_id, &[DataStep::Blobs]).await
    }

    pub async fn migrate_preferences(
        &self,
        session_id: &str,
    ) -> MigrationResult<PhaseReport<DataTransferDetails>> {
        self.run_data_steps(session_id, &[DataStep::Preferences]).await
    }

    /// Created -> DataMigrated, running every remaining sub-step in order
    pub async fn migrate_data(
        &self,
        session_id: &str,
    ) -> MigrationResult<PhaseReport<DataTransferDetails>> {
        self.run_data_steps(session_id, &DataStep::ALL).await
    }

    #[instrument(skip(self), err)]
    async fn run_data_steps(
        &self,
        session_id: &str,
        steps: &[DataStep],
    ) -> MigrationResult<PhaseReport<DataTransferDetails>> {
        self.ensure_enabled()?;
        let source = self.broker.source_client(session_id).await?;
        let mut migration = self.load_for(session_id, &source).await?;
        if let Gate::AlreadyDone = gate(&migration, MigrationPhase::Created)? {
            return Ok(PhaseReport::already_complete(
                migration.phase,
                "Data already migrated",
            ));
        }

        let target = self.broker.target_client(&migration).await?;
        let did = migration.source_did.clone();
        let mut details = DataTransferDetails::default();

        for &step in steps {
            if !migration.data.needs_run(step) {
                details.skipped.push(step);
                continue;
            }

            let result = match step {
                DataStep::Repository => self
                    .transfer
                    .transfer_repository(&source, &target, &did)
                    .await
                    .map(|report| {
                        migration.data.repository = true;
                        details.repository = Some(report);
                    }),
                DataStep::Blobs => self
                    .transfer
                    .transfer_blobs(&source, &target, &did)
                    .await
                    .map(|report| {
                        migration.data.blob_summary = Some(BlobSummary::from(&report));
                        if report.is_acceptable(self.transfer.allow_partial_blob_failures()) {
                            migration.data.blobs = true;
                        } else {
                            migration.last_error = Some(format!(
                                "{} of {} blobs failed to migrate",
                                report.failed, report.total
                            ));
                        }
                        details.blobs = Some(report);
                    }),
                DataStep::Preferences => self
                    .transfer
                    .transfer_preferences(&source, &target)
                    .await
                    .map(|()| {
                        migration.data.preferences = true;
                        details.preferences_migrated = true;
                    }),
            };

            if let Err(e) = result {
                return Err(self.record_failure(session_id, &mut migration, e).await);
            }
            migration.touch();
            self.broker.save_migration(session_id, &migration).await?;

            if !migration.data.is_done(step) {
                warn!("Data step {:?} did not complete, phase stays Created", step);
                return Ok(PhaseReport {
                    phase: migration.phase,
                    message: migration
                        .last_error
                        .clone()
                        .unwrap_or_else(|| format!("{:?} step incomplete", step)),
                    already_complete: false,
                    completed: false,
                    verification: None,
                    details: Some(details),
                });
            }
        }

        if !migration.data.is_complete() {
            return Ok(PhaseReport {
                phase: migration.phase,
                message: "Step complete, remaining data steps pending".to_string(),
                already_complete: false,
                completed: true,
                verification: None,
                details: Some(details),
            });
        }

        let report = self
            .verify_transition(session_id, &mut migration, &source, Some(&target))
            .await?;
        let mut outcome = self.phase_outcome(&migration, report, "Data migrated")?;
        outcome.details = Some(details);
        Ok(outcome)
    }

    /// Emails the identity token, or reports the remaining cooldown
    #[instrument(skip(self), err)]
    pub async fn request_identity_token(
        &self,
        session_id: &str,
    ) -> MigrationResult<TokenRequestOutcome> {
        self.ensure_enabled()?;
        let source = self.broker.source_client(session_id).await?;
        let mut migration = self.load_for(session_id, &source).await?;
        if migration.phase != MigrationPhase::DataMigrated {
            return Err(MigrationError::invalid_state(
                MigrationPhase::DataMigrated.to_string(),
                migration.phase,
            ));
        }

        let outcome = self
            .ceremony
            .request_token(&source, migration.token_requested_at)
            .await?;
        if outcome.requested {
            migration.token_requested_at = Some(current_time_secs());
            migration.touch();
            self.broker.save_migration(session_id, &migration).await?;
        }
        Ok(outcome)
    }

    /// DataMigrated -> IdentityMigrated
    #[instrument(skip(self, token), err)]
    pub async fn sign_identity(
        &self,
        session_id: &str,
        token: &str,
    ) -> MigrationResult<IdentityReport> {
        self.ensure_enabled()?;
        let token = token.trim();
        require_field("token", token)?;

        let source = self.broker.source_client(session_id).await?;
        let mut migration = self.load_for(session_id, &source).await?;
        if let Gate::AlreadyDone = gate(&migration, MigrationPhase::DataMigrated)? {
            return Ok(IdentityReport {
                phase: migration.phase,
                message: "Identity already migrated".to_string(),
                already_complete: true,
                recovery_key: None,
                verification: None,
            });
        }

        let target = self.broker.target_client(&migration).await?;
        if let Err(e) = self
            .ceremony
            .check_same_account(&source, &target, &migration.source_did)
        {
            error!("Identity ceremony aborted: {}", e);
            migration.phase = MigrationPhase::Error;
            return Err(self.record_failure(session_id, &mut migration, e).await);
        }

        let export = match self.ceremony.sign_and_submit(&source, &target, token).await {
            Ok(export) => export,
            Err(e) => return Err(self.record_failure(session_id, &mut migration, e).await),
        };
        migration.rotation_key_did = Some(export.public_key.clone());
        migration.touch();
        self.broker.save_migration(session_id, &migration).await?;

        // The key has been submitted, so it must reach the caller whatever verification says
        let verification = match self
            .verify_transition(session_id, &mut migration, &source, Some(&target))
            .await
        {
            Ok(report) => Some(report),
            Err(e) => {
                warn!("Identity verification could not run: {}", e);
                None
            }
        };

        let verified = verification.as_ref().is_some_and(|r| r.ready);
        Ok(IdentityReport {
            phase: migration.phase,
            message: if verified {
                "Identity migrated".to_string()
            } else {
                "Identity operation submitted, verification pending".to_string()
            },
            already_complete: false,
            recovery_key: Some(export),
            verification,
        })
    }

    /// IdentityMigrated -> Finalized
    #[instrument(skip(self), err)]
    pub async fn finalize(&self, session_id: &str) -> MigrationResult<PhaseReport> {
        self.ensure_enabled()?;
        // A finished migration no longer has a source session
        if let Some(migration) = self.broker.load_migration(session_id).await? {
            if migration.phase == MigrationPhase::Finalized {
                return Ok(PhaseReport::already_complete(
                    migration.phase,
                    "Migration already finalized",
                ));
            }
        }

        let source = self.broker.source_client(session_id).await?;
        let mut migration = self.load_for(session_id, &source).await?;
        gate(&migration, MigrationPhase::IdentityMigrated)?;
        let target = self.broker.target_client(&migration).await?;

        if let Err(e) = self.activate(&source, &target).await {
            return Err(self.record_failure(session_id, &mut migration, e).await);
        }

        let report = self
            .verify_transition(session_id, &mut migration, &source, Some(&target))
            .await?;
        if report.ready {
            self.teardown(session_id, &mut migration).await?;
        }
        self.phase_outcome(&migration, report, "Migration finalized")
    }

    async fn activate(&self, source: &SourceClient, target: &TargetClient) -> MigrationResult<()> {
        let policy = self.config.retry.policy(self.config.retry.account_attempts);
        let phase = MigrationPhase::IdentityMigrated;

        retry_with_backoff(policy, "activateAccount", &self.on_retry, || {
            target.activate_account()
        })
        .await
        .map_err(|exhausted| {
            MigrationError::from_target(phase, "activateAccount", exhausted.attempts, exhausted.error)
        })?;

        retry_with_backoff(policy, "deactivateAccount", &self.on_retry, || {
            source.deactivate_account()
        })
        .await
        .map_err(|exhausted| {
            MigrationError::from_source(
                phase,
                "deactivateAccount",
                exhausted.attempts,
                exhausted.error,
            )
        })
    }

    /// Read-only comparison of both accounts for verification phase 1 to 4
    #[instrument(skip(self), err)]
    pub async fn status(&self, session_id: &str, phase: u8) -> MigrationResult<StatusReport> {
        let phase = VerificationPhase::from_number(phase)
            .ok_or_else(|| MigrationError::invalid_request("phase", "must be between 1 and 4"))?;
        let source = self.broker.source_client(session_id).await?;

        let target = match self.broker.load_migration(session_id).await? {
            Some(migration) if migration.account_created => {
                Some(self.broker.target_client(&migration).await?)
            }
            _ => None,
        };

        self.reconciler.check(phase, &source, target.as_ref()).await
    }

    /// Re-run the check a finished step is waiting on, advancing if it passes
    #[instrument(skip(self), err)]
    pub async fn verify(&self, session_id: &str) -> MigrationResult<PhaseReport> {
        let source = self.broker.source_client(session_id).await?;
        let mut migration = self.load_for(session_id, &source).await?;
        if migration.pending_verification.is_none() {
            return Err(MigrationError::invalid_state(
                "a phase awaiting verification",
                migration.phase,
            ));
        }

        let target = self.broker.target_client(&migration).await?;
        let report = self
            .verify_transition(session_id, &mut migration, &source, Some(&target))
            .await?;
        if report.ready && migration.phase == MigrationPhase::Finalized {
            self.teardown(session_id, &mut migration).await?;
        }
        self.phase_outcome(&migration, report, "Verification passed")
    }

    /// Advance past a step whose verification keeps failing
    #[instrument(skip(self), err)]
    pub async fn continue_anyway(&self, session_id: &str) -> MigrationResult<PhaseReport> {
        self.ensure_enabled()?;
        let mut migration = self
            .broker
            .load_migration(session_id)
            .await?
            .ok_or_else(|| MigrationError::invalid_state("a started migration", MigrationPhase::Pending))?;
        if migration.phase.is_terminal() {
            return Err(MigrationError::invalid_state(
                "a phase awaiting verification",
                migration.phase,
            ));
        }

        let pending = migration.pending_verification.clone().ok_or_else(|| {
            MigrationError::invalid_state("a phase awaiting verification", migration.phase)
        })?;

        let required = self.config.verification.force_advance_after;
        if pending.failures < required {
            return Err(MigrationError::invalid_request(
                "continue_anyway",
                format!(
                    "requires {} failed verification attempts, {} so far",
                    required, pending.failures
                ),
            ));
        }
        if pending.phase == VerificationPhase::IdentityUpdated
            && !self.config.verification.allow_identity_force_advance
        {
            return Err(MigrationError::invalid_request(
                "continue_anyway",
                "the identity phase must pass verification",
            ));
        }

        warn!(
            "Force-advancing {} past verification phase {} after {} failures",
            migration.source_did,
            pending.phase.number(),
            pending.failures
        );
        migration.advance();
        if migration.phase == MigrationPhase::Finalized {
            self.teardown(session_id, &mut migration).await?;
        } else {
            self.broker.save_migration(session_id, &migration).await?;
        }

        Ok(PhaseReport {
            phase: migration.phase,
            message: "Advanced without verification".to_string(),
            already_complete: false,
            completed: true,
            verification: None,
            details: None,
        })
    }

    /// Drop the migration record, returning to Pending
    pub async fn reset(&self, session_id: &str) -> MigrationResult<()> {
        info!("Resetting migration for session {}", session_id);
        self.broker.clear_migration(session_id).await
    }

    async fn load_for(
        &self,
        session_id: &str,
        source: &SourceClient,
    ) -> MigrationResult<MigrationSession> {
        let migration = self
            .broker
            .load_migration(session_id)
            .await?
            .ok_or_else(|| {
                MigrationError::invalid_state(
                    MigrationPhase::Created.to_string(),
                    MigrationPhase::Pending,
                )
            })?;

        if source.account_did() != Some(migration.source_did.as_str()) {
            return Err(MigrationError::Unauthorized {
                message: format!("logged in account is not {}", migration.source_did),
            });
        }
        Ok(migration)
    }

    async fn verify_transition(
        &self,
        session_id: &str,
        migration: &mut MigrationSession,
        source: &SourceClient,
        target: Option<&TargetClient>,
    ) -> MigrationResult<StatusReport> {
        let phase = migration
            .phase
            .exit_verification()
            .ok_or_else(|| MigrationError::invalid_state("a phase with a next step", migration.phase))?;

        let report = self.reconciler.check(phase, source, target).await?;
        if report.ready {
            info!(
                "{} verified, {} -> {:?}",
                migration.source_did,
                migration.phase,
                migration.phase.next()
            );
            migration.advance();
        } else {
            let failures = migration.record_verification_failure(&report);
            warn!(
                "Verification phase {} failed ({} attempt(s)): {:?}",
                phase.number(),
                failures,
                report.reason
            );
        }
        self.broker.save_migration(session_id, migration).await?;
        Ok(report)
    }

    /// Turn a verification report into the operation result
    fn phase_outcome<T>(
        &self,
        migration: &MigrationSession,
        report: StatusReport,
        message: &str,
    ) -> MigrationResult<PhaseReport<T>> {
        if !report.ready {
            return Err(MigrationError::VerificationFailed {
                phase: report.phase.guarded_phase(),
                reason: report
                    .reason
                    .clone()
                    .unwrap_or_else(|| "not ready".to_string()),
                report: Some(Box::new(report)),
            });
        }

        Ok(PhaseReport {
            phase: migration.phase,
            message: message.to_string(),
            already_complete: false,
            completed: true,
            verification: Some(report),
            details: None,
        })
    }

    async fn teardown(
        &self,
        session_id: &str,
        migration: &mut MigrationSession,
    ) -> MigrationResult<()> {
        migration.target_password.clear();
        migration.touch();
        self.broker.save_migration(session_id, migration).await?;
        self.broker.end_source_session(session_id).await?;
        self.broker.evict(&migration.source_did).await;
        info!("Migration of {} finalized, source session closed", migration.source_did);
        Ok(())
    }

    async fn record_failure(
        &self,
        session_id: &str,
        migration: &mut MigrationSession,
        error: MigrationError,
    ) -> MigrationError {
        migration.last_error = Some(error.to_string());
        migration.touch();
        if let Err(store_error) = self.broker.save_migration(session_id, migration).await {
            error!("Failed to record migration failure: {}", store_error);
        }
        error
    }
}

fn gate(migration: &MigrationSession, required: MigrationPhase) -> MigrationResult<Gate> {
    if migration.phase == required {
        Ok(Gate::Run)
    } else if migration.phase.is_past(required) {
        Ok(Gate::AlreadyDone)
    } else {
        Err(MigrationError::invalid_state(required.to_string(), migration.phase))
    }
}

fn require_field(field: &str, value: &str) -> MigrationResult<()> {
    if value.trim().is_empty() {
        Err(MigrationError::invalid_request(field, "must not be empty"))
    } else {
        Ok(())
    }
}

fn require_url(field: &str, value: &str) -> MigrationResult<()> {
    if value.starts_with("https://") || value.starts_with("http://") {
        Ok(())
    } else {
        Err(MigrationError::invalid_request(field, "must be an http(s) URL"))
    }
}

fn validate_account_input(input: &CreateAccountInput) -> MigrationResult<()> {
    require_field("target_service_url", &input.target_service_url)?;
    require_url("target_service_url", &input.target_service_url)?;
    require_field("handle", &input.handle)?;
    require_field("password", &input.password)?;
    if !input.email.contains('@') {
        return Err(MigrationError::invalid_request("email", "must be an email address"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::client::ClientError;
    use crate::services::config::RetryConfig;
    use crate::services::session::MemorySessionStore;
    use crate::testing::{
        account_input, fake_cid, FakeProvider, ALICE_DID, ALICE_HANDLE, PLC_TOKEN, SOURCE_PASSWORD,
        SOURCE_URL, TARGET_PASSWORD, TARGET_URL,
    };

    const SESSION: &str = "session-1";

    fn orchestrator_with(provider: &FakeProvider, config: MigrationConfig) -> MigrationOrchestrator {
        MigrationOrchestrator::new(
            config,
            Arc::new(provider.clone()),
            Arc::new(MemorySessionStore::new()),
        )
    }

    fn test_config() -> MigrationConfig {
        MigrationConfig {
            retry: RetryConfig::immediate(),
            ..Default::default()
        }
    }

    async fn logged_in(provider: &FakeProvider) -> MigrationOrchestrator {
        let orchestrator = orchestrator_with(provider, test_config());
        orchestrator
            .login(SESSION, SOURCE_URL, ALICE_HANDLE, SOURCE_PASSWORD)
            .await
            .unwrap();
        orchestrator
    }

    async fn phase_of(orchestrator: &MigrationOrchestrator) -> MigrationPhase {
        orchestrator.migration_state(SESSION).await.unwrap().phase
    }

    #[tokio::test]
    async fn test_full_migration_reaches_finalized() {
        let provider = FakeProvider::with_source_account();
        let orchestrator = logged_in(&provider).await;

        let created = orchestrator
            .create_account(SESSION, account_input(TARGET_PASSWORD))
            .await
            .unwrap();
        assert_eq!(created.phase, MigrationPhase::Created);
        assert!(!created.details.unwrap().resumed);

        let data = orchestrator.migrate_data(SESSION).await.unwrap();
        assert_eq!(data.phase, MigrationPhase::DataMigrated);
        let details = data.details.unwrap();
        assert_eq!(details.blobs.unwrap().migrated, 10);
        assert!(details.preferences_migrated);

        let token = orchestrator.request_identity_token(SESSION).await.unwrap();
        assert!(token.requested);

        let identity = orchestrator.sign_identity(SESSION, PLC_TOKEN).await.unwrap();
        assert_eq!(identity.phase, MigrationPhase::IdentityMigrated);
        let key = identity.recovery_key.unwrap();
        assert!(key.public_key.starts_with("did:key:z"));
        assert_eq!(provider.directory_entry(ALICE_DID).as_deref(), Some(TARGET_URL));

        let finalized = orchestrator.finalize(SESSION).await.unwrap();
        assert_eq!(finalized.phase, MigrationPhase::Finalized);
        assert!(provider.is_activated(TARGET_URL, ALICE_DID));
        assert!(!provider.is_activated(SOURCE_URL, ALICE_DID));

        let state = orchestrator.migration_state(SESSION).await.unwrap();
        assert!(!state.logged_in);
        assert_eq!(state.phase, MigrationPhase::Finalized);

        let again = orchestrator.finalize(SESSION).await.unwrap();
        assert!(again.already_complete);
    }

    #[tokio::test]
    async fn test_repeated_steps_are_no_ops() {
        let provider = FakeProvider::with_source_account();
        let orchestrator = logged_in(&provider).await;
        orchestrator
            .create_account(SESSION, account_input(TARGET_PASSWORD))
            .await
            .unwrap();

        let again = orchestrator
            .create_account(SESSION, account_input(TARGET_PASSWORD))
            .await
            .unwrap();
        assert!(again.already_complete);
        assert_eq!(provider.call_count(TARGET_URL, "createAccount"), 1);

        let repo = orchestrator.migrate_repository(SESSION).await.unwrap();
        assert_eq!(repo.phase, MigrationPhase::Created);
        assert!(repo.completed);
        let repo_again = orchestrator.migrate_repository(SESSION).await.unwrap();
        assert_eq!(repo_again.details.unwrap().skipped, vec![DataStep::Repository]);
        assert_eq!(provider.call_count(TARGET_URL, "importRepo"), 1);

        orchestrator.migrate_blobs(SESSION).await.unwrap();
        let done = orchestrator.migrate_preferences(SESSION).await.unwrap();
        assert_eq!(done.phase, MigrationPhase::DataMigrated);

        let after = orchestrator.migrate_data(SESSION).await.unwrap();
        assert!(after.already_complete);
        assert_eq!(provider.call_count(TARGET_URL, "importRepo"), 1);
    }

    #[tokio::test]
    async fn test_out_of_order_operation_is_invalid_state() {
        let provider = FakeProvider::with_source_account();
        let orchestrator = logged_in(&provider).await;

        assert!(matches!(
            orchestrator.migrate_data(SESSION).await,
            Err(MigrationError::InvalidState { .. })
        ));

        orchestrator
            .create_account(SESSION, account_input(TARGET_PASSWORD))
            .await
            .unwrap();
        assert!(matches!(
            orchestrator.sign_identity(SESSION, PLC_TOKEN).await,
            Err(MigrationError::InvalidState { .. })
        ));
        assert!(matches!(
            orchestrator.finalize(SESSION).await,
            Err(MigrationError::InvalidState { .. })
        ));
    }

    #[tokio::test]
    async fn test_failed_verification_then_continue_anyway() {
        let provider = FakeProvider::with_source_account();
        provider.fail_blob(&fake_cid(4));
        let orchestrator = logged_in(&provider).await;
        orchestrator
            .create_account(SESSION, account_input(TARGET_PASSWORD))
            .await
            .unwrap();

        let result = orchestrator.migrate_data(SESSION).await;
        match result {
            Err(MigrationError::VerificationFailed { reason, report, .. }) => {
                assert!(reason.contains("Not all blobs imported."));
                assert!(!report.unwrap().ready);
            }
            other => panic!("expected VerificationFailed, got {:?}", other.map(|r| r.phase)),
        }
        assert_eq!(phase_of(&orchestrator).await, MigrationPhase::Created);

        // One failure so far, two are required
        assert!(matches!(
            orchestrator.continue_anyway(SESSION).await,
            Err(MigrationError::InvalidRequest { .. })
        ));

        assert!(orchestrator.verify(SESSION).await.is_err());
        let forced = orchestrator.continue_anyway(SESSION).await.unwrap();
        assert_eq!(forced.phase, MigrationPhase::DataMigrated);
    }

    #[tokio::test]
    async fn test_blobs_that_failed_are_retried_on_the_next_run() {
        let provider = FakeProvider::with_source_account();
        let orchestrator = logged_in(&provider).await;
        orchestrator
            .create_account(SESSION, account_input(TARGET_PASSWORD))
            .await
            .unwrap();

        // Every download attempt of the first blob hits an outage
        provider.fail_next(
            SOURCE_URL,
            "getBlob",
            ClientError::from_status("getBlob", 503, "", None),
            5,
        );
        assert!(matches!(
            orchestrator.migrate_data(SESSION).await,
            Err(MigrationError::VerificationFailed { .. })
        ));
        assert_eq!(provider.blob_count(TARGET_URL, ALICE_DID), 9);

        let retried = orchestrator.migrate_blobs(SESSION).await.unwrap();
        let details = retried.details.unwrap();
        assert!(details.skipped.is_empty());
        assert_eq!(details.blobs.unwrap().migrated, 10);
        assert_eq!(provider.blob_count(TARGET_URL, ALICE_DID), 10);
        assert_eq!(retried.phase, MigrationPhase::DataMigrated);

        // Finished sub-steps were not repeated
        assert_eq!(provider.call_count(TARGET_URL, "importRepo"), 1);
        assert_eq!(provider.call_count(TARGET_URL, "putPreferences"), 1);
    }

    #[tokio::test]
    async fn test_recovery_key_survives_unverifiable_identity_step() {
        let provider = FakeProvider::with_source_account();
        let orchestrator = logged_in(&provider).await;
        orchestrator
            .create_account(SESSION, account_input(TARGET_PASSWORD))
            .await
            .unwrap();
        orchestrator.migrate_data(SESSION).await.unwrap();
        orchestrator.request_identity_token(SESSION).await.unwrap();

        // Target status is unavailable right after submission
        provider.fail_next(
            TARGET_URL,
            "checkAccountStatus",
            ClientError::from_status("checkAccountStatus", 503, "", None),
            1,
        );
        let identity = orchestrator.sign_identity(SESSION, PLC_TOKEN).await.unwrap();
        assert!(identity.recovery_key.is_some());
        assert!(identity.verification.is_none());
        assert_eq!(identity.phase, MigrationPhase::DataMigrated);

        let again = orchestrator.sign_identity(SESSION, PLC_TOKEN).await;
        assert!(matches!(again, Err(MigrationError::UpstreamRejected { .. })));

        // Identity verification is never skipped with the default settings
        let mut migration = orchestrator.broker.load_migration(SESSION).await.unwrap().unwrap();
        migration.pending_verification = Some(PendingVerification {
            phase: VerificationPhase::IdentityUpdated,
            failures: 5,
        });
        orchestrator.broker.save_migration(SESSION, &migration).await.unwrap();
        assert!(matches!(
            orchestrator.continue_anyway(SESSION).await,
            Err(MigrationError::InvalidRequest { .. })
        ));
    }

    #[tokio::test]
    async fn test_error_phase_cannot_be_forced_forward() {
        let provider = FakeProvider::with_source_account();
        let orchestrator = logged_in(&provider).await;
        orchestrator
            .create_account(SESSION, account_input(TARGET_PASSWORD))
            .await
            .unwrap();

        let mut migration = orchestrator.broker.load_migration(SESSION).await.unwrap().unwrap();
        migration.phase = MigrationPhase::Error;
        migration.pending_verification = Some(PendingVerification {
            phase: VerificationPhase::IdentityUpdated,
            failures: 5,
        });
        orchestrator.broker.save_migration(SESSION, &migration).await.unwrap();

        assert!(matches!(
            orchestrator.continue_anyway(SESSION).await,
            Err(MigrationError::InvalidState {
                actual: MigrationPhase::Error,
                ..
            })
        ));
        assert_eq!(phase_of(&orchestrator).await, MigrationPhase::Error);
    }

    #[tokio::test]
    async fn test_token_request_respects_cooldown() {
        let provider = FakeProvider::with_source_account();
        let orchestrator = logged_in(&provider).await;
        orchestrator
            .create_account(SESSION, account_input(TARGET_PASSWORD))
            .await
            .unwrap();
        orchestrator.migrate_data(SESSION).await.unwrap();

        assert!(orchestrator.request_identity_token(SESSION).await.unwrap().requested);
        let second = orchestrator.request_identity_token(SESSION).await.unwrap();
        assert!(second.rate_limited);
        assert_eq!(provider.emails_sent(SOURCE_URL, ALICE_DID), 1);
    }

    #[tokio::test]
    async fn test_kill_switch_blocks_mutations_but_not_state() {
        let provider = FakeProvider::with_source_account();
        let store: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new());
        let enabled =
            MigrationOrchestrator::new(test_config(), Arc::new(provider.clone()), store.clone());
        enabled
            .login(SESSION, SOURCE_URL, ALICE_HANDLE, SOURCE_PASSWORD)
            .await
            .unwrap();

        let disabled = MigrationOrchestrator::new(
            MigrationConfig {
                migration_enabled: false,
                ..test_config()
            },
            Arc::new(provider.clone()),
            store,
        );
        assert!(!disabled.is_enabled());
        assert!(matches!(
            disabled
                .create_account(SESSION, account_input(TARGET_PASSWORD))
                .await,
            Err(MigrationError::MigrationDisabled { .. })
        ));
        let state = disabled.migration_state(SESSION).await.unwrap();
        assert!(!state.enabled);
        assert!(state.logged_in);
        assert!(state.message.is_some());
        assert_eq!(provider.call_count(TARGET_URL, "createAccount"), 0);

        enabled
            .create_account(SESSION, account_input(TARGET_PASSWORD))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_status_and_input_validation() {
        let provider = FakeProvider::with_source_account();
        let orchestrator = logged_in(&provider).await;

        assert!(matches!(
            orchestrator.status(SESSION, 5).await,
            Err(MigrationError::InvalidRequest { .. })
        ));
        let before = orchestrator.status(SESSION, 1).await.unwrap();
        assert!(!before.ready);
        assert_eq!(before.reason.as_deref(), Some("Account not created"));

        let mut bad = account_input(TARGET_PASSWORD);
        bad.email = "not-an-email".to_string();
        assert!(matches!(
            orchestrator.create_account(SESSION, bad).await,
            Err(MigrationError::InvalidRequest { .. })
        ));
        assert!(matches!(
            orchestrator.sign_identity(SESSION, "  ").await,
            Err(MigrationError::InvalidRequest { .. })
        ));
    }

    #[tokio::test]
    async fn test_reset_and_account_switch_clear_migration() {
        let provider = FakeProvider::with_source_account();
        provider.seed_source_account("did:plc:bobtestaccount", "bob.source.test", "bob-pw");
        let orchestrator = logged_in(&provider).await;
        orchestrator
            .create_account(SESSION, account_input(TARGET_PASSWORD))
            .await
            .unwrap();

        orchestrator.reset(SESSION).await.unwrap();
        assert_eq!(phase_of(&orchestrator).await, MigrationPhase::Pending);

        // Target account already exists, so the retry resumes it
        let resumed = orchestrator
            .create_account(SESSION, account_input(TARGET_PASSWORD))
            .await
            .unwrap();
        assert!(resumed.details.unwrap().resumed);

        orchestrator
            .login(SESSION, SOURCE_URL, "bob.source.test", "bob-pw")
            .await
            .unwrap();
        let state = orchestrator.migration_state(SESSION).await.unwrap();
        assert!(state.migration.is_none());
        assert!(state.logged_in);
    }

    #[tokio::test]
    async fn test_bad_login_is_unauthorized() {
        let provider = FakeProvider::with_source_account();
        let orchestrator = orchestrator_with(&provider, test_config());

        assert!(matches!(
            orchestrator
                .login(SESSION, SOURCE_URL, ALICE_HANDLE, "wrong")
                .await,
            Err(MigrationError::Unauthorized { .. })
        ));
        assert!(matches!(
            orchestrator.login(SESSION, "source.test", ALICE_HANDLE, "x").await,
            Err(MigrationError::InvalidRequest { .. })
        ));
        assert!(!orchestrator.migration_state(SESSION).await.unwrap().logged_in);
    }
}
