//! Status reconciliation between the source and target accounts
//!
//! [`reconcile`] is a pure function over two snapshots so the readiness rules
//! can be exercised with canned data. [`StatusReconciler`] only adds the
//! network fetch in front of it.

use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use super::types::MigrationPhase;
use crate::services::client::{AccountStatusSnapshot, ClientResult, SourceClient, TargetClient};
use crate::services::errors::{MigrationError, MigrationResult};

/// Numbered verification checkpoints, one per phase transition
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VerificationPhase {
    AccountCreated,
    DataImported,
    IdentityUpdated,
    Activated,
}

impl VerificationPhase {
    pub fn from_number(number: u8) -> Option<Self> {
        match number {
            1 => Some(VerificationPhase::AccountCreated),
            2 => Some(VerificationPhase::DataImported),
            3 => Some(VerificationPhase::IdentityUpdated),
            4 => Some(VerificationPhase::Activated),
            _ => None,
        }
    }

    pub fn number(self) -> u8 {
        match self {
            VerificationPhase::AccountCreated => 1,
            VerificationPhase::DataImported => 2,
            VerificationPhase::IdentityUpdated => 3,
            VerificationPhase::Activated => 4,
        }
    }

    /// Migration phase this checkpoint guards the exit of
    pub fn guarded_phase(self) -> MigrationPhase {
        match self {
            VerificationPhase::AccountCreated => MigrationPhase::Pending,
            VerificationPhase::DataImported => MigrationPhase::Created,
            VerificationPhase::IdentityUpdated => MigrationPhase::DataMigrated,
            VerificationPhase::Activated => MigrationPhase::IdentityMigrated,
        }
    }
}

/// Readiness verdict plus the raw snapshots it was computed from
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StatusReport {
    pub phase: VerificationPhase,
    pub ready: bool,
    pub reason: Option<String>,
    pub source: Option<AccountStatusSnapshot>,
    pub target: Option<AccountStatusSnapshot>,
}

pub fn reconcile(
    phase: VerificationPhase,
    source: Option<&AccountStatusSnapshot>,
    target: Option<&AccountStatusSnapshot>,
) -> StatusReport {
    let reasons = match target {
        None => vec!["Account not created"],
        Some(target) => match phase {
            VerificationPhase::AccountCreated => vec![],
            VerificationPhase::DataImported => data_reasons(source, target),
            VerificationPhase::IdentityUpdated => {
                if target.valid_did {
                    vec![]
                } else {
                    vec!["DID not valid"]
                }
            }
            VerificationPhase::Activated => {
                let source_active = source.map(|s| s.activated).unwrap_or(true);
                if target.activated && !source_active {
                    vec![]
                } else {
                    vec!["Account not activated"]
                }
            }
        },
    };

    StatusReport {
        phase,
        ready: reasons.is_empty(),
        reason: if reasons.is_empty() {
            None
        } else {
            Some(reasons.join(", "))
        },
        source: source.cloned(),
        target: target.cloned(),
    }
}

fn data_reasons(
    source: Option<&AccountStatusSnapshot>,
    target: &AccountStatusSnapshot,
) -> Vec<&'static str> {
    let Some(source) = source else {
        return vec!["Source status unavailable."];
    };

    let mut reasons = Vec::new();
    if !target.repo_commit_present() {
        reasons.push("Repository not imported.");
    }
    if target.indexed_records != source.indexed_records {
        reasons.push("Not all records imported.");
    }
    if target.private_state_values != source.private_state_values {
        reasons.push("Not all private state values imported.");
    }
    if target.expected_blobs != target.imported_blobs {
        reasons.push("Expected blobs not fully imported.");
    }
    if target.imported_blobs != source.imported_blobs {
        reasons.push("Not all blobs imported.");
    }
    reasons
}

/// Fetches fresh snapshots and reconciles them. Never mutates either account.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatusReconciler;

impl StatusReconciler {
    #[instrument(skip(self, source, target), err)]
    pub async fn check(
        &self,
        phase: VerificationPhase,
        source: &SourceClient,
        target: Option<&TargetClient>,
    ) -> MigrationResult<StatusReport> {
        let guarded = phase.guarded_phase();

        let source_snapshot = source
            .check_account_status()
            .await
            .map_err(|e| MigrationError::from_source(guarded, "checkAccountStatus", 1, e))?;

        let target_snapshot = match target {
            Some(target) => fetch_target(phase, target)
                .await
                .map_err(|e| MigrationError::from_target(guarded, "checkAccountStatus", 1, e))?,
            None => None,
        };

        let report = reconcile(phase, Some(&source_snapshot), target_snapshot.as_ref());
        info!(
            "Verification phase {}: ready={} reason={:?}",
            phase.number(),
            report.ready,
            report.reason
        );
        Ok(report)
    }
}

async fn fetch_target(
    phase: VerificationPhase,
    target: &TargetClient,
) -> ClientResult<Option<AccountStatusSnapshot>> {
    match target.check_account_status().await {
        Ok(snapshot) => Ok(Some(snapshot)),
        // A missing or unreachable account simply means "not created" for the first checkpoint
        Err(e) if phase == VerificationPhase::AccountCreated && !e.is_transient() => Ok(None),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> AccountStatusSnapshot {
        AccountStatusSnapshot {
            activated: true,
            valid_did: true,
            repo_commit: Some("bafyreicommit".to_string()),
            repo_rev: Some("3kabc".to_string()),
            repo_blocks: 120,
            expected_records: 0,
            indexed_records: 42,
            expected_blobs: 10,
            imported_blobs: 10,
            private_state_values: 0,
        }
    }

    #[test]
    fn test_phase_one_needs_target() {
        let source = snapshot();
        let report = reconcile(VerificationPhase::AccountCreated, Some(&source), None);
        assert!(!report.ready);
        assert_eq!(report.reason.as_deref(), Some("Account not created"));

        let target = AccountStatusSnapshot::default();
        let report = reconcile(VerificationPhase::AccountCreated, Some(&source), Some(&target));
        assert!(report.ready);
        assert_eq!(report.reason, None);
    }

    #[test]
    fn test_phase_two_ready_when_counts_match() {
        let source = snapshot();
        let target = snapshot();
        let report = reconcile(VerificationPhase::DataImported, Some(&source), Some(&target));
        assert!(report.ready);
        assert_eq!(report.reason, None);
        assert_eq!(report.target.unwrap().indexed_records, 42);
    }

    #[test]
    fn test_phase_two_missing_blobs() {
        let source = snapshot();
        let target = AccountStatusSnapshot {
            imported_blobs: 8,
            ..snapshot()
        };
        let report = reconcile(VerificationPhase::DataImported, Some(&source), Some(&target));
        assert!(!report.ready);
        assert_eq!(
            report.reason.as_deref(),
            Some("Expected blobs not fully imported., Not all blobs imported.")
        );
    }

    #[test]
    fn test_phase_two_lists_every_unmet_clause() {
        let source = AccountStatusSnapshot {
            private_state_values: 3,
            ..snapshot()
        };
        let target = AccountStatusSnapshot {
            repo_commit: None,
            indexed_records: 40,
            ..snapshot()
        };
        let report = reconcile(VerificationPhase::DataImported, Some(&source), Some(&target));
        assert_eq!(
            report.reason.as_deref(),
            Some("Repository not imported., Not all records imported., Not all private state values imported.")
        );
    }

    #[test]
    fn test_phase_three_checks_did() {
        let target = AccountStatusSnapshot {
            valid_did: false,
            ..snapshot()
        };
        let report = reconcile(VerificationPhase::IdentityUpdated, Some(&snapshot()), Some(&target));
        assert_eq!(report.reason.as_deref(), Some("DID not valid"));
        assert!(reconcile(VerificationPhase::IdentityUpdated, None, Some(&snapshot())).ready);
    }

    #[test]
    fn test_phase_four_activation() {
        let target = snapshot();
        let deactivated_source = AccountStatusSnapshot {
            activated: false,
            ..snapshot()
        };
        let report = reconcile(VerificationPhase::Activated, Some(&deactivated_source), Some(&target));
        assert!(report.ready);

        let report = reconcile(VerificationPhase::Activated, Some(&snapshot()), Some(&target));
        assert!(!report.ready);
        assert_eq!(report.reason.as_deref(), Some("Account not activated"));
    }

    #[test]
    fn test_reconcile_is_pure() {
        let source = snapshot();
        let target = AccountStatusSnapshot {
            imported_blobs: 8,
            ..snapshot()
        };
        let first = reconcile(VerificationPhase::DataImported, Some(&source), Some(&target));
        let second = reconcile(VerificationPhase::DataImported, Some(&source), Some(&target));
        assert_eq!(first, second);
        assert_eq!(source, snapshot());
    }

    #[test]
    fn test_phase_numbers() {
        for n in 1..=4 {
            assert_eq!(VerificationPhase::from_number(n).unwrap().number(), n);
        }
        assert_eq!(VerificationPhase::from_number(0), None);
        assert_eq!(VerificationPhase::from_number(5), None);
    }
}
