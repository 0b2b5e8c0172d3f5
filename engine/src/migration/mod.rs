//! Migration engine
//!
//! - **types**: phases and the persisted per-user migration record
//! - **orchestrator**: the phase state machine driven by user actions
//! - **steps**: account provisioning, data transfer and the identity ceremony
//! - **status**: readiness checks between the two accounts
//! - **retry**: bounded exponential backoff shared by every step
//! - **keys**: rotation key generation and export

pub mod keys;
pub mod orchestrator;
pub mod retry;
pub mod status;
pub mod steps;
pub mod types;

pub use orchestrator::{DataTransferDetails, IdentityReport, MigrationOrchestrator, SourceLogin};
pub use status::{reconcile, StatusReconciler, StatusReport, VerificationPhase};
pub use types::*;
