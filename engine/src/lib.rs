//! Account migration engine for AT Protocol personal data servers
//!
//! Moves an account (repository, blobs, preferences and identity) from a
//! source provider to a target provider in four verified phases.

pub mod migration;
pub mod services;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use migration::MigrationOrchestrator;
pub use services::config::MigrationConfig;
pub use services::errors::{MigrationError, MigrationResult};
