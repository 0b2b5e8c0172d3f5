//! Remote account client
//!
//! The migration engine talks to both providers through the [`AccountClient`]
//! capability trait. [`PdsClient`] is the XRPC implementation; tests swap in
//! the in-memory provider from `crate::testing`.
//!
//! Every request handles two accounts at once, so the two sides get distinct
//! handle types ([`SourceClient`], [`TargetClient`]) that cannot be mixed up.

pub mod api;
pub mod auth;
pub mod cid;
pub mod errors;
pub mod pds_client;
pub mod session;
pub mod types;

use std::ops::Deref;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

pub use cid::{BlobId, BlobIdError};
pub use errors::{ClientError, ClientResult};
pub use pds_client::{PdsClient, PdsClientFactory};
pub use session::JwtUtils;
pub use types::{
    AccountStatusSnapshot, BlobData, BlobPage, ClientSessionCredentials, CreateAccountRequest,
    DescribeServerResponse, IdentityCredentials, SignedOperation,
};

/// Capabilities a provider exposes to the migration engine
#[async_trait]
pub trait AccountClient: Send + Sync {
    /// Base URL of the provider
    fn service_url(&self) -> &str;

    /// Session the client is bound to, if any
    fn session(&self) -> Option<&ClientSessionCredentials>;

    fn account_did(&self) -> Option<&str> {
        self.session().map(|session| session.did.as_str())
    }

    async fn describe_server(&self) -> ClientResult<DescribeServerResponse>;

    async fn create_account(
        &self,
        request: &CreateAccountRequest,
    ) -> ClientResult<ClientSessionCredentials>;

    /// Mint a service-scoped token for `audience`, valid for one `method`
    async fn get_service_auth(
        &self,
        audience: &str,
        method: &str,
        expires_at: Option<u64>,
    ) -> ClientResult<String>;

    async fn export_repo(&self, did: &str) -> ClientResult<Bytes>;

    async fn import_repo(&self, car: Bytes) -> ClientResult<()>;

    async fn list_blobs(
        &self,
        did: &str,
        cursor: Option<&str>,
        limit: u32,
    ) -> ClientResult<BlobPage>;

    /// Download a blob, refusing bodies over `max_bytes`
    async fn get_blob(&self, did: &str, cid: &str, max_bytes: u64) -> ClientResult<BlobData>;

    async fn upload_blob(&self, data: Bytes, content_type: &str) -> ClientResult<()>;

    async fn get_preferences(&self) -> ClientResult<serde_json::Value>;

    async fn put_preferences(&self, preferences: serde_json::Value) -> ClientResult<()>;

    /// Ask the provider to email a one-time identity operation token
    async fn request_identity_signature(&self) -> ClientResult<()>;

    async fn get_recommended_identity_credentials(&self) -> ClientResult<IdentityCredentials>;

    async fn sign_identity_operation(
        &self,
        token: &str,
        credentials: &IdentityCredentials,
    ) -> ClientResult<SignedOperation>;

    async fn submit_identity_operation(&self, operation: &SignedOperation) -> ClientResult<()>;

    async fn check_account_status(&self) -> ClientResult<AccountStatusSnapshot>;

    async fn activate_account(&self) -> ClientResult<()>;

    async fn deactivate_account(&self) -> ClientResult<()>;
}

/// Creates clients and sessions for arbitrary providers
#[async_trait]
pub trait ClientFactory: Send + Sync {
    fn connect(
        &self,
        service_url: &str,
        session: Option<ClientSessionCredentials>,
    ) -> Arc<dyn AccountClient>;

    async fn login(
        &self,
        service_url: &str,
        identifier: &str,
        password: &str,
    ) -> ClientResult<ClientSessionCredentials>;

    async fn refresh(
        &self,
        session: &ClientSessionCredentials,
    ) -> ClientResult<ClientSessionCredentials>;
}

/// Client bound to the account being migrated away from
#[derive(Clone)]
pub struct SourceClient(Arc<dyn AccountClient>);

/// Client bound to the account being migrated to
#[derive(Clone)]
pub struct TargetClient(Arc<dyn AccountClient>);

impl SourceClient {
    pub fn new(client: Arc<dyn AccountClient>) -> Self {
        Self(client)
    }
}

impl TargetClient {
    pub fn new(client: Arc<dyn AccountClient>) -> Self {
        Self(client)
    }
}

impl Deref for SourceClient {
    type Target = dyn AccountClient;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

impl Deref for TargetClient {
    type Target = dyn AccountClient;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}
