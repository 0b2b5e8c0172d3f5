use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, RequestBuilder, Response};
use tracing::{error, instrument};

use super::errors::{ClientError, ClientResult};
use super::types::*;
use super::{AccountClient, ClientFactory};
use crate::services::config::HttpConfig;

/// Client for ATProto PDS operations, optionally bound to an account session
#[derive(Clone)]
pub struct PdsClient {
    pub(crate) http_client: Client,
    pub(crate) service_url: String,
    pub(crate) session: Option<ClientSessionCredentials>,
}

impl PdsClient {
    /// Create an unauthenticated client for `service_url`
    pub fn new(config: &HttpConfig, service_url: &str) -> ClientResult<Self> {
        Ok(Self::from_http(build_http_client(config)?, service_url, None))
    }

    pub fn from_http(
        http_client: Client,
        service_url: &str,
        session: Option<ClientSessionCredentials>,
    ) -> Self {
        Self {
            http_client,
            service_url: service_url.trim_end_matches('/').to_string(),
            session,
        }
    }

    pub(crate) fn xrpc_url(&self, nsid: &str) -> String {
        format!("{}/xrpc/{}", self.service_url, nsid)
    }

    pub(crate) fn session_or_err(&self) -> ClientResult<&ClientSessionCredentials> {
        self.session
            .as_ref()
            .ok_or_else(|| ClientError::AuthenticationFailed {
                message: format!("No session bound to client for {}", self.service_url),
            })
    }

    pub(crate) fn bearer(&self) -> ClientResult<String> {
        Ok(format!("Bearer {}", self.session_or_err()?.access_jwt))
    }

    /// Send `request` and turn any non-success status into a classified error
    pub(crate) async fn send_checked(
        &self,
        operation: &str,
        request: RequestBuilder,
    ) -> ClientResult<Response> {
        let response = request.send().await.map_err(|e| ClientError::Network {
            message: format!("Failed to call {}: {}", operation, e),
        })?;

        if response.status().is_success() {
            Ok(response)
        } else {
            let err = ClientError::from_response(operation, response).await;
            error!("{} failed: {}", operation, err);
            Err(err)
        }
    }
}

pub(crate) fn build_http_client(config: &HttpConfig) -> ClientResult<Client> {
    Client::builder()
        .user_agent(config.user_agent.clone())
        .timeout(Duration::from_secs(config.timeout_secs))
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .build()
        .map_err(|e| ClientError::Network {
            message: format!("Failed to create HTTP client: {}", e),
        })
}

#[async_trait]
impl AccountClient for PdsClient {
    fn service_url(&self) -> &str {
        &self.service_url
    }

    fn session(&self) -> Option<&ClientSessionCredentials> {
        self.session.as_ref()
    }

    #[instrument(skip(self), fields(pds = %self.service_url), err)]
    async fn describe_server(&self) -> ClientResult<DescribeServerResponse> {
        let url = self.xrpc_url("com.atproto.server.describeServer");
        let response = self
            .send_checked("describeServer", self.http_client.get(&url))
            .await?;
        Ok(response.json().await?)
    }

    async fn create_account(
        &self,
        request: &CreateAccountRequest,
    ) -> ClientResult<ClientSessionCredentials> {
        crate::services::client::auth::create_account_impl(self, request).await
    }

    async fn get_service_auth(
        &self,
        audience: &str,
        method: &str,
        expires_at: Option<u64>,
    ) -> ClientResult<String> {
        crate::services::client::auth::get_service_auth_impl(self, audience, method, expires_at)
            .await
    }

    async fn export_repo(&self, did: &str) -> ClientResult<Bytes> {
        crate::services::client::api::export_repository_impl(self, did).await
    }

    async fn import_repo(&self, car: Bytes) -> ClientResult<()> {
        crate::services::client::api::import_repository_impl(self, car).await
    }

    async fn list_blobs(
        &self,
        did: &str,
        cursor: Option<&str>,
        limit: u32,
    ) -> ClientResult<BlobPage> {
        crate::services::client::api::list_blobs_impl(self, did, cursor, limit).await
    }

    async fn get_blob(&self, did: &str, cid: &str, max_bytes: u64) -> ClientResult<BlobData> {
        crate::services::client::api::get_blob_impl(self, did, cid, max_bytes).await
    }

    async fn upload_blob(&self, data: Bytes, content_type: &str) -> ClientResult<()> {
        crate::services::client::api::upload_blob_impl(self, data, content_type).await
    }

    async fn get_preferences(&self) -> ClientResult<serde_json::Value> {
        crate::services::client::api::export_preferences_impl(self).await
    }

    async fn put_preferences(&self, preferences: serde_json::Value) -> ClientResult<()> {
        crate::services::client::api::import_preferences_impl(self, preferences).await
    }

    async fn request_identity_signature(&self) -> ClientResult<()> {
        crate::services::client::api::request_plc_token_impl(self).await
    }

    async fn get_recommended_identity_credentials(&self) -> ClientResult<IdentityCredentials> {
        crate::services::client::api::get_plc_recommendation_impl(self).await
    }

    async fn sign_identity_operation(
        &self,
        token: &str,
        credentials: &IdentityCredentials,
    ) -> ClientResult<SignedOperation> {
        crate::services::client::api::sign_plc_operation_impl(self, token, credentials).await
    }

    async fn submit_identity_operation(&self, operation: &SignedOperation) -> ClientResult<()> {
        crate::services::client::api::submit_plc_operation_impl(self, operation).await
    }

    async fn check_account_status(&self) -> ClientResult<AccountStatusSnapshot> {
        crate::services::client::auth::check_account_status_impl(self).await
    }

    async fn activate_account(&self) -> ClientResult<()> {
        crate::services::client::api::activate_account_impl(self).await
    }

    async fn deactivate_account(&self) -> ClientResult<()> {
        crate::services::client::api::deactivate_account_impl(self).await
    }
}

/// Builds [`PdsClient`]s that share one connection pool
#[derive(Clone)]
pub struct PdsClientFactory {
    http_client: Client,
}

impl PdsClientFactory {
    pub fn new(config: &HttpConfig) -> ClientResult<Self> {
        Ok(Self {
            http_client: build_http_client(config)?,
        })
    }
}

#[async_trait]
impl ClientFactory for PdsClientFactory {
    fn connect(
        &self,
        service_url: &str,
        session: Option<ClientSessionCredentials>,
    ) -> std::sync::Arc<dyn AccountClient> {
        std::sync::Arc::new(PdsClient::from_http(
            self.http_client.clone(),
            service_url,
            session,
        ))
    }

    async fn login(
        &self,
        service_url: &str,
        identifier: &str,
        password: &str,
    ) -> ClientResult<ClientSessionCredentials> {
        let client = PdsClient::from_http(self.http_client.clone(), service_url, None);
        crate::services::client::auth::login_impl(&client, identifier, password).await
    }

    async fn refresh(
        &self,
        session: &ClientSessionCredentials,
    ) -> ClientResult<ClientSessionCredentials> {
        let client = PdsClient::from_http(self.http_client.clone(), &session.pds, None);
        crate::services::client::auth::refresh_session_impl(&client, session).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xrpc_url_trims_trailing_slash() {
        let client = PdsClient::new(&HttpConfig::default(), "https://pds.example.com/").unwrap();
        assert_eq!(
            client.xrpc_url("com.atproto.server.describeServer"),
            "https://pds.example.com/xrpc/com.atproto.server.describeServer"
        );
    }

    #[test]
    fn test_bearer_requires_session() {
        let client = PdsClient::new(&HttpConfig::default(), "https://pds.example.com").unwrap();
        assert!(matches!(
            client.bearer(),
            Err(ClientError::AuthenticationFailed { .. })
        ));

        let session = ClientSessionCredentials {
            did: "did:plc:test123".to_string(),
            handle: "test.example.com".to_string(),
            pds: "https://other.example.com".to_string(),
            access_jwt: "access".to_string(),
            refresh_jwt: "refresh".to_string(),
            expires_at: None,
        };
        let bound = PdsClient::from_http(Client::new(), "https://other.example.com/", Some(session));
        assert_eq!(bound.bearer().unwrap(), "Bearer access");
        assert_eq!(bound.service_url(), "https://other.example.com");
    }
}
