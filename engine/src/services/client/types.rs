use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Get current time in seconds since UNIX epoch
pub fn current_time_secs() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

/// Authenticated session on a PDS
#[derive(Serialize, Deserialize, Clone, PartialEq)]
pub struct ClientSessionCredentials {
    pub did: String,
    pub handle: String,
    pub pds: String,
    #[serde(rename = "accessJwt")]
    pub access_jwt: String,
    #[serde(rename = "refreshJwt")]
    pub refresh_jwt: String,
    pub expires_at: Option<u64>,
}

impl ClientSessionCredentials {
    /// True when the access token expires within `leeway_secs`
    pub fn needs_refresh(&self, leeway_secs: u64) -> bool {
        match self.expires_at {
            Some(expires_at) => current_time_secs() >= expires_at.saturating_sub(leeway_secs),
            None => false,
        }
    }
}

impl fmt::Debug for ClientSessionCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientSessionCredentials")
            .field("did", &self.did)
            .field("handle", &self.handle)
            .field("pds", &self.pds)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

/// com.atproto.server.describeServer output
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct DescribeServerResponse {
    pub did: String,
    #[serde(rename = "availableUserDomains", default)]
    pub available_user_domains: Vec<String>,
    #[serde(rename = "inviteCodeRequired", default)]
    pub invite_code_required: Option<bool>,
}

impl DescribeServerResponse {
    pub fn invite_required(&self) -> bool {
        self.invite_code_required.unwrap_or(false)
    }
}

/// Account creation request for an existing DID
#[derive(Serialize, Clone)]
pub struct CreateAccountRequest {
    pub did: String,
    pub handle: String,
    pub email: String,
    pub password: String,
    #[serde(rename = "inviteCode", skip_serializing_if = "Option::is_none")]
    pub invite_code: Option<String>,
    /// Sent as the Authorization header, not in the body
    #[serde(skip)]
    pub service_auth_token: Option<String>,
}

impl fmt::Debug for CreateAccountRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CreateAccountRequest")
            .field("did", &self.did)
            .field("handle", &self.handle)
            .field("email", &self.email)
            .field("invite_code", &self.invite_code.is_some())
            .finish_non_exhaustive()
    }
}

/// One page of com.atproto.sync.listBlobs
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct BlobPage {
    pub cids: Vec<String>,
    #[serde(default)]
    pub cursor: Option<String>,
}

impl BlobPage {
    /// Cursor for the following page. A missing or empty cursor ends pagination.
    pub fn next_cursor(&self) -> Option<&str> {
        match self.cursor.as_deref() {
            Some(cursor) if !cursor.is_empty() => Some(cursor),
            _ => None,
        }
    }
}

/// Downloaded blob content
#[derive(Debug, Clone)]
pub struct BlobData {
    pub bytes: Bytes,
    pub content_type: Option<String>,
}

/// Recommended DID credentials reported by the target PDS
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IdentityCredentials {
    #[serde(default)]
    pub also_known_as: Vec<String>,
    #[serde(default)]
    pub rotation_keys: Vec<String>,
    #[serde(default)]
    pub verification_methods: serde_json::Value,
    #[serde(default)]
    pub services: serde_json::Value,
}

impl IdentityCredentials {
    /// Put `key` first in the rotation key list. The first entry has the highest authority.
    pub fn prepend_rotation_key(&mut self, key: &str) {
        self.rotation_keys.retain(|existing| existing != key);
        self.rotation_keys.insert(0, key.to_string());
    }
}

/// A PLC operation signed by the source PDS, ready for submission
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(transparent)]
pub struct SignedOperation(pub serde_json::Value);

/// com.atproto.server.checkAccountStatus output
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AccountStatusSnapshot {
    #[serde(default)]
    pub activated: bool,
    #[serde(default)]
    pub valid_did: bool,
    #[serde(default)]
    pub repo_commit: Option<String>,
    #[serde(default)]
    pub repo_rev: Option<String>,
    #[serde(default)]
    pub repo_blocks: i64,
    #[serde(default)]
    pub expected_records: i64,
    #[serde(default)]
    pub indexed_records: i64,
    #[serde(default)]
    pub expected_blobs: i64,
    #[serde(default)]
    pub imported_blobs: i64,
    #[serde(default)]
    pub private_state_values: i64,
}

impl AccountStatusSnapshot {
    pub fn repo_commit_present(&self) -> bool {
        self.repo_commit.as_deref().is_some_and(|commit| !commit.is_empty())
    }
}
