//! In-memory providers for tests
//!
//! [`FakeProvider`] plays any number of data servers at once, keyed by URL.
//! It implements [`ClientFactory`], so the broker, the steps and the
//! orchestrator run against it unchanged. Every XRPC call is counted and can
//! be made to fail with an injected error.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{json, Value};

use crate::migration::retry::log_retry;
use crate::migration::steps::{AccountProvisioner, DataTransferEngine, IdentityCeremony};
use crate::migration::types::{CreateAccountInput, MigrationSession};
use crate::services::client::types::current_time_secs;
use crate::services::client::{
    AccountClient, AccountStatusSnapshot, BlobData, BlobPage, ClientError, ClientFactory,
    ClientResult, ClientSessionCredentials, CreateAccountRequest, DescribeServerResponse,
    IdentityCredentials, SignedOperation, SourceClient, TargetClient,
};
use crate::services::config::{BlobConfig, IdentityConfig, RetryConfig};

pub const SOURCE_URL: &str = "https://source.test";
pub const TARGET_URL: &str = "https://target.test";
pub const ALICE_DID: &str = "did:plc:alice7xq3mzk2v4t";
pub const ALICE_HANDLE: &str = "alice.source.test";
pub const SOURCE_PASSWORD: &str = "hunter2";
pub const TARGET_PASSWORD: &str = "target-pw";
pub const PLC_TOKEN: &str = "plc-token";
pub const INVITE_CODE: &str = "target-test-invite";

const SESSION_TTL_SECS: u64 = 3600;
const SOURCE_RECORDS: i64 = 42;
const SOURCE_BLOBS: u64 = 10;

/// CIDv1 (raw, sha2-256) whose digest ends in `n`
pub fn fake_cid(n: u64) -> String {
    let mut bytes = vec![0x01, 0x55, 0x12, 0x20];
    bytes.extend([0u8; 24]);
    bytes.extend(n.to_be_bytes());
    ::cid::Cid::try_from(&bytes[..])
        .expect("well-formed CID bytes")
        .to_string()
}

pub fn account_input(password: &str) -> CreateAccountInput {
    CreateAccountInput {
        target_service_url: TARGET_URL.to_string(),
        handle: "alice.target.test".to_string(),
        email: "alice@example.com".to_string(),
        password: password.to_string(),
        invite_code: None,
    }
}

/// Fresh migration record for alice, not yet provisioned
pub fn sample_migration(password: &str) -> MigrationSession {
    MigrationSession::new(ALICE_DID, ALICE_HANDLE, SOURCE_URL, &account_input(password))
}

#[derive(Debug, Clone, Copy)]
struct FakeRepo {
    records: i64,
    blobs: i64,
    private: i64,
}

impl FakeRepo {
    fn encode(&self) -> Bytes {
        Bytes::from(format!(
            "records={};blobs={};private={}",
            self.records, self.blobs, self.private
        ))
    }

    fn decode(car: &[u8]) -> Option<Self> {
        let text = std::str::from_utf8(car).ok()?;
        let mut fields = HashMap::new();
        for pair in text.split(';') {
            let (key, value) = pair.split_once('=')?;
            fields.insert(key, value.parse::<i64>().ok()?);
        }
        Some(Self {
            records: *fields.get("records")?,
            blobs: *fields.get("blobs")?,
            private: *fields.get("private")?,
        })
    }
}

struct FakeAccount {
    handle: String,
    password: String,
    activated: bool,
    repo: Option<FakeRepo>,
    blobs: Vec<(String, Vec<u8>)>,
    preferences: Value,
    identity_token: Option<String>,
    emails_sent: usize,
}

impl FakeAccount {
    fn new(handle: &str, password: &str) -> Self {
        Self {
            handle: handle.to_string(),
            password: password.to_string(),
            activated: false,
            repo: None,
            blobs: Vec::new(),
            preferences: Value::Null,
            identity_token: None,
            emails_sent: 0,
        }
    }
}

struct FakeServer {
    did: String,
    invite_required: bool,
    accounts: HashMap<String, FakeAccount>,
    access_tokens: HashMap<String, String>,
    refresh_tokens: HashMap<String, String>,
}

impl FakeServer {
    fn new(url: &str) -> Self {
        let host = url
            .trim_start_matches("https://")
            .trim_start_matches("http://");
        Self {
            did: format!("did:web:{}", host),
            invite_required: false,
            accounts: HashMap::new(),
            access_tokens: HashMap::new(),
            refresh_tokens: HashMap::new(),
        }
    }

    fn find_did(&self, identifier: &str) -> Option<String> {
        if self.accounts.contains_key(identifier) {
            return Some(identifier.to_string());
        }
        self.accounts
            .iter()
            .find(|(_, account)| account.handle == identifier)
            .map(|(did, _)| did.clone())
    }
}

#[derive(Default)]
struct FakeState {
    servers: HashMap<String, FakeServer>,
    calls: HashMap<(String, String), usize>,
    injected: HashMap<(String, String), VecDeque<ClientError>>,
    failing_blobs: HashSet<String>,
    content_ids: HashMap<Vec<u8>, String>,
    directory: HashMap<String, String>,
    submitted: HashMap<String, SignedOperation>,
    page_size_cap: Option<u32>,
    next_id: u64,
}

impl FakeState {
    fn server(&mut self, url: &str) -> &mut FakeServer {
        let url = normalize(url);
        self.servers
            .entry(url.clone())
            .or_insert_with(|| FakeServer::new(&url))
    }

    fn account(&mut self, url: &str, did: &str) -> ClientResult<&mut FakeAccount> {
        self.server(url)
            .accounts
            .get_mut(did)
            .ok_or_else(|| rejected("getAccount", "AccountNotFound", did))
    }

    /// Count the call and pop an injected failure, if any
    fn count(&mut self, url: &str, operation: &str) {
        *self
            .calls
            .entry((normalize(url), operation.to_string()))
            .or_default() += 1;
    }

    fn begin(&mut self, url: &str, operation: &str) -> ClientResult<()> {
        self.count(url, operation);
        let key = (normalize(url), operation.to_string());
        match self.injected.get_mut(&key).and_then(|queue| queue.pop_front()) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn authenticate(
        &mut self,
        url: &str,
        operation: &str,
        session: Option<&ClientSessionCredentials>,
    ) -> ClientResult<String> {
        let session = session.ok_or_else(|| ClientError::AuthenticationFailed {
            message: "no session".to_string(),
        })?;
        self.server(url)
            .access_tokens
            .get(&session.access_jwt)
            .cloned()
            .ok_or_else(|| {
                ClientError::from_status(operation, 401, r#"{"error":"ExpiredToken"}"#, None)
            })
    }

    fn issue_session(&mut self, url: &str, did: &str) -> ClientResult<ClientSessionCredentials> {
        self.next_id += 1;
        let access = format!("access-{}", self.next_id);
        let refresh = format!("refresh-{}", self.next_id);
        let server = self.server(url);
        let handle = server
            .accounts
            .get(did)
            .map(|account| account.handle.clone())
            .ok_or_else(|| rejected("createSession", "AccountNotFound", did))?;
        server.access_tokens.insert(access.clone(), did.to_string());
        server.refresh_tokens.insert(refresh.clone(), did.to_string());

        Ok(ClientSessionCredentials {
            did: did.to_string(),
            handle,
            pds: normalize(url),
            access_jwt: access,
            refresh_jwt: refresh,
            expires_at: Some(current_time_secs() + SESSION_TTL_SECS),
        })
    }

    fn status(&mut self, url: &str, did: &str) -> ClientResult<AccountStatusSnapshot> {
        let valid_did = self.directory.get(did).map(String::as_str) == Some(normalize(url).as_str());
        let account = self.account(url, did)?;
        let repo = account.repo;
        Ok(AccountStatusSnapshot {
            activated: account.activated,
            valid_did,
            repo_commit: repo.map(|_| "bafyreifakecommit".to_string()),
            repo_rev: repo.map(|_| "3kfakerev".to_string()),
            repo_blocks: repo.map(|r| r.records * 2 + 1).unwrap_or(0),
            expected_records: 0,
            indexed_records: repo.map(|r| r.records).unwrap_or(0),
            expected_blobs: repo.map(|r| r.blobs).unwrap_or(0),
            imported_blobs: account.blobs.len() as i64,
            private_state_values: repo.map(|r| r.private).unwrap_or(0),
        })
    }
}

fn normalize(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}

fn rejected(operation: &str, code: &str, message: &str) -> ClientError {
    ClientError::Rejected {
        operation: operation.to_string(),
        status: 400,
        error_code: Some(code.to_string()),
        message: message.to_string(),
    }
}

/// Shared in-memory world of data servers and the identity directory
#[derive(Clone, Default)]
pub struct FakeProvider {
    state: Arc<Mutex<FakeState>>,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Alice on the source server: active, 42 records, 10 blobs and some preferences
    pub fn with_source_account() -> Self {
        let provider = Self::new();
        provider.seed_source_account(ALICE_DID, ALICE_HANDLE, SOURCE_PASSWORD);
        {
            let mut state = provider.lock();
            for n in 0..SOURCE_BLOBS {
                let content = format!("blob content {}", n).into_bytes();
                let cid = fake_cid(n);
                state.content_ids.insert(content.clone(), cid.clone());
                if let Ok(account) = state.account(SOURCE_URL, ALICE_DID) {
                    account.blobs.push((cid, content));
                }
            }
            if let Ok(account) = state.account(SOURCE_URL, ALICE_DID) {
                account.repo = Some(FakeRepo {
                    records: SOURCE_RECORDS,
                    blobs: SOURCE_BLOBS as i64,
                    private: 0,
                });
                account.preferences = json!({
                    "preferences": [
                        {"$type": "app.bsky.actor.defs#adultContentPref", "enabled": false},
                        {"$type": "app.bsky.actor.defs#savedFeedsPrefV2", "items": []}
                    ]
                });
            }
        }
        provider
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Active account on the source server whose identity points there
    pub fn seed_source_account(&self, did: &str, handle: &str, password: &str) {
        let mut state = self.lock();
        let mut account = FakeAccount::new(handle, password);
        account.activated = true;
        account.repo = Some(FakeRepo {
            records: 0,
            blobs: 0,
            private: 0,
        });
        state
            .server(SOURCE_URL)
            .accounts
            .insert(did.to_string(), account);
        state
            .directory
            .insert(did.to_string(), SOURCE_URL.to_string());
    }

    /// Deactivated, empty account on the target server
    pub fn seed_target_account(&self, did: &str, handle: &str, password: &str) {
        self.lock()
            .server(TARGET_URL)
            .accounts
            .insert(did.to_string(), FakeAccount::new(handle, password));
    }

    pub async fn source_client(&self) -> SourceClient {
        let credentials = self
            .login(SOURCE_URL, ALICE_HANDLE, SOURCE_PASSWORD)
            .await
            .expect("source login");
        SourceClient::new(self.connect(SOURCE_URL, Some(credentials)))
    }

    pub async fn target_client_for(&self, did: &str, password: &str) -> TargetClient {
        let credentials = self
            .login(TARGET_URL, did, password)
            .await
            .expect("target login");
        TargetClient::new(self.connect(TARGET_URL, Some(credentials)))
    }

    /// Logged-in clients for alice on both servers
    pub async fn connected_pair(&self) -> (SourceClient, TargetClient) {
        if !self.has_account(TARGET_URL, ALICE_DID) {
            self.seed_target_account(ALICE_DID, "alice.target.test", TARGET_PASSWORD);
        }
        (
            self.source_client().await,
            self.target_client_for(ALICE_DID, TARGET_PASSWORD).await,
        )
    }

    pub fn anonymous(&self, url: &str) -> Arc<dyn AccountClient> {
        self.connect(url, None)
    }

    pub fn transfer_engine(&self) -> DataTransferEngine {
        DataTransferEngine::new(RetryConfig::immediate(), BlobConfig::default(), log_retry())
    }

    pub fn provisioner(&self) -> AccountProvisioner {
        AccountProvisioner::new(
            RetryConfig::immediate(),
            IdentityConfig::default(),
            log_retry(),
        )
    }

    pub fn ceremony(&self) -> IdentityCeremony {
        IdentityCeremony::new(
            RetryConfig::immediate(),
            IdentityConfig::default(),
            log_retry(),
        )
    }

    /// Fail the next `times` calls of `operation` on `url` with `error`
    pub fn fail_next(&self, url: &str, operation: &str, error: ClientError, times: usize) {
        let mut state = self.lock();
        let queue = state
            .injected
            .entry((normalize(url), operation.to_string()))
            .or_default();
        queue.extend(std::iter::repeat(error).take(times));
    }

    /// Every download of `cid` fails
    pub fn fail_blob(&self, cid: &str) {
        self.lock().failing_blobs.insert(cid.to_string());
    }

    /// Invalidate all access and refresh tokens issued by `url`
    pub fn revoke_sessions(&self, url: &str) {
        let mut state = self.lock();
        let server = state.server(url);
        server.access_tokens.clear();
        server.refresh_tokens.clear();
    }

    pub fn require_invite(&self, url: &str) {
        self.lock().server(url).invite_required = true;
    }

    pub fn add_source_blob(&self, did: &str, cid: impl Into<String>, content: Vec<u8>) {
        let cid = cid.into();
        let mut state = self.lock();
        state.content_ids.insert(content.clone(), cid.clone());
        if let Ok(account) = state.account(SOURCE_URL, did) {
            account.blobs.push((cid, content));
        }
    }

    /// List an id that is not a valid CID
    pub fn add_raw_source_blob_id(&self, did: &str, id: &str) {
        if let Ok(account) = self.lock().account(SOURCE_URL, did) {
            account.blobs.push((id.to_string(), Vec::new()));
        }
    }

    /// Servers return at most `cap` blob ids per page
    pub fn set_page_size_cap(&self, cap: u32) {
        self.lock().page_size_cap = Some(cap);
    }

    pub fn call_count(&self, url: &str, operation: &str) -> usize {
        self.lock()
            .calls
            .get(&(normalize(url), operation.to_string()))
            .copied()
            .unwrap_or(0)
    }

    pub fn blob_count(&self, url: &str, did: &str) -> usize {
        self.lock()
            .account(url, did)
            .map(|account| account.blobs.len())
            .unwrap_or(0)
    }

    pub fn preferences(&self, url: &str, did: &str) -> Value {
        self.lock()
            .account(url, did)
            .map(|account| account.preferences.clone())
            .unwrap_or(Value::Null)
    }

    pub fn has_account(&self, url: &str, did: &str) -> bool {
        self.lock().server(url).accounts.contains_key(did)
    }

    pub fn is_activated(&self, url: &str, did: &str) -> bool {
        self.lock()
            .account(url, did)
            .map(|account| account.activated)
            .unwrap_or(false)
    }

    pub fn emails_sent(&self, url: &str, did: &str) -> usize {
        self.lock()
            .account(url, did)
            .map(|account| account.emails_sent)
            .unwrap_or(0)
    }

    pub fn submitted_operation(&self, did: &str) -> Option<SignedOperation> {
        self.lock().submitted.get(did).cloned()
    }

    /// Service URL the identity directory currently points `did` at
    pub fn directory_entry(&self, did: &str) -> Option<String> {
        self.lock().directory.get(did).cloned()
    }
}

#[async_trait]
impl ClientFactory for FakeProvider {
    fn connect(
        &self,
        service_url: &str,
        session: Option<ClientSessionCredentials>,
    ) -> Arc<dyn AccountClient> {
        Arc::new(FakeClient {
            provider: self.clone(),
            url: normalize(service_url),
            session,
        })
    }

    async fn login(
        &self,
        service_url: &str,
        identifier: &str,
        password: &str,
    ) -> ClientResult<ClientSessionCredentials> {
        let mut state = self.lock();
        state.begin(service_url, "createSession")?;
        let did = state
            .server(service_url)
            .find_did(identifier)
            .filter(|did| {
                state
                    .servers
                    .get(&normalize(service_url))
                    .and_then(|server| server.accounts.get(did))
                    .is_some_and(|account| account.password == password)
            })
            .ok_or_else(|| {
                ClientError::from_status(
                    "createSession",
                    401,
                    r#"{"error":"AuthenticationRequired","message":"Invalid identifier or password"}"#,
                    None,
                )
            })?;
        state.issue_session(service_url, &did)
    }

    async fn refresh(
        &self,
        session: &ClientSessionCredentials,
    ) -> ClientResult<ClientSessionCredentials> {
        let mut state = self.lock();
        state.begin(&session.pds, "refreshSession")?;
        let server = state.server(&session.pds);
        let did = server
            .refresh_tokens
            .remove(&session.refresh_jwt)
            .ok_or(ClientError::SessionExpired)?;
        server.access_tokens.remove(&session.access_jwt);
        state.issue_session(&session.pds, &did)
    }
}

/// One client bound to one server and optionally one session
pub struct FakeClient {
    provider: FakeProvider,
    url: String,
    session: Option<ClientSessionCredentials>,
}

impl FakeClient {
    /// Run an authenticated call as the session's account
    fn authed<T>(
        &self,
        operation: &str,
        f: impl FnOnce(&mut FakeState, &str) -> ClientResult<T>,
    ) -> ClientResult<T> {
        let mut state = self.provider.lock();
        state.begin(&self.url, operation)?;
        let did = state.authenticate(&self.url, operation, self.session.as_ref())?;
        f(&mut state, &did)
    }
}

#[async_trait]
impl AccountClient for FakeClient {
    fn service_url(&self) -> &str {
        &self.url
    }

    fn session(&self) -> Option<&ClientSessionCredentials> {
        self.session.as_ref()
    }

    async fn describe_server(&self) -> ClientResult<DescribeServerResponse> {
        let mut state = self.provider.lock();
        state.begin(&self.url, "describeServer")?;
        let server = state.server(&self.url);
        Ok(DescribeServerResponse {
            did: server.did.clone(),
            available_user_domains: vec![".target.test".to_string()],
            invite_code_required: Some(server.invite_required),
        })
    }

    async fn create_account(
        &self,
        request: &CreateAccountRequest,
    ) -> ClientResult<ClientSessionCredentials> {
        let mut state = self.provider.lock();
        state.begin(&self.url, "createAccount")?;
        let server = state.server(&self.url);

        let expected_auth = format!("svc:{}:{}", request.did, server.did);
        if request.service_auth_token.as_deref() != Some(expected_auth.as_str()) {
            return Err(ClientError::from_status(
                "createAccount",
                401,
                r#"{"error":"AuthenticationRequired","message":"bad service auth"}"#,
                None,
            ));
        }
        if server.invite_required && request.invite_code.as_deref() != Some(INVITE_CODE) {
            return Err(rejected("createAccount", "InvalidInviteCode", "invite code required"));
        }
        if server.accounts.contains_key(&request.did) {
            return Err(rejected("createAccount", "AlreadyExists", "account exists"));
        }

        server.accounts.insert(
            request.did.clone(),
            FakeAccount::new(&request.handle, &request.password),
        );
        state.issue_session(&self.url, &request.did)
    }

    async fn get_service_auth(
        &self,
        audience: &str,
        _method: &str,
        _expires_at: Option<u64>,
    ) -> ClientResult<String> {
        self.authed("getServiceAuth", |_, did| Ok(format!("svc:{}:{}", did, audience)))
    }

    async fn export_repo(&self, did: &str) -> ClientResult<Bytes> {
        let mut state = self.provider.lock();
        state.begin(&self.url, "getRepo")?;
        let account = state.account(&self.url, did)?;
        let repo = account
            .repo
            .ok_or_else(|| rejected("getRepo", "RepoNotFound", did))?;
        Ok(FakeRepo {
            blobs: account.blobs.len() as i64,
            ..repo
        }
        .encode())
    }

    async fn import_repo(&self, car: Bytes) -> ClientResult<()> {
        let url = self.url.clone();
        self.authed("importRepo", |state, did| {
            let repo = FakeRepo::decode(&car)
                .ok_or_else(|| rejected("importRepo", "InvalidRequest", "malformed CAR"))?;
            state.account(&url, did)?.repo = Some(repo);
            Ok(())
        })
    }

    async fn list_blobs(
        &self,
        did: &str,
        cursor: Option<&str>,
        limit: u32,
    ) -> ClientResult<BlobPage> {
        let mut state = self.provider.lock();
        state.begin(&self.url, "listBlobs")?;
        let limit = state.page_size_cap.map_or(limit, |cap| cap.min(limit)) as usize;
        let account = state.account(&self.url, did)?;

        let start = cursor.and_then(|c| c.parse::<usize>().ok()).unwrap_or(0);
        let end = (start + limit).min(account.blobs.len());
        let cids = account
            .blobs
            .get(start..end)
            .unwrap_or_default()
            .iter()
            .map(|(cid, _)| cid.clone())
            .collect();

        Ok(BlobPage {
            cids,
            cursor: (end < account.blobs.len()).then(|| end.to_string()),
        })
    }

    async fn get_blob(&self, did: &str, cid: &str, max_bytes: u64) -> ClientResult<BlobData> {
        let mut state = self.provider.lock();
        state.begin(&self.url, "getBlob")?;
        if state.failing_blobs.contains(cid) {
            return Err(rejected("getBlob", "BlobNotFound", cid));
        }
        let account = state.account(&self.url, did)?;
        let content = account
            .blobs
            .iter()
            .find(|(id, _)| id == cid)
            .map(|(_, content)| content.clone())
            .ok_or_else(|| rejected("getBlob", "BlobNotFound", cid))?;

        // Refused on the advertised length, so the body is never served
        let size = content.len() as u64;
        if size > max_bytes {
            return Err(ClientError::TooLarge {
                operation: "getBlob".to_string(),
                size,
                limit: max_bytes,
            });
        }
        state.count(&self.url, "getBlobBody");
        Ok(BlobData {
            bytes: Bytes::from(content),
            content_type: Some("image/jpeg".to_string()),
        })
    }

    async fn upload_blob(&self, data: Bytes, _content_type: &str) -> ClientResult<()> {
        let url = self.url.clone();
        self.authed("uploadBlob", |state, did| {
            let cid = match state.content_ids.get(&data[..]) {
                Some(cid) => cid.clone(),
                None => {
                    state.next_id += 1;
                    let cid = fake_cid(1_000_000 + state.next_id);
                    state.content_ids.insert(data.to_vec(), cid.clone());
                    cid
                }
            };
            let account = state.account(&url, did)?;
            if !account.blobs.iter().any(|(id, _)| *id == cid) {
                account.blobs.push((cid, data.to_vec()));
            }
            Ok(())
        })
    }

    async fn get_preferences(&self) -> ClientResult<Value> {
        let url = self.url.clone();
        self.authed("getPreferences", |state, did| {
            Ok(state.account(&url, did)?.preferences.clone())
        })
    }

    async fn put_preferences(&self, preferences: Value) -> ClientResult<()> {
        let url = self.url.clone();
        self.authed("putPreferences", |state, did| {
            state.account(&url, did)?.preferences = preferences;
            Ok(())
        })
    }

    async fn request_identity_signature(&self) -> ClientResult<()> {
        let url = self.url.clone();
        self.authed("requestPlcOperationSignature", |state, did| {
            let account = state.account(&url, did)?;
            account.identity_token = Some(PLC_TOKEN.to_string());
            account.emails_sent += 1;
            Ok(())
        })
    }

    async fn get_recommended_identity_credentials(&self) -> ClientResult<IdentityCredentials> {
        let url = self.url.clone();
        self.authed("getRecommendedDidCredentials", |state, did| {
            let handle = state.account(&url, did)?.handle.clone();
            Ok(IdentityCredentials {
                also_known_as: vec![format!("at://{}", handle)],
                rotation_keys: vec!["did:key:zTargetServerRotationKey".to_string()],
                verification_methods: json!({"atproto": "did:key:zTargetSigningKey"}),
                services: json!({
                    "atproto_pds": {"type": "AtprotoPersonalDataServer", "endpoint": url}
                }),
            })
        })
    }

    async fn sign_identity_operation(
        &self,
        token: &str,
        credentials: &IdentityCredentials,
    ) -> ClientResult<SignedOperation> {
        let url = self.url.clone();
        self.authed("signPlcOperation", |state, did| {
            let account = state.account(&url, did)?;
            if account.identity_token.as_deref() != Some(token) {
                return Err(rejected("signPlcOperation", "InvalidToken", "Token is invalid"));
            }
            account.identity_token = None;
            Ok(SignedOperation(json!({
                "type": "plc_operation",
                "rotationKeys": credentials.rotation_keys,
                "alsoKnownAs": credentials.also_known_as,
                "verificationMethods": credentials.verification_methods,
                "services": credentials.services,
                "prev": null,
                "sig": "fake-signature"
            })))
        })
    }

    async fn submit_identity_operation(&self, operation: &SignedOperation) -> ClientResult<()> {
        let url = self.url.clone();
        self.authed("submitPlcOperation", |state, did| {
            state.submitted.insert(did.to_string(), operation.clone());
            state.directory.insert(did.to_string(), url);
            Ok(())
        })
    }

    async fn check_account_status(&self) -> ClientResult<AccountStatusSnapshot> {
        let url = self.url.clone();
        self.authed("checkAccountStatus", |state, did| state.status(&url, did))
    }

    async fn activate_account(&self) -> ClientResult<()> {
        let url = self.url.clone();
        self.authed("activateAccount", |state, did| {
            state.account(&url, did)?.activated = true;
            Ok(())
        })
    }

    async fn deactivate_account(&self) -> ClientResult<()> {
        let url = self.url.clone();
        self.authed("deactivateAccount", |state, did| {
            state.account(&url, did)?.activated = false;
            Ok(())
        })
    }
}
