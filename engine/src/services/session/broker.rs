//! Per-request resolution of the source and target clients
//!
//! The source session lives in the store under `source:{id}` and is refreshed
//! when its access token is about to expire. Target tokens are never stored:
//! a target client is rebuilt by logging in with the migration password
//! whenever the in-memory cache misses.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use lru::LruCache;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use super::store::{load_json, save_json, SessionStore};
use crate::migration::types::{MigrationPhase, MigrationSession};
use crate::services::client::{
    AccountClient, ClientFactory, ClientSessionCredentials, SourceClient,
    TargetClient,
};
use crate::services::config::SessionConfig;
use crate::services::errors::{MigrationError, MigrationResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionKind {
    Source,
    Target,
}

struct CachedClient {
    client: Arc<dyn AccountClient>,
    cached_at: Instant,
}

pub struct SessionBroker {
    factory: Arc<dyn ClientFactory>,
    store: Arc<dyn SessionStore>,
    config: SessionConfig,
    cache: Mutex<LruCache<(String, SessionKind), CachedClient>>,
}

fn source_key(session_id: &str) -> String {
    format!("source:{}", session_id)
}

fn migration_key(session_id: &str) -> String {
    format!("migration:{}", session_id)
}

impl SessionBroker {
    pub fn new(
        factory: Arc<dyn ClientFactory>,
        store: Arc<dyn SessionStore>,
        config: SessionConfig,
    ) -> Self {
        let capacity = NonZeroUsize::new(config.client_cache_capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            factory,
            store,
            config,
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn factory(&self) -> &Arc<dyn ClientFactory> {
        &self.factory
    }

    /// Log into the source provider and bind the session to `session_id`
    #[instrument(skip(self, password), err)]
    pub async fn login_source(
        &self,
        session_id: &str,
        service_url: &str,
        identifier: &str,
        password: &str,
    ) -> MigrationResult<ClientSessionCredentials> {
        let credentials = self
            .factory
            .login(service_url, identifier, password)
            .await
            .map_err(|e| match e {
                e if e.is_auth() => MigrationError::Unauthorized {
                    message: e.to_string(),
                },
                e => MigrationError::from_source(MigrationPhase::Pending, "createSession", 1, e),
            })?;

        save_json(self.store.as_ref(), &source_key(session_id), &credentials).await?;
        self.evict(&credentials.did).await;
        info!("Source session established for {}", credentials.did);
        Ok(credentials)
    }

    /// Stored source credentials, without refreshing
    pub async fn source_session(
        &self,
        session_id: &str,
    ) -> MigrationResult<Option<ClientSessionCredentials>> {
        Ok(load_json(self.store.as_ref(), &source_key(session_id)).await?)
    }

    /// Client for the source account, refreshing the stored session if needed
    #[instrument(skip(self), err)]
    pub async fn source_client(&self, session_id: &str) -> MigrationResult<SourceClient> {
        let credentials = self
            .source_session(session_id)
            .await?
            .ok_or_else(|| MigrationError::Unauthorized {
                message: "no source session".to_string(),
            })?;

        let needs_refresh = credentials.needs_refresh(self.config.refresh_leeway_secs);
        if !needs_refresh {
            if let Some(client) = self.cached(&credentials.did, SessionKind::Source).await {
                return Ok(SourceClient::new(client));
            }
        }

        let credentials = if needs_refresh {
            self.refresh_source(session_id, &credentials).await?
        } else {
            credentials
        };

        let did = credentials.did.clone();
        let pds = credentials.pds.clone();
        let client = self.factory.connect(&pds, Some(credentials));
        self.remember(&did, SessionKind::Source, client.clone()).await;
        Ok(SourceClient::new(client))
    }

    async fn refresh_source(
        &self,
        session_id: &str,
        credentials: &ClientSessionCredentials,
    ) -> MigrationResult<ClientSessionCredentials> {
        debug!("Refreshing source session for {}", credentials.did);
        match self.factory.refresh(credentials).await {
            Ok(refreshed) => {
                save_json(self.store.as_ref(), &source_key(session_id), &refreshed).await?;
                self.evict_kind(&credentials.did, SessionKind::Source).await;
                Ok(refreshed)
            }
            Err(e) if e.is_transient() => Err(MigrationError::from_source(
                MigrationPhase::Pending,
                "refreshSession",
                1,
                e,
            )),
            Err(e) => {
                warn!("Source session for {} could not be refreshed: {}", credentials.did, e);
                self.store.delete(&source_key(session_id)).await?;
                self.evict_kind(&credentials.did, SessionKind::Source).await;
                Err(MigrationError::Unauthorized {
                    message: "source session expired, please log in again".to_string(),
                })
            }
        }
    }

    /// Client for the target account created by `migration`
    #[instrument(skip(self, migration), fields(did = %migration.source_did), err)]
    pub async fn target_client(&self, migration: &MigrationSession) -> MigrationResult<TargetClient> {
        if !migration.account_created {
            return Err(MigrationError::TargetSessionMissing);
        }

        if let Some(client) = self.cached(&migration.source_did, SessionKind::Target).await {
            let fresh = client
                .session()
                .map(|s| !s.needs_refresh(self.config.refresh_leeway_secs))
                .unwrap_or(false);
            if fresh {
                return Ok(TargetClient::new(client));
            }
        }

        if migration.target_password.is_empty() {
            return Err(MigrationError::TargetSessionMissing);
        }

        let credentials = self
            .factory
            .login(
                &migration.target_service_url,
                &migration.source_did,
                &migration.target_password,
            )
            .await
            .map_err(|e| MigrationError::from_target(migration.phase, "createSession", 1, e))?;

        Ok(self.adopt_target(credentials).await)
    }

    /// Cache a freshly created target session
    pub async fn adopt_target(&self, credentials: ClientSessionCredentials) -> TargetClient {
        let did = credentials.did.clone();
        let pds = credentials.pds.clone();
        let client = self.factory.connect(&pds, Some(credentials));
        self.remember(&did, SessionKind::Target, client.clone()).await;
        TargetClient::new(client)
    }

    /// Unauthenticated client for a provider
    pub fn anonymous(&self, service_url: &str) -> Arc<dyn AccountClient> {
        self.factory.connect(service_url, None)
    }

    pub async fn load_migration(&self, session_id: &str) -> MigrationResult<Option<MigrationSession>> {
        Ok(load_json(self.store.as_ref(), &migration_key(session_id)).await?)
    }

    pub async fn save_migration(
        &self,
        session_id: &str,
        migration: &MigrationSession,
    ) -> MigrationResult<()> {
        save_json(self.store.as_ref(), &migration_key(session_id), migration).await?;
        Ok(())
    }

    pub async fn clear_migration(&self, session_id: &str) -> MigrationResult<()> {
        if let Some(migration) = self.load_migration(session_id).await? {
            self.evict_kind(&migration.source_did, SessionKind::Target).await;
        }
        self.store.delete(&migration_key(session_id)).await?;
        Ok(())
    }

    /// Drop the source session only, keeping the migration record
    pub async fn end_source_session(&self, session_id: &str) -> MigrationResult<()> {
        if let Some(credentials) = self.source_session(session_id).await? {
            self.evict(&credentials.did).await;
        }
        self.store.delete(&source_key(session_id)).await?;
        Ok(())
    }

    /// Remove every key belonging to `session_id`
    pub async fn logout(&self, session_id: &str) -> MigrationResult<()> {
        self.clear_migration(session_id).await?;
        self.end_source_session(session_id).await?;
        info!("Session {} logged out", session_id);
        Ok(())
    }

    /// Forget cached clients for `did`
    pub async fn evict(&self, did: &str) {
        let mut cache = self.cache.lock().await;
        cache.pop(&(did.to_string(), SessionKind::Source));
        cache.pop(&(did.to_string(), SessionKind::Target));
    }

    async fn evict_kind(&self, did: &str, kind: SessionKind) {
        self.cache.lock().await.pop(&(did.to_string(), kind));
    }

    async fn cached(&self, did: &str, kind: SessionKind) -> Option<Arc<dyn AccountClient>> {
        let ttl = Duration::from_secs(self.config.client_cache_ttl_secs);
        let mut cache = self.cache.lock().await;
        let key = (did.to_string(), kind);

        let expired = match cache.get(&key) {
            Some(entry) if entry.cached_at.elapsed() < ttl => return Some(entry.client.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            cache.pop(&key);
        }
        None
    }

    async fn remember(&self, did: &str, kind: SessionKind, client: Arc<dyn AccountClient>) {
        self.cache.lock().await.put(
            (did.to_string(), kind),
            CachedClient {
                client,
                cached_at: Instant::now(),
            },
        );
    }
}
