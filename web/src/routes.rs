//! HTTP surface over the migration orchestrator
//!
//! Every call after login carries the session id in the
//! `x-migration-session` header. Success bodies are the operation result
//! flattened next to `success: true`.

use std::sync::Arc;

use axum::extract::{FromRequestParts, Query, State};
use axum::http::request::Parts;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{async_trait, Json, Router};
use engine::migration::CreateAccountInput;
use engine::{MigrationError, MigrationOrchestrator};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::error::ApiError;

pub const SESSION_HEADER: &str = "x-migration-session";

type AppState = Arc<MigrationOrchestrator>;
type ApiResult<T> = Result<Json<Success<T>>, ApiError>;

#[derive(Serialize)]
pub struct Success<T> {
    success: bool,
    #[serde(flatten)]
    body: T,
}

fn ok<T: Serialize>(body: T) -> ApiResult<T> {
    Ok(Json(Success {
        success: true,
        body,
    }))
}

/// Session id from the request header
pub struct SessionId(pub String);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for SessionId {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(SESSION_HEADER)
            .and_then(|value| value.to_str().ok())
            .filter(|value| !value.trim().is_empty())
            .map(|value| SessionId(value.trim().to_string()))
            .ok_or_else(|| {
                ApiError(MigrationError::Unauthorized {
                    message: format!("missing {} header", SESSION_HEADER),
                })
            })
    }
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub service_url: String,
    pub identifier: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct LoginResponse {
    pub session_id: String,
    pub did: String,
    pub handle: String,
    pub service_url: String,
}

#[derive(Deserialize)]
pub struct TokenQuery {
    #[serde(default)]
    pub token: String,
}

#[derive(Deserialize)]
pub struct PhaseQuery {
    pub phase: u8,
}

#[derive(Serialize)]
struct Message {
    message: &'static str,
}

pub fn router(orchestrator: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/login", post(login))
        .route("/api/logout", post(logout))
        .route("/api/session", get(session))
        .route("/api/migration-state", get(migration_state))
        .route("/api/create-account", post(create_account))
        .route("/api/migrate-repo", post(migrate_repo))
        .route("/api/migrate-blobs", post(migrate_blobs))
        .route("/api/migrate-preferences", post(migrate_preferences))
        .route("/api/migrate-data", post(migrate_data))
        .route("/api/request-identity-token", post(request_identity_token))
        .route("/api/sign-identity", post(sign_identity))
        .route("/api/finalize", post(finalize))
        .route("/api/status", get(status))
        .route("/api/verify", post(verify))
        .route("/api/continue-anyway", post(continue_anyway))
        .route("/api/reset", post(reset))
        .with_state(orchestrator)
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn login(
    State(orchestrator): State<AppState>,
    existing: Option<SessionId>,
    Json(request): Json<LoginRequest>,
) -> ApiResult<LoginResponse> {
    let session_id = existing
        .map(|SessionId(id)| id)
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let login = orchestrator
        .login(
            &session_id,
            &request.service_url,
            &request.identifier,
            &request.password,
        )
        .await?;
    info!("Session {} logged in as {}", session_id, login.did);

    ok(LoginResponse {
        session_id,
        did: login.did,
        handle: login.handle,
        service_url: login.service_url,
    })
}

async fn logout(
    State(orchestrator): State<AppState>,
    SessionId(session_id): SessionId,
) -> ApiResult<Message> {
    orchestrator.logout(&session_id).await?;
    ok(Message {
        message: "Logged out",
    })
}

async fn session(
    State(orchestrator): State<AppState>,
    SessionId(session_id): SessionId,
) -> Result<impl IntoResponse, ApiError> {
    let migration = orchestrator.session_summary(&session_id).await?;
    Ok(Json(json!({ "success": true, "migration": migration })))
}

async fn migration_state(
    State(orchestrator): State<AppState>,
    session: Option<SessionId>,
) -> ApiResult<engine::migration::MigrationState> {
    match session {
        Some(SessionId(session_id)) => ok(orchestrator.migration_state(&session_id).await?),
        None => ok(orchestrator.service_state()),
    }
}

async fn create_account(
    State(orchestrator): State<AppState>,
    SessionId(session_id): SessionId,
    Json(input): Json<CreateAccountInput>,
) -> Result<impl IntoResponse, ApiError> {
    ok(orchestrator.create_account(&session_id, input).await?)
}

async fn migrate_repo(
    State(orchestrator): State<AppState>,
    SessionId(session_id): SessionId,
) -> Result<impl IntoResponse, ApiError> {
    ok(orchestrator.migrate_repository(&session_id).await?)
}

async fn migrate_blobs(
    State(orchestrator): State<AppState>,
    SessionId(session_id): SessionId,
) -> Result<impl IntoResponse, ApiError> {
    ok(orchestrator.migrate_blobs(&session_id).await?)
}

async fn migrate_preferences(
    State(orchestrator): State<AppState>,
    SessionId(session_id): SessionId,
) -> Result<impl IntoResponse, ApiError> {
    ok(orchestrator.migrate_preferences(&session_id).await?)
}

async fn migrate_data(
    State(orchestrator): State<AppState>,
    SessionId(session_id): SessionId,
) -> Result<impl IntoResponse, ApiError> {
    ok(orchestrator.migrate_data(&session_id).await?)
}

async fn request_identity_token(
    State(orchestrator): State<AppState>,
    SessionId(session_id): SessionId,
) -> Result<impl IntoResponse, ApiError> {
    ok(orchestrator.request_identity_token(&session_id).await?)
}

async fn sign_identity(
    State(orchestrator): State<AppState>,
    SessionId(session_id): SessionId,
    Query(query): Query<TokenQuery>,
) -> Result<impl IntoResponse, ApiError> {
    ok(orchestrator.sign_identity(&session_id, &query.token).await?)
}

async fn finalize(
    State(orchestrator): State<AppState>,
    SessionId(session_id): SessionId,
) -> Result<impl IntoResponse, ApiError> {
    ok(orchestrator.finalize(&session_id).await?)
}

async fn status(
    State(orchestrator): State<AppState>,
    SessionId(session_id): SessionId,
    Query(query): Query<PhaseQuery>,
) -> Result<impl IntoResponse, ApiError> {
    ok(orchestrator.status(&session_id, query.phase).await?)
}

async fn verify(
    State(orchestrator): State<AppState>,
    SessionId(session_id): SessionId,
) -> Result<impl IntoResponse, ApiError> {
    ok(orchestrator.verify(&session_id).await?)
}

async fn continue_anyway(
    State(orchestrator): State<AppState>,
    SessionId(session_id): SessionId,
) -> Result<impl IntoResponse, ApiError> {
    ok(orchestrator.continue_anyway(&session_id).await?)
}

async fn reset(
    State(orchestrator): State<AppState>,
    SessionId(session_id): SessionId,
) -> ApiResult<Message> {
    orchestrator.reset(&session_id).await?;
    ok(Message {
        message: "Migration reset",
    })
}
