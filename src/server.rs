use crate::config::{Config, CredentialMode};
use crate::error::AppError;
use crate::orchestrator::{Orchestrator, ResponseKind, SkipReason, TurnOutcome};
use crate::session::{ApiKey, Session, SessionStore};
use crate::transcript::Message;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, instrument, warn};
use uuid::Uuid;

pub type SharedState = Arc<AppState>;

pub struct AppState {
    pub config: Arc<Config>,
    pub orchestrator: Arc<Orchestrator>,
    pub sessions: SessionStore,
    /// Key read from the environment at startup, handed to every new session
    /// in environment credential mode.
    pub env_credentials: Option<ApiKey>,
}

impl AppState {
    pub fn new(
        config: Arc<Config>,
        orchestrator: Arc<Orchestrator>,
        env_credentials: Option<ApiKey>,
    ) -> Self {
        Self {
            config,
            orchestrator,
            sessions: SessionStore::new(),
            env_credentials,
        }
    }

    fn credential_mode(&self) -> CredentialMode {
        self.config.session.credentials
    }
}

/// Periodically drops sessions left idle past `session.idle_timeout_secs`.
pub fn spawn_session_sweeper(state: SharedState) -> JoinHandle<()> {
    let idle_secs = state.config.session.idle_timeout_secs;
    let max_idle = Duration::from_secs(idle_secs);
    let period = Duration::from_secs((idle_secs / 4).clamp(1, 60));

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let evicted = state.sessions.evict_idle(max_idle).await;
            if evicted > 0 {
                let remaining = state.sessions.len().await;
                info!(
                    evicted,
                    remaining,
                    "Expired idle sessions"
                );
            }
        }
    })
}

pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(handle_health))
        .route("/api/sessions", post(handle_create_session))
        .route(
            "/api/sessions/:id",
            get(handle_get_session).delete(handle_delete_session),
        )
        .route("/api/sessions/:id/credentials", put(handle_set_credentials))
        .route("/api/sessions/:id/turns", post(handle_turn))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct SessionView {
    id: Uuid,
    created_at: DateTime<Utc>,
    last_active: DateTime<Utc>,
    credentials_configured: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    messages: Option<Vec<Message>>,
}

impl SessionView {
    fn summary(session: &Session) -> Self {
        Self {
            id: session.id,
            created_at: session.created_at,
            last_active: session.last_active,
            credentials_configured: session.credentials.is_some(),
            messages: None,
        }
    }

    fn full(session: &Session) -> Self {
        Self {
            messages: Some(session.transcript.messages().to_vec()),
            ..Self::summary(session)
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct CredentialsRequest {
    #[serde(default)]
    api_key: Option<String>,
}

async fn handle_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

#[instrument(skip_all)]
async fn handle_create_session(
    State(state): State<SharedState>,
    body: Option<Json<CredentialsRequest>>,
) -> Result<impl IntoResponse, AppError> {
    let request = body.map(|Json(r)| r).unwrap_or_default();

    let credentials = match state.credential_mode() {
        CredentialMode::Environment => state.env_credentials.clone(),
        CredentialMode::Interactive => request.api_key.and_then(ApiKey::new),
    };

    let (id, handle) = state.sessions.create(credentials).await;
    let session = handle.lock().await;
    info!(session = %id, credentials = session.credentials.is_some(), "Session started");

    Ok((StatusCode::CREATED, Json(SessionView::summary(&session))))
}

#[instrument(skip(state))]
async fn handle_get_session(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionView>, AppError> {
    let handle = state
        .sessions
        .get(id)
        .await
        .ok_or(AppError::SessionNotFound(id))?;
    let mut session = handle
        .try_lock()
        .map_err(|_| AppError::TurnInProgress(id))?;
    session.touch();
    Ok(Json(SessionView::full(&session)))
}

#[instrument(skip(state))]
async fn handle_delete_session(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    if state.sessions.remove(id).await {
        info!(session = %id, "Session ended");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::SessionNotFound(id))
    }
}

#[instrument(skip(state, request))]
async fn handle_set_credentials(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Json(request): Json<CredentialsRequest>,
) -> Result<StatusCode, AppError> {
    let handle = state
        .sessions
        .get(id)
        .await
        .ok_or(AppError::SessionNotFound(id))?;

    if state.credential_mode() != CredentialMode::Interactive {
        return Err(AppError::InvalidRequest(format!(
            "API key is read from the {} environment variable",
            state.config.llm.api_key_env
        )));
    }

    let key = request
        .api_key
        .and_then(ApiKey::new)
        .ok_or_else(|| AppError::InvalidRequest("api_key must not be empty".to_string()))?;

    let mut session = handle
        .try_lock()
        .map_err(|_| AppError::TurnInProgress(id))?;
    session.credentials = Some(key);
    session.touch();
    info!(session = %id, "API key configured");

    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct TurnRequest {
    url: String,
    question: String,
}

#[derive(Debug, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
enum TurnResult {
    Answered { kind: ResponseKind, response: String },
    Skipped { reason: SkipReason },
}

#[derive(Debug, Serialize)]
struct TurnResponse {
    #[serde(flatten)]
    result: TurnResult,
    messages: Vec<Message>,
}

#[instrument(skip(state, request))]
async fn handle_turn(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Json(request): Json<TurnRequest>,
) -> Result<Json<TurnResponse>, AppError> {
    if request.url.trim().is_empty() {
        return Err(AppError::InvalidRequest("url must not be empty".to_string()));
    }
    if request.question.trim().is_empty() {
        return Err(AppError::InvalidRequest(
            "question must not be empty".to_string(),
        ));
    }

    let handle = state
        .sessions
        .get(id)
        .await
        .ok_or(AppError::SessionNotFound(id))?;
    let mut session = handle
        .try_lock()
        .map_err(|_| AppError::TurnInProgress(id))?;

    let outcome = state
        .orchestrator
        .handle_turn(&mut session, &request.url, &request.question)
        .await;
    session.touch();

    let result = match outcome {
        TurnOutcome::Answered { kind, response } => TurnResult::Answered { kind, response },
        TurnOutcome::Skipped(reason) => {
            if reason == SkipReason::MissingCredentials {
                warn!(session = %id, "Please configure an API key before asking questions");
            }
            TurnResult::Skipped { reason }
        }
    };

    Ok(Json(TurnResponse {
        result,
        messages: session.transcript.messages().to_vec(),
    }))
}
