//! Route handler functions for all API endpoints.
//!
//! Each handler extracts path/query/body input, rejects malformed input with
//! a 400 envelope, calls the orchestrator and wraps the result in the
//! `{ ok, data, error }` envelope.

use std::convert::Infallible;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{Path, Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing::debug;
use uuid::Uuid;

use abode_chat::Reply;
use abode_core::types::{Message, QueryType, Session, SessionContext, SessionSeed, SessionSummary};

use crate::error::{ok, ApiError, Envelope};
use crate::state::AppState;

const DEFAULT_SUGGESTION_LIMIT: usize = 5;
const MAX_SUGGESTION_LIMIT: usize = 20;
const DEFAULT_SESSION_LIMIT: usize = 20;
const MAX_SESSION_LIMIT: usize = 100;

// =============================================================================
// Request types
// =============================================================================

/// Body of `POST /chatbot/session`. Every field is optional.
#[derive(Debug, Default, Deserialize)]
pub struct CreateSessionRequest {
    pub user_id: Option<String>,
    pub location: Option<String>,
    pub context: Option<serde_json::Map<String, serde_json::Value>>,
}

/// Body of `POST /chatbot/session/{id}/message`.
#[derive(Debug, Deserialize)]
pub struct MessageRequest {
    pub message: String,
    pub context: Option<serde_json::Map<String, serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
pub struct SuggestionParams {
    pub category: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct SessionListParams {
    pub user_id: Option<String>,
    pub limit: Option<usize>,
}

// =============================================================================
// Response types
// =============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
}

#[derive(Debug, Serialize)]
pub struct CreateSessionResponse {
    pub session_id: Uuid,
    pub session: Session,
    /// Canned welcome turn, when enabled.
    pub initial_message: Option<Message>,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub session: Session,
    pub messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
pub struct EndSessionResponse {
    pub session_id: Uuid,
    pub ended: bool,
}

#[derive(Debug, Serialize)]
pub struct SuggestionsResponse {
    pub category: QueryType,
    pub suggestions: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct SessionListResponse {
    pub sessions: Vec<SessionSummary>,
}

type ApiResult<T> = Result<Json<Envelope<T>>, ApiError>;

fn session_id(path: Result<Path<Uuid>, PathRejection>) -> Result<Uuid, ApiError> {
    path.map(|Path(id)| id)
        .map_err(|e| ApiError::BadRequest(format!("Invalid session id: {}", e.body_text())))
}

// =============================================================================
// Handlers
// =============================================================================

/// GET /health - health check.
pub async fn health(State(state): State<AppState>) -> ApiResult<HealthResponse> {
    Ok(ok(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    }))
}

/// POST /chatbot/session - open a session.
///
/// The body may be empty. A `context` object is validated the same way as
/// the per-message ambient context.
pub async fn create_session(
    State(state): State<AppState>,
    body: Bytes,
) -> ApiResult<CreateSessionResponse> {
    let request: CreateSessionRequest = if body.iter().all(u8::is_ascii_whitespace) {
        CreateSessionRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::BadRequest(format!("Invalid request body: {}", e)))?
    };

    let mut context = SessionContext::default();
    if let Some(ref map) = request.context {
        context.merge_json(map).map_err(ApiError::BadRequest)?;
    }
    let seed = SessionSeed {
        user_id: request.user_id,
        location: request.location.map(|l| l.trim().to_string()),
        context,
    };

    let (session, initial_message) = state.orchestrator.create_session(&seed)?;
    Ok(ok(CreateSessionResponse {
        session_id: session.id,
        session,
        initial_message,
    }))
}

/// GET /chatbot/session/{id} - session metadata and full history.
pub async fn get_session(
    State(state): State<AppState>,
    path: Result<Path<Uuid>, PathRejection>,
) -> ApiResult<SessionResponse> {
    let id = session_id(path)?;
    let (session, messages) = state.orchestrator.session_with_history(id)?;
    Ok(ok(SessionResponse { session, messages }))
}

/// DELETE /chatbot/session/{id} - end a session.
pub async fn end_session(
    State(state): State<AppState>,
    path: Result<Path<Uuid>, PathRejection>,
) -> ApiResult<EndSessionResponse> {
    let id = session_id(path)?;
    state.orchestrator.end_session(id)?;
    Ok(ok(EndSessionResponse {
        session_id: id,
        ended: true,
    }))
}

/// POST /chatbot/session/{id}/message - run one turn of the pipeline.
pub async fn post_message(
    State(state): State<AppState>,
    path: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<MessageRequest>, JsonRejection>,
) -> ApiResult<Reply> {
    let id = session_id(path)?;
    let Json(request) =
        payload.map_err(|e| ApiError::BadRequest(format!("Invalid request body: {}", e.body_text())))?;

    let reply = state
        .orchestrator
        .handle(id, &request.message, request.context.as_ref())
        .await?;
    Ok(ok(reply))
}

/// GET /chatbot/suggestions - suggestion chips for a category.
pub async fn suggestions(
    State(state): State<AppState>,
    Query(params): Query<SuggestionParams>,
) -> ApiResult<SuggestionsResponse> {
    let category = match params.category.as_deref().map(str::trim) {
        None | Some("") => QueryType::General,
        Some(raw) => raw
            .parse::<QueryType>()
            .map_err(|_| ApiError::BadRequest(format!("Unknown category '{}'", raw)))?,
    };
    let limit = params
        .limit
        .unwrap_or(DEFAULT_SUGGESTION_LIMIT)
        .clamp(1, MAX_SUGGESTION_LIMIT);

    Ok(ok(SuggestionsResponse {
        category,
        suggestions: state.orchestrator.suggestions(category, limit),
    }))
}

/// GET /chatbot/sessions?user_id=… - a user's sessions, newest first.
pub async fn list_sessions(
    State(state): State<AppState>,
    Query(params): Query<SessionListParams>,
) -> ApiResult<SessionListResponse> {
    let user_id = params
        .user_id
        .as_deref()
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .ok_or_else(|| ApiError::BadRequest("'user_id' is required".to_string()))?;
    let limit = params
        .limit
        .unwrap_or(DEFAULT_SESSION_LIMIT)
        .clamp(1, MAX_SESSION_LIMIT);

    let sessions = state.orchestrator.list_sessions(user_id, limit)?;
    Ok(ok(SessionListResponse { sessions }))
}

/// GET /chatbot/session/{id}/stream - SSE feed of messages appended to a session.
pub async fn stream(
    State(state): State<AppState>,
    path: Result<Path<Uuid>, PathRejection>,
) -> Result<Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>> + Send>, ApiError> {
    let id = session_id(path)?;
    // 404 for unknown sessions instead of an idle stream.
    state.orchestrator.session_with_history(id)?;

    let rx = state.orchestrator.subscribe();
    debug!(session_id = %id, "SSE subscriber attached");
    let stream = BroadcastStream::new(rx).filter_map(move |result| match result {
        Ok(message) if message.session_id == id => {
            let data = serde_json::to_string(&message).unwrap_or_default();
            Some(Ok(Event::default().event("message").data(data)))
        }
        _ => None,
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15))))
}
