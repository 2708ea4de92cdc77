//! Error types for the assisted query pipeline.

use abode_core::error::AbodeError;
use uuid::Uuid;

/// Errors surfaced by the orchestrator to the HTTP boundary.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("session not found: {0}")]
    SessionNotFound(Uuid),
    #[error("session expired: {0}")]
    SessionExpired(Uuid),
    #[error("malformed request: {0}")]
    MalformedRequest(String),
    #[error("listing store error: {0}")]
    ListingStore(String),
    #[error("request deadline of {0}s exceeded")]
    DeadlineExceeded(u64),
    #[error("storage error: {0}")]
    Storage(String),
}

impl ChatError {
    /// Stable machine-readable code.
    pub fn kind(&self) -> &'static str {
        match self {
            ChatError::SessionNotFound(_) => "session_not_found",
            ChatError::SessionExpired(_) => "session_expired",
            ChatError::MalformedRequest(_) => "malformed_request",
            ChatError::ListingStore(_) => "listing_store_error",
            ChatError::DeadlineExceeded(_) => "deadline_exceeded",
            ChatError::Storage(_) => "storage_error",
        }
    }
}

impl From<AbodeError> for ChatError {
    fn from(err: AbodeError) -> Self {
        match err {
            AbodeError::ListingStore(msg) => ChatError::ListingStore(msg),
            other => ChatError::Storage(other.to_string()),
        }
    }
}

/// Errors from the chat-completion client.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("no LLM API key configured")]
    Unconfigured,
    #[error("LLM upstream returned {status}: {body}")]
    Upstream { status: u16, body: String },
    #[error("LLM response had no choices")]
    EmptyResponse,
    #[error("LLM output was not the expected JSON: {0}")]
    MalformedJson(String),
    #[error("LLM transport error: {0}")]
    Transport(String),
}

impl LlmError {
    /// Stable machine-readable code.
    pub fn kind(&self) -> &'static str {
        match self {
            LlmError::Unconfigured => "llm_unconfigured",
            // Transport failures and timeouts degrade like a bad status.
            LlmError::Upstream { .. } | LlmError::Transport(_) => "llm_upstream_error",
            LlmError::EmptyResponse => "llm_empty_response",
            LlmError::MalformedJson(_) => "llm_malformed_json",
        }
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        LlmError::Transport(err.to_string())
    }
}
