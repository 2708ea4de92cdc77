//! Application state shared across all route handlers.
//!
//! AppState holds references to all services and shared resources.
//! It is passed to handlers via axum's State extractor.

use std::sync::Arc;
use std::time::Instant;

use abode_chat::{ChatCompletion, ChatOrchestrator};
use abode_core::config::AbodeConfig;
use abode_storage::{Database, ListingRepository, SessionRepository};

/// Shared application state.
///
/// All fields use `Arc` for cheap cloning across handler tasks. Config is
/// read once at startup and never mutated.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AbodeConfig>,
    pub sessions: Arc<SessionRepository>,
    pub listings: Arc<ListingRepository>,
    pub orchestrator: Arc<ChatOrchestrator>,
    /// Server start time for uptime calculation.
    pub start_time: Instant,
}

impl AppState {
    /// Wire repositories and the orchestrator over one database.
    pub fn new(config: AbodeConfig, database: Database, llm: Arc<dyn ChatCompletion>) -> Self {
        let database = Arc::new(database);
        let ttl = chrono::Duration::hours(i64::from(config.chat.session_ttl_hours));
        let sessions = Arc::new(SessionRepository::new(Arc::clone(&database), ttl));
        let listings = Arc::new(ListingRepository::new(Arc::clone(&database)));
        let orchestrator = Arc::new(ChatOrchestrator::new(
            Arc::clone(&sessions),
            Arc::clone(&listings) as Arc<dyn abode_storage::ListingStore>,
            llm,
            &config,
        ));
        Self {
            config: Arc::new(config),
            sessions,
            listings,
            orchestrator,
            start_time: Instant::now(),
        }
    }
}
