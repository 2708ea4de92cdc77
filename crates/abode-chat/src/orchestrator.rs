//! Dialog orchestrator: sequences detection, fetching, rendering and the
//! LLM fallback for one user turn, and persists both sides of the turn.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use abode_core::config::{AbodeConfig, ChatConfig};
use abode_core::types::{
    Action, Intent, ListingType, Message, QueryType, Session, SessionContext, SessionSeed,
    SessionSummary,
};
use abode_storage::{ListingStore, SessionRepository};

use crate::error::ChatError;
use crate::fetcher::{missing, DataFetcher, DataResults};
use crate::llm::{parse_string_array, parse_structured, ChatCompletion, CompletionParams};
use crate::parser::IntentDetector;
use crate::prompt::{
    build_classification_prompt, build_reply_prompt, build_suggestion_prompt, PromptLimits,
    ReplyPromptInputs,
};
use crate::response::{self, TemplateData, DEADLINE_APOLOGY, LLM_APOLOGY, WELCOME};
use crate::suggestions::{self, MAX_SUGGESTIONS};

/// Capacity of the appended-message broadcast channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// What the client should prompt the user for next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NextStep {
    AskLocation,
    AskBedrooms,
    AskBudget,
    ViewListings,
    RefineSearch,
}

/// The assistant's answer to one user turn.
#[derive(Debug, Clone, Serialize)]
pub struct Reply {
    pub message_id: Uuid,
    pub content: String,
    pub query_type: QueryType,
    pub intent: Intent,
    pub data_results: DataResults,
    pub suggestions: Vec<String>,
    pub needs_more_info: bool,
    pub missing: Vec<String>,
    pub next_step: Option<NextStep>,
    pub used_llm: bool,
    pub elapsed_ms: u64,
}

/// Result of the pipeline before persistence.
struct Turn {
    content: String,
    intent: Intent,
    data: DataResults,
    suggestions: Vec<String>,
    used_llm: bool,
}

/// Coordinates the assisted query pipeline over the session store.
pub struct ChatOrchestrator {
    detector: IntentDetector,
    fetcher: DataFetcher,
    sessions: Arc<SessionRepository>,
    llm: Arc<dyn ChatCompletion>,
    params: CompletionParams,
    config: ChatConfig,
    events: broadcast::Sender<Message>,
}

impl ChatOrchestrator {
    pub fn new(
        sessions: Arc<SessionRepository>,
        listings: Arc<dyn ListingStore>,
        llm: Arc<dyn ChatCompletion>,
        config: &AbodeConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            detector: IntentDetector::new(),
            fetcher: DataFetcher::new(listings),
            sessions,
            llm,
            params: CompletionParams::from(&config.llm),
            config: config.chat.clone(),
            events,
        }
    }

    /// Receive every message appended through this orchestrator.
    pub fn subscribe(&self) -> broadcast::Receiver<Message> {
        self.events.subscribe()
    }

    fn publish(&self, message: &Message) {
        // No subscribers is not an error.
        let _ = self.events.send(message.clone());
    }

    // -----------------------------------------------------------------
    // Session lifecycle
    // -----------------------------------------------------------------

    /// Open a session, optionally with a canned welcome turn.
    pub fn create_session(&self, seed: &SessionSeed) -> Result<(Session, Option<Message>), ChatError> {
        let welcome = self.config.welcome_message.then_some(WELCOME);
        let (session, first) = self.sessions.create(seed, welcome)?;
        if let Some(ref message) = first {
            self.publish(message);
        }
        Ok((session, first))
    }

    /// Session metadata and its full history.
    pub fn session_with_history(&self, id: Uuid) -> Result<(Session, Vec<Message>), ChatError> {
        let session = self.sessions.get(id)?.ok_or(ChatError::SessionNotFound(id))?;
        let history = self.sessions.history(id)?;
        Ok((session, history))
    }

    /// End a session. Later messages are rejected as expired.
    pub fn end_session(&self, id: Uuid) -> Result<(), ChatError> {
        if self.sessions.end(id)? {
            info!(session_id = %id, "Chat session ended");
            Ok(())
        } else {
            Err(ChatError::SessionNotFound(id))
        }
    }

    pub fn list_sessions(&self, user_id: &str, limit: usize) -> Result<Vec<SessionSummary>, ChatError> {
        Ok(self.sessions.list_for_user(user_id, limit)?)
    }

    /// Suggestion chips for a category, from the store with built-in fill.
    pub fn suggestions(&self, category: QueryType, limit: usize) -> Vec<String> {
        let stored = self
            .sessions
            .list_suggestions(category.as_str(), limit)
            .unwrap_or_else(|e| {
                warn!(error = %e, "Failed to load stored suggestions");
                Vec::new()
            });
        let mut merged = suggestions::merge([stored, owned(suggestions::builtin(category))]);
        merged.truncate(limit);
        merged
    }

    /// Delete sessions whose window has closed.
    pub fn purge_expired(&self) -> Result<u64, ChatError> {
        Ok(self.sessions.purge_expired(Utc::now())?)
    }

    fn load_live(&self, id: Uuid) -> Result<Session, ChatError> {
        let session = self.sessions.get(id)?.ok_or(ChatError::SessionNotFound(id))?;
        if session.is_expired(Utc::now()) {
            return Err(ChatError::SessionExpired(id));
        }
        Ok(session)
    }

    // -----------------------------------------------------------------
    // Turn handling
    // -----------------------------------------------------------------

    /// Handle one user message on a live session.
    pub async fn handle(
        &self,
        session_id: Uuid,
        user_text: &str,
        ambient: Option<&serde_json::Map<String, serde_json::Value>>,
    ) -> Result<Reply, ChatError> {
        let started = Instant::now();
        let text = user_text.trim();
        if text.is_empty() {
            return Err(ChatError::MalformedRequest("message cannot be empty".to_string()));
        }
        let length = text.chars().count();
        if length > self.config.max_message_length {
            return Err(ChatError::MalformedRequest(format!(
                "message is {} characters; the limit is {}",
                length, self.config.max_message_length
            )));
        }

        let session = self.load_live(session_id)?;
        let mut context = session.context.clone();
        if let Some(map) = ambient {
            context.merge_json(map).map_err(ChatError::MalformedRequest)?;
        }

        let user_message = self
            .sessions
            .append_message(&Message::user(session_id, text, &context))?;
        self.publish(&user_message);

        let intent0 = self.detect_with_context(text, &session, &context);
        debug!(
            session_id = %session_id,
            query_type = %intent0.query_type,
            confidence = intent0.confidence,
            "Intent detected"
        );

        let deadline = Duration::from_secs(self.config.request_deadline_secs);
        let outcome = tokio::time::timeout(
            deadline,
            self.run_pipeline(&session, &context, &intent0, text, user_message.id),
        )
        .await;

        // Context follows the rule-based reading of the turn only.
        context.absorb_entities(&intent0.entities);

        let turn = match outcome {
            Ok(turn) => turn,
            Err(_) => {
                warn!(session_id = %session_id, deadline_secs = deadline.as_secs(), "Request deadline exceeded");
                let mut apology = Message::assistant(session_id, DEADLINE_APOLOGY, &context);
                apology.processing_time_ms = Some(started.elapsed().as_millis() as u64);
                apology.suggestions = suggestions::fast_path(&intent0);
                let apology = self.sessions.append_message(&apology)?;
                self.publish(&apology);
                self.touch(session_id, &context, intent0.query_type)?;
                return Err(ChatError::DeadlineExceeded(deadline.as_secs()));
            }
        };

        let missing_fields = missing(&turn.intent);
        let next_step = next_step(&turn.intent, &turn.data, &missing_fields);
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let mut assistant = Message::assistant(session_id, &turn.content, &context);
        assistant.processing_time_ms = Some(elapsed_ms);
        assistant.data_results = serde_json::to_value(&turn.data)
            .map_err(|e| ChatError::Storage(e.to_string()))?;
        assistant.suggestions = turn.suggestions.clone();
        let assistant = self.sessions.append_message(&assistant)?;
        self.publish(&assistant);

        self.touch(session_id, &context, turn.intent.query_type)?;

        info!(
            session_id = %session_id,
            query_type = %turn.intent.query_type,
            used_llm = turn.used_llm,
            elapsed_ms,
            "Chat turn handled"
        );

        Ok(Reply {
            message_id: assistant.id,
            content: turn.content,
            query_type: turn.intent.query_type,
            needs_more_info: !missing_fields.is_empty(),
            missing: missing_fields.iter().map(|m| m.to_string()).collect(),
            next_step,
            data_results: turn.data,
            suggestions: turn.suggestions,
            used_llm: turn.used_llm,
            intent: turn.intent,
            elapsed_ms,
        })
    }

    /// Slide the expiry window and store the turn's context. Last write
    /// wins, but a session ended or lapsed mid-turn stays that way.
    fn touch(
        &self,
        session_id: Uuid,
        context: &SessionContext,
        query_type: QueryType,
    ) -> Result<(), ChatError> {
        let recorded = self
            .sessions
            .record_turn(session_id, context, query_type, Utc::now())?;
        if !recorded {
            debug!(session_id = %session_id, "Session closed during turn; context not stored");
        }
        Ok(())
    }

    /// Rule-based intent with gaps filled from the session.
    fn detect_with_context(&self, text: &str, session: &Session, context: &SessionContext) -> Intent {
        let mut intent = self.detector.detect(text, "");
        let mentioned = intent.entities.location.is_some()
            || intent.entities.bedrooms.is_some()
            || intent.entities.budget.is_some();

        // "in kolkata" after a property question refines that search.
        if intent.query_type == QueryType::General
            && mentioned
            && session.last_query_type == QueryType::Property
        {
            intent.query_type = QueryType::Property;
            intent.action = Action::Search;
            intent.confidence = 0.7;
        }

        let default_location = context.city().unwrap_or(session.location.as_str()).trim();
        if intent.entities.location.is_none() && !default_location.is_empty() {
            intent.entities.location = Some(default_location.to_string());
        }
        intent.entities.fill_from(&context.as_entities());

        if intent.query_type == QueryType::Property && intent.action == Action::Search {
            match intent.entities.listing_type {
                Some(ListingType::Rent) => intent.action = Action::Rent,
                Some(ListingType::Sale) => intent.action = Action::Sale,
                None => {}
            }
        }
        intent
    }

    async fn run_pipeline(
        &self,
        session: &Session,
        context: &SessionContext,
        intent0: &Intent,
        text: &str,
        current_message: Uuid,
    ) -> Turn {
        if self.config.fast_path_enabled && !self.detector.is_complex(text) {
            match self.fast_path(intent0) {
                Ok(turn) => return turn,
                Err(e) => warn!(
                    session_id = %session.id,
                    error = %e,
                    kind = e.kind(),
                    "Fast path failed; falling back to LLM"
                ),
            }
        }
        self.slow_path(session, context, intent0, text, current_message)
            .await
    }

    fn fast_path(&self, intent: &Intent) -> Result<Turn, ChatError> {
        let data = self.fetcher.fetch(intent)?;
        let missing_fields = missing(intent);
        let content = response::render(
            intent,
            &TemplateData {
                data: &data,
                missing: &missing_fields,
            },
        );
        Ok(Turn {
            content,
            intent: intent.clone(),
            data,
            suggestions: suggestions::fast_path(intent),
            used_llm: false,
        })
    }

    async fn slow_path(
        &self,
        session: &Session,
        context: &SessionContext,
        intent0: &Intent,
        text: &str,
        current_message: Uuid,
    ) -> Turn {
        let intent = self.classify_with_llm(text, context, intent0).await;

        let data = self.fetcher.fetch(&intent).unwrap_or_else(|e| {
            warn!(session_id = %session.id, error = %e, "Listing fetch failed; using empty results");
            DataResults::default()
        });

        let history: Vec<Message> = self
            .sessions
            .recent_messages(session.id, self.config.max_history_turns + 1)
            .unwrap_or_else(|e| {
                warn!(session_id = %session.id, error = %e, "Failed to load history");
                Vec::new()
            })
            .into_iter()
            .filter(|m| m.id != current_message)
            .collect();
        let skip = history.len().saturating_sub(self.config.max_history_turns);

        let prompt = build_reply_prompt(
            &ReplyPromptInputs {
                history: &history[skip..],
                intent: &intent,
                data: &data,
                user_text: text,
            },
            PromptLimits {
                max_history_turns: self.config.max_history_turns,
                max_listings: self.config.max_listings_in_prompt,
            },
        );

        let (content, used_llm) = match self.llm.complete(&prompt, &self.params).await {
            Ok(reply) if !reply.trim().is_empty() => (reply.trim().to_string(), true),
            Ok(_) => {
                warn!(session_id = %session.id, "LLM returned blank content");
                (LLM_APOLOGY.to_string(), false)
            }
            Err(e) => {
                warn!(session_id = %session.id, error = %e, kind = e.kind(), "LLM reply failed");
                (LLM_APOLOGY.to_string(), false)
            }
        };

        let suggestions = self
            .slow_path_suggestions(text, &content, intent.query_type)
            .await;

        Turn {
            content,
            intent,
            data,
            suggestions,
            used_llm,
        }
    }

    /// Ask the model to classify the utterance; keep the rule-based intent
    /// when the call fails or the JSON is unusable.
    async fn classify_with_llm(&self, text: &str, context: &SessionContext, intent0: &Intent) -> Intent {
        let prompt = build_classification_prompt(text, context);
        let raw = match self.llm.complete(&prompt, &self.params).await {
            Ok(raw) => raw,
            Err(e) => {
                debug!(kind = e.kind(), "Structured parse unavailable; keeping rule-based intent");
                return intent0.clone();
            }
        };
        match parse_structured(&raw) {
            Ok(parsed) => parsed.into_intent(intent0),
            Err(e) => {
                warn!(kind = e.kind(), error = %e, "Structured parse returned malformed JSON");
                intent0.clone()
            }
        }
    }

    /// LLM suggestions first, then stored ones, then built-in seeds.
    async fn slow_path_suggestions(&self, text: &str, reply: &str, query_type: QueryType) -> Vec<String> {
        let prompt = build_suggestion_prompt(text, reply, query_type);
        let from_llm = match self.llm.complete(&prompt, &self.params).await {
            Ok(raw) => parse_string_array(&raw).unwrap_or_else(|e| {
                warn!(kind = e.kind(), "Suggestion call returned malformed JSON");
                Vec::new()
            }),
            Err(e) => {
                debug!(kind = e.kind(), "Suggestion call failed");
                Vec::new()
            }
        };
        let stored = self
            .sessions
            .list_suggestions(query_type.as_str(), MAX_SUGGESTIONS)
            .unwrap_or_default();
        suggestions::merge([from_llm, stored, owned(suggestions::builtin(query_type))])
    }
}

fn owned(items: Vec<&str>) -> Vec<String> {
    items.into_iter().map(str::to_string).collect()
}

fn next_step(intent: &Intent, data: &DataResults, missing: &[&str]) -> Option<NextStep> {
    if intent.query_type != QueryType::Property {
        return None;
    }
    Some(match missing.first().copied() {
        Some("location") => NextStep::AskLocation,
        Some("bedrooms") => NextStep::AskBedrooms,
        Some(_) => NextStep::AskBudget,
        None if data.total > 0 => NextStep::ViewListings,
        None => NextStep::RefineSearch,
    })
}
