//! End-to-end turns through the orchestrator with a scripted model.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;

use abode_chat::response::{DEADLINE_APOLOGY, LLM_APOLOGY};
use abode_chat::{
    ChatCompletion, ChatError, ChatOrchestrator, CompletionParams, LlmError, NextStep,
    PromptMessage,
};
use abode_core::config::AbodeConfig;
use abode_core::error::AbodeError;
use abode_core::types::{
    Action, Listing, ListingType, PriceField, PropertyFilters, PropertySearch, QueryType, Role,
    SessionSeed,
};
use abode_storage::{Database, ListingRepository, ListingStore, SessionRepository};

/// Which of the three pipeline calls a prompt belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Call {
    Classify,
    Reply,
    Suggest,
}

fn call_of(prompt: &[PromptMessage]) -> Call {
    let first = &prompt[0].content;
    if first.starts_with("Classify") {
        Call::Classify
    } else if first.starts_with("Suggest") {
        Call::Suggest
    } else {
        Call::Reply
    }
}

/// Model double: `None` answers fail with an upstream error.
#[derive(Default)]
struct ScriptedLlm {
    classify: Option<String>,
    reply: Option<String>,
    suggest: Option<String>,
    delay: Option<Duration>,
    calls: Mutex<Vec<(Call, Vec<PromptMessage>)>>,
}

impl ScriptedLlm {
    fn answering(classify: &str, reply: &str, suggest: &str) -> Self {
        Self {
            classify: Some(classify.to_string()),
            reply: Some(reply.to_string()),
            suggest: Some(suggest.to_string()),
            ..Self::default()
        }
    }

    fn failing() -> Self {
        Self::default()
    }

    fn calls(&self) -> Vec<(Call, Vec<PromptMessage>)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatCompletion for ScriptedLlm {
    async fn complete(
        &self,
        messages: &[PromptMessage],
        _params: &CompletionParams,
    ) -> Result<String, LlmError> {
        let call = call_of(messages);
        self.calls.lock().unwrap().push((call, messages.to_vec()));
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let answer = match call {
            Call::Classify => &self.classify,
            Call::Reply => &self.reply,
            Call::Suggest => &self.suggest,
        };
        answer.clone().ok_or(LlmError::Upstream {
            status: 503,
            body: "unavailable".to_string(),
        })
    }
}

struct Harness {
    orchestrator: ChatOrchestrator,
    sessions: Arc<SessionRepository>,
    llm: Arc<ScriptedLlm>,
}

fn listing(id: &str, bedrooms: i64, rent: i64, city: &str) -> Listing {
    Listing {
        id: id.to_string(),
        title: format!("{} BHK in {}", bedrooms, city),
        description: "Bright flat close to the market".to_string(),
        monthly_rent: Some(rent),
        sale_price: None,
        bedrooms: Some(bedrooms),
        bathrooms: Some(2),
        area: Some(1_200.0),
        city: city.to_string(),
        state: "West Bengal".to_string(),
        address: String::new(),
        listing_type: "rent".to_string(),
        property_type: "residential".to_string(),
        images: vec![],
        status: "available".to_string(),
        is_approved: true,
        created_at: Utc::now(),
    }
}

fn harness_with(llm: ScriptedLlm, tweak: impl FnOnce(&mut AbodeConfig)) -> Harness {
    let db = Arc::new(Database::in_memory().unwrap());
    let listings = Arc::new(ListingRepository::new(Arc::clone(&db)));
    listings.insert(&listing("a", 3, 18_000, "Siliguri")).unwrap();
    listings.insert(&listing("b", 3, 25_000, "Siliguri")).unwrap();
    listings.insert(&listing("c", 2, 12_000, "Siliguri")).unwrap();
    listings.insert(&listing("d", 3, 15_000, "Kolkata")).unwrap();
    assemble(db, listings, llm, tweak)
}

fn assemble(
    db: Arc<Database>,
    listings: Arc<dyn ListingStore>,
    llm: ScriptedLlm,
    tweak: impl FnOnce(&mut AbodeConfig),
) -> Harness {
    let mut config = AbodeConfig::default();
    tweak(&mut config);

    let sessions = Arc::new(SessionRepository::new(
        db,
        chrono::Duration::hours(config.chat.session_ttl_hours as i64),
    ));
    let llm = Arc::new(llm);
    let orchestrator = ChatOrchestrator::new(
        Arc::clone(&sessions),
        listings,
        Arc::clone(&llm) as Arc<dyn ChatCompletion>,
        &config,
    );
    Harness {
        orchestrator,
        sessions,
        llm,
    }
}

/// Listing store whose every query fails.
struct BrokenStore;

impl ListingStore for BrokenStore {
    fn search(&self, _filters: &PropertyFilters, _limit: usize) -> Result<PropertySearch, AbodeError> {
        Err(AbodeError::ListingStore("no such table: properties".to_string()))
    }
}

fn harness(llm: ScriptedLlm) -> Harness {
    harness_with(llm, |_| {})
}

fn siliguri_session(h: &Harness) -> uuid::Uuid {
    let seed = SessionSeed {
        location: Some("Siliguri".to_string()),
        ..SessionSeed::default()
    };
    h.orchestrator.create_session(&seed).unwrap().0.id
}

#[tokio::test]
async fn fast_path_answers_property_search_without_llm() {
    let h = harness(ScriptedLlm::failing());
    let id = siliguri_session(&h);

    let reply = h
        .orchestrator
        .handle(id, "3bhk for rent in siliguri", None)
        .await
        .unwrap();

    assert!(!reply.used_llm);
    assert_eq!(reply.query_type, QueryType::Property);
    assert_eq!(reply.intent.action, Action::Rent);
    assert_eq!(reply.data_results.total, 2);
    let filters = reply.data_results.filters.clone().unwrap();
    assert_eq!(filters.bedrooms, Some(3));
    assert_eq!(filters.listing_type, Some(ListingType::Rent));
    assert_eq!(filters.price_field, PriceField::MonthlyRent);
    assert!(reply.data_results.properties.iter().all(|p| p.city == "Siliguri"));
    assert_eq!(reply.missing, vec!["budget".to_string()]);
    assert!(reply.needs_more_info);
    assert_eq!(reply.next_step, Some(NextStep::AskBudget));
    assert!(!reply.suggestions.is_empty());
    assert!(h.llm.calls().is_empty());

    // welcome + user + assistant
    let (_, history) = h.orchestrator.session_with_history(id).unwrap();
    assert_eq!(history.len(), 3);
    assert_eq!(history[1].role, Role::User);
    assert_eq!(history[2].role, Role::Assistant);
    assert_eq!(history[2].id, reply.message_id);
    assert!(history[2].processing_time_ms.is_some());
    assert_eq!(history[2].data_results["total"], json!(2));
}

#[tokio::test]
async fn greeting_gets_canned_reply_and_suggestions() {
    let h = harness(ScriptedLlm::failing());
    let id = siliguri_session(&h);

    let reply = h.orchestrator.handle(id, "hello", None).await.unwrap();
    assert_eq!(reply.query_type, QueryType::General);
    assert!(!reply.used_llm);
    assert!(!reply.content.is_empty());
    assert!(!reply.suggestions.is_empty());
    assert!(reply.next_step.is_none());
    assert!(!reply.needs_more_info);
}

#[tokio::test]
async fn follow_up_carries_context_forward() {
    let h = harness(ScriptedLlm::failing());
    let id = siliguri_session(&h);

    h.orchestrator
        .handle(id, "3bhk for rent in siliguri", None)
        .await
        .unwrap();
    let reply = h
        .orchestrator
        .handle(id, "anything under 20k?", None)
        .await
        .unwrap();

    assert_eq!(reply.query_type, QueryType::Property);
    assert_eq!(reply.intent.action, Action::Rent);
    assert_eq!(reply.intent.entities.bedrooms, Some(3));
    assert_eq!(reply.intent.entities.budget, Some(20_000));
    assert_eq!(reply.data_results.total, 1);
    assert_eq!(reply.data_results.properties[0].id, "a");
    assert!(!reply.needs_more_info);
    assert_eq!(reply.next_step, Some(NextStep::ViewListings));

    let session = h.sessions.get(id).unwrap().unwrap();
    assert_eq!(session.context.bedrooms(), Some(3));
    assert_eq!(session.context.budget(), Some(20_000));
    assert_eq!(session.last_query_type, QueryType::Property);
}

#[tokio::test]
async fn ambient_context_fills_missing_entities() {
    let h = harness(ScriptedLlm::failing());
    let (session, _) = h
        .orchestrator
        .create_session(&SessionSeed::default())
        .unwrap();

    let ambient = json!({"city": "Kolkata", "budget": "16000"});
    let reply = h
        .orchestrator
        .handle(session.id, "3bhk for rent", ambient.as_object())
        .await
        .unwrap();

    assert_eq!(reply.intent.entities.location.as_deref(), Some("Kolkata"));
    assert_eq!(reply.data_results.total, 1);
    assert_eq!(reply.data_results.properties[0].id, "d");
}

#[tokio::test]
async fn invalid_ambient_context_is_rejected_before_append() {
    let h = harness(ScriptedLlm::failing());
    let id = siliguri_session(&h);

    let ambient = json!({"bedrooms": 42});
    let err = h
        .orchestrator
        .handle(id, "3bhk", ambient.as_object())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "malformed_request");

    let (_, history) = h.orchestrator.session_with_history(id).unwrap();
    assert_eq!(history.len(), 1);
}

#[tokio::test]
async fn blank_and_oversized_messages_are_rejected() {
    let h = harness_with(ScriptedLlm::failing(), |c| c.chat.max_message_length = 20);
    let id = siliguri_session(&h);

    let err = h.orchestrator.handle(id, "   ", None).await.unwrap_err();
    assert!(matches!(err, ChatError::MalformedRequest(_)));

    let long = "a".repeat(21);
    let err = h.orchestrator.handle(id, &long, None).await.unwrap_err();
    assert!(matches!(err, ChatError::MalformedRequest(_)));
}

#[tokio::test]
async fn complex_message_takes_llm_path() {
    let llm = ScriptedLlm::answering(
        r#"{"type":"property","intent":"rent","entities":{"location":"Siliguri","bedrooms":3},"confidence":0.92}"#,
        "Both 3BHK flats are close to the market; the first is cheaper.",
        r#"["Book a site visit", "Show 2BHK options", "Filter by monthly budget"]"#,
    );
    let h = harness(llm);
    let id = siliguri_session(&h);

    let reply = h
        .orchestrator
        .handle(
            id,
            "compare the 3bhk rentals in siliguri and tell me which is better versus the cheaper one",
            None,
        )
        .await
        .unwrap();

    assert!(reply.used_llm);
    assert_eq!(
        reply.content,
        "Both 3BHK flats are close to the market; the first is cheaper."
    );
    assert_eq!(reply.query_type, QueryType::Property);
    assert_eq!(reply.data_results.total, 2);
    assert_eq!(reply.suggestions[0], "Book a site visit");
    assert!(reply.suggestions.len() <= 5);
    assert!((reply.intent.confidence - 0.92).abs() < 1e-6);

    let calls = h.llm.calls();
    let kinds: Vec<Call> = calls.iter().map(|(c, _)| *c).collect();
    assert_eq!(kinds, vec![Call::Classify, Call::Reply, Call::Suggest]);

    // The reply prompt ends with the user's text and carries the welcome turn.
    let reply_prompt = &calls[1].1;
    assert_eq!(reply_prompt.last().unwrap().content.split_whitespace().next(), Some("compare"));
    assert!(reply_prompt
        .iter()
        .any(|m| m.content.starts_with("Data: 2 listings matched")));
}

#[tokio::test]
async fn llm_failure_degrades_to_apology_with_suggestions() {
    let h = harness_with(ScriptedLlm::failing(), |c| c.chat.fast_path_enabled = false);
    let id = siliguri_session(&h);

    let reply = h.orchestrator.handle(id, "hello", None).await.unwrap();
    assert!(!reply.used_llm);
    assert_eq!(reply.content, LLM_APOLOGY);
    assert!(!reply.suggestions.is_empty());
    assert_eq!(h.llm.calls().len(), 3);
}

#[tokio::test]
async fn malformed_classification_keeps_rule_based_intent() {
    let llm = ScriptedLlm::answering(
        "I think this is about property!",
        "Here are a few options.",
        "not a list",
    );
    let h = harness_with(llm, |c| c.chat.fast_path_enabled = false);
    let id = siliguri_session(&h);

    let reply = h
        .orchestrator
        .handle(id, "book a plumber in kolkata", None)
        .await
        .unwrap();
    assert!(reply.used_llm);
    assert_eq!(reply.query_type, QueryType::Service);
    assert_eq!(reply.intent.action, Action::Book);
    assert_eq!(reply.intent.entities.location.as_deref(), Some("Kolkata"));
    // Model suggestions were unusable; stored seeds fill in.
    assert_eq!(reply.suggestions[0], "Book a plumber");
}

#[tokio::test]
async fn listing_store_failure_falls_back_to_llm_with_empty_results() {
    let llm = ScriptedLlm::answering(
        r#"{"type":"property","intent":"rent","entities":{"location":"Siliguri","bedrooms":3},"confidence":0.9}"#,
        "I could not load listings right now, but I can help you narrow the search.",
        r#"["Try a different budget"]"#,
    );
    let db = Arc::new(Database::in_memory().unwrap());
    let h = assemble(db, Arc::new(BrokenStore), llm, |_| {});
    let id = siliguri_session(&h);

    let reply = h
        .orchestrator
        .handle(id, "3bhk for rent in siliguri", None)
        .await
        .unwrap();

    // Fast path failed on the store, so the turn went through the model.
    assert!(reply.used_llm);
    assert_eq!(reply.query_type, QueryType::Property);
    assert_eq!(reply.data_results.total, 0);
    assert!(reply.data_results.properties.is_empty());
    assert!(!reply.suggestions.is_empty());
    assert_eq!(reply.suggestions[0], "Try a different budget");

    let kinds: Vec<Call> = h.llm.calls().iter().map(|(c, _)| *c).collect();
    assert_eq!(kinds, vec![Call::Classify, Call::Reply, Call::Suggest]);

    let (_, history) = h.orchestrator.session_with_history(id).unwrap();
    assert_eq!(history.last().unwrap().id, reply.message_id);
}

#[tokio::test(start_paused = true)]
async fn session_ended_mid_turn_stays_ended() {
    let llm = ScriptedLlm {
        delay: Some(Duration::from_millis(300)),
        ..ScriptedLlm::answering("{}", "Hi! How can I help?", "[]")
    };
    let h = Arc::new(harness_with(llm, |c| c.chat.fast_path_enabled = false));
    let id = siliguri_session(&h);

    let turn = {
        let h = Arc::clone(&h);
        tokio::spawn(async move { h.orchestrator.handle(id, "hello", None).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    h.orchestrator.end_session(id).unwrap();
    let ended = h.sessions.get(id).unwrap().unwrap();

    // The in-flight turn still completes and is recorded.
    let reply = turn.await.unwrap().unwrap();
    assert_eq!(reply.content, "Hi! How can I help?");

    let after = h.sessions.get(id).unwrap().unwrap();
    assert!(!after.is_active);
    assert_eq!(after.expires_at, ended.expires_at);

    let err = h.orchestrator.handle(id, "hello again", None).await.unwrap_err();
    assert_eq!(err.kind(), "session_expired");
}

#[tokio::test(start_paused = true)]
async fn deadline_returns_error_and_records_apology() {
    let llm = ScriptedLlm {
        delay: Some(Duration::from_secs(120)),
        ..ScriptedLlm::answering("{}", "late", "[]")
    };
    let h = harness_with(llm, |c| {
        c.chat.fast_path_enabled = false;
        c.chat.request_deadline_secs = 2;
    });
    let id = siliguri_session(&h);

    let err = h.orchestrator.handle(id, "hello", None).await.unwrap_err();
    assert!(matches!(err, ChatError::DeadlineExceeded(2)));
    assert_eq!(err.kind(), "deadline_exceeded");

    let (_, history) = h.orchestrator.session_with_history(id).unwrap();
    let last = history.last().unwrap();
    assert_eq!(last.role, Role::Assistant);
    assert_eq!(last.content, DEADLINE_APOLOGY);
}

#[tokio::test]
async fn expired_and_unknown_sessions_are_rejected() {
    let h = harness(ScriptedLlm::failing());
    let id = siliguri_session(&h);

    let mut session = h.sessions.get(id).unwrap().unwrap();
    session.expires_at = Utc::now() - chrono::Duration::minutes(1);
    h.sessions.update(&session).unwrap();

    let err = h.orchestrator.handle(id, "hello", None).await.unwrap_err();
    assert!(matches!(err, ChatError::SessionExpired(_)));
    let (_, history) = h.orchestrator.session_with_history(id).unwrap();
    assert_eq!(history.len(), 1);

    let err = h
        .orchestrator
        .handle(uuid::Uuid::new_v4(), "hello", None)
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::SessionNotFound(_)));
}

#[tokio::test]
async fn ended_session_rejects_messages() {
    let h = harness(ScriptedLlm::failing());
    let id = siliguri_session(&h);

    h.orchestrator.end_session(id).unwrap();
    let err = h.orchestrator.handle(id, "hello", None).await.unwrap_err();
    assert_eq!(err.kind(), "session_expired");
    assert!(matches!(
        h.orchestrator.end_session(uuid::Uuid::new_v4()),
        Err(ChatError::SessionNotFound(_))
    ));
}

#[tokio::test]
async fn turn_slides_expiry_window() {
    let h = harness(ScriptedLlm::failing());
    let id = siliguri_session(&h);
    let before = h.sessions.get(id).unwrap().unwrap();

    tokio::time::sleep(Duration::from_millis(5)).await;
    h.orchestrator.handle(id, "hello", None).await.unwrap();

    let after = h.sessions.get(id).unwrap().unwrap();
    assert!(after.expires_at > before.expires_at);
    assert!(after.last_message_at > before.last_message_at);
}

#[tokio::test]
async fn subscribers_see_both_sides_of_a_turn() {
    let h = harness(ScriptedLlm::failing());
    let id = siliguri_session(&h);
    let mut events = h.orchestrator.subscribe();

    h.orchestrator.handle(id, "hello", None).await.unwrap();

    let first = events.recv().await.unwrap();
    let second = events.recv().await.unwrap();
    assert_eq!(first.role, Role::User);
    assert_eq!(first.content, "hello");
    assert_eq!(second.role, Role::Assistant);
    assert_eq!(second.session_id, id);
}

#[tokio::test]
async fn suggestions_endpoint_reads_seeded_store() {
    let h = harness(ScriptedLlm::failing());
    let chips = h.orchestrator.suggestions(QueryType::Property, 3);
    assert_eq!(chips.len(), 3);
    assert_eq!(chips[0], "Show 3BHK apartments for rent");
}

#[tokio::test]
async fn concurrent_turns_on_one_session_all_persist() {
    let h = Arc::new(harness(ScriptedLlm::failing()));
    let id = siliguri_session(&h);

    let tasks: Vec<_> = (0..4)
        .map(|i| {
            let h = Arc::clone(&h);
            tokio::spawn(async move {
                h.orchestrator
                    .handle(id, &format!("{}bhk for rent", i + 1), None)
                    .await
                    .unwrap()
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }

    let (_, history) = h.orchestrator.session_with_history(id).unwrap();
    assert_eq!(history.len(), 1 + 4 * 2);
    for pair in history.windows(2) {
        assert!(pair[0].created_at < pair[1].created_at);
    }
}
