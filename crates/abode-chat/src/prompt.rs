//! Prompt assembly for the LLM path.
//!
//! Every prompt is a plain `Vec<PromptMessage>` built by a pure function, so
//! the exact text sent upstream can be asserted in tests.

use abode_core::types::{Intent, Message, QueryType, Role, SessionContext};

use crate::fetcher::DataResults;
use crate::llm::PromptMessage;
use crate::response::{describe_filters, format_inr, truncate};

pub const SYSTEM_PREAMBLE: &str = "You are the Abode assistant for an Indian real-estate and \
home-services marketplace. Answer briefly and concretely in plain text with light markdown. \
Only mention listings, prices and providers that appear in the data you are given. Never \
invent contact details.";

const CLASSIFY_INSTRUCTIONS: &str = "Classify the user's message for a property and services \
marketplace. Reply with a single JSON object and nothing else, using the keys: \
\"type\" (one of property, service, project, general), \"intent\" (one of rent, sale, book, \
info, search), \"entities\" (object with optional location, bedrooms, budget in rupees, \
listing_type, service_category, property_type), \"filters\" (object) and \"confidence\" \
(number between 0 and 1).";

const SUGGEST_INSTRUCTIONS: &str = "Suggest up to 5 short follow-up messages the user might \
send next. Reply with a JSON array of strings and nothing else. Each suggestion must be under \
8 words.";

/// Bounds applied while assembling a reply prompt.
#[derive(Debug, Clone, Copy)]
pub struct PromptLimits {
    pub max_history_turns: usize,
    pub max_listings: usize,
}

/// Inputs to the reply prompt for one turn.
#[derive(Debug, Clone, Copy)]
pub struct ReplyPromptInputs<'a> {
    /// Prior turns, oldest first, excluding the current utterance.
    pub history: &'a [Message],
    pub intent: &'a Intent,
    pub data: &'a DataResults,
    pub user_text: &'a str,
}

/// Build the reply prompt: preamble, recent history, per-type instructions,
/// data summary, then the user's text.
pub fn build_reply_prompt(inputs: &ReplyPromptInputs<'_>, limits: PromptLimits) -> Vec<PromptMessage> {
    let mut messages = vec![PromptMessage::system(SYSTEM_PREAMBLE)];

    let skip = inputs.history.len().saturating_sub(limits.max_history_turns);
    for turn in &inputs.history[skip..] {
        messages.push(match turn.role {
            Role::User => PromptMessage::user(turn.content.clone()),
            Role::Assistant => PromptMessage::assistant(turn.content.clone()),
        });
    }

    messages.push(PromptMessage::system(type_instructions(inputs.intent.query_type)));
    messages.push(PromptMessage::system(summarize_data(
        inputs.intent,
        inputs.data,
        limits.max_listings,
    )));
    messages.push(PromptMessage::user(inputs.user_text));
    messages
}

/// Build the structured-parse prompt. Only typed context fields are shown.
pub fn build_classification_prompt(user_text: &str, context: &SessionContext) -> Vec<PromptMessage> {
    let known = context.known_fields_json();
    let mut system = CLASSIFY_INSTRUCTIONS.to_string();
    if !known.is_empty() {
        system.push_str("\nKnown conversation context: ");
        system.push_str(&serde_json::Value::Object(known).to_string());
    }
    vec![PromptMessage::system(system), PromptMessage::user(user_text)]
}

/// Build the suggestion prompt for a finished turn.
pub fn build_suggestion_prompt(user_text: &str, reply: &str, query_type: QueryType) -> Vec<PromptMessage> {
    vec![
        PromptMessage::system(format!(
            "{} The conversation is about {}.",
            SUGGEST_INSTRUCTIONS,
            match query_type {
                QueryType::Property => "finding a property",
                QueryType::Service => "booking a home service",
                QueryType::Project => "construction projects",
                QueryType::General => "the marketplace in general",
            }
        )),
        PromptMessage::user(user_text),
        PromptMessage::assistant(reply),
    ]
}

fn type_instructions(query_type: QueryType) -> &'static str {
    match query_type {
        QueryType::Property => {
            "The user is looking for a property. Compare and recommend only from the \
             listings in the data summary. If the city, bedroom count or budget is unknown, \
             ask for it at the end of your answer."
        }
        QueryType::Service => {
            "The user wants a home service. Explain how booking works and ask for the \
             service type, city and preferred time if they are missing."
        }
        QueryType::Project => {
            "The user is asking about construction or renovation projects. Give practical, \
             general guidance and offer to connect them with verified contractors."
        }
        QueryType::General => {
            "Answer the user's question about the marketplace. Steer them towards \
             properties, services or projects where it helps."
        }
    }
}

/// Human-readable summary of the fetched data, capped at `max_listings`.
pub fn summarize_data(intent: &Intent, data: &DataResults, max_listings: usize) -> String {
    if intent.query_type != QueryType::Property {
        return match intent.query_type {
            QueryType::Service => "Data: no service providers were fetched for this request.",
            QueryType::Project => "Data: no project records were fetched for this request.",
            _ => "Data: none required for this request.",
        }
        .to_string();
    }

    let filters = data
        .filters
        .as_ref()
        .map(describe_filters)
        .filter(|f| !f.is_empty())
        .unwrap_or_else(|| "no filters".to_string());

    if data.total == 0 {
        return format!("Data: no listings matched ({}).", filters);
    }

    let mut out = format!("Data: {} listings matched ({}).", data.total, filters);
    for (i, listing) in data.properties.iter().take(max_listings).enumerate() {
        let price = listing
            .headline_price()
            .filter(|p| *p > 0)
            .map(|p| format!("₹{}", format_inr(p as u64)))
            .unwrap_or_else(|| "price on request".to_string());
        out.push_str(&format!(
            "\n{}. {} | {}, {} | {} | {} | {} BHK | {}",
            i + 1,
            listing.title,
            listing.city,
            listing.state,
            listing.listing_type,
            price,
            listing
                .bedrooms
                .map(|b| b.to_string())
                .unwrap_or_else(|| "?".to_string()),
            truncate(listing.description.trim(), 100)
        ));
    }
    out
}
