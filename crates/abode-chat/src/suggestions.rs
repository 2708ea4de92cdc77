//! Follow-up suggestion chips.

use std::collections::HashSet;

use abode_core::types::{Action, Intent, QueryType};
use abode_storage::migrations::SEED_SUGGESTIONS;

/// Upper bound on chips returned with any reply.
pub const MAX_SUGGESTIONS: usize = 5;

const RENT_SEEDS: &[&str] = &[
    "Show more rentals",
    "Filter by monthly budget",
    "Change location",
    "Show 2BHK options",
    "Book a site visit",
];

const SALE_SEEDS: &[&str] = &[
    "Show more homes for sale",
    "Filter by price",
    "Change location",
    "Show 3BHK options",
    "Talk to an agent",
];

const SEARCH_SEEDS: &[&str] = &[
    "Show rentals",
    "Show homes for sale",
    "Filter by budget",
    "Change location",
    "Show newest listings",
];

/// Fixed chips for the fast path: keyed on action for property intents and
/// on category otherwise.
pub fn fast_path(intent: &Intent) -> Vec<String> {
    let seeds: Vec<&str> = match (intent.query_type, intent.action) {
        (QueryType::Property, Action::Rent) => RENT_SEEDS.to_vec(),
        (QueryType::Property, Action::Sale) => SALE_SEEDS.to_vec(),
        (QueryType::Property, _) => SEARCH_SEEDS.to_vec(),
        (other, _) => builtin(other),
    };
    seeds.into_iter().take(MAX_SUGGESTIONS).map(str::to_string).collect()
}

/// Built-in seed list for a category, the last-resort fallback.
pub fn builtin(query_type: QueryType) -> Vec<&'static str> {
    SEED_SUGGESTIONS
        .iter()
        .filter(|(category, _)| *category == query_type.as_str())
        .map(|(_, text)| *text)
        .collect()
}

/// Merge suggestion sources in priority order: earlier sources win, later
/// ones only fill remaining slots. Case-insensitive dedup, capped at 5.
pub fn merge<I, S>(sources: I) -> Vec<String>
where
    I: IntoIterator,
    I::Item: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    let mut merged = Vec::with_capacity(MAX_SUGGESTIONS);
    for source in sources {
        for item in source {
            if merged.len() == MAX_SUGGESTIONS {
                return merged;
            }
            let text = item.as_ref().trim();
            if text.is_empty() {
                continue;
            }
            if seen.insert(text.to_lowercase()) {
                merged.push(text.to_string());
            }
        }
    }
    merged
}
