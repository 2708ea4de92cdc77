//! Template renderer for fast-path replies.
//!
//! Produces plain text with markdown-style emphasis from an intent and the
//! fetched data. Pure: no I/O and no randomness.

use abode_core::types::{Intent, Listing, ListingType, PropertyFilters, QueryType};

use crate::fetcher::DataResults;

/// Listings shown inline before the "and N more" tail.
pub const MAX_RENDERED_LISTINGS: usize = 3;

/// Description length cap, in characters.
pub const DESCRIPTION_LIMIT: usize = 100;

pub const GREETING: &str = "Hello! I'm the Abode assistant. I can help you find homes to rent \
or buy, book home services, and learn about ongoing projects. What are you looking for today?";

pub const HELP: &str = "Here's what I can do:\n\
- **Properties**: try \"2bhk for rent in Siliguri under 15k\"\n\
- **Services**: try \"book a plumber\" or \"need home cleaning\"\n\
- **Projects**: try \"show ongoing construction projects\"\n\
Tell me your city, bedrooms and budget and I'll narrow things down.";

pub const WELCOME: &str = "Welcome to Abode! Ask me about homes for rent or sale, home \
services, or construction projects.";

/// Reply used when the language model is unavailable or fails.
pub const LLM_APOLOGY: &str = "Sorry, I couldn't work that one out right now. Could you \
rephrase it as a simpler request, like \"2bhk for rent in Siliguri\"?";

/// Reply used when a turn runs past its deadline.
pub const DEADLINE_APOLOGY: &str =
    "Sorry, that took longer than expected. Please try again in a moment.";

static GREETING_WORDS: &[&str] = &["hello", "hi", "hey", "hiya", "namaste", "greetings"];

/// Inputs to the renderer for one turn.
#[derive(Debug, Clone, Copy)]
pub struct TemplateData<'a> {
    pub data: &'a DataResults,
    pub missing: &'a [&'static str],
}

/// Render the fast-path reply for an intent.
pub fn render(intent: &Intent, template: &TemplateData<'_>) -> String {
    match intent.query_type {
        QueryType::Property => render_property(template),
        QueryType::Service => render_service(intent),
        QueryType::Project => render_project(),
        QueryType::General => render_general(&intent.original_text),
    }
}

fn render_property(template: &TemplateData<'_>) -> String {
    let data = template.data;

    if !template.missing.is_empty() {
        let mut out = format!(
            "To narrow down the search, could you tell me {}?",
            join_fields(template.missing)
        );
        if data.total > 0 {
            out.push_str(&format!(
                " Meanwhile I found {} {} that might fit.",
                data.total,
                plural(data.total, "listing", "listings")
            ));
        }
        return out;
    }

    if data.total == 0 {
        let echo = data
            .filters
            .as_ref()
            .map(describe_filters)
            .unwrap_or_default();
        return if echo.is_empty() {
            "I couldn't find any properties right now. Try a different city or budget.".to_string()
        } else {
            format!(
                "I couldn't find any properties matching {}. Try a different city, \
                 bedroom count or a higher budget.",
                echo
            )
        };
    }

    let mut out = format!(
        "I found {} {}",
        data.total,
        plural(data.total, "property", "properties")
    );
    match data.filters.as_ref().map(describe_filters) {
        Some(echo) if !echo.is_empty() => out.push_str(&format!(" matching {}:\n", echo)),
        _ => out.push_str(":\n"),
    }

    let shown = data.properties.iter().take(MAX_RENDERED_LISTINGS);
    let shown_count = shown.len();
    for (i, listing) in shown.enumerate() {
        out.push('\n');
        out.push_str(&render_listing(i + 1, listing));
    }

    let remaining = data.total.saturating_sub(shown_count as u64);
    if remaining > 0 {
        out.push_str(&format!("\n\n… and {} more", remaining));
    }
    out
}

fn render_listing(index: usize, listing: &Listing) -> String {
    let place = match (listing.city.is_empty(), listing.state.is_empty()) {
        (false, false) => format!("{}, {}", listing.city, listing.state),
        (false, true) => listing.city.clone(),
        (true, false) => listing.state.clone(),
        (true, true) => "Location on request".to_string(),
    };
    let rooms = match (listing.bedrooms, listing.bathrooms) {
        (Some(b), Some(ba)) => format!("{} BHK · {} Bath", b, ba),
        (Some(b), None) => format!("{} BHK", b),
        (None, Some(ba)) => format!("{} Bath", ba),
        (None, None) => String::new(),
    };

    let mut out = format!(
        "**{}. {}**\n{} | {}",
        index,
        listing.title,
        place,
        format_price(listing)
    );
    if !rooms.is_empty() {
        out.push_str(" | ");
        out.push_str(&rooms);
    }
    let description = truncate(listing.description.trim(), DESCRIPTION_LIMIT);
    if !description.is_empty() {
        out.push('\n');
        out.push_str(&description);
    }
    out
}

fn render_service(intent: &Intent) -> String {
    let what = intent
        .entities
        .service_category
        .map(|c| c.as_str())
        .unwrap_or("home service");
    let place = intent
        .entities
        .location
        .as_ref()
        .map(|l| format!(" in {}", l))
        .unwrap_or_default();
    format!(
        "I can help you book a {} professional{}. Share a preferred date and time and \
         we'll connect you with verified providers.",
        what, place
    )
}

fn render_project() -> String {
    "We list residential and commercial construction projects along with verified \
     contractors. Tell me the city and the kind of project you have in mind."
        .to_string()
}

fn render_general(text: &str) -> String {
    let lower = text.to_lowercase();
    let words: Vec<&str> = lower
        .split(|c: char| !c.is_alphabetic())
        .filter(|w| !w.is_empty())
        .collect();

    if words.iter().any(|w| GREETING_WORDS.contains(w)) {
        GREETING.to_string()
    } else {
        HELP.to_string()
    }
}

/// Human-readable summary of the filters used for a search.
pub fn describe_filters(filters: &PropertyFilters) -> String {
    let mut parts = Vec::new();
    if let Some(b) = filters.bedrooms {
        parts.push(format!("{} BHK", b));
    }
    match filters.listing_type {
        Some(ListingType::Rent) => parts.push("for rent".to_string()),
        Some(ListingType::Sale) => parts.push("for sale".to_string()),
        None => {}
    }
    if let Some(ref city) = filters.city {
        parts.push(format!("in {}", city));
    }
    if let Some(max) = filters.max_price {
        parts.push(format!("under ₹{}", format_inr(max)));
    }
    parts.join(", ")
}

fn join_fields(fields: &[&str]) -> String {
    let labels: Vec<&str> = fields
        .iter()
        .map(|f| match *f {
            "location" => "your preferred location",
            "bedrooms" => "how many bedrooms you need",
            "budget" => "your budget",
            other => other,
        })
        .collect();
    match labels.as_slice() {
        [] => String::new(),
        [one] => one.to_string(),
        [init @ .., last] => format!("{} and {}", init.join(", "), last),
    }
}

fn plural<'a>(n: u64, one: &'a str, many: &'a str) -> &'a str {
    if n == 1 {
        one
    } else {
        many
    }
}

fn format_price(listing: &Listing) -> String {
    let is_sale = listing.listing_type == ListingType::Sale.as_str();
    match listing.headline_price() {
        Some(price) if price > 0 && is_sale => format!("₹{}", format_inr(price as u64)),
        Some(price) if price > 0 => format!("₹{}/month", format_inr(price as u64)),
        _ => "Price on request".to_string(),
    }
}

/// Indian digit grouping: 1234567 becomes "12,34,567".
pub fn format_inr(n: u64) -> String {
    let digits = n.to_string();
    if digits.len() <= 3 {
        return digits;
    }
    let (head, tail) = digits.split_at(digits.len() - 3);
    let mut groups: Vec<&str> = Vec::new();
    let mut end = head.len();
    while end > 2 {
        groups.push(&head[end - 2..end]);
        end -= 2;
    }
    groups.push(&head[..end]);
    groups.reverse();
    format!("{},{}", groups.join(","), tail)
}

/// Truncate to at most `limit` characters, marking the cut with an ellipsis.
pub fn truncate(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let mut out: String = text.chars().take(limit.saturating_sub(1)).collect();
    out.push('…');
    out
}
