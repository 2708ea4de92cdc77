//! Rule-based intent detector and entity extractor.
//!
//! Classifies an utterance into a marketplace vertical by counting keyword
//! hits, then pulls bedrooms, budget, service category and city out of the
//! text with fixed regex rules. Never calls out of process.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

use abode_core::types::{Action, Entities, Intent, ListingType, QueryType, ServiceCategory};

// =============================================================================
// Keyword tables
// =============================================================================

static PROPERTY_BAG: &[&str] = &[
    "rent", "rental", "sale", "buy", "property", "house", "apartment", "flat", "bhk", "bedroom",
];

static SERVICE_BAG: &[&str] = &[
    "service", "book", "cleaning", "plumbing", "electrical", "maintenance", "repair", "install",
];

static PROJECT_BAG: &[&str] = &["project", "construction", "build", "contractor", "renovation"];

/// Keywords per service category, evaluated in alphabetical category order.
static SERVICE_KEYWORDS: &[(ServiceCategory, &[&str])] = &[
    (
        ServiceCategory::Carpentry,
        &["carpentry", "carpenter", "furniture", "woodwork"],
    ),
    (
        ServiceCategory::Cleaning,
        &["cleaning", "clean", "cleaner", "maid", "housekeeping"],
    ),
    (
        ServiceCategory::Electrical,
        &["electrical", "electric", "electrician", "wiring"],
    ),
    (ServiceCategory::Maintenance, &["maintenance", "repair", "fix"]),
    (ServiceCategory::Painting, &["painting", "paint", "painter"]),
    (
        ServiceCategory::Plumbing,
        &["plumbing", "plumber", "pipe", "leak", "tap"],
    ),
];

/// Supported cities, lowercase. Longer names precede names they contain.
static CITIES: &[&str] = &[
    "new delhi",
    "navi mumbai",
    "siliguri",
    "jalpaiguri",
    "darjeeling",
    "gangtok",
    "kolkata",
    "durgapur",
    "asansol",
    "guwahati",
    "shillong",
    "agartala",
    "patna",
    "ranchi",
    "bhubaneswar",
    "mumbai",
    "delhi",
    "noida",
    "gurugram",
    "gurgaon",
    "bengaluru",
    "bangalore",
    "mysuru",
    "mysore",
    "chennai",
    "coimbatore",
    "hyderabad",
    "visakhapatnam",
    "pune",
    "nagpur",
    "ahmedabad",
    "surat",
    "vadodara",
    "jaipur",
    "lucknow",
    "kanpur",
    "varanasi",
    "indore",
    "bhopal",
    "chandigarh",
    "dehradun",
    "kochi",
    "thiruvananthapuram",
];

/// Single-word complexity markers.
static COMPLEXITY_WORDS: &[&str] = &[
    "and", "or", "but", "however", "although", "compare", "difference", "better", "best",
    "versus", "similar", "like", "explain", "how", "why", "recommend", "near", "within",
    "around",
];

/// Multi-word complexity markers.
static COMPLEXITY_PHRASES: &[&str] = &["what if", "close to"];

static COMMERCIAL_WORDS: &[&str] = &["commercial", "office", "shop", "warehouse", "showroom"];

/// Utterances longer than this many characters are always complex.
pub const COMPLEX_LENGTH_THRESHOLD: usize = 100;

// =============================================================================
// Compiled regexes
// =============================================================================

static BEDROOM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d+)\s*(?:bhk|bedrooms?\b|beds?\b)").expect("Invalid bedroom regex")
});

/// Budget patterns in evaluation order. Lakh and crore amounts, which sale
/// prices are quoted in, are tried before the rupee and thousand forms.
static BUDGET_PATTERNS: LazyLock<Vec<(Regex, BudgetUnit)>> = LazyLock::new(|| {
    let mk = |p: &str| Regex::new(p).expect("Invalid budget regex");
    vec![
        (mk(r"(\d+(?:\.\d+)?)\s*(?:crores?|cr)\b"), BudgetUnit::Crore),
        (mk(r"(\d+(?:\.\d+)?)\s*(?:lakhs?|lacs?)\b"), BudgetUnit::Lakh),
        (mk(r"(\d+)\s*(k)\b"), BudgetUnit::Suffix),
        (mk(r"(\d+)\s*thousand"), BudgetUnit::Thousand),
        (mk(r"under\s*(\d+)\s*(k\b)?"), BudgetUnit::Suffix),
        (mk(r"max\s*(\d+)\s*(k\b)?"), BudgetUnit::Suffix),
        (mk(r"upto\s*(\d+)\s*(k\b)?"), BudgetUnit::Suffix),
        (mk(r"\b(\d{4,6})\b"), BudgetUnit::Rupees),
    ]
});

#[derive(Clone, Copy)]
enum BudgetUnit {
    /// Multiply by 1000 when a `k` suffix was captured and the number is small.
    Suffix,
    Thousand,
    Rupees,
    Lakh,
    Crore,
}

// =============================================================================
// IntentDetector
// =============================================================================

/// Deterministic rule-based intent detector.
///
/// Holds no mutable state; a single instance is shared across requests.
#[derive(Debug, Default, Clone, Copy)]
pub struct IntentDetector;

impl IntentDetector {
    pub fn new() -> Self {
        Self
    }

    /// Classify an utterance. `default_location` fills the location entity
    /// when the text names no known city.
    pub fn detect(&self, text: &str, default_location: &str) -> Intent {
        let lower = text.trim().to_lowercase();
        if lower.is_empty() {
            return Intent {
                query_type: QueryType::General,
                action: Action::Info,
                entities: self.with_default_location(Entities::default(), default_location),
                confidence: 0.5,
                original_text: text.to_string(),
            };
        }

        let tokens = tokenize(&lower);
        let query_type = classify(&tokens, &lower);

        let mut entities = self.extract_entities(&lower, &tokens);

        let (action, confidence) = match query_type {
            QueryType::Property => {
                let action = if has_any(&tokens, &["rent", "rental"]) {
                    entities.listing_type = Some(ListingType::Rent);
                    Action::Rent
                } else if has_any(&tokens, &["sale", "buy"]) {
                    entities.listing_type = Some(ListingType::Sale);
                    Action::Sale
                } else {
                    Action::Search
                };
                let confidence = if entities.bedrooms.is_some() { 0.9 } else { 0.8 };
                (action, confidence)
            }
            QueryType::Service => (Action::Book, 0.8),
            QueryType::Project => (Action::Info, 0.7),
            QueryType::General => (Action::Info, 0.6),
        };

        Intent {
            query_type,
            action,
            entities: self.with_default_location(entities, default_location),
            confidence,
            original_text: text.to_string(),
        }
    }

    /// True when the utterance should skip the fast path: it is longer than
    /// 100 characters or carries at least two distinct complexity markers.
    pub fn is_complex(&self, text: &str) -> bool {
        if text.chars().count() > COMPLEX_LENGTH_THRESHOLD {
            return true;
        }
        let lower = text.to_lowercase();
        let tokens: HashSet<String> = tokenize(&lower).into_iter().collect();

        let words = COMPLEXITY_WORDS
            .iter()
            .filter(|w| tokens.contains(**w))
            .count();
        let phrases = COMPLEXITY_PHRASES
            .iter()
            .filter(|p| contains_phrase(&lower, p))
            .count();
        words + phrases >= 2
    }

    fn extract_entities(&self, lower: &str, tokens: &[String]) -> Entities {
        Entities {
            location: extract_location(lower),
            bedrooms: extract_bedrooms(lower),
            budget: extract_budget(lower),
            listing_type: None,
            service_category: extract_service_category(tokens),
            property_type: extract_property_type(tokens),
        }
    }

    fn with_default_location(&self, mut entities: Entities, default_location: &str) -> Entities {
        let default_location = default_location.trim();
        if entities.location.is_none() && !default_location.is_empty() {
            entities.location = Some(default_location.to_string());
        }
        entities
    }
}

// =============================================================================
// Classification helpers
// =============================================================================

/// Split on every non-letter character; digits and punctuation are dropped.
fn tokenize(lower: &str) -> Vec<String> {
    lower
        .split(|c: char| !c.is_alphabetic())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Whether `token` (or its singular form) equals `word`.
fn token_matches(token: &str, word: &str) -> bool {
    token == word || token.strip_suffix('s') == Some(word)
}

fn has_any(tokens: &[String], words: &[&str]) -> bool {
    tokens
        .iter()
        .any(|t| words.iter().any(|w| token_matches(t, w)))
}

fn bag_hits(tokens: &[String], bag: &[&str]) -> usize {
    tokens
        .iter()
        .filter(|t| bag.iter().any(|w| token_matches(t, w)))
        .count()
}

fn classify(tokens: &[String], lower: &str) -> QueryType {
    // Any mention of a BHK configuration is a property query.
    if lower.contains("bhk") {
        return QueryType::Property;
    }

    let property = bag_hits(tokens, PROPERTY_BAG);
    let service = bag_hits(tokens, SERVICE_BAG);
    let project = bag_hits(tokens, PROJECT_BAG);

    if property == 0 && service == 0 && project == 0 {
        QueryType::General
    } else if property >= service && property >= project {
        QueryType::Property
    } else if service >= project {
        QueryType::Service
    } else {
        QueryType::Project
    }
}

/// Phrase match bounded by non-letters on both sides.
fn contains_phrase(haystack: &str, phrase: &str) -> bool {
    haystack.match_indices(phrase).any(|(start, _)| {
        let before = haystack[..start].chars().next_back();
        let after = haystack[start + phrase.len()..].chars().next();
        !before.is_some_and(char::is_alphabetic) && !after.is_some_and(char::is_alphabetic)
    })
}

// =============================================================================
// Entity extraction
// =============================================================================

/// First `<n> bhk|bedroom|bed` mention, kept only when 1 <= n <= 10.
pub fn extract_bedrooms(lower: &str) -> Option<u8> {
    let caps = BEDROOM_RE.captures(lower)?;
    let n: u8 = caps.get(1)?.as_str().parse().ok()?;
    (1..=10).contains(&n).then_some(n)
}

/// Budget in rupees from the first matching budget pattern.
pub fn extract_budget(lower: &str) -> Option<u64> {
    for (re, unit) in BUDGET_PATTERNS.iter() {
        let Some(caps) = re.captures(lower) else {
            continue;
        };
        let raw = caps.get(1)?.as_str();
        let value = match unit {
            BudgetUnit::Lakh => scaled(raw, 100_000.0)?,
            BudgetUnit::Crore => scaled(raw, 10_000_000.0)?,
            BudgetUnit::Thousand => raw.parse::<u64>().ok()?.checked_mul(1000)?,
            BudgetUnit::Suffix => {
                let n: u64 = raw.parse().ok()?;
                if caps.get(2).is_some() && n < 1000 {
                    n * 1000
                } else {
                    n
                }
            }
            BudgetUnit::Rupees => raw.parse().ok()?,
        };
        return Some(value);
    }
    None
}

/// A possibly fractional amount ("1.5") times a rupee multiplier.
fn scaled(raw: &str, multiplier: f64) -> Option<u64> {
    let n: f64 = raw.parse().ok()?;
    let value = (n * multiplier).round();
    (value.is_finite() && value >= 0.0 && value <= u64::MAX as f64).then_some(value as u64)
}

/// First category, in alphabetical order, with a keyword in the text.
pub fn extract_service_category(tokens: &[String]) -> Option<ServiceCategory> {
    SERVICE_KEYWORDS
        .iter()
        .find(|(_, words)| has_any(tokens, words))
        .map(|(category, _)| *category)
}

/// First supported city named in the text, in title case.
pub fn extract_location(lower: &str) -> Option<String> {
    CITIES
        .iter()
        .find(|city| contains_phrase(lower, city))
        .map(|city| title_case(city))
}

fn extract_property_type(tokens: &[String]) -> Option<String> {
    if has_any(tokens, COMMERCIAL_WORDS) {
        Some("commercial".to_string())
    } else if has_any(tokens, &["residential"]) {
        Some("residential".to_string())
    } else {
        None
    }
}

fn title_case(s: &str) -> String {
    s.split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
