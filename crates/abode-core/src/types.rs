use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// Enums
// =============================================================================

/// Marketplace vertical an utterance is about.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    Property,
    Service,
    Project,
    #[default]
    General,
}

impl QueryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryType::Property => "property",
            QueryType::Service => "service",
            QueryType::Project => "project",
            QueryType::General => "general",
        }
    }
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueryType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "property" | "properties" => Ok(QueryType::Property),
            "service" | "services" => Ok(QueryType::Service),
            "project" | "projects" => Ok(QueryType::Project),
            "general" => Ok(QueryType::General),
            other => Err(format!("unknown query type '{}'", other)),
        }
    }
}

/// What the user wants to do within a vertical.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Rent,
    Sale,
    Book,
    Info,
    Search,
}

impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "rent" => Ok(Action::Rent),
            "sale" | "buy" => Ok(Action::Sale),
            "book" => Ok(Action::Book),
            "info" => Ok(Action::Info),
            "search" => Ok(Action::Search),
            other => Err(format!("unknown action '{}'", other)),
        }
    }
}

/// Listing kind of a property.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListingType {
    Rent,
    Sale,
}

impl ListingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListingType::Rent => "rent",
            ListingType::Sale => "sale",
        }
    }
}

impl fmt::Display for ListingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ListingType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "rent" | "rental" => Ok(ListingType::Rent),
            "sale" | "buy" => Ok(ListingType::Sale),
            other => Err(format!("unknown listing type '{}'", other)),
        }
    }
}

/// Bookable service categories, in alphabetical order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceCategory {
    Carpentry,
    Cleaning,
    Electrical,
    Maintenance,
    Painting,
    Plumbing,
}

impl ServiceCategory {
    pub const ALL: [ServiceCategory; 6] = [
        ServiceCategory::Carpentry,
        ServiceCategory::Cleaning,
        ServiceCategory::Electrical,
        ServiceCategory::Maintenance,
        ServiceCategory::Painting,
        ServiceCategory::Plumbing,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceCategory::Carpentry => "carpentry",
            ServiceCategory::Cleaning => "cleaning",
            ServiceCategory::Electrical => "electrical",
            ServiceCategory::Maintenance => "maintenance",
            ServiceCategory::Painting => "painting",
            ServiceCategory::Plumbing => "plumbing",
        }
    }
}

impl fmt::Display for ServiceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        ServiceCategory::ALL
            .into_iter()
            .find(|c| c.as_str() == lower)
            .ok_or_else(|| format!("unknown service category '{}'", s))
    }
}

/// Author of a persisted chat turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => Err(format!("unknown role '{}'", other)),
        }
    }
}

// =============================================================================
// Intent
// =============================================================================

/// Entities recognised in an utterance. Absent signals stay `None`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Entities {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bedrooms: Option<u8>,
    /// Budget in rupees.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listing_type: Option<ListingType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_category: Option<ServiceCategory>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property_type: Option<String>,
}

impl Entities {
    /// Fill every unset entity from `other`, keeping values already present.
    pub fn fill_from(&mut self, other: &Entities) {
        if self.location.is_none() {
            self.location = other.location.clone();
        }
        if self.bedrooms.is_none() {
            self.bedrooms = other.bedrooms;
        }
        if self.budget.is_none() {
            self.budget = other.budget;
        }
        if self.listing_type.is_none() {
            self.listing_type = other.listing_type;
        }
        if self.service_category.is_none() {
            self.service_category = other.service_category;
        }
        if self.property_type.is_none() {
            self.property_type = other.property_type.clone();
        }
    }
}

/// Structured classification of one utterance. Lives for a single turn.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    #[serde(rename = "type")]
    pub query_type: QueryType,
    pub action: Action,
    pub entities: Entities,
    pub confidence: f32,
    pub original_text: String,
}

// =============================================================================
// Session context
// =============================================================================

/// One typed entry of a session's accumulated context.
///
/// Known keys carry checked values; anything else rides in `Extension`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "key", content = "value", rename_all = "snake_case")]
pub enum ContextField {
    Location(String),
    City(String),
    Bedrooms(u8),
    Budget(u64),
    ListingType(ListingType),
    PropertyType(String),
    ServiceCategory(ServiceCategory),
    Extension {
        name: String,
        value: serde_json::Value,
    },
}

impl ContextField {
    /// The context key this field occupies.
    pub fn key(&self) -> &str {
        match self {
            ContextField::Location(_) => "location",
            ContextField::City(_) => "city",
            ContextField::Bedrooms(_) => "bedrooms",
            ContextField::Budget(_) => "budget",
            ContextField::ListingType(_) => "listing_type",
            ContextField::PropertyType(_) => "property_type",
            ContextField::ServiceCategory(_) => "service_category",
            ContextField::Extension { name, .. } => name,
        }
    }

    /// Parse a raw `key => value` pair from a client payload.
    ///
    /// Known keys must carry a value of the right shape.
    pub fn parse(key: &str, value: &serde_json::Value) -> Result<Self, String> {
        let field = match key {
            "location" => ContextField::Location(non_empty_string(key, value)?),
            "city" => ContextField::City(non_empty_string(key, value)?),
            "property_type" => ContextField::PropertyType(non_empty_string(key, value)?),
            "bedrooms" => {
                let n = unsigned(key, value)?;
                if !(1..=10).contains(&n) {
                    return Err(format!("'bedrooms' must be between 1 and 10, got {}", n));
                }
                ContextField::Bedrooms(n as u8)
            }
            "budget" => ContextField::Budget(unsigned(key, value)?),
            "listing_type" => ContextField::ListingType(
                non_empty_string(key, value)?
                    .parse()
                    .map_err(|e| format!("'listing_type': {}", e))?,
            ),
            "service_category" => ContextField::ServiceCategory(
                non_empty_string(key, value)?
                    .parse()
                    .map_err(|e| format!("'service_category': {}", e))?,
            ),
            other => ContextField::Extension {
                name: other.to_string(),
                value: value.clone(),
            },
        };
        Ok(field)
    }

    fn to_json(&self) -> serde_json::Value {
        match self {
            ContextField::Location(s) | ContextField::City(s) | ContextField::PropertyType(s) => {
                serde_json::Value::from(s.as_str())
            }
            ContextField::Bedrooms(n) => serde_json::Value::from(*n),
            ContextField::Budget(n) => serde_json::Value::from(*n),
            ContextField::ListingType(t) => serde_json::Value::from(t.as_str()),
            ContextField::ServiceCategory(c) => serde_json::Value::from(c.as_str()),
            ContextField::Extension { value, .. } => value.clone(),
        }
    }
}

fn non_empty_string(key: &str, value: &serde_json::Value) -> Result<String, String> {
    match value.as_str().map(str::trim) {
        Some(s) if !s.is_empty() => Ok(s.to_string()),
        _ => Err(format!("'{}' must be a non-empty string", key)),
    }
}

fn unsigned(key: &str, value: &serde_json::Value) -> Result<u64, String> {
    if let Some(n) = value.as_u64() {
        return Ok(n);
    }
    value
        .as_str()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .ok_or_else(|| format!("'{}' must be a non-negative integer", key))
}

/// Accumulated filters and state attached to a session.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionContext {
    fields: Vec<ContextField>,
}

impl SessionContext {
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn fields(&self) -> &[ContextField] {
        &self.fields
    }

    pub fn get(&self, key: &str) -> Option<&ContextField> {
        self.fields.iter().find(|f| f.key() == key)
    }

    /// Insert or replace the field occupying the same key.
    pub fn set(&mut self, field: ContextField) {
        match self.fields.iter_mut().find(|f| f.key() == field.key()) {
            Some(slot) => *slot = field,
            None => self.fields.push(field),
        }
    }

    pub fn remove(&mut self, key: &str) {
        self.fields.retain(|f| f.key() != key);
    }

    /// Merge a client-supplied JSON object. `null` clears a key.
    pub fn merge_json(
        &mut self,
        map: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<(), String> {
        // Validate everything before mutating so a bad payload changes nothing.
        let mut parsed = Vec::with_capacity(map.len());
        for (key, value) in map {
            if value.is_null() {
                parsed.push((key.as_str(), None));
            } else {
                parsed.push((key.as_str(), Some(ContextField::parse(key, value)?)));
            }
        }
        for (key, field) in parsed {
            match field {
                Some(field) => self.set(field),
                None => self.remove(key),
            }
        }
        Ok(())
    }

    /// Write the entities recognised this turn into the context.
    pub fn absorb_entities(&mut self, entities: &Entities) {
        if let Some(ref location) = entities.location {
            self.set(ContextField::City(location.clone()));
        }
        if let Some(n) = entities.bedrooms {
            self.set(ContextField::Bedrooms(n));
        }
        if let Some(n) = entities.budget {
            self.set(ContextField::Budget(n));
        }
        if let Some(t) = entities.listing_type {
            self.set(ContextField::ListingType(t));
        }
        if let Some(ref t) = entities.property_type {
            self.set(ContextField::PropertyType(t.clone()));
        }
        if let Some(c) = entities.service_category {
            self.set(ContextField::ServiceCategory(c));
        }
    }

    /// Entities implied by the context, used to fill gaps in a new utterance.
    pub fn as_entities(&self) -> Entities {
        Entities {
            location: self.city().map(str::to_string),
            bedrooms: self.bedrooms(),
            budget: self.budget(),
            listing_type: self.listing_type(),
            service_category: self.service_category(),
            property_type: match self.get("property_type") {
                Some(ContextField::PropertyType(t)) => Some(t.clone()),
                _ => None,
            },
        }
    }

    /// City filter, falling back to the free-form location.
    pub fn city(&self) -> Option<&str> {
        match self.get("city") {
            Some(ContextField::City(c)) => Some(c.as_str()),
            _ => match self.get("location") {
                Some(ContextField::Location(l)) => Some(l.as_str()),
                _ => None,
            },
        }
    }

    pub fn bedrooms(&self) -> Option<u8> {
        match self.get("bedrooms") {
            Some(ContextField::Bedrooms(n)) => Some(*n),
            _ => None,
        }
    }

    pub fn budget(&self) -> Option<u64> {
        match self.get("budget") {
            Some(ContextField::Budget(n)) => Some(*n),
            _ => None,
        }
    }

    pub fn listing_type(&self) -> Option<ListingType> {
        match self.get("listing_type") {
            Some(ContextField::ListingType(t)) => Some(*t),
            _ => None,
        }
    }

    pub fn service_category(&self) -> Option<ServiceCategory> {
        match self.get("service_category") {
            Some(ContextField::ServiceCategory(c)) => Some(*c),
            _ => None,
        }
    }

    /// Flat view restricted to the typed fields. Extension values are
    /// never included.
    pub fn known_fields_json(&self) -> serde_json::Map<String, serde_json::Value> {
        self.fields
            .iter()
            .filter(|f| !matches!(f, ContextField::Extension { .. }))
            .map(|f| (f.key().to_string(), f.to_json()))
            .collect()
    }
}

// =============================================================================
// Session and messages
// =============================================================================

/// One conversation with a sliding expiry window.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Option<String>,
    /// Default location for entity extraction. May be empty.
    pub location: String,
    pub context: SessionContext,
    pub last_query_type: QueryType,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub last_message_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    /// A session is expired once `now` passes `expires_at` or it was ended.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        !self.is_active || self.expires_at < now
    }
}

/// Inputs for creating a session.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct SessionSeed {
    pub user_id: Option<String>,
    pub location: Option<String>,
    pub context: SessionContext,
}

/// Compact listing of a session for overview endpoints.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: Uuid,
    pub user_id: Option<String>,
    pub last_query_type: QueryType,
    pub is_active: bool,
    pub message_count: u64,
    pub last_message_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// One persisted chat turn. Immutable after write.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub session_id: Uuid,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
    /// Assistant turns only.
    pub processing_time_ms: Option<u64>,
    pub context_snapshot: SessionContext,
    pub data_results: serde_json::Value,
    pub suggestions: Vec<String>,
}

impl Message {
    /// Build a new user turn. `created_at` is assigned by the store.
    pub fn user(session_id: Uuid, content: &str, context: &SessionContext) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            role: Role::User,
            content: content.to_string(),
            created_at: Utc::now(),
            processing_time_ms: None,
            context_snapshot: context.clone(),
            data_results: serde_json::Value::Null,
            suggestions: Vec::new(),
        }
    }

    /// Build a new assistant turn. `created_at` is assigned by the store.
    pub fn assistant(session_id: Uuid, content: &str, context: &SessionContext) -> Self {
        Self {
            role: Role::Assistant,
            ..Self::user(session_id, content, context)
        }
    }
}

// =============================================================================
// Listings
// =============================================================================

/// A property record from the listing read model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    pub id: String,
    pub title: String,
    pub description: String,
    pub monthly_rent: Option<i64>,
    pub sale_price: Option<i64>,
    pub bedrooms: Option<i64>,
    pub bathrooms: Option<i64>,
    pub area: Option<f64>,
    pub city: String,
    pub state: String,
    pub address: String,
    pub listing_type: String,
    pub property_type: String,
    pub images: Vec<String>,
    pub status: String,
    pub is_approved: bool,
    pub created_at: DateTime<Utc>,
}

impl Listing {
    /// The price that matters for this listing's kind.
    pub fn headline_price(&self) -> Option<i64> {
        if self.listing_type == ListingType::Sale.as_str() {
            self.sale_price.or(self.monthly_rent)
        } else {
            self.monthly_rent.or(self.sale_price)
        }
    }
}

/// Which price column a budget is compared against.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceField {
    MonthlyRent,
    SalePrice,
    #[default]
    Either,
}

/// Filters applied to a property search, echoed back to the client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PropertyFilters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listing_type: Option<ListingType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bedrooms: Option<u8>,
    pub property_type: String,
    /// Case-insensitive substring match on the city column.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_price: Option<u64>,
    #[serde(default)]
    pub price_field: PriceField,
}

impl Default for PropertyFilters {
    fn default() -> Self {
        Self {
            listing_type: None,
            bedrooms: None,
            property_type: "residential".to_string(),
            city: None,
            max_price: None,
            price_field: PriceField::Either,
        }
    }
}

/// Result of a property search.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PropertySearch {
    pub listings: Vec<Listing>,
    /// Number of rows matching the filters, before the row cap.
    pub total: u64,
    pub applied_filters: PropertyFilters,
}
