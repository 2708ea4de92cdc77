//! Domain data fetcher: turns an intent into a listing-store query.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use abode_core::types::{
    Action, Intent, Listing, ListingType, PriceField, PropertyFilters, QueryType,
};
use abode_storage::{ListingStore, MAX_SEARCH_ROWS};

use crate::error::ChatError;

/// Structured payload surfaced with a reply.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataResults {
    pub properties: Vec<Listing>,
    pub total: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filters: Option<PropertyFilters>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub services: Vec<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub projects: Vec<serde_json::Value>,
}

impl DataResults {
    pub fn is_empty(&self) -> bool {
        self.total == 0 && self.services.is_empty() && self.projects.is_empty()
    }
}

/// Dispatches intents to the per-vertical searches.
#[derive(Clone)]
pub struct DataFetcher {
    store: Arc<dyn ListingStore>,
}

impl DataFetcher {
    pub fn new(store: Arc<dyn ListingStore>) -> Self {
        Self { store }
    }

    /// Fetch data for any intent. Only properties are backed by a store.
    pub fn fetch(&self, intent: &Intent) -> Result<DataResults, ChatError> {
        match intent.query_type {
            QueryType::Property => self.search_properties(intent),
            QueryType::Service => Ok(DataResults {
                services: self.search_services(intent),
                ..DataResults::default()
            }),
            QueryType::Project => Ok(DataResults {
                projects: self.search_projects(intent),
                ..DataResults::default()
            }),
            QueryType::General => Ok(DataResults::default()),
        }
    }

    /// Query approved, available listings matching the intent's entities.
    pub fn search_properties(&self, intent: &Intent) -> Result<DataResults, ChatError> {
        let filters = filters_for(intent);
        let search = self.store.search(&filters, MAX_SEARCH_ROWS)?;
        debug!(
            total = search.total,
            returned = search.listings.len(),
            "Fetched properties for intent"
        );
        Ok(DataResults {
            properties: search.listings,
            total: search.total,
            filters: Some(search.applied_filters),
            ..DataResults::default()
        })
    }

    /// Service catalogue is not wired to a store yet.
    pub fn search_services(&self, _intent: &Intent) -> Vec<serde_json::Value> {
        Vec::new()
    }

    /// Project catalogue is not wired to a store yet.
    pub fn search_projects(&self, _intent: &Intent) -> Vec<serde_json::Value> {
        Vec::new()
    }
}

/// Listing filters implied by an intent.
pub fn filters_for(intent: &Intent) -> PropertyFilters {
    let entities = &intent.entities;
    let price_field = match (intent.action, entities.listing_type) {
        (Action::Rent, _) | (_, Some(ListingType::Rent)) => PriceField::MonthlyRent,
        (Action::Sale, _) | (_, Some(ListingType::Sale)) => PriceField::SalePrice,
        _ => PriceField::Either,
    };
    PropertyFilters {
        listing_type: entities.listing_type,
        bedrooms: entities.bedrooms,
        property_type: entities
            .property_type
            .clone()
            .unwrap_or_else(|| "residential".to_string()),
        city: entities.location.clone(),
        max_price: entities.budget,
        price_field,
    }
}

/// Fields a property search still needs from the user, in asking order.
/// Other verticals never ask follow-up questions.
pub fn missing(intent: &Intent) -> Vec<&'static str> {
    if intent.query_type != QueryType::Property {
        return Vec::new();
    }
    let entities = &intent.entities;
    let mut missing = Vec::new();
    if entities.location.is_none() {
        missing.push("location");
    }
    if entities.bedrooms.is_none() {
        missing.push("bedrooms");
    }
    if entities.budget.is_none() {
        missing.push("budget");
    }
    missing
}
