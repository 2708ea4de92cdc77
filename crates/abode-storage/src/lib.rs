//! Abode Storage crate - SQLite persistence for listings and chat sessions.
//!
//! Provides a WAL-mode SQLite database with versioned migrations, the
//! property listing read model behind the `ListingStore` trait, and the
//! session store holding conversations, context and suggestion seeds.

pub mod db;
pub mod listings;
pub mod migrations;
pub mod sessions;

pub use db::Database;
pub use listings::{ListingRepository, ListingStore, MAX_SEARCH_ROWS};
pub use sessions::SessionRepository;
