//! Abode API crate - axum HTTP surface for the marketplace chatbot.
//!
//! Exposes session lifecycle, message handling, suggestions and an SSE feed
//! of appended messages, all wrapped in a `{ ok, data, error }` envelope.

pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use routes::create_router;
pub use state::AppState;
