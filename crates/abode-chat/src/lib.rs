//! Assisted query pipeline for the Abode marketplace chatbot.
//!
//! A rule-based intent detector and templated renderer answer common
//! questions without leaving the process; complex or failed turns fall back
//! to a remote chat-completion model. The orchestrator sequences both paths
//! and persists every turn through the session store.

pub mod error;
pub mod fetcher;
pub mod llm;
pub mod orchestrator;
pub mod parser;
pub mod prompt;
pub mod response;
pub mod suggestions;

pub use error::{ChatError, LlmError};
pub use fetcher::{DataFetcher, DataResults};
pub use llm::{ChatCompletion, CompletionParams, LlmClient, PromptMessage, PromptRole};
pub use orchestrator::{ChatOrchestrator, NextStep, Reply};
pub use parser::IntentDetector;
pub use response::TemplateData;
