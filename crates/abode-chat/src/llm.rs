//! Chat-completion client and LLM output parsing.
//!
//! `ChatCompletion` is the seam the orchestrator talks to; `LlmClient` is
//! the HTTP implementation. The client never retries: one request, one
//! hard timeout, and the orchestrator decides what a failure means.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use abode_core::config::LlmConfig;
use abode_core::types::{Action, Entities, Intent, ListingType, QueryType};

use crate::error::LlmError;

/// Author of a prompt message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptRole {
    System,
    User,
    Assistant,
}

/// One `{role, content}` record of a prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: PromptRole,
    pub content: String,
}

impl PromptMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: PromptRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: PromptRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: PromptRole::Assistant,
            content: content.into(),
        }
    }
}

/// Sampling parameters sent with every completion.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionParams {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl From<&LlmConfig> for CompletionParams {
    fn from(config: &LlmConfig) -> Self {
        Self {
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        }
    }
}

/// A remote chat-completion engine.
#[async_trait]
pub trait ChatCompletion: Send + Sync {
    /// Return the assistant text for the given prompt.
    async fn complete(
        &self,
        messages: &[PromptMessage],
        params: &CompletionParams,
    ) -> Result<String, LlmError>;
}

/// HTTP client for an OpenAI-compatible chat-completion endpoint.
pub struct LlmClient {
    client: Client,
    api_key: Option<String>,
    api_url: String,
}

impl LlmClient {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            api_key: config
                .api_key
                .as_ref()
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty()),
            api_url: config.api_url.clone(),
        })
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }
}

#[async_trait]
impl ChatCompletion for LlmClient {
    async fn complete(
        &self,
        messages: &[PromptMessage],
        params: &CompletionParams,
    ) -> Result<String, LlmError> {
        let api_key = self.api_key.as_deref().ok_or(LlmError::Unconfigured)?;

        let body = json!({
            "model": params.model,
            "messages": messages,
            "max_tokens": params.max_tokens,
            "temperature": params.temperature,
        });

        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if status != StatusCode::OK {
            warn!(status = status.as_u16(), "LLM upstream returned an error status");
            return Err(LlmError::Upstream {
                status: status.as_u16(),
                body: text,
            });
        }

        let parsed: serde_json::Value =
            serde_json::from_str(&text).map_err(|_| LlmError::Upstream {
                status: status.as_u16(),
                body: text.clone(),
            })?;

        let content = parsed["choices"]
            .get(0)
            .and_then(|choice| choice["message"]["content"].as_str())
            .ok_or(LlmError::EmptyResponse)?;

        debug!(chars = content.len(), "LLM completion received");
        Ok(content.to_string())
    }
}

// =============================================================================
// Output parsing
// =============================================================================

/// Locate the outermost `open`..`close` span in model output, ignoring any
/// markdown code fence around it.
fn extract_span(raw: &str, open: char, close: char) -> Option<&str> {
    let start = raw.find(open)?;
    let end = raw.rfind(close)?;
    (end > start).then(|| &raw[start..=end])
}

/// Classification emitted by the structured-parse call.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct StructuredQuery {
    #[serde(default, rename = "type")]
    pub query_type: Option<String>,
    #[serde(default, alias = "action")]
    pub intent: Option<String>,
    #[serde(default)]
    pub entities: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub filters: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub confidence: Option<f32>,
}

/// Parse the structured-parse reply. Anything that is not a JSON object
/// with a recognisable `type` is `llm_malformed_json`.
pub fn parse_structured(raw: &str) -> Result<StructuredQuery, LlmError> {
    let span = extract_span(raw, '{', '}')
        .ok_or_else(|| LlmError::MalformedJson("no JSON object in output".to_string()))?;
    let query: StructuredQuery =
        serde_json::from_str(span).map_err(|e| LlmError::MalformedJson(e.to_string()))?;
    match query.query_type.as_deref().map(str::parse::<QueryType>) {
        Some(Ok(_)) => Ok(query),
        _ => Err(LlmError::MalformedJson("missing or unknown 'type'".to_string())),
    }
}

/// Parse a JSON array of strings, as requested from the suggestion call.
pub fn parse_string_array(raw: &str) -> Result<Vec<String>, LlmError> {
    let span = extract_span(raw, '[', ']')
        .ok_or_else(|| LlmError::MalformedJson("no JSON array in output".to_string()))?;
    serde_json::from_str(span).map_err(|e| LlmError::MalformedJson(e.to_string()))
}

impl StructuredQuery {
    /// Merge the model's classification over the rule-based `fallback`.
    ///
    /// Values the model omits or gets wrong keep the rule-based reading.
    pub fn into_intent(self, fallback: &Intent) -> Intent {
        let query_type = self
            .query_type
            .as_deref()
            .and_then(|t| t.parse().ok())
            .unwrap_or(fallback.query_type);
        let action = self
            .intent
            .as_deref()
            .and_then(|a| a.parse::<Action>().ok())
            .unwrap_or(fallback.action);

        let lookup = |key: &str| self.entities.get(key).or_else(|| self.filters.get(key));
        let text = |key: &str| {
            lookup(key)
                .and_then(|v| v.as_str())
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        let number = |key: &str| {
            lookup(key).and_then(|v| {
                v.as_u64()
                    .or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
            })
        };

        let parsed = Entities {
            location: text("location").or_else(|| text("city")),
            bedrooms: number("bedrooms")
                .filter(|n| (1..=10).contains(n))
                .map(|n| n as u8),
            budget: number("budget").or_else(|| number("max_price")),
            listing_type: text("listing_type").and_then(|t| t.parse::<ListingType>().ok()),
            service_category: text("service_category").and_then(|c| c.parse().ok()),
            property_type: text("property_type"),
        };
        let mut entities = parsed;
        entities.fill_from(&fallback.entities);

        Intent {
            query_type,
            action,
            entities,
            confidence: self
                .confidence
                .filter(|c| c.is_finite())
                .map(|c| c.clamp(0.0, 1.0))
                .unwrap_or(fallback.confidence),
            original_text: fallback.original_text.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use abode_core::types::ServiceCategory;

    fn fallback() -> Intent {
        Intent {
            query_type: QueryType::Property,
            action: Action::Rent,
            entities: Entities {
                location: Some("Siliguri".to_string()),
                bedrooms: Some(3),
                ..Entities::default()
            },
            confidence: 0.8,
            original_text: "3bhk rent".to_string(),
        }
    }

    #[test]
    fn test_prompt_message_serializes_lowercase_role() {
        let value = serde_json::to_value(PromptMessage::system("be brief")).unwrap();
        assert_eq!(value, json!({"role": "system", "content": "be brief"}));
    }

    #[test]
    fn test_unconfigured_client() {
        let client = LlmClient::new(&LlmConfig::default()).unwrap();
        assert!(!client.is_configured());

        let config = LlmConfig {
            api_key: Some("  ".to_string()),
            ..LlmConfig::default()
        };
        assert!(!LlmClient::new(&config).unwrap().is_configured());
    }

    #[tokio::test]
    async fn test_unconfigured_short_circuits() {
        let client = LlmClient::new(&LlmConfig::default()).unwrap();
        let err = client
            .complete(
                &[PromptMessage::user("hi")],
                &CompletionParams::from(&LlmConfig::default()),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "llm_unconfigured");
    }

    #[test]
    fn test_parse_structured_plain() {
        let q = parse_structured(
            r#"{"type":"property","intent":"sale","entities":{"bedrooms":2},"confidence":0.95}"#,
        )
        .unwrap();
        assert_eq!(q.query_type.as_deref(), Some("property"));
        assert_eq!(q.intent.as_deref(), Some("sale"));
    }

    #[test]
    fn test_parse_structured_with_fence() {
        let raw = "Sure!\n```json\n{\"type\": \"service\", \"entities\": {}}\n```";
        let q = parse_structured(raw).unwrap();
        assert_eq!(q.query_type.as_deref(), Some("service"));
    }

    #[test]
    fn test_parse_structured_malformed() {
        for raw in ["not json at all", "{type: property}", r#"{"type": "castle"}"#, "{}"] {
            let err = parse_structured(raw).unwrap_err();
            assert_eq!(err.kind(), "llm_malformed_json", "raw: {}", raw);
        }
    }

    #[test]
    fn test_parse_string_array() {
        let raw = "Here you go: [\"Show 2BHK\", \"Book a plumber\"]";
        assert_eq!(
            parse_string_array(raw).unwrap(),
            vec!["Show 2BHK".to_string(), "Book a plumber".to_string()]
        );
        assert!(parse_string_array("[1, 2]").is_err());
        assert!(parse_string_array("none").is_err());
    }

    #[test]
    fn test_into_intent_overrides_and_fills() {
        let q = parse_structured(
            r#"{"type":"property","intent":"sale","entities":{"budget":"5000000"},
                "filters":{"city":"Kolkata"},"confidence":1.7}"#,
        )
        .unwrap();
        let intent = q.into_intent(&fallback());
        assert_eq!(intent.action, Action::Sale);
        assert_eq!(intent.entities.budget, Some(5_000_000));
        assert_eq!(intent.entities.location.as_deref(), Some("Kolkata"));
        // Kept from the rule-based reading.
        assert_eq!(intent.entities.bedrooms, Some(3));
        assert!((intent.confidence - 1.0).abs() < f32::EPSILON);
        assert_eq!(intent.original_text, "3bhk rent");
    }

    #[test]
    fn test_into_intent_rejects_bad_values() {
        let q = parse_structured(
            r#"{"type":"service","intent":"teleport","entities":{"bedrooms":40,
                "service_category":"cleaning","listing_type":"lease"}}"#,
        )
        .unwrap();
        let intent = q.into_intent(&fallback());
        assert_eq!(intent.query_type, QueryType::Service);
        assert_eq!(intent.action, Action::Rent);
        assert_eq!(intent.entities.bedrooms, Some(3));
        assert_eq!(intent.entities.service_category, Some(ServiceCategory::Cleaning));
        assert!(intent.entities.listing_type.is_none());
        assert!((intent.confidence - 0.8).abs() < f32::EPSILON);
    }
}
