//! Incoming chat request, immutable once admitted.

use serde::{Deserialize, Serialize};

/// Classifier-supplied complexity hint. The classifier itself lives outside
/// the gateway; a missing hint defaults to [`Complexity::Simple`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    #[default]
    Simple,
    Complex,
}

/// Classifier-supplied intent hint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryIntent {
    #[default]
    Chat,
    /// The answer needs an external lookup (handled upstream of the provider).
    Lookup,
}

/// One chat request as accepted at the gateway surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub caller_id: String,
    pub conversation_id: String,
    pub message: String,
    /// Explicitly requested provider; tried after the router's optimal pick.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub complexity: Complexity,
    #[serde(default)]
    pub intent: QueryIntent,
}

impl ChatRequest {
    pub fn new(
        caller_id: impl Into<String>,
        conversation_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            caller_id: caller_id.into(),
            conversation_id: conversation_id.into(),
            message: message.into(),
            provider: None,
            model: None,
            max_tokens: None,
            temperature: None,
            complexity: Complexity::Simple,
            intent: QueryIntent::Chat,
        }
    }

    /// Prefix used for the context-bundle cache key.
    pub fn message_prefix(&self) -> &str {
        let end = self
            .message
            .char_indices()
            .nth(100)
            .map(|(i, _)| i)
            .unwrap_or(self.message.len());
        &self.message[..end]
    }
}

/// Generation options resolved for one provider attempt.
#[derive(Debug, Clone, Default)]
pub struct GenerationOptions {
    pub max_tokens: u32,
    pub temperature: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_on_deserialize() {
        let req: ChatRequest = serde_json::from_str(
            r#"{"caller_id":"u1","conversation_id":"c1","message":"hi"}"#,
        )
        .unwrap();
        assert_eq!(req.complexity, Complexity::Simple);
        assert_eq!(req.intent, QueryIntent::Chat);
        assert!(req.provider.is_none());
    }

    #[test]
    fn test_message_prefix_bounds() {
        let short = ChatRequest::new("u", "c", "short");
        assert_eq!(short.message_prefix(), "short");

        let long = ChatRequest::new("u", "c", "x".repeat(250));
        assert_eq!(long.message_prefix().len(), 100);
    }

    #[test]
    fn test_message_prefix_multibyte_safe() {
        let req = ChatRequest::new("u", "c", "é".repeat(150));
        // 100 two-byte chars, sliced on a char boundary.
        assert_eq!(req.message_prefix().chars().count(), 100);
    }
}
