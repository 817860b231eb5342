//! Anthropic messages-API driver.
//!
//! Differences from the OpenAI shape that matter here: system text is a
//! top-level `system` parameter, auth is `x-api-key` plus a version header,
//! and stream frames are typed events where only `content_block_delta`
//! carries text.

use super::{body_stream, sse_json_frames, Provider, TokenStream};
use crate::error::{Error, ErrorContext};
use crate::tokens::{AnthropicEstimator, CachingEstimator, TokenEstimator, ESTIMATE_CACHE_ENTRIES};
use crate::types::{GenerationOptions, Message, MessageRole};
use crate::Result;
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    name: String,
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    estimator: CachingEstimator,
}

impl AnthropicProvider {
    pub fn new(
        name: impl Into<String>,
        api_key: impl Into<String>,
        base_url: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(8)
            .build()
            .map_err(Error::Transport)?;
        Ok(Self {
            name: name.into(),
            client,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_key: api_key.into(),
            estimator: CachingEstimator::new(
                Box::new(AnthropicEstimator::new()),
                ESTIMATE_CACHE_ENTRIES,
            ),
        })
    }

    /// System messages become the top-level `system` parameter.
    fn split_messages(messages: &[Message]) -> (Option<String>, Vec<Value>) {
        let mut system_parts = Vec::new();
        let mut turns = Vec::new();
        for m in messages {
            match m.role {
                MessageRole::System => system_parts.push(m.content.clone()),
                _ => turns.push(json!({
                    "role": m.role.as_str(),
                    "content": m.content,
                })),
            }
        }
        let system = if system_parts.is_empty() {
            None
        } else {
            Some(system_parts.join("\n\n"))
        };
        (system, turns)
    }

    fn build_body(messages: &[Message], model: &str, opts: &GenerationOptions) -> Value {
        let (system, turns) = Self::split_messages(messages);
        let mut body = json!({
            "model": model,
            "messages": turns,
            "max_tokens": opts.max_tokens,
            "stream": true,
        });
        if let Some(system) = system {
            body["system"] = json!(system);
        }
        if let Some(t) = opts.temperature {
            body["temperature"] = json!(t);
        }
        body
    }
}

/// Text from one messages-API stream frame; only delta events carry any.
fn delta_text(frame: &Value) -> Option<String> {
    if frame.get("type")?.as_str()? != "content_block_delta" {
        return None;
    }
    frame
        .get("delta")?
        .get("text")?
        .as_str()
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn open(
        &self,
        messages: &[Message],
        model: &str,
        opts: &GenerationOptions,
    ) -> Result<TokenStream> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = Self::build_body(messages, model, opts);

        let resp = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("accept", "text/event-stream")
            .json(&body)
            .send()
            .await
            .map_err(Error::Transport)?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Stream {
                provider: self.name.clone(),
                message: format!("HTTP {}: {}", status, truncate(&body, 200)),
            });
        }

        let chunks = sse_json_frames(body_stream(resp)).filter_map(|r| async move {
            match r {
                Ok(frame) => delta_text(&frame).map(Ok),
                Err(e) => Some(Err(e)),
            }
        });
        Ok(Box::pin(chunks))
    }

    fn estimate(&self, messages: &[Message], _model: &str) -> usize {
        self.estimator.count_messages(messages)
    }

    async fn warm_up(&self) -> Result<()> {
        // The messages endpoint has no cheap GET; a HEAD against the base URL
        // verifies DNS/TLS and primes the connection pool.
        self.client.head(&self.base_url).send().await.map_err(|e| {
            Error::runtime_with_context(
                format!("warm-up failed: {}", e),
                ErrorContext::new().with_source(self.name.clone()),
            )
        })?;
        Ok(())
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_messages_lifted() {
        let messages = vec![
            Message::system("be brief"),
            Message::user("hi"),
            Message::assistant("hello"),
        ];
        let (system, turns) = AnthropicProvider::split_messages(&messages);
        assert_eq!(system.as_deref(), Some("be brief"));
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0]["role"], "user");
    }

    #[test]
    fn test_delta_text_ignores_non_delta_events() {
        assert_eq!(delta_text(&json!({"type": "message_start"})), None);
        assert_eq!(
            delta_text(&json!({
                "type": "content_block_delta",
                "delta": {"type": "text_delta", "text": "Hi"}
            })),
            Some("Hi".to_string())
        );
    }

    #[test]
    fn test_estimate_memo_matches_bare_estimator() {
        let provider =
            AnthropicProvider::new("anthropic", "k", None, Duration::from_secs(5)).unwrap();
        let messages = vec![Message::user("the quick brown fox")];
        let bare = AnthropicEstimator::new().count_messages(&messages);
        assert_eq!(provider.estimate(&messages, "claude-3-5-sonnet"), bare);
        assert_eq!(provider.estimate(&messages, "claude-3-5-sonnet"), bare);
    }

    #[test]
    fn test_body_requires_max_tokens() {
        let body = AnthropicProvider::build_body(
            &[Message::user("hi")],
            "claude-3-5-sonnet",
            &GenerationOptions {
                max_tokens: 512,
                temperature: None,
            },
        );
        assert_eq!(body["max_tokens"], 512);
        assert_eq!(body["stream"], true);
        assert!(body.get("temperature").is_none());
    }
}
