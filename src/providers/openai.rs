//! OpenAI-compatible chat/completions driver.
//!
//! Also serves any provider speaking the same wire format (Groq and friends)
//! under a different name and base URL.

use super::{body_stream, sse_json_frames, Provider, TokenStream};
use crate::error::{Error, ErrorContext};
use crate::tokens::{
    CachingEstimator, CharacterEstimator, TokenEstimator, ESTIMATE_CACHE_ENTRIES,
};
use crate::types::{GenerationOptions, Message};
use crate::Result;
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAiProvider {
    name: String,
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    // Re-sent histories dominate estimate traffic; memoize per-text counts.
    estimator: CachingEstimator,
}

impl OpenAiProvider {
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
                Box::new(CharacterEstimator::new()),
                ESTIMATE_CACHE_ENTRIES,
            ),
        })
    }

    fn build_body(messages: &[Message], model: &str, opts: &GenerationOptions) -> Value {
        let msgs: Vec<Value> = messages
            .iter()
            .map(|m| json!({ "role": m.role.as_str(), "content": m.content }))
            .collect();
        let mut body = json!({
            "model": model,
            "messages": msgs,
            "stream": true,
            "max_tokens": opts.max_tokens,
        });
        if let Some(t) = opts.temperature {
            body["temperature"] = json!(t);
        }
        body
    }
}

/// Extract the delta text from one chat/completions stream frame.
fn delta_text(frame: &Value) -> Option<String> {
    frame
        .get("choices")?
        .get(0)?
        .get("delta")?
        .get("content")?
        .as_str()
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn open(
        &self,
        messages: &[Message],
        model: &str,
        opts: &GenerationOptions,
    ) -> Result<TokenStream> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = Self::build_body(messages, model, opts);

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
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
        let url = format!("{}/models", self.base_url);
        self.client
            .get(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(Error::Transport)?
            .error_for_status()
            .map_err(|e| {
                Error::runtime_with_context(
                    format!("warm-up rejected: {}", e),
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
    fn test_delta_text_extraction() {
        let frame = json!({
            "choices": [{"delta": {"content": "Hello"}}]
        });
        assert_eq!(delta_text(&frame), Some("Hello".to_string()));
    }

    #[test]
    fn test_delta_text_skips_role_frames() {
        let frame = json!({
            "choices": [{"delta": {"role": "assistant"}}]
        });
        assert_eq!(delta_text(&frame), None);
        let empty = json!({
            "choices": [{"delta": {"content": ""}}]
        });
        assert_eq!(delta_text(&empty), None);
    }

    #[test]
    fn test_estimate_memo_matches_bare_estimator() {
        let provider = OpenAiProvider::new("openai", "k", None, Duration::from_secs(5)).unwrap();
        let messages = vec![Message::system("shared prompt"), Message::user("hi there")];
        let bare = CharacterEstimator::new().count_messages(&messages);
        assert_eq!(provider.estimate(&messages, "gpt-4o-mini"), bare);
        // Second call is served from the memo and stays identical.
        assert_eq!(provider.estimate(&messages, "gpt-4o-mini"), bare);
    }

    #[test]
    fn test_body_includes_stream_and_ceiling() {
        let body = OpenAiProvider::build_body(
            &[Message::user("hi")],
            "gpt-4o-mini",
            &GenerationOptions {
                max_tokens: 256,
                temperature: Some(0.2),
            },
        );
        assert_eq!(body["stream"], true);
        assert_eq!(body["max_tokens"], 256);
        assert_eq!(body["temperature"], 0.2);
        assert_eq!(body["messages"][0]["role"], "user");
    }
}
