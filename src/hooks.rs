//! Completion hooks: persistence, cost accounting, telemetry.
//!
//! All three concerns live outside the gateway. The coordinator fires them on
//! a detached task after the terminal event; a slow or failing hook can never
//! hold the client's response open.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

/// Everything a completion hook gets to see about one finished request.
#[derive(Debug, Clone, Serialize)]
pub struct CompletionRecord {
    pub caller_id: String,
    pub conversation_id: String,
    pub request_message: String,
    pub response_text: String,
    pub provider: String,
    pub model: String,
    pub ttfb_ms: u64,
    pub tokens_per_sec: f64,
    pub token_count: usize,
    /// The answer came from the response cache; no provider was consulted.
    pub served_from_cache: bool,
}

#[async_trait]
pub trait CompletionHooks: Send + Sync {
    async fn on_completion(&self, record: CompletionRecord);
}

/// Default hook set: log and move on.
pub struct NoopHooks;

#[async_trait]
impl CompletionHooks for NoopHooks {
    async fn on_completion(&self, record: CompletionRecord) {
        debug!(
            caller_id = record.caller_id.as_str(),
            provider = record.provider.as_str(),
            token_count = record.token_count,
            "completion recorded"
        );
    }
}

/// Persistence hook backed by the conversation store: writes the user turn
/// and the generated answer after the stream closes.
pub struct PersistingHooks {
    store: Arc<dyn crate::store::ConversationStore>,
}

impl PersistingHooks {
    pub fn new(store: Arc<dyn crate::store::ConversationStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl CompletionHooks for PersistingHooks {
    async fn on_completion(&self, record: CompletionRecord) {
        use crate::types::Message;
        if let Err(e) = self
            .store
            .append(
                &record.conversation_id,
                Message::user(record.request_message.clone()),
            )
            .await
        {
            tracing::warn!(error = %e, "failed to persist user turn");
            return;
        }
        if let Err(e) = self
            .store
            .append(
                &record.conversation_id,
                Message::assistant(record.response_text.clone()),
            )
            .await
        {
            tracing::warn!(error = %e, "failed to persist assistant turn");
        }
    }
}

/// Fire the hooks without blocking the caller.
pub fn fire_detached(hooks: Arc<dyn CompletionHooks>, record: CompletionRecord) {
    tokio::spawn(async move {
        hooks.on_completion(record).await;
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ConversationStore, InMemoryStore};

    fn record() -> CompletionRecord {
        CompletionRecord {
            caller_id: "u1".into(),
            conversation_id: "c1".into(),
            request_message: "What's 2+2?".into(),
            response_text: "4".into(),
            provider: "mock".into(),
            model: "m".into(),
            ttfb_ms: 12,
            tokens_per_sec: 40.0,
            token_count: 1,
            served_from_cache: false,
        }
    }

    #[tokio::test]
    async fn test_persisting_hook_writes_both_turns() {
        let store = Arc::new(InMemoryStore::new());
        let hooks = PersistingHooks::new(store.clone());
        hooks.on_completion(record()).await;
        let messages = store.messages("c1").await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].content, "4");
    }
}

