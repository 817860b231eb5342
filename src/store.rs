//! Conversation store boundary.
//!
//! The durable conversation history lives in an external system; the gateway
//! only reads and appends through this trait. The in-memory implementation
//! backs local serving and tests.

use crate::error::Error;
use crate::types::{Message, MessageRole};
use crate::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Serialize)]
pub struct ConversationSummary {
    pub id: String,
    pub message_count: usize,
    pub last_activity_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoredMessage {
    pub role: MessageRole,
    pub content: String,
    pub created_at_ms: u64,
}

#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn list(&self) -> Result<Vec<ConversationSummary>>;
    async fn messages(&self, conversation_id: &str) -> Result<Vec<StoredMessage>>;
    async fn append(&self, conversation_id: &str, message: Message) -> Result<()>;
    /// Returns whether the conversation existed.
    async fn delete(&self, conversation_id: &str) -> Result<bool>;
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[derive(Default)]
pub struct InMemoryStore {
    conversations: Mutex<HashMap<String, Vec<StoredMessage>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStore for InMemoryStore {
    async fn list(&self) -> Result<Vec<ConversationSummary>> {
        let conversations = self.conversations.lock().expect("store lock poisoned");
        let mut out: Vec<ConversationSummary> = conversations
            .iter()
            .map(|(id, messages)| ConversationSummary {
                id: id.clone(),
                message_count: messages.len(),
                last_activity_ms: messages.last().map(|m| m.created_at_ms).unwrap_or(0),
            })
            .collect();
        out.sort_by(|a, b| b.last_activity_ms.cmp(&a.last_activity_ms));
        Ok(out)
    }

    async fn messages(&self, conversation_id: &str) -> Result<Vec<StoredMessage>> {
        let conversations = self.conversations.lock().expect("store lock poisoned");
        conversations
            .get(conversation_id)
            .cloned()
            .ok_or_else(|| Error::runtime(format!("unknown conversation '{}'", conversation_id)))
    }

    async fn append(&self, conversation_id: &str, message: Message) -> Result<()> {
        let mut conversations = self.conversations.lock().expect("store lock poisoned");
        conversations
            .entry(conversation_id.to_string())
            .or_default()
            .push(StoredMessage {
                role: message.role,
                content: message.content,
                created_at_ms: now_ms(),
            });
        Ok(())
    }

    async fn delete(&self, conversation_id: &str) -> Result<bool> {
        let mut conversations = self.conversations.lock().expect("store lock poisoned");
        Ok(conversations.remove(conversation_id).is_some())
    }
}
