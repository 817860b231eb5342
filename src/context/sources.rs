//! Boundary traits for the external context collaborators.
//!
//! All three services live outside the gateway. Each must tolerate being
//! unreachable; the aggregator treats any error or timeout as an empty
//! contribution.

use crate::error::Error;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Storage tier a recalled memory came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryTier {
    Working,
    Recent,
    LongTerm,
}

/// One ranked memory item from the recall service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryItem {
    pub content: String,
    pub tier: MemoryTier,
    #[serde(default)]
    pub kind: Option<String>,
}

/// One ingested-document hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestedDoc {
    pub title: String,
    pub summary: String,
    pub source: String,
}

/// A synthesized web answer with the pages it was drawn from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebAnswer {
    pub summary: String,
    #[serde(default)]
    pub sources: Vec<String>,
}

/// Long-horizon recall over the conversation history.
#[async_trait]
pub trait RecallService: Send + Sync {
    async fn recall(
        &self,
        caller_id: &str,
        conversation_id: &str,
        query: &str,
        deadline: Duration,
    ) -> Result<Vec<MemoryItem>, Error>;

    /// Feed one completed exchange back so future recalls can surface it.
    /// Services without a write path keep the default no-op.
    async fn record(
        &self,
        _caller_id: &str,
        _conversation_id: &str,
        _user_text: &str,
        _assistant_text: &str,
    ) -> Result<(), Error> {
        Ok(())
    }
}

/// Web-search synthesis: a summary with sources, or nothing.
#[async_trait]
pub trait WebSearchService: Send + Sync {
    async fn synthesize(&self, query: &str) -> Result<Option<WebAnswer>, Error>;
}

/// Lookup over previously ingested documents.
#[async_trait]
pub trait IngestionService: Send + Sync {
    async fn lookup(&self, query: &str) -> Result<Vec<IngestedDoc>, Error>;
}

/// No-op collaborators, used when a feature is disabled or a real service is
/// not wired in.
pub struct NullRecall;
pub struct NullWebSearch;
pub struct NullIngestion;

#[async_trait]
impl RecallService for NullRecall {
    async fn recall(
        &self,
        _caller_id: &str,
        _conversation_id: &str,
        _query: &str,
        _deadline: Duration,
    ) -> Result<Vec<MemoryItem>, Error> {
        Ok(Vec::new())
    }
}

#[async_trait]
impl WebSearchService for NullWebSearch {
    async fn synthesize(&self, _query: &str) -> Result<Option<WebAnswer>, Error> {
        Ok(None)
    }
}

#[async_trait]
impl IngestionService for NullIngestion {
    async fn lookup(&self, _query: &str) -> Result<Vec<IngestedDoc>, Error> {
        Ok(Vec::new())
    }
}
