//! Context aggregation: parallel, deadline-boxed fetches from the recall,
//! web-search, and ingestion collaborators, merged into one bundle.
//!
//! `gather` never fails. A source that errors or overruns its deadline
//! contributes its empty value; partial results are success.

pub mod sources;

use crate::config::{ContextDeadlines, FeatureFlags};
use crate::types::ChatRequest;
use serde::Serialize;
use sources::{IngestedDoc, IngestionService, MemoryItem, RecallService, WebAnswer, WebSearchService};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, warn};

const BUNDLE_TTL: Duration = Duration::from_secs(5 * 60);
const BUNDLE_CACHE_CAP: usize = 100;

/// Which collaborators contributed something non-empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextSource {
    Memory,
    Web,
    Ingested,
}

/// Merged context for one request.
#[derive(Debug, Clone, Default)]
pub struct ContextBundle {
    pub memories: Vec<MemoryItem>,
    pub web_summary: Option<String>,
    pub web_sources: Vec<String>,
    pub ingested: Vec<IngestedDoc>,
    pub sources: BTreeSet<ContextSource>,
}

impl ContextBundle {
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Total byte size of the aggregated context, used by the router's
    /// large-context rule.
    pub fn size_bytes(&self) -> usize {
        let memories: usize = self.memories.iter().map(|m| m.content.len()).sum();
        let web = self.web_summary.as_deref().map(str::len).unwrap_or(0);
        let ingested: usize = self
            .ingested
            .iter()
            .map(|d| d.title.len() + d.summary.len())
            .sum();
        memories + web + ingested
    }

    /// Flattened text, used for the response-cache context digest.
    pub fn as_text(&self) -> String {
        let mut out = String::new();
        for m in &self.memories {
            out.push_str(&m.content);
            out.push('\n');
        }
        if let Some(ref web) = self.web_summary {
            out.push_str(web);
            out.push('\n');
        }
        for d in &self.ingested {
            out.push_str(&d.title);
            out.push('\n');
            out.push_str(&d.summary);
            out.push('\n');
        }
        out
    }
}

struct CachedBundle {
    bundle: ContextBundle,
    expires_at: Instant,
}

/// Fans out to the three collaborators under per-source deadlines and caches
/// the merged bundle briefly.
pub struct ContextAggregator {
    recall: Arc<dyn RecallService>,
    web: Arc<dyn WebSearchService>,
    ingestion: Arc<dyn IngestionService>,
    deadlines: ContextDeadlines,
    features: FeatureFlags,
    cache: Mutex<HashMap<String, CachedBundle>>,
}

impl ContextAggregator {
    pub fn new(
        recall: Arc<dyn RecallService>,
        web: Arc<dyn WebSearchService>,
        ingestion: Arc<dyn IngestionService>,
        deadlines: ContextDeadlines,
        features: FeatureFlags,
    ) -> Self {
        Self {
            recall,
            web,
            ingestion,
            deadlines,
            features,
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn cache_key(request: &ChatRequest) -> String {
        format!(
            "{}|{}|{}",
            request.caller_id,
            request.conversation_id,
            request.message_prefix()
        )
    }

    /// Gather context for one request. Infallible; every sub-fetch failure
    /// degrades to an empty contribution for that source.
    pub async fn gather(&self, request: &ChatRequest) -> ContextBundle {
        let key = Self::cache_key(request);
        {
            let cache = self.cache.lock().expect("bundle cache poisoned");
            if let Some(cached) = cache.get(&key) {
                if cached.expires_at > Instant::now() {
                    debug!(key = %key, "context bundle cache hit");
                    return cached.bundle.clone();
                }
            }
        }

        let recall_fut = async {
            if !self.features.hybrid_retrieval {
                return Vec::new();
            }
            match timeout(
                self.deadlines.recall,
                self.recall.recall(
                    &request.caller_id,
                    &request.conversation_id,
                    &request.message,
                    self.deadlines.recall,
                ),
            )
            .await
            {
                Ok(Ok(items)) => items,
                Ok(Err(e)) => {
                    warn!(error = %e, "recall fetch degraded");
                    Vec::new()
                }
                Err(_) => {
                    warn!(deadline_ms = self.deadlines.recall.as_millis() as u64, "recall fetch timed out");
                    Vec::new()
                }
            }
        };

        let web_fut = async {
            if !self.features.web_search {
                return None;
            }
            match timeout(self.deadlines.web_search, self.web.synthesize(&request.message)).await {
                Ok(Ok(answer)) => answer,
                Ok(Err(e)) => {
                    warn!(error = %e, "web search degraded");
                    None
                }
                Err(_) => {
                    warn!(deadline_ms = self.deadlines.web_search.as_millis() as u64, "web search timed out");
                    None
                }
            }
        };

        let ingestion_fut = async {
            match timeout(self.deadlines.ingestion, self.ingestion.lookup(&request.message)).await {
                Ok(Ok(docs)) => docs,
                Ok(Err(e)) => {
                    warn!(error = %e, "ingestion lookup degraded");
                    Vec::new()
                }
                Err(_) => {
                    warn!(deadline_ms = self.deadlines.ingestion.as_millis() as u64, "ingestion lookup timed out");
                    Vec::new()
                }
            }
        };

        let (memories, web, ingested) = tokio::join!(recall_fut, web_fut, ingestion_fut);
        let (web_summary, web_sources) = match web {
            Some(WebAnswer { summary, sources }) => (Some(summary), sources),
            None => (None, Vec::new()),
        };

        let mut sources = BTreeSet::new();
        if !memories.is_empty() {
            sources.insert(ContextSource::Memory);
        }
        if web_summary.as_deref().map(|s| !s.is_empty()).unwrap_or(false) {
            sources.insert(ContextSource::Web);
        }
        if !ingested.is_empty() {
            sources.insert(ContextSource::Ingested);
        }

        let bundle = ContextBundle {
            memories,
            web_summary,
            web_sources,
            ingested,
            sources,
        };

        let mut cache = self.cache.lock().expect("bundle cache poisoned");
        cache.insert(
            key,
            CachedBundle {
                bundle: bundle.clone(),
                expires_at: Instant::now() + BUNDLE_TTL,
            },
        );
        // Over the bound: keep the entries with the furthest-out expiry.
        if cache.len() > BUNDLE_CACHE_CAP {
            let mut expiries: Vec<(String, Instant)> = cache
                .iter()
                .map(|(k, v)| (k.clone(), v.expires_at))
                .collect();
            expiries.sort_by_key(|(_, exp)| *exp);
            let excess = cache.len() - BUNDLE_CACHE_CAP;
            for (k, _) in expiries.into_iter().take(excess) {
                cache.remove(&k);
            }
        }

        bundle
    }

    pub fn cached_bundles(&self) -> usize {
        self.cache.lock().expect("bundle cache poisoned").len()
    }

    /// Emit a memory event for one completed exchange. Gated on the
    /// `memory_events` feature flag; failures are logged, never surfaced.
    pub async fn record_exchange(
        &self,
        caller_id: &str,
        conversation_id: &str,
        user_text: &str,
        assistant_text: &str,
    ) {
        if !self.features.memory_events {
            return;
        }
        if let Err(e) = self
            .recall
            .record(caller_id, conversation_id, user_text, assistant_text)
            .await
        {
            warn!(error = %e, "memory event emission failed");
        }
    }
}
