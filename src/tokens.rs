//! Token estimation.
//!
//! Character-ratio estimators in the style of fast client-side accounting:
//! good enough for context budgeting and provider selection, cheap enough for
//! the hot path. Estimates are deterministic for identical input.

use crate::types::Message;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Mutex;

/// Token counting capability. Providers expose this alongside stream opening.
pub trait TokenEstimator: Send + Sync {
    fn count(&self, text: &str) -> usize;

    /// Message-list estimate: per-message framing overhead plus content.
    fn count_messages(&self, messages: &[Message]) -> usize {
        let content: usize = messages.iter().map(|m| self.count(&m.content)).sum();
        content + messages.len() * 3
    }
}

/// Fast approximation: ~4 characters per token.
#[derive(Debug, Clone)]
pub struct CharacterEstimator {
    chars_per_token: f64,
}

impl CharacterEstimator {
    pub fn new() -> Self {
        Self::with_ratio(4.0)
    }

    pub fn with_ratio(chars_per_token: f64) -> Self {
        Self { chars_per_token }
    }
}

impl Default for CharacterEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenEstimator for CharacterEstimator {
    fn count(&self, text: &str) -> usize {
        (text.len() as f64 / self.chars_per_token).ceil() as usize
    }
}

/// Anthropic-style estimate: denser tokenization plus whitespace weighting.
#[derive(Debug, Clone)]
pub struct AnthropicEstimator {
    chars_per_token: f64,
}

impl AnthropicEstimator {
    pub fn new() -> Self {
        Self {
            chars_per_token: 3.5,
        }
    }
}

impl Default for AnthropicEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenEstimator for AnthropicEstimator {
    fn count(&self, text: &str) -> usize {
        let base = (text.len() as f64 / self.chars_per_token).ceil() as usize;
        let ws = text.chars().filter(|c| c.is_whitespace()).count();
        base + (ws as f64 * 0.1) as usize
    }
}

/// Entries kept per driver-level estimate memo.
pub const ESTIMATE_CACHE_ENTRIES: usize = 256;

/// Memoizing wrapper for repeated text (system prompts, re-sent history).
pub struct CachingEstimator {
    inner: Box<dyn TokenEstimator>,
    cache: Mutex<LruCache<String, usize>>,
}

impl CachingEstimator {
    pub fn new(inner: Box<dyn TokenEstimator>, capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity.max(1)).expect("capacity >= 1");
        Self {
            inner,
            cache: Mutex::new(LruCache::new(cap)),
        }
    }
}

impl TokenEstimator for CachingEstimator {
    fn count(&self, text: &str) -> usize {
        {
            let mut cache = self.cache.lock().expect("estimator cache poisoned");
            if let Some(&n) = cache.get(text) {
                return n;
            }
        }
        let n = self.inner.count(text);
        let mut cache = self.cache.lock().expect("estimator cache poisoned");
        cache.put(text.to_string(), n);
        n
    }
}

/// Pick an estimator for a model family.
pub fn estimator_for_model(model: &str) -> Box<dyn TokenEstimator> {
    let m = model.to_lowercase();
    if m.contains("claude") {
        Box::new(AnthropicEstimator::new())
    } else {
        Box::new(CharacterEstimator::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Message;

    #[test]
    fn test_character_estimator_ratio() {
        let est = CharacterEstimator::new();
        assert_eq!(est.count("abcdefgh"), 2);
        assert_eq!(est.count(""), 0);
    }

    #[test]
    fn test_estimate_is_idempotent() {
        let messages = vec![Message::user("What's 2+2?"), Message::assistant("4")];
        let est = CharacterEstimator::new();
        let a = est.count_messages(&messages);
        let b = est.count_messages(&messages);
        assert_eq!(a, b);
        assert!(a > 0);
    }

    #[test]
    fn test_anthropic_estimator_denser() {
        let text = "the quick brown fox jumps over the lazy dog";
        assert!(AnthropicEstimator::new().count(text) >= CharacterEstimator::new().count(text));
    }

    #[test]
    fn test_caching_estimator_consistency() {
        let est = CachingEstimator::new(Box::new(CharacterEstimator::new()), 16);
        let first = est.count("hello world");
        let second = est.count("hello world");
        assert_eq!(first, second);
    }

    #[test]
    fn test_estimator_selection() {
        assert_eq!(estimator_for_model("claude-3").count("abcdefg"), 2);
        assert_eq!(estimator_for_model("gpt-4o").count("abcdefgh"), 2);
    }
}
