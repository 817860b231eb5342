//! Storage policy: what may be cached, and for how long.

use std::time::Duration;

/// TTL tiers for cached answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlTier {
    /// Default, 15 minutes.
    Short,
    /// "How do I" style answers, 30 minutes.
    Medium,
    /// Stable knowledge answers, 60 minutes.
    Long,
}

impl TtlTier {
    pub fn duration(&self) -> Duration {
        match self {
            TtlTier::Short => Duration::from_secs(15 * 60),
            TtlTier::Medium => Duration::from_secs(30 * 60),
            TtlTier::Long => Duration::from_secs(60 * 60),
        }
    }
}

/// Why a `set` was refused. Not an error; a deliberate policy decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    ErrorLike,
    PersonalData,
    RealTime,
}

const ERROR_MARKERS: &[&str] = &[
    "error",
    "something went wrong",
    "unable to process",
    "request failed",
    "internal server",
];

const TEMPORAL_KEYWORDS: &[&str] = &[
    "today",
    "right now",
    "currently",
    "latest",
    "breaking",
    "this week",
    "tonight",
    "weather",
    "stock price",
    "live score",
];

const KNOWLEDGE_PREFIXES: &[&str] = &["what is", "what are", "who is", "who was", "define", "explain"];

const HOWTO_PREFIXES: &[&str] = &["how do i", "how to", "how can i", "how does"];

/// Exclusion filters plus TTL classification for the response cache.
pub struct CachePolicy {
    email: regex::Regex,
    phone: regex::Regex,
    card: regex::Regex,
}

impl CachePolicy {
    pub fn new() -> Self {
        // Patterns follow common PII filters: email, US-style phone, and
        // card-number-like digit runs.
        Self {
            email: regex::Regex::new(r"[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}")
                .expect("email pattern"),
            phone: regex::Regex::new(
                r"(?:\+?1[-.\s]?)?\(?[0-9]{3}\)?[-.\s]?[0-9]{3}[-.\s]?[0-9]{4}",
            )
            .expect("phone pattern"),
            card: regex::Regex::new(r"\b(?:\d[ -]?){13,19}\b").expect("card pattern"),
        }
    }

    /// Decide whether a generated answer may be stored at all.
    pub fn check(&self, query: &str, response: &str) -> Result<(), SkipReason> {
        let lower = response.to_lowercase();
        if ERROR_MARKERS.iter().any(|m| lower.contains(m)) {
            return Err(SkipReason::ErrorLike);
        }
        if self.contains_personal_data(response) {
            return Err(SkipReason::PersonalData);
        }
        let q = query.to_lowercase();
        if TEMPORAL_KEYWORDS.iter().any(|k| q.contains(k)) {
            return Err(SkipReason::RealTime);
        }
        Ok(())
    }

    fn contains_personal_data(&self, text: &str) -> bool {
        self.email.is_match(text)
            || self.card.is_match(text)
            || self
                .phone
                .find_iter(text)
                .any(|m| m.as_str().chars().filter(|c| c.is_ascii_digit()).count() >= 10)
    }

    /// TTL tier by query shape.
    pub fn classify(&self, query: &str) -> TtlTier {
        let q = query.trim().to_lowercase();
        if KNOWLEDGE_PREFIXES.iter().any(|p| q.starts_with(p)) {
            TtlTier::Long
        } else if HOWTO_PREFIXES.iter().any(|p| q.starts_with(p)) {
            TtlTier::Medium
        } else {
            TtlTier::Short
        }
    }
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email_refused() {
        let policy = CachePolicy::new();
        assert_eq!(
            policy.check("q", "reach me at alice@example.com"),
            Err(SkipReason::PersonalData)
        );
    }

    #[test]
    fn test_card_number_refused() {
        let policy = CachePolicy::new();
        assert_eq!(
            policy.check("q", "card 4111 1111 1111 1111 expires soon"),
            Err(SkipReason::PersonalData)
        );
    }

    #[test]
    fn test_error_looking_response_refused() {
        let policy = CachePolicy::new();
        assert_eq!(
            policy.check("q", "Sorry, something went wrong upstream."),
            Err(SkipReason::ErrorLike)
        );
    }

    #[test]
    fn test_realtime_query_refused() {
        let policy = CachePolicy::new();
        assert_eq!(
            policy.check("what's the weather in Oslo", "Sunny."),
            Err(SkipReason::RealTime)
        );
    }

    #[test]
    fn test_clean_answer_accepted() {
        let policy = CachePolicy::new();
        assert!(policy.check("what is rust", "A systems language.").is_ok());
    }

    #[test]
    fn test_ttl_classification() {
        let policy = CachePolicy::new();
        assert_eq!(policy.classify("What is the capital of France?"), TtlTier::Long);
        assert_eq!(policy.classify("How do I sort a vec?"), TtlTier::Medium);
        assert_eq!(policy.classify("tell me a joke"), TtlTier::Short);
    }
}
