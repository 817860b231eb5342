//! Response-cache key generation.

use sha2::{Digest, Sha256};

/// Hashed cache key for one (caller, model, message, context) tuple.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResponseKey(String);

impl ResponseKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ResponseKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lowercase, trim, and collapse runs of whitespace so trivially different
/// phrasings of the same message share a key.
pub fn normalize_message(message: &str) -> String {
    message
        .trim()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Digest of the aggregated context, so answers built on different context
/// never collide.
pub fn context_hash(context_text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(context_text.as_bytes());
    hex_digest(hasher)
}

pub fn build_key(caller_id: &str, model: &str, message: &str, context_digest: &str) -> ResponseKey {
    let canonical = format!(
        "{}\n{}\n{}\n{}",
        caller_id,
        model,
        normalize_message(message),
        context_digest
    );
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    ResponseKey(hex_digest(hasher))
}

fn hex_digest(hasher: Sha256) -> String {
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalization_collapses_whitespace() {
        assert_eq!(normalize_message("  What's   2+2? "), "what's 2+2?");
    }

    #[test]
    fn test_same_inputs_same_key() {
        let ctx = context_hash("bundle");
        let a = build_key("u1", "m", "What's 2+2?", &ctx);
        let b = build_key("u1", "m", "  what's 2+2?  ", &ctx);
        assert_eq!(a, b);
    }

    #[test]
    fn test_key_varies_by_dimension() {
        let ctx = context_hash("bundle");
        let base = build_key("u1", "m", "q", &ctx);
        assert_ne!(base, build_key("u2", "m", "q", &ctx));
        assert_ne!(base, build_key("u1", "other", "q", &ctx));
        assert_ne!(base, build_key("u1", "m", "q", &context_hash("other")));
    }
}
