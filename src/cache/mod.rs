//! Response-level cache in front of the generation step.
//!
//! Keys are normalized (caller, model, message, context digest) hashes;
//! entries carry tiered TTLs with popularity extension; the storage policy
//! refuses error-looking text, personal data, and real-time queries.

pub mod key;
pub mod policy;
pub mod store;

pub use key::{build_key, context_hash, normalize_message, ResponseKey};
pub use policy::{CachePolicy, SkipReason, TtlTier};
pub use store::{CachedResponse, ResponseCache, ResponseCacheStats};
