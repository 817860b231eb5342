//! Gateway configuration, read from the environment at startup.

use std::collections::HashMap;
use std::env;
use std::time::Duration;

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_f64(key: &str, default: f64) -> f64 {
    env::var(key)
        .ok()
        .and_then(|s| s.parse::<f64>().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .map(|s| matches!(s.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}

/// Per-provider credentials and ceilings.
#[derive(Debug, Clone)]
pub struct ProviderCredentials {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    /// Per-provider max-output-token ceiling; falls back to the global one.
    pub max_output_tokens: Option<u32>,
}

impl ProviderCredentials {
    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }
}

/// Admission limits.
#[derive(Debug, Clone)]
pub struct AdmissionConfig {
    /// Token bucket capacity per caller.
    pub bucket_capacity: f64,
    /// Tokens per second of continuous refill.
    pub refill_rate: f64,
    /// Maximum concurrent streams per caller.
    pub max_concurrent: u32,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            bucket_capacity: 10.0,
            refill_rate: 1.0,
            max_concurrent: 2,
        }
    }
}

/// Deadlines for the context fan-out, one per source.
#[derive(Debug, Clone)]
pub struct ContextDeadlines {
    pub recall: Duration,
    pub web_search: Duration,
    pub ingestion: Duration,
}

impl Default for ContextDeadlines {
    fn default() -> Self {
        Self {
            recall: Duration::from_millis(2000),
            web_search: Duration::from_millis(3000),
            ingestion: Duration::from_millis(1000),
        }
    }
}

/// Timing knobs for the streaming coordinator.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Per-candidate first-chunk probe timeout.
    pub probe_timeout: Duration,
    /// Budget for the fast-preface race.
    pub preface_budget: Duration,
    /// Preface is merged only when it beat this latency.
    pub preface_fast_threshold: Duration,
    /// Output-token cap for the preface generation.
    pub preface_max_tokens: u32,
    /// `slow_start` is emitted once when TTFB exceeds this.
    pub ttfb_soft_threshold: Duration,
    /// Total injection-poll window.
    pub injection_window: Duration,
    /// Period between injection polls.
    pub injection_poll_period: Duration,
    /// Flush the wire buffer when this much time has passed...
    pub flush_interval: Duration,
    /// ...or this many bytes are buffered, whichever comes first.
    pub flush_bytes: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            probe_timeout: Duration::from_millis(3000),
            preface_budget: Duration::from_millis(400),
            preface_fast_threshold: Duration::from_millis(350),
            preface_max_tokens: 32,
            ttfb_soft_threshold: Duration::from_millis(2000),
            injection_window: Duration::from_millis(5000),
            injection_poll_period: Duration::from_millis(200),
            flush_interval: Duration::from_millis(50),
            flush_bytes: 16 * 1024,
        }
    }
}

/// Feature flags.
#[derive(Debug, Clone)]
pub struct FeatureFlags {
    pub web_search: bool,
    pub hybrid_retrieval: bool,
    pub memory_events: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            web_search: true,
            hybrid_retrieval: true,
            memory_events: false,
        }
    }
}

/// Top-level gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub bind_addr: String,
    pub providers: HashMap<String, ProviderCredentials>,
    pub global_max_output_tokens: u32,
    pub admission: AdmissionConfig,
    pub context_deadlines: ContextDeadlines,
    pub stream: StreamConfig,
    pub features: FeatureFlags,
    /// Upstream request timeout for provider HTTP clients.
    pub provider_http_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            providers: HashMap::new(),
            global_max_output_tokens: 4096,
            admission: AdmissionConfig::default(),
            context_deadlines: ContextDeadlines::default(),
            stream: StreamConfig::default(),
            features: FeatureFlags::default(),
            provider_http_timeout: Duration::from_secs(30),
        }
    }
}

/// Providers the gateway knows how to talk to. Credentials are looked up as
/// `<NAME>_API_KEY` in the environment; an unset key leaves the provider
/// unconfigured and it is filtered out of candidate lists.
pub const KNOWN_PROVIDERS: &[&str] = &["openai", "anthropic", "groq"];

impl GatewayConfig {
    pub fn from_env() -> Self {
        let mut providers = HashMap::new();
        for name in KNOWN_PROVIDERS {
            let upper = name.to_uppercase();
            providers.insert(
                name.to_string(),
                ProviderCredentials {
                    api_key: env::var(format!("{}_API_KEY", upper)).ok(),
                    base_url: env::var(format!("{}_BASE_URL", upper)).ok(),
                    max_output_tokens: env::var(format!("{}_MAX_OUTPUT_TOKENS", upper))
                        .ok()
                        .and_then(|s| s.parse::<u32>().ok()),
                },
            );
        }

        let admission = AdmissionConfig {
            bucket_capacity: env_f64("GATEWAY_RATE_CAPACITY", 10.0),
            refill_rate: env_f64("GATEWAY_RATE_REFILL_PER_SEC", 1.0),
            max_concurrent: env_u64("GATEWAY_MAX_CONCURRENT_PER_CALLER", 2) as u32,
        };

        let stream = StreamConfig {
            probe_timeout: Duration::from_millis(env_u64("GATEWAY_PROBE_TIMEOUT_MS", 3000)),
            preface_budget: Duration::from_millis(env_u64("GATEWAY_PREFACE_BUDGET_MS", 400)),
            preface_fast_threshold: Duration::from_millis(env_u64(
                "GATEWAY_PREFACE_FAST_MS",
                350,
            )),
            preface_max_tokens: env_u64("GATEWAY_PREFACE_MAX_TOKENS", 32) as u32,
            ttfb_soft_threshold: Duration::from_millis(env_u64("GATEWAY_TTFB_SOFT_MS", 2000)),
            injection_window: Duration::from_millis(env_u64("GATEWAY_INJECTION_WINDOW_MS", 5000)),
            injection_poll_period: Duration::from_millis(env_u64(
                "GATEWAY_INJECTION_POLL_MS",
                200,
            )),
            flush_interval: Duration::from_millis(env_u64("GATEWAY_FLUSH_INTERVAL_MS", 50)),
            flush_bytes: env_u64("GATEWAY_FLUSH_BYTES", 16 * 1024) as usize,
        };

        Self {
            bind_addr: env::var("GATEWAY_BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".into()),
            providers,
            global_max_output_tokens: env_u64("GATEWAY_MAX_OUTPUT_TOKENS", 4096) as u32,
            admission,
            context_deadlines: ContextDeadlines {
                recall: Duration::from_millis(env_u64("GATEWAY_RECALL_DEADLINE_MS", 2000)),
                web_search: Duration::from_millis(env_u64("GATEWAY_WEB_DEADLINE_MS", 3000)),
                ingestion: Duration::from_millis(env_u64("GATEWAY_INGEST_DEADLINE_MS", 1000)),
            },
            stream,
            features: FeatureFlags {
                web_search: env_bool("GATEWAY_ENABLE_WEB_SEARCH", true),
                hybrid_retrieval: env_bool("GATEWAY_ENABLE_HYBRID_RETRIEVAL", true),
                memory_events: env_bool("GATEWAY_ENABLE_MEMORY_EVENTS", false),
            },
            provider_http_timeout: Duration::from_secs(env_u64("GATEWAY_HTTP_TIMEOUT_SECS", 30)),
        }
    }

    /// Resolved output-token ceiling for one provider.
    pub fn max_output_tokens_for(&self, provider: &str) -> u32 {
        self.providers
            .get(provider)
            .and_then(|p| p.max_output_tokens)
            .unwrap_or(self.global_max_output_tokens)
            .min(self.global_max_output_tokens)
    }

    /// Names of providers with credentials present.
    pub fn configured_providers(&self) -> Vec<String> {
        self.providers
            .iter()
            .filter(|(_, c)| c.is_configured())
            .map(|(n, _)| n.clone())
            .collect()
    }
}
