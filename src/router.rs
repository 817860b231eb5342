//! Provider/model selection.
//!
//! A four-rule decision table picks the optimal provider for a request; a
//! weighted cost-benefit ranking backs it up when no table rule applies. The
//! router is pure: it reads only its static profile table and the inputs.

use crate::config::GatewayConfig;
use crate::types::{ChatRequest, Complexity, QueryIntent};
use serde::Serialize;
use tracing::debug;

/// Aggregated context above this many bytes forces the largest-window
/// provider.
pub const LARGE_CONTEXT_THRESHOLD: usize = 50_000;

/// Scoring weights for the cost-benefit fallback.
const WEIGHT_QUALITY: f64 = 0.4;
const WEIGHT_COST: f64 = 0.3;
const WEIGHT_SPEED: f64 = 0.2;
const WEIGHT_CAPABILITY: f64 = 0.1;

/// Static per-provider profile. Costs are combined USD per 1K tokens.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderProfile {
    pub name: &'static str,
    pub model: &'static str,
    /// Model used when the complex-reasoning rule fires.
    pub reasoning_model: &'static str,
    pub context_window: u32,
    pub cost_per_1k: f64,
    /// 0.0..=1.0 relative answer quality.
    pub quality: f64,
    /// 0.0..=1.0 relative generation speed.
    pub speed: f64,
    pub suited_for_reasoning: bool,
    pub suited_for_synthesis: bool,
    /// Default pick when no other rule applies.
    pub cost_optimized: bool,
}

/// The built-in provider table. Order doubles as the static fallback tail.
pub const PROFILES: &[ProviderProfile] = &[
    ProviderProfile {
        name: "openai",
        model: "gpt-4o-mini",
        reasoning_model: "o1-mini",
        context_window: 128_000,
        cost_per_1k: 0.000_9,
        quality: 0.75,
        speed: 0.8,
        suited_for_reasoning: true,
        suited_for_synthesis: true,
        cost_optimized: false,
    },
    ProviderProfile {
        name: "anthropic",
        model: "claude-3-5-sonnet",
        reasoning_model: "claude-3-5-sonnet",
        context_window: 200_000,
        cost_per_1k: 0.009,
        quality: 0.9,
        speed: 0.6,
        suited_for_reasoning: true,
        suited_for_synthesis: false,
        cost_optimized: false,
    },
    ProviderProfile {
        name: "groq",
        model: "llama-3.3-70b-versatile",
        reasoning_model: "llama-3.3-70b-versatile",
        context_window: 32_000,
        cost_per_1k: 0.000_2,
        quality: 0.65,
        speed: 0.95,
        suited_for_reasoning: false,
        suited_for_synthesis: true,
        cost_optimized: true,
    },
];

/// The router's pick for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub provider: String,
    pub model: String,
}

/// One ordered fallback candidate, ready for probing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderCandidate {
    pub provider: String,
    pub model: String,
    pub max_tokens: u32,
}

pub struct ModelRouter {
    profiles: Vec<ProviderProfile>,
    configured: Vec<String>,
}

impl ModelRouter {
    pub fn new(config: &GatewayConfig) -> Self {
        let configured = config.configured_providers();
        Self {
            profiles: PROFILES
                .iter()
                .filter(|p| configured.iter().any(|c| c == p.name))
                .cloned()
                .collect(),
            configured,
        }
    }

    /// Build a router over an explicit profile set (tests, embedders).
    pub fn with_profiles(profiles: Vec<ProviderProfile>) -> Self {
        let configured = profiles.iter().map(|p| p.name.to_string()).collect();
        Self {
            profiles,
            configured,
        }
    }

    /// Decision table, top rule wins; scored ranking as the fallback path.
    pub fn select_optimal(
        &self,
        complexity: Complexity,
        intent: QueryIntent,
        context_bytes: usize,
    ) -> Option<Selection> {
        if self.profiles.is_empty() {
            return None;
        }

        // Rule 1: very large context wants the biggest window.
        if context_bytes > LARGE_CONTEXT_THRESHOLD {
            let p = self
                .profiles
                .iter()
                .max_by_key(|p| p.context_window)
                .expect("non-empty profiles");
            return Some(Selection {
                provider: p.name.to_string(),
                model: p.model.to_string(),
            });
        }

        // Rule 2: complex reasoning.
        if complexity == Complexity::Complex {
            if let Some(p) = self.profiles.iter().find(|p| p.suited_for_reasoning) {
                return Some(Selection {
                    provider: p.name.to_string(),
                    model: p.reasoning_model.to_string(),
                });
            }
        }

        // Rule 3: external lookup happens upstream; pick the cheapest
        // synthesis-capable provider.
        if intent == QueryIntent::Lookup {
            if let Some(p) = self
                .profiles
                .iter()
                .filter(|p| p.suited_for_synthesis)
                .min_by(|a, b| {
                    a.cost_per_1k
                        .partial_cmp(&b.cost_per_1k)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
            {
                return Some(Selection {
                    provider: p.name.to_string(),
                    model: p.model.to_string(),
                });
            }
        }

        // Rule 4: cost-optimized default.
        if let Some(p) = self.profiles.iter().find(|p| p.cost_optimized) {
            return Some(Selection {
                provider: p.name.to_string(),
                model: p.model.to_string(),
            });
        }

        self.select_scored(complexity, intent)
    }

    /// Weighted cost-benefit ranking: quality 40%, cost-efficiency 30%,
    /// speed 20%, capability match 10%.
    fn select_scored(&self, complexity: Complexity, intent: QueryIntent) -> Option<Selection> {
        let max_cost_eff = self
            .profiles
            .iter()
            .map(|p| 1.0 / (p.cost_per_1k + 0.001))
            .fold(f64::MIN, f64::max);

        self.profiles
            .iter()
            .map(|p| {
                let cost_eff = (1.0 / (p.cost_per_1k + 0.001)) / max_cost_eff;
                let capability = match (complexity, intent) {
                    (Complexity::Complex, _) if p.suited_for_reasoning => 1.0,
                    (_, QueryIntent::Lookup) if p.suited_for_synthesis => 1.0,
                    (Complexity::Simple, QueryIntent::Chat) => 1.0,
                    _ => 0.0,
                };
                let score = p.quality * WEIGHT_QUALITY
                    + cost_eff * WEIGHT_COST
                    + p.speed * WEIGHT_SPEED
                    + capability * WEIGHT_CAPABILITY;
                (p, score)
            })
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(p, score)| {
                debug!(provider = p.name, score, "scored fallback selection");
                Selection {
                    provider: p.name.to_string(),
                    model: if complexity == Complexity::Complex {
                        p.reasoning_model.to_string()
                    } else {
                        p.model.to_string()
                    },
                }
            })
    }

    /// Ordered candidate list for one request: optimal pick first, then an
    /// explicitly requested provider if different, then the static fallback
    /// tail. Filtered to configured providers, deduped by name.
    pub fn build_candidates(
        &self,
        request: &ChatRequest,
        optimal: Option<&Selection>,
        config: &GatewayConfig,
    ) -> Vec<ProviderCandidate> {
        let mut out: Vec<ProviderCandidate> = Vec::new();

        let push = |provider: &str, model: Option<&str>, out: &mut Vec<ProviderCandidate>| {
            if !self.configured.iter().any(|c| c == provider) {
                return;
            }
            if out.iter().any(|c| c.provider == provider) {
                return;
            }
            let profile_model = self
                .profiles
                .iter()
                .find(|p| p.name == provider)
                .map(|p| p.model)
                .unwrap_or("");
            let resolved_model = request
                .model
                .as_deref()
                .or(model)
                .unwrap_or(profile_model)
                .to_string();
            out.push(ProviderCandidate {
                provider: provider.to_string(),
                model: resolved_model,
                max_tokens: request
                    .max_tokens
                    .unwrap_or_else(|| config.max_output_tokens_for(provider))
                    .min(config.max_output_tokens_for(provider)),
            });
        };

        if let Some(sel) = optimal {
            push(&sel.provider, Some(&sel.model), &mut out);
        }
        if let Some(ref explicit) = request.provider {
            push(explicit, None, &mut out);
        }
        for p in PROFILES {
            push(p.name, None, &mut out);
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GatewayConfig, ProviderCredentials};

    fn all_configured() -> GatewayConfig {
        let mut cfg = GatewayConfig::default();
        for name in ["openai", "anthropic", "groq"] {
            cfg.providers.insert(
                name.into(),
                ProviderCredentials {
                    api_key: Some("k".into()),
                    base_url: None,
                    max_output_tokens: None,
                },
            );
        }
        cfg
    }

    fn router() -> ModelRouter {
        ModelRouter::new(&all_configured())
    }

    #[test]
    fn test_large_context_picks_biggest_window() {
        let sel = router()
            .select_optimal(Complexity::Simple, QueryIntent::Chat, 60_000)
            .unwrap();
        assert_eq!(sel.provider, "anthropic");
    }

    #[test]
    fn test_complex_picks_reasoning_model() {
        let sel = router()
            .select_optimal(Complexity::Complex, QueryIntent::Chat, 0)
            .unwrap();
        assert_eq!(sel.provider, "openai");
        assert_eq!(sel.model, "o1-mini");
    }

    #[test]
    fn test_lookup_picks_cheapest_synthesis() {
        let sel = router()
            .select_optimal(Complexity::Simple, QueryIntent::Lookup, 0)
            .unwrap();
        assert_eq!(sel.provider, "groq");
    }

    #[test]
    fn test_default_is_cost_optimized() {
        let sel = router()
            .select_optimal(Complexity::Simple, QueryIntent::Chat, 100)
            .unwrap();
        assert_eq!(sel.provider, "groq");
        assert_eq!(sel.model, "llama-3.3-70b-versatile");
    }

    #[test]
    fn test_selection_is_deterministic() {
        let r = router();
        let a = r.select_optimal(Complexity::Simple, QueryIntent::Chat, 10);
        let b = r.select_optimal(Complexity::Simple, QueryIntent::Chat, 10);
        assert_eq!(a, b);
    }

    #[test]
    fn test_scored_fallback_when_no_default_marked() {
        // Profile set without a cost_optimized default exercises the scored path.
        let profiles = vec![
            ProviderProfile {
                name: "openai",
                model: "gpt-4o-mini",
                reasoning_model: "o1-mini",
                context_window: 128_000,
                cost_per_1k: 0.000_9,
                quality: 0.75,
                speed: 0.8,
                suited_for_reasoning: true,
                suited_for_synthesis: true,
                cost_optimized: false,
            },
            ProviderProfile {
                name: "anthropic",
                model: "claude-3-5-sonnet",
                reasoning_model: "claude-3-5-sonnet",
                context_window: 200_000,
                cost_per_1k: 0.009,
                quality: 0.9,
                speed: 0.6,
                suited_for_reasoning: true,
                suited_for_synthesis: false,
                cost_optimized: false,
            },
        ];
        let r = ModelRouter::with_profiles(profiles);
        let sel = r
            .select_optimal(Complexity::Simple, QueryIntent::Chat, 0)
            .unwrap();
        // openai: 0.75*0.4 + 1.0*0.3 + 0.8*0.2 + 1.0*0.1 = 0.86
        // anthropic: 0.9*0.4 + 0.19*0.3 + 0.6*0.2 + 1.0*0.1 ≈ 0.637
        assert_eq!(sel.provider, "openai");
    }

    #[test]
    fn test_candidates_order_and_dedup() {
        let cfg = all_configured();
        let r = ModelRouter::new(&cfg);
        let mut req = ChatRequest::new("u1", "c1", "hi");
        req.provider = Some("anthropic".into());
        let optimal = Selection {
            provider: "groq".into(),
            model: "llama-3.3-70b-versatile".into(),
        };
        let candidates = r.build_candidates(&req, Some(&optimal), &cfg);
        let names: Vec<&str> = candidates.iter().map(|c| c.provider.as_str()).collect();
        assert_eq!(names, vec!["groq", "anthropic", "openai"]);
    }

    #[test]
    fn test_candidates_filter_unconfigured() {
        let mut cfg = all_configured();
        cfg.providers.get_mut("anthropic").unwrap().api_key = None;
        let r = ModelRouter::new(&cfg);
        let mut req = ChatRequest::new("u1", "c1", "hi");
        req.provider = Some("anthropic".into());
        let candidates = r.build_candidates(&req, None, &cfg);
        assert!(candidates.iter().all(|c| c.provider != "anthropic"));
    }

    #[test]
    fn test_explicit_model_override_applies() {
        let cfg = all_configured();
        let r = ModelRouter::new(&cfg);
        let mut req = ChatRequest::new("u1", "c1", "hi");
        req.model = Some("gpt-4o".into());
        let candidates = r.build_candidates(&req, None, &cfg);
        assert!(candidates.iter().all(|c| c.model == "gpt-4o"));
    }

    #[test]
    fn test_max_tokens_ceiling_applies() {
        let mut cfg = all_configured();
        cfg.global_max_output_tokens = 1000;
        let r = ModelRouter::new(&cfg);
        let mut req = ChatRequest::new("u1", "c1", "hi");
        req.max_tokens = Some(50_000);
        let candidates = r.build_candidates(&req, None, &cfg);
        assert!(candidates.iter().all(|c| c.max_tokens == 1000));
    }
}
