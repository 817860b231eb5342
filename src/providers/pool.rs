//! Provider pool: owns one connection-pooled driver per configured provider.

use super::{AnthropicProvider, OpenAiProvider, Provider, TokenStream};
use crate::config::GatewayConfig;
use crate::error::{Error, ErrorContext};
use crate::types::{GenerationOptions, Message};
use crate::Result;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

const GROQ_BASE_URL: &str = "https://api.groq.com/openai/v1";

/// Pool-level counters, exported on `/metrics`.
#[derive(Debug, Default)]
struct Counters {
    streams_opened: AtomicU64,
    open_failures: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PoolSnapshot {
    pub providers: Vec<String>,
    pub streams_opened: u64,
    pub open_failures: u64,
}

/// One driver per configured provider, shared across all requests.
#[derive(Clone)]
pub struct ProviderPool {
    providers: HashMap<String, Arc<dyn Provider>>,
    counters: Arc<Counters>,
}

impl ProviderPool {
    /// Build drivers for every provider with credentials present. Groq speaks
    /// the OpenAI wire format, so it reuses that driver under its own name.
    pub fn from_config(config: &GatewayConfig) -> Result<Self> {
        let mut providers: HashMap<String, Arc<dyn Provider>> = HashMap::new();
        let timeout = config.provider_http_timeout;

        for (name, creds) in &config.providers {
            let Some(api_key) = creds.api_key.clone() else {
                continue;
            };
            let driver: Arc<dyn Provider> = match name.as_str() {
                "anthropic" => Arc::new(AnthropicProvider::new(
                    name.clone(),
                    api_key,
                    creds.base_url.clone(),
                    timeout,
                )?),
                "groq" => Arc::new(OpenAiProvider::new(
                    name.clone(),
                    api_key,
                    Some(
                        creds
                            .base_url
                            .clone()
                            .unwrap_or_else(|| GROQ_BASE_URL.to_string()),
                    ),
                    timeout,
                )?),
                "openai" => Arc::new(OpenAiProvider::new(
                    name.clone(),
                    api_key,
                    creds.base_url.clone(),
                    timeout,
                )?),
                other => {
                    return Err(Error::configuration_with_context(
                        format!("unknown provider '{}'", other),
                        ErrorContext::new().with_field("providers"),
                    ))
                }
            };
            providers.insert(name.clone(), driver);
        }

        Ok(Self {
            providers,
            counters: Arc::new(Counters::default()),
        })
    }

    #[cfg(test)]
    pub(crate) fn from_providers(drivers: Vec<Arc<dyn Provider>>) -> Self {
        Self {
            providers: drivers
                .into_iter()
                .map(|d| (d.name().to_string(), d))
                .collect(),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Warm every driver's connection at startup. Failures are logged, not
    /// fatal; the provider can still recover by the time a request arrives.
    pub async fn prepare(&self) {
        for (name, driver) in &self.providers {
            match driver.warm_up().await {
                Ok(()) => info!(provider = name.as_str(), "provider connection warmed"),
                Err(e) => warn!(provider = name.as_str(), error = %e, "warm-up failed"),
            }
        }
    }

    /// Drop all drivers; pooled connections close with them.
    pub fn shutdown(self) {
        info!(providers = self.providers.len(), "provider pool shut down");
    }

    pub fn contains(&self, provider: &str) -> bool {
        self.providers.contains_key(provider)
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.providers.keys().cloned().collect()
    }

    /// Open a live token stream on the named provider.
    pub async fn open(
        &self,
        provider: &str,
        messages: &[Message],
        model: &str,
        opts: &GenerationOptions,
    ) -> Result<TokenStream> {
        let driver = self.providers.get(provider).ok_or_else(|| {
            Error::runtime_with_context(
                format!("provider '{}' not in pool", provider),
                ErrorContext::new().with_source("provider_pool"),
            )
        })?;
        match driver.open(messages, model, opts).await {
            Ok(stream) => {
                self.counters.streams_opened.fetch_add(1, Ordering::Relaxed);
                Ok(stream)
            }
            Err(e) => {
                self.counters.open_failures.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    /// Token estimate for `messages` on the named provider's tokenizer.
    /// Identical input always yields the identical count.
    pub fn estimate(&self, provider: &str, messages: &[Message], model: &str) -> Result<usize> {
        let driver = self.providers.get(provider).ok_or_else(|| {
            Error::runtime_with_context(
                format!("provider '{}' not in pool", provider),
                ErrorContext::new().with_source("provider_pool"),
            )
        })?;
        Ok(driver.estimate(messages, model))
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        PoolSnapshot {
            providers: self.provider_names(),
            streams_opened: self.counters.streams_opened.load(Ordering::Relaxed),
            open_failures: self.counters.open_failures.load(Ordering::Relaxed),
        }
    }
}
