//! Application assembly and serve loop.

use crate::admission::AdmissionController;
use crate::cache::ResponseCache;
use crate::config::GatewayConfig;
use crate::context::sources::{NullIngestion, NullRecall, NullWebSearch};
use crate::context::ContextAggregator;
use crate::hooks::PersistingHooks;
use crate::providers::ProviderPool;
use crate::router::ModelRouter;
use crate::routes;
use crate::store::{ConversationStore, InMemoryStore};
use crate::stream::{NullResearchStore, StreamCoordinator};
use crate::Result;
use std::sync::Arc;
use tracing::{info, warn};

const RESPONSE_CACHE_CAPACITY: usize = 1000;

#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<StreamCoordinator>,
    pub store: Arc<dyn ConversationStore>,
    pub pool: ProviderPool,
    pub context: Arc<ContextAggregator>,
}

/// Wire the whole pipeline from config and build the application state.
pub fn build_state(config: Arc<GatewayConfig>) -> Result<AppState> {
    let pool = ProviderPool::from_config(&config)?;
    if pool.provider_names().is_empty() {
        warn!("no provider credentials configured; every request will fail probing");
    }

    let context = Arc::new(ContextAggregator::new(
        Arc::new(NullRecall),
        Arc::new(NullWebSearch),
        Arc::new(NullIngestion),
        config.context_deadlines.clone(),
        config.features.clone(),
    ));
    let store: Arc<dyn ConversationStore> = Arc::new(InMemoryStore::new());
    let coordinator = Arc::new(StreamCoordinator::new(
        Arc::clone(&config),
        AdmissionController::new(config.admission.clone()),
        Arc::clone(&context),
        ModelRouter::new(&config),
        pool.clone(),
        Arc::new(ResponseCache::new(RESPONSE_CACHE_CAPACITY)),
        Arc::new(PersistingHooks::new(Arc::clone(&store))),
        Arc::new(NullResearchStore),
    ));

    Ok(AppState {
        coordinator,
        store,
        pool,
        context,
    })
}

pub async fn serve(config: GatewayConfig) -> Result<()> {
    let config = Arc::new(config);
    let state = build_state(Arc::clone(&config))?;
    state.pool.prepare().await;

    let pool = state.pool.clone();
    let app = routes::router(state);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!(addr = config.bind_addr.as_str(), "gateway listening");
    let outcome = axum::serve(listener, app).await;
    pool.shutdown();
    outcome?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderCredentials;

    #[test]
    fn test_state_builds_without_credentials() {
        let state = build_state(Arc::new(GatewayConfig::default())).unwrap();
        assert!(state.pool.provider_names().is_empty());
    }

    #[test]
    fn test_state_builds_with_providers() {
        let mut config = GatewayConfig::default();
        config.providers.insert(
            "openai".into(),
            ProviderCredentials {
                api_key: Some("k".into()),
                base_url: None,
                max_output_tokens: None,
            },
        );
        let state = build_state(Arc::new(config)).unwrap();
        assert!(state.pool.contains("openai"));
    }
}
