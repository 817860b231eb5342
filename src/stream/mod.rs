//! The streaming coordinator: probing, preface merge, injection polling, and
//! wire-cadence delivery for one request.
//!
//! Per request the coordinator walks `CANDIDATE_SELECTED -> PROBING ->
//! {ACTIVE | EXHAUSTED} -> STREAMING -> {DONE | FAILED}`. Everything optional
//! (preface, injection, caching, advisory events) degrades silently; only an
//! exhausted candidate list or a mid-flight upstream failure reaches the
//! client, and then as a single terminal `error` event.

pub mod injection;
pub mod probe;
pub mod wire;

pub use injection::{NullResearchStore, ResearchProbe, ResearchStore};
pub use probe::{probe_candidates, ActiveStream};
pub use wire::WireBuffer;

use crate::admission::{AdmissionController, AdmissionPermit};
use crate::cache::{build_key, context_hash, ResponseCache};
use crate::config::GatewayConfig;
use crate::context::{ContextAggregator, ContextBundle};
use crate::error::Error;
use crate::hooks::{fire_detached, CompletionHooks, CompletionRecord};
use crate::providers::ProviderPool;
use crate::router::{ModelRouter, PROFILES};
use crate::types::{ChatRequest, GatewayEvent, GenerationOptions, Message};
use crate::Result;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct StreamCoordinator {
    config: Arc<GatewayConfig>,
    admission: AdmissionController,
    context: Arc<ContextAggregator>,
    router: ModelRouter,
    pool: ProviderPool,
    cache: Arc<ResponseCache>,
    hooks: Arc<dyn CompletionHooks>,
    research: Arc<dyn ResearchStore>,
}

impl StreamCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<GatewayConfig>,
        admission: AdmissionController,
        context: Arc<ContextAggregator>,
        router: ModelRouter,
        pool: ProviderPool,
        cache: Arc<ResponseCache>,
        hooks: Arc<dyn CompletionHooks>,
        research: Arc<dyn ResearchStore>,
    ) -> Self {
        Self {
            config,
            admission,
            context,
            router,
            pool,
            cache,
            hooks,
            research,
        }
    }

    /// Admission gate, called before the SSE response begins so a rejection
    /// can still become a structured 429.
    pub fn admit(&self, caller_id: &str) -> Result<AdmissionPermit> {
        self.admission.try_admit(caller_id)
    }

    pub fn admission(&self) -> &AdmissionController {
        &self.admission
    }

    pub fn cache_stats(&self) -> crate::cache::ResponseCacheStats {
        self.cache.stats()
    }

    /// Drive one admitted request to its terminal event. The permit travels
    /// in and is dropped on every exit path, releasing the caller's slot
    /// exactly once; `cancel` fires when the client goes away.
    pub async fn run(
        &self,
        permit: AdmissionPermit,
        request: ChatRequest,
        events: mpsc::Sender<GatewayEvent>,
        cancel: CancellationToken,
    ) {
        let _permit = permit;
        let started = Instant::now();

        if events.send(GatewayEvent::Heartbeat).await.is_err() {
            return;
        }

        // The preface races everything below; it is consulted exactly once,
        // after the primary's first token, and only if it already finished.
        let mut preface_rx = self.spawn_preface(&request, cancel.child_token());

        // Disconnects before the first upstream token still tear everything
        // down; the permit drops on each early return.
        let bundle = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("client disconnected during context gathering");
                return;
            }
            bundle = self.context.gather(&request) => bundle,
        };

        let selection =
            self.router
                .select_optimal(request.complexity, request.intent, bundle.size_bytes());
        let candidates = self
            .router
            .build_candidates(&request, selection.as_ref(), &self.config);

        let key_model = candidates
            .first()
            .map(|c| c.model.clone())
            .unwrap_or_default();
        let key = build_key(
            &request.caller_id,
            &key_model,
            &request.message,
            &context_hash(&bundle.as_text()),
        );

        if let Some(hit) = self.cache.get(&key) {
            info!(access_count = hit.access_count, "served from response cache");
            let ttfb_ms = started.elapsed().as_millis() as u64;
            if events
                .send(GatewayEvent::Token {
                    text: hit.payload.clone(),
                })
                .await
                .is_err()
            {
                return;
            }
            let _ = events
                .send(GatewayEvent::Done {
                    ttfb_ms,
                    tokens_per_sec: 0.0,
                })
                .await;
            fire_detached(
                Arc::clone(&self.hooks),
                CompletionRecord {
                    caller_id: request.caller_id,
                    conversation_id: request.conversation_id,
                    request_message: request.message,
                    response_text: hit.payload,
                    provider: String::new(),
                    model: key_model,
                    ttfb_ms,
                    tokens_per_sec: 0.0,
                    token_count: 0,
                    served_from_cache: true,
                },
            );
            return;
        }

        if candidates.is_empty() {
            let _ = events
                .send(GatewayEvent::Error {
                    error: Error::AllCandidatesExhausted { attempted: 0 }.to_string(),
                })
                .await;
            return;
        }

        let messages = build_messages(&bundle, &request);
        let probed = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("client disconnected during probing");
                return;
            }
            probed = probe_candidates(
                &self.pool,
                &candidates,
                &messages,
                request.temperature,
                self.config.stream.probe_timeout,
            ) => probed,
        };
        let active = match probed {
            Ok(active) => active,
            Err(e) => {
                warn!(error = %e, "request failed during probing");
                let _ = events
                    .send(GatewayEvent::Error {
                        error: e.to_string(),
                    })
                    .await;
                return;
            }
        };

        let ttfb = started.elapsed();
        let ttfb_ms = ttfb.as_millis() as u64;

        // Merged only when it beat the primary's first token; a preface still
        // in flight is abandoned.
        if let Ok(text) = preface_rx.try_recv() {
            if events.send(GatewayEvent::Preface { text }).await.is_err() {
                return;
            }
        }

        if ttfb > self.config.stream.ttfb_soft_threshold
            && events
                .send(GatewayEvent::SlowStart { ttfb_ms })
                .await
                .is_err()
        {
            return;
        }

        let injection_cancel = cancel.child_token();
        let injection = tokio::spawn(injection::run_injection_poll(
            Arc::clone(&self.research),
            request.conversation_id.clone(),
            self.config.stream.injection_window,
            self.config.stream.injection_poll_period,
            injection_cancel.clone(),
            events.clone(),
        ));

        let mut wire = WireBuffer::new(
            self.config.stream.flush_interval,
            self.config.stream.flush_bytes,
            Instant::now(),
        );
        let mut response_text = String::new();
        let mut token_count = 0usize;
        let mut stream_error: Option<Error> = None;
        let mut stream = active.stream;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("client disconnected mid-stream");
                    injection_cancel.cancel();
                    let _ = injection.await;
                    return;
                }
                item = stream.next() => match item {
                    Some(Ok(chunk)) => {
                        token_count += 1;
                        response_text.push_str(&chunk);
                        if let Some(flushed) = wire.push(&chunk, Instant::now()) {
                            if events
                                .send(GatewayEvent::Token { text: flushed })
                                .await
                                .is_err()
                            {
                                injection_cancel.cancel();
                                let _ = injection.await;
                                return;
                            }
                        }
                    }
                    Some(Err(e)) => {
                        stream_error = Some(e);
                        break;
                    }
                    None => break,
                },
            }
        }

        // The poll never outlives the main stream.
        injection_cancel.cancel();
        let _ = injection.await;

        if let Some(e) = stream_error {
            warn!(provider = active.provider.as_str(), error = %e, "upstream failed mid-flight");
            let _ = events
                .send(GatewayEvent::Error {
                    error: e.to_string(),
                })
                .await;
            return;
        }

        if let Some(rest) = wire.drain(Instant::now()) {
            if events
                .send(GatewayEvent::Token { text: rest })
                .await
                .is_err()
            {
                return;
            }
        }

        for event in advisory_events(&bundle) {
            if events.send(event).await.is_err() {
                return;
            }
        }

        let generation = started.elapsed().saturating_sub(ttfb);
        let tokens_per_sec = token_count as f64 / generation.as_secs_f64().max(0.001);

        if events
            .send(GatewayEvent::Done {
                ttfb_ms,
                tokens_per_sec,
            })
            .await
            .is_err()
        {
            return;
        }

        info!(
            provider = active.provider.as_str(),
            model = active.model.as_str(),
            ttfb_ms,
            tokens_per_sec,
            token_count,
            "stream completed"
        );

        if !response_text.is_empty() {
            // Refusals are policy decisions, already logged by the cache.
            let _ = self.cache.set(&key, &request.message, &response_text);
        }

        // Memory event for the freshly generated exchange; cache hits replay
        // an exchange the memory system has already seen.
        {
            let context = Arc::clone(&self.context);
            let caller_id = request.caller_id.clone();
            let conversation_id = request.conversation_id.clone();
            let user_text = request.message.clone();
            let assistant_text = response_text.clone();
            tokio::spawn(async move {
                context
                    .record_exchange(&caller_id, &conversation_id, &user_text, &assistant_text)
                    .await;
            });
        }

        fire_detached(
            Arc::clone(&self.hooks),
            CompletionRecord {
                caller_id: request.caller_id,
                conversation_id: request.conversation_id,
                request_message: request.message,
                response_text,
                provider: active.provider,
                model: active.model,
                ttfb_ms,
                tokens_per_sec,
                token_count,
                served_from_cache: false,
            },
        );
    }

    /// Start the fast-preface race on the cheapest configured provider. The
    /// receiver only ever yields a draft that finished under the fast-enough
    /// threshold; everything slower, failed, or empty is discarded in-task.
    fn spawn_preface(
        &self,
        request: &ChatRequest,
        cancel: CancellationToken,
    ) -> oneshot::Receiver<String> {
        let (tx, rx) = oneshot::channel();
        let Some((provider, model)) = self.cheapest_provider() else {
            return rx;
        };
        let pool = self.pool.clone();
        let message = request.message.clone();
        let budget = self.config.stream.preface_budget;
        let threshold = self.config.stream.preface_fast_threshold;
        let opts = GenerationOptions {
            max_tokens: self.config.stream.preface_max_tokens,
            temperature: None,
        };

        tokio::spawn(async move {
            let started = Instant::now();
            let generate = async {
                let mut stream = pool
                    .open(&provider, &[Message::user(message)], &model, &opts)
                    .await?;
                let mut text = String::new();
                while let Some(chunk) = stream.next().await {
                    text.push_str(&chunk?);
                }
                Ok::<String, Error>(text)
            };

            tokio::select! {
                _ = cancel.cancelled() => {}
                outcome = timeout(budget, generate) => match outcome {
                    Ok(Ok(text)) if !text.is_empty() && started.elapsed() <= threshold => {
                        let _ = tx.send(text);
                    }
                    Ok(Ok(_)) => debug!("preface too slow, discarded"),
                    Ok(Err(e)) => debug!(error = %e, "preface generation failed"),
                    Err(_) => debug!(budget_ms = budget.as_millis() as u64, "preface over budget"),
                },
            }
        });

        rx
    }

    fn cheapest_provider(&self) -> Option<(String, String)> {
        PROFILES
            .iter()
            .filter(|p| self.pool.contains(p.name))
            .min_by(|a, b| {
                a.cost_per_1k
                    .partial_cmp(&b.cost_per_1k)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|p| (p.name.to_string(), p.model.to_string()))
    }
}

/// Assemble the provider message list: aggregated context as a system
/// message, then the user's turn.
fn build_messages(bundle: &ContextBundle, request: &ChatRequest) -> Vec<Message> {
    let mut messages = Vec::with_capacity(2);
    if !bundle.is_empty() {
        messages.push(Message::system(format!(
            "Relevant context for this conversation:\n{}",
            bundle.as_text()
        )));
    }
    messages.push(Message::user(request.message.clone()));
    messages
}

/// Advisory events derived from the bundle, emitted after the answer.
fn advisory_events(bundle: &ContextBundle) -> Vec<GatewayEvent> {
    let mut out = Vec::new();
    if bundle.web_summary.is_some() {
        out.push(GatewayEvent::SearchStatus {
            status: "complete".to_string(),
        });
    }
    if !bundle.web_sources.is_empty() {
        out.push(GatewayEvent::Sources {
            sources: bundle.web_sources.clone(),
        });
    }
    if !bundle.ingested.is_empty() {
        out.push(GatewayEvent::IngestionContext {
            titles: bundle.ingested.iter().map(|d| d.title.clone()).collect(),
        });
    }
    out
}
