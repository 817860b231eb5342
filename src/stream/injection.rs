//! Bounded research-injection poll.
//!
//! While the main stream is active, a side task polls an external research
//! store for a capsule addressed to this conversation. The capsule content is
//! never written into the SSE stream; only an advisory `research_thinking`
//! event is emitted once when a background job is first observed. The poll
//! terminates on capsule found, window elapsed, or cancellation from the main
//! stream, whichever comes first.

use crate::error::Error;
use crate::types::GatewayEvent;
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// What the store knows about this conversation right now.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResearchProbe {
    /// A background research job has started for this conversation.
    pub job_active: bool,
    /// A finished capsule is waiting; it informs future turns only.
    pub capsule_ready: bool,
}

/// External shared key space where background research jobs publish capsules.
#[async_trait]
pub trait ResearchStore: Send + Sync {
    async fn probe(&self, conversation_id: &str) -> Result<ResearchProbe, Error>;
}

/// Store with no research capability; every probe comes back empty.
pub struct NullResearchStore;

#[async_trait]
impl ResearchStore for NullResearchStore {
    async fn probe(&self, _conversation_id: &str) -> Result<ResearchProbe, Error> {
        Ok(ResearchProbe::default())
    }
}

/// Run the poll loop. Advisory only: every failure is swallowed and logged,
/// and a dropped event channel simply ends the loop.
pub async fn run_injection_poll(
    store: std::sync::Arc<dyn ResearchStore>,
    conversation_id: String,
    window: Duration,
    period: Duration,
    cancel: CancellationToken,
    events: mpsc::Sender<GatewayEvent>,
) {
    let deadline = tokio::time::Instant::now() + window;
    let mut announced = false;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(conversation_id = conversation_id.as_str(), "injection poll cancelled");
                return;
            }
            _ = tokio::time::sleep_until(deadline) => {
                debug!(conversation_id = conversation_id.as_str(), "injection window elapsed");
                return;
            }
            _ = tokio::time::sleep(period) => {}
        }

        match store.probe(&conversation_id).await {
            Ok(probe) => {
                if probe.job_active && !announced {
                    announced = true;
                    let ev = GatewayEvent::ResearchThinking {
                        status: "research in progress".to_string(),
                    };
                    if events.send(ev).await.is_err() {
                        return;
                    }
                }
                if probe.capsule_ready {
                    debug!(
                        conversation_id = conversation_id.as_str(),
                        "capsule found, ending poll"
                    );
                    return;
                }
            }
            Err(e) => {
                warn!(error = %e, "research probe failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    struct ScriptedStore {
        polls: AtomicU32,
        job_after: u32,
        capsule_after: u32,
    }

    #[async_trait]
    impl ResearchStore for ScriptedStore {
        async fn probe(&self, _conversation_id: &str) -> Result<ResearchProbe, Error> {
            let n = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(ResearchProbe {
                job_active: n >= self.job_after,
                capsule_ready: n >= self.capsule_after,
            })
        }
    }

    fn window() -> Duration {
        Duration::from_millis(5000)
    }

    fn period() -> Duration {
        Duration::from_millis(200)
    }

    #[tokio::test(start_paused = true)]
    async fn test_thinking_emitted_once_then_capsule_ends_poll() {
        let store = Arc::new(ScriptedStore {
            polls: AtomicU32::new(0),
            job_after: 1,
            capsule_after: 3,
        });
        let (tx, mut rx) = mpsc::channel(16);
        run_injection_poll(
            store.clone(),
            "c1".to_string(),
            window(),
            period(),
            CancellationToken::new(),
            tx,
        )
        .await;
        assert_eq!(store.polls.load(Ordering::SeqCst), 3);
        let ev = rx.recv().await.unwrap();
        assert!(matches!(ev, GatewayEvent::ResearchThinking { .. }));
        // Announced once, never repeated.
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_bounds_the_poll() {
        let store = Arc::new(ScriptedStore {
            polls: AtomicU32::new(0),
            job_after: u32::MAX,
            capsule_after: u32::MAX,
        });
        let (tx, mut rx) = mpsc::channel(16);
        let started = tokio::time::Instant::now();
        run_injection_poll(
            store.clone(),
            "c1".to_string(),
            window(),
            period(),
            CancellationToken::new(),
            tx,
        )
        .await;
        assert!(started.elapsed() <= window() + period());
        // 5000 ms window at a 200 ms period: two dozen polls at most.
        assert!(store.polls.load(Ordering::SeqCst) <= 25);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_stops_immediately() {
        let store = Arc::new(ScriptedStore {
            polls: AtomicU32::new(0),
            job_after: u32::MAX,
            capsule_after: u32::MAX,
        });
        let (tx, _rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        cancel.cancel();
        run_injection_poll(store.clone(), "c1".into(), window(), period(), cancel, tx).await;
        assert_eq!(store.polls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_errors_are_swallowed() {
        struct FailingStore;
        #[async_trait]
        impl ResearchStore for FailingStore {
            async fn probe(&self, _c: &str) -> Result<ResearchProbe, Error> {
                Err(Error::runtime("store offline"))
            }
        }
        let (tx, mut rx) = mpsc::channel(16);
        run_injection_poll(
            Arc::new(FailingStore),
            "c1".into(),
            Duration::from_millis(500),
            period(),
            CancellationToken::new(),
            tx,
        )
        .await;
        assert!(rx.recv().await.is_none());
    }
}
