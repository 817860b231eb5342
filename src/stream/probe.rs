//! Candidate probing: open each candidate's stream and race its first chunk
//! against a fixed timeout. The first candidate to produce a chunk in time
//! becomes the active stream; everyone else is skipped.

use crate::error::Error;
use crate::providers::{ProviderPool, TokenStream};
use crate::router::ProviderCandidate;
use crate::types::{GenerationOptions, Message};
use crate::Result;
use futures::{stream, StreamExt};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{info, warn};

/// A probed, live stream. The consumed first chunk has already been stitched
/// back in front of the remainder.
pub struct ActiveStream {
    pub provider: String,
    pub model: String,
    pub stream: TokenStream,
}

impl std::fmt::Debug for ActiveStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveStream")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

/// Walk the ordered candidate list. A candidate that errors, produces no
/// chunk, or overruns `probe_timeout` is logged and skipped; the request only
/// fails when the whole list is exhausted.
pub async fn probe_candidates(
    pool: &ProviderPool,
    candidates: &[ProviderCandidate],
    messages: &[Message],
    temperature: Option<f64>,
    probe_timeout: Duration,
) -> Result<ActiveStream> {
    for candidate in candidates {
        let opts = GenerationOptions {
            max_tokens: candidate.max_tokens,
            temperature,
        };
        match timeout(
            probe_timeout,
            open_and_take_first(pool, candidate, messages, &opts),
        )
        .await
        {
            Ok(Ok((first, rest))) => {
                info!(
                    provider = candidate.provider.as_str(),
                    model = candidate.model.as_str(),
                    "candidate active"
                );
                return Ok(ActiveStream {
                    provider: candidate.provider.clone(),
                    model: candidate.model.clone(),
                    stream: replay(first, rest),
                });
            }
            Ok(Err(e)) => {
                warn!(
                    provider = candidate.provider.as_str(),
                    error = %e,
                    "candidate probe failed"
                );
            }
            Err(_) => {
                warn!(
                    provider = candidate.provider.as_str(),
                    timeout_ms = probe_timeout.as_millis() as u64,
                    "candidate probe timed out"
                );
            }
        }
    }

    Err(Error::AllCandidatesExhausted {
        attempted: candidates.len(),
    })
}

/// Open the stream and pull its first chunk. A stream that ends immediately
/// counts as a probe failure.
async fn open_and_take_first(
    pool: &ProviderPool,
    candidate: &ProviderCandidate,
    messages: &[Message],
    opts: &GenerationOptions,
) -> Result<(String, TokenStream)> {
    let mut stream = pool
        .open(&candidate.provider, messages, &candidate.model, opts)
        .await?;
    match stream.next().await {
        Some(Ok(first)) => Ok((first, stream)),
        Some(Err(e)) => Err(e),
        None => Err(Error::Stream {
            provider: candidate.provider.clone(),
            message: "stream ended before first chunk".to_string(),
        }),
    }
}

/// Buffered-prepend wrapper: yield the already-consumed first chunk, then the
/// rest of the underlying stream.
fn replay(first: String, rest: TokenStream) -> TokenStream {
    Box::pin(stream::iter(vec![Ok(first)]).chain(rest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::Provider;
    use async_trait::async_trait;
    use std::sync::Arc;

    struct ScriptedProvider {
        name: &'static str,
        delay: Duration,
        chunks: Vec<&'static str>,
        fail_open: bool,
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        fn name(&self) -> &str {
            self.name
        }

        async fn open(
            &self,
            _messages: &[Message],
            _model: &str,
            _opts: &GenerationOptions,
        ) -> Result<TokenStream> {
            if self.fail_open {
                return Err(Error::Stream {
                    provider: self.name.to_string(),
                    message: "refused".to_string(),
                });
            }
            let delay = self.delay;
            let chunks: Vec<String> = self.chunks.iter().map(|c| c.to_string()).collect();
            let first_delay = stream::once(async move {
                tokio::time::sleep(delay).await;
                None::<Result<String>>
            })
            .filter_map(|x| async move { x });
            Ok(Box::pin(
                first_delay.chain(stream::iter(chunks.into_iter().map(Ok))),
            ))
        }

        fn estimate(&self, _messages: &[Message], _model: &str) -> usize {
            1
        }

        async fn warm_up(&self) -> Result<()> {
            Ok(())
        }
    }

    fn candidate(provider: &str) -> ProviderCandidate {
        ProviderCandidate {
            provider: provider.to_string(),
            model: "m".to_string(),
            max_tokens: 64,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_healthy_candidate_wins() {
        let pool = ProviderPool::from_providers(vec![
            Arc::new(ScriptedProvider {
                name: "fast",
                delay: Duration::from_millis(10),
                chunks: vec!["4"],
                fail_open: false,
            }),
        ]);
        let active = probe_candidates(
            &pool,
            &[candidate("fast")],
            &[Message::user("2+2?")],
            None,
            Duration::from_millis(3000),
        )
        .await
        .unwrap();
        assert_eq!(active.provider, "fast");
        let chunks: Vec<String> = active.stream.map(|r| r.unwrap()).collect().await;
        assert_eq!(chunks, vec!["4"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_third_candidate_after_two_failures() {
        let pool = ProviderPool::from_providers(vec![
            Arc::new(ScriptedProvider {
                name: "down",
                delay: Duration::ZERO,
                chunks: vec![],
                fail_open: true,
            }),
            Arc::new(ScriptedProvider {
                name: "slow",
                delay: Duration::from_secs(30),
                chunks: vec!["late"],
                fail_open: false,
            }),
            Arc::new(ScriptedProvider {
                name: "healthy",
                delay: Duration::from_millis(5),
                chunks: vec!["he", "llo"],
                fail_open: false,
            }),
        ]);
        let active = probe_candidates(
            &pool,
            &[candidate("down"), candidate("slow"), candidate("healthy")],
            &[Message::user("hi")],
            None,
            Duration::from_millis(3000),
        )
        .await
        .unwrap();
        assert_eq!(active.provider, "healthy");
        // The replayed first chunk arrives intact and in order.
        let chunks: Vec<String> = active.stream.map(|r| r.unwrap()).collect().await;
        assert_eq!(chunks, vec!["he", "llo"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_exhausted_is_terminal() {
        let pool = ProviderPool::from_providers(vec![Arc::new(ScriptedProvider {
            name: "slow",
            delay: Duration::from_secs(30),
            chunks: vec!["late"],
            fail_open: false,
        })]);
        let err = probe_candidates(
            &pool,
            &[candidate("slow"), candidate("missing")],
            &[Message::user("hi")],
            None,
            Duration::from_millis(3000),
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            Error::AllCandidatesExhausted { attempted: 2 }
        ));
    }

    #[tokio::test]
    async fn test_empty_stream_is_a_probe_failure() {
        let pool = ProviderPool::from_providers(vec![Arc::new(ScriptedProvider {
            name: "empty",
            delay: Duration::ZERO,
            chunks: vec![],
            fail_open: false,
        })]);
        let err = probe_candidates(
            &pool,
            &[candidate("empty")],
            &[Message::user("hi")],
            None,
            Duration::from_millis(3000),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::AllCandidatesExhausted { attempted: 1 }));
    }
}
