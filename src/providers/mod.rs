//! Upstream model providers behind one capability interface.
//!
//! Each provider is exactly two operations: open a live token stream for a
//! model, and estimate a token count for a message list. Concrete drivers
//! adapt the per-provider wire formats; the pool owns the pooled connections.

pub mod anthropic;
pub mod openai;
pub mod pool;

use crate::error::Error;
use crate::types::{GenerationOptions, Message};
use crate::{BoxStream, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{stream, StreamExt};
use serde_json::Value;

pub use anthropic::AnthropicProvider;
pub use openai::OpenAiProvider;
pub use pool::ProviderPool;

/// An incrementally produced answer: one text chunk per item.
pub type TokenStream = BoxStream<'static, String>;

/// Capability interface for one upstream provider.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    /// Open a live token stream for a model.
    async fn open(
        &self,
        messages: &[Message],
        model: &str,
        opts: &GenerationOptions,
    ) -> Result<TokenStream>;

    /// Estimate tokens for a message list. Deterministic for equal input.
    fn estimate(&self, messages: &[Message], model: &str) -> usize;

    /// Cheap connectivity check used by the pool's startup warm-up.
    async fn warm_up(&self) -> Result<()>;
}

/// Decode an SSE byte stream into its `data:` JSON frames.
///
/// Buffers incrementally, splits on blank lines, strips the `data: ` prefix,
/// and stops at `[DONE]`.
pub(crate) fn sse_json_frames(input: BoxStream<'static, Bytes>) -> BoxStream<'static, Value> {
    let stream = stream::unfold((input, String::new()), |(mut input, mut buf)| async move {
        let parse_payload = |raw: &str| -> Option<Value> {
            let trimmed = raw.trim();
            if trimmed.is_empty() || trimmed.starts_with(':') {
                return None;
            }
            let payload = trimmed.strip_prefix("data:").map(str::trim_start).unwrap_or(trimmed);
            if payload == "[DONE]" {
                return None;
            }
            serde_json::from_str(payload).ok()
        };

        let is_done = |s: &str| {
            let t = s.trim();
            t == "[DONE]" || t == "data: [DONE]" || t == "data:[DONE]"
        };

        loop {
            if let Some(idx) = buf.find("\n\n") {
                let frame = buf[..idx].to_string();
                buf = buf[idx + 2..].to_string();
                if is_done(&frame) {
                    return None;
                }
                if let Some(v) = parse_payload(&frame) {
                    return Some((Ok(v), (input, buf)));
                }
                continue;
            }

            match input.next().await {
                Some(Ok(bytes)) => {
                    buf.push_str(&String::from_utf8_lossy(&bytes));
                }
                Some(Err(e)) => return Some((Err(e), (input, buf))),
                None => {
                    // EOF: one last attempt on the remaining buffer.
                    if is_done(&buf) {
                        return None;
                    }
                    let rest = std::mem::take(&mut buf);
                    return parse_payload(&rest).map(|v| (Ok(v), (input, String::new())));
                }
            }
        }
    });

    Box::pin(stream)
}

/// Map a reqwest response body into the crate's byte stream type.
pub(crate) fn body_stream(resp: reqwest::Response) -> BoxStream<'static, Bytes> {
    use futures::TryStreamExt;
    Box::pin(resp.bytes_stream().map_err(Error::Transport))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bytes_stream(chunks: Vec<&'static str>) -> BoxStream<'static, Bytes> {
        Box::pin(stream::iter(
            chunks.into_iter().map(|c| Ok(Bytes::from(c))),
        ))
    }

    #[tokio::test]
    async fn test_sse_frames_split_and_parsed() {
        let input = bytes_stream(vec![
            "data: {\"a\":1}\n\ndata: {\"a\":2}\n\n",
            "data: [DONE]\n\n",
        ]);
        let frames: Vec<Value> = sse_json_frames(input)
            .map(|r| r.unwrap())
            .collect()
            .await;
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0]["a"], 1);
        assert_eq!(frames[1]["a"], 2);
    }

    #[tokio::test]
    async fn test_sse_frames_reassemble_partial_chunks() {
        let input = bytes_stream(vec!["data: {\"text\":\"he", "llo\"}\n\n"]);
        let frames: Vec<Value> = sse_json_frames(input)
            .map(|r| r.unwrap())
            .collect()
            .await;
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["text"], "hello");
    }

    #[tokio::test]
    async fn test_sse_comments_skipped() {
        let input = bytes_stream(vec![": keepalive\n\ndata: {\"a\":1}\n\n"]);
        let frames: Vec<Value> = sse_json_frames(input)
            .map(|r| r.unwrap())
            .collect()
            .await;
        assert_eq!(frames.len(), 1);
    }
}
