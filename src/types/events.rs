//! The SSE event vocabulary emitted on `/chat/stream`.
//!
//! Within one request, events are produced in a strict total order:
//! `heartbeat`, optional `preface`, optional `slow_start`, `token`s in
//! generation order, optional advisory events, then a terminal `done` or
//! `error`.

use serde_json::{json, Value};

/// One wire event on the SSE response.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayEvent {
    /// Connection liveness, sent immediately on open.
    Heartbeat,
    /// Fast low-latency draft shown before the real stream.
    Preface { text: String },
    /// Advisory: first token was late.
    SlowStart { ttfb_ms: u64 },
    /// One chunk of the generated answer.
    Token { text: String },
    /// Forwarded progress from the external search collaborator.
    SearchStatus { status: String },
    /// Citations accompanying a web-augmented answer.
    Sources { sources: Vec<String> },
    /// Advisory: ingested-document context was attached.
    IngestionContext { titles: Vec<String> },
    /// Advisory: background research was observed for this conversation.
    ResearchThinking { status: String },
    /// Terminal success.
    Done { ttfb_ms: u64, tokens_per_sec: f64 },
    /// Terminal failure.
    Error { error: String },
}

impl GatewayEvent {
    /// SSE `event:` field name.
    pub fn name(&self) -> &'static str {
        match self {
            GatewayEvent::Heartbeat => "heartbeat",
            GatewayEvent::Preface { .. } => "preface",
            GatewayEvent::SlowStart { .. } => "slow_start",
            GatewayEvent::Token { .. } => "token",
            GatewayEvent::SearchStatus { .. } => "search_status",
            GatewayEvent::Sources { .. } => "sources",
            GatewayEvent::IngestionContext { .. } => "ingestion_context",
            GatewayEvent::ResearchThinking { .. } => "research_thinking",
            GatewayEvent::Done { .. } => "done",
            GatewayEvent::Error { .. } => "error",
        }
    }

    /// SSE `data:` payload. `token` carries the raw text chunk; everything
    /// else is a small JSON object.
    pub fn payload(&self) -> String {
        match self {
            GatewayEvent::Heartbeat => String::new(),
            GatewayEvent::Token { text } => text.clone(),
            other => other.payload_json().to_string(),
        }
    }

    fn payload_json(&self) -> Value {
        match self {
            GatewayEvent::Heartbeat => json!({}),
            GatewayEvent::Preface { text } => json!({ "text": text }),
            GatewayEvent::SlowStart { ttfb_ms } => json!({ "ttfb_ms": ttfb_ms }),
            GatewayEvent::Token { text } => json!(text),
            GatewayEvent::SearchStatus { status } => json!({ "status": status }),
            GatewayEvent::Sources { sources } => json!({ "sources": sources }),
            GatewayEvent::IngestionContext { titles } => json!({ "titles": titles }),
            GatewayEvent::ResearchThinking { status } => json!({ "status": status }),
            GatewayEvent::Done {
                ttfb_ms,
                tokens_per_sec,
            } => json!({ "ttfb_ms": ttfb_ms, "tokens_per_sec": tokens_per_sec }),
            GatewayEvent::Error { error } => json!({ "error": error }),
        }
    }

    /// Terminal events close the response.
    pub fn is_terminal(&self) -> bool {
        matches!(self, GatewayEvent::Done { .. } | GatewayEvent::Error { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names() {
        assert_eq!(GatewayEvent::Heartbeat.name(), "heartbeat");
        assert_eq!(
            GatewayEvent::Done {
                ttfb_ms: 10,
                tokens_per_sec: 5.0
            }
            .name(),
            "done"
        );
    }

    #[test]
    fn test_token_payload_is_raw_text() {
        let ev = GatewayEvent::Token {
            text: "hello".into(),
        };
        assert_eq!(ev.payload(), "hello");
        assert!(!ev.is_terminal());
    }

    #[test]
    fn test_done_payload_shape() {
        let ev = GatewayEvent::Done {
            ttfb_ms: 120,
            tokens_per_sec: 42.5,
        };
        let v: Value = serde_json::from_str(&ev.payload()).unwrap();
        assert_eq!(v["ttfb_ms"], 120);
        assert!(ev.is_terminal());
    }

    #[test]
    fn test_error_is_terminal() {
        let ev = GatewayEvent::Error {
            error: "exhausted".into(),
        };
        assert!(ev.is_terminal());
        assert!(ev.payload().contains("exhausted"));
    }
}
