//! Core type definitions: messages, requests, and the SSE event vocabulary.

pub mod events;
pub mod message;
pub mod request;

pub use events::GatewayEvent;
pub use message::{Message, MessageRole};
pub use request::{ChatRequest, Complexity, GenerationOptions, QueryIntent};
