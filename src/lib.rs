//! Streaming chat gateway.
//!
//! One admitted request flows through a fixed pipeline: the admission gate,
//! the deadline-boxed context fan-out, the provider router, live candidate
//! probing, and SSE delivery with a flush cadence. A response-level cache
//! sits in front of generation, and an optional fast preface and a bounded
//! research-injection poll race alongside the main stream.
//!
//! ```no_run
//! use chat_gateway::config::GatewayConfig;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = GatewayConfig::from_env();
//!     chat_gateway::server::serve(config).await?;
//!     Ok(())
//! }
//! ```

pub mod admission;
pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod hooks;
pub mod providers;
pub mod router;
pub mod routes;
pub mod server;
pub mod store;
pub mod stream;
pub mod tokens;
pub mod types;

pub use error::Error;

/// Crate-wide result type.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Boxed fallible stream, the shape every incremental source in this crate
/// takes.
pub type BoxStream<'a, T> =
    std::pin::Pin<Box<dyn futures::Stream<Item = Result<T>> + Send + 'a>>;
