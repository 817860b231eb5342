use thiserror::Error;

/// Structured error context for better error handling and debugging.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorContext {
    /// Field or configuration key that caused the error (e.g. "config.bind_addr").
    pub field: Option<String>,
    /// Additional context (e.g. expected value, upstream body excerpt).
    pub details: Option<String>,
    /// Component where the error originated (e.g. "probe", "provider_pool").
    pub source: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// Why an admission attempt was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionLimit {
    /// The caller already has the maximum number of in-flight streams.
    Concurrency,
    /// The caller's rate bucket is empty.
    RateLimit,
}

impl std::fmt::Display for AdmissionLimit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdmissionLimit::Concurrency => write!(f, "concurrency limit"),
            AdmissionLimit::RateLimit => write!(f, "rate limit"),
        }
    }
}

/// Unified error type for the gateway.
///
/// Degradations that must stay invisible to the caller (a context source
/// timing out, a single candidate failing its probe, a refused cache write)
/// are not variants here; they are absorbed and logged where they happen.
#[derive(Debug, Error)]
pub enum Error {
    /// Request refused before any work began. Maps to HTTP 429.
    #[error("admission rejected for caller {caller_id}: {limit}")]
    AdmissionRejected {
        caller_id: String,
        limit: AdmissionLimit,
    },

    /// Every provider candidate failed or timed out during probing.
    #[error("all provider candidates exhausted ({attempted} attempted)")]
    AllCandidatesExhausted { attempted: usize },

    /// The active upstream stream failed after generation began.
    #[error("stream error from {provider}: {message}")]
    Stream { provider: String, message: String },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("configuration error: {message}{}", format_context(.context))]
    Configuration {
        message: String,
        context: ErrorContext,
    },

    #[error("runtime error: {message}{}", format_context(.context))]
    Runtime {
        message: String,
        context: ErrorContext,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

fn format_context(ctx: &ErrorContext) -> String {
    let mut parts = Vec::new();
    if let Some(ref field) = ctx.field {
        parts.push(format!("field: {}", field));
    }
    if let Some(ref details) = ctx.details {
        parts.push(format!("details: {}", details));
    }
    if let Some(ref source) = ctx.source {
        parts.push(format!("source: {}", source));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(", "))
    }
}

impl Error {
    pub fn runtime(msg: impl Into<String>) -> Self {
        Error::Runtime {
            message: msg.into(),
            context: ErrorContext::new(),
        }
    }

    pub fn runtime_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Runtime {
            message: msg.into(),
            context,
        }
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        Error::Configuration {
            message: msg.into(),
            context: ErrorContext::new(),
        }
    }

    pub fn configuration_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Configuration {
            message: msg.into(),
            context,
        }
    }

    /// Extract error context if available.
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::Configuration { context, .. } | Error::Runtime { context, .. } => Some(context),
            _ => None,
        }
    }

    /// Whether this error terminates the whole request rather than one attempt.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Error::AdmissionRejected { .. } | Error::AllCandidatesExhausted { .. }
        )
    }
}
