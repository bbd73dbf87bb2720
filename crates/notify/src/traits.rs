//! Sink trait definition and shared error types.

use herald_core::EnrichedEvent;

/// Errors that can occur during event delivery.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("layout rendering failed: {0}")]
    Template(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("endpoint returned {status}: {body}")]
    Status { status: u16, body: String },
}

/// A destination that serializes and delivers enriched events.
///
/// Called from exactly one delivery task per receiver, so implementations
/// see events in dispatch order.
#[async_trait::async_trait]
pub trait Sink: Send + Sync {
    async fn send(&self, event: &EnrichedEvent) -> Result<(), SinkError>;

    /// Flush and release resources. Called once after the last `send`.
    async fn close(&self) -> Result<(), SinkError> {
        Ok(())
    }

    /// Short sink type name for logs (e.g. "file", "webhook").
    fn kind(&self) -> &str;
}
