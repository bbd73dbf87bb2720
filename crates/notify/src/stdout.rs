use herald_core::EnrichedEvent;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::layout::{encode, Layout};
use crate::traits::{Sink, SinkError};

/// Writes each event as one JSON line to standard output.
pub struct StdoutSink {
    out: Mutex<tokio::io::Stdout>,
    layout: Option<Layout>,
    de_dot: bool,
}

impl StdoutSink {
    pub fn new(layout: Option<Layout>, de_dot: bool) -> Self {
        Self {
            out: Mutex::new(tokio::io::stdout()),
            layout,
            de_dot,
        }
    }
}

#[async_trait::async_trait]
impl Sink for StdoutSink {
    async fn send(&self, event: &EnrichedEvent) -> Result<(), SinkError> {
        let value = encode(event, self.layout.as_ref(), self.de_dot)?;
        let mut line = serde_json::to_vec(&value)?;
        line.push(b'\n');

        let mut out = self.out.lock().await;
        out.write_all(&line).await?;
        out.flush().await?;
        Ok(())
    }

    fn kind(&self) -> &str {
        "stdout"
    }
}
