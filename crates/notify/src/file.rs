//! Append-only JSON-lines file sink.

use std::path::{Path, PathBuf};

use herald_core::EnrichedEvent;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::layout::{encode, Layout};
use crate::traits::{Sink, SinkError};

pub struct FileSink {
    path: PathBuf,
    file: Mutex<tokio::fs::File>,
    layout: Option<Layout>,
    de_dot: bool,
    send_update_event: bool,
}

impl FileSink {
    /// Open (or create) `path` for appending.
    pub fn open(
        path: impl AsRef<Path>,
        layout: Option<Layout>,
        de_dot: bool,
        send_update_event: bool,
    ) -> Result<Self, SinkError> {
        let path = path.as_ref().to_path_buf();
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(tokio::fs::File::from_std(file)),
            layout,
            de_dot,
            send_update_event,
        })
    }
}

#[async_trait::async_trait]
impl Sink for FileSink {
    async fn send(&self, event: &EnrichedEvent) -> Result<(), SinkError> {
        if event.is_update && !self.send_update_event {
            return Ok(());
        }

        let value = encode(event, self.layout.as_ref(), self.de_dot)?;
        let mut line = serde_json::to_vec(&value)?;
        line.push(b'\n');

        let mut file = self.file.lock().await;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), SinkError> {
        let mut file = self.file.lock().await;
        file.flush().await?;
        file.sync_all().await?;
        tracing::debug!(path = %self.path.display(), "file sink closed");
        Ok(())
    }

    fn kind(&self) -> &str {
        "file"
    }
}
