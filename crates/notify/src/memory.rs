use std::sync::{Mutex, PoisonError};

use herald_core::EnrichedEvent;

use crate::traits::{Sink, SinkError};

/// Keeps delivered events in memory, for tests and dry runs.
#[derive(Debug, Default)]
pub struct InMemorySink {
    events: Mutex<Vec<EnrichedEvent>>,
    send_update_event: bool,
}

impl InMemorySink {
    pub fn new(send_update_event: bool) -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            send_update_event,
        }
    }

    pub fn events(&self) -> Vec<EnrichedEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait::async_trait]
impl Sink for InMemorySink {
    async fn send(&self, event: &EnrichedEvent) -> Result<(), SinkError> {
        if event.is_update && !self.send_update_event {
            return Ok(());
        }
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
        Ok(())
    }

    async fn close(&self) -> Result<(), SinkError> {
        tracing::info!(events = self.len(), "in-memory sink closed");
        Ok(())
    }

    fn kind(&self) -> &str {
        "inMemory"
    }
}
