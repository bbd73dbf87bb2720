//! Receiver definitions as they appear in the configuration document.
//!
//! ```yaml
//! receivers:
//!   - name: dump
//!     file:
//!       path: /var/log/events.jsonl
//!       deDot: true
//!   - name: alerts
//!     webhook:
//!       endpoint: https://hooks.example.com/${HOOK_ID}
//!       headers:
//!         Authorization: Bearer ${HOOK_TOKEN}
//! ```

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;

use crate::file::FileSink;
use crate::layout::Layout;
use crate::memory::InMemorySink;
use crate::stdout::StdoutSink;
use crate::traits::{Sink, SinkError};
use crate::webhook::WebhookSink;

#[derive(Debug, Clone, Deserialize)]
pub struct ReceiverConfig {
    pub name: String,
    #[serde(flatten)]
    pub sink: SinkConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SinkConfig {
    File(FileConfig),
    Stdout(StdoutConfig),
    Webhook(WebhookConfig),
    InMemory(InMemoryConfig),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileConfig {
    pub path: PathBuf,
    #[serde(default)]
    pub layout: Option<serde_json::Value>,
    #[serde(default)]
    pub de_dot: bool,
    #[serde(default, alias = "sentUpdateEvent")]
    pub send_update_event: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StdoutConfig {
    pub layout: Option<serde_json::Value>,
    pub de_dot: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookConfig {
    pub endpoint: String,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub layout: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct InMemoryConfig {
    #[serde(alias = "sentUpdateEvent")]
    pub send_update_event: bool,
}

fn layout(tree: &Option<serde_json::Value>) -> Result<Option<Layout>, SinkError> {
    tree.clone().map(Layout::new).transpose()
}

impl SinkConfig {
    /// Construct the sink. Files are opened and templates checked here.
    pub fn build(&self) -> Result<Arc<dyn Sink>, SinkError> {
        Ok(match self {
            Self::File(c) => Arc::new(FileSink::open(
                &c.path,
                layout(&c.layout)?,
                c.de_dot,
                c.send_update_event,
            )?),
            Self::Stdout(c) => Arc::new(StdoutSink::new(layout(&c.layout)?, c.de_dot)),
            Self::Webhook(c) => Arc::new(WebhookSink::from_config(
                &c.endpoint,
                c.method.as_deref(),
                c.headers.clone(),
                layout(&c.layout)?,
            )?),
            Self::InMemory(c) => Arc::new(InMemorySink::new(c.send_update_event)),
        })
    }
}
