//! Control-plane adapters: the event watch, involved-object metadata
//! lookups and the Lease lock, all over the REST API with `reqwest`.

pub mod client;
pub mod lease;
pub mod metadata;
pub mod watch;

pub use client::{ApiStatus, KubeClient, KubeConfig, KubeError};
pub use lease::KubeLeaseLock;
pub use metadata::ApiMetadataFetcher;
pub use watch::KubeEventSource;
