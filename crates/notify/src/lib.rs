//! Event delivery for herald.
//!
//! This crate provides:
//! - `Sink` trait for pluggable receivers
//! - File, stdout, webhook and in-memory sinks
//! - Minijinja layouts that reshape the event body
//! - `ChannelRegistry`, the per-receiver queueing behind route dispatch

pub mod config;
pub mod file;
pub mod layout;
pub mod memory;
pub mod registry;
pub mod stdout;
pub mod traits;
pub mod webhook;

pub use config::{ReceiverConfig, SinkConfig};
pub use layout::Layout;
pub use memory::InMemorySink;
pub use registry::{ChannelRegistry, RegistrySnapshot, DEFAULT_QUEUE_CAPACITY};
pub use traits::{Sink, SinkError};
