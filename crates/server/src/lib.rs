//! The `herald` process: configuration, logging, assembly and metrics.

pub mod app_config;
pub mod cli;
pub mod engine;
pub mod logging;
pub mod metrics;
pub mod startup;

pub use app_config::{AppConfig, LeaderElectionConfig};
pub use cli::Cli;
pub use engine::Engine;
