//! Command-line arguments.

use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Clone, Parser)]
#[command(name = "herald", version, about = "Export cluster events to configured receivers")]
pub struct Cli {
    /// Path of the configuration document.
    #[arg(long, env = "HERALD_CONFIG", default_value = "config.yaml")]
    pub conf: PathBuf,

    /// Address the metrics endpoint listens on.
    #[arg(long = "metrics-address", env = "HERALD_METRICS_ADDRESS", default_value = "0.0.0.0:2112")]
    pub metrics_address: String,

    /// Include the resource version in metadata cache keys.
    #[arg(long = "strict-caching", env = "HERALD_STRICT_CACHING")]
    pub strict_caching: bool,
}
