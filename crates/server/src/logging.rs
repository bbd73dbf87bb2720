//! Subscriber setup. `RUST_LOG` wins over the configured `logLevel`.

use anyhow::{anyhow, bail};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl LogFormat {
    pub fn parse(format: &str) -> anyhow::Result<Self> {
        match format {
            "json" => Ok(Self::Json),
            "" | "pretty" => Ok(Self::Pretty),
            other => bail!("unknown log format: {other}"),
        }
    }
}

/// Directive string used when `RUST_LOG` is unset.
pub fn directive(level: &str) -> String {
    if level.is_empty() {
        "info".to_string()
    } else {
        level.to_ascii_lowercase()
    }
}

fn filter(level: &str) -> anyhow::Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(directive(level)).map_err(|e| anyhow!("invalid log level {level:?}: {e}"))
}

pub fn init(level: &str, format: &str) -> anyhow::Result<()> {
    let format = LogFormat::parse(format)?;
    let filter = filter(level)?;

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    let installed = match format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Pretty => builder.try_init(),
    };
    installed.map_err(|e| anyhow!("cannot install log subscriber: {e}"))
}
