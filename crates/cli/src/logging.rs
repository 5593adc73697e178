//! Log initialisation for the CLI

use std::io;

use anyhow::{anyhow, Result};
use tracing_subscriber::{fmt::Layer, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when neither `SCHEMATA_LOG` nor `RUST_LOG` is set
pub const DEFAULT_FILTER: &str = "schemata=info";

#[derive(Debug, Clone, Default)]
pub struct LoggingConfig {
    /// Filter directives (e.g. "schemata=debug,sqlx=warn")
    pub env_filter: Option<String>,
    /// Emit JSON lines instead of plain text
    pub json_format: bool,
    pub include_target: bool,
}

impl LoggingConfig {
    /// Verbose output used by `--verbose`
    pub fn verbose(mut self) -> Self {
        self.env_filter = Some("schemata=debug".to_string());
        self.include_target = true;
        self
    }

    pub fn json(mut self, json_format: bool) -> Self {
        self.json_format = json_format;
        self
    }

    fn filter(&self) -> Result<EnvFilter> {
        if let Some(directives) = self.env_filter.as_deref() {
            return EnvFilter::try_new(directives).map_err(|e| anyhow!("Invalid log filter: {}", e));
        }

        let directives = std::env::var("SCHEMATA_LOG")
            .or_else(|_| std::env::var("RUST_LOG"))
            .unwrap_or_else(|_| DEFAULT_FILTER.to_string());
        EnvFilter::try_new(&directives).map_err(|e| anyhow!("Invalid log filter '{}': {}", directives, e))
    }
}

/// Install the global subscriber. Logs go to stderr so command output on
/// stdout stays machine-readable.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = config.filter()?;

    if config.json_format {
        tracing_subscriber::registry()
            .with(filter)
            .with(Layer::new().with_writer(io::stderr).json())
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                Layer::new()
                    .with_writer(io::stderr)
                    .with_target(config.include_target)
                    .without_time(),
            )
            .try_init()?;
    }

    Ok(())
}
