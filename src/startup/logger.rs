//! Logging initialisation and startup summary

use crate::config::{Config, LoggingConfig};
use crate::error::{RefreshError, Result};
use tracing::{info, warn};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over the configured level.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.level));

    let registry = tracing_subscriber::registry().with(env_filter);

    let result = if config.format == "json" {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(false)
                    .with_writer(std::io::stderr),
            )
            .try_init()
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_thread_ids(true)
                    .with_writer(std::io::stderr),
            )
            .try_init()
    };

    result.map_err(|e| RefreshError::config(format!("Failed to initialise logging: {}", e)))
}

/// Startup logger for configuration summary
pub struct StartupLogger;

impl StartupLogger {
    /// Display the resolved configuration
    pub fn display_startup_info(config: &Config, version: &str) {
        info!("cbs-refresh v{} starting", version);

        info!("Refresh settings:");
        info!("   Buffer period: {}s", config.refresh.buffer_period_secs);
        info!("   Initialize timeout: {}s", config.refresh.initialize_timeout_secs);

        match &config.identity {
            Some(identity) => {
                info!("Identity:");
                info!("   Audience: {}", identity.audience());
                if identity.shared_access_key.is_some() {
                    info!("   Shared access key: configured");
                }
            }
            None => warn!("No identity configured"),
        }

        info!("Logging: level={} format={}", config.logging.level, config.logging.format);
    }
}
