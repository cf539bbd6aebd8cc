//! Structured logging setup

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global subscriber
///
/// `level` is anything `EnvFilter` accepts, from `info` to
/// `parley_gateway=debug,info`.
pub fn init_logging(level: &str, json_format: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::try_new(level).map_err(|e| anyhow::anyhow!("Invalid log level '{}': {}", level, e))?;
    let registry = tracing_subscriber::registry().with(filter);

    if json_format {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .try_init()?;
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init()?;
    }

    Ok(())
}
