use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static INIT: OnceCell<()> = OnceCell::new();

/// Output shape of the log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Install the global subscriber. `RUST_LOG` wins over `level`.
///
/// Only the first call has an effect; later calls return `Ok(())`.
pub fn init_tracing(level: &str, format: LogFormat) -> Result<()> {
    let level: tracing::Level = level.parse().context("Invalid log level")?;
    INIT.get_or_init(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));
        let registry = tracing_subscriber::registry().with(filter);
        // A subscriber installed elsewhere (e.g. by a test harness) is left alone.
        let _ = match format {
            LogFormat::Text => registry.with(fmt::layer().with_target(false)).try_init(),
            LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
        };
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        init_tracing("debug", LogFormat::Text).unwrap();
        init_tracing("info", LogFormat::Json).unwrap();
        tracing::info!(component = "telemetry", "tracing initialised");
    }

    #[test]
    fn bad_level_is_rejected() {
        assert!(init_tracing("loud", LogFormat::Text).is_err());
    }
}
