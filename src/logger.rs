use std::result::Result;

use snafu::ResultExt;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::layer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{registry, EnvFilter, Layer};

use crate::config::LogConfig;
use crate::error::{ApplicationError, InitializeLoggerSnafu};

/// Installs the global subscriber: pretty console output, plus a daily JSON
/// file under `LOG_DIR` when it is configured. Keep the guard alive until exit
/// or buffered file lines are lost.
pub fn init(config: &LogConfig, file_name: &str) -> Result<Option<WorkerGuard>, ApplicationError> {
    let (file_layer, guard) = match &config.dir {
        Some(dir) => {
            let file_appender = tracing_appender::rolling::daily(dir, file_name);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

            let layer = layer().with_ansi(false).json().with_writer(non_blocking);

            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let console_layer = layer().pretty().with_writer(std::io::stdout).with_filter(filter);

    let subscriber = registry().with(console_layer).with(file_layer);
    tracing::subscriber::set_global_default(subscriber).context(InitializeLoggerSnafu)?;

    Ok(guard)
}
