use api2db::config::{LogConfig, StreamIngestConfig};
use api2db::error::{ApplicationError, ConfigLoadSnafu, StreamIngestSnafu};
use api2db::job::stream_ingest;
use api2db::logger;
use dotenvy::dotenv;
use snafu::ResultExt as _;

#[tokio::main]
async fn main() -> Result<(), ApplicationError> {
    dotenv().ok();

    let log = LogConfig::from_env().context(ConfigLoadSnafu)?;
    let _guard = logger::init(&log, "stream_ingest.log")?;

    let config = StreamIngestConfig::from_env()
        .inspect_err(|error| tracing::error!(%error, "could not load configuration"))
        .context(ConfigLoadSnafu)?;

    let summary = stream_ingest::run(&config)
        .await
        .inspect_err(|error| tracing::error!(%error, "stream ingest failed"))
        .context(StreamIngestSnafu)?;

    tracing::info!(?summary, "stream ingest finished");
    Ok(())
}
