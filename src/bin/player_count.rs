use api2db::config::{LogConfig, PlayerCountConfig};
use api2db::database::Supabase;
use api2db::error::{
    ApplicationError, BindAddressSnafu, ConfigLoadSnafu, ConnectDatabaseSnafu, ServerListingSnafu,
    WebServerSnafu,
};
use api2db::fivem::ServerListing;
use api2db::job::player_count::{self, PlayerCountJob};
use api2db::logger;
use dotenvy::dotenv;
use snafu::ResultExt as _;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<(), ApplicationError> {
    dotenv().ok();

    let log = LogConfig::from_env().context(ConfigLoadSnafu)?;
    let _guard = logger::init(&log, "player_count.log")?;

    let config = PlayerCountConfig::from_env()
        .inspect_err(|error| tracing::error!(%error, "could not load configuration"))
        .context(ConfigLoadSnafu)?;

    let table = Supabase::connect(&config.supabase).context(ConnectDatabaseSnafu)?;
    let listing = ServerListing::new(&config.fivem).context(ServerListingSnafu)?;
    let job = PlayerCountJob::new(listing, table, config.fivem.server_id.clone());

    let listener = TcpListener::bind(config.host)
        .await
        .context(BindAddressSnafu { address: config.host })?;

    tracing::info!(address = %config.host, "serving player count requests");

    axum::serve(listener, player_count::router(job))
        .await
        .context(WebServerSnafu)
}
