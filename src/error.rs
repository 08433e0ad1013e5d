use std::net::SocketAddr;

use snafu::{Location, Snafu};

use crate::config::ConfigError;
use crate::database::DatabaseError;
use crate::fivem::ServerListingError;
use crate::job::stream_ingest::IngestError;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ApplicationError {
    /// could not read the configuration from the environment
    #[snafu(display("could not load configuration at {location}: {source}"))]
    ConfigLoad {
        source: ConfigError,
        #[snafu(implicit)]
        location: Location,
    },

    /// Could not initialize the logger
    #[snafu(display("could not initialize the logger at {location}: {source}"))]
    InitializeLogger {
        source: tracing::subscriber::SetGlobalDefaultError,
        #[snafu(implicit)]
        location: Location,
    },

    /// Could not set up the database client
    #[snafu(display("could not connect to the database at {location}: {source}"))]
    ConnectDatabase {
        source: DatabaseError,
        #[snafu(implicit)]
        location: Location,
    },

    /// Could not set up the server listing client
    #[snafu(display("could not create the server listing client at {location}: {source}"))]
    ServerListing {
        source: ServerListingError,
        #[snafu(implicit)]
        location: Location,
    },

    /// Could not bind to the given address, check if it's already in use
    #[snafu(display("could not bind to {address} at {location}: {source}"))]
    BindAddress {
        address: SocketAddr,
        source: std::io::Error,
        #[snafu(implicit)]
        location: Location,
    },

    /// Could not serve the application
    #[snafu(display("web server stopped at {location}: {source}"))]
    WebServer {
        source: std::io::Error,
        #[snafu(implicit)]
        location: Location,
    },

    /// The stream ingest run failed
    #[snafu(display("stream ingest failed at {location}: {source}"))]
    StreamIngest {
        source: IngestError,
        #[snafu(implicit)]
        location: Location,
    },
}
