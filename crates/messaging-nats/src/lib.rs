//! NATS implementation of the messaging crate.
//!
//! Plain delivery runs over core NATS, durable delivery over JetStream.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;
mod inbox;
mod jetstream;
mod tls;
mod transport;

pub use error::Error;
pub use inbox::{NatsAcker, NatsInbox};
pub use jetstream::JetStream;
pub use transport::NatsTransport;

pub use async_nats::jetstream::stream::Config as NatsStreamConfig;

use async_nats::{ConnectOptions, ServerAddr};
use courier_messaging::{Client, ClientOptions, Configuration, ConfigurationError, Credentials};
use tracing::{info, instrument, warn};

/// The name this client announces to the server.
pub const CONNECTION_NAME: &str = "courier";

/// A client over a NATS connection.
pub type NatsClient = Client<NatsTransport>;

/// Connects to NATS with default client options.
///
/// # Errors
///
/// See [`connect_with_options`].
pub async fn connect(config: &Configuration) -> Result<NatsClient, Error> {
    connect_with_options(config, ClientOptions::default()).await
}

/// Validates `config`, connects to the first reachable server and returns a client.
///
/// # Errors
///
/// Returns `Error::Configuration` if the configuration is invalid (no connection
/// is attempted), `Error::Tls` if the insecure TLS configuration cannot be built,
/// or `Error::Connect` if no server accepts the connection.
#[instrument(skip_all)]
pub async fn connect_with_options(
    config: &Configuration,
    options: ClientOptions,
) -> Result<NatsClient, Error> {
    let settings = config.validate()?;

    let addresses = settings
        .servers
        .iter()
        .map(|address| {
            address
                .parse::<ServerAddr>()
                .map_err(|error| ConfigurationError::InvalidServer {
                    address: address.clone(),
                    reason: error.to_string(),
                })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut connect_options = ConnectOptions::new().name(CONNECTION_NAME);

    connect_options = match settings.credentials {
        Credentials::None => connect_options,
        Credentials::UserPassword { username, password } => {
            connect_options.user_and_password(username, password)
        }
        Credentials::Token(token) => connect_options.token(token),
    };

    if settings.insecure_tls {
        warn!("TLS certificate verification is disabled");
        connect_options = connect_options
            .require_tls(true)
            .tls_client_config(tls::insecure_client_config()?);
    }

    info!(servers = ?settings.servers, "connecting to NATS");
    let client = connect_options.connect(addresses.as_slice()).await?;

    Ok(Client::with_options(NatsTransport::new(client), options))
}
