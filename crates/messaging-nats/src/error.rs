use courier_messaging::{ConfigurationError, TransportError};
use thiserror::Error;

/// Errors raised by the NATS transport.
#[derive(Debug, Error)]
pub enum Error {
    /// The configuration was rejected before connecting.
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// The connection could not be established.
    #[error("failed to connect: {0}")]
    Connect(#[from] async_nats::ConnectError),

    /// A NATS or JetStream operation failed.
    #[error("{operation} failed: {source}")]
    Nats {
        /// The operation that failed.
        operation: &'static str,

        /// The client library's error.
        source: async_nats::Error,
    },

    /// A request found nobody listening on its subject.
    #[error("no responders on '{subject}'")]
    NoResponders {
        /// The request subject.
        subject: String,
    },

    /// The TLS client configuration could not be built.
    #[error("invalid TLS configuration: {0}")]
    Tls(#[from] rustls::Error),
}

impl Error {
    /// Wraps a client library error raised by `operation`.
    pub(crate) fn nats<E>(operation: &'static str) -> impl FnOnce(E) -> Self
    where
        E: Into<async_nats::Error>,
    {
        move |error| Self::Nats {
            operation,
            source: error.into(),
        }
    }
}

impl TransportError for Error {}
