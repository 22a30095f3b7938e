use crate::broker::Operation;

use courier_messaging::TransportError;
use thiserror::Error;

/// Errors raised by the in-memory transport.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// The transport was closed.
    #[error("transport is closed")]
    Closed,

    /// A failure scheduled with `MemoryTransport::fail_next`.
    #[error("injected failure for {0:?}")]
    Injected(Operation),

    /// No stream captures the subject.
    #[error("no stream captures subject '{0}'")]
    NoStream(String),

    /// A stream with the same name already exists.
    #[error("stream '{0}' already exists")]
    StreamExists(String),

    /// The named stream does not exist.
    #[error("stream '{0}' not found")]
    StreamNotFound(String),
}

impl TransportError for Error {}
