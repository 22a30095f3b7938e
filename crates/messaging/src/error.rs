use std::error::Error as StdError;
use std::fmt::Debug;
use std::time::Duration;

use thiserror::Error;

/// Marker trait for transport errors.
pub trait TransportError: Debug + StdError + Send + Sync + 'static {}

/// Reasons an outbound message is rejected before it reaches a transport.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum MessageError {
    /// The topic is empty.
    #[error("message topic must not be empty")]
    EmptyTopic,

    /// A header name is not a visible ASCII token, or its value contains a line break.
    #[error("invalid header '{name}'")]
    InvalidHeader {
        /// The offending header name.
        name: String,
    },

    /// Neither a raw nor a text payload was set.
    #[error("message has neither a raw nor a text payload")]
    MissingPayload,
}

/// Errors returned by client operations.
#[derive(Debug, Error)]
pub enum Error<E>
where
    E: TransportError,
{
    /// The connection was closed or never established. No transport call was made.
    #[error("the connection is not valid")]
    ConnectionInvalid,

    /// The message failed validation.
    #[error(transparent)]
    InvalidMessage(#[from] MessageError),

    /// The durable context could not be acquired.
    #[error("cannot acquire stream context: {0}")]
    StreamContext(#[source] E),

    /// The subscription's delivery task ended abnormally.
    #[error("subscription delivery task failed")]
    Task,

    /// No response arrived before the request deadline.
    #[error("request on '{subject}' timed out after {timeout:?}")]
    Timeout {
        /// The request subject.
        subject: String,

        /// The deadline that elapsed.
        timeout: Duration,
    },

    /// The underlying transport failed.
    #[error(transparent)]
    Transport(E),
}
