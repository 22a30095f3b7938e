//! Uniform publish/subscribe/request operations over plain and durable message
//! delivery, independent of the messaging system underneath.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// The client facade.
pub mod client;

/// Connection configuration and validation.
pub mod config;

/// The connection guard shared by every client operation.
pub mod connection;

/// Message handlers and acknowledgement policies.
pub mod delivery;

mod error;

/// Header maps in their caller-facing and wire forms.
pub mod headers;

/// Messages in their caller-facing and wire forms.
pub mod message;

/// Handles to active subscriptions.
pub mod subscription;

/// Capabilities a messaging system provides to the client.
pub mod transport;

pub use client::{Client, ClientOptions, REQUEST_TIMEOUT, RequestHeaders, StreamConfig};
pub use config::{
    Auth, AuthStrategy, Configuration, ConfigurationError, ConnectionSettings, Credentials,
};
pub use delivery::{AckPolicy, HandlerError, MessageHandler};
pub use error::{Error, MessageError, TransportError};
pub use headers::{HeaderMultiMap, Headers};
pub use message::{Message, WireMessage};
pub use subscription::Subscription;
