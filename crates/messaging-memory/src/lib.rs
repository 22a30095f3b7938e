//! In-memory implementation of the messaging crate.
//!
//! Behaves like a single-node broker: plain subjects with wildcard matching,
//! named streams with replay and redelivery, and request/reply through
//! registered responders. Every call that reaches the transport is recorded, and
//! failures can be scheduled per operation.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod broker;
mod durable;
mod error;
mod inbox;
mod subject;

pub use broker::{Call, Operation};
pub use durable::{MemoryDurable, MemoryStreamConfig};
pub use error::Error;
pub use inbox::{MemoryAcker, MemoryDelivery, MemoryInbox};

use broker::Broker;

use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::sync::Arc;

use async_trait::async_trait;
use courier_messaging::transport::{Channel, Transport};
use courier_messaging::{
    Client, ClientOptions, Configuration, ConfigurationError, WireMessage,
};
use tracing::{debug, info};

/// A client over the in-memory transport.
pub type MemoryClient = Client<MemoryTransport>;

/// An in-memory messaging transport. Clones share the same broker.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    broker: Arc<Broker>,
}

impl MemoryTransport {
    /// Creates a transport with an empty broker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates `config` the way a networked transport would before connecting,
    /// then creates a transport.
    ///
    /// # Errors
    ///
    /// Returns the configuration's validation error.
    pub fn connect(config: &Configuration) -> Result<Self, ConfigurationError> {
        let settings = config.validate()?;
        info!(servers = ?settings.servers, "connected to in-memory broker");

        Ok(Self::new())
    }

    /// Creates a client over a handle to this transport.
    #[must_use]
    pub fn client(&self, options: ClientOptions) -> MemoryClient {
        Client::with_options(self.clone(), options)
    }

    /// Replies to requests matching `pattern` with the result of `responder`.
    pub fn respond<F>(&self, pattern: impl Into<String>, responder: F)
    where
        F: Fn(WireMessage) -> WireMessage + Send + Sync + 'static,
    {
        self.broker.add_responder(pattern.into(), Arc::new(responder));
    }

    /// Every call that reached the transport, oldest first.
    #[must_use]
    pub fn calls(&self) -> Vec<Call> {
        self.broker.calls()
    }

    /// Forgets recorded calls.
    pub fn clear_calls(&self) {
        self.broker.clear_calls();
    }

    /// Makes the next call performing `operation` fail with `Error::Injected`.
    pub fn fail_next(&self, operation: Operation) {
        self.broker.fail_next(operation);
    }

    /// The configuration of a stream, if it exists.
    #[must_use]
    pub fn stream_config(&self, name: &str) -> Option<MemoryStreamConfig> {
        self.broker.stream_config(name)
    }

    /// The number of messages a stream retains, if it exists.
    #[must_use]
    pub fn stream_len(&self, name: &str) -> Option<usize> {
        self.broker.stream_len(name)
    }
}

impl Debug for MemoryTransport {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("MemoryTransport").finish_non_exhaustive()
    }
}

#[async_trait]
impl Channel for MemoryTransport {
    type Error = Error;
    type Inbox = MemoryInbox;

    async fn publish(&self, message: WireMessage) -> Result<(), Error> {
        self.broker.begin(Call::Publish {
            subject: message.subject.clone(),
        })?;

        self.broker.publish(&message);
        Ok(())
    }

    async fn subscribe(&self, subject: String) -> Result<MemoryInbox, Error> {
        self.broker.begin(Call::Subscribe {
            subject: subject.clone(),
        })?;

        let (id, receiver) = self.broker.subscribe(subject.clone());
        Ok(MemoryInbox::plain(
            Arc::clone(&self.broker),
            subject,
            id,
            receiver,
        ))
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    type Durable = MemoryDurable;

    async fn request(&self, message: WireMessage) -> Result<WireMessage, Error> {
        self.broker.begin(Call::Request {
            subject: message.subject.clone(),
        })?;

        match self.broker.responder_for(&message.subject) {
            Some(responder) => Ok(responder(message)),
            None => {
                debug!(subject = %message.subject, "no responder; waiting indefinitely");
                std::future::pending().await
            }
        }
    }

    async fn durable(&self) -> Result<MemoryDurable, Error> {
        self.broker.begin(Call::AcquireDurable)?;

        Ok(MemoryDurable::new(Arc::clone(&self.broker)))
    }

    async fn close(&self) -> Result<(), Error> {
        self.broker.begin(Call::Close)?;

        self.broker.close();
        Ok(())
    }
}
