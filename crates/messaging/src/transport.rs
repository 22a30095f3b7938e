use crate::error::TransportError;
use crate::message::WireMessage;

use std::fmt::Debug;

use async_trait::async_trait;

/// Settles a single delivered message with the transport.
#[async_trait]
pub trait Acknowledge: Send + Sync + 'static {
    /// The error type for acknowledgements.
    type Error: TransportError;

    /// Marks the message as processed.
    async fn ack(&self) -> Result<(), Self::Error>;

    /// Marks the message as failed so the transport may redeliver it.
    async fn nak(&self) -> Result<(), Self::Error>;
}

/// A message handed over by a transport, with the means to settle it.
#[derive(Debug)]
pub struct Delivery<A> {
    /// The delivered message.
    pub message: WireMessage,

    /// Settles the message. A no-op for plain deliveries.
    pub acker: A,
}

/// The receiving end of a subscription.
#[async_trait]
pub trait Inbox: Send + 'static {
    /// The error type for the inbox.
    type Error: TransportError;

    /// The acknowledger attached to each delivery.
    type Acker: Acknowledge<Error = Self::Error>;

    /// Waits for the next delivery. Returns `None` once the transport has ended the
    /// subscription.
    async fn next(&mut self) -> Option<Result<Delivery<Self::Acker>, Self::Error>>;

    /// Stops delivery at the transport.
    async fn unsubscribe(self) -> Result<(), Self::Error>;
}

/// Publish and subscribe, the capability both delivery modes share.
#[async_trait]
pub trait Channel: Send + Sync + 'static {
    /// The error type for the channel.
    type Error: TransportError;

    /// The inbox returned by subscriptions.
    type Inbox: Inbox<Error = Self::Error>;

    /// Publishes a message. Durable channels wait for the store to confirm it.
    async fn publish(&self, message: WireMessage) -> Result<(), Self::Error>;

    /// Subscribes to a subject pattern.
    async fn subscribe(&self, subject: String) -> Result<Self::Inbox, Self::Error>;
}

/// Durable (streamed) delivery: a channel backed by named, persistent streams.
#[async_trait]
pub trait Durable: Channel {
    /// The transport's native stream configuration.
    type StreamConfig: Clone + Debug + Send + Sync + 'static;

    /// The stream name a configuration declares.
    fn stream_name(config: &Self::StreamConfig) -> &str;

    /// Whether a stream with the given name exists.
    async fn stream_exists(&self, name: &str) -> Result<bool, Self::Error>;

    /// Creates a stream.
    async fn create_stream(&self, config: Self::StreamConfig) -> Result<(), Self::Error>;

    /// Overwrites an existing stream's configuration.
    async fn update_stream(&self, config: Self::StreamConfig) -> Result<(), Self::Error>;

    /// Deletes a stream.
    async fn delete_stream(&self, name: &str) -> Result<(), Self::Error>;
}

/// A connection to a messaging system. The transport itself is the plain channel.
#[async_trait]
pub trait Transport: Channel {
    /// The durable capability of this transport.
    type Durable: Durable<Error = Self::Error>;

    /// Sends a request and waits for a single reply.
    ///
    /// Callers bound the wait; implementations may wait indefinitely when no
    /// responder exists.
    async fn request(&self, message: WireMessage) -> Result<WireMessage, Self::Error>;

    /// Acquires the durable context.
    async fn durable(&self) -> Result<Self::Durable, Self::Error>;

    /// Closes the connection.
    async fn close(&self) -> Result<(), Self::Error>;
}
