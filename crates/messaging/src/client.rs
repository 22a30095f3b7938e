use crate::connection::Connection;
use crate::delivery::{AckPolicy, MessageHandler};
use crate::error::{Error, MessageError};
use crate::headers::Headers;
use crate::message::{Message, WireMessage};
use crate::subscription::Subscription;
use crate::transport::{Channel, Durable, Transport};

use std::time::Duration;

use tokio::time::timeout;
use tracing::{debug, info, instrument};

/// How long [`Client::request`] waits for a reply.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// The stream configuration type accepted by [`Client::durable_setup`].
pub type StreamConfig<T> = <<T as Transport>::Durable as Durable>::StreamConfig;

/// Where [`Client::request`] puts the caller's extra headers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RequestHeaders {
    /// Attach them to the outgoing request.
    #[default]
    Outgoing,

    /// Send the request without them and merge them into the returned reply.
    /// Kept for callers relying on the older behaviour.
    MergeIntoResponse,
}

/// Options for a [`Client`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ClientOptions {
    /// When durable (and plain) deliveries are acknowledged.
    pub ack_policy: AckPolicy,

    /// Where request headers go.
    pub request_headers: RequestHeaders,
}

/// Uniform publish/subscribe/request operations over plain and durable delivery.
///
/// Every operation first checks the connection and fails with
/// `Error::ConnectionInvalid`, without touching the transport, once it is closed.
/// The client can be shared between tasks; it adds no locking of its own.
#[derive(Debug)]
pub struct Client<T>
where
    T: Transport,
{
    connection: Connection<T>,
    options: ClientOptions,
}

impl<T> Client<T>
where
    T: Transport,
{
    /// Creates a client over an open transport with default options.
    pub fn new(transport: T) -> Self {
        Self::with_options(transport, ClientOptions::default())
    }

    /// Creates a client over an open transport.
    pub fn with_options(transport: T, options: ClientOptions) -> Self {
        Self {
            connection: Connection::new(transport),
            options,
        }
    }

    /// The options this client was created with.
    pub const fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Whether the connection is still open.
    pub fn is_connected(&self) -> bool {
        self.connection.is_open()
    }

    /// Closes the connection. Every later operation fails with `ConnectionInvalid`.
    ///
    /// # Errors
    ///
    /// Returns `Error::ConnectionInvalid` if already closed, or the transport's
    /// close error.
    pub async fn close(&self) -> Result<(), Error<T::Error>> {
        let transport = self.connection.take().ok_or(Error::ConnectionInvalid)?;

        info!("closing connection");
        transport.close().await.map_err(Error::Transport)
    }

    /// Publishes a text payload.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionInvalid`, `InvalidMessage` for an empty topic, or the
    /// transport's publish error.
    pub async fn publish(&self, topic: &str, text: &str) -> Result<(), Error<T::Error>> {
        self.publish_message(&Message::text(topic, text)).await
    }

    /// Publishes a text payload with headers.
    ///
    /// # Errors
    ///
    /// Same as [`Client::publish`].
    pub async fn publish_with_headers(
        &self,
        topic: &str,
        text: &str,
        headers: &Headers,
    ) -> Result<(), Error<T::Error>> {
        self.publish_message(&Message::text(topic, text).with_headers(headers.clone()))
            .await
    }

    /// Publishes a message; its raw payload, if any, is sent instead of its text.
    ///
    /// # Errors
    ///
    /// Same as [`Client::publish`], plus `InvalidMessage` if no payload is set.
    #[instrument(skip_all, fields(topic = %message.topic))]
    pub async fn publish_message(&self, message: &Message) -> Result<(), Error<T::Error>> {
        let transport = self.connection.get()?;

        publish_on(transport.as_ref(), message).await
    }

    /// Subscribes `handler` to a subject pattern.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionInvalid`, `InvalidMessage` for an empty topic, or the
    /// transport's subscribe error.
    #[instrument(skip(self, handler))]
    pub async fn subscribe<H>(
        &self,
        topic: &str,
        handler: H,
    ) -> Result<Subscription<T::Error>, Error<T::Error>>
    where
        H: MessageHandler,
    {
        let transport = self.connection.get()?;

        subscribe_on(transport.as_ref(), topic, handler, self.options.ack_policy).await
    }

    /// Sends a request and waits up to [`REQUEST_TIMEOUT`] for the reply.
    ///
    /// `headers` are attached to the request or merged into the reply depending on
    /// [`ClientOptions::request_headers`].
    ///
    /// # Errors
    ///
    /// Returns `ConnectionInvalid`, `InvalidMessage` for an empty subject, `Timeout`
    /// when the deadline elapses, or the transport's request error.
    #[instrument(skip(self, text, headers))]
    pub async fn request(
        &self,
        subject: &str,
        text: &str,
        headers: &Headers,
    ) -> Result<Message, Error<T::Error>> {
        let transport = self.connection.get()?;

        let mut request = Message::text(subject, text);
        if self.options.request_headers == RequestHeaders::Outgoing {
            request.headers.clone_from(headers);
        }
        let wire = WireMessage::try_from(&request)?;

        let reply = timeout(REQUEST_TIMEOUT, transport.request(wire))
            .await
            .map_err(|_| Error::Timeout {
                subject: subject.to_string(),
                timeout: REQUEST_TIMEOUT,
            })?
            .map_err(Error::Transport)?;

        let mut reply = Message::from(reply);
        if self.options.request_headers == RequestHeaders::MergeIntoResponse {
            reply.headers.extend(headers.clone());
        }

        debug!(reply_subject = %reply.topic, "received reply");
        Ok(reply)
    }

    /// Declares a stream: creates it if absent, otherwise overwrites its configuration.
    /// Repeating the call with the same configuration converges to the same stream.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionInvalid`, `StreamContext`, or the transport's lookup,
    /// create or update error.
    #[instrument(skip_all)]
    pub async fn durable_setup(&self, config: StreamConfig<T>) -> Result<(), Error<T::Error>> {
        let durable = self.durable().await?;
        let name = <T::Durable as Durable>::stream_name(&config).to_string();

        let result = if durable
            .stream_exists(&name)
            .await
            .map_err(Error::Transport)?
        {
            debug!(stream = %name, "stream exists; updating");
            durable.update_stream(config).await
        } else {
            debug!(stream = %name, "stream absent; creating");
            durable.create_stream(config).await
        };

        result.map_err(Error::Transport)
    }

    /// Deletes a stream.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionInvalid`, `StreamContext`, or the transport's delete error.
    #[instrument(skip(self))]
    pub async fn durable_delete(&self, name: &str) -> Result<(), Error<T::Error>> {
        let durable = self.durable().await?;

        durable.delete_stream(name).await.map_err(Error::Transport)
    }

    /// Publishes a text payload to a stream.
    ///
    /// # Errors
    ///
    /// Same as [`Client::durable_publish_message`].
    pub async fn durable_publish(&self, topic: &str, text: &str) -> Result<(), Error<T::Error>> {
        self.durable_publish_message(&Message::text(topic, text))
            .await
    }

    /// Publishes a text payload with headers to a stream.
    ///
    /// # Errors
    ///
    /// Same as [`Client::durable_publish_message`].
    pub async fn durable_publish_with_headers(
        &self,
        topic: &str,
        text: &str,
        headers: &Headers,
    ) -> Result<(), Error<T::Error>> {
        self.durable_publish_message(&Message::text(topic, text).with_headers(headers.clone()))
            .await
    }

    /// Publishes a message to a stream and waits for it to be stored. The store's
    /// acknowledgement metadata is discarded.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionInvalid`, `StreamContext`, `InvalidMessage`, or the
    /// transport's publish error.
    #[instrument(skip_all, fields(topic = %message.topic))]
    pub async fn durable_publish_message(&self, message: &Message) -> Result<(), Error<T::Error>> {
        let durable = self.durable().await?;

        publish_on(&durable, message).await
    }

    /// Subscribes `handler` to a subject covered by a stream.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionInvalid`, `StreamContext`, `InvalidMessage` for an empty
    /// topic, or the transport's subscribe error.
    #[instrument(skip(self, handler))]
    pub async fn durable_subscribe<H>(
        &self,
        topic: &str,
        handler: H,
    ) -> Result<Subscription<T::Error>, Error<T::Error>>
    where
        H: MessageHandler,
    {
        let durable = self.durable().await?;

        subscribe_on(&durable, topic, handler, self.options.ack_policy).await
    }

    async fn durable(&self) -> Result<T::Durable, Error<T::Error>> {
        let transport = self.connection.get()?;

        transport.durable().await.map_err(Error::StreamContext)
    }
}

async fn publish_on<C>(channel: &C, message: &Message) -> Result<(), Error<C::Error>>
where
    C: Channel,
{
    let wire = WireMessage::try_from(message)?;

    channel.publish(wire).await.map_err(Error::Transport)
}

async fn subscribe_on<C, H>(
    channel: &C,
    topic: &str,
    handler: H,
    policy: AckPolicy,
) -> Result<Subscription<C::Error>, Error<C::Error>>
where
    C: Channel,
    H: MessageHandler,
{
    if topic.is_empty() {
        return Err(MessageError::EmptyTopic.into());
    }

    let inbox = channel
        .subscribe(topic.to_string())
        .await
        .map_err(Error::Transport)?;

    debug!(%topic, "subscribed");
    Ok(Subscription::spawn(topic.to_string(), inbox, handler, policy))
}
