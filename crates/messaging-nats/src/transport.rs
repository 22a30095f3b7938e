use crate::error::Error;
use crate::inbox::NatsInbox;
use crate::jetstream::JetStream;

use async_nats::client::RequestErrorKind;
use async_nats::{Client as AsyncNatsClient, HeaderMap};
use async_trait::async_trait;
use courier_messaging::transport::{Channel, Transport};
use courier_messaging::{HeaderMultiMap, WireMessage};
use tracing::debug;

/// A core NATS connection.
#[derive(Clone, Debug)]
pub struct NatsTransport {
    client: AsyncNatsClient,
}

impl NatsTransport {
    /// Wraps an established NATS connection.
    #[must_use]
    pub const fn new(client: AsyncNatsClient) -> Self {
        Self { client }
    }

    /// The underlying NATS client.
    #[must_use]
    pub const fn client(&self) -> &AsyncNatsClient {
        &self.client
    }
}

#[async_trait]
impl Channel for NatsTransport {
    type Error = Error;
    type Inbox = NatsInbox;

    async fn publish(&self, message: WireMessage) -> Result<(), Error> {
        let result = if message.headers.is_empty() {
            self.client
                .publish(message.subject, message.payload)
                .await
        } else {
            self.client
                .publish_with_headers(
                    message.subject,
                    to_header_map(&message.headers),
                    message.payload,
                )
                .await
        };

        result.map_err(Error::nats("publish"))
    }

    async fn subscribe(&self, subject: String) -> Result<NatsInbox, Error> {
        let subscriber = self
            .client
            .subscribe(subject)
            .await
            .map_err(Error::nats("subscribe"))?;

        Ok(NatsInbox::Plain(subscriber))
    }
}

#[async_trait]
impl Transport for NatsTransport {
    type Durable = JetStream;

    async fn request(&self, message: WireMessage) -> Result<WireMessage, Error> {
        let subject = message.subject.clone();
        let reply = self
            .client
            .request_with_headers(
                message.subject,
                to_header_map(&message.headers),
                message.payload,
            )
            .await
            .map_err(|error| match error.kind() {
                RequestErrorKind::NoResponders => Error::NoResponders { subject },
                _ => Error::nats("request")(error),
            })?;

        Ok(from_nats_message(&reply))
    }

    async fn durable(&self) -> Result<JetStream, Error> {
        Ok(JetStream::new(async_nats::jetstream::new(
            self.client.clone(),
        )))
    }

    /// Drains every subscription, flushes pending publishes and closes the connection.
    async fn close(&self) -> Result<(), Error> {
        debug!("draining connection");
        self.client.drain().await.map_err(Error::nats("drain"))
    }
}

/// Builds a NATS header map, keeping every value of repeated names.
pub fn to_header_map(headers: &HeaderMultiMap) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (name, value) in headers.iter() {
        map.append(name, value);
    }
    map
}

/// Converts a received NATS message to its wire form.
pub fn from_nats_message(message: &async_nats::Message) -> WireMessage {
    let headers = message
        .headers
        .as_ref()
        .map(|headers| {
            headers
                .iter()
                .flat_map(|(name, values)| {
                    values
                        .iter()
                        .map(move |value| (name.to_string(), value.as_str().to_string()))
                })
                .collect()
        })
        .unwrap_or_default();

    WireMessage {
        subject: message.subject.to_string(),
        payload: message.payload.clone(),
        headers,
    }
}
