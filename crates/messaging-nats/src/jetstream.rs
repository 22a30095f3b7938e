use crate::error::Error;
use crate::inbox::NatsInbox;
use crate::transport::to_header_map;

use async_nats::jetstream::Context;
use async_nats::jetstream::consumer::pull::Config as PullConfig;
use async_nats::jetstream::consumer::{AckPolicy, DeliverPolicy};
use async_nats::jetstream::stream::Config as NatsStreamConfig;
use async_trait::async_trait;
use courier_messaging::WireMessage;
use courier_messaging::transport::{Channel, Durable};
use tracing::debug;

/// The JetStream context of a NATS connection.
#[derive(Clone, Debug)]
pub struct JetStream {
    context: Context,
}

impl JetStream {
    /// Wraps a JetStream context.
    #[must_use]
    pub const fn new(context: Context) -> Self {
        Self { context }
    }
}

#[async_trait]
impl Channel for JetStream {
    type Error = Error;
    type Inbox = NatsInbox;

    /// Publishes and waits for the stream's acknowledgement, whose metadata is discarded.
    async fn publish(&self, message: WireMessage) -> Result<(), Error> {
        let ack = if message.headers.is_empty() {
            self.context
                .publish(message.subject, message.payload)
                .await
        } else {
            self.context
                .publish_with_headers(
                    message.subject,
                    to_header_map(&message.headers),
                    message.payload,
                )
                .await
        };

        ack.map_err(Error::nats("stream publish"))?
            .await
            .map_err(Error::nats("stream publish"))?;
        Ok(())
    }

    /// Creates an ephemeral pull consumer on the stream that captures `subject`,
    /// delivering everything the stream holds for it.
    async fn subscribe(&self, subject: String) -> Result<NatsInbox, Error> {
        let stream_name = self
            .context
            .stream_by_subject(subject.clone())
            .await
            .map_err(Error::nats("stream lookup"))?;

        let stream = self
            .context
            .get_stream(&stream_name)
            .await
            .map_err(Error::nats("stream lookup"))?;

        let consumer = stream
            .create_consumer(PullConfig {
                filter_subject: subject.clone(),
                ack_policy: AckPolicy::Explicit,
                deliver_policy: DeliverPolicy::All,
                ..PullConfig::default()
            })
            .await
            .map_err(Error::nats("create consumer"))?;

        let messages = consumer
            .messages()
            .await
            .map_err(Error::nats("consume"))?;

        debug!(stream = %stream_name, %subject, "created ephemeral consumer");
        Ok(NatsInbox::Durable(Box::new(messages)))
    }
}

#[async_trait]
impl Durable for JetStream {
    type StreamConfig = NatsStreamConfig;

    fn stream_name(config: &NatsStreamConfig) -> &str {
        &config.name
    }

    /// Any lookup failure counts as absence.
    async fn stream_exists(&self, name: &str) -> Result<bool, Error> {
        match self.context.get_stream(name).await {
            Ok(_) => Ok(true),
            Err(error) => {
                debug!(stream = %name, %error, "stream lookup failed; treating as absent");
                Ok(false)
            }
        }
    }

    async fn create_stream(&self, config: NatsStreamConfig) -> Result<(), Error> {
        self.context
            .create_stream(config)
            .await
            .map(|_| ())
            .map_err(Error::nats("create stream"))
    }

    async fn update_stream(&self, config: NatsStreamConfig) -> Result<(), Error> {
        self.context
            .update_stream(config)
            .await
            .map(|_| ())
            .map_err(Error::nats("update stream"))
    }

    async fn delete_stream(&self, name: &str) -> Result<(), Error> {
        self.context
            .delete_stream(name)
            .await
            .map(|_| ())
            .map_err(Error::nats("delete stream"))
    }
}
