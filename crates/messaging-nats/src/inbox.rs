use crate::error::Error;
use crate::transport::from_nats_message;

use async_nats::Subscriber;
use async_nats::jetstream::AckKind;
use async_nats::jetstream::Message as JetStreamMessage;
use async_nats::jetstream::consumer::pull::Stream as PullStream;
use async_trait::async_trait;
use courier_messaging::transport::{Acknowledge, Delivery, Inbox};
use futures::StreamExt;

/// Settles NATS deliveries. Core NATS messages have nothing to settle.
#[derive(Debug)]
pub enum NatsAcker {
    /// A core NATS delivery.
    Plain,

    /// A JetStream delivery, settled with the server.
    JetStream(Box<JetStreamMessage>),
}

#[async_trait]
impl Acknowledge for NatsAcker {
    type Error = Error;

    async fn ack(&self) -> Result<(), Error> {
        match self {
            Self::Plain => Ok(()),
            Self::JetStream(message) => message.ack().await.map_err(Error::nats("ack")),
        }
    }

    async fn nak(&self) -> Result<(), Error> {
        match self {
            Self::Plain => Ok(()),
            Self::JetStream(message) => message
                .ack_with(AckKind::Nak(None))
                .await
                .map_err(Error::nats("nak")),
        }
    }
}

/// The receiving end of a NATS subscription.
pub enum NatsInbox {
    /// A core NATS subscription.
    Plain(Subscriber),

    /// The message stream of an ephemeral JetStream consumer.
    Durable(Box<PullStream>),
}

#[async_trait]
impl Inbox for NatsInbox {
    type Error = Error;
    type Acker = NatsAcker;

    async fn next(&mut self) -> Option<Result<Delivery<NatsAcker>, Error>> {
        match self {
            Self::Plain(subscriber) => subscriber.next().await.map(|message| {
                Ok(Delivery {
                    message: from_nats_message(&message),
                    acker: NatsAcker::Plain,
                })
            }),
            Self::Durable(messages) => messages.next().await.map(|result| {
                result
                    .map(|message| Delivery {
                        message: from_nats_message(&message.message),
                        acker: NatsAcker::JetStream(Box::new(message)),
                    })
                    .map_err(Error::nats("receive"))
            }),
        }
    }

    async fn unsubscribe(self) -> Result<(), Error> {
        match self {
            Self::Plain(mut subscriber) => subscriber
                .unsubscribe()
                .await
                .map_err(Error::nats("unsubscribe")),
            // The server removes an ephemeral consumer once it stops pulling.
            Self::Durable(_) => Ok(()),
        }
    }
}
