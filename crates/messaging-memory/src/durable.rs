use crate::broker::{Broker, Call};
use crate::error::Error;
use crate::inbox::MemoryInbox;

use std::sync::Arc;

use async_trait::async_trait;
use courier_messaging::WireMessage;
use courier_messaging::transport::{Channel, Durable};
use tracing::debug;

/// Configuration of an in-memory stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemoryStreamConfig {
    /// The stream name.
    pub name: String,

    /// Subject patterns the stream captures.
    pub subjects: Vec<String>,

    /// Oldest messages are discarded beyond this many.
    pub max_messages: Option<usize>,
}

impl MemoryStreamConfig {
    /// Creates an unbounded stream configuration.
    pub fn new<N, S>(name: N, subjects: impl IntoIterator<Item = S>) -> Self
    where
        N: Into<String>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            subjects: subjects.into_iter().map(Into::into).collect(),
            max_messages: None,
        }
    }

    /// Bounds the number of retained messages.
    #[must_use]
    pub const fn with_max_messages(mut self, max_messages: usize) -> Self {
        self.max_messages = Some(max_messages);
        self
    }
}

/// The durable context of an in-memory transport.
#[derive(Clone)]
pub struct MemoryDurable {
    broker: Arc<Broker>,
}

impl MemoryDurable {
    pub(crate) const fn new(broker: Arc<Broker>) -> Self {
        Self { broker }
    }
}

#[async_trait]
impl Channel for MemoryDurable {
    type Error = Error;
    type Inbox = MemoryInbox;

    async fn publish(&self, message: WireMessage) -> Result<(), Error> {
        self.broker.begin(Call::DurablePublish {
            subject: message.subject.clone(),
        })?;

        self.broker.durable_publish(&message)
    }

    async fn subscribe(&self, subject: String) -> Result<MemoryInbox, Error> {
        self.broker.begin(Call::DurableSubscribe {
            subject: subject.clone(),
        })?;

        let (stream, id, receiver) = self.broker.durable_subscribe(subject.clone())?;
        debug!(%stream, %subject, "created ephemeral consumer");

        Ok(MemoryInbox::consumer(
            Arc::clone(&self.broker),
            subject,
            stream,
            id,
            receiver,
        ))
    }
}

#[async_trait]
impl Durable for MemoryDurable {
    type StreamConfig = MemoryStreamConfig;

    fn stream_name(config: &MemoryStreamConfig) -> &str {
        &config.name
    }

    async fn stream_exists(&self, name: &str) -> Result<bool, Error> {
        self.broker.begin(Call::StreamInfo {
            name: name.to_string(),
        })?;

        Ok(self.broker.stream_exists(name))
    }

    async fn create_stream(&self, config: MemoryStreamConfig) -> Result<(), Error> {
        self.broker.begin(Call::CreateStream {
            name: config.name.clone(),
        })?;

        self.broker.create_stream(config)
    }

    async fn update_stream(&self, config: MemoryStreamConfig) -> Result<(), Error> {
        self.broker.begin(Call::UpdateStream {
            name: config.name.clone(),
        })?;

        self.broker.update_stream(config)
    }

    async fn delete_stream(&self, name: &str) -> Result<(), Error> {
        self.broker.begin(Call::DeleteStream {
            name: name.to_string(),
        })?;

        self.broker.delete_stream(name)
    }
}
