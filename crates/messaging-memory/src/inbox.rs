use crate::broker::{Broker, Call, DeliverySender};
use crate::error::Error;

use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::sync::Arc;

use async_trait::async_trait;
use courier_messaging::WireMessage;
use courier_messaging::transport::{Acknowledge, Delivery, Inbox};
use tokio::sync::mpsc;
use tracing::debug;

/// A delivery from the in-memory transport.
pub type MemoryDelivery = Delivery<MemoryAcker>;

/// Settles in-memory deliveries. Plain deliveries ignore acknowledgements; durable
/// ones record them and redeliver on rejection.
#[derive(Debug)]
pub struct MemoryAcker {
    durable: Option<DurableAck>,
}

struct DurableAck {
    broker: Arc<Broker>,
    message: WireMessage,
    sequence: u64,
    redeliver: DeliverySender,
}

impl Debug for DurableAck {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("DurableAck")
            .field("subject", &self.message.subject)
            .field("sequence", &self.sequence)
            .finish_non_exhaustive()
    }
}

impl MemoryAcker {
    pub(crate) const fn plain() -> Self {
        Self { durable: None }
    }

    pub(crate) fn durable_delivery(
        broker: &Arc<Broker>,
        message: WireMessage,
        sequence: u64,
        redeliver: &DeliverySender,
    ) -> MemoryDelivery {
        MemoryDelivery {
            message: message.clone(),
            acker: Self {
                durable: Some(DurableAck {
                    broker: Arc::clone(broker),
                    message,
                    sequence,
                    redeliver: redeliver.clone(),
                }),
            },
        }
    }

    /// The stream sequence of a durable delivery.
    #[must_use]
    pub fn sequence(&self) -> Option<u64> {
        self.durable.as_ref().map(|durable| durable.sequence)
    }
}

#[async_trait]
impl Acknowledge for MemoryAcker {
    type Error = Error;

    async fn ack(&self) -> Result<(), Error> {
        let Some(durable) = &self.durable else {
            return Ok(());
        };

        durable.broker.begin(Call::Ack {
            subject: durable.message.subject.clone(),
            sequence: durable.sequence,
        })
    }

    async fn nak(&self) -> Result<(), Error> {
        let Some(durable) = &self.durable else {
            return Ok(());
        };

        durable.broker.begin(Call::Nak {
            subject: durable.message.subject.clone(),
            sequence: durable.sequence,
        })?;

        debug!(sequence = durable.sequence, "redelivering rejected message");
        let _ = durable.redeliver.send(Self::durable_delivery(
            &durable.broker,
            durable.message.clone(),
            durable.sequence,
            &durable.redeliver,
        ));

        Ok(())
    }
}

#[derive(Debug)]
enum Source {
    Subscription(u64),
    Consumer { stream: String, id: u64 },
}

/// The receiving end of an in-memory subscription.
pub struct MemoryInbox {
    broker: Arc<Broker>,
    subject: String,
    source: Source,
    receiver: mpsc::UnboundedReceiver<MemoryDelivery>,
}

impl MemoryInbox {
    pub(crate) fn plain(
        broker: Arc<Broker>,
        subject: String,
        id: u64,
        receiver: mpsc::UnboundedReceiver<MemoryDelivery>,
    ) -> Self {
        Self {
            broker,
            subject,
            source: Source::Subscription(id),
            receiver,
        }
    }

    pub(crate) fn consumer(
        broker: Arc<Broker>,
        subject: String,
        stream: String,
        id: u64,
        receiver: mpsc::UnboundedReceiver<MemoryDelivery>,
    ) -> Self {
        Self {
            broker,
            subject,
            source: Source::Consumer { stream, id },
            receiver,
        }
    }
}

#[async_trait]
impl Inbox for MemoryInbox {
    type Error = Error;
    type Acker = MemoryAcker;

    async fn next(&mut self) -> Option<Result<MemoryDelivery, Error>> {
        self.receiver.recv().await.map(Ok)
    }

    async fn unsubscribe(self) -> Result<(), Error> {
        match &self.source {
            Source::Subscription(id) => self.broker.unsubscribe(*id),
            Source::Consumer { stream, id } => self.broker.remove_consumer(stream, *id),
        }

        match self.broker.begin(Call::Unsubscribe {
            subject: self.subject,
        }) {
            // Closing already dropped every route.
            Err(Error::Closed) => Ok(()),
            result => result,
        }
    }
}
