use crate::durable::MemoryStreamConfig;
use crate::error::Error;
use crate::inbox::{MemoryAcker, MemoryDelivery};
use crate::subject::matches;

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use courier_messaging::WireMessage;
use parking_lot::Mutex;
use tokio::sync::mpsc;

/// Replies to requests on a subject pattern.
pub type Responder = Arc<dyn Fn(WireMessage) -> WireMessage + Send + Sync>;

/// Transport operations, as named by the call log and failure injection.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum Operation {
    /// Acquiring the durable context.
    AcquireDurable,
    /// Acknowledging a durable delivery.
    Ack,
    /// Closing the transport.
    Close,
    /// Creating a stream.
    CreateStream,
    /// Deleting a stream.
    DeleteStream,
    /// Publishing to a stream.
    DurablePublish,
    /// Subscribing through a stream.
    DurableSubscribe,
    /// Rejecting a durable delivery.
    Nak,
    /// Plain publish.
    Publish,
    /// Request/reply.
    Request,
    /// Looking a stream up.
    StreamInfo,
    /// Plain subscribe.
    Subscribe,
    /// Removing a subscription.
    Unsubscribe,
    /// Overwriting a stream's configuration.
    UpdateStream,
}

/// A call that reached the transport, in the order it was made.
#[allow(missing_docs)]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    AcquireDurable,
    Ack { subject: String, sequence: u64 },
    Close,
    CreateStream { name: String },
    DeleteStream { name: String },
    DurablePublish { subject: String },
    DurableSubscribe { subject: String },
    Nak { subject: String, sequence: u64 },
    Publish { subject: String },
    Request { subject: String },
    StreamInfo { name: String },
    Subscribe { subject: String },
    Unsubscribe { subject: String },
    UpdateStream { name: String },
}

impl Call {
    /// The operation this call performed.
    #[must_use]
    pub const fn operation(&self) -> Operation {
        match self {
            Self::AcquireDurable => Operation::AcquireDurable,
            Self::Ack { .. } => Operation::Ack,
            Self::Close => Operation::Close,
            Self::CreateStream { .. } => Operation::CreateStream,
            Self::DeleteStream { .. } => Operation::DeleteStream,
            Self::DurablePublish { .. } => Operation::DurablePublish,
            Self::DurableSubscribe { .. } => Operation::DurableSubscribe,
            Self::Nak { .. } => Operation::Nak,
            Self::Publish { .. } => Operation::Publish,
            Self::Request { .. } => Operation::Request,
            Self::StreamInfo { .. } => Operation::StreamInfo,
            Self::Subscribe { .. } => Operation::Subscribe,
            Self::Unsubscribe { .. } => Operation::Unsubscribe,
            Self::UpdateStream { .. } => Operation::UpdateStream,
        }
    }
}

pub type DeliverySender = mpsc::UnboundedSender<MemoryDelivery>;

struct Route {
    pattern: String,
    sender: DeliverySender,
}

struct StoredMessage {
    sequence: u64,
    message: WireMessage,
}

struct StreamState {
    config: MemoryStreamConfig,
    messages: VecDeque<StoredMessage>,
    last_sequence: u64,
    consumers: HashMap<u64, Route>,
}

impl StreamState {
    fn new(config: MemoryStreamConfig) -> Self {
        Self {
            config,
            messages: VecDeque::new(),
            last_sequence: 0,
            consumers: HashMap::new(),
        }
    }

    fn captures(&self, subject: &str) -> bool {
        self.config
            .subjects
            .iter()
            .any(|pattern| matches(pattern, subject))
    }

    fn trim(&mut self) {
        if let Some(max) = self.config.max_messages {
            while self.messages.len() > max {
                self.messages.pop_front();
            }
        }
    }
}

#[derive(Default)]
struct State {
    closed: bool,
    calls: Vec<Call>,
    failures: HashSet<Operation>,
    next_id: u64,
    subscriptions: HashMap<u64, Route>,
    responders: Vec<(String, Responder)>,
    streams: HashMap<String, StreamState>,
}

impl State {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn route_plain(&self, message: &WireMessage) {
        for route in self.subscriptions.values() {
            if matches(&route.pattern, &message.subject) {
                let _ = route.sender.send(MemoryDelivery {
                    message: message.clone(),
                    acker: MemoryAcker::plain(),
                });
            }
        }
    }

    /// Stores `message` in every stream that captures its subject and hands it to
    /// their consumers. Returns how many streams stored it.
    fn store(&mut self, broker: &Arc<Broker>, message: &WireMessage) -> usize {
        let mut stored = 0;

        for stream in self.streams.values_mut() {
            if !stream.captures(&message.subject) {
                continue;
            }

            stream.last_sequence += 1;
            let sequence = stream.last_sequence;
            stream.messages.push_back(StoredMessage {
                sequence,
                message: message.clone(),
            });
            stream.trim();
            stored += 1;

            for consumer in stream.consumers.values() {
                if matches(&consumer.pattern, &message.subject) {
                    let _ = consumer.sender.send(MemoryAcker::durable_delivery(
                        broker,
                        message.clone(),
                        sequence,
                        &consumer.sender,
                    ));
                }
            }
        }

        stored
    }
}

/// Shared state behind every handle of one in-memory transport.
#[derive(Default)]
pub struct Broker {
    state: Mutex<State>,
}

impl Broker {
    /// Records `call`, then fails if the transport is closed or a failure was
    /// scheduled for the call's operation.
    pub fn begin(&self, call: Call) -> Result<(), Error> {
        let mut state = self.state.lock();
        let operation = call.operation();
        state.calls.push(call);

        if state.closed {
            return Err(Error::Closed);
        }
        if state.failures.remove(&operation) {
            return Err(Error::Injected(operation));
        }

        Ok(())
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    pub fn fail_next(&self, operation: Operation) {
        self.state.lock().failures.insert(operation);
    }

    pub fn add_responder(&self, pattern: String, responder: Responder) {
        self.state.lock().responders.push((pattern, responder));
    }

    pub fn responder_for(&self, subject: &str) -> Option<Responder> {
        self.state
            .lock()
            .responders
            .iter()
            .find(|(pattern, _)| matches(pattern, subject))
            .map(|(_, responder)| Arc::clone(responder))
    }

    pub fn publish(self: &Arc<Self>, message: &WireMessage) {
        let mut state = self.state.lock();
        state.route_plain(message);
        state.store(self, message);
    }

    pub fn durable_publish(self: &Arc<Self>, message: &WireMessage) -> Result<(), Error> {
        let mut state = self.state.lock();
        if !state.streams.values().any(|s| s.captures(&message.subject)) {
            return Err(Error::NoStream(message.subject.clone()));
        }

        state.route_plain(message);
        state.store(self, message);
        Ok(())
    }

    pub fn subscribe(&self, pattern: String) -> (u64, mpsc::UnboundedReceiver<MemoryDelivery>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut state = self.state.lock();
        let id = state.next_id();
        state.subscriptions.insert(id, Route { pattern, sender });

        (id, receiver)
    }

    /// Registers a consumer on the stream covering `filter` and queues the
    /// stream's matching backlog for it. Returns the stream name.
    pub fn durable_subscribe(
        self: &Arc<Self>,
        filter: String,
    ) -> Result<(String, u64, mpsc::UnboundedReceiver<MemoryDelivery>), Error> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut state = self.state.lock();
        let id = state.next_id();

        let stream = state
            .streams
            .values_mut()
            .find(|stream| {
                stream
                    .config
                    .subjects
                    .iter()
                    .any(|pattern| crate::subject::covers(pattern, &filter))
            })
            .ok_or_else(|| Error::NoStream(filter.clone()))?;

        for stored in &stream.messages {
            if matches(&filter, &stored.message.subject) {
                let _ = sender.send(MemoryAcker::durable_delivery(
                    self,
                    stored.message.clone(),
                    stored.sequence,
                    &sender,
                ));
            }
        }

        let name = stream.config.name.clone();
        stream.consumers.insert(
            id,
            Route {
                pattern: filter,
                sender,
            },
        );

        Ok((name, id, receiver))
    }

    pub fn unsubscribe(&self, id: u64) {
        self.state.lock().subscriptions.remove(&id);
    }

    pub fn remove_consumer(&self, stream: &str, id: u64) {
        if let Some(stream) = self.state.lock().streams.get_mut(stream) {
            stream.consumers.remove(&id);
        }
    }

    pub fn stream_exists(&self, name: &str) -> bool {
        self.state.lock().streams.contains_key(name)
    }

    pub fn stream_config(&self, name: &str) -> Option<MemoryStreamConfig> {
        self.state
            .lock()
            .streams
            .get(name)
            .map(|stream| stream.config.clone())
    }

    pub fn stream_len(&self, name: &str) -> Option<usize> {
        self.state
            .lock()
            .streams
            .get(name)
            .map(|stream| stream.messages.len())
    }

    pub fn create_stream(&self, config: MemoryStreamConfig) -> Result<(), Error> {
        let mut state = self.state.lock();
        if state.streams.contains_key(&config.name) {
            return Err(Error::StreamExists(config.name));
        }

        state
            .streams
            .insert(config.name.clone(), StreamState::new(config));
        Ok(())
    }

    pub fn update_stream(&self, config: MemoryStreamConfig) -> Result<(), Error> {
        let mut state = self.state.lock();
        let stream = state
            .streams
            .get_mut(&config.name)
            .ok_or_else(|| Error::StreamNotFound(config.name.clone()))?;

        stream.config = config;
        stream.trim();
        Ok(())
    }

    /// Removes a stream. Its consumers' inboxes end.
    pub fn delete_stream(&self, name: &str) -> Result<(), Error> {
        self.state
            .lock()
            .streams
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| Error::StreamNotFound(name.to_string()))
    }

    /// Marks the transport closed and ends every inbox.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        state.subscriptions.clear();
        for stream in state.streams.values_mut() {
            stream.consumers.clear();
        }
    }
}
