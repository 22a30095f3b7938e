use crate::error::MessageError;
use crate::headers::{HeaderMultiMap, Headers};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// The canonical message record shared by both delivery modes.
///
/// Outbound, `raw` takes precedence over `text` when both are set. Inbound
/// messages always carry both: `raw` verbatim and `text` decoded from it.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Message {
    /// The subject the message was published to.
    pub topic: String,

    /// The payload bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<Bytes>,

    /// The payload as text, used when `raw` is absent.
    #[serde(default, rename = "data", skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    /// Single-valued headers.
    #[serde(default, rename = "header")]
    pub headers: Headers,
}

impl Message {
    /// Creates a message with a text payload.
    pub fn text(topic: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            text: Some(text.into()),
            ..Self::default()
        }
    }

    /// Creates a message with a raw payload.
    pub fn raw(topic: impl Into<String>, raw: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            raw: Some(raw.into()),
            ..Self::default()
        }
    }

    /// Replaces the headers of the message.
    #[must_use]
    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    /// Sets a single header, replacing any previous value for the name.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// The bytes that go on the wire: `raw` verbatim, else the UTF-8 encoding of `text`.
    #[must_use]
    pub fn payload(&self) -> Option<Bytes> {
        self.raw.clone().or_else(|| {
            self.text
                .as_ref()
                .map(|text| Bytes::copy_from_slice(text.as_bytes()))
        })
    }
}

/// A message in the shape transports publish and deliver.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WireMessage {
    /// The subject.
    pub subject: String,

    /// The payload bytes.
    pub payload: Bytes,

    /// Multi-valued headers.
    pub headers: HeaderMultiMap,
}

impl TryFrom<&Message> for WireMessage {
    type Error = MessageError;

    fn try_from(message: &Message) -> Result<Self, Self::Error> {
        if message.topic.is_empty() {
            return Err(MessageError::EmptyTopic);
        }

        let payload = message.payload().ok_or(MessageError::MissingPayload)?;

        if let Some((name, _)) = message
            .headers
            .iter()
            .find(|(name, value)| !is_valid_header_name(name) || !is_valid_header_value(value))
        {
            return Err(MessageError::InvalidHeader { name: name.clone() });
        }

        Ok(Self {
            subject: message.topic.clone(),
            payload,
            headers: HeaderMultiMap::from(&message.headers),
        })
    }
}

// Header names follow the NATS wire rules: printable ASCII without ':' or spaces.
fn is_valid_header_name(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(|byte| byte.is_ascii_graphic() && byte != b':')
}

fn is_valid_header_value(value: &str) -> bool {
    !value.contains(['\r', '\n'])
}

impl From<WireMessage> for Message {
    fn from(wire: WireMessage) -> Self {
        let text = String::from_utf8_lossy(&wire.payload).into_owned();

        Self {
            topic: wire.subject,
            raw: Some(wire.payload),
            text: Some(text),
            headers: wire.headers.narrow(),
        }
    }
}
