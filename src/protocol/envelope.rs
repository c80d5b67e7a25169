//! Message envelopes with correlation IDs, and their JSON wire codec.

use bytes::Bytes;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure to turn a wire frame into an [`Envelope`].
///
/// Always recoverable: the frame is dropped and the consumer moves on.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("missing or empty required field `{0}`")]
    MissingField(&'static str),

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),
}

/// The unit of communication on the bus.
///
/// Immutable once published; every subscriber gets its own copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Envelope {
    /// Unique message ID (UUID v4)
    pub message_id: String,
    /// Groups a request/response thread, never empty
    pub conversation_id: String,
    /// Originating agent ID, or "user"
    pub sender: String,
    /// Single intended recipient; empty means broadcast
    pub receiver: String,
    /// Text payload (lightweight markdown)
    pub body: String,
    /// Message ID this envelope replies to
    pub in_response_to: Option<String>,
    /// Producer-assigned creation time
    pub timestamp: DateTime<Utc>,
}

impl Envelope {
    /// Create a new envelope in a fresh conversation.
    pub fn new(
        sender: impl Into<String>,
        receiver: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            message_id: generate_id(),
            conversation_id: generate_id(),
            sender: sender.into(),
            receiver: receiver.into(),
            body: body.into(),
            in_response_to: None,
            timestamp: Utc::now(),
        }
    }

    /// Create a broadcast envelope (empty receiver).
    pub fn broadcast(sender: impl Into<String>, body: impl Into<String>) -> Self {
        Self::new(sender, "", body)
    }

    /// Create an envelope addressed to a single agent.
    pub fn direct(
        sender: impl Into<String>,
        receiver: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self::new(sender, receiver, body)
    }

    /// Join an existing conversation. A blank ID keeps the freshly minted one.
    pub fn with_conversation_id(mut self, id: impl Into<String>) -> Self {
        let id = id.into();
        if !id.trim().is_empty() {
            self.conversation_id = id;
        }
        self
    }

    /// Create the reply to this envelope.
    ///
    /// The reply goes back to the original sender, stays in the same
    /// conversation and points at this envelope's `message_id`.
    pub fn reply_to(&self, sender: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            message_id: generate_id(),
            conversation_id: self.conversation_id.clone(),
            sender: sender.into(),
            receiver: self.sender.clone(),
            body: body.into(),
            in_response_to: Some(self.message_id.clone()),
            timestamp: Utc::now(),
        }
    }

    /// True when the receiver is empty.
    pub fn is_broadcast(&self) -> bool {
        self.receiver.is_empty()
    }

    /// Check if this envelope is addressed to a specific agent.
    pub fn is_for(&self, agent_id: &str) -> bool {
        self.receiver == agent_id
    }

    /// Encode to wire bytes.
    pub fn encode(&self) -> Result<Bytes, serde_json::Error> {
        encode(self)
    }

    /// Encode to wire text, as pushed to viewers.
    pub fn encode_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Decode from wire bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        decode(bytes)
    }
}

/// Encode an envelope as a JSON record.
pub fn encode(envelope: &Envelope) -> Result<Bytes, serde_json::Error> {
    serde_json::to_vec(envelope).map(Bytes::from)
}

/// Decode a JSON record into an envelope.
///
/// Unknown fields are ignored. `receiver` defaults to broadcast, an absent or
/// null `in_response_to` decodes to `None`, and an absent `timestamp` is
/// stamped with the decode time.
pub fn decode(bytes: &[u8]) -> Result<Envelope, DecodeError> {
    let wire: WireEnvelope = serde_json::from_slice(bytes)?;

    let timestamp = match wire.timestamp {
        Some(ts) => ts.into_datetime()?,
        None => Utc::now(),
    };

    Ok(Envelope {
        message_id: required(wire.message_id, "message_id")?,
        conversation_id: required(wire.conversation_id, "conversation_id")?,
        sender: required(wire.sender, "sender")?,
        receiver: wire.receiver.unwrap_or_default(),
        body: wire.body.ok_or(DecodeError::MissingField("body"))?,
        in_response_to: wire.in_response_to,
        timestamp,
    })
}

fn required(value: Option<String>, field: &'static str) -> Result<String, DecodeError> {
    match value {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(DecodeError::MissingField(field)),
    }
}

#[derive(Deserialize)]
struct WireEnvelope {
    message_id: Option<String>,
    conversation_id: Option<String>,
    sender: Option<String>,
    #[serde(default)]
    receiver: Option<String>,
    #[serde(default, alias = "message")]
    body: Option<String>,
    #[serde(default)]
    in_response_to: Option<String>,
    #[serde(default)]
    timestamp: Option<WireTimestamp>,
}

/// Producers disagree on timestamps: RFC 3339, naive ISO-8601, or epoch seconds.
#[derive(Deserialize)]
#[serde(untagged)]
enum WireTimestamp {
    Seconds(f64),
    Text(String),
}

impl WireTimestamp {
    fn into_datetime(self) -> Result<DateTime<Utc>, DecodeError> {
        match self {
            WireTimestamp::Seconds(secs) => {
                if !secs.is_finite() {
                    return Err(DecodeError::InvalidTimestamp(secs.to_string()));
                }
                let whole = secs.floor();
                let nanos = ((secs - whole) * 1e9).round().min(999_999_999.0) as u32;
                DateTime::from_timestamp(whole as i64, nanos)
                    .ok_or_else(|| DecodeError::InvalidTimestamp(secs.to_string()))
            }
            WireTimestamp::Text(text) => {
                if let Ok(dt) = DateTime::parse_from_rfc3339(&text) {
                    return Ok(dt.with_timezone(&Utc));
                }
                NaiveDateTime::parse_from_str(&text, "%Y-%m-%dT%H:%M:%S%.f")
                    .map(|naive| naive.and_utc())
                    .map_err(|_| DecodeError::InvalidTimestamp(text))
            }
        }
    }
}

fn generate_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
