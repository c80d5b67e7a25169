//! Bus adapter: publish envelopes to, and subscribe to, the shared fanout.
//!
//! Every subscriber gets its own copy of each envelope published after its
//! subscription was established. Nothing is replayed and nothing is acked.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{BoxStream, Stream, StreamExt};
use thiserror::Error;

use crate::protocol::{decode, Envelope};

pub mod memory;
pub mod nats;
pub mod reconnect;

pub use memory::MemoryBus;
pub use nats::NatsBus;
pub use reconnect::{retry_with_backoff, subscribe_with_backoff, wait_for_shutdown, Backoff};

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("failed to connect to {url}: {reason}")]
    Connect { url: String, reason: String },

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("subscribe failed: {0}")]
    Subscribe(String),

    #[error("failed to encode envelope: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("gave up on the bus after {attempts} consecutive attempts")]
    Exhausted { attempts: u32 },
}

/// The broadcast transport.
#[async_trait]
pub trait Bus: Send + Sync {
    /// Transport name, for logs.
    fn name(&self) -> &str;

    /// Fire-and-forget publish to every current subscriber.
    async fn publish(&self, envelope: &Envelope) -> Result<(), TransportError>;

    /// Open a fresh, anonymous, non-durable subscription.
    async fn subscribe(&self) -> Result<Subscription, TransportError>;

    /// Wait until buffered publishes have left the process.
    async fn flush(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

/// One live subscription. Yields decoded envelopes in delivery order.
pub struct Subscription {
    label: String,
    frames: BoxStream<'static, Bytes>,
}

impl Subscription {
    pub fn new(label: impl Into<String>, frames: impl Stream<Item = Bytes> + Send + 'static) -> Self {
        Self {
            label: label.into(),
            frames: frames.boxed(),
        }
    }

    /// Next well-formed envelope.
    ///
    /// Malformed frames are logged and skipped. `None` means the transport
    /// closed the subscription.
    pub async fn next_envelope(&mut self) -> Option<Envelope> {
        while let Some(frame) = self.frames.next().await {
            match decode(&frame) {
                Ok(envelope) => return Some(envelope),
                Err(e) => {
                    tracing::warn!(
                        component = "bus",
                        subscription = %self.label,
                        error = %e,
                        frame = %preview(&frame),
                        "Dropping malformed frame"
                    );
                }
            }
        }
        None
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

fn preview(frame: &[u8]) -> String {
    const LIMIT: usize = 120;
    let text = String::from_utf8_lossy(frame);
    if text.chars().count() > LIMIT {
        format!("{}...", text.chars().take(LIMIT).collect::<String>())
    } else {
        text.into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscription_skips_malformed_frames() {
        let valid = Envelope::broadcast("user", "hello");
        let frames = futures::stream::iter(vec![
            Bytes::from_static(b"\xff\xfe garbage"),
            Bytes::from_static(br#"{"sender":"user"}"#),
            valid.encode().unwrap(),
        ]);
        let mut subscription = Subscription::new("test", frames);

        assert_eq!(subscription.next_envelope().await, Some(valid));
        assert_eq!(subscription.next_envelope().await, None);
    }

    #[test]
    fn test_preview_truncates() {
        let long = "x".repeat(500);
        assert_eq!(preview(long.as_bytes()).len(), 123);
        assert_eq!(preview(b"short"), "short");
    }
}
