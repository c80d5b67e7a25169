//! In-process fanout bus over a tokio broadcast channel.
//!
//! Used by `agentroom room` and by tests. Behaves like the broker: fresh
//! receivers see only what is published after they subscribe.

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};

use super::{Bus, Subscription, TransportError};
use crate::protocol::Envelope;

/// Cloneable handle; clones share the same channel.
#[derive(Clone)]
pub struct MemoryBus {
    sender: Arc<RwLock<broadcast::Sender<Bytes>>>,
    capacity: usize,
}

impl MemoryBus {
    /// Create a bus with default capacity (256 frames per subscriber).
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(RwLock::new(sender)),
            capacity,
        }
    }

    fn sender(&self) -> broadcast::Sender<Bytes> {
        self.sender.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Publish raw bytes, bypassing the codec. Returns the receiver count.
    pub fn publish_raw(&self, frame: Bytes) -> usize {
        // No receivers is not an error for a fanout.
        self.sender().send(frame).unwrap_or(0)
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.sender().receiver_count()
    }

    /// Simulate a broker outage: every open subscription ends.
    pub fn disconnect_all(&self) {
        let (fresh, _) = broadcast::channel(self.capacity);
        let old = std::mem::replace(
            &mut *self.sender.write().unwrap_or_else(|e| e.into_inner()),
            fresh,
        );
        drop(old);
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Bus for MemoryBus {
    fn name(&self) -> &str {
        "memory"
    }

    async fn publish(&self, envelope: &Envelope) -> Result<(), TransportError> {
        let frame = envelope.encode()?;
        self.publish_raw(frame);
        Ok(())
    }

    async fn subscribe(&self) -> Result<Subscription, TransportError> {
        let receiver = self.sender().subscribe();
        let frames = BroadcastStream::new(receiver).filter_map(|result| async move {
            match result {
                Ok(frame) => Some(frame),
                Err(BroadcastStreamRecvError::Lagged(missed)) => {
                    tracing::warn!(component = "bus", missed, "Memory subscriber lagged");
                    None
                }
            }
        });
        Ok(Subscription::new("memory", frames))
    }
}
