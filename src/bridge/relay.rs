//! Relay bus traffic to viewers, and viewer submissions to the bus.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use super::registry::{FanOutReport, ViewerRegistry};
use crate::bus::{
    subscribe_with_backoff, wait_for_shutdown, Backoff, Bus, Subscription, TransportError,
};
use crate::config::Settings;
use crate::protocol::Envelope;

/// Shared bridge state: the bus handle plus the viewer set.
///
/// Cheap to clone; used as the axum router state.
#[derive(Clone)]
pub struct Bridge {
    bus: Arc<dyn Bus>,
    viewers: ViewerRegistry,
    viewer_buffer: usize,
    backoff: Backoff,
}

impl Bridge {
    pub fn new(bus: Arc<dyn Bus>, viewers: ViewerRegistry) -> Self {
        Self {
            bus,
            viewers,
            viewer_buffer: 64,
            backoff: Backoff::default(),
        }
    }

    pub fn from_settings(bus: Arc<dyn Bus>, settings: &Settings) -> Self {
        let viewers = ViewerRegistry::new(Duration::from_millis(settings.bridge.push_timeout_ms));
        Self::new(bus, viewers)
            .with_viewer_buffer(settings.bridge.viewer_buffer)
            .with_backoff(Backoff::from_settings(&settings.reconnect))
    }

    pub fn with_viewer_buffer(mut self, viewer_buffer: usize) -> Self {
        self.viewer_buffer = viewer_buffer.max(1);
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn viewers(&self) -> &ViewerRegistry {
        &self.viewers
    }

    pub fn viewer_buffer(&self) -> usize {
        self.viewer_buffer
    }

    pub fn bus_name(&self) -> &str {
        self.bus.name()
    }

    /// Push one bus envelope to every connected viewer.
    pub async fn relay(&self, envelope: &Envelope) -> FanOutReport {
        let frame: Arc<str> = match envelope.encode_text() {
            Ok(text) => Arc::from(text),
            Err(e) => {
                tracing::error!(
                    component = "bridge",
                    message_id = %envelope.message_id,
                    "Failed to encode envelope for viewers: {}",
                    e
                );
                return FanOutReport::default();
            }
        };

        let report = self.viewers.fan_out(frame).await;
        tracing::debug!(
            component = "bridge",
            message_id = %envelope.message_id,
            conversation_id = %envelope.conversation_id,
            delivered = report.delivered,
            evicted = report.evicted.len(),
            "Relayed envelope"
        );
        report
    }

    /// Publish a viewer-originated envelope like any other participant.
    pub async fn submit(&self, envelope: Envelope) -> Result<Envelope, TransportError> {
        self.bus.publish(&envelope).await?;
        tracing::info!(
            component = "bridge",
            message_id = %envelope.message_id,
            conversation_id = %envelope.conversation_id,
            sender = %envelope.sender,
            receiver = %envelope.receiver,
            "Submitted viewer message"
        );
        Ok(envelope)
    }

    /// Open the relay's bus subscription, retrying with backoff.
    ///
    /// `Ok(None)` means shutdown came first.
    pub async fn subscribe(
        &self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<Option<Subscription>, TransportError> {
        let mut backoff = self.backoff.clone();
        subscribe_with_backoff(self.bus.as_ref(), &mut backoff, shutdown).await
    }

    /// Hold one bus subscription and relay everything it delivers, in order,
    /// until shutdown.
    pub async fn run_relay(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), TransportError> {
        match self.subscribe(&mut shutdown).await? {
            Some(subscription) => self.run_relay_subscribed(subscription, shutdown).await,
            None => Ok(()),
        }
    }

    /// Relay from an already open subscription, resubscribing with backoff
    /// whenever it ends.
    pub async fn run_relay_subscribed(
        &self,
        subscription: Subscription,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), TransportError> {
        let mut backoff = self.backoff.clone();
        let mut subscription = subscription;

        loop {
            tracing::info!(
                component = "bridge",
                bus = self.bus.name(),
                subscription = subscription.label(),
                "Relay subscribed"
            );

            loop {
                let next = tokio::select! {
                    next = subscription.next_envelope() => next,
                    _ = wait_for_shutdown(&mut shutdown) => None,
                };
                match next {
                    Some(envelope) if !*shutdown.borrow() => {
                        backoff.reset();
                        self.relay(&envelope).await;
                    }
                    _ => break,
                }
            }

            if *shutdown.borrow() {
                tracing::info!(component = "bridge", "Relay stopped");
                return Ok(());
            }

            tracing::warn!(component = "bridge", "Relay subscription ended");
            if !backoff.wait(&mut shutdown).await? {
                return Ok(());
            }
            subscription =
                match subscribe_with_backoff(self.bus.as_ref(), &mut backoff, &mut shutdown).await? {
                    Some(subscription) => subscription,
                    None => return Ok(()),
                };
        }
    }
}
