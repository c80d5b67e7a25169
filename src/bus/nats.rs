//! NATS transport.
//!
//! A core NATS subject is a fanout: every subscriber gets every message,
//! subscriptions are anonymous and die with the connection.

use async_trait::async_trait;
use futures::StreamExt;

use tokio::sync::watch;

use super::reconnect::{retry_with_backoff, Backoff};
use super::{Bus, Subscription, TransportError};
use crate::config::{BusSettings, ReconnectSettings};
use crate::protocol::Envelope;

pub struct NatsBus {
    client: async_nats::Client,
    subject: String,
}

impl NatsBus {
    /// Connect once using the bus settings; the exchange name is the subject.
    ///
    /// After the first connection the client reconnects on its own, pacing
    /// and bounding its attempts with `reconnect`.
    pub async fn connect(
        settings: &BusSettings,
        reconnect: &ReconnectSettings,
    ) -> Result<Self, TransportError> {
        let backoff = Backoff::from_settings(reconnect);
        let mut options = async_nats::ConnectOptions::new()
            .name("agentroom")
            .max_reconnects(reconnect.max_attempts.map(|n| n as usize))
            .reconnect_delay_callback(move |attempts| {
                backoff.delay_for(attempts.saturating_sub(1).min(u32::MAX as usize) as u32)
            })
            .event_callback(|event| async move {
                tracing::info!(component = "bus", "NATS connection event: {}", event);
            });
        if let (Some(user), Some(password)) = (&settings.user, &settings.password) {
            options = options.user_and_password(user.clone(), password.clone());
        }

        let client = options
            .connect(settings.url.as_str())
            .await
            .map_err(|e| TransportError::Connect {
                url: settings.url.clone(),
                reason: e.to_string(),
            })?;

        tracing::info!(
            component = "bus",
            url = %settings.url,
            subject = %settings.exchange,
            "Connected to NATS"
        );

        Ok(Self::with_client(client, settings.exchange.clone()))
    }

    /// Connect, retrying refused or failed attempts with bounded backoff.
    ///
    /// `Ok(None)` if shutdown was requested while waiting.
    pub async fn connect_with_backoff(
        settings: &BusSettings,
        reconnect: &ReconnectSettings,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<Option<Self>, TransportError> {
        let mut backoff = Backoff::from_settings(reconnect);
        retry_with_backoff("Connect", &mut backoff, shutdown, || {
            Self::connect(settings, reconnect)
        })
        .await
    }

    pub fn with_client(client: async_nats::Client, subject: impl Into<String>) -> Self {
        Self {
            client,
            subject: subject.into(),
        }
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }
}

#[async_trait]
impl Bus for NatsBus {
    fn name(&self) -> &str {
        "nats"
    }

    async fn publish(&self, envelope: &Envelope) -> Result<(), TransportError> {
        let payload = envelope.encode()?;
        self.client
            .publish(self.subject.clone(), payload)
            .await
            .map_err(|e| TransportError::Publish(e.to_string()))?;

        tracing::debug!(
            component = "bus",
            message_id = %envelope.message_id,
            conversation_id = %envelope.conversation_id,
            sender = %envelope.sender,
            "Published envelope"
        );
        Ok(())
    }

    async fn subscribe(&self) -> Result<Subscription, TransportError> {
        let subscriber = self
            .client
            .subscribe(self.subject.clone())
            .await
            .map_err(|e| TransportError::Subscribe(e.to_string()))?;

        let frames = subscriber.map(|message| message.payload);
        Ok(Subscription::new(format!("nats:{}", self.subject), frames))
    }

    async fn flush(&self) -> Result<(), TransportError> {
        self.client
            .flush()
            .await
            .map_err(|e| TransportError::Publish(e.to_string()))
    }
}
