//! One agent's lifecycle: subscribe, filter, generate, publish.

use std::sync::Arc;
use tokio::sync::watch;

use super::AgentState;
use crate::bus::{
    subscribe_with_backoff, wait_for_shutdown, Backoff, Bus, Subscription, TransportError,
};
use crate::core::{evaluate, AgentIdentity};
use crate::protocol::Envelope;
use crate::providers::{generate_with_contract, ExecutionContract, ReplyGenerator};

/// Drives a single agent over the bus.
///
/// Envelopes are handled strictly one after another, so at most one reply
/// generation is in flight per agent.
pub struct AgentRunner {
    identity: AgentIdentity,
    bus: Arc<dyn Bus>,
    generator: Arc<dyn ReplyGenerator>,
    contract: ExecutionContract,
    backoff: Backoff,
    state: watch::Sender<AgentState>,
}

impl AgentRunner {
    pub fn new(
        identity: AgentIdentity,
        bus: Arc<dyn Bus>,
        generator: Arc<dyn ReplyGenerator>,
    ) -> Self {
        let (state, _) = watch::channel(AgentState::Starting);
        Self {
            identity,
            bus,
            generator,
            contract: ExecutionContract::default(),
            backoff: Backoff::default(),
            state,
        }
    }

    pub fn with_contract(mut self, contract: ExecutionContract) -> Self {
        self.contract = contract;
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn identity(&self) -> &AgentIdentity {
        &self.identity
    }

    pub fn state(&self) -> AgentState {
        *self.state.borrow()
    }

    /// Observe state transitions.
    pub fn watch_state(&self) -> watch::Receiver<AgentState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: AgentState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            tracing::trace!(agent_id = %self.identity.agent_id, from = %previous, to = %state, "Agent state");
        }
    }

    /// Process one incoming envelope. Returns the reply if one was published.
    ///
    /// Generator and publish failures are logged and swallowed; the agent
    /// always ends up back in `Listening`.
    pub async fn handle(&self, envelope: &Envelope) -> Option<Envelope> {
        let agent_id = self.identity.agent_id.as_str();
        let decision = evaluate(&self.identity, envelope);

        tracing::info!(
            agent_id,
            message_id = %envelope.message_id,
            conversation_id = %envelope.conversation_id,
            sender = %envelope.sender,
            receiver = %envelope.receiver,
            decision = decision.reason(),
            "[{}] {}",
            envelope.sender,
            envelope.body
        );

        if !decision.should_respond() {
            return None;
        }

        self.set_state(AgentState::Generating);
        let generated = generate_with_contract(
            self.generator.as_ref(),
            &self.identity.system_instructions,
            &envelope.body,
            &self.contract,
        )
        .await;

        let text = match generated {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(
                    agent_id,
                    message_id = %envelope.message_id,
                    conversation_id = %envelope.conversation_id,
                    code = %e.code,
                    "Reply generation failed: {}",
                    e.message
                );
                self.set_state(AgentState::Listening);
                return None;
            }
        };

        self.set_state(AgentState::Publishing);
        let reply = envelope.reply_to(agent_id, text);
        let published = match self.bus.publish(&reply).await {
            Ok(()) => {
                tracing::info!(
                    agent_id,
                    message_id = %reply.message_id,
                    conversation_id = %reply.conversation_id,
                    in_response_to = %envelope.message_id,
                    receiver = %reply.receiver,
                    "{} replied",
                    self.identity.display_name
                );
                Some(reply)
            }
            Err(e) => {
                tracing::error!(
                    agent_id,
                    message_id = %reply.message_id,
                    conversation_id = %reply.conversation_id,
                    "Failed to publish reply: {}",
                    e
                );
                None
            }
        };

        self.set_state(AgentState::Listening);
        published
    }

    /// Publish the configured opening broadcast, if any.
    pub async fn publish_opening(&self) -> Result<Option<Envelope>, TransportError> {
        let Some(body) = self.identity.opening_message.as_deref() else {
            return Ok(None);
        };

        let envelope = Envelope::broadcast(self.identity.agent_id.as_str(), body);
        self.bus.publish(&envelope).await?;
        tracing::info!(
            agent_id = %self.identity.agent_id,
            message_id = %envelope.message_id,
            conversation_id = %envelope.conversation_id,
            "{} opened the conversation",
            self.identity.display_name
        );
        Ok(Some(envelope))
    }

    /// Open the agent's first bus subscription, retrying with backoff.
    ///
    /// Nothing is published yet. `Ok(None)` means shutdown came first.
    pub async fn subscribe(
        &self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<Option<Subscription>, TransportError> {
        self.set_state(AgentState::Starting);
        tracing::info!(
            agent_id = %self.identity.agent_id,
            bus = self.bus.name(),
            keywords = ?self.identity.keywords,
            "Agent '{}' starting",
            self.identity.display_name
        );

        let mut backoff = self.backoff.clone();
        subscribe_with_backoff(self.bus.as_ref(), &mut backoff, shutdown).await
    }

    /// Run until shutdown, or until the bus stays unreachable past the
    /// backoff budget.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), TransportError> {
        match self.subscribe(&mut shutdown).await {
            Ok(Some(subscription)) => self.run_subscribed(subscription, shutdown).await,
            Ok(None) => self.finish(Ok(())),
            Err(e) => self.finish(Err(e)),
        }
    }

    /// Publish the opening message, then consume `subscription` and any
    /// replacement subscriptions until shutdown.
    ///
    /// Callers that start several agents subscribe all of them first, so
    /// every opening message reaches every peer.
    pub async fn run_subscribed(
        &self,
        subscription: Subscription,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), TransportError> {
        if let Err(e) = self.publish_opening().await {
            tracing::warn!(agent_id = %self.identity.agent_id, "Opening message not sent: {}", e);
        }

        let mut backoff = self.backoff.clone();
        let mut subscription = subscription;

        let result = loop {
            self.set_state(AgentState::Listening);
            tracing::info!(
                agent_id = %self.identity.agent_id,
                subscription = subscription.label(),
                "Listening"
            );

            loop {
                let next = tokio::select! {
                    next = subscription.next_envelope() => next,
                    _ = wait_for_shutdown(&mut shutdown) => None,
                };
                if *shutdown.borrow() {
                    break;
                }
                match next {
                    Some(envelope) => {
                        backoff.reset();
                        self.handle(&envelope).await;
                    }
                    None => break,
                }
            }

            if *shutdown.borrow() {
                break Ok(());
            }

            tracing::warn!(
                agent_id = %self.identity.agent_id,
                component = "agent",
                "Bus subscription ended"
            );
            match backoff.wait(&mut shutdown).await {
                Ok(true) => {}
                Ok(false) => break Ok(()),
                Err(e) => break Err(e),
            }
            subscription =
                match subscribe_with_backoff(self.bus.as_ref(), &mut backoff, &mut shutdown).await {
                    Ok(Some(subscription)) => subscription,
                    Ok(None) => break Ok(()),
                    Err(e) => break Err(e),
                };
        };

        self.finish(result)
    }

    fn finish(&self, result: Result<(), TransportError>) -> Result<(), TransportError> {
        self.set_state(AgentState::Stopped);
        match &result {
            Ok(()) => tracing::info!(agent_id = %self.identity.agent_id, "Agent stopped"),
            Err(e) => tracing::error!(agent_id = %self.identity.agent_id, "Agent stopped: {}", e),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MemoryBus;
    use crate::providers::ProviderError;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct Scripted {
        failures: AtomicUsize,
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        delay: Duration,
    }

    impl Scripted {
        fn failing(times: usize) -> Self {
            Self {
                failures: AtomicUsize::new(times),
                ..Default::default()
            }
        }

        fn slow(delay: Duration) -> Self {
            Self {
                delay,
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl ReplyGenerator for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn generate(&self, _system: &str, prompt: &str) -> crate::providers::Result<String> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.calls.fetch_add(1, Ordering::SeqCst);

            let failures = self.failures.load(Ordering::SeqCst);
            if failures > 0 {
                self.failures.store(failures - 1, Ordering::SeqCst);
                return Err(ProviderError::other("backend down"));
            }
            Ok(format!("re: {}", prompt))
        }
    }

    fn weather_bot() -> AgentIdentity {
        AgentIdentity::new("weather-bot")
            .with_system_instructions("You forecast weather.")
            .with_keywords(["rain"])
    }

    fn runner(bus: &MemoryBus, generator: Arc<Scripted>) -> AgentRunner {
        AgentRunner::new(weather_bot(), Arc::new(bus.clone()), generator)
            .with_contract(ExecutionContract::default().with_timeout(Duration::from_secs(5)))
            .with_backoff(Backoff::new(
                Duration::from_millis(5),
                Duration::from_millis(20),
                Some(50),
            ))
    }

    async fn next_from(subscription: &mut Subscription, sender: &str) -> Envelope {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let envelope = subscription.next_envelope().await.expect("bus closed");
                if envelope.sender == sender {
                    return envelope;
                }
            }
        })
        .await
        .expect("timed out waiting for envelope")
    }

    async fn wait_listening(state: &mut watch::Receiver<AgentState>) {
        tokio::time::timeout(
            Duration::from_secs(5),
            state.wait_for(|s| *s == AgentState::Listening),
        )
        .await
        .expect("agent never listened")
        .expect("state channel closed");
    }

    #[tokio::test]
    async fn test_broadcast_keyword_gets_correlated_reply() {
        let bus = MemoryBus::new();
        let mut observer = bus.subscribe().await.unwrap();
        let agent = runner(&bus, Arc::new(Scripted::default()));

        let request = Envelope::broadcast("user", "will it rain today?");
        let reply = agent.handle(&request).await.expect("reply");

        assert_eq!(reply.sender, "weather-bot");
        assert_eq!(reply.receiver, "user");
        assert_eq!(reply.conversation_id, request.conversation_id);
        assert_eq!(reply.in_response_to.as_deref(), Some(request.message_id.as_str()));
        assert_eq!(reply.body, "re: will it rain today?");

        assert_eq!(next_from(&mut observer, "weather-bot").await, reply);
        assert_eq!(agent.state(), AgentState::Listening);
    }

    #[tokio::test]
    async fn test_message_for_another_agent_is_ignored() {
        let bus = MemoryBus::new();
        let generator = Arc::new(Scripted::default());
        let agent = runner(&bus, generator.clone());

        let request = Envelope::direct("user", "other-bot", "rain?");
        assert!(agent.handle(&request).await.is_none());
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_own_message_is_ignored() {
        let bus = MemoryBus::new();
        let generator = Arc::new(Scripted::default());
        let agent = runner(&bus, generator.clone());

        let own = Envelope::direct("weather-bot", "weather-bot", "rain");
        assert!(agent.handle(&own).await.is_none());
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_generator_failure_drops_only_that_reply() {
        let bus = MemoryBus::new();
        let generator = Arc::new(Scripted::failing(1));
        let agent = runner(&bus, generator.clone());

        let first = Envelope::direct("user", "weather-bot", "first");
        assert!(agent.handle(&first).await.is_none());
        assert_eq!(agent.state(), AgentState::Listening);

        let second = Envelope::direct("user", "weather-bot", "second");
        let reply = agent.handle(&second).await.expect("second reply");
        assert_eq!(reply.in_response_to, Some(second.message_id));
    }

    #[tokio::test]
    async fn test_run_survives_malformed_frames_and_opens_conversation() {
        crate::logging::init_test();
        let bus = MemoryBus::new();
        let mut observer = bus.subscribe().await.unwrap();
        let identity = weather_bot().with_opening_message("Anyone worried about rain?");
        let agent = Arc::new(
            AgentRunner::new(identity, Arc::new(bus.clone()), Arc::new(Scripted::default()))
                .with_backoff(Backoff::new(Duration::from_millis(5), Duration::from_millis(5), None)),
        );

        let (stop, shutdown) = watch::channel(false);
        let mut state = agent.watch_state();
        let handle = tokio::spawn({
            let agent = agent.clone();
            async move { agent.run(shutdown).await }
        });
        wait_listening(&mut state).await;

        let opening = next_from(&mut observer, "weather-bot").await;
        assert!(opening.is_broadcast());
        assert!(opening.in_response_to.is_none());

        bus.publish_raw(Bytes::from_static(b"garbage"));
        let request = Envelope::direct("user", "weather-bot", "hello?");
        bus.publish(&request).await.unwrap();

        let reply = next_from(&mut observer, "weather-bot").await;
        assert_eq!(reply.in_response_to, Some(request.message_id));

        stop.send(true).unwrap();
        handle.await.unwrap().unwrap();
        assert_eq!(agent.state(), AgentState::Stopped);
    }

    #[tokio::test]
    async fn test_generations_are_serialized() {
        let bus = MemoryBus::new();
        let mut observer = bus.subscribe().await.unwrap();
        let generator = Arc::new(Scripted::slow(Duration::from_millis(20)));
        let agent = Arc::new(runner(&bus, generator.clone()));

        let (stop, shutdown) = watch::channel(false);
        let mut state = agent.watch_state();
        let handle = tokio::spawn({
            let agent = agent.clone();
            async move { agent.run(shutdown).await }
        });
        wait_listening(&mut state).await;

        let requests: Vec<Envelope> = (0..3)
            .map(|i| Envelope::broadcast("user", format!("rain #{}", i)))
            .collect();
        for request in &requests {
            bus.publish(request).await.unwrap();
        }

        for request in &requests {
            let reply = next_from(&mut observer, "weather-bot").await;
            assert_eq!(reply.in_response_to.as_deref(), Some(request.message_id.as_str()));
        }
        assert_eq!(generator.max_in_flight.load(Ordering::SeqCst), 1);

        stop.send(true).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_resubscribes_after_bus_loss() {
        let bus = MemoryBus::new();
        let agent = Arc::new(runner(&bus, Arc::new(Scripted::default())));

        let (stop, shutdown) = watch::channel(false);
        let mut state = agent.watch_state();
        let handle = tokio::spawn({
            let agent = agent.clone();
            async move { agent.run(shutdown).await }
        });
        wait_listening(&mut state).await;

        bus.disconnect_all();
        tokio::time::timeout(Duration::from_secs(5), async {
            while bus.subscriber_count() == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("agent never resubscribed");

        let mut observer = bus.subscribe().await.unwrap();
        let request = Envelope::broadcast("user", "rain after the outage?");
        bus.publish(&request).await.unwrap();
        let reply = next_from(&mut observer, "weather-bot").await;
        assert_eq!(reply.in_response_to, Some(request.message_id));

        stop.send(true).unwrap();
        handle.await.unwrap().unwrap();
    }
}
