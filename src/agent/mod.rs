//! Agent loop: one long-running participant in the room.

use std::fmt;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::bus::TransportError;

pub mod runner;

pub use runner::AgentRunner;

/// Where an agent is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Starting,
    Listening,
    Generating,
    Publishing,
    Stopped,
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AgentState::Starting => "starting",
            AgentState::Listening => "listening",
            AgentState::Generating => "generating",
            AgentState::Publishing => "publishing",
            AgentState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// A spawned agent and its ID.
pub type AgentTask = (String, JoinHandle<Result<(), TransportError>>);

/// Start several agents on one bus.
///
/// Every agent is subscribed before any of them publishes its opening
/// message. Returns no tasks if shutdown arrives while subscribing.
pub async fn start_agents(
    runners: Vec<AgentRunner>,
    shutdown: watch::Receiver<bool>,
) -> Result<Vec<AgentTask>, TransportError> {
    let mut waiting = shutdown.clone();
    let mut subscribed = Vec::with_capacity(runners.len());
    for runner in runners {
        match runner.subscribe(&mut waiting).await? {
            Some(subscription) => subscribed.push((runner, subscription)),
            None => return Ok(Vec::new()),
        }
    }

    let tasks = subscribed
        .into_iter()
        .map(|(runner, subscription)| {
            let agent_id = runner.identity().agent_id.clone();
            let shutdown = shutdown.clone();
            let task = tokio::spawn(async move { runner.run_subscribed(subscription, shutdown).await });
            (agent_id, task)
        })
        .collect();
    Ok(tasks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{Bus, MemoryBus, Subscription};
    use crate::core::AgentIdentity;
    use crate::protocol::Envelope;
    use crate::providers::ReplyGenerator;
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::time::Duration;

    struct Echo;

    #[async_trait]
    impl ReplyGenerator for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        async fn generate(&self, _system: &str, prompt: &str) -> crate::providers::Result<String> {
            Ok(format!("heard: {}", prompt))
        }
    }

    /// Never answers, so the two agents do not ping-pong forever.
    struct Silent;

    #[async_trait]
    impl ReplyGenerator for Silent {
        fn name(&self) -> &str {
            "silent"
        }

        async fn generate(&self, _system: &str, _prompt: &str) -> crate::providers::Result<String> {
            Err(crate::providers::ProviderError::EmptyReply)
        }
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

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_peers_always_see_opening_message() {
        for _ in 0..25 {
            let bus = MemoryBus::new();
            let mut observer = bus.subscribe().await.unwrap();

            let opener = AgentIdentity::new("agent1").with_opening_message("let's talk about rain");
            let listener = AgentIdentity::new("agent2").with_keywords(["rain"]);
            let runners = vec![
                AgentRunner::new(opener, Arc::new(bus.clone()), Arc::new(Silent)),
                AgentRunner::new(listener, Arc::new(bus.clone()), Arc::new(Echo)),
            ];

            let (stop, shutdown) = watch::channel(false);
            let tasks = start_agents(runners, shutdown).await.unwrap();
            assert_eq!(tasks.len(), 2);

            let opening = next_from(&mut observer, "agent1").await;
            let reply = next_from(&mut observer, "agent2").await;
            assert_eq!(reply.in_response_to, Some(opening.message_id));
            assert_eq!(reply.receiver, "agent1");

            stop.send(true).unwrap();
            for (_, task) in tasks {
                task.await.unwrap().unwrap();
            }
        }
    }

    #[tokio::test]
    async fn test_shutdown_before_start_spawns_nothing() {
        let bus = MemoryBus::new();
        let runners = vec![AgentRunner::new(
            AgentIdentity::new("agent1"),
            Arc::new(bus.clone()),
            Arc::new(Echo),
        )];

        let (stop, shutdown) = watch::channel(false);
        stop.send(true).unwrap();
        assert!(start_agents(runners, shutdown).await.unwrap().is_empty());
    }
}
