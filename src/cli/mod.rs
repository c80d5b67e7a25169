//! CLI commands for agentroom using clap.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;

use crate::agent::{start_agents, AgentRunner};
use crate::bridge::{run_bridge, run_bridge_subscribed, Bridge, BridgeServerConfig};
use crate::bus::{Backoff, Bus, MemoryBus, NatsBus};
use crate::config::{load_settings, Settings};
use crate::protocol::Envelope;
use crate::providers::{create_generator, ExecutionContract};

/// agentroom - a broadcast chatroom for autonomous LLM agents.
#[derive(Parser)]
#[command(name = "agentroom")]
#[command(version)]
#[command(about = "Broadcast chatroom for autonomous LLM agents", long_about = None)]
pub struct Commands {
    /// Settings file (defaults to ~/.agentroom/settings.json when present)
    #[arg(long, global = true, env = "AGENTROOM_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run one agent against the shared bus
    Agent {
        /// Agent ID from settings.agents
        #[arg(long, env = "AGENT_ID")]
        agent: Option<String>,
    },

    /// Run the viewer bridge (web page, /ws, /send)
    Bridge {
        #[arg(long)]
        host: Option<String>,

        #[arg(long)]
        port: Option<u16>,
    },

    /// Run every configured agent plus the bridge in one process, on an
    /// in-memory bus
    Room {
        #[arg(long)]
        host: Option<String>,

        #[arg(long)]
        port: Option<u16>,
    },

    /// Publish one message and exit
    Send {
        /// Message text
        body: String,

        #[arg(long, default_value = "user")]
        sender: String,

        /// Receiver agent ID; omit to broadcast
        #[arg(long, default_value = "")]
        receiver: String,

        /// Continue an existing conversation
        #[arg(long)]
        conversation: Option<String>,
    },
}

impl Commands {
    /// Name of the log file for this invocation.
    pub fn log_component(&self) -> String {
        match &self.command {
            Command::Agent { agent: Some(id) } => format!("agent-{}", id),
            Command::Agent { agent: None } => "agent".to_string(),
            Command::Bridge { .. } => "bridge".to_string(),
            Command::Room { .. } => "room".to_string(),
            Command::Send { .. } => "cli".to_string(),
        }
    }

    /// Run the command.
    pub async fn run(&self) -> Result<()> {
        let settings = load_settings(self.config.as_deref()).context("failed to load settings")?;

        match &self.command {
            Command::Agent { agent } => cmd_agent(&settings, agent.as_deref()).await,
            Command::Bridge { host, port } => {
                cmd_bridge(&settings, server_config(&settings, host, port)).await
            }
            Command::Room { host, port } => {
                cmd_room(&settings, server_config(&settings, host, port)).await
            }
            Command::Send {
                body,
                sender,
                receiver,
                conversation,
            } => cmd_send(&settings, body, sender, receiver, conversation.as_deref()).await,
        }
    }
}

fn server_config(settings: &Settings, host: &Option<String>, port: &Option<u16>) -> BridgeServerConfig {
    BridgeServerConfig {
        host: host.clone().unwrap_or_else(|| settings.bridge.host.clone()),
        port: port.unwrap_or(settings.bridge.port),
    }
}

/// Shutdown signal flipped by Ctrl-C.
fn shutdown_on_ctrl_c() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Shutdown requested");
                let _ = tx.send(true);
            }
            Err(e) => tracing::warn!("Could not listen for Ctrl-C: {}", e),
        }
    });
    rx
}

/// Connect to the broker, retrying with the reconnect backoff.
///
/// `None` when shutdown was requested before a connection was made.
async fn connect_bus(
    settings: &Settings,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<Option<Arc<dyn Bus>>> {
    let bus = NatsBus::connect_with_backoff(&settings.bus, &settings.reconnect, shutdown).await?;
    Ok(bus.map(|bus| Arc::new(bus) as Arc<dyn Bus>))
}

fn build_runner(settings: &Settings, identity: crate::core::AgentIdentity, bus: Arc<dyn Bus>) -> AgentRunner {
    AgentRunner::new(identity, bus, create_generator(settings))
        .with_contract(ExecutionContract::from_settings(&settings.execution))
        .with_backoff(Backoff::from_settings(&settings.reconnect))
}

// Command implementations

async fn cmd_agent(settings: &Settings, agent_id: Option<&str>) -> Result<()> {
    let identity = settings.agent_identity(agent_id)?;
    let mut shutdown = shutdown_on_ctrl_c();
    let Some(bus) = connect_bus(settings, &mut shutdown).await? else {
        return Ok(());
    };
    let runner = build_runner(settings, identity, bus);

    runner.run(shutdown).await?;
    Ok(())
}

async fn cmd_bridge(settings: &Settings, config: BridgeServerConfig) -> Result<()> {
    let mut shutdown = shutdown_on_ctrl_c();
    let Some(bus) = connect_bus(settings, &mut shutdown).await? else {
        return Ok(());
    };
    let bridge = Bridge::from_settings(bus, settings);

    run_bridge(bridge, config, shutdown).await?;
    Ok(())
}

async fn cmd_room(settings: &Settings, config: BridgeServerConfig) -> Result<()> {
    let identities = settings.all_identities();
    if identities.is_empty() {
        anyhow::bail!("no agents configured in settings.agents");
    }

    let bus = MemoryBus::new();
    let mut shutdown = shutdown_on_ctrl_c();

    // Every subscriber, the bridge relay included, is in place before the
    // first opening message goes out.
    let bridge = Bridge::from_settings(Arc::new(bus.clone()), settings);
    let Some(relay) = bridge.subscribe(&mut shutdown).await? else {
        return Ok(());
    };
    let runners = identities
        .into_iter()
        .map(|identity| build_runner(settings, identity, Arc::new(bus.clone())))
        .collect();
    let agents = start_agents(runners, shutdown.clone()).await?;
    let bridge_task = tokio::spawn(run_bridge_subscribed(bridge, relay, config, shutdown));
    tracing::info!(agents = agents.len(), "Room started");

    for (agent_id, task) in agents {
        match task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(agent_id = %agent_id, "Agent failed: {}", e),
            Err(e) => tracing::error!(agent_id = %agent_id, "Agent task panicked: {}", e),
        }
    }
    bridge_task.await??;
    Ok(())
}

async fn cmd_send(
    settings: &Settings,
    body: &str,
    sender: &str,
    receiver: &str,
    conversation: Option<&str>,
) -> Result<()> {
    if body.trim().is_empty() {
        anyhow::bail!("message body is empty");
    }

    let mut envelope = Envelope::new(sender, receiver.trim(), body);
    if let Some(conversation) = conversation {
        envelope = envelope.with_conversation_id(conversation);
    }

    let mut shutdown = shutdown_on_ctrl_c();
    let Some(bus) = connect_bus(settings, &mut shutdown).await? else {
        return Ok(());
    };
    bus.publish(&envelope).await?;
    bus.flush().await?;

    println!("Sent {} (conversation {})", envelope.message_id, envelope.conversation_id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_agent_command() {
        let args = Commands::try_parse_from(["agentroom", "agent", "--agent", "weather-bot"]).unwrap();
        assert!(matches!(&args.command, Command::Agent { agent: Some(id) } if id == "weather-bot"));
        assert_eq!(args.log_component(), "agent-weather-bot");
    }

    #[test]
    fn test_parse_send_defaults() {
        let args = Commands::try_parse_from(["agentroom", "send", "hello", "--config", "room.json"]).unwrap();
        assert_eq!(args.config, Some(PathBuf::from("room.json")));
        match args.command {
            Command::Send {
                body,
                sender,
                receiver,
                conversation,
            } => {
                assert_eq!(body, "hello");
                assert_eq!(sender, "user");
                assert_eq!(receiver, "");
                assert!(conversation.is_none());
            }
            _ => panic!("expected send"),
        }
    }

    #[test]
    fn test_server_config_prefers_flags() {
        let settings = Settings::default();
        let config = server_config(&settings, &None, &Some(9000));
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 9000);
    }
}
