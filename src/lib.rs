//! agentroom library root.

pub mod agent;
pub mod bridge;
pub mod bus;
pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod protocol;
pub mod providers;

pub use agent::{AgentRunner, AgentState};
pub use bridge::{run_bridge, Bridge, ViewerRegistry};
pub use bus::{Bus, MemoryBus, NatsBus};
pub use cli::Commands;
pub use config::{load_settings, Settings};
pub use core::{AgentIdentity, Decision};
pub use error::{Error, Result};
pub use protocol::{Envelope, Submission};
pub use providers::{OllamaGenerator, ReplyGenerator};
