//! Configuration loading for agentroom.
//!
//! Settings are resolved once at startup (defaults, then an optional JSON
//! file, then environment overrides) and handed to every component.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::core::identity::{parse_keywords, AgentIdentity};
use crate::error::Error;
pub type Result<T> = std::result::Result<T, Error>;

/// Get the agentroom home directory (~/.agentroom).
pub fn get_home_dir() -> Result<PathBuf> {
    let home = directories::UserDirs::new()
        .ok_or_else(|| Error::Config("Could not determine home directory".to_string()))?;

    Ok(home.home_dir().join(".agentroom"))
}

/// Get the default settings file path.
pub fn get_settings_path() -> Result<PathBuf> {
    Ok(get_home_dir()?.join("settings.json"))
}

/// Load settings from an explicit file, or from ~/.agentroom/settings.json
/// when it exists, then apply environment overrides.
pub fn load_settings(path: Option<&Path>) -> Result<Settings> {
    let mut settings = match path {
        Some(path) => {
            if !path.exists() {
                return Err(Error::Config(format!(
                    "Settings file not found at {}",
                    path.display()
                )));
            }
            read_settings_file(path)?
        }
        None => {
            let default_path = get_settings_path()?;
            if default_path.exists() {
                read_settings_file(&default_path)?
            } else {
                tracing::debug!("No settings file at {}, using defaults", default_path.display());
                Settings::default()
            }
        }
    };

    apply_env_overrides(&mut settings, |key| {
        std::env::var(key).ok().filter(|v| !v.trim().is_empty())
    });
    validate_settings(&settings)?;

    Ok(settings)
}

fn read_settings_file(path: &Path) -> Result<Settings> {
    let content = std::fs::read_to_string(path)?;
    let settings: Settings = serde_json::from_str(&content)?;
    tracing::debug!("Loaded settings from {}", path.display());
    Ok(settings)
}

/// Overlay the deployment environment variables onto `settings`.
///
/// `AGENT_ID` selects (or creates) the agent entry the other `AGENT_*`
/// variables apply to.
pub fn apply_env_overrides<F>(settings: &mut Settings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(url) = lookup("BUS_URL") {
        settings.bus.url = url;
    }
    if let Some(user) = lookup("BUS_USER") {
        settings.bus.user = Some(user);
    }
    if let Some(password) = lookup("BUS_PASSWORD") {
        settings.bus.password = Some(password);
    }
    if let Some(exchange) = lookup("EXCHANGE_NAME") {
        settings.bus.exchange = exchange;
    }
    if let Some(host) = lookup("OLLAMA_HOST") {
        settings.models.ollama.base_url = host;
    }
    if let Some(model) = lookup("OLLAMA_MODEL") {
        settings.models.ollama.model = model;
    }

    let Some(agent_id) = lookup("AGENT_ID") else {
        return;
    };
    let agent = settings.agents.entry(agent_id.trim().to_string()).or_default();
    if let Some(name) = lookup("AGENT_NAME") {
        agent.name = Some(name);
    }
    if let Some(prompt) = lookup("AGENT_SYSTEM_PROMPT") {
        agent.system_prompt = prompt;
    }
    if let Some(keywords) = lookup("AGENT_TARGET_KEYWORDS") {
        agent.keywords = parse_keywords(&keywords);
    }
    if let Some(message) = lookup("AGENT_INITIAL_MESSAGE") {
        agent.initial_message = Some(message);
    }
}

fn validate_settings(settings: &Settings) -> Result<()> {
    if settings.bus.url.trim().is_empty() {
        return Err(Error::Config("bus.url must not be empty".to_string()));
    }
    if settings.bus.exchange.trim().is_empty() {
        return Err(Error::Config("bus.exchange must not be empty".to_string()));
    }
    if settings.execution.timeout_seconds == 0 {
        return Err(Error::Config(
            "execution.timeout_seconds must be greater than zero".to_string(),
        ));
    }
    if settings.bridge.push_timeout_ms == 0 || settings.bridge.viewer_buffer == 0 {
        return Err(Error::Config(
            "bridge.push_timeout_ms and bridge.viewer_buffer must be greater than zero".to_string(),
        ));
    }
    if let Some(id) = settings.agents.keys().find(|id| id.trim().is_empty()) {
        return Err(Error::Config(format!("invalid agent id '{}'", id)));
    }
    Ok(())
}

/// Bus connection configuration.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct BusSettings {
    #[serde(default = "default_bus_url")]
    pub url: String,
    pub user: Option<String>,
    pub password: Option<String>,
    /// Name of the shared fanout distribution point.
    #[serde(default = "default_exchange")]
    pub exchange: String,
}

fn default_bus_url() -> String {
    "nats://localhost:4222".to_string()
}

fn default_exchange() -> String {
    "llmchatroom".to_string()
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            url: default_bus_url(),
            user: None,
            password: None,
            exchange: default_exchange(),
        }
    }
}

/// Ollama backend configuration.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct OllamaSettings {
    #[serde(default = "default_ollama_url")]
    pub base_url: String,
    #[serde(default = "default_ollama_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Upper bound on generated tokens (`num_predict`).
    pub max_tokens: Option<u32>,
}

fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_ollama_model() -> String {
    "llama3.2".to_string()
}

fn default_temperature() -> f32 {
    0.2
}

impl Default for OllamaSettings {
    fn default() -> Self {
        Self {
            base_url: default_ollama_url(),
            model: default_ollama_model(),
            temperature: default_temperature(),
            max_tokens: None,
        }
    }
}

/// Models configuration.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct Models {
    #[serde(default)]
    pub ollama: OllamaSettings,
}

/// Timeout and retry budget for one reply generation.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ExecutionSettings {
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default)]
    pub retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

fn default_timeout_seconds() -> u64 {
    120
}

fn default_retry_backoff_ms() -> u64 {
    600
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            timeout_seconds: default_timeout_seconds(),
            retries: 0,
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

/// Resubscription backoff after the bus connection is lost.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ReconnectSettings {
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Consecutive failures tolerated before giving up (`null` retries forever).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: Option<u32>,
}

fn default_initial_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_max_attempts() -> Option<u32> {
    Some(20)
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

/// Broadcast bridge (web monitor) configuration.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct BridgeSettings {
    #[serde(default = "default_bridge_host")]
    pub host: String,
    #[serde(default = "default_bridge_port")]
    pub port: u16,
    /// How long one viewer may take to accept a frame before eviction.
    #[serde(default = "default_push_timeout_ms")]
    pub push_timeout_ms: u64,
    /// Frames queued per viewer.
    #[serde(default = "default_viewer_buffer")]
    pub viewer_buffer: usize,
}

fn default_bridge_host() -> String {
    "0.0.0.0".to_string()
}

fn default_bridge_port() -> u16 {
    8081
}

fn default_push_timeout_ms() -> u64 {
    2_000
}

fn default_viewer_buffer() -> usize {
    64
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            host: default_bridge_host(),
            port: default_bridge_port(),
            push_timeout_ms: default_push_timeout_ms(),
            viewer_buffer: default_viewer_buffer(),
        }
    }
}

/// Agent configuration.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct AgentConfig {
    pub name: Option<String>,
    #[serde(default)]
    pub system_prompt: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    pub initial_message: Option<String>,
}

/// agentroom settings.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct Settings {
    #[serde(default)]
    pub bus: BusSettings,

    #[serde(default)]
    pub models: Models,

    #[serde(default)]
    pub execution: ExecutionSettings,

    #[serde(default)]
    pub reconnect: ReconnectSettings,

    #[serde(default)]
    pub bridge: BridgeSettings,

    #[serde(default)]
    pub agents: BTreeMap<String, AgentConfig>,
}

impl Settings {
    /// Resolve the identity this process runs as.
    ///
    /// Without an explicit ID the single configured agent is used.
    pub fn agent_identity(&self, agent_id: Option<&str>) -> Result<AgentIdentity> {
        match agent_id {
            Some(id) => {
                let config = self.agents.get(id).ok_or_else(|| {
                    Error::Config(format!("agent '{}' not found in settings.agents", id))
                })?;
                Ok(AgentIdentity::from_config(id, config))
            }
            None => {
                let mut agents = self.agents.iter();
                match (agents.next(), agents.next()) {
                    (Some((id, config)), None) => Ok(AgentIdentity::from_config(id, config)),
                    (None, _) => Err(Error::Config(
                        "no agents configured (set AGENT_ID or settings.agents)".to_string(),
                    )),
                    (Some(_), Some(_)) => Err(Error::Config(
                        "several agents configured; pick one with --agent".to_string(),
                    )),
                }
            }
        }
    }

    /// Identities of every configured agent.
    pub fn all_identities(&self) -> Vec<AgentIdentity> {
        self.agents
            .iter()
            .map(|(id, config)| AgentIdentity::from_config(id, config))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.bus.exchange, "llmchatroom");
        assert_eq!(settings.bridge.port, 8081);
        assert!(validate_settings(&settings).is_ok());
    }

    #[test]
    fn test_env_overrides_build_agent() {
        let mut settings = Settings::default();
        apply_env_overrides(
            &mut settings,
            env(&[
                ("AGENT_ID", "weather-bot"),
                ("AGENT_NAME", "Weather Bot"),
                ("AGENT_SYSTEM_PROMPT", "You talk about weather."),
                ("AGENT_TARGET_KEYWORDS", "Rain, sun,,  "),
                ("EXCHANGE_NAME", "room-2"),
                ("OLLAMA_MODEL", "mistral"),
            ]),
        );

        assert_eq!(settings.bus.exchange, "room-2");
        assert_eq!(settings.models.ollama.model, "mistral");

        let identity = settings.agent_identity(None).unwrap();
        assert_eq!(identity.agent_id, "weather-bot");
        assert_eq!(identity.display_name, "Weather Bot");
        assert_eq!(identity.keywords.len(), 2);
        assert!(identity.keywords.contains("rain"));
        assert!(identity.keywords.contains("sun"));
    }

    #[test]
    fn test_load_from_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{
                "bus": {"url": "nats://bus:4222"},
                "agents": {
                    "agent1": {"name": "Agent 1", "keywords": ["code"]},
                    "agent2": {"system_prompt": "Be brief."}
                }
            }"#,
        )
        .unwrap();

        let settings = load_settings(Some(&path)).unwrap();
        assert_eq!(settings.bus.url, "nats://bus:4222");
        assert_eq!(settings.bus.exchange, "llmchatroom");
        assert_eq!(settings.all_identities().len(), 2);

        let agent2 = settings.agent_identity(Some("agent2")).unwrap();
        assert_eq!(agent2.display_name, "agent2");
        assert_eq!(agent2.system_instructions, "Be brief.");
    }

    #[test]
    fn test_agent_selection_errors() {
        let mut settings = Settings::default();
        assert!(settings.agent_identity(None).is_err());

        settings.agents.insert("a".to_string(), AgentConfig::default());
        settings.agents.insert("b".to_string(), AgentConfig::default());
        assert!(settings.agent_identity(None).is_err());
        assert!(settings.agent_identity(Some("missing")).is_err());
        assert!(settings.agent_identity(Some("b")).is_ok());
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let temp_dir = tempfile::tempdir().unwrap();
        let result = load_settings(Some(&temp_dir.path().join("nope.json")));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_validation() {
        let mut settings = Settings::default();
        settings.execution.timeout_seconds = 0;
        assert!(validate_settings(&settings).is_err());

        let mut settings = Settings::default();
        settings.agents.insert(" ".to_string(), AgentConfig::default());
        assert!(validate_settings(&settings).is_err());
    }
}
