//! Static per-process agent identity.

use std::collections::BTreeSet;

use crate::config::AgentConfig;

/// Who this agent is and what it reacts to. Never mutated after startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentIdentity {
    pub agent_id: String,
    pub display_name: String,
    /// Persona text handed to the reply generator.
    pub system_instructions: String,
    /// Lowercase trigger terms for broadcast messages.
    pub keywords: BTreeSet<String>,
    /// Unprompted broadcast sent once at startup.
    pub opening_message: Option<String>,
}

impl AgentIdentity {
    pub fn new(agent_id: impl Into<String>) -> Self {
        let agent_id = agent_id.into();
        Self {
            display_name: agent_id.clone(),
            agent_id,
            system_instructions: String::new(),
            keywords: BTreeSet::new(),
            opening_message: None,
        }
    }

    pub fn from_config(agent_id: &str, config: &AgentConfig) -> Self {
        let mut identity = Self::new(agent_id)
            .with_system_instructions(config.system_prompt.clone())
            .with_keywords(config.keywords.iter().map(String::as_str));
        if let Some(name) = config.name.as_deref().filter(|n| !n.trim().is_empty()) {
            identity.display_name = name.to_string();
        }
        if let Some(message) = config.initial_message.as_deref() {
            identity = identity.with_opening_message(message);
        }
        identity
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    pub fn with_system_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.system_instructions = instructions.into();
        self
    }

    /// Add trigger keywords; blanks are dropped and the rest lower-cased.
    pub fn with_keywords<'a>(mut self, keywords: impl IntoIterator<Item = &'a str>) -> Self {
        self.keywords
            .extend(keywords.into_iter().filter_map(normalize_keyword));
        self
    }

    /// Set the opening broadcast. Blank text disables it.
    pub fn with_opening_message(mut self, message: &str) -> Self {
        let message = message.trim();
        self.opening_message = (!message.is_empty()).then(|| message.to_string());
        self
    }
}

/// Split a comma-separated keyword list.
pub fn parse_keywords(csv: &str) -> Vec<String> {
    csv.split(',').filter_map(normalize_keyword).collect()
}

fn normalize_keyword(raw: &str) -> Option<String> {
    let keyword = raw.trim().to_lowercase();
    (!keyword.is_empty()).then_some(keyword)
}
