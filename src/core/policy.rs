//! Response policy: does this agent have to answer this envelope?
//!
//! Precedence, first match wins:
//! - own message: never answer
//! - addressed to this agent: always answer
//! - addressed to another agent: never answer
//! - broadcast: answer when a keyword occurs in the body (case-insensitive)

use super::identity::AgentIdentity;
use crate::protocol::Envelope;

/// Outcome of evaluating one envelope against one identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Sent by this agent.
    OwnMessage,
    /// `receiver` is this agent.
    Addressed,
    /// `receiver` is some other agent.
    AddressedElsewhere,
    /// Broadcast mentioning one of the keywords.
    KeywordMatch(String),
    /// Broadcast with no keyword in it.
    NoMatch,
}

impl Decision {
    pub fn should_respond(&self) -> bool {
        matches!(self, Decision::Addressed | Decision::KeywordMatch(_))
    }

    /// Short label for logs.
    pub fn reason(&self) -> &'static str {
        match self {
            Decision::OwnMessage => "own_message",
            Decision::Addressed => "addressed",
            Decision::AddressedElsewhere => "addressed_elsewhere",
            Decision::KeywordMatch(_) => "keyword_match",
            Decision::NoMatch => "no_match",
        }
    }
}

/// Evaluate the policy.
pub fn evaluate(identity: &AgentIdentity, envelope: &Envelope) -> Decision {
    if envelope.sender == identity.agent_id {
        return Decision::OwnMessage;
    }
    if envelope.receiver == identity.agent_id {
        return Decision::Addressed;
    }
    if !envelope.receiver.is_empty() {
        return Decision::AddressedElsewhere;
    }

    let body = envelope.body.to_lowercase();
    identity
        .keywords
        .iter()
        .find(|keyword| body.contains(keyword.as_str()))
        .map(|keyword| Decision::KeywordMatch(keyword.clone()))
        .unwrap_or(Decision::NoMatch)
}

/// Shorthand for `evaluate(..).should_respond()`.
pub fn should_respond(identity: &AgentIdentity, envelope: &Envelope) -> bool {
    evaluate(identity, envelope).should_respond()
}
