//! Viewer and HTTP submissions that get turned into bus envelopes.

use serde::Deserialize;

use super::envelope::Envelope;

/// Sender used when a submission does not name one.
pub const DEFAULT_SENDER: &str = "user";

/// A message typed by a human observer.
///
/// Accepts `body` or the older `message` key for the text.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Submission {
    #[serde(default)]
    pub sender: Option<String>,
    #[serde(default)]
    pub receiver: Option<String>,
    #[serde(default, alias = "message")]
    pub body: String,
}

impl Submission {
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            ..Default::default()
        }
    }

    /// Resolved sender, falling back to [`DEFAULT_SENDER`].
    pub fn sender(&self) -> &str {
        match self.sender.as_deref().map(str::trim) {
            Some(s) if !s.is_empty() => s,
            _ => DEFAULT_SENDER,
        }
    }

    /// Resolved receiver; blank means broadcast.
    pub fn receiver(&self) -> &str {
        self.receiver.as_deref().map(str::trim).unwrap_or_default()
    }

    pub fn is_blank(&self) -> bool {
        self.body.trim().is_empty()
    }

    /// Envelope for the submission endpoint, honoring an explicit receiver.
    pub fn into_envelope(self) -> Envelope {
        Envelope::new(self.sender(), self.receiver(), self.body.as_str())
    }

    /// Envelope for the viewer channel, which can only broadcast.
    pub fn into_broadcast(self) -> Envelope {
        Envelope::broadcast(self.sender(), self.body.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let submission: Submission = serde_json::from_str(r#"{"body":"hello"}"#).unwrap();
        let envelope = submission.into_envelope();

        assert_eq!(envelope.sender, "user");
        assert_eq!(envelope.receiver, "");
        assert_eq!(envelope.body, "hello");
        assert!(envelope.in_response_to.is_none());
    }

    #[test]
    fn test_legacy_message_key_and_blank_sender() {
        let submission: Submission =
            serde_json::from_str(r#"{"sender":"  ","receiver":"agent2","message":"hi"}"#).unwrap();
        assert_eq!(submission.sender(), "user");

        let envelope = submission.into_envelope();
        assert_eq!(envelope.receiver, "agent2");
        assert_eq!(envelope.body, "hi");
    }

    #[test]
    fn test_viewer_submission_always_broadcasts() {
        let submission: Submission =
            serde_json::from_str(r#"{"sender":"agent1","receiver":"agent2","body":"hi"}"#)
                .unwrap();
        let envelope = submission.into_broadcast();

        assert_eq!(envelope.sender, "agent1");
        assert!(envelope.is_broadcast());
    }

    #[test]
    fn test_blank_body() {
        assert!(Submission::new("   ").is_blank());
        assert!(!Submission::new("rain?").is_blank());
    }
}
