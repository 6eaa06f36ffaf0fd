//! The record threaded through every step of a run.

use serde::{Deserialize, Serialize};
use triage_ai::{Message, ToolCall};

use crate::channel::ChannelMessage;

/// Heading that introduces the closing summary of a run.
pub const SUMMARY_HEADING: &str = "Here is a summary of the operation:";

/// Closing text of a run: the summary heading followed by the summary.
pub fn summary_text(summary: &str) -> String {
    format!("\n{}\n\n{}", SUMMARY_HEADING, summary)
}

/// Conversation state of one incident run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IncidentState {
    /// Conversation so far; never reordered.
    pub messages: Vec<Message>,
    /// Tool calls requested by the last model turn and not yet consumed.
    pub tool_calls: Vec<ToolCall>,
    /// Once set, stays set.
    end_signal: bool,
    /// Latest channel message seen by the polling source (the baseline).
    pub last_seen: Option<ChannelMessage>,
    /// Channel message that opened the current conversation.
    pub current: Option<ChannelMessage>,
}

impl IncidentState {
    /// Start a run from an incident report.
    pub fn from_incident(report: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::user(report)],
            ..Default::default()
        }
    }

    pub fn is_ended(&self) -> bool {
        self.end_signal
    }

    /// Request termination. There is no way to clear the signal.
    pub fn signal_end(&mut self) {
        self.end_signal = true;
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Text of the message that opened the conversation.
    pub fn incident_report(&self) -> Option<String> {
        self.messages.first().map(Message::text)
    }

    /// The closing summary, if the run ended with one.
    pub fn summary(&self) -> Option<String> {
        self.messages
            .last()
            .filter(|m| m.is_assistant())
            .map(Message::text)
            .filter(|text| text.contains(SUMMARY_HEADING))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_incident() {
        let state = IncidentState::from_incident("disk full on host X");
        assert_eq!(state.messages.len(), 1);
        assert_eq!(state.incident_report().as_deref(), Some("disk full on host X"));
        assert!(!state.is_ended());
        assert!(state.tool_calls.is_empty());
    }

    #[test]
    fn test_end_signal_is_sticky() {
        let mut state = IncidentState::default();
        state.signal_end();
        state.signal_end();
        assert!(state.is_ended());
    }

    #[test]
    fn test_summary_requires_trailing_assistant_message() {
        let mut state = IncidentState::from_incident("x");
        assert!(state.summary().is_none());

        state.messages.push(Message::assistant(summary_text("freed 20G")));
        assert!(state.summary().unwrap().ends_with("freed 20G"));

        state.messages.push(Message::user("thanks"));
        assert!(state.summary().is_none());
    }

    #[test]
    fn test_summary_text_layout() {
        assert_eq!(
            summary_text("freed 20G"),
            format!("\n{}\n\nfreed 20G", SUMMARY_HEADING)
        );
    }
}
