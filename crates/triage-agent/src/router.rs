//! Step selection.

use std::fmt;

use serde::{Deserialize, Serialize};
use triage_ai::Message;

use crate::state::IncidentState;

/// The named steps of the incident graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    RunbookCollection,
    SlackMonitoring,
    LlmCommunication,
    ToolExecution,
    Reasoning,
    Terminated,
}

impl Step {
    pub fn name(&self) -> &'static str {
        match self {
            Step::RunbookCollection => "runbook_collection",
            Step::SlackMonitoring => "slack_monitoring",
            Step::LlmCommunication => "llm_communication",
            Step::ToolExecution => "tool_execution",
            Step::Reasoning => "reasoning",
            Step::Terminated => "terminated",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Where the incident comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// The report is the first message of the initial state.
    StaticIncident,
    /// The report is the next new message on a chat channel.
    PollingChannel,
}

/// Choose the step that follows Reasoning. Rules apply in priority order;
/// termination and data collection always win over model and tool turns.
pub fn route(state: &IncidentState, source: SourceKind) -> Step {
    if state.is_ended() {
        return Step::Terminated;
    }

    // Until an incident arrives the polling source keeps watching, first to
    // record a baseline and then for a newer message.
    if source == SourceKind::PollingChannel && state.messages.is_empty() {
        return Step::SlackMonitoring;
    }

    if let [Message::User { .. }] = state.messages.as_slice() {
        return Step::RunbookCollection;
    }

    if !state.tool_calls.is_empty() {
        return Step::ToolExecution;
    }

    match state.last_message() {
        Some(m) if m.awaits_reply() => Step::LlmCommunication,
        _ => Step::Terminated,
    }
}
