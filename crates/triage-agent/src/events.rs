//! Graph event types

use serde::{Deserialize, Serialize};
use triage_ai::Message;

use crate::router::Step;

/// Events emitted while a run progresses
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GraphEvent {
    /// A step is about to run
    StepStarted { step: Step },

    /// A step appended a message to the conversation
    MessageAppended { message: Message },

    /// The polling source found nothing new and is waiting
    PollIdle { wait_secs: u64 },

    /// Tool execution started
    ToolExecutionStart {
        tool_call_id: String,
        tool_name: String,
        arguments: serde_json::Value,
    },

    /// Tool execution completed
    ToolExecutionEnd {
        tool_call_id: String,
        tool_name: String,
        result: String,
        is_error: bool,
    },

    /// An external failure ended the run
    Error { message: String },

    /// The router chose to terminate
    Terminated { steps: usize },
}

impl GraphEvent {
    /// Check if this is a terminal event
    pub fn is_terminal(&self) -> bool {
        matches!(self, GraphEvent::Terminated { .. })
    }
}
