//! The steps of the incident graph.
//!
//! Each step except reasoning is a method on [`IncidentGraph`](crate::IncidentGraph)
//! that reads and updates the run state; reasoning is a pure rewrite of the
//! conversation and runs after every other step.

mod model;
mod monitor;
pub mod reasoning;
mod runbook;
mod tools;

pub use runbook::RUNBOOK_TOOL;

use triage_ai::ToolCall;

/// Summary argument of an end tool call.
fn summary_argument(call: &ToolCall) -> String {
    call.arguments
        .get("summary")
        .and_then(|s| s.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| "No summary was provided.".to_string())
}

/// Combined summary of one or more end tool calls, in call order.
///
/// Repeated summaries are kept once.
pub(crate) fn end_summary<'a>(calls: impl IntoIterator<Item = &'a ToolCall>) -> String {
    let mut summaries: Vec<String> = Vec::new();
    for summary in calls.into_iter().map(summary_argument) {
        if !summaries.contains(&summary) {
            summaries.push(summary);
        }
    }
    summaries.join("\n\n")
}
