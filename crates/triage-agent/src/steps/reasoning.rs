//! Conversation compaction between steps.
//!
//! Model turns that request tools and the tool results that answer them are
//! rewritten into plain text turns: a table of directives authored by the
//! assistant and a table of outcomes authored by the user. The model then sees
//! an ordinary dialogue instead of native tool-call bookkeeping.

use triage_ai::{Message, ToolCall};

use super::end_summary;
use crate::catalog::{END_TOOL_NAME, ToolCatalog};
use crate::state::{IncidentState, summary_text};

const DIRECTIVE_HEADING: &str = "Let's execute the following tool(s) to gather more information:";
const OUTCOME_HEADING: &str = "Sure, here is the outcome of your assignment.";

/// Rewrite tool-call turns and tool results in place.
///
/// Calling it again on its own output changes nothing.
pub fn reason(state: &mut IncidentState, catalog: &ToolCatalog) {
    let messages = std::mem::take(&mut state.messages);
    let mut digest = Vec::with_capacity(messages.len());
    let mut rendered_result = false;

    for message in messages {
        let calls = message.tool_calls();
        if !calls.is_empty() {
            let lead = message.text();
            let mut text = String::new();
            if !lead.trim().is_empty() {
                text.push_str(lead.trim());
                text.push_str("\n\n");
            }

            if calls.iter().all(|c| c.name == END_TOOL_NAME) {
                state.signal_end();
                state.tool_calls.clear();
                text.push_str(&summary_text(&end_summary(&calls)));
            } else {
                text.push_str(&directive_table(&calls));
            }
            digest.push(Message::assistant(text));
            continue;
        }

        if let Message::ToolResult {
            tool_call_id,
            tool_name,
            is_error,
            ..
        } = &message
        {
            let name = state
                .tool_calls
                .iter()
                .find(|c| &c.id == tool_call_id)
                .map(|c| c.name.as_str())
                .unwrap_or(tool_name);
            let description = catalog
                .get(name)
                .map(|t| t.description.as_str())
                .unwrap_or_default();
            let status = if *is_error { "error" } else { "success" };

            digest.push(Message::user(outcome_table(
                tool_call_id,
                name,
                description,
                status,
                &message.text(),
            )));
            rendered_result = true;
            continue;
        }

        digest.push(message);
    }

    if rendered_result {
        state.tool_calls.clear();
    }
    state.messages = digest;
}

fn directive_table(calls: &[ToolCall]) -> String {
    let mut table = format!(
        "{}\n| tool_call_id | tool_name | arguments |\n| ------------ | --------- | --------- |\n",
        DIRECTIVE_HEADING
    );
    for call in calls {
        table.push_str(&format!(
            "| {} | {} | {} |\n",
            cell(&call.id),
            cell(&call.name),
            cell(&call.arguments.to_string())
        ));
    }
    table
}

fn outcome_table(id: &str, name: &str, description: &str, status: &str, result: &str) -> String {
    format!(
        "{}\n| tool_call_id | tool_name | description | status | result |\n| ------------ | --------- | ----------- | ------ | ------ |\n| {} | {} | {} | {} | {} |\n",
        OUTCOME_HEADING,
        cell(id),
        cell(name),
        cell(description),
        status,
        cell(result)
    )
}

/// Flatten a value into a single table cell.
fn cell(value: &str) -> String {
    value
        .replace('\r', "")
        .replace('\n', "\\n")
        .replace('|', "\\|")
        .trim()
        .to_string()
}
