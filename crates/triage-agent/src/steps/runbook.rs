//! Runbook collection.

use serde_json::Value;
use triage_ai::Message;

use crate::gateway::ExecOutcome;
use crate::graph::IncidentGraph;
use crate::state::IncidentState;

/// Tool that returns the operations runbook.
pub const RUNBOOK_TOOL: &str = "retrieve_runbook_content";

impl IncidentGraph {
    /// Fetch the runbook and open the conversation with it and the incident report.
    pub(crate) async fn collect_runbook(&self, state: &mut IncidentState) {
        let runbook = match self
            .gateway
            .run_tool(RUNBOOK_TOOL, serde_json::json!({}))
            .await
        {
            Ok(ExecOutcome::Output { content }) => parse_runbook(&content),
            Ok(ExecOutcome::Error { message }) => Err(message),
            Err(e) => Err(e.to_string()),
        };

        match runbook {
            Ok(runbook) => {
                tracing::debug!(bytes = runbook.len(), "runbook loaded");
                let incident = state.incident_report().unwrap_or_default();
                let text = self.leading_message.render(&[
                    ("run_book_content", runbook.as_str()),
                    ("incident_report", incident.as_str()),
                ]);
                self.append(state, Message::system(text));
            }
            Err(reason) => self.fail(
                state,
                format!("There was an error attempting to load the runbook. {}", reason),
            ),
        }
    }
}

fn parse_runbook(content: &str) -> Result<String, String> {
    let value: Value = serde_json::from_str(content)
        .map_err(|e| format!("The runbook payload is not valid JSON: {}", e))?;
    value
        .get("runbook")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| "The runbook payload has no runbook text.".to_string())
}
