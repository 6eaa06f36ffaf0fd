//! Tool execution.

use std::collections::{HashMap, VecDeque};

use serde_json::Value;
use triage_ai::{Content, Message, ToolCall};

use super::end_summary;
use crate::catalog::END_TOOL_NAME;
use crate::events::GraphEvent;
use crate::gateway::ExecOutcome;
use crate::graph::IncidentGraph;
use crate::state::{IncidentState, summary_text};

/// Result recorded for an end tool call.
const END_RESULT: &str = "The run is closed.";

/// What happens to one pending call.
enum Plan {
    End,
    Rejected(String),
    Run,
}

impl IncidentGraph {
    /// Run the pending tool calls and append one result message per call, in
    /// call order.
    ///
    /// End tool calls are not sent to the service; they end the run and their
    /// summary closes the conversation once the other results are in. The
    /// pending calls stay in the state until reasoning has paired them with
    /// their results.
    pub(crate) async fn execute_tools(&self, state: &mut IncidentState) {
        let calls = state.tool_calls.clone();

        let end_calls: Vec<&ToolCall> =
            calls.iter().filter(|c| c.name == END_TOOL_NAME).collect();
        let summary = (!end_calls.is_empty()).then(|| end_summary(end_calls));
        if summary.is_some() {
            state.signal_end();
        }

        let mut plans = Vec::with_capacity(calls.len());
        let mut runnable = Vec::new();
        for call in &calls {
            self.emit(GraphEvent::ToolExecutionStart {
                tool_call_id: call.id.clone(),
                tool_name: call.name.clone(),
                arguments: call.arguments.clone(),
            });
            let plan = if call.name == END_TOOL_NAME {
                Plan::End
            } else if let Some(message) = self.catalog.validate(call) {
                tracing::warn!(tool = %call.name, error = %message, "rejected tool call");
                Plan::Rejected(message)
            } else {
                runnable.push(call.clone());
                Plan::Run
            };
            plans.push(plan);
        }

        // Queued per id: a reused id takes its results in call order.
        let mut outcomes: HashMap<String, VecDeque<ExecOutcome>> = HashMap::new();
        if !runnable.is_empty() {
            tracing::debug!(count = runnable.len(), "executing tool calls");
            match self.gateway.run_tools(&runnable).await {
                Ok(results) => {
                    for result in results {
                        outcomes
                            .entry(result.tool_call_id)
                            .or_default()
                            .push_back(result.outcome);
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "tool batch failed");
                    let message = format!("Tool execution failed: {}", e);
                    for call in &runnable {
                        outcomes
                            .entry(call.id.clone())
                            .or_default()
                            .push_back(ExecOutcome::Error {
                                message: message.clone(),
                            });
                    }
                }
            }
        }

        for (call, plan) in calls.iter().zip(plans) {
            let (content, is_error) = match plan {
                Plan::End => (END_RESULT.to_string(), false),
                Plan::Rejected(message) => (message, true),
                Plan::Run => match outcomes.get_mut(&call.id).and_then(VecDeque::pop_front) {
                    Some(outcome) => interpret(outcome),
                    None => (
                        format!("The tool service returned no result for call {}", call.id),
                        true,
                    ),
                },
            };

            self.emit(GraphEvent::ToolExecutionEnd {
                tool_call_id: call.id.clone(),
                tool_name: call.name.clone(),
                result: content.clone(),
                is_error,
            });
            self.append(
                state,
                Message::tool_result(&call.id, &call.name, vec![Content::text(content)], is_error),
            );
        }

        if let Some(summary) = summary {
            tracing::info!("end tool called, closing run");
            self.append(state, Message::assistant(summary_text(&summary)));
        }
    }
}

/// Turn an execution outcome into result text and an error flag.
///
/// Output that parses as JSON with a truthy `error` field is an error; output
/// that is not JSON passes through as a success.
fn interpret(outcome: ExecOutcome) -> (String, bool) {
    let content = match outcome {
        ExecOutcome::Output { content } => content,
        ExecOutcome::Error { message } => return (message, true),
    };

    match serde_json::from_str::<Value>(&content) {
        Ok(value) => match value.get("error") {
            Some(error) if is_truthy(error) => {
                let message = error
                    .as_str()
                    .map(str::to_string)
                    .unwrap_or_else(|| error.to_string());
                (message, true)
            }
            _ => (content, false),
        },
        Err(e) => {
            tracing::warn!(error = %e, "tool output is not JSON");
            (content, false)
        }
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        Value::Number(n) => n.as_f64() != Some(0.0),
        Value::Array(_) | Value::Object(_) => true,
    }
}
