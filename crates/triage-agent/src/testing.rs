//! Scripted collaborators for graph tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use triage_ai::stream::MessageEvent;
use triage_ai::{
    Content, Context, LlmProvider, Message, MessageEventStream, Model, StopReason, StreamOptions,
    ToolCall, Usage,
};

use crate::assets::Templates;
use crate::catalog::{END_TOOL_NAME, ToolCatalog};
use crate::channel::{ChannelError, ChannelFeed, ChannelMessage};
use crate::gateway::{ExecOutcome, ExecResult, GatewayError, ToolDefinition, ToolGateway, ToolParameter};
use crate::graph::IncidentGraph;
use crate::steps::RUNBOOK_TOOL;

/// Build a graph over scripted collaborators with the builtin templates.
pub fn test_graph(provider: Arc<ScriptedProvider>, gateway: Arc<RecordingGateway>) -> IncidentGraph {
    let catalog = ToolCatalog::new(&gateway.definitions);
    IncidentGraph::new(
        triage_ai::models::default_model(),
        provider,
        gateway,
        catalog,
        Templates::builtin().unwrap(),
    )
    .unwrap()
}

/// An assistant reply carrying text and tool calls.
pub fn reply_with_calls(text: &str, calls: Vec<ToolCall>) -> Message {
    let mut content = vec![Content::text(text)];
    content.extend(
        calls
            .into_iter()
            .map(|c| Content::tool_call(c.id, c.name, c.arguments)),
    );
    Message::assistant_with_content(content)
}

pub fn end_call(id: &str, summary: &str) -> ToolCall {
    ToolCall::new(id, END_TOOL_NAME, serde_json::json!({ "summary": summary }))
}

/// Chat model that replays a fixed list of replies and records every request.
pub struct ScriptedProvider {
    replies: Mutex<VecDeque<Message>>,
    failure: Option<String>,
    contexts: Mutex<Vec<Context>>,
}

impl ScriptedProvider {
    pub fn new(replies: Vec<Message>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            failure: None,
            contexts: Mutex::new(Vec::new()),
        })
    }

    /// A provider whose every request fails.
    pub fn failing(message: &str) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(VecDeque::new()),
            failure: Some(message.to_string()),
            contexts: Mutex::new(Vec::new()),
        })
    }

    pub fn contexts(&self) -> Vec<Context> {
        self.contexts.lock().clone()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    async fn stream(
        &self,
        _model: &Model,
        context: &Context,
        _options: &StreamOptions,
    ) -> triage_ai::Result<MessageEventStream> {
        self.contexts.lock().push(context.clone());
        if let Some(message) = &self.failure {
            return Err(triage_ai::Error::api("scripted", message.clone()));
        }
        let reply = self
            .replies
            .lock()
            .pop_front()
            .ok_or_else(|| triage_ai::Error::api("scripted", "no scripted reply left"))?;

        let stop_reason = if reply.tool_calls().is_empty() {
            StopReason::Stop
        } else {
            StopReason::ToolUse
        };
        let stream = async_stream::stream! {
            yield MessageEvent::Done {
                message: reply,
                stop_reason,
                usage: Usage::default(),
            };
        };
        Ok(Box::pin(stream))
    }
}

/// Tool service double with a fixed catalog and canned outcomes.
pub struct RecordingGateway {
    pub definitions: Vec<ToolDefinition>,
    runbook: Result<ExecOutcome, u16>,
    outputs: Mutex<HashMap<String, ExecOutcome>>,
    fail_batches: bool,
    runbook_requests: Mutex<usize>,
    executed: Mutex<Vec<ToolCall>>,
}

impl RecordingGateway {
    fn build(runbook: Result<ExecOutcome, u16>) -> Self {
        Self {
            definitions: vec![ToolDefinition {
                name: "check_disk".into(),
                description: "Report disk usage".into(),
                parameters: vec![ToolParameter {
                    name: "host".into(),
                    description: "Host name".into(),
                }],
                required: vec!["host".into()],
            }],
            runbook,
            outputs: Mutex::new(HashMap::new()),
            fail_batches: false,
            runbook_requests: Mutex::new(0),
            executed: Mutex::new(Vec::new()),
        }
    }

    pub fn with_runbook(runbook: &str) -> Arc<Self> {
        Self::with_runbook_payload(&serde_json::json!({ "runbook": runbook }).to_string())
    }

    pub fn with_runbook_payload(payload: &str) -> Arc<Self> {
        Arc::new(Self::build(Ok(ExecOutcome::Output {
            content: payload.to_string(),
        })))
    }

    pub fn with_runbook_error(message: &str) -> Arc<Self> {
        Arc::new(Self::build(Ok(ExecOutcome::Error {
            message: message.to_string(),
        })))
    }

    /// Every request fails with a 503.
    pub fn unreachable() -> Arc<Self> {
        Arc::new(Self {
            fail_batches: true,
            ..Self::build(Err(503))
        })
    }

    pub fn failing_batches(self: Arc<Self>) -> Arc<Self> {
        let mut gateway = Arc::try_unwrap(self).unwrap_or_else(|_| panic!("gateway is shared"));
        gateway.fail_batches = true;
        Arc::new(gateway)
    }

    pub fn with_output(self: Arc<Self>, tool: &str, outcome: ExecOutcome) -> Arc<Self> {
        self.outputs.lock().insert(tool.to_string(), outcome);
        self
    }

    pub fn runbook_requests(&self) -> usize {
        *self.runbook_requests.lock()
    }

    pub fn executed_names(&self) -> Vec<String> {
        self.executed.lock().iter().map(|c| c.name.clone()).collect()
    }

    fn unavailable(status: u16) -> GatewayError {
        GatewayError::Status {
            status,
            body: "bridge unavailable".into(),
        }
    }
}

#[async_trait]
impl ToolGateway for RecordingGateway {
    async fn list_tools(&self) -> Result<Vec<ToolDefinition>, GatewayError> {
        Ok(self.definitions.clone())
    }

    async fn run_tool(
        &self,
        name: &str,
        _arguments: serde_json::Value,
    ) -> Result<ExecOutcome, GatewayError> {
        if name != RUNBOOK_TOOL {
            return Ok(ExecOutcome::Error {
                message: format!("unknown tool {}", name),
            });
        }
        *self.runbook_requests.lock() += 1;
        self.runbook.clone().map_err(Self::unavailable)
    }

    async fn run_tools(&self, calls: &[ToolCall]) -> Result<Vec<ExecResult>, GatewayError> {
        if self.fail_batches {
            return Err(Self::unavailable(503));
        }
        self.executed.lock().extend(calls.iter().cloned());
        let outputs = self.outputs.lock();
        Ok(calls
            .iter()
            .map(|c| ExecResult {
                tool_call_id: c.id.clone(),
                outcome: outputs.get(&c.name).cloned().unwrap_or(ExecOutcome::Output {
                    content: "{}".into(),
                }),
            })
            .collect())
    }
}

/// Channel double that replays one fetch result per poll.
pub struct ScriptedFeed {
    polls: Mutex<VecDeque<Result<Vec<ChannelMessage>, ChannelError>>>,
    oldest: Mutex<Vec<Option<String>>>,
}

impl ScriptedFeed {
    pub fn new(polls: Vec<Result<Vec<ChannelMessage>, ChannelError>>) -> Arc<Self> {
        Arc::new(Self {
            polls: Mutex::new(polls.into()),
            oldest: Mutex::new(Vec::new()),
        })
    }

    /// The `oldest` argument of every fetch so far.
    pub fn requested_oldest(&self) -> Vec<Option<String>> {
        self.oldest.lock().clone()
    }
}

#[async_trait]
impl ChannelFeed for ScriptedFeed {
    async fn fetch_messages(
        &self,
        oldest: Option<&str>,
        _limit: usize,
    ) -> Result<Vec<ChannelMessage>, ChannelError> {
        self.oldest.lock().push(oldest.map(str::to_string));
        self.polls.lock().pop_front().unwrap_or_else(|| Ok(Vec::new()))
    }
}
