//! The incident graph: collaborators, configuration and the step loop.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use triage_ai::{LlmProvider, Message, Model, StreamOptions};

use crate::assets::{LEADING_MESSAGE, Prompt, Templates, UNRECOVERABLE_ERROR};
use crate::catalog::ToolCatalog;
use crate::channel::ChannelFeed;
use crate::error::{Error, Result};
use crate::events::GraphEvent;
use crate::gateway::ToolGateway;
use crate::router::{SourceKind, Step, route};
use crate::state::IncidentState;
use crate::steps::reasoning;

/// Runtime knobs of a run.
#[derive(Debug, Clone)]
pub struct GraphConfig {
    /// Wait between polls that found nothing new
    pub poll_interval: Duration,
    /// Channel messages fetched per poll
    pub page_size: usize,
    /// Maximum number of steps per run; idle polls are not counted
    pub step_limit: usize,
    /// Options forwarded to the chat model
    pub stream_options: StreamOptions,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            page_size: 10,
            step_limit: 64,
            stream_options: StreamOptions::default(),
        }
    }
}

/// Where a run's incident comes from.
#[derive(Clone)]
pub enum InputSource {
    /// The initial state already holds the incident report.
    StaticIncident,
    /// Wait for the next new message on a channel.
    PollingChannel(Arc<dyn ChannelFeed>),
}

impl InputSource {
    pub fn kind(&self) -> SourceKind {
        match self {
            InputSource::StaticIncident => SourceKind::StaticIncident,
            InputSource::PollingChannel(_) => SourceKind::PollingChannel,
        }
    }
}

impl fmt::Debug for InputSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.kind(), f)
    }
}

/// Whether a step moved the run forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StepOutcome {
    Progressed,
    /// A poll found nothing and waited
    Idle,
}

/// Runs incidents through runbook collection, model turns and tool execution.
pub struct IncidentGraph {
    pub(crate) config: GraphConfig,
    pub(crate) model: Model,
    pub(crate) provider: Arc<dyn LlmProvider>,
    pub(crate) gateway: Arc<dyn ToolGateway>,
    pub(crate) catalog: ToolCatalog,
    pub(crate) leading_message: Prompt,
    pub(crate) unrecoverable_error: Prompt,
    pub(crate) source: InputSource,
    event_tx: broadcast::Sender<GraphEvent>,
}

impl IncidentGraph {
    /// Create a graph reading a static incident. The catalog is usually built
    /// with [`ToolCatalog::discover`] against the same gateway.
    pub fn new(
        model: Model,
        provider: Arc<dyn LlmProvider>,
        gateway: Arc<dyn ToolGateway>,
        catalog: ToolCatalog,
        templates: Templates,
    ) -> Result<Self> {
        let leading_message = templates.prompt(LEADING_MESSAGE)?;
        let unrecoverable_error = templates.prompt(UNRECOVERABLE_ERROR)?;
        let (event_tx, _) = broadcast::channel(256);
        Ok(Self {
            config: GraphConfig::default(),
            model,
            provider,
            gateway,
            catalog,
            leading_message,
            unrecoverable_error,
            source: InputSource::StaticIncident,
            event_tx,
        })
    }

    pub fn with_config(mut self, config: GraphConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_source(mut self, source: InputSource) -> Self {
        self.source = source;
        self
    }

    /// Subscribe to graph events
    pub fn subscribe(&self) -> broadcast::Receiver<GraphEvent> {
        self.event_tx.subscribe()
    }

    pub fn catalog(&self) -> &ToolCatalog {
        &self.catalog
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    pub fn source_kind(&self) -> SourceKind {
        self.source.kind()
    }

    /// Run the graph until the router terminates.
    ///
    /// External failures do not surface here; they end the run with an
    /// explanatory message. Only an exhausted step limit is an error.
    pub async fn invoke(&self, mut state: IncidentState) -> Result<IncidentState> {
        let source = self.source.kind();
        let mut steps = 0usize;
        let mut next = route(&state, source);

        while next != Step::Terminated {
            if steps >= self.config.step_limit {
                tracing::warn!(limit = self.config.step_limit, "step limit reached");
                return Err(Error::StepLimit(self.config.step_limit));
            }

            tracing::debug!(step = %next, "running step");
            self.emit(GraphEvent::StepStarted { step: next });
            if self.run_step(next, &mut state).await == StepOutcome::Progressed {
                steps += 1;
            }

            self.emit(GraphEvent::StepStarted {
                step: Step::Reasoning,
            });
            reasoning::reason(&mut state, &self.catalog);
            next = route(&state, source);
        }

        tracing::info!(steps, ended = state.is_ended(), "run terminated");
        self.emit(GraphEvent::Terminated { steps });
        Ok(state)
    }

    async fn run_step(&self, step: Step, state: &mut IncidentState) -> StepOutcome {
        match step {
            Step::RunbookCollection => self.collect_runbook(state).await,
            Step::SlackMonitoring => return self.monitor_channel(state).await,
            Step::LlmCommunication => self.call_model(state).await,
            Step::ToolExecution => self.execute_tools(state).await,
            Step::Reasoning => reasoning::reason(state, &self.catalog),
            Step::Terminated => {}
        }
        StepOutcome::Progressed
    }

    pub(crate) fn emit(&self, event: GraphEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Append a message and announce it.
    pub(crate) fn append(&self, state: &mut IncidentState, message: Message) {
        self.emit(GraphEvent::MessageAppended {
            message: message.clone(),
        });
        state.messages.push(message);
    }

    /// End the run on an external failure, leaving an explanation in the conversation.
    pub(crate) fn fail(&self, state: &mut IncidentState, error_message: String) {
        tracing::warn!(error = %error_message, "unrecoverable failure, ending run");
        self.emit(GraphEvent::Error {
            message: error_message.clone(),
        });
        let text = self
            .unrecoverable_error
            .render(&[("error_message", &error_message)]);
        state.signal_end();
        self.append(state, Message::system(text));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::END_TOOL_NAME;
    use crate::channel::ChannelMessage;
    use crate::gateway::ExecOutcome;
    use crate::state::SUMMARY_HEADING;
    use crate::testing::{
        RecordingGateway, ScriptedFeed, ScriptedProvider, end_call, reply_with_calls, test_graph,
    };
    use triage_ai::{Content, ToolCall};

    #[tokio::test]
    async fn test_first_cycle_embeds_runbook_and_incident() {
        let provider = ScriptedProvider::new(vec![reply_with_calls(
            "",
            vec![end_call("call_end", "Resolved disk space issue")],
        )]);
        let gateway = RecordingGateway::with_runbook("1. Check /var\n2. Rotate logs");
        let graph = test_graph(provider, gateway.clone());

        let state = graph
            .invoke(IncidentState::from_incident("disk full on host X"))
            .await
            .unwrap();

        let system = state
            .messages
            .iter()
            .find(|m| matches!(m, Message::System { .. }))
            .expect("runbook system message");
        let text = system.text();
        assert!(text.contains("1. Check /var\n2. Rotate logs"));
        assert!(text.contains("disk full on host X"));
        assert_eq!(gateway.runbook_requests(), 1);
    }

    #[tokio::test]
    async fn test_end_tool_produces_final_summary() {
        let provider = ScriptedProvider::new(vec![reply_with_calls(
            "",
            vec![end_call("call_end", "Resolved disk space issue")],
        )]);
        let graph = test_graph(provider, RecordingGateway::with_runbook("runbook"));

        let state = graph
            .invoke(IncidentState::from_incident("disk full on host X"))
            .await
            .unwrap();

        assert!(state.is_ended());
        let last = state.last_message().unwrap();
        assert!(last.is_assistant());
        let text = last.text();
        let heading = text.find(SUMMARY_HEADING).expect("summary heading");
        assert!(text[heading..].contains("Resolved disk space issue"));
        assert_eq!(state.summary(), Some(text));
    }

    #[tokio::test]
    async fn test_repeated_end_calls_clear_pending_calls() {
        let provider = ScriptedProvider::new(vec![reply_with_calls(
            "",
            vec![end_call("e1", "first"), end_call("e2", "second")],
        )]);
        let gateway = RecordingGateway::with_runbook("runbook");
        let graph = test_graph(provider, gateway.clone());

        let state = graph
            .invoke(IncidentState::from_incident("disk full on host X"))
            .await
            .unwrap();

        assert!(state.is_ended());
        assert!(state.tool_calls.is_empty());
        assert!(gateway.executed_names().is_empty());
        let summary = state.summary().expect("closing summary");
        assert!(summary.contains("first"));
        assert!(summary.ends_with("second"));
    }

    #[tokio::test]
    async fn test_end_call_beside_real_call_is_accounted_for() {
        let provider = ScriptedProvider::new(vec![reply_with_calls(
            "",
            vec![
                ToolCall::new("call_a", "check_disk", serde_json::json!({"host": "web-03"})),
                end_call("call_end", "Freed 20G on /var"),
            ],
        )]);
        let graph = test_graph(provider, RecordingGateway::with_runbook("runbook"));

        let state = graph
            .invoke(IncidentState::from_incident("disk full on host X"))
            .await
            .unwrap();

        assert!(state.is_ended());
        assert!(state.tool_calls.is_empty());
        assert!(state.summary().unwrap().ends_with("Freed 20G on /var"));
        for id in ["call_a", "call_end"] {
            let directives = state
                .messages
                .iter()
                .filter(|m| m.is_assistant())
                .map(|m| m.text().matches(id).count())
                .sum::<usize>();
            let outcomes = state
                .messages
                .iter()
                .filter(|m| matches!(m, Message::User { .. }))
                .map(|m| m.text().matches(id).count())
                .sum::<usize>();
            assert_eq!((directives, outcomes), (1, 1), "id {}", id);
        }
    }

    #[tokio::test]
    async fn test_tool_round_then_summary() {
        let provider = ScriptedProvider::new(vec![
            reply_with_calls(
                "Checking disk first.",
                vec![ToolCall::new(
                    "call_1",
                    "check_disk",
                    serde_json::json!({"host": "web-03"}),
                )],
            ),
            reply_with_calls("", vec![end_call("call_2", "Freed 20G on /var")]),
        ]);
        let gateway = RecordingGateway::with_runbook("runbook").with_output(
            "check_disk",
            ExecOutcome::Output {
                content: r#"{"used": "97%"}"#.into(),
            },
        );
        let graph = test_graph(provider.clone(), gateway.clone());

        let state = graph
            .invoke(IncidentState::from_incident("disk full on host X"))
            .await
            .unwrap();

        assert_eq!(gateway.executed_names(), vec!["check_disk"]);
        assert!(state.tool_calls.is_empty());
        assert!(state.summary().unwrap().contains("Freed 20G on /var"));
        // The second model turn saw the rendered outcome, not a raw tool result.
        let second = &provider.contexts()[1];
        assert!(
            second
                .messages
                .iter()
                .all(|m| !matches!(m, Message::ToolResult { .. }))
        );
        assert!(
            second
                .messages
                .last()
                .unwrap()
                .text()
                .contains(r#"{"used": "97%"}"#)
        );
        // Only catalog tools are bound; the end tool is among them.
        assert!(second.tools.iter().any(|t| t.name == END_TOOL_NAME));
    }

    #[tokio::test]
    async fn test_runbook_failure_ends_run_without_model() {
        let provider = ScriptedProvider::new(vec![]);
        let gateway = RecordingGateway::with_runbook_error("bridge offline");
        let graph = test_graph(provider.clone(), gateway);

        let state = graph
            .invoke(IncidentState::from_incident("disk full on host X"))
            .await
            .unwrap();

        assert!(state.is_ended());
        assert!(provider.contexts().is_empty());
        let last = state.last_message().unwrap();
        assert!(matches!(last, Message::System { .. }));
        assert!(last.text().contains("bridge offline"));
    }

    #[tokio::test]
    async fn test_model_failure_ends_run() {
        let provider = ScriptedProvider::failing("model overloaded");
        let graph = test_graph(provider, RecordingGateway::with_runbook("runbook"));

        let state = graph
            .invoke(IncidentState::from_incident("x"))
            .await
            .unwrap();

        assert!(state.is_ended());
        assert!(state.last_message().unwrap().text().contains("model overloaded"));
    }

    #[tokio::test]
    async fn test_plain_reply_terminates() {
        let provider = ScriptedProvider::new(vec![Message::assistant("Nothing to do.")]);
        let graph = test_graph(provider, RecordingGateway::with_runbook("runbook"));

        let state = graph
            .invoke(IncidentState::from_incident("x"))
            .await
            .unwrap();

        assert!(!state.is_ended());
        assert_eq!(state.last_message().unwrap().text(), "Nothing to do.");
        assert!(state.summary().is_none());
    }

    #[tokio::test]
    async fn test_step_limit() {
        // The model keeps asking for tools and never ends the run.
        let replies = (0..10)
            .map(|i| {
                reply_with_calls(
                    "",
                    vec![ToolCall::new(
                        format!("call_{}", i),
                        "check_disk",
                        serde_json::json!({"host": "web-03"}),
                    )],
                )
            })
            .collect();
        let provider = ScriptedProvider::new(replies);
        let graph = test_graph(provider, RecordingGateway::with_runbook("runbook")).with_config(
            GraphConfig {
                step_limit: 5,
                ..Default::default()
            },
        );

        let err = graph
            .invoke(IncidentState::from_incident("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::StepLimit(5)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_run_waits_for_incident() {
        let feed = ScriptedFeed::new(vec![
            Ok(vec![ChannelMessage::new("1712345678.000100", "good morning")]),
            Ok(vec![]),
            Ok(vec![ChannelMessage::new("1712345690.000001", "disk full on host X")]),
        ]);
        let provider = ScriptedProvider::new(vec![reply_with_calls(
            "",
            vec![end_call("call_end", "Resolved disk space issue")],
        )]);
        let graph = test_graph(provider, RecordingGateway::with_runbook("runbook"))
            .with_source(InputSource::PollingChannel(feed.clone()));

        let mut events = graph.subscribe();
        let state = graph.invoke(IncidentState::default()).await.unwrap();

        assert_eq!(
            feed.requested_oldest(),
            vec![
                None,
                Some("1712345678.000100".to_string()),
                Some("1712345678.000100".to_string()),
            ]
        );
        assert_eq!(
            state.current.as_ref().map(|m| m.text.as_str()),
            Some("disk full on host X")
        );
        assert_eq!(
            state.incident_report().as_deref(),
            Some("disk full on host X")
        );
        assert!(state.summary().unwrap().contains("Resolved disk space issue"));

        let mut idle_polls = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, GraphEvent::PollIdle { .. }) {
                idle_polls += 1;
            }
        }
        assert_eq!(idle_polls, 1);
    }

    #[tokio::test]
    async fn test_events_announce_steps() {
        let provider = ScriptedProvider::new(vec![reply_with_calls(
            "",
            vec![end_call("call_end", "done")],
        )]);
        let graph = test_graph(provider, RecordingGateway::with_runbook("runbook"));
        let mut events = graph.subscribe();

        graph
            .invoke(IncidentState::from_incident("x"))
            .await
            .unwrap();

        let mut steps = vec![];
        let mut terminated = false;
        while let Ok(event) = events.try_recv() {
            match event {
                GraphEvent::StepStarted { step } if step != Step::Reasoning => steps.push(step),
                GraphEvent::Terminated { steps: count } => {
                    assert_eq!(count, 2);
                    terminated = true;
                }
                _ => {}
            }
        }
        assert_eq!(steps, vec![Step::RunbookCollection, Step::LlmCommunication]);
        assert!(terminated);
    }

    #[test]
    fn test_new_rejects_incomplete_templates() {
        let templates = Templates::from_yaml("templates: []").unwrap();
        let result = IncidentGraph::new(
            triage_ai::models::default_model(),
            ScriptedProvider::new(vec![]),
            RecordingGateway::with_runbook("runbook"),
            ToolCatalog::new(&[]),
            templates,
        );
        assert!(matches!(result, Err(Error::Asset(_))));
    }

    #[test]
    fn test_assistant_content_helper() {
        // Sanity check for the scripted replies used above.
        let reply = reply_with_calls("hi", vec![end_call("c", "s")]);
        assert!(matches!(reply.content()[0], Content::Text { .. }));
        assert_eq!(reply.tool_calls()[0].name, END_TOOL_NAME);
    }
}
