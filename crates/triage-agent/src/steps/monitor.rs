//! Channel polling.

use triage_ai::Message;

use crate::channel::{ChannelMessage, compare_ts};
use crate::events::GraphEvent;
use crate::graph::{IncidentGraph, InputSource, StepOutcome};
use crate::state::IncidentState;

impl IncidentGraph {
    /// Poll the channel once.
    ///
    /// The first poll only records a baseline. Later polls turn the newest
    /// unseen message into the incident report, or wait one poll interval
    /// when nothing new arrived.
    pub(crate) async fn monitor_channel(&self, state: &mut IncidentState) -> StepOutcome {
        let InputSource::PollingChannel(feed) = &self.source else {
            tracing::warn!("channel monitoring requested without a channel source");
            return StepOutcome::Idle;
        };

        let baseline = state.last_seen.clone();
        let fetched = feed
            .fetch_messages(
                baseline.as_ref().map(|m| m.ts.as_str()),
                self.config.page_size,
            )
            .await;
        let messages = match fetched {
            Ok(messages) => messages,
            Err(e) => {
                self.fail(
                    state,
                    format!("There was an error reading the incident channel. {}", e),
                );
                return StepOutcome::Progressed;
            }
        };

        let Some(baseline) = baseline else {
            let newest = newest(messages.into_iter()).unwrap_or_else(ChannelMessage::epoch);
            tracing::debug!(ts = %newest.ts, "recorded channel baseline");
            state.last_seen = Some(newest);
            return StepOutcome::Progressed;
        };

        match newest(messages.into_iter().filter(|m| m.is_newer_than(&baseline))) {
            Some(message) => {
                tracing::info!(ts = %message.ts, "incident received from channel");
                state.last_seen = Some(message.clone());
                state.current = Some(message.clone());
                self.append(state, Message::user(message.text));
                StepOutcome::Progressed
            }
            None => {
                let wait = self.config.poll_interval;
                tracing::trace!(wait_secs = wait.as_secs(), "no new channel messages");
                self.emit(GraphEvent::PollIdle {
                    wait_secs: wait.as_secs(),
                });
                tokio::time::sleep(wait).await;
                StepOutcome::Idle
            }
        }
    }
}

fn newest(messages: impl Iterator<Item = ChannelMessage>) -> Option<ChannelMessage> {
    messages.max_by(|a, b| compare_ts(&a.ts, &b.ts))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::channel::ChannelError;
    use crate::testing::{RecordingGateway, ScriptedFeed, ScriptedProvider, test_graph};

    fn polling_graph(feed: std::sync::Arc<ScriptedFeed>) -> IncidentGraph {
        test_graph(
            ScriptedProvider::new(vec![]),
            RecordingGateway::with_runbook("runbook"),
        )
        .with_source(InputSource::PollingChannel(feed))
    }

    #[tokio::test]
    async fn test_first_poll_records_baseline_only() {
        let feed = ScriptedFeed::new(vec![Ok(vec![
            ChannelMessage::new("1712345678.000200", "latest"),
            ChannelMessage::new("1712345678.000100", "older"),
        ])]);
        let graph = polling_graph(feed);
        let mut state = IncidentState::default();

        let outcome = graph.monitor_channel(&mut state).await;

        assert_eq!(outcome, StepOutcome::Progressed);
        assert_eq!(state.last_seen.unwrap().ts, "1712345678.000200");
        assert!(state.messages.is_empty());
        assert!(state.current.is_none());
    }

    #[tokio::test]
    async fn test_empty_channel_baseline_is_epoch() {
        let graph = polling_graph(ScriptedFeed::new(vec![Ok(vec![])]));
        let mut state = IncidentState::default();

        graph.monitor_channel(&mut state).await;

        assert_eq!(state.last_seen, Some(ChannelMessage::epoch()));
    }

    #[tokio::test]
    async fn test_newest_unseen_message_becomes_incident() {
        let feed = ScriptedFeed::new(vec![Ok(vec![
            ChannelMessage::new("1712345690.000002", "second report"),
            ChannelMessage::new("1712345690.000001", "first report"),
            ChannelMessage::new("1712345678.000100", "baseline"),
        ])]);
        let graph = polling_graph(feed.clone());
        let mut state = IncidentState::default();
        state.last_seen = Some(ChannelMessage::new("1712345678.000100", "baseline"));

        let outcome = graph.monitor_channel(&mut state).await;

        assert_eq!(outcome, StepOutcome::Progressed);
        assert_eq!(state.messages.len(), 1);
        assert_eq!(state.messages[0].text(), "second report");
        assert_eq!(state.current.as_ref().unwrap().ts, "1712345690.000002");
        assert_eq!(state.last_seen.as_ref().unwrap().ts, "1712345690.000002");
        assert_eq!(
            feed.requested_oldest(),
            vec![Some("1712345678.000100".to_string())]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_poll_waits_one_interval() {
        let graph = polling_graph(ScriptedFeed::new(vec![Ok(vec![])]));
        let mut state = IncidentState::default();
        state.last_seen = Some(ChannelMessage::new("1712345678.000100", "baseline"));

        let started = tokio::time::Instant::now();
        let outcome = graph.monitor_channel(&mut state).await;

        assert_eq!(outcome, StepOutcome::Idle);
        assert!(started.elapsed() >= Duration::from_secs(5));
        assert!(state.messages.is_empty());
        assert_eq!(state.last_seen.unwrap().ts, "1712345678.000100");
    }

    #[tokio::test]
    async fn test_fetch_failure_ends_run() {
        let graph = polling_graph(ScriptedFeed::new(vec![Err(ChannelError::Api(
            "channel_not_found".into(),
        ))]));
        let mut state = IncidentState::default();

        graph.monitor_channel(&mut state).await;

        assert!(state.is_ended());
        assert!(state.last_message().unwrap().text().contains("channel_not_found"));
    }
}
