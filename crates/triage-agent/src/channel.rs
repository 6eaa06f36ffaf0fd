//! Chat channel seam used by the polling input source.

use std::cmp::Ordering;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const SLACK_API_BASE: &str = "https://slack.com/api";

#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("channel request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("channel API error: {0}")]
    Api(String),

    #[error("missing configuration: {0} is not set")]
    MissingConfig(&'static str),
}

/// A message observed on the channel, identified by its timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelMessage {
    /// Slack-style `"<seconds>.<micros>"` timestamp
    pub ts: String,
    pub text: String,
    #[serde(default)]
    pub user: Option<String>,
}

impl ChannelMessage {
    pub fn new(ts: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            ts: ts.into(),
            text: text.into(),
            user: None,
        }
    }

    /// Baseline used when the channel had no messages at all.
    pub fn epoch() -> Self {
        Self::new("0", "")
    }

    pub fn is_newer_than(&self, other: &ChannelMessage) -> bool {
        compare_ts(&self.ts, &other.ts) == Ordering::Greater
    }
}

/// Order two channel timestamps numerically. Unparsable parts sort as zero.
pub fn compare_ts(a: &str, b: &str) -> Ordering {
    ts_key(a).cmp(&ts_key(b))
}

fn ts_key(ts: &str) -> (u64, u64) {
    let (secs, frac) = ts.split_once('.').unwrap_or((ts, ""));
    let secs = secs.parse().unwrap_or(0);
    // Right-pad so "5.1" and "5.100000" compare equal
    let frac: String = frac.chars().chain(std::iter::repeat('0')).take(6).collect();
    (secs, frac.parse().unwrap_or(0))
}

/// Source of channel messages.
#[async_trait]
pub trait ChannelFeed: Send + Sync {
    /// Fetch up to `limit` messages newer than `oldest` (all recent messages when
    /// `None`), newest first.
    async fn fetch_messages(
        &self,
        oldest: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ChannelMessage>, ChannelError>;
}

/// Reads a Slack channel through `conversations.history`.
pub struct SlackFeed {
    client: reqwest::Client,
    base_url: String,
    token: String,
    channel: String,
}

impl SlackFeed {
    pub fn new(token: impl Into<String>, channel: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: SLACK_API_BASE.to_string(),
            token: token.into(),
            channel: channel.into(),
        }
    }

    /// Build from `SLACK_BOT_TOKEN` and `SLACK_CHANNEL_ID`.
    pub fn from_env() -> Result<Self, ChannelError> {
        let token = std::env::var("SLACK_BOT_TOKEN")
            .map_err(|_| ChannelError::MissingConfig("SLACK_BOT_TOKEN"))?;
        let channel = std::env::var("SLACK_CHANNEL_ID")
            .map_err(|_| ChannelError::MissingConfig("SLACK_CHANNEL_ID"))?;
        Ok(Self::new(token, channel))
    }

    /// Point at a different API host (Slack-compatible mocks, enterprise grids).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl ChannelFeed for SlackFeed {
    async fn fetch_messages(
        &self,
        oldest: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ChannelMessage>, ChannelError> {
        let mut query = vec![
            ("channel", self.channel.clone()),
            ("limit", limit.to_string()),
        ];
        if let Some(oldest) = oldest {
            query.push(("oldest", oldest.to_string()));
            query.push(("inclusive", "false".to_string()));
        }

        let response: HistoryResponse = self
            .client
            .get(format!("{}/conversations.history", self.base_url))
            .bearer_auth(&self.token)
            .query(&query)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        parse_history(response)
    }
}

#[derive(Debug, Deserialize)]
struct HistoryResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    messages: Vec<HistoryMessage>,
}

#[derive(Debug, Deserialize)]
struct HistoryMessage {
    ts: String,
    #[serde(default)]
    text: String,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    subtype: Option<String>,
}

fn parse_history(response: HistoryResponse) -> Result<Vec<ChannelMessage>, ChannelError> {
    if !response.ok {
        return Err(ChannelError::Api(
            response.error.unwrap_or_else(|| "unknown_error".to_string()),
        ));
    }

    // Joins, topic changes and similar carry a subtype; only plain posts count.
    Ok(response
        .messages
        .into_iter()
        .filter(|m| m.subtype.is_none())
        .map(|m| ChannelMessage {
            ts: m.ts,
            text: m.text,
            user: m.user,
        })
        .collect())
}
