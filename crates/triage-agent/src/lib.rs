//! triage-agent: incident-response graph
//!
//! This crate drives a production incident from report to summary: it collects
//! the runbook from a tool service, lets a chat model work through it with the
//! service's tools, and stops when the model calls the reserved end tool.

pub mod assets;
pub mod catalog;
pub mod channel;
pub mod error;
pub mod events;
pub mod gateway;
pub mod graph;
pub mod router;
pub mod state;
pub mod steps;

#[cfg(test)]
mod testing;

pub use assets::{IncidentBook, Prompt, Templates};
pub use catalog::{END_TOOL_NAME, ToolCatalog};
pub use channel::{ChannelFeed, ChannelMessage, SlackFeed};
pub use error::{Error, Result};
pub use events::GraphEvent;
pub use gateway::{ExecOutcome, HttpToolGateway, ToolDefinition, ToolGateway};
pub use graph::{GraphConfig, IncidentGraph, InputSource};
pub use router::{SourceKind, Step, route};
pub use state::{IncidentState, SUMMARY_HEADING};
