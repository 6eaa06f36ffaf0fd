//! triage-ai: chat model provider abstraction
//!
//! Message, tool and streaming types shared by the triage agent, plus an
//! OpenAI-compatible Chat Completions provider.

pub mod error;
pub mod models;
pub mod providers;
pub mod stream;
pub mod types;

pub use error::{Error, Result};
pub use providers::LlmProvider;
pub use stream::MessageEventStream;
pub use types::*;
