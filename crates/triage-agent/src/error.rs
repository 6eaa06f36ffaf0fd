//! Error types for triage-agent

use thiserror::Error;

use crate::assets::AssetError;

/// Result type alias using triage-agent Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that escape the incident graph.
///
/// Failures of external calls made *during* a run do not appear here; they are
/// written into the conversation and end the run through the end signal.
#[derive(Error, Debug)]
pub enum Error {
    /// Prompt templates or incident files are unusable
    #[error(transparent)]
    Asset(#[from] AssetError),

    /// The run took more steps than allowed
    #[error("graph exceeded its step limit of {0}")]
    StepLimit(usize),
}
