//! Prompt templates and sample incident reports, loaded from YAML.

use std::path::{Path, PathBuf};

use rand::seq::SliceRandom;
use serde::Deserialize;
use thiserror::Error;

const BUILTIN_TEMPLATES: &str = include_str!("../assets/templates.yaml");
const BUILTIN_INCIDENTS: &str = include_str!("../assets/incidents.yaml");

/// Template rendered into the system message that opens a run.
pub const LEADING_MESSAGE: &str = "leading_message_with_context";
/// Template rendered when a run has to stop on an external failure.
pub const UNRECOVERABLE_ERROR: &str = "report_unrecoverable_error";

#[derive(Error, Debug)]
pub enum AssetError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid YAML: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("template {0} not found")]
    TemplateNotFound(String),

    #[error("incident {0} not found")]
    IncidentNotFound(String),

    #[error("incident file contains no incidents")]
    NoIncidents,
}

fn read(path: &Path) -> Result<String, AssetError> {
    std::fs::read_to_string(path).map_err(|source| AssetError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[derive(Debug, Clone, Deserialize)]
pub struct Template {
    pub name: String,
    pub content: String,
}

/// Named prompt templates with `{{placeholder}}` tokens.
#[derive(Debug, Clone, Deserialize)]
pub struct Templates {
    templates: Vec<Template>,
}

impl Templates {
    /// Templates shipped with the crate.
    pub fn builtin() -> Result<Self, AssetError> {
        Self::from_yaml(BUILTIN_TEMPLATES)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, AssetError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn load(path: &Path) -> Result<Self, AssetError> {
        Self::from_yaml(&read(path)?)
    }

    pub fn template(&self, name: &str) -> Result<&str, AssetError> {
        self.templates
            .iter()
            .find(|t| t.name == name)
            .map(|t| t.content.as_str())
            .ok_or_else(|| AssetError::TemplateNotFound(name.to_string()))
    }

    /// Look up a template by name for repeated rendering.
    pub fn prompt(&self, name: &str) -> Result<Prompt, AssetError> {
        self.template(name).map(|content| Prompt(content.to_string()))
    }
}

/// A resolved template whose `{{key}}` tokens are filled on render.
#[derive(Debug, Clone, PartialEq)]
pub struct Prompt(String);

impl Prompt {
    /// Fill `{{key}}` tokens in one pass over the template text.
    ///
    /// Inserted values are copied verbatim and never scanned for tokens.
    /// Tokens without a value are left as written.
    pub fn render(&self, values: &[(&str, &str)]) -> String {
        let mut out = String::with_capacity(self.0.len());
        let mut rest = self.0.as_str();
        while let Some(start) = rest.find("{{") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let Some(end) = after.find("}}") else {
                rest = &rest[start..];
                break;
            };
            let key = &after[..end];
            match values.iter().find(|(k, _)| *k == key) {
                Some((_, value)) => {
                    out.push_str(value);
                    rest = &after[end + 2..];
                }
                None => {
                    out.push_str("{{");
                    rest = after;
                }
            }
        }
        out.push_str(rest);
        out
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Incident {
    pub title: String,
    pub report: String,
}

/// Sample incident reports keyed by title.
#[derive(Debug, Clone, Deserialize)]
pub struct IncidentBook {
    incidents: Vec<Incident>,
}

impl IncidentBook {
    /// Incidents shipped with the crate.
    pub fn builtin() -> Result<Self, AssetError> {
        Self::from_yaml(BUILTIN_INCIDENTS)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, AssetError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn load(path: &Path) -> Result<Self, AssetError> {
        Self::from_yaml(&read(path)?)
    }

    pub fn titles(&self) -> impl Iterator<Item = &str> {
        self.incidents.iter().map(|i| i.title.as_str())
    }

    pub fn incident(&self, title: &str) -> Result<&str, AssetError> {
        self.incidents
            .iter()
            .find(|i| i.title == title)
            .map(|i| i.report.as_str())
            .ok_or_else(|| AssetError::IncidentNotFound(title.to_string()))
    }

    pub fn random_incident(&self) -> Result<&str, AssetError> {
        self.incidents
            .choose(&mut rand::thread_rng())
            .map(|i| i.report.as_str())
            .ok_or(AssetError::NoIncidents)
    }
}
