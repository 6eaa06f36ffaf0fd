//! Configuration file support

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use triage_agent::{GraphConfig, IncidentBook, Templates};

/// Configuration for triage
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Chat model provider (openai, groq, openrouter, ollama, custom)
    pub provider: Option<String>,
    /// Chat model to use
    pub model: Option<String>,
    /// Chat model endpoint, overriding the provider default
    pub base_url: Option<String>,
    /// Tool service endpoint, overriding TRIAGE_TOOLS_BASE_URL
    pub tools_base_url: Option<String>,
    /// Seconds between channel polls that found nothing
    pub poll_interval_secs: Option<u64>,
    /// Messages fetched per channel poll
    pub page_size: Option<usize>,
    /// Maximum number of steps per run
    pub step_limit: Option<usize>,
    /// Prompt templates file, replacing the builtin templates
    pub templates_file: Option<PathBuf>,
    /// Sample incidents file, replacing the builtin incidents
    pub incidents_file: Option<PathBuf>,
    /// Chat model API key (alternative to environment variables)
    pub api_key: Option<String>,
}

impl Config {
    /// Get the config directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("triage")
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("TRIAGE_CONFIG_PATH") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }

    /// Load config from file
    pub fn load() -> Self {
        let path = Self::config_path();
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string(&path) {
            Ok(content) => Self::parse(&content).unwrap_or_else(|e| {
                eprintln!("Warning: Failed to parse config file: {}", e);
                Self::default()
            }),
            Err(e) => {
                eprintln!("Warning: Failed to read config file: {}", e);
                Self::default()
            }
        }
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Save config to file
    pub fn save(&self) -> std::io::Result<()> {
        let path = Self::config_path();
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }

        let content = toml::to_string_pretty(self).map_err(std::io::Error::other)?;
        fs::write(path, content)
    }

    /// Create a default config file if it doesn't exist
    pub fn init() -> std::io::Result<PathBuf> {
        let path = Self::config_path();
        if path.exists() {
            return Ok(path);
        }

        let default_config = Config {
            provider: Some("openai".to_string()),
            model: Some(triage_ai::models::DEFAULT_MODEL_ID.to_string()),
            poll_interval_secs: Some(5),
            step_limit: Some(64),
            ..Default::default()
        };

        default_config.save()?;
        Ok(path)
    }

    /// Graph settings, falling back to the library defaults.
    pub fn graph_config(&self) -> GraphConfig {
        let defaults = GraphConfig::default();
        GraphConfig {
            poll_interval: self
                .poll_interval_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.poll_interval),
            page_size: self.page_size.unwrap_or(defaults.page_size),
            step_limit: self.step_limit.unwrap_or(defaults.step_limit),
            stream_options: defaults.stream_options,
        }
    }

    pub fn templates(&self) -> anyhow::Result<Templates> {
        Ok(match &self.templates_file {
            Some(path) => Templates::load(path)?,
            None => Templates::builtin()?,
        })
    }

    pub fn incidents(&self) -> anyhow::Result<IncidentBook> {
        Ok(match &self.incidents_file {
            Some(path) => IncidentBook::load(path)?,
            None => IncidentBook::builtin()?,
        })
    }
}

/// Generate example config content
pub fn example_config() -> &'static str {
    r#"# triage configuration file
# Place at ~/.config/triage/config.toml (Linux/Mac) or %APPDATA%\triage\config.toml (Windows)

# Chat model provider (openai, groq, openrouter, ollama, custom)
provider = "openai"

# Chat model to use
model = "gpt-4o"

# Chat model endpoint (required for provider = "custom")
# base_url = "http://localhost:8000/v1"

# Tool service endpoint (defaults to TRIAGE_TOOLS_BASE_URL or http://localhost:8082)
# tools_base_url = "http://localhost:8082"

# Channel polling for `triage run --watch`
poll_interval_secs = 5
# page_size = 10

# Maximum number of steps before a run is aborted
step_limit = 64

# Replace the builtin prompt templates or sample incidents
# templates_file = "~/.config/triage/templates.yaml"
# incidents_file = "~/.config/triage/incidents.yaml"

# API key (optional - prefer OPENAI_API_KEY or a .env file)
# api_key = "sk-..."
"#
}
