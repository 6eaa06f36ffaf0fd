//! Tool service seam: catalog discovery and tool execution.

use async_trait::async_trait;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use thiserror::Error;
use triage_ai::ToolCall;

/// Default endpoint of a locally running tool service.
pub const DEFAULT_BASE_URL: &str = "http://localhost:8082";

/// Errors raised while talking to the tool service.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("tool service request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("tool service returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("unexpected tool service payload: {0}")]
    Decode(String),

    #[error("missing configuration: {0} is not set")]
    MissingConfig(&'static str),
}

/// A parameter of a discovered tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolParameter {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// A tool as the service describes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parameters: Vec<ToolParameter>,
    #[serde(default)]
    pub required: Vec<String>,
}

/// Outcome of running one tool.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecOutcome {
    /// The tool ran; `content` is its raw (usually JSON) output.
    Output { content: String },
    /// The service could not run the tool.
    Error { message: String },
}

/// Outcome of one call in a batch, keyed by the originating tool call id.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecResult {
    pub tool_call_id: String,
    pub outcome: ExecOutcome,
}

/// The three operations the graph needs from a tool service.
#[async_trait]
pub trait ToolGateway: Send + Sync {
    /// Discover the catalog of available tools.
    async fn list_tools(&self) -> Result<Vec<ToolDefinition>, GatewayError>;

    /// Run a single named tool.
    async fn run_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<ExecOutcome, GatewayError>;

    /// Run a batch of tool calls, one result per call.
    async fn run_tools(&self, calls: &[ToolCall]) -> Result<Vec<ExecResult>, GatewayError>;
}

/// HTTP client for a tool service bridge.
pub struct HttpToolGateway {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    bridge_uid: String,
}

impl HttpToolGateway {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        bridge_uid: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            bridge_uid: bridge_uid.into(),
        }
    }

    /// Build from `TRIAGE_TOOLS_API_KEY`, `TRIAGE_BRIDGE_UID` and the optional
    /// `TRIAGE_TOOLS_BASE_URL`.
    pub fn from_env() -> Result<Self, GatewayError> {
        let api_key = std::env::var("TRIAGE_TOOLS_API_KEY")
            .map_err(|_| GatewayError::MissingConfig("TRIAGE_TOOLS_API_KEY"))?;
        let bridge_uid = std::env::var("TRIAGE_BRIDGE_UID")
            .map_err(|_| GatewayError::MissingConfig("TRIAGE_BRIDGE_UID"))?;
        let base_url =
            std::env::var("TRIAGE_TOOLS_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        Ok(Self::new(base_url, api_key, bridge_uid))
    }

    /// Point the client at a different service endpoint.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/bridges/{}/{}", self.base_url, self.bridge_uid, path)
    }

    async fn send<R: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<R, GatewayError> {
        let response = request.header("X-API-Key", &self.api_key).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl ToolGateway for HttpToolGateway {
    async fn list_tools(&self) -> Result<Vec<ToolDefinition>, GatewayError> {
        let list: WireToolList = self.send(self.client.get(self.url("tools"))).await?;
        Ok(list.tools.into_iter().map(ToolDefinition::from).collect())
    }

    async fn run_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<ExecOutcome, GatewayError> {
        tracing::debug!(tool = name, "running tool");
        let request = self
            .client
            .post(self.url(&format!("tools/{}/run", name)))
            .json(&serde_json::json!({ "arguments": arguments }));
        let result: WireExecResult = self.send(request).await?;
        result.into_outcome()
    }

    async fn run_tools(&self, calls: &[ToolCall]) -> Result<Vec<ExecResult>, GatewayError> {
        tracing::debug!(count = calls.len(), "running tool batch");
        let body = WireToolCallBatch {
            tool_calls: calls.iter().map(WireToolCall::from).collect(),
        };
        let request = self.client.post(self.url("tool-calls")).json(&body);
        let results: Vec<WireExecResult> = self.send(request).await?;
        results
            .into_iter()
            .map(|r| {
                let tool_call_id = r.tool_call_id.clone().ok_or_else(|| {
                    GatewayError::Decode("batch result without toolCallId".to_string())
                })?;
                Ok(ExecResult {
                    tool_call_id,
                    outcome: r.into_outcome()?,
                })
            })
            .collect()
    }
}

// Wire types

#[derive(Debug, Deserialize)]
struct WireToolList {
    tools: Vec<WireToolDef>,
}

#[derive(Debug, Deserialize)]
struct WireToolDef {
    definition: WireFunctionDef,
}

#[derive(Debug, Deserialize)]
struct WireFunctionDef {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    parameters: WireParameters,
}

#[derive(Debug, Default, Deserialize)]
struct WireParameters {
    #[serde(default)]
    properties: Vec<ToolParameter>,
    #[serde(default)]
    required: Vec<String>,
}

impl From<WireToolDef> for ToolDefinition {
    fn from(def: WireToolDef) -> Self {
        let f = def.definition;
        ToolDefinition {
            name: f.name,
            description: f.description,
            parameters: f.parameters.properties,
            required: f.parameters.required,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WireToolCallBatch {
    tool_calls: Vec<WireToolCall>,
}

#[derive(Debug, Serialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type")]
    call_type: &'static str,
    details: WireCallDetails,
}

#[derive(Debug, Serialize)]
struct WireCallDetails {
    name: String,
    /// JSON-encoded argument object
    arguments: String,
}

impl From<&ToolCall> for WireToolCall {
    fn from(call: &ToolCall) -> Self {
        let arguments = if call.arguments.is_null() {
            "{}".to_string()
        } else {
            call.arguments.to_string()
        };
        WireToolCall {
            id: call.id.clone(),
            call_type: "function",
            details: WireCallDetails {
                name: call.name.clone(),
                arguments,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireExecResult {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    tool_call_id: Option<String>,
    #[serde(default)]
    data: serde_json::Value,
}

impl WireExecResult {
    fn into_outcome(self) -> Result<ExecOutcome, GatewayError> {
        let field = |name: &str| {
            self.data
                .get(name)
                .and_then(|v| v.as_str())
                .map(str::to_string)
        };
        match self.kind.as_str() {
            "exec_output" => {
                let content = field("content").ok_or_else(|| {
                    GatewayError::Decode("exec_output without content".to_string())
                })?;
                Ok(ExecOutcome::Output { content })
            }
            "error" => Ok(ExecOutcome::Error {
                message: field("message").unwrap_or_else(|| "unknown error".to_string()),
            }),
            other => Err(GatewayError::Decode(format!("unknown result type '{}'", other))),
        }
    }
}
