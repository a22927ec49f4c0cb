//! Tool dispatch table
//!
//! Each tool declares its contract (name, title, description, input and
//! output schema) and a handler taking a typed input. Arguments that do not
//! deserialize into the input type are a protocol error; anything that goes
//! wrong inside a handler is returned in-band as an error envelope.

mod echo;
mod graph;

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, warn};

use crate::auth::RequestContext;
use crate::downstream::{ApiClient, Connector};
use crate::protocol::{Content, Tool, ToolsCallResult};

/// What a handler gets besides its input
#[derive(Clone)]
pub struct ToolContext {
    /// The verified caller of this request
    pub request: RequestContext,
    connector: Arc<Connector>,
}

impl ToolContext {
    /// Context for one call made by `request`
    #[must_use]
    pub fn new(request: RequestContext, connector: Arc<Connector>) -> Self {
        Self { request, connector }
    }

    /// Downstream client acting as the caller
    #[must_use]
    pub fn api(&self) -> ApiClient {
        self.connector.on_behalf_of(&self.request)
    }
}

/// One entry of the dispatch table
#[async_trait]
pub trait ToolHandler: Send + Sync + 'static {
    /// Typed input; deserialized from the call arguments
    type Input: DeserializeOwned + Send;

    /// Contract advertised by `tools/list`
    fn definition(&self) -> Tool;

    /// Perform the operation and return the structured payload
    async fn run(&self, ctx: &ToolContext, input: Self::Input) -> crate::Result<Value>;
}

/// Failures that are reported as JSON-RPC errors rather than in-band
#[derive(Error, Debug)]
pub enum DispatchError {
    /// No tool with this name
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// Arguments do not match the tool's input schema
    #[error("Invalid arguments for tool '{tool}': {reason}")]
    InvalidArguments {
        /// Tool name
        tool: String,
        /// Deserialization error
        reason: String,
    },
}

#[async_trait]
trait ErasedTool: Send + Sync {
    async fn call(
        &self,
        name: &str,
        ctx: &ToolContext,
        arguments: Value,
    ) -> Result<ToolsCallResult, DispatchError>;
}

#[async_trait]
impl<T: ToolHandler> ErasedTool for T {
    async fn call(
        &self,
        name: &str,
        ctx: &ToolContext,
        arguments: Value,
    ) -> Result<ToolsCallResult, DispatchError> {
        // Absent arguments mean "no arguments"
        let arguments = if arguments.is_null() { json!({}) } else { arguments };
        let input: T::Input =
            serde_json::from_value(arguments).map_err(|e| DispatchError::InvalidArguments {
                tool: name.to_string(),
                reason: e.to_string(),
            })?;

        Ok(match self.run(ctx, input).await {
            Ok(output) => success(output),
            Err(e) => {
                warn!(tool = %name, subject = %ctx.request.identity.subject, error = %e, "Tool call failed");
                failure(&e.to_string())
            }
        })
    }
}

struct Entry {
    definition: Tool,
    handler: Box<dyn ErasedTool>,
}

/// Immutable name → (contract, handler) table
pub struct ToolRegistry {
    entries: Vec<Entry>,
}

impl ToolRegistry {
    /// Empty table
    #[must_use]
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// The gateway's tool set
    #[must_use]
    pub fn builtin() -> Self {
        Self::empty()
            .with(echo::Echo)
            .with(graph::ListTenantUsers)
            .with(graph::ListSiteLists)
            .with(graph::ListItems)
            .with(graph::SearchSites)
            .with(graph::GetMyProfile)
    }

    /// Add a tool (later entries with the same name are unreachable)
    #[must_use]
    pub fn with<T: ToolHandler>(mut self, tool: T) -> Self {
        self.entries.push(Entry {
            definition: tool.definition(),
            handler: Box::new(tool),
        });
        self
    }

    /// Every contract, in registration order
    #[must_use]
    pub fn list(&self) -> Vec<Tool> {
        self.entries.iter().map(|e| e.definition.clone()).collect()
    }

    /// Run the tool `name` with `arguments`
    ///
    /// # Errors
    ///
    /// [`DispatchError`] for an unknown tool or arguments that do not fit the
    /// input type. Handler failures are returned as `Ok` with `isError`.
    pub async fn call(
        &self,
        ctx: &ToolContext,
        name: &str,
        arguments: Value,
    ) -> Result<ToolsCallResult, DispatchError> {
        let entry = self
            .entries
            .iter()
            .find(|e| e.definition.name == name)
            .ok_or_else(|| DispatchError::UnknownTool(name.to_string()))?;

        debug!(tool = %name, subject = %ctx.request.identity.subject, "Calling tool");
        entry.handler.call(name, ctx, arguments).await
    }
}

/// Success envelope: compact JSON text plus the structured payload
fn success(output: Value) -> ToolsCallResult {
    let text = serde_json::to_string(&output).unwrap_or_default();
    ToolsCallResult {
        content: vec![Content::text(text)],
        structured_content: output,
        is_error: false,
    }
}

/// Error envelope
fn failure(message: &str) -> ToolsCallResult {
    ToolsCallResult {
        content: vec![Content::text(format!("Error: {message}"))],
        structured_content: json!({
            "result": "API call failed",
            "authenticated": false,
            "error": message,
        }),
        is_error: true,
    }
}

/// Output schema shared by the downstream tools
fn result_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "result": {"type": "string"},
            "userData": {}
        },
        "required": ["result"]
    })
}
