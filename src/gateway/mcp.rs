//! JSON-RPC method dispatch for `POST /mcp`
//!
//! One message per request, no session. The caller's [`RequestContext`] is
//! passed in explicitly and handed to the tool that runs.

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::auth::RequestContext;
use crate::downstream::Connector;
use crate::error::rpc_codes;
use crate::protocol::{
    InitializeParams, InitializeResult, Info, JsonRpcResponse, RequestId, ServerCapabilities,
    ToolsCallParams, ToolsCapability, ToolsListResult, negotiate_version,
};
use crate::tools::{ToolContext, ToolRegistry};
use crate::Error;

/// A parsed JSON-RPC message
#[derive(Debug)]
pub struct ParsedRequest {
    /// Request id (absent for notifications)
    pub id: Option<RequestId>,
    /// Method name
    pub method: String,
    /// Parameters
    pub params: Option<Value>,
}

impl ParsedRequest {
    /// Notifications get 202 and no body
    #[must_use]
    pub fn is_notification(&self) -> bool {
        is_notification_method(&self.method)
    }
}

/// MCP method handler
pub struct McpHandler {
    tools: ToolRegistry,
    connector: Arc<Connector>,
}

impl McpHandler {
    /// Create a handler serving `tools`
    #[must_use]
    pub fn new(tools: ToolRegistry, connector: Arc<Connector>) -> Self {
        Self { tools, connector }
    }

    /// Answer one request on behalf of `ctx`
    pub async fn handle(
        &self,
        ctx: RequestContext,
        id: RequestId,
        method: &str,
        params: Option<Value>,
    ) -> JsonRpcResponse {
        debug!(method = %method, subject = %ctx.identity.subject, "MCP request");

        match method {
            "initialize" => Self::handle_initialize(id, params.as_ref()),
            "ping" => JsonRpcResponse::success(id, serde_json::json!({})),
            "tools/list" => self.handle_tools_list(id),
            "tools/call" => self.handle_tools_call(ctx, id, params).await,
            _ => JsonRpcResponse::error(
                Some(id),
                rpc_codes::METHOD_NOT_FOUND,
                format!("Method not found: {method}"),
            ),
        }
    }

    /// Handle initialize request with version negotiation
    pub fn handle_initialize(id: RequestId, params: Option<&Value>) -> JsonRpcResponse {
        let requested = params
            .cloned()
            .and_then(|p| serde_json::from_value::<InitializeParams>(p).ok())
            .unwrap_or_default();
        let negotiated = negotiate_version(&requested.protocol_version);
        debug!(
            client = %requested.protocol_version,
            negotiated = negotiated,
            "Protocol version negotiation"
        );

        let result = InitializeResult {
            protocol_version: negotiated.to_string(),
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability {
                    list_changed: false,
                }),
            },
            server_info: Info {
                name: env!("CARGO_PKG_NAME").to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                title: None,
            },
            instructions: None,
        };
        respond(id, &result)
    }

    /// Handle tools/list request
    pub fn handle_tools_list(&self, id: RequestId) -> JsonRpcResponse {
        respond(
            id,
            &ToolsListResult {
                tools: self.tools.list(),
            },
        )
    }

    /// Handle tools/call request
    pub async fn handle_tools_call(
        &self,
        ctx: RequestContext,
        id: RequestId,
        params: Option<Value>,
    ) -> JsonRpcResponse {
        let params: ToolsCallParams =
            match params.map(serde_json::from_value).transpose() {
                Ok(Some(p)) => p,
                Ok(None) => {
                    return JsonRpcResponse::error(
                        Some(id),
                        rpc_codes::INVALID_PARAMS,
                        "Missing params",
                    );
                }
                Err(e) => {
                    return JsonRpcResponse::error(
                        Some(id),
                        rpc_codes::INVALID_PARAMS,
                        format!("Invalid params: {e}"),
                    );
                }
            };

        let tool_ctx = ToolContext::new(ctx, Arc::clone(&self.connector));
        match self.tools.call(&tool_ctx, &params.name, params.arguments).await {
            Ok(result) => respond(id, &result),
            // Unknown tool or arguments that do not fit its input
            Err(e) => JsonRpcResponse::error(Some(id), rpc_codes::INVALID_PARAMS, e.to_string()),
        }
    }
}

fn respond<T: serde::Serialize>(id: RequestId, result: &T) -> JsonRpcResponse {
    match serde_json::to_value(result) {
        Ok(value) => JsonRpcResponse::success(id, value),
        Err(e) => error_response(Some(id), &Error::Internal(e.to_string())),
    }
}

/// JSON-RPC error envelope for a gateway error
pub fn error_response(id: Option<RequestId>, error: &Error) -> JsonRpcResponse {
    JsonRpcResponse::error(id, error.to_rpc_code(), error.to_string())
}

fn extract_request_id(value: &Value) -> Option<RequestId> {
    match value {
        Value::String(s) => Some(RequestId::String(s.clone())),
        Value::Number(n) => n.as_i64().map(RequestId::Number),
        _ => None,
    }
}

/// Check whether a method name represents a notification (no response expected).
fn is_notification_method(method: &str) -> bool {
    method.starts_with("notifications/")
}

/// Validate the JSON-RPC envelope
///
/// # Errors
///
/// Returns the `-32600` response to send back when the envelope is invalid.
pub fn parse_request(value: &Value) -> Result<ParsedRequest, JsonRpcResponse> {
    let jsonrpc = value.get("jsonrpc").and_then(|v| v.as_str());
    if jsonrpc != Some("2.0") {
        return Err(error_response(
            None,
            &Error::Protocol("Invalid JSON-RPC version".to_string()),
        ));
    }

    let id = value.get("id").and_then(extract_request_id);

    let method = value
        .get("method")
        .and_then(|v| v.as_str())
        .ok_or_else(|| {
            error_response(id.clone(), &Error::Protocol("Missing method".to_string()))
        })?;

    if !is_notification_method(method) && id.is_none() {
        return Err(error_response(
            None,
            &Error::Protocol("Missing id".to_string()),
        ));
    }

    Ok(ParsedRequest {
        id,
        method: method.to_string(),
        params: value.get("params").cloned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn parse_request_valid_with_string_id() {
        let req = json!({"jsonrpc": "2.0", "id": "req-1", "method": "tools/list"});
        let parsed = parse_request(&req).unwrap();
        assert_eq!(parsed.id, Some(RequestId::String("req-1".to_string())));
        assert_eq!(parsed.method, "tools/list");
        assert!(parsed.params.is_none());
    }

    #[test]
    fn parse_request_notification_without_id() {
        let req = json!({"jsonrpc": "2.0", "method": "notifications/initialized"});
        let parsed = parse_request(&req).unwrap();
        assert!(parsed.id.is_none());
        assert!(parsed.is_notification());
    }

    #[test]
    fn parse_request_wrong_jsonrpc_version() {
        let req = json!({"jsonrpc": "1.0", "id": 1, "method": "ping"});
        let err = parse_request(&req).unwrap_err();
        assert_eq!(err.error.unwrap().code, -32600);
    }

    #[test]
    fn parse_request_missing_method() {
        let req = json!({"jsonrpc": "2.0", "id": 1});
        let err = parse_request(&req).unwrap_err();
        let error = err.error.unwrap();
        assert_eq!(error.code, -32600);
        assert!(error.message.contains("method"));
    }

    #[test]
    fn parse_request_non_notification_without_id() {
        let req = json!({"jsonrpc": "2.0", "method": "tools/list"});
        let err = parse_request(&req).unwrap_err();
        assert!(err.error.unwrap().message.contains("id"));
    }

    #[test]
    fn error_response_takes_code_from_error_kind() {
        // GIVEN: a body that is not JSON
        let parse = serde_json::from_str::<Value>("{not json").unwrap_err();

        // WHEN: it is turned into an envelope
        let response = error_response(None, &Error::from(parse));

        // THEN: it carries the parse error code and a null id
        let error = response.error.unwrap();
        assert_eq!(error.code, rpc_codes::PARSE_ERROR);
        assert!(error.message.starts_with("JSON error"));
        assert!(response.id.is_none());
    }

    #[test]
    fn initialize_echoes_supported_version() {
        let response = McpHandler::handle_initialize(
            RequestId::Number(1),
            Some(&json!({"protocolVersion": "2025-03-26", "capabilities": {}})),
        );
        let result = response.result.unwrap();

        assert_eq!(result["protocolVersion"], "2025-03-26");
        assert_eq!(result["capabilities"], json!({"tools": {"listChanged": false}}));
        assert_eq!(result["serverInfo"]["name"], "mcp-obo-gateway");
    }

    #[test]
    fn initialize_without_params_gets_latest_version() {
        let response = McpHandler::handle_initialize(RequestId::Number(1), None);
        assert_eq!(
            response.result.unwrap()["protocolVersion"],
            crate::protocol::PROTOCOL_VERSION
        );
    }
}
