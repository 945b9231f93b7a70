//! MCP server method handlers.
//!
//! One [`McpServer`] is shared by every session. It owns the immutable tool
//! registry and answers the methods this server implements:
//!
//! 1. **Initialisation**: capability negotiation and version agreement
//! 2. **Operation**: `ping`, `tools/list` and `tools/call`
//!
//! Lifecycle state lives in each session's transport, not here.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{TransportError, ValidationError};
use crate::mcp::protocol::{
    is_supported_version, JsonRpcError, JsonRpcRequest, JsonRpcResponse, OutgoingMessage,
    RequestId, MCP_PROTOCOL_VERSION, SERVER_NAME,
};
use crate::tools::dispatch::{self, PreparedCall};
use crate::tools::{ToolCallParams, ToolCallResult, ToolRegistry};

/// Server capabilities advertised during initialisation.
#[derive(Debug, Clone, Serialize)]
pub struct ServerCapabilities {
    /// Tool-related capabilities.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<ToolCapabilities>,
}

impl Default for ServerCapabilities {
    fn default() -> Self {
        Self {
            tools: Some(ToolCapabilities::default()),
        }
    }
}

/// Tool-specific capabilities.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ToolCapabilities {
    /// Whether the tool list can change during the session. The registry is
    /// immutable after startup, so this is always `false`.
    #[serde(rename = "listChanged")]
    pub list_changed: bool,
}

/// Server information for initialisation response.
#[derive(Debug, Clone, Serialize)]
pub struct ServerInfo {
    /// Server name.
    pub name: String,
    /// Server version.
    pub version: String,
}

impl Default for ServerInfo {
    fn default() -> Self {
        Self {
            name: SERVER_NAME.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Client information received during initialisation.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    /// Client name.
    pub name: String,
    /// Client version.
    #[serde(default)]
    pub version: Option<String>,
}

/// Parameters for the initialize request.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    /// Protocol version requested by client.
    pub protocol_version: String,
    /// Client capabilities.
    #[serde(default)]
    pub capabilities: Value,
    /// Client information.
    #[serde(default)]
    pub client_info: Option<ClientInfo>,
}

/// Outcome of a successful handshake.
#[derive(Debug, Clone)]
pub struct Negotiated {
    /// The protocol version both sides will speak.
    pub protocol_version: String,
    /// What the client said about itself.
    pub client_info: Option<ClientInfo>,
}

/// A validated `tools/call`, ready to run.
#[derive(Debug)]
pub struct PendingCall {
    /// Originating request id.
    pub id: RequestId,
    /// Progress token, if the client asked for progress updates.
    pub progress_token: Option<Value>,
    /// The call itself.
    pub call: PreparedCall,
}

/// The MCP server shared by every session.
#[derive(Debug)]
pub struct McpServer {
    tools: ToolRegistry,
    info: ServerInfo,
}

impl McpServer {
    /// Creates a server exposing `tools`.
    #[must_use]
    pub fn new(tools: ToolRegistry) -> Self {
        Self {
            tools,
            info: ServerInfo::default(),
        }
    }

    /// Handles the initialize request.
    ///
    /// The client's requested version is echoed when supported; otherwise the
    /// newest supported version is offered and the client decides whether to
    /// continue.
    ///
    /// # Errors
    ///
    /// Returns an invalid-params error if the params are missing or malformed.
    pub fn initialize(
        &self,
        req: &JsonRpcRequest,
    ) -> Result<(JsonRpcResponse, Negotiated), JsonRpcError> {
        let params: InitializeParams = parse_params(req, "initialize")?;

        let protocol_version = if is_supported_version(&params.protocol_version) {
            params.protocol_version
        } else {
            tracing::info!(
                requested = %params.protocol_version,
                offered = MCP_PROTOCOL_VERSION,
                "Client requested unsupported protocol version"
            );
            MCP_PROTOCOL_VERSION.to_string()
        };

        let result = json!({
            "protocolVersion": protocol_version,
            "capabilities": ServerCapabilities::default(),
            "serverInfo": self.info,
        });

        Ok((
            JsonRpcResponse::success(req.id.clone(), result),
            Negotiated {
                protocol_version,
                client_info: params.client_info,
            },
        ))
    }

    /// Handles every method except `initialize` and `tools/call`, which need
    /// session context.
    #[must_use]
    pub fn handle_request(&self, req: &JsonRpcRequest) -> OutgoingMessage {
        match req.method.as_str() {
            "ping" => Self::handle_ping(req).into(),
            "tools/list" => self.handle_tools_list(req).into(),
            _ => JsonRpcError::method_not_found(req.id.clone(), &req.method).into(),
        }
    }

    /// Handles the ping request.
    fn handle_ping(req: &JsonRpcRequest) -> JsonRpcResponse {
        JsonRpcResponse::success(req.id.clone(), json!({}))
    }

    /// Handles the tools/list request.
    fn handle_tools_list(&self, req: &JsonRpcRequest) -> JsonRpcResponse {
        let result = json!({
            "tools": self.tools.definitions(),
        });

        JsonRpcResponse::success(req.id.clone(), result)
    }

    /// Validates a tools/call request.
    ///
    /// # Errors
    ///
    /// Returns an invalid-params error if the params are malformed, name an
    /// unknown tool, or violate the tool's schema. The handler is not run.
    pub fn prepare_call(&self, req: &JsonRpcRequest) -> Result<PendingCall, JsonRpcError> {
        let params = parse_call_params(req)?;
        let progress_token = params.progress_token().cloned();
        let tool = params.name.clone();

        let call = dispatch::prepare(&self.tools, params).map_err(|e| {
            tracing::info!(tool = %tool, request_id = %req.id, error = %e, "Tool call rejected");
            e.to_jsonrpc(req.id.clone())
        })?;

        Ok(PendingCall {
            id: req.id.clone(),
            progress_token,
            call,
        })
    }

    /// Wraps a finished call as its terminal response.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Serialise`] if the result cannot be encoded.
    pub fn complete_call(
        id: RequestId,
        result: &ToolCallResult,
    ) -> Result<JsonRpcResponse, TransportError> {
        let value = serde_json::to_value(result)?;
        Ok(JsonRpcResponse::success(id, value))
    }
}

fn parse_call_params(req: &JsonRpcRequest) -> Result<ToolCallParams, JsonRpcError> {
    let params = req.params.as_ref().ok_or_else(|| {
        ValidationError::MalformedCall("missing params".to_string()).to_jsonrpc(req.id.clone())
    })?;
    serde_json::from_value(params.clone())
        .map_err(|e| ValidationError::MalformedCall(e.to_string()).to_jsonrpc(req.id.clone()))
}

fn parse_params<T: serde::de::DeserializeOwned>(
    req: &JsonRpcRequest,
    what: &str,
) -> Result<T, JsonRpcError> {
    req.params
        .as_ref()
        .map(|p| serde_json::from_value(p.clone()))
        .transpose()
        .map_err(|e| JsonRpcError::invalid_params(req.id.clone(), format!("Invalid {what} params: {e}")))?
        .ok_or_else(|| JsonRpcError::invalid_params(req.id.clone(), format!("Missing {what} params")))
}
