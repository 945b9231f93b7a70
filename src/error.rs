//! Error types for newsapi-mcp.
//!
//! The taxonomy follows the layers a request passes through:
//!
//! - [`ProtocolError`]: envelope, negotiation and session-correlation faults,
//!   raised before any tool is looked up
//! - [`ValidationError`]: a call named an unknown tool or its arguments do not
//!   satisfy the tool's schema; the handler is never invoked
//! - [`HandlerError`]: a tool handler (or the provider behind it) failed
//! - [`TransportError`]: the session's stream or internal plumbing failed; the
//!   owning session is torn down
//!
//! # Security Note
//!
//! Error messages NEVER include the News API credential. Variants that
//! describe a credential problem only name the environment variable.

use std::fmt;
use std::path::PathBuf;

use axum::http::header::{self, HeaderValue};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

use crate::mcp::protocol::{ErrorCode, JsonRpcError, JsonRpcErrorData, RequestId};
use crate::newsapi::NewsApiError;

/// Errors that can occur during configuration operations.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Configuration file could not be read.
    #[error("failed to read configuration file: {path}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Configuration file could not be parsed.
    #[error("failed to parse configuration file: {path}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// Configuration file not found.
    #[error("configuration file not found: {path}")]
    NotFound {
        /// Path where the configuration file was expected.
        path: PathBuf,
    },

    /// Configuration validation failed.
    #[error("configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation failure.
        message: String,
    },
}

/// Errors raised while populating the tool or session registries.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// A tool with this name is already registered. Fatal at startup.
    #[error("tool already registered: {0}")]
    DuplicateTool(String),

    /// A session with this id is already registered.
    #[error("session already registered: {0}")]
    DuplicateSession(String),
}

/// Connection-level protocol violations.
///
/// These are answered directly on the HTTP response, before the session
/// registry or any tool handler is involved.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The client did not declare that it accepts an event stream.
    #[error("Not Acceptable: Client must accept text/event-stream")]
    NotAcceptable,

    /// The request body is not declared as JSON.
    #[error("Unsupported Media Type: Content-Type must be application/json")]
    UnsupportedMediaType,

    /// The request body exceeded the configured limit.
    #[error("Payload Too Large: request body exceeds {limit} bytes")]
    PayloadTooLarge {
        /// Configured limit in bytes.
        limit: usize,
    },

    /// The HTTP method is not served by the endpoint.
    #[error("Method Not Allowed")]
    MethodNotAllowed,

    /// The body is not valid JSON.
    #[error("Parse error: {0}")]
    Parse(String),

    /// The body is JSON but not a valid JSON-RPC message.
    #[error("Invalid Request: {message}")]
    InvalidRequest {
        /// Originating request id, when it could be read.
        id: Option<RequestId>,
        /// What was wrong with the message.
        message: String,
    },

    /// A message other than `initialize` arrived without a session.
    #[error("Bad Request: Server not initialized")]
    NotInitialized {
        /// Originating request id, when it could be read.
        id: Option<RequestId>,
    },

    /// `initialize` arrived on a session that already completed its handshake.
    #[error("Invalid Request: Server already initialized")]
    AlreadyInitialized {
        /// Originating request id.
        id: Option<RequestId>,
    },

    /// A request that needs a session did not carry the session header.
    #[error("Bad Request: Mcp-Session-Id header is required")]
    MissingSessionId,

    /// The session header does not name a live session.
    #[error("Session not found: re-initialize to start a new session")]
    SessionNotFound,

    /// The `Mcp-Protocol-Version` header names an unsupported version.
    #[error("Bad Request: Unsupported protocol version {0}")]
    UnsupportedProtocolVersion(String),
}

impl ProtocolError {
    /// Returns the HTTP status this error is reported with.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::NotAcceptable => StatusCode::NOT_ACCEPTABLE,
            Self::UnsupportedMediaType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Self::SessionNotFound => StatusCode::NOT_FOUND,
            Self::Parse(_)
            | Self::InvalidRequest { .. }
            | Self::NotInitialized { .. }
            | Self::AlreadyInitialized { .. }
            | Self::MissingSessionId
            | Self::UnsupportedProtocolVersion(_) => StatusCode::BAD_REQUEST,
        }
    }

    /// Returns the JSON-RPC error code carried in the response body.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Parse(_) => ErrorCode::ParseError,
            Self::InvalidRequest { .. } | Self::AlreadyInitialized { .. } => {
                ErrorCode::InvalidRequest
            }
            Self::SessionNotFound => ErrorCode::ServerError(-32001),
            _ => ErrorCode::ServerError(-32000),
        }
    }

    /// Returns the originating request id, if one is known.
    #[must_use]
    pub fn request_id(&self) -> Option<RequestId> {
        match self {
            Self::InvalidRequest { id, .. }
            | Self::NotInitialized { id }
            | Self::AlreadyInitialized { id } => id.clone(),
            _ => None,
        }
    }

    /// Renders this error as a JSON-RPC error message.
    #[must_use]
    pub fn to_jsonrpc(&self) -> JsonRpcError {
        JsonRpcError::new(
            self.request_id(),
            JsonRpcErrorData::with_message(self.code(), self.to_string()),
        )
    }
}

impl IntoResponse for ProtocolError {
    fn into_response(self) -> Response {
        let mut response = (self.status(), Json(self.to_jsonrpc())).into_response();
        if matches!(self, Self::MethodNotAllowed) {
            response
                .headers_mut()
                .insert(header::ALLOW, HeaderValue::from_static("POST, DELETE"));
        }
        response
    }
}

/// A single schema violation on one argument field.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct FieldIssue {
    /// The offending field name.
    pub field: String,
    /// Human-readable description of the violation.
    pub message: String,
}

impl FieldIssue {
    /// Creates a new issue for `field`.
    #[must_use]
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// A tool call was rejected before its handler ran.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// No tool with this name is registered.
    #[error("Tool {0} not found")]
    UnknownTool(String),

    /// The `tools/call` params themselves are malformed.
    #[error("Invalid tool call params: {0}")]
    MalformedCall(String),

    /// One or more arguments violate the tool's schema.
    #[error("Invalid arguments for tool {tool}: {}", join_issues(.issues))]
    InvalidArguments {
        /// The tool whose schema was violated.
        tool: String,
        /// Every violation found, in schema order.
        issues: Vec<FieldIssue>,
    },
}

fn join_issues(issues: &[FieldIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl ValidationError {
    /// Renders this error as a JSON-RPC invalid-params error for `id`.
    #[must_use]
    pub fn to_jsonrpc(&self, id: RequestId) -> JsonRpcError {
        let mut data = JsonRpcErrorData::with_message(ErrorCode::InvalidParams, self.to_string());
        if let Self::InvalidArguments { issues, .. } = self {
            data = data.with_data(serde_json::json!({ "issues": issues }));
        }
        JsonRpcError::new(Some(id), data)
    }
}

/// A tool handler failed.
#[derive(Error, Debug)]
pub enum HandlerError {
    /// The data provider rejected or failed the request.
    #[error("News API {endpoint} tool failed: {source}")]
    Provider {
        /// Display name of the endpoint, e.g. `Top Headlines`.
        endpoint: &'static str,
        /// The provider failure.
        #[source]
        source: NewsApiError,
    },

    /// The handler panicked; the session survives.
    #[error("tool handler panicked")]
    Panicked,

    /// Any other failure reported by a handler.
    #[error("{0}")]
    Other(String),
}

/// The session's stream or internal plumbing failed.
#[derive(Error, Debug)]
pub enum TransportError {
    /// The client went away before the terminal envelope was written.
    #[error("response stream closed by client")]
    StreamClosed,

    /// A spawned tool task did not complete.
    #[error("tool task failed: {0}")]
    Task(String),

    /// A message could not be serialised.
    #[error("failed to serialise message")]
    Serialise(#[from] serde_json::Error),

    /// The session could not be recorded in the registry.
    #[error(transparent)]
    Registration(#[from] RegistryError),
}

impl TransportError {
    /// Renders this error as a generic server fault for `id`.
    ///
    /// The detail stays in the logs; clients only see a generic message.
    #[must_use]
    pub fn to_jsonrpc(&self, id: Option<RequestId>) -> JsonRpcError {
        JsonRpcError::new(
            id,
            JsonRpcErrorData::with_message(ErrorCode::InternalError, "Internal server error"),
        )
    }
}

impl IntoResponse for TransportError {
    fn into_response(self) -> Response {
        (StatusCode::INTERNAL_SERVER_ERROR, Json(self.to_jsonrpc(None))).into_response()
    }
}
