//! Streamable HTTP gateway.
//!
//! A single endpoint serves every session:
//!
//! - `POST` carries one JSON-RPC message. Requests are answered with a
//!   `text/event-stream` body; notifications and client responses with 202
//! - `DELETE` terminates the session named by `Mcp-Session-Id`
//! - `GET` is refused with 405; this server never pushes unsolicited messages
//!
//! The gateway checks stream negotiation, content type and body size, parses
//! the envelope, then either forwards it to the session's transport or hands
//! it to a fresh transport when no session header is present.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::rejection::BytesRejection;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::header::{self, HeaderMap, HeaderValue};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;
use tokio_stream::StreamExt;
use tower_http::trace::TraceLayer;

use crate::config::ServerConfig;
use crate::error::ProtocolError;
use crate::mcp::protocol::{is_supported_version, parse_message};
use crate::mcp::server::McpServer;
use crate::mcp::session::{SessionId, SessionRegistry, SessionState};
use crate::mcp::transport::{Reply, ReplyStream, SessionTransport};

/// Session correlation header.
pub const MCP_SESSION_ID_HEADER: &str = "mcp-session-id";

/// Protocol version header sent by clients after the handshake.
pub const MCP_PROTOCOL_VERSION_HEADER: &str = "mcp-protocol-version";

/// Interval between SSE keep-alive comments on long-running calls.
const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Shared state for the gateway.
#[derive(Debug, Clone)]
pub struct GatewayState {
    server: Arc<McpServer>,
    sessions: Arc<SessionRegistry>,
    max_body_bytes: usize,
}

impl GatewayState {
    /// Creates gateway state with an empty session registry.
    #[must_use]
    pub fn new(server: Arc<McpServer>, max_body_bytes: usize) -> Self {
        Self {
            server,
            sessions: Arc::new(SessionRegistry::new()),
            max_body_bytes,
        }
    }

    /// Returns the session registry.
    #[must_use]
    pub const fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }
}

/// Builds the router serving the endpoint at `path`.
pub fn router(path: &str, state: GatewayState) -> Router {
    let body_limit = state.max_body_bytes;
    Router::new()
        .route(
            path,
            post(handle_post).delete(handle_delete).get(handle_get),
        )
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Binds the configured address and serves until SIGINT/SIGTERM.
///
/// Every live session is closed once the server has stopped.
///
/// # Errors
///
/// Returns an error if the address cannot be bound or serving fails.
pub async fn serve(config: &ServerConfig, state: GatewayState) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind((config.host.as_str(), config.port)).await?;
    tracing::info!(
        address = %listener.local_addr()?,
        path = %config.path,
        "MCP gateway listening"
    );

    let sessions = Arc::clone(&state.sessions);
    axum::serve(listener, router(&config.path, state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!(sessions = sessions.len(), "Closing remaining sessions");
    sessions.close_all();
    Ok(())
}

/// Resolves when the process is asked to stop.
#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let (Ok(mut sigint), Ok(mut sigterm)) = (
        signal(SignalKind::interrupt()),
        signal(SignalKind::terminate()),
    ) else {
        tracing::warn!("Failed to install signal handlers; falling back to Ctrl+C");
        let _ = tokio::signal::ctrl_c().await;
        return;
    };

    tokio::select! {
        _ = sigint.recv() => {
            tracing::info!("Received SIGINT, initiating graceful shutdown");
        }
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}

/// Resolves when the process is asked to stop.
#[cfg(windows)]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("Received Ctrl+C, initiating graceful shutdown");
}

async fn handle_post(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Result<Response, ProtocolError> {
    if !accepts_event_stream(&headers) {
        return Err(ProtocolError::NotAcceptable);
    }
    if !is_json(&headers) {
        return Err(ProtocolError::UnsupportedMediaType);
    }

    let body = body.map_err(|rejection| {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ProtocolError::PayloadTooLarge {
                limit: state.max_body_bytes,
            }
        } else {
            ProtocolError::Parse(rejection.body_text())
        }
    })?;
    let message = parse_message(&body)?;

    let transport = match session_header(&headers)? {
        Some(raw) => {
            check_protocol_version(&headers)?;
            lookup(&state.sessions, raw)?
        }
        None => SessionTransport::new(Arc::clone(&state.server), state.sessions.clone()),
    };

    match transport.handle(message).await? {
        Reply::Accepted => Ok(StatusCode::ACCEPTED.into_response()),
        Reply::Stream(events) => Ok(stream_response(&transport, events)),
    }
}

async fn handle_delete(
    State(state): State<GatewayState>,
    headers: HeaderMap,
) -> Result<StatusCode, ProtocolError> {
    let raw = session_header(&headers)?.ok_or(ProtocolError::MissingSessionId)?;
    let transport = lookup(&state.sessions, raw)?;
    transport.close("terminated by client");
    Ok(StatusCode::OK)
}

async fn handle_get() -> ProtocolError {
    ProtocolError::MethodNotAllowed
}

fn lookup(sessions: &SessionRegistry, raw: &str) -> Result<Arc<SessionTransport>, ProtocolError> {
    SessionId::parse(raw)
        .and_then(|id| sessions.lookup(&id))
        .ok_or(ProtocolError::SessionNotFound)
}

/// Wraps a reply stream as an SSE response carrying the session id.
fn stream_response(transport: &SessionTransport, events: ReplyStream) -> Response {
    let stream = events.map(|data| Ok::<_, Infallible>(Event::default().event("message").data(data)));

    let mut response = Sse::new(stream)
        .keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL))
        .into_response();

    if transport.state() == SessionState::Active {
        if let Ok(value) = HeaderValue::from_str(&transport.id().to_string()) {
            response.headers_mut().insert(MCP_SESSION_ID_HEADER, value);
        }
    }
    response
}

/// Returns `true` if any `Accept` header lists `text/event-stream`.
fn accepts_event_stream(headers: &HeaderMap) -> bool {
    headers
        .get_all(header::ACCEPT)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|item| media_type(item).eq_ignore_ascii_case("text/event-stream"))
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| media_type(value).eq_ignore_ascii_case("application/json"))
}

/// Strips parameters (`; charset=...`, `; q=...`) from a media range.
fn media_type(value: &str) -> &str {
    value.split(';').next().unwrap_or_default().trim()
}

fn session_header(headers: &HeaderMap) -> Result<Option<&str>, ProtocolError> {
    headers
        .get(MCP_SESSION_ID_HEADER)
        .map(|value| value.to_str().map_err(|_| ProtocolError::SessionNotFound))
        .transpose()
}

fn check_protocol_version(headers: &HeaderMap) -> Result<(), ProtocolError> {
    let Some(value) = headers.get(MCP_PROTOCOL_VERSION_HEADER) else {
        return Ok(());
    };
    let version = value.to_str().unwrap_or_default().trim();
    if is_supported_version(version) {
        Ok(())
    } else {
        Err(ProtocolError::UnsupportedProtocolVersion(version.to_string()))
    }
}
