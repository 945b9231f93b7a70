//! Model Context Protocol (MCP) server implementation.
//!
//! This module implements the MCP streamable HTTP transport. Many clients
//! share one endpoint; each gets its own session with its own protocol state
//! machine, while the tool registry behind them is shared.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                           MCP Gateway                            │
//! │                                                                  │
//! │   ┌─────────────┐    ┌──────────────┐    ┌──────────────────┐    │
//! │   │   Gateway   │───▶│   Session    │───▶│     Session      │    │
//! │   │   (axum)    │    │   Registry   │    │    Transport     │    │
//! │   └─────────────┘    └──────────────┘    └──────────────────┘    │
//! │                                                   │              │
//! │                                                   ▼              │
//! │                      ┌──────────────┐    ┌──────────────────┐    │
//! │                      │    Tools     │◀───│    McpServer     │    │
//! │                      │  (dispatch)  │    │ (method handlers)│    │
//! │                      └──────────────┘    └──────────────────┘    │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Protocol Version
//!
//! This implementation targets MCP protocol version 2025-06-18 and accepts
//! 2025-03-26 and 2024-11-05.

pub mod gateway;
pub mod protocol;
pub mod server;
pub mod session;
pub mod transport;

pub use gateway::{router, serve, GatewayState};
pub use protocol::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, MCP_PROTOCOL_VERSION};
pub use server::McpServer;
pub use session::{Session, SessionId, SessionRegistry, SessionState};
pub use transport::SessionTransport;
