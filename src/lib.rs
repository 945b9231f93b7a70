//! newsapi-mcp: MCP gateway exposing News API search tools
//!
//! This library serves Model Context Protocol clients over streamable HTTP
//! and forwards their tool calls to the News API.
//!
//! # Architecture
//!
//! The gateway multiplexes many client sessions over one endpoint:
//!
//! - **Sessions**: Each client handshakes once and is then identified by an
//!   opaque session id. Calls within a session are handled strictly in order;
//!   independent sessions never wait on each other
//! - **Tools**: A registry of named tools, each with a declarative input
//!   schema. Arguments are validated and defaulted before a handler runs
//! - **Provider**: Handlers forward validated queries to the News API and
//!   return its documents unchanged
//!
//! # Modules
//!
//! - [`config`] — Configuration loading and validation
//! - [`error`] — Error types
//! - [`mcp`] — MCP protocol, sessions and the HTTP gateway
//! - [`tools`] — Tool registry, schemas and dispatch
//! - [`newsapi`] — News API client

pub mod config;
pub mod error;
pub mod mcp;
pub mod newsapi;
pub mod tools;
