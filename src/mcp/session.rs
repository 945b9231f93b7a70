//! Session identity, lifecycle state and the session registry.
//!
//! A session is created by a successful `initialize` handshake and lives
//! until the client terminates it, its stream drops mid-call, or a transport
//! fault tears it down. Closed sessions are never reused: a client that
//! presents a closed session's id must handshake again.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::RegistryError;
use crate::mcp::transport::SessionTransport;

/// An opaque session identifier, minted by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Generates a fresh random identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parses an identifier presented by a client.
    ///
    /// Returns `None` for anything this server could not have issued.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        Uuid::parse_str(value.trim()).ok().map(Self)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.as_hyphenated())
    }
}

/// Lifecycle state of a session.
///
/// ```text
/// Uninitialized ──▶ Initializing ──▶ Active ──▶ Closed
///        │                │                       ▲
///        └────────────────┴───────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No message processed yet.
    Uninitialized,
    /// `initialize` accepted, registration in progress.
    Initializing,
    /// Handshake complete; tool calls are accepted.
    Active,
    /// Terminal. No further messages are accepted.
    Closed,
}

impl SessionState {
    /// Returns `true` if moving from `self` to `next` is a legal transition.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Uninitialized, Self::Initializing)
                | (Self::Initializing, Self::Active)
                | (Self::Uninitialized | Self::Initializing | Self::Active, Self::Closed)
        )
    }

    /// Returns the state name used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Initializing => "initializing",
            Self::Active => "active",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An illegal state transition was attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IllegalTransition {
    /// State the session was in.
    pub from: SessionState,
    /// State that was requested.
    pub to: SessionState,
}

/// Snapshot of one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    id: SessionId,
    state: SessionState,
    created_at: DateTime<Utc>,
    protocol_version: Option<String>,
}

impl Session {
    /// Creates an uninitialised session with a fresh id.
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: SessionId::generate(),
            state: SessionState::Uninitialized,
            created_at: Utc::now(),
            protocol_version: None,
        }
    }

    /// Returns the session id.
    #[must_use]
    pub const fn id(&self) -> SessionId {
        self.id
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Returns when the session was created.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns the protocol version agreed during the handshake.
    #[must_use]
    pub fn protocol_version(&self) -> Option<&str> {
        self.protocol_version.as_deref()
    }

    pub(crate) fn set_protocol_version(&mut self, version: String) {
        self.protocol_version = Some(version);
    }

    /// Moves to `next`.
    ///
    /// # Errors
    ///
    /// Returns [`IllegalTransition`] and leaves the state unchanged if the
    /// transition is not allowed.
    pub fn transition(&mut self, next: SessionState) -> Result<(), IllegalTransition> {
        if !self.state.can_transition_to(next) {
            return Err(IllegalTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// Lifecycle callbacks a transport raises.
///
/// The gateway wires transports to the [`SessionRegistry`]; tests can
/// substitute their own observer.
pub trait SessionObserver: Send + Sync {
    /// The transport completed its handshake and must become reachable.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicateSession`] if the id is taken.
    fn on_initialized(&self, transport: Arc<SessionTransport>) -> Result<(), RegistryError>;

    /// The transport closed and must no longer be reachable.
    fn on_closed(&self, id: &SessionId);
}

/// Live sessions keyed by id.
///
/// Many readers (every request looks its session up), few writers
/// (handshake and close).
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, Arc<SessionTransport>>>,
}

impl fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("sessions", &self.len())
            .finish()
    }
}

impl SessionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the transport serving `id`.
    #[must_use]
    pub fn lookup(&self, id: &SessionId) -> Option<Arc<SessionTransport>> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// Records a transport under `id`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicateSession`] if `id` is already present.
    pub fn register(
        &self,
        id: SessionId,
        transport: Arc<SessionTransport>,
    ) -> Result<(), RegistryError> {
        let mut sessions = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if sessions.contains_key(&id) {
            return Err(RegistryError::DuplicateSession(id.to_string()));
        }
        sessions.insert(id, transport);
        Ok(())
    }

    /// Forgets `id`, returning its transport if it was present.
    pub fn remove(&self, id: &SessionId) -> Option<Arc<SessionTransport>> {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
    }

    /// Returns the number of live sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns `true` if there are no live sessions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Closes every live session. Used on shutdown.
    pub fn close_all(&self) {
        let transports: Vec<_> = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, transport)| transport)
            .collect();

        for transport in transports {
            transport.close("server shutting down");
        }
    }
}

impl SessionObserver for SessionRegistry {
    fn on_initialized(&self, transport: Arc<SessionTransport>) -> Result<(), RegistryError> {
        let id = transport.id();
        self.register(id, transport)?;
        tracing::info!(session = %id, live = self.len(), "Session registered");
        Ok(())
    }

    fn on_closed(&self, id: &SessionId) {
        if self.remove(id).is_some() {
            tracing::debug!(session = %id, live = self.len(), "Session removed");
        }
    }
}
