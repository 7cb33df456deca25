//! Session storage traits and types for agent conversation state.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::state::SessionState;

/// Composite key identifying a unique session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionIdentity {
    pub app_name: String,
    pub user_id: String,
    pub session_id: String,
}

impl SessionIdentity {
    pub fn new(
        app_name: impl Into<String>,
        user_id: impl Into<String>,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            app_name: app_name.into(),
            user_id: user_id.into(),
            session_id: session_id.into(),
        }
    }
}

impl fmt::Display for SessionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.app_name, self.user_id, self.session_id)
    }
}

/// A tracked conversation session.
///
/// Values handed out by a [`SessionStore`] are snapshots; mutating one has no
/// effect on the stored session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub identity: SessionIdentity,
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Starts at 1 and grows by one on every successful write.
    pub version: u64,
}

/// Filter criteria for listing sessions.
#[derive(Debug, Clone, Default)]
pub struct SessionFilter {
    pub app_name: Option<String>,
    pub user_id: Option<String>,
    pub limit: Option<usize>,
}

impl SessionFilter {
    pub fn matches(&self, identity: &SessionIdentity) -> bool {
        if let Some(ref app_name) = self.app_name {
            if identity.app_name != *app_name {
                return false;
            }
        }
        if let Some(ref user_id) = self.user_id {
            if identity.user_id != *user_id {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session not found: {0}")]
    NotFound(SessionIdentity),
    #[error("session {identity} changed underneath the update (expected version {expected}, found {actual})")]
    VersionConflict {
        identity: SessionIdentity,
        expected: u64,
        actual: u64,
    },
    #[error("gave up updating session {identity} after {attempts} conflicting attempts")]
    RetriesExhausted {
        identity: SessionIdentity,
        attempts: u32,
    },
    #[error("invalid interaction history: {0}")]
    InvalidHistory(String),
    #[error("invalid state value: {0}")]
    InvalidValue(String),
    #[error("render failed: {0}")]
    Render(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A state transformation applied atomically by [`SessionStore::mutate`].
///
/// The closure edits a copy of the current state; returning an error discards
/// the copy and leaves the stored session untouched.
pub type StateMutation<'a> =
    Box<dyn FnOnce(&mut SessionState) -> Result<(), SessionError> + Send + 'a>;

/// Storage for agent conversation sessions.
///
/// `create` replaces any existing session outright. Callers that need to
/// change part of a session without losing concurrent writes use `mutate`
/// (per-session lock) or `replace_if_version` (optimistic check).
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Insert a session, or replace the existing one, with exactly `state`.
    async fn create(
        &self,
        identity: &SessionIdentity,
        state: SessionState,
    ) -> Result<Session, SessionError>;

    /// Snapshot of the current session, or [`SessionError::NotFound`].
    async fn get(&self, identity: &SessionIdentity) -> Result<Session, SessionError>;

    /// Sessions matching `filter`, most recently updated first.
    async fn list(&self, filter: &SessionFilter) -> Result<Vec<Session>, SessionError>;

    /// Remove a session. Returns whether one existed.
    async fn delete(&self, identity: &SessionIdentity) -> Result<bool, SessionError>;

    /// Apply `mutation` to the session while holding its lock.
    async fn mutate(
        &self,
        identity: &SessionIdentity,
        mutation: StateMutation<'_>,
    ) -> Result<Session, SessionError>;

    /// Replace the session state only if its version is still `expected_version`.
    async fn replace_if_version(
        &self,
        identity: &SessionIdentity,
        expected_version: u64,
        state: SessionState,
    ) -> Result<Session, SessionError>;

    /// The name of this session store implementation.
    fn name(&self) -> &str;
}
