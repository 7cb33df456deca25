//! In-memory session store implementation.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;

use super::state::SessionState;
use super::traits::{
    Session, SessionError, SessionFilter, SessionIdentity, SessionStore, StateMutation,
};

type Slot = Arc<Mutex<Session>>;

/// An in-memory session store.
///
/// The outer map is only locked long enough to find or insert a slot; each
/// session then has its own mutex, so writers on different identities never
/// wait on each other. No lock is held across an `.await`.
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<SessionIdentity, Slot>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    fn slot(&self, identity: &SessionIdentity) -> Result<Slot, SessionError> {
        self.sessions
            .read()
            .get(identity)
            .cloned()
            .ok_or_else(|| SessionError::NotFound(identity.clone()))
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create(
        &self,
        identity: &SessionIdentity,
        state: SessionState,
    ) -> Result<Session, SessionError> {
        let now = Utc::now();
        let existing = self.sessions.read().get(identity).cloned();

        let slot = match existing {
            Some(slot) => slot,
            None => {
                let mut sessions = self.sessions.write();
                // Another writer may have inserted between the two locks.
                if let Some(slot) = sessions.get(identity) {
                    slot.clone()
                } else {
                    let session = Session {
                        identity: identity.clone(),
                        state,
                        created_at: now,
                        updated_at: now,
                        version: 1,
                    };
                    sessions.insert(identity.clone(), Arc::new(Mutex::new(session.clone())));
                    tracing::debug!(session = %identity, "session created");
                    return Ok(session);
                }
            }
        };

        let mut session = slot.lock();
        let version = session.version + 1;
        *session = Session {
            identity: identity.clone(),
            state,
            created_at: now,
            updated_at: now,
            version,
        };
        tracing::debug!(session = %identity, version = session.version, "session replaced");
        Ok(session.clone())
    }

    async fn get(&self, identity: &SessionIdentity) -> Result<Session, SessionError> {
        let slot = self.slot(identity)?;
        let session = slot.lock().clone();
        Ok(session)
    }

    async fn list(&self, filter: &SessionFilter) -> Result<Vec<Session>, SessionError> {
        let slots: Vec<Slot> = self
            .sessions
            .read()
            .iter()
            .filter(|(identity, _)| filter.matches(identity))
            .map(|(_, slot)| slot.clone())
            .collect();

        let mut results: Vec<Session> = slots.iter().map(|slot| slot.lock().clone()).collect();
        results.sort_by(|a, b| {
            b.updated_at
                .cmp(&a.updated_at)
                .then_with(|| a.identity.cmp(&b.identity))
        });

        if let Some(limit) = filter.limit {
            results.truncate(limit);
        }

        Ok(results)
    }

    async fn delete(&self, identity: &SessionIdentity) -> Result<bool, SessionError> {
        let removed = self.sessions.write().remove(identity).is_some();
        if removed {
            tracing::debug!(session = %identity, "session deleted");
        }
        Ok(removed)
    }

    async fn mutate(
        &self,
        identity: &SessionIdentity,
        mutation: StateMutation<'_>,
    ) -> Result<Session, SessionError> {
        let slot = self.slot(identity)?;
        let mut session = slot.lock();

        let mut state = session.state.clone();
        mutation(&mut state)?;

        session.state = state;
        session.updated_at = Utc::now();
        session.version += 1;
        Ok(session.clone())
    }

    async fn replace_if_version(
        &self,
        identity: &SessionIdentity,
        expected_version: u64,
        state: SessionState,
    ) -> Result<Session, SessionError> {
        let slot = self.slot(identity)?;
        let mut session = slot.lock();

        if session.version != expected_version {
            return Err(SessionError::VersionConflict {
                identity: identity.clone(),
                expected: expected_version,
                actual: session.version,
            });
        }

        session.state = state;
        session.updated_at = Utc::now();
        session.version += 1;
        Ok(session.clone())
    }

    fn name(&self) -> &str {
        "in_memory"
    }
}
