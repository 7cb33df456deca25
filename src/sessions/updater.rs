//! Read-modify-write updates of session state.
//!
//! Every update reads a snapshot, edits a copy, and writes it back. How the
//! write is protected depends on [`UpdateMode`]:
//!
//! - `Legacy` replays the original get → copy → create sequence. Two writers
//!   that interleave on one session lose the first write; this is kept for
//!   compatibility and the overwrite is reported as
//!   [`TelemetryEvent::LostUpdate`] without changing the call's outcome.
//! - `Locked` runs the edit inside [`SessionStore::mutate`].
//! - `Optimistic` writes with [`SessionStore::replace_if_version`] and retries
//!   on conflict.
//!
//! The plain `record_*`/`merge_state` methods never return errors: failures go
//! to the telemetry sink so a missed history entry cannot abort the user's
//! interaction. The `try_*` variants return the error instead.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use super::history::{append_to_state, InteractionEntry};
use super::state::SessionState;
use super::traits::{Session, SessionError, SessionIdentity, SessionStore};
use crate::observability::{TelemetryEvent, TelemetrySink};

/// Write protection used by [`StateUpdater`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum UpdateMode {
    /// Unprotected get/create; concurrent writers can overwrite each other.
    Legacy,
    /// Per-session lock held for the whole edit.
    #[default]
    Locked,
    /// Version-checked write, retried on conflict.
    Optimistic,
}

impl UpdateMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Legacy => "legacy",
            Self::Locked => "locked",
            Self::Optimistic => "optimistic",
        }
    }
}

impl fmt::Display for UpdateMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UpdateMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "legacy" => Ok(Self::Legacy),
            "locked" => Ok(Self::Locked),
            "optimistic" => Ok(Self::Optimistic),
            other => Err(format!(
                "unknown update mode '{other}'; expected legacy, locked, or optimistic"
            )),
        }
    }
}

/// Result of a best-effort update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The write landed; the session is now at `version`.
    Applied { version: u64 },
    /// Nothing to write (e.g. an empty agent response).
    Skipped,
    /// The write failed and was reported to telemetry.
    Failed,
}

type Edit<'a> = dyn Fn(&mut SessionState) -> Result<(), SessionError> + Send + Sync + 'a;

/// Applies history appends and state patches to sessions in a store.
pub struct StateUpdater {
    store: Arc<dyn SessionStore>,
    telemetry: Arc<dyn TelemetrySink>,
    mode: UpdateMode,
    max_retries: u32,
}

impl StateUpdater {
    pub fn new(
        store: Arc<dyn SessionStore>,
        telemetry: Arc<dyn TelemetrySink>,
        mode: UpdateMode,
    ) -> Self {
        Self {
            store,
            telemetry,
            mode,
            max_retries: 8,
        }
    }

    /// Attempts allowed in optimistic mode before giving up. Zero is treated as one.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    pub fn mode(&self) -> UpdateMode {
        self.mode
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    pub async fn record_user_query(&self, identity: &SessionIdentity, query: &str) -> UpdateOutcome {
        let result = self.try_record_user_query(identity, query).await.map(Some);
        self.settle(identity, "record_user_query", result)
    }

    pub async fn record_agent_response(
        &self,
        identity: &SessionIdentity,
        agent_name: &str,
        response_text: &str,
    ) -> UpdateOutcome {
        let result = self
            .try_record_agent_response(identity, agent_name, response_text)
            .await;
        self.settle(identity, "record_agent_response", result)
    }

    pub async fn merge_state(&self, identity: &SessionIdentity, patch: SessionState) -> UpdateOutcome {
        let result = self.try_merge_state(identity, patch).await.map(Some);
        self.settle(identity, "merge_state", result)
    }

    pub async fn try_record_user_query(
        &self,
        identity: &SessionIdentity,
        query: &str,
    ) -> Result<Session, SessionError> {
        let edit = |state: &mut SessionState| {
            append_to_state(state, InteractionEntry::user_query(query))
        };
        self.apply(identity, "record_user_query", &edit).await
    }

    /// Returns `Ok(None)` without writing when `response_text` is empty.
    pub async fn try_record_agent_response(
        &self,
        identity: &SessionIdentity,
        agent_name: &str,
        response_text: &str,
    ) -> Result<Option<Session>, SessionError> {
        if response_text.is_empty() {
            tracing::debug!(session = %identity, agent = agent_name, "empty agent response, nothing recorded");
            return Ok(None);
        }
        let edit = |state: &mut SessionState| {
            append_to_state(
                state,
                InteractionEntry::agent_response(agent_name, response_text),
            )
        };
        self.apply(identity, "record_agent_response", &edit)
            .await
            .map(Some)
    }

    /// Shallow merge: keys in `patch` overwrite existing keys.
    pub async fn try_merge_state(
        &self,
        identity: &SessionIdentity,
        patch: SessionState,
    ) -> Result<Session, SessionError> {
        let edit = |state: &mut SessionState| {
            state.extend(patch.iter().map(|(k, v)| (k.clone(), v.clone())));
            Ok(())
        };
        self.apply(identity, "merge_state", &edit).await
    }

    async fn apply(
        &self,
        identity: &SessionIdentity,
        operation: &str,
        edit: &Edit<'_>,
    ) -> Result<Session, SessionError> {
        match self.mode {
            UpdateMode::Legacy => self.apply_legacy(identity, operation, edit).await,
            UpdateMode::Locked => self.store.mutate(identity, Box::new(|state| edit(state))).await,
            UpdateMode::Optimistic => self.apply_optimistic(identity, operation, edit).await,
        }
    }

    async fn apply_legacy(
        &self,
        identity: &SessionIdentity,
        operation: &str,
        edit: &Edit<'_>,
    ) -> Result<Session, SessionError> {
        let session = self.store.get(identity).await?;
        let read_version = session.version;

        let mut state = session.state;
        edit(&mut state)?;
        let written = self.store.create(identity, state).await?;

        if written.version != read_version + 1 {
            self.telemetry.report(TelemetryEvent::LostUpdate {
                identity: identity.clone(),
                operation: operation.to_string(),
                read_version,
                written_version: written.version,
            });
        }
        Ok(written)
    }

    async fn apply_optimistic(
        &self,
        identity: &SessionIdentity,
        operation: &str,
        edit: &Edit<'_>,
    ) -> Result<Session, SessionError> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            let session = self.store.get(identity).await?;
            let mut state = session.state;
            edit(&mut state)?;

            match self
                .store
                .replace_if_version(identity, session.version, state)
                .await
            {
                Err(SessionError::VersionConflict { actual, .. }) => {
                    if attempts >= self.max_retries {
                        return Err(SessionError::RetriesExhausted {
                            identity: identity.clone(),
                            attempts,
                        });
                    }
                    tracing::debug!(
                        session = %identity,
                        operation,
                        attempts,
                        actual,
                        "version conflict, retrying"
                    );
                    tokio::task::yield_now().await;
                }
                other => return other,
            }
        }
    }

    fn settle(
        &self,
        identity: &SessionIdentity,
        operation: &str,
        result: Result<Option<Session>, SessionError>,
    ) -> UpdateOutcome {
        match result {
            Ok(Some(session)) => UpdateOutcome::Applied {
                version: session.version,
            },
            Ok(None) => UpdateOutcome::Skipped,
            Err(e) => {
                self.telemetry.report(TelemetryEvent::UpdateFailed {
                    identity: identity.clone(),
                    operation: operation.to_string(),
                    error: e.to_string(),
                });
                UpdateOutcome::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::MemorySink;
    use crate::sessions::history::read_history;
    use crate::sessions::state::StateValue;
    use crate::sessions::InMemorySessionStore;

    fn identity() -> SessionIdentity {
        SessionIdentity::new("Bot", "u1", "s1")
    }

    async fn setup(mode: UpdateMode) -> (StateUpdater, Arc<InMemorySessionStore>, Arc<MemorySink>) {
        let store = Arc::new(InMemorySessionStore::new());
        let sink = Arc::new(MemorySink::new());
        let mut initial = SessionState::new();
        initial.insert("user_name".into(), StateValue::from("Alice"));
        store.create(&identity(), initial).await.unwrap();
        let updater = StateUpdater::new(store.clone(), sink.clone(), mode);
        (updater, store, sink)
    }

    #[test]
    fn update_mode_parses_case_insensitively() {
        assert_eq!("LEGACY".parse::<UpdateMode>().unwrap(), UpdateMode::Legacy);
        assert_eq!(" optimistic ".parse::<UpdateMode>().unwrap(), UpdateMode::Optimistic);
        assert!("eventual".parse::<UpdateMode>().is_err());
        assert_eq!(UpdateMode::default(), UpdateMode::Locked);
    }

    #[tokio::test]
    async fn records_entries_in_call_order_in_every_mode() {
        for mode in [UpdateMode::Legacy, UpdateMode::Locked, UpdateMode::Optimistic] {
            let (updater, store, sink) = setup(mode).await;

            updater.record_user_query(&identity(), "q1").await;
            updater.record_agent_response(&identity(), "qa_agent", "r1").await;
            updater.record_user_query(&identity(), "q2").await;

            let history = read_history(&store.get(&identity()).await.unwrap().state).unwrap();
            let rendered: Vec<String> = history
                .iter()
                .map(|e| match e {
                    InteractionEntry::UserQuery { query, .. } => query.clone(),
                    InteractionEntry::AgentResponse { response, .. } => response.clone(),
                })
                .collect();
            assert_eq!(rendered, ["q1", "r1", "q2"], "mode {mode}");
            assert!(sink.is_empty(), "mode {mode} reported {:?}", sink.events());
        }
    }

    #[tokio::test]
    async fn empty_agent_response_is_skipped() {
        let (updater, store, _sink) = setup(UpdateMode::Locked).await;

        assert_eq!(
            updater.record_agent_response(&identity(), "agentX", "").await,
            UpdateOutcome::Skipped
        );

        let session = store.get(&identity()).await.unwrap();
        assert!(read_history(&session.state).unwrap().is_empty());
        assert_eq!(session.version, 1);
    }

    #[tokio::test]
    async fn whitespace_agent_response_is_recorded_verbatim() {
        let (updater, store, _sink) = setup(UpdateMode::Locked).await;

        let outcome = updater.record_agent_response(&identity(), "agentX", "   ").await;
        assert_eq!(outcome, UpdateOutcome::Applied { version: 2 });

        let history = read_history(&store.get(&identity()).await.unwrap().state).unwrap();
        assert!(matches!(
            history.as_slice(),
            [InteractionEntry::AgentResponse { agent, response, .. }]
                if agent == "agentX" && response == "   "
        ));
    }

    #[tokio::test]
    async fn missing_session_is_reported_not_raised() {
        let (updater, _store, sink) = setup(UpdateMode::Legacy).await;
        let ghost = SessionIdentity::new("Bot", "u1", "ghost");

        let outcome = updater.record_user_query(&ghost, "hello?").await;

        assert_eq!(outcome, UpdateOutcome::Failed);
        let events = sink.events();
        assert_eq!(events.len(), 1);
        match &events[0] {
            TelemetryEvent::UpdateFailed {
                identity,
                operation,
                error,
            } => {
                assert_eq!(identity, &ghost);
                assert_eq!(operation, "record_user_query");
                assert!(error.contains("not found"));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn try_variant_surfaces_not_found() {
        let (updater, _store, sink) = setup(UpdateMode::Optimistic).await;
        let ghost = SessionIdentity::new("Bot", "u1", "ghost");

        let err = updater.try_record_user_query(&ghost, "hi").await.unwrap_err();
        assert!(matches!(err, SessionError::NotFound(_)));
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn merge_state_overwrites_and_keeps_other_keys() {
        let (updater, store, _sink) = setup(UpdateMode::Locked).await;
        updater.record_user_query(&identity(), "hi").await;

        let mut patch = SessionState::new();
        patch.insert("user_name".into(), StateValue::from("Alicia"));
        patch.insert(
            "purchased_courses".into(),
            StateValue::List(vec![StateValue::from("ai_marketing_platform")]),
        );
        let outcome = updater.merge_state(&identity(), patch).await;
        assert!(matches!(outcome, UpdateOutcome::Applied { .. }));

        let state = store.get(&identity()).await.unwrap().state;
        assert_eq!(state["user_name"], StateValue::from("Alicia"));
        assert_eq!(read_history(&state).unwrap().len(), 1);
        assert!(state.contains_key("purchased_courses"));
    }

    #[tokio::test]
    async fn malformed_history_fails_without_writing() {
        let (updater, store, sink) = setup(UpdateMode::Locked).await;
        let mut patch = SessionState::new();
        patch.insert(
            crate::sessions::history::HISTORY_KEY.into(),
            StateValue::from("not a list"),
        );
        updater.merge_state(&identity(), patch).await;
        let version = store.get(&identity()).await.unwrap().version;

        assert_eq!(
            updater.record_user_query(&identity(), "hi").await,
            UpdateOutcome::Failed
        );
        assert_eq!(store.get(&identity()).await.unwrap().version, version);
        assert_eq!(sink.len(), 1);
    }

    #[tokio::test]
    async fn optimistic_mode_gives_up_after_max_retries() {
        // A store whose version check always fails.
        struct AlwaysConflicting(InMemorySessionStore);

        #[async_trait::async_trait]
        impl SessionStore for AlwaysConflicting {
            async fn create(
                &self,
                identity: &SessionIdentity,
                state: SessionState,
            ) -> Result<Session, SessionError> {
                self.0.create(identity, state).await
            }
            async fn get(&self, identity: &SessionIdentity) -> Result<Session, SessionError> {
                self.0.get(identity).await
            }
            async fn list(
                &self,
                filter: &crate::sessions::SessionFilter,
            ) -> Result<Vec<Session>, SessionError> {
                self.0.list(filter).await
            }
            async fn delete(&self, identity: &SessionIdentity) -> Result<bool, SessionError> {
                self.0.delete(identity).await
            }
            async fn mutate(
                &self,
                identity: &SessionIdentity,
                mutation: crate::sessions::StateMutation<'_>,
            ) -> Result<Session, SessionError> {
                self.0.mutate(identity, mutation).await
            }
            async fn replace_if_version(
                &self,
                identity: &SessionIdentity,
                expected_version: u64,
                _state: SessionState,
            ) -> Result<Session, SessionError> {
                Err(SessionError::VersionConflict {
                    identity: identity.clone(),
                    expected: expected_version,
                    actual: expected_version + 1,
                })
            }
            fn name(&self) -> &str {
                "always_conflicting"
            }
        }

        let store = Arc::new(AlwaysConflicting(InMemorySessionStore::new()));
        store.create(&identity(), SessionState::new()).await.unwrap();
        let sink = Arc::new(MemorySink::new());
        let updater =
            StateUpdater::new(store, sink, UpdateMode::Optimistic).with_max_retries(3);

        match updater.try_record_user_query(&identity(), "hi").await {
            Err(SessionError::RetriesExhausted { attempts, .. }) => assert_eq!(attempts, 3),
            other => panic!("expected retries exhausted, got {other:?}"),
        }
    }
}
