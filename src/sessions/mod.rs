//! Session management: agent conversation state and interaction history.

pub mod history;
pub mod in_memory;
pub mod state;
pub mod traits;
pub mod updater;
pub mod view;

pub use history::{append_entry, read_history, InteractionEntry, HISTORY_KEY};
pub use in_memory::InMemorySessionStore;
pub use state::{state_from_json, SessionState, StateValue};
pub use traits::{
    Session, SessionError, SessionFilter, SessionIdentity, SessionStore, StateMutation,
};
pub use updater::{StateUpdater, UpdateMode, UpdateOutcome};
pub use view::{render, truncate_response, SessionView, MAX_RESPONSE_CHARS};

use std::sync::Arc;

/// Create an empty in-memory session store.
pub fn create_session_store() -> Arc<dyn SessionStore> {
    Arc::new(InMemorySessionStore::new())
}
