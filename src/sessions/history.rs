//! Interaction history embedded in session state.
//!
//! The history is an ordered list stored under [`HISTORY_KEY`]. Insertion
//! order is authoritative; timestamps are informational and may repeat or run
//! backwards without affecting order.

use chrono::Local;
use serde::{Deserialize, Serialize};

use super::state::{SessionState, StateValue};
use super::traits::SessionError;

/// State key holding the interaction history.
pub const HISTORY_KEY: &str = "interaction_history";

/// Wall-clock format used for entry timestamps.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One logged event in a session's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum InteractionEntry {
    UserQuery {
        query: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
    },
    AgentResponse {
        agent: String,
        response: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
    },
}

impl InteractionEntry {
    pub fn user_query(query: impl Into<String>) -> Self {
        Self::UserQuery {
            query: query.into(),
            timestamp: None,
        }
    }

    pub fn agent_response(agent: impl Into<String>, response: impl Into<String>) -> Self {
        Self::AgentResponse {
            agent: agent.into(),
            response: response.into(),
            timestamp: None,
        }
    }

    pub fn timestamp(&self) -> Option<&str> {
        match self {
            Self::UserQuery { timestamp, .. } | Self::AgentResponse { timestamp, .. } => {
                timestamp.as_deref()
            }
        }
    }

    /// Set the timestamp if none was supplied.
    fn stamp(&mut self, now: impl FnOnce() -> String) {
        let slot = match self {
            Self::UserQuery { timestamp, .. } | Self::AgentResponse { timestamp, .. } => timestamp,
        };
        if slot.is_none() {
            *slot = Some(now());
        }
    }

    fn to_state_value(&self) -> Result<StateValue, SessionError> {
        StateValue::try_from(serde_json::to_value(self)?)
    }

    fn from_state_value(value: &StateValue) -> Result<Self, SessionError> {
        let json = serde_json::Value::from(value.clone());
        serde_json::from_value(json)
            .map_err(|e| SessionError::InvalidHistory(format!("unrecognized entry {value}: {e}")))
    }
}

/// Current local time in [`TIMESTAMP_FORMAT`].
pub fn now_timestamp() -> String {
    Local::now().format(TIMESTAMP_FORMAT).to_string()
}

/// Return a new history with `entry` appended, stamping it with the current
/// time when it carries no timestamp. `existing` is left untouched.
pub fn append_entry(existing: &[InteractionEntry], mut entry: InteractionEntry) -> Vec<InteractionEntry> {
    entry.stamp(now_timestamp);
    let mut history = Vec::with_capacity(existing.len() + 1);
    history.extend_from_slice(existing);
    history.push(entry);
    history
}

/// Decode the history stored in `state`. A missing key is an empty history.
pub fn read_history(state: &SessionState) -> Result<Vec<InteractionEntry>, SessionError> {
    let Some(value) = state.get(HISTORY_KEY) else {
        return Ok(Vec::new());
    };
    let items = value.as_list().ok_or_else(|| {
        SessionError::InvalidHistory(format!("{HISTORY_KEY} must be a list, got {value}"))
    })?;
    items.iter().map(InteractionEntry::from_state_value).collect()
}

/// Store `history` under [`HISTORY_KEY`], replacing whatever was there.
pub fn write_history(
    state: &mut SessionState,
    history: &[InteractionEntry],
) -> Result<(), SessionError> {
    let items = history
        .iter()
        .map(InteractionEntry::to_state_value)
        .collect::<Result<Vec<_>, _>>()?;
    state.insert(HISTORY_KEY.to_string(), StateValue::List(items));
    Ok(())
}

/// Append `entry` to the history held in `state`.
pub fn append_to_state(state: &mut SessionState, entry: InteractionEntry) -> Result<(), SessionError> {
    let history = read_history(state)?;
    write_history(state, &append_entry(&history, entry))
}
