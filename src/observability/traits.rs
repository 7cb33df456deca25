use serde::{Deserialize, Serialize};

use crate::sessions::SessionIdentity;

/// A session-state failure that was recovered locally instead of propagated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TelemetryEvent {
    /// A history append or state merge did not land.
    UpdateFailed {
        identity: SessionIdentity,
        operation: String,
        error: String,
    },
    /// A legacy read-modify-write overwrote another writer's change.
    LostUpdate {
        identity: SessionIdentity,
        operation: String,
        read_version: u64,
        written_version: u64,
    },
    /// A snapshot could not be fetched or formatted for display.
    RenderFailed {
        identity: SessionIdentity,
        label: String,
        error: String,
    },
    /// The external agent failed to start or its stream errored.
    AgentFailed {
        identity: SessionIdentity,
        error: String,
    },
}

impl TelemetryEvent {
    pub fn identity(&self) -> &SessionIdentity {
        match self {
            Self::UpdateFailed { identity, .. }
            | Self::LostUpdate { identity, .. }
            | Self::RenderFailed { identity, .. }
            | Self::AgentFailed { identity, .. } => identity,
        }
    }
}

/// Operator-facing channel for failures the interaction loop swallows.
pub trait TelemetrySink: Send + Sync {
    fn report(&self, event: TelemetryEvent);
    fn name(&self) -> &str;
}
