//! Agent invocation interface consumed by the round-trip loop.

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::sessions::SessionIdentity;

/// One piece of event content. Only text is interpreted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentPart {
    pub text: Option<String>,
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
        }
    }
}

/// An event emitted while the agent works on a query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentEvent {
    /// Name of the agent (or sub-agent) that produced the event.
    pub author: Option<String>,
    pub parts: Vec<ContentPart>,
    /// Set on the event that carries the agent's answer.
    pub is_final: bool,
}

impl AgentEvent {
    pub fn chunk(author: &str, text: impl Into<String>) -> Self {
        Self {
            author: Some(author.to_string()),
            parts: vec![ContentPart::text(text)],
            is_final: false,
        }
    }

    pub fn final_response(author: &str, text: impl Into<String>) -> Self {
        Self {
            author: Some(author.to_string()),
            parts: vec![ContentPart::text(text)],
            is_final: true,
        }
    }

    /// Trimmed text of the first part of a final event, if any.
    pub fn final_text(&self) -> Option<String> {
        if !self.is_final {
            return None;
        }
        self.parts
            .first()
            .and_then(|part| part.text.as_deref())
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .map(ToString::to_string)
    }
}

pub type AgentEventStream = BoxStream<'static, Result<AgentEvent>>;

/// An external agent runtime.
///
/// Implementations may read the session through the store they were built
/// with; writes to history go through the round-trip loop.
#[async_trait]
pub trait AgentInvoker: Send + Sync {
    /// Start answering `query` for the session and stream the resulting events.
    async fn invoke(&self, identity: &SessionIdentity, query: &str) -> Result<AgentEventStream>;

    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn final_text_only_from_final_events() {
        assert_eq!(AgentEvent::chunk("a", "partial").final_text(), None);
        assert_eq!(
            AgentEvent::final_response("a", "  done \n").final_text().as_deref(),
            Some("done")
        );
    }

    #[test]
    fn final_text_ignores_blank_and_missing_parts() {
        assert_eq!(AgentEvent::final_response("a", "   ").final_text(), None);
        let no_parts = AgentEvent {
            author: Some("a".into()),
            parts: Vec::new(),
            is_final: true,
        };
        assert_eq!(no_parts.final_text(), None);
        let no_text = AgentEvent {
            author: None,
            parts: vec![ContentPart { text: None }],
            is_final: true,
        };
        assert_eq!(no_text.final_text(), None);
    }
}
