use anyhow::Result;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::sync::Arc;

use super::traits::{AgentEvent, AgentEventStream, AgentInvoker};
use crate::sessions::{SessionIdentity, SessionStore};

/// Deterministic in-process agent.
///
/// Greets the user by the `user_name` held in session state and echoes the
/// query back, streaming one intermediate chunk before the final answer.
pub struct EchoAgent {
    name: String,
    store: Arc<dyn SessionStore>,
}

impl EchoAgent {
    pub fn new(name: &str, store: Arc<dyn SessionStore>) -> Self {
        Self {
            name: name.to_string(),
            store,
        }
    }
}

#[async_trait]
impl AgentInvoker for EchoAgent {
    async fn invoke(&self, identity: &SessionIdentity, query: &str) -> Result<AgentEventStream> {
        let session = self.store.get(identity).await?;
        let user_name = session
            .state
            .get("user_name")
            .map_or_else(|| "there".to_string(), ToString::to_string);

        let events = vec![
            Ok(AgentEvent::chunk(&self.name, "Looking at your session...")),
            Ok(AgentEvent::final_response(
                &self.name,
                format!("Hello {user_name}! You asked: {}", query.trim()),
            )),
        ];
        Ok(stream::iter(events).boxed())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
