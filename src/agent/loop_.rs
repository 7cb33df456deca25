//! One user query → agent → response cycle against a session.

use futures::StreamExt;
use std::sync::Arc;

use super::traits::{AgentEvent, AgentInvoker};
use crate::observability::{TelemetryEvent, TelemetrySink};
use crate::sessions::{SessionIdentity, SessionView, StateUpdater, UpdateOutcome};

pub const LABEL_BEFORE: &str = "State BEFORE processing";
pub const LABEL_AFTER: &str = "State AFTER processing";

/// Everything observable about a finished round trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundTrip {
    pub final_response: Option<String>,
    /// Last author seen on the event stream.
    pub agent_name: Option<String>,
    pub query_outcome: UpdateOutcome,
    pub response_outcome: UpdateOutcome,
    pub before: Option<String>,
    pub after: Option<String>,
}

/// Drives round trips for an agent, recording history as it goes.
pub struct Runner {
    agent: Arc<dyn AgentInvoker>,
    updater: StateUpdater,
    view: SessionView,
    telemetry: Arc<dyn TelemetrySink>,
}

impl Runner {
    pub fn new(
        agent: Arc<dyn AgentInvoker>,
        updater: StateUpdater,
        view: SessionView,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        Self {
            agent,
            updater,
            view,
            telemetry,
        }
    }

    pub fn updater(&self) -> &StateUpdater {
        &self.updater
    }

    /// Render, record the query, drain the agent, record its answer, render again.
    ///
    /// Session-state failures are reported to telemetry and never stop the
    /// cycle; an agent failure ends the stream early but the after-state is
    /// still rendered.
    pub async fn run_round_trip(&self, identity: &SessionIdentity, query: &str) -> RoundTrip {
        tracing::info!(session = %identity, agent = self.agent.name(), "running query");

        let before = self.view.render_session(identity, LABEL_BEFORE).await;
        let query_outcome = self.updater.record_user_query(identity, query).await;

        let mut agent_name = None;
        let mut final_response = None;
        match self.agent.invoke(identity, query).await {
            Ok(mut events) => {
                while let Some(event) = events.next().await {
                    match event {
                        Ok(event) => {
                            observe_event(&event, &mut agent_name, &mut final_response);
                        }
                        Err(e) => {
                            self.report_agent_failure(identity, &e);
                            break;
                        }
                    }
                }
            }
            Err(e) => self.report_agent_failure(identity, &e),
        }

        let response_outcome = match (&agent_name, &final_response) {
            (Some(agent), Some(text)) => {
                self.updater
                    .record_agent_response(identity, agent, text)
                    .await
            }
            _ => {
                tracing::info!(session = %identity, "agent finished without a text response");
                UpdateOutcome::Skipped
            }
        };

        let after = self.view.render_session(identity, LABEL_AFTER).await;

        RoundTrip {
            final_response,
            agent_name,
            query_outcome,
            response_outcome,
            before,
            after,
        }
    }

    fn report_agent_failure(&self, identity: &SessionIdentity, error: &anyhow::Error) {
        self.telemetry.report(TelemetryEvent::AgentFailed {
            identity: identity.clone(),
            error: format!("{error:#}"),
        });
    }
}

fn observe_event(
    event: &AgentEvent,
    agent_name: &mut Option<String>,
    final_response: &mut Option<String>,
) {
    if let Some(author) = event.author.as_deref().filter(|a| !a.is_empty()) {
        *agent_name = Some(author.to_string());
    }
    if let Some(text) = event.final_text() {
        *final_response = Some(text);
    } else {
        for part in &event.parts {
            if let Some(text) = part.text.as_deref().filter(|t| !t.trim().is_empty()) {
                tracing::debug!(chunk = text.trim(), "agent text chunk");
            }
        }
    }
}
