pub mod echo;
pub mod loop_;
pub mod traits;

pub use echo::EchoAgent;
pub use loop_::{RoundTrip, Runner, LABEL_AFTER, LABEL_BEFORE};
pub use traits::{AgentEvent, AgentEventStream, AgentInvoker, ContentPart};

use crate::config::Config;
use crate::observability::create_telemetry_sink;
use crate::sessions::{SessionStore, SessionView, StateUpdater};
use std::sync::Arc;

/// Wire a runner for `agent` over `store` using config-driven update mode and telemetry.
pub fn create_runner(
    config: &Config,
    store: Arc<dyn SessionStore>,
    agent: Arc<dyn AgentInvoker>,
) -> anyhow::Result<Runner> {
    let telemetry = create_telemetry_sink(&config.observability)?;
    let updater = StateUpdater::new(store.clone(), telemetry.clone(), config.sessions.update_mode)
        .with_max_retries(config.sessions.max_retries);
    let view = SessionView::new(store, telemetry.clone());
    Ok(Runner::new(agent, updater, view, telemetry))
}
