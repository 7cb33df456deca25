//! Telemetry channel for session-state failures that must not interrupt a round trip.

pub mod log;
pub mod memory;
pub mod traits;

pub use log::{LogSink, NoopSink};
pub use memory::MemorySink;
pub use traits::{TelemetryEvent, TelemetrySink};

use crate::config::ObservabilityConfig;
use std::sync::Arc;

/// Factory: create the telemetry sink named by config.
pub fn create_telemetry_sink(config: &ObservabilityConfig) -> anyhow::Result<Arc<dyn TelemetrySink>> {
    match config.backend.trim().to_ascii_lowercase().as_str() {
        "log" => Ok(Arc::new(LogSink)),
        "none" => Ok(Arc::new(NoopSink)),
        "" => anyhow::bail!("observability.backend cannot be empty. Supported values: log, none"),
        other => anyhow::bail!(
            "Unknown observability backend '{other}'. Supported values: log, none"
        ),
    }
}
