use super::traits::{TelemetryEvent, TelemetrySink};

/// Sink that forwards every event to `tracing`.
#[derive(Debug, Clone, Default)]
pub struct LogSink;

impl TelemetrySink for LogSink {
    fn report(&self, event: TelemetryEvent) {
        match event {
            TelemetryEvent::UpdateFailed {
                identity,
                operation,
                error,
            } => {
                tracing::warn!(
                    session = %identity,
                    operation = %operation,
                    error = %error,
                    "session update failed"
                );
            }
            TelemetryEvent::LostUpdate {
                identity,
                operation,
                read_version,
                written_version,
            } => {
                tracing::warn!(
                    session = %identity,
                    operation = %operation,
                    read_version,
                    written_version,
                    "concurrent write overwritten by session update"
                );
            }
            TelemetryEvent::RenderFailed {
                identity,
                label,
                error,
            } => {
                tracing::warn!(
                    session = %identity,
                    label = %label,
                    error = %error,
                    "session render failed"
                );
            }
            TelemetryEvent::AgentFailed { identity, error } => {
                tracing::error!(session = %identity, error = %error, "agent run failed");
            }
        }
    }

    fn name(&self) -> &str {
        "log"
    }
}

/// Sink that drops every event.
#[derive(Debug, Clone, Default)]
pub struct NoopSink;

impl TelemetrySink for NoopSink {
    fn report(&self, _event: TelemetryEvent) {}

    fn name(&self) -> &str {
        "none"
    }
}
