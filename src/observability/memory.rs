use parking_lot::Mutex;

use super::traits::{TelemetryEvent, TelemetrySink};

/// In-memory sink backed by a `parking_lot::Mutex<Vec<TelemetryEvent>>`.
///
/// Not selectable from config; embedders and tests read events back with [`MemorySink::events`].
pub struct MemorySink {
    events: Mutex<Vec<TelemetryEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn events(&self) -> Vec<TelemetryEvent> {
        self.events.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl TelemetrySink for MemorySink {
    fn report(&self, event: TelemetryEvent) {
        self.events.lock().push(event);
    }

    fn name(&self) -> &str {
        "memory"
    }
}
