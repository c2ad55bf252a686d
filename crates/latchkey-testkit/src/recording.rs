//! Event sink that keeps every event for later assertions

use latchkey_core::{EventSink, TokenEvent};
use parking_lot::Mutex;

/// Records events in emission order
#[derive(Debug, Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<TokenEvent>>,
}

impl RecordingEventSink {
    /// Empty recorder
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything recorded so far
    pub fn events(&self) -> Vec<TokenEvent> {
        self.events.lock().clone()
    }

    /// Event names in order, e.g. `["token_started", "token_ended"]`
    pub fn names(&self) -> Vec<&'static str> {
        self.events.lock().iter().map(TokenEvent::name).collect()
    }

    /// Drain and return the recorded events
    pub fn take(&self) -> Vec<TokenEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    /// Forget everything recorded so far
    pub fn clear(&self) {
        self.events.lock().clear();
    }

    /// Whether nothing was recorded
    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

impl EventSink for RecordingEventSink {
    fn notify(&self, event: &TokenEvent) {
        self.events.lock().push(event.clone());
    }
}
