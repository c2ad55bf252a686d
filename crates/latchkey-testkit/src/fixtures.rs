//! Registry fixtures on a manual clock

use crate::recording::RecordingEventSink;
use chrono::{DateTime, TimeZone, Utc};
use latchkey_core::{ManualClock, RegistryConfig, TokenRegistry};
use std::sync::Arc;

/// Registry, the clock driving it and the sink recording its events
pub type TestRegistry = (TokenRegistry, ManualClock, Arc<RecordingEventSink>);

/// Fixed start instant used across tests
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap()
}

/// Lazily sweeping registry whose clock starts at `start`
pub fn registry_at(start: DateTime<Utc>) -> TestRegistry {
    registry_with_config(start, RegistryConfig::default())
}

/// Registry with an explicit configuration
pub fn registry_with_config(start: DateTime<Utc>, config: RegistryConfig) -> TestRegistry {
    crate::init_tracing();
    let clock = ManualClock::new(start);
    let events = Arc::new(RecordingEventSink::new());
    let registry = TokenRegistry::builder()
        .clock(clock.clone())
        .shared_event_sink(events.clone())
        .config(config)
        .build();
    (registry, clock, events)
}
