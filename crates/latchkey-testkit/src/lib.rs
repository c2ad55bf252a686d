//! Latchkey Testing Infrastructure
//!
//! Shared fixtures for registry tests: a deterministic clock, an event sink
//! that records what the registry emitted, proptest strategies and a
//! one-time tracing subscriber.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
//!
//! # Usage
//!
//! ```toml
//! [dev-dependencies]
//! latchkey-testkit = { path = "../latchkey-testkit" }
//! ```
//!
//! ```rust,no_run
//! use latchkey_testkit::fixtures::registry_at;
//! use latchkey_testkit::fixtures::t0;
//!
//! let (registry, clock, events) = registry_at(t0());
//! ```

pub mod fixtures;
pub mod recording;
pub mod strategies;

pub use fixtures::{registry_at, t0, TestRegistry};
pub use recording::RecordingEventSink;

use std::sync::Once;

static TRACING: Once = Once::new();

/// Install a test-writer tracing subscriber once per process.
///
/// Honors `RUST_LOG`; defaults to `latchkey_core=debug`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("latchkey_core=debug"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}
