//! Latchkey Core - advisory token registry
//!
//! Tokens are cooperative claims over addressable objects. Nothing here
//! prevents access to an object; callers consult the registry before
//! acting and honor what it reports.
//!
//! # Token variants
//! - `ExclusiveLock`: one principal, endable
//! - `SharedLock`: one or more principals, endable, membership mutable
//! - `Freeze`: no principals, lasts for the registry's lifetime
//! - `EndableFreeze`: no principals, endable
//!
//! # Registry
//! [`TokenRegistry`] keeps at most one active token per object key plus
//! secondary indices by expiration and by principal. Expired tokens are
//! filtered out of every read and reclaimed by a sweep, lazily on
//! registration or periodically via [`PeriodicSweeper`].
//!
//! # Example
//! ```rust
//! use chrono::Duration;
//! use latchkey_core::{Token, TokenRegistry};
//!
//! let registry = TokenRegistry::new();
//! let lock = Token::exclusive("doc-42", "alice", Some(Duration::minutes(5)))?;
//! registry.register(&lock)?;
//!
//! assert_eq!(registry.get(&"doc-42".into()), Some(lock.clone()));
//! lock.end()?;
//! assert!(registry.get(&"doc-42".into()).is_none());
//! # Ok::<(), latchkey_core::TokenError>(())
//! ```

#![forbid(unsafe_code)]
#![deny(clippy::await_holding_lock)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

/// Registry configuration and its loaders
pub mod config;

/// Unified error type
pub mod errors;

/// Lifecycle events and sinks
pub mod events;

/// Token, registry, object and principal identifiers
pub mod identifiers;

/// The token registry and its indices
pub mod registry;

/// Background sweeping
pub mod sweeper;

/// Injected clocks
pub mod time;

/// Token variants and lifecycle
pub mod token;

pub use config::{LatchkeyConfig, RegistryConfig, SweepMode};
pub use errors::{Result, TokenError};
pub use events::{
    BroadcastEventSink, EventSink, FanoutEventSink, NoopEventSink, TokenEvent, TracingEventSink,
};
pub use identifiers::{Addressable, ObjectKey, PrincipalId, RegistryId, TokenId};
pub use registry::{
    RegistryBuilder, RegistrySnapshot, RegistryStats, RepairReport, TokenRegistry,
};
pub use sweeper::PeriodicSweeper;
pub use time::{Clock, ManualClock, SystemClock};
pub use token::{Annotations, Claim, Lifetime, Token, TokenKind};
