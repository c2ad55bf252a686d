//! Token registry: the authority on which claims are active
//!
//! The registry maps each object key to at most one active token and keeps
//! two secondary indices, by expiration time and by owning principal. All
//! three are guarded by one `RwLock`: `register`, `sweep` and `repair` hold
//! the write lock for their whole run, reads share the read lock.
//!
//! Expired tokens are reclaimed lazily. In [`SweepMode::Lazy`] every
//! `register` call sweeps due expiration slots; in [`SweepMode::Periodic`]
//! a [`PeriodicSweeper`](crate::sweeper::PeriodicSweeper) does it on a
//! timer. Either way, reads filter out ended tokens, so sweep timing only
//! affects when memory is released.

mod indices;
mod maintenance;
mod snapshot;

pub use maintenance::{RegistryStats, RepairReport};
pub use snapshot::{
    ExpirationSlot, PrimaryRecord, PrincipalSlot, RegistrySnapshot, TokenRecord,
    SNAPSHOT_VERSION,
};

use crate::config::{RegistryConfig, SweepMode};
use crate::errors::Result;
use crate::events::{EventSink, NoopEventSink, TokenEvent};
use crate::identifiers::{Addressable, ObjectKey, PrincipalId, RegistryId};
use crate::time::{Clock, SystemClock};
use crate::token::Token;
use chrono::{DateTime, Utc};
use indices::{Indices, Registration};
use parking_lot::RwLock;
use std::fmt;
use std::sync::{Arc, Weak};

/// State shared by every handle to one registry
pub(crate) struct RegistryShared {
    id: RegistryId,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventSink>,
    config: RegistryConfig,
    indices: RwLock<Indices>,
}

impl RegistryShared {
    pub(crate) fn id(&self) -> RegistryId {
        self.id
    }

    pub(crate) fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }
}

/// Handle to a token registry
///
/// Clones refer to the same registry. Tokens hold only a weak reference
/// back, so dropping every handle releases the registry.
#[derive(Clone)]
pub struct TokenRegistry {
    shared: Arc<RegistryShared>,
}

impl TokenRegistry {
    /// Registry with the system clock, no event sink and lazy sweeping
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Start configuring a registry
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    pub(crate) fn from_shared(shared: Arc<RegistryShared>) -> Self {
        Self { shared }
    }

    pub(crate) fn downgrade(&self) -> Weak<RegistryShared> {
        Arc::downgrade(&self.shared)
    }

    /// Registry identity
    pub fn id(&self) -> RegistryId {
        self.shared.id
    }

    /// Clock the registry reads "now" from
    pub fn clock(&self) -> Arc<dyn Clock> {
        self.shared.clock()
    }

    /// Current time according to the registry clock
    pub fn now(&self) -> DateTime<Utc> {
        self.shared.clock.now()
    }

    /// Configuration the registry was built with
    pub fn config(&self) -> &RegistryConfig {
        &self.shared.config
    }

    /// Whether two handles refer to the same registry
    pub fn same_registry(&self, other: &TokenRegistry) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Register a new token, or re-register a mutated one.
    ///
    /// The first registration binds the token to this registry and stamps
    /// `started`. A token whose object is already claimed by a different,
    /// still-active token is refused with
    /// [`TokenError::RegistrationConflict`](crate::TokenError::RegistrationConflict);
    /// an expired but unswept claim is superseded. Re-registering a token
    /// that has ended removes it from every index immediately.
    pub fn register(&self, token: &Token) -> Result<Token> {
        let outcome = {
            let mut indices = self.shared.indices.write();
            let now = self.shared.clock.now();
            token.bind(&self.shared, now)?;
            let outcome = indices.register(token, now)?;
            if self.shared.config.sweep == SweepMode::Lazy {
                let reclaimed = indices.sweep(now);
                if !reclaimed.is_empty() {
                    tracing::debug!(reclaimed = reclaimed.len(), "Swept expired tokens");
                }
            }
            outcome
        };

        tracing::debug!(
            token_id = %token.id(),
            target = %token.target(),
            kind = %token.kind(),
            ?outcome,
            "Token registered"
        );
        if outcome == Registration::Started {
            self.emit(TokenEvent::Started {
                token: token.clone(),
            });
        }
        Ok(token.clone())
    }

    /// Active token claiming `key`, if any
    pub fn get(&self, key: &ObjectKey) -> Option<Token> {
        let now = self.now();
        let indices = self.shared.indices.read();
        indices
            .primary
            .get(key)
            .map(|entry| entry.token.clone())
            .filter(|token| token.is_active_at(now))
    }

    /// Active token claiming `object`, if any
    pub fn get_for(&self, object: &impl Addressable) -> Option<Token> {
        self.get(&object.object_key())
    }

    /// Active tokens owned by `principal`.
    ///
    /// Membership is captured when called; each token is checked for
    /// expiry and current membership as the iterator reaches it.
    pub fn iter_for_principal(&self, principal: &PrincipalId) -> impl Iterator<Item = Token> {
        let members: Vec<Token> = self
            .shared
            .indices
            .read()
            .by_principal
            .get(principal)
            .map(|tokens| tokens.iter().cloned().collect())
            .unwrap_or_default();
        let clock = self.clock();
        let principal = principal.clone();
        members.into_iter().filter(move |token| {
            token.is_active_at(clock.now()) && token.principal_ids().contains(&principal)
        })
    }

    /// All active tokens, in object-key order
    pub fn iter(&self) -> impl Iterator<Item = Token> {
        let tokens: Vec<Token> = self
            .shared
            .indices
            .read()
            .primary
            .values()
            .map(|entry| entry.token.clone())
            .collect();
        let clock = self.clock();
        tokens
            .into_iter()
            .filter(move |token| token.is_active_at(clock.now()))
    }

    /// Number of active tokens
    pub fn active_count(&self) -> usize {
        self.iter().count()
    }

    /// Reclaim tokens whose expiration has passed; returns how many.
    pub fn sweep(&self) -> usize {
        let reclaimed = {
            let mut indices = self.shared.indices.write();
            indices.sweep(self.shared.clock.now())
        };
        if !reclaimed.is_empty() {
            tracing::debug!(reclaimed = reclaimed.len(), "Swept expired tokens");
        }
        reclaimed.len()
    }

    pub(crate) fn emit(&self, event: TokenEvent) {
        self.shared.events.notify(&event);
    }
}

impl Default for TokenRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TokenRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenRegistry")
            .field("id", &self.shared.id)
            .field("config", &self.shared.config)
            .field("clock", &self.shared.clock)
            .finish()
    }
}

/// Builder wiring a registry to its collaborators
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    clock: Option<Arc<dyn Clock>>,
    events: Option<Arc<dyn EventSink>>,
    config: RegistryConfig,
}

impl RegistryBuilder {
    /// Use `clock` as the time source
    pub fn clock(self, clock: impl Clock + 'static) -> Self {
        self.shared_clock(Arc::new(clock))
    }

    /// Use an already shared time source
    pub fn shared_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Deliver lifecycle events to `sink`
    pub fn event_sink(self, sink: impl EventSink + 'static) -> Self {
        self.shared_event_sink(Arc::new(sink))
    }

    /// Deliver lifecycle events to an already shared sink
    pub fn shared_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = Some(sink);
        self
    }

    /// Apply a configuration
    pub fn config(mut self, config: RegistryConfig) -> Self {
        self.config = config;
        self
    }

    /// Build an empty registry
    pub fn build(self) -> TokenRegistry {
        self.build_with_id(RegistryId::new())
    }

    fn build_with_id(self, id: RegistryId) -> TokenRegistry {
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let events = self.events.unwrap_or_else(|| Arc::new(NoopEventSink));
        TokenRegistry::from_shared(Arc::new(RegistryShared {
            id,
            clock,
            events,
            config: self.config,
            indices: RwLock::new(Indices::default()),
        }))
    }
}
