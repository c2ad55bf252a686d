//! Tokens: advisory claims over addressable objects
//!
//! A [`Token`] moves through `Unregistered -> Active -> Ended`. Construction
//! yields an unregistered token; [`TokenRegistry::register`] binds it to a
//! registry, stamps `started`, and resolves any pending duration into an
//! absolute expiration. Every mutation afterwards re-registers the token so
//! the registry's indices follow it, then emits the matching event.
//!
//! The variant lives in [`Claim`], which carries only the state valid for
//! that variant:
//!
//! | Variant          | principals          | endable |
//! |------------------|---------------------|---------|
//! | `ExclusiveLock`  | exactly one, fixed  | yes     |
//! | `SharedLock`     | one or more, mutable| yes     |
//! | `Freeze`         | none                | no      |
//! | `EndableFreeze`  | none                | yes     |
//!
//! [`TokenRegistry::register`]: crate::registry::TokenRegistry::register

use crate::errors::{Result, TokenError};
use crate::events::TokenEvent;
use crate::identifiers::{ObjectKey, PrincipalId, RegistryId, TokenId};
use crate::registry::{RegistryShared, TokenRegistry};
use crate::time::Clock;
use chrono::{DateTime, Duration, Utc};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Weak};

/// Extension data attached to a token, unrelated to locking semantics.
///
/// Keys are conventionally prefixed with the owning package name.
pub type Annotations = BTreeMap<String, serde_json::Value>;

/// Field-less tag of a token variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    /// Held by exactly one principal
    ExclusiveLock,
    /// Held by one or more principals
    SharedLock,
    /// Held by no one, never ends
    Freeze,
    /// Held by no one, may end or expire
    EndableFreeze,
}

impl TokenKind {
    /// Whether tokens of this kind can end or expire
    pub fn is_endable(self) -> bool {
        !matches!(self, TokenKind::Freeze)
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TokenKind::ExclusiveLock => "exclusive lock",
            TokenKind::SharedLock => "shared lock",
            TokenKind::Freeze => "freeze",
            TokenKind::EndableFreeze => "endable freeze",
        };
        f.write_str(name)
    }
}

/// Time bounds of an endable token
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lifetime {
    expiration: Option<DateTime<Utc>>,
    /// Relative span waiting for `started`; consumed at registration.
    #[serde(skip)]
    pending_duration: Option<Duration>,
    ended: Option<DateTime<Utc>>,
}

impl Lifetime {
    fn pending(duration: Option<Duration>) -> Self {
        Self {
            pending_duration: duration,
            ..Self::default()
        }
    }

    /// Absolute expiration, if any
    pub fn expiration(&self) -> Option<DateTime<Utc>> {
        self.expiration
    }

    /// Time of an explicit `end()`, if any
    pub fn explicitly_ended(&self) -> Option<DateTime<Utc>> {
        self.ended
    }

    /// When the token ended as seen at `now`: explicit end, else an elapsed
    /// expiration.
    pub fn ended_at(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.ended
            .or_else(|| self.expiration.filter(|expiration| *expiration <= now))
    }

    fn resolve(&mut self, started: DateTime<Utc>) -> Result<()> {
        if let Some(duration) = self.pending_duration {
            self.expiration = Some(offset(started, duration)?);
            self.pending_duration = None;
        }
        Ok(())
    }
}

/// Variant-specific state of a token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Claim {
    /// One owner, fixed at creation
    ExclusiveLock {
        /// Sole owner
        principal: PrincipalId,
        /// Time bounds
        lifetime: Lifetime,
    },
    /// One or more owners; emptying the set ends the token
    SharedLock {
        /// Current owners
        principals: BTreeSet<PrincipalId>,
        /// Time bounds
        lifetime: Lifetime,
    },
    /// No owners, permanent
    Freeze,
    /// No owners, endable
    EndableFreeze {
        /// Time bounds
        lifetime: Lifetime,
    },
}

impl Claim {
    /// Tag of this variant
    pub fn kind(&self) -> TokenKind {
        match self {
            Claim::ExclusiveLock { .. } => TokenKind::ExclusiveLock,
            Claim::SharedLock { .. } => TokenKind::SharedLock,
            Claim::Freeze => TokenKind::Freeze,
            Claim::EndableFreeze { .. } => TokenKind::EndableFreeze,
        }
    }

    /// Owning principals; empty exactly for freezes
    pub fn principal_ids(&self) -> BTreeSet<PrincipalId> {
        match self {
            Claim::ExclusiveLock { principal, .. } => BTreeSet::from([principal.clone()]),
            Claim::SharedLock { principals, .. } => principals.clone(),
            Claim::Freeze | Claim::EndableFreeze { .. } => BTreeSet::new(),
        }
    }

    /// Time bounds, for endable variants
    pub fn lifetime(&self) -> Option<&Lifetime> {
        match self {
            Claim::ExclusiveLock { lifetime, .. }
            | Claim::SharedLock { lifetime, .. }
            | Claim::EndableFreeze { lifetime } => Some(lifetime),
            Claim::Freeze => None,
        }
    }

    /// Check the principal rules of the variant.
    ///
    /// Exclusive locks need a non-blank owner; shared locks need non-blank
    /// owners and at least one of them until they have ended.
    pub fn check_principals(&self) -> Result<()> {
        match self {
            Claim::ExclusiveLock { principal, .. } if principal.is_blank() => Err(
                TokenError::validation("exclusive lock principal may not be blank"),
            ),
            Claim::SharedLock {
                principals,
                lifetime,
            } => {
                if principals.iter().any(PrincipalId::is_blank) {
                    Err(TokenError::validation("principal IDs may not be blank"))
                } else if principals.is_empty() && lifetime.ended.is_none() {
                    Err(TokenError::validation(
                        "shared lock needs at least one principal",
                    ))
                } else {
                    Ok(())
                }
            }
            _ => Ok(()),
        }
    }

    fn lifetime_mut(&mut self) -> Option<&mut Lifetime> {
        match self {
            Claim::ExclusiveLock { lifetime, .. }
            | Claim::SharedLock { lifetime, .. }
            | Claim::EndableFreeze { lifetime } => Some(lifetime),
            Claim::Freeze => None,
        }
    }
}

/// What the registry indexes for a token at one instant
#[derive(Debug, Clone)]
pub(crate) struct ClaimView {
    pub principals: BTreeSet<PrincipalId>,
    pub expiration: Option<DateTime<Utc>>,
    pub ended: Option<DateTime<Utc>>,
    pub explicitly_ended: bool,
}

/// Registration state, set exactly once
pub(crate) struct Binding {
    registry_id: RegistryId,
    registry: Weak<RegistryShared>,
    clock: Arc<dyn Clock>,
    started: DateTime<Utc>,
}

struct TokenInner {
    id: TokenId,
    target: ObjectKey,
    kind: TokenKind,
    claim: Mutex<Claim>,
    annotations: Mutex<Annotations>,
    binding: OnceCell<Binding>,
}

/// Handle to one claim
///
/// Clones share the claim. Equality, hashing and ordering use the token ID.
#[derive(Clone)]
pub struct Token {
    inner: Arc<TokenInner>,
}

impl Token {
    /// Create an exclusive lock held by `principal`
    pub fn exclusive(
        target: impl Into<ObjectKey>,
        principal: impl Into<PrincipalId>,
        duration: Option<Duration>,
    ) -> Result<Self> {
        let principal = principal.into();
        if principal.is_blank() {
            return Err(TokenError::validation(
                "exclusive lock principal may not be blank",
            ));
        }
        let lifetime = Lifetime::pending(validate_duration(duration)?);
        Ok(Self::from_claim(
            target.into(),
            Claim::ExclusiveLock {
                principal,
                lifetime,
            },
        ))
    }

    /// Create a shared lock held by `principals` (at least one)
    pub fn shared<I, P>(
        target: impl Into<ObjectKey>,
        principals: I,
        duration: Option<Duration>,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = P>,
        P: Into<PrincipalId>,
    {
        let principals = collect_principals(principals)?;
        if principals.is_empty() {
            return Err(TokenError::validation(
                "shared lock needs at least one principal",
            ));
        }
        let lifetime = Lifetime::pending(validate_duration(duration)?);
        Ok(Self::from_claim(
            target.into(),
            Claim::SharedLock {
                principals,
                lifetime,
            },
        ))
    }

    /// Create a permanent freeze
    pub fn freeze(target: impl Into<ObjectKey>) -> Self {
        Self::from_claim(target.into(), Claim::Freeze)
    }

    /// Create a freeze that may be ended or expire
    pub fn endable_freeze(
        target: impl Into<ObjectKey>,
        duration: Option<Duration>,
    ) -> Result<Self> {
        let lifetime = Lifetime::pending(validate_duration(duration)?);
        Ok(Self::from_claim(
            target.into(),
            Claim::EndableFreeze { lifetime },
        ))
    }

    fn from_claim(target: ObjectKey, claim: Claim) -> Self {
        Self::assemble(TokenId::new(), target, claim, Annotations::new())
    }

    fn assemble(id: TokenId, target: ObjectKey, claim: Claim, annotations: Annotations) -> Self {
        Self {
            inner: Arc::new(TokenInner {
                id,
                target,
                kind: claim.kind(),
                claim: Mutex::new(claim),
                annotations: Mutex::new(annotations),
                binding: OnceCell::new(),
            }),
        }
    }

    /// Rebuild a registered token from persisted state, bound to `shared`.
    pub(crate) fn restored(
        id: TokenId,
        target: ObjectKey,
        claim: Claim,
        annotations: Annotations,
        started: DateTime<Utc>,
        shared: &Arc<RegistryShared>,
    ) -> Self {
        let token = Self::assemble(id, target, claim, annotations);
        let _ = token.inner.binding.set(Binding {
            registry_id: shared.id(),
            registry: Arc::downgrade(shared),
            clock: shared.clock(),
            started,
        });
        token
    }

    /// Token identity
    pub fn id(&self) -> TokenId {
        self.inner.id
    }

    /// Key of the claimed object
    pub fn target(&self) -> &ObjectKey {
        &self.inner.target
    }

    /// Variant tag
    pub fn kind(&self) -> TokenKind {
        self.inner.kind
    }

    /// Whether the token can end or expire
    pub fn is_endable(&self) -> bool {
        self.inner.kind.is_endable()
    }

    /// Snapshot of the variant state
    pub fn claim(&self) -> Claim {
        self.inner.claim.lock().clone()
    }

    /// Owning principals, as a frozen copy
    pub fn principal_ids(&self) -> BTreeSet<PrincipalId> {
        self.inner.claim.lock().principal_ids()
    }

    /// Whether the token has been registered
    pub fn is_registered(&self) -> bool {
        self.inner.binding.get().is_some()
    }

    /// Registry the token belongs to, while it is alive
    pub fn registry(&self) -> Option<TokenRegistry> {
        self.inner
            .binding
            .get()
            .and_then(|binding| binding.registry.upgrade())
            .map(TokenRegistry::from_shared)
    }

    /// Time of first successful registration
    pub fn started(&self) -> Result<DateTime<Utc>> {
        Ok(self.binding()?.started)
    }

    /// Absolute expiration; always `None` for permanent freezes
    pub fn expiration(&self) -> Result<Option<DateTime<Utc>>> {
        self.binding()?;
        Ok(self
            .inner
            .claim
            .lock()
            .lifetime()
            .and_then(Lifetime::expiration))
    }

    /// Span from `started` to expiration.
    ///
    /// Before registration this is the pending duration given at
    /// construction or through [`Token::set_duration`].
    pub fn duration(&self) -> Option<Duration> {
        let claim = self.inner.claim.lock();
        let lifetime = claim.lifetime()?;
        match self.inner.binding.get() {
            None => lifetime.pending_duration,
            Some(binding) => lifetime
                .expiration
                .map(|expiration| expiration - binding.started),
        }
    }

    /// Time left before expiration; zero once ended, `None` without expiration
    pub fn remaining_duration(&self) -> Result<Option<Duration>> {
        let binding = self.binding()?;
        let now = binding.clock.now();
        let claim = self.inner.claim.lock();
        let Some(lifetime) = claim.lifetime() else {
            return Ok(None);
        };
        if lifetime.ended_at(now).is_some() {
            return Ok(Some(Duration::zero()));
        }
        Ok(lifetime.expiration.map(|expiration| expiration - now))
    }

    /// When the token ended, explicitly or by expiration; `None` while active
    pub fn ended(&self) -> Result<Option<DateTime<Utc>>> {
        let binding = self.binding()?;
        Ok(self.view(binding.clock.now()).ended)
    }

    /// Registered and not ended
    pub fn is_active(&self) -> bool {
        match self.inner.binding.get() {
            Some(binding) => self.is_active_at(binding.clock.now()),
            None => false,
        }
    }

    pub(crate) fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.is_registered() && self.view(now).ended.is_none()
    }

    /// Move the expiration to an absolute time (or remove it)
    pub fn set_expiration(&self, expiration: Option<DateTime<Utc>>) -> Result<()> {
        self.change_expiration("set_expiration", |_, _| Ok(expiration))
    }

    /// Move the expiration to an RFC 3339 timestamp.
    ///
    /// The text must carry an explicit UTC offset; local times are rejected.
    pub fn set_expiration_rfc3339(&self, expiration: Option<&str>) -> Result<()> {
        let parsed = expiration.map(parse_rfc3339).transpose()?;
        self.set_expiration(parsed)
    }

    /// Set the span from `started` to expiration.
    ///
    /// Before registration this only replaces the pending duration.
    pub fn set_duration(&self, duration: Option<Duration>) -> Result<()> {
        self.require_endable("set_duration")?;
        let duration = validate_duration(duration)?;
        {
            let mut claim = self.inner.claim.lock();
            // Binding happens under the claim lock, so this check cannot race it.
            if self.inner.binding.get().is_none() {
                if let Some(lifetime) = claim.lifetime_mut() {
                    lifetime.pending_duration = duration;
                }
                return Ok(());
            }
        }
        self.change_expiration("set_duration", |started, _| {
            duration.map(|duration| offset(started, duration)).transpose()
        })
    }

    /// Set the time left from now until expiration
    pub fn set_remaining_duration(&self, remaining: Option<Duration>) -> Result<()> {
        self.require_endable("set_remaining_duration")?;
        let remaining = validate_duration(remaining)?;
        self.change_expiration("set_remaining_duration", |_, now| {
            remaining.map(|remaining| offset(now, remaining)).transpose()
        })
    }

    /// End the token now
    pub fn end(&self) -> Result<()> {
        self.require_endable("end")?;
        let (binding, registry) = self.bound_registry()?;
        self.end_registered(binding, &registry)
    }

    /// Share a shared lock with more principals
    pub fn add<I, P>(&self, principals: I) -> Result<()>
    where
        I: IntoIterator<Item = P>,
        P: Into<PrincipalId>,
    {
        self.require_kind(TokenKind::SharedLock, "add")?;
        let incoming = collect_principals(principals)?;
        let (binding, registry) = self.bound_registry()?;
        let now = binding.clock.now();
        let old = {
            let mut claim = self.inner.claim.lock();
            let Claim::SharedLock {
                principals,
                lifetime,
            } = &mut *claim
            else {
                return Err(TokenError::unsupported("add", self.kind()));
            };
            if lifetime.ended_at(now).is_some() {
                return Err(TokenError::ended(self.id()));
            }
            let old = principals.clone();
            principals.extend(incoming);
            if *principals == old {
                return Ok(());
            }
            old
        };
        if let Err(err) = registry.register(self) {
            self.restore_principals(old);
            return Err(err);
        }
        registry.emit(TokenEvent::PrincipalsChanged {
            token: self.clone(),
            old,
        });
        Ok(())
    }

    /// Remove principals from a shared lock.
    ///
    /// Removing the last principal ends the token instead of reporting a
    /// membership change.
    pub fn remove<I, P>(&self, principals: I) -> Result<()>
    where
        I: IntoIterator<Item = P>,
        P: Into<PrincipalId>,
    {
        self.require_kind(TokenKind::SharedLock, "remove")?;
        let outgoing = collect_principals(principals)?;
        let (binding, registry) = self.bound_registry()?;
        let now = binding.clock.now();
        let (old, emptied) = {
            let mut claim = self.inner.claim.lock();
            let Claim::SharedLock {
                principals,
                lifetime,
            } = &mut *claim
            else {
                return Err(TokenError::unsupported("remove", self.kind()));
            };
            if lifetime.ended_at(now).is_some() {
                return Err(TokenError::ended(self.id()));
            }
            let old = principals.clone();
            for principal in &outgoing {
                principals.remove(principal);
            }
            if *principals == old {
                return Ok(());
            }
            (old, principals.is_empty())
        };

        if emptied {
            if let Err(err) = self.end_registered(binding, &registry) {
                self.restore_principals(old);
                return Err(err);
            }
            return Ok(());
        }

        if let Err(err) = registry.register(self) {
            self.restore_principals(old);
            return Err(err);
        }
        registry.emit(TokenEvent::PrincipalsChanged {
            token: self.clone(),
            old,
        });
        Ok(())
    }

    /// Read one annotation
    pub fn annotation(&self, key: &str) -> Option<serde_json::Value> {
        self.inner.annotations.lock().get(key).cloned()
    }

    /// Store an annotation, returning the previous value
    pub fn set_annotation(
        &self,
        key: impl Into<String>,
        value: serde_json::Value,
    ) -> Option<serde_json::Value> {
        self.inner.annotations.lock().insert(key.into(), value)
    }

    /// Drop an annotation, returning its value
    pub fn remove_annotation(&self, key: &str) -> Option<serde_json::Value> {
        self.inner.annotations.lock().remove(key)
    }

    /// Copy of all annotations
    pub fn annotations(&self) -> Annotations {
        self.inner.annotations.lock().clone()
    }

    /// Bind to `shared` on first registration.
    ///
    /// Returns `true` when this call performed the binding.
    pub(crate) fn bind(&self, shared: &Arc<RegistryShared>, now: DateTime<Utc>) -> Result<bool> {
        if let Some(binding) = self.inner.binding.get() {
            return self.check_binding(binding, shared.id()).map(|()| false);
        }
        let mut claim = self.inner.claim.lock();
        if let Some(binding) = self.inner.binding.get() {
            return self.check_binding(binding, shared.id()).map(|()| false);
        }
        if let Some(lifetime) = claim.lifetime_mut() {
            lifetime.resolve(now)?;
        }
        let _ = self.inner.binding.set(Binding {
            registry_id: shared.id(),
            registry: Arc::downgrade(shared),
            clock: shared.clock(),
            started: now,
        });
        Ok(true)
    }

    pub(crate) fn view(&self, now: DateTime<Utc>) -> ClaimView {
        let claim = self.inner.claim.lock();
        let lifetime = claim.lifetime();
        ClaimView {
            principals: claim.principal_ids(),
            expiration: lifetime.and_then(Lifetime::expiration),
            ended: lifetime.and_then(|lifetime| lifetime.ended_at(now)),
            explicitly_ended: lifetime.and_then(Lifetime::explicitly_ended).is_some(),
        }
    }

    pub(crate) fn started_if_bound(&self) -> Option<DateTime<Utc>> {
        self.inner.binding.get().map(|binding| binding.started)
    }

    fn check_binding(&self, binding: &Binding, requested: RegistryId) -> Result<()> {
        if binding.registry_id == requested {
            Ok(())
        } else {
            Err(TokenError::RegistryMismatch {
                token: self.id(),
                bound: binding.registry_id,
                requested,
            })
        }
    }

    fn binding(&self) -> Result<&Binding> {
        self.inner
            .binding
            .get()
            .ok_or_else(|| TokenError::unregistered(self.id()))
    }

    fn bound_registry(&self) -> Result<(&Binding, TokenRegistry)> {
        let binding = self.binding()?;
        let shared = binding
            .registry
            .upgrade()
            .ok_or(TokenError::RegistryUnavailable { token: self.id() })?;
        Ok((binding, TokenRegistry::from_shared(shared)))
    }

    fn require_endable(&self, operation: &str) -> Result<()> {
        if self.is_endable() {
            Ok(())
        } else {
            Err(TokenError::unsupported(operation, self.kind()))
        }
    }

    fn require_kind(&self, kind: TokenKind, operation: &str) -> Result<()> {
        if self.kind() == kind {
            Ok(())
        } else {
            Err(TokenError::unsupported(operation, self.kind()))
        }
    }

    fn change_expiration<F>(&self, operation: &str, compute: F) -> Result<()>
    where
        F: FnOnce(DateTime<Utc>, DateTime<Utc>) -> Result<Option<DateTime<Utc>>>,
    {
        self.require_endable(operation)?;
        let (binding, registry) = self.bound_registry()?;
        let now = binding.clock.now();
        let old = {
            let mut claim = self.inner.claim.lock();
            let Some(lifetime) = claim.lifetime_mut() else {
                return Err(TokenError::unsupported(operation, self.kind()));
            };
            if lifetime.ended_at(now).is_some() {
                return Err(TokenError::ended(self.id()));
            }
            let old = lifetime.expiration;
            let new = compute(binding.started, now)?;
            if old == new {
                return Ok(());
            }
            lifetime.expiration = new;
            old
        };
        if let Err(err) = registry.register(self) {
            self.with_lifetime(|lifetime| lifetime.expiration = old);
            return Err(err);
        }
        registry.emit(TokenEvent::ExpirationChanged {
            token: self.clone(),
            old,
        });
        Ok(())
    }

    fn end_registered(&self, binding: &Binding, registry: &TokenRegistry) -> Result<()> {
        let now = binding.clock.now();
        {
            let mut claim = self.inner.claim.lock();
            let Some(lifetime) = claim.lifetime_mut() else {
                return Err(TokenError::unsupported("end", self.kind()));
            };
            if lifetime.ended_at(now).is_some() {
                return Err(TokenError::ended(self.id()));
            }
            lifetime.ended = Some(now);
        }
        if let Err(err) = registry.register(self) {
            self.with_lifetime(|lifetime| lifetime.ended = None);
            return Err(err);
        }
        registry.emit(TokenEvent::Ended {
            token: self.clone(),
        });
        Ok(())
    }

    fn with_lifetime(&self, f: impl FnOnce(&mut Lifetime)) {
        if let Some(lifetime) = self.inner.claim.lock().lifetime_mut() {
            f(lifetime);
        }
    }

    fn restore_principals(&self, old: BTreeSet<PrincipalId>) {
        if let Claim::SharedLock { principals, .. } = &mut *self.inner.claim.lock() {
            *principals = old;
        }
    }
}

impl PartialEq for Token {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Token {}

impl Hash for Token {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl PartialOrd for Token {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Token {
    fn cmp(&self, other: &Self) -> Ordering {
        self.inner.id.cmp(&other.inner.id)
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("id", &self.inner.id)
            .field("target", &self.inner.target)
            .field("kind", &self.inner.kind)
            .field("registered", &self.is_registered())
            .finish()
    }
}

fn validate_duration(duration: Option<Duration>) -> Result<Option<Duration>> {
    match duration {
        Some(duration) if duration < Duration::zero() => Err(TokenError::validation(
            "duration may not be negative",
        )),
        other => Ok(other),
    }
}

fn offset(at: DateTime<Utc>, by: Duration) -> Result<DateTime<Utc>> {
    at.checked_add_signed(by)
        .ok_or_else(|| TokenError::validation("expiration out of range"))
}

fn collect_principals<I, P>(principals: I) -> Result<BTreeSet<PrincipalId>>
where
    I: IntoIterator<Item = P>,
    P: Into<PrincipalId>,
{
    let principals: BTreeSet<PrincipalId> = principals.into_iter().map(Into::into).collect();
    if principals.iter().any(PrincipalId::is_blank) {
        return Err(TokenError::validation("principal IDs may not be blank"));
    }
    Ok(principals)
}

fn parse_rfc3339(text: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|err| {
            TokenError::validation(format!(
                "expiration must be a timezone-aware RFC 3339 timestamp ({text}): {err}"
            ))
        })
}
