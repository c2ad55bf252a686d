//! The three registry indices and the registration algorithm over them
//!
//! - `primary`: object key -> active token plus the principal and expiration
//!   values it was last indexed under
//! - `by_expiration`: expiration time -> tokens expiring then
//! - `by_principal`: principal -> tokens it owns
//!
//! Every change goes through this module so the three views move together.
//! Callers hold the registry write lock for the whole of `register` and
//! `sweep`.

use crate::errors::{Result, TokenError};
use crate::identifiers::{ObjectKey, PrincipalId};
use crate::token::{ClaimView, Token};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};

/// Primary index entry: the token and the values it is indexed under
#[derive(Debug, Clone)]
pub(crate) struct PrimaryEntry {
    pub token: Token,
    pub principals: BTreeSet<PrincipalId>,
    pub expiration: Option<DateTime<Utc>>,
}

/// What a `register` call did to the indices
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Registration {
    /// New claim inserted
    Started,
    /// Existing claim moved to new expiration/principal slots
    Reindexed,
    /// Re-registration with nothing to update
    Unchanged,
    /// Ended token removed from every index
    Reclaimed,
    /// Explicitly ended token offered as a fresh claim; nothing inserted
    Discarded,
}

#[derive(Debug, Default)]
pub(crate) struct Indices {
    pub primary: BTreeMap<ObjectKey, PrimaryEntry>,
    pub by_expiration: BTreeMap<DateTime<Utc>, BTreeSet<Token>>,
    pub by_principal: BTreeMap<PrincipalId, BTreeSet<Token>>,
}

impl Indices {
    /// Register `token` (already bound) as seen at `now`.
    ///
    /// All checks precede the first write, so an error leaves the indices
    /// untouched.
    pub fn register(&mut self, token: &Token, now: DateTime<Utc>) -> Result<Registration> {
        let key = token.target().clone();
        let view = token.view(now);
        let current = self.primary.get(&key).map(|entry| entry.token.clone());

        match current {
            Some(current) if current == *token => Ok(self.reindex(&key, token, view)),
            Some(current) => {
                if current.is_active_at(now) {
                    tracing::warn!(
                        target = %key,
                        existing = %current.id(),
                        token_id = %token.id(),
                        "Registration refused: object already claimed"
                    );
                    return Err(TokenError::RegistrationConflict {
                        target: key,
                        existing: current.id(),
                        token: token.id(),
                    });
                }
                // Expired but not yet swept: supersede it.
                if let Some(stale) = self.primary.remove(&key) {
                    tracing::debug!(
                        target = %key,
                        stale = %stale.token.id(),
                        "Superseding stale claim"
                    );
                    self.unindex(&stale);
                }
                Ok(self.insert_fresh(key, token, view))
            }
            None => Ok(self.insert_fresh(key, token, view)),
        }
    }

    /// Reclaim every token whose expiration slot is at or before `now`.
    ///
    /// Returns only tokens actually removed from `primary`.
    pub fn sweep(&mut self, now: DateTime<Utc>) -> Vec<Token> {
        let due: Vec<DateTime<Utc>> = self
            .by_expiration
            .range(..=now)
            .map(|(at, _)| *at)
            .collect();

        let mut reclaimed = Vec::new();
        for at in due {
            let Some(tokens) = self.by_expiration.remove(&at) else {
                continue;
            };
            for token in tokens {
                let key = token.target();
                let owns_slot = self
                    .primary
                    .get(key)
                    .is_some_and(|entry| entry.token == token);
                if !owns_slot {
                    continue;
                }
                if let Some(entry) = self.primary.remove(key) {
                    for principal in &entry.principals {
                        remove_member(&mut self.by_principal, principal, &entry.token);
                    }
                    reclaimed.push(entry.token);
                }
            }
        }
        reclaimed
    }

    pub fn index(&mut self, entry: &PrimaryEntry) {
        if let Some(expiration) = entry.expiration {
            add_member(&mut self.by_expiration, &expiration, &entry.token);
        }
        for principal in &entry.principals {
            add_member(&mut self.by_principal, principal, &entry.token);
        }
    }

    pub fn unindex(&mut self, entry: &PrimaryEntry) {
        if let Some(expiration) = entry.expiration {
            remove_member(&mut self.by_expiration, &expiration, &entry.token);
        }
        for principal in &entry.principals {
            remove_member(&mut self.by_principal, principal, &entry.token);
        }
    }

    fn insert_fresh(&mut self, key: ObjectKey, token: &Token, view: ClaimView) -> Registration {
        if view.explicitly_ended {
            return Registration::Discarded;
        }
        let entry = PrimaryEntry {
            token: token.clone(),
            principals: view.principals,
            expiration: view.expiration,
        };
        self.index(&entry);
        self.primary.insert(key, entry);
        Registration::Started
    }

    fn reindex(&mut self, key: &ObjectKey, token: &Token, view: ClaimView) -> Registration {
        if view.ended.is_some() {
            if let Some(entry) = self.primary.remove(key) {
                self.unindex(&entry);
            }
            return Registration::Reclaimed;
        }

        let Some(entry) = self.primary.get_mut(key) else {
            return Registration::Unchanged;
        };
        if entry.expiration == view.expiration && entry.principals == view.principals {
            return Registration::Unchanged;
        }
        let old_expiration = std::mem::replace(&mut entry.expiration, view.expiration);
        let old_principals = std::mem::replace(&mut entry.principals, view.principals.clone());

        if old_expiration != view.expiration {
            if let Some(old) = old_expiration {
                remove_member(&mut self.by_expiration, &old, token);
            }
            if let Some(new) = view.expiration {
                add_member(&mut self.by_expiration, &new, token);
            }
        }
        for removed in old_principals.difference(&view.principals) {
            remove_member(&mut self.by_principal, removed, token);
        }
        for added in view.principals.difference(&old_principals) {
            add_member(&mut self.by_principal, added, token);
        }
        Registration::Reindexed
    }
}

pub(crate) fn add_member<K: Ord + Clone>(
    index: &mut BTreeMap<K, BTreeSet<Token>>,
    key: &K,
    token: &Token,
) {
    index.entry(key.clone()).or_default().insert(token.clone());
}

/// Remove `token` from the set at `key`, dropping the set once empty.
pub(crate) fn remove_member<K: Ord>(
    index: &mut BTreeMap<K, BTreeSet<Token>>,
    key: &K,
    token: &Token,
) -> bool {
    let Some(members) = index.get_mut(key) else {
        return false;
    };
    let removed = members.remove(token);
    if members.is_empty() {
        index.remove(key);
    }
    removed
}
