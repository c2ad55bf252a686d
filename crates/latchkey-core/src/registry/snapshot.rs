//! Serializable registry state
//!
//! A snapshot lists every indexed token once and refers to tokens from the
//! three index sections by [`TokenId`], so restoring yields one shared token
//! per ID across the primary entry and its expiration and principal
//! memberships.

use super::indices::{add_member, Indices, PrimaryEntry};
use super::{RegistryBuilder, TokenRegistry};
use crate::errors::{Result, TokenError};
use crate::identifiers::{ObjectKey, PrincipalId, RegistryId, TokenId};
use crate::token::{Annotations, Claim, Token};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Current snapshot layout version
pub const SNAPSHOT_VERSION: u16 = 1;

/// One persisted token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TokenRecord {
    /// Token identity
    pub id: TokenId,
    /// Claimed object
    pub target: ObjectKey,
    /// Variant state
    pub claim: Claim,
    /// Registration time
    pub started: DateTime<Utc>,
    /// Extension data
    #[serde(default)]
    pub annotations: Annotations,
}

/// One primary index entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PrimaryRecord {
    /// Claimed object
    pub target: ObjectKey,
    /// Token holding the claim
    pub token: TokenId,
    /// Principals the token is indexed under
    pub principals: BTreeSet<PrincipalId>,
    /// Expiration the token is indexed under
    pub expiration: Option<DateTime<Utc>>,
}

/// Tokens expiring at one instant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExpirationSlot {
    /// Expiration time
    pub at: DateTime<Utc>,
    /// Tokens expiring then
    pub tokens: Vec<TokenId>,
}

/// Tokens owned by one principal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PrincipalSlot {
    /// Owner
    pub principal: PrincipalId,
    /// Tokens it owns
    pub tokens: Vec<TokenId>,
}

/// Complete registry state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegistrySnapshot {
    /// Layout version, see [`SNAPSHOT_VERSION`]
    pub version: u16,
    /// Registry the state belongs to
    pub registry_id: RegistryId,
    /// Registry clock reading when taken
    pub taken_at: DateTime<Utc>,
    /// Every indexed token, once
    pub tokens: Vec<TokenRecord>,
    /// Primary index
    pub primary: Vec<PrimaryRecord>,
    /// Expiration index
    pub by_expiration: Vec<ExpirationSlot>,
    /// Principal index
    pub by_principal: Vec<PrincipalSlot>,
}

impl RegistrySnapshot {
    /// Encode as JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Decode from JSON
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

fn ids(tokens: &BTreeSet<Token>) -> Vec<TokenId> {
    tokens.iter().map(Token::id).collect()
}

fn record(token: &Token) -> Option<TokenRecord> {
    Some(TokenRecord {
        id: token.id(),
        target: token.target().clone(),
        claim: token.claim(),
        started: token.started_if_bound()?,
        annotations: token.annotations(),
    })
}

impl TokenRegistry {
    /// Capture the registry state, expired-but-unswept claims included
    pub fn snapshot(&self) -> RegistrySnapshot {
        let indices = self.shared.indices.read();

        let mut tokens: BTreeMap<TokenId, Token> = BTreeMap::new();
        let members = indices
            .by_expiration
            .values()
            .chain(indices.by_principal.values())
            .flatten();
        for token in indices.primary.values().map(|entry| &entry.token).chain(members) {
            tokens.entry(token.id()).or_insert_with(|| token.clone());
        }

        RegistrySnapshot {
            version: SNAPSHOT_VERSION,
            registry_id: self.shared.id,
            taken_at: self.shared.clock.now(),
            tokens: tokens.values().filter_map(record).collect(),
            primary: indices
                .primary
                .iter()
                .map(|(target, entry)| PrimaryRecord {
                    target: target.clone(),
                    token: entry.token.id(),
                    principals: entry.principals.clone(),
                    expiration: entry.expiration,
                })
                .collect(),
            by_expiration: indices
                .by_expiration
                .iter()
                .map(|(at, members)| ExpirationSlot {
                    at: *at,
                    tokens: ids(members),
                })
                .collect(),
            by_principal: indices
                .by_principal
                .iter()
                .map(|(principal, members)| PrincipalSlot {
                    principal: principal.clone(),
                    tokens: ids(members),
                })
                .collect(),
        }
    }
}

impl RegistryBuilder {
    /// Rebuild a registry from a snapshot.
    ///
    /// The registry keeps the snapshot's ID and every token is rebound to
    /// it. Index entries naming tokens missing from the snapshot are
    /// rejected.
    pub fn restore(self, snapshot: RegistrySnapshot) -> Result<TokenRegistry> {
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(TokenError::serialization(format!(
                "unsupported snapshot version {} (expected {SNAPSHOT_VERSION})",
                snapshot.version
            )));
        }

        let registry = self.build_with_id(snapshot.registry_id);
        let shared = &registry.shared;

        let mut tokens: BTreeMap<TokenId, Token> = BTreeMap::new();
        for record in snapshot.tokens {
            let id = record.id;
            if let Err(err) = record.claim.check_principals() {
                return Err(TokenError::serialization(format!(
                    "snapshot token {id} is malformed: {err}"
                )));
            }
            let token = Token::restored(
                record.id,
                record.target,
                record.claim,
                record.annotations,
                record.started,
                shared,
            );
            if tokens.insert(id, token).is_some() {
                return Err(TokenError::serialization(format!(
                    "snapshot lists token {id} twice"
                )));
            }
        }

        let lookup = |id: &TokenId| {
            tokens.get(id).cloned().ok_or_else(|| {
                TokenError::serialization(format!("snapshot references unknown token {id}"))
            })
        };

        let mut indices = Indices::default();
        for entry in snapshot.primary {
            let token = lookup(&entry.token)?;
            if token.target() != &entry.target {
                return Err(TokenError::serialization(format!(
                    "primary entry {} holds token {} for {}",
                    entry.target,
                    token.id(),
                    token.target()
                )));
            }
            indices.primary.insert(
                entry.target,
                PrimaryEntry {
                    token,
                    principals: entry.principals,
                    expiration: entry.expiration,
                },
            );
        }
        for slot in snapshot.by_expiration {
            for id in &slot.tokens {
                add_member(&mut indices.by_expiration, &slot.at, &lookup(id)?);
            }
        }
        for slot in snapshot.by_principal {
            for id in &slot.tokens {
                add_member(&mut indices.by_principal, &slot.principal, &lookup(id)?);
            }
        }

        tracing::debug!(
            registry_id = %shared.id,
            claims = indices.primary.len(),
            "Registry restored from snapshot"
        );
        *shared.indices.write() = indices;
        Ok(registry)
    }
}
