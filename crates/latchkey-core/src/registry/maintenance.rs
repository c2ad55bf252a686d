//! Index repair, consistency checks and statistics

use super::indices::{Indices, PrimaryEntry};
use super::TokenRegistry;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Sizes of the three indices
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryStats {
    /// Entries in the primary index, including expired but unswept claims
    pub primary: usize,
    /// Distinct expiration times indexed
    pub expiration_slots: usize,
    /// Distinct principals indexed
    pub principals: usize,
}

/// Outcome of [`TokenRegistry::repair`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairReport {
    /// Primary entries dropped because their token had ended
    pub dropped_claims: usize,
    /// Primary entries whose indexed values no longer matched the token
    pub refreshed_snapshots: usize,
    /// Principal memberships before the rebuild
    pub principal_entries_before: usize,
    /// Principal memberships after the rebuild
    pub principal_entries_after: usize,
    /// Expiration memberships before the rebuild
    pub expiration_entries_before: usize,
    /// Expiration memberships after the rebuild
    pub expiration_entries_after: usize,
}

impl RepairReport {
    /// Whether the repair changed anything
    pub fn is_clean(&self) -> bool {
        self.dropped_claims == 0
            && self.refreshed_snapshots == 0
            && self.principal_entries_before == self.principal_entries_after
            && self.expiration_entries_before == self.expiration_entries_after
    }
}

fn memberships<K, V>(index: &BTreeMap<K, std::collections::BTreeSet<V>>) -> usize {
    index.values().map(|members| members.len()).sum()
}

impl Indices {
    fn stats(&self) -> RegistryStats {
        RegistryStats {
            primary: self.primary.len(),
            expiration_slots: self.by_expiration.len(),
            principals: self.by_principal.len(),
        }
    }

    /// Drop ended claims and rebuild both secondary indices from `primary`.
    fn repair(&mut self, now: DateTime<Utc>) -> RepairReport {
        let mut report = RepairReport {
            principal_entries_before: memberships(&self.by_principal),
            expiration_entries_before: memberships(&self.by_expiration),
            ..RepairReport::default()
        };

        self.primary.retain(|_, entry| {
            let active = entry.token.is_active_at(now);
            if !active {
                report.dropped_claims += 1;
            }
            active
        });

        for entry in self.primary.values_mut() {
            let view = entry.token.view(now);
            if view.principals != entry.principals || view.expiration != entry.expiration {
                report.refreshed_snapshots += 1;
                entry.principals = view.principals;
                entry.expiration = view.expiration;
            }
        }

        self.by_principal.clear();
        self.by_expiration.clear();
        let entries: Vec<PrimaryEntry> = self.primary.values().cloned().collect();
        for entry in &entries {
            self.index(entry);
        }

        report.principal_entries_after = memberships(&self.by_principal);
        report.expiration_entries_after = memberships(&self.by_expiration);
        report
    }

    fn violations(&self) -> Vec<String> {
        let mut found = Vec::new();

        for (key, entry) in &self.primary {
            if entry.token.target() != key {
                found.push(format!(
                    "primary key {key} holds token {} for {}",
                    entry.token.id(),
                    entry.token.target()
                ));
            }
            for principal in &entry.principals {
                let indexed = self
                    .by_principal
                    .get(principal)
                    .is_some_and(|members| members.contains(&entry.token));
                if !indexed {
                    found.push(format!(
                        "token {} missing from principal index for {principal}",
                        entry.token.id()
                    ));
                }
            }
            if let Some(expiration) = entry.expiration {
                let indexed = self
                    .by_expiration
                    .get(&expiration)
                    .is_some_and(|members| members.contains(&entry.token));
                if !indexed {
                    found.push(format!(
                        "token {} missing from expiration index at {expiration}",
                        entry.token.id()
                    ));
                }
            }
        }

        for (principal, members) in &self.by_principal {
            if members.is_empty() {
                found.push(format!("empty principal slot for {principal}"));
            }
            for token in members {
                let backed = self.primary.get(token.target()).is_some_and(|entry| {
                    entry.token == *token && entry.principals.contains(principal)
                });
                if !backed {
                    found.push(format!(
                        "principal index lists token {} for {principal} without a primary entry",
                        token.id()
                    ));
                }
            }
        }

        for (at, members) in &self.by_expiration {
            if members.is_empty() {
                found.push(format!("empty expiration slot at {at}"));
            }
            for token in members {
                let backed = self
                    .primary
                    .get(token.target())
                    .is_some_and(|entry| entry.token == *token && entry.expiration == Some(*at));
                if !backed {
                    found.push(format!(
                        "expiration index lists token {} at {at} without a primary entry",
                        token.id()
                    ));
                }
            }
        }

        found
    }
}

impl TokenRegistry {
    /// Current index sizes
    pub fn stats(&self) -> RegistryStats {
        self.shared.indices.read().stats()
    }

    /// Drop every ended claim and rebuild the secondary indices.
    ///
    /// Safe to run at any time; a consistent registry reports a clean
    /// repair apart from claims that had simply expired.
    pub fn repair(&self) -> RepairReport {
        let report = {
            let mut indices = self.shared.indices.write();
            indices.repair(self.shared.clock.now())
        };
        if report.is_clean() {
            tracing::debug!("Registry repair found nothing to fix");
        } else {
            tracing::warn!(?report, "Registry repair rebuilt indices");
        }
        report
    }

    /// Describe every disagreement between the three indices.
    ///
    /// An empty list means the indices are mutually consistent.
    pub fn check_consistency(&self) -> Vec<String> {
        self.shared.indices.read().violations()
    }

    #[cfg(test)]
    pub(crate) fn corrupt_for_test(&self, f: impl FnOnce(&mut Indices)) {
        f(&mut self.shared.indices.write());
    }
}
