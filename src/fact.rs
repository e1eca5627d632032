//! Versioned fact store: the engine's view of externally observed ledger state.
//!
//! A fact is a `(kind, key) -> value` pair. Facts are immutable at a given
//! version; a new observation supersedes the old value under a new version,
//! never mutates history in place. Facts that were never observed are
//! *unknown*, and unknown is never coerced to a definite value; the matching
//! network evaluates it as a distinct third state.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::error::{Error, Result};
use crate::expr::{AccountId, PermissionId};

/// Canonical identity of a single observable fact.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FactKey {
    StakeOf {
        account: AccountId,
    },
    WeightSet {
        from: AccountId,
        to: AccountId,
    },
    WeightPowerFrom {
        from: AccountId,
        to: AccountId,
    },
    BlockNumber,
    PermissionExists {
        permission: PermissionId,
    },
    PermissionEnabled {
        permission: PermissionId,
    },
    DelegationDepth {
        permission: PermissionId,
    },
    OperationCount {
        permission: PermissionId,
    },
    Redelegated {
        permission: PermissionId,
        account: AccountId,
        percentage: u128,
    },
}

impl FactKey {
    /// Whether this key carries a boolean observation rather than a number.
    pub fn expects_flag(&self) -> bool {
        matches!(
            self,
            Self::PermissionExists { .. }
                | Self::PermissionEnabled { .. }
                | Self::Redelegated { .. }
        )
    }
}

impl fmt::Display for FactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StakeOf { account } => write!(f, "stake_of:{account}"),
            Self::WeightSet { from, to } => write!(f, "weight_set:{from}->{to}"),
            Self::WeightPowerFrom { from, to } => {
                write!(f, "weight_power_from:{from}->{to}")
            }
            Self::BlockNumber => write!(f, "block_number"),
            Self::PermissionExists { permission } => {
                write!(f, "permission_exists:{permission}")
            }
            Self::PermissionEnabled { permission } => {
                write!(f, "permission_enabled:{permission}")
            }
            Self::DelegationDepth { permission } => {
                write!(f, "delegation_depth:{permission}")
            }
            Self::OperationCount { permission } => {
                write!(f, "operation_count:{permission}")
            }
            Self::Redelegated {
                permission,
                account,
                percentage,
            } => write!(f, "redelegated:{permission}:{account}:{percentage}"),
        }
    }
}

/// An observed fact value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactValue {
    Uint(u128),
    Flag(bool),
}

impl FactValue {
    pub fn as_uint(self) -> Option<u128> {
        match self {
            Self::Uint(v) => Some(v),
            Self::Flag(_) => None,
        }
    }

    pub fn as_flag(self) -> Option<bool> {
        match self {
            Self::Flag(v) => Some(v),
            Self::Uint(_) => None,
        }
    }

    pub fn kind_matches(self, key: &FactKey) -> bool {
        match self {
            Self::Flag(_) => key.expects_flag(),
            Self::Uint(_) => !key.expects_flag(),
        }
    }
}

impl fmt::Display for FactValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uint(v) => write!(f, "{v}"),
            Self::Flag(v) => write!(f, "{v}"),
        }
    }
}

/// Monotonically increasing fact-store epoch. One version per applied update.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Version(u64);

impl Version {
    pub fn as_u64(self) -> u64 {
        self.0
    }

    #[cfg(test)]
    pub(crate) fn from_u64(v: u64) -> Self {
        Self(v)
    }

    fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A batch of `(key, value)` pairs observed atomically at one external
/// version, typically one ledger block.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FactUpdate {
    pub entries: Vec<(FactKey, FactValue)>,
}

impl FactUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, key: FactKey, value: FactValue) -> Self {
        self.entries.push((key, value));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Current snapshot of all observed facts plus its version.
#[derive(Debug, Default)]
pub struct FactStore {
    values: HashMap<FactKey, FactValue>,
    version: Version,
}

impl FactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn version(&self) -> Version {
        self.version
    }

    /// Current value of a fact; `None` means unknown (never observed).
    pub fn get(&self, key: &FactKey) -> Option<FactValue> {
        self.values.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &FactKey> {
        self.values.keys()
    }

    /// Apply one atomic batch of observations. The sole mutator.
    ///
    /// Returns the store version after the update and the keys whose value
    /// actually changed (superseding a fact with an equal value is not a
    /// change and triggers no propagation). Value kinds are validated before
    /// anything is written, so a bad batch leaves the store untouched.
    pub fn apply(&mut self, update: FactUpdate) -> Result<(Version, Vec<FactKey>)> {
        for (key, value) in &update.entries {
            if !value.kind_matches(key) {
                return Err(Error::TypeMismatch {
                    key: key.clone(),
                    expected: if key.expects_flag() { "flag" } else { "uint" },
                });
            }
        }

        if update.is_empty() {
            return Ok((self.version, Vec::new()));
        }

        self.version = self.version.next();
        let mut changed = Vec::new();
        for (key, value) in update.entries {
            let previous = self.values.insert(key.clone(), value);
            if previous != Some(value) {
                changed.push(key);
            }
        }
        Ok((self.version, changed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stake_key() -> FactKey {
        FactKey::StakeOf {
            account: "alice".into(),
        }
    }

    #[test]
    fn absent_fact_is_unknown() {
        let store = FactStore::new();
        assert_eq!(store.get(&stake_key()), None);
        assert_eq!(store.version().as_u64(), 0);
    }

    #[test]
    fn apply_bumps_version_and_reports_changes() {
        let mut store = FactStore::new();
        let (v1, changed) = store
            .apply(FactUpdate::new().set(stake_key(), FactValue::Uint(1500)))
            .unwrap();
        assert_eq!(v1.as_u64(), 1);
        assert_eq!(changed, vec![stake_key()]);
        assert_eq!(store.get(&stake_key()), Some(FactValue::Uint(1500)));

        // Re-observing the same value is a new version but not a change.
        let (v2, changed) = store
            .apply(FactUpdate::new().set(stake_key(), FactValue::Uint(1500)))
            .unwrap();
        assert_eq!(v2.as_u64(), 2);
        assert!(changed.is_empty());
    }

    #[test]
    fn empty_update_does_not_bump_version() {
        let mut store = FactStore::new();
        let (v, changed) = store.apply(FactUpdate::new()).unwrap();
        assert_eq!(v.as_u64(), 0);
        assert!(changed.is_empty());
    }

    #[test]
    fn kind_mismatch_is_rejected_atomically() {
        let mut store = FactStore::new();
        let bad = FactUpdate::new()
            .set(stake_key(), FactValue::Uint(10))
            .set(
                FactKey::PermissionExists {
                    permission: "0x01".into(),
                },
                FactValue::Uint(1),
            );
        assert!(matches!(
            store.apply(bad),
            Err(crate::error::Error::TypeMismatch { .. })
        ));
        // Nothing written, version untouched.
        assert!(store.is_empty());
        assert_eq!(store.version().as_u64(), 0);
    }
}
