//! Constraint registry: definitions, identities, and activation history.
//!
//! A constraint's identity is distinct from its node in the matching
//! network. The `ConstraintId` is derived deterministically from the
//! governed permission and the expression content, so registering the same
//! constraint twice resolves to the same identity; the `ProductionId` names
//! the evaluation node and is freshly minted per production.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::fmt::Write as _;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::expr::{BoolExpr, PermissionId};
use crate::fact::Version;

/// Prefix for content-derived constraint identifiers.
pub const CONSTRAINT_ID_PREFIX: &str = "ct_";

/// Prefix for production node identifiers.
pub const PRODUCTION_ID_PREFIX: &str = "prd_";

/// Deterministic identity of a constraint definition.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConstraintId(String);

impl ConstraintId {
    /// Derive the id from the governed permission and the expression's
    /// canonical signature. Identical `(permission, expression)` pairs map
    /// to the same id; any structural difference yields a different one.
    pub fn derive(governed: &PermissionId, expression: &BoolExpr) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(governed.as_str().as_bytes());
        hasher.update(b"|");
        hasher.update(expression.signature().as_bytes());
        let digest = hasher.finalize();
        let mut hex = String::with_capacity(16);
        for byte in &digest[..8] {
            let _ = write!(hex, "{byte:02x}");
        }
        Self(format!("{CONSTRAINT_ID_PREFIX}{hex}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConstraintId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a production node in the matching network.
///
/// Time-ordered (UUIDv7) so production ids sort by creation, which keeps
/// introspector output and history listings chronological.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProductionId(String);

impl ProductionId {
    pub fn new() -> Self {
        Self(format!("{PRODUCTION_ID_PREFIX}{}", Uuid::now_v7().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ProductionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ProductionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A registered constraint, owned by the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConstraintDefinition {
    pub constraint_id: ConstraintId,
    pub governed_permission_id: PermissionId,
    pub expression: BoolExpr,
    pub created_at: DateTime<Utc>,
}

/// One activation transition, appended when a production's externally
/// reported `activated` flag flips, never on mere re-evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivationEvent {
    pub production_id: ProductionId,
    pub activated: bool,
    pub at_version: Version,
    pub at_timestamp: DateTime<Utc>,
}

/// Maps constraint identities to productions and records activation history.
///
/// History is append-only and survives constraint removal; removing a
/// constraint deletes its definition but not the audit trail.
#[derive(Debug, Default)]
pub struct ConstraintRegistry {
    definitions: BTreeMap<ConstraintId, ConstraintDefinition>,
    bindings: BTreeMap<ConstraintId, ProductionId>,
    history: BTreeMap<ProductionId, Vec<ActivationEvent>>,
}

impl ConstraintRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, definition: ConstraintDefinition, production_id: ProductionId) {
        self.bindings
            .insert(definition.constraint_id.clone(), production_id);
        self.definitions
            .insert(definition.constraint_id.clone(), definition);
    }

    pub fn definition(&self, id: &ConstraintId) -> Option<&ConstraintDefinition> {
        self.definitions.get(id)
    }

    pub fn production_of(&self, id: &ConstraintId) -> Option<&ProductionId> {
        self.bindings.get(id)
    }

    pub fn contains(&self, id: &ConstraintId) -> bool {
        self.definitions.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// All constraint ids guarding a given permission.
    pub fn by_permission(&self, permission: &PermissionId) -> Vec<&ConstraintId> {
        self.definitions
            .values()
            .filter(|d| &d.governed_permission_id == permission)
            .map(|d| &d.constraint_id)
            .collect()
    }

    /// Append a transition to the history log.
    ///
    /// Enforces the history invariants: versions strictly increase per
    /// production, and consecutive entries always differ in `activated`
    /// (a duplicate is dropped rather than recorded twice).
    pub fn append_event(&mut self, event: ActivationEvent) -> Result<()> {
        let log = self.history.entry(event.production_id.clone()).or_default();
        if let Some(last) = log.last() {
            if last.activated == event.activated {
                return Ok(());
            }
            if event.at_version <= last.at_version {
                return Err(Error::Invariant(format!(
                    "activation history for {} went backwards (version {} after {})",
                    event.production_id, event.at_version, last.at_version
                )));
            }
        }
        log.push(event);
        Ok(())
    }

    /// The ordered activation log for a production. Empty if no transition
    /// has been recorded yet.
    pub fn history(&self, production_id: &ProductionId) -> &[ActivationEvent] {
        self.history
            .get(production_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Drop a constraint's definition, keeping its binding and history so
    /// past activations remain queryable.
    pub fn remove_definition(&mut self, id: &ConstraintId) -> Option<ConstraintDefinition> {
        self.definitions.remove(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{CompOp, NumExpr};

    fn guard() -> BoolExpr {
        BoolExpr::comp(
            CompOp::Gte,
            NumExpr::stake_of("alice"),
            NumExpr::literal(1000),
        )
    }

    #[test]
    fn constraint_id_is_deterministic_and_content_sensitive() {
        let pid: PermissionId = "0x01".into();
        let a = ConstraintId::derive(&pid, &guard());
        let b = ConstraintId::derive(&pid, &guard());
        assert_eq!(a, b);
        assert!(a.as_str().starts_with(CONSTRAINT_ID_PREFIX));

        let other_pid = ConstraintId::derive(&"0x02".into(), &guard());
        assert_ne!(a, other_pid);

        let other_expr = ConstraintId::derive(
            &pid,
            &BoolExpr::comp(
                CompOp::Gt,
                NumExpr::stake_of("alice"),
                NumExpr::literal(1000),
            ),
        );
        assert_ne!(a, other_expr);
    }

    #[test]
    fn production_ids_are_unique_and_prefixed() {
        let a = ProductionId::new();
        let b = ProductionId::new();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with(PRODUCTION_ID_PREFIX));
    }

    #[test]
    fn history_rejects_version_regressions_and_drops_duplicates() {
        let mut registry = ConstraintRegistry::new();
        let prod = ProductionId::new();
        let event = |activated: bool, version: u64| ActivationEvent {
            production_id: prod.clone(),
            activated,
            at_version: Version::from_u64(version),
            at_timestamp: Utc::now(),
        };

        registry.append_event(event(true, 1)).unwrap();
        // Duplicate consecutive state is dropped silently.
        registry.append_event(event(true, 2)).unwrap();
        assert_eq!(registry.history(&prod).len(), 1);

        registry.append_event(event(false, 3)).unwrap();
        assert_eq!(registry.history(&prod).len(), 2);

        // A transition at an older version violates the ordering invariant.
        assert!(registry.append_event(event(true, 2)).is_err());
    }
}
