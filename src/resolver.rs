//! Fact resolution: which facts an expression needs, and how to fetch them.
//!
//! Registration seeds the store with every fact the new expression reads so
//! a constraint over already-settled ledger state evaluates immediately
//! instead of waiting for the next observation. The ledger itself is behind
//! the [`ChainClient`] trait; the engine never talks to a node directly.

use std::collections::BTreeSet;
use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::expr::{BaseConstraint, BoolExpr, NumExpr, PermissionId};
use crate::fact::{FactKey, FactUpdate, FactValue};

/// Every fact key the expression reads, including the keys derived from the
/// governed permission by base predicates.
pub fn required_facts(expression: &BoolExpr, governed: &PermissionId) -> BTreeSet<FactKey> {
    let mut keys = BTreeSet::new();
    collect_bool(expression, governed, &mut keys);
    keys
}

fn collect_bool(expr: &BoolExpr, governed: &PermissionId, keys: &mut BTreeSet<FactKey>) {
    match expr {
        BoolExpr::Base { body } => collect_base(body, governed, keys),
        BoolExpr::Comp { left, right, .. } => {
            collect_num(left, keys);
            collect_num(right, keys);
        }
        BoolExpr::Not { body } => collect_bool(body, governed, keys),
        BoolExpr::And { left, right } | BoolExpr::Or { left, right } => {
            collect_bool(left, governed, keys);
            collect_bool(right, governed, keys);
        }
    }
}

fn collect_base(base: &BaseConstraint, governed: &PermissionId, keys: &mut BTreeSet<FactKey>) {
    match base {
        BaseConstraint::PermissionExists { pid } => {
            keys.insert(FactKey::PermissionExists {
                permission: pid.clone(),
            });
        }
        BaseConstraint::PermissionEnabled { pid } => {
            keys.insert(FactKey::PermissionEnabled {
                permission: pid.clone(),
            });
        }
        BaseConstraint::MaxDelegationDepth { depth } => {
            keys.insert(FactKey::DelegationDepth {
                permission: governed.clone(),
            });
            collect_num(depth, keys);
        }
        BaseConstraint::RateLimit {
            max_operations,
            period,
        } => {
            keys.insert(FactKey::OperationCount {
                permission: governed.clone(),
            });
            collect_num(max_operations, keys);
            collect_num(period, keys);
        }
        BaseConstraint::InactiveUnlessRedelegated {
            account,
            percentage,
        } => {
            keys.insert(FactKey::Redelegated {
                permission: governed.clone(),
                account: account.clone(),
                percentage: *percentage,
            });
        }
    }
}

fn collect_num(expr: &NumExpr, keys: &mut BTreeSet<FactKey>) {
    match expr {
        NumExpr::UintLiteral { .. } => {}
        NumExpr::BlockNumber => {
            keys.insert(FactKey::BlockNumber);
        }
        NumExpr::StakeOf { account } => {
            keys.insert(FactKey::StakeOf {
                account: account.clone(),
            });
        }
        NumExpr::WeightSet { from, to } => {
            keys.insert(FactKey::WeightSet {
                from: from.clone(),
                to: to.clone(),
            });
        }
        NumExpr::WeightPowerFrom { from, to } => {
            keys.insert(FactKey::WeightPowerFrom {
                from: from.clone(),
                to: to.clone(),
            });
        }
        NumExpr::Add { left, right } | NumExpr::Sub { left, right } => {
            collect_num(left, keys);
            collect_num(right, keys);
        }
    }
}

/// Read access to settled ledger state.
///
/// Implementations answer point queries for single facts. Failures are
/// per-key; a missing or unfetchable fact leaves the corresponding network
/// input unknown rather than failing the whole registration.
pub trait ChainClient {
    /// Fetch the current value of one fact.
    fn fetch(&self, key: &FactKey) -> Result<FactValue>;

    /// Fetch a batch, skipping keys that are individually unavailable (the
    /// corresponding facts stay unknown). Fails only when the upstream itself
    /// errored and nothing could be fetched at all.
    fn fetch_batch(&self, keys: &[FactKey]) -> Result<Vec<(FactKey, FactValue)>> {
        let mut fetched = Vec::with_capacity(keys.len());
        let mut upstream_error = None;
        for key in keys {
            match self.fetch(key) {
                Ok(value) => fetched.push((key.clone(), value)),
                Err(error @ Error::FactUnavailable { .. }) => {
                    tracing::warn!(fact = %key, %error, "fact unavailable, leaving unknown");
                }
                Err(error) => {
                    tracing::warn!(fact = %key, %error, "fact fetch failed");
                    upstream_error = Some(error);
                }
            }
        }
        match (fetched.is_empty(), upstream_error) {
            (true, Some(error)) => Err(Error::Upstream(error.to_string())),
            _ => Ok(fetched),
        }
    }
}

/// Resolve every fact an expression needs into one atomic update.
///
/// Keys the client cannot answer are simply absent from the update and stay
/// unknown in the store.
pub fn resolve_facts<C: ChainClient + ?Sized>(
    client: &C,
    expression: &BoolExpr,
    governed: &PermissionId,
) -> Result<FactUpdate> {
    let keys: Vec<FactKey> = required_facts(expression, governed).into_iter().collect();
    let fetched = client.fetch_batch(&keys)?;
    let mut update = FactUpdate::new();
    for (key, value) in fetched {
        update = update.set(key, value);
    }
    Ok(update)
}

/// In-memory client over a fixed fact table. Answers what it holds and
/// reports everything else unavailable.
#[derive(Debug, Default, Clone)]
pub struct StaticChainClient {
    facts: HashMap<FactKey, FactValue>,
}

impl StaticChainClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: FactKey, value: FactValue) -> Self {
        self.facts.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: FactKey, value: FactValue) {
        self.facts.insert(key, value);
    }
}

impl ChainClient for StaticChainClient {
    fn fetch(&self, key: &FactKey) -> Result<FactValue> {
        self.facts
            .get(key)
            .copied()
            .ok_or_else(|| Error::FactUnavailable { key: key.clone() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::CompOp;

    #[test]
    fn extraction_covers_nested_numeric_leaves() {
        let expr = BoolExpr::comp(
            CompOp::Gte,
            NumExpr::add(NumExpr::stake_of("alice"), NumExpr::stake_of("bob")),
            NumExpr::literal(3000),
        );
        let keys = required_facts(&expr, &"0x01".into());
        assert_eq!(keys.len(), 2);
        assert!(keys.contains(&FactKey::StakeOf {
            account: "alice".into()
        }));
        assert!(keys.contains(&FactKey::StakeOf {
            account: "bob".into()
        }));
    }

    #[test]
    fn base_predicates_derive_keys_from_governed_permission() {
        let governed: PermissionId = "0xgov".into();
        let expr = BoolExpr::and(
            BoolExpr::base(BaseConstraint::MaxDelegationDepth {
                depth: NumExpr::literal(3),
            }),
            BoolExpr::base(BaseConstraint::RateLimit {
                max_operations: NumExpr::literal(10),
                period: NumExpr::BlockNumber,
            }),
        );
        let keys = required_facts(&expr, &governed);
        assert!(keys.contains(&FactKey::DelegationDepth {
            permission: governed.clone()
        }));
        assert!(keys.contains(&FactKey::OperationCount {
            permission: governed
        }));
        // The fact-dependent period pulls in the block number.
        assert!(keys.contains(&FactKey::BlockNumber));
    }

    #[test]
    fn duplicate_leaves_extract_once() {
        let expr = BoolExpr::or(
            BoolExpr::comp(
                CompOp::Gte,
                NumExpr::stake_of("alice"),
                NumExpr::literal(1000),
            ),
            BoolExpr::comp(
                CompOp::Lt,
                NumExpr::stake_of("alice"),
                NumExpr::literal(100),
            ),
        );
        assert_eq!(required_facts(&expr, &"0x01".into()).len(), 1);
    }

    #[test]
    fn batch_fetch_skips_individually_missing_keys() {
        let client = StaticChainClient::new().with(
            FactKey::StakeOf {
                account: "alice".into(),
            },
            FactValue::Uint(1500),
        );
        let keys = vec![
            FactKey::StakeOf {
                account: "alice".into(),
            },
            FactKey::StakeOf {
                account: "bob".into(),
            },
        ];
        let fetched = client.fetch_batch(&keys).unwrap();
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[0].1, FactValue::Uint(1500));
    }

    #[test]
    fn unavailable_facts_do_not_fail_the_batch() {
        // A fact the chain has no value for stays unknown; the batch itself
        // still succeeds.
        let client = StaticChainClient::new();
        assert!(client.fetch_batch(&[FactKey::BlockNumber]).unwrap().is_empty());
        assert!(client.fetch_batch(&[]).unwrap().is_empty());
    }

    #[test]
    fn total_upstream_failure_fails_the_batch() {
        struct DownClient;
        impl ChainClient for DownClient {
            fn fetch(&self, _key: &FactKey) -> Result<FactValue> {
                Err(Error::Upstream("connection refused".to_owned()))
            }
        }
        assert!(matches!(
            DownClient.fetch_batch(&[FactKey::BlockNumber]),
            Err(Error::Upstream(_))
        ));
    }

    #[test]
    fn resolve_facts_builds_one_update() {
        let client = StaticChainClient::new().with(
            FactKey::StakeOf {
                account: "alice".into(),
            },
            FactValue::Uint(1500),
        );
        let expr = BoolExpr::comp(
            CompOp::Gte,
            NumExpr::stake_of("alice"),
            NumExpr::literal(1000),
        );
        let update = resolve_facts(&client, &expr, &"0x01".into()).unwrap();
        assert_eq!(update.len(), 1);
    }
}
