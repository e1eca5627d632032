//! Expression model: typed ASTs for the guard condition language.
//!
//! Expressions are pure data. Two trees are equal iff their structure and
//! literal operands are equal, and `Hash` is consistent with `Eq` so trees
//! can key deduplication maps. Evaluation lives in the matching network
//! ([`crate::rete`]), not here, so an expression is compiled once and matched
//! incrementally instead of interpreted from scratch on every fact update.
//!
//! The JSON encoding uses a `$` discriminant on every variant:
//!
//! ```json
//! { "$": "Comp", "op": "Gte",
//!   "left":  { "$": "StakeOf", "account": "alice" },
//!   "right": { "$": "UintLiteral", "value": 1000 } }
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::DefinitionError;
use crate::MAX_EXPR_DEPTH;

/// An on-chain account address.
///
/// Treated as opaque. Canonical signatures join identifiers with `(`, `)`,
/// `,` and `:` delimiters without escaping, so ids are assumed not to
/// contain those characters; ledger addresses (hex, SS58, base58) never do.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AccountId(String);

impl AccountId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for AccountId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for AccountId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a permission in the delegation network.
///
/// Opaque, with the same delimiter assumption as [`AccountId`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PermissionId(String);

impl PermissionId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PermissionId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for PermissionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for PermissionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Comparison operators over integer fact values.
///
/// Evaluation is exact; stake amounts and counters are integral on-chain
/// quantities, so no floating point is involved anywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompOp {
    Gte,
    Gt,
    Lte,
    Lt,
    Eq,
    Neq,
}

impl CompOp {
    pub fn compare(self, left: i128, right: i128) -> bool {
        match self {
            Self::Gte => left >= right,
            Self::Gt => left > right,
            Self::Lte => left <= right,
            Self::Lt => left < right,
            Self::Eq => left == right,
            Self::Neq => left != right,
        }
    }

    /// Lowercase key used in canonical signatures.
    pub fn key(self) -> &'static str {
        match self {
            Self::Gte => "gte",
            Self::Gt => "gt",
            Self::Lte => "lte",
            Self::Lt => "lt",
            Self::Eq => "eq",
            Self::Neq => "neq",
        }
    }
}

/// Numeric expression tree.
///
/// Fact sources (`StakeOf`, `BlockNumber`, weight queries) are modeled
/// uniformly as references into the fact store; only `UintLiteral` carries an
/// inline value and is therefore never unknown.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "$")]
pub enum NumExpr {
    UintLiteral {
        value: u128,
    },
    BlockNumber,
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
    Add {
        left: Box<NumExpr>,
        right: Box<NumExpr>,
    },
    Sub {
        left: Box<NumExpr>,
        right: Box<NumExpr>,
    },
}

impl NumExpr {
    pub fn literal(value: u128) -> Self {
        Self::UintLiteral { value }
    }

    pub fn stake_of(account: impl Into<AccountId>) -> Self {
        Self::StakeOf {
            account: account.into(),
        }
    }

    pub fn add(left: NumExpr, right: NumExpr) -> Self {
        Self::Add {
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn sub(left: NumExpr, right: NumExpr) -> Self {
        Self::Sub {
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Canonical signature; identical sub-expressions render identically,
    /// which is what the network's node interning keys on.
    pub fn signature(&self) -> String {
        match self {
            Self::UintLiteral { value } => format!("lit({value})"),
            Self::BlockNumber => "block_number".to_owned(),
            Self::StakeOf { account } => format!("stake_of({account})"),
            Self::WeightSet { from, to } => format!("weight_set({from},{to})"),
            Self::WeightPowerFrom { from, to } => {
                format!("weight_power_from({from},{to})")
            }
            Self::Add { left, right } => {
                format!("add({},{})", left.signature(), right.signature())
            }
            Self::Sub { left, right } => {
                format!("sub({},{})", left.signature(), right.signature())
            }
        }
    }

    pub fn depth(&self) -> usize {
        match self {
            Self::UintLiteral { .. }
            | Self::BlockNumber
            | Self::StakeOf { .. }
            | Self::WeightSet { .. }
            | Self::WeightPowerFrom { .. } => 1,
            Self::Add { left, right } | Self::Sub { left, right } => {
                1 + left.depth().max(right.depth())
            }
        }
    }

    /// Value of the expression if it depends on no facts. Checked arithmetic;
    /// an overflowing constant folds to `None` rather than wrapping.
    pub fn static_value(&self) -> Option<i128> {
        match self {
            Self::UintLiteral { value } => i128::try_from(*value).ok(),
            Self::Add { left, right } => {
                left.static_value()?.checked_add(right.static_value()?)
            }
            Self::Sub { left, right } => {
                left.static_value()?.checked_sub(right.static_value()?)
            }
            _ => None,
        }
    }
}

/// The closed set of base predicates about a governed permission.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "$")]
pub enum BaseConstraint {
    PermissionExists {
        pid: PermissionId,
    },
    PermissionEnabled {
        pid: PermissionId,
    },
    /// The governed permission's delegation depth must not exceed `depth`.
    MaxDelegationDepth {
        depth: NumExpr,
    },
    /// The governed permission's operation count in the current window must
    /// not exceed `max_operations`. `period` (in blocks) defines the window
    /// and must resolve to a positive value.
    RateLimit {
        max_operations: NumExpr,
        period: NumExpr,
    },
    /// Holds only while the permission is redelegated to `account` with at
    /// least `percentage` of the delegation stream.
    InactiveUnlessRedelegated {
        account: AccountId,
        percentage: u128,
    },
}

impl BaseConstraint {
    pub fn signature(&self) -> String {
        match self {
            Self::PermissionExists { pid } => format!("permission_exists({pid})"),
            Self::PermissionEnabled { pid } => format!("permission_enabled({pid})"),
            Self::MaxDelegationDepth { depth } => {
                format!("max_delegation_depth({})", depth.signature())
            }
            Self::RateLimit {
                max_operations,
                period,
            } => format!(
                "rate_limit({},{})",
                max_operations.signature(),
                period.signature()
            ),
            Self::InactiveUnlessRedelegated {
                account,
                percentage,
            } => format!("inactive_unless_redelegated({account},{percentage})"),
        }
    }

    fn depth(&self) -> usize {
        match self {
            Self::PermissionExists { .. }
            | Self::PermissionEnabled { .. }
            | Self::InactiveUnlessRedelegated { .. } => 1,
            Self::MaxDelegationDepth { depth } => 1 + depth.depth(),
            Self::RateLimit {
                max_operations,
                period,
            } => 1 + max_operations.depth().max(period.depth()),
        }
    }
}

/// Boolean expression tree: the guard condition itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "$")]
pub enum BoolExpr {
    Base {
        body: BaseConstraint,
    },
    Comp {
        op: CompOp,
        left: NumExpr,
        right: NumExpr,
    },
    Not {
        body: Box<BoolExpr>,
    },
    And {
        left: Box<BoolExpr>,
        right: Box<BoolExpr>,
    },
    Or {
        left: Box<BoolExpr>,
        right: Box<BoolExpr>,
    },
}

impl BoolExpr {
    pub fn base(body: BaseConstraint) -> Self {
        Self::Base { body }
    }

    pub fn comp(op: CompOp, left: NumExpr, right: NumExpr) -> Self {
        Self::Comp { op, left, right }
    }

    pub fn not(body: BoolExpr) -> Self {
        Self::Not {
            body: Box::new(body),
        }
    }

    pub fn and(left: BoolExpr, right: BoolExpr) -> Self {
        Self::And {
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn or(left: BoolExpr, right: BoolExpr) -> Self {
        Self::Or {
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn signature(&self) -> String {
        match self {
            Self::Base { body } => body.signature(),
            Self::Comp { op, left, right } => format!(
                "cmp[{}]({},{})",
                op.key(),
                left.signature(),
                right.signature()
            ),
            Self::Not { body } => format!("not({})", body.signature()),
            Self::And { left, right } => {
                format!("and({},{})", left.signature(), right.signature())
            }
            Self::Or { left, right } => {
                format!("or({},{})", left.signature(), right.signature())
            }
        }
    }

    pub fn depth(&self) -> usize {
        match self {
            Self::Base { body } => body.depth(),
            Self::Comp { left, right, .. } => 1 + left.depth().max(right.depth()),
            Self::Not { body } => 1 + body.depth(),
            Self::And { left, right } | Self::Or { left, right } => {
                1 + left.depth().max(right.depth())
            }
        }
    }

    /// Definition-time validation. Runs before the expression touches the
    /// matching network; a rejected expression is never compiled.
    pub fn validate(&self) -> Result<(), DefinitionError> {
        let depth = self.depth();
        if depth > MAX_EXPR_DEPTH {
            return Err(DefinitionError::ExpressionTooDeep {
                depth,
                max: MAX_EXPR_DEPTH,
            });
        }
        self.validate_inner()
    }

    fn validate_inner(&self) -> Result<(), DefinitionError> {
        match self {
            Self::Base {
                body: BaseConstraint::RateLimit { period, .. },
            } => {
                // A statically evaluable period must be positive. A
                // fact-dependent period is accepted and must resolve
                // positive before the constraint can activate.
                if let Some(value) = period.static_value() {
                    if value <= 0 {
                        return Err(DefinitionError::NonPositiveRateLimitPeriod {
                            value,
                        });
                    }
                }
                Ok(())
            }
            Self::Base { .. } | Self::Comp { .. } => Ok(()),
            Self::Not { body } => body.validate_inner(),
            Self::And { left, right } | Self::Or { left, right } => {
                left.validate_inner()?;
                right.validate_inner()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn stake_guard() -> BoolExpr {
        BoolExpr::comp(
            CompOp::Gte,
            NumExpr::stake_of("alice"),
            NumExpr::literal(1000),
        )
    }

    #[test]
    fn structural_equality_and_hash() {
        let a = stake_guard();
        let b = stake_guard();
        assert_eq!(a, b);

        let mut map = HashMap::new();
        map.insert(a, 1);
        assert_eq!(map.get(&b), Some(&1));
    }

    #[test]
    fn signatures_are_canonical() {
        assert_eq!(
            stake_guard().signature(),
            "cmp[gte](stake_of(alice),lit(1000))"
        );
        let nested = BoolExpr::and(
            stake_guard(),
            BoolExpr::base(BaseConstraint::PermissionEnabled {
                pid: "0xab".into(),
            }),
        );
        assert_eq!(
            nested.signature(),
            "and(cmp[gte](stake_of(alice),lit(1000)),permission_enabled(0xab))"
        );
    }

    #[test]
    fn serde_uses_dollar_tag() {
        let json = serde_json::to_value(stake_guard()).unwrap();
        assert_eq!(json["$"], "Comp");
        assert_eq!(json["left"]["$"], "StakeOf");
        assert_eq!(json["left"]["account"], "alice");
        assert_eq!(json["right"]["value"], 1000);

        let back: BoolExpr = serde_json::from_value(json).unwrap();
        assert_eq!(back, stake_guard());
    }

    #[test]
    fn non_positive_rate_limit_period_is_rejected() {
        let expr = BoolExpr::base(BaseConstraint::RateLimit {
            max_operations: NumExpr::literal(10),
            period: NumExpr::literal(0),
        });
        assert_eq!(
            expr.validate(),
            Err(DefinitionError::NonPositiveRateLimitPeriod { value: 0 })
        );

        let negative = BoolExpr::base(BaseConstraint::RateLimit {
            max_operations: NumExpr::literal(10),
            period: NumExpr::sub(NumExpr::literal(5), NumExpr::literal(9)),
        });
        assert_eq!(
            negative.validate(),
            Err(DefinitionError::NonPositiveRateLimitPeriod { value: -4 })
        );
    }

    #[test]
    fn fact_dependent_period_is_accepted() {
        let expr = BoolExpr::base(BaseConstraint::RateLimit {
            max_operations: NumExpr::literal(10),
            period: NumExpr::BlockNumber,
        });
        assert!(expr.validate().is_ok());
    }

    #[test]
    fn depth_limit_is_enforced() {
        let mut expr = stake_guard();
        for _ in 0..MAX_EXPR_DEPTH {
            expr = BoolExpr::not(expr);
        }
        assert!(matches!(
            expr.validate(),
            Err(DefinitionError::ExpressionTooDeep { .. })
        ));
    }

    #[test]
    fn static_value_folds_literal_arithmetic() {
        let expr = NumExpr::sub(
            NumExpr::add(NumExpr::literal(10), NumExpr::literal(5)),
            NumExpr::literal(3),
        );
        assert_eq!(expr.static_value(), Some(12));
        assert_eq!(NumExpr::stake_of("a").static_value(), None);
    }
}
