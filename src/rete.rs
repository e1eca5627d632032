//! Incremental matching network for constraint expressions.
//!
//! Expressions are compiled once into a dataflow graph of interned nodes.
//! Alpha nodes read single facts from the store; beta nodes combine the
//! outputs of other nodes. Structurally identical sub-expressions compile to
//! the same node, so a fact shared by many constraints is stored and
//! re-evaluated exactly once. When facts change, only the subgraph reachable
//! from the touched alpha nodes is recomputed.
//!
//! Boolean state is three-valued: a node backed by a fact that was never
//! observed is [`Truth::Unknown`], and unknown propagates through the graph
//! under Kleene semantics. A production only counts as activated when its
//! root is definitely `True`; unknown is never collapsed to false.
//!
//! The node arena is append-only. Freed slots stay empty forever, which
//! guarantees that a node's id is always greater than the ids of the nodes it
//! reads from. Propagation walks pending nodes in ascending id order and
//! therefore visits every node after all of its inputs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use crate::error::{Error, Result};
use crate::expr::{BaseConstraint, BoolExpr, CompOp, NumExpr, PermissionId};
use crate::fact::{FactKey, FactStore, FactValue, Version};
use crate::registry::{ActivationEvent, ConstraintId, ProductionId};

/// Three-valued boolean under Kleene semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Truth {
    True,
    False,
    Unknown,
}

impl Truth {
    pub fn from_bool(value: bool) -> Self {
        if value {
            Self::True
        } else {
            Self::False
        }
    }

    pub fn is_true(self) -> bool {
        self == Self::True
    }

    /// `False` dominates: one definitely-false input decides the conjunction
    /// even if the other is unknown.
    pub fn and(self, other: Self) -> Self {
        match (self, other) {
            (Self::False, _) | (_, Self::False) => Self::False,
            (Self::True, Self::True) => Self::True,
            _ => Self::Unknown,
        }
    }

    /// `True` dominates, dually to [`Truth::and`].
    pub fn or(self, other: Self) -> Self {
        match (self, other) {
            (Self::True, _) | (_, Self::True) => Self::True,
            (Self::False, Self::False) => Self::False,
            _ => Self::Unknown,
        }
    }

    /// Negation of unknown stays unknown.
    pub fn not(self) -> Self {
        match self {
            Self::True => Self::False,
            Self::False => Self::True,
            Self::Unknown => Self::Unknown,
        }
    }
}

impl fmt::Display for Truth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::True => write!(f, "true"),
            Self::False => write!(f, "false"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Externally reported evaluation state of a constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationStatus {
    Satisfied,
    Violated,
    Unknown,
}

impl From<Truth> for EvaluationStatus {
    fn from(truth: Truth) -> Self {
        match truth {
            Truth::True => Self::Satisfied,
            Truth::False => Self::Violated,
            Truth::Unknown => Self::Unknown,
        }
    }
}

impl fmt::Display for EvaluationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Satisfied => write!(f, "satisfied"),
            Self::Violated => write!(f, "violated"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Index of a node in the network arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(usize);

impl NodeId {
    pub fn as_usize(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Arithmetic join operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArithOp {
    Add,
    Sub,
}

impl ArithOp {
    fn key(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Sub => "sub",
        }
    }

    /// Checked evaluation; overflow yields unknown rather than wrapping.
    fn apply(self, left: i128, right: i128) -> Option<i128> {
        match self {
            Self::Add => left.checked_add(right),
            Self::Sub => left.checked_sub(right),
        }
    }
}

/// What a node computes. Children are identified by arena id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    /// Constant numeric value; never unknown.
    Literal(u128),
    /// Numeric fact read from the store.
    NumFact(FactKey),
    /// Boolean fact read from the store.
    BoolFact(FactKey),
    Arith {
        op: ArithOp,
        left: NodeId,
        right: NodeId,
    },
    Compare {
        op: CompOp,
        left: NodeId,
        right: NodeId,
    },
    And {
        left: NodeId,
        right: NodeId,
    },
    Or {
        left: NodeId,
        right: NodeId,
    },
    Not {
        body: NodeId,
    },
}

impl NodeKind {
    /// Alpha nodes are the leaves: literals and single-fact reads.
    pub fn is_alpha(&self) -> bool {
        matches!(
            self,
            Self::Literal(_) | Self::NumFact(_) | Self::BoolFact(_)
        )
    }

    fn fact_key(&self) -> Option<&FactKey> {
        match self {
            Self::NumFact(key) | Self::BoolFact(key) => Some(key),
            _ => None,
        }
    }

    fn children(&self) -> Vec<NodeId> {
        match self {
            Self::Literal(_) | Self::NumFact(_) | Self::BoolFact(_) => Vec::new(),
            Self::Arith { left, right, .. }
            | Self::Compare { left, right, .. }
            | Self::And { left, right }
            | Self::Or { left, right } => vec![*left, *right],
            Self::Not { body } => vec![*body],
        }
    }
}

/// Cached output of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// `None` is the numeric unknown (missing fact or overflow).
    Num(Option<i128>),
    Bool(Truth),
}

/// One node in the network arena.
#[derive(Debug)]
pub struct Node {
    kind: NodeKind,
    signature: String,
    /// Nodes that read this node's output. Always higher ids.
    dependents: Vec<NodeId>,
    /// Incoming edges: dependents plus productions rooted here.
    refs: usize,
    state: NodeState,
}

impl Node {
    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn signature(&self) -> &str {
        &self.signature
    }

    pub fn refs(&self) -> usize {
        self.refs
    }

    pub fn state(&self) -> NodeState {
        self.state
    }
}

/// A registered constraint's root in the network.
#[derive(Debug)]
pub struct Production {
    production_id: ProductionId,
    constraint_id: ConstraintId,
    root: NodeId,
    activated: bool,
}

impl Production {
    pub fn production_id(&self) -> &ProductionId {
        &self.production_id
    }

    pub fn constraint_id(&self) -> &ConstraintId {
        &self.constraint_id
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn activated(&self) -> bool {
        self.activated
    }
}

/// Aggregate shape of the network, for health reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkStats {
    pub node_count: usize,
    pub alpha_count: usize,
    pub beta_count: usize,
    pub production_count: usize,
    pub subscribed_fact_count: usize,
}

/// The discrimination network.
#[derive(Debug, Default)]
pub struct ReteNetwork {
    /// Append-only arena; freed slots stay `None` so ids keep their
    /// topological meaning.
    nodes: Vec<Option<Node>>,
    /// Canonical signature -> live node, for structural sharing.
    interned: HashMap<String, NodeId>,
    /// Fact key -> alpha nodes reading it.
    subscriptions: HashMap<FactKey, Vec<NodeId>>,
    productions: BTreeMap<ProductionId, Production>,
}

impl ReteNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile an expression and register a production rooted at its top
    /// node. The production starts deactivated; call
    /// [`ReteNetwork::refresh_productions`] after seeding facts to pick up
    /// an initial transition.
    pub fn add_production(
        &mut self,
        production_id: ProductionId,
        constraint_id: ConstraintId,
        expression: &BoolExpr,
        governed: &PermissionId,
        store: &FactStore,
    ) -> NodeId {
        let root = self.compile_bool(expression, governed, store);
        if let Some(node) = self.nodes[root.0].as_mut() {
            node.refs += 1;
        }
        self.productions.insert(
            production_id.clone(),
            Production {
                production_id,
                constraint_id,
                root,
                activated: false,
            },
        );
        root
    }

    /// Detach a production and release its subgraph. Nodes shared with other
    /// productions survive; exclusively-owned nodes are freed. Returns
    /// whether the production existed.
    pub fn remove_production(&mut self, production_id: &ProductionId) -> Result<bool> {
        let Some(production) = self.productions.remove(production_id) else {
            return Ok(false);
        };
        self.release(production.root)?;
        Ok(true)
    }

    pub fn production(&self, production_id: &ProductionId) -> Option<&Production> {
        self.productions.get(production_id)
    }

    pub fn productions(&self) -> impl Iterator<Item = &Production> {
        self.productions.values()
    }

    /// Current truth of a production's root expression.
    pub fn truth_of(&self, production_id: &ProductionId) -> Option<Truth> {
        let production = self.productions.get(production_id)?;
        Some(self.bool_state(production.root))
    }

    /// Re-evaluate the subgraph downstream of the given fact keys. Returns
    /// the ids of nodes whose cached state changed.
    pub fn propagate(&mut self, changed: &[FactKey], store: &FactStore) -> BTreeSet<NodeId> {
        let mut queue: BTreeSet<NodeId> = BTreeSet::new();
        for key in changed {
            if let Some(subscribers) = self.subscriptions.get(key) {
                queue.extend(subscribers.iter().copied());
            }
        }

        let mut dirty = BTreeSet::new();
        // Ascending id order: every node is visited after all of its inputs.
        while let Some(id) = queue.pop_first() {
            let Some(kind) = self.nodes[id.0].as_ref().map(|n| n.kind.clone()) else {
                continue;
            };
            let new_state = self.eval_kind(&kind, store);
            if let Some(node) = self.nodes[id.0].as_mut() {
                if node.state != new_state {
                    node.state = new_state;
                    dirty.insert(id);
                    queue.extend(node.dependents.iter().copied());
                }
            }
        }
        dirty
    }

    /// Reconcile every production's `activated` flag with its root truth,
    /// returning one event per flip. No event is emitted for a production
    /// whose flag did not change.
    pub fn refresh_productions(
        &mut self,
        at_version: Version,
        at_timestamp: DateTime<Utc>,
    ) -> Vec<ActivationEvent> {
        let snapshot: Vec<(ProductionId, NodeId, bool)> = self
            .productions
            .values()
            .map(|p| (p.production_id.clone(), p.root, p.activated))
            .collect();

        let mut events = Vec::new();
        for (production_id, root, was_activated) in snapshot {
            let activated = self.bool_state(root).is_true();
            if activated == was_activated {
                continue;
            }
            if let Some(production) = self.productions.get_mut(&production_id) {
                production.activated = activated;
            }
            tracing::debug!(
                production = %production_id,
                activated,
                version = %at_version,
                "production transitioned"
            );
            events.push(ActivationEvent {
                production_id,
                activated,
                at_version,
                at_timestamp,
            });
        }
        events
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0).and_then(Option::as_ref)
    }

    /// Whether any live alpha node still reads this fact.
    pub fn is_subscribed(&self, key: &FactKey) -> bool {
        self.subscriptions.contains_key(key)
    }

    /// All live nodes in ascending id order.
    pub fn live_nodes(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|n| (NodeId(i), n)))
    }

    pub fn stats(&self) -> NetworkStats {
        let mut alpha_count = 0;
        let mut beta_count = 0;
        for (_, node) in self.live_nodes() {
            if node.kind.is_alpha() {
                alpha_count += 1;
            } else {
                beta_count += 1;
            }
        }
        NetworkStats {
            node_count: alpha_count + beta_count,
            alpha_count,
            beta_count,
            production_count: self.productions.len(),
            subscribed_fact_count: self.subscriptions.len(),
        }
    }

    fn compile_bool(
        &mut self,
        expr: &BoolExpr,
        governed: &PermissionId,
        store: &FactStore,
    ) -> NodeId {
        match expr {
            BoolExpr::Base { body } => self.compile_base(body, governed, store),
            BoolExpr::Comp { op, left, right } => {
                let left = self.compile_num(left, store);
                let right = self.compile_num(right, store);
                self.intern(NodeKind::Compare { op: *op, left, right }, store)
            }
            BoolExpr::Not { body } => {
                let body = self.compile_bool(body, governed, store);
                self.intern(NodeKind::Not { body }, store)
            }
            BoolExpr::And { left, right } => {
                let left = self.compile_bool(left, governed, store);
                let right = self.compile_bool(right, governed, store);
                self.intern(NodeKind::And { left, right }, store)
            }
            BoolExpr::Or { left, right } => {
                let left = self.compile_bool(left, governed, store);
                let right = self.compile_bool(right, governed, store);
                self.intern(NodeKind::Or { left, right }, store)
            }
        }
    }

    fn compile_base(
        &mut self,
        base: &BaseConstraint,
        governed: &PermissionId,
        store: &FactStore,
    ) -> NodeId {
        match base {
            BaseConstraint::PermissionExists { pid } => self.intern(
                NodeKind::BoolFact(FactKey::PermissionExists {
                    permission: pid.clone(),
                }),
                store,
            ),
            BaseConstraint::PermissionEnabled { pid } => self.intern(
                NodeKind::BoolFact(FactKey::PermissionEnabled {
                    permission: pid.clone(),
                }),
                store,
            ),
            BaseConstraint::MaxDelegationDepth { depth } => {
                let left = self.intern(
                    NodeKind::NumFact(FactKey::DelegationDepth {
                        permission: governed.clone(),
                    }),
                    store,
                );
                let right = self.compile_num(depth, store);
                self.intern(
                    NodeKind::Compare {
                        op: CompOp::Lte,
                        left,
                        right,
                    },
                    store,
                )
            }
            // Two conjuncts: the count stays under the ceiling, and the
            // period resolves to a positive window. A fact-dependent period
            // passes definition-time validation, so the positivity check has
            // to live in the network.
            BaseConstraint::RateLimit {
                max_operations,
                period,
            } => {
                let count = self.intern(
                    NodeKind::NumFact(FactKey::OperationCount {
                        permission: governed.clone(),
                    }),
                    store,
                );
                let ceiling = self.compile_num(max_operations, store);
                let within = self.intern(
                    NodeKind::Compare {
                        op: CompOp::Lte,
                        left: count,
                        right: ceiling,
                    },
                    store,
                );
                let period_node = self.compile_num(period, store);
                let one = self.intern(NodeKind::Literal(1), store);
                let positive = self.intern(
                    NodeKind::Compare {
                        op: CompOp::Gte,
                        left: period_node,
                        right: one,
                    },
                    store,
                );
                self.intern(
                    NodeKind::And {
                        left: within,
                        right: positive,
                    },
                    store,
                )
            }
            BaseConstraint::InactiveUnlessRedelegated {
                account,
                percentage,
            } => self.intern(
                NodeKind::BoolFact(FactKey::Redelegated {
                    permission: governed.clone(),
                    account: account.clone(),
                    percentage: *percentage,
                }),
                store,
            ),
        }
    }

    fn compile_num(&mut self, expr: &NumExpr, store: &FactStore) -> NodeId {
        match expr {
            NumExpr::UintLiteral { value } => self.intern(NodeKind::Literal(*value), store),
            NumExpr::BlockNumber => self.intern(NodeKind::NumFact(FactKey::BlockNumber), store),
            NumExpr::StakeOf { account } => self.intern(
                NodeKind::NumFact(FactKey::StakeOf {
                    account: account.clone(),
                }),
                store,
            ),
            NumExpr::WeightSet { from, to } => self.intern(
                NodeKind::NumFact(FactKey::WeightSet {
                    from: from.clone(),
                    to: to.clone(),
                }),
                store,
            ),
            NumExpr::WeightPowerFrom { from, to } => self.intern(
                NodeKind::NumFact(FactKey::WeightPowerFrom {
                    from: from.clone(),
                    to: to.clone(),
                }),
                store,
            ),
            NumExpr::Add { left, right } => {
                let left = self.compile_num(left, store);
                let right = self.compile_num(right, store);
                self.intern(
                    NodeKind::Arith {
                        op: ArithOp::Add,
                        left,
                        right,
                    },
                    store,
                )
            }
            NumExpr::Sub { left, right } => {
                let left = self.compile_num(left, store);
                let right = self.compile_num(right, store);
                self.intern(
                    NodeKind::Arith {
                        op: ArithOp::Sub,
                        left,
                        right,
                    },
                    store,
                )
            }
        }
    }

    /// Get-or-create a node for `kind`. A dedup hit returns the existing
    /// node; otherwise a fresh slot is appended, wired to its children, and
    /// evaluated immediately so its cached state is valid from birth.
    fn intern(&mut self, kind: NodeKind, store: &FactStore) -> NodeId {
        let signature = self.signature_of(&kind);
        if let Some(&existing) = self.interned.get(&signature) {
            if self.nodes[existing.0].is_some() {
                return existing;
            }
        }

        let id = NodeId(self.nodes.len());
        for child in kind.children() {
            if let Some(node) = self.nodes[child.0].as_mut() {
                node.refs += 1;
                node.dependents.push(id);
            }
        }
        if let Some(key) = kind.fact_key() {
            self.subscriptions
                .entry(key.clone())
                .or_default()
                .push(id);
        }
        let state = self.eval_kind(&kind, store);
        self.nodes.push(Some(Node {
            kind,
            signature: signature.clone(),
            dependents: Vec::new(),
            refs: 0,
            state,
        }));
        self.interned.insert(signature, id);
        id
    }

    /// Drop one reference to `id`; on reaching zero, free the node and
    /// recursively release its children.
    fn release(&mut self, id: NodeId) -> Result<()> {
        let node = self
            .nodes
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .ok_or_else(|| Error::Invariant(format!("release of freed node {id}")))?;
        if node.refs == 0 {
            return Err(Error::Invariant(format!(
                "reference count underflow at node {id}"
            )));
        }
        node.refs -= 1;
        if node.refs > 0 {
            return Ok(());
        }

        let Some(node) = self.nodes[id.0].take() else {
            return Ok(());
        };
        self.interned.remove(&node.signature);
        if let Some(key) = node.kind.fact_key() {
            if let Some(subscribers) = self.subscriptions.get_mut(key) {
                subscribers.retain(|n| *n != id);
                if subscribers.is_empty() {
                    self.subscriptions.remove(key);
                }
            }
        }
        for child in node.kind.children() {
            if let Some(child_node) = self.nodes[child.0].as_mut() {
                child_node.dependents.retain(|d| *d != id);
            }
            self.release(child)?;
        }
        Ok(())
    }

    fn eval_kind(&self, kind: &NodeKind, store: &FactStore) -> NodeState {
        match kind {
            NodeKind::Literal(value) => NodeState::Num(i128::try_from(*value).ok()),
            NodeKind::NumFact(key) => NodeState::Num(
                store
                    .get(key)
                    .and_then(FactValue::as_uint)
                    .and_then(|v| i128::try_from(v).ok()),
            ),
            NodeKind::BoolFact(key) => NodeState::Bool(
                match store.get(key).and_then(FactValue::as_flag) {
                    Some(flag) => Truth::from_bool(flag),
                    None => Truth::Unknown,
                },
            ),
            NodeKind::Arith { op, left, right } => {
                let value = match (self.num_state(*left), self.num_state(*right)) {
                    (Some(l), Some(r)) => op.apply(l, r),
                    _ => None,
                };
                NodeState::Num(value)
            }
            NodeKind::Compare { op, left, right } => {
                let truth = match (self.num_state(*left), self.num_state(*right)) {
                    (Some(l), Some(r)) => Truth::from_bool(op.compare(l, r)),
                    _ => Truth::Unknown,
                };
                NodeState::Bool(truth)
            }
            NodeKind::And { left, right } => {
                NodeState::Bool(self.bool_state(*left).and(self.bool_state(*right)))
            }
            NodeKind::Or { left, right } => {
                NodeState::Bool(self.bool_state(*left).or(self.bool_state(*right)))
            }
            NodeKind::Not { body } => NodeState::Bool(self.bool_state(*body).not()),
        }
    }

    fn num_state(&self, id: NodeId) -> Option<i128> {
        match self.node(id) {
            Some(Node {
                state: NodeState::Num(value),
                ..
            }) => *value,
            _ => None,
        }
    }

    fn bool_state(&self, id: NodeId) -> Truth {
        match self.node(id) {
            Some(Node {
                state: NodeState::Bool(truth),
                ..
            }) => *truth,
            _ => Truth::Unknown,
        }
    }

    fn signature_of(&self, kind: &NodeKind) -> String {
        let child_sig = |id: &NodeId| {
            self.node(*id)
                .map(|n| n.signature.clone())
                .unwrap_or_default()
        };
        match kind {
            NodeKind::Literal(value) => format!("lit({value})"),
            NodeKind::NumFact(key) | NodeKind::BoolFact(key) => key.to_string(),
            NodeKind::Arith { op, left, right } => {
                format!("{}({},{})", op.key(), child_sig(left), child_sig(right))
            }
            NodeKind::Compare { op, left, right } => {
                format!(
                    "cmp[{}]({},{})",
                    op.key(),
                    child_sig(left),
                    child_sig(right)
                )
            }
            NodeKind::And { left, right } => {
                format!("and({},{})", child_sig(left), child_sig(right))
            }
            NodeKind::Or { left, right } => {
                format!("or({},{})", child_sig(left), child_sig(right))
            }
            NodeKind::Not { body } => format!("not({})", child_sig(body)),
        }
    }
}

/// From-scratch evaluation of a boolean expression against the store.
///
/// The reference semantics the network must agree with: the incremental
/// result after any sequence of updates equals this function applied to the
/// final store.
pub fn evaluate_expr(expr: &BoolExpr, governed: &PermissionId, store: &FactStore) -> Truth {
    match expr {
        BoolExpr::Base { body } => evaluate_base(body, governed, store),
        BoolExpr::Comp { op, left, right } => {
            match (evaluate_num(left, store), evaluate_num(right, store)) {
                (Some(l), Some(r)) => Truth::from_bool(op.compare(l, r)),
                _ => Truth::Unknown,
            }
        }
        BoolExpr::Not { body } => evaluate_expr(body, governed, store).not(),
        BoolExpr::And { left, right } => evaluate_expr(left, governed, store)
            .and(evaluate_expr(right, governed, store)),
        BoolExpr::Or { left, right } => evaluate_expr(left, governed, store)
            .or(evaluate_expr(right, governed, store)),
    }
}

/// From-scratch evaluation of a numeric expression; `None` is unknown.
pub fn evaluate_num(expr: &NumExpr, store: &FactStore) -> Option<i128> {
    let fact = |key: FactKey| {
        store
            .get(&key)
            .and_then(FactValue::as_uint)
            .and_then(|v| i128::try_from(v).ok())
    };
    match expr {
        NumExpr::UintLiteral { value } => i128::try_from(*value).ok(),
        NumExpr::BlockNumber => fact(FactKey::BlockNumber),
        NumExpr::StakeOf { account } => fact(FactKey::StakeOf {
            account: account.clone(),
        }),
        NumExpr::WeightSet { from, to } => fact(FactKey::WeightSet {
            from: from.clone(),
            to: to.clone(),
        }),
        NumExpr::WeightPowerFrom { from, to } => fact(FactKey::WeightPowerFrom {
            from: from.clone(),
            to: to.clone(),
        }),
        NumExpr::Add { left, right } => {
            evaluate_num(left, store)?.checked_add(evaluate_num(right, store)?)
        }
        NumExpr::Sub { left, right } => {
            evaluate_num(left, store)?.checked_sub(evaluate_num(right, store)?)
        }
    }
}

fn evaluate_base(base: &BaseConstraint, governed: &PermissionId, store: &FactStore) -> Truth {
    let flag = |key: FactKey| match store.get(&key).and_then(FactValue::as_flag) {
        Some(value) => Truth::from_bool(value),
        None => Truth::Unknown,
    };
    match base {
        BaseConstraint::PermissionExists { pid } => flag(FactKey::PermissionExists {
            permission: pid.clone(),
        }),
        BaseConstraint::PermissionEnabled { pid } => flag(FactKey::PermissionEnabled {
            permission: pid.clone(),
        }),
        BaseConstraint::MaxDelegationDepth { depth } => {
            let current = store
                .get(&FactKey::DelegationDepth {
                    permission: governed.clone(),
                })
                .and_then(FactValue::as_uint)
                .and_then(|v| i128::try_from(v).ok());
            match (current, evaluate_num(depth, store)) {
                (Some(current), Some(max)) => Truth::from_bool(current <= max),
                _ => Truth::Unknown,
            }
        }
        BaseConstraint::RateLimit {
            max_operations,
            period,
        } => {
            let count = store
                .get(&FactKey::OperationCount {
                    permission: governed.clone(),
                })
                .and_then(FactValue::as_uint)
                .and_then(|v| i128::try_from(v).ok());
            let within = match (count, evaluate_num(max_operations, store)) {
                (Some(count), Some(max)) => Truth::from_bool(count <= max),
                _ => Truth::Unknown,
            };
            let positive = match evaluate_num(period, store) {
                Some(period) => Truth::from_bool(period >= 1),
                None => Truth::Unknown,
            };
            within.and(positive)
        }
        BaseConstraint::InactiveUnlessRedelegated {
            account,
            percentage,
        } => flag(FactKey::Redelegated {
            permission: governed.clone(),
            account: account.clone(),
            percentage: *percentage,
        }),
    }
}
