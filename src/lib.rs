//! # Custos
//!
//! Chain-aware constraint evaluation engine for delegated permissions.
//!
//! Custos watches ledger state and answers whether the guard conditions
//! attached to delegated permissions currently hold. Conditions are written
//! in a small typed expression language over on-chain facts (stake balances,
//! delegation weights, permission flags) and compiled into an incremental
//! matching network, so each fact update re-evaluates only the constraints
//! that read it rather than everything from scratch.
//!
//! ## Key Concepts
//!
//! - **Constraint**: a boolean expression over ledger facts, governing one
//!   permission. Identity is content-derived, so the same expression over the
//!   same permission always resolves to the same constraint.
//! - **Fact**: one observed value of ledger state, versioned by observation
//!   batch. A fact that was never observed is *unknown*, a distinct third
//!   truth value, never a default.
//! - **Activation**: a constraint is activated exactly when its expression is
//!   definitely true. Every flip of that flag is recorded in an append-only
//!   history.
//!
//! ## Example
//!
//! ```rust,ignore
//! use custos::{BoolExpr, CompOp, ConstraintEngine, NumExpr, StaticChainClient};
//!
//! let client = StaticChainClient::new();
//! let engine = ConstraintEngine::new(client);
//!
//! // alice must hold at least 1000 stake for permission 0x01 to stay usable
//! let guard = BoolExpr::comp(
//!     CompOp::Gte,
//!     NumExpr::stake_of("alice"),
//!     NumExpr::literal(1000),
//! );
//! let outcome = engine.add_constraint("0x01".into(), guard)?;
//!
//! let status = engine.check_activation(&outcome.constraint_id)?;
//! println!("{}", status.activated);
//! ```

pub mod audit;
pub mod engine;
pub mod error;
pub mod expr;
pub mod fact;
pub mod introspect;
pub mod registry;
pub mod resolver;
pub mod rete;

/// Maximum nesting depth of a constraint expression.
pub const MAX_EXPR_DEPTH: usize = 32;

// Re-exports for convenience
pub use audit::{ActivationLogger, NoOpLogger, StdoutLogger};
pub use engine::{
    ActivationLog, ActivationStatus, AddConstraintOutcome, ConstraintEngine, FactsApplied,
    HealthCheck, NetworkState,
};
pub use error::{DefinitionError, Error, Result};
pub use expr::{AccountId, BaseConstraint, BoolExpr, CompOp, NumExpr, PermissionId};
pub use fact::{FactKey, FactStore, FactUpdate, FactValue, Version};
pub use introspect::render_network;
pub use registry::{
    ActivationEvent, ConstraintDefinition, ConstraintId, ConstraintRegistry, ProductionId,
};
pub use resolver::{required_facts, resolve_facts, ChainClient, StaticChainClient};
pub use rete::{EvaluationStatus, NetworkStats, ReteNetwork, Truth};
