//! The constraint engine: one coordinator over the store, the network, and
//! the registry.
//!
//! All three live behind a single `RwLock`. Mutations (registration, fact
//! updates, removal) serialize through the write guard, so the network and
//! the store can never be observed mid-transition; reads share the read
//! guard. The only I/O, fetching seed facts from the ledger client, happens
//! before the write lock is taken, so the lock is never held across a fetch.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::audit::{ActivationLogger, NoOpLogger};
use crate::error::{Error, Result};
use crate::expr::{BoolExpr, PermissionId};
use crate::fact::{FactKey, FactStore, FactUpdate, FactValue, Version};
use crate::introspect::render_network;
use crate::registry::{
    ActivationEvent, ConstraintDefinition, ConstraintId, ConstraintRegistry, ProductionId,
};
use crate::resolver::{required_facts, resolve_facts, ChainClient};
use crate::rete::{EvaluationStatus, NetworkStats, ReteNetwork};

/// Liveness summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    pub healthy: bool,
    pub constraint_count: usize,
    pub version: Version,
    pub timestamp: DateTime<Utc>,
}

/// Snapshot of the network for inspection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkState {
    pub rendered: String,
    pub stats: NetworkStats,
    pub version: Version,
    pub timestamp: DateTime<Utc>,
}

/// Result of a registration request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddConstraintOutcome {
    pub constraint_id: ConstraintId,
    pub production_id: ProductionId,
    /// False when the identical constraint was already registered.
    pub created: bool,
    /// Seed facts actually obtained from the ledger client.
    pub fetched_facts: Vec<(FactKey, FactValue)>,
    pub fetched_facts_count: usize,
    pub activated: bool,
    pub status: EvaluationStatus,
}

/// A constraint's full activation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivationLog {
    pub constraint_id: ConstraintId,
    pub activation_count: usize,
    pub activations: Vec<ActivationEvent>,
}

/// Current activation state of one constraint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivationStatus {
    pub constraint_id: ConstraintId,
    pub activated: bool,
    pub status: EvaluationStatus,
    pub version: Version,
}

/// Result of applying one batch of fact observations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactsApplied {
    pub version: Version,
    pub changed_fact_count: usize,
    pub transitions: Vec<ActivationEvent>,
}

#[derive(Debug, Default)]
struct EngineState {
    store: FactStore,
    network: ReteNetwork,
    registry: ConstraintRegistry,
    /// Facts a registration needed but could not seed. Retried on demand,
    /// cleared when the fact arrives by any path.
    pending: BTreeSet<FactKey>,
}

/// Chain-aware constraint engine.
#[derive(Debug)]
pub struct ConstraintEngine<C> {
    client: C,
    logger: Arc<dyn ActivationLogger>,
    state: RwLock<EngineState>,
}

impl<C: ChainClient> ConstraintEngine<C> {
    pub fn new(client: C) -> Self {
        Self::with_logger(client, Arc::new(NoOpLogger))
    }

    pub fn with_logger(client: C, logger: Arc<dyn ActivationLogger>) -> Self {
        Self {
            client,
            logger,
            state: RwLock::new(EngineState::default()),
        }
    }

    pub fn health_check(&self) -> HealthCheck {
        let state = self.read();
        HealthCheck {
            healthy: true,
            constraint_count: state.registry.len(),
            version: state.store.version(),
            timestamp: Utc::now(),
        }
    }

    pub fn network_state(&self) -> NetworkState {
        let state = self.read();
        NetworkState {
            rendered: render_network(&state.network, &state.store),
            stats: state.network.stats(),
            version: state.store.version(),
            timestamp: Utc::now(),
        }
    }

    pub fn stats(&self) -> NetworkStats {
        self.read().network.stats()
    }

    pub fn current_version(&self) -> Version {
        self.read().store.version()
    }

    /// Facts that registrations needed but have not been observed yet.
    pub fn pending_facts(&self) -> Vec<FactKey> {
        self.read().pending.iter().cloned().collect()
    }

    /// Register a constraint over a governed permission.
    ///
    /// Validates the expression, seeds every fact it reads from the ledger
    /// client, compiles it into the network, and reports the initial
    /// evaluation. Registering a structurally identical constraint twice is
    /// a no-op that returns the existing identity.
    pub fn add_constraint(
        &self,
        governed: PermissionId,
        expression: BoolExpr,
    ) -> Result<AddConstraintOutcome> {
        expression.validate()?;
        let constraint_id = ConstraintId::derive(&governed, &expression);

        {
            let state = self.read();
            if let Some(outcome) = existing_outcome(&state, &constraint_id) {
                return Ok(outcome);
            }
        }

        // The only I/O, done before the write lock.
        let seed = resolve_facts(&self.client, &expression, &governed)?;
        let needed = required_facts(&expression, &governed);

        let mut guard = self.write();
        let state = &mut *guard;
        if let Some(outcome) = existing_outcome(state, &constraint_id) {
            return Ok(outcome);
        }

        // Seed the store first; a malformed seed fails before anything is
        // registered. Compiling afterwards lets the new nodes read the
        // seeded values directly.
        let fetched_facts = seed.entries.clone();
        let seeded: BTreeSet<FactKey> = seed.entries.iter().map(|(k, _)| k.clone()).collect();
        let fetched_facts_count = seed.len();
        let (version, changed) = state.store.apply(seed)?;
        for key in &changed {
            state.pending.remove(key);
        }
        state.network.propagate(&changed, &state.store);

        let production_id = ProductionId::new();
        state.network.add_production(
            production_id.clone(),
            constraint_id.clone(),
            &expression,
            &governed,
            &state.store,
        );
        state.registry.insert(
            ConstraintDefinition {
                constraint_id: constraint_id.clone(),
                governed_permission_id: governed,
                expression,
                created_at: Utc::now(),
            },
            production_id.clone(),
        );
        for key in needed.difference(&seeded) {
            // Earlier updates may have observed the fact already.
            if state.store.get(key).is_none() {
                state.pending.insert(key.clone());
            }
        }

        let events = state.network.refresh_productions(version, Utc::now());
        record_events(&mut state.registry, self.logger.as_ref(), events)?;

        let (activated, status) = production_state(&state.network, &production_id);
        tracing::info!(
            constraint = %constraint_id,
            production = %production_id,
            fetched = fetched_facts_count,
            activated,
            "constraint registered"
        );
        Ok(AddConstraintOutcome {
            constraint_id,
            production_id,
            created: true,
            fetched_facts,
            fetched_facts_count,
            activated,
            status,
        })
    }

    /// Current activation of a registered constraint.
    pub fn check_activation(&self, constraint_id: &ConstraintId) -> Result<ActivationStatus> {
        let state = self.read();
        if !state.registry.contains(constraint_id) {
            return Err(Error::UnknownConstraint(constraint_id.clone()));
        }
        let production_id = state
            .registry
            .production_of(constraint_id)
            .cloned()
            .ok_or_else(|| Error::UnknownConstraint(constraint_id.clone()))?;
        let (activated, status) = production_state(&state.network, &production_id);
        Ok(ActivationStatus {
            constraint_id: constraint_id.clone(),
            activated,
            status,
            version: state.store.version(),
        })
    }

    /// Three-valued evaluation status of a registered constraint.
    pub fn evaluation_status(&self, constraint_id: &ConstraintId) -> Result<EvaluationStatus> {
        Ok(self.check_activation(constraint_id)?.status)
    }

    /// Full activation history of a constraint, oldest first. Available even
    /// after the constraint was removed.
    pub fn activations(&self, constraint_id: &ConstraintId) -> Result<ActivationLog> {
        let state = self.read();
        let production_id = state
            .registry
            .production_of(constraint_id)
            .ok_or_else(|| Error::UnknownConstraint(constraint_id.clone()))?;
        let activations = state.registry.history(production_id).to_vec();
        Ok(ActivationLog {
            constraint_id: constraint_id.clone(),
            activation_count: activations.len(),
            activations,
        })
    }

    /// Apply one atomic batch of fact observations and report every
    /// activation transition it caused.
    pub fn apply_facts(&self, update: FactUpdate) -> Result<FactsApplied> {
        let mut guard = self.write();
        let state = &mut *guard;
        let (version, changed) = state.store.apply(update)?;
        for key in &changed {
            state.pending.remove(key);
        }
        state.network.propagate(&changed, &state.store);
        let events = state.network.refresh_productions(version, Utc::now());
        record_events(&mut state.registry, self.logger.as_ref(), events.clone())?;
        Ok(FactsApplied {
            version,
            changed_fact_count: changed.len(),
            transitions: events,
        })
    }

    /// Retry fetching facts that earlier registrations could not seed.
    /// Returns how many pending facts were resolved.
    pub fn retry_pending(&self) -> Result<usize> {
        let keys: Vec<FactKey> = {
            let state = self.read();
            state.pending.iter().cloned().collect()
        };
        if keys.is_empty() {
            return Ok(0);
        }
        let fetched = self.client.fetch_batch(&keys)?;
        if fetched.is_empty() {
            return Ok(0);
        }
        let mut update = FactUpdate::new();
        let mut resolved = 0;
        for (key, value) in fetched {
            update = update.set(key, value);
            resolved += 1;
        }
        self.apply_facts(update)?;
        Ok(resolved)
    }

    /// Unregister a constraint. Its history stays queryable; its nodes are
    /// released from the network unless shared with other constraints.
    /// Returns whether the constraint existed.
    pub fn remove_constraint(&self, constraint_id: &ConstraintId) -> Result<bool> {
        let mut guard = self.write();
        let state = &mut *guard;
        if state.registry.remove_definition(constraint_id).is_none() {
            return Ok(false);
        }
        if let Some(production_id) = state.registry.production_of(constraint_id).cloned() {
            state.network.remove_production(&production_id)?;
        }
        // Pending facts no live alpha node reads are dead weight.
        state.pending.retain(|key| state.network.is_subscribed(key));
        tracing::info!(constraint = %constraint_id, "constraint removed");
        Ok(true)
    }

    fn read(&self) -> RwLockReadGuard<'_, EngineState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, EngineState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn existing_outcome(
    state: &EngineState,
    constraint_id: &ConstraintId,
) -> Option<AddConstraintOutcome> {
    if !state.registry.contains(constraint_id) {
        return None;
    }
    let production_id = state.registry.production_of(constraint_id)?.clone();
    state.network.production(&production_id)?;
    let (activated, status) = production_state(&state.network, &production_id);
    Some(AddConstraintOutcome {
        constraint_id: constraint_id.clone(),
        production_id,
        created: false,
        fetched_facts: Vec::new(),
        fetched_facts_count: 0,
        activated,
        status,
    })
}

fn production_state(network: &ReteNetwork, production_id: &ProductionId) -> (bool, EvaluationStatus) {
    match (network.production(production_id), network.truth_of(production_id)) {
        (Some(production), Some(truth)) => (production.activated(), truth.into()),
        _ => (false, EvaluationStatus::Unknown),
    }
}

fn record_events(
    registry: &mut ConstraintRegistry,
    logger: &dyn ActivationLogger,
    events: Vec<ActivationEvent>,
) -> Result<()> {
    for event in events {
        registry.append_event(event.clone())?;
        logger.log(&event);
    }
    Ok(())
}
