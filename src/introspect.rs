//! Textual rendering of the matching network, for debugging and operator
//! inspection. The output is deterministic for a given network and store:
//! nodes print in ascending id order, facts in key order.

use std::fmt::Write as _;

use crate::fact::FactStore;
use crate::rete::{EvaluationStatus, NodeState, ReteNetwork};

/// Render the whole network and the fact snapshot it reads as plain text.
pub fn render_network(network: &ReteNetwork, store: &FactStore) -> String {
    let mut out = String::new();
    let stats = network.stats();

    let _ = writeln!(out, "=== CONSTRAINT NETWORK ===");
    let _ = writeln!(
        out,
        "nodes: {} ({} alpha, {} beta), productions: {}, version: {}",
        stats.node_count,
        stats.alpha_count,
        stats.beta_count,
        stats.production_count,
        store.version()
    );

    let _ = writeln!(out, "\nALPHA NODES:");
    for (id, node) in network.live_nodes().filter(|(_, n)| n.kind().is_alpha()) {
        let _ = writeln!(
            out,
            "  {id} {} refs={} state={}",
            node.signature(),
            node.refs(),
            render_state(node.state())
        );
    }

    let _ = writeln!(out, "\nBETA NODES:");
    for (id, node) in network.live_nodes().filter(|(_, n)| !n.kind().is_alpha()) {
        let _ = writeln!(
            out,
            "  {id} {} refs={} state={}",
            node.signature(),
            node.refs(),
            render_state(node.state())
        );
    }

    let _ = writeln!(out, "\nPRODUCTION NODES:");
    for production in network.productions() {
        let status: EvaluationStatus = network
            .truth_of(production.production_id())
            .map(Into::into)
            .unwrap_or(EvaluationStatus::Unknown);
        let _ = writeln!(
            out,
            "  {} constraint={} root={} activated={} status={}",
            production.production_id(),
            production.constraint_id(),
            production.root(),
            production.activated(),
            status
        );
    }

    let _ = writeln!(out, "\nFACT STORE:");
    let mut keys: Vec<_> = store.keys().collect();
    keys.sort();
    for key in keys {
        if let Some(value) = store.get(key) {
            let _ = writeln!(out, "  {key} = {value}");
        }
    }

    out
}

fn render_state(state: NodeState) -> String {
    match state {
        NodeState::Num(Some(value)) => value.to_string(),
        NodeState::Num(None) => "unknown".to_owned(),
        NodeState::Bool(truth) => truth.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{BoolExpr, CompOp, NumExpr, PermissionId};
    use crate::fact::{FactKey, FactUpdate, FactValue};
    use crate::registry::{ConstraintId, ProductionId};

    #[test]
    fn rendering_lists_every_section() {
        let governed: PermissionId = "0x01".into();
        let expr = BoolExpr::comp(
            CompOp::Gte,
            NumExpr::stake_of("alice"),
            NumExpr::literal(1000),
        );
        let mut store = FactStore::new();
        let mut network = ReteNetwork::new();
        network.add_production(
            ProductionId::new(),
            ConstraintId::derive(&governed, &expr),
            &expr,
            &governed,
            &store,
        );
        let (_, changed) = store
            .apply(FactUpdate::new().set(
                FactKey::StakeOf {
                    account: "alice".into(),
                },
                FactValue::Uint(1500),
            ))
            .unwrap();
        network.propagate(&changed, &store);

        let rendered = render_network(&network, &store);
        assert!(rendered.starts_with("=== CONSTRAINT NETWORK ==="));
        for section in ["ALPHA NODES:", "BETA NODES:", "PRODUCTION NODES:", "FACT STORE:"] {
            assert!(rendered.contains(section), "missing section {section}");
        }
        assert!(rendered.contains("stake_of:alice"));
        assert!(rendered.contains("state=1500"));
        assert!(rendered.contains("cmp[gte]"));
        assert!(rendered.contains("status=satisfied"));
        assert!(rendered.contains("stake_of:alice = 1500"));
    }

    #[test]
    fn empty_network_renders_cleanly() {
        let rendered = render_network(&ReteNetwork::new(), &FactStore::new());
        assert!(rendered.contains("nodes: 0 (0 alpha, 0 beta), productions: 0"));
    }
}
