//! The incremental network must always agree with from-scratch evaluation:
//! after any sequence of fact updates, each constraint's status equals its
//! expression evaluated directly against the final store.

use custos::rete::evaluate_expr;
use custos::{
    BaseConstraint, BoolExpr, CompOp, ConstraintEngine, EvaluationStatus, FactKey, FactStore,
    FactUpdate, FactValue, NumExpr, PermissionId, StaticChainClient, Truth,
};

fn stake(account: &str) -> FactKey {
    FactKey::StakeOf {
        account: account.into(),
    }
}

fn guards() -> Vec<(PermissionId, BoolExpr)> {
    vec![
        (
            "0x01".into(),
            BoolExpr::comp(
                CompOp::Gte,
                NumExpr::stake_of("alice"),
                NumExpr::literal(1000),
            ),
        ),
        (
            "0x01".into(),
            BoolExpr::and(
                BoolExpr::comp(
                    CompOp::Gte,
                    NumExpr::stake_of("alice"),
                    NumExpr::literal(1000),
                ),
                BoolExpr::base(BaseConstraint::PermissionEnabled { pid: "0xab".into() }),
            ),
        ),
        (
            "0x02".into(),
            BoolExpr::or(
                BoolExpr::not(BoolExpr::comp(
                    CompOp::Lt,
                    NumExpr::add(NumExpr::stake_of("alice"), NumExpr::stake_of("bob")),
                    NumExpr::literal(3000),
                )),
                BoolExpr::base(BaseConstraint::MaxDelegationDepth {
                    depth: NumExpr::literal(3),
                }),
            ),
        ),
        (
            "0x03".into(),
            BoolExpr::comp(
                CompOp::Eq,
                NumExpr::sub(NumExpr::stake_of("bob"), NumExpr::literal(100)),
                weight_set("alice", "bob"),
            ),
        ),
    ]
}

fn weight_set(from: &str, to: &str) -> NumExpr {
    NumExpr::WeightSet {
        from: from.into(),
        to: to.into(),
    }
}

fn update_sequence() -> Vec<FactUpdate> {
    vec![
        FactUpdate::new().set(stake("alice"), FactValue::Uint(900)),
        FactUpdate::new().set(
            FactKey::PermissionEnabled {
                permission: "0xab".into(),
            },
            FactValue::Flag(true),
        ),
        FactUpdate::new()
            .set(stake("alice"), FactValue::Uint(2500))
            .set(stake("bob"), FactValue::Uint(800)),
        FactUpdate::new().set(
            FactKey::DelegationDepth {
                permission: "0x02".into(),
            },
            FactValue::Uint(5),
        ),
        FactUpdate::new().set(
            FactKey::WeightSet {
                from: "alice".into(),
                to: "bob".into(),
            },
            FactValue::Uint(700),
        ),
        FactUpdate::new().set(stake("bob"), FactValue::Uint(100)),
        FactUpdate::new().set(
            FactKey::PermissionEnabled {
                permission: "0xab".into(),
            },
            FactValue::Flag(false),
        ),
    ]
}

fn status_of(truth: Truth) -> EvaluationStatus {
    truth.into()
}

#[test]
fn test_incremental_matches_oracle_after_every_update() {
    let engine = ConstraintEngine::new(StaticChainClient::new());
    let mut registered = Vec::new();
    for (governed, expr) in guards() {
        let outcome = engine.add_constraint(governed.clone(), expr.clone()).unwrap();
        registered.push((outcome.constraint_id, governed, expr));
    }

    // Mirror the engine's store with plain sequential writes.
    let mut mirror = FactStore::new();
    for update in update_sequence() {
        engine.apply_facts(update.clone()).unwrap();
        mirror.apply(update).unwrap();

        for (constraint_id, governed, expr) in &registered {
            let expected = status_of(evaluate_expr(expr, governed, &mirror));
            let actual = engine.evaluation_status(constraint_id).unwrap();
            assert_eq!(actual, expected, "diverged on {expr:?}");
        }
    }
}

#[test]
fn test_evaluation_is_deterministic_across_engines() {
    let build = || {
        let engine = ConstraintEngine::new(StaticChainClient::new());
        let ids: Vec<_> = guards()
            .into_iter()
            .map(|(governed, expr)| {
                engine.add_constraint(governed, expr).unwrap().constraint_id
            })
            .collect();
        (engine, ids)
    };
    let (left, left_ids) = build();
    let (right, right_ids) = build();
    // Content-derived identity: both engines assign the same constraint ids.
    assert_eq!(left_ids, right_ids);

    for update in update_sequence() {
        let left_applied = left.apply_facts(update.clone()).unwrap();
        let right_applied = right.apply_facts(update).unwrap();
        assert_eq!(left_applied.version, right_applied.version);
        assert_eq!(
            left_applied.transitions.len(),
            right_applied.transitions.len()
        );
        for id in &left_ids {
            assert_eq!(
                left.evaluation_status(id).unwrap(),
                right.evaluation_status(id).unwrap()
            );
        }
    }
    assert_eq!(left.stats(), right.stats());
}

#[test]
fn test_unrelated_facts_cause_no_transitions() {
    let engine = ConstraintEngine::new(StaticChainClient::new());
    let outcome = engine
        .add_constraint(
            "0x01".into(),
            BoolExpr::comp(
                CompOp::Gte,
                NumExpr::stake_of("alice"),
                NumExpr::literal(1000),
            ),
        )
        .unwrap();
    engine
        .apply_facts(FactUpdate::new().set(stake("alice"), FactValue::Uint(1500)))
        .unwrap();

    // A fact nothing subscribes to changes the version but nothing else.
    let applied = engine
        .apply_facts(FactUpdate::new().set(stake("carol"), FactValue::Uint(1)))
        .unwrap();
    assert_eq!(applied.changed_fact_count, 1);
    assert!(applied.transitions.is_empty());
    assert!(engine.check_activation(&outcome.constraint_id).unwrap().activated);
}
