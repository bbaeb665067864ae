//! Equality rewriting and universal instantiation.

mod helpers;

use helpers::{engine, t};

use noesis::KbId;

#[tokio::test]
async fn oriented_equality_rewrites_existing_facts() {
    let engine = engine();
    engine.assert_input(t("(olderThan (fatherOf Tom) Tom)"), "test", None);
    engine.assert_input(t("(= (fatherOf Tom) Bob)"), "test", None);

    assert!(
        engine
            .assertions_in(&KbId::global())
            .iter()
            .any(|a| a.term.kif() == "(olderThan Bob Tom)")
    );
}

#[tokio::test]
async fn new_facts_are_rewritten_by_existing_rules() {
    let engine = engine();
    engine.assert_input(t("(= (fatherOf Tom) Bob)"), "test", None);
    engine.assert_input(t("(olderThan (fatherOf Tom) Tom)"), "test", None);

    assert!(
        engine
            .assertions_in(&KbId::global())
            .iter()
            .any(|a| a.term.kif() == "(olderThan Bob Tom)")
    );
}

#[tokio::test]
async fn rewrite_supports_cite_both_sides() {
    let engine = engine();
    let target = engine
        .assert_input(t("(olderThan (fatherOf Tom) Tom)"), "test", None)
        .unwrap();
    let equality = engine
        .assert_input(t("(= (fatherOf Tom) Bob)"), "test", None)
        .unwrap();

    let derived = engine
        .assertions_in(&KbId::global())
        .into_iter()
        .find(|a| a.term.kif() == "(olderThan Bob Tom)")
        .unwrap();
    assert!(derived.justifications.contains(&target.id));
    assert!(derived.justifications.contains(&equality.id));
    assert_eq!(derived.depth, 1);
}

#[tokio::test]
async fn unoriented_equality_does_not_rewrite() {
    let engine = engine();
    // Right side outweighs the left: not a rewrite rule.
    engine.assert_input(t("(= Bob (fatherOf Tom))"), "test", None);
    engine.assert_input(t("(olderThan (fatherOf Tom) Tom)"), "test", None);

    assert!(
        engine
            .assertions_in(&KbId::global())
            .iter()
            .all(|a| a.term.kif() != "(olderThan Bob Tom)")
    );
}

#[tokio::test]
async fn negated_equality_does_not_rewrite() {
    let engine = engine();
    engine.assert_input(t("(not (= (fatherOf Tom) Bob))"), "test", None);
    engine.assert_input(t("(olderThan (fatherOf Tom) Tom)"), "test", None);

    assert!(
        engine
            .assertions_in(&KbId::global())
            .iter()
            .all(|a| a.term.kif() != "(olderThan Bob Tom)")
    );
}

#[tokio::test]
async fn ground_fact_instantiates_matching_universal() {
    let engine = engine();
    engine.assert_input(
        t("(forall (?x) (and (instance ?x Dog) (loyal ?x)))"),
        "test",
        None,
    );
    engine.assert_input(t("(instance Rex Dog)"), "test", None);

    let derived = engine
        .assertions_in(&KbId::global())
        .into_iter()
        .find(|a| a.term.kif() == "(and (instance Rex Dog) (loyal Rex))")
        .expect("instantiated body");
    assert!(derived.is_active());
    assert_eq!(derived.depth, 1);
}

#[tokio::test]
async fn universal_instantiates_against_existing_facts() {
    // The reverse direction scans facts whose head equals the body's head,
    // so the productive match sits on a nested subexpression.
    let engine = engine();
    engine.assert_input(t("(knows Bob secret)"), "test", None);
    engine.assert_input(
        t("(forall (?s) (knows Alice (knows Bob ?s)))"),
        "test",
        None,
    );

    assert!(
        engine
            .assertions_in(&KbId::global())
            .iter()
            .any(|a| a.term.kif() == "(knows Alice (knows Bob secret))")
    );
}

#[tokio::test]
async fn instantiation_requires_full_variable_coverage() {
    let engine = engine();
    // The matching subexpression binds only ?x, never ?y.
    engine.assert_input(
        t("(forall (?x ?y) (and (instance ?x Dog) (likes ?x ?y)))"),
        "test",
        None,
    );
    engine.assert_input(t("(instance Rex Dog)"), "test", None);

    assert!(
        engine
            .assertions_in(&KbId::global())
            .iter()
            .all(|a| !a.term.kif().starts_with("(and"))
    );
}

#[tokio::test]
async fn instantiation_cites_both_sides() {
    let engine = engine();
    let universal = engine
        .assert_input(
            t("(forall (?x) (and (instance ?x Dog) (loyal ?x)))"),
            "test",
            None,
        )
        .unwrap();
    let fact = engine
        .assert_input(t("(instance Rex Dog)"), "test", None)
        .unwrap();

    let derived = engine
        .assertions_in(&KbId::global())
        .into_iter()
        .find(|a| a.term.kif() == "(and (instance Rex Dog) (loyal Rex))")
        .unwrap();
    assert!(derived.justifications.contains(&universal.id));
    assert!(derived.justifications.contains(&fact.id));
}
