//! End-to-end reasoning scenarios: forward chaining, retraction cascades,
//! contradiction handling, and capacity eviction.

mod helpers;

use helpers::{EventLog, engine, engine_with_capacity, t};

use noesis::events::{EngineEvent, EventKind, RetractionTarget};
use noesis::tms::ResolutionPolicy;
use noesis::{AssertionType, KbId};

#[tokio::test]
async fn modus_ponens_via_forward_chaining() {
    let engine = engine();
    engine.assert_input(t("(=> (instance ?X Dog) (attribute ?X Canine))"), "test", None);
    let fact = engine
        .assert_input(t("(instance MyDog Dog)"), "test", None)
        .unwrap();

    let derived = engine
        .assertions_in(&KbId::global())
        .into_iter()
        .find(|a| a.term.kif() == "(attribute MyDog Canine)")
        .expect("derivation should be committed within one round");
    assert!(derived.is_active());
    assert_eq!(derived.depth, 1);

    // Justified by exactly the two inputs: the fact and the rule's axiom.
    let rule_axiom = engine.rules()[0].axiom;
    let mut expected = vec![fact.id, rule_axiom];
    expected.sort();
    assert_eq!(derived.justifications, expected);
}

#[tokio::test]
async fn retraction_cascade_deactivates_derivations() {
    let engine = engine();
    engine.assert_input(t("(=> (instance ?X Dog) (attribute ?X Canine))"), "test", None);
    let fact = engine
        .assert_input(t("(instance MyDog Dog)"), "test", None)
        .unwrap();
    let derived = engine
        .assertions_in(&KbId::global())
        .into_iter()
        .find(|a| a.term.kif() == "(attribute MyDog Canine)")
        .unwrap();

    let log = EventLog::subscribe(
        &engine,
        &[EventKind::Retracted, EventKind::AssertionStateChanged],
    );
    engine.retract(RetractionTarget::ById(fact.id), "test");

    assert_eq!(log.count(EventKind::Retracted), 1);
    assert_eq!(log.count(EventKind::AssertionStateChanged), 1);

    // Deactivated, not purged.
    let derived_after = engine.tms().get(derived.id).unwrap();
    assert!(!derived_after.is_active());
    assert!(engine.tms().get(fact.id).is_none());
}

#[tokio::test]
async fn retracting_a_rule_by_form_cascades_into_its_derivations() {
    let engine = engine();
    let form = t("(=> (instance ?X Dog) (attribute ?X Canine))");
    engine.assert_input(form.clone(), "test", None);
    engine.assert_input(t("(instance MyDog Dog)"), "test", None);
    let derived = engine
        .assertions_in(&KbId::global())
        .into_iter()
        .find(|a| a.term.kif() == "(attribute MyDog Canine)")
        .unwrap();

    let log = EventLog::subscribe(&engine, &[EventKind::RuleRemoved]);
    engine.retract(RetractionTarget::ByRuleForm(form), "test");

    assert_eq!(log.count(EventKind::RuleRemoved), 1);
    assert!(engine.rules().is_empty());
    assert!(!engine.tms().get(derived.id).unwrap().is_active());
}

#[tokio::test]
async fn conjunctive_antecedents_join_across_facts() {
    let engine = engine();
    engine.assert_input(
        t("(=> (and (instance ?X Dog) (owns ?P ?X)) (caresFor ?P ?X))"),
        "test",
        None,
    );
    engine.assert_input(t("(instance Rex Dog)"), "test", None);
    // The rule fires when the second conjunct arrives.
    engine.assert_input(t("(owns Alice Rex)"), "test", None);

    assert!(
        engine
            .assertions_in(&KbId::global())
            .iter()
            .any(|a| a.term.kif() == "(caresFor Alice Rex)")
    );
}

#[tokio::test]
async fn negated_antecedent_clause_matches_negated_fact() {
    let engine = engine();
    engine.assert_input(
        t("(=> (not (vaccinated ?X)) (needsVaccine ?X))"),
        "test",
        None,
    );
    engine.assert_input(t("(not (vaccinated Rex))"), "test", None);

    assert!(
        engine
            .assertions_in(&KbId::global())
            .iter()
            .any(|a| a.term.kif() == "(needsVaccine Rex)")
    );
}

#[tokio::test]
async fn conjunctive_consequent_derives_each_conjunct() {
    let engine = engine();
    engine.assert_input(
        t("(=> (instance ?X Dog) (and (mammal ?X) (animal ?X)))"),
        "test",
        None,
    );
    engine.assert_input(t("(instance Rex Dog)"), "test", None);

    let kifs: Vec<String> = engine
        .assertions_in(&KbId::global())
        .iter()
        .map(|a| a.term.kif().to_string())
        .collect();
    assert!(kifs.contains(&"(mammal Rex)".to_string()));
    assert!(kifs.contains(&"(animal Rex)".to_string()));
}

#[tokio::test]
async fn existential_consequent_is_skolemized() {
    let engine = engine();
    engine.assert_input(
        t("(=> (instance ?X Dog) (exists (?Y) (mother ?X ?Y)))"),
        "test",
        None,
    );
    engine.assert_input(t("(instance Rex Dog)"), "test", None);

    let derived = engine
        .assertions_in(&KbId::global())
        .into_iter()
        .find(|a| a.term.operator().is_some_and(|op| op == "mother"))
        .expect("skolemized derivation");
    assert_eq!(derived.ty, AssertionType::Skolemized);
    assert!(derived.term.has_skolem());
    assert!(!derived.term.has_variable());
}

#[tokio::test]
async fn derived_rule_from_quantified_consequent() {
    let engine = engine();
    engine.assert_input(
        t("(=> (isBreed ?B) (forall (?X) (=> (instance ?X ?B) (instance ?X Dog))))"),
        "test",
        None,
    );
    assert_eq!(engine.rules().len(), 1);
    engine.assert_input(t("(isBreed Beagle)"), "test", None);
    assert_eq!(engine.rules().len(), 2, "derived rule should register");

    // The derived rule participates immediately.
    engine.assert_input(t("(instance Snoopy Beagle)"), "test", None);
    assert!(
        engine
            .assertions_in(&KbId::global())
            .iter()
            .any(|a| a.term.kif() == "(instance Snoopy Dog)")
    );
}

#[tokio::test]
async fn contradiction_detected_and_left_alone_by_default() {
    let engine = engine();
    let log = EventLog::subscribe(&engine, &[EventKind::ContradictionDetected]);

    let positive = engine
        .assert_input(t("(believes A P)"), "test", None)
        .unwrap();
    let negative = engine
        .assert_input(t("(not (believes A P))"), "test", None)
        .unwrap();

    let events = log.events();
    assert_eq!(events.len(), 1);
    let EngineEvent::ContradictionDetected {
        conflicting_ids,
        kb_id,
    } = &events[0]
    else {
        panic!("expected a contradiction event");
    };
    assert!(conflicting_ids.contains(&positive.id));
    assert!(conflicting_ids.contains(&negative.id));
    assert_eq!(kb_id, &KbId::global());

    // LogOnly: neither side is retracted.
    assert!(engine.tms().get(positive.id).unwrap().is_active());
    assert!(engine.tms().get(negative.id).unwrap().is_active());
}

#[tokio::test]
async fn retract_weakest_policy_drops_the_newest_weakest() {
    let engine = engine();
    engine.set_resolution_policy(ResolutionPolicy::RetractWeakest);

    let positive = engine
        .assert_input_with_priority(t("(believes A P)"), 2.0, "test", None)
        .unwrap();
    let negative = engine
        .assert_input_with_priority(t("(not (believes A P))"), 1.0, "test", None)
        .unwrap();

    assert!(engine.tms().get(positive.id).unwrap().is_active());
    assert!(engine.tms().get(negative.id).is_none());
}

#[tokio::test]
async fn capacity_eviction_removes_lowest_priority() {
    let engine = engine_with_capacity(2);
    let log = EventLog::subscribe(&engine, &[EventKind::AssertionEvicted]);

    let first = engine
        .assert_input_with_priority(t("(fact one)"), 1.0, "test", None)
        .unwrap();
    let second = engine
        .assert_input_with_priority(t("(fact two)"), 0.5, "test", None)
        .unwrap();
    let third = engine
        .assert_input_with_priority(t("(fact three)"), 0.8, "test", None)
        .unwrap();

    assert_eq!(log.count(EventKind::AssertionEvicted), 1);
    assert!(engine.tms().get(second.id).is_none());
    assert!(engine.tms().get(first.id).unwrap().is_active());
    assert!(engine.tms().get(third.id).unwrap().is_active());
}

#[tokio::test]
async fn note_kbs_are_isolated_until_activated() {
    let engine = engine();
    let note = noesis::NoteId::new("note-1");
    engine.assert_input(t("(=> (p ?x) (q ?x))"), "test", None);

    // The note is not in the active set: its assertion triggers nothing.
    engine.assert_input(t("(p a)"), "test", Some(note.clone()));
    assert!(
        engine
            .assertions_in(&KbId::note(&note))
            .iter()
            .all(|a| a.term.kif() != "(q a)")
    );

    // Activate and re-trigger.
    engine.set_note_active(&note, true);
    engine.assert_input(t("(p b)"), "test", Some(note.clone()));
    assert!(
        engine
            .assertions_in(&KbId::note(&note))
            .iter()
            .any(|a| a.term.kif() == "(q b)")
    );
}

#[tokio::test]
async fn removing_a_note_empties_its_kb_and_rules() {
    let engine = engine();
    let note = noesis::NoteId::new("note-1");
    engine.set_note_active(&note, true);
    engine.assert_input(t("(=> (p ?x) (q ?x))"), "test", Some(note.clone()));
    engine.assert_input(t("(p a)"), "test", Some(note.clone()));
    assert!(!engine.assertions_in(&KbId::note(&note)).is_empty());

    engine.remove_note(&note);
    assert!(engine.assertions_in(&KbId::note(&note)).is_empty());
    assert!(engine.rules().is_empty());
}

#[tokio::test]
async fn depth_limit_bounds_derivation_chains() {
    let engine = engine();
    for i in 0..6 {
        engine.assert_input(
            t(&format!("(=> (d{i} ?x) (d{} ?x))", i + 1)),
            "test",
            None,
        );
    }
    engine.assert_input(t("(d0 a)"), "test", None);

    let kifs: Vec<String> = engine
        .assertions_in(&KbId::global())
        .iter()
        .map(|a| a.term.kif().to_string())
        .collect();
    // Default depth limit is 4: d4 is the deepest derivation.
    assert!(kifs.contains(&"(d4 a)".to_string()));
    assert!(!kifs.contains(&"(d5 a)".to_string()));
    for assertion in engine.assertions_in(&KbId::global()) {
        assert!(assertion.depth <= engine.config().reasoning_depth_limit);
    }
}

#[tokio::test]
async fn trivial_and_subsumed_inputs_are_rejected() {
    let engine = engine();
    assert!(engine.assert_input(t("(= a a)"), "test", None).is_none());
    assert!(
        engine
            .assert_input(t("(not (same b b))"), "test", None)
            .is_none()
    );

    engine.assert_input(t("(instance ?x Dog)"), "test", None).unwrap();
    assert!(
        engine
            .assert_input(t("(instance MyDog Dog)"), "test", None)
            .is_none(),
        "subsumed by the variable pattern"
    );
}

#[tokio::test]
async fn status_event_reports_counts() {
    let engine = engine();
    engine.assert_input(t("(=> (p ?x) (q ?x))"), "test", None);
    engine.assert_input(t("(p a)"), "test", None);

    let log = EventLog::subscribe(&engine, &[EventKind::SystemStatus]);
    engine.emit_status("running");
    let events = log.events();
    let EngineEvent::SystemStatus {
        rule_count,
        kb_count,
        ..
    } = &events[0]
    else {
        panic!("expected status");
    };
    assert_eq!(*rule_count, 1);
    assert!(*kb_count >= 1);
}
