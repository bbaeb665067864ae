//! Snapshot round-trips: capture, persist, reload, and keep reasoning.

mod helpers;

use helpers::{engine, t};

use noesis::snapshot::{Note, Snapshot};
use noesis::{AnswerStatus, KbId, NoteId};

#[tokio::test]
async fn snapshot_roundtrips_through_json() {
    let source = engine();
    source.upsert_note(Note {
        id: NoteId::new("note-1"),
        title: "Pets".to_string(),
        text: "facts about pets".to_string(),
        status: "active".to_string(),
    });
    source.set_note_active(&NoteId::new("note-1"), true);
    source.assert_input(t("(=> (instance ?X Dog) (mammal ?X))"), "test", None);
    source.assert_input(t("(instance Rex Dog)"), "test", None);
    source.assert_input(t("(likes Rex bones)"), "test", Some(NoteId::new("note-1")));

    let text = source.snapshot().to_json().unwrap();
    let snapshot = Snapshot::from_json(&text).unwrap();

    let target = engine();
    target.load_snapshot(snapshot);

    assert_eq!(target.notes().len(), 1);
    assert_eq!(target.rules().len(), 1);
    let global: Vec<String> = target
        .assertions_in(&KbId::global())
        .iter()
        .map(|a| a.term.kif().to_string())
        .collect();
    assert!(global.contains(&"(instance Rex Dog)".to_string()));
    assert!(global.contains(&"(mammal Rex)".to_string()), "derivations persist");
    assert!(
        target
            .assertions_in(&KbId::note(&NoteId::new("note-1")))
            .iter()
            .any(|a| a.term.kif() == "(likes Rex bones)")
    );
}

#[tokio::test]
async fn restored_engine_answers_queries() {
    let source = engine();
    source.assert_input(t("(instance MyCat Cat)"), "test", None);
    source.assert_input(t("(instance YourCat Cat)"), "test", None);
    let snapshot = source.snapshot();

    let target = engine();
    target.load_snapshot(snapshot);
    let answer = target.ask_bindings(t("(instance ?X Cat)")).await;
    assert_eq!(answer.status, AnswerStatus::Success);
    assert_eq!(answer.bindings.len(), 2);
}

#[tokio::test]
async fn restored_rules_keep_firing() {
    let source = engine();
    source.assert_input(t("(=> (instance ?X Dog) (mammal ?X))"), "test", None);
    let snapshot = source.snapshot();

    let target = engine();
    target.load_snapshot(snapshot);
    target.assert_input(t("(instance Fido Dog)"), "test", None);
    assert!(
        target
            .assertions_in(&KbId::global())
            .iter()
            .any(|a| a.term.kif() == "(mammal Fido)")
    );
}

#[tokio::test]
async fn retraction_cascades_survive_a_reload() {
    let source = engine();
    source.assert_input(t("(=> (instance ?X Dog) (mammal ?X))"), "test", None);
    let fact = source
        .assert_input(t("(instance Rex Dog)"), "test", None)
        .unwrap();
    let snapshot = source.snapshot();

    let target = engine();
    target.load_snapshot(snapshot);
    let derived_id = target
        .assertions_in(&KbId::global())
        .iter()
        .find(|a| a.term.kif() == "(mammal Rex)")
        .map(|a| a.id)
        .expect("derivation restored from snapshot");

    target.retract(noesis::events::RetractionTarget::ById(fact.id), "test");
    assert!(!target.tms().get(derived_id).unwrap().is_active());
}

#[test]
fn snapshot_persists_to_disk() {
    let engine = noesis::Engine::new(noesis::EngineConfig::with_capacity(64));
    engine.assert_input(t("(p a)"), "test", None);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("snapshot.json");
    engine.snapshot().save_to(&path).unwrap();

    let restored = Snapshot::load_from(&path).unwrap();
    assert_eq!(restored.config.global_kb_capacity, 64);
    assert_eq!(restored.assertions.len(), 1);
}
