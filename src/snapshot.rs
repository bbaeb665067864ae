//! Snapshot persistence.
//!
//! A snapshot is one JSON document holding the notes, the flat list of
//! active assertions, the rules, and the configuration. Loading clears the
//! core, re-installs the config, restores notes and assertions, re-links
//! rules to their axioms, and rebuilds the per-KB indices.

use std::path::Path;

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

use crate::assertion::{Assertion, AssertionId, AssertionType, KbId, NoteId};
use crate::config::EngineConfig;
use crate::engine::Engine;
use crate::error::EngineError;
use crate::reason::RULES_KB;
use crate::rules::{Rule, RuleId};
use crate::term::Term;

/// A note as the host sees it. The core only stores and restores these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub id: NoteId,
    pub title: String,
    pub text: String,
    pub status: String,
}

/// Persisted form of an assertion (all fields of the data model).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssertionRecord {
    pub id: AssertionId,
    pub term: Term,
    pub priority: f64,
    pub timestamp: u64,
    pub source_note_id: Option<NoteId>,
    pub justifications: Vec<AssertionId>,
    #[serde(rename = "type")]
    pub ty: AssertionType,
    pub quantified_vars: Vec<SmolStr>,
    pub derivation_depth: u32,
    pub kb_id: KbId,
    pub is_active: bool,
}

impl AssertionRecord {
    pub fn capture(assertion: &Assertion) -> Self {
        Self {
            id: assertion.id,
            term: assertion.term.clone(),
            priority: assertion.priority,
            timestamp: assertion.timestamp,
            source_note_id: assertion.source_note.clone(),
            justifications: assertion.justifications.clone(),
            ty: assertion.ty,
            quantified_vars: assertion.quantified_vars.clone(),
            derivation_depth: assertion.depth,
            kb_id: assertion.kb.clone(),
            is_active: assertion.is_active(),
        }
    }

    pub fn restore(self) -> Assertion {
        Assertion::restore(
            self.id,
            self.term,
            self.priority,
            self.timestamp,
            self.source_note_id,
            self.justifications,
            self.ty,
            self.quantified_vars,
            self.derivation_depth,
            self.kb_id,
            self.is_active,
        )
    }
}

/// Persisted form of a rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleRecord {
    pub id: RuleId,
    pub form: Term,
    pub priority: f64,
    pub source_note_id: Option<NoteId>,
}

/// The whole persisted document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub notes: Vec<Note>,
    pub assertions: Vec<AssertionRecord>,
    pub rules: Vec<RuleRecord>,
    pub config: EngineConfig,
}

impl Snapshot {
    /// Capture the current engine state.
    pub fn capture(engine: &Engine) -> Snapshot {
        Snapshot {
            notes: engine.notes(),
            assertions: engine
                .tms()
                .all_active()
                .iter()
                .map(|a| AssertionRecord::capture(a))
                .collect(),
            rules: engine
                .rules()
                .iter()
                .map(|rule| RuleRecord {
                    id: rule.id,
                    form: rule.form.clone(),
                    priority: rule.priority,
                    source_note_id: rule.source_note.clone(),
                })
                .collect(),
            config: engine.config(),
        }
    }

    /// Replace the engine's state with this snapshot: clear, install
    /// config, restore notes, bulk-add assertions, re-link rules, rebuild
    /// per-KB indices.
    pub fn install(self, engine: &Engine) {
        engine.tms().clear();
        engine.registry().reset();
        engine.rule_set().clear();
        engine.set_config(self.config);

        for note in self.notes {
            engine.upsert_note(note);
        }

        let mut kb_ids: Vec<KbId> = Vec::new();
        let assertions: Vec<Assertion> = self
            .assertions
            .into_iter()
            .map(|record| {
                if record.kb_id.as_str() != RULES_KB && !kb_ids.contains(&record.kb_id) {
                    kb_ids.push(record.kb_id.clone());
                }
                record.restore()
            })
            .collect();
        engine.tms().bulk_load(assertions);

        let rules_kb = KbId(SmolStr::new_static(RULES_KB));
        for record in self.rules {
            // The rule's axiom travelled in the assertion batch; find it by
            // form, or mint a fresh one for a snapshot that lacks it.
            let axiom = engine
                .tms()
                .active_with_term(&record.form, &rules_kb)
                .first()
                .map(|a| a.id);
            match axiom {
                Some(axiom) => {
                    match Rule::new(
                        record.form,
                        record.priority,
                        record.source_note_id,
                        axiom,
                    ) {
                        Ok(rule) => {
                            engine.rule_set().add(rule);
                        }
                        Err(error) => tracing::warn!("snapshot rule dropped: {error}"),
                    }
                }
                None => {
                    engine.context().add_rule(
                        record.form,
                        record.priority,
                        record.source_note_id,
                        Vec::new(),
                        0,
                    );
                }
            }
        }

        for kb_id in kb_ids {
            engine.registry().get_or_create(&kb_id).rebuild_indices();
        }
    }

    pub fn to_json(&self) -> Result<String, EngineError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(text: &str) -> Result<Snapshot, EngineError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), EngineError> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    pub fn load_from(path: &Path) -> Result<Snapshot, EngineError> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }
}

/// Convenience wrappers on the engine.
impl Engine {
    pub fn snapshot(&self) -> Snapshot {
        Snapshot::capture(self)
    }

    pub fn load_snapshot(&self, snapshot: Snapshot) {
        snapshot.install(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_roundtrip_preserves_flags() {
        let term = crate::term::parse_term("(= (f a b) c)").unwrap();
        let assertion = Assertion::restore(
            AssertionId(7),
            term,
            0.8,
            3,
            None,
            vec![AssertionId(1)],
            AssertionType::Ground,
            Vec::new(),
            1,
            KbId::global(),
            true,
        );
        let record = AssertionRecord::capture(&assertion);
        let text = serde_json::to_string(&record).unwrap();
        let back: AssertionRecord = serde_json::from_str(&text).unwrap();
        let restored = back.restore();
        assert_eq!(restored.id, assertion.id);
        assert_eq!(restored.term, assertion.term);
        assert!(restored.is_equality);
        assert!(restored.is_oriented_equality);
        assert!(restored.is_active());
    }
}
