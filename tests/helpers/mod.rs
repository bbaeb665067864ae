//! Shared fixtures for the integration suites.

#![allow(dead_code)]

use std::sync::Arc;

use parking_lot::Mutex;

use noesis::events::{EngineEvent, EventKind};
use noesis::{Engine, EngineConfig, Term};

/// Engine on the test runtime.
pub fn engine() -> Arc<Engine> {
    Engine::with_runtime(EngineConfig::default(), tokio::runtime::Handle::current())
}

/// Engine with a specific KB capacity.
pub fn engine_with_capacity(capacity: usize) -> Arc<Engine> {
    Engine::with_runtime(
        EngineConfig::with_capacity(capacity),
        tokio::runtime::Handle::current(),
    )
}

pub fn t(source: &str) -> Term {
    noesis::term::parse_term(source).unwrap()
}

/// Records every event of the subscribed kinds.
#[derive(Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<EngineEvent>>>,
}

impl EventLog {
    pub fn subscribe(engine: &Engine, kinds: &[EventKind]) -> EventLog {
        let log = EventLog::default();
        for kind in kinds {
            let sink = log.events.clone();
            engine.bus().subscribe(*kind, move |event| {
                sink.lock().push(event.clone());
            });
        }
        log
    }

    pub fn events(&self) -> Vec<EngineEvent> {
        self.events.lock().clone()
    }

    pub fn count(&self, kind: EventKind) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|event| event.kind() == kind)
            .count()
    }
}
