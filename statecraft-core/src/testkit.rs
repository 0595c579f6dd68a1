//! Fixture helpers shared by this crate's own tests and by downstream
//! integration tests (`statecraft-server/tests`). Not part of the public
//! contract beyond `#[cfg(test)]`/dev-dependency use.

use crate::graph::StateGraph;
use crate::loader::load;
use crate::machine::Machine;
use crate::model::{ActionTable, GuardTable};
use std::sync::Arc;

/// Parses a JSON machine definition, panicking with the loader's error on
/// failure — fine in tests, never used from non-test code.
pub fn graph_from_json(doc: &serde_json::Value) -> Arc<StateGraph> {
    Arc::new(load(doc).expect("fixture machine definition must load"))
}

/// Builds and starts a machine in one call for tests that don't care about
/// the `Created` phase.
pub fn running_machine(
    id: &str,
    doc: &serde_json::Value,
    actions: ActionTable,
    guards: GuardTable,
) -> Machine {
    let graph = graph_from_json(doc);
    let mut machine = Machine::build(id, graph, actions, guards).expect("fixture machine must build");
    machine.start(None);
    machine
}

/// Runs `body` with `tokio`'s paused virtual clock, matching the teacher's
/// `#[tokio::test(start_paused = true)]` convention for delay-dependent
/// tests rather than sleeping in real time.
#[macro_export]
macro_rules! with_paused_clock {
    ($body:expr) => {{
        tokio::time::pause();
        $body
    }};
}
