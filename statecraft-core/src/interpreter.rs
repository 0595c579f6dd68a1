use crate::graph::StateGraph;
use crate::model::{ActionTable, GuardTable, Transition};
use crate::value::{Context, EventPayload};
use std::collections::BTreeSet;

/// The set of currently active state ids — both leaves and their ancestors
/// (§3: "Configuration"). Kept as a `BTreeSet` ordered by id text, but all
/// code that cares about document order re-sorts via `StateGraph::doc_index`.
pub type Configuration = BTreeSet<String>;

/// An append-only record of what one macrostep did, used for diagnostics and
/// by tests asserting scenario behavior (§8). Not part of the wire snapshot.
#[derive(Debug, Clone, PartialEq)]
pub enum InterpreterEvent {
    Entered(String),
    Exited(String),
    ActionRun { node: String, symbol: String },
    ActionFailed { node: String, symbol: String, error: String },
    GuardEvaluated { symbol: String, result: bool },
    TransitionTaken {
        source: String,
        event: Option<String>,
        targets: Vec<String>,
    },
    /// An action in this transition's list panicked; the remainder of the
    /// list was skipped and the machine moved to the `faulted` phase (§7).
    Faulted { node: String, reason: String },
}

#[derive(Debug, Default)]
pub struct StepOutcome {
    pub events: Vec<InterpreterEvent>,
    pub faulted: bool,
}

/// Stateless algorithm over a shared, immutable [`StateGraph`]. All mutable
/// state (the `Configuration`, `Context`) is owned by the caller
/// ([`crate::machine::Machine`]) and threaded through explicitly.
pub struct Interpreter<'g> {
    graph: &'g StateGraph,
}

impl<'g> Interpreter<'g> {
    pub fn new(graph: &'g StateGraph) -> Self {
        Self { graph }
    }

    pub fn graph(&self) -> &StateGraph {
        self.graph
    }

    /// The configuration a freshly created machine starts in: the root's
    /// `descendantsToEnter` chain (§4.3 "initial entry").
    pub fn initial_configuration(&self) -> Configuration {
        self.graph
            .descendants_to_enter(self.graph.root_id())
            .into_iter()
            .collect()
    }

    /// Entry actions for `ids`, document order, paired with the node that
    /// declares each action.
    pub fn entry_actions_for(&self, ids: &[String]) -> Vec<(String, String)> {
        let mut ordered = ids.to_vec();
        ordered.sort_by_key(|id| self.graph.doc_index(id));
        ordered
            .into_iter()
            .flat_map(|id| {
                let actions = self.graph.node(&id).entry_actions.clone();
                actions.into_iter().map(move |a| (id.clone(), a))
            })
            .collect()
    }

    fn exit_actions_for(&self, ids: &[String]) -> Vec<(String, String)> {
        let mut ordered = ids.to_vec();
        ordered.sort_by_key(|id| self.graph.doc_index(id));
        ordered.reverse();
        ordered
            .into_iter()
            .flat_map(|id| {
                let actions = self.graph.node(&id).exit_actions.clone();
                actions.into_iter().map(move |a| (id.clone(), a))
            })
            .collect()
    }

    /// One macrostep: processes `event_name` (or `None` for an `always`
    /// sweep), then exhausts every resulting `always` transition before
    /// returning, per §4.3's "run to completion" rule. The caller derives
    /// which nodes to arm/cancel delay timers for from `outcome.events`
    /// (`InterpreterEvent::Entered`/`Exited`) rather than via a callback, so
    /// this has no closure-capture entanglement with the caller's own
    /// mutable state. Any `requestSend` calls actions make land in
    /// `pending_sends`.
    #[allow(clippy::too_many_arguments)]
    pub fn step(
        &self,
        configuration: &mut Configuration,
        context: &mut Context,
        actions: &ActionTable,
        guards: &GuardTable,
        event_name: Option<&str>,
        payload: &EventPayload,
        pending_sends: &mut Vec<crate::machine::OutgoingSend>,
    ) -> StepOutcome {
        let mut outcome = StepOutcome::default();
        let faulted = self.microstep(
            configuration,
            context,
            actions,
            guards,
            event_name,
            payload,
            pending_sends,
            &mut outcome.events,
        );
        if faulted {
            outcome.faulted = true;
            return outcome;
        }

        // Exhaust `always` transitions (document-order sweeps) until a fixed
        // point — this is the "run to completion" part of a macrostep.
        loop {
            let before = configuration.clone();
            let faulted = self.microstep(
                configuration,
                context,
                actions,
                guards,
                None,
                payload,
                pending_sends,
                &mut outcome.events,
            );
            if faulted {
                outcome.faulted = true;
                break;
            }
            if *configuration == before {
                break;
            }
        }
        outcome
    }

    #[allow(clippy::too_many_arguments)]
    fn microstep(
        &self,
        configuration: &mut Configuration,
        context: &mut Context,
        action_table: &ActionTable,
        guards: &GuardTable,
        event_name: Option<&str>,
        payload: &EventPayload,
        pending_sends: &mut Vec<crate::machine::OutgoingSend>,
        trace: &mut Vec<InterpreterEvent>,
    ) -> bool {
        let enabled = self.select_transitions(configuration, event_name, context, payload, guards, trace);
        if enabled.is_empty() {
            return false;
        }

        // Internal (targetless) transitions only run actions.
        let (internal, external): (Vec<_>, Vec<_>) = enabled.into_iter().partition(|t| t.internal);

        for t in &internal {
            trace.push(InterpreterEvent::TransitionTaken {
                source: t.source.clone(),
                event: event_name.map(str::to_string),
                targets: Vec::new(),
            });
            if self.run_action_list(&t.source, &t.actions, context, action_table, payload, pending_sends, trace) {
                return true;
            }
        }

        if external.is_empty() {
            return false;
        }

        // Global exit set: union over all transitions of everything strictly
        // below each transition's LCCA that is currently active, highest
        // doc-order-descendant-first so children exit before parents.
        let mut exit_set: Vec<String> = Vec::new();
        let mut entry_set: Vec<String> = Vec::new();

        for t in &external {
            let target = t
                .targets
                .first()
                .expect("external transition has at least one target");
            let lcca = self.graph.lcca_multi(&t.source, &t.targets);
            for active in configuration.iter() {
                if self.graph.is_proper_ancestor(&lcca, active) && !exit_set.contains(active) {
                    exit_set.push(active.clone());
                }
            }
            for target in std::iter::once(target).chain(t.targets.iter().skip(1)) {
                for id in self.graph.descendants_to_enter(target) {
                    if !entry_set.contains(&id) {
                        entry_set.push(id);
                    }
                }
            }
            // also re-enter ancestors between lcca and target that aren't
            // already active (compound re-entry path)
            for target in &t.targets {
                for anc in self.graph.ancestors(target) {
                    if self.graph.is_proper_ancestor(&lcca, &anc) && !entry_set.contains(&anc) {
                        entry_set.push(anc);
                    }
                }
            }
        }

        exit_set.sort_by_key(|id| std::cmp::Reverse(self.graph.doc_index(id)));
        entry_set.sort_by_key(|id| self.graph.doc_index(id));

        for id in &exit_set {
            for action in &self.graph.node(id).exit_actions {
                if self.run_action_list(id, std::slice::from_ref(action), context, action_table, payload, pending_sends, trace) {
                    return true;
                }
            }
            configuration.remove(id);
            trace.push(InterpreterEvent::Exited(id.clone()));
        }

        for t in &external {
            trace.push(InterpreterEvent::TransitionTaken {
                source: t.source.clone(),
                event: event_name.map(str::to_string),
                targets: t.targets.clone(),
            });
            if self.run_action_list(&t.source, &t.actions, context, action_table, payload, pending_sends, trace) {
                return true;
            }
        }

        for id in &entry_set {
            configuration.insert(id.clone());
            trace.push(InterpreterEvent::Entered(id.clone()));
            for action in &self.graph.node(id).entry_actions {
                if self.run_action_list(id, std::slice::from_ref(action), context, action_table, payload, pending_sends, trace) {
                    return true;
                }
            }
        }

        false
    }

    #[allow(clippy::too_many_arguments)]
    fn run_action_list(
        &self,
        node: &str,
        symbols: &[String],
        context: &mut Context,
        action_table: &ActionTable,
        payload: &EventPayload,
        pending_sends: &mut Vec<crate::machine::OutgoingSend>,
        trace: &mut Vec<InterpreterEvent>,
    ) -> bool {
        for symbol in symbols {
            let mut ctx = crate::machine::ActionCtx::new(context, pending_sends, payload);
            match action_table.run(symbol, &mut ctx, payload) {
                Ok(()) => trace.push(InterpreterEvent::ActionRun {
                    node: node.to_string(),
                    symbol: symbol.clone(),
                }),
                Err(error) => {
                    trace.push(InterpreterEvent::ActionFailed {
                        node: node.to_string(),
                        symbol: symbol.clone(),
                        error: error.clone(),
                    });
                    trace.push(InterpreterEvent::Faulted {
                        node: node.to_string(),
                        reason: error,
                    });
                    return true;
                }
            }
        }
        false
    }

    /// Selects the single highest-priority enabled transition per active
    /// leaf's ancestor chain (innermost match wins, §4.3), then drops any
    /// transition whose exit set would conflict with one selected earlier in
    /// document order (§4.3 "conflict resolution").
    fn select_transitions(
        &self,
        configuration: &Configuration,
        event_name: Option<&str>,
        context: &Context,
        payload: &EventPayload,
        guards: &GuardTable,
        trace: &mut Vec<InterpreterEvent>,
    ) -> Vec<Transition> {
        let mut leaves: Vec<&String> = configuration
            .iter()
            .filter(|id| self.graph.node(id).is_leaf())
            .collect();
        leaves.sort_by_key(|id| self.graph.doc_index(id));

        let mut per_leaf = Vec::new();
        for leaf in leaves {
            let chain = self.graph.ancestors(leaf);
            for anc in chain.iter().rev() {
                let node = self.graph.node(anc);
                let candidates: &[Transition] = match event_name {
                    Some(name) => node.on.get(name).map(Vec::as_slice).unwrap_or(&[]),
                    None => &node.always,
                };
                let mut matched = None;
                for t in candidates {
                    let ok = match &t.guard {
                        Some(g) => {
                            let result = guards.evaluate(g, context, payload);
                            trace.push(InterpreterEvent::GuardEvaluated {
                                symbol: g.clone(),
                                result,
                            });
                            result
                        }
                        None => true,
                    };
                    if ok {
                        matched = Some(t.clone());
                        break;
                    }
                }
                if let Some(t) = matched {
                    per_leaf.push(t);
                    break;
                }
            }
        }

        // Conflict resolution: two transitions conflict if their exit sets
        // (computed from each one's own LCCA) intersect. Earlier in document
        // order (by source) wins; the loser is dropped for this microstep.
        let mut selected: Vec<Transition> = Vec::new();
        'candidate: for t in per_leaf {
            let lcca = self.graph.lcca_multi(&t.source, &t.targets);
            let exit_set: BTreeSet<String> = configuration
                .iter()
                .filter(|active| self.graph.is_proper_ancestor(&lcca, active))
                .cloned()
                .collect();
            for already in &selected {
                let already_lcca = self.graph.lcca_multi(&already.source, &already.targets);
                let already_exit: BTreeSet<String> = configuration
                    .iter()
                    .filter(|active| self.graph.is_proper_ancestor(&already_lcca, active))
                    .cloned()
                    .collect();
                if !exit_set.is_disjoint(&already_exit) {
                    continue 'candidate;
                }
            }
            selected.push(t);
        }
        selected
    }

    /// `exit_actions_for` is exposed for the machine runtime's stop/reset path.
    pub fn exit_actions_for_configuration(&self, configuration: &Configuration) -> Vec<(String, String)> {
        self.exit_actions_for(&configuration.iter().cloned().collect::<Vec<_>>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::load;
    use crate::model::{ActionTable, GuardTable};
    use serde_json::json;

    fn toggle() -> StateGraph {
        load(&json!({
            "id": "toggle",
            "initial": "off",
            "states": {
                "off": { "on": { "FLIP": "on" } },
                "on": { "on": { "FLIP": "off" } }
            }
        }))
        .unwrap()
    }

    #[test]
    fn initial_configuration_enters_default_leaf() {
        let graph = toggle();
        let interp = Interpreter::new(&graph);
        let config = interp.initial_configuration();
        assert!(config.contains("toggle.off"));
        assert!(config.contains("toggle"));
    }

    #[test]
    fn flip_transitions_off_to_on() {
        let graph = toggle();
        let interp = Interpreter::new(&graph);
        let mut config = interp.initial_configuration();
        let mut context = Context::new();
        let actions = ActionTable::new();
        let guards = GuardTable::new();

        let outcome = interp.step(
            &mut config,
            &mut context,
            &actions,
            &guards,
            Some("FLIP"),
            &EventPayload::Null,
            &mut Vec::new(),
        );
        assert!(!outcome.faulted);
        assert!(config.contains("toggle.on"));
        assert!(!config.contains("toggle.off"));
    }

    #[test]
    fn guarded_transition_blocks_when_false() {
        let graph = load(&json!({
            "id": "m",
            "initial": "a",
            "states": {
                "a": { "on": { "GO": { "target": "b", "cond": "never" } } },
                "b": {}
            }
        }))
        .unwrap();
        let interp = Interpreter::new(&graph);
        let mut config = interp.initial_configuration();
        let mut context = Context::new();
        let actions = ActionTable::new();
        let guards = GuardTable::new().with_guard("never", |_: &Context, _: &EventPayload| false);

        let outcome = interp.step(
            &mut config,
            &mut context,
            &actions,
            &guards,
            Some("GO"),
            &EventPayload::Null,
            &mut Vec::new(),
        );
        assert!(!outcome.faulted);
        assert!(config.contains("m.a"));
    }

    #[test]
    fn action_panic_faults_the_step() {
        let graph = load(&json!({
            "id": "m",
            "initial": "a",
            "states": {
                "a": { "on": { "GO": { "target": "b", "actions": ["boom"] } } },
                "b": {}
            }
        }))
        .unwrap();
        let interp = Interpreter::new(&graph);
        let mut config = interp.initial_configuration();
        let mut context = Context::new();
        let actions = ActionTable::new().with_action("boom", |_: &mut crate::machine::ActionCtx<'_>, _: &EventPayload| {
            panic!("boom")
        });
        let guards = GuardTable::new();

        let outcome = interp.step(
            &mut config,
            &mut context,
            &actions,
            &guards,
            Some("GO"),
            &EventPayload::Null,
            &mut Vec::new(),
        );
        assert!(outcome.faulted);
    }

    #[test]
    fn always_transition_runs_to_completion() {
        let graph = load(&json!({
            "id": "m",
            "initial": "a",
            "states": {
                "a": { "always": { "target": "b" } },
                "b": { "always": { "target": "c", "cond": "neverTrue" } },
                "c": {}
            }
        }))
        .unwrap();
        let interp = Interpreter::new(&graph);
        let mut config = interp.initial_configuration();
        let mut context = Context::new();
        let actions = ActionTable::new();
        let guards = GuardTable::new().with_guard("neverTrue", |_: &Context, _: &EventPayload| false);

        let outcome = interp.step(
            &mut config,
            &mut context,
            &actions,
            &guards,
            None,
            &EventPayload::Null,
            &mut Vec::new(),
        );
        assert!(!outcome.faulted);
        assert!(config.contains("m.b"));
    }
}
