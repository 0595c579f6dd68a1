use super::compile::{CompiledProgram, CompiledTransition};
use crate::model::StateKind;
use crate::value::{Context, EventPayload};

/// Bitset-backed configuration over a [`CompiledProgram`]'s dense state ids.
/// Equivalent to [`crate::interpreter::Configuration`] but O(1) membership
/// and no string hashing on the hot path (§4.7's whole point).
#[derive(Clone, Debug, Default)]
pub struct DenseConfiguration {
    bits: Vec<bool>,
}

impl DenseConfiguration {
    pub fn new(state_count: usize) -> Self {
        Self {
            bits: vec![false; state_count],
        }
    }

    pub fn contains(&self, id: u16) -> bool {
        self.bits[id as usize]
    }

    pub fn insert(&mut self, id: u16) {
        self.bits[id as usize] = true;
    }

    pub fn remove(&mut self, id: u16) {
        self.bits[id as usize] = false;
    }

    pub fn iter(&self) -> impl Iterator<Item = u16> + '_ {
        self.bits
            .iter()
            .enumerate()
            .filter_map(|(i, &on)| on.then_some(i as u16))
    }

    /// Resolves back to the string ids the reflective interpreter uses, for
    /// equivalence assertions and snapshotting.
    pub fn to_string_set(&self, program: &CompiledProgram) -> std::collections::BTreeSet<String> {
        self.iter().map(|id| program.state_id(id).to_string()).collect()
    }
}

pub struct ArrayInterpreter<'p> {
    program: &'p CompiledProgram,
}

impl<'p> ArrayInterpreter<'p> {
    pub fn new(program: &'p CompiledProgram) -> Self {
        Self { program }
    }

    pub fn initial_configuration(&self) -> DenseConfiguration {
        let mut config = DenseConfiguration::new(self.program.state_count());
        for id in self.descendants_to_enter(self.program.root) {
            config.insert(id);
        }
        config
    }

    fn descendants_to_enter(&self, target: u16) -> Vec<u16> {
        let mut out = Vec::new();
        self.descendants_to_enter_into(target, &mut out);
        out
    }

    fn descendants_to_enter_into(&self, target: u16, out: &mut Vec<u16>) {
        out.push(target);
        match self.program.kind[target as usize] {
            StateKind::Atomic | StateKind::Final => {}
            StateKind::Compound => {
                if let Some(initial) = self.program.initial[target as usize] {
                    self.descendants_to_enter_into(initial, out);
                }
            }
            StateKind::Parallel => {
                for &child in &self.program.children[target as usize].clone() {
                    self.descendants_to_enter_into(child, out);
                }
            }
        }
    }

    fn ancestors(&self, id: u16) -> Vec<u16> {
        let mut chain = Vec::new();
        let mut current = Some(id);
        while let Some(cur) = current {
            chain.push(cur);
            current = self.program.parent[cur as usize];
        }
        chain.reverse();
        chain
    }

    fn is_proper_ancestor(&self, maybe_ancestor: u16, id: u16) -> bool {
        maybe_ancestor != id && self.ancestors(id).contains(&maybe_ancestor)
    }

    fn lcca(&self, a: u16, b: u16) -> u16 {
        let chain_a = self.ancestors(a);
        let chain_b = self.ancestors(b);
        let mut common = chain_a[0];
        for (&x, &y) in chain_a.iter().zip(chain_b.iter()) {
            if x == y {
                common = x;
            } else {
                break;
            }
        }
        common
    }

    fn lcca_multi(&self, source: u16, targets: &[u16]) -> u16 {
        let mut acc = source;
        for &t in targets {
            acc = self.lcca(acc, t);
        }
        acc
    }

    /// One run-to-completion macrostep, mirroring
    /// [`crate::interpreter::Interpreter::step`] exactly but over dense ids.
    /// Returns `true` if an action panicked (fault-containment, §7).
    pub fn step(
        &self,
        configuration: &mut DenseConfiguration,
        context: &mut Context,
        actions: &crate::model::ActionTable,
        guards: &crate::model::GuardTable,
        event_name: Option<&str>,
        payload: &EventPayload,
    ) -> bool {
        if self.microstep(configuration, context, actions, guards, event_name, payload) {
            return true;
        }
        loop {
            let before = configuration.bits.clone();
            if self.microstep(configuration, context, actions, guards, None, payload) {
                return true;
            }
            if configuration.bits == before {
                break;
            }
        }
        false
    }

    fn microstep(
        &self,
        configuration: &mut DenseConfiguration,
        context: &mut Context,
        action_table: &crate::model::ActionTable,
        guards: &crate::model::GuardTable,
        event_name: Option<&str>,
        payload: &EventPayload,
    ) -> bool {
        let event_id = event_name.and_then(|name| self.program.event_symbols.get(name));
        if event_name.is_some() && event_id.is_none() {
            return false;
        }

        let enabled = self.select_transitions(configuration, event_id, context, guards, payload);
        if enabled.is_empty() {
            return false;
        }

        let (internal, external): (Vec<_>, Vec<_>) = enabled.into_iter().partition(|(_, t)| t.internal);

        for (_, t) in &internal {
            if self.run_actions(&t.actions, context, action_table, payload) {
                return true;
            }
        }

        if external.is_empty() {
            return false;
        }

        let mut exit_set = Vec::new();
        let mut entry_set = Vec::new();

        for (source, t) in &external {
            let lcca = self.lcca_multi(*source, &t.targets);
            for active in configuration.iter() {
                if self.is_proper_ancestor(lcca, active) && !exit_set.contains(&active) {
                    exit_set.push(active);
                }
            }
            for &target in &t.targets {
                for id in self.descendants_to_enter(target) {
                    if !entry_set.contains(&id) {
                        entry_set.push(id);
                    }
                }
                for anc in self.ancestors(target) {
                    if self.is_proper_ancestor(lcca, anc) && !entry_set.contains(&anc) {
                        entry_set.push(anc);
                    }
                }
            }
        }

        exit_set.sort_by_key(|&id| std::cmp::Reverse(self.program.doc_index[id as usize]));
        entry_set.sort_by_key(|&id| self.program.doc_index[id as usize]);

        for &id in &exit_set {
            if self.run_actions(&self.program.exit_actions[id as usize].clone(), context, action_table, payload) {
                return true;
            }
            configuration.remove(id);
        }

        for (_, t) in &external {
            if self.run_actions(&t.actions, context, action_table, payload) {
                return true;
            }
        }

        for &id in &entry_set {
            configuration.insert(id);
            if self.run_actions(&self.program.entry_actions[id as usize].clone(), context, action_table, payload) {
                return true;
            }
        }

        false
    }

    fn select_transitions(
        &self,
        configuration: &DenseConfiguration,
        event_id: Option<u16>,
        context: &Context,
        guards: &crate::model::GuardTable,
        payload: &EventPayload,
    ) -> Vec<(u16, CompiledTransition)> {
        let mut leaves: Vec<u16> = configuration
            .iter()
            .filter(|&id| matches!(self.program.kind[id as usize], StateKind::Atomic | StateKind::Final))
            .collect();
        leaves.sort_by_key(|&id| self.program.doc_index[id as usize]);

        let mut per_leaf = Vec::new();
        for leaf in leaves {
            let chain = self.ancestors(leaf);
            for &anc in chain.iter().rev() {
                let candidates: &[CompiledTransition] = match event_id {
                    Some(ev) => self.program.on[anc as usize]
                        .get(&ev)
                        .map(Vec::as_slice)
                        .unwrap_or(&[]),
                    None => &self.program.always[anc as usize],
                };
                let mut matched = None;
                for t in candidates {
                    let ok = match t.guard {
                        Some(g) => guards.evaluate(self.program.guard_symbols.resolve(g), context, payload),
                        None => true,
                    };
                    if ok {
                        matched = Some(t.clone());
                        break;
                    }
                }
                if let Some(t) = matched {
                    per_leaf.push((anc, t));
                    break;
                }
            }
        }

        let mut selected: Vec<(u16, CompiledTransition)> = Vec::new();
        'candidate: for (source, t) in per_leaf {
            let lcca = self.lcca_multi(source, &t.targets);
            let exit_set: std::collections::BTreeSet<u16> = configuration
                .iter()
                .filter(|&active| self.is_proper_ancestor(lcca, active))
                .collect();
            for (already_source, already) in &selected {
                let already_lcca = self.lcca_multi(*already_source, &already.targets);
                let already_exit: std::collections::BTreeSet<u16> = configuration
                    .iter()
                    .filter(|&active| self.is_proper_ancestor(already_lcca, active))
                    .collect();
                if !exit_set.is_disjoint(&already_exit) {
                    continue 'candidate;
                }
            }
            selected.push((source, t));
        }
        selected
    }

    fn run_actions(
        &self,
        symbols: &[u16],
        context: &mut Context,
        action_table: &crate::model::ActionTable,
        payload: &EventPayload,
    ) -> bool {
        for &symbol in symbols {
            let name = self.program.action_symbols.resolve(symbol);
            let mut sink = Vec::new();
            let mut ctx = crate::machine::ActionCtx::new(context, &mut sink, payload);
            if action_table.run(name, &mut ctx, payload).is_err() {
                return true;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::compile::compile;
    use crate::interpreter::Interpreter;
    use crate::loader::load;
    use crate::model::{ActionTable, GuardTable};
    use serde_json::json;

    fn traffic_light() -> serde_json::Value {
        json!({
            "id": "trafficLight",
            "initial": "red",
            "states": {
                "red": { "on": { "TIMER": "yellow" } },
                "yellow": { "on": { "TIMER": "green" } },
                "green": { "on": { "TIMER": "red" } }
            }
        })
    }

    #[test]
    fn dense_and_reflective_interpreters_agree_across_a_sequence() {
        let graph = load(&traffic_light()).unwrap();
        let program = compile(&graph);

        let reflective = Interpreter::new(&graph);
        let mut reflective_config = reflective.initial_configuration();
        let mut reflective_context = Context::new();

        let dense = ArrayInterpreter::new(&program);
        let mut dense_config = dense.initial_configuration();
        let mut dense_context = Context::new();

        let actions = ActionTable::new();
        let guards = GuardTable::new();

        for _ in 0..5 {
            reflective.step(
                &mut reflective_config,
                &mut reflective_context,
                &actions,
                &guards,
                Some("TIMER"),
                &EventPayload::Null,
                &mut Vec::new(),
            );
            dense.step(&mut dense_config, &mut dense_context, &actions, &guards, Some("TIMER"), &EventPayload::Null);

            assert_eq!(reflective_config, dense_config.to_string_set(&program));
        }
    }
}
