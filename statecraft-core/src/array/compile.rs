use super::symbol::SymbolMap;
use crate::graph::StateGraph;
use crate::model::{StateKind, Transition};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// A transition with every symbolic reference resolved to a dense id,
/// mirroring [`crate::model::Transition`].
#[derive(Clone, Debug)]
pub struct CompiledTransition {
    pub targets: Vec<u16>,
    pub guard: Option<u16>,
    pub actions: Vec<u16>,
    pub internal: bool,
}

/// The array-optimized form of a [`StateGraph`] (§4.7): every id is a dense
/// `u16` index into a flat `Vec`, and lookups that were `HashMap<String, _>`
/// in the reflective interpreter become direct indexing here.
pub struct CompiledProgram {
    pub state_symbols: SymbolMap,
    pub event_symbols: SymbolMap,
    pub action_symbols: SymbolMap,
    pub guard_symbols: SymbolMap,

    pub root: u16,
    pub kind: Vec<StateKind>,
    pub parent: Vec<Option<u16>>,
    pub children: Vec<Vec<u16>>,
    pub initial: Vec<Option<u16>>,
    pub entry_actions: Vec<Vec<u16>>,
    pub exit_actions: Vec<Vec<u16>>,
    pub on: Vec<HashMap<u16, Vec<CompiledTransition>>>,
    pub always: Vec<Vec<CompiledTransition>>,
    pub after: Vec<Vec<(u64, Vec<CompiledTransition>)>>,
    pub doc_index: Vec<u32>,
}

impl CompiledProgram {
    pub fn state_count(&self) -> usize {
        self.kind.len()
    }

    pub fn state_id(&self, dense: u16) -> &str {
        self.state_symbols.resolve(dense)
    }

    pub fn is_leaf(&self, dense: u16) -> bool {
        matches!(self.kind[dense as usize], StateKind::Atomic | StateKind::Final)
    }

    /// A content fingerprint over the compiled structure, used by tests to
    /// assert that recompiling an unchanged definition is deterministic and
    /// that two semantically equal programs agree (§8, equivalence tests).
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for id in 0..self.state_count() as u16 {
            hasher.update(self.state_id(id).as_bytes());
            hasher.update([self.kind[id as usize] as u8]);
            if let Some(p) = self.parent[id as usize] {
                hasher.update(p.to_le_bytes());
            }
        }
        format!("{:x}", hasher.finalize())
    }
}

/// Compiles a [`StateGraph`] into a [`CompiledProgram`], interning every
/// state id, event name, action symbol, and guard symbol encountered.
pub fn compile(graph: &StateGraph) -> CompiledProgram {
    let mut state_symbols = SymbolMap::new();
    let mut event_symbols = SymbolMap::new();
    let mut action_symbols = SymbolMap::new();
    let mut guard_symbols = SymbolMap::new();

    let mut ids: Vec<&String> = graph.all_ids().collect();
    ids.sort_by_key(|id| graph.doc_index(id));
    for id in &ids {
        state_symbols.intern(id);
    }

    let count = state_symbols.len();
    let mut kind = vec![StateKind::Atomic; count];
    let mut parent = vec![None; count];
    let mut children = vec![Vec::new(); count];
    let mut initial = vec![None; count];
    let mut entry_actions = vec![Vec::new(); count];
    let mut exit_actions = vec![Vec::new(); count];
    let mut on: Vec<HashMap<u16, Vec<CompiledTransition>>> = vec![HashMap::new(); count];
    let mut always = vec![Vec::new(); count];
    let mut after = vec![Vec::new(); count];
    let mut doc_index = vec![0u32; count];

    for id in &ids {
        let dense = state_symbols.intern(id);
        let node = graph.node(id);
        kind[dense as usize] = node.kind;
        doc_index[dense as usize] = graph.doc_index(id);
        parent[dense as usize] = node.parent.as_ref().map(|p| state_symbols.intern(p));
        children[dense as usize] = node.children.iter().map(|c| state_symbols.intern(c)).collect();
        initial[dense as usize] = node.initial.as_ref().map(|i| state_symbols.intern(i));
        entry_actions[dense as usize] = node
            .entry_actions
            .iter()
            .map(|a| action_symbols.intern(a))
            .collect();
        exit_actions[dense as usize] = node
            .exit_actions
            .iter()
            .map(|a| action_symbols.intern(a))
            .collect();

        for (event, transitions) in &node.on {
            let event_id = event_symbols.intern(event);
            let compiled = transitions
                .iter()
                .map(|t| compile_transition(t, &mut state_symbols, &mut action_symbols, &mut guard_symbols))
                .collect();
            on[dense as usize].insert(event_id, compiled);
        }

        always[dense as usize] = node
            .always
            .iter()
            .map(|t| compile_transition(t, &mut state_symbols, &mut action_symbols, &mut guard_symbols))
            .collect();

        for (&ms, transitions) in &node.after {
            let compiled: Vec<CompiledTransition> = transitions
                .iter()
                .map(|t| compile_transition(t, &mut state_symbols, &mut action_symbols, &mut guard_symbols))
                .collect();
            after[dense as usize].push((ms, compiled));
        }
    }

    let root = state_symbols.intern(graph.root_id());

    CompiledProgram {
        state_symbols,
        event_symbols,
        action_symbols,
        guard_symbols,
        root,
        kind,
        parent,
        children,
        initial,
        entry_actions,
        exit_actions,
        on,
        always,
        after,
        doc_index,
    }
}

fn compile_transition(
    t: &Transition,
    state_symbols: &mut SymbolMap,
    action_symbols: &mut SymbolMap,
    guard_symbols: &mut SymbolMap,
) -> CompiledTransition {
    CompiledTransition {
        targets: t.targets.iter().map(|s| state_symbols.intern(s)).collect(),
        guard: t.guard.as_ref().map(|g| guard_symbols.intern(g)),
        actions: t.actions.iter().map(|a| action_symbols.intern(a)).collect(),
        internal: t.internal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::load;
    use serde_json::json;

    #[test]
    fn compiles_dense_ids_for_every_state() {
        let doc = json!({
            "id": "m",
            "initial": "a",
            "states": {
                "a": { "on": { "GO": "b" } },
                "b": {}
            }
        });
        let graph = load(&doc).unwrap();
        let program = compile(&graph);
        assert_eq!(program.state_count(), 3);
        let a = program.state_symbols.get("m.a").unwrap();
        let event = program.event_symbols.get("GO").unwrap();
        assert!(program.on[a as usize].contains_key(&event));
    }

    #[test]
    fn recompiling_is_deterministic() {
        let doc = json!({
            "id": "m",
            "initial": "a",
            "states": { "a": {}, "b": {} }
        });
        let graph = load(&doc).unwrap();
        let p1 = compile(&graph);
        let p2 = compile(&graph);
        assert_eq!(p1.fingerprint(), p2.fingerprint());
    }
}
