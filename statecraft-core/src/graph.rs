use crate::model::{StateId, StateKind, StateNode};
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::HashMap;

/// The immutable, shared-across-machines statechart graph (§3). Backed by a
/// `petgraph::DiGraph` with parent->child edges, the same representation
/// shape the teacher codebase uses for its BPMN intermediate graph
/// (`compiler::ir::IRGraph`), plus a name index for O(1) id lookup.
#[derive(Debug)]
pub struct StateGraph {
    graph: DiGraph<StateNode, ()>,
    by_id: HashMap<StateId, NodeIndex>,
    root: NodeIndex,
    /// Pre-order (document-order) rank, used to sort exit/entry sets and to
    /// resolve transition conflicts deterministically.
    doc_index: HashMap<StateId, u32>,
}

impl StateGraph {
    pub(crate) fn build(nodes: Vec<StateNode>, root_id: &str) -> Self {
        let mut graph = DiGraph::new();
        let mut by_id = HashMap::new();
        for node in nodes {
            let id = node.id.clone();
            let idx = graph.add_node(node);
            by_id.insert(id, idx);
        }
        // wire up parent->child edges now that every node exists
        let ids: Vec<StateId> = by_id.keys().cloned().collect();
        for id in &ids {
            let idx = by_id[id];
            let children = graph[idx].children.clone();
            for child in children {
                if let Some(&child_idx) = by_id.get(&child) {
                    graph.add_edge(idx, child_idx, ());
                }
            }
        }
        let root = by_id[root_id];

        let mut doc_index = HashMap::new();
        let mut counter = 0u32;
        assign_doc_index(&graph, &by_id, root_id, &mut doc_index, &mut counter);

        Self {
            graph,
            by_id,
            root,
            doc_index,
        }
    }

    pub fn root_id(&self) -> &str {
        &self.graph[self.root].id
    }

    pub fn node(&self, id: &str) -> &StateNode {
        &self.graph[self.by_id[id]]
    }

    pub fn try_node(&self, id: &str) -> Option<&StateNode> {
        self.by_id.get(id).map(|&idx| &self.graph[idx])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.by_id.contains_key(id)
    }

    pub fn doc_index(&self, id: &str) -> u32 {
        *self.doc_index.get(id).unwrap_or(&u32::MAX)
    }

    pub fn all_ids(&self) -> impl Iterator<Item = &StateId> {
        self.by_id.keys()
    }

    /// `documentOrder(children)` — §4.2.
    pub fn children_ordered(&self, id: &str) -> &[StateId] {
        &self.node(id).children
    }

    pub fn parent(&self, id: &str) -> Option<&StateId> {
        self.node(id).parent.as_ref()
    }

    /// Ordered path root -> node, inclusive of `node` itself.
    pub fn ancestors(&self, id: &str) -> Vec<StateId> {
        let mut chain = Vec::new();
        let mut current = Some(id.to_string());
        while let Some(cur) = current {
            let node = self.node(&cur);
            chain.push(cur.clone());
            current = node.parent.clone();
        }
        chain.reverse();
        chain
    }

    pub fn is_ancestor_or_self(&self, maybe_ancestor: &str, id: &str) -> bool {
        self.ancestors(id).iter().any(|a| a == maybe_ancestor)
    }

    pub fn is_proper_ancestor(&self, maybe_ancestor: &str, id: &str) -> bool {
        maybe_ancestor != id && self.is_ancestor_or_self(maybe_ancestor, id)
    }

    pub fn is_descendant_or_self(&self, maybe_descendant: &str, id: &str) -> bool {
        self.is_ancestor_or_self(id, maybe_descendant)
    }

    /// Least common compound ancestor of two nodes.
    pub fn lcca(&self, a: &str, b: &str) -> StateId {
        let chain_a = self.ancestors(a);
        let chain_b = self.ancestors(b);
        let mut common = chain_a[0].clone();
        for (x, y) in chain_a.iter().zip(chain_b.iter()) {
            if x == y {
                common = x.clone();
            } else {
                break;
            }
        }
        common
    }

    /// LCCA across a source and a set of targets (folds pairwise).
    pub fn lcca_multi(&self, source: &str, targets: &[StateId]) -> StateId {
        let mut acc = source.to_string();
        for t in targets {
            acc = self.lcca(&acc, t);
        }
        acc
    }

    /// `descendantsToEnter(target)` — §4.2. For a compound target, follows
    /// `initial` chains; for a parallel target, includes all children
    /// recursively; for an atomic/final target, just itself. Document order.
    pub fn descendants_to_enter(&self, target: &str) -> Vec<StateId> {
        let mut out = Vec::new();
        self.descendants_to_enter_into(target, &mut out);
        out
    }

    fn descendants_to_enter_into(&self, target: &str, out: &mut Vec<StateId>) {
        out.push(target.to_string());
        let node = self.node(target);
        match node.kind {
            StateKind::Atomic | StateKind::Final => {}
            StateKind::Compound => {
                if let Some(initial) = &node.initial {
                    self.descendants_to_enter_into(initial, out);
                }
            }
            StateKind::Parallel => {
                for child in &node.children {
                    self.descendants_to_enter_into(child, out);
                }
            }
        }
    }

    /// All leaf (atomic/final) descendants of `id`, document order. Used to
    /// enumerate a Configuration's active leaves deterministically.
    pub fn leaves_under(&self, id: &str) -> Vec<StateId> {
        let node = self.node(id);
        if node.is_leaf() {
            return vec![id.to_string()];
        }
        let mut out = Vec::new();
        for child in &node.children {
            out.extend(self.leaves_under(child));
        }
        out
    }
}

fn assign_doc_index(
    graph: &DiGraph<StateNode, ()>,
    by_id: &HashMap<StateId, NodeIndex>,
    id: &str,
    doc_index: &mut HashMap<StateId, u32>,
    counter: &mut u32,
) {
    doc_index.insert(id.to_string(), *counter);
    *counter += 1;
    let idx = by_id[id];
    for child in &graph[idx].children.clone() {
        assign_doc_index(graph, by_id, child, doc_index, counter);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::load;

    fn traffic_light_json() -> serde_json::Value {
        serde_json::json!({
            "id": "trafficLight",
            "type": "parallel",
            "states": {
                "light": {
                    "initial": "red",
                    "states": {
                        "red": {
                            "initial": "bright",
                            "on": { "TIMER": "yellow" },
                            "states": {
                                "bright": { "on": { "DARKER": "dark" } },
                                "dark": { "on": { "BRIGHTER": "bright" } }
                            }
                        },
                        "yellow": { "on": { "TIMER": "green" } },
                        "green": { "on": { "TIMER": "red" } }
                    }
                },
                "pedestrian": {
                    "initial": "cannotWalk",
                    "states": {
                        "cannotWalk": { "on": { "PUSH_BUTTON": { "target": "canWalk", "cond": "inRedLight" } } },
                        "canWalk": { "on": { "TIMER": "cannotWalk" } }
                    }
                }
            }
        })
    }

    #[test]
    fn lcca_within_same_region() {
        let graph = load(&traffic_light_json()).unwrap();
        assert_eq!(
            graph.lcca("trafficLight.light.red.bright", "trafficLight.light.yellow"),
            "trafficLight.light"
        );
    }

    #[test]
    fn descendants_to_enter_compound_follows_initial() {
        let graph = load(&traffic_light_json()).unwrap();
        assert_eq!(
            graph.descendants_to_enter("trafficLight.light"),
            vec![
                "trafficLight.light",
                "trafficLight.light.red",
                "trafficLight.light.red.bright"
            ]
        );
    }

    #[test]
    fn descendants_to_enter_parallel_includes_all_children() {
        let graph = load(&traffic_light_json()).unwrap();
        let entered = graph.descendants_to_enter("trafficLight");
        assert!(entered.contains(&"trafficLight.light".to_string()));
        assert!(entered.contains(&"trafficLight.pedestrian".to_string()));
        assert!(entered.contains(&"trafficLight.light.red.bright".to_string()));
        assert!(entered.contains(&"trafficLight.pedestrian.cannotWalk".to_string()));
    }

    #[test]
    fn document_order_is_stable() {
        let graph = load(&traffic_light_json()).unwrap();
        assert!(graph.doc_index("trafficLight.light") < graph.doc_index("trafficLight.pedestrian"));
        assert!(graph.doc_index("trafficLight.light.red") < graph.doc_index("trafficLight.light.yellow"));
    }
}
