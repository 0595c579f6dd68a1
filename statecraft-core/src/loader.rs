use crate::duration::parse_duration;
use crate::error::LoadError;
use crate::graph::StateGraph;
use crate::model::{StateKind, StateNode, Transition};
use serde_json::Value as Json;
use std::collections::HashMap;

/// Parses a JSON machine definition (§6) into a [`StateGraph`], performing
/// every structural check called out in §4.1: unknown targets, initial-chain
/// cycles, parallel states declaring `initial`, duplicate children, empty
/// compounds, missing `initial` on non-atomic states, and `always`-cycles.
pub fn load(doc: &Json) -> Result<StateGraph, LoadError> {
    let root_id = doc
        .get("id")
        .and_then(Json::as_str)
        .ok_or_else(|| LoadError::MalformedDocument("root machine definition requires a string 'id'".into()))?
        .to_string();

    let mut nodes = HashMap::new();
    parse_node(&root_id, None, doc, &mut nodes)?;

    check_targets(&nodes)?;
    check_initial_chains(&nodes, &root_id)?;
    check_always_cycles(&nodes)?;

    let node_list: Vec<StateNode> = nodes.into_values().collect();
    Ok(StateGraph::build(node_list, &root_id))
}

fn parse_node(
    id: &str,
    parent: Option<&str>,
    doc: &Json,
    out: &mut HashMap<String, StateNode>,
) -> Result<(), LoadError> {
    if out.contains_key(id) {
        return Err(LoadError::DuplicateChild(id.to_string()));
    }

    let states = doc.get("states").and_then(Json::as_object);
    let declared_parallel = doc.get("type").and_then(Json::as_str) == Some("parallel");
    let declared_final = doc.get("type").and_then(Json::as_str) == Some("final");

    let kind = if declared_final {
        StateKind::Final
    } else if declared_parallel {
        StateKind::Parallel
    } else if states.map(|m| !m.is_empty()).unwrap_or(false) {
        StateKind::Compound
    } else {
        StateKind::Atomic
    };

    let initial = doc
        .get("initial")
        .and_then(Json::as_str)
        .map(|s| qualify(id, s));

    if matches!(kind, StateKind::Parallel) && initial.is_some() {
        return Err(LoadError::InvalidParallelInitial(id.to_string()));
    }
    if matches!(kind, StateKind::Compound) && initial.is_none() {
        return Err(LoadError::MissingInitial(id.to_string()));
    }

    let entry_actions = string_list(doc.get("entry"));
    let exit_actions = string_list(doc.get("exit"));

    let mut children = Vec::new();
    if let Some(states) = states {
        if states.is_empty() && matches!(kind, StateKind::Compound) {
            return Err(LoadError::EmptyCompound(id.to_string()));
        }
        for (child_key, child_doc) in states {
            let child_id = qualify(id, child_key);
            children.push(child_id.clone());
            parse_node(&child_id, Some(id), child_doc, out)?;
        }
    }

    let on = parse_event_map(id, doc.get("on"))?;
    let always = parse_transition_list(id, doc.get("always"))?;
    let after = parse_after_map(id, doc.get("after"))?;

    out.insert(
        id.to_string(),
        StateNode {
            id: id.to_string(),
            kind,
            initial,
            entry_actions,
            exit_actions,
            on,
            always,
            after,
            parent: parent.map(str::to_string),
            children,
        },
    );
    Ok(())
}

/// Child ids are dotted paths from the root's children down (the root's own
/// id is the graph name and is never itself a path segment — see
/// DESIGN.md, "node id scheme").
fn qualify(parent: &str, child_key: &str) -> String {
    format!("{parent}.{child_key}")
}

fn string_list(v: Option<&Json>) -> Vec<String> {
    match v {
        Some(Json::String(s)) => vec![s.clone()],
        Some(Json::Array(items)) => items
            .iter()
            .filter_map(Json::as_str)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

fn parse_event_map(
    source: &str,
    v: Option<&Json>,
) -> Result<HashMap<String, Vec<Transition>>, LoadError> {
    let mut out = HashMap::new();
    if let Some(Json::Object(map)) = v {
        for (event, spec) in map {
            out.insert(event.clone(), parse_transition_spec(source, spec)?);
        }
    }
    Ok(out)
}

fn parse_transition_list(source: &str, v: Option<&Json>) -> Result<Vec<Transition>, LoadError> {
    match v {
        Some(spec) => parse_transition_spec(source, spec),
        None => Ok(Vec::new()),
    }
}

fn parse_after_map(source: &str, v: Option<&Json>) -> Result<HashMap<u64, Vec<Transition>>, LoadError> {
    let mut out = HashMap::new();
    if let Some(Json::Object(map)) = v {
        for (delay_key, spec) in map {
            let ms = parse_duration(delay_key)?;
            out.insert(ms, parse_transition_spec(source, spec)?);
        }
    }
    Ok(out)
}

/// A transition spec is either: a bare target string, a single transition
/// object (`{target, cond, actions}`), or an array of candidate transition
/// objects tried in document order (first matching guard wins at runtime).
fn parse_transition_spec(source: &str, spec: &Json) -> Result<Vec<Transition>, LoadError> {
    match spec {
        Json::String(target) => Ok(vec![single_transition(
            source,
            Some(target.clone()),
            None,
            Vec::new(),
        )]),
        Json::Object(_) => Ok(vec![parse_transition_object(source, spec)?]),
        Json::Array(items) => items
            .iter()
            .map(|item| parse_transition_object(source, item))
            .collect(),
        Json::Null => Ok(Vec::new()),
        other => Err(LoadError::MalformedDocument(format!(
            "transition spec on '{source}' must be a string, object, or array, got {other}"
        ))),
    }
}

fn parse_transition_object(source: &str, spec: &Json) -> Result<Transition, LoadError> {
    let obj = spec.as_object().ok_or_else(|| {
        LoadError::MalformedDocument(format!("transition entry on '{source}' must be an object"))
    })?;

    let targets: Vec<String> = match obj.get("target") {
        Some(Json::String(t)) => vec![t.clone()],
        Some(Json::Array(items)) => items
            .iter()
            .filter_map(Json::as_str)
            .map(str::to_string)
            .collect(),
        None => Vec::new(),
        Some(other) => {
            return Err(LoadError::MalformedDocument(format!(
                "'target' on '{source}' must be a string or array, got {other}"
            )))
        }
    };

    let guard = obj.get("cond").and_then(Json::as_str).map(str::to_string);
    let actions = string_list(obj.get("actions"));
    let internal = targets.is_empty();

    let target = if targets.is_empty() {
        None
    } else {
        Some(targets[0].clone())
    };
    let mut transition = single_transition(source, target, guard, actions);
    transition.internal = internal;
    if targets.len() > 1 {
        transition.targets = targets.iter().map(|t| resolve_target(source, t)).collect();
    }
    Ok(transition)
}

fn single_transition(
    source: &str,
    target: Option<String>,
    guard: Option<String>,
    actions: Vec<String>,
) -> Transition {
    let internal = target.is_none();
    let targets = target
        .map(|t| vec![resolve_target(source, &t)])
        .unwrap_or_default();
    Transition {
        source: source.to_string(),
        targets,
        guard,
        actions,
        internal,
    }
}

/// Resolves a target string per §4.1: an absolute path starting with `#`
/// addresses from the graph root; anything else is relative to the
/// transition source's *parent* (sibling reference), the XState convention.
fn resolve_target(source: &str, target: &str) -> String {
    if let Some(abs) = target.strip_prefix('#') {
        return abs.to_string();
    }
    if target.contains('.') {
        return target.to_string();
    }
    match source.rsplit_once('.') {
        Some((parent, _)) => format!("{parent}.{target}"),
        None => target.to_string(),
    }
}

fn check_targets(nodes: &HashMap<String, StateNode>) -> Result<(), LoadError> {
    for node in nodes.values() {
        for transitions in node
            .on
            .values()
            .chain(node.after.values())
            .chain(std::iter::once(&node.always))
        {
            for t in transitions {
                for target in &t.targets {
                    if !nodes.contains_key(target) {
                        return Err(LoadError::UnknownTarget {
                            source: node.id.clone(),
                            target: target.clone(),
                        });
                    }
                }
            }
        }
    }
    Ok(())
}

fn check_initial_chains(nodes: &HashMap<String, StateNode>, root_id: &str) -> Result<(), LoadError> {
    for node in nodes.values() {
        if node.initial.is_some() {
            let mut seen = std::collections::HashSet::new();
            let mut current = node.id.clone();
            loop {
                if !seen.insert(current.clone()) {
                    return Err(LoadError::CycleInInitial(node.id.clone()));
                }
                let Some(cur_node) = nodes.get(&current) else {
                    return Err(LoadError::UnknownTarget {
                        source: node.id.clone(),
                        target: current,
                    });
                };
                match &cur_node.initial {
                    Some(next) => current = next.clone(),
                    None => break,
                }
                if seen.len() > nodes.len() {
                    return Err(LoadError::CycleInInitial(node.id.clone()));
                }
            }
        }
    }
    let _ = root_id;
    Ok(())
}

/// A bounded simulation: an `always` graph with more hops than there are
/// nodes must be cyclic (§9 Open Questions — detected at load time, not
/// deferred to a runtime step-limit panic).
fn check_always_cycles(nodes: &HashMap<String, StateNode>) -> Result<(), LoadError> {
    for start in nodes.values() {
        if start.always.is_empty() {
            continue;
        }
        let mut current = start.id.clone();
        let mut hops = 0usize;
        loop {
            let node = &nodes[&current];
            let Some(t) = node.always.first() else {
                break;
            };
            let Some(target) = t.targets.first() else {
                break;
            };
            current = target.clone();
            hops += 1;
            if hops > nodes.len() + 1 {
                return Err(LoadError::AlwaysCycle(start.id.clone()));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn loads_simple_compound() {
        let doc = json!({
            "id": "toggle",
            "initial": "off",
            "states": {
                "off": { "on": { "FLIP": "on" } },
                "on": { "on": { "FLIP": "off" } }
            }
        });
        let graph = load(&doc).unwrap();
        assert_eq!(graph.root_id(), "toggle");
        assert!(graph.contains("toggle.off"));
        assert!(graph.contains("toggle.on"));
    }

    #[test]
    fn rejects_unknown_target() {
        let doc = json!({
            "id": "m",
            "initial": "a",
            "states": {
                "a": { "on": { "GO": "nope" } }
            }
        });
        assert!(matches!(load(&doc), Err(LoadError::UnknownTarget { .. })));
    }

    #[test]
    fn rejects_parallel_with_initial() {
        let doc = json!({
            "id": "m",
            "type": "parallel",
            "initial": "a",
            "states": {
                "a": {},
                "b": {}
            }
        });
        assert!(matches!(load(&doc), Err(LoadError::InvalidParallelInitial(_))));
    }

    #[test]
    fn rejects_missing_initial_on_compound() {
        let doc = json!({
            "id": "m",
            "states": {
                "a": { "states": { "x": {}, "y": {} } }
            }
        });
        assert!(matches!(load(&doc), Err(LoadError::MissingInitial(_))));
    }

    #[test]
    fn sibling_target_resolves_relative_to_parent() {
        let doc = json!({
            "id": "m",
            "initial": "a",
            "states": {
                "a": { "on": { "GO": "b" } },
                "b": {}
            }
        });
        let graph = load(&doc).unwrap();
        let node = graph.node("m.a");
        let t = &node.on["GO"][0];
        assert_eq!(t.targets, vec!["m.b".to_string()]);
    }

    #[test]
    fn absolute_target_resolves_from_root() {
        let doc = json!({
            "id": "m",
            "initial": "a",
            "states": {
                "a": {
                    "initial": "x",
                    "states": {
                        "x": { "on": { "GO": "#m.b" } }
                    }
                },
                "b": {}
            }
        });
        let graph = load(&doc).unwrap();
        let node = graph.node("m.a.x");
        let t = &node.on["GO"][0];
        assert_eq!(t.targets, vec!["m.b".to_string()]);
    }

    #[test]
    fn after_key_parses_duration() {
        let doc = json!({
            "id": "m",
            "initial": "a",
            "states": {
                "a": { "after": { "500": "b" } },
                "b": {}
            }
        });
        let graph = load(&doc).unwrap();
        let node = graph.node("m.a");
        assert!(node.after.contains_key(&500));
    }
}
