use crate::value::{Context, EventPayload, Value};
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

/// Stable identifier for a state node: a dotted path from the root's direct
/// children (the root's own `id` names the graph, it is never itself a path
/// prefix — see DESIGN.md, "node id scheme").
pub type StateId = String;

/// Symbolic name of a host-supplied action, resolved against an
/// [`ActionTable`] at [`crate::machine::Machine::build`] time.
pub type ActionSymbol = String;

/// Symbolic name of a host-supplied guard, resolved against a
/// [`GuardTable`] at build time.
pub type GuardSymbol = String;

/// Identifier of a registered machine, used as the Orchestrator's routing key.
pub type MachineId = String;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StateKind {
    Atomic,
    Compound,
    Parallel,
    Final,
}

/// One edge out of a state node: `on`, `always`, or `after`.
#[derive(Clone, Debug)]
pub struct Transition {
    /// The state node this transition is declared on (used for LCCA/exit-set
    /// computation; this is *not* necessarily the currently active leaf).
    pub source: StateId,
    /// Zero or more fully-resolved target ids. Zero = internal "no-target"
    /// transition: runs `actions` without touching the Configuration.
    pub targets: Vec<StateId>,
    pub guard: Option<GuardSymbol>,
    pub actions: Vec<ActionSymbol>,
    pub internal: bool,
}

/// An immutable node in the [`crate::graph::StateGraph`].
#[derive(Clone, Debug)]
pub struct StateNode {
    pub id: StateId,
    pub kind: StateKind,
    /// For compound nodes: the child entered by default.
    pub initial: Option<StateId>,
    pub entry_actions: Vec<ActionSymbol>,
    pub exit_actions: Vec<ActionSymbol>,
    /// event name -> ordered list of transitions (first guard-match wins).
    pub on: HashMap<String, Vec<Transition>>,
    /// Transitions with no event, re-evaluated after every macrostep.
    pub always: Vec<Transition>,
    /// delay in ms -> ordered list of transitions.
    pub after: HashMap<u64, Vec<Transition>>,
    pub parent: Option<StateId>,
    /// Document order.
    pub children: Vec<StateId>,
}

impl StateNode {
    pub fn is_leaf(&self) -> bool {
        matches!(self.kind, StateKind::Atomic | StateKind::Final)
    }
}

/// A host-supplied action: `(Context, EventPayload) -> ()`, with access to a
/// [`crate::machine::ActionCtx`] handle for cross-machine sends.
pub trait Action: Send + Sync {
    fn call(&self, ctx: &mut crate::machine::ActionCtx<'_>, payload: &EventPayload);
}

impl<F> Action for F
where
    F: Fn(&mut crate::machine::ActionCtx<'_>, &EventPayload) + Send + Sync,
{
    fn call(&self, ctx: &mut crate::machine::ActionCtx<'_>, payload: &EventPayload) {
        self(ctx, payload)
    }
}

/// A host-supplied guard: `(Context, EventPayload) -> bool`. Must be pure
/// within a macrostep. A panicking guard is treated as `false` (§4.3, §7).
pub trait Guard: Send + Sync {
    fn call(&self, context: &Context, payload: &EventPayload) -> bool;
}

impl<F> Guard for F
where
    F: Fn(&Context, &EventPayload) -> bool + Send + Sync,
{
    fn call(&self, context: &Context, payload: &EventPayload) -> bool {
        self(context, payload)
    }
}

/// Host-supplied mapping from action symbol to function, bound once at
/// [`crate::machine::Machine::build`].
#[derive(Default)]
pub struct ActionTable {
    actions: HashMap<ActionSymbol, Box<dyn Action>>,
}

impl fmt::Debug for ActionTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionTable")
            .field("symbols", &self.actions.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ActionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_action<F>(mut self, symbol: impl Into<String>, f: F) -> Self
    where
        F: Fn(&mut crate::machine::ActionCtx<'_>, &EventPayload) + Send + Sync + 'static,
    {
        self.actions.insert(symbol.into(), Box::new(f));
        self
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.actions.contains_key(symbol)
    }

    /// Runs the named action, catching panics per the fault-containment
    /// model (§4.3: "An action that raises aborts the remainder of that
    /// transition's action list").
    pub fn run(&self, symbol: &str, ctx: &mut crate::machine::ActionCtx<'_>, payload: &EventPayload) -> Result<(), String> {
        let action = self
            .actions
            .get(symbol)
            .expect("action symbol resolved against ActionTable at build time");
        let result = panic::catch_unwind(AssertUnwindSafe(|| action.call(ctx, payload)));
        result.map_err(|panic| describe_panic(symbol, panic))
    }
}

/// Host-supplied mapping from guard symbol to function, bound once at build.
#[derive(Default)]
pub struct GuardTable {
    guards: HashMap<GuardSymbol, Box<dyn Guard>>,
}

impl fmt::Debug for GuardTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GuardTable")
            .field("symbols", &self.guards.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl GuardTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_guard<F>(mut self, symbol: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Context, &EventPayload) -> bool + Send + Sync + 'static,
    {
        self.guards.insert(symbol.into(), Box::new(f));
        self
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.guards.contains_key(symbol)
    }

    /// Evaluates the named guard. A panic is treated as `false` and the
    /// caller is expected to log it at `warn!` (§7).
    pub fn evaluate(&self, symbol: &str, context: &Context, payload: &EventPayload) -> bool {
        let guard = self
            .guards
            .get(symbol)
            .expect("guard symbol resolved against GuardTable at build time");
        match panic::catch_unwind(AssertUnwindSafe(|| guard.call(context, payload))) {
            Ok(result) => result,
            Err(panic) => {
                tracing::warn!(guard = symbol, panic = %describe_panic(symbol, panic), "guard panicked; treating as false");
                false
            }
        }
    }
}

fn describe_panic(symbol: &str, panic: Box<dyn std::any::Any + Send>) -> String {
    let message = if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "<non-string panic payload>".to_string()
    };
    format!("{symbol}: {message}")
}

/// Convenience used by guards/interpreter code that need truthiness of a
/// context value (e.g. inclusive-gateway-style conditions).
pub fn is_truthy(v: &Value) -> bool {
    v.is_truthy()
}
