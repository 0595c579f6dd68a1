use crate::delay::{after_event_name, DelayScheduler};
use crate::error::BuildError;
use crate::graph::StateGraph;
use crate::interpreter::{Configuration, Interpreter, InterpreterEvent};
use crate::model::{ActionTable, GuardTable};
use crate::value::{context_from_json, Context, EventPayload};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Lifecycle phase of a running machine (§3, §7).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Created,
    Running,
    Stopped,
    /// An action panicked mid-macrostep; the machine rejects further events
    /// until [`Machine::reset`] is called (§7).
    Faulted,
}

/// A host action's handle into the running machine: context mutation plus
/// non-blocking cross-machine sends. `sendAndWait` is deliberately absent —
/// issuing a blocking ask from inside an action would deadlock the
/// orchestrator against itself (§4.6).
pub struct ActionCtx<'a> {
    context: &'a mut Context,
    pending_sends: &'a mut Vec<OutgoingSend>,
    current_event: &'a EventPayload,
}

#[derive(Clone, Debug)]
pub struct OutgoingSend {
    pub target: String,
    pub event: String,
    pub payload: EventPayload,
}

impl<'a> ActionCtx<'a> {
    pub(crate) fn new(
        context: &'a mut Context,
        pending_sends: &'a mut Vec<OutgoingSend>,
        current_event: &'a EventPayload,
    ) -> Self {
        Self {
            context,
            pending_sends,
            current_event,
        }
    }

    pub fn context(&self) -> &Context {
        self.context
    }

    /// The payload of the event whose macrostep is currently running (§4.5
    /// "currentEvent"). `Null` for entry/exit actions fired outside of an
    /// event (e.g. `start`'s initial entry).
    pub fn current_event(&self) -> &EventPayload {
        self.current_event
    }

    pub fn set(&mut self, key: impl Into<String>, value: crate::value::Value) {
        self.context.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&crate::value::Value> {
        self.context.get(key)
    }

    /// Enqueues a fire-and-forget send to another machine, delivered by the
    /// orchestrator once this macrostep finishes. Never blocks.
    pub fn request_send(&mut self, target: impl Into<String>, event: impl Into<String>, payload: EventPayload) {
        self.pending_sends.push(OutgoingSend {
            target: target.into(),
            event: event.into(),
            payload,
        });
    }
}

/// A point-in-time, serializable view of a machine, returned by
/// [`Machine::snapshot`] and over the wire (§6 "Snapshot format").
#[derive(Clone, Debug, Serialize)]
pub struct Snapshot {
    pub machine_id: String,
    pub phase: Phase,
    pub configuration: Vec<String>,
    pub context: Context,
    pub fault: Option<FaultInfo>,
}

/// Diagnostic detail captured when a machine enters [`Phase::Faulted`].
#[derive(Clone, Debug, Serialize)]
pub struct FaultInfo {
    pub node: String,
    pub reason: String,
}

/// A compiled, runnable statechart (§4.5). Owns its own `Configuration`,
/// `Context`, and `DelayScheduler`; the `StateGraph` and action/guard tables
/// are immutable and shared via `Arc`.
pub struct Machine {
    id: String,
    graph: Arc<StateGraph>,
    actions: Arc<ActionTable>,
    guards: Arc<GuardTable>,
    configuration: Configuration,
    context: Context,
    phase: Phase,
    fault: Option<FaultInfo>,
    scheduler: DelayScheduler,
    /// Bumped every time the machine (re)starts, so stale timers from a
    /// previous run/reset cannot fire into the new one.
    generation: u64,
    /// Loopback channel a `DelayScheduler` timer delivers its synthetic
    /// `after(ms)@node` event on; the machine drains it on every `send`.
    timer_tx: mpsc::Sender<String>,
    timer_rx: mpsc::Receiver<String>,
}

impl Machine {
    /// Builds a machine from a graph plus host action/guard tables,
    /// rejecting any symbol referenced by the graph but absent from its
    /// table (§4.1 "Build-time binding").
    pub fn build(
        id: impl Into<String>,
        graph: Arc<StateGraph>,
        actions: ActionTable,
        guards: GuardTable,
    ) -> Result<Self, BuildError> {
        for node_id in graph.all_ids() {
            let node = graph.node(node_id);
            for list in node
                .on
                .values()
                .chain(node.after.values())
                .chain(std::iter::once(&node.always))
            {
                for t in list {
                    for action in &t.actions {
                        if !actions.contains(action) {
                            return Err(BuildError::UnknownAction(action.clone()));
                        }
                    }
                    if let Some(guard) = &t.guard {
                        if !guards.contains(guard) {
                            return Err(BuildError::UnknownGuard(guard.clone()));
                        }
                    }
                }
            }
            for action in node.entry_actions.iter().chain(node.exit_actions.iter()) {
                if !actions.contains(action) {
                    return Err(BuildError::UnknownAction(action.clone()));
                }
            }
        }

        let (timer_tx, timer_rx) = mpsc::channel(64);
        let interp = Interpreter::new(&graph);
        let configuration = interp.initial_configuration();

        Ok(Self {
            id: id.into(),
            graph,
            actions: Arc::new(actions),
            guards: Arc::new(guards),
            configuration,
            context: Context::new(),
            phase: Phase::Created,
            fault: None,
            scheduler: DelayScheduler::new(),
            generation: 0,
            timer_tx,
            timer_rx,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Seeds the initial context from a machine definition's `"context"`
    /// object, then enters `Running` and fires entry actions/arms timers for
    /// the initial configuration. Idempotent only from `Created`.
    pub fn start(&mut self, initial_context: Option<&serde_json::Map<String, serde_json::Value>>) -> Vec<OutgoingSend> {
        if self.phase != Phase::Created {
            return Vec::new();
        }
        if let Some(obj) = initial_context {
            self.context = context_from_json(obj);
        }
        self.phase = Phase::Running;
        self.generation += 1;

        let graph = Arc::clone(&self.graph);
        let interp = Interpreter::new(&graph);
        let ids: Vec<String> = self.configuration.iter().cloned().collect();
        let entry_list = interp.entry_actions_for(&ids);
        for id in &ids {
            self.arm_timers_for(id);
        }
        let mut pending_sends = Vec::new();
        for (node, symbol) in entry_list {
            let mut ctx = ActionCtx::new(&mut self.context, &mut pending_sends, &EventPayload::Null);
            if let Err(err) = self.actions.run(&symbol, &mut ctx, &EventPayload::Null) {
                tracing::error!(machine = %self.id, node, symbol, error = %err, "entry action panicked at start");
                self.fault(&node, err);
                break;
            }
        }
        pending_sends
    }

    /// Delivers one external event, running the full run-to-completion
    /// macrostep. Rejected outright (no-op, empty result) if the machine is
    /// not `Running`.
    pub fn send(&mut self, event_name: &str, payload: EventPayload) -> Vec<OutgoingSend> {
        self.drain_timer_events_into_pending_noop();
        if self.phase != Phase::Running {
            return Vec::new();
        }

        let graph = Arc::clone(&self.graph);
        let actions = Arc::clone(&self.actions);
        let guards = Arc::clone(&self.guards);
        let interp = Interpreter::new(&graph);

        let mut pending_sends = Vec::new();
        let outcome = interp.step(
            &mut self.configuration,
            &mut self.context,
            &actions,
            &guards,
            Some(event_name),
            &payload,
            &mut pending_sends,
        );

        for event in &outcome.events {
            match event {
                InterpreterEvent::Entered(node) => self.arm_timers_for(node),
                InterpreterEvent::Exited(node) => self.scheduler.cancel(node, self.generation),
                _ => {}
            }
        }

        self.apply_outcome(outcome);
        pending_sends
    }

    /// Delivers a synthetic `after(ms)@node` timer event. Exposed separately
    /// so the orchestrator can route fired timers the same way it routes any
    /// other event, without a special case in its dispatch loop.
    pub fn send_timer_event(&mut self, event_name: &str) -> Vec<OutgoingSend> {
        self.send(event_name, EventPayload::Null)
    }

    /// Awaits the next fired `after(ms)@node` timer, used by the runtime
    /// that owns this machine's task in a `select!` alongside its mailbox.
    /// Resolves to `None` only once every `DelayScheduler` handle (and thus
    /// the sender half) has been dropped.
    pub async fn recv_timer(&mut self) -> Option<String> {
        self.timer_rx.recv().await
    }

    fn drain_timer_events_into_pending_noop(&mut self) {
        // Timer delivery is driven by the owning runtime polling
        // `try_recv_timer`; nothing to do here, kept as an explicit hook so
        // future backpressure-aware draining has a single call site.
    }

    fn apply_outcome(&mut self, outcome: crate::interpreter::StepOutcome) {
        if outcome.faulted {
            if let Some(InterpreterEvent::Faulted { node, reason }) =
                outcome.events.iter().rev().find(|e| matches!(e, InterpreterEvent::Faulted { .. }))
            {
                self.fault(node, reason.clone());
            } else {
                self.fault("<unknown>", "action panicked".to_string());
            }
        }
        for event in &outcome.events {
            tracing::trace!(machine = %self.id, event = ?event, "interpreter step");
        }
    }

    fn fault(&mut self, node: &str, reason: String) {
        self.phase = Phase::Faulted;
        self.fault = Some(FaultInfo {
            node: node.to_string(),
            reason,
        });
        tracing::error!(machine = %self.id, node, "machine faulted");
    }

    fn arm_timers_for(&mut self, node: &str) {
        arm_after_timers(&self.graph, &mut self.scheduler, node, self.generation, self.timer_tx.clone());
    }

    /// Cancels every outstanding timer and returns the machine to
    /// `Created`-like readiness, clearing any fault, per §7's recovery path.
    pub fn reset(&mut self) {
        self.scheduler.cancel_all();
        self.generation += 1;
        self.phase = Phase::Created;
        self.fault = None;
        self.context = Context::new();
        let interp = Interpreter::new(&self.graph);
        self.configuration = interp.initial_configuration();
    }

    pub fn stop(&mut self) {
        self.scheduler.cancel_all();
        self.phase = Phase::Stopped;
    }

    /// Active leaves only (§3 "Scenario A" format) — ancestors are implied by
    /// a leaf's id and are omitted from the wire representation.
    pub fn snapshot(&self) -> Snapshot {
        let mut configuration: Vec<String> = self
            .configuration
            .iter()
            .filter(|id| self.graph.node(id).is_leaf())
            .cloned()
            .collect();
        configuration.sort_by_key(|id| self.graph.doc_index(id));
        Snapshot {
            machine_id: self.id.clone(),
            phase: self.phase,
            configuration,
            context: self.context.clone(),
            fault: self.fault.clone(),
        }
    }
}

fn arm_after_timers(
    graph: &StateGraph,
    scheduler: &mut DelayScheduler,
    node: &str,
    generation: u64,
    timer_tx: mpsc::Sender<String>,
) {
    let state = graph.node(node);
    for (&ms, _) in &state.after {
        scheduler.arm(node.to_string(), ms, generation, timer_tx.clone());
        let _ = after_event_name(node, ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::load;
    use serde_json::json;

    fn build_toggle() -> Machine {
        let doc = json!({
            "id": "toggle",
            "initial": "off",
            "states": {
                "off": { "on": { "FLIP": "on" } },
                "on": { "on": { "FLIP": "off" } }
            }
        });
        let graph = Arc::new(load(&doc).unwrap());
        Machine::build("m1", graph, ActionTable::new(), GuardTable::new()).unwrap()
    }

    #[test]
    fn build_rejects_unknown_action() {
        let doc = json!({
            "id": "m",
            "initial": "a",
            "states": {
                "a": { "entry": ["missing"] }
            }
        });
        let graph = Arc::new(load(&doc).unwrap());
        let result = Machine::build("m1", graph, ActionTable::new(), GuardTable::new());
        assert!(matches!(result, Err(BuildError::UnknownAction(_))));
    }

    #[test]
    fn start_then_send_transitions() {
        let mut machine = build_toggle();
        assert_eq!(machine.phase(), Phase::Created);
        machine.start(None);
        assert_eq!(machine.phase(), Phase::Running);
        assert_eq!(machine.snapshot().configuration, vec!["toggle.off".to_string()]);

        machine.send("FLIP", EventPayload::Null);
        assert_eq!(machine.snapshot().configuration, vec!["toggle.on".to_string()]);
    }

    #[test]
    fn snapshot_omits_compound_ancestors() {
        let mut machine = build_toggle();
        machine.start(None);
        let configuration = machine.snapshot().configuration;
        assert!(!configuration.contains(&"toggle".to_string()));
    }

    #[test]
    fn actions_observe_the_triggering_payload() {
        use std::sync::Mutex;

        let doc = json!({
            "id": "m",
            "initial": "a",
            "states": {
                "a": { "on": { "GO": { "target": "b", "actions": ["record"] } } },
                "b": {}
            }
        });
        let graph = Arc::new(load(&doc).unwrap());
        let seen: Arc<Mutex<Option<EventPayload>>> = Arc::new(Mutex::new(None));
        let seen_in_action = Arc::clone(&seen);
        let actions = ActionTable::new().with_action("record", move |ctx: &mut ActionCtx<'_>, payload: &EventPayload| {
            *seen_in_action.lock().unwrap() = Some(payload.clone());
            assert_eq!(ctx.current_event(), payload);
        });
        let mut machine = Machine::build("m1", graph, actions, GuardTable::new()).unwrap();
        machine.start(None);

        machine.send("GO", serde_json::json!({ "reason": "pressed" }));
        assert_eq!(
            seen.lock().unwrap().clone(),
            Some(serde_json::json!({ "reason": "pressed" }))
        );
    }

    #[test]
    fn send_before_start_is_noop() {
        let mut machine = build_toggle();
        let sends = machine.send("FLIP", EventPayload::Null);
        assert!(sends.is_empty());
        assert_eq!(machine.phase(), Phase::Created);
    }

    #[test]
    fn faulted_machine_rejects_events_until_reset() {
        let doc = json!({
            "id": "m",
            "initial": "a",
            "states": {
                "a": { "on": { "GO": { "target": "b", "actions": ["boom"] } } },
                "b": {}
            }
        });
        let graph = Arc::new(load(&doc).unwrap());
        let actions = ActionTable::new().with_action("boom", |_: &mut ActionCtx<'_>, _: &EventPayload| panic!("x"));
        let mut machine = Machine::build("m1", graph, actions, GuardTable::new()).unwrap();
        machine.start(None);
        machine.send("GO", EventPayload::Null);
        assert_eq!(machine.phase(), Phase::Faulted);

        let sends = machine.send("GO", EventPayload::Null);
        assert!(sends.is_empty());

        machine.reset();
        assert_eq!(machine.phase(), Phase::Created);
    }
}
