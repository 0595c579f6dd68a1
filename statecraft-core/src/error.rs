use thiserror::Error;

/// Errors raised by [`crate::loader::load`]. Structural, fatal, surfaced to
/// the caller before any machine is built.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LoadError {
    #[error("transition in '{source}' targets unknown state '{target}'")]
    UnknownTarget { source: String, target: String },

    #[error("initial chain starting at '{0}' does not terminate (cycle or depth overrun)")]
    CycleInInitial(String),

    #[error("parallel state '{0}' must not declare 'initial'")]
    InvalidParallelInitial(String),

    #[error("duplicate child id '{0}'")]
    DuplicateChild(String),

    #[error("compound state '{0}' has no children")]
    EmptyCompound(String),

    #[error("malformed duration literal '{0}' (expected NNms|NNs|NNm|NNh or a bare integer)")]
    MalformedDuration(String),

    #[error("event '{event}' payload schema mismatch on '{source}': {detail}")]
    UnknownEventSchema {
        source: String,
        event: String,
        detail: String,
    },

    #[error("state '{0}' has no 'initial' and is not atomic/final")]
    MissingInitial(String),

    #[error("'always' transition cycle detected starting at '{0}'")]
    AlwaysCycle(String),

    #[error("malformed machine definition: {0}")]
    MalformedDocument(String),
}

/// Errors raised by [`crate::machine::Machine::build`]. Fatal at build time.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BuildError {
    #[error("action symbol '{0}' referenced by the graph has no entry in the ActionTable")]
    UnknownAction(String),

    #[error("guard symbol '{0}' referenced by the graph has no entry in the GuardTable")]
    UnknownGuard(String),
}

/// Errors returned to a sender at the Orchestrator boundary (§6, §7).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SendError {
    #[error("no machine registered under id '{0}'")]
    UnknownTarget(String),

    #[error("sendAndWait timed out waiting for a reply")]
    Timeout,

    #[error("inbox is at capacity and the configured backpressure strategy rejected the send")]
    Backpressure,

    #[error("target machine is not in the running phase")]
    NotRunning,

    #[error("sendAndWait may not be issued from inside an action; use requestSend")]
    IllegalReentrantAsk,
}
