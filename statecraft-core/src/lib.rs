//! Engine crate for a general-purpose statechart interpreter and
//! multi-machine orchestrator: a [`crate::loader`] that turns a JSON machine
//! definition into a [`crate::graph::StateGraph`], a reflective
//! [`crate::interpreter::Interpreter`] that runs it, an [`crate::orchestrator::Orchestrator`]
//! that routes events between independently running [`crate::machine::Machine`]s,
//! and an [`crate::array`] dense-table compiler variant for the same semantics.
//!
//! No I/O or transport concerns live here — see `statecraft-server` for the
//! gRPC surface.

pub mod array;
pub mod config;
pub mod delay;
pub mod duration;
pub mod error;
pub mod graph;
pub mod interpreter;
pub mod loader;
pub mod machine;
pub mod model;
pub mod orchestrator;
pub mod value;

#[cfg(any(test, feature = "testkit"))]
pub mod testkit;

pub use error::{BuildError, LoadError, SendError};
pub use graph::StateGraph;
pub use interpreter::{Configuration, Interpreter};
pub use machine::{Machine, Phase, Snapshot};
pub use orchestrator::{Backpressure, Orchestrator};
pub use value::{Context, EventPayload, Value};
