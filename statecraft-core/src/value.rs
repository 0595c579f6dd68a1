use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A value held in a machine's [`Context`]. Deliberately small and literal —
/// mirrors what a JSON machine definition's `context` block can express.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Value {
    /// Truthiness used by guard/condition evaluation elsewhere in the engine.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(n) => *n != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
        }
    }

    pub fn from_json(v: &serde_json::Value) -> Value {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_json::Value::String(s) => Value::Str(s.clone()),
            other => Value::Str(other.to_string()),
        }
    }
}

/// The opaque event payload. The engine never inspects it; actions and
/// guards may.
pub type EventPayload = serde_json::Value;

/// A machine's key/value store, owned exclusively by the [`crate::machine::Machine`]
/// that holds it. Mutated only by actions, read by guards and actions.
pub type Context = BTreeMap<String, Value>;

/// Build an initial [`Context`] from a script's `"context"` object.
pub fn context_from_json(obj: &serde_json::Map<String, serde_json::Value>) -> Context {
    obj.iter()
        .map(|(k, v)| (k.clone(), Value::from_json(v)))
        .collect()
}
