//! The per-path context threaded through one exploration run.
//!
//! `Context` is a string-keyed value map. Reserved keys (listed in
//! [`RESERVED_KEYS`]) are written by the engine and the combinatorial
//! builder; everything else is a response binding keyed by the name
//! of the edge that produced it, written by `explore` as it walks a
//! path.

use std::collections::HashMap;
use std::fmt;

use serde_json::Value;

/// Every context key the engine or builder writes without the
/// caller's involvement. Actions may read these but must not assume
/// they are absent.
pub const RESERVED_KEYS: &[&str] = &[
    "_current_combination",
    "_from_combination",
    "_to_combination",
    "_changed_dimension",
    "_from_value",
    "_to_value",
];

/// Minimal response-shape capability.
///
/// Actions return `Box<dyn ActionResponse>`. The engine calls
/// [`ActionResponse::json`] opportunistically when binding a
/// response into the context; authors whose responses carry no JSON
/// body simply accept the default `None` and no `_json_<edge>`
/// binding is ever written for that edge.
pub trait ActionResponse: fmt::Debug {
    /// The JSON body of this response, if it has one.
    fn json(&self) -> Option<Value> {
        None
    }
}

impl ActionResponse for () {}

impl ActionResponse for Value {
    fn json(&self) -> Option<Value> {
        Some(self.clone())
    }
}

impl ActionResponse for String {
    fn json(&self) -> Option<Value> {
        None
    }
}

/// The context mapping threaded through one exploration path.
///
/// Reconstructed fresh for each exploration node by walking parent
/// pointers (see [`crate::exploration::ExplorationNode`]); never
/// mutably shared between sibling paths.
#[derive(Debug, Default, Clone)]
pub struct Context {
    values: HashMap<String, Value>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw lookup, reserved or not.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Raw insertion, reserved or not. Exposed for edges building
    /// their own bindings; prefer the `set_*` helpers for reserved
    /// keys so the reserved-key contract stays enforced in one place.
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// A snapshot of every binding currently held, reserved or not.
    pub fn to_json(&self) -> Value {
        Value::Object(self.values.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }

    /// Response binding for the named edge, if one has been recorded.
    pub fn response_of(&self, edge_name: &str) -> Option<&Value> {
        self.get(edge_name)
    }

    /// JSON binding written on behalf of the named edge, if the
    /// response it produced exposed one.
    pub fn json_of(&self, edge_name: &str) -> Option<&Value> {
        self.get(&format!("_json_{edge_name}"))
    }

    /// Records the response produced by `edge_name`'s action, keyed
    /// by the edge name, plus a `_json_<edge_name>` binding when the
    /// response exposes a JSON body.
    pub fn bind_response(&mut self, edge_name: &str, response: &dyn ActionResponse) {
        if let Some(json) = response.json() {
            self.set(format!("_json_{edge_name}"), json.clone());
            self.set(edge_name.to_string(), json);
        } else {
            self.set(edge_name.to_string(), Value::String(format!("{response:?}")));
        }
    }

    pub fn set_current_combination(&mut self, combination: Value) {
        self.set("_current_combination", combination);
    }

    pub fn current_combination(&self) -> Option<&Value> {
        self.get("_current_combination")
    }

    /// Injects the reserved bindings the combinatorial builder
    /// attaches to every lifted transition edge.
    pub fn set_transition(
        &mut self,
        from_combination: Value,
        to_combination: Value,
        changed_dimension: &str,
        from_value: Value,
        to_value: Value,
    ) {
        self.set("_from_combination", from_combination);
        self.set("_to_combination", to_combination);
        self.set("_changed_dimension", Value::String(changed_dimension.to_string()));
        self.set("_from_value", from_value);
        self.set("_to_value", to_value);
    }
}
