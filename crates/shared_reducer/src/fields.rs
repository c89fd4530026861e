//! A ready-made [`Context`] over JSON objects.
//!
//! Each delta maps field names to an operation:
//!
//! - `["=", value]` sets the field
//! - `["+", n]` adds the integer `n`, treating a missing or non-integer
//!   field as `0`
//!
//! ```
//! use shared_reducer::{Context, FieldContext, FieldOp};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! let state = Arc::new(json!({"foo": "v1", "bar": 10}));
//! let delta = FieldContext.combine(&[
//!     FieldOp::delta("bar", FieldOp::Add(2)),
//!     FieldOp::delta("bar", FieldOp::Add(3)),
//! ]);
//! let next = FieldContext.update(&state, &delta);
//! assert_eq!(*next, json!({"foo": "v1", "bar": 15}));
//! ```

use crate::context::Context;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Field name to operation.
pub type FieldDelta = BTreeMap<String, FieldOp>;

/// An edit to one field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "(String, Value)", into = "(String, Value)")]
pub enum FieldOp {
    /// Replace the value.
    Set(Value),
    /// Add to an integer value.
    Add(i64),
}

impl FieldOp {
    /// Builds a single-field delta.
    pub fn delta(field: impl Into<String>, op: FieldOp) -> FieldDelta {
        BTreeMap::from([(field.into(), op)])
    }

    fn apply(&self, current: Option<&Value>) -> Value {
        match self {
            FieldOp::Set(value) => value.clone(),
            FieldOp::Add(n) => Value::from(as_integer(current).wrapping_add(*n)),
        }
    }

    /// `self` followed by `next`.
    fn then(self, next: FieldOp) -> FieldOp {
        match (self, next) {
            (FieldOp::Add(a), FieldOp::Add(b)) => FieldOp::Add(a.wrapping_add(b)),
            (FieldOp::Set(value), FieldOp::Add(b)) => {
                FieldOp::Set(Value::from(as_integer(Some(&value)).wrapping_add(b)))
            }
            (_, set @ FieldOp::Set(_)) => set,
        }
    }
}

fn as_integer(value: Option<&Value>) -> i64 {
    value.and_then(Value::as_i64).unwrap_or(0)
}

impl TryFrom<(String, Value)> for FieldOp {
    type Error = String;

    fn try_from((op, argument): (String, Value)) -> Result<Self, Self::Error> {
        match op.as_str() {
            "=" => Ok(FieldOp::Set(argument)),
            "+" => argument
                .as_i64()
                .map(FieldOp::Add)
                .ok_or_else(|| format!("'+' expects an integer, got {argument}")),
            other => Err(format!("unknown field operation {other:?}")),
        }
    }
}

impl From<FieldOp> for (String, Value) {
    fn from(op: FieldOp) -> Self {
        match op {
            FieldOp::Set(value) => ("=".to_string(), value),
            FieldOp::Add(n) => ("+".to_string(), Value::from(n)),
        }
    }
}

/// Field-wise set/add algebra over a JSON object state.
#[derive(Debug, Clone, Copy, Default)]
pub struct FieldContext;

impl Context for FieldContext {
    type State = Value;
    type Delta = FieldDelta;

    fn update(&self, state: &Arc<Value>, delta: &FieldDelta) -> Arc<Value> {
        let current = state.as_object();
        let mut next: Option<Map<String, Value>> = None;

        for (field, op) in delta {
            let old = match &next {
                Some(map) => map.get(field),
                None => current.and_then(|map| map.get(field)),
            };
            let new = op.apply(old);
            if old == Some(&new) {
                continue;
            }
            next.get_or_insert_with(|| current.cloned().unwrap_or_default())
                .insert(field.clone(), new);
        }

        match next {
            Some(map) => Arc::new(Value::Object(map)),
            None => Arc::clone(state),
        }
    }

    fn combine(&self, deltas: &[FieldDelta]) -> FieldDelta {
        let mut combined = FieldDelta::new();
        for delta in deltas {
            for (field, op) in delta {
                let merged = match combined.remove(field) {
                    Some(previous) => previous.then(op.clone()),
                    None => op.clone(),
                };
                combined.insert(field.clone(), merged);
            }
        }
        combined
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn state() -> Arc<Value> {
        Arc::new(json!({"foo": "v1", "bar": 10}))
    }

    #[test]
    fn ops_use_the_array_wire_form() {
        let delta: FieldDelta = serde_json::from_value(json!({
            "foo": ["=", "v2"],
            "bar": ["+", 3],
        }))
        .unwrap();

        assert_eq!(delta["foo"], FieldOp::Set(json!("v2")));
        assert_eq!(delta["bar"], FieldOp::Add(3));
        assert_eq!(
            serde_json::to_value(&delta).unwrap(),
            json!({"bar": ["+", 3], "foo": ["=", "v2"]})
        );
    }

    #[test]
    fn bad_ops_are_rejected() {
        assert!(serde_json::from_value::<FieldOp>(json!(["*", 2])).is_err());
        assert!(serde_json::from_value::<FieldOp>(json!(["+", "x"])).is_err());
        assert!(serde_json::from_value::<FieldOp>(json!("=")).is_err());
    }

    #[test]
    fn update_applies_each_field() {
        let delta = BTreeMap::from([
            ("foo".to_string(), FieldOp::Set(json!("v2"))),
            ("bar".to_string(), FieldOp::Add(5)),
            ("baz".to_string(), FieldOp::Add(1)),
        ]);
        let next = FieldContext.update(&state(), &delta);

        assert_eq!(*next, json!({"foo": "v2", "bar": 15, "baz": 1}));
    }

    #[test]
    fn update_without_effect_keeps_identity() {
        let state = state();
        let same = FieldContext.update(&state, &FieldDelta::new());
        assert!(Arc::ptr_eq(&state, &same));

        let noop = BTreeMap::from([
            ("foo".to_string(), FieldOp::Set(json!("v1"))),
            ("bar".to_string(), FieldOp::Add(0)),
        ]);
        let same = FieldContext.update(&state, &noop);
        assert!(Arc::ptr_eq(&state, &same));
    }

    #[test]
    fn update_leaves_input_untouched() {
        let state = state();
        FieldContext.update(&state, &FieldOp::delta("bar", FieldOp::Set(json!(1))));

        assert_eq!(*state, json!({"foo": "v1", "bar": 10}));
    }

    #[test]
    fn combine_composes_per_field() {
        let combined = FieldContext.combine(&[
            FieldOp::delta("bar", FieldOp::Add(2)),
            FieldOp::delta("foo", FieldOp::Set(json!("a"))),
            FieldOp::delta("bar", FieldOp::Add(3)),
            FieldOp::delta("foo", FieldOp::Set(json!("b"))),
        ]);

        assert_eq!(combined["bar"], FieldOp::Add(5));
        assert_eq!(combined["foo"], FieldOp::Set(json!("b")));
        assert!(FieldContext.combine(&[]).is_empty());
    }

    #[test]
    fn combine_matches_sequential_updates() {
        let deltas = [
            FieldOp::delta("bar", FieldOp::Set(json!(1))),
            FieldOp::delta("bar", FieldOp::Add(2)),
            FieldOp::delta("foo", FieldOp::Add(4)),
            FieldOp::delta("bar", FieldOp::Add(3)),
        ];

        let mut sequential = state();
        for delta in &deltas {
            sequential = FieldContext.update(&sequential, delta);
        }
        let combined = FieldContext.update(&state(), &FieldContext.combine(&deltas));

        assert_eq!(*sequential, json!({"foo": 4, "bar": 6}));
        assert_eq!(sequential, combined);
    }
}
