//! Property-based test generators using proptest.

use proptest::prelude::*;
use serde_json::{json, Value};
use shared_reducer::{FieldDelta, FieldOp};

/// Field names used by generated deltas.
pub const FIELDS: [&str; 3] = ["foo", "bar", "baz"];

/// Strategy for one field operation.
pub fn field_op_strategy() -> impl Strategy<Value = FieldOp> {
    prop_oneof![
        (-50i64..50).prop_map(FieldOp::Add),
        (-50i64..50).prop_map(|n| FieldOp::Set(json!(n))),
        "[a-z]{0,4}".prop_map(|s| FieldOp::Set(Value::String(s))),
    ]
}

/// Strategy for a delta touching any subset of [`FIELDS`].
pub fn field_delta_strategy() -> impl Strategy<Value = FieldDelta> {
    (
        proptest::option::of(field_op_strategy()),
        proptest::option::of(field_op_strategy()),
        proptest::option::of(field_op_strategy()),
    )
        .prop_map(|(foo, bar, baz)| {
            FIELDS
                .iter()
                .zip([foo, bar, baz])
                .filter_map(|(field, op)| Some((field.to_string(), op?)))
                .collect()
        })
}

/// Strategy for a sequence of deltas.
pub fn delta_sequence_strategy(max: usize) -> impl Strategy<Value = Vec<FieldDelta>> {
    prop::collection::vec(field_delta_strategy(), 0..max)
}

/// Strategy for a JSON object state over [`FIELDS`].
pub fn state_strategy() -> impl Strategy<Value = Value> {
    (-100i64..100, -100i64..100, "[a-z]{0,4}")
        .prop_map(|(foo, bar, baz)| json!({"foo": foo, "bar": bar, "baz": baz}))
}
