//! Property-based test generators using proptest.
//!
//! Provides strategies for generating random engine operations over small
//! key and id spaces, so sequences collide often enough to exercise
//! staging, retouching, conflicts and id reuse.

use crate::model::ModelOp;
use proptest::prelude::*;

/// Strategy for keys, drawn from a deliberately small space.
pub fn key_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-e]").expect("valid regex")
}

/// Strategy for values.
pub fn value_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z0-9]{0,8}").expect("valid regex")
}

/// Strategy for transaction ids, drawn from a small space so ids collide.
pub fn transaction_id_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("t[1-3]").expect("valid regex")
}

/// Strategy for a single operation.
pub fn op_strategy() -> impl Strategy<Value = ModelOp> {
    prop_oneof![
        (key_strategy(), value_strategy())
            .prop_map(|(key, value)| ModelOp::Set { key, value }),
        key_strategy().prop_map(|key| ModelOp::Get { key }),
        key_strategy().prop_map(|key| ModelOp::Remove { key }),
        transaction_id_strategy().prop_map(|id| ModelOp::Open { id }),
        (transaction_id_strategy(), key_strategy(), value_strategy())
            .prop_map(|(id, key, value)| ModelOp::SetIn { id, key, value }),
        (transaction_id_strategy(), key_strategy())
            .prop_map(|(id, key)| ModelOp::GetIn { id, key }),
        (transaction_id_strategy(), key_strategy())
            .prop_map(|(id, key)| ModelOp::RemoveIn { id, key }),
        transaction_id_strategy().prop_map(|id| ModelOp::Rollback { id }),
        transaction_id_strategy().prop_map(|id| ModelOp::Commit { id }),
    ]
}

/// Strategy for operation sequences up to `max_len` operations.
pub fn op_sequence_strategy(max_len: usize) -> impl Strategy<Value = Vec<ModelOp>> {
    prop::collection::vec(op_strategy(), 0..max_len)
}
