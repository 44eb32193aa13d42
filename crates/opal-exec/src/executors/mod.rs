//! The operator catalogue.

pub mod aggregate;
pub mod delete;
pub mod filter;
pub mod hash_join;
pub mod index_scan;
pub mod insert;
pub mod limit;
pub mod nested_index_join;
pub mod nested_loop_join;
pub mod projection;
pub mod seq_scan;
pub mod sort;
pub mod update;
pub mod values;

pub use aggregate::{AggregateExpr, AggregationExecutor, AggregationType};
pub use delete::DeleteExecutor;
pub use filter::FilterExecutor;
pub use hash_join::HashJoinExecutor;
pub use index_scan::{IndexScanExecutor, IndexScanMode};
pub use insert::InsertExecutor;
pub use limit::LimitExecutor;
pub use nested_index_join::NestedIndexJoinExecutor;
pub use nested_loop_join::NestedLoopJoinExecutor;
pub use projection::ProjectionExecutor;
pub use seq_scan::SeqScanExecutor;
pub use sort::ExternalMergeSortExecutor;
pub use update::UpdateExecutor;
pub use values::ValuesExecutor;

use opal_common::{Schema, TypeId, Value};
use opal_storage::Tuple;

/// Join flavours supported by the join operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    /// Left outer: unmatched left rows emit right-side NULLs.
    Left,
}

/// Concatenates a left row with a right row (or right-side NULLs) into
/// the joined shape.
pub(crate) fn join_rows(
    left: &Tuple,
    left_schema: &Schema,
    right: Option<&Tuple>,
    right_schema: &Schema,
    out_schema: &Schema,
) -> Tuple {
    let mut values = left.values(left_schema);
    match right {
        Some(right) => values.extend(right.values(right_schema)),
        None => values.extend(
            right_schema
                .columns()
                .iter()
                .map(|c| Value::Null(c.type_id())),
        ),
    }
    Tuple::from_values(&values, out_schema).expect("joined row matches joined schema")
}

/// Output schema of the data-modification executors: one count column.
pub(crate) fn dml_schema() -> Schema {
    Schema::new(vec![opal_common::Column::new("rows", TypeId::BigInt)])
}

/// A list of values usable as a hash-table key. Equality is by value
/// (`Int 5` equals `BigInt 5`) and hashing is consistent with it.
///
/// NULL components compare equal to each other, which is GROUP BY
/// semantics: SQL groups NULLs together. Join equality is three-valued
/// and must never match NULL keys, so the join operators check
/// [`ValueKey::has_null`] and keep such keys out of their probe tables.
#[derive(Debug, Clone)]
pub(crate) struct ValueKey(pub Vec<Value>);

impl ValueKey {
    /// Returns true if any component is NULL.
    pub(crate) fn has_null(&self) -> bool {
        self.0.iter().any(Value::is_null)
    }
}

impl PartialEq for ValueKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.len() == other.0.len()
            && self.0.iter().zip(&other.0).all(|(a, b)| {
                match (a.is_null(), b.is_null()) {
                    (true, true) => true,
                    (false, false) => a.compare(b) == Some(std::cmp::Ordering::Equal),
                    _ => false,
                }
            })
    }
}

impl Eq for ValueKey {}

impl std::hash::Hash for ValueKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        for value in &self.0 {
            hash_value(value, state);
        }
    }
}

fn hash_value<H: std::hash::Hasher>(value: &Value, state: &mut H) {
    use std::hash::Hash;
    match value {
        Value::Null(_) => 0u8.hash(state),
        Value::Boolean(b) => {
            1u8.hash(state);
            b.hash(state);
        }
        // Int and BigInt hash alike so mixed-width keys stay consistent
        // with equality.
        Value::Int(v) => {
            2u8.hash(state);
            (*v as i64).hash(state);
        }
        Value::BigInt(v) => {
            2u8.hash(state);
            v.hash(state);
        }
        Value::Varchar(s) => {
            3u8.hash(state);
            s.hash(state);
        }
    }
}
