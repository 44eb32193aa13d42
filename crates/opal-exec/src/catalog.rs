//! Handles binding executors to storage.
//!
//! The full catalog (names, oids, DDL) lives outside this crate; the
//! executors only need the storage handles themselves.

use opal_common::{OpalError, Result, Rid, Schema, Value};
use opal_storage::{BPlusTree, Tuple};
use std::sync::Arc;

/// A table's heap and row shape.
#[derive(Clone)]
pub struct TableInfo {
    pub heap: Arc<opal_storage::TableHeap>,
    pub schema: Schema,
}

/// An index over one integer column of a table.
#[derive(Clone)]
pub struct IndexInfo {
    pub index: Arc<BPlusTree<i64, Rid>>,
    /// Which column of the table the index keys on.
    pub key_column: usize,
}

impl IndexInfo {
    /// Extracts this index's key from a table row.
    pub fn key_of(&self, tuple: &Tuple, schema: &Schema) -> Result<i64> {
        index_key(&tuple.value(schema, self.key_column))
    }
}

/// Converts a column value into an index key. Indexed columns are
/// integer-typed and non-null.
pub fn index_key(value: &Value) -> Result<i64> {
    match value {
        Value::BigInt(v) => Ok(*v),
        Value::Int(v) => Ok(*v as i64),
        other => Err(OpalError::Execution(format!(
            "value {other} cannot be an index key"
        ))),
    }
}
