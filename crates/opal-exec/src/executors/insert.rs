//! Tuple insertion.

use crate::catalog::{IndexInfo, TableInfo};
use crate::executor::Executor;
use crate::executors::dml_schema;
use log::warn;
use opal_common::{Rid, Schema, Value};
use opal_storage::{Tuple, TupleMeta};

/// Inserts every child row into the table heap and all of its indexes,
/// then emits a single row holding the insert count. A row that cannot
/// be stored (frames exhausted, oversized image) is skipped and logged;
/// the rest of the batch proceeds.
pub struct InsertExecutor {
    table: TableInfo,
    indexes: Vec<IndexInfo>,
    child: Box<dyn Executor>,
    schema: Schema,
    done: bool,
}

impl InsertExecutor {
    pub fn new(table: TableInfo, indexes: Vec<IndexInfo>, child: Box<dyn Executor>) -> Self {
        Self {
            table,
            indexes,
            child,
            schema: dml_schema(),
            done: false,
        }
    }
}

impl Executor for InsertExecutor {
    fn init(&mut self) {
        self.child.init();
        self.done = false;
    }

    fn next(&mut self, tuples: &mut Vec<Tuple>, rids: &mut Vec<Rid>, _batch_size: usize) -> bool {
        tuples.clear();
        rids.clear();
        if self.done {
            return false;
        }
        self.done = true;

        let mut count: i64 = 0;
        let mut child_tuples = Vec::new();
        let mut child_rids = Vec::new();
        while self.child.next(&mut child_tuples, &mut child_rids, crate::DEFAULT_BATCH_SIZE) {
            for tuple in child_tuples.drain(..) {
                let rid = match self.table.heap.insert_tuple(TupleMeta::default(), &tuple) {
                    Ok(rid) => rid,
                    Err(e) => {
                        warn!("skipping insert of a row: {e}");
                        continue;
                    }
                };
                for index in &self.indexes {
                    let key = match index.key_of(&tuple, &self.table.schema) {
                        Ok(key) => key,
                        Err(e) => {
                            warn!("skipping index entry for {rid}: {e}");
                            continue;
                        }
                    };
                    if let Err(e) = index.index.insert(key, rid) {
                        warn!("skipping index entry for {rid}: {e}");
                    }
                }
                count += 1;
            }
            child_rids.clear();
        }

        tuples.push(
            Tuple::from_values(&[Value::BigInt(count)], &self.schema)
                .expect("count row matches dml schema"),
        );
        rids.push(Rid::INVALID);
        true
    }

    fn output_schema(&self) -> &Schema {
        &self.schema
    }
}
