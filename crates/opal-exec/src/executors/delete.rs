//! Tuple deletion.

use crate::catalog::{IndexInfo, TableInfo};
use crate::executor::Executor;
use crate::executors::dml_schema;
use log::warn;
use opal_common::{Rid, Schema, Value};
use opal_storage::{Tuple, TupleMeta};

/// Marks every child row deleted in the table heap, drops its index
/// entries, and emits a single count row. The child must originate
/// rows in this table (its rids are followed back to the heap). A row
/// that cannot be marked is skipped and logged; the rest of the batch
/// proceeds.
pub struct DeleteExecutor {
    table: TableInfo,
    indexes: Vec<IndexInfo>,
    child: Box<dyn Executor>,
    schema: Schema,
    done: bool,
}

impl DeleteExecutor {
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

impl Executor for DeleteExecutor {
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
            for (tuple, rid) in child_tuples.drain(..).zip(child_rids.drain(..)) {
                if let Err(e) = self
                    .table
                    .heap
                    .update_tuple_meta(rid, TupleMeta { is_deleted: true })
                {
                    warn!("skipping delete of {rid}: {e}");
                    continue;
                }
                for index in &self.indexes {
                    let key = match index.key_of(&tuple, &self.table.schema) {
                        Ok(key) => key,
                        Err(e) => {
                            warn!("skipping index removal for {rid}: {e}");
                            continue;
                        }
                    };
                    if let Err(e) = index.index.remove(&key) {
                        warn!("skipping index removal for {rid}: {e}");
                    }
                }
                count += 1;
            }
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
