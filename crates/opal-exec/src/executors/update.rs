//! Tuple update.

use crate::catalog::{IndexInfo, TableInfo};
use crate::executor::Executor;
use crate::executors::dml_schema;
use crate::expr::Expression;
use log::warn;
use opal_common::{Rid, Schema, Value};
use opal_storage::{Tuple, TupleMeta};

/// Updates every child row: the old version is marked deleted, the new
/// version (one target expression per column) is inserted, and every
/// index swaps the old key for the new one. Emits a single count row.
/// A row whose rewrite cannot be stored is skipped and logged (the old
/// version is restored); the rest of the batch proceeds.
pub struct UpdateExecutor {
    table: TableInfo,
    indexes: Vec<IndexInfo>,
    child: Box<dyn Executor>,
    target_exprs: Vec<Expression>,
    schema: Schema,
    done: bool,
}

impl UpdateExecutor {
    pub fn new(
        table: TableInfo,
        indexes: Vec<IndexInfo>,
        child: Box<dyn Executor>,
        target_exprs: Vec<Expression>,
    ) -> Self {
        Self {
            table,
            indexes,
            child,
            target_exprs,
            schema: dml_schema(),
            done: false,
        }
    }
}

impl Executor for UpdateExecutor {
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
            for (old_tuple, old_rid) in child_tuples.drain(..).zip(child_rids.drain(..)) {
                let values: Vec<Value> = self
                    .target_exprs
                    .iter()
                    .map(|e| e.evaluate(&old_tuple, &self.table.schema))
                    .collect();
                let new_tuple = match Tuple::from_values(&values, &self.table.schema) {
                    Ok(tuple) => tuple,
                    Err(e) => {
                        warn!("skipping update of {old_rid}: {e}");
                        continue;
                    }
                };

                if let Err(e) = self
                    .table
                    .heap
                    .update_tuple_meta(old_rid, TupleMeta { is_deleted: true })
                {
                    warn!("skipping update of {old_rid}: {e}");
                    continue;
                }
                let new_rid = match self.table.heap.insert_tuple(TupleMeta::default(), &new_tuple) {
                    Ok(rid) => rid,
                    Err(e) => {
                        warn!("skipping update of {old_rid}, restoring old version: {e}");
                        if let Err(e) = self.table.heap.update_tuple_meta(old_rid, TupleMeta::default())
                        {
                            warn!("could not restore {old_rid}: {e}");
                        }
                        continue;
                    }
                };

                for index in &self.indexes {
                    let old_key = index.key_of(&old_tuple, &self.table.schema);
                    let new_key = index.key_of(&new_tuple, &self.table.schema);
                    match (old_key, new_key) {
                        (Ok(old_key), Ok(new_key)) => {
                            if let Err(e) = index.index.remove(&old_key) {
                                warn!("skipping index swap for {old_rid}: {e}");
                                continue;
                            }
                            if let Err(e) = index.index.insert(new_key, new_rid) {
                                warn!("skipping index swap for {old_rid}: {e}");
                            }
                        }
                        (Err(e), _) | (_, Err(e)) => {
                            warn!("skipping index swap for {old_rid}: {e}");
                        }
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
