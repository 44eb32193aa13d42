//! Nested-loop join driven by an inner-table index.

use crate::catalog::{index_key, TableInfo};
use crate::executor::Executor;
use crate::executors::{join_rows, JoinType};
use crate::expr::Expression;
use opal_common::{Rid, Schema};
use opal_storage::{BPlusTree, Tuple};
use std::collections::VecDeque;
use std::sync::Arc;

/// For each outer row, probes the inner table's index with the join key
/// and fetches the matching heap row. Unique index, so at most one
/// match per outer row.
pub struct NestedIndexJoinExecutor {
    left: Box<dyn Executor>,
    key_expr: Expression,
    inner: TableInfo,
    index: Arc<BPlusTree<i64, Rid>>,
    join_type: JoinType,
    schema: Schema,
    output: VecDeque<Tuple>,
    done: bool,
}

impl NestedIndexJoinExecutor {
    pub fn new(
        left: Box<dyn Executor>,
        key_expr: Expression,
        inner: TableInfo,
        index: Arc<BPlusTree<i64, Rid>>,
        join_type: JoinType,
    ) -> Self {
        let schema = Schema::join(left.output_schema(), &inner.schema);
        Self {
            left,
            key_expr,
            inner,
            index,
            join_type,
            schema,
            output: VecDeque::new(),
            done: false,
        }
    }

    fn probe(&self, left_tuple: &Tuple, left_schema: &Schema) -> Option<Tuple> {
        let key_value = self.key_expr.evaluate(left_tuple, left_schema);
        if key_value.is_null() {
            return None;
        }
        let key = index_key(&key_value).ok()?;
        let rid = self.index.get(&key).ok()??;
        let (meta, tuple) = self.inner.heap.get_tuple(rid).ok()?;
        (!meta.is_deleted).then_some(tuple)
    }
}

impl Executor for NestedIndexJoinExecutor {
    fn init(&mut self) {
        self.left.init();
        self.output.clear();
        self.done = false;
    }

    fn next(&mut self, tuples: &mut Vec<Tuple>, rids: &mut Vec<Rid>, batch_size: usize) -> bool {
        tuples.clear();
        rids.clear();

        let left_schema = self.left.output_schema().clone();
        let mut left_tuples = Vec::new();
        let mut left_rids = Vec::new();
        while self.output.len() < batch_size && !self.done {
            if !self.left.next(&mut left_tuples, &mut left_rids, batch_size) {
                self.done = true;
                break;
            }
            for left_tuple in left_tuples.drain(..) {
                match self.probe(&left_tuple, &left_schema) {
                    Some(inner_tuple) => self.output.push_back(join_rows(
                        &left_tuple,
                        &left_schema,
                        Some(&inner_tuple),
                        &self.inner.schema,
                        &self.schema,
                    )),
                    None if self.join_type == JoinType::Left => {
                        self.output.push_back(join_rows(
                            &left_tuple,
                            &left_schema,
                            None,
                            &self.inner.schema,
                            &self.schema,
                        ))
                    }
                    None => {}
                }
            }
            left_rids.clear();
        }

        while tuples.len() < batch_size {
            let Some(t) = self.output.pop_front() else {
                break;
            };
            tuples.push(t);
            rids.push(Rid::INVALID);
        }
        !tuples.is_empty()
    }

    fn output_schema(&self) -> &Schema {
        &self.schema
    }
}
