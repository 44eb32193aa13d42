//! Predicate filter.

use crate::executor::Executor;
use crate::expr::Expression;
use opal_common::{Rid, Schema};
use opal_storage::Tuple;

/// Keeps only rows whose predicate evaluates to true. NULL predicates
/// drop the row, per SQL semantics.
pub struct FilterExecutor {
    child: Box<dyn Executor>,
    predicate: Expression,
}

impl FilterExecutor {
    pub fn new(child: Box<dyn Executor>, predicate: Expression) -> Self {
        Self { child, predicate }
    }
}

impl Executor for FilterExecutor {
    fn init(&mut self) {
        self.child.init();
    }

    fn next(&mut self, tuples: &mut Vec<Tuple>, rids: &mut Vec<Rid>, batch_size: usize) -> bool {
        tuples.clear();
        rids.clear();

        let mut child_tuples = Vec::new();
        let mut child_rids = Vec::new();
        while tuples.len() < batch_size {
            if !self.child.next(&mut child_tuples, &mut child_rids, batch_size) {
                break;
            }
            let schema = self.child.output_schema().clone();
            for (tuple, rid) in child_tuples.drain(..).zip(child_rids.drain(..)) {
                if self.predicate.evaluate(&tuple, &schema).is_true() {
                    tuples.push(tuple);
                    rids.push(rid);
                }
            }
        }
        !tuples.is_empty()
    }

    fn output_schema(&self) -> &Schema {
        self.child.output_schema()
    }
}
