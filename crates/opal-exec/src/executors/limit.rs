//! Row-count limit.

use crate::executor::Executor;
use opal_common::{Rid, Schema};
use opal_storage::Tuple;

/// Passes through at most `limit` rows.
pub struct LimitExecutor {
    child: Box<dyn Executor>,
    limit: usize,
    emitted: usize,
}

impl LimitExecutor {
    pub fn new(child: Box<dyn Executor>, limit: usize) -> Self {
        Self {
            child,
            limit,
            emitted: 0,
        }
    }
}

impl Executor for LimitExecutor {
    fn init(&mut self) {
        self.child.init();
        self.emitted = 0;
    }

    fn next(&mut self, tuples: &mut Vec<Tuple>, rids: &mut Vec<Rid>, batch_size: usize) -> bool {
        tuples.clear();
        rids.clear();
        if self.emitted >= self.limit {
            return false;
        }

        let want = batch_size.min(self.limit - self.emitted);
        if !self.child.next(tuples, rids, want) {
            return false;
        }
        // A child may overshoot the asked-for batch; trim to the limit.
        let keep = tuples.len().min(self.limit - self.emitted);
        tuples.truncate(keep);
        rids.truncate(keep);
        self.emitted += keep;
        !tuples.is_empty()
    }

    fn output_schema(&self) -> &Schema {
        self.child.output_schema()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executors::ValuesExecutor;
    use opal_common::{Column, TypeId, Value};

    #[test]
    fn test_limit_cuts_stream() {
        let schema = Schema::new(vec![Column::new("n", TypeId::Int)]);
        let rows = (0..10).map(|n| vec![Value::Int(n)]).collect();
        let mut exec = LimitExecutor::new(Box::new(ValuesExecutor::new(schema, rows)), 4);
        exec.init();

        let mut tuples = Vec::new();
        let mut rids = Vec::new();
        let mut total = 0;
        while exec.next(&mut tuples, &mut rids, 3) {
            total += tuples.len();
        }
        assert_eq!(total, 4);
    }

    #[test]
    fn test_limit_zero() {
        let schema = Schema::new(vec![Column::new("n", TypeId::Int)]);
        let rows = vec![vec![Value::Int(1)]];
        let mut exec = LimitExecutor::new(Box::new(ValuesExecutor::new(schema, rows)), 0);
        exec.init();

        let mut tuples = Vec::new();
        let mut rids = Vec::new();
        assert!(!exec.next(&mut tuples, &mut rids, 8));
    }
}
