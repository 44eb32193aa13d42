//! Nested-loop join.

use crate::executor::Executor;
use crate::executors::{join_rows, JoinType};
use crate::expr::Expression;
use opal_common::{Rid, Schema};
use opal_storage::Tuple;
use std::collections::VecDeque;

/// Joins by iterating the materialised right side once per left row.
/// The predicate evaluates over the concatenated row; a missing
/// predicate degenerates to a cross join.
pub struct NestedLoopJoinExecutor {
    left: Box<dyn Executor>,
    right: Box<dyn Executor>,
    join_type: JoinType,
    predicate: Option<Expression>,
    schema: Schema,
    right_rows: Vec<Tuple>,
    output: VecDeque<Tuple>,
    done: bool,
}

impl NestedLoopJoinExecutor {
    pub fn new(
        left: Box<dyn Executor>,
        right: Box<dyn Executor>,
        join_type: JoinType,
        predicate: Option<Expression>,
    ) -> Self {
        let schema = Schema::join(left.output_schema(), right.output_schema());
        Self {
            left,
            right,
            join_type,
            predicate,
            schema,
            right_rows: Vec::new(),
            output: VecDeque::new(),
            done: false,
        }
    }

    fn join_left_row(&mut self, left_tuple: &Tuple) {
        let left_schema = self.left.output_schema().clone();
        let right_schema = self.right.output_schema().clone();
        let mut matched = false;

        for right_tuple in &self.right_rows {
            let joined = join_rows(
                left_tuple,
                &left_schema,
                Some(right_tuple),
                &right_schema,
                &self.schema,
            );
            let keep = match &self.predicate {
                Some(p) => p.evaluate(&joined, &self.schema).is_true(),
                None => true,
            };
            if keep {
                matched = true;
                self.output.push_back(joined);
            }
        }

        if !matched && self.join_type == JoinType::Left {
            self.output.push_back(join_rows(
                left_tuple,
                &left_schema,
                None,
                &right_schema,
                &self.schema,
            ));
        }
    }
}

impl Executor for NestedLoopJoinExecutor {
    fn init(&mut self) {
        self.left.init();
        self.right.init();
        self.output.clear();
        self.done = false;

        // Materialise the right side once; every left row re-reads it
        // from memory.
        self.right_rows.clear();
        let mut tuples = Vec::new();
        let mut rids = Vec::new();
        while self.right.next(&mut tuples, &mut rids, crate::DEFAULT_BATCH_SIZE) {
            self.right_rows.append(&mut tuples);
        }
    }

    fn next(&mut self, tuples: &mut Vec<Tuple>, rids: &mut Vec<Rid>, batch_size: usize) -> bool {
        tuples.clear();
        rids.clear();

        let mut left_tuples = Vec::new();
        let mut left_rids = Vec::new();
        while self.output.len() < batch_size && !self.done {
            if self.left.next(&mut left_tuples, &mut left_rids, batch_size) {
                for left_tuple in left_tuples.drain(..) {
                    self.join_left_row(&left_tuple);
                }
                left_rids.clear();
            } else {
                self.done = true;
            }
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executors::ValuesExecutor;
    use crate::expr::CmpOp;
    use opal_common::{Column, TypeId, Value};

    fn side(name: &str, ids: &[i64]) -> Box<ValuesExecutor> {
        let schema = Schema::new(vec![Column::new(name, TypeId::BigInt)]);
        let rows = ids.iter().map(|&n| vec![Value::BigInt(n)]).collect();
        Box::new(ValuesExecutor::new(schema, rows))
    }

    fn eq_predicate() -> Expression {
        Expression::Compare(
            Box::new(Expression::Column(0)),
            CmpOp::Eq,
            Box::new(Expression::Column(1)),
        )
    }

    fn run(exec: &mut dyn Executor) -> Vec<Vec<Value>> {
        exec.init();
        let mut tuples = Vec::new();
        let mut rids = Vec::new();
        let mut out = Vec::new();
        while exec.next(&mut tuples, &mut rids, 7) {
            for t in &tuples {
                out.push(t.values(exec.output_schema()));
            }
        }
        out
    }

    #[test]
    fn test_inner_join_matches_only() {
        let mut exec = NestedLoopJoinExecutor::new(
            side("l", &[1, 2, 3]),
            side("r", &[2, 3, 4]),
            JoinType::Inner,
            Some(eq_predicate()),
        );
        let rows = run(&mut exec);
        assert_eq!(
            rows,
            vec![
                vec![Value::BigInt(2), Value::BigInt(2)],
                vec![Value::BigInt(3), Value::BigInt(3)],
            ]
        );
    }

    #[test]
    fn test_left_join_pads_unmatched() {
        let mut exec = NestedLoopJoinExecutor::new(
            side("l", &[1, 2]),
            side("r", &[2]),
            JoinType::Left,
            Some(eq_predicate()),
        );
        let rows = run(&mut exec);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0][0], Value::BigInt(1));
        assert!(rows[0][1].is_null());
        assert_eq!(rows[1], vec![Value::BigInt(2), Value::BigInt(2)]);
    }

    #[test]
    fn test_cross_join_without_predicate() {
        let mut exec = NestedLoopJoinExecutor::new(
            side("l", &[1, 2]),
            side("r", &[10, 20, 30]),
            JoinType::Inner,
            None,
        );
        assert_eq!(run(&mut exec).len(), 6);
    }
}
