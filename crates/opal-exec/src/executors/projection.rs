//! Expression projection.

use crate::executor::Executor;
use crate::expr::Expression;
use opal_common::{Rid, Schema};
use opal_storage::Tuple;

/// Evaluates one expression per output column over each input row.
pub struct ProjectionExecutor {
    child: Box<dyn Executor>,
    exprs: Vec<Expression>,
    schema: Schema,
}

impl ProjectionExecutor {
    pub fn new(child: Box<dyn Executor>, exprs: Vec<Expression>, schema: Schema) -> Self {
        Self {
            child,
            exprs,
            schema,
        }
    }
}

impl Executor for ProjectionExecutor {
    fn init(&mut self) {
        self.child.init();
    }

    fn next(&mut self, tuples: &mut Vec<Tuple>, rids: &mut Vec<Rid>, batch_size: usize) -> bool {
        tuples.clear();
        rids.clear();

        let mut child_tuples = Vec::new();
        let mut child_rids = Vec::new();
        if !self.child.next(&mut child_tuples, &mut child_rids, batch_size) {
            return false;
        }

        let child_schema = self.child.output_schema().clone();
        for (tuple, rid) in child_tuples.drain(..).zip(child_rids.drain(..)) {
            let values: Vec<_> = self
                .exprs
                .iter()
                .map(|e| e.evaluate(&tuple, &child_schema))
                .collect();
            tuples.push(
                Tuple::from_values(&values, &self.schema)
                    .expect("projection output matches its schema"),
            );
            rids.push(rid);
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
    use opal_common::{Column, TypeId, Value};

    #[test]
    fn test_projection_reshapes_rows() {
        let in_schema = Schema::new(vec![
            Column::new("a", TypeId::Int),
            Column::new("b", TypeId::Int),
        ]);
        let out_schema = Schema::new(vec![Column::new("b", TypeId::Int)]);
        let rows = vec![
            vec![Value::Int(1), Value::Int(10)],
            vec![Value::Int(2), Value::Int(20)],
        ];
        let child = Box::new(ValuesExecutor::new(in_schema, rows));
        let mut exec =
            ProjectionExecutor::new(child, vec![Expression::Column(1)], out_schema.clone());
        exec.init();

        let mut tuples = Vec::new();
        let mut rids = Vec::new();
        assert!(exec.next(&mut tuples, &mut rids, 16));
        let values: Vec<_> = tuples.iter().map(|t| t.value(&out_schema, 0)).collect();
        assert_eq!(values, vec![Value::Int(10), Value::Int(20)]);
    }
}
