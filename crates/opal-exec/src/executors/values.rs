//! Literal row source.

use crate::executor::Executor;
use opal_common::{Rid, Schema, Value};
use opal_storage::Tuple;

/// Produces a fixed list of literal rows. Rids are the invalid sentinel.
pub struct ValuesExecutor {
    schema: Schema,
    rows: Vec<Vec<Value>>,
    cursor: usize,
}

impl ValuesExecutor {
    pub fn new(schema: Schema, rows: Vec<Vec<Value>>) -> Self {
        Self {
            schema,
            rows,
            cursor: 0,
        }
    }
}

impl Executor for ValuesExecutor {
    fn init(&mut self) {
        self.cursor = 0;
    }

    fn next(&mut self, tuples: &mut Vec<Tuple>, rids: &mut Vec<Rid>, batch_size: usize) -> bool {
        tuples.clear();
        rids.clear();
        while self.cursor < self.rows.len() && tuples.len() < batch_size {
            let tuple = Tuple::from_values(&self.rows[self.cursor], &self.schema)
                .expect("literal row matches values schema");
            tuples.push(tuple);
            rids.push(Rid::INVALID);
            self.cursor += 1;
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
    use opal_common::{Column, TypeId};

    #[test]
    fn test_values_batching() {
        let schema = Schema::new(vec![Column::new("n", TypeId::Int)]);
        let rows = (0..5).map(|n| vec![Value::Int(n)]).collect();
        let mut exec = ValuesExecutor::new(schema, rows);
        exec.init();

        let mut tuples = Vec::new();
        let mut rids = Vec::new();
        assert!(exec.next(&mut tuples, &mut rids, 3));
        assert_eq!(tuples.len(), 3);
        assert!(rids.iter().all(|r| !r.is_valid()));
        assert!(exec.next(&mut tuples, &mut rids, 3));
        assert_eq!(tuples.len(), 2);
        assert!(!exec.next(&mut tuples, &mut rids, 3));
        assert!(tuples.is_empty());

        // init rewinds.
        exec.init();
        assert!(exec.next(&mut tuples, &mut rids, 10));
        assert_eq!(tuples.len(), 5);
    }
}
