//! Hash aggregation.

use crate::executor::Executor;
use crate::executors::ValueKey;
use crate::expr::Expression;
use opal_common::{Rid, Schema, Value};
use opal_storage::Tuple;
use std::collections::HashMap;

/// Aggregate functions supported by the grouping executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregationType {
    /// `COUNT(*)`: counts rows, never NULL.
    CountStar,
    /// `COUNT(expr)`: counts non-NULL inputs.
    Count,
    Sum,
    Min,
    Max,
}

/// One aggregate column: the function and its input expression.
#[derive(Debug, Clone)]
pub struct AggregateExpr {
    pub agg_type: AggregationType,
    pub expr: Expression,
}

/// Group-by plus aggregates with SQL null semantics: non-COUNT
/// aggregates skip NULL inputs, `COUNT(*)` counts rows, and a global
/// aggregate over empty input yields one row of initial values.
pub struct AggregationExecutor {
    child: Box<dyn Executor>,
    group_bys: Vec<Expression>,
    aggregates: Vec<AggregateExpr>,
    schema: Schema,
    results: Vec<Tuple>,
    cursor: usize,
    aggregated: bool,
}

impl AggregationExecutor {
    /// `schema` shapes the output: the group-by columns first, then one
    /// column per aggregate.
    pub fn new(
        child: Box<dyn Executor>,
        group_bys: Vec<Expression>,
        aggregates: Vec<AggregateExpr>,
        schema: Schema,
    ) -> Self {
        Self {
            child,
            group_bys,
            aggregates,
            schema,
            results: Vec::new(),
            cursor: 0,
            aggregated: false,
        }
    }

    /// Initial accumulator values: zero for `COUNT(*)`, NULL otherwise
    /// (typed by the output schema).
    fn initial_values(&self) -> Vec<Value> {
        self.aggregates
            .iter()
            .enumerate()
            .map(|(i, agg)| match agg.agg_type {
                AggregationType::CountStar => Value::BigInt(0),
                _ => Value::Null(self.schema.column(self.group_bys.len() + i).type_id()),
            })
            .collect()
    }

    fn combine(&self, accumulators: &mut [Value], tuple: &Tuple, schema: &Schema) {
        for (acc, agg) in accumulators.iter_mut().zip(&self.aggregates) {
            let input = agg.expr.evaluate(tuple, schema);
            match agg.agg_type {
                AggregationType::CountStar => {
                    *acc = acc
                        .checked_add(&Value::BigInt(1))
                        .expect("count accumulator is numeric");
                }
                AggregationType::Count => {
                    if !input.is_null() {
                        *acc = if acc.is_null() {
                            Value::BigInt(1)
                        } else {
                            acc.checked_add(&Value::BigInt(1))
                                .expect("count accumulator is numeric")
                        };
                    }
                }
                AggregationType::Sum => {
                    if !input.is_null() {
                        *acc = if acc.is_null() {
                            input
                        } else {
                            acc.checked_add(&input).expect("sum inputs are numeric")
                        };
                    }
                }
                AggregationType::Min => {
                    if !input.is_null()
                        && (acc.is_null()
                            || input.compare(acc) == Some(std::cmp::Ordering::Less))
                    {
                        *acc = input;
                    }
                }
                AggregationType::Max => {
                    if !input.is_null()
                        && (acc.is_null()
                            || input.compare(acc) == Some(std::cmp::Ordering::Greater))
                    {
                        *acc = input;
                    }
                }
            }
        }
    }

    fn aggregate_child(&mut self) {
        let schema = self.child.output_schema().clone();
        let mut table: HashMap<ValueKey, Vec<Value>> = HashMap::new();
        let mut insertion_order: Vec<ValueKey> = Vec::new();

        let mut tuples = Vec::new();
        let mut rids = Vec::new();
        while self.child.next(&mut tuples, &mut rids, crate::DEFAULT_BATCH_SIZE) {
            for tuple in tuples.drain(..) {
                let key = ValueKey(
                    self.group_bys
                        .iter()
                        .map(|e| e.evaluate(&tuple, &schema))
                        .collect(),
                );
                if !table.contains_key(&key) {
                    insertion_order.push(key.clone());
                    table.insert(key.clone(), self.initial_values());
                }
                let accumulators = table.get_mut(&key).expect("just inserted");
                self.combine(accumulators, &tuple, &schema);
            }
            rids.clear();
        }

        self.results.clear();
        if table.is_empty() && self.group_bys.is_empty() {
            // Global aggregate over empty input: one row of initials.
            let values = self.initial_values();
            self.results.push(
                Tuple::from_values(&values, &self.schema)
                    .expect("aggregate output matches its schema"),
            );
            return;
        }

        for key in insertion_order {
            let accumulators = table.remove(&key).expect("key recorded at insert");
            let mut values = key.0;
            values.extend(accumulators);
            self.results.push(
                Tuple::from_values(&values, &self.schema)
                    .expect("aggregate output matches its schema"),
            );
        }
    }
}

impl Executor for AggregationExecutor {
    fn init(&mut self) {
        self.child.init();
        self.cursor = 0;
        if !self.aggregated {
            self.aggregate_child();
            self.aggregated = true;
        }
    }

    fn next(&mut self, tuples: &mut Vec<Tuple>, rids: &mut Vec<Rid>, batch_size: usize) -> bool {
        tuples.clear();
        rids.clear();
        while self.cursor < self.results.len() && tuples.len() < batch_size {
            tuples.push(self.results[self.cursor].clone());
            rids.push(Rid::INVALID);
            self.cursor += 1;
        }
        !tuples.is_empty()
    }

    fn output_schema(&self) -> &Schema {
        &self.schema
    }
}
