//! A small expression language for predicates, join keys, and
//! projections.

use opal_common::{Schema, TypeId, Value};
use opal_storage::Tuple;
use std::cmp::Ordering;

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

impl CmpOp {
    fn matches(&self, ord: Ordering) -> bool {
        match self {
            CmpOp::Eq => ord == Ordering::Equal,
            CmpOp::NotEq => ord != Ordering::Equal,
            CmpOp::Lt => ord == Ordering::Less,
            CmpOp::LtEq => ord != Ordering::Greater,
            CmpOp::Gt => ord == Ordering::Greater,
            CmpOp::GtEq => ord != Ordering::Less,
        }
    }
}

/// An expression evaluated against one row. Join predicates evaluate
/// against the concatenated row, so column indices address the joined
/// schema.
#[derive(Debug, Clone)]
pub enum Expression {
    /// The value of column `index`.
    Column(usize),
    /// A literal.
    Constant(Value),
    /// Three-valued comparison: NULL operands yield NULL.
    Compare(Box<Expression>, CmpOp, Box<Expression>),
    /// Logical AND with SQL null semantics.
    And(Box<Expression>, Box<Expression>),
    /// Logical OR with SQL null semantics.
    Or(Box<Expression>, Box<Expression>),
    /// Logical NOT; NULL stays NULL.
    Not(Box<Expression>),
}

impl Expression {
    /// Convenience constructor for `column <op> literal`.
    pub fn compare_column(index: usize, op: CmpOp, value: Value) -> Expression {
        Expression::Compare(
            Box::new(Expression::Column(index)),
            op,
            Box::new(Expression::Constant(value)),
        )
    }

    /// Evaluates this expression against `tuple` under `schema`.
    pub fn evaluate(&self, tuple: &Tuple, schema: &Schema) -> Value {
        match self {
            Expression::Column(index) => tuple.value(schema, *index),
            Expression::Constant(value) => value.clone(),
            Expression::Compare(left, op, right) => {
                let lhs = left.evaluate(tuple, schema);
                let rhs = right.evaluate(tuple, schema);
                match lhs.compare(&rhs) {
                    Some(ord) => Value::Boolean(op.matches(ord)),
                    None => Value::Null(TypeId::Boolean),
                }
            }
            Expression::And(left, right) => {
                let lhs = left.evaluate(tuple, schema);
                let rhs = right.evaluate(tuple, schema);
                match (bool3(&lhs), bool3(&rhs)) {
                    (Some(false), _) | (_, Some(false)) => Value::Boolean(false),
                    (Some(true), Some(true)) => Value::Boolean(true),
                    _ => Value::Null(TypeId::Boolean),
                }
            }
            Expression::Or(left, right) => {
                let lhs = left.evaluate(tuple, schema);
                let rhs = right.evaluate(tuple, schema);
                match (bool3(&lhs), bool3(&rhs)) {
                    (Some(true), _) | (_, Some(true)) => Value::Boolean(true),
                    (Some(false), Some(false)) => Value::Boolean(false),
                    _ => Value::Null(TypeId::Boolean),
                }
            }
            Expression::Not(inner) => match bool3(&inner.evaluate(tuple, schema)) {
                Some(b) => Value::Boolean(!b),
                None => Value::Null(TypeId::Boolean),
            },
        }
    }
}

fn bool3(value: &Value) -> Option<bool> {
    match value {
        Value::Boolean(b) => Some(*b),
        _ => None,
    }
}
