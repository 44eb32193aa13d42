//! Tuple ordering for sort and top-N operators.

use crate::expr::Expression;
use opal_common::{Schema, Value};
use opal_storage::Tuple;
use std::cmp::Ordering;

/// Sort direction of one ORDER BY term.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderDirection {
    Default,
    Asc,
    Desc,
}

/// Null placement of one ORDER BY term.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NullOrder {
    /// NULLS FIRST for ascending terms, NULLS LAST for descending.
    Default,
    NullsFirst,
    NullsLast,
}

/// One ORDER BY term.
#[derive(Debug, Clone)]
pub struct OrderBy {
    pub expr: Expression,
    pub direction: OrderDirection,
    pub nulls: NullOrder,
}

impl OrderBy {
    pub fn asc(expr: Expression) -> Self {
        Self {
            expr,
            direction: OrderDirection::Asc,
            nulls: NullOrder::Default,
        }
    }

    pub fn desc(expr: Expression) -> Self {
        Self {
            expr,
            direction: OrderDirection::Desc,
            nulls: NullOrder::Default,
        }
    }

    fn is_asc(&self) -> bool {
        !matches!(self.direction, OrderDirection::Desc)
    }

    fn nulls_first(&self) -> bool {
        match self.nulls {
            NullOrder::NullsFirst => true,
            NullOrder::NullsLast => false,
            NullOrder::Default => self.is_asc(),
        }
    }
}

/// Projected ORDER BY values for one row.
pub type SortKey = Vec<Value>;

/// Compares rows by their sort keys, evaluating the ORDER BY list left
/// to right. Ties compare equal, so a stable sort keeps input order.
#[derive(Debug, Clone)]
pub struct TupleComparator {
    order_bys: Vec<OrderBy>,
}

impl TupleComparator {
    pub fn new(order_bys: Vec<OrderBy>) -> Self {
        Self { order_bys }
    }

    /// Projects the ORDER BY expressions of `tuple` into a sort key.
    pub fn sort_key(&self, tuple: &Tuple, schema: &Schema) -> SortKey {
        self.order_bys
            .iter()
            .map(|ob| ob.expr.evaluate(tuple, schema))
            .collect()
    }

    /// Three-way comparison of two sort keys.
    pub fn compare(&self, a: &SortKey, b: &SortKey) -> Ordering {
        debug_assert_eq!(a.len(), self.order_bys.len());
        debug_assert_eq!(b.len(), self.order_bys.len());

        for (term, (va, vb)) in self.order_bys.iter().zip(a.iter().zip(b.iter())) {
            let ord = match (va.is_null(), vb.is_null()) {
                (true, true) => Ordering::Equal,
                (true, false) => {
                    if term.nulls_first() {
                        Ordering::Less
                    } else {
                        Ordering::Greater
                    }
                }
                (false, true) => {
                    if term.nulls_first() {
                        Ordering::Greater
                    } else {
                        Ordering::Less
                    }
                }
                (false, false) => {
                    let natural = va.compare(vb).unwrap_or(Ordering::Equal);
                    if term.is_asc() {
                        natural
                    } else {
                        natural.reverse()
                    }
                }
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opal_common::{Column, TypeId};

    fn schema() -> Schema {
        Schema::new(vec![
            Column::new("a", TypeId::BigInt),
            Column::new("b", TypeId::Int),
        ])
    }

    fn key(cmp: &TupleComparator, a: Value, b: Value) -> SortKey {
        let tuple = Tuple::from_values(&[a, b], &schema()).unwrap();
        cmp.sort_key(&tuple, &schema())
    }

    fn two_term() -> TupleComparator {
        TupleComparator::new(vec![
            OrderBy::asc(Expression::Column(0)),
            OrderBy::desc(Expression::Column(1)),
        ])
    }

    #[test]
    fn test_primary_ascending() {
        let cmp = two_term();
        let a = key(&cmp, Value::BigInt(1), Value::Int(0));
        let b = key(&cmp, Value::BigInt(2), Value::Int(0));
        assert_eq!(cmp.compare(&a, &b), Ordering::Less);
        assert_eq!(cmp.compare(&b, &a), Ordering::Greater);
    }

    #[test]
    fn test_secondary_descending_breaks_ties() {
        let cmp = two_term();
        let a = key(&cmp, Value::BigInt(1), Value::Int(9));
        let b = key(&cmp, Value::BigInt(1), Value::Int(3));
        // Descending on b: larger b sorts first.
        assert_eq!(cmp.compare(&a, &b), Ordering::Less);
    }

    #[test]
    fn test_full_tie_is_equal() {
        let cmp = two_term();
        let a = key(&cmp, Value::BigInt(1), Value::Int(1));
        let b = key(&cmp, Value::BigInt(1), Value::Int(1));
        assert_eq!(cmp.compare(&a, &b), Ordering::Equal);
    }

    #[test]
    fn test_default_null_placement() {
        // ASC: nulls first. DESC: nulls last.
        let asc = TupleComparator::new(vec![OrderBy::asc(Expression::Column(0))]);
        let null_key = key(&asc, Value::Null(TypeId::BigInt), Value::Int(0));
        let one_key = key(&asc, Value::BigInt(1), Value::Int(0));
        assert_eq!(asc.compare(&null_key, &one_key), Ordering::Less);

        let desc = TupleComparator::new(vec![OrderBy::desc(Expression::Column(0))]);
        let null_key = key(&desc, Value::Null(TypeId::BigInt), Value::Int(0));
        let one_key = key(&desc, Value::BigInt(1), Value::Int(0));
        assert_eq!(desc.compare(&null_key, &one_key), Ordering::Greater);
    }

    #[test]
    fn test_explicit_null_placement() {
        let cmp = TupleComparator::new(vec![OrderBy {
            expr: Expression::Column(0),
            direction: OrderDirection::Asc,
            nulls: NullOrder::NullsLast,
        }]);
        let null_key = key(&cmp, Value::Null(TypeId::BigInt), Value::Int(0));
        let one_key = key(&cmp, Value::BigInt(1), Value::Int(0));
        assert_eq!(cmp.compare(&null_key, &one_key), Ordering::Greater);
    }
}
