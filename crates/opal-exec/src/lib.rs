//! OpalDB query execution.
//!
//! A Volcano-style batched operator surface over the storage layer.
//! Operators pull batches of tuples from their children through
//! [`Executor::next`]; plans are assembled directly from operator
//! constructors by in-process callers (there is no planner or SQL
//! front end in scope).

pub mod catalog;
pub mod comparator;
pub mod executor;
pub mod executors;
pub mod expr;

pub use catalog::{IndexInfo, TableInfo};
pub use comparator::{NullOrder, OrderBy, OrderDirection, TupleComparator};
pub use executor::{Executor, DEFAULT_BATCH_SIZE};
pub use executors::JoinType;
pub use expr::{CmpOp, Expression};
