//! The batched executor contract.

use opal_common::{Rid, Schema};
use opal_storage::Tuple;

/// Default number of rows per output batch.
pub const DEFAULT_BATCH_SIZE: usize = 128;

/// A Volcano-style operator producing batches of rows.
///
/// `next` clears and refills the output vectors with up to `batch_size`
/// rows and returns true iff at least one row was produced; operators
/// may return short batches. End of stream is a `false` return with
/// empty outputs. Rows that do not originate in a table heap carry
/// [`Rid::INVALID`] in the rid slot; callers must not consult those.
pub trait Executor {
    /// Resets the operator (and its children) to the start of its
    /// output.
    fn init(&mut self);

    /// Produces the next batch.
    fn next(&mut self, tuples: &mut Vec<Tuple>, rids: &mut Vec<Rid>, batch_size: usize) -> bool;

    /// The shape of the rows this operator produces.
    fn output_schema(&self) -> &Schema;
}
