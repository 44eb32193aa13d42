//! Sequential table scan.

use crate::catalog::TableInfo;
use crate::executor::Executor;
use crate::expr::Expression;
use opal_common::{PageId, Rid, Schema};
use opal_storage::Tuple;

/// Walks a table heap in rid order, skipping deleted tuples and
/// applying an optional predicate inline.
pub struct SeqScanExecutor {
    table: TableInfo,
    predicate: Option<Expression>,
    page_id: PageId,
    slot: u32,
}

impl SeqScanExecutor {
    pub fn new(table: TableInfo, predicate: Option<Expression>) -> Self {
        let first = table.heap.first_page_id();
        Self {
            table,
            predicate,
            page_id: first,
            slot: 0,
        }
    }
}

impl Executor for SeqScanExecutor {
    fn init(&mut self) {
        self.page_id = self.table.heap.first_page_id();
        self.slot = 0;
    }

    fn next(&mut self, tuples: &mut Vec<Tuple>, rids: &mut Vec<Rid>, batch_size: usize) -> bool {
        tuples.clear();
        rids.clear();

        let mut iter = self.table.heap.scan_from(self.page_id, self.slot);
        while tuples.len() < batch_size {
            let Some((rid, meta, tuple)) = iter.next() else {
                break;
            };
            if meta.is_deleted {
                continue;
            }
            if let Some(predicate) = &self.predicate {
                if !predicate.evaluate(&tuple, &self.table.schema).is_true() {
                    continue;
                }
            }
            tuples.push(tuple);
            rids.push(rid);
        }
        let (page_id, slot) = iter.position();
        self.page_id = page_id;
        self.slot = slot;
        !tuples.is_empty()
    }

    fn output_schema(&self) -> &Schema {
        &self.table.schema
    }
}
