//! Index scan.

use crate::catalog::TableInfo;
use crate::executor::Executor;
use opal_common::{Rid, Schema};
use opal_storage::{BPlusTree, Tuple};
use std::sync::Arc;

/// How the index is consumed.
pub enum IndexScanMode {
    /// Probe the tree once per key in the given order.
    Point(Vec<i64>),
    /// Walk the whole tree in key order.
    Ordered,
}

/// Produces table rows through a B+tree index, either probing a list of
/// point keys or streaming the tree's full ordered range.
pub struct IndexScanExecutor {
    table: TableInfo,
    index: Arc<BPlusTree<i64, Rid>>,
    mode: IndexScanMode,
    /// Point mode: next probe key position.
    probe_cursor: usize,
    /// Ordered mode: lower bound of the unread remainder.
    range_cursor: Option<i64>,
    exhausted: bool,
}

impl IndexScanExecutor {
    pub fn new(table: TableInfo, index: Arc<BPlusTree<i64, Rid>>, mode: IndexScanMode) -> Self {
        Self {
            table,
            index,
            mode,
            probe_cursor: 0,
            range_cursor: None,
            exhausted: false,
        }
    }

    /// Fetches the heap row behind an index hit; deleted rows are
    /// filtered here so both modes agree with sequential scan.
    fn fetch(&self, rid: Rid) -> Option<Tuple> {
        let (meta, tuple) = self.table.heap.get_tuple(rid).ok()?;
        (!meta.is_deleted).then_some(tuple)
    }
}

impl Executor for IndexScanExecutor {
    fn init(&mut self) {
        self.probe_cursor = 0;
        self.range_cursor = None;
        self.exhausted = false;
    }

    fn next(&mut self, tuples: &mut Vec<Tuple>, rids: &mut Vec<Rid>, batch_size: usize) -> bool {
        tuples.clear();
        rids.clear();
        if self.exhausted {
            return false;
        }

        match &self.mode {
            IndexScanMode::Point(keys) => {
                while self.probe_cursor < keys.len() && tuples.len() < batch_size {
                    let key = keys[self.probe_cursor];
                    self.probe_cursor += 1;
                    let Ok(Some(rid)) = self.index.get(&key) else {
                        continue;
                    };
                    if let Some(tuple) = self.fetch(rid) {
                        tuples.push(tuple);
                        rids.push(rid);
                    }
                }
                if self.probe_cursor >= keys.len() && tuples.is_empty() {
                    self.exhausted = true;
                }
            }
            IndexScanMode::Ordered => {
                // The tree iterator borrows the tree, so the cursor is
                // parked as a key lower bound between batches.
                let iter = match self.range_cursor {
                    None => self.index.iter(),
                    Some(from) => self.index.iter_from(&from),
                };
                let Ok(iter) = iter else {
                    self.exhausted = true;
                    return false;
                };
                let mut last_key = None;
                for (key, rid) in iter {
                    last_key = Some(key);
                    if let Some(tuple) = self.fetch(rid) {
                        tuples.push(tuple);
                        rids.push(rid);
                    }
                    if tuples.len() >= batch_size {
                        break;
                    }
                }
                match last_key {
                    Some(key) if key < i64::MAX => self.range_cursor = Some(key + 1),
                    _ => self.exhausted = true,
                }
            }
        }
        !tuples.is_empty()
    }

    fn output_schema(&self) -> &Schema {
        &self.table.schema
    }
}
