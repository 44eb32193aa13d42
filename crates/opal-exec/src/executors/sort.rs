//! Two-way external merge sort.
//!
//! Build phase: rows accumulate in an in-memory buffer bounded by the
//! free-frame budget; each full buffer is sorted and spilled as a run of
//! intermediate-result pages. Merge phase: runs merge pairwise until one
//! remains, which the output iterator walks.

use crate::comparator::TupleComparator;
use crate::executor::Executor;
use opal_buffer::BufferPoolManager;
use opal_common::{PageId, Rid, Schema};
use opal_storage::spill::{SpillPageMut, SpillPageRef};
use opal_storage::Tuple;
use std::cmp::Ordering;
use std::sync::Arc;

/// A sorted sequence of tuples spread over spill pages.
type Run = Vec<PageId>;

/// Streams one run in order, holding one page guard per read.
struct RunCursor<'a> {
    bpm: &'a BufferPoolManager,
    pages: &'a [PageId],
    page_idx: usize,
    slot: usize,
}

impl<'a> RunCursor<'a> {
    fn new(bpm: &'a BufferPoolManager, pages: &'a [PageId]) -> Self {
        Self {
            bpm,
            pages,
            page_idx: 0,
            slot: 0,
        }
    }
}

impl Iterator for RunCursor<'_> {
    type Item = Tuple;

    fn next(&mut self) -> Option<Tuple> {
        while self.page_idx < self.pages.len() {
            let guard = self.bpm.read_page(self.pages[self.page_idx]);
            let page = SpillPageRef::new(guard.data());
            if let Some(tuple) = page.read_tuple(self.slot) {
                self.slot += 1;
                return Some(tuple);
            }
            self.page_idx += 1;
            self.slot = 0;
        }
        None
    }
}

/// External merge sort over the child's output.
pub struct ExternalMergeSortExecutor {
    child: Box<dyn Executor>,
    comparator: TupleComparator,
    bpm: Arc<BufferPoolManager>,
    final_run: Run,
    page_idx: usize,
    slot: usize,
}

impl ExternalMergeSortExecutor {
    pub fn new(
        child: Box<dyn Executor>,
        comparator: TupleComparator,
        bpm: Arc<BufferPoolManager>,
    ) -> Self {
        Self {
            child,
            comparator,
            bpm,
            final_run: Vec::new(),
            page_idx: 0,
            slot: 0,
        }
    }

    /// Appends `tuple` to `run`, growing it by a page when needed.
    fn spill_tuple(&self, run: &mut Run, tuple: &Tuple) {
        if let Some(&tail) = run.last() {
            let mut guard = self.bpm.write_page(tail);
            let mut page = SpillPageMut::new(guard.data_mut());
            if page.write_tuple(tuple) {
                return;
            }
        }
        let page_id = self.bpm.new_page();
        assert!(
            page_id.is_valid(),
            "out of buffer frames while spilling a sort run"
        );
        let mut guard = self.bpm.write_page(page_id);
        let mut page = SpillPageMut::init(guard.data_mut());
        assert!(
            page.write_tuple(tuple),
            "tuple of {} bytes does not fit an empty spill page",
            tuple.len()
        );
        run.push(page_id);
    }

    /// Sorts the buffered rows and writes them out as one run.
    fn flush_buffer(&self, buffer: &mut Vec<(crate::comparator::SortKey, Tuple)>) -> Run {
        buffer.sort_by(|a, b| self.comparator.compare(&a.0, &b.0));
        let mut run = Run::new();
        for (_, tuple) in buffer.drain(..) {
            self.spill_tuple(&mut run, &tuple);
        }
        run
    }

    /// Drains the child into sorted runs. The buffer's byte budget is
    /// one page-size unit per free frame, less one frame of headroom.
    fn generate_runs(&mut self) -> Vec<Run> {
        let memory_limit = self.bpm.free_frame_count().saturating_sub(1) * 1024;
        let schema = self.child.output_schema().clone();

        let mut runs = Vec::new();
        let mut buffer: Vec<(crate::comparator::SortKey, Tuple)> = Vec::new();
        let mut usage = 0;

        let mut tuples = Vec::new();
        let mut rids = Vec::new();
        while self.child.next(&mut tuples, &mut rids, crate::DEFAULT_BATCH_SIZE) {
            for tuple in tuples.drain(..) {
                let size = tuple.serialized_size();
                if usage + size > memory_limit && !buffer.is_empty() {
                    runs.push(self.flush_buffer(&mut buffer));
                    usage = 0;
                }
                let key = self.comparator.sort_key(&tuple, &schema);
                buffer.push((key, tuple));
                usage += size;
            }
            rids.clear();
        }
        if !buffer.is_empty() {
            runs.push(self.flush_buffer(&mut buffer));
        }
        runs
    }

    /// Merges two sorted runs into one, freeing the sources.
    fn merge_two(&self, left: Run, right: Run) -> Run {
        let schema = self.child.output_schema().clone();
        let mut merged = Run::new();

        {
            let mut left_cursor = RunCursor::new(&self.bpm, &left).peekable();
            let mut right_cursor = RunCursor::new(&self.bpm, &right).peekable();

            loop {
                let take_left = match (left_cursor.peek(), right_cursor.peek()) {
                    (None, None) => break,
                    (Some(_), None) => true,
                    (None, Some(_)) => false,
                    (Some(l), Some(r)) => {
                        let lk = self.comparator.sort_key(l, &schema);
                        let rk = self.comparator.sort_key(r, &schema);
                        self.comparator.compare(&lk, &rk) != Ordering::Greater
                    }
                };
                let tuple = if take_left {
                    left_cursor.next().expect("peeked tuple exists")
                } else {
                    right_cursor.next().expect("peeked tuple exists")
                };
                self.spill_tuple(&mut merged, &tuple);
            }
        }

        for page_id in left.into_iter().chain(right) {
            self.bpm.delete_page(page_id);
        }
        merged
    }

    /// Pairwise two-way merging until a single run remains.
    fn merge_runs(&self, mut runs: Vec<Run>) -> Run {
        if runs.is_empty() {
            return Run::new();
        }
        while runs.len() > 1 {
            let mut next_round = Vec::with_capacity(runs.len() / 2 + 1);
            let mut iter = runs.into_iter();
            while let Some(left) = iter.next() {
                match iter.next() {
                    Some(right) => next_round.push(self.merge_two(left, right)),
                    None => next_round.push(left),
                }
            }
            runs = next_round;
        }
        runs.pop().expect("one run remains")
    }

    fn release_final_run(&mut self) {
        for page_id in self.final_run.drain(..) {
            self.bpm.delete_page(page_id);
        }
    }
}

impl Executor for ExternalMergeSortExecutor {
    fn init(&mut self) {
        self.child.init();
        self.release_final_run();
        let runs = self.generate_runs();
        self.final_run = self.merge_runs(runs);
        self.page_idx = 0;
        self.slot = 0;
    }

    fn next(&mut self, tuples: &mut Vec<Tuple>, rids: &mut Vec<Rid>, batch_size: usize) -> bool {
        tuples.clear();
        rids.clear();

        let mut cursor = RunCursor::new(&self.bpm, &self.final_run);
        cursor.page_idx = self.page_idx;
        cursor.slot = self.slot;
        while tuples.len() < batch_size {
            let Some(tuple) = cursor.next() else {
                break;
            };
            tuples.push(tuple);
            rids.push(Rid::INVALID);
        }
        self.page_idx = cursor.page_idx;
        self.slot = cursor.slot;
        !tuples.is_empty()
    }

    fn output_schema(&self) -> &Schema {
        self.child.output_schema()
    }
}

impl Drop for ExternalMergeSortExecutor {
    fn drop(&mut self) {
        self.release_final_run();
    }
}
