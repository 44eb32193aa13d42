//! Partitioned hash join.
//!
//! Both inputs are partitioned onto disk first, writing each row into
//! intermediate-result pages selected by `partition_hash(key) mod P`.
//! Each partition is then joined in memory: a hash table over the right
//! side keyed by the standard hasher, probed by the left side. The two
//! hash functions are deliberately distinct so probe-table collisions
//! inside a partition are independent of partition placement.

use crate::executor::Executor;
use crate::executors::{join_rows, JoinType, ValueKey};
use crate::expr::Expression;
use opal_buffer::BufferPoolManager;
use opal_common::{PageId, Rid, Schema, Value};
use opal_storage::spill::{SpillPageMut, SpillPageRef};
use opal_storage::Tuple;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// Number of disk partitions per side.
const NUM_PARTITIONS: usize = 8;

/// FNV-1a over a stable byte encoding of the key values; used only for
/// partition selection.
fn partition_hash(key: &ValueKey) -> u64 {
    const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

    let mut hash = FNV_OFFSET;
    let mut eat = |byte: u8| {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    };
    for value in &key.0 {
        match value {
            Value::Null(_) => eat(0),
            Value::Boolean(b) => {
                eat(1);
                eat(*b as u8);
            }
            Value::Int(v) => {
                eat(2);
                (*v as i64).to_le_bytes().iter().for_each(|&b| eat(b));
            }
            Value::BigInt(v) => {
                eat(2);
                v.to_le_bytes().iter().for_each(|&b| eat(b));
            }
            Value::Varchar(s) => {
                eat(3);
                s.as_bytes().iter().for_each(|&b| eat(b));
            }
        }
    }
    hash
}

/// Grace hash join over spilled partitions. Supports inner and left
/// joins; unmatched left rows emit right-side NULLs.
pub struct HashJoinExecutor {
    left: Box<dyn Executor>,
    right: Box<dyn Executor>,
    left_key_exprs: Vec<Expression>,
    right_key_exprs: Vec<Expression>,
    join_type: JoinType,
    schema: Schema,
    bpm: Arc<BufferPoolManager>,
    left_partitions: Vec<Vec<PageId>>,
    right_partitions: Vec<Vec<PageId>>,
    current_partition: usize,
    output: VecDeque<Tuple>,
}

impl HashJoinExecutor {
    pub fn new(
        left: Box<dyn Executor>,
        right: Box<dyn Executor>,
        left_key_exprs: Vec<Expression>,
        right_key_exprs: Vec<Expression>,
        join_type: JoinType,
        bpm: Arc<BufferPoolManager>,
    ) -> Self {
        let schema = Schema::join(left.output_schema(), right.output_schema());
        Self {
            left,
            right,
            left_key_exprs,
            right_key_exprs,
            join_type,
            schema,
            bpm,
            left_partitions: vec![Vec::new(); NUM_PARTITIONS],
            right_partitions: vec![Vec::new(); NUM_PARTITIONS],
            current_partition: 0,
            output: VecDeque::new(),
        }
    }

    fn key_of(tuple: &Tuple, schema: &Schema, exprs: &[Expression]) -> ValueKey {
        ValueKey(exprs.iter().map(|e| e.evaluate(tuple, schema)).collect())
    }

    fn release_partitions(&mut self) {
        for partition in self
            .left_partitions
            .iter_mut()
            .chain(self.right_partitions.iter_mut())
        {
            for page_id in partition.drain(..) {
                self.bpm.delete_page(page_id);
            }
        }
    }

    /// Appends `tuple` to the tail page of its partition, allocating a
    /// fresh spill page when the tail is full.
    fn spill(&self, partitions: &mut [Vec<PageId>], key: &ValueKey, tuple: &Tuple) {
        let partition = &mut partitions[(partition_hash(key) % NUM_PARTITIONS as u64) as usize];

        if let Some(&tail) = partition.last() {
            let mut guard = self.bpm.write_page(tail);
            let mut page = SpillPageMut::new(guard.data_mut());
            if page.write_tuple(tuple) {
                return;
            }
        }

        let page_id = self.bpm.new_page();
        assert!(
            page_id.is_valid(),
            "out of buffer frames while spilling a hash join partition"
        );
        let mut guard = self.bpm.write_page(page_id);
        let mut page = SpillPageMut::init(guard.data_mut());
        assert!(
            page.write_tuple(tuple),
            "tuple of {} bytes does not fit an empty spill page",
            tuple.len()
        );
        partition.push(page_id);
    }

    fn partition_input(&mut self, is_left: bool) {
        let mut tuples = Vec::new();
        let mut rids = Vec::new();
        loop {
            let produced = if is_left {
                self.left.next(&mut tuples, &mut rids, crate::DEFAULT_BATCH_SIZE)
            } else {
                self.right.next(&mut tuples, &mut rids, crate::DEFAULT_BATCH_SIZE)
            };
            if !produced {
                break;
            }
            let (schema, exprs) = if is_left {
                (self.left.output_schema().clone(), self.left_key_exprs.clone())
            } else {
                (self.right.output_schema().clone(), self.right_key_exprs.clone())
            };
            let mut partitions = if is_left {
                std::mem::take(&mut self.left_partitions)
            } else {
                std::mem::take(&mut self.right_partitions)
            };
            for tuple in tuples.drain(..) {
                let key = Self::key_of(&tuple, &schema, &exprs);
                self.spill(&mut partitions, &key, &tuple);
            }
            if is_left {
                self.left_partitions = partitions;
            } else {
                self.right_partitions = partitions;
            }
            rids.clear();
        }
    }

    fn read_partition(&self, pages: &[PageId]) -> Vec<Tuple> {
        let mut out = Vec::new();
        for &page_id in pages {
            let guard = self.bpm.read_page(page_id);
            out.extend(SpillPageRef::new(guard.data()).tuples());
        }
        out
    }

    /// Joins one partition pair: build on the right, probe with the
    /// left, then release both partitions' pages.
    ///
    /// Join equality is three-valued: a NULL key component can never
    /// equal anything, so NULL-keyed right rows stay out of the probe
    /// table and NULL-keyed left rows probe nothing (padding under a
    /// left join).
    fn process_partition(&mut self, partition: usize) {
        let left_schema = self.left.output_schema().clone();
        let right_schema = self.right.output_schema().clone();

        let mut probe_table: HashMap<ValueKey, Vec<Tuple>> = HashMap::new();
        for tuple in self.read_partition(&self.right_partitions[partition]) {
            let key = Self::key_of(&tuple, &right_schema, &self.right_key_exprs);
            if key.has_null() {
                continue;
            }
            probe_table.entry(key).or_default().push(tuple);
        }

        for left_tuple in self.read_partition(&self.left_partitions[partition]) {
            let key = Self::key_of(&left_tuple, &left_schema, &self.left_key_exprs);
            let probe_hit = if key.has_null() {
                None
            } else {
                probe_table.get(&key)
            };
            match probe_hit {
                Some(matches) => {
                    for right_tuple in matches {
                        self.output.push_back(join_rows(
                            &left_tuple,
                            &left_schema,
                            Some(right_tuple),
                            &right_schema,
                            &self.schema,
                        ));
                    }
                }
                None if self.join_type == JoinType::Left => {
                    self.output.push_back(join_rows(
                        &left_tuple,
                        &left_schema,
                        None,
                        &right_schema,
                        &self.schema,
                    ));
                }
                None => {}
            }
        }

        for page_id in self.left_partitions[partition]
            .drain(..)
            .chain(self.right_partitions[partition].drain(..))
            .collect::<Vec<_>>()
        {
            self.bpm.delete_page(page_id);
        }
    }
}

impl Executor for HashJoinExecutor {
    fn init(&mut self) {
        self.left.init();
        self.right.init();
        self.release_partitions();
        self.output.clear();
        self.current_partition = 0;

        self.partition_input(true);
        self.partition_input(false);
    }

    fn next(&mut self, tuples: &mut Vec<Tuple>, rids: &mut Vec<Rid>, batch_size: usize) -> bool {
        tuples.clear();
        rids.clear();

        while self.output.len() < batch_size && self.current_partition < NUM_PARTITIONS {
            let partition = self.current_partition;
            self.current_partition += 1;
            self.process_partition(partition);
        }

        while tuples.len() < batch_size {
            let Some(t) = self.output.pop_front() else {
                break;
            };
            tuples.push(t);
            rids.push(Rid::INVALID);
        }
        !tuples.is_empty()
    }

    fn output_schema(&self) -> &Schema {
        &self.schema
    }
}
