//! Intermediate result pages.
//!
//! The spill-file format shared by external merge sort runs and hash
//! join partitions: a 24-byte header `{tuple_count: u64, page_size: u64,
//! next_write_offset: u64}` followed by length-prefixed tuple records
//! packed from offset 24. Like the B+tree node layouts, these are views
//! over page-guard bytes; the buffer pool owns the memory.

use crate::tuple::Tuple;
use opal_common::PAGE_SIZE;

const TUPLE_COUNT_OFF: usize = 0;
const PAGE_SIZE_OFF: usize = 8;
const NEXT_OFFSET_OFF: usize = 16;
/// First byte of tuple data.
pub const SPILL_DATA_START: usize = 24;

fn read_u64(data: &[u8], off: usize) -> u64 {
    u64::from_le_bytes(data[off..off + 8].try_into().expect("spill header too short"))
}

fn write_u64(data: &mut [u8], off: usize, v: u64) {
    data[off..off + 8].copy_from_slice(&v.to_le_bytes());
}

/// Read-only view of a spill page.
pub struct SpillPageRef<'a> {
    data: &'a [u8],
}

impl<'a> SpillPageRef<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    /// Number of tuples stored on this page.
    pub fn tuple_count(&self) -> usize {
        read_u64(self.data, TUPLE_COUNT_OFF) as usize
    }

    /// The physical page size recorded at init time.
    pub fn page_size(&self) -> usize {
        read_u64(self.data, PAGE_SIZE_OFF) as usize
    }

    /// Offset the next tuple would be written at.
    pub fn next_write_offset(&self) -> usize {
        read_u64(self.data, NEXT_OFFSET_OFF) as usize
    }

    /// Reads tuple `index` by walking the length prefixes from the start
    /// of the data area. Returns `None` on out-of-range indices or a
    /// corrupted length chain.
    pub fn read_tuple(&self, index: usize) -> Option<Tuple> {
        if index >= self.tuple_count() || self.page_size() == 0 {
            return None;
        }
        let end = self.next_write_offset().min(self.page_size());
        let mut offset = SPILL_DATA_START;
        for _ in 0..index {
            let len = i32::from_le_bytes(self.data[offset..offset + 4].try_into().ok()?);
            if len < 0 {
                return None;
            }
            offset += 4 + len as usize;
            if offset >= end {
                return None;
            }
        }
        Tuple::deserialize_from(&self.data[offset..end])
    }

    /// Iterates every tuple on the page in write order.
    pub fn tuples(&self) -> Vec<Tuple> {
        (0..self.tuple_count())
            .filter_map(|i| self.read_tuple(i))
            .collect()
    }
}

/// Mutable view of a spill page.
pub struct SpillPageMut<'a> {
    data: &'a mut [u8],
}

impl<'a> SpillPageMut<'a> {
    pub fn new(data: &'a mut [u8]) -> Self {
        Self { data }
    }

    /// Formats the header of a fresh spill page.
    pub fn init(data: &'a mut [u8]) -> Self {
        write_u64(data, TUPLE_COUNT_OFF, 0);
        write_u64(data, PAGE_SIZE_OFF, PAGE_SIZE as u64);
        write_u64(data, NEXT_OFFSET_OFF, SPILL_DATA_START as u64);
        Self { data }
    }

    pub fn as_ref(&self) -> SpillPageRef<'_> {
        SpillPageRef::new(&self.data[..])
    }

    pub fn tuple_count(&self) -> usize {
        self.as_ref().tuple_count()
    }

    /// Clears the page back to empty without touching old bytes.
    pub fn reset(&mut self) {
        write_u64(self.data, TUPLE_COUNT_OFF, 0);
        write_u64(self.data, NEXT_OFFSET_OFF, SPILL_DATA_START as u64);
    }

    /// Appends a tuple. Returns false when the record would not fit (or
    /// the header is unformatted).
    pub fn write_tuple(&mut self, tuple: &Tuple) -> bool {
        let view = self.as_ref();
        let page_size = view.page_size();
        let offset = view.next_write_offset();
        if page_size == 0 || offset < SPILL_DATA_START {
            return false;
        }
        let required = tuple.serialized_size();
        if offset + required > page_size {
            return false;
        }

        tuple.serialize_to(&mut self.data[offset..offset + required]);
        let count = self.as_ref().tuple_count();
        write_u64(self.data, NEXT_OFFSET_OFF, (offset + required) as u64);
        write_u64(self.data, TUPLE_COUNT_OFF, (count + 1) as u64);
        true
    }
}
