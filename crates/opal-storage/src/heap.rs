//! Slotted table heap.
//!
//! Heap pages hold tuple images in a classic slotted layout: a 12-byte
//! header `{next_page_id: i32, tuple_count: u32, free_end: u32}`, a slot
//! directory growing down the page, and tuple data packed upward from
//! the page end. Pages chain through `next_page_id`; the heap appends to
//! the tail page and allocates a new one when it fills. Each slot
//! carries per-tuple metadata, currently just the deleted flag consumed
//! by sequential scans.

use crate::tuple::Tuple;
use bytes::Bytes;
use log::debug;
use opal_buffer::BufferPoolManager;
use opal_common::{OpalError, PageId, Result, Rid, PAGE_SIZE};
use parking_lot::Mutex;
use std::sync::Arc;

/// Per-tuple metadata stored in the slot directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TupleMeta {
    /// Logically deleted; scans skip the tuple, the slot stays.
    pub is_deleted: bool,
}

impl TupleMeta {
    fn to_raw(self) -> u32 {
        self.is_deleted as u32
    }

    fn from_raw(raw: u32) -> Self {
        Self {
            is_deleted: raw & 1 != 0,
        }
    }
}

const NEXT_PAGE_OFF: usize = 0;
const TUPLE_COUNT_OFF: usize = 4;
const FREE_END_OFF: usize = 8;
const HEADER_SIZE: usize = 12;
const SLOT_SIZE: usize = 12;

fn read_u32(data: &[u8], off: usize) -> u32 {
    u32::from_le_bytes(data[off..off + 4].try_into().expect("heap page too short"))
}

fn write_u32(data: &mut [u8], off: usize, v: u32) {
    data[off..off + 4].copy_from_slice(&v.to_le_bytes());
}

fn slot_off(idx: usize) -> usize {
    HEADER_SIZE + idx * SLOT_SIZE
}

/// Read helpers over a heap page image.
struct HeapPageRef<'a> {
    data: &'a [u8],
}

impl<'a> HeapPageRef<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    fn next_page_id(&self) -> PageId {
        PageId::from_bytes(self.data[NEXT_PAGE_OFF..NEXT_PAGE_OFF + 4].try_into().expect("header"))
    }

    fn tuple_count(&self) -> usize {
        read_u32(self.data, TUPLE_COUNT_OFF) as usize
    }

    fn slot(&self, idx: usize) -> Option<(usize, usize, TupleMeta)> {
        if idx >= self.tuple_count() {
            return None;
        }
        let off = slot_off(idx);
        Some((
            read_u32(self.data, off) as usize,
            read_u32(self.data, off + 4) as usize,
            TupleMeta::from_raw(read_u32(self.data, off + 8)),
        ))
    }

    fn read_tuple(&self, idx: usize) -> Option<(TupleMeta, Bytes)> {
        let (offset, len, meta) = self.slot(idx)?;
        Some((meta, Bytes::copy_from_slice(&self.data[offset..offset + len])))
    }
}

/// Write helpers over a heap page image.
struct HeapPageMut<'a> {
    data: &'a mut [u8],
}

impl<'a> HeapPageMut<'a> {
    fn new(data: &'a mut [u8]) -> Self {
        Self { data }
    }

    fn init(data: &'a mut [u8]) -> Self {
        data[NEXT_PAGE_OFF..NEXT_PAGE_OFF + 4].copy_from_slice(&PageId::INVALID.to_bytes());
        write_u32(data, TUPLE_COUNT_OFF, 0);
        write_u32(data, FREE_END_OFF, PAGE_SIZE as u32);
        Self { data }
    }

    fn as_ref(&self) -> HeapPageRef<'_> {
        HeapPageRef::new(&self.data[..])
    }

    fn set_next_page_id(&mut self, next: PageId) {
        self.data[NEXT_PAGE_OFF..NEXT_PAGE_OFF + 4].copy_from_slice(&next.to_bytes());
    }

    /// Appends a tuple image, returning its slot index, or `None` when
    /// the page cannot fit it.
    fn insert(&mut self, meta: TupleMeta, image: &[u8]) -> Option<u32> {
        let count = self.as_ref().tuple_count();
        let free_end = read_u32(self.data, FREE_END_OFF) as usize;
        let slots_end = slot_off(count + 1);
        if free_end < slots_end + image.len() {
            return None;
        }

        let offset = free_end - image.len();
        self.data[offset..offset + image.len()].copy_from_slice(image);
        let off = slot_off(count);
        write_u32(self.data, off, offset as u32);
        write_u32(self.data, off + 4, image.len() as u32);
        write_u32(self.data, off + 8, meta.to_raw());
        write_u32(self.data, FREE_END_OFF, offset as u32);
        write_u32(self.data, TUPLE_COUNT_OFF, (count + 1) as u32);
        Some(count as u32)
    }

    fn set_meta(&mut self, idx: usize, meta: TupleMeta) -> bool {
        if idx >= self.as_ref().tuple_count() {
            return false;
        }
        write_u32(self.data, slot_off(idx) + 8, meta.to_raw());
        true
    }

    /// Overwrites a tuple in place when the new image fits its slot.
    fn overwrite(&mut self, idx: usize, image: &[u8]) -> bool {
        let Some((offset, len, _)) = self.as_ref().slot(idx) else {
            return false;
        };
        if image.len() > len {
            return false;
        }
        self.data[offset..offset + image.len()].copy_from_slice(image);
        write_u32(self.data, slot_off(idx) + 4, image.len() as u32);
        true
    }
}

/// Largest tuple image an empty heap page can hold.
pub const MAX_TUPLE_SIZE: usize = PAGE_SIZE - HEADER_SIZE - SLOT_SIZE;

/// An unordered collection of tuples backed by a chain of heap pages.
pub struct TableHeap {
    bpm: Arc<BufferPoolManager>,
    first_page_id: PageId,
    /// Tail of the page chain; appends serialise through this lock.
    last_page_id: Mutex<PageId>,
}

impl TableHeap {
    /// Creates a heap with one empty page.
    pub fn create(bpm: Arc<BufferPoolManager>) -> Result<Self> {
        let first_page_id = bpm.new_page();
        if !first_page_id.is_valid() {
            return Err(OpalError::BufferPoolFull);
        }
        {
            let mut guard = bpm
                .checked_write_page(first_page_id)
                .ok_or(OpalError::BufferPoolFull)?;
            HeapPageMut::init(guard.data_mut());
        }
        Ok(Self {
            bpm,
            first_page_id,
            last_page_id: Mutex::new(first_page_id),
        })
    }

    /// The head of the page chain.
    pub fn first_page_id(&self) -> PageId {
        self.first_page_id
    }

    /// The buffer pool this heap allocates from.
    pub fn buffer_pool(&self) -> &Arc<BufferPoolManager> {
        &self.bpm
    }

    /// Appends a tuple, growing the chain when the tail page is full.
    pub fn insert_tuple(&self, meta: TupleMeta, tuple: &Tuple) -> Result<Rid> {
        if tuple.len() > MAX_TUPLE_SIZE {
            return Err(OpalError::TupleTooLarge {
                size: tuple.len(),
                max: MAX_TUPLE_SIZE,
            });
        }

        let mut last = self.last_page_id.lock();
        loop {
            let page_id = *last;
            let mut guard = self
                .bpm
                .checked_write_page(page_id)
                .ok_or(OpalError::BufferPoolFull)?;
            let mut page = HeapPageMut::new(guard.data_mut());
            if let Some(slot) = page.insert(meta, tuple.data()) {
                return Ok(Rid::new(page_id, slot));
            }

            let new_page_id = self.bpm.new_page();
            if !new_page_id.is_valid() {
                return Err(OpalError::BufferPoolFull);
            }
            page.set_next_page_id(new_page_id);
            drop(guard);

            let mut new_guard = self
                .bpm
                .checked_write_page(new_page_id)
                .ok_or(OpalError::BufferPoolFull)?;
            HeapPageMut::init(new_guard.data_mut());
            drop(new_guard);

            debug!("table heap grew with {new_page_id}");
            *last = new_page_id;
        }
    }

    /// Reads a tuple and its metadata.
    pub fn get_tuple(&self, rid: Rid) -> Result<(TupleMeta, Tuple)> {
        let guard = self
            .bpm
            .checked_read_page(rid.page_id)
            .ok_or(OpalError::BufferPoolFull)?;
        let page = HeapPageRef::new(guard.data());
        let (meta, image) = page
            .read_tuple(rid.slot as usize)
            .ok_or_else(|| OpalError::Execution(format!("no tuple at {rid}")))?;
        Ok((meta, Tuple::from_bytes(rid, image)))
    }

    /// Reads just the metadata of a tuple.
    pub fn get_tuple_meta(&self, rid: Rid) -> Result<TupleMeta> {
        Ok(self.get_tuple(rid)?.0)
    }

    /// Replaces a tuple's metadata (deleting and undeleting).
    pub fn update_tuple_meta(&self, rid: Rid, meta: TupleMeta) -> Result<()> {
        let mut guard = self
            .bpm
            .checked_write_page(rid.page_id)
            .ok_or(OpalError::BufferPoolFull)?;
        let mut page = HeapPageMut::new(guard.data_mut());
        if !page.set_meta(rid.slot as usize, meta) {
            return Err(OpalError::Execution(format!("no tuple at {rid}")));
        }
        Ok(())
    }

    /// In-place update; returns false when the new image does not fit
    /// the old slot (the caller then deletes and re-inserts).
    pub fn update_tuple(&self, rid: Rid, tuple: &Tuple) -> Result<bool> {
        let mut guard = self
            .bpm
            .checked_write_page(rid.page_id)
            .ok_or(OpalError::BufferPoolFull)?;
        let mut page = HeapPageMut::new(guard.data_mut());
        Ok(page.overwrite(rid.slot as usize, tuple.data()))
    }

    /// Rid-ordered iterator over every slot, deleted ones included;
    /// scans filter on the metadata.
    pub fn iter(&self) -> TableIter<'_> {
        self.scan_from(self.first_page_id, 0)
    }

    /// Iterator resuming at an explicit position, for callers that pull
    /// in batches and park the cursor between pulls.
    pub fn scan_from(&self, page_id: PageId, slot: u32) -> TableIter<'_> {
        TableIter {
            heap: self,
            page_id,
            slot,
        }
    }
}

/// Cursor over a table heap, one page latched at a time.
pub struct TableIter<'a> {
    heap: &'a TableHeap,
    page_id: PageId,
    slot: u32,
}

impl TableIter<'_> {
    /// Current cursor position, suitable for [`TableHeap::scan_from`].
    pub fn position(&self) -> (PageId, u32) {
        (self.page_id, self.slot)
    }
}

impl Iterator for TableIter<'_> {
    type Item = (Rid, TupleMeta, Tuple);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if !self.page_id.is_valid() {
                return None;
            }
            let guard = self.heap.bpm.checked_read_page(self.page_id)?;
            let page = HeapPageRef::new(guard.data());

            if let Some((meta, image)) = page.read_tuple(self.slot as usize) {
                let rid = Rid::new(self.page_id, self.slot);
                self.slot += 1;
                return Some((rid, meta, Tuple::from_bytes(rid, image)));
            }

            self.page_id = page.next_page_id();
            self.slot = 0;
        }
    }
}
