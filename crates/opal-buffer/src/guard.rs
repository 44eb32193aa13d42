//! RAII page guards.
//!
//! Guards are the only legal path to page bytes. A guard pins its frame,
//! holds the matching frame latch for its whole lifetime, and on drop
//! releases the latch, unpins, and re-arms eviction when the pin count
//! reaches zero. Construction is private to the buffer pool, which counts
//! the pin and disarms eviction under its own lock before the latch is
//! taken; the pool therefore outlives every guard by construction.

use crate::frame::FrameHeader;
use crate::pool::BufferPoolManager;
use log::warn;
use opal_common::{FrameId, PageBuf, PageId, PAGE_SIZE};
use parking_lot::{RwLockReadGuard, RwLockWriteGuard};

/// Shared, read-only access to one page.
///
/// Any number of read guards may coexist on a page; none while a write
/// guard exists.
pub struct ReadPageGuard<'a> {
    pool: &'a BufferPoolManager,
    page_id: PageId,
    frame_id: FrameId,
    frame: &'a FrameHeader,
    latch: Option<RwLockReadGuard<'a, Box<PageBuf>>>,
}

impl<'a> ReadPageGuard<'a> {
    /// Latches the already-pinned frame shared. Called by the pool only.
    pub(crate) fn acquire(
        pool: &'a BufferPoolManager,
        page_id: PageId,
        frame_id: FrameId,
    ) -> Self {
        let frame = pool.frame(frame_id);
        let latch = frame.read_data();
        Self {
            pool,
            page_id,
            frame_id,
            frame,
            latch: Some(latch),
        }
    }

    /// The page this guard was acquired for.
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// The page bytes.
    pub fn data(&self) -> &[u8] {
        let latch = self.latch.as_ref().expect("page guard used after release");
        &latch[..]
    }

    /// Whether the frame holds unflushed modifications.
    pub fn is_dirty(&self) -> bool {
        self.frame.is_dirty()
    }

    /// Writes the page to disk if dirty, clearing the dirty flag only when
    /// the write completes. Returns false on I/O failure.
    pub fn flush(&self) -> bool {
        flush_frame(self.pool, self.frame, self.page_id, self.data())
    }
}

impl Drop for ReadPageGuard<'_> {
    fn drop(&mut self) {
        // Latch first, pin second; a zero pin count re-arms eviction
        // under the pool lock.
        self.latch.take();
        self.pool.release_pin(self.frame_id);
    }
}

/// Exclusive, mutable access to one page.
///
/// At most one write guard exists per page at any instant, and never
/// simultaneously with read guards. Taking a mutable reference to the
/// bytes marks the frame dirty.
pub struct WritePageGuard<'a> {
    pool: &'a BufferPoolManager,
    page_id: PageId,
    frame_id: FrameId,
    frame: &'a FrameHeader,
    latch: Option<RwLockWriteGuard<'a, Box<PageBuf>>>,
}

impl<'a> WritePageGuard<'a> {
    /// Latches the already-pinned frame exclusive. Called by the pool only.
    pub(crate) fn acquire(
        pool: &'a BufferPoolManager,
        page_id: PageId,
        frame_id: FrameId,
    ) -> Self {
        let frame = pool.frame(frame_id);
        let latch = frame.write_data();
        Self {
            pool,
            page_id,
            frame_id,
            frame,
            latch: Some(latch),
        }
    }

    /// The page this guard was acquired for.
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// The page bytes.
    pub fn data(&self) -> &[u8] {
        let latch = self.latch.as_ref().expect("page guard used after release");
        &latch[..]
    }

    /// Mutable page bytes; marks the frame dirty.
    pub fn data_mut(&mut self) -> &mut [u8] {
        self.frame.set_dirty(true);
        let latch = self.latch.as_mut().expect("page guard used after release");
        &mut latch[..]
    }

    /// Whether the frame holds unflushed modifications.
    pub fn is_dirty(&self) -> bool {
        self.frame.is_dirty()
    }

    /// Writes the page to disk if dirty, clearing the dirty flag only when
    /// the write completes. Returns false on I/O failure.
    pub fn flush(&self) -> bool {
        flush_frame(self.pool, self.frame, self.page_id, self.data())
    }
}

impl Drop for WritePageGuard<'_> {
    fn drop(&mut self) {
        self.latch.take();
        self.pool.release_pin(self.frame_id);
    }
}

/// Shared flush path for both guard kinds. The caller holds the frame
/// latch, so the snapshot is consistent and the dirty flag cannot be set
/// again concurrently.
fn flush_frame(
    pool: &BufferPoolManager,
    frame: &FrameHeader,
    page_id: PageId,
    data: &[u8],
) -> bool {
    if !frame.is_dirty() {
        return true;
    }
    let mut copy: Box<PageBuf> = Box::new([0u8; PAGE_SIZE]);
    copy.copy_from_slice(data);
    match pool.scheduler().schedule_write(page_id, copy).wait() {
        Ok(()) => {
            frame.set_dirty(false);
            true
        }
        Err(e) => {
            warn!("flush of {page_id} failed, dirty flag kept: {e}");
            false
        }
    }
}
