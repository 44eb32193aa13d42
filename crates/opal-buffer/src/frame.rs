//! Frame headers: the in-memory slots that hold pages.

use opal_common::{FrameId, PageBuf, PAGE_SIZE};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// One slot of the buffer pool.
///
/// A frame owns its page-sized byte buffer, a read/write latch over it, an
/// atomic pin count, and a dirty flag. Which page currently occupies the
/// frame is tracked by the pool's page table, not here; when no page does,
/// the bytes are zero.
pub struct FrameHeader {
    /// Frame identifier, immutable for the life of the pool.
    frame_id: FrameId,
    /// Page data, guarded by the frame latch.
    data: RwLock<Box<PageBuf>>,
    /// Number of live guards against this frame.
    pin_count: AtomicU32,
    /// Whether the in-memory image differs from disk.
    is_dirty: AtomicBool,
}

impl FrameHeader {
    /// Creates an empty frame.
    pub fn new(frame_id: FrameId) -> Self {
        Self {
            frame_id,
            data: RwLock::new(Box::new([0u8; PAGE_SIZE])),
            pin_count: AtomicU32::new(0),
            is_dirty: AtomicBool::new(false),
        }
    }

    /// Returns the frame ID.
    #[inline]
    pub fn frame_id(&self) -> FrameId {
        self.frame_id
    }

    /// Returns the current pin count.
    #[inline]
    pub fn pin_count(&self) -> u32 {
        self.pin_count.load(Ordering::Acquire)
    }

    /// Increments the pin count, returning the previous value.
    #[inline]
    pub fn pin(&self) -> u32 {
        self.pin_count.fetch_add(1, Ordering::AcqRel)
    }

    /// Decrements the pin count, returning the new value. Saturates at 0.
    #[inline]
    pub fn unpin(&self) -> u32 {
        let prev = self.pin_count.fetch_sub(1, Ordering::AcqRel);
        if prev == 0 {
            self.pin_count.store(0, Ordering::Release);
            return 0;
        }
        prev - 1
    }

    /// Returns true if any guard holds this frame.
    #[inline]
    pub fn is_pinned(&self) -> bool {
        self.pin_count() > 0
    }

    /// Returns true if the frame holds unflushed modifications.
    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.is_dirty.load(Ordering::Acquire)
    }

    /// Sets the dirty flag.
    #[inline]
    pub fn set_dirty(&self, dirty: bool) {
        self.is_dirty.store(dirty, Ordering::Release);
    }

    /// Acquires the frame latch shared.
    #[inline]
    pub fn read_data(&self) -> RwLockReadGuard<'_, Box<PageBuf>> {
        self.data.read()
    }

    /// Acquires the frame latch exclusive.
    #[inline]
    pub fn write_data(&self) -> RwLockWriteGuard<'_, Box<PageBuf>> {
        self.data.write()
    }

    /// Copies `src` into the frame, truncating at the page boundary.
    pub fn copy_from(&self, src: &[u8]) {
        let mut data = self.data.write();
        let len = src.len().min(PAGE_SIZE);
        data[..len].copy_from_slice(&src[..len]);
    }

    /// Copies the frame's current bytes out.
    pub fn copy_out(&self) -> Box<PageBuf> {
        let data = self.data.read();
        let mut out: Box<PageBuf> = Box::new([0u8; PAGE_SIZE]);
        out.copy_from_slice(&data[..]);
        out
    }

    /// Resets the frame to its empty state: zeroed bytes, unpinned, clean.
    pub fn reset(&self) {
        let mut data = self.data.write();
        data.fill(0);
        self.pin_count.store(0, Ordering::Release);
        self.is_dirty.store(false, Ordering::Release);
    }
}

impl std::fmt::Debug for FrameHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameHeader")
            .field("frame_id", &self.frame_id)
            .field("pin_count", &self.pin_count())
            .field("is_dirty", &self.is_dirty())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_new() {
        let frame = FrameHeader::new(FrameId(3));
        assert_eq!(frame.frame_id(), FrameId(3));
        assert_eq!(frame.pin_count(), 0);
        assert!(!frame.is_pinned());
        assert!(!frame.is_dirty());
        assert!(frame.read_data().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_pin_unpin() {
        let frame = FrameHeader::new(FrameId(0));

        assert_eq!(frame.pin(), 0);
        assert_eq!(frame.pin(), 1);
        assert_eq!(frame.pin_count(), 2);

        assert_eq!(frame.unpin(), 1);
        assert_eq!(frame.unpin(), 0);
        assert!(!frame.is_pinned());

        // Underflow saturates.
        assert_eq!(frame.unpin(), 0);
        assert_eq!(frame.pin_count(), 0);
    }

    #[test]
    fn test_dirty_flag() {
        let frame = FrameHeader::new(FrameId(0));
        frame.set_dirty(true);
        assert!(frame.is_dirty());
        frame.set_dirty(false);
        assert!(!frame.is_dirty());
    }

    #[test]
    fn test_copy_roundtrip() {
        let frame = FrameHeader::new(FrameId(0));
        frame.copy_from(b"abc");
        let out = frame.copy_out();
        assert_eq!(&out[..3], b"abc");
        assert_eq!(out[3], 0);
    }

    #[test]
    fn test_reset() {
        let frame = FrameHeader::new(FrameId(0));
        frame.pin();
        frame.set_dirty(true);
        frame.copy_from(&[0xFFu8; 16]);

        frame.reset();
        assert_eq!(frame.pin_count(), 0);
        assert!(!frame.is_dirty());
        assert!(frame.read_data().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_readers_share_latch() {
        let frame = FrameHeader::new(FrameId(0));
        let a = frame.read_data();
        let b = frame.read_data();
        assert_eq!(a[0], b[0]);
    }
}
