//! Disk manager for page-level file I/O.
//!
//! One disk manager per database. It owns two files: `<name>.db`, holding
//! fixed-size pages, and `<name>.log`, an append-only log buffer that the
//! in-scope core leaves untouched. Page ids map to file offsets through an
//! in-memory table; deleting a page recycles its offset, never its id.

use log::warn;
use opal_common::config::DiskManagerConfig;
use opal_common::{OpalError, PageBuf, PageId, Result, PAGE_SIZE};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Manages reading and writing pages within a single database file.
///
/// All operations are synchronous and thread-safe. Offset 0 of the file is
/// reserved; slot `k` lives at offset `(k + 1) * PAGE_SIZE`.
pub struct DiskManager {
    config: DiskManagerConfig,
    db: Mutex<DbFile>,
    log: Mutex<File>,
}

struct DbFile {
    file: File,
    /// Offset bound to each known page id.
    offsets: HashMap<PageId, u64>,
    /// Offsets of deleted pages, available for reuse.
    free_slots: Vec<u64>,
    /// Next never-used slot index.
    next_slot: u64,
    /// Reserved capacity of the file, in slots.
    capacity: u64,
}

impl DiskManager {
    /// Opens (or creates) the database file and its sibling log file.
    pub fn new(config: DiskManagerConfig) -> Result<Self> {
        let db_file = Self::open_rw(&config.db_path)?;
        let log_file = Self::open_rw(&config.db_path.with_extension("log"))?;

        let capacity = config.initial_capacity.max(1) as u64;
        let reserved = (capacity + 1) * PAGE_SIZE as u64;
        if db_file.metadata()?.len() < reserved {
            db_file.set_len(reserved)?;
        }

        Ok(Self {
            config,
            db: Mutex::new(DbFile {
                file: db_file,
                offsets: HashMap::new(),
                free_slots: Vec::new(),
                next_slot: 0,
                capacity,
            }),
            log: Mutex::new(log_file),
        })
    }

    fn open_rw(path: &Path) -> Result<File> {
        Ok(OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?)
    }

    /// Reads `PAGE_SIZE` bytes bound to `page_id` into `dst`.
    ///
    /// An unseen page id gets a fresh slot; a short read at the end of the
    /// file is a soft error: the tail of `dst` is zero-filled.
    pub fn read_page(&self, page_id: PageId, dst: &mut PageBuf) -> Result<()> {
        if !page_id.is_valid() {
            return Err(OpalError::InvalidPage(page_id));
        }
        let mut db = self.db.lock();
        let offset = match db.offsets.get(&page_id) {
            Some(&off) => off,
            None => {
                let off = Self::allocate_slot(&mut db)?;
                db.offsets.insert(page_id, off);
                off
            }
        };

        db.file.seek(SeekFrom::Start(offset))?;
        let mut read = 0;
        while read < PAGE_SIZE {
            match db.file.read(&mut dst[read..])? {
                0 => break,
                n => read += n,
            }
        }
        if read < PAGE_SIZE {
            warn!(
                "short read of {page_id} at offset {offset}: {} bytes missing, zero-filling",
                PAGE_SIZE - read
            );
            dst[read..].fill(0);
        }
        Ok(())
    }

    /// Writes `PAGE_SIZE` bytes to the offset bound to `page_id`, binding a
    /// fresh offset if the id is unseen, then flushes the file.
    pub fn write_page(&self, page_id: PageId, src: &PageBuf) -> Result<()> {
        if !page_id.is_valid() {
            return Err(OpalError::InvalidPage(page_id));
        }
        let mut db = self.db.lock();
        let offset = match db.offsets.get(&page_id) {
            Some(&off) => off,
            None => Self::allocate_slot(&mut db)?,
        };

        db.file.seek(SeekFrom::Start(offset))?;
        db.file.write_all(src)?;
        db.file.flush()?;
        if self.config.fsync_enabled {
            db.file.sync_data()?;
        }
        db.offsets.insert(page_id, offset);
        Ok(())
    }

    /// Records `page_id`'s offset as reusable and unbinds the id.
    pub fn delete_page(&self, page_id: PageId) {
        let mut db = self.db.lock();
        if let Some(offset) = db.offsets.remove(&page_id) {
            db.free_slots.push(offset);
        }
    }

    /// Picks a free slot, or appends one past the end, doubling the file's
    /// reserved capacity when it must grow.
    fn allocate_slot(db: &mut DbFile) -> Result<u64> {
        if let Some(offset) = db.free_slots.pop() {
            return Ok(offset);
        }
        if db.next_slot + 1 >= db.capacity {
            db.capacity *= 2;
            let reserved = (db.capacity + 1) * PAGE_SIZE as u64;
            db.file.set_len(reserved)?;
        }
        let slot = db.next_slot;
        db.next_slot += 1;
        Ok((slot + 1) * PAGE_SIZE as u64)
    }

    /// Number of page ids currently bound to an offset.
    pub fn num_pages(&self) -> usize {
        self.db.lock().offsets.len()
    }

    /// Appends raw bytes to the log file and flushes. Sequential writes
    /// only; the core never calls this.
    pub fn write_log(&self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let mut log = self.log.lock();
        log.seek(SeekFrom::End(0))?;
        log.write_all(data)?;
        log.flush()?;
        Ok(())
    }

    /// Reads `buf.len()` bytes from the log file at `offset`. Returns false
    /// past the end of the log; a partial tail is zero-filled.
    pub fn read_log(&self, buf: &mut [u8], offset: u64) -> Result<bool> {
        let mut log = self.log.lock();
        let len = log.metadata()?.len();
        if offset >= len {
            return Ok(false);
        }
        log.seek(SeekFrom::Start(offset))?;
        let mut read = 0;
        while read < buf.len() {
            match log.read(&mut buf[read..])? {
                0 => break,
                n => read += n,
            }
        }
        buf[read..].fill(0);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_disk(dir: &TempDir) -> DiskManager {
        DiskManager::new(DiskManagerConfig {
            db_path: dir.path().join("test.db"),
            fsync_enabled: false,
            initial_capacity: 2,
        })
        .unwrap()
    }

    #[test]
    fn test_write_read_roundtrip() {
        let dir = TempDir::new().unwrap();
        let disk = create_disk(&dir);

        let mut page = [0u8; PAGE_SIZE];
        page[..13].copy_from_slice(b"Hello, world!");
        disk.write_page(PageId(0), &page).unwrap();

        let mut out = [0xAAu8; PAGE_SIZE];
        disk.read_page(PageId(0), &mut out).unwrap();
        assert_eq!(&out[..], &page[..]);
    }

    #[test]
    fn test_read_unseen_page_is_zeroed() {
        let dir = TempDir::new().unwrap();
        let disk = create_disk(&dir);

        let mut out = [0xFFu8; PAGE_SIZE];
        disk.read_page(PageId(9), &mut out).unwrap();
        assert!(out.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_invalid_page_id_rejected() {
        let dir = TempDir::new().unwrap();
        let disk = create_disk(&dir);

        let mut buf = [0u8; PAGE_SIZE];
        assert!(disk.read_page(PageId::INVALID, &mut buf).is_err());
        assert!(disk.write_page(PageId(-5), &buf).is_err());
    }

    #[test]
    fn test_delete_recycles_offset() {
        let dir = TempDir::new().unwrap();
        let disk = create_disk(&dir);

        let page = [7u8; PAGE_SIZE];
        disk.write_page(PageId(0), &page).unwrap();
        disk.write_page(PageId(1), &page).unwrap();
        assert_eq!(disk.num_pages(), 2);

        disk.delete_page(PageId(0));
        assert_eq!(disk.num_pages(), 1);

        // A new page takes the freed slot; the file does not grow.
        let len_before = std::fs::metadata(dir.path().join("test.db")).unwrap().len();
        disk.write_page(PageId(2), &page).unwrap();
        let len_after = std::fs::metadata(dir.path().join("test.db")).unwrap().len();
        assert_eq!(len_before, len_after);
    }

    #[test]
    fn test_file_growth_doubles() {
        let dir = TempDir::new().unwrap();
        let disk = create_disk(&dir);

        let page = [1u8; PAGE_SIZE];
        for i in 0..8 {
            disk.write_page(PageId(i), &page).unwrap();
        }
        let len = std::fs::metadata(dir.path().join("test.db")).unwrap().len();
        // Capacity started at 2 slots and doubled to at least 8.
        assert!(len >= (8 + 1) * PAGE_SIZE as u64);
    }

    #[test]
    fn test_overwrite_keeps_offset() {
        let dir = TempDir::new().unwrap();
        let disk = create_disk(&dir);

        disk.write_page(PageId(0), &[1u8; PAGE_SIZE]).unwrap();
        disk.write_page(PageId(0), &[2u8; PAGE_SIZE]).unwrap();
        assert_eq!(disk.num_pages(), 1);

        let mut out = [0u8; PAGE_SIZE];
        disk.read_page(PageId(0), &mut out).unwrap();
        assert_eq!(out[0], 2);
    }

    #[test]
    fn test_log_append_and_read() {
        let dir = TempDir::new().unwrap();
        let disk = create_disk(&dir);

        disk.write_log(b"first").unwrap();
        disk.write_log(b"second").unwrap();

        let mut buf = [0u8; 11];
        assert!(disk.read_log(&mut buf, 0).unwrap());
        assert_eq!(&buf, b"firstsecond");

        // Reading past the end fails; a partial tail zero-fills.
        assert!(!disk.read_log(&mut buf, 100).unwrap());
        let mut tail = [0xFFu8; 8];
        assert!(disk.read_log(&mut tail, 5).unwrap());
        assert_eq!(&tail, b"second\0\0");
    }
}
