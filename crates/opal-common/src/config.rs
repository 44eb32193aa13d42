//! Configuration structures for OpalDB.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for the disk manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskManagerConfig {
    /// Path of the database file. The append-only log file lives next to
    /// it with a `.log` extension.
    pub db_path: PathBuf,
    /// Fsync page writes to stable storage.
    pub fsync_enabled: bool,
    /// Initial reserved capacity of the database file, in pages. The file
    /// doubles whenever it must grow past the reservation.
    pub initial_capacity: usize,
}

impl Default for DiskManagerConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./opal.db"),
            fsync_enabled: false,
            initial_capacity: 16,
        }
    }
}

/// Configuration for the buffer pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferPoolConfig {
    /// Number of frames in the pool.
    pub num_frames: usize,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self { num_frames: 1024 }
    }
}

/// Configuration for the disk scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Number of worker threads. Requests are sharded over workers by
    /// page id, which serialises all requests for one page behind one
    /// worker.
    pub num_workers: usize,
    /// Depth of each worker's request channel.
    pub queue_depth: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            num_workers: 4,
            queue_depth: 64,
        }
    }
}
