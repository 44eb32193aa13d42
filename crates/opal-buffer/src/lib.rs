//! OpalDB buffer management.
//!
//! This crate owns everything between the raw database file and typed page
//! access: the disk manager, the sharded disk scheduler, the ARC replacer,
//! the frame table, and the buffer pool manager with its RAII page guards.
//! Page bytes are only reachable through a [`ReadPageGuard`] or a
//! [`WritePageGuard`] handed out by the [`BufferPoolManager`].

pub mod disk;
pub mod frame;
pub mod guard;
pub mod page_table;
pub mod pool;
pub mod replacer;
pub mod scheduler;

pub use disk::DiskManager;
pub use frame::FrameHeader;
pub use guard::{ReadPageGuard, WritePageGuard};
pub use pool::BufferPoolManager;
pub use replacer::ArcReplacer;
pub use scheduler::{DiskScheduler, ReadTicket, WriteTicket};
