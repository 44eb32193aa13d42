//! OpalDB storage structures.
//!
//! Everything here sits on top of the buffer pool: the concurrent B+tree
//! index with its page layouts and iterator, the tuple representation,
//! the slotted table heap, and the intermediate-result page used by
//! external sort and hash join spill files.

pub mod btree;
pub mod heap;
pub mod spill;
pub mod tuple;

pub use btree::{BPlusTree, BPlusTreeIter};
pub use heap::{TableHeap, TableIter, TupleMeta};
pub use tuple::Tuple;
