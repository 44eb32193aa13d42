//! Concurrent B+tree index.
//!
//! Node pages share a tagged layout: a 4-byte discriminant followed by
//! size fields, interpreted as either a leaf or an internal node by the
//! accessor views in [`node`]. The index itself lives in [`index`] and
//! descends with latch crabbing; [`iterator`] provides ordered range
//! scans over the leaf chain.

pub mod index;
pub mod iterator;
pub mod node;

pub use index::BPlusTree;
pub use iterator::BPlusTreeIter;
pub use node::{NodeKey, NodeValue, PageKind};
