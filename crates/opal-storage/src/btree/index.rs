//! Concurrent B+tree with latch crabbing.
//!
//! Only unique keys are supported. Lookups descend with shared latches,
//! releasing each parent right after its child is latched. Inserts and
//! deletes first try an optimistic pass that write-latches only the leaf
//! (under the parent's shared latch, which pins the leaf's key range);
//! when the leaf might overflow or underflow they restart from the root
//! with exclusive latches, releasing every ancestor proven safe.
//!
//! The tree's header page stores the root page id. Descents start with an
//! acquire-and-revalidate loop against it, so no thread ever waits on a
//! node latch while holding the header latch; root replacement happens
//! while the replacing thread owns the only write latch on the old root.

use super::iterator::BPlusTreeIter;
use super::node::{
    node_size, page_kind, InternalMut, InternalRef, LeafMut, LeafRef, NodeKey, NodeValue, PageKind,
};
use log::debug;
use opal_buffer::{BufferPoolManager, ReadPageGuard, WritePageGuard};
use opal_common::{OpalError, PageId, Result};
use std::marker::PhantomData;
use std::sync::Arc;

/// Reads the root page id out of a header page image.
pub(crate) fn read_root(data: &[u8]) -> PageId {
    PageId::from_bytes(data[..4].try_into().expect("header page too short"))
}

fn write_root(data: &mut [u8], root: PageId) {
    data[..4].copy_from_slice(&root.to_bytes());
}

/// Outcome of an optimistic single-leaf attempt.
enum Optimistic<T> {
    Done(T),
    /// The leaf needs structural work; restart pessimistically.
    Restart,
    /// The root moved underneath us; try again.
    Retry,
    /// The tree has no root yet.
    EmptyTree,
}

/// A concurrent B+tree index over the buffer pool.
pub struct BPlusTree<K: NodeKey, V: NodeValue> {
    bpm: Arc<BufferPoolManager>,
    header_page_id: PageId,
    leaf_max_size: usize,
    internal_max_size: usize,
    _marker: PhantomData<(K, V)>,
}

impl<K: NodeKey, V: NodeValue> BPlusTree<K, V> {
    /// Binds a tree to `header_page_id`, marking it empty. The maximum
    /// node sizes are configurable for test friendliness; production
    /// callers pass the capacities derived from the page size.
    pub fn new(
        bpm: Arc<BufferPoolManager>,
        header_page_id: PageId,
        leaf_max_size: usize,
        internal_max_size: usize,
    ) -> Result<Self> {
        {
            let mut header = bpm
                .checked_write_page(header_page_id)
                .ok_or(OpalError::BufferPoolFull)?;
            write_root(header.data_mut(), PageId::INVALID);
        }
        Ok(Self {
            bpm,
            header_page_id,
            leaf_max_size,
            internal_max_size,
            _marker: PhantomData,
        })
    }

    /// The buffer pool this tree allocates from.
    pub fn buffer_pool(&self) -> &Arc<BufferPoolManager> {
        &self.bpm
    }

    /// Current root page id, `None` while the tree is empty.
    pub fn root_page_id(&self) -> Result<Option<PageId>> {
        let header = self
            .bpm
            .checked_read_page(self.header_page_id)
            .ok_or(OpalError::BufferPoolFull)?;
        let root = read_root(header.data());
        Ok(root.is_valid().then_some(root))
    }

    /// Returns true if this tree holds no keys.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.root_page_id()?.is_none())
    }

    fn read_guard(&self, page_id: PageId) -> Result<ReadPageGuard<'_>> {
        self.bpm
            .checked_read_page(page_id)
            .ok_or(OpalError::BufferPoolFull)
    }

    fn write_guard(&self, page_id: PageId) -> Result<WritePageGuard<'_>> {
        self.bpm
            .checked_write_page(page_id)
            .ok_or(OpalError::BufferPoolFull)
    }

    /// Shared-latches the root, re-reading the header until the root id
    /// observed before and after the latch agree.
    fn latch_root_read(&self) -> Result<Option<ReadPageGuard<'_>>> {
        loop {
            let Some(root) = self.root_page_id()? else {
                return Ok(None);
            };
            let guard = self.read_guard(root)?;
            if self.root_page_id()? == Some(root) {
                return Ok(Some(guard));
            }
        }
    }

    /// Exclusive-latch variant of [`Self::latch_root_read`].
    fn latch_root_write(&self) -> Result<Option<WritePageGuard<'_>>> {
        loop {
            let Some(root) = self.root_page_id()? else {
                return Ok(None);
            };
            let guard = self.write_guard(root)?;
            if self.root_page_id()? == Some(root) {
                return Ok(Some(guard));
            }
        }
    }

    /// Point lookup: purely shared-latched descent, each parent released
    /// immediately after its child is latched.
    pub fn get(&self, key: &K) -> Result<Option<V>> {
        let Some(mut guard) = self.latch_root_read()? else {
            return Ok(None);
        };
        loop {
            match page_kind(guard.data()) {
                PageKind::Leaf => {
                    let leaf = LeafRef::<K, V>::new(guard.data());
                    return Ok(leaf.find(key));
                }
                PageKind::Internal => {
                    let child = InternalRef::<K>::new(guard.data()).child_for(key);
                    // Assignment latches the child before the parent
                    // guard drops.
                    guard = self.read_guard(child)?;
                }
                PageKind::Invalid => panic!("descended into an uninitialised page"),
            }
        }
    }

    /// Inserts a unique key. Returns false (tree unchanged) on duplicate.
    pub fn insert(&self, key: K, value: V) -> Result<bool> {
        loop {
            match self.insert_optimistic(&key, &value)? {
                Optimistic::Done(done) => return Ok(done),
                Optimistic::Restart | Optimistic::EmptyTree => {
                    return self.insert_pessimistic(&key, &value)
                }
                Optimistic::Retry => continue,
            }
        }
    }

    /// Shared-latched descent that write-latches only the leaf. Safe
    /// because the parent's shared latch is held across the leaf latch
    /// acquisition: no sibling split or merge can move the key range.
    fn insert_optimistic(&self, key: &K, value: &V) -> Result<Optimistic<bool>> {
        let Some(mut guard) = self.latch_root_read()? else {
            return Ok(Optimistic::EmptyTree);
        };

        loop {
            match page_kind(guard.data()) {
                PageKind::Leaf => {
                    // Root is the leaf: trade the shared latch for an
                    // exclusive one, then confirm the root did not move.
                    let page_id = guard.page_id();
                    drop(guard);
                    let wguard = self.write_guard(page_id)?;
                    if self.root_page_id()? != Some(page_id)
                        || page_kind(wguard.data()) != PageKind::Leaf
                    {
                        return Ok(Optimistic::Retry);
                    }
                    return self.leaf_insert_in_place(wguard, key, value);
                }
                PageKind::Internal => {
                    let child_pid = InternalRef::<K>::new(guard.data()).child_for(key);
                    let child = self.read_guard(child_pid)?;
                    if page_kind(child.data()) == PageKind::Leaf {
                        drop(child);
                        // `guard` (the parent) stays latched here.
                        let wguard = self.write_guard(child_pid)?;
                        drop(guard);
                        return self.leaf_insert_in_place(wguard, key, value);
                    }
                    guard = child;
                }
                PageKind::Invalid => panic!("descended into an uninitialised page"),
            }
        }
    }

    /// Single-leaf insert; reports `Restart` when the leaf is full.
    fn leaf_insert_in_place(
        &self,
        mut guard: WritePageGuard<'_>,
        key: &K,
        value: &V,
    ) -> Result<Optimistic<bool>> {
        let mut leaf = LeafMut::<K, V>::new(guard.data_mut());
        let pos = leaf.first_index_ge(key);
        if pos < leaf.size() && leaf.key_at(pos) == *key {
            return Ok(Optimistic::Done(false));
        }
        if leaf.size() >= leaf.max_size() {
            return Ok(Optimistic::Restart);
        }
        leaf.insert_at(pos, *key, *value);
        Ok(Optimistic::Done(true))
    }

    /// Exclusive descent. A parent is safe for insert when one more entry
    /// cannot overflow it; all ancestors above a safe parent are released
    /// before descending further.
    fn insert_pessimistic(&self, key: &K, value: &V) -> Result<bool> {
        loop {
            // Empty-tree creation serialises through the header latch.
            {
                let mut header = self.write_guard(self.header_page_id)?;
                if !read_root(header.data()).is_valid() {
                    let root_pid = self.bpm.new_page();
                    if !root_pid.is_valid() {
                        return Err(OpalError::BufferPoolFull);
                    }
                    let mut root_guard = self.write_guard(root_pid)?;
                    let mut leaf = LeafMut::<K, V>::init(root_guard.data_mut(), self.leaf_max_size);
                    leaf.insert_at(0, *key, *value);
                    write_root(header.data_mut(), root_pid);
                    debug!("created root leaf {root_pid}");
                    return Ok(true);
                }
            }

            let Some(root_guard) = self.latch_root_write()? else {
                // The tree emptied between the header check and the root
                // latch; take the creation path again.
                continue;
            };

            let mut path: Vec<WritePageGuard<'_>> = vec![root_guard];
            loop {
                if page_kind(path.last().expect("path never empty").data()) == PageKind::Leaf {
                    break;
                }
                let (child_pid, parent_safe) = {
                    let node = InternalRef::<K>::new(path.last().expect("path never empty").data());
                    (node.child_for(key), node.size() < node.max_size())
                };
                let child = self.write_guard(child_pid)?;
                if parent_safe && path.len() > 1 {
                    path.drain(..path.len() - 1);
                }
                path.push(child);
            }
            return self.insert_into_leaf(&mut path, key, value);
        }
    }

    fn insert_into_leaf(
        &self,
        path: &mut Vec<WritePageGuard<'_>>,
        key: &K,
        value: &V,
    ) -> Result<bool> {
        {
            let guard = path.last_mut().expect("path never empty");
            let mut leaf = LeafMut::<K, V>::new(guard.data_mut());
            let pos = leaf.first_index_ge(key);
            if pos < leaf.size() && leaf.key_at(pos) == *key {
                return Ok(false);
            }
            if leaf.size() < leaf.max_size() {
                leaf.insert_at(pos, *key, *value);
                return Ok(true);
            }
        }

        // Full leaf: gather every entry plus the new one, keep the left
        // half in place, move the right half to a fresh leaf, and push
        // the new leaf's first key up.
        let (split_key, new_leaf_pid) = {
            let guard = path.last_mut().expect("path never empty");
            let mut leaf = LeafMut::<K, V>::new(guard.data_mut());
            let mut all = leaf.as_ref().entries();
            let pos = all.partition_point(|(k, _)| k < key);
            all.insert(pos, (*key, *value));
            let split_idx = (all.len() + 1) / 2;
            let split_key = all[split_idx].0;

            let new_leaf_pid = self.bpm.new_page();
            if !new_leaf_pid.is_valid() {
                return Err(OpalError::BufferPoolFull);
            }
            let mut new_guard = self.write_guard(new_leaf_pid)?;
            let mut new_leaf = LeafMut::<K, V>::init(new_guard.data_mut(), self.leaf_max_size);
            new_leaf.fill(&all[split_idx..]);
            new_leaf.set_next_page_id(leaf.next_page_id());
            leaf.fill(&all[..split_idx]);
            leaf.set_next_page_id(new_leaf_pid);
            (split_key, new_leaf_pid)
        };

        if path.len() == 1 {
            let old_root = path.last().expect("path never empty").page_id();
            self.install_new_root(old_root, split_key, new_leaf_pid)?;
            path.pop();
            Ok(true)
        } else {
            path.pop();
            self.insert_into_internal(path, split_key, new_leaf_pid)
        }
    }

    fn insert_into_internal(
        &self,
        path: &mut Vec<WritePageGuard<'_>>,
        key: K,
        right_child: PageId,
    ) -> Result<bool> {
        {
            let guard = path.last_mut().expect("path never empty");
            let mut node = InternalMut::<K>::new(guard.data_mut());
            let pos = node.as_ref().insert_position(&key);
            if node.size() < node.max_size() {
                node.insert_at(pos, key, right_child);
                return Ok(true);
            }
        }

        // Full internal node: split on the middle key, which is promoted
        // rather than kept in either half.
        let (split_key, new_node_pid) = {
            let guard = path.last_mut().expect("path never empty");
            let mut node = InternalMut::<K>::new(guard.data_mut());
            let mut all: Vec<(K, PageId)> = Vec::with_capacity(node.size() + 1);
            all.push((K::default(), node.child_at(0)));
            for i in 1..node.size() {
                all.push((node.key_at(i), node.child_at(i)));
            }
            let pos = node.as_ref().insert_position(&key);
            all.insert(pos, (key, right_child));
            let split_idx = (all.len() + 1) / 2;
            let split_key = all[split_idx].0;

            let new_node_pid = self.bpm.new_page();
            if !new_node_pid.is_valid() {
                return Err(OpalError::BufferPoolFull);
            }
            let mut new_guard = self.write_guard(new_node_pid)?;
            let mut new_node = InternalMut::<K>::init(new_guard.data_mut(), self.internal_max_size);
            new_node.fill(&all[split_idx..]);
            node.fill(&all[..split_idx]);
            (split_key, new_node_pid)
        };

        if path.len() == 1 {
            let old_root = path.last().expect("path never empty").page_id();
            self.install_new_root(old_root, split_key, new_node_pid)?;
            path.pop();
            Ok(true)
        } else {
            path.pop();
            self.insert_into_internal(path, split_key, new_node_pid)
        }
    }

    /// Replaces the root with a fresh internal node holding one key and
    /// two children. The caller still owns the old root's write latch,
    /// so no competing root replacement can interleave.
    fn install_new_root(&self, left: PageId, key: K, right: PageId) -> Result<()> {
        let mut header = self.write_guard(self.header_page_id)?;
        let new_root_pid = self.bpm.new_page();
        if !new_root_pid.is_valid() {
            return Err(OpalError::BufferPoolFull);
        }
        let mut guard = self.write_guard(new_root_pid)?;
        let mut root = InternalMut::<K>::init(guard.data_mut(), self.internal_max_size);
        root.init_root(left, key, right);
        write_root(header.data_mut(), new_root_pid);
        debug!("installed new root {new_root_pid} over {left} and {right}");
        Ok(())
    }

    /// Removes a key. Returns false (tree unchanged) when absent.
    pub fn remove(&self, key: &K) -> Result<bool> {
        loop {
            match self.remove_optimistic(key)? {
                Optimistic::Done(done) => return Ok(done),
                Optimistic::Restart => return self.remove_pessimistic(key),
                Optimistic::EmptyTree => return Ok(false),
                Optimistic::Retry => continue,
            }
        }
    }

    /// Mirror of [`Self::insert_optimistic`]: in-place removal is safe
    /// while the leaf stays strictly above its minimum.
    fn remove_optimistic(&self, key: &K) -> Result<Optimistic<bool>> {
        let Some(mut guard) = self.latch_root_read()? else {
            return Ok(Optimistic::EmptyTree);
        };

        loop {
            match page_kind(guard.data()) {
                PageKind::Leaf => {
                    let page_id = guard.page_id();
                    drop(guard);
                    let wguard = self.write_guard(page_id)?;
                    if self.root_page_id()? != Some(page_id)
                        || page_kind(wguard.data()) != PageKind::Leaf
                    {
                        return Ok(Optimistic::Retry);
                    }
                    return self.leaf_remove_in_place(wguard, key);
                }
                PageKind::Internal => {
                    let child_pid = InternalRef::<K>::new(guard.data()).child_for(key);
                    let child = self.read_guard(child_pid)?;
                    if page_kind(child.data()) == PageKind::Leaf {
                        drop(child);
                        let wguard = self.write_guard(child_pid)?;
                        drop(guard);
                        return self.leaf_remove_in_place(wguard, key);
                    }
                    guard = child;
                }
                PageKind::Invalid => panic!("descended into an uninitialised page"),
            }
        }
    }

    fn leaf_remove_in_place(
        &self,
        mut guard: WritePageGuard<'_>,
        key: &K,
    ) -> Result<Optimistic<bool>> {
        let mut leaf = LeafMut::<K, V>::new(guard.data_mut());
        if leaf.size() <= leaf.min_size() {
            // Removal could underflow (or empty a root leaf); take the
            // exclusive path.
            return Ok(Optimistic::Restart);
        }
        let pos = leaf.first_index_ge(key);
        if pos >= leaf.size() || leaf.key_at(pos) != *key {
            return Ok(Optimistic::Done(false));
        }
        leaf.remove_at(pos);
        Ok(Optimistic::Done(true))
    }

    /// Exclusive descent for deletes. A parent is safe when losing one
    /// entry cannot underflow it.
    fn remove_pessimistic(&self, key: &K) -> Result<bool> {
        let Some(root_guard) = self.latch_root_write()? else {
            return Ok(false);
        };

        let mut path: Vec<WritePageGuard<'_>> = vec![root_guard];
        loop {
            if page_kind(path.last().expect("path never empty").data()) == PageKind::Leaf {
                break;
            }
            let (child_pid, parent_safe) = {
                let node = InternalRef::<K>::new(path.last().expect("path never empty").data());
                (node.child_for(key), node.size() > node.min_size())
            };
            let child = self.write_guard(child_pid)?;
            if parent_safe && path.len() > 1 {
                path.drain(..path.len() - 1);
            }
            path.push(child);
        }

        let removed = {
            let guard = path.last_mut().expect("path never empty");
            let mut leaf = LeafMut::<K, V>::new(guard.data_mut());
            let pos = leaf.first_index_ge(key);
            if pos >= leaf.size() || leaf.key_at(pos) != *key {
                false
            } else {
                leaf.remove_at(pos);
                true
            }
        };
        if !removed {
            return Ok(false);
        }

        let underflow = {
            let leaf = LeafRef::<K, V>::new(path.last().expect("path never empty").data());
            leaf.size() < leaf.min_size()
        };
        if underflow {
            self.handle_leaf_underflow(&mut path)?;
        }
        Ok(true)
    }

    /// Resolves a leaf below its minimum: redistribution from a sibling
    /// strictly above its minimum (left tried first), else merge (left
    /// preferred). Parent updates may cascade.
    fn handle_leaf_underflow<'a>(&'a self, path: &mut Vec<WritePageGuard<'a>>) -> Result<()> {
        let leaf_pid = path.last().expect("path never empty").page_id();

        if path.len() == 1 {
            // Root leaf: nothing to rebalance; an emptied root unroots
            // the tree.
            let emptied = node_size(path.last().expect("path never empty").data()) == 0;
            if emptied {
                let mut header = self.write_guard(self.header_page_id)?;
                write_root(header.data_mut(), PageId::INVALID);
                drop(header);
                path.pop();
                self.free_page(leaf_pid);
            }
            return Ok(());
        }

        let merged_away = {
            let split = path.len() - 1;
            let (front, back) = path.split_at_mut(split);
            let parent_guard = front.last_mut().expect("split leaves a parent");
            let leaf_guard = &mut back[0];
            let mut parent = InternalMut::<K>::new(parent_guard.data_mut());
            let mut leaf = LeafMut::<K, V>::new(leaf_guard.data_mut());

            let current_idx = parent
                .as_ref()
                .child_index(leaf_pid)
                .ok_or_else(|| OpalError::Internal(format!("{leaf_pid} missing from parent")))?;
            let left_pid = (current_idx > 0).then(|| parent.child_at(current_idx - 1));
            let right_pid =
                (current_idx + 1 < parent.size()).then(|| parent.child_at(current_idx + 1));

            let mut left_guard = match left_pid {
                Some(pid) => Some(self.write_guard(pid)?),
                None => None,
            };
            let mut right_guard = match right_pid {
                Some(pid) => Some(self.write_guard(pid)?),
                None => None,
            };

            let mut redistributed = false;
            if let Some(guard) = left_guard.as_mut() {
                let mut left = LeafMut::<K, V>::new(guard.data_mut());
                if left.size() > left.min_size() {
                    let last = left.size() - 1;
                    let (k, v) = (left.key_at(last), left.value_at(last));
                    left.remove_at(last);
                    leaf.insert_at(0, k, v);
                    parent.set_key_at(current_idx, k);
                    redistributed = true;
                }
            }
            if !redistributed {
                if let Some(guard) = right_guard.as_mut() {
                    let mut right = LeafMut::<K, V>::new(guard.data_mut());
                    if right.size() > right.min_size() {
                        let (k, v) = (right.key_at(0), right.value_at(0));
                        right.remove_at(0);
                        leaf.push(k, v);
                        parent.set_key_at(current_idx + 1, right.key_at(0));
                        redistributed = true;
                    }
                }
            }

            if redistributed {
                None
            } else if let Some(guard) = left_guard.as_mut() {
                // Fold the leaf into its left sibling.
                let mut left = LeafMut::<K, V>::new(guard.data_mut());
                for (k, v) in leaf.as_ref().entries() {
                    left.push(k, v);
                }
                left.set_next_page_id(leaf.next_page_id());
                parent.remove_at(current_idx);
                Some(leaf_pid)
            } else {
                let guard = right_guard.as_mut().expect("leaf with no siblings");
                // Fold the right sibling into the leaf.
                let right = LeafMut::<K, V>::new(guard.data_mut());
                for (k, v) in right.as_ref().entries() {
                    leaf.push(k, v);
                }
                leaf.set_next_page_id(right.next_page_id());
                parent.remove_at(current_idx + 1);
                Some(right_pid.expect("right guard implies right pid"))
            }
        };

        path.pop();
        if let Some(freed) = merged_away {
            self.free_page(freed);
            self.handle_internal_underflow(path)?;
        }
        Ok(())
    }

    /// Resolves an internal node below its minimum child count. A root
    /// shrunk to one child promotes that child.
    fn handle_internal_underflow<'a>(&'a self, path: &mut Vec<WritePageGuard<'a>>) -> Result<()> {
        if path.is_empty() {
            return Ok(());
        }
        let current_pid = path.last().expect("path never empty").page_id();

        if path.len() == 1 {
            let sole_child = {
                let node = InternalRef::<K>::new(path.last().expect("path never empty").data());
                (node.size() == 1).then(|| node.child_at(0))
            };
            if let Some(new_root) = sole_child {
                let mut header = self.write_guard(self.header_page_id)?;
                write_root(header.data_mut(), new_root);
                drop(header);
                debug!("collapsed root {current_pid} into {new_root}");
                path.pop();
                self.free_page(current_pid);
            }
            return Ok(());
        }

        {
            let node = InternalRef::<K>::new(path.last().expect("path never empty").data());
            if node.size() >= node.min_size() {
                return Ok(());
            }
        }

        let merged_away = {
            let split = path.len() - 1;
            let (front, back) = path.split_at_mut(split);
            let parent_guard = front.last_mut().expect("split leaves a parent");
            let current_guard = &mut back[0];
            let mut parent = InternalMut::<K>::new(parent_guard.data_mut());
            let mut current = InternalMut::<K>::new(current_guard.data_mut());

            let current_idx = parent
                .as_ref()
                .child_index(current_pid)
                .ok_or_else(|| OpalError::Internal(format!("{current_pid} missing from parent")))?;
            let left_pid = (current_idx > 0).then(|| parent.child_at(current_idx - 1));
            let right_pid =
                (current_idx + 1 < parent.size()).then(|| parent.child_at(current_idx + 1));

            let mut left_guard = match left_pid {
                Some(pid) => Some(self.write_guard(pid)?),
                None => None,
            };
            let mut right_guard = match right_pid {
                Some(pid) => Some(self.write_guard(pid)?),
                None => None,
            };

            let mut redistributed = false;
            if let Some(guard) = left_guard.as_mut() {
                let mut left = InternalMut::<K>::new(guard.data_mut());
                if left.size() > left.min_size() {
                    // The borrowed child arrives under the parent's old
                    // separator; the left sibling's last key replaces it.
                    let last = left.size() - 1;
                    let borrow_key = left.key_at(last);
                    let borrow_child = left.child_at(last);
                    left.remove_at(last);
                    let separator = parent.key_at(current_idx);
                    current.insert_head(separator, borrow_child);
                    parent.set_key_at(current_idx, borrow_key);
                    redistributed = true;
                }
            }
            if !redistributed {
                if let Some(guard) = right_guard.as_mut() {
                    let mut right = InternalMut::<K>::new(guard.data_mut());
                    if right.size() > right.min_size() {
                        let borrow_key = right.key_at(1);
                        let borrow_child = right.child_at(0);
                        right.remove_head();
                        let separator = parent.key_at(current_idx + 1);
                        current.push(separator, borrow_child);
                        parent.set_key_at(current_idx + 1, borrow_key);
                        redistributed = true;
                    }
                }
            }

            if redistributed {
                None
            } else if let Some(guard) = left_guard.as_mut() {
                // Merge into the left sibling, pulling the parent's
                // separator down between the two child sequences.
                let mut left = InternalMut::<K>::new(guard.data_mut());
                let separator = parent.key_at(current_idx);
                left.push(separator, current.child_at(0));
                for i in 1..current.size() {
                    left.push(current.key_at(i), current.child_at(i));
                }
                parent.remove_at(current_idx);
                Some(current_pid)
            } else {
                let guard = right_guard.as_mut().expect("internal node with no siblings");
                let right = InternalMut::<K>::new(guard.data_mut());
                let separator = parent.key_at(current_idx + 1);
                current.push(separator, right.child_at(0));
                for i in 1..right.size() {
                    current.push(right.key_at(i), right.child_at(i));
                }
                parent.remove_at(current_idx + 1);
                Some(right_pid.expect("right guard implies right pid"))
            }
        };

        path.pop();
        if let Some(freed) = merged_away {
            self.free_page(freed);
            self.handle_internal_underflow(path)?;
        }
        Ok(())
    }

    /// Returns a merged-away page to the buffer pool. A pinned page (an
    /// iterator may still hold it) is simply left allocated; nothing in
    /// the tree points at it any more.
    fn free_page(&self, page_id: PageId) {
        if !self.bpm.delete_page(page_id) {
            debug!("{page_id} still pinned, leaving allocated after unlink");
        }
    }

    /// Iterator positioned at the smallest key.
    pub fn iter(&self) -> Result<BPlusTreeIter<'_, K, V>> {
        let Some(mut guard) = self.latch_root_read()? else {
            return Ok(BPlusTreeIter::end(&self.bpm));
        };
        loop {
            match page_kind(guard.data()) {
                PageKind::Leaf => {
                    let page_id = guard.page_id();
                    return Ok(BPlusTreeIter::at(&self.bpm, page_id, 0));
                }
                PageKind::Internal => {
                    let child = InternalRef::<K>::new(guard.data()).child_at(0);
                    guard = self.read_guard(child)?;
                }
                PageKind::Invalid => panic!("descended into an uninitialised page"),
            }
        }
    }

    /// Iterator positioned at the first key `>= key`.
    pub fn iter_from(&self, key: &K) -> Result<BPlusTreeIter<'_, K, V>> {
        let Some(mut guard) = self.latch_root_read()? else {
            return Ok(BPlusTreeIter::end(&self.bpm));
        };
        loop {
            match page_kind(guard.data()) {
                PageKind::Leaf => {
                    let leaf = LeafRef::<K, V>::new(guard.data());
                    let index = leaf.first_index_ge(key);
                    let page_id = guard.page_id();
                    return Ok(BPlusTreeIter::at(&self.bpm, page_id, index));
                }
                PageKind::Internal => {
                    let child = InternalRef::<K>::new(guard.data()).child_for(key);
                    guard = self.read_guard(child)?;
                }
                PageKind::Invalid => panic!("descended into an uninitialised page"),
            }
        }
    }
}
