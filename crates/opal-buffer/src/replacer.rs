//! Adaptive Replacement Cache (ARC) eviction policy.
//!
//! Four queues balance recency against frequency: `mru` holds resident
//! frames seen once, `mfu` holds resident frames seen at least twice, and
//! each has a ghost queue of recently evicted page ids. A hit in a ghost
//! queue means the corresponding resident queue was too small, so the
//! target size of `mru` adapts.
//!
//! Two deliberate deviations from the original ARC paper:
//! - when `|mru|` equals the target, the eviction side is chosen without
//!   consulting the last access (the paper calls the choice arbitrary);
//! - non-evictable (pinned) entries are skipped, falling back to the other
//!   queue when one side is fully pinned.
//!
//! Queues are intrusive doubly-linked lists over an arena of nodes, with
//! hash maps from frame id (resident) and page id (ghost) to arena slots,
//! so every operation is O(1) apart from the eviction scan.

use opal_common::{FrameId, OpalError, PageId, Result};
use parking_lot::Mutex;
use std::collections::HashMap;

const NIL: usize = usize::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArcQueue {
    Mru = 0,
    Mfu = 1,
    MruGhost = 2,
    MfuGhost = 3,
}

#[derive(Debug, Clone, Copy)]
struct Node {
    prev: usize,
    next: usize,
    queue: ArcQueue,
    frame_id: FrameId,
    page_id: PageId,
    evictable: bool,
}

/// Head, tail, and length of one intrusive list.
#[derive(Debug, Clone, Copy)]
struct List {
    head: usize,
    tail: usize,
    len: usize,
}

impl List {
    fn new() -> Self {
        Self {
            head: NIL,
            tail: NIL,
            len: 0,
        }
    }
}

struct ArcState {
    arena: Vec<Node>,
    free: Vec<usize>,
    lists: [List; 4],
    /// Resident entries by frame id (in `mru` or `mfu`).
    resident: HashMap<FrameId, usize>,
    /// Ghost entries by page id; a dead page's id is its only identity.
    ghost: HashMap<PageId, usize>,
    /// Desired size of `mru`, adapted on ghost hits.
    target: usize,
    /// Number of resident evictable entries.
    evictable_count: usize,
}

impl ArcState {
    fn alloc(&mut self, node: Node) -> usize {
        match self.free.pop() {
            Some(idx) => {
                self.arena[idx] = node;
                idx
            }
            None => {
                self.arena.push(node);
                self.arena.len() - 1
            }
        }
    }

    fn release(&mut self, idx: usize) {
        self.free.push(idx);
    }

    fn push_front(&mut self, queue: ArcQueue, idx: usize) {
        let list = &mut self.lists[queue as usize];
        let old_head = list.head;
        {
            let node = &mut self.arena[idx];
            node.queue = queue;
            node.prev = NIL;
            node.next = old_head;
        }
        if old_head != NIL {
            self.arena[old_head].prev = idx;
        } else {
            list.tail = idx;
        }
        list.head = idx;
        list.len += 1;
    }

    fn detach(&mut self, idx: usize) {
        let (prev, next, queue) = {
            let node = &self.arena[idx];
            (node.prev, node.next, node.queue)
        };
        if prev != NIL {
            self.arena[prev].next = next;
        } else {
            self.lists[queue as usize].head = next;
        }
        if next != NIL {
            self.arena[next].prev = prev;
        } else {
            self.lists[queue as usize].tail = prev;
        }
        self.lists[queue as usize].len -= 1;
    }

    fn pop_back(&mut self, queue: ArcQueue) -> Option<usize> {
        let tail = self.lists[queue as usize].tail;
        if tail == NIL {
            return None;
        }
        self.detach(tail);
        Some(tail)
    }

    /// Oldest-first scan for an evictable entry.
    fn find_evictable(&self, queue: ArcQueue) -> Option<usize> {
        let mut idx = self.lists[queue as usize].tail;
        while idx != NIL {
            let node = &self.arena[idx];
            if node.evictable {
                return Some(idx);
            }
            idx = node.prev;
        }
        None
    }

    /// Drops the oldest ghost entry of `queue`, if any.
    fn trim_ghost(&mut self, queue: ArcQueue) {
        if let Some(idx) = self.pop_back(queue) {
            let page_id = self.arena[idx].page_id;
            self.ghost.remove(&page_id);
            self.release(idx);
        }
    }

    /// Moves a detached resident node into the ghost queue matching the
    /// queue it came from.
    fn ghost_node(&mut self, idx: usize, came_from: ArcQueue) {
        let page_id = self.arena[idx].page_id;
        self.arena[idx].evictable = false;
        let ghost_queue = match came_from {
            ArcQueue::Mru => ArcQueue::MruGhost,
            _ => ArcQueue::MfuGhost,
        };
        self.push_front(ghost_queue, idx);
        self.ghost.insert(page_id, idx);
    }
}

/// Per-frame ARC replacer, all operations under a single lock.
pub struct ArcReplacer {
    capacity: usize,
    state: Mutex<ArcState>,
}

impl ArcReplacer {
    /// Creates a replacer tracking at most `capacity` resident frames.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: Mutex::new(ArcState {
                arena: Vec::with_capacity(2 * capacity),
                free: Vec::new(),
                lists: [List::new(); 4],
                resident: HashMap::with_capacity(capacity),
                ghost: HashMap::with_capacity(capacity),
                target: 0,
                evictable_count: 0,
            }),
        }
    }

    fn check_frame(&self, frame_id: FrameId) {
        assert!(
            (frame_id.0 as usize) < self.capacity,
            "invalid frame id {frame_id}, replacer tracks {} frames",
            self.capacity
        );
    }

    /// Records an access of `page_id` living in `frame_id`.
    ///
    /// A frame seen in any resident queue moves to the front of `mfu`. A
    /// page id found in a ghost queue re-enters `mfu` after adapting the
    /// target (the miss would have been a hit had that side been larger).
    /// A cold page enters the front of `mru`, trimming ghost queues to the
    /// ARC bounds first. New and revived entries start non-evictable.
    pub fn record_access(&self, frame_id: FrameId, page_id: PageId) {
        self.check_frame(frame_id);
        let mut state = self.state.lock();
        let state = &mut *state;

        // Case 1: resident hit, promote to frequent.
        if let Some(&idx) = state.resident.get(&frame_id) {
            state.detach(idx);
            state.arena[idx].page_id = page_id;
            state.push_front(ArcQueue::Mfu, idx);
            return;
        }

        // Cases 2 and 3: ghost hit, adapt the target before reviving.
        if let Some(&idx) = state.ghost.get(&page_id) {
            let came_from = state.arena[idx].queue;
            state.detach(idx);
            state.ghost.remove(&page_id);
            state.release(idx);

            // Ghost sizes are sampled after the hit entry is removed; the
            // step is at least 1 and the target stays within bounds.
            let mru_ghost = state.lists[ArcQueue::MruGhost as usize].len;
            let mfu_ghost = state.lists[ArcQueue::MfuGhost as usize].len;
            if came_from == ArcQueue::MruGhost {
                let step = if mru_ghost >= mfu_ghost {
                    1
                } else {
                    mfu_ghost / mru_ghost.max(1)
                };
                state.target = (state.target + step).min(self.capacity);
            } else {
                let step = if mfu_ghost >= mru_ghost {
                    1
                } else {
                    mru_ghost / mfu_ghost.max(1)
                };
                state.target = state.target.saturating_sub(step);
            }

            let idx = state.alloc(Node {
                prev: NIL,
                next: NIL,
                queue: ArcQueue::Mfu,
                frame_id,
                page_id,
                evictable: false,
            });
            state.push_front(ArcQueue::Mfu, idx);
            state.resident.insert(frame_id, idx);
            return;
        }

        // Case 4: cold miss. Keep |mru| + |mru_ghost| <= capacity and the
        // total over all four queues <= 2 * capacity.
        let mru_total =
            state.lists[ArcQueue::Mru as usize].len + state.lists[ArcQueue::MruGhost as usize].len;
        let total = mru_total
            + state.lists[ArcQueue::Mfu as usize].len
            + state.lists[ArcQueue::MfuGhost as usize].len;
        if mru_total == self.capacity {
            state.trim_ghost(ArcQueue::MruGhost);
        } else if total >= 2 * self.capacity {
            state.trim_ghost(ArcQueue::MfuGhost);
        }

        let idx = state.alloc(Node {
            prev: NIL,
            next: NIL,
            queue: ArcQueue::Mru,
            frame_id,
            page_id,
            evictable: false,
        });
        state.push_front(ArcQueue::Mru, idx);
        state.resident.insert(frame_id, idx);
    }

    /// Toggles whether `frame_id` may be evicted. No-op for frames the
    /// replacer does not track.
    pub fn set_evictable(&self, frame_id: FrameId, evictable: bool) {
        self.check_frame(frame_id);
        let mut state = self.state.lock();
        let state = &mut *state;
        if let Some(&idx) = state.resident.get(&frame_id) {
            let node = &mut state.arena[idx];
            if node.evictable != evictable {
                node.evictable = evictable;
                if evictable {
                    state.evictable_count += 1;
                } else {
                    state.evictable_count -= 1;
                }
            }
        }
    }

    /// Picks a victim frame, moves its page id into the matching ghost
    /// queue, and returns the frame. Pinned entries are skipped; if the
    /// preferred side is fully pinned the other side is scanned.
    pub fn evict(&self) -> Option<FrameId> {
        let mut state = self.state.lock();
        let state = &mut *state;

        let mru_len = state.lists[ArcQueue::Mru as usize].len;
        let idx = if mru_len >= state.target {
            state
                .find_evictable(ArcQueue::Mru)
                .or_else(|| state.find_evictable(ArcQueue::Mfu))
        } else {
            state
                .find_evictable(ArcQueue::Mfu)
                .or_else(|| state.find_evictable(ArcQueue::Mru))
        }?;

        let came_from = state.arena[idx].queue;
        let frame_id = state.arena[idx].frame_id;
        state.detach(idx);
        state.resident.remove(&frame_id);
        state.evictable_count -= 1;
        state.ghost_node(idx, came_from);
        Some(frame_id)
    }

    /// Forcibly detaches an evictable resident frame, ghosting its page
    /// like a regular eviction. Unknown frames are ignored; detaching a
    /// non-evictable frame is an error.
    pub fn remove(&self, frame_id: FrameId) -> Result<()> {
        self.check_frame(frame_id);
        let mut state = self.state.lock();
        let state = &mut *state;

        let Some(&idx) = state.resident.get(&frame_id) else {
            return Ok(());
        };
        if !state.arena[idx].evictable {
            return Err(OpalError::FrameNotEvictable(frame_id));
        }

        let came_from = state.arena[idx].queue;
        state.detach(idx);
        state.resident.remove(&frame_id);
        state.evictable_count -= 1;
        state.ghost_node(idx, came_from);
        Ok(())
    }

    /// Number of evictable frames tracked.
    pub fn size(&self) -> usize {
        self.state.lock().evictable_count
    }

    /// Current adaptive target for `|mru|`.
    pub fn target_size(&self) -> usize {
        self.state.lock().target
    }

    /// The maximum number of resident frames.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
