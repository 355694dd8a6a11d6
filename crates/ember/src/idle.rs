//! Activity-ordered queue of live connections: a doubly linked list over a
//! slot arena, with the slot id handed back to the owner as an intrusive
//! handle. Touch and remove are O(1); the list stays sorted by
//! `last_active` because every touch splices the node to the tail.

use crate::clock::{DEFAULT_POLL_TIMEOUT_MS, MonoMs};

pub const IDLE_TIMEOUT_MS: u64 = 300_000;

const NIL: usize = usize::MAX;

/// Position of an element inside an [`IdleQueue`]; stored on the owning
/// connection. Stale after the element leaves the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdleHandle(usize);

#[derive(Debug)]
struct Slot<T> {
    item: Option<T>,
    last_active: MonoMs,
    prev: usize,
    next: usize,
}

#[derive(Debug)]
pub struct IdleQueue<T> {
    slots: Vec<Slot<T>>,
    free: Vec<usize>,
    head: usize,
    tail: usize,
    len: usize,
    timeout_ms: u64,
}

impl<T> IdleQueue<T> {
    pub fn new(timeout_ms: u64) -> Self {
        Self { slots: Vec::new(), free: Vec::new(), head: NIL, tail: NIL, len: 0, timeout_ms }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn insert(&mut self, item: T, now: MonoMs) -> IdleHandle {
        let slot = match self.free.pop() {
            Some(slot) => {
                let s = &mut self.slots[slot];
                s.item = Some(item);
                s.last_active = now;
                slot
            }
            None => {
                self.slots.push(Slot { item: Some(item), last_active: now, prev: NIL, next: NIL });
                self.slots.len() - 1
            }
        };
        self.link_tail(slot);
        self.len += 1;
        IdleHandle(slot)
    }

    /// Records activity: splices the node to the tail with a fresh stamp.
    pub fn touch(&mut self, handle: IdleHandle, now: MonoMs) {
        if self.slots.get(handle.0).is_none_or(|s| s.item.is_none()) {
            crate::safe_panic!("idle: touch through a vacant handle");
            return;
        }
        self.unlink(handle.0);
        self.slots[handle.0].last_active = now;
        self.link_tail(handle.0);
    }

    pub fn remove(&mut self, handle: IdleHandle) -> Option<T> {
        let item = self.slots.get_mut(handle.0)?.item.take()?;
        self.unlink(handle.0);
        self.free.push(handle.0);
        self.len -= 1;
        Some(item)
    }

    /// Detaches and returns every element idle past the timeout, oldest
    /// first. The list is ordered, so the walk stops at the first live one.
    pub fn collect_idle(&mut self, now: MonoMs) -> Vec<T> {
        let mut out = Vec::new();
        while self.head != NIL {
            let slot = self.head;
            if now.saturating_sub(self.slots[slot].last_active) <= self.timeout_ms {
                break;
            }
            self.unlink(slot);
            if let Some(item) = self.slots[slot].item.take() {
                out.push(item);
            }
            self.free.push(slot);
            self.len -= 1;
        }
        out
    }

    /// Milliseconds until the oldest element becomes evictable.
    pub fn next_deadline_ms(&self, now: MonoMs) -> u64 {
        if self.head == NIL {
            return DEFAULT_POLL_TIMEOUT_MS;
        }
        (self.slots[self.head].last_active + self.timeout_ms).ms_until(now)
    }

    fn link_tail(&mut self, slot: usize) {
        self.slots[slot].prev = self.tail;
        self.slots[slot].next = NIL;
        if self.tail != NIL {
            self.slots[self.tail].next = slot;
        } else {
            self.head = slot;
        }
        self.tail = slot;
    }

    fn unlink(&mut self, slot: usize) {
        let (prev, next) = (self.slots[slot].prev, self.slots[slot].next);
        if prev != NIL {
            self.slots[prev].next = next;
        } else {
            self.head = next;
        }
        if next != NIL {
            self.slots[next].prev = prev;
        } else {
            self.tail = prev;
        }
        self.slots[slot].prev = NIL;
        self.slots[slot].next = NIL;
    }

    #[cfg(test)]
    fn stamps(&self) -> Vec<MonoMs> {
        let mut out = Vec::with_capacity(self.len);
        let mut slot = self.head;
        while slot != NIL {
            out.push(self.slots[slot].last_active);
            slot = self.slots[slot].next;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn touch_moves_to_tail_and_keeps_order() {
        let mut q = IdleQueue::new(100);
        let a = q.insert("a", MonoMs(1));
        let _b = q.insert("b", MonoMs(2));
        let _c = q.insert("c", MonoMs(3));

        q.touch(a, MonoMs(10));

        let stamps = q.stamps();
        assert_eq!(stamps, [MonoMs(2), MonoMs(3), MonoMs(10)]);
        assert!(stamps.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn collect_idle_stops_at_first_live_node() {
        let mut q = IdleQueue::new(100);
        q.insert("old", MonoMs(0));
        q.insert("older", MonoMs(10));
        q.insert("fresh", MonoMs(150));

        let evicted = q.collect_idle(MonoMs(120));
        assert_eq!(evicted, ["old", "older"]);
        assert_eq!(q.len(), 1);
        assert!(q.collect_idle(MonoMs(120)).is_empty());
    }

    #[test]
    fn timeout_boundary_is_exclusive() {
        let mut q = IdleQueue::new(100);
        q.insert("x", MonoMs(0));
        assert!(q.collect_idle(MonoMs(100)).is_empty());
        assert_eq!(q.collect_idle(MonoMs(101)), ["x"]);
    }

    #[test]
    fn deadline_tracks_head() {
        let mut q = IdleQueue::new(100);
        assert_eq!(q.next_deadline_ms(MonoMs(0)), DEFAULT_POLL_TIMEOUT_MS);

        let h = q.insert((), MonoMs(50));
        assert_eq!(q.next_deadline_ms(MonoMs(60)), 90);
        assert_eq!(q.next_deadline_ms(MonoMs(400)), 0);

        q.remove(h);
        assert_eq!(q.next_deadline_ms(MonoMs(60)), DEFAULT_POLL_TIMEOUT_MS);
    }

    #[test]
    fn random_touch_sequences_keep_stamps_sorted() {
        use rand::{Rng, SeedableRng, rngs::StdRng};

        let mut rng = StdRng::seed_from_u64(7);
        let mut q = IdleQueue::new(50);
        let mut handles: Vec<(IdleHandle, u32)> = Vec::new();
        let mut now = MonoMs::ZERO;

        for id in 0..2_000_u32 {
            now = now + rng.random_range(0..3_u64);
            match rng.random_range(0..10) {
                0..4 => handles.push((q.insert(id, now), id)),
                4..8 if !handles.is_empty() => {
                    let (handle, _) = handles[rng.random_range(0..handles.len())];
                    q.touch(handle, now);
                }
                8 if !handles.is_empty() => {
                    let (handle, _) = handles.swap_remove(rng.random_range(0..handles.len()));
                    assert!(q.remove(handle).is_some());
                }
                _ => {
                    let evicted = q.collect_idle(now);
                    handles.retain(|(_, id)| !evicted.contains(id));
                }
            }

            assert_eq!(q.len(), handles.len());
            let stamps = q.stamps();
            assert!(stamps.windows(2).all(|w| w[0] <= w[1]), "stamps out of order");
        }
    }

    #[test]
    fn removed_slots_are_reused() {
        let mut q = IdleQueue::new(100);
        let a = q.insert(1, MonoMs(1));
        q.insert(2, MonoMs(2));
        assert_eq!(q.remove(a), Some(1));
        assert_eq!(q.remove(a), None);

        let c = q.insert(3, MonoMs(3));
        assert_eq!(c, a, "freed slot should be recycled");
        assert_eq!(q.stamps(), [MonoMs(2), MonoMs(3)]);
    }
}
