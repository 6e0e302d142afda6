//! Expiry-ordered binary min-heap, single-threaded, owned by the reactor.

use std::collections::HashMap;
use std::time::{Duration, Instant};

pub type TimerId = usize;
pub type Callback = Box<dyn FnOnce() + Send>;

struct Node {
    id: TimerId,
    expires: Instant,
    cb: Callback,
}

/// Min-heap of `(expiry, id, callback)` paired with an id→heap-index side
/// map so `adjust`/`cancel_and_fire` stay O(log n). Never shared across
/// threads: only the reactor mutates it.
pub struct TimerHeap {
    heap: Vec<Node>,
    index: HashMap<TimerId, usize>,
}

impl TimerHeap {
    pub fn new() -> Self {
        Self { heap: Vec::new(), index: HashMap::new() }
    }

    pub fn clear(&mut self) {
        self.heap.clear();
        self.index.clear();
    }

    fn swap(&mut self, i: usize, j: usize) {
        self.heap.swap(i, j);
        self.index.insert(self.heap[i].id, i);
        self.index.insert(self.heap[j].id, j);
    }

    fn sift_up(&mut self, mut i: usize) {
        while i > 0 {
            let parent = (i - 1) / 2;
            if self.heap[parent].expires <= self.heap[i].expires {
                break;
            }
            self.swap(i, parent);
            i = parent;
        }
    }

    /// Returns true iff the node actually descended.
    fn sift_down(&mut self, index: usize, n: usize) -> bool {
        let mut i = index;
        loop {
            let mut j = i * 2 + 1;
            if j >= n {
                break;
            }
            if j + 1 < n && self.heap[j + 1].expires < self.heap[j].expires {
                j += 1;
            }
            if self.heap[i].expires <= self.heap[j].expires {
                break;
            }
            self.swap(i, j);
            i = j;
        }
        i > index
    }

    /// New id: push and sift up. Existing id: update expiry/callback in
    /// place and re-heapify by sift-down, falling back to sift-up only if
    /// sift-down didn't move it.
    pub fn add(&mut self, id: TimerId, timeout_ms: i64, cb: Callback) {
        let expires = Instant::now() + Duration::from_millis(timeout_ms.max(0) as u64);
        match self.index.get(&id).copied() {
            None => {
                let i = self.heap.len();
                self.index.insert(id, i);
                self.heap.push(Node { id, expires, cb });
                self.sift_up(i);
            }
            Some(i) => {
                self.heap[i].expires = expires;
                self.heap[i].cb = cb;
                let n = self.heap.len();
                if !self.sift_down(i, n) {
                    self.sift_up(i);
                }
            }
        }
    }

    pub fn adjust(&mut self, id: TimerId, new_timeout_ms: i64) {
        let Some(&i) = self.index.get(&id) else { return };
        self.heap[i].expires = Instant::now() + Duration::from_millis(new_timeout_ms.max(0) as u64);
        let n = self.heap.len();
        self.sift_down(i, n);
    }

    fn remove_at(&mut self, index: usize) -> Node {
        let n = self.heap.len() - 1;
        if index < n {
            self.swap(index, n);
            if !self.sift_down(index, n) {
                self.sift_up(index);
            }
        }
        let node = self.heap.pop().expect("index within bounds");
        self.index.remove(&node.id);
        node
    }

    /// Removes the node and fires its callback immediately, regardless of
    /// expiry — used when a hang-up or explicit close preempts a timeout.
    pub fn cancel_and_fire(&mut self, id: TimerId) {
        let Some(&i) = self.index.get(&id) else { return };
        let node = self.remove_at(i);
        (node.cb)();
    }

    pub fn cancel(&mut self, id: TimerId) {
        if let Some(&i) = self.index.get(&id) {
            self.remove_at(i);
        }
    }

    pub fn pop_top(&mut self) -> Option<TimerId> {
        if self.heap.is_empty() {
            return None;
        }
        Some(self.remove_at(0).id)
    }

    /// Fires and removes every node whose expiry has passed.
    pub fn tick(&mut self) {
        let now = Instant::now();
        while let Some(front) = self.heap.first() {
            if front.expires > now {
                break;
            }
            let node = self.remove_at(0);
            (node.cb)();
        }
    }

    /// Ticks, then returns the millisecond deadline for the next wait call:
    /// -1 if empty (wait forever), else `max(0, top.expiry - now)`.
    pub fn next_tick_ms(&mut self) -> i64 {
        self.tick();
        match self.heap.first() {
            None => -1,
            Some(front) => {
                let now = Instant::now();
                if front.expires <= now {
                    0
                } else {
                    (front.expires - now).as_millis() as i64
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn empty_heap_returns_minus_one() {
        let mut heap = TimerHeap::new();
        assert_eq!(heap.next_tick_ms(), -1);
    }

    #[test]
    fn expired_top_returns_zero_and_fires() {
        let mut heap = TimerHeap::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let f = fired.clone();
        heap.add(1, 0, Box::new(move || { f.fetch_add(1, Ordering::SeqCst); }));
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(heap.next_tick_ms(), -1);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn parent_expiry_le_child_expiry_after_mutations() {
        let mut heap = TimerHeap::new();
        for id in 0..20 {
            let order = (id * 37) % 101;
            heap.add(id, order as i64, Box::new(|| {}));
        }
        heap.adjust(5, 3);
        heap.cancel(10);
        for i in 0..heap.heap.len() {
            let left = i * 2 + 1;
            let right = i * 2 + 2;
            if left < heap.heap.len() {
                assert!(heap.heap[i].expires <= heap.heap[left].expires);
            }
            if right < heap.heap.len() {
                assert!(heap.heap[i].expires <= heap.heap[right].expires);
            }
        }
        for (id, &pos) in heap.index.iter() {
            assert_eq!(heap.heap[pos].id, *id);
        }
    }

    #[test]
    fn cancel_and_fire_invokes_callback_immediately() {
        let mut heap = TimerHeap::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let f = fired.clone();
        heap.add(1, 60_000, Box::new(move || { f.fetch_add(1, Ordering::SeqCst); }));
        heap.cancel_and_fire(1);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(heap.next_tick_ms(), -1);
    }
}
