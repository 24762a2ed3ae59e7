use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Outcome of [`ReorderQueue::dequeue`].
#[derive(Debug, PartialEq, Eq)]
pub enum Dequeue<T> {
    /// The entry whose id equals the delivery cursor.
    Ready(u64, T),
    /// The next id did not arrive within the timeout.
    TimedOut,
    /// The queue was closed and the next id will never arrive.
    Closed,
}

/// A bounded, id-keyed buffer that accepts entries in any order and releases
/// them strictly in ascending id order, starting at 0.
///
/// Producers block while the queue is full, which throttles whoever feeds the
/// pipeline. An entry that is not the next one to be delivered may only take
/// `capacity - 1` slots, so the next expected id always finds room. Without
/// that reservation, late finishers could fill the queue and leave the block
/// the consumer is waiting for with nowhere to go.
#[derive(Debug)]
pub struct ReorderQueue<T> {
    capacity: usize,
    state: Mutex<QueueState<T>>,
    ready: Condvar,
    vacated: Condvar,
}

#[derive(Debug)]
struct QueueState<T> {
    pending: BTreeMap<u64, T>,
    next_out: u64,
    closed: bool,
    high_water: usize,
}

impl<T> ReorderQueue<T> {
    /// Create a queue holding at most `capacity` entries (at least 2).
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(2),
            state: Mutex::new(QueueState {
                pending: BTreeMap::new(),
                next_out: 0,
                closed: false,
                high_water: 0,
            }),
            ready: Condvar::new(),
            vacated: Condvar::new(),
        }
    }

    /// Insert `item` under `id`, waiting up to `timeout` for a free slot.
    ///
    /// On timeout the item is handed back so the caller can retry after
    /// checking whether the run was aborted.
    pub fn enqueue(&self, id: u64, item: T, timeout: Duration) -> Result<(), T> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while !self.has_room(&state, id) {
            if self.vacated.wait_until(&mut state, deadline).timed_out() && !self.has_room(&state, id) {
                return Err(item);
            }
        }
        debug_assert!(id >= state.next_out, "id {id} was already delivered");
        debug_assert!(!state.pending.contains_key(&id), "duplicate id {id}");
        state.pending.insert(id, item);
        state.high_water = state.high_water.max(state.pending.len());
        drop(state);
        self.ready.notify_all();
        Ok(())
    }

    /// Remove the entry with the next expected id, waiting up to `timeout`
    /// for it to arrive. Entries with later ids never jump the line.
    pub fn dequeue(&self, timeout: Duration) -> Dequeue<T> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            let next = state.next_out;
            if let Some(item) = state.pending.remove(&next) {
                state.next_out += 1;
                drop(state);
                self.vacated.notify_all();
                return Dequeue::Ready(next, item);
            }
            if state.closed {
                return Dequeue::Closed;
            }
            if self.ready.wait_until(&mut state, deadline).timed_out() {
                let next = state.next_out;
                return match state.pending.remove(&next) {
                    Some(item) => {
                        state.next_out += 1;
                        drop(state);
                        self.vacated.notify_all();
                        Dequeue::Ready(next, item)
                    }
                    None if state.closed => Dequeue::Closed,
                    None => Dequeue::TimedOut,
                };
            }
        }
    }

    /// Mark the stream as finished. Pending entries can still be dequeued;
    /// once they are gone every waiter gets [`Dequeue::Closed`].
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.ready.notify_all();
    }

    fn has_room(&self, state: &QueueState<T>, id: u64) -> bool {
        let limit = if id == state.next_out {
            self.capacity
        } else {
            self.capacity - 1
        };
        state.pending.len() < limit
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of entries currently resident.
    pub fn len(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Id the next successful dequeue will return.
    pub fn next_expected(&self) -> u64 {
        self.state.lock().next_out
    }

    /// Largest number of entries that were ever resident at once.
    pub fn high_water_mark(&self) -> usize {
        self.state.lock().high_water
    }
}
