/// Reordering queue behaviour: ascending release regardless of insertion
/// order, bounded residency, timeouts that hand the item back, and the slot
/// reserved for the next expected id.
mod common;

use std::thread;
use std::time::{Duration, Instant};

use pgz_core::{Dequeue, ReorderQueue};

use common::jitter_ms;

const SHORT: Duration = Duration::from_millis(20);
const LONG: Duration = Duration::from_secs(5);

// ── tests ──────────────────────────────────────────────────────────────────

#[test]
fn test_releases_in_id_order() {
    let q = ReorderQueue::new(4);
    q.enqueue(2, "c", SHORT).unwrap();
    q.enqueue(1, "b", SHORT).unwrap();
    q.enqueue(0, "a", SHORT).unwrap();
    assert_eq!(q.len(), 3);

    assert_eq!(q.dequeue(SHORT), Dequeue::Ready(0, "a"));
    assert_eq!(q.dequeue(SHORT), Dequeue::Ready(1, "b"));
    assert_eq!(q.dequeue(SHORT), Dequeue::Ready(2, "c"));
    assert!(q.is_empty());
    assert_eq!(q.next_expected(), 3);
}

#[test]
fn test_later_ids_never_jump_the_line() {
    let q = ReorderQueue::new(4);
    q.enqueue(1, 10u32, SHORT).unwrap();

    let t0 = Instant::now();
    assert_eq!(q.dequeue(SHORT), Dequeue::TimedOut);
    assert!(t0.elapsed() >= SHORT);
    assert_eq!(q.len(), 1, "id 1 must stay resident until id 0 shows up");

    q.enqueue(0, 0u32, SHORT).unwrap();
    assert_eq!(q.dequeue(SHORT), Dequeue::Ready(0, 0));
    assert_eq!(q.dequeue(SHORT), Dequeue::Ready(1, 10));
}

#[test]
fn test_full_queue_hands_item_back() {
    let q = ReorderQueue::new(3);
    q.enqueue(1, vec![1u8], SHORT).unwrap();
    q.enqueue(2, vec![2u8], SHORT).unwrap();

    // Two out-of-order entries already use every slot open to them.
    let rejected = q.enqueue(3, vec![3u8], SHORT);
    assert_eq!(rejected, Err(vec![3u8]));
    assert_eq!(q.len(), 2);
}

#[test]
fn test_next_id_uses_reserved_slot() {
    let q = ReorderQueue::new(3);
    q.enqueue(2, 'c', SHORT).unwrap();
    q.enqueue(1, 'b', SHORT).unwrap();
    assert!(q.enqueue(3, 'd', SHORT).is_err());

    q.enqueue(0, 'a', SHORT)
        .expect("the next expected id must always find room");
    assert_eq!(q.len(), 3);
    assert_eq!(q.high_water_mark(), 3);

    assert_eq!(q.dequeue(SHORT), Dequeue::Ready(0, 'a'));
    assert_eq!(q.dequeue(SHORT), Dequeue::Ready(1, 'b'));
    assert_eq!(q.dequeue(SHORT), Dequeue::Ready(2, 'c'));
}

#[test]
fn test_capacity_is_at_least_two() {
    let q: ReorderQueue<u8> = ReorderQueue::new(0);
    assert_eq!(q.capacity(), 2);
    let q: ReorderQueue<u8> = ReorderQueue::new(1);
    assert_eq!(q.capacity(), 2);
}

#[test]
fn test_blocked_producer_wakes_when_slot_frees() {
    let q = ReorderQueue::new(2);
    q.enqueue(0, 0u64, SHORT).unwrap();
    q.enqueue(1, 1u64, SHORT).unwrap();

    thread::scope(|s| {
        let producer = s.spawn(|| q.enqueue(2, 2u64, LONG));
        thread::sleep(Duration::from_millis(30));
        assert_eq!(q.dequeue(SHORT), Dequeue::Ready(0, 0));
        // Id 2 is not next yet, so it only gets capacity - 1 slots.
        assert_eq!(q.dequeue(SHORT), Dequeue::Ready(1, 1));
        assert_eq!(producer.join().unwrap(), Ok(()));
    });

    assert_eq!(q.dequeue(SHORT), Dequeue::Ready(2, 2));
}

#[test]
fn test_close_drains_then_reports_closed() {
    let q = ReorderQueue::new(4);
    q.enqueue(0, "last", SHORT).unwrap();
    q.close();

    assert_eq!(q.dequeue(SHORT), Dequeue::Ready(0, "last"));
    assert_eq!(q.dequeue(SHORT), Dequeue::Closed);
    assert_eq!(q.dequeue(SHORT), Dequeue::Closed);
}

#[test]
fn test_close_wakes_waiting_consumer() {
    let q: ReorderQueue<u8> = ReorderQueue::new(4);

    thread::scope(|s| {
        let consumer = s.spawn(|| {
            let t0 = Instant::now();
            (q.dequeue(LONG), t0.elapsed())
        });
        thread::sleep(Duration::from_millis(30));
        q.close();
        let (outcome, waited) = consumer.join().unwrap();
        assert_eq!(outcome, Dequeue::Closed);
        assert!(waited < LONG, "close must not wait for the timeout");
    });
}

/// Four producers insert interleaved ids with uneven delays; a single
/// consumer must still see 0, 1, 2, ... and residency never exceeds the
/// bound.
#[test]
fn test_concurrent_producers_keep_order_and_bound() {
    const PRODUCERS: u64 = 4;
    const ITEMS: u64 = 200;
    let q = ReorderQueue::new(4);

    let seen = thread::scope(|s| {
        for p in 0..PRODUCERS {
            let q = &q;
            s.spawn(move || {
                for id in (p..ITEMS).step_by(PRODUCERS as usize) {
                    thread::sleep(Duration::from_millis(jitter_ms(id, 2)));
                    let mut item = id * 10;
                    while let Err(back) = q.enqueue(id, item, SHORT) {
                        item = back;
                    }
                }
            });
        }

        let mut seen = Vec::new();
        while (seen.len() as u64) < ITEMS {
            match q.dequeue(SHORT) {
                Dequeue::Ready(id, item) => {
                    assert_eq!(item, id * 10);
                    seen.push(id);
                }
                Dequeue::TimedOut => continue,
                Dequeue::Closed => panic!("queue was never closed"),
            }
        }
        seen
    });

    assert_eq!(seen, (0..ITEMS).collect::<Vec<_>>());
    assert!(q.high_water_mark() <= q.capacity());
}
