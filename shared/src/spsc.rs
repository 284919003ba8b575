//! Fixed-capacity single-producer/single-consumer ring.
//!
//! `write_index` is only stored by the producer and `read_index` only by the
//! consumer. A slot is written before the release store that publishes it and
//! read only after the acquire load that observes that store. One slot always
//! stays empty to tell full from empty, so a ring of `N` slots holds `N - 1`
//! entries. Enqueueing into a full ring drops the new entry.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

struct Ring<T, const N: usize> {
    slots: [UnsafeCell<MaybeUninit<T>>; N],
    write_index: AtomicUsize,
    read_index: AtomicUsize,
}

// Each slot is owned by exactly one side at a time, as arbitrated by the indices.
unsafe impl<T: Send, const N: usize> Sync for Ring<T, N> {}
unsafe impl<T: Send, const N: usize> Send for Ring<T, N> {}

pub fn spsc_ring<T: Copy, const N: usize>() -> (Producer<T, N>, Consumer<T, N>) {
    assert!(N >= 2, "ring needs at least two slots");
    let ring = Arc::new(Ring {
        slots: std::array::from_fn(|_| UnsafeCell::new(MaybeUninit::uninit())),
        write_index: AtomicUsize::new(0),
        read_index: AtomicUsize::new(0),
    });
    (
        Producer {
            ring: Arc::clone(&ring),
        },
        Consumer { ring },
    )
}

pub struct Producer<T, const N: usize> {
    ring: Arc<Ring<T, N>>,
}

impl<T: Copy, const N: usize> Producer<T, N> {
    /// Returns false if the ring was full and `value` was dropped.
    pub fn enqueue(&mut self, value: T) -> bool {
        let write = self.ring.write_index.load(Ordering::Acquire);
        let read = self.ring.read_index.load(Ordering::Acquire);
        let next = (write + 1) % N;
        if next == read {
            return false;
        }

        // SAFETY: slot `write` is outside [read, write) so the consumer will
        // not touch it until the store below publishes it.
        unsafe {
            (*self.ring.slots[write].get()).write(value);
        }
        self.ring.write_index.store(next, Ordering::Release);
        true
    }

    pub fn capacity(&self) -> usize {
        N - 1
    }
}

pub struct Consumer<T, const N: usize> {
    ring: Arc<Ring<T, N>>,
}

impl<T: Copy, const N: usize> Consumer<T, N> {
    /// Copies every published entry into `out`, then releases their slots.
    ///
    /// Returns the number of entries appended. Callers do their slow work on
    /// `out` after this returns, never while holding slots.
    pub fn drain_into(&mut self, out: &mut Vec<T>) -> usize {
        let write = self.ring.write_index.load(Ordering::Acquire);
        let mut read = self.ring.read_index.load(Ordering::Relaxed);
        if read == write {
            return 0;
        }

        let mut taken = 0;
        while read != write {
            // SAFETY: slots in [read, write) were initialised before the
            // producer's release store of `write`, observed above.
            let value = unsafe { (*self.ring.slots[read].get()).assume_init_read() };
            out.push(value);
            read = (read + 1) % N;
            taken += 1;
        }
        self.ring.read_index.store(read, Ordering::Release);
        taken
    }

    pub fn is_empty(&self) -> bool {
        self.ring.read_index.load(Ordering::Relaxed) == self.ring.write_index.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_fifo_order() {
        let (mut tx, mut rx) = spsc_ring::<u32, 8>();
        assert!(rx.is_empty());
        for i in 0..5 {
            assert!(tx.enqueue(i));
        }
        let mut out = Vec::new();
        assert_eq!(rx.drain_into(&mut out), 5);
        assert_eq!(out, vec![0, 1, 2, 3, 4]);
        assert!(rx.is_empty());
        assert_eq!(rx.drain_into(&mut out), 0);
    }

    #[test]
    fn test_overflow_drops_exactly_one() {
        let (mut tx, mut rx) = spsc_ring::<(u32, u32), 256>();
        let capacity = tx.capacity();
        assert_eq!(capacity, 255);

        let accepted = (0..=capacity as u32)
            .filter(|&i| tx.enqueue((i, i * 2)))
            .count();
        assert_eq!(accepted, capacity);

        let mut out = Vec::new();
        rx.drain_into(&mut out);
        assert_eq!(out.len(), capacity);
        for (i, entry) in out.iter().enumerate() {
            assert_eq!(*entry, (i as u32, i as u32 * 2));
        }
    }

    #[test]
    fn test_wraps_around_after_drain() {
        let (mut tx, mut rx) = spsc_ring::<u8, 4>();
        let mut out = Vec::new();
        for round in 0..10u8 {
            assert!(tx.enqueue(round));
            assert!(tx.enqueue(round.wrapping_add(100)));
            out.clear();
            assert_eq!(rx.drain_into(&mut out), 2);
            assert_eq!(out, vec![round, round.wrapping_add(100)]);
        }
    }

    #[test]
    fn test_cross_thread_handoff_preserves_order() {
        let (mut tx, mut rx) = spsc_ring::<u64, 64>();
        const TOTAL: u64 = 10_000;

        let producer = thread::spawn(move || {
            let mut sent = Vec::new();
            for i in 0..TOTAL {
                if tx.enqueue(i) {
                    sent.push(i);
                }
            }
            sent
        });

        let mut received = Vec::new();
        loop {
            rx.drain_into(&mut received);
            if producer.is_finished() && rx.is_empty() {
                break;
            }
            thread::yield_now();
        }
        let sent = producer.join().unwrap();
        rx.drain_into(&mut received);

        assert_eq!(received, sent);
    }
}
