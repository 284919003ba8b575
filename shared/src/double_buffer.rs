//! Lock-free double buffer for one writer thread and one reader thread.
//!
//! Two instances of `T` live side by side and one atomic byte names the
//! front (readable) instance. The writer rebuilds the back instance and
//! publishes it by flipping the front bit with release ordering; the reader
//! loads the front bit with acquire ordering and only ever reads.
//!
//! The same byte carries one "pinned" bit per instance, set by the reader for
//! as long as a [`ReadGuard`] is alive. The writer refuses to touch a pinned
//! instance and reports the publish as skipped instead of waiting, so it never
//! blocks on the reader and the reader never sees a half-written instance.

use std::cell::UnsafeCell;
use std::ops::Deref;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

const FRONT_BIT: u8 = 0b001;

const fn pin_bit(index: u8) -> u8 {
    0b010 << index
}

struct Shared<T> {
    buffers: [UnsafeCell<T>; 2],
    state: AtomicU8,
}

// Access to each instance is arbitrated by `state`: the writer only mutates
// the unpinned back instance, the reader only reads the instance it pinned.
unsafe impl<T: Send> Send for Shared<T> {}
unsafe impl<T: Send + Sync> Sync for Shared<T> {}

/// Creates a connected writer/reader pair, both instances starting as `initial`.
pub fn double_buffer<T: Clone>(initial: T) -> (Publisher<T>, Reader<T>) {
    let shared = Arc::new(Shared {
        buffers: [UnsafeCell::new(initial.clone()), UnsafeCell::new(initial)],
        state: AtomicU8::new(0),
    });
    (
        Publisher {
            shared: Arc::clone(&shared),
        },
        Reader { shared },
    )
}

/// The single writer. Not `Clone`.
pub struct Publisher<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Publisher<T> {
    /// Rebuilds the back instance with `rebuild(front, back)` and publishes it.
    ///
    /// `front` is the currently published instance, readable for diffing.
    /// Returns false without calling `rebuild` when the reader still holds the
    /// back instance from before the previous swap.
    pub fn publish_with<F>(&mut self, rebuild: F) -> bool
    where
        F: FnOnce(&T, &mut T),
    {
        let state = self.shared.state.load(Ordering::Acquire);
        let front = state & FRONT_BIT;
        let back = 1 - front;
        if state & pin_bit(back) != 0 {
            return false;
        }

        // SAFETY: `back` is not pinned and cannot become pinned before the flip
        // below, because the reader only pins the current front. `front` is
        // only read here; the reader may read it concurrently.
        unsafe {
            let front_ref = &*self.shared.buffers[front as usize].get();
            let back_ref = &mut *self.shared.buffers[back as usize].get();
            rebuild(front_ref, back_ref);
        }

        self.shared.state.fetch_xor(FRONT_BIT, Ordering::Release);
        true
    }

    /// Read access to the currently published instance from the writer side.
    pub fn current(&self) -> &T {
        let front = self.shared.state.load(Ordering::Acquire) & FRONT_BIT;
        // SAFETY: only this writer mutates, and it never mutates the front.
        unsafe { &*self.shared.buffers[front as usize].get() }
    }
}

/// The single reader. Not `Clone`.
pub struct Reader<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Reader<T> {
    /// Pins and returns the current front instance.
    pub fn read(&mut self) -> ReadGuard<'_, T> {
        let mut state = self.shared.state.load(Ordering::Acquire);
        loop {
            let front = state & FRONT_BIT;
            match self.shared.state.compare_exchange_weak(
                state,
                state | pin_bit(front),
                Ordering::Acquire,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    return ReadGuard {
                        shared: &self.shared,
                        index: front,
                    }
                }
                Err(actual) => state = actual,
            }
        }
    }
}

pub struct ReadGuard<'a, T> {
    shared: &'a Shared<T>,
    index: u8,
}

impl<T> Deref for ReadGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the pin bit for `index` keeps the writer away until drop.
        unsafe { &*self.shared.buffers[self.index as usize].get() }
    }
}

impl<T> Drop for ReadGuard<'_, T> {
    fn drop(&mut self) {
        self.shared
            .state
            .fetch_and(!pin_bit(self.index), Ordering::Release);
    }
}
