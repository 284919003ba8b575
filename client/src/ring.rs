//! Fixed-capacity ring that drops its oldest entry on overflow

/// Bounded FIFO backed by an inline array.
///
/// Pushing into a full ring evicts the oldest entry, so memory use and
/// iteration cost never grow past `N`.
#[derive(Debug, Clone)]
pub struct FixedRing<T, const N: usize> {
    slots: [Option<T>; N],
    head: usize,
    len: usize,
}

impl<T: Copy, const N: usize> FixedRing<T, N> {
    pub fn new() -> Self {
        Self {
            slots: [None; N],
            head: 0,
            len: 0,
        }
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Appends `value`, returning the evicted oldest entry if the ring was full.
    pub fn push(&mut self, value: T) -> Option<T> {
        if N == 0 {
            return Some(value);
        }
        if self.len == N {
            let evicted = self.slots[self.head].replace(value);
            self.head = (self.head + 1) % N;
            return evicted;
        }
        let tail = (self.head + self.len) % N;
        self.slots[tail] = Some(value);
        self.len += 1;
        None
    }

    /// Entry at logical position `index`, oldest first.
    pub fn get(&self, index: usize) -> Option<T> {
        if index >= self.len {
            return None;
        }
        self.slots[(self.head + index) % N]
    }

    pub fn first(&self) -> Option<T> {
        self.get(0)
    }

    pub fn last(&self) -> Option<T> {
        self.len.checked_sub(1).and_then(|i| self.get(i))
    }

    pub fn iter(&self) -> impl Iterator<Item = T> + '_ {
        (0..self.len).filter_map(move |i| self.get(i))
    }

    /// Keeps only the entries for which `keep` returns true, preserving order.
    pub fn retain<F: FnMut(&T) -> bool>(&mut self, mut keep: F) {
        let mut kept = 0;
        for i in 0..self.len {
            let src = (self.head + i) % N;
            let Some(value) = self.slots[src].take() else {
                continue;
            };
            if keep(&value) {
                self.slots[(self.head + kept) % N] = Some(value);
                kept += 1;
            }
        }
        self.len = kept;
    }

    pub fn clear(&mut self) {
        self.slots = [None; N];
        self.head = 0;
        self.len = 0;
    }
}

impl<T: Copy, const N: usize> Default for FixedRing<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_and_iterate_in_order() {
        let mut ring = FixedRing::<u32, 4>::new();
        assert!(ring.is_empty());
        assert_eq!(ring.push(1), None);
        assert_eq!(ring.push(2), None);
        assert_eq!(ring.iter().collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(ring.first(), Some(1));
        assert_eq!(ring.last(), Some(2));
    }

    #[test]
    fn test_overflow_evicts_oldest() {
        let mut ring = FixedRing::<u32, 3>::new();
        for i in 0..3 {
            ring.push(i);
        }
        assert_eq!(ring.push(3), Some(0));
        assert_eq!(ring.push(4), Some(1));
        assert_eq!(ring.len(), 3);
        assert_eq!(ring.iter().collect::<Vec<_>>(), vec![2, 3, 4]);
    }

    #[test]
    fn test_retain_after_wraparound() {
        let mut ring = FixedRing::<u32, 4>::new();
        for i in 0..7 {
            ring.push(i);
        }
        assert_eq!(ring.iter().collect::<Vec<_>>(), vec![3, 4, 5, 6]);

        ring.retain(|&v| v > 4);
        assert_eq!(ring.iter().collect::<Vec<_>>(), vec![5, 6]);

        ring.push(7);
        ring.push(8);
        assert_eq!(ring.push(9), Some(5));
        assert_eq!(ring.iter().collect::<Vec<_>>(), vec![6, 7, 8, 9]);
    }

    #[test]
    fn test_clear() {
        let mut ring = FixedRing::<u8, 2>::new();
        ring.push(1);
        ring.clear();
        assert!(ring.is_empty());
        assert_eq!(ring.last(), None);
    }
}
