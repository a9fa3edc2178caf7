use std::collections::VecDeque;

/// Fixed-capacity FIFO; pushing onto a full buffer evicts the oldest entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RingBuffer<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> RingBuffer<T> {
    /// An empty buffer that keeps the last `capacity` items.
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.items.len() == self.capacity
    }

    /// Append `item`, evicting the oldest entry when full.
    pub fn push(&mut self, item: T) {
        if self.capacity == 0 {
            return;
        }
        if self.items.len() == self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(item);
    }

    /// Oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    /// Item `index` positions after the oldest.
    pub fn get(&self, index: usize) -> Option<&T> {
        self.items.get(index)
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_evicts_oldest() {
        let mut rb = RingBuffer::new(2);
        rb.push(1);
        rb.push(2);
        rb.push(3);
        assert_eq!(rb.iter().copied().collect::<Vec<_>>(), vec![2, 3]);
        assert!(rb.is_full());
    }

    #[test]
    fn test_zero_capacity_stays_empty() {
        let mut rb = RingBuffer::new(0);
        rb.push(1);
        assert!(rb.is_empty());
    }

    proptest! {
        #[test]
        fn test_len_never_exceeds_capacity(
            capacity in 0usize..16,
            pushes in proptest::collection::vec(any::<u32>(), 0..64),
        ) {
            let mut rb = RingBuffer::new(capacity);
            for &p in &pushes {
                rb.push(p);
                prop_assert!(rb.len() <= capacity);
            }
            let expected: Vec<u32> = pushes.iter().rev().take(capacity).rev().copied().collect();
            prop_assert_eq!(rb.iter().copied().collect::<Vec<_>>(), expected);
        }
    }
}
