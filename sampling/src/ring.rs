use std::collections::VecDeque;

use serde::{Serialize, Serializer};

/// Fixed-capacity FIFO. Pushing into a full ring evicts the oldest entry.
#[derive(Clone, Debug)]
pub struct RingBuffer<T> {
    values: VecDeque<T>,
    capacity: usize,
}

impl<T> RingBuffer<T> {
    /// `capacity` is validated upstream; a zero capacity keeps nothing.
    pub fn new(capacity: usize) -> Self {
        Self {
            values: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Appends `value`, returning the entry evicted to make room, if any.
    pub fn push(&mut self, value: T) -> Option<T> {
        if self.capacity == 0 {
            return Some(value);
        }

        let evicted = if self.values.len() >= self.capacity {
            self.values.pop_front()
        } else {
            None
        };
        self.values.push_back(value);
        evicted
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.values.len() >= self.capacity
    }

    pub fn oldest(&self) -> Option<&T> {
        self.values.front()
    }

    pub fn latest(&self) -> Option<&T> {
        self.values.back()
    }

    /// Oldest first.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + ExactSizeIterator {
        self.values.iter()
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }
}

impl<T: Clone> RingBuffer<T> {
    pub fn to_vec(&self) -> Vec<T> {
        self.values.iter().cloned().collect()
    }
}

impl<T: Serialize> Serialize for RingBuffer<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.values.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn evicts_oldest_first() {
        let mut r = RingBuffer::new(3);

        assert_eq!(r.push(1), None);
        assert_eq!(r.push(2), None);
        assert_eq!(r.push(3), None);
        assert!(r.is_full());

        assert_eq!(r.push(4), Some(1));
        assert_eq!(r.to_vec(), vec![2, 3, 4]);
        assert_eq!(r.oldest(), Some(&2));
        assert_eq!(r.latest(), Some(&4));
    }

    #[test]
    fn zero_capacity_keeps_nothing() {
        let mut r = RingBuffer::new(0);
        assert_eq!(r.push("a"), Some("a"));
        assert!(r.is_empty());
    }

    #[test]
    fn serializes_as_sequence() {
        let mut r = RingBuffer::new(2);
        r.push(1);
        r.push(2);
        r.push(3);
        assert_eq!(serde_json::to_string(&r).unwrap(), "[2,3]");
    }

    proptest! {
        #[test]
        fn keeps_exactly_the_last_capacity_values(capacity in 1usize..64, extra in 0usize..200) {
            let mut r = RingBuffer::new(capacity);
            let total = capacity + extra;
            for i in 0..total {
                r.push(i);
            }

            prop_assert_eq!(r.len(), capacity.min(total));
            let expected: Vec<usize> = (total.saturating_sub(capacity)..total).collect();
            prop_assert_eq!(r.to_vec(), expected);
        }
    }
}
