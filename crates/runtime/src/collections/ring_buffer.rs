//! A fixed-capacity FIFO buffer that evicts the oldest entry when full.
//!
//! [`RingBuffer`] backs the performance monitor's sample history: the
//! sampling thread appends, readers iterate oldest-first, and the length
//! never exceeds the capacity chosen at construction. `push` and all queries
//! are O(1); iteration is O(len).

use std::collections::VecDeque;

/// Fixed-capacity sequence storing elements in insertion order.
///
/// When a push would exceed the capacity, the oldest element is evicted
/// first, so `len() <= capacity()` holds at all times.
///
/// # Examples
///
/// ```rust
/// use casedesk_runtime::collections::RingBuffer;
///
/// let mut history = RingBuffer::new(3);
/// for value in 1..=4 {
///     history.push(value);
/// }
/// // capacity 3: the oldest entry (`1`) was evicted
/// assert_eq!(history.iter().copied().collect::<Vec<_>>(), vec![2, 3, 4]);
/// ```
#[derive(Clone, Debug)]
pub struct RingBuffer<T> {
    buf: VecDeque<T>,
    capacity: usize,
}

impl<T> RingBuffer<T> {
    /// Creates a buffer holding at most `capacity` elements.
    ///
    /// A capacity of zero is clamped to 1 so the buffer always has a slot.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { buf: VecDeque::with_capacity(capacity), capacity }
    }

    /// Appends an element, evicting the oldest one when the buffer is full.
    pub fn push(&mut self, item: T) {
        if self.is_full() {
            let _ = self.buf.pop_front();
        }
        self.buf.push_back(item);
    }

    /// Returns the number of elements currently stored.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Returns `true` when no elements are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Returns `true` when the next push will evict.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.buf.len() >= self.capacity
    }

    /// Returns the maximum number of elements the buffer can hold.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the most recently pushed element, if any.
    #[must_use]
    pub fn latest(&self) -> Option<&T> {
        self.buf.back()
    }

    /// Iterates over stored elements from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.buf.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::RingBuffer;

    #[test]
    fn push_past_capacity_evicts_oldest() {
        let mut buffer = RingBuffer::new(3);
        for value in 0..4 {
            buffer.push(value);
        }

        assert_eq!(buffer.len(), 3);
        assert!(buffer.is_full());
        assert_eq!(buffer.iter().copied().collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn iteration_is_oldest_first_after_wraparound() {
        let mut buffer = RingBuffer::new(3);
        for value in 0..7 {
            buffer.push(value);
        }

        assert_eq!(buffer.iter().copied().collect::<Vec<_>>(), vec![4, 5, 6]);
        assert_eq!(buffer.latest(), Some(&6));
    }

    #[test]
    fn zero_capacity_is_clamped_to_one() {
        let mut buffer = RingBuffer::new(0);
        assert_eq!(buffer.capacity(), 1);

        buffer.push('a');
        buffer.push('b');
        assert_eq!(buffer.iter().copied().collect::<Vec<_>>(), vec!['b']);
    }

    #[test]
    fn empty_buffer_reports_no_latest() {
        let buffer: RingBuffer<u64> = RingBuffer::new(4);
        assert!(buffer.is_empty());
        assert_eq!(buffer.latest(), None);
    }
}
