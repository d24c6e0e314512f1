//! Fixed-capacity circular buffer used for every rolling history in the core.
//!
//! Indicators never grow their histories: once `capacity` values are held,
//! each push overwrites the oldest slot and hands the evicted value back.

#[derive(Clone, Debug, PartialEq)]
pub struct RingBuffer<T> {
    buffer: Vec<T>,
    head: usize,
    capacity: usize,
}

impl<T: Copy> RingBuffer<T> {
    /// A zero capacity is bumped to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buffer: Vec::with_capacity(capacity),
            head: 0,
            capacity,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.buffer.len() == self.capacity
    }

    /// Append a value, returning the evicted oldest value once full.
    pub fn push(&mut self, value: T) -> Option<T> {
        if self.buffer.len() < self.capacity {
            self.buffer.push(value);
            return None;
        }

        let old = std::mem::replace(&mut self.buffer[self.head], value);
        self.head += 1;
        if self.head == self.capacity {
            self.head = 0;
        }
        Some(old)
    }

    /// Value at `index` counted from the oldest element.
    pub fn get(&self, index: usize) -> Option<T> {
        let len = self.buffer.len();
        if index >= len {
            return None;
        }
        Some(self.buffer[(self.head + index) % len])
    }

    /// Value at `index` counted back from the newest element (0 = newest).
    pub fn back(&self, index: usize) -> Option<T> {
        let len = self.buffer.len();
        if index >= len {
            return None;
        }
        self.get(len - 1 - index)
    }

    pub fn first(&self) -> Option<T> {
        self.get(0)
    }

    pub fn last(&self) -> Option<T> {
        self.back(0)
    }

    /// Oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = T> + '_ {
        let len = self.buffer.len();
        (0..len).map(move |i| self.buffer[(self.head + i) % len])
    }
}

impl RingBuffer<f64> {
    pub fn sum(&self) -> f64 {
        self.iter().sum()
    }

    /// Mean of the held values, `None` when empty.
    pub fn mean(&self) -> Option<f64> {
        if self.is_empty() {
            None
        } else {
            Some(self.sum() / self.len() as f64)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::RingBuffer;

    #[test]
    fn test_filling_returns_none() {
        let mut rb = RingBuffer::new(3);
        assert_eq!(rb.push(1.0), None);
        assert_eq!(rb.push(2.0), None);
        assert_eq!(rb.push(3.0), None);
        assert!(rb.is_full());
    }

    #[test]
    fn test_full_evicts_oldest() {
        let mut rb = RingBuffer::new(3);
        rb.push(1.0);
        rb.push(2.0);
        rb.push(3.0);
        assert_eq!(rb.push(4.0), Some(1.0));
        assert_eq!(rb.push(5.0), Some(2.0));
        assert_eq!(rb.iter().collect::<Vec<_>>(), vec![3.0, 4.0, 5.0]);
    }

    #[test]
    fn test_indexing_after_wrap() {
        let mut rb = RingBuffer::new(2);
        for v in [1.0, 2.0, 3.0, 4.0, 5.0] {
            rb.push(v);
        }
        assert_eq!(rb.first(), Some(4.0));
        assert_eq!(rb.last(), Some(5.0));
        assert_eq!(rb.back(1), Some(4.0));
        assert_eq!(rb.back(2), None);
        assert_eq!(rb.get(2), None);
    }

    #[test]
    fn test_zero_capacity_holds_one() {
        let mut rb = RingBuffer::new(0);
        assert_eq!(rb.push(7.0), None);
        assert!(rb.is_full());
        assert_eq!(rb.push(8.0), Some(7.0));
        assert_eq!(rb.mean(), Some(8.0));
    }

    #[test]
    fn test_mean_and_sum() {
        let mut rb = RingBuffer::new(4);
        assert_eq!(rb.mean(), None);
        rb.push(2.0);
        rb.push(4.0);
        assert_eq!(rb.mean(), Some(3.0));
        assert_eq!(rb.sum(), 6.0);
        assert!(!rb.is_full());
    }
}
