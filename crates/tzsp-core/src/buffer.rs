//! Fixed-capacity lossy ring buffer
//!
//! Producers never block and never fail: when the buffer is full the oldest
//! unread item is overwritten. Consumers see the last `capacity` unread items
//! in FIFO order.

use parking_lot::Mutex;

use crate::error::{Error, Result};

struct Slots<T> {
    items: Box<[Option<T>]>,
    read: usize,
    write: usize,
    len: usize,
    dropped: u64,
}

impl<T> Slots<T> {
    fn next(&self, index: usize) -> usize {
        (index + 1) % self.items.len()
    }
}

/// Thread-safe FIFO that overwrites its oldest unread item when full
pub struct RingBuffer<T> {
    slots: Mutex<Slots<T>>,
    capacity: usize,
}

impl<T> RingBuffer<T> {
    /// Create a buffer holding at most `capacity` items
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::InvalidCapacity { capacity });
        }

        let items = std::iter::repeat_with(|| None).take(capacity).collect();
        Ok(Self {
            slots: Mutex::new(Slots {
                items,
                read: 0,
                write: 0,
                len: 0,
                dropped: 0,
            }),
            capacity,
        })
    }

    /// Append an item, discarding the oldest unread item if the buffer is full
    pub fn enqueue(&self, item: T) {
        let mut slots = self.slots.lock();
        let write = slots.write;
        let overwritten = slots.items[write].replace(item).is_some();
        slots.write = slots.next(write);

        if overwritten {
            // An occupied write slot means the buffer was full and `read`
            // pointed at it; the oldest survivor is now the next slot.
            slots.read = slots.write;
            slots.dropped += 1;
        } else {
            slots.len += 1;
        }
    }

    /// Take the oldest unread item
    pub fn dequeue(&self) -> Option<T> {
        let mut slots = self.slots.lock();
        let read = slots.read;
        let item = slots.items[read].take()?;
        slots.read = slots.next(read);
        slots.len -= 1;
        Some(item)
    }

    /// Maximum number of unread items
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of unread items
    pub fn len(&self) -> usize {
        self.slots.lock().len
    }

    /// Check whether there is nothing to read
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of unread items lost to overwrites so far
    pub fn dropped(&self) -> u64 {
        self.slots.lock().dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain<T>(buffer: &RingBuffer<T>) -> Vec<T> {
        std::iter::from_fn(|| buffer.dequeue()).collect()
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(matches!(
            RingBuffer::<u8>::new(0),
            Err(Error::InvalidCapacity { capacity: 0 })
        ));
    }

    #[test]
    fn test_fifo_within_capacity() {
        let buffer = RingBuffer::new(4).unwrap();
        for i in 0..4 {
            buffer.enqueue(i);
        }
        assert_eq!(buffer.len(), 4);
        assert_eq!(drain(&buffer), vec![0, 1, 2, 3]);
        assert_eq!(buffer.dequeue(), None);
        assert_eq!(buffer.dropped(), 0);
    }

    #[test]
    fn test_overflow_drops_oldest() {
        let buffer = RingBuffer::new(3).unwrap();
        for i in 1..=5 {
            buffer.enqueue(i);
        }
        assert_eq!(buffer.dropped(), 2);
        assert_eq!(buffer.len(), 3);
        assert_eq!(drain(&buffer), vec![3, 4, 5]);
        assert_eq!(buffer.dequeue(), None);
    }

    #[test]
    fn test_interleaved_after_overflow() {
        let buffer = RingBuffer::new(2).unwrap();
        buffer.enqueue('a');
        buffer.enqueue('b');
        buffer.enqueue('c');
        assert_eq!(buffer.dequeue(), Some('b'));
        buffer.enqueue('d');
        assert_eq!(drain(&buffer), vec!['c', 'd']);
    }

    #[test]
    fn test_dequeue_empty_is_idempotent() {
        let buffer = RingBuffer::<String>::new(1).unwrap();
        for _ in 0..3 {
            assert_eq!(buffer.dequeue(), None);
        }
        assert!(buffer.is_empty());

        buffer.enqueue("x".to_string());
        assert_eq!(buffer.dequeue().as_deref(), Some("x"));
        assert_eq!(buffer.dequeue(), None);
    }
}
