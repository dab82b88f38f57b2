//! Replay buffer for terminal output.
//!
//! Keeps the last N bytes a session emitted so a reconnecting client can
//! be sent a scrollback snapshot instead of unbounded history.

use std::collections::VecDeque;

/// Fixed-capacity byte store that discards the oldest bytes on overflow.
#[derive(Debug)]
pub struct ReplayBuffer {
    buf: VecDeque<u8>,
    capacity: usize,
}

impl ReplayBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append bytes, dropping from the front whatever no longer fits.
    pub fn write(&mut self, data: &[u8]) {
        if self.capacity == 0 {
            return;
        }

        if data.len() >= self.capacity {
            // The new chunk alone fills the buffer; keep only its tail.
            self.buf.clear();
            self.buf.extend(&data[data.len() - self.capacity..]);
            return;
        }

        let overflow = (self.buf.len() + data.len()).saturating_sub(self.capacity);
        self.buf.drain(..overflow);
        self.buf.extend(data);
    }

    /// Current contents in chronological order; does not consume.
    pub fn snapshot(&self) -> Vec<u8> {
        self.buf.iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_within_capacity_kept_in_order() {
        let mut rb = ReplayBuffer::new(10);
        rb.write(b"abc");
        rb.write(b"def");
        assert_eq!(rb.snapshot(), b"abcdef");
        assert_eq!(rb.len(), 6);
    }

    #[test]
    fn snapshot_does_not_consume() {
        let mut rb = ReplayBuffer::new(10);
        rb.write(b"hello");
        assert_eq!(rb.snapshot(), b"hello");
        assert_eq!(rb.snapshot(), b"hello");
    }

    #[test]
    fn overflow_drops_oldest() {
        let mut rb = ReplayBuffer::new(5);
        rb.write(b"abcde");
        rb.write(b"fg");
        assert_eq!(rb.snapshot(), b"cdefg");
        assert_eq!(rb.len(), 5);
    }

    #[test]
    fn oversized_write_keeps_tail() {
        let mut rb = ReplayBuffer::new(4);
        rb.write(b"0123456789");
        assert_eq!(rb.snapshot(), b"6789");

        // And a subsequent small write still rotates correctly.
        rb.write(b"ab");
        assert_eq!(rb.snapshot(), b"89ab");
    }

    #[test]
    fn exact_capacity_write() {
        let mut rb = ReplayBuffer::new(4);
        rb.write(b"wxyz");
        assert_eq!(rb.snapshot(), b"wxyz");
    }

    #[test]
    fn empty_buffer() {
        let rb = ReplayBuffer::new(8);
        assert!(rb.is_empty());
        assert_eq!(rb.snapshot(), Vec::<u8>::new());
    }

    #[test]
    fn zero_capacity() {
        let mut rb = ReplayBuffer::new(0);
        rb.write(b"data");
        assert!(rb.is_empty());
    }
}
