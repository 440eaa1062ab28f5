/// Errors raised by [`RingBuffer`] operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RingBufferError {
    #[error("Ring buffer full: cannot write {requested} elements ({available} free)")]
    BufferFull { requested: usize, available: usize },

    #[error("Read past end of ring: requested {requested} elements ({available} readable)")]
    OutOfRange { requested: usize, available: usize },
}

/// Fixed-capacity circular buffer with a movable read position.
///
/// The buffer tracks a committed read frontier plus a signed seek offset
/// relative to it. A negative offset rewinds into elements that were already
/// consumed but are still physically resident; those elements are counted as
/// live again, so writes cannot overwrite them until they have been re-read.
/// Capacity is only released when a read carries the seek offset past the
/// frontier.
#[derive(Debug)]
pub struct RingBuffer<T> {
    storage: Box<[T]>,
    write_pos: usize,
    read_pos: usize,
    /// Elements between the frontier and the write cursor
    unread: usize,
    /// Always <= 0
    seek_offset: isize,
    total_written: u64,
}

impl<T: Copy + Default + PartialEq> RingBuffer<T> {
    /// Creates a buffer holding at most `capacity` elements
    pub fn new(capacity: usize) -> Self {
        Self {
            storage: vec![T::default(); capacity].into_boxed_slice(),
            write_pos: 0,
            read_pos: 0,
            unread: 0,
            seek_offset: 0,
            total_written: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Free slots that a write may fill without touching live data
    pub fn available_write(&self) -> usize {
        self.capacity() - self.unread - self.rewound()
    }

    /// Elements between the current seek position and the write cursor
    pub fn available_read(&self) -> usize {
        self.unread + self.rewound()
    }

    /// Total number of elements ever written
    pub fn total_written(&self) -> u64 {
        self.total_written
    }

    /// Current seek offset relative to the read frontier
    pub fn seek_offset(&self) -> isize {
        self.seek_offset
    }

    /// Appends `data` at the write cursor, wrapping if needed
    pub fn write(&mut self, data: &[T]) -> Result<(), RingBufferError> {
        let available = self.available_write();
        if data.len() > available {
            return Err(RingBufferError::BufferFull {
                requested: data.len(),
                available,
            });
        }

        let capacity = self.capacity();
        let first = data.len().min(capacity - self.write_pos);
        self.storage[self.write_pos..self.write_pos + first].copy_from_slice(&data[..first]);
        self.storage[..data.len() - first].copy_from_slice(&data[first..]);

        if capacity > 0 {
            self.write_pos = (self.write_pos + data.len()) % capacity;
        }
        self.unread += data.len();
        self.total_written += data.len() as u64;

        Ok(())
    }

    /// Moves the seek offset by `delta` and returns the clamped offset.
    ///
    /// The offset never goes past the frontier, never before the oldest
    /// consumed element still resident, and never before the start of the
    /// stream.
    pub fn seek(&mut self, delta: isize) -> isize {
        let consumed = self.total_written - self.unread as u64;
        let resident = (self.capacity() - self.unread) as u64;
        let floor = consumed.min(resident).min(isize::MAX as u64) as isize;

        self.seek_offset = self.seek_offset.saturating_add(delta).clamp(-floor, 0);
        self.seek_offset
    }

    /// Copies `amount` elements from the seek position and consumes them
    pub fn read(&mut self, amount: usize) -> Result<Vec<T>, RingBufferError> {
        let data = self.peek_slice(amount)?;
        self.commit(amount);
        Ok(data)
    }

    /// Consumes `amount` elements from the seek position without copying
    pub fn skip(&mut self, amount: usize) -> Result<(), RingBufferError> {
        self.check_readable(amount)?;
        self.commit(amount);
        Ok(())
    }

    /// The element at the seek position, if any has been written
    pub fn peek(&self) -> Option<T> {
        if self.available_read() == 0 {
            return None;
        }
        Some(self.storage[self.effective_pos()])
    }

    /// Copies `amount` elements from the seek position without consuming
    pub fn peek_slice(&self, amount: usize) -> Result<Vec<T>, RingBufferError> {
        self.check_readable(amount)?;

        let capacity = self.capacity();
        let start = self.effective_pos();
        let first = amount.min(capacity - start);

        let mut data = Vec::with_capacity(amount);
        data.extend_from_slice(&self.storage[start..start + first]);
        data.extend_from_slice(&self.storage[..amount - first]);
        Ok(data)
    }

    /// Distance from the seek position to the first element equal to
    /// `value`, or `None` if it has not been written yet
    pub fn distance_to(&self, value: T) -> Option<usize> {
        let capacity = self.capacity();
        let start = self.effective_pos();
        (0..self.available_read()).find(|offset| self.storage[(start + offset) % capacity] == value)
    }

    fn rewound(&self) -> usize {
        self.seek_offset.unsigned_abs()
    }

    fn effective_pos(&self) -> usize {
        let capacity = self.capacity();
        if capacity == 0 {
            return 0;
        }
        (self.read_pos + capacity - self.rewound()) % capacity
    }

    fn check_readable(&self, amount: usize) -> Result<(), RingBufferError> {
        let available = self.available_read();
        if amount > available {
            return Err(RingBufferError::OutOfRange {
                requested: amount,
                available,
            });
        }
        Ok(())
    }

    fn commit(&mut self, amount: usize) {
        let advanced = self.seek_offset + amount as isize;
        if advanced > 0 {
            let advanced = advanced as usize;
            self.read_pos = (self.read_pos + advanced) % self.capacity();
            self.unread -= advanced;
            self.seek_offset = 0;
        } else {
            self.seek_offset = advanced;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_read_roundtrip() {
        let mut ring = RingBuffer::<u8>::new(16);
        ring.write(b"hello world").unwrap();

        assert_eq!(ring.available_read(), 11);
        assert_eq!(ring.read(11).unwrap(), b"hello world".to_vec());
        assert_eq!(ring.available_write(), 16);
    }

    #[test]
    fn test_roundtrip_across_wrap() {
        let mut ring = RingBuffer::<u8>::new(8);
        ring.write(b"abcdef").unwrap();
        ring.read(6).unwrap();

        // Write pointer is at 6, so this wraps
        ring.write(b"0123456").unwrap();
        assert_eq!(ring.peek(), Some(b'0'));
        assert_eq!(ring.read(7).unwrap(), b"0123456".to_vec());
    }

    #[test]
    fn test_backpressure() {
        let mut ring = RingBuffer::<i32>::new(4);
        ring.write(&[1, 2, 3, 4]).unwrap();

        assert_eq!(ring.available_write(), 0);
        assert_eq!(
            ring.write(&[5]),
            Err(RingBufferError::BufferFull {
                requested: 1,
                available: 0
            })
        );

        ring.read(3).unwrap();
        assert_eq!(ring.available_write(), 3);
        ring.write(&[5, 6, 7]).unwrap();
        assert_eq!(ring.read(4).unwrap(), vec![4, 5, 6, 7]);
    }

    #[test]
    fn test_read_past_end() {
        let mut ring = RingBuffer::<u8>::new(8);
        ring.write(b"abc").unwrap();

        assert!(matches!(
            ring.read(4),
            Err(RingBufferError::OutOfRange { requested: 4, available: 3 })
        ));
        assert!(ring.peek_slice(4).is_err());
        // Failed reads leave the buffer untouched
        assert_eq!(ring.read(3).unwrap(), b"abc".to_vec());
    }

    #[test]
    fn test_seek_bounds() {
        let mut ring = RingBuffer::<u8>::new(8);

        // Nothing written yet, nothing to rewind into
        assert_eq!(ring.seek(-5), 0);
        assert_eq!(ring.seek(3), 0);

        ring.write(b"abcd").unwrap();
        assert_eq!(ring.seek(-2), 0);

        ring.read(4).unwrap();
        assert_eq!(ring.seek(-10), -4);
        assert_eq!(ring.seek(2), -2);
        assert_eq!(ring.seek(100), 0);

        // Fill most of the ring so only two consumed bytes stay resident
        ring.write(b"012345").unwrap();
        let offset = ring.seek(-8);
        assert_eq!(offset, -2);
        assert!(offset >= ring.available_write() as isize - ring.capacity() as isize);
        assert!(offset >= -(ring.total_written() as isize));
    }

    #[test]
    fn test_seek_then_reread() {
        let mut ring = RingBuffer::<u8>::new(8);
        ring.write(b"abcdef").unwrap();
        ring.read(6).unwrap();

        assert_eq!(ring.seek(-3), -3);
        assert_eq!(ring.available_read(), 3);
        assert_eq!(ring.read(3).unwrap(), b"def".to_vec());
        assert_eq!(ring.seek_offset(), 0);
        assert_eq!(ring.available_read(), 0);
    }

    #[test]
    fn test_rewound_data_is_protected() {
        let mut ring = RingBuffer::<u8>::new(8);
        ring.write(b"abcdef").unwrap();
        ring.read(6).unwrap();
        assert_eq!(ring.available_write(), 8);

        ring.seek(-4);
        assert_eq!(ring.available_write(), 4);
        assert!(ring.write(b"WXYZQ").is_err());

        ring.write(b"WXYZ").unwrap();
        assert_eq!(ring.read(8).unwrap(), b"cdefWXYZ".to_vec());
    }

    #[test]
    fn test_partial_reread_keeps_window() {
        let mut ring = RingBuffer::<u8>::new(8);
        ring.write(b"abcd").unwrap();
        ring.read(4).unwrap();
        ring.write(b"ef").unwrap();

        ring.seek(-3);
        assert_eq!(ring.read(1).unwrap(), b"b".to_vec());
        assert_eq!(ring.seek_offset(), -2);
        assert_eq!(ring.available_write(), 4);

        // Reading past the frontier frees the space again
        assert_eq!(ring.read(4).unwrap(), b"cdef".to_vec());
        assert_eq!(ring.available_write(), 8);
    }

    #[test]
    fn test_peek_is_non_destructive() {
        let mut ring = RingBuffer::<u8>::new(8);
        assert_eq!(ring.peek(), None);

        ring.write(b"xyz").unwrap();
        assert_eq!(ring.peek(), Some(b'x'));
        assert_eq!(ring.peek_slice(2).unwrap(), b"xy".to_vec());
        assert_eq!(ring.available_read(), 3);
        assert_eq!(ring.available_write(), 5);
    }

    #[test]
    fn test_distance_to() {
        let mut ring = RingBuffer::<u8>::new(8);
        ring.write(b"ab\0cd").unwrap();

        assert_eq!(ring.distance_to(0), Some(2));
        assert_eq!(ring.distance_to(b'a'), Some(0));
        assert_eq!(ring.distance_to(b'z'), None);

        ring.skip(3).unwrap();
        assert_eq!(ring.distance_to(0), None);

        // Wrapped data is scanned too
        ring.write(b"efg\0").unwrap();
        assert_eq!(ring.distance_to(0), Some(5));
    }

    #[test]
    fn test_generic_elements() {
        let mut ring = RingBuffer::<char>::new(3);
        ring.write(&['a', 'b']).unwrap();
        assert_eq!(ring.distance_to('b'), Some(1));
        assert_eq!(ring.read(2).unwrap(), vec!['a', 'b']);
    }
}
