//! Bounded circular byte buffer with scatter/gather read and write cursors.
//!
//! Mirrors `cnetpp::tcp::RingBuffer`: a single contiguous allocation, two
//! indices `begin`/`end` taken modulo capacity, and a running `size`. The
//! buffer is not thread-safe on its own — callers serialize access (the
//! shard thread for `recv_buffer`, the send-queue spinlock for queued send
//! buffers).

/// A growable ring buffer used for both receive and send-side buffering.
#[derive(Debug)]
pub struct RingBuffer {
    buffer: Vec<u8>,
    begin: usize,
    end: usize,
    size: usize,
}

impl RingBuffer {
    /// Allocate a ring buffer with the given initial capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: vec![0u8; capacity],
            begin: 0,
            end: 0,
            size: 0,
        }
    }

    /// Total allocated capacity.
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Number of readable bytes currently stored.
    pub fn len(&self) -> usize {
        self.size
    }

    /// True iff no bytes are stored.
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// True iff the buffer has no writable space left.
    pub fn is_full(&self) -> bool {
        self.size == self.capacity()
    }

    /// Grow the buffer to `new_capacity`, compacting existing data to start
    /// at offset 0. Fails (no change) if `new_capacity < self.len()`.
    pub fn resize(&mut self, new_capacity: usize) -> bool {
        if new_capacity < self.size {
            return false;
        }
        self.compact();
        self.buffer.resize(new_capacity, 0);
        self.begin = 0;
        true
    }

    /// Rotate the backing storage so the readable region starts at index 0.
    /// Equivalent to `cnetpp`'s `Reform`, expressed as a single rotation
    /// since the readable bytes occupy `[begin, capacity) ++ [0, end)`.
    fn compact(&mut self) {
        if self.begin == 0 {
            return;
        }
        self.buffer.rotate_left(self.begin);
        self.begin = 0;
        self.end = self.size;
    }

    /// Up to two mutable slices covering all writable space, in write
    /// order. The second slice is empty when the writable region is
    /// contiguous.
    pub fn write_slices(&mut self) -> (&mut [u8], &mut [u8]) {
        if self.is_full() {
            return (&mut [][..], &mut [][..]);
        }
        let capacity = self.capacity();
        if self.end >= self.begin {
            let (head, tail) = self.buffer.split_at_mut(self.end);
            (tail, &mut head[..self.begin])
        } else {
            (&mut self.buffer[self.end..self.begin], &mut [][..])
        }
    }

    /// Advance `end` and `size` after writing `n` bytes into the slices
    /// returned by [`write_slices`](Self::write_slices).
    pub fn commit_write(&mut self, n: usize) {
        debug_assert!(n <= self.capacity() - self.size);
        let capacity = self.capacity();
        self.size += n;
        if self.end >= self.begin {
            if n < capacity - self.end {
                self.end += n;
            } else {
                self.end = n + self.end - capacity;
            }
        } else {
            self.end += n;
        }
    }

    /// Up to two slices covering all readable bytes, in read order. The
    /// second slice is empty when the readable region is contiguous.
    pub fn read_slices(&self) -> (&[u8], &[u8]) {
        if self.is_empty() {
            return (&[][..], &[][..]);
        }
        if self.end <= self.begin {
            (&self.buffer[self.begin..], &self.buffer[..self.end])
        } else {
            (&self.buffer[self.begin..self.end], &[][..])
        }
    }

    /// Advance `begin` and shrink `size` after consuming `n` bytes from the
    /// slices returned by [`read_slices`](Self::read_slices).
    pub fn commit_read(&mut self, n: usize) {
        debug_assert!(n <= self.size);
        let capacity = self.capacity();
        self.size -= n;
        if self.end <= self.begin {
            if n < capacity - self.begin {
                self.begin += n;
            } else {
                self.begin = n + self.begin - capacity;
            }
        } else {
            self.begin += n;
        }
    }

    /// Append `data` to the buffer. Returns `false` (no change) if there is
    /// not enough writable space.
    pub fn write(&mut self, data: &[u8]) -> bool {
        if data.is_empty() {
            return true;
        }
        if data.len() > self.capacity() - self.size {
            return false;
        }
        let capacity = self.capacity();
        self.size += data.len();
        if self.end >= self.begin {
            if data.len() <= capacity - self.end {
                self.buffer[self.end..self.end + data.len()].copy_from_slice(data);
                self.end += data.len();
            } else {
                let first = capacity - self.end;
                self.buffer[self.end..capacity].copy_from_slice(&data[..first]);
                let remaining = data.len() - first;
                self.buffer[..remaining].copy_from_slice(&data[first..]);
                self.end = remaining;
            }
        } else {
            self.buffer[self.end..self.end + data.len()].copy_from_slice(data);
            self.end += data.len();
        }
        true
    }

    /// Read exactly `n` bytes out of the buffer, advancing the read cursor.
    /// Returns `None` if fewer than `n` bytes are available.
    pub fn read(&mut self, n: usize) -> Option<Vec<u8>> {
        if n == 0 {
            return Some(Vec::new());
        }
        if self.size < n {
            return None;
        }
        let mut out = Vec::with_capacity(n);
        let capacity = self.capacity();
        if self.end <= self.begin {
            if n <= capacity - self.begin {
                out.extend_from_slice(&self.buffer[self.begin..self.begin + n]);
            } else {
                out.extend_from_slice(&self.buffer[self.begin..capacity]);
                out.extend_from_slice(&self.buffer[..n + self.begin - capacity]);
            }
        } else {
            out.extend_from_slice(&self.buffer[self.begin..self.begin + n]);
        }
        self.commit_read(n);
        Some(out)
    }

    /// Read every readable byte, leaving the buffer empty.
    pub fn read_all(&mut self) -> Vec<u8> {
        self.read(self.size).unwrap_or_default()
    }

    /// Compact the readable region to be contiguous, then search it for
    /// `delimiter`. Returns the prefix preceding the delimiter, excluding
    /// the delimiter itself. Never advances `begin`/`end` — a repeated call
    /// with the same buffer contents returns the same result.
    pub fn find(&mut self, delimiter: &[u8]) -> Option<&[u8]> {
        if self.size == 0 {
            return None;
        }
        self.compact();
        let haystack = &self.buffer[self.begin..self.begin + self.size];
        find_subslice(haystack, delimiter).map(|idx| &haystack[..idx])
    }

    /// Swap the contents of two ring buffers.
    pub fn swap(&mut self, other: &mut Self) {
        std::mem::swap(&mut self.buffer, &mut other.buffer);
        std::mem::swap(&mut self.begin, &mut other.begin);
        std::mem::swap(&mut self.end, &mut other.end);
        std::mem::swap(&mut self.size, &mut other.size);
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn round_trip() {
        let mut buf = RingBuffer::new(16);
        assert!(buf.write(b"hello world"));
        assert_eq!(buf.read(11).unwrap(), b"hello world");
    }

    #[test]
    fn write_fails_when_too_large() {
        let mut buf = RingBuffer::new(4);
        assert!(!buf.write(b"hello"));
        assert_eq!(buf.len(), 0);
    }

    #[test]
    fn find_is_idempotent() {
        let mut buf = RingBuffer::new(16);
        buf.write(b"abc,def");
        let first = buf.find(b",").map(|s| s.to_vec());
        let second = buf.find(b",").map(|s| s.to_vec());
        assert_eq!(first, Some(b"abc".to_vec()));
        assert_eq!(first, second);
        assert_eq!(buf.len(), 7, "find must not consume bytes");
    }

    #[test]
    fn wrap_and_find() {
        // S6: capacity 10, write "abcdefghij", read 6, write "abc", find('b').
        let mut buf = RingBuffer::new(10);
        assert!(buf.write(b"abcdefghij"));
        assert_eq!(buf.read(6).unwrap(), b"abcdef");
        assert!(buf.write(b"abc"));
        let found = buf.find(b"b").unwrap().to_vec();
        assert_eq!(found, b"ghija");
    }

    #[test]
    fn resize_compacts_wrapped_region() {
        let mut buf = RingBuffer::new(8);
        assert!(buf.write(b"abcdefgh"));
        assert_eq!(buf.read(5).unwrap(), b"abcde");
        assert!(buf.write(b"xyz"));
        assert!(buf.resize(16));
        assert_eq!(buf.capacity(), 16);
        assert_eq!(buf.read_all(), b"fghxyz");
    }

    #[test]
    fn scatter_gather_positions_sum_to_totals() {
        let mut buf = RingBuffer::new(8);
        buf.write(b"abcdefgh");
        buf.read(5);
        buf.write(b"xy");
        let (a, b) = buf.read_slices();
        assert_eq!(a.len() + b.len(), buf.len());
        let (wa, wb) = buf.write_slices();
        assert_eq!(wa.len() + wb.len(), buf.capacity() - buf.len());
    }

    proptest::proptest! {
        /// Any sequence of small writes/reads against a fixed-capacity
        /// buffer round-trips the bytes actually read back out, regardless
        /// of how many times the write/read cursors have wrapped.
        #[test]
        fn write_read_round_trips_under_random_traffic(
            ops in proptest::collection::vec((proptest::bool::ANY, proptest::collection::vec(any::<u8>(), 0..6)), 0..64)
        ) {
            let mut buf = RingBuffer::new(8);
            let mut model: std::collections::VecDeque<u8> = std::collections::VecDeque::new();
            for (do_write, bytes) in ops {
                if do_write {
                    if buf.write(&bytes) {
                        model.extend(bytes);
                    }
                } else {
                    let n = (bytes.len() % (buf.len() + 1)).min(buf.len());
                    if let Some(got) = buf.read(n) {
                        let expected: Vec<u8> = (0..n).map(|_| model.pop_front().unwrap()).collect();
                        prop_assert_eq!(got, expected);
                    }
                }
                prop_assert_eq!(buf.len(), model.len());
            }
        }
    }
}
