//! Fixed-capacity ring buffer for stream resynchronization
//!
//! Provides O(1) consume operations instead of O(n) Vec::drain().

/// Fixed-capacity ring buffer with O(1) advance
///
/// Generic const parameter `N` sets buffer capacity.
pub struct RingBuffer<const N: usize = 1024> {
    data: [u8; N],
    head: usize, // Write position (next empty slot)
    tail: usize, // Read position (first valid byte)
    len: usize,
}

impl<const N: usize> RingBuffer<N> {
    pub const fn new() -> Self {
        Self {
            data: [0u8; N],
            head: 0,
            tail: 0,
            len: 0,
        }
    }

    /// Append bytes to the buffer
    ///
    /// Bytes that would overflow are dropped; returns how many were kept.
    #[inline]
    pub fn extend(&mut self, bytes: &[u8]) -> usize {
        let mut kept = 0;
        for &b in bytes {
            if self.len == N {
                break;
            }
            self.data[self.head] = b;
            self.head = (self.head + 1) % N;
            self.len += 1;
            kept += 1;
        }
        kept
    }

    /// Consume n bytes from the front
    #[inline]
    pub fn advance(&mut self, n: usize) {
        let n = n.min(self.len);
        self.tail = (self.tail + n) % N;
        self.len -= n;
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn clear(&mut self) {
        self.head = 0;
        self.tail = 0;
        self.len = 0;
    }

    /// Find a single marker byte, returns offset from tail
    pub fn find_byte(&self, b: u8) -> Option<usize> {
        (0..self.len).find(|&i| self.data[(self.tail + i) % N] == b)
    }

    /// Copy `M` bytes starting at `start` out of the buffer
    pub fn copy_array<const M: usize>(&self, start: usize) -> Option<[u8; M]> {
        if start + M > self.len {
            return None;
        }
        let mut out = [0u8; M];
        for (i, slot) in out.iter_mut().enumerate() {
            *slot = self.data[(self.tail + start + i) % N];
        }
        Some(out)
    }
}

impl<const N: usize> Default for RingBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}
