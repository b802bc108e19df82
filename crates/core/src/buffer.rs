#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferStats {
    pub underflows: u64,
    pub overflows: u64,
}

/// Fixed-capacity ring of interleaved samples between the mix and the sink.
///
/// `pop` hands out at most what is filled and `put` stores at most what is
/// free; the shortfall in either direction is counted, never fatal.
#[derive(Debug)]
pub struct PlaybackBuffer {
    data: Vec<i32>,
    read: usize,
    filled: usize,
    warnings: bool,
    stats: BufferStats,
}

impl PlaybackBuffer {
    pub fn new(capacity: usize, warnings: bool) -> Self {
        Self {
            data: vec![0; capacity],
            read: 0,
            filled: 0,
            warnings,
            stats: BufferStats::default(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn filled(&self) -> usize {
        self.filled
    }

    pub fn free(&self) -> usize {
        self.capacity() - self.filled
    }

    pub fn stats(&self) -> BufferStats {
        self.stats
    }

    pub fn clear(&mut self) {
        self.read = 0;
        self.filled = 0;
    }

    /// Take up to `n` of the oldest samples.
    pub fn pop(&mut self, n: usize) -> Vec<i32> {
        let count = n.min(self.filled);
        if count < n {
            self.stats.underflows += 1;
            if self.warnings {
                log::warn!("playback buffer underflow: wanted {n} samples, had {count}");
            }
        }

        let mut out = Vec::with_capacity(count);
        if count > 0 {
            let first = count.min(self.capacity() - self.read);
            out.extend_from_slice(&self.data[self.read..self.read + first]);
            out.extend_from_slice(&self.data[..count - first]);
            self.read = (self.read + count) % self.capacity();
            self.filled -= count;
        }
        out
    }

    /// Store as much of `samples` as fits and return the part that did not.
    pub fn put<'a>(&mut self, samples: &'a [i32]) -> &'a [i32] {
        let count = samples.len().min(self.free());
        let (stored, rest) = samples.split_at(count);
        if !rest.is_empty() {
            self.stats.overflows += 1;
            if self.warnings {
                log::warn!(
                    "playback buffer overflow: dropping {} of {} samples",
                    rest.len(),
                    samples.len()
                );
            }
        }

        if count > 0 {
            let capacity = self.capacity();
            let write = (self.read + self.filled) % capacity;
            let first = count.min(capacity - write);
            self.data[write..write + first].copy_from_slice(&stored[..first]);
            self.data[..count - first].copy_from_slice(&stored[first..]);
            self.filled += count;
        }
        rest
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order_across_wraparound() {
        let mut buffer = PlaybackBuffer::new(5, false);
        assert!(buffer.put(&[1, 2, 3, 4]).is_empty());
        assert_eq!(buffer.pop(3), vec![1, 2, 3]);
        assert!(buffer.put(&[5, 6, 7, 8]).is_empty());
        assert_eq!(buffer.filled(), 5);
        assert_eq!(buffer.pop(5), vec![4, 5, 6, 7, 8]);
        assert_eq!(buffer.filled(), 0);
    }

    #[test]
    fn test_underflow_returns_what_is_there() {
        let mut buffer = PlaybackBuffer::new(8, false);
        buffer.put(&[1, 2]);
        assert_eq!(buffer.pop(5), vec![1, 2]);
        assert_eq!(buffer.stats().underflows, 1);
        assert!(buffer.pop(1).is_empty());
        assert_eq!(buffer.stats().underflows, 2);
    }

    #[test]
    fn test_overflow_returns_remainder() {
        let mut buffer = PlaybackBuffer::new(4, false);
        buffer.put(&[1, 2, 3]);
        let rest = buffer.put(&[4, 5, 6]);
        assert_eq!(rest, &[5, 6]);
        assert_eq!(buffer.free(), 0);
        assert_eq!(buffer.stats().overflows, 1);
        assert_eq!(buffer.pop(4), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_clear_empties() {
        let mut buffer = PlaybackBuffer::new(4, false);
        buffer.put(&[1, 2, 3]);
        buffer.pop(1);
        buffer.clear();
        assert_eq!(buffer.filled(), 0);
        assert_eq!(buffer.free(), 4);
        buffer.put(&[9]);
        assert_eq!(buffer.pop(1), vec![9]);
    }

    #[test]
    fn test_zero_capacity_stores_nothing() {
        let mut buffer = PlaybackBuffer::new(0, false);
        assert_eq!(buffer.put(&[1, 2]), &[1, 2]);
        assert!(buffer.pop(2).is_empty());
    }
}
