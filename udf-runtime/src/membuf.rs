//! Size-classed buffer cache for marshalling values across the host ABI
//! boundary. Pure amortization: correctness never depends on a hit here.

use parking_lot::Mutex;

const CLASSES: [usize; 6] = [1024, 4096, 16384, 65536, 262144, 1048576];
const MAX_PER_CLASS: usize = 64;

/// Buffer cache keyed by fixed capacity classes `{1K, 4K, 16K, 64K, 256K, 1M}`.
pub struct MemoryPool {
    free_lists: Vec<Mutex<Vec<Vec<u8>>>>,
}

impl Default for MemoryPool {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryPool {
    pub fn new() -> Self {
        Self {
            free_lists: CLASSES.iter().map(|_| Mutex::new(Vec::new())).collect(),
        }
    }

    fn class_for(n: usize) -> Option<usize> {
        CLASSES.iter().position(|&class| class >= n)
    }

    /// Return a buffer of at least `n` bytes, backed by the smallest class
    /// `>= n`, or a fresh allocation above the largest class.
    pub fn get(&self, n: usize) -> Vec<u8> {
        match Self::class_for(n) {
            Some(idx) => {
                let mut list = self.free_lists[idx].lock();
                list.pop().unwrap_or_else(|| Vec::with_capacity(CLASSES[idx]))
            }
            None => Vec::with_capacity(n),
        }
    }

    /// Return a buffer to its matching class's free list, or discard it if
    /// its capacity doesn't match any class or that class is full.
    pub fn put(&self, mut buf: Vec<u8>) {
        buf.clear();
        if let Some(idx) = CLASSES.iter().position(|&class| class == buf.capacity()) {
            let mut list = self.free_lists[idx].lock();
            if list.len() < MAX_PER_CLASS {
                list.push(buf);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_returns_smallest_fitting_class() {
        let pool = MemoryPool::new();
        let buf = pool.get(10);
        assert!(buf.capacity() >= 10);
        assert!(buf.capacity() <= 1024);
    }

    #[test]
    fn above_largest_class_allocates_fresh() {
        let pool = MemoryPool::new();
        let buf = pool.get(2_000_000);
        assert!(buf.capacity() >= 2_000_000);
    }

    #[test]
    fn put_then_get_reuses_buffer() {
        let pool = MemoryPool::new();
        let buf = pool.get(100);
        let capacity = buf.capacity();
        pool.put(buf);
        let reused = pool.get(100);
        assert_eq!(reused.capacity(), capacity);
    }
}
