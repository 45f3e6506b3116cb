//! Fixed-size free-list pools, one per inner-node class (spec §4.C).
//!
//! Each pool is a pure performance layer over [`RangeAllocator`]: it batches
//! allocation and freeing of same-size records so the common case is an
//! O(1) cache pop/push instead of a tree walk through the range allocator.
//! Correctness of the tree never depends on pool behaviour beyond "alloc and
//! free of the same class are paired".

use crate::allocator::RangeAllocator;

pub struct Pool {
    node_size: u64,
    chunk: usize,
    cache: Vec<u64>,
}

impl Pool {
    pub fn new(node_size: u64) -> Self {
        let chunk = std::cmp::max(8, 4096 / node_size.max(1) as usize);
        Pool {
            node_size,
            chunk,
            cache: Vec::new(),
        }
    }

    pub fn alloc(&mut self, range: &mut RangeAllocator) -> u64 {
        if let Some(addr) = self.cache.pop() {
            return addr;
        }
        let base = range.alloc(self.node_size * self.chunk as u64);
        for i in 1..self.chunk as u64 {
            self.cache.push(base + i * self.node_size);
        }
        base
    }

    /// Push a freed record back into the cache. When the cache grows past
    /// twice its chunk size, release the upper half (highest addresses
    /// first, to favour `shrink()` being able to trim the stream tail) back
    /// to the range allocator as merged address ranges.
    pub fn free(&mut self, addr: u64, range: &mut RangeAllocator) {
        self.cache.push(addr);
        if self.cache.len() > self.chunk * 2 {
            self.cache.sort_unstable();
            let half = self.cache.len() / 2;
            let released: Vec<u64> = self.cache.split_off(half);
            for &a in released.iter().rev() {
                range.free(a, self.node_size);
            }
        }
    }

    #[cfg(test)]
    pub fn cached(&self) -> usize {
        self.cache.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_bulk_fetches_then_drains_cache() {
        let mut range = RangeAllocator::new(0);
        let mut pool = Pool::new(64); // chunk = max(8, 4096/64) = 64
        let first = pool.alloc(&mut range);
        assert_eq!(first, 0);
        assert_eq!(pool.cached(), 63);
        let second = pool.alloc(&mut range);
        assert_eq!(second, 63 * 64);
        assert_eq!(pool.cached(), 62);
    }

    #[test]
    fn free_releases_upper_half_once_cache_saturates() {
        let mut range = RangeAllocator::new(0);
        let mut pool = Pool::new(512); // chunk = max(8, 4096/512) = 8
        let mut addrs = Vec::new();
        for _ in 0..8 {
            addrs.push(pool.alloc(&mut range));
        }
        for &a in &addrs {
            pool.free(a, &mut range);
        }
        // cache held <= 2*chunk entries without spilling yet (8 <= 16).
        assert!(pool.cached() <= 16);
    }
}
