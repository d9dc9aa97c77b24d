use bytes::Bytes;
use moka::sync::Cache;

/// Bounded map from block number to the last bytes seen for that block.
///
/// Invalidation is all-or-nothing; there is no per-block expiry.
pub struct BlockCache {
    inner: Cache<u32, Bytes>,
}

impl BlockCache {
    pub fn new(capacity: u64) -> Self {
        Self {
            inner: Cache::builder().max_capacity(capacity).build(),
        }
    }

    pub fn get(&self, block: u32) -> Option<Bytes> {
        self.inner.get(&block)
    }

    pub fn insert(&self, block: u32, data: Bytes) {
        self.inner.insert(block, data);
    }

    pub fn contains(&self, block: u32) -> bool {
        self.inner.contains_key(&block)
    }

    pub fn invalidate_all(&self) {
        self.inner.invalidate_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalidate_all_drops_every_entry() {
        let cache = BlockCache::new(16);
        for b in 0..8u32 {
            cache.insert(b, Bytes::from(vec![b as u8; 4]));
        }
        assert_eq!(cache.get(3).unwrap().as_ref(), &[3u8; 4]);

        cache.invalidate_all();
        assert!((0..8u32).all(|b| !cache.contains(b)));

        cache.insert(3, Bytes::from_static(b"new!"));
        assert_eq!(cache.get(3).unwrap().as_ref(), b"new!");
    }
}
