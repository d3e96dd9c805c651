//! Location cache (C5, spec §4.7): `"owner:filename" -> SN id`, bounded and
//! LRU-evicted. Not a source of truth — callers re-validate the returned
//! SN's online status before trusting a hit. Backed by `moka::sync::Cache`,
//! the teacher's declared but unwired dependency.

use moka::sync::Cache;

pub struct LocationCache {
    inner: Cache<String, u32>,
}

impl LocationCache {
    pub fn new(max_entries: u64) -> Self {
        Self { inner: Cache::builder().max_capacity(max_entries).build() }
    }

    pub fn get(&self, key: &str) -> Option<u32> {
        self.inner.get(key)
    }

    pub fn put(&self, key: String, sn_id: u32) {
        self.inner.insert(key, sn_id);
    }

    pub fn invalidate(&self, key: &str) {
        self.inner.invalidate(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_invalidate_round_trip() {
        let cache = LocationCache::new(16);
        cache.put("alice:notes.txt".to_string(), 3);
        assert_eq!(cache.get("alice:notes.txt"), Some(3));
        cache.invalidate("alice:notes.txt");
        assert_eq!(cache.get("alice:notes.txt"), None);
    }
}
