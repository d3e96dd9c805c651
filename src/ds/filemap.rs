//! Directory Service file-map (spec §4.5): a hash table keyed by
//! `(owner, filename)` with 256 bucket locks and a separate count lock.
//! Iteration acquires every bucket lock to provide a consistent view;
//! callers must not perform any operation that itself takes a bucket lock
//! while iterating.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;

use crate::model::FileId;

const BUCKETS: usize = 256;

#[derive(Debug, Clone)]
pub struct FileLocation {
    pub primary: u32,
    pub backup: Option<u32>,
}

pub struct FileMap {
    buckets: Vec<Mutex<Vec<(FileId, FileLocation)>>>,
    count: Mutex<usize>,
}

impl FileMap {
    pub fn new() -> Self {
        Self { buckets: (0..BUCKETS).map(|_| Mutex::new(Vec::new())).collect(), count: Mutex::new(0) }
    }

    fn bucket_index(id: &FileId) -> usize {
        let mut hasher = DefaultHasher::new();
        id.hash(&mut hasher);
        hasher.finish() as usize % BUCKETS
    }

    pub fn insert(&self, id: FileId, location: FileLocation) {
        let mut bucket = self.buckets[Self::bucket_index(&id)].lock().unwrap();
        match bucket.iter_mut().find(|(existing, _)| *existing == id) {
            Some(slot) => slot.1 = location,
            None => {
                bucket.push((id, location));
                *self.count.lock().unwrap() += 1;
            }
        }
    }

    pub fn search(&self, id: &FileId) -> Option<FileLocation> {
        let bucket = self.buckets[Self::bucket_index(id)].lock().unwrap();
        bucket.iter().find(|(existing, _)| existing == id).map(|(_, loc)| loc.clone())
    }

    pub fn contains(&self, id: &FileId) -> bool {
        self.search(id).is_some()
    }

    pub fn delete(&self, id: &FileId) -> bool {
        let mut bucket = self.buckets[Self::bucket_index(id)].lock().unwrap();
        if let Some(pos) = bucket.iter().position(|(existing, _)| existing == id) {
            bucket.remove(pos);
            *self.count.lock().unwrap() -= 1;
            true
        } else {
            false
        }
    }

    /// Finds any owner of `filename`, used by the redirect flow's
    /// shared-file case (spec §4.2 step c).
    pub fn find_owner_of_filename(&self, filename: &str) -> Option<String> {
        for bucket in &self.buckets {
            let guard = bucket.lock().unwrap();
            if let Some((id, _)) = guard.iter().find(|(id, _)| id.filename == filename) {
                return Some(id.owner.clone());
            }
        }
        None
    }

    pub fn update_primary(&self, id: &FileId, primary: u32) {
        let mut bucket = self.buckets[Self::bucket_index(id)].lock().unwrap();
        if let Some(slot) = bucket.iter_mut().find(|(existing, _)| existing == id) {
            slot.1.primary = primary;
        }
    }

    pub fn update_backup(&self, id: &FileId, backup: Option<u32>) {
        let mut bucket = self.buckets[Self::bucket_index(id)].lock().unwrap();
        if let Some(slot) = bucket.iter_mut().find(|(existing, _)| existing == id) {
            slot.1.backup = backup;
        }
    }

    pub fn len(&self) -> usize {
        *self.count.lock().unwrap()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Acquires every bucket lock to provide a consistent view. Callers
    /// must not call back into any `FileMap` method from `f`.
    pub fn for_each_consistent(&self, mut f: impl FnMut(&FileId, &FileLocation)) {
        let guards: Vec<_> = self.buckets.iter().map(|b| b.lock().unwrap()).collect();
        for guard in &guards {
            for (id, loc) in guard.iter() {
                f(id, loc);
            }
        }
    }
}

impl Default for FileMap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_search_delete_round_trip() {
        let map = FileMap::new();
        let id = FileId::new("alice", "notes.txt");
        map.insert(id.clone(), FileLocation { primary: 1, backup: Some(2) });
        assert_eq!(map.len(), 1);
        assert!(map.contains(&id));
        assert!(map.delete(&id));
        assert!(!map.contains(&id));
        assert_eq!(map.len(), 0);
    }

    #[test]
    fn find_owner_of_filename_locates_shared_file() {
        let map = FileMap::new();
        let id = FileId::new("alice", "shared.txt");
        map.insert(id, FileLocation { primary: 0, backup: None });
        assert_eq!(map.find_owner_of_filename("shared.txt").as_deref(), Some("alice"));
        assert_eq!(map.find_owner_of_filename("missing.txt"), None);
    }
}
