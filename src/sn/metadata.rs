//! Per-SN metadata store (spec §4.4): a two-level hash table keyed by
//! filename. The outer table has 1024 buckets, each guarded by its own
//! mutex and lazily holding an inner 64-bucket open-chained table. The
//! outer lock protects both the bucket slot and everything inside the
//! inner table; the inner table itself carries no locks of its own.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, UNIX_EPOCH};

use crate::error::Result;
use crate::model::FileMetadata;

const OUTER_BUCKETS: usize = 1024;
const INNER_BUCKETS: usize = 64;

struct InnerTable {
    buckets: Vec<Vec<(String, FileMetadata)>>,
}

impl InnerTable {
    fn new() -> Self {
        Self { buckets: (0..INNER_BUCKETS).map(|_| Vec::new()).collect() }
    }

    fn bucket_for(&self, filename: &str) -> usize {
        hash_str(filename) as usize % INNER_BUCKETS
    }

    fn get(&self, filename: &str) -> Option<&FileMetadata> {
        let bucket = &self.buckets[self.bucket_for(filename)];
        bucket.iter().find(|(name, _)| name == filename).map(|(_, meta)| meta)
    }

    fn insert(&mut self, filename: String, meta: FileMetadata) {
        let idx = self.bucket_for(&filename);
        let bucket = &mut self.buckets[idx];
        if let Some(slot) = bucket.iter_mut().find(|(name, _)| *name == filename) {
            slot.1 = meta;
        } else {
            bucket.push((filename, meta));
        }
    }

    fn remove(&mut self, filename: &str) -> Option<FileMetadata> {
        let idx = self.bucket_for(filename);
        let bucket = &mut self.buckets[idx];
        let pos = bucket.iter().position(|(name, _)| name == filename)?;
        Some(bucket.remove(pos).1)
    }

    fn iter(&self) -> impl Iterator<Item = (&String, &FileMetadata)> {
        self.buckets.iter().flat_map(|b| b.iter().map(|(name, meta)| (name, meta)))
    }
}

fn hash_str(s: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    s.hash(&mut hasher);
    hasher.finish()
}

/// The store. One outer mutex per bucket; `get` clones so callers never
/// hold a lock past the call.
pub struct MetadataStore {
    outer: Vec<Mutex<Option<InnerTable>>>,
}

impl MetadataStore {
    pub fn new() -> Self {
        Self { outer: (0..OUTER_BUCKETS).map(|_| Mutex::new(None)).collect() }
    }

    fn outer_bucket(&self, filename: &str) -> usize {
        hash_str(filename) as usize % OUTER_BUCKETS
    }

    pub fn get(&self, filename: &str) -> Option<FileMetadata> {
        let guard = self.outer[self.outer_bucket(filename)].lock().unwrap();
        guard.as_ref().and_then(|inner| inner.get(filename)).cloned()
    }

    pub fn insert(&self, filename: impl Into<String>, meta: FileMetadata) {
        let filename = filename.into();
        let mut guard = self.outer[self.outer_bucket(&filename)].lock().unwrap();
        guard.get_or_insert_with(InnerTable::new).insert(filename, meta);
    }

    pub fn remove(&self, filename: &str) -> Option<FileMetadata> {
        let mut guard = self.outer[self.outer_bucket(filename)].lock().unwrap();
        guard.as_mut().and_then(|inner| inner.remove(filename))
    }

    /// Snapshot of every entry, used by the recovery push paths to find
    /// every file this node holds in a given role (primary or backup).
    pub fn entries(&self) -> Vec<(String, FileMetadata)> {
        let mut out = Vec::new();
        for bucket in &self.outer {
            let guard = bucket.lock().unwrap();
            if let Some(inner) = guard.as_ref() {
                out.extend(inner.iter().map(|(name, meta)| (name.clone(), meta.clone())));
            }
        }
        out
    }

    /// Global snapshot: acquires every outer bucket lock, writes the total
    /// count followed by every entry, then releases. Chosen over a
    /// consistent-read-then-write split because saves are infrequent and
    /// an atomic snapshot is worth the stall (spec §5 shared-resource
    /// policy exception b).
    pub fn save(&self, path: &Path) -> Result<()> {
        let guards: Vec<_> = self.outer.iter().map(|m| m.lock().unwrap()).collect();
        let total: usize = guards.iter().filter_map(|g| g.as_ref()).map(|t| t.iter().count()).sum();

        let mut out = BufWriter::new(std::fs::File::create(path)?);
        writeln!(out, "{total}")?;
        for guard in &guards {
            let Some(inner) = guard.as_ref() else { continue };
            for (filename, meta) in inner.iter() {
                writeln!(
                    out,
                    "{}\t{}\t{}\t{}\t{}\t{}\t{}",
                    filename,
                    meta.size,
                    meta.word_count,
                    meta.char_count,
                    secs(meta.atime),
                    secs(meta.mtime),
                    meta.is_backup as u8,
                )?;
            }
        }
        out.flush()?;
        Ok(())
    }

    /// Loads a snapshot written by [`Self::save`]. Tolerant of a line
    /// missing the trailing `is_backup` column (it was added later;
    /// absence defaults to `false`), per spec §4.4.
    pub fn load(&self, path: &Path) -> Result<()> {
        if !path.exists() {
            return Ok(());
        }
        let reader = BufReader::new(std::fs::File::open(path)?);
        let mut lines = reader.lines();
        let Some(_count_line) = lines.next() else { return Ok(()) };
        for line in lines {
            let line = line?;
            let mut fields = line.split('\t');
            let (Some(filename), Some(size), Some(words), Some(chars), Some(atime), Some(mtime)) = (
                fields.next(),
                fields.next(),
                fields.next(),
                fields.next(),
                fields.next(),
                fields.next(),
            ) else {
                continue;
            };
            let is_backup = fields.next().and_then(|v| v.parse::<u8>().ok()).unwrap_or(0) != 0;
            let meta = FileMetadata {
                size: size.parse().unwrap_or(0),
                word_count: words.parse().unwrap_or(0),
                char_count: chars.parse().unwrap_or(0),
                atime: UNIX_EPOCH + Duration::from_secs(atime.parse().unwrap_or(0)),
                mtime: UNIX_EPOCH + Duration::from_secs(mtime.parse().unwrap_or(0)),
                is_backup,
            };
            self.insert(filename.to_string(), meta);
        }
        Ok(())
    }
}

impl Default for MetadataStore {
    fn default() -> Self {
        Self::new()
    }
}

fn secs(t: std::time::SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_get_remove_round_trip() {
        let store = MetadataStore::new();
        assert!(store.get("a.txt").is_none());
        store.insert("a.txt", FileMetadata::empty());
        assert!(store.get("a.txt").is_some());
        assert!(store.remove("a.txt").is_some());
        assert!(store.get("a.txt").is_none());
    }

    #[test]
    fn entries_lists_everything_inserted() {
        let store = MetadataStore::new();
        store.insert("a.txt", FileMetadata::empty());
        store.insert("b.txt", FileMetadata::empty());
        let mut names: Vec<_> = store.entries().into_iter().map(|(name, _)| name).collect();
        names.sort();
        assert_eq!(names, vec!["a.txt", "b.txt"]);
    }

    #[test]
    fn save_and_load_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metadata.snapshot");

        let store = MetadataStore::new();
        let mut meta = FileMetadata::empty();
        meta.size = 42;
        meta.word_count = 7;
        meta.is_backup = true;
        store.insert("doc.txt", meta);
        store.save(&path).unwrap();

        let reloaded = MetadataStore::new();
        reloaded.load(&path).unwrap();
        let got = reloaded.get("doc.txt").unwrap();
        assert_eq!(got.size, 42);
        assert_eq!(got.word_count, 7);
        assert!(got.is_backup);
    }
}
