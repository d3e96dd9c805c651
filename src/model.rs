//! Domain types shared between the Directory Service and Storage Node
//! binaries: file identity, metadata, and SN descriptors.

use std::net::SocketAddr;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::proto::FileMetadataWire;

/// `(owner, filename)` — the universal key for a stored file, shared by the
/// file-map, metadata store, and access control table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId {
    pub owner: String,
    pub filename: String,
}

impl FileId {
    pub fn new(owner: impl Into<String>, filename: impl Into<String>) -> Self {
        Self { owner: owner.into(), filename: filename.into() }
    }

    /// The LRU cache key form used by spec §4.7 (`"owner:filename"`).
    pub fn cache_key(&self) -> String {
        format!("{}:{}", self.owner, self.filename)
    }
}

/// Per-file bookkeeping kept by the metadata store (spec §4.4).
#[derive(Debug, Clone)]
pub struct FileMetadata {
    pub size: u64,
    pub word_count: u32,
    pub char_count: u32,
    pub atime: SystemTime,
    pub mtime: SystemTime,
    pub is_backup: bool,
}

impl FileMetadata {
    pub fn empty() -> Self {
        let now = SystemTime::now();
        Self { size: 0, word_count: 0, char_count: 0, atime: now, mtime: now, is_backup: false }
    }

    pub fn to_wire(&self, filename: &str, owner: &str) -> FileMetadataWire {
        FileMetadataWire {
            filename: filename.to_string(),
            owner: owner.to_string(),
            size: self.size,
            word_count: self.word_count,
            char_count: self.char_count,
            atime_secs: to_unix_secs(self.atime),
            mtime_secs: to_unix_secs(self.mtime),
            is_backup: self.is_backup,
        }
    }
}

pub fn to_unix_secs(t: SystemTime) -> i64 {
    t.duration_since(UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0)
}

/// Recomputes size/word/char counts from file content, per spec §4.3 steps
/// 7-8 and the undo/checkpoint-revert counts recompute.
pub fn counts_from_content(content: &str) -> (u64, u32, u32) {
    let char_count = content.chars().count() as u32;
    let word_count = crate::textmodel::split_sentences(content)
        .iter()
        .map(|s| crate::textmodel::split_words(s).len() as u32)
        .sum();
    (content.len() as u64, word_count, char_count)
}

/// How the DS sees one registered storage node.
#[derive(Debug, Clone)]
pub struct SnDescriptor {
    pub id: u32,
    pub ip: String,
    pub client_port: u16,
    pub backup_port: u16,
    pub ds_command_port: u16,
    pub online: bool,
    pub syncing: bool,
    pub file_count: u64,
    pub backup_of: Option<u32>,
}

impl SnDescriptor {
    pub fn client_addr(&self) -> String {
        format!("{}:{}", self.ip, self.client_port)
    }

    pub fn backup_addr(&self) -> String {
        format!("{}:{}", self.ip, self.backup_port)
    }

    pub fn ds_command_addr(&self) -> String {
        format!("{}:{}", self.ip, self.ds_command_port)
    }

    pub fn socket_addr(&self) -> Option<SocketAddr> {
        self.client_addr().parse().ok()
    }

    pub fn ds_command_socket_addr(&self) -> Option<SocketAddr> {
        self.ds_command_addr().parse().ok()
    }
}
